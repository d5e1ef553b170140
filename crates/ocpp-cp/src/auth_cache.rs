//! Authorized tags cache
//!
//! Tag lists are read from authorization files (JSON arrays of id tags) and
//! kept in memory keyed by file path. Stations built from the same template
//! share one entry.

use crate::error::{StationError, StationResult};
use dashmap::DashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Default)]
pub struct AuthorizedTagsCache {
    tags: DashMap<String, Arc<Vec<String>>>,
}

impl AuthorizedTagsCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached tags of `file`, loading them on first use
    pub fn get_authorized_tags(&self, file: &str) -> StationResult<Arc<Vec<String>>> {
        if let Some(tags) = self.tags.get(file) {
            return Ok(tags.clone());
        }

        let tags = Arc::new(load_tags(Path::new(file))?);
        debug!("Loaded {} authorized tags from {}", tags.len(), file);
        Ok(self
            .tags
            .entry(file.to_string())
            .or_insert(tags)
            .value()
            .clone())
    }

    pub fn set_authorized_tags(&self, file: &str, tags: Vec<String>) {
        self.tags.insert(file.to_string(), Arc::new(tags));
    }

    /// Drop the cached entry. Returns whether there was one.
    pub fn delete_authorized_tags(&self, file: &str) -> bool {
        self.tags.remove(file).is_some()
    }

    pub fn has_authorized_tags(&self, file: &str) -> bool {
        self.tags.contains_key(file)
    }
}

fn load_tags(path: &Path) -> StationResult<Vec<String>> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| StationError::template(path.display().to_string(), e.to_string()))?;
    serde_json::from_str(&content)
        .map_err(|e| StationError::template(path.display().to_string(), e.to_string()))
}
