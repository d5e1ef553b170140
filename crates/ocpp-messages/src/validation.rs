//! Payload validation for incoming OCPP requests
//!
//! A [`PayloadSchema`] describes the top-level fields of a request payload.
//! It covers the subset of JSON schema the OCPP PDUs actually rely on:
//! required fields, primitive types, string length and enumerations.

use ocpp_types::CallErrorCode;
use serde_json::Value;
use thiserror::Error;

use crate::commands::IncomingRequestCommand;

/// Expected shape of one payload field
#[derive(Debug, Clone, PartialEq)]
pub enum FieldKind {
    String { max_length: Option<usize> },
    Integer { minimum: Option<i64> },
    Number,
    Boolean,
    Object,
    Array,
    Enum(&'static [&'static str]),
    DateTime,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldRule {
    pub name: &'static str,
    pub kind: FieldKind,
    pub required: bool,
}

/// Reason a payload failed validation
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SchemaViolation {
    #[error("payload is not an object")]
    NotAnObject,

    #[error("missing required field '{field}'")]
    MissingField { field: &'static str },

    #[error("field '{field}' must be {expected}")]
    WrongType {
        field: &'static str,
        expected: &'static str,
    },

    #[error("field '{field}' exceeds {max_length} characters")]
    TooLong {
        field: &'static str,
        max_length: usize,
    },

    #[error("field '{field}' is below minimum {minimum}")]
    BelowMinimum { field: &'static str, minimum: i64 },

    #[error("field '{field}' has value '{value}' outside the allowed set")]
    NotInEnum { field: &'static str, value: String },

    #[error("unexpected field '{field}'")]
    UnexpectedField { field: String },
}

impl SchemaViolation {
    /// CallError code reported to the peer. `shape_error` is the
    /// version-specific code used for structural problems.
    pub fn call_error_code(&self, shape_error: CallErrorCode) -> CallErrorCode {
        match self {
            SchemaViolation::NotAnObject | SchemaViolation::UnexpectedField { .. } => shape_error,
            SchemaViolation::MissingField { .. } => CallErrorCode::OccurrenceConstraintViolation,
            SchemaViolation::WrongType { .. } => CallErrorCode::TypeConstraintViolation,
            SchemaViolation::TooLong { .. }
            | SchemaViolation::BelowMinimum { .. }
            | SchemaViolation::NotInEnum { .. } => CallErrorCode::PropertyConstraintViolation,
        }
    }
}

/// Schema of a command payload
#[derive(Debug, Clone, PartialEq)]
pub struct PayloadSchema {
    pub id: &'static str,
    fields: Vec<FieldRule>,
    additional_properties: bool,
}

impl PayloadSchema {
    pub fn new(id: &'static str) -> Self {
        Self {
            id,
            fields: Vec::new(),
            additional_properties: true,
        }
    }

    pub fn required(mut self, name: &'static str, kind: FieldKind) -> Self {
        self.fields.push(FieldRule {
            name,
            kind,
            required: true,
        });
        self
    }

    pub fn optional(mut self, name: &'static str, kind: FieldKind) -> Self {
        self.fields.push(FieldRule {
            name,
            kind,
            required: false,
        });
        self
    }

    /// Reject fields that are not declared
    pub fn closed(mut self) -> Self {
        self.additional_properties = false;
        self
    }

    pub fn fields(&self) -> &[FieldRule] {
        &self.fields
    }

    /// Check a payload, reporting the first violation found
    pub fn check(&self, payload: &Value) -> Result<(), SchemaViolation> {
        let object = payload.as_object().ok_or(SchemaViolation::NotAnObject)?;

        for rule in &self.fields {
            match object.get(rule.name) {
                None | Some(Value::Null) if rule.required => {
                    return Err(SchemaViolation::MissingField { field: rule.name })
                }
                None | Some(Value::Null) => {}
                Some(value) => check_field(rule, value)?,
            }
        }

        if !self.additional_properties {
            if let Some(unknown) = object
                .keys()
                .find(|key| !self.fields.iter().any(|rule| rule.name == key.as_str()))
            {
                return Err(SchemaViolation::UnexpectedField {
                    field: unknown.clone(),
                });
            }
        }

        Ok(())
    }
}

fn check_field(rule: &FieldRule, value: &Value) -> Result<(), SchemaViolation> {
    let wrong_type = |expected| SchemaViolation::WrongType {
        field: rule.name,
        expected,
    };

    match &rule.kind {
        FieldKind::String { max_length } => {
            let s = value.as_str().ok_or_else(|| wrong_type("a string"))?;
            if let Some(max_length) = *max_length {
                if s.chars().count() > max_length {
                    return Err(SchemaViolation::TooLong {
                        field: rule.name,
                        max_length,
                    });
                }
            }
        }
        FieldKind::Integer { minimum } => {
            let n = value.as_i64().ok_or_else(|| wrong_type("an integer"))?;
            if let Some(minimum) = *minimum {
                if n < minimum {
                    return Err(SchemaViolation::BelowMinimum {
                        field: rule.name,
                        minimum,
                    });
                }
            }
        }
        FieldKind::Number => {
            value.as_f64().ok_or_else(|| wrong_type("a number"))?;
        }
        FieldKind::Boolean => {
            value.as_bool().ok_or_else(|| wrong_type("a boolean"))?;
        }
        FieldKind::Object => {
            value.as_object().ok_or_else(|| wrong_type("an object"))?;
        }
        FieldKind::Array => {
            value.as_array().ok_or_else(|| wrong_type("an array"))?;
        }
        FieldKind::Enum(allowed) => {
            let s = value.as_str().ok_or_else(|| wrong_type("a string"))?;
            if !allowed.contains(&s) {
                return Err(SchemaViolation::NotInEnum {
                    field: rule.name,
                    value: s.to_string(),
                });
            }
        }
        FieldKind::DateTime => {
            let s = value.as_str().ok_or_else(|| wrong_type("a date-time string"))?;
            chrono::DateTime::parse_from_rfc3339(s).map_err(|_| wrong_type("an RFC 3339 date-time"))?;
        }
    }
    Ok(())
}

/// Boolean form of [`PayloadSchema::check`]
pub fn validate(schema: &PayloadSchema, payload: &Value) -> bool {
    schema.check(payload).is_ok()
}

const ID_TOKEN: FieldKind = FieldKind::String {
    max_length: Some(20),
};

/// Schemas of the OCPP 1.6 incoming requests
pub fn v16j_incoming_schema(command: IncomingRequestCommand) -> Option<PayloadSchema> {
    let schema = match command {
        IncomingRequestCommand::ClearCache => PayloadSchema::new("ClearCache").closed(),
        IncomingRequestCommand::Reset => PayloadSchema::new("Reset")
            .required("type", FieldKind::Enum(&["Hard", "Soft"]))
            .closed(),
        IncomingRequestCommand::RemoteStartTransaction => {
            PayloadSchema::new("RemoteStartTransaction")
                .optional("connectorId", FieldKind::Integer { minimum: Some(1) })
                .required("idTag", ID_TOKEN)
                .optional("chargingProfile", FieldKind::Object)
                .closed()
        }
        IncomingRequestCommand::RemoteStopTransaction => PayloadSchema::new("RemoteStopTransaction")
            .required("transactionId", FieldKind::Integer { minimum: None })
            .closed(),
        IncomingRequestCommand::GetConfiguration => PayloadSchema::new("GetConfiguration")
            .optional("key", FieldKind::Array)
            .closed(),
        IncomingRequestCommand::ChangeConfiguration => PayloadSchema::new("ChangeConfiguration")
            .required(
                "key",
                FieldKind::String {
                    max_length: Some(50),
                },
            )
            .required(
                "value",
                FieldKind::String {
                    max_length: Some(500),
                },
            )
            .closed(),
    };
    Some(schema)
}

/// Schemas of the OCPP 2.0.1 incoming requests
pub fn v201_incoming_schema(command: IncomingRequestCommand) -> Option<PayloadSchema> {
    match command {
        IncomingRequestCommand::ClearCache => Some(
            PayloadSchema::new("ClearCacheRequest")
                .optional("customData", FieldKind::Object)
                .closed(),
        ),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_clear_cache_accepts_empty_object() {
        let schema = v16j_incoming_schema(IncomingRequestCommand::ClearCache).unwrap();
        assert!(validate(&schema, &json!({})));
        assert!(!validate(&schema, &json!([])));
        assert_eq!(
            schema.check(&json!({"extra": 1})),
            Err(SchemaViolation::UnexpectedField {
                field: "extra".to_string()
            })
        );
    }

    #[test]
    fn test_remote_start_constraints() {
        let schema = v16j_incoming_schema(IncomingRequestCommand::RemoteStartTransaction).unwrap();
        assert!(validate(&schema, &json!({"idTag": "TAG1", "connectorId": 1})));
        assert_eq!(
            schema.check(&json!({"connectorId": 1})),
            Err(SchemaViolation::MissingField { field: "idTag" })
        );
        assert!(matches!(
            schema.check(&json!({"idTag": "X".repeat(21)})),
            Err(SchemaViolation::TooLong { max_length: 20, .. })
        ));
        assert!(matches!(
            schema.check(&json!({"idTag": "TAG", "connectorId": 0})),
            Err(SchemaViolation::BelowMinimum { .. })
        ));
    }

    #[test]
    fn test_reset_enum() {
        let schema = v16j_incoming_schema(IncomingRequestCommand::Reset).unwrap();
        assert!(validate(&schema, &json!({"type": "Hard"})));
        assert!(matches!(
            schema.check(&json!({"type": "Medium"})),
            Err(SchemaViolation::NotInEnum { .. })
        ));
        assert!(matches!(
            schema.check(&json!({"type": 1})),
            Err(SchemaViolation::WrongType { .. })
        ));
    }

    #[test]
    fn test_violation_error_codes() {
        assert_eq!(
            SchemaViolation::NotAnObject.call_error_code(CallErrorCode::FormatViolation),
            CallErrorCode::FormatViolation
        );
        assert_eq!(
            SchemaViolation::MissingField { field: "idTag" }
                .call_error_code(CallErrorCode::FormationViolation),
            CallErrorCode::OccurrenceConstraintViolation
        );
    }

    #[test]
    fn test_v201_has_no_schema_for_unsupported_commands() {
        assert!(v201_incoming_schema(IncomingRequestCommand::ClearCache).is_some());
        assert!(v201_incoming_schema(IncomingRequestCommand::Reset).is_none());
    }

    #[test]
    fn test_date_time_field() {
        let schema = PayloadSchema::new("Probe").required("at", FieldKind::DateTime);
        assert!(validate(&schema, &json!({"at": "2024-05-01T10:00:00Z"})));
        assert!(!validate(&schema, &json!({"at": "yesterday"})));
    }
}
