use ev_core::{ErrorCode, EvError};

/// Errors raised while parsing or validating a manifest, interface, or
/// config document.
#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("document is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("schema validation failed at {pointer}: {message}")]
    Validation { pointer: String, message: String },

    #[error("{message}")]
    MissingDefault { message: String },

    #[error("{message}")]
    Topology { message: String },
}

impl From<SchemaError> for EvError {
    fn from(err: SchemaError) -> Self {
        match err {
            SchemaError::Json(e) => EvError::SchemaValidation {
                code: ErrorCode::SchemaInvalidPayload,
                pointer: String::new(),
                message: e.to_string(),
            },
            SchemaError::Validation { pointer, message } => EvError::SchemaValidation {
                code: ErrorCode::SchemaInvalidPayload,
                pointer,
                message,
            },
            SchemaError::MissingDefault { message } => EvError::SchemaValidation {
                code: ErrorCode::SchemaMissingDefault,
                pointer: String::new(),
                message,
            },
            SchemaError::Topology { message } => {
                EvError::topology(ErrorCode::TopologyCardinality, message)
            }
        }
    }
}

pub type SchemaResult<T> = Result<T, SchemaError>;
