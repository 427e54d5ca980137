use ev_core::{ErrorCode, EvError, Fulfillment};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {what} at '{path}': {source}")]
    Io {
        what: &'static str,
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("deployment config document is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error(transparent)]
    Schema(#[from] ev_schema::SchemaError),

    #[error(transparent)]
    ModuleModel(#[from] ev_module_model::ModuleModelError),

    #[error("module '{module_id}' lists itself as a fulfillment for its own requirement '{requirement_id}'")]
    SelfFulfillment { module_id: String, requirement_id: String },

    #[error(
        "requirement '{requirement_id}' of module '{module_id}' is fulfilled by '{fulfillment}', which is not listed in the deployment config"
    )]
    MissingFulfillmentTarget {
        module_id: String,
        requirement_id: String,
        fulfillment: Fulfillment,
    },

    #[error(
        "requirement '{requirement_id}' of module '{module_id}' is fulfilled by '{fulfillment}', which has no implementation '{}'",
        fulfillment.implementation_id
    )]
    UnknownFulfillmentImplementation {
        module_id: String,
        requirement_id: String,
        fulfillment: Fulfillment,
    },

    #[error(
        "requirement '{requirement_id}' of module '{module_id}' needs interface '{expected}', but fulfillment '{fulfillment}' provides '{actual}'"
    )]
    InterfaceMismatch {
        module_id: String,
        requirement_id: String,
        fulfillment: Fulfillment,
        expected: String,
        actual: String,
    },
}

impl From<ConfigError> for EvError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Schema(e) => e.into(),
            ConfigError::ModuleModel(e) => e.into(),
            ConfigError::InvalidJson(e) => EvError::SchemaValidation {
                code: ErrorCode::SchemaInvalidPayload,
                pointer: String::new(),
                message: e.to_string(),
            },
            ConfigError::Io { .. } => EvError::Fatal { message: err.to_string() },
            ConfigError::SelfFulfillment { .. } => EvError::topology(ErrorCode::TopologySelfFulfillment, err.to_string()),
            ConfigError::MissingFulfillmentTarget { .. } => {
                EvError::topology(ErrorCode::TopologyMissingTarget, err.to_string())
            }
            ConfigError::UnknownFulfillmentImplementation { .. } => {
                EvError::topology(ErrorCode::TopologyMissingTarget, err.to_string())
            }
            ConfigError::InterfaceMismatch { .. } => {
                EvError::topology(ErrorCode::TopologyInterfaceMismatch, err.to_string())
            }
        }
    }
}

pub type ConfigResult<T> = Result<T, ConfigError>;
