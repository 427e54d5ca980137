use ev_core::{ErrorCode, EvError};

#[derive(Debug, thiserror::Error)]
pub enum ModuleModelError {
    #[error("implementation with id '{0}' already exists")]
    DuplicateImplementation(String),

    #[error("requirement with id '{0}' already exists")]
    DuplicateRequirement(String),

    #[error("interface '{interface}' supplied by '{owner}' already exists with a different hash")]
    InterfaceHashMismatch { interface: String, owner: String },

    #[error("implementation id '{0}' does not exist")]
    UnknownImplementation(String),

    #[error("requirement id '{0}' does not exist")]
    UnknownRequirement(String),

    #[error("interface '{0}' referenced by manifest does not exist, fatal")]
    MissingInterface(String),

    #[error("interface does not have command '{0}'")]
    UnknownCommand(String),

    #[error("interface does not have variable '{0}'")]
    UnknownVariable(String),

    #[error("the module setup has not been done yet")]
    SetupNotDone,

    #[error("the module setup has been done already")]
    SetupAlreadyDone,

    #[error("cannot setup module: {0} fulfillments for requirement '{1}' but requires at least {2}")]
    TooFewFulfillments(usize, String, u32),

    #[error("cannot setup module: {0} fulfillments for requirement '{1}' but at most {2} are allowed")]
    TooManyFulfillments(usize, String, u32),

    #[error("found fulfillments for unknown requirement id '{0}'")]
    UnknownFulfillmentRequirement(String),

    #[error("no fulfillment has been set up for requirement '{0}'")]
    NoFulfillmentForRequirement(String),
}

impl From<ModuleModelError> for EvError {
    fn from(err: ModuleModelError) -> Self {
        use ModuleModelError::*;
        match &err {
            DuplicateImplementation(_) | DuplicateRequirement(_) | InterfaceHashMismatch { .. } => {
                EvError::topology(ErrorCode::TopologyHashMismatch, err.to_string())
            }
            TooFewFulfillments(..) | TooManyFulfillments(..) => {
                EvError::topology(ErrorCode::TopologyCardinality, err.to_string())
            }
            UnknownFulfillmentRequirement(_) => EvError::topology(ErrorCode::TopologyMissingTarget, err.to_string()),
            SetupNotDone | SetupAlreadyDone => EvError::state(err.to_string()),
            _ => EvError::topology(ErrorCode::TopologyMissingTarget, err.to_string()),
        }
    }
}

pub type ModuleModelResult<T> = Result<T, ModuleModelError>;
