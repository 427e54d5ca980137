use ev_core::{ErrorCode, EvError};

use crate::supervisor::SupervisorError;

#[derive(Debug, thiserror::Error)]
pub enum ManagerError {
    #[error(transparent)]
    Peer(#[from] ev_peer::PeerError),

    #[error(transparent)]
    Supervisor(#[from] SupervisorError),

    #[error(transparent)]
    Config(#[from] ev_config::ConfigError),

    #[error("module '{0}' has no resolved deployment entry")]
    UnknownModule(String),
}

impl From<ManagerError> for EvError {
    fn from(err: ManagerError) -> Self {
        let message = err.to_string();
        match err {
            ManagerError::Peer(inner) => inner.into(),
            ManagerError::Supervisor(inner) => EvError::Fatal { message: inner.to_string() },
            ManagerError::Config(inner) => inner.into(),
            ManagerError::UnknownModule(_) => EvError::topology(ErrorCode::TopologyMissingTarget, message),
        }
    }
}

pub type ManagerResult<T> = Result<T, ManagerError>;
