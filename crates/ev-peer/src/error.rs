use ev_core::{ErrorCode, EvError};

#[derive(Debug, thiserror::Error)]
pub enum PeerError {
    #[error("command '{0}' is already implemented")]
    AlreadyImplemented(String),

    #[error("command on path '{path}' timed out after {elapsed_ms}ms")]
    Timeout { path: String, elapsed_ms: u64 },

    #[error("failed to encode value: {0}")]
    Encode(#[from] serde_json::Error),
}

impl From<PeerError> for EvError {
    fn from(err: PeerError) -> Self {
        match &err {
            PeerError::AlreadyImplemented(_) => {
                EvError::protocol(ErrorCode::ProtocolDoubleImplement, err.to_string())
            }
            PeerError::Timeout { elapsed_ms, .. } => EvError::Timeout {
                elapsed_ms: *elapsed_ms,
            },
            PeerError::Encode(_) => EvError::protocol(ErrorCode::ProtocolMalformedPayload, err.to_string()),
        }
    }
}

pub type PeerResult<T> = Result<T, PeerError>;
