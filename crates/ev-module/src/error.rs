use ev_core::EvError;

use crate::state::BootstrapState;

#[derive(Debug, thiserror::Error)]
pub enum ModuleError {
    #[error("module peer can only be bypassed once")]
    AlreadyBypassed,

    #[error("say_hello is not allowed in state {0:?}")]
    WrongStateForHello(BootstrapState),

    #[error("init_done is not allowed in state {0:?}")]
    WrongStateForInitDone(BootstrapState),

    #[error("say_hello would block forever: the IO sync thread is not running")]
    IoSyncNotRunning,

    #[error("the IO sync thread has already been spawned")]
    IoSyncAlreadyRunning,

    #[error(transparent)]
    ModuleModel(#[from] ev_module_model::ModuleModelError),

    #[error(transparent)]
    Peer(#[from] ev_peer::PeerError),
}

impl From<ModuleError> for EvError {
    fn from(err: ModuleError) -> Self {
        match err {
            ModuleError::ModuleModel(e) => e.into(),
            ModuleError::Peer(e) => e.into(),
            other => EvError::state(other.to_string()),
        }
    }
}

pub type ModuleResult<T> = Result<T, ModuleError>;
