//! Dispatcher errors.

use epu_core::ErrorKind;
use thiserror::Error;

pub type DispatchResult<T> = Result<T, DispatchError>;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("process not found: {0}")]
    ProcessNotFound(String),

    #[error("process already exists: {0}")]
    ProcessAlreadyExists(String),

    #[error("unknown deployable type in ee registry: {0}")]
    UnknownDeployableType(String),

    #[error("ee agent call failed: {0}")]
    Transport(#[from] anyhow::Error),

    #[error("handler not implemented: {0}")]
    NotImplemented(String),
}

impl DispatchError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DispatchError::ProcessNotFound(_) => ErrorKind::NotFound,
            DispatchError::ProcessAlreadyExists(_) => ErrorKind::AlreadyExists,
            DispatchError::UnknownDeployableType(_) => ErrorKind::Configuration,
            DispatchError::Transport(_) => ErrorKind::Transport,
            DispatchError::NotImplemented(_) => ErrorKind::NotImplemented,
        }
    }
}
