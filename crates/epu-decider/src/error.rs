//! Decider errors.

use epu_core::ErrorKind;
use epu_engine::EngineError;
use epu_store::StoreError;
use thiserror::Error;

pub type DeciderResult<T> = Result<T, DeciderError>;

#[derive(Debug, Error)]
pub enum DeciderError {
    #[error("domain not found: {0}/{1}")]
    DomainNotFound(String, String),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("provisioner call failed: {0}")]
    Transport(#[from] anyhow::Error),
}

impl DeciderError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DeciderError::DomainNotFound(..) => ErrorKind::NotFound,
            DeciderError::Engine(e) => e.kind(),
            DeciderError::Store(e) => e.kind(),
            DeciderError::Transport(_) => ErrorKind::Transport,
        }
    }
}
