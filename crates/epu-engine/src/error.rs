//! Decision engine errors.

use epu_core::ErrorKind;
use thiserror::Error;

pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("engine configuration error: {0}")]
    Configuration(String),

    #[error("engine not found: {0}")]
    NotFound(String),
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::Configuration(_) => ErrorKind::Configuration,
            EngineError::NotFound(_) => ErrorKind::NotFound,
        }
    }
}
