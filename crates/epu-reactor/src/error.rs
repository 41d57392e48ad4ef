//! Reactor errors.

use epu_core::ErrorKind;
use epu_store::StoreError;
use thiserror::Error;

pub type ReactorResult<T> = Result<T, ReactorError>;

#[derive(Debug, Error)]
pub enum ReactorError {
    #[error("domain not found: {0}/{1}")]
    DomainNotFound(String, String),

    #[error("domain already exists: {0}/{1}")]
    DomainAlreadyExists(String, String),

    #[error("instance has no known domain: {0}")]
    InstanceNotFound(String),

    #[error("handler not implemented: {0}")]
    NotImplemented(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ReactorError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ReactorError::DomainNotFound(..) | ReactorError::InstanceNotFound(_) => ErrorKind::NotFound,
            ReactorError::DomainAlreadyExists(..) => ErrorKind::AlreadyExists,
            ReactorError::NotImplemented(_) => ErrorKind::NotImplemented,
            ReactorError::Store(e) => e.kind(),
        }
    }
}
