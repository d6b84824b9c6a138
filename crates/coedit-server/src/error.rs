use coedit_protocol::ErrorCode;
use thiserror::Error;

/// Client-induced failures, returned to the originator only.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ServerError {
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("document not found: {0}")]
    DocumentNotFound(String),
    #[error("invalid operation: {0}")]
    InvalidOperation(String),
    #[error("rate limited")]
    RateLimited,
    #[error("server error: {0}")]
    Internal(String),
}

impl ServerError {
    pub fn code(&self) -> ErrorCode {
        match self {
            ServerError::Unauthorized(_) => ErrorCode::Unauthorized,
            ServerError::Forbidden(_) => ErrorCode::Forbidden,
            ServerError::DocumentNotFound(_) => ErrorCode::DocumentNotFound,
            ServerError::InvalidOperation(_) => ErrorCode::InvalidOperation,
            ServerError::RateLimited => ErrorCode::RateLimited,
            ServerError::Internal(_) => ErrorCode::ServerError,
        }
    }
}

impl From<coedit_ot::OtError> for ServerError {
    fn from(err: coedit_ot::OtError) -> Self {
        ServerError::InvalidOperation(err.to_string())
    }
}

impl From<coedit_common::IdError> for ServerError {
    fn from(err: coedit_common::IdError) -> Self {
        ServerError::InvalidOperation(format!("bad identifier: {err}"))
    }
}
