use coedit_protocol::ErrorCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("not connected")]
    NotConnected,
    #[error("connection timed out")]
    Timeout,
    #[error("authentication failed: {0}")]
    AuthFailed(String),
    #[error("document {0} is not open")]
    DocumentNotOpen(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("protocol error: {0}")]
    Protocol(#[from] coedit_protocol::ProtocolError),
    #[error(transparent)]
    InvalidOperation(#[from] coedit_ot::OtError),
    #[error("server rejected request: {code:?}: {message}")]
    Server { code: ErrorCode, message: String },
    #[error("session is shutting down")]
    Closed,
}

impl From<tokio_tungstenite::tungstenite::Error> for ClientError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        ClientError::Transport(err.to_string())
    }
}
