//! Wire protocol for Coedit
//!
//! JSON messages over WebSocket. Every message is an object with a `type`
//! tag and a `timestamp` (ms since epoch); operation payloads are flat, with
//! unknown fields preserved so older peers can relay newer operations
//! unchanged.

pub mod message;
pub mod operation;
pub mod presence;
pub mod value;

pub use message::{ClientInfo, ClientMessage, ErrorCode, ServerMessage};
pub use operation::{Operation, OperationKind};
pub use presence::{CursorPosition, Presence};
pub use value::{DocumentSchema, DocumentValue};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("invalid identifier: {0}")]
    InvalidId(#[from] coedit_common::IdError),
}

/// Decode one client-to-server frame.
pub fn parse_client_message(raw: &str) -> Result<ClientMessage, ProtocolError> {
    Ok(serde_json::from_str(raw)?)
}

/// Decode one server-to-client frame.
pub fn parse_server_message(raw: &str) -> Result<ServerMessage, ProtocolError> {
    Ok(serde_json::from_str(raw)?)
}
