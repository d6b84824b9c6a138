//! WebSocket message envelopes
//!
//! Internally tagged on `type` with snake_case tags; payload fields are
//! camelCase. Correlation `id`s are optional everywhere so minimal clients
//! can omit them.

use crate::operation::Operation;
use crate::presence::Presence;
use crate::value::{DocumentSchema, DocumentValue};
use coedit_common::{ClientId, DocumentId, OperationId};
use serde::{Deserialize, Serialize};

/// Identity the auth service hands back for an accepted client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientInfo {
    pub client_id: ClientId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
}

impl ClientInfo {
    pub fn anonymous(client_id: ClientId) -> Self {
        Self {
            client_id,
            user_id: None,
            name: None,
            avatar: None,
        }
    }
}

/// Error codes carried in `error.code` and `operation_failed.code`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    Unauthorized,
    Forbidden,
    DocumentNotFound,
    InvalidOperation,
    RateLimited,
    ServerError,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    #[serde(rename_all = "camelCase")]
    Authenticate {
        timestamp: i64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        /// Client re-declares its own id here, otherwise the coordinator's
        /// minted id stands.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        client_id: Option<ClientId>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        token: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    JoinDocument {
        timestamp: i64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        document_id: DocumentId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        schema: Option<DocumentSchema>,
    },
    #[serde(rename_all = "camelCase")]
    LeaveDocument {
        timestamp: i64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        document_id: DocumentId,
    },
    #[serde(rename_all = "camelCase")]
    Operation {
        timestamp: i64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        document_id: DocumentId,
        operation: Operation,
    },
    #[serde(rename_all = "camelCase")]
    PresenceUpdate {
        timestamp: i64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        document_id: DocumentId,
        presence: Presence,
    },
    #[serde(rename_all = "camelCase")]
    Ping {
        timestamp: i64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    #[serde(rename_all = "camelCase")]
    AuthRequired { timestamp: i64 },
    #[serde(rename_all = "camelCase")]
    AuthSuccess {
        timestamp: i64,
        client_info: ClientInfo,
    },
    #[serde(rename_all = "camelCase")]
    AuthFailed { timestamp: i64, reason: String },
    #[serde(rename_all = "camelCase")]
    DocumentJoined {
        timestamp: i64,
        document_id: DocumentId,
        version: u64,
        schema: DocumentSchema,
        state: DocumentValue,
        users: Vec<Presence>,
    },
    #[serde(rename_all = "camelCase")]
    DocumentLeft {
        timestamp: i64,
        document_id: DocumentId,
    },
    /// Full resync snapshot outside the join flow.
    #[serde(rename_all = "camelCase")]
    DocumentState {
        timestamp: i64,
        document_id: DocumentId,
        version: u64,
        state: DocumentValue,
    },
    #[serde(rename_all = "camelCase")]
    Operation {
        timestamp: i64,
        document_id: DocumentId,
        operation: Operation,
    },
    #[serde(rename_all = "camelCase")]
    OperationApplied {
        timestamp: i64,
        document_id: DocumentId,
        operation_id: OperationId,
        version: u64,
    },
    #[serde(rename_all = "camelCase")]
    OperationFailed {
        timestamp: i64,
        document_id: DocumentId,
        operation_id: OperationId,
        code: ErrorCode,
        reason: String,
    },
    #[serde(rename_all = "camelCase")]
    PresenceUpdate {
        timestamp: i64,
        document_id: DocumentId,
        presence: Presence,
    },
    #[serde(rename_all = "camelCase")]
    PresenceState {
        timestamp: i64,
        document_id: DocumentId,
        users: Vec<Presence>,
    },
    #[serde(rename_all = "camelCase")]
    UserJoined {
        timestamp: i64,
        document_id: DocumentId,
        user: Presence,
    },
    #[serde(rename_all = "camelCase")]
    UserLeft {
        timestamp: i64,
        document_id: DocumentId,
        client_id: ClientId,
    },
    #[serde(rename_all = "camelCase")]
    Error {
        timestamp: i64,
        code: ErrorCode,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        document_id: Option<DocumentId>,
    },
    #[serde(rename_all = "camelCase")]
    Pong { timestamp: i64 },
}

impl ServerMessage {
    /// The document this message belongs to, when scoped to one.
    pub fn document_id(&self) -> Option<&DocumentId> {
        match self {
            ServerMessage::DocumentJoined { document_id, .. }
            | ServerMessage::DocumentLeft { document_id, .. }
            | ServerMessage::DocumentState { document_id, .. }
            | ServerMessage::Operation { document_id, .. }
            | ServerMessage::OperationApplied { document_id, .. }
            | ServerMessage::OperationFailed { document_id, .. }
            | ServerMessage::PresenceUpdate { document_id, .. }
            | ServerMessage::PresenceState { document_id, .. }
            | ServerMessage::UserJoined { document_id, .. }
            | ServerMessage::UserLeft { document_id, .. } => Some(document_id),
            ServerMessage::Error { document_id, .. } => document_id.as_ref(),
            _ => None,
        }
    }
}
