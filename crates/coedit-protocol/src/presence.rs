//! Presence: soft, per-client, per-document awareness state
//!
//! Lost on disconnect, rebuilt on join. No durability, FIFO per sender.

use coedit_common::ClientId;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CursorPosition {
    pub position: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selection: Option<(usize, usize)>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Presence {
    pub client_id: ClientId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<CursorPosition>,
    /// Ms since epoch, stamped by the coordinator on receipt.
    pub last_seen: i64,
    pub is_online: bool,
}

impl Presence {
    /// A bare online record for a client with no profile data yet.
    pub fn online(client_id: ClientId, last_seen: i64) -> Self {
        Self {
            client_id,
            user_id: None,
            name: None,
            avatar: None,
            cursor: None,
            last_seen,
            is_online: true,
        }
    }
}
