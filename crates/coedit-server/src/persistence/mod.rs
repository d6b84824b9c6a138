//! Persistence adapter contract
//!
//! The document authority calls the store after every apply, fail-soft: an
//! adapter error is logged and the in-memory state stays authoritative.

mod json_store;
mod memory;

pub use json_store::JsonFileStore;
pub use memory::MemoryStore;

use async_trait::async_trait;
use coedit_common::DocumentId;
use coedit_protocol::{DocumentSchema, DocumentValue, Operation};
use serde::{Deserialize, Serialize};

/// Durable snapshot of a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedDocument {
    pub id: DocumentId,
    pub schema: DocumentSchema,
    pub version: u64,
    pub value: DocumentValue,
    pub created_at: i64,
    pub updated_at: i64,
}

/// An operation with the canonical version the authority assigned to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppliedOperation {
    pub applied_version: u64,
    pub operation: Operation,
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn save_document(&self, state: &PersistedDocument) -> anyhow::Result<()>;
    async fn load_document(&self, id: &DocumentId) -> anyhow::Result<Option<PersistedDocument>>;
    async fn save_operation(&self, id: &DocumentId, op: &AppliedOperation) -> anyhow::Result<()>;
    /// Operations with `applied_version > since_version`, ascending.
    async fn load_operations(
        &self,
        id: &DocumentId,
        since_version: u64,
    ) -> anyhow::Result<Vec<AppliedOperation>>;
    async fn delete_document(&self, id: &DocumentId) -> anyhow::Result<()>;
    async fn list_documents(&self) -> anyhow::Result<Vec<DocumentId>>;
}
