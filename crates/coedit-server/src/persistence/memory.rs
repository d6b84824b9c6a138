//! In-process store, the default adapter.

use super::{AppliedOperation, DocumentStore, PersistedDocument};
use async_trait::async_trait;
use coedit_common::DocumentId;
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Default)]
pub struct MemoryStore {
    documents: RwLock<HashMap<DocumentId, PersistedDocument>>,
    operations: RwLock<HashMap<DocumentId, Vec<AppliedOperation>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn save_document(&self, state: &PersistedDocument) -> anyhow::Result<()> {
        self.documents
            .write()
            .await
            .insert(state.id.clone(), state.clone());
        Ok(())
    }

    async fn load_document(&self, id: &DocumentId) -> anyhow::Result<Option<PersistedDocument>> {
        Ok(self.documents.read().await.get(id).cloned())
    }

    async fn save_operation(&self, id: &DocumentId, op: &AppliedOperation) -> anyhow::Result<()> {
        self.operations
            .write()
            .await
            .entry(id.clone())
            .or_default()
            .push(op.clone());
        Ok(())
    }

    async fn load_operations(
        &self,
        id: &DocumentId,
        since_version: u64,
    ) -> anyhow::Result<Vec<AppliedOperation>> {
        Ok(self
            .operations
            .read()
            .await
            .get(id)
            .map(|ops| {
                ops.iter()
                    .filter(|op| op.applied_version > since_version)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn delete_document(&self, id: &DocumentId) -> anyhow::Result<()> {
        self.documents.write().await.remove(id);
        self.operations.write().await.remove(id);
        Ok(())
    }

    async fn list_documents(&self) -> anyhow::Result<Vec<DocumentId>> {
        Ok(self.documents.read().await.keys().cloned().collect())
    }
}
