//! JSON file store
//!
//! One `docs/<id>.json` snapshot per document (atomic tmp-file + rename
//! writes) plus an append-only `ops/<id>.jsonl` operation log.

use super::{AppliedOperation, DocumentStore, PersistedDocument};
use anyhow::Context;
use async_trait::async_trait;
use coedit_common::DocumentId;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::warn;

pub struct JsonFileStore {
    docs_dir: PathBuf,
    ops_dir: PathBuf,
}

impl JsonFileStore {
    pub async fn new(base_dir: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let base = base_dir.into();
        let store = Self {
            docs_dir: base.join("docs"),
            ops_dir: base.join("ops"),
        };
        fs::create_dir_all(&store.docs_dir)
            .await
            .context("creating docs dir")?;
        fs::create_dir_all(&store.ops_dir)
            .await
            .context("creating ops dir")?;
        Ok(store)
    }

    fn doc_path(&self, id: &DocumentId) -> PathBuf {
        self.docs_dir.join(format!("{id}.json"))
    }

    fn ops_path(&self, id: &DocumentId) -> PathBuf {
        self.ops_dir.join(format!("{id}.jsonl"))
    }

    async fn write_atomic(path: &Path, contents: &[u8]) -> anyhow::Result<()> {
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, contents)
            .await
            .with_context(|| format!("writing {tmp:?}"))?;
        fs::rename(&tmp, path)
            .await
            .with_context(|| format!("renaming into {path:?}"))?;
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for JsonFileStore {
    async fn save_document(&self, state: &PersistedDocument) -> anyhow::Result<()> {
        let json = serde_json::to_vec_pretty(state)?;
        Self::write_atomic(&self.doc_path(&state.id), &json).await
    }

    async fn load_document(&self, id: &DocumentId) -> anyhow::Result<Option<PersistedDocument>> {
        let path = self.doc_path(id);
        match fs::read_to_string(&path).await {
            Ok(contents) => Ok(Some(
                serde_json::from_str(&contents).with_context(|| format!("parsing {path:?}"))?,
            )),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("reading {path:?}")),
        }
    }

    async fn save_operation(&self, id: &DocumentId, op: &AppliedOperation) -> anyhow::Result<()> {
        let mut line = serde_json::to_vec(op)?;
        line.push(b'\n');
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.ops_path(id))
            .await
            .context("opening operation log")?;
        file.write_all(&line).await.context("appending operation")?;
        Ok(())
    }

    async fn load_operations(
        &self,
        id: &DocumentId,
        since_version: u64,
    ) -> anyhow::Result<Vec<AppliedOperation>> {
        let path = self.ops_path(id);
        let contents = match fs::read_to_string(&path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e).with_context(|| format!("reading {path:?}")),
        };
        let mut ops = Vec::new();
        for line in contents.lines() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<AppliedOperation>(line) {
                Ok(op) if op.applied_version > since_version => ops.push(op),
                Ok(_) => {}
                // A torn tail from a crash mid-append is expected; skip it.
                Err(e) => warn!(document = %id, error = %e, "skipping bad log line"),
            }
        }
        ops.sort_by_key(|op| op.applied_version);
        Ok(ops)
    }

    async fn delete_document(&self, id: &DocumentId) -> anyhow::Result<()> {
        for path in [self.doc_path(id), self.ops_path(id)] {
            match fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e).with_context(|| format!("removing {path:?}")),
            }
        }
        Ok(())
    }

    async fn list_documents(&self) -> anyhow::Result<Vec<DocumentId>> {
        let mut ids = Vec::new();
        let mut entries = fs::read_dir(&self.docs_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|s| s.to_str()) != Some("json") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                match DocumentId::parse(stem) {
                    Ok(id) => ids.push(id),
                    Err(_) => warn!(?path, "ignoring file with invalid document id"),
                }
            }
        }
        Ok(ids)
    }
}
