//! Shared collaborative map

use crate::diff;
use crate::events::{Event, EventEmitter};
use crate::Snapshot;
use coedit_common::{mint_operation_id, now_ms, ClientId};
use coedit_ot::OtError;
use coedit_protocol::{DocumentValue, Operation, OperationKind};
use serde_json::{Map, Value};
use tracing::debug;

/// One step of an atomic batch.
#[derive(Debug, Clone, PartialEq)]
pub enum MapBatchEntry {
    Set { key: String, value: Value },
    Delete { key: String },
}

pub struct SharedMap {
    client_id: ClientId,
    entries: Map<String, Value>,
    version: u64,
    events: EventEmitter,
}

impl SharedMap {
    pub fn new(client_id: ClientId) -> Self {
        Self::with_state(client_id, Map::new(), 0)
    }

    pub fn with_state(client_id: ClientId, entries: Map<String, Value>, version: u64) -> Self {
        Self {
            client_id,
            entries,
            version,
            events: EventEmitter::new(),
        }
    }

    pub fn from_snapshot(client_id: ClientId, snapshot: Snapshot) -> Self {
        match snapshot.value {
            DocumentValue::Map(entries) => Self::with_state(client_id, entries, snapshot.version),
            other => {
                debug!("map snapshot had {} shape, starting empty", other.schema());
                Self::with_state(client_id, Map::new(), snapshot.version)
            }
        }
    }

    pub fn value(&self) -> Map<String, Value> {
        self.entries.clone()
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.entries.get(key).cloned()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn keys(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn client_id(&self) -> &ClientId {
        &self.client_id
    }

    pub fn events(&self) -> &EventEmitter {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn build(&self, kind: OperationKind) -> Operation {
        Operation::new(
            mint_operation_id(),
            self.client_id.clone(),
            self.version,
            now_ms(),
            kind,
        )
    }

    pub fn set(&mut self, key: &str, value: Value) -> Result<Operation, OtError> {
        if key.is_empty() {
            return Err(OtError::InvalidOperation("map key must be non-empty".into()));
        }
        let op = self.build(OperationKind::MapSet {
            key: key.to_owned(),
            value,
            previous_value: self.entries.get(key).cloned(),
        });
        self.apply(&op)?;
        Ok(op)
    }

    /// Deleting an absent key is allowed; the operation records no previous
    /// value.
    pub fn delete(&mut self, key: &str) -> Result<Operation, OtError> {
        if key.is_empty() {
            return Err(OtError::InvalidOperation("map key must be non-empty".into()));
        }
        let op = self.build(OperationKind::MapDelete {
            key: key.to_owned(),
            previous_value: self.entries.get(key).cloned(),
        });
        self.apply(&op)?;
        Ok(op)
    }

    /// Apply several sets and deletes atomically.
    pub fn batch(&mut self, entries: Vec<MapBatchEntry>) -> Result<Operation, OtError> {
        let timestamp = now_ms();
        let mut staged = self.entries.clone();
        let mut operations = Vec::with_capacity(entries.len());
        for entry in entries {
            let kind = match entry {
                MapBatchEntry::Set { key, value } => {
                    if key.is_empty() {
                        return Err(OtError::InvalidOperation(
                            "map key must be non-empty".into(),
                        ));
                    }
                    let previous_value = staged.insert(key.clone(), value.clone());
                    OperationKind::MapSet {
                        key,
                        value,
                        previous_value,
                    }
                }
                MapBatchEntry::Delete { key } => {
                    if key.is_empty() {
                        return Err(OtError::InvalidOperation(
                            "map key must be non-empty".into(),
                        ));
                    }
                    let previous_value = staged.remove(&key);
                    OperationKind::MapDelete {
                        key,
                        previous_value,
                    }
                }
            };
            operations.push(Operation::new(
                mint_operation_id(),
                self.client_id.clone(),
                self.version,
                timestamp,
                kind,
            ));
        }
        let op = self.build(OperationKind::MapBatch { operations });
        self.apply(&op)?;
        Ok(op)
    }

    /// Delete every key as one atomic batch.
    pub fn clear(&mut self) -> Result<Operation, OtError> {
        let entries = self
            .keys()
            .into_iter()
            .map(|key| MapBatchEntry::Delete { key })
            .collect();
        self.batch(entries)
    }

    /// The single mutation point, for local and remote operations alike.
    pub fn apply(&mut self, op: &Operation) -> Result<(), OtError> {
        let mut staged = DocumentValue::Map(std::mem::take(&mut self.entries));
        if let Err(e) = coedit_ot::apply(&mut staged, op) {
            if let DocumentValue::Map(entries) = staged {
                self.entries = entries;
            }
            return Err(e);
        }
        let DocumentValue::Map(new_entries) = staged else {
            return Err(OtError::InvalidOperation("map apply changed shape".into()));
        };
        let old = std::mem::replace(&mut self.entries, new_entries);
        self.version = self.version.max(op.base_version + 1);

        match &op.kind {
            OperationKind::MapSet { .. } => self.events.emit(&Event::Set(op.clone())),
            OperationKind::MapDelete { .. } => self.events.emit(&Event::Delete(op.clone())),
            OperationKind::MapBatch { .. } => self.events.emit(&Event::Batch(op.clone())),
            _ => {}
        }
        self.events.emit(&Event::Operation(op.clone()));
        self.events.emit(&Event::Change {
            new: DocumentValue::Map(self.entries.clone()),
            old: DocumentValue::Map(old),
        });
        Ok(())
    }

    /// Record a canonical version learned out of band without applying an
    /// operation. Never regresses.
    pub fn observe_version(&mut self, version: u64) {
        self.version = self.version.max(version);
    }

    pub fn to_snapshot(&self) -> Snapshot {
        Snapshot {
            value: DocumentValue::Map(self.entries.clone()),
            version: self.version,
        }
    }

    pub fn restore(&mut self, snapshot: Snapshot) -> Result<(), OtError> {
        let DocumentValue::Map(entries) = snapshot.value else {
            return Err(OtError::InvalidOperation(
                "snapshot is not a map value".into(),
            ));
        };
        let old = std::mem::replace(&mut self.entries, entries);
        self.version = snapshot.version;
        self.events.emit(&Event::Change {
            new: DocumentValue::Map(self.entries.clone()),
            old: DocumentValue::Map(old),
        });
        Ok(())
    }

    /// Operation sequence turning the current entries into `target`, base
    /// versions advancing per emitted operation. Nothing is applied.
    pub fn generate_operations(&self, target: &Map<String, Value>) -> Vec<Operation> {
        let kinds = diff::map_diff(&self.entries, target);
        let mut base_version = self.version;
        let timestamp = now_ms();
        kinds
            .into_iter()
            .map(|kind| {
                let op = Operation::new(
                    mint_operation_id(),
                    self.client_id.clone(),
                    base_version,
                    timestamp,
                    kind,
                );
                base_version += 1;
                op
            })
            .collect()
    }
}

impl std::fmt::Debug for SharedMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedMap")
            .field("client_id", &self.client_id)
            .field("version", &self.version)
            .field("len", &self.entries.len())
            .finish()
    }
}
