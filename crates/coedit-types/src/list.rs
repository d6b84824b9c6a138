//! Shared collaborative list

use crate::diff;
use crate::events::{Event, EventEmitter};
use crate::Snapshot;
use coedit_common::{mint_operation_id, now_ms, ClientId};
use coedit_ot::OtError;
use coedit_protocol::{DocumentValue, Operation, OperationKind};
use serde_json::Value;
use tracing::debug;

pub struct SharedList {
    client_id: ClientId,
    items: Vec<Value>,
    version: u64,
    events: EventEmitter,
}

impl SharedList {
    pub fn new(client_id: ClientId) -> Self {
        Self::with_state(client_id, Vec::new(), 0)
    }

    pub fn with_state(client_id: ClientId, items: Vec<Value>, version: u64) -> Self {
        Self {
            client_id,
            items,
            version,
            events: EventEmitter::new(),
        }
    }

    pub fn from_snapshot(client_id: ClientId, snapshot: Snapshot) -> Self {
        match snapshot.value {
            DocumentValue::List(items) => Self::with_state(client_id, items, snapshot.version),
            other => {
                debug!("list snapshot had {} shape, starting empty", other.schema());
                Self::with_state(client_id, Vec::new(), snapshot.version)
            }
        }
    }

    pub fn value(&self) -> Vec<Value> {
        self.items.clone()
    }

    pub fn get(&self, index: usize) -> Option<Value> {
        self.items.get(index).cloned()
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
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
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

    pub fn insert(&mut self, index: usize, item: Value) -> Result<Operation, OtError> {
        if index > self.items.len() {
            return Err(OtError::InvalidOperation(format!(
                "insert index {index} beyond length {}",
                self.items.len()
            )));
        }
        let op = self.build(OperationKind::ListInsert { index, item });
        self.apply(&op)?;
        Ok(op)
    }

    pub fn push(&mut self, item: Value) -> Result<Operation, OtError> {
        self.insert(self.items.len(), item)
    }

    pub fn delete(&mut self, index: usize, count: usize) -> Result<Operation, OtError> {
        if count == 0 {
            return Err(OtError::InvalidOperation("delete count must be positive".into()));
        }
        if index + count > self.items.len() {
            return Err(OtError::InvalidOperation(format!(
                "delete range {index}..{} beyond length {}",
                index + count,
                self.items.len()
            )));
        }
        let op = self.build(OperationKind::ListDelete { index, count });
        self.apply(&op)?;
        Ok(op)
    }

    pub fn replace(&mut self, index: usize, item: Value) -> Result<Operation, OtError> {
        let Some(old_item) = self.items.get(index).cloned() else {
            return Err(OtError::InvalidOperation(format!(
                "replace index {index} beyond length {}",
                self.items.len()
            )));
        };
        let op = self.build(OperationKind::ListReplace {
            index,
            item,
            old_item: Some(old_item),
        });
        self.apply(&op)?;
        Ok(op)
    }

    pub fn move_item(&mut self, index: usize, target_index: usize) -> Result<Operation, OtError> {
        if index == target_index {
            return Err(OtError::InvalidOperation(
                "move source and target are equal".into(),
            ));
        }
        if index >= self.items.len() || target_index >= self.items.len() {
            return Err(OtError::InvalidOperation(format!(
                "move {index} -> {target_index} beyond length {}",
                self.items.len()
            )));
        }
        let op = self.build(OperationKind::ListMove {
            index,
            target_index,
        });
        self.apply(&op)?;
        Ok(op)
    }

    /// The single mutation point, for local and remote operations alike.
    pub fn apply(&mut self, op: &Operation) -> Result<(), OtError> {
        let mut staged = DocumentValue::List(std::mem::take(&mut self.items));
        if let Err(e) = coedit_ot::apply(&mut staged, op) {
            if let DocumentValue::List(items) = staged {
                self.items = items;
            }
            return Err(e);
        }
        let DocumentValue::List(new_items) = staged else {
            return Err(OtError::InvalidOperation("list apply changed shape".into()));
        };
        let old = std::mem::replace(&mut self.items, new_items);
        self.version = self.version.max(op.base_version + 1);

        match &op.kind {
            OperationKind::ListInsert { .. } => self.events.emit(&Event::Insert(op.clone())),
            OperationKind::ListDelete { .. } => self.events.emit(&Event::Delete(op.clone())),
            OperationKind::ListReplace { .. } => self.events.emit(&Event::Replace(op.clone())),
            OperationKind::ListMove { .. } => self.events.emit(&Event::Move(op.clone())),
            _ => {}
        }
        self.events.emit(&Event::Operation(op.clone()));
        self.events.emit(&Event::Change {
            new: DocumentValue::List(self.items.clone()),
            old: DocumentValue::List(old),
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
            value: DocumentValue::List(self.items.clone()),
            version: self.version,
        }
    }

    pub fn restore(&mut self, snapshot: Snapshot) -> Result<(), OtError> {
        let DocumentValue::List(items) = snapshot.value else {
            return Err(OtError::InvalidOperation(
                "snapshot is not a list value".into(),
            ));
        };
        let old = std::mem::replace(&mut self.items, items);
        self.version = snapshot.version;
        self.events.emit(&Event::Change {
            new: DocumentValue::List(self.items.clone()),
            old: DocumentValue::List(old),
        });
        Ok(())
    }

    /// Operation sequence turning the current items into `target`, base
    /// versions advancing per emitted operation. Nothing is applied.
    pub fn generate_operations(&self, target: &[Value]) -> Vec<Operation> {
        let kinds = diff::list_diff(&self.items, target);
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

impl std::fmt::Debug for SharedList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedList")
            .field("client_id", &self.client_id)
            .field("version", &self.version)
            .field("len", &self.items.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc() -> SharedList {
        SharedList::new(ClientId::new_unchecked("c1"))
    }

    #[test]
    fn mutators_emit_and_advance() {
        let mut list = doc();
        let op = list.push(json!("a")).unwrap();
        assert_eq!(op.base_version, 0);
        list.push(json!("b")).unwrap();
        list.insert(1, json!("mid")).unwrap();
        assert_eq!(list.value(), vec![json!("a"), json!("mid"), json!("b")]);
        assert_eq!(list.version(), 3);

        let op = list.replace(0, json!("A")).unwrap();
        match &op.kind {
            OperationKind::ListReplace { old_item, .. } => {
                assert_eq!(old_item, &Some(json!("a")));
            }
            other => panic!("unexpected kind {other:?}"),
        }

        list.move_item(2, 0).unwrap();
        assert_eq!(list.value(), vec![json!("b"), json!("A"), json!("mid")]);

        list.delete(0, 2).unwrap();
        assert_eq!(list.value(), vec![json!("mid")]);
        assert_eq!(list.version(), 6);
    }

    #[test]
    fn validation_rejects_bad_arguments() {
        let mut list = doc();
        list.push(json!(1)).unwrap();
        assert!(list.insert(5, json!(2)).is_err());
        assert!(list.delete(0, 0).is_err());
        assert!(list.delete(0, 2).is_err());
        assert!(list.replace(1, json!(0)).is_err());
        assert!(list.move_item(0, 0).is_err());
        assert_eq!(list.version(), 1);
    }

    #[test]
    fn snapshot_round_trip() {
        let mut list = doc();
        list.push(json!({"nested": true})).unwrap();
        let snapshot = list.to_snapshot();
        let restored = SharedList::from_snapshot(ClientId::new_unchecked("c2"), snapshot.clone());
        assert_eq!(restored.value(), list.value());
        assert_eq!(restored.to_snapshot(), snapshot);
    }

    #[test]
    fn generate_operations_replays_to_target() {
        let mut list = doc();
        list.push(json!(1)).unwrap();
        list.push(json!(2)).unwrap();

        let target = vec![json!(1), json!(5), json!(6)];
        let ops = list.generate_operations(&target);
        assert_eq!(ops.len(), 2);
        assert_eq!(ops[0].base_version, 2);
        assert_eq!(ops[1].base_version, 3);

        let mut replay =
            SharedList::with_state(ClientId::new_unchecked("c2"), list.value(), list.version());
        for op in &ops {
            replay.apply(op).unwrap();
        }
        assert_eq!(replay.value(), target);
    }
}
