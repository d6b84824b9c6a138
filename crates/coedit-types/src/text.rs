//! Shared collaborative text

use crate::diff;
use crate::events::{Event, EventEmitter};
use crate::Snapshot;
use coedit_common::{mint_operation_id, now_ms, ClientId};
use coedit_ot::OtError;
use coedit_protocol::operation::Attributes;
use coedit_protocol::{DocumentValue, Operation, OperationKind};
use tracing::debug;

pub struct SharedText {
    client_id: ClientId,
    value: String,
    version: u64,
    events: EventEmitter,
}

impl SharedText {
    pub fn new(client_id: ClientId) -> Self {
        Self::with_state(client_id, String::new(), 0)
    }

    pub fn with_state(client_id: ClientId, value: impl Into<String>, version: u64) -> Self {
        Self {
            client_id,
            value: value.into(),
            version,
            events: EventEmitter::new(),
        }
    }

    pub fn from_snapshot(client_id: ClientId, snapshot: Snapshot) -> Self {
        match snapshot.value {
            DocumentValue::Text(value) => Self::with_state(client_id, value, snapshot.version),
            other => {
                debug!("text snapshot had {} shape, starting empty", other.schema());
                Self::with_state(client_id, String::new(), snapshot.version)
            }
        }
    }

    pub fn value(&self) -> String {
        self.value.clone()
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

    /// Length in chars, the unit all positions use.
    pub fn len(&self) -> usize {
        self.value.chars().count()
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
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

    /// Insert `text` before char index `position`.
    pub fn insert(&mut self, position: usize, text: &str) -> Result<Operation, OtError> {
        if text.is_empty() {
            return Err(OtError::InvalidOperation("empty insert text".into()));
        }
        if position > self.len() {
            return Err(OtError::InvalidOperation(format!(
                "insert position {position} beyond length {}",
                self.len()
            )));
        }
        let op = self.build(OperationKind::TextInsert {
            position,
            text: text.to_owned(),
            attributes: None,
        });
        self.apply(&op)?;
        Ok(op)
    }

    /// Remove `length` chars starting at `position`.
    pub fn delete(&mut self, position: usize, length: usize) -> Result<Operation, OtError> {
        if length == 0 {
            return Err(OtError::InvalidOperation("delete length must be positive".into()));
        }
        if position + length > self.len() {
            return Err(OtError::InvalidOperation(format!(
                "delete range {position}..{} beyond length {}",
                position + length,
                self.len()
            )));
        }
        let op = self.build(OperationKind::TextDelete { position, length });
        self.apply(&op)?;
        Ok(op)
    }

    /// Positional no-op reserved for attribute application.
    pub fn retain(
        &mut self,
        position: usize,
        length: usize,
        attributes: Option<Attributes>,
    ) -> Result<Operation, OtError> {
        if position + length > self.len() {
            return Err(OtError::InvalidOperation(format!(
                "retain range {position}..{} beyond length {}",
                position + length,
                self.len()
            )));
        }
        let op = self.build(OperationKind::TextRetain {
            position,
            length,
            attributes,
        });
        self.apply(&op)?;
        Ok(op)
    }

    /// The single mutation point, for local and remote operations alike.
    pub fn apply(&mut self, op: &Operation) -> Result<(), OtError> {
        let mut staged = DocumentValue::Text(std::mem::take(&mut self.value));
        if let Err(e) = coedit_ot::apply(&mut staged, op) {
            if let DocumentValue::Text(value) = staged {
                self.value = value;
            }
            return Err(e);
        }
        let DocumentValue::Text(new_value) = staged else {
            return Err(OtError::InvalidOperation("text apply changed shape".into()));
        };
        let old = std::mem::replace(&mut self.value, new_value);
        self.version = self.version.max(op.base_version + 1);

        match &op.kind {
            OperationKind::TextInsert { .. } => self.events.emit(&Event::Insert(op.clone())),
            OperationKind::TextDelete { .. } => self.events.emit(&Event::Delete(op.clone())),
            _ => {}
        }
        self.events.emit(&Event::Operation(op.clone()));
        self.events.emit(&Event::Change {
            new: DocumentValue::Text(self.value.clone()),
            old: DocumentValue::Text(old),
        });
        Ok(())
    }

    /// Record a canonical version learned out of band (e.g. from an
    /// acknowledgement) without applying an operation. Never regresses.
    pub fn observe_version(&mut self, version: u64) {
        self.version = self.version.max(version);
    }

    pub fn to_snapshot(&self) -> Snapshot {
        Snapshot {
            value: DocumentValue::Text(self.value.clone()),
            version: self.version,
        }
    }

    /// Replace value and version wholesale. Snapshots are opaque, so only
    /// `change` fires.
    pub fn restore(&mut self, snapshot: Snapshot) -> Result<(), OtError> {
        let DocumentValue::Text(value) = snapshot.value else {
            return Err(OtError::InvalidOperation(
                "snapshot is not a text value".into(),
            ));
        };
        let old = std::mem::replace(&mut self.value, value);
        self.version = snapshot.version;
        self.events.emit(&Event::Change {
            new: DocumentValue::Text(self.value.clone()),
            old: DocumentValue::Text(old),
        });
        Ok(())
    }

    /// Minimal operation sequence turning the current value into `target`:
    /// a common-prefix/common-suffix split yielding at most one delete
    /// followed by one insert. The insert's base version accounts for the
    /// preceding delete. Nothing is applied.
    pub fn generate_operations(&self, target: &str) -> Vec<Operation> {
        let kinds = diff::text_diff(&self.value, target);
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

impl std::fmt::Debug for SharedText {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedText")
            .field("client_id", &self.client_id)
            .field("version", &self.version)
            .field("len", &self.value.len())
            .finish()
    }
}
