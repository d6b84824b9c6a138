//! Open-document state: the shared type, the pending buffer, and the
//! forwarding of locally-generated operations to the transport.

use crate::error::ClientError;
use coedit_common::{now_ms, ClientId, DocumentId, OperationId};
use coedit_protocol::{ClientMessage, DocumentSchema, DocumentValue, Operation, Presence};
use coedit_types::{Event, EventKind, SharedDoc, Snapshot};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

pub(crate) struct DocumentShared {
    pub(crate) id: DocumentId,
    pub(crate) schema: DocumentSchema,
    /// Lock order: `doc` before `pending`, always. The operation listener
    /// runs inside `doc`'s critical section and takes only `pending`.
    pub(crate) doc: Mutex<SharedDoc>,
    /// Locally-applied operations not yet acknowledged by the coordinator.
    pub(crate) pending: Mutex<VecDeque<Operation>>,
}

impl DocumentShared {
    pub(crate) fn new(
        id: DocumentId,
        schema: DocumentSchema,
        client_id: ClientId,
        outbound: mpsc::UnboundedSender<ClientMessage>,
    ) -> Arc<Self> {
        let shared = Arc::new(Self {
            id: id.clone(),
            schema,
            doc: Mutex::new(SharedDoc::new(client_id.clone(), schema)),
            pending: Mutex::new(VecDeque::new()),
        });

        // Forward locally-generated operations to the transport and queue
        // them as pending. Remote operations re-enter through `apply` with a
        // foreign clientId and are ignored here.
        let listener = Arc::downgrade(&shared);
        shared.doc.lock().events().on(EventKind::Operation, move |event| {
            let Event::Operation(op) = event else {
                return;
            };
            if op.client_id != client_id {
                return;
            }
            let Some(shared) = listener.upgrade() else {
                return;
            };
            shared.pending.lock().push_back(op.clone());
            let message = ClientMessage::Operation {
                timestamp: now_ms(),
                id: None,
                document_id: shared.id.clone(),
                operation: op.clone(),
            };
            if outbound.send(message).is_err() {
                debug!(document = %shared.id, "operation queued while transport is down");
            }
        });

        shared
    }

    /// Server acknowledged one of our operations: drop it from the pending
    /// buffer and record the canonical version.
    pub(crate) fn acknowledge(&self, operation_id: &OperationId, version: u64) {
        let mut doc = self.doc.lock();
        {
            let mut pending = self.pending.lock();
            let before = pending.len();
            pending.retain(|op| op.id != *operation_id);
            if pending.len() == before {
                warn!(document = %self.id, operation = %operation_id, "ack for unknown operation");
            }
        }
        doc.observe_version(version);
    }

    /// A peer's operation arrived: transform it against every still-pending
    /// local operation, in order, then apply.
    pub(crate) fn integrate_remote(&self, operation: &Operation) -> Result<(), ClientError> {
        let mut doc = self.doc.lock();
        let transformed = {
            let pending = self.pending.lock();
            let mut op = operation.clone();
            for local in pending.iter() {
                op = coedit_ot::transform(&op, local);
            }
            op
        };
        doc.apply(&transformed)?;
        Ok(())
    }

    /// Replace local state with the server snapshot; any pending operations
    /// are dropped (the at-most-once boundary).
    pub(crate) fn reset_to(&self, value: DocumentValue, version: u64) -> Result<(), ClientError> {
        let mut doc = self.doc.lock();
        let dropped = {
            let mut pending = self.pending.lock();
            let dropped = pending.len();
            pending.clear();
            dropped
        };
        if dropped > 0 {
            warn!(document = %self.id, dropped, "pending operations dropped on rejoin");
        }
        doc.restore(Snapshot { value, version })?;
        Ok(())
    }
}

/// Handle to one open document. Cheap to clone; all clones share state.
#[derive(Clone)]
pub struct DocumentHandle {
    pub(crate) shared: Arc<DocumentShared>,
    pub(crate) outbound: mpsc::UnboundedSender<ClientMessage>,
}

impl DocumentHandle {
    pub fn id(&self) -> &DocumentId {
        &self.shared.id
    }

    pub fn schema(&self) -> DocumentSchema {
        self.shared.schema
    }

    /// Current value, deep-copied.
    pub fn value(&self) -> DocumentValue {
        self.shared.doc.lock().value()
    }

    pub fn version(&self) -> u64 {
        self.shared.doc.lock().version()
    }

    /// Locally-applied operations awaiting acknowledgement.
    pub fn pending_len(&self) -> usize {
        self.shared.pending.lock().len()
    }

    /// Run `f` against the shared type under its lock. Mutations made inside
    /// are applied locally, queued as pending, and shipped to the
    /// coordinator.
    pub fn update<R>(&self, f: impl FnOnce(&mut SharedDoc) -> R) -> R {
        f(&mut self.shared.doc.lock())
    }

    /// Ship a presence update for this document.
    pub fn update_presence(&self, presence: Presence) -> Result<(), ClientError> {
        let message = ClientMessage::PresenceUpdate {
            timestamp: now_ms(),
            id: None,
            document_id: self.shared.id.clone(),
            presence,
        };
        self.outbound
            .send(message)
            .map_err(|_| ClientError::NotConnected)
    }
}

impl std::fmt::Debug for DocumentHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentHandle")
            .field("id", &self.shared.id)
            .field("schema", &self.shared.schema)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coedit_protocol::OperationKind;
    use coedit_types::SharedDoc;

    fn shared(client: &str) -> (Arc<DocumentShared>, mpsc::UnboundedReceiver<ClientMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let shared = DocumentShared::new(
            DocumentId::new_unchecked("doc-1"),
            DocumentSchema::Text,
            ClientId::new_unchecked(client),
            tx,
        );
        (shared, rx)
    }

    fn remote_insert(client: &str, base: u64, position: usize, text: &str) -> Operation {
        Operation::new(
            OperationId::new_unchecked(format!("{client}-{position}")),
            ClientId::new_unchecked(client),
            base,
            now_ms(),
            OperationKind::TextInsert {
                position,
                text: text.into(),
                attributes: None,
            },
        )
    }

    #[test]
    fn local_edits_ship_and_queue() {
        let (shared, mut rx) = shared("me");
        let op = {
            let mut doc = shared.doc.lock();
            match &mut *doc {
                SharedDoc::Text(text) => text.insert(0, "hello").unwrap(),
                other => panic!("unexpected shape {other:?}"),
            }
        };

        assert_eq!(shared.pending.lock().len(), 1);
        match rx.try_recv().unwrap() {
            ClientMessage::Operation { operation, .. } => assert_eq!(operation.id, op.id),
            other => panic!("unexpected message {other:?}"),
        }
    }

    #[test]
    fn remote_ops_transform_against_pending() {
        let (shared, _rx) = shared("me");
        // Local unacknowledged insert at 0.
        {
            let mut doc = shared.doc.lock();
            match &mut *doc {
                SharedDoc::Text(text) => {
                    text.insert(0, "local").unwrap();
                }
                other => panic!("unexpected shape {other:?}"),
            }
        }

        // Peer insert at 0 with an earlier timestamp wins the front spot
        // only per author order; here the peer has a greater clientId, so it
        // lands behind the pending local insert.
        let mut remote = remote_insert("zz-peer", 0, 0, "R");
        remote.timestamp = now_ms() + 1_000;
        shared.integrate_remote(&remote).unwrap();

        let value = shared.doc.lock().value();
        assert_eq!(value, DocumentValue::Text("localR".into()));
    }

    #[test]
    fn remote_op_is_not_forwarded_back() {
        let (shared, mut rx) = shared("me");
        let remote = remote_insert("peer", 0, 0, "R");
        shared.integrate_remote(&remote).unwrap();
        assert!(rx.try_recv().is_err());
        assert_eq!(shared.pending.lock().len(), 0);
    }

    #[test]
    fn ack_drops_pending_and_records_version() {
        let (shared, _rx) = shared("me");
        let op = {
            let mut doc = shared.doc.lock();
            match &mut *doc {
                SharedDoc::Text(text) => text.insert(0, "x").unwrap(),
                other => panic!("unexpected shape {other:?}"),
            }
        };

        shared.acknowledge(&op.id, 7);
        assert_eq!(shared.pending.lock().len(), 0);
        assert_eq!(shared.doc.lock().version(), 7);
    }

    #[test]
    fn reset_drops_pending_and_restores_snapshot() {
        let (shared, _rx) = shared("me");
        {
            let mut doc = shared.doc.lock();
            match &mut *doc {
                SharedDoc::Text(text) => {
                    text.insert(0, "never-acked").unwrap();
                }
                other => panic!("unexpected shape {other:?}"),
            }
        }

        shared
            .reset_to(DocumentValue::Text("authoritative".into()), 12)
            .unwrap();
        assert_eq!(shared.pending.lock().len(), 0);
        let doc = shared.doc.lock();
        assert_eq!(doc.value(), DocumentValue::Text("authoritative".into()));
        assert_eq!(doc.version(), 12);
    }
}
