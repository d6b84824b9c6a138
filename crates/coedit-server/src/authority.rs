//! Per-document authority
//!
//! One actor per live document. Every state transition goes through its
//! mailbox, so transform-then-apply-then-broadcast is atomic with respect
//! to concurrent senders, broadcast order is identical at every peer, and
//! an originator always sees its acknowledgement before any later
//! operation that transformed against it.

use crate::error::ServerError;
use crate::persistence::{AppliedOperation, DocumentStore, PersistedDocument};
use crate::registry::PeerLink;
use coedit_common::{now_ms, ClientId, DocumentId};
use coedit_protocol::{
    DocumentSchema, DocumentValue, Operation, Presence, ServerMessage,
};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

const MAILBOX_CAPACITY: usize = 128;

#[derive(Debug, Clone, Copy)]
pub struct HistoryConfig {
    /// Trim the ring above this length...
    pub high_water: usize,
    /// ...down to this many operations.
    pub keep: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            high_water: 1000,
            keep: 500,
        }
    }
}

/// Read-only view for the HTTP surface and the sweep.
#[derive(Debug, Clone)]
pub struct DocumentSummary {
    pub id: DocumentId,
    pub schema: DocumentSchema,
    pub version: u64,
    pub client_count: usize,
    pub created_at: i64,
    pub updated_at: i64,
}

pub enum AuthorityRequest {
    Join {
        link: PeerLink,
        presence: Presence,
    },
    Leave {
        client_id: ClientId,
        /// Confirm with `document_left` (explicit leave vs. disconnect).
        notify_client: bool,
    },
    Apply {
        client_id: ClientId,
        operation: Operation,
    },
    Presence {
        presence: Presence,
    },
    Summary {
        reply: oneshot::Sender<DocumentSummary>,
    },
    Shutdown,
}

/// Handle to one document's single-writer loop.
#[derive(Clone)]
pub struct DocumentAuthority {
    id: DocumentId,
    tx: mpsc::Sender<AuthorityRequest>,
}

impl DocumentAuthority {
    pub fn id(&self) -> &DocumentId {
        &self.id
    }

    pub async fn join(&self, link: PeerLink, presence: Presence) {
        let _ = self.tx.send(AuthorityRequest::Join { link, presence }).await;
    }

    pub async fn leave(&self, client_id: ClientId, notify_client: bool) {
        let _ = self
            .tx
            .send(AuthorityRequest::Leave {
                client_id,
                notify_client,
            })
            .await;
    }

    pub async fn apply(&self, client_id: ClientId, operation: Operation) {
        let _ = self
            .tx
            .send(AuthorityRequest::Apply {
                client_id,
                operation,
            })
            .await;
    }

    pub async fn presence(&self, presence: Presence) {
        let _ = self.tx.send(AuthorityRequest::Presence { presence }).await;
    }

    pub async fn summary(&self) -> Option<DocumentSummary> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(AuthorityRequest::Summary { reply })
            .await
            .ok()?;
        rx.await.ok()
    }

    pub async fn shutdown(&self) {
        let _ = self.tx.send(AuthorityRequest::Shutdown).await;
    }

    /// Spawn the single-writer loop for `id`, resuming from `persisted`
    /// when the store had it.
    pub fn spawn(
        id: DocumentId,
        schema: DocumentSchema,
        persisted: Option<PersistedDocument>,
        store: Arc<dyn DocumentStore>,
        history: HistoryConfig,
        total_ops: Arc<AtomicU64>,
    ) -> Self {
        let (tx, rx) = mpsc::channel(MAILBOX_CAPACITY);
        let state = match persisted {
            Some(persisted) => {
                info!(document = %id, version = persisted.version, "document loaded from store");
                AuthorityState {
                    id: id.clone(),
                    schema: persisted.schema,
                    value: persisted.value,
                    version: persisted.version,
                    offset: persisted.version,
                    recent: VecDeque::new(),
                    clients: HashMap::new(),
                    presence: HashMap::new(),
                    created_at: persisted.created_at,
                    updated_at: persisted.updated_at,
                    store,
                    history,
                    total_ops,
                }
            }
            None => {
                info!(document = %id, %schema, "document created");
                AuthorityState {
                    id: id.clone(),
                    schema,
                    value: schema.initial_value(),
                    version: 0,
                    offset: 0,
                    recent: VecDeque::new(),
                    clients: HashMap::new(),
                    presence: HashMap::new(),
                    created_at: now_ms(),
                    updated_at: now_ms(),
                    store,
                    history,
                    total_ops,
                }
            }
        };
        tokio::spawn(state.run(rx));
        Self { id, tx }
    }
}

struct AuthorityState {
    id: DocumentId,
    schema: DocumentSchema,
    value: DocumentValue,
    version: u64,
    /// Operations trimmed off the front of `recent`; they are assumed
    /// durably persisted. `version == offset + recent.len()`.
    offset: u64,
    recent: VecDeque<AppliedOperation>,
    clients: HashMap<ClientId, PeerLink>,
    presence: HashMap<ClientId, Presence>,
    created_at: i64,
    updated_at: i64,
    store: Arc<dyn DocumentStore>,
    history: HistoryConfig,
    total_ops: Arc<AtomicU64>,
}

impl AuthorityState {
    async fn run(mut self, mut rx: mpsc::Receiver<AuthorityRequest>) {
        while let Some(request) = rx.recv().await {
            match request {
                AuthorityRequest::Join { link, presence } => self.handle_join(link, presence),
                AuthorityRequest::Leave {
                    client_id,
                    notify_client,
                } => self.handle_leave(&client_id, notify_client),
                AuthorityRequest::Apply {
                    client_id,
                    operation,
                } => self.handle_apply(&client_id, operation).await,
                AuthorityRequest::Presence { presence } => self.handle_presence(presence),
                AuthorityRequest::Summary { reply } => {
                    let _ = reply.send(self.summary());
                }
                AuthorityRequest::Shutdown => break,
            }
        }
        // Final persistence round-trip before the document goes away.
        if let Err(e) = self.store.save_document(&self.persisted()).await {
            warn!(document = %self.id, error = %e, "final snapshot save failed");
        }
        debug!(document = %self.id, version = self.version, "authority stopped");
    }

    fn summary(&self) -> DocumentSummary {
        DocumentSummary {
            id: self.id.clone(),
            schema: self.schema,
            version: self.version,
            client_count: self.clients.len(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }

    fn persisted(&self) -> PersistedDocument {
        PersistedDocument {
            id: self.id.clone(),
            schema: self.schema,
            version: self.version,
            value: self.value.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }

    fn handle_join(&mut self, link: PeerLink, presence: Presence) {
        let client_id = link.client_id.clone();
        let joined = ServerMessage::DocumentJoined {
            timestamp: now_ms(),
            document_id: self.id.clone(),
            version: self.version,
            schema: self.schema,
            state: self.value.clone(),
            users: self.presence.values().cloned().collect(),
        };
        self.send_to(&link, joined);

        self.clients.insert(client_id.clone(), link);
        self.presence.insert(client_id.clone(), presence.clone());
        self.broadcast_except(
            &client_id,
            ServerMessage::UserJoined {
                timestamp: now_ms(),
                document_id: self.id.clone(),
                user: presence,
            },
        );
        debug!(document = %self.id, client = %client_id, peers = self.clients.len(), "client joined");
    }

    fn handle_leave(&mut self, client_id: &ClientId, notify_client: bool) {
        let Some(link) = self.clients.remove(client_id) else {
            return;
        };
        self.presence.remove(client_id);
        if notify_client {
            self.send_to(
                &link,
                ServerMessage::DocumentLeft {
                    timestamp: now_ms(),
                    document_id: self.id.clone(),
                },
            );
        }
        self.broadcast_except(
            client_id,
            ServerMessage::UserLeft {
                timestamp: now_ms(),
                document_id: self.id.clone(),
                client_id: client_id.clone(),
            },
        );
        debug!(document = %self.id, client = %client_id, peers = self.clients.len(), "client left");
    }

    async fn handle_apply(&mut self, client_id: &ClientId, mut operation: Operation) {
        if operation.client_id != *client_id {
            self.reject(
                client_id,
                &operation,
                ServerError::Forbidden("operation author does not match session".into()),
            );
            return;
        }
        let base = operation.base_version;
        if base < self.offset {
            self.reject(
                client_id,
                &operation,
                ServerError::DocumentNotFound(format!(
                    "base version {base} is older than the retained history; rejoin"
                )),
            );
            return;
        }
        if base > self.version {
            self.reject(
                client_id,
                &operation,
                ServerError::InvalidOperation(format!(
                    "base version {base} is ahead of document version {}",
                    self.version
                )),
            );
            return;
        }

        // Rebase across everything applied since the version the author saw.
        let skip = (base - self.offset) as usize;
        for later in self.recent.iter().skip(skip) {
            operation = coedit_ot::transform(&operation, &later.operation);
        }

        if let Err(e) = coedit_ot::apply(&mut self.value, &operation) {
            // Dropped: no version increment, no broadcast.
            self.reject(client_id, &operation, e.into());
            return;
        }

        self.version += 1;
        self.updated_at = now_ms();
        self.total_ops.fetch_add(1, Ordering::Relaxed);
        let applied = AppliedOperation {
            applied_version: self.version,
            operation: operation.clone(),
        };
        self.recent.push_back(applied.clone());
        self.trim();

        // Best-effort persistence; in-memory state stays authoritative.
        if let Err(e) = self.store.save_operation(&self.id, &applied).await {
            warn!(document = %self.id, error = %e, "operation save failed");
        }
        if let Err(e) = self.store.save_document(&self.persisted()).await {
            warn!(document = %self.id, error = %e, "document save failed");
        }

        // Acknowledge the originator before any peer broadcast.
        if let Some(link) = self.clients.get(client_id).cloned() {
            self.send_to(
                &link,
                ServerMessage::OperationApplied {
                    timestamp: now_ms(),
                    document_id: self.id.clone(),
                    operation_id: operation.id.clone(),
                    version: self.version,
                },
            );
        }
        self.broadcast_except(
            client_id,
            ServerMessage::Operation {
                timestamp: now_ms(),
                document_id: self.id.clone(),
                operation,
            },
        );
    }

    fn handle_presence(&mut self, presence: Presence) {
        let client_id = presence.client_id.clone();
        if !self.clients.contains_key(&client_id) {
            return;
        }
        self.presence.insert(client_id.clone(), presence.clone());
        self.broadcast_except(
            &client_id,
            ServerMessage::PresenceUpdate {
                timestamp: now_ms(),
                document_id: self.id.clone(),
                presence,
            },
        );
    }

    fn trim(&mut self) {
        if self.recent.len() <= self.history.high_water {
            return;
        }
        let drop = self.recent.len() - self.history.keep;
        self.recent.drain(..drop);
        self.offset += drop as u64;
        debug!(document = %self.id, offset = self.offset, "history trimmed");
    }

    fn reject(&mut self, client_id: &ClientId, operation: &Operation, error: ServerError) {
        warn!(document = %self.id, client = %client_id, operation = %operation.id,
            error = %error, "operation rejected");
        if let Some(link) = self.clients.get(client_id).cloned() {
            self.send_to(
                &link,
                ServerMessage::OperationFailed {
                    timestamp: now_ms(),
                    document_id: self.id.clone(),
                    operation_id: operation.id.clone(),
                    code: error.code(),
                    reason: error.to_string(),
                },
            );
        }
    }

    /// Queue a message for one peer. A full queue means the peer cannot
    /// keep up: it is disconnected (close 1011) rather than stalling the
    /// document loop.
    fn send_to(&mut self, link: &PeerLink, message: ServerMessage) {
        match link.sender.try_send(message) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(document = %self.id, client = %link.client_id,
                    "outbound queue overflow, disconnecting peer");
                link.fire_kill();
                self.drop_peer(&link.client_id.clone());
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.drop_peer(&link.client_id.clone());
            }
        }
    }

    fn drop_peer(&mut self, client_id: &ClientId) {
        if self.clients.remove(client_id).is_some() {
            self.presence.remove(client_id);
            self.broadcast_except(
                client_id,
                ServerMessage::UserLeft {
                    timestamp: now_ms(),
                    document_id: self.id.clone(),
                    client_id: client_id.clone(),
                },
            );
        }
    }

    fn broadcast_except(&mut self, skip: &ClientId, message: ServerMessage) {
        // Snapshot the peer set: sends may drop peers mid-iteration.
        let peers: Vec<PeerLink> = self
            .clients
            .values()
            .filter(|link| link.client_id != *skip)
            .cloned()
            .collect();
        for link in peers {
            self.send_to(&link, message.clone());
        }
    }
}

/// Live authorities by document id. Creation is lazy: the first join loads
/// the document from the store or starts it fresh from its schema.
pub struct AuthorityRegistry {
    store: Arc<dyn DocumentStore>,
    history: HistoryConfig,
    total_ops: Arc<AtomicU64>,
    map: tokio::sync::RwLock<HashMap<DocumentId, DocumentAuthority>>,
}

impl AuthorityRegistry {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        history: HistoryConfig,
        total_ops: Arc<AtomicU64>,
    ) -> Self {
        Self {
            store,
            history,
            total_ops,
            map: tokio::sync::RwLock::new(HashMap::new()),
        }
    }

    pub async fn get(&self, id: &DocumentId) -> Option<DocumentAuthority> {
        self.map.read().await.get(id).cloned()
    }

    pub async fn get_or_create(
        &self,
        id: &DocumentId,
        schema: DocumentSchema,
    ) -> DocumentAuthority {
        if let Some(authority) = self.map.read().await.get(id) {
            return authority.clone();
        }
        let mut map = self.map.write().await;
        if let Some(authority) = map.get(id) {
            return authority.clone();
        }
        // Fail-soft: an unreadable store entry starts the document fresh.
        let persisted = match self.store.load_document(id).await {
            Ok(persisted) => persisted,
            Err(e) => {
                warn!(document = %id, error = %e, "load failed, starting fresh");
                None
            }
        };
        let authority = DocumentAuthority::spawn(
            id.clone(),
            schema,
            persisted,
            self.store.clone(),
            self.history,
            self.total_ops.clone(),
        );
        map.insert(id.clone(), authority.clone());
        authority
    }

    pub async fn ids(&self) -> Vec<DocumentId> {
        self.map.read().await.keys().cloned().collect()
    }

    pub async fn count(&self) -> usize {
        self.map.read().await.len()
    }

    /// Shut down authorities whose client set has emptied. Their state
    /// round-trips through the store and reloads on the next join.
    pub async fn evict_idle(&self) {
        let authorities: Vec<DocumentAuthority> =
            self.map.read().await.values().cloned().collect();
        for authority in authorities {
            let Some(summary) = authority.summary().await else {
                continue;
            };
            if summary.client_count == 0 {
                info!(document = %summary.id, "evicting idle document");
                authority.shutdown().await;
                self.map.write().await.remove(&summary.id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::MemoryStore;
    use coedit_common::{mint_operation_id, OperationId};
    use coedit_protocol::OperationKind;
    use std::time::Duration;
    use tokio::time::timeout;

    struct Peer {
        link: PeerLink,
        rx: mpsc::Receiver<ServerMessage>,
    }

    fn peer(id: &str) -> Peer {
        let (tx, rx) = mpsc::channel(64);
        Peer {
            link: PeerLink::new(ClientId::new_unchecked(id), tx),
            rx,
        }
    }

    async fn recv(peer: &mut Peer) -> ServerMessage {
        timeout(Duration::from_secs(1), peer.rx.recv())
            .await
            .expect("timed out")
            .expect("channel closed")
    }

    fn authority(history: HistoryConfig) -> DocumentAuthority {
        DocumentAuthority::spawn(
            DocumentId::new_unchecked("doc-1"),
            DocumentSchema::Text,
            None,
            Arc::new(MemoryStore::new()),
            history,
            Arc::new(AtomicU64::new(0)),
        )
    }

    fn insert(client: &str, ts: i64, base: u64, position: usize, text: &str) -> Operation {
        Operation::new(
            mint_operation_id(),
            ClientId::new_unchecked(client),
            base,
            ts,
            OperationKind::TextInsert {
                position,
                text: text.into(),
                attributes: None,
            },
        )
    }

    async fn join(authority: &DocumentAuthority, peer: &mut Peer) -> (u64, DocumentValue) {
        let presence = Presence::online(peer.link.client_id.clone(), now_ms());
        authority.join(peer.link.clone(), presence).await;
        match recv(peer).await {
            ServerMessage::DocumentJoined { version, state, .. } => (version, state),
            other => panic!("expected document_joined, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn concurrent_inserts_transform_and_converge() {
        let authority = authority(HistoryConfig::default());
        let mut c1 = peer("c1");
        let mut c2 = peer("c2");
        join(&authority, &mut c1).await;
        join(&authority, &mut c2).await;
        // c1 sees c2 join.
        recv(&mut c1).await;

        // Seed "AC" through c1.
        authority
            .apply(c1.link.client_id.clone(), insert("c1", 1, 0, 0, "AC"))
            .await;
        match recv(&mut c1).await {
            ServerMessage::OperationApplied { version, .. } => assert_eq!(version, 1),
            other => panic!("expected ack, got {other:?}"),
        }
        recv(&mut c2).await; // broadcast of the seed

        // Both base on version 1: insert "B" at 1 and "D" at 2.
        authority
            .apply(c1.link.client_id.clone(), insert("c1", 2, 1, 1, "B"))
            .await;
        authority
            .apply(c2.link.client_id.clone(), insert("c2", 3, 1, 2, "D"))
            .await;

        match recv(&mut c1).await {
            ServerMessage::OperationApplied { version, .. } => assert_eq!(version, 2),
            other => panic!("expected ack, got {other:?}"),
        }
        // c2's op was transformed against c1's: position shifted to 3.
        match recv(&mut c1).await {
            ServerMessage::Operation { operation, .. } => {
                assert_eq!(
                    operation.kind,
                    OperationKind::TextInsert {
                        position: 3,
                        text: "D".into(),
                        attributes: None,
                    }
                );
            }
            other => panic!("expected broadcast, got {other:?}"),
        }

        let summary = authority.summary().await.unwrap();
        assert_eq!(summary.version, 3);

        // A late joiner sees the converged document.
        let mut c3 = peer("c3");
        let (version, state) = join(&authority, &mut c3).await;
        assert_eq!(version, 3);
        assert_eq!(state, DocumentValue::Text("ABCD".into()));
    }

    #[tokio::test]
    async fn ack_arrives_before_later_peer_broadcasts() {
        let authority = authority(HistoryConfig::default());
        let mut c1 = peer("c1");
        let mut c2 = peer("c2");
        join(&authority, &mut c1).await;
        join(&authority, &mut c2).await;
        recv(&mut c1).await; // c2 joined

        authority
            .apply(c1.link.client_id.clone(), insert("c1", 1, 0, 0, "X"))
            .await;
        authority
            .apply(c2.link.client_id.clone(), insert("c2", 2, 0, 0, "Y"))
            .await;

        // c1's first message after its own ack is c2's rebased op; never the
        // other way round.
        match recv(&mut c1).await {
            ServerMessage::OperationApplied { version, .. } => assert_eq!(version, 1),
            other => panic!("expected ack first, got {other:?}"),
        }
        match recv(&mut c1).await {
            ServerMessage::Operation { operation, .. } => {
                assert_eq!(operation.base_version, 0);
            }
            other => panic!("expected broadcast, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn stale_base_version_forces_rejoin() {
        let history = HistoryConfig {
            high_water: 4,
            keep: 2,
        };
        let authority = authority(history);
        let mut c1 = peer("c1");
        join(&authority, &mut c1).await;

        for i in 0..6 {
            authority
                .apply(
                    c1.link.client_id.clone(),
                    insert("c1", i as i64, i, 0, "x"),
                )
                .await;
            recv(&mut c1).await;
        }

        // History was trimmed; version 0 is gone.
        let stale = insert("c1", 99, 0, 0, "y");
        authority.apply(c1.link.client_id.clone(), stale).await;
        match recv(&mut c1).await {
            ServerMessage::OperationFailed { code, .. } => {
                assert_eq!(code, coedit_protocol::ErrorCode::DocumentNotFound);
            }
            other => panic!("expected operation_failed, got {other:?}"),
        }

        // Version unchanged by the rejected op.
        assert_eq!(authority.summary().await.unwrap().version, 6);
    }

    #[tokio::test]
    async fn invalid_operation_is_dropped_without_version_bump() {
        let authority = authority(HistoryConfig::default());
        let mut c1 = peer("c1");
        join(&authority, &mut c1).await;

        let out_of_range = Operation::new(
            OperationId::new_unchecked("bad"),
            c1.link.client_id.clone(),
            0,
            1,
            OperationKind::TextDelete {
                position: 0,
                length: 5,
            },
        );
        authority
            .apply(c1.link.client_id.clone(), out_of_range)
            .await;
        match recv(&mut c1).await {
            ServerMessage::OperationFailed { code, .. } => {
                assert_eq!(code, coedit_protocol::ErrorCode::InvalidOperation);
            }
            other => panic!("expected operation_failed, got {other:?}"),
        }
        assert_eq!(authority.summary().await.unwrap().version, 0);
    }

    #[tokio::test]
    async fn broadcasts_are_uniform_fifo_and_version_monotonic() {
        let authority = authority(HistoryConfig::default());
        let mut sender = peer("sender");
        let mut watcher_a = peer("watcher-a");
        let mut watcher_b = peer("watcher-b");
        join(&authority, &mut sender).await;
        join(&authority, &mut watcher_a).await;
        join(&authority, &mut watcher_b).await;
        recv(&mut sender).await; // watcher-a joined
        recv(&mut sender).await; // watcher-b joined
        recv(&mut watcher_a).await; // watcher-b joined

        // One author, five operations, in order.
        for i in 0..5u64 {
            authority
                .apply(
                    sender.link.client_id.clone(),
                    insert("sender", i as i64, i, i as usize, "x"),
                )
                .await;
        }

        let mut observed_a = Vec::new();
        let mut observed_b = Vec::new();
        let mut acked_versions = Vec::new();
        for _ in 0..5 {
            match recv(&mut sender).await {
                ServerMessage::OperationApplied { version, .. } => acked_versions.push(version),
                other => panic!("expected ack, got {other:?}"),
            }
            match recv(&mut watcher_a).await {
                ServerMessage::Operation { operation, .. } => observed_a.push(operation.id),
                other => panic!("expected broadcast, got {other:?}"),
            }
            match recv(&mut watcher_b).await {
                ServerMessage::Operation { operation, .. } => observed_b.push(operation.id),
                other => panic!("expected broadcast, got {other:?}"),
            }
        }

        // Same sequence at every peer, sender order preserved, versions
        // strictly increasing.
        assert_eq!(observed_a, observed_b);
        assert_eq!(acked_versions, vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn presence_fans_out_to_peers_only() {
        let authority = authority(HistoryConfig::default());
        let mut c1 = peer("c1");
        let mut c2 = peer("c2");
        join(&authority, &mut c1).await;
        join(&authority, &mut c2).await;
        recv(&mut c1).await; // c2 joined

        let mut presence = Presence::online(c1.link.client_id.clone(), now_ms());
        presence.name = Some("Ada".into());
        authority.presence(presence).await;

        match recv(&mut c2).await {
            ServerMessage::PresenceUpdate { presence, .. } => {
                assert_eq!(presence.name.as_deref(), Some("Ada"));
            }
            other => panic!("expected presence_update, got {other:?}"),
        }
        // Originator got nothing new.
        assert!(c1.rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn slow_peer_is_disconnected_not_awaited() {
        let authority = authority(HistoryConfig::default());
        let mut c1 = peer("c1");
        join(&authority, &mut c1).await;

        // A peer with a tiny queue that nobody drains.
        let (tx, _rx_kept) = mpsc::channel(1);
        let slow = PeerLink::new(ClientId::new_unchecked("slow"), tx);
        let killed = slow.kill.clone();
        authority
            .join(slow.clone(), Presence::online(slow.client_id.clone(), 0))
            .await;
        recv(&mut c1).await; // slow joined

        // The join response already fills the one-slot queue, so the first
        // broadcast overflows it.
        authority
            .apply(c1.link.client_id.clone(), insert("c1", 1, 0, 0, "x"))
            .await;
        match recv(&mut c1).await {
            ServerMessage::OperationApplied { .. } => {}
            other => panic!("expected ack, got {other:?}"),
        }

        // The overflow kicked the peer out and notified the kill handle.
        timeout(Duration::from_secs(1), killed.notified())
            .await
            .expect("kill never fired");
        match recv(&mut c1).await {
            ServerMessage::UserLeft { client_id, .. } => {
                assert_eq!(client_id.as_str(), "slow");
            }
            other => panic!("expected user_left, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn document_reloads_from_store_on_respawn() {
        let store: Arc<dyn DocumentStore> = Arc::new(MemoryStore::new());
        let id = DocumentId::new_unchecked("doc-1");
        let total = Arc::new(AtomicU64::new(0));

        let authority = DocumentAuthority::spawn(
            id.clone(),
            DocumentSchema::Text,
            None,
            store.clone(),
            HistoryConfig::default(),
            total.clone(),
        );
        let mut c1 = peer("c1");
        join(&authority, &mut c1).await;
        authority
            .apply(c1.link.client_id.clone(), insert("c1", 1, 0, 0, "saved"))
            .await;
        recv(&mut c1).await;
        authority.shutdown().await;
        // Give the loop a moment to flush its final snapshot.
        tokio::time::sleep(Duration::from_millis(50)).await;

        let persisted = store.load_document(&id).await.unwrap().expect("saved");
        let revived = DocumentAuthority::spawn(
            id,
            DocumentSchema::Text,
            Some(persisted),
            store,
            HistoryConfig::default(),
            total,
        );
        let mut c2 = peer("c2");
        let (version, state) = join(&revived, &mut c2).await;
        assert_eq!(version, 1);
        assert_eq!(state, DocumentValue::Text("saved".into()));
    }
}
