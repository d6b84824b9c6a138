//! Client registry: who is connected, what they joined, how to reach them
//!
//! Touched on connect/disconnect/join/leave and by the idle sweep, never on
//! the hot operation path (authorities hold their own peer links).

use coedit_common::{now_ms, ClientId, DocumentId};
use coedit_protocol::{ClientInfo, ServerMessage};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Notify, RwLock};
use tracing::debug;

/// How an authority or the coordinator reaches one connected client.
#[derive(Clone)]
pub struct PeerLink {
    pub client_id: ClientId,
    /// Bounded queue drained by the connection's writer task.
    pub sender: mpsc::Sender<ServerMessage>,
    /// Fired to force-close the connection (backpressure overflow, sweep).
    pub kill: Arc<Notify>,
}

impl PeerLink {
    pub fn new(client_id: ClientId, sender: mpsc::Sender<ServerMessage>) -> Self {
        Self {
            client_id,
            sender,
            kill: Arc::new(Notify::new()),
        }
    }

    /// Ask the connection's writer task to close the socket. Uses the
    /// permit-storing notify so the signal survives the task being busy.
    pub fn fire_kill(&self) {
        self.kill.notify_one();
    }
}

pub struct ClientRecord {
    pub link: PeerLink,
    pub info: ClientInfo,
    pub joined: HashSet<DocumentId>,
    /// Ms epoch; atomic so the hot path touches it under a read lock.
    pub last_activity: AtomicI64,
}

#[derive(Default)]
pub struct ClientRegistry {
    clients: RwLock<HashMap<ClientId, ClientRecord>>,
    by_document: RwLock<HashMap<DocumentId, HashSet<ClientId>>>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, link: PeerLink, info: ClientInfo) {
        let client_id = link.client_id.clone();
        self.clients.write().await.insert(
            client_id,
            ClientRecord {
                link,
                info,
                joined: HashSet::new(),
                last_activity: AtomicI64::new(now_ms()),
            },
        );
    }

    /// Re-key a session when `authenticate` re-declares the client id. A
    /// record whose transport already died (a reconnecting client racing
    /// its own stale session) is displaced.
    pub async fn rename(&self, old: &ClientId, new: ClientId) -> bool {
        let mut clients = self.clients.write().await;
        match clients.get(&new) {
            Some(existing) if existing.link.sender.is_closed() => {
                existing.link.fire_kill();
                clients.remove(&new);
            }
            Some(_) => return false,
            None => {}
        }
        let Some(mut record) = clients.remove(old) else {
            return false;
        };
        record.link.client_id = new.clone();
        record.info.client_id = new.clone();
        clients.insert(new, record);
        true
    }

    pub async fn set_info(&self, client_id: &ClientId, info: ClientInfo) {
        if let Some(record) = self.clients.write().await.get_mut(client_id) {
            record.info = info;
        }
    }

    pub async fn info(&self, client_id: &ClientId) -> Option<ClientInfo> {
        self.clients
            .read()
            .await
            .get(client_id)
            .map(|record| record.info.clone())
    }

    pub async fn link(&self, client_id: &ClientId) -> Option<PeerLink> {
        self.clients
            .read()
            .await
            .get(client_id)
            .map(|record| record.link.clone())
    }

    pub async fn touch(&self, client_id: &ClientId) {
        if let Some(record) = self.clients.read().await.get(client_id) {
            record.last_activity.store(now_ms(), Ordering::Relaxed);
        }
    }

    pub async fn join_document(&self, client_id: &ClientId, document_id: &DocumentId) {
        if let Some(record) = self.clients.write().await.get_mut(client_id) {
            record.joined.insert(document_id.clone());
        }
        self.by_document
            .write()
            .await
            .entry(document_id.clone())
            .or_default()
            .insert(client_id.clone());
    }

    pub async fn leave_document(&self, client_id: &ClientId, document_id: &DocumentId) {
        if let Some(record) = self.clients.write().await.get_mut(client_id) {
            record.joined.remove(document_id);
        }
        let mut by_document = self.by_document.write().await;
        if let Some(members) = by_document.get_mut(document_id) {
            members.remove(client_id);
            if members.is_empty() {
                by_document.remove(document_id);
            }
        }
    }

    pub async fn is_member(&self, client_id: &ClientId, document_id: &DocumentId) -> bool {
        self.by_document
            .read()
            .await
            .get(document_id)
            .is_some_and(|members| members.contains(client_id))
    }

    pub async fn members(&self, document_id: &DocumentId) -> Vec<ClientId> {
        self.by_document
            .read()
            .await
            .get(document_id)
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Drop the client entirely; returns the documents it was joined to so
    /// the caller can notify their authorities.
    pub async fn remove(&self, client_id: &ClientId) -> Vec<DocumentId> {
        let record = self.clients.write().await.remove(client_id);
        let Some(record) = record else {
            return Vec::new();
        };
        let mut by_document = self.by_document.write().await;
        for document_id in &record.joined {
            if let Some(members) = by_document.get_mut(document_id) {
                members.remove(client_id);
                if members.is_empty() {
                    by_document.remove(document_id);
                }
            }
        }
        debug!(client = %client_id, "client removed from registry");
        record.joined.into_iter().collect()
    }

    pub async fn count(&self) -> usize {
        self.clients.read().await.len()
    }

    /// Sessions whose transport is gone or whose last activity is older
    /// than `idle_timeout`.
    pub async fn stale_clients(&self, idle_timeout: std::time::Duration) -> Vec<PeerLink> {
        let horizon = now_ms() - idle_timeout.as_millis() as i64;
        self.clients
            .read()
            .await
            .values()
            .filter(|record| {
                record.link.sender.is_closed()
                    || record.last_activity.load(Ordering::Relaxed) < horizon
            })
            .map(|record| record.link.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn link(id: &str) -> (PeerLink, mpsc::Receiver<ServerMessage>) {
        let (tx, rx) = mpsc::channel(8);
        (PeerLink::new(ClientId::new_unchecked(id), tx), rx)
    }

    #[tokio::test]
    async fn membership_tracks_joins_and_leaves() {
        let registry = ClientRegistry::new();
        let (peer, _rx) = link("c1");
        let info = ClientInfo::anonymous(peer.client_id.clone());
        registry.insert(peer.clone(), info).await;

        let doc = DocumentId::new_unchecked("d1");
        registry.join_document(&peer.client_id, &doc).await;
        assert!(registry.is_member(&peer.client_id, &doc).await);
        assert_eq!(registry.members(&doc).await.len(), 1);

        registry.leave_document(&peer.client_id, &doc).await;
        assert!(!registry.is_member(&peer.client_id, &doc).await);
        assert!(registry.members(&doc).await.is_empty());
    }

    #[tokio::test]
    async fn remove_reports_joined_documents() {
        let registry = ClientRegistry::new();
        let (peer, _rx) = link("c1");
        registry
            .insert(peer.clone(), ClientInfo::anonymous(peer.client_id.clone()))
            .await;
        let doc = DocumentId::new_unchecked("d1");
        registry.join_document(&peer.client_id, &doc).await;

        let joined = registry.remove(&peer.client_id).await;
        assert_eq!(joined, vec![doc.clone()]);
        assert!(registry.members(&doc).await.is_empty());
        assert_eq!(registry.count().await, 0);
    }

    #[tokio::test]
    async fn rename_rekeys_the_session() {
        let registry = ClientRegistry::new();
        let (peer, _rx) = link("minted");
        registry
            .insert(peer.clone(), ClientInfo::anonymous(peer.client_id.clone()))
            .await;

        let declared = ClientId::new_unchecked("declared");
        assert!(registry.rename(&peer.client_id, declared.clone()).await);
        assert!(registry.link(&declared).await.is_some());
        assert!(registry.link(&peer.client_id).await.is_none());
    }

    #[tokio::test]
    async fn stale_detection_sees_closed_transports() {
        let registry = ClientRegistry::new();
        let (peer, rx) = link("c1");
        registry
            .insert(peer.clone(), ClientInfo::anonymous(peer.client_id.clone()))
            .await;

        assert!(registry.stale_clients(Duration::from_secs(60)).await.is_empty());
        drop(rx);
        let stale = registry.stale_clients(Duration::from_secs(60)).await;
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].client_id, peer.client_id);
    }
}
