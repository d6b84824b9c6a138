//! The client session: one WebSocket transport, a set of open documents,
//! and reconnection state.
//!
//! All inbound handling runs on a single driver task; user mutations go
//! through [`DocumentHandle`] locks. There is no other internal parallelism.

use crate::config::SessionConfig;
use crate::document::{DocumentHandle, DocumentShared};
use crate::error::ClientError;
use coedit_common::{mint_client_id, now_ms, ClientId, DocumentId, OperationId};
use coedit_protocol::{
    parse_server_message, ClientInfo, ClientMessage, DocumentSchema, ErrorCode, Operation,
    Presence, ServerMessage,
};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, Notify};
use tokio::time::{interval, sleep, timeout, Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

const PING_INTERVAL: Duration = Duration::from_secs(30);
const PONG_TIMEOUT: Duration = Duration::from_secs(5);
const EVENT_CHANNEL_CAPACITY: usize = 64;

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Error,
}

/// Observable session activity, delivered on a broadcast channel.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    Connected { client_info: ClientInfo },
    Disconnected { reason: String },
    Reconnecting { attempt: u32 },
    Error { message: String },
    DocumentLeft { document_id: DocumentId },
    RemoteOperation {
        document_id: DocumentId,
        operation: Operation,
    },
    OperationFailed {
        document_id: DocumentId,
        operation_id: OperationId,
        code: ErrorCode,
        reason: String,
    },
    PresenceUpdated {
        document_id: DocumentId,
        presence: Presence,
    },
    PresenceState {
        document_id: DocumentId,
        users: Vec<Presence>,
    },
    UserJoined {
        document_id: DocumentId,
        user: Presence,
    },
    UserLeft {
        document_id: DocumentId,
        client_id: ClientId,
    },
    ServerError {
        code: ErrorCode,
        message: String,
        document_id: Option<DocumentId>,
    },
}

/// Why the first connection attempt failed; later attempts only surface
/// events.
enum ConnectFailure {
    Auth(String),
    Other(String),
}

struct Inner {
    config: SessionConfig,
    client_id: ClientId,
    state: Mutex<ConnectionState>,
    client_info: Mutex<Option<ClientInfo>>,
    documents: Mutex<HashMap<DocumentId, Arc<DocumentShared>>>,
    join_waiters: Mutex<HashMap<DocumentId, Vec<oneshot::Sender<Result<(), String>>>>>,
    outbound_tx: mpsc::UnboundedSender<ClientMessage>,
    /// Parked here between driver runs so senders stay valid for the whole
    /// session lifetime.
    outbound_rx: Mutex<Option<mpsc::UnboundedReceiver<ClientMessage>>>,
    events: broadcast::Sender<SessionEvent>,
    shutdown: Notify,
    shutting_down: AtomicBool,
}

impl Inner {
    fn set_state(&self, state: ConnectionState) {
        *self.state.lock() = state;
    }

    fn emit(&self, event: SessionEvent) {
        // Nobody listening is fine.
        let _ = self.events.send(event);
    }

    fn resolve_join(&self, document_id: &DocumentId, result: Result<(), String>) {
        let waiters = self.join_waiters.lock().remove(document_id);
        if let Some(waiters) = waiters {
            for waiter in waiters {
                let _ = waiter.send(result.clone());
            }
        }
    }
}

/// A connection to a Coedit coordinator.
pub struct CollabSession {
    inner: Arc<Inner>,
    driver: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl CollabSession {
    pub fn new(config: SessionConfig) -> Self {
        let client_id = config.client_id.clone().unwrap_or_else(mint_client_id);
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                config,
                client_id,
                state: Mutex::new(ConnectionState::Disconnected),
                client_info: Mutex::new(None),
                documents: Mutex::new(HashMap::new()),
                join_waiters: Mutex::new(HashMap::new()),
                outbound_tx,
                outbound_rx: Mutex::new(Some(outbound_rx)),
                events,
                shutdown: Notify::new(),
                shutting_down: AtomicBool::new(false),
            }),
            driver: Mutex::new(None),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.lock()
    }

    pub fn client_id(&self) -> &ClientId {
        &self.inner.client_id
    }

    /// Identity the server accepted, once authenticated.
    pub fn client_info(&self) -> Option<ClientInfo> {
        self.inner.client_info.lock().clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    /// Open the transport and authenticate. Resolves once the first
    /// connection attempt has succeeded or failed; reconnects later run in
    /// the background.
    pub async fn connect(&self) -> Result<(), ClientError> {
        match self.state() {
            ConnectionState::Connected | ConnectionState::Connecting => return Ok(()),
            _ => {}
        }
        self.inner.shutting_down.store(false, Ordering::SeqCst);
        self.inner.set_state(ConnectionState::Connecting);

        let (first_tx, first_rx) = oneshot::channel::<Result<(), ConnectFailure>>();
        let inner = self.inner.clone();
        let handle = tokio::spawn(async move {
            driver(inner, first_tx).await;
        });
        *self.driver.lock() = Some(handle);

        match timeout(self.inner.config.connection_timeout, first_rx).await {
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(ConnectFailure::Auth(reason)))) => Err(ClientError::AuthFailed(reason)),
            Ok(Ok(Err(ConnectFailure::Other(message)))) => Err(ClientError::Transport(message)),
            Ok(Err(_)) => Err(ClientError::Transport("driver exited early".into())),
            Err(_) => Err(ClientError::Timeout),
        }
    }

    /// Join `document_id`, creating the local shared type per `schema`.
    /// Idempotent: an already-open document returns its existing handle.
    pub async fn open_document(
        &self,
        document_id: DocumentId,
        schema: DocumentSchema,
    ) -> Result<DocumentHandle, ClientError> {
        if let Some(handle) = self.document(&document_id) {
            return Ok(handle);
        }
        if self.state() != ConnectionState::Connected {
            return Err(ClientError::NotConnected);
        }

        let shared = DocumentShared::new(
            document_id.clone(),
            schema,
            self.inner.client_id.clone(),
            self.inner.outbound_tx.clone(),
        );
        self.inner
            .documents
            .lock()
            .insert(document_id.clone(), shared.clone());

        let (join_tx, join_rx) = oneshot::channel();
        self.inner
            .join_waiters
            .lock()
            .entry(document_id.clone())
            .or_default()
            .push(join_tx);

        self.send(ClientMessage::JoinDocument {
            timestamp: now_ms(),
            id: None,
            document_id: document_id.clone(),
            schema: Some(schema),
        })?;

        let joined = timeout(self.inner.config.connection_timeout, join_rx).await;
        match joined {
            Ok(Ok(Ok(()))) => Ok(DocumentHandle {
                shared,
                outbound: self.inner.outbound_tx.clone(),
            }),
            Ok(Ok(Err(message))) => {
                self.inner.documents.lock().remove(&document_id);
                Err(ClientError::Server {
                    code: ErrorCode::ServerError,
                    message,
                })
            }
            Ok(Err(_)) | Err(_) => {
                self.inner.documents.lock().remove(&document_id);
                Err(ClientError::Timeout)
            }
        }
    }

    /// Handle for an already-open document.
    pub fn document(&self, document_id: &DocumentId) -> Option<DocumentHandle> {
        self.inner
            .documents
            .lock()
            .get(document_id)
            .map(|shared| DocumentHandle {
                shared: shared.clone(),
                outbound: self.inner.outbound_tx.clone(),
            })
    }

    pub fn open_documents(&self) -> Vec<DocumentId> {
        self.inner.documents.lock().keys().cloned().collect()
    }

    pub async fn leave_document(&self, document_id: &DocumentId) -> Result<(), ClientError> {
        if self.inner.documents.lock().remove(document_id).is_none() {
            return Err(ClientError::DocumentNotOpen(document_id.to_string()));
        }
        self.send(ClientMessage::LeaveDocument {
            timestamp: now_ms(),
            id: None,
            document_id: document_id.clone(),
        })
    }

    /// Cancel reconnect timers, leave every document, close with 1000.
    pub async fn disconnect(&self) {
        let documents: Vec<DocumentId> = self.inner.documents.lock().keys().cloned().collect();
        for document_id in documents {
            let _ = self.send(ClientMessage::LeaveDocument {
                timestamp: now_ms(),
                id: None,
                document_id,
            });
        }
        self.inner.documents.lock().clear();

        self.inner.shutting_down.store(true, Ordering::SeqCst);
        // notify_one stores a permit, so the driver sees this even if it is
        // mid-dispatch rather than parked in select.
        self.inner.shutdown.notify_one();

        let handle = self.driver.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        self.inner.set_state(ConnectionState::Disconnected);
    }

    fn send(&self, message: ClientMessage) -> Result<(), ClientError> {
        self.inner
            .outbound_tx
            .send(message)
            .map_err(|_| ClientError::NotConnected)
    }

    #[cfg(test)]
    pub(crate) fn inject_for_tests(&self, message: ServerMessage) {
        handle_server_message(&self.inner, message);
    }

    #[cfg(test)]
    pub(crate) fn open_document_offline_for_tests(
        &self,
        document_id: DocumentId,
        schema: DocumentSchema,
    ) -> DocumentHandle {
        let shared = DocumentShared::new(
            document_id.clone(),
            schema,
            self.inner.client_id.clone(),
            self.inner.outbound_tx.clone(),
        );
        self.inner
            .documents
            .lock()
            .insert(document_id, shared.clone());
        DocumentHandle {
            shared,
            outbound: self.inner.outbound_tx.clone(),
        }
    }
}

async fn driver(inner: Arc<Inner>, first_tx: oneshot::Sender<Result<(), ConnectFailure>>) {
    let Some(mut outbound_rx) = inner.outbound_rx.lock().take() else {
        warn!("another session driver is already running");
        return;
    };
    let mut first = Some(first_tx);
    let mut attempt: u32 = 0;

    loop {
        if inner.shutting_down.load(Ordering::SeqCst) {
            break;
        }
        match connect_and_auth(&inner).await {
            Ok((ws, client_info)) => {
                attempt = 0;
                inner.set_state(ConnectionState::Connected);
                *inner.client_info.lock() = Some(client_info.clone());
                if let Some(tx) = first.take() {
                    let _ = tx.send(Ok(()));
                }
                inner.emit(SessionEvent::Connected { client_info });

                // Anything queued while the transport was down is based on
                // state the rejoin snapshot will replace.
                let mut stale = 0usize;
                while outbound_rx.try_recv().is_ok() {
                    stale += 1;
                }
                if stale > 0 {
                    debug!(stale, "dropped messages queued while offline");
                }
                rejoin_documents(&inner);

                let reason = drive(&inner, ws, &mut outbound_rx).await;
                info!(reason = %reason, "transport closed");
                inner.emit(SessionEvent::Disconnected {
                    reason: reason.clone(),
                });
            }
            Err(e) => {
                let message = e.to_string();
                if let Some(tx) = first.take() {
                    inner.set_state(ConnectionState::Error);
                    let failure = match e {
                        ClientError::AuthFailed(reason) => ConnectFailure::Auth(reason),
                        other => ConnectFailure::Other(other.to_string()),
                    };
                    let _ = tx.send(Err(failure));
                    break;
                }
                inner.emit(SessionEvent::Error { message });
            }
        }

        if inner.shutting_down.load(Ordering::SeqCst) || !inner.config.reconnection.enabled {
            break;
        }
        attempt += 1;
        if attempt > inner.config.reconnection.attempts {
            inner.emit(SessionEvent::Error {
                message: "reconnection attempts exhausted".into(),
            });
            inner.set_state(ConnectionState::Error);
            break;
        }

        inner.set_state(ConnectionState::Reconnecting);
        inner.emit(SessionEvent::Reconnecting { attempt });
        let delay = inner.config.reconnection.backoff(attempt - 1);
        tokio::select! {
            _ = sleep(delay) => {}
            _ = inner.shutdown.notified() => break,
        }
        inner.set_state(ConnectionState::Connecting);
    }

    inner.set_state(ConnectionState::Disconnected);
    *inner.outbound_rx.lock() = Some(outbound_rx);
}

async fn connect_and_auth(inner: &Arc<Inner>) -> Result<(WsStream, ClientInfo), ClientError> {
    let mut request = inner
        .config
        .server_url
        .as_str()
        .into_client_request()
        .map_err(|e| ClientError::Transport(e.to_string()))?;
    for (name, value) in &inner.config.headers {
        let name: HeaderName = name
            .parse()
            .map_err(|_| ClientError::Transport(format!("invalid header name {name}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|_| ClientError::Transport(format!("invalid header value for {name}")))?;
        request.headers_mut().insert(name, value);
    }

    let (mut ws, _response) = timeout(inner.config.connection_timeout, connect_async(request))
        .await
        .map_err(|_| ClientError::Timeout)??;

    let authenticate = ClientMessage::Authenticate {
        timestamp: now_ms(),
        id: None,
        client_id: Some(inner.client_id.clone()),
        token: inner.config.token.clone(),
    };
    let frame = serde_json::to_string(&authenticate)
        .map_err(|e| ClientError::Transport(e.to_string()))?;
    ws.send(Message::Text(frame)).await?;

    let deadline = Instant::now() + inner.config.auth_timeout;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let frame = timeout(remaining, ws.next())
            .await
            .map_err(|_| ClientError::Timeout)?;
        let frame = match frame {
            Some(frame) => frame?,
            None => return Err(ClientError::Transport("closed during handshake".into())),
        };
        let Message::Text(text) = frame else {
            continue;
        };
        match parse_server_message(&text)? {
            ServerMessage::AuthSuccess { client_info, .. } => return Ok((ws, client_info)),
            ServerMessage::AuthFailed { reason, .. } => {
                return Err(ClientError::AuthFailed(reason))
            }
            ServerMessage::AuthRequired { .. } => continue,
            other => debug!(message = ?other, "ignoring pre-auth message"),
        }
    }
}

fn rejoin_documents(inner: &Arc<Inner>) {
    let documents: Vec<(DocumentId, DocumentSchema)> = inner
        .documents
        .lock()
        .iter()
        .map(|(id, shared)| (id.clone(), shared.schema))
        .collect();
    for (document_id, schema) in documents {
        debug!(document = %document_id, "rejoining after reconnect");
        let _ = inner.outbound_tx.send(ClientMessage::JoinDocument {
            timestamp: now_ms(),
            id: None,
            document_id,
            schema: Some(schema),
        });
    }
}

/// Pump one live connection until it drops. Returns the reason.
async fn drive(
    inner: &Arc<Inner>,
    ws: WsStream,
    outbound_rx: &mut mpsc::UnboundedReceiver<ClientMessage>,
) -> String {
    let (mut sink, mut stream) = ws.split();
    let mut ping_timer = interval(PING_INTERVAL);
    ping_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ping_timer.tick().await; // immediate first tick
    let mut awaiting_pong = false;
    let pong_deadline = sleep(PONG_TIMEOUT);
    tokio::pin!(pong_deadline);

    loop {
        tokio::select! {
            _ = inner.shutdown.notified() => {
                // Flush what the caller queued (document leaves), then a
                // clean close.
                while let Ok(message) = outbound_rx.try_recv() {
                    if let Ok(frame) = serde_json::to_string(&message) {
                        let _ = sink.send(Message::Text(frame)).await;
                    }
                }
                let _ = sink
                    .send(Message::Close(Some(CloseFrame {
                        code: CloseCode::Normal,
                        reason: "client disconnect".into(),
                    })))
                    .await;
                return "disconnected by client".into();
            }

            inbound = stream.next() => {
                match inbound {
                    None => return "connection closed".into(),
                    Some(Err(e)) => return format!("transport error: {e}"),
                    Some(Ok(Message::Text(text))) => {
                        match parse_server_message(&text) {
                            Ok(ServerMessage::Pong { .. }) => awaiting_pong = false,
                            Ok(message) => handle_server_message(inner, message),
                            Err(e) => warn!(error = %e, "dropping malformed frame"),
                        }
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        let _ = sink.send(Message::Pong(payload)).await;
                    }
                    Some(Ok(Message::Close(_))) => return "closed by server".into(),
                    Some(Ok(_)) => {}
                }
            }

            outbound = outbound_rx.recv() => {
                let Some(message) = outbound else {
                    return "session dropped".into();
                };
                match serde_json::to_string(&message) {
                    Ok(frame) => {
                        if let Err(e) = sink.send(Message::Text(frame)).await {
                            return format!("send failed: {e}");
                        }
                    }
                    Err(e) => error!(error = %e, "unserializable outbound message"),
                }
            }

            _ = ping_timer.tick() => {
                let ping = ClientMessage::Ping { timestamp: now_ms(), id: None };
                if let Ok(frame) = serde_json::to_string(&ping) {
                    if sink.send(Message::Text(frame)).await.is_err() {
                        return "ping send failed".into();
                    }
                }
                awaiting_pong = true;
                pong_deadline.as_mut().reset(Instant::now() + PONG_TIMEOUT);
            }

            _ = &mut pong_deadline, if awaiting_pong => {
                return "pong timeout".into();
            }
        }
    }
}

fn handle_server_message(inner: &Arc<Inner>, message: ServerMessage) {
    match message {
        ServerMessage::DocumentJoined {
            document_id,
            version,
            state,
            users,
            ..
        } => {
            let shared = inner.documents.lock().get(&document_id).cloned();
            match shared {
                Some(shared) => match shared.reset_to(state, version) {
                    Ok(()) => {
                        inner.resolve_join(&document_id, Ok(()));
                        inner.emit(SessionEvent::PresenceState { document_id, users });
                    }
                    Err(e) => {
                        let message = e.to_string();
                        warn!(document = %document_id, error = %message, "bad join snapshot");
                        inner.resolve_join(&document_id, Err(message));
                    }
                },
                None => warn!(document = %document_id, "joined a document we never opened"),
            }
        }
        ServerMessage::DocumentState {
            document_id,
            version,
            state,
            ..
        } => {
            let shared = inner.documents.lock().get(&document_id).cloned();
            if let Some(shared) = shared {
                if let Err(e) = shared.reset_to(state, version) {
                    warn!(document = %document_id, error = %e, "bad resync snapshot");
                }
            }
        }
        ServerMessage::DocumentLeft { document_id, .. } => {
            inner.documents.lock().remove(&document_id);
            inner.emit(SessionEvent::DocumentLeft { document_id });
        }
        ServerMessage::Operation {
            document_id,
            operation,
            ..
        } => {
            let shared = inner.documents.lock().get(&document_id).cloned();
            match shared {
                Some(shared) => match shared.integrate_remote(&operation) {
                    Ok(()) => inner.emit(SessionEvent::RemoteOperation {
                        document_id,
                        operation,
                    }),
                    Err(e) => {
                        warn!(document = %document_id, error = %e, "remote operation failed to apply");
                    }
                },
                None => debug!(document = %document_id, "operation for unopened document"),
            }
        }
        ServerMessage::OperationApplied {
            document_id,
            operation_id,
            version,
            ..
        } => {
            let shared = inner.documents.lock().get(&document_id).cloned();
            if let Some(shared) = shared {
                shared.acknowledge(&operation_id, version);
            }
        }
        ServerMessage::OperationFailed {
            document_id,
            operation_id,
            code,
            reason,
            ..
        } => {
            warn!(document = %document_id, operation = %operation_id, ?code, reason = %reason,
                "operation rejected");
            inner.emit(SessionEvent::OperationFailed {
                document_id,
                operation_id,
                code,
                reason,
            });
        }
        ServerMessage::PresenceUpdate {
            document_id,
            presence,
            ..
        } => {
            inner.emit(SessionEvent::PresenceUpdated {
                document_id,
                presence,
            });
        }
        ServerMessage::PresenceState {
            document_id, users, ..
        } => {
            inner.emit(SessionEvent::PresenceState { document_id, users });
        }
        ServerMessage::UserJoined {
            document_id, user, ..
        } => {
            inner.emit(SessionEvent::UserJoined { document_id, user });
        }
        ServerMessage::UserLeft {
            document_id,
            client_id,
            ..
        } => {
            inner.emit(SessionEvent::UserLeft {
                document_id,
                client_id,
            });
        }
        ServerMessage::Error {
            code,
            message,
            document_id,
            ..
        } => {
            if let Some(document_id) = &document_id {
                inner.resolve_join(document_id, Err(message.clone()));
            }
            inner.emit(SessionEvent::ServerError {
                code,
                message,
                document_id,
            });
        }
        ServerMessage::AuthRequired { .. }
        | ServerMessage::AuthSuccess { .. }
        | ServerMessage::AuthFailed { .. }
        | ServerMessage::Pong { .. } => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coedit_protocol::{DocumentValue, OperationKind};
    use coedit_types::SharedDoc;

    fn session() -> CollabSession {
        CollabSession::new(
            SessionConfig::new("ws://localhost:9").with_client_id(ClientId::new_unchecked("me")),
        )
    }

    fn doc_id() -> DocumentId {
        DocumentId::new_unchecked("doc-1")
    }

    fn remote_op(position: usize, text: &str, base: u64) -> Operation {
        Operation::new(
            OperationId::new_unchecked(format!("peer-{position}-{base}")),
            ClientId::new_unchecked("peer"),
            base,
            now_ms() + 60_000,
            OperationKind::TextInsert {
                position,
                text: text.into(),
                attributes: None,
            },
        )
    }

    #[tokio::test]
    async fn remote_operations_apply_through_the_dispatcher() {
        let session = session();
        let handle = session.open_document_offline_for_tests(doc_id(), DocumentSchema::Text);

        session.inject_for_tests(ServerMessage::Operation {
            timestamp: now_ms(),
            document_id: doc_id(),
            operation: remote_op(0, "hi", 0),
        });

        assert_eq!(handle.value(), DocumentValue::Text("hi".into()));
        assert_eq!(handle.version(), 1);
    }

    #[tokio::test]
    async fn acks_clear_pending() {
        let session = session();
        let handle = session.open_document_offline_for_tests(doc_id(), DocumentSchema::Text);

        let op = handle.update(|doc| match doc {
            SharedDoc::Text(text) => text.insert(0, "abc").unwrap(),
            other => panic!("unexpected shape {other:?}"),
        });
        assert_eq!(handle.pending_len(), 1);

        session.inject_for_tests(ServerMessage::OperationApplied {
            timestamp: now_ms(),
            document_id: doc_id(),
            operation_id: op.id.clone(),
            version: 1,
        });
        assert_eq!(handle.pending_len(), 0);
    }

    #[tokio::test]
    async fn remote_ops_rebase_over_pending_edits() {
        let session = session();
        let handle = session.open_document_offline_for_tests(doc_id(), DocumentSchema::Text);

        handle.update(|doc| match doc {
            SharedDoc::Text(text) => text.insert(0, "AA").unwrap(),
            other => panic!("unexpected shape {other:?}"),
        });

        // Peer insert at 0, later author order: lands after the pending
        // local insert.
        session.inject_for_tests(ServerMessage::Operation {
            timestamp: now_ms(),
            document_id: doc_id(),
            operation: remote_op(0, "B", 0),
        });

        assert_eq!(handle.value(), DocumentValue::Text("AAB".into()));
    }

    #[tokio::test]
    async fn rejoin_snapshot_replaces_state_and_drops_pending() {
        let session = session();
        let handle = session.open_document_offline_for_tests(doc_id(), DocumentSchema::Text);

        handle.update(|doc| match doc {
            SharedDoc::Text(text) => text.insert(0, "lost").unwrap(),
            other => panic!("unexpected shape {other:?}"),
        });
        assert_eq!(handle.pending_len(), 1);

        session.inject_for_tests(ServerMessage::DocumentJoined {
            timestamp: now_ms(),
            document_id: doc_id(),
            version: 42,
            schema: DocumentSchema::Text,
            state: DocumentValue::Text("server truth".into()),
            users: vec![],
        });

        assert_eq!(handle.pending_len(), 0);
        assert_eq!(handle.value(), DocumentValue::Text("server truth".into()));
        assert_eq!(handle.version(), 42);

        // No duplicate application if the same remote op arrives after.
        session.inject_for_tests(ServerMessage::Operation {
            timestamp: now_ms(),
            document_id: doc_id(),
            operation: remote_op(0, "x", 42),
        });
        assert_eq!(handle.value(), DocumentValue::Text("xserver truth".into()));
        assert_eq!(handle.version(), 43);
    }

    #[tokio::test]
    async fn document_left_closes_the_handle() {
        let session = session();
        let _handle = session.open_document_offline_for_tests(doc_id(), DocumentSchema::Text);
        session.inject_for_tests(ServerMessage::DocumentLeft {
            timestamp: now_ms(),
            document_id: doc_id(),
        });
        assert!(session.document(&doc_id()).is_none());
    }
}
