//! WebSocket entry point and per-connection dispatch
//!
//! Each connection gets a minted client id, a bounded outbound queue
//! drained by a writer task, and a kill handle that authorities or the
//! sweep can fire to force a close (1011).

use crate::error::ServerError;
use crate::registry::PeerLink;
use crate::AppState;
use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use coedit_common::{mint_client_id, now_ms, validate_id, ClientId, DocumentId};
use coedit_protocol::{
    parse_client_message, ClientInfo, ClientMessage, Operation, Presence, ServerMessage,
};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

pub async fn ws_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Per-connection session state; the client id can be re-declared once
/// during `authenticate`.
struct ConnSession {
    client_id: ClientId,
    info: ClientInfo,
    authenticated: bool,
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let client_id = mint_client_id();
    info!(client = %client_id, "connection opened");

    let (outbound_tx, outbound_rx) = mpsc::channel::<ServerMessage>(state.config.outbound_queue);
    let link = PeerLink::new(client_id.clone(), outbound_tx);
    state
        .registry
        .insert(link.clone(), ClientInfo::anonymous(client_id.clone()))
        .await;

    let (sink, mut stream) = socket.split();
    let writer = tokio::spawn(write_loop(sink, outbound_rx, link.kill.clone()));

    if state.config.auth_required {
        let _ = link
            .sender
            .send(ServerMessage::AuthRequired {
                timestamp: now_ms(),
            })
            .await;
    }

    let mut session = ConnSession {
        client_id: client_id.clone(),
        info: ClientInfo::anonymous(client_id),
        authenticated: false,
    };

    // The writer task is the sole kill listener: a fired kill closes the
    // socket (1011), which ends this read loop too.
    while let Some(inbound) = stream.next().await {
        match inbound {
            Err(e) => {
                debug!(client = %session.client_id, error = %e, "read error");
                break;
            }
            Ok(Message::Text(text)) => {
                state.registry.touch(&session.client_id).await;
                match parse_client_message(text.as_str()) {
                    Ok(message) => {
                        dispatch(&state, &mut session, message).await;
                    }
                    Err(e) => {
                        warn!(client = %session.client_id, error = %e, "malformed frame");
                        send_error(
                            &state,
                            &session.client_id,
                            ServerError::InvalidOperation(format!("malformed message: {e}")),
                            None,
                        )
                        .await;
                    }
                }
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
        }
    }

    // Remove from every joined document (peers get user_left), then from
    // the registry.
    let joined = state.registry.remove(&session.client_id).await;
    for document_id in joined {
        if let Some(authority) = state.authorities.get(&document_id).await {
            authority.leave(session.client_id.clone(), false).await;
        }
    }
    writer.abort();
    info!(client = %session.client_id, "connection closed");
}

async fn write_loop(
    mut sink: futures::stream::SplitSink<WebSocket, Message>,
    mut outbound_rx: mpsc::Receiver<ServerMessage>,
    kill: std::sync::Arc<tokio::sync::Notify>,
) {
    loop {
        tokio::select! {
            _ = kill.notified() => {
                let _ = sink
                    .send(Message::Close(Some(CloseFrame {
                        code: close_code::ERROR,
                        reason: "outbound queue overflow".into(),
                    })))
                    .await;
                return;
            }
            message = outbound_rx.recv() => {
                let Some(message) = message else { return };
                match serde_json::to_string(&message) {
                    Ok(frame) => {
                        if sink.send(Message::Text(frame.into())).await.is_err() {
                            return;
                        }
                    }
                    Err(e) => warn!(error = %e, "unserializable outbound message"),
                }
            }
        }
    }
}

async fn dispatch(state: &AppState, session: &mut ConnSession, message: ClientMessage) {
    match message {
        ClientMessage::Authenticate {
            client_id, token, ..
        } => {
            handle_authenticate(state, session, client_id, token).await;
        }
        ClientMessage::JoinDocument {
            document_id,
            schema,
            ..
        } => {
            handle_join(state, session, document_id, schema.unwrap_or_default()).await;
        }
        ClientMessage::LeaveDocument { document_id, .. } => {
            if let Some(authority) = state.authorities.get(&document_id).await {
                authority.leave(session.client_id.clone(), true).await;
            }
            state
                .registry
                .leave_document(&session.client_id, &document_id)
                .await;
        }
        ClientMessage::Operation {
            document_id,
            operation,
            ..
        } => {
            handle_operation(state, session, document_id, operation).await;
        }
        ClientMessage::PresenceUpdate {
            document_id,
            presence,
            ..
        } => {
            handle_presence(state, session, document_id, presence).await;
        }
        ClientMessage::Ping { .. } => {
            send(state, &session.client_id, ServerMessage::Pong {
                timestamp: now_ms(),
            })
            .await;
        }
    }
}

async fn handle_authenticate(
    state: &AppState,
    session: &mut ConnSession,
    declared: Option<ClientId>,
    token: Option<String>,
) {
    // A client may re-declare its own id; the minted one stands otherwise.
    if let Some(declared) = declared {
        if let Err(e) = validate_id(declared.as_str()) {
            send(state, &session.client_id, ServerMessage::AuthFailed {
                timestamp: now_ms(),
                reason: format!("invalid client id: {e}"),
            })
            .await;
            return;
        }
        if declared != session.client_id {
            if !state
                .registry
                .rename(&session.client_id, declared.clone())
                .await
            {
                send(state, &session.client_id, ServerMessage::AuthFailed {
                    timestamp: now_ms(),
                    reason: "client id already in use".into(),
                })
                .await;
                return;
            }
            debug!(minted = %session.client_id, declared = %declared, "client id re-declared");
            session.client_id = declared;
        }
    }

    match state
        .auth
        .verify(&session.client_id, token.as_deref())
        .await
    {
        Ok(info) => {
            session.authenticated = true;
            session.info = info.clone();
            state.registry.set_info(&session.client_id, info.clone()).await;
            send(state, &session.client_id, ServerMessage::AuthSuccess {
                timestamp: now_ms(),
                client_info: info,
            })
            .await;
        }
        Err(e) => {
            info!(client = %session.client_id, error = %e, "authentication failed");
            send(state, &session.client_id, ServerMessage::AuthFailed {
                timestamp: now_ms(),
                reason: e.to_string(),
            })
            .await;
        }
    }
}

async fn handle_join(
    state: &AppState,
    session: &ConnSession,
    document_id: DocumentId,
    schema: coedit_protocol::DocumentSchema,
) {
    if let Err(e) = validate_id(document_id.as_str()) {
        send_error(
            state,
            &session.client_id,
            ServerError::InvalidOperation(format!("invalid document id: {e}")),
            None,
        )
        .await;
        return;
    }
    if state.config.auth_required && !session.authenticated {
        send_error(
            state,
            &session.client_id,
            ServerError::Unauthorized("authenticate before joining documents".into()),
            Some(document_id),
        )
        .await;
        return;
    }
    if !state.auth.can_access(&session.info, &document_id).await {
        send_error(
            state,
            &session.client_id,
            ServerError::Forbidden("access to this document is denied".into()),
            Some(document_id),
        )
        .await;
        return;
    }

    let Some(link) = state.registry.link(&session.client_id).await else {
        return;
    };
    let authority = state.authorities.get_or_create(&document_id, schema).await;
    state
        .registry
        .join_document(&session.client_id, &document_id)
        .await;

    let mut presence = Presence::online(session.client_id.clone(), now_ms());
    presence.user_id = session.info.user_id.clone();
    presence.name = session.info.name.clone();
    presence.avatar = session.info.avatar.clone();
    authority.join(link, presence).await;
}

async fn handle_operation(
    state: &AppState,
    session: &ConnSession,
    document_id: DocumentId,
    operation: Operation,
) {
    if !state
        .registry
        .is_member(&session.client_id, &document_id)
        .await
    {
        send_error(
            state,
            &session.client_id,
            ServerError::Forbidden("join the document before editing".into()),
            Some(document_id),
        )
        .await;
        return;
    }
    if !state.auth.can_edit(&session.info, &document_id).await {
        send_error(
            state,
            &session.client_id,
            ServerError::Forbidden("editing this document is denied".into()),
            Some(document_id),
        )
        .await;
        return;
    }
    if validate_id(operation.id.as_str()).is_err()
        || validate_id(operation.client_id.as_str()).is_err()
    {
        send_error(
            state,
            &session.client_id,
            ServerError::InvalidOperation("operation carries invalid identifiers".into()),
            Some(document_id),
        )
        .await;
        return;
    }

    let Some(authority) = state.authorities.get(&document_id).await else {
        send_error(
            state,
            &session.client_id,
            ServerError::DocumentNotFound(document_id.to_string()),
            Some(document_id),
        )
        .await;
        return;
    };
    authority.apply(session.client_id.clone(), operation).await;
}

async fn handle_presence(
    state: &AppState,
    session: &ConnSession,
    document_id: DocumentId,
    mut presence: Presence,
) {
    if !state
        .registry
        .is_member(&session.client_id, &document_id)
        .await
    {
        send_error(
            state,
            &session.client_id,
            ServerError::Forbidden("join the document before updating presence".into()),
            Some(document_id),
        )
        .await;
        return;
    }
    let Some(authority) = state.authorities.get(&document_id).await else {
        return;
    };
    // Stamp server-side; clients cannot impersonate or backdate.
    presence.client_id = session.client_id.clone();
    presence.last_seen = now_ms();
    presence.is_online = true;
    authority.presence(presence).await;
}

async fn send(state: &AppState, client_id: &ClientId, message: ServerMessage) {
    if let Some(link) = state.registry.link(client_id).await {
        let _ = link.sender.send(message).await;
    }
}

/// Client-induced errors go to the originator only; peers never hear of
/// them.
async fn send_error(
    state: &AppState,
    client_id: &ClientId,
    error: ServerError,
    document_id: Option<DocumentId>,
) {
    send(state, client_id, ServerMessage::Error {
        timestamp: now_ms(),
        code: error.code(),
        message: error.to_string(),
        document_id,
    })
    .await;
}

/// Periodic sweep: force out sessions whose transport is closed or whose
/// last activity exceeds the idle timeout, and evict empty documents.
pub async fn sweep_task(state: AppState) {
    let mut ticker = tokio::time::interval(state.config.sweep_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        ticker.tick().await;
        let stale = state.registry.stale_clients(state.config.idle_timeout).await;
        for link in stale {
            info!(client = %link.client_id, "sweeping idle session");
            link.fire_kill();
            // If the connection task is already gone, clean up on its
            // behalf.
            if link.sender.is_closed() {
                let joined = state.registry.remove(&link.client_id).await;
                for document_id in joined {
                    if let Some(authority) = state.authorities.get(&document_id).await {
                        authority.leave(link.client_id.clone(), false).await;
                    }
                }
            }
        }
        state.authorities.evict_idle().await;
    }
}
