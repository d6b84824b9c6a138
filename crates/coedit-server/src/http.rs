//! Auxiliary HTTP surface: health and document introspection
//!
//! Informational only; the collaboration core lives on `/ws`.

use crate::AppState;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use coedit_common::{now_ms, DocumentId};
use serde_json::json;
use std::sync::atomic::Ordering;

/// GET /health
pub async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "timestamp": now_ms(),
        "connectedClients": state.registry.count().await,
        "activeDocuments": state.authorities.count().await,
        "totalOperations": state.stats.total_operations.load(Ordering::Relaxed),
        "uptime": state.stats.started_at.elapsed().as_secs(),
    }))
}

/// GET /documents
pub async fn list_documents(State(state): State<AppState>) -> Json<Vec<String>> {
    Json(
        state
            .authorities
            .ids()
            .await
            .into_iter()
            .map(|id| id.into_string())
            .collect(),
    )
}

/// GET /documents/{id}
pub async fn document_info(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    let id = DocumentId::parse(id).map_err(|_| StatusCode::BAD_REQUEST)?;
    let authority = state
        .authorities
        .get(&id)
        .await
        .ok_or(StatusCode::NOT_FOUND)?;
    let summary = authority
        .summary()
        .await
        .ok_or(StatusCode::NOT_FOUND)?;
    Ok(Json(json!({
        "id": summary.id.as_str(),
        "version": summary.version,
        "clientCount": summary.client_count,
        "createdAt": summary.created_at,
        "updatedAt": summary.updated_at,
    })))
}
