//! Push endpoint handlers

use axum::{body::Bytes, extract::State, http::StatusCode, response::Json};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;

use usagelamp_core::scheduler::Trigger;
use usagelamp_core::state::SharedStore;
use usagelamp_core::usage::{parse_usage_document, UsageSource};

/// Helper to create JSON error responses
fn json_error(status: StatusCode, message: &str) -> (StatusCode, Json<Value>) {
    (status, Json(serde_json::json!({"error": message})))
}

/// Shared state for push handlers
pub struct PushState {
    pub store: SharedStore,
    pub triggers: mpsc::Sender<Trigger>,
}

/// Diagnostics response for `GET /status`
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PushStatusResponse {
    pub running: bool,
    pub extension_connected: bool,
    pub last_update: Option<DateTime<Utc>>,
}

/// POST /usage - store a pushed usage document
pub async fn post_usage(
    State(state): State<Arc<PushState>>,
    body: Bytes,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let doc: Value = serde_json::from_slice(&body).map_err(|e| {
        tracing::debug!("Rejected push payload: {}", e);
        json_error(StatusCode::BAD_REQUEST, "Invalid JSON body")
    })?;

    let snapshot = parse_usage_document(&doc, UsageSource::Push).ok_or_else(|| {
        tracing::debug!("Push payload had no usable utilization field");
        json_error(StatusCode::BAD_REQUEST, "No usage value found in payload")
    })?;

    tracing::info!(
        percentage = snapshot.percentage,
        details = %snapshot.details,
        "Usage pushed"
    );
    state.store.record_push(snapshot);

    if state.triggers.send(Trigger::Push).await.is_err() {
        tracing::debug!("Scheduler gone, push stored without a cycle");
    }

    Ok(Json(serde_json::json!({"ok": true})))
}

/// GET /status - push listener diagnostics
pub async fn get_status(State(state): State<Arc<PushState>>) -> Json<PushStatusResponse> {
    Json(PushStatusResponse {
        running: true,
        extension_connected: state.store.push_connected(Utc::now()),
        last_update: state.store.last_push_at(),
    })
}
