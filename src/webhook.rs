//! Webhook server — the inbound HTTP surface.
//!
//! One route receives Bot API updates and maps the controller's
//! `AckDecision` onto HTTP: `Ack` answers `{"ok": true}`, `Redeliver`
//! answers 500 so the transport delivers the update again.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use tower_http::trace::TraceLayer;

use crate::channels::UpdateEnvelope;
use crate::ingest::{AckDecision, IngestionController};

/// Build the webhook router.
pub fn routes(controller: Arc<IngestionController>) -> Router {
    Router::new()
        .route("/webhook/telegram", post(telegram_webhook))
        .route("/healthz", get(healthz))
        .layer(TraceLayer::new_for_http())
        .with_state(controller)
}

async fn telegram_webhook(
    State(controller): State<Arc<IngestionController>>,
    Json(body): Json<serde_json::Value>,
) -> impl IntoResponse {
    // A malformed envelope won't improve on redelivery — ack it.
    let update: UpdateEnvelope = match serde_json::from_value(body) {
        Ok(update) => update,
        Err(e) => {
            tracing::warn!(error = %e, "Unparseable webhook update, acking");
            return ok_response();
        }
    };

    match controller.handle(update).await {
        AckDecision::Ack => ok_response(),
        AckDecision::Redeliver => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({"ok": false, "retry": true})),
        ),
    }
}

fn ok_response() -> (StatusCode, Json<serde_json::Value>) {
    (StatusCode::OK, Json(serde_json::json!({"ok": true})))
}

async fn healthz() -> &'static str {
    "ok"
}
