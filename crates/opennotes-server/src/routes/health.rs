//! Liveness and subscription health.

use axum::extract::State;
use axum::{Json, Router, routing::get};
use serde_json::json;

use crate::state::AppContext;

pub fn router() -> Router<AppContext> {
    Router::new().route("/health", get(health))
}

async fn health(State(context): State<AppContext>) -> Json<serde_json::Value> {
    let subscriptions = match context.bus.check_subscription_health().await {
        Ok(report) => json!(report
            .iter()
            .map(|s| json!({
                "consumer": s.consumer_name,
                "subject": s.subject,
                "healthy": s.healthy,
            }))
            .collect::<Vec<_>>()),
        Err(e) => json!({ "error": e.to_string() }),
    };
    Json(json!({
        "status": "ok",
        "subscriptions": subscriptions,
    }))
}
