use axum::{extract::State, routing::get, Json, Router};
use serde_json::{json, Value};

use common::RunState;

use crate::AppState;

pub fn health_router() -> Router<AppState> {
    Router::new().route("/healthz", get(healthz))
}

/// Health check endpoint, no auth required.
async fn healthz(State(state): State<AppState>) -> Json<Value> {
    let runs = state.manager.list().await;
    let active = runs
        .iter()
        .filter(|r| r.state == RunState::Running)
        .count();
    Json(json!({
        "status": "ok",
        "mode": state.trading_mode.to_string(),
        "runs": runs.len(),
        "active_runs": active,
    }))
}
