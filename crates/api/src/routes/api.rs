use std::time::Duration;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    middleware,
    routing::{get, post},
    Json, Router,
};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use common::{Error, OrderAck, OrderSide, OrderType, RunSnapshot};
use engine::TwapRequest;

use crate::{auth::require_auth, ApiError, AppState};

pub fn api_router(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/api/orders", post(post_order))
        .route("/api/twap", get(list_runs).post(launch_twap))
        .route("/api/twap/:id", get(get_run))
        .route("/api/twap/:id/cancel", post(cancel_run))
        .route_layer(middleware::from_fn_with_state(state, require_auth))
}

// ─── Single orders ────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct OrderBody {
    symbol: String,
    side: OrderSide,
    #[serde(default)]
    order_type: OrderType,
    quantity: Decimal,
    price: Option<Decimal>,
}

async fn post_order(
    State(state): State<AppState>,
    Json(body): Json<OrderBody>,
) -> Result<Json<OrderAck>, ApiError> {
    let ack = match body.order_type {
        OrderType::Market => {
            state
                .executor
                .place_market(&body.symbol, body.side, body.quantity)
                .await?
        }
        OrderType::Limit => {
            let price = body
                .price
                .ok_or_else(|| Error::InvalidPlan("limit orders need a price".into()))?;
            state
                .executor
                .place_limit(&body.symbol, body.side, body.quantity, price)
                .await?
        }
    };
    Ok(Json(ack))
}

// ─── TWAP runs ────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct TwapBody {
    symbol: String,
    side: OrderSide,
    #[serde(default)]
    order_type: OrderType,
    quantity: Decimal,
    price: Option<Decimal>,
    slices: u32,
    duration_secs: u64,
}

impl From<TwapBody> for TwapRequest {
    fn from(body: TwapBody) -> Self {
        TwapRequest {
            symbol: body.symbol,
            side: body.side,
            order_type: body.order_type,
            quantity: body.quantity,
            price: body.price,
            slices: body.slices,
            duration: Duration::from_secs(body.duration_secs),
        }
    }
}

async fn launch_twap(
    State(state): State<AppState>,
    Json(body): Json<TwapBody>,
) -> Result<(StatusCode, Json<RunSnapshot>), ApiError> {
    let plan = state.executor.prepare_twap(body.into()).await?;
    let handle = state.manager.launch(plan).await?;
    info!(run_id = %handle.run_id(), "TWAP launched from dashboard");
    Ok((StatusCode::CREATED, Json(handle.snapshot().await)))
}

async fn list_runs(State(state): State<AppState>) -> Json<Value> {
    let runs = state.manager.list().await;
    let summaries: Vec<_> = runs.iter().map(RunSnapshot::summary).collect();
    Json(json!({ "runs": summaries, "total": runs.len() }))
}

async fn get_run(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<RunSnapshot>, (StatusCode, Json<Value>)> {
    match state.manager.get(&id).await {
        Some(handle) => Ok(Json(handle.snapshot().await)),
        None => Err(not_found(&id)),
    }
}

async fn cancel_run(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<Value>), (StatusCode, Json<Value>)> {
    if state.manager.cancel(&id).await {
        Ok((
            StatusCode::ACCEPTED,
            Json(json!({ "run_id": id, "status": "cancel_requested" })),
        ))
    } else {
        Err(not_found(&id))
    }
}

fn not_found(id: &str) -> (StatusCode, Json<Value>) {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "error": format!("no TWAP run with id {id}") })),
    )
}
