use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use futures_util::{Sink, SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, warn};

use common::ProgressEvent;

use crate::{auth::token_matches, AppState};

pub fn ws_router() -> Router<AppState> {
    Router::new().route("/ws/progress", get(ws_progress_handler))
}

#[derive(Deserialize)]
struct WsQuery {
    token: Option<String>,
}

/// WebSocket endpoint that streams progress events of every TWAP run.
/// Auth via query param `?token=<DASHBOARD_TOKEN>` (header auth not supported
/// in browser WebSocket API). The token is checked before the upgrade.
async fn ws_progress_handler(
    State(state): State<AppState>,
    Query(q): Query<WsQuery>,
    ws: Option<WebSocketUpgrade>,
) -> Response {
    if !token_matches(q.token.as_deref(), &state.dashboard_token) {
        return (StatusCode::UNAUTHORIZED, "unauthorized").into_response();
    }
    let Some(ws) = ws else {
        return (StatusCode::UPGRADE_REQUIRED, "websocket upgrade required").into_response();
    };

    let events = state.manager.subscribe();
    ws.on_upgrade(move |socket| handle_ws(socket, events))
}

/// Send every event as a JSON text frame until the sink fails or the
/// broadcast channel closes.
async fn forward_events<S>(mut events: broadcast::Receiver<ProgressEvent>, sink: &mut S)
where
    S: Sink<Message> + Unpin,
{
    loop {
        match events.recv().await {
            Ok(event) => {
                let text = match serde_json::to_string(&event) {
                    Ok(text) => text,
                    Err(e) => {
                        warn!(error = %e, "Failed to encode progress event");
                        continue;
                    }
                };
                if sink.send(Message::Text(text)).await.is_err() {
                    return;
                }
            }
            Err(RecvError::Lagged(n)) => {
                warn!(dropped = n, "WebSocket progress client lagged");
            }
            Err(RecvError::Closed) => return,
        }
    }
}

async fn handle_ws(socket: WebSocket, events: broadcast::Receiver<ProgressEvent>) {
    let (mut sender, mut receiver) = socket.split();

    let mut forward = tokio::spawn(async move { forward_events(events, &mut sender).await });

    // Drain client frames so a close is noticed promptly.
    let mut inbound = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            if matches!(msg, Message::Close(_)) {
                break;
            }
        }
    });

    tokio::select! {
        _ = &mut forward => inbound.abort(),
        _ = &mut inbound => forward.abort(),
    }
    debug!("WebSocket progress client disconnected");
}
