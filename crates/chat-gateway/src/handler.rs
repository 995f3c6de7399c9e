//! HTTP handlers for the chat gateway

use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use futures::{future, SinkExt, StreamExt};
use serde::{Deserialize, Serialize};

use crate::hub::Hub;
use crate::lifecycle::Outbound;

/// Shared state for handlers
#[derive(Clone)]
pub struct GatewayState {
    pub hub: Hub,
}

#[derive(Debug, Deserialize)]
pub struct ConnectParams {
    pub user_id: Option<String>,
}

/// WebSocket endpoint. Connections without a `user_id` are refused before
/// the upgrade.
pub async fn ws_connect(
    State(state): State<GatewayState>,
    Query(params): Query<ConnectParams>,
    ws: WebSocketUpgrade,
) -> Response {
    let Some(user_id) = params.user_id.filter(|id| !id.is_empty()) else {
        tracing::warn!("WebSocket connection rejected: missing user_id");
        return (StatusCode::BAD_REQUEST, "user_id is required").into_response();
    };

    tracing::info!(user_id = %user_id, "New WebSocket connection");
    ws.on_upgrade(move |socket| serve_socket(state.hub, user_id, socket))
}

async fn serve_socket(hub: Hub, user_id: String, socket: WebSocket) {
    let (ws_tx, ws_rx) = socket.split();

    let inbound = ws_rx
        .take_while(|msg| future::ready(!matches!(msg, Ok(Message::Close(_)))))
        .filter_map(|msg| {
            future::ready(match msg {
                Ok(Message::Text(text)) => Some(Ok(text.as_str().to_owned())),
                Ok(Message::Binary(bytes)) => String::from_utf8(bytes.to_vec()).ok().map(Ok),
                Ok(_) => None,
                Err(e) => Some(Err(e)),
            })
        });

    let outbound = ws_tx.with(|frame: Outbound| future::ready(Ok::<_, axum::Error>(to_message(frame))));

    if let Err(e) = hub.lifecycle().run(&user_id, inbound, outbound).await {
        tracing::warn!(error = %e, user_id = %user_id, "Connection ended with error");
    }
}

fn to_message(frame: Outbound) -> Message {
    match frame {
        Outbound::Text(text) => Message::Text(text.into()),
        Outbound::Close(reason) => Message::Close(Some(CloseFrame {
            code: reason.code(),
            reason: reason.as_str().to_string().into(),
        })),
    }
}

// History endpoint
#[derive(Debug, Deserialize)]
pub struct HistoryParams {
    pub user1: Option<String>,
    pub user2: Option<String>,
    #[serde(default)]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
}

pub async fn chat_history(
    State(state): State<GatewayState>,
    Query(params): Query<HistoryParams>,
) -> Response {
    let user1 = params.user1.filter(|id| !id.is_empty());
    let user2 = params.user2.filter(|id| !id.is_empty());
    let (Some(user1), Some(user2)) = (user1, user2) else {
        return (
            StatusCode::BAD_REQUEST,
            "Both user1 and user2 parameters required",
        )
            .into_response();
    };

    match state
        .hub
        .chat()
        .message_history(&user1, &user2, params.limit, params.offset)
        .await
    {
        Ok(messages) => Json(messages).into_response(),
        Err(e) => {
            tracing::warn!(error = %e, user1 = %user1, user2 = %user2, "Failed to get chat history");
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to get chat history").into_response()
        }
    }
}

// Presence lookup endpoint
pub async fn user_status(
    State(state): State<GatewayState>,
    Path(user_id): Path<String>,
) -> Response {
    match state.hub.presence().user_status(&user_id).await {
        Ok(record) => Json(record).into_response(),
        Err(e) => {
            tracing::warn!(error = %e, user_id = %user_id, "Failed to get user status");
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to get user status").into_response()
        }
    }
}

// Stats endpoint
#[derive(Serialize)]
pub struct StatsResponse {
    pub total_sessions: usize,
    pub decode_failures: u64,
    pub sessions: Vec<SessionStats>,
}

#[derive(Serialize)]
pub struct SessionStats {
    pub user_id: String,
    pub connection_id: String,
    pub connected_at: String,
    pub queued: usize,
    pub dropped: u64,
    pub has_subscription: bool,
}

pub async fn get_stats(State(state): State<GatewayState>) -> Json<StatsResponse> {
    let sessions: Vec<SessionStats> = state
        .hub
        .registry()
        .list_all()
        .into_iter()
        .map(|s| SessionStats {
            user_id: s.user_id.clone(),
            connection_id: s.connection_id.clone(),
            connected_at: s.connected_at.to_rfc3339(),
            queued: s.queue().len(),
            dropped: s.queue().dropped(),
            has_subscription: s.has_subscription(),
        })
        .collect();

    Json(StatsResponse {
        total_sessions: sessions.len(),
        decode_failures: state.hub.bridge().decode_failures(),
        sessions,
    })
}
