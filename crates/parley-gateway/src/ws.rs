// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! WebSocket surface for web chat sessions.
//!
//! `GET /ws?session=<id>` upgrades to a socket bound to the conversation
//! `web:<id>`. Each client frame runs one turn.
//!
//! Client -> Server (JSON):
//! ```json
//! {"type": "message", "text": "BOOK", "message_id": "optional-id"}
//! ```
//!
//! Server -> Client (JSON):
//! ```json
//! {"type": "reply", "conversation_id": "web:s1", "message_id": "...", "response_text": "...", "version": 3}
//! {"type": "error", "error": "..."}
//! ```

use axum::{
    extract::{
        Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use parley_core::{InboundEvent, TurnReply, conversation_id_for};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::ApiError;
use crate::server::GatewayState;

/// Channel name of web chat conversations.
pub const WEB_CHANNEL: &str = "web";

/// Query parameters of the upgrade request.
#[derive(Debug, Deserialize)]
pub struct WsParams {
    /// Chat session id; a fresh one is generated when absent.
    #[serde(default)]
    pub session: Option<String>,
    #[serde(default)]
    pub customer_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientFrame {
    Message {
        text: String,
        #[serde(default)]
        message_id: Option<String>,
    },
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ServerFrame {
    Reply {
        conversation_id: String,
        message_id: String,
        response_text: String,
        version: u64,
    },
    Error {
        error: String,
    },
}

impl From<TurnReply> for ServerFrame {
    fn from(reply: TurnReply) -> Self {
        Self::Reply {
            conversation_id: reply.conversation_id,
            message_id: reply.message_id,
            response_text: reply.response_text,
            version: reply.version,
        }
    }
}

/// WebSocket upgrade handler.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<WsParams>,
    State(state): State<GatewayState>,
) -> Response {
    let session = params
        .session
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| uuid::Uuid::new_v4().simple().to_string());
    ws.on_upgrade(move |socket| handle_socket(socket, state, session, params.customer_id))
}

async fn handle_socket(
    socket: WebSocket,
    state: GatewayState,
    session: String,
    customer_id: Option<String>,
) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let conversation_id = conversation_id_for(WEB_CHANNEL, &session);
    *state.ws_sessions.entry(session.clone()).or_insert(0) += 1;
    tracing::debug!(conversation_id = %conversation_id, "websocket session opened");

    let (tx, mut rx) = mpsc::channel::<String>(64);
    let sender_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if ws_sender.send(Message::Text(frame.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(msg)) = ws_receiver.next().await {
        let text = match msg {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };
        let frame = match serde_json::from_str::<ClientFrame>(&text) {
            Ok(ClientFrame::Message { text, message_id }) => {
                run_frame(&state, &conversation_id, customer_id.clone(), text, message_id).await
            }
            Err(e) => ServerFrame::Error {
                error: format!("invalid frame: {e}"),
            },
        };
        let Ok(encoded) = serde_json::to_string(&frame) else {
            continue;
        };
        if tx.send(encoded).await.is_err() {
            break;
        }
    }

    drop(tx);
    let _ = sender_task.await;
    let remove = match state.ws_sessions.get_mut(&session) {
        Some(mut count) => {
            *count = count.saturating_sub(1);
            *count == 0
        }
        None => false,
    };
    if remove {
        state.ws_sessions.remove_if(&session, |_, count| *count == 0);
    }
    tracing::debug!(conversation_id = %conversation_id, "websocket session closed");
}

async fn run_frame(
    state: &GatewayState,
    conversation_id: &str,
    customer_id: Option<String>,
    text: String,
    message_id: Option<String>,
) -> ServerFrame {
    if text.trim().is_empty() {
        return ServerFrame::Error {
            error: "text must not be empty".to_string(),
        };
    }
    let event = InboundEvent {
        message_id: message_id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
        conversation_id: conversation_id.to_string(),
        project_id: state.default_project().to_string(),
        customer_id,
        customer_name: None,
        text,
        received_at: state.runtime.clock.now(),
    };
    match state.runtime.orchestrator.handle_turn(event).await {
        Ok(reply) => reply.into(),
        Err(e) => {
            let status = ApiError(e).status();
            tracing::warn!(conversation_id, status = %status, "websocket turn failed");
            ServerFrame::Error {
                error: status
                    .canonical_reason()
                    .unwrap_or("request failed")
                    .to_lowercase(),
            }
        }
    }
}
