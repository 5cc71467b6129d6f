// Copyright (c) 2024-2026 The herd project developers
//
// SPDX-License-Identifier: Apache-2.0
//!
//! WebSocket event channel.
//!
//! # Wire format
//!
//! JSON text frames both ways:
//!
//! ```text
//! client → server   {"event": "subscribe",   "agentId": "<uuid>"}
//!                   {"event": "unsubscribe", "agentId": "<uuid>"}
//! server → client   {"event": "agent:message", "data": {...}}
//! ```
//!
//! On upgrade the node mints a client id, registers the socket with the
//! gateway and pushes `connected`.  Disconnect tears down every
//! subscription the client held — agents keep running and accumulating
//! messages for later replay via `?since=`.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use herd_engine::{events, EventGateway};
use herd_model::AgentId;

use crate::http::AppState;

/// Client → server commands.
#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
enum ClientCommand {
    Subscribe {
        #[serde(rename = "agentId")]
        agent_id: AgentId,
    },
    Unsubscribe {
        #[serde(rename = "agentId")]
        agent_id: AgentId,
    },
}

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: AppState) {
    let client_id = Uuid::new_v4().to_string();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    state.gateway.register_client(&client_id, tx);
    info!(client = %client_id, "WebSocket client connected");

    state
        .gateway
        .emit_to_client(
            &client_id,
            events::CONNECTED,
            json!({ "clientId": client_id, "timestamp": Utc::now().to_rfc3339() }),
        )
        .await;

    loop {
        tokio::select! {
            // Incoming command from the browser.
            msg = socket.recv() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ClientCommand>(&text) {
                            Ok(cmd) => handle_command(&state, &client_id, cmd).await,
                            Err(e) => {
                                warn!(client = %client_id, "invalid command JSON: {e}");
                                state.gateway.emit_to_client(
                                    &client_id,
                                    events::AGENT_ERROR,
                                    json!({
                                        "error": {
                                            "name": "ValidationError",
                                            "message": format!("invalid command: {e}"),
                                        },
                                        "timestamp": Utc::now().to_rfc3339(),
                                    }),
                                ).await;
                            }
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if socket.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {} // binary frames ignored
                    Some(Err(e)) => {
                        debug!(client = %client_id, "WebSocket recv error: {e}");
                        break;
                    }
                }
            }
            // Outgoing frame from the gateway.
            frame = rx.recv() => {
                match frame {
                    Some(text) => {
                        if socket.send(Message::Text(text)).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
        }
    }

    // Disconnect cancels subscriptions, never agents.
    state.registry.unsubscribe_client(&client_id).await;
    state.gateway.remove_client(&client_id);
    info!(client = %client_id, "WebSocket client disconnected");
}

async fn handle_command(state: &AppState, client_id: &str, cmd: ClientCommand) {
    let timestamp = Utc::now().to_rfc3339();
    match cmd {
        ClientCommand::Subscribe { agent_id } => {
            if let Err(e) = state.orchestrator.get_agent(agent_id).await {
                state
                    .gateway
                    .emit_to_client(
                        client_id,
                        events::AGENT_ERROR,
                        json!({
                            "agentId": agent_id,
                            "error": { "name": "NotFoundError", "message": e.to_string() },
                            "timestamp": timestamp,
                        }),
                    )
                    .await;
                return;
            }
            match state.orchestrator.runner_for_agent(agent_id).await {
                Some(runner) => {
                    state.registry.subscribe(agent_id, client_id, runner).await;
                }
                None => {
                    // Finished agent: nothing live to observe, but the room
                    // membership is still honored (no events will come).
                    state
                        .gateway
                        .join_room(client_id, &herd_engine::agent_room(agent_id))
                        .await;
                }
            }
            info!(client = %client_id, agent = %agent_id, "subscribed");
            state
                .gateway
                .emit_to_client(
                    client_id,
                    events::SUBSCRIBED,
                    json!({ "agentId": agent_id, "timestamp": timestamp }),
                )
                .await;
        }
        ClientCommand::Unsubscribe { agent_id } => {
            state
                .registry
                .unsubscribe_from_agent(agent_id, client_id)
                .await;
            info!(client = %client_id, agent = %agent_id, "unsubscribed");
            state
                .gateway
                .emit_to_client(
                    client_id,
                    events::UNSUBSCRIBED,
                    json!({ "agentId": agent_id, "timestamp": timestamp }),
                )
                .await;
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
