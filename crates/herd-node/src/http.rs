// Copyright (c) 2024-2026 The herd project developers
//
// SPDX-License-Identifier: Apache-2.0
//!
//! The HTTP API under `/api`.
//!
//! Thin handlers: parse, delegate to the orchestrator, map domain errors to
//! status codes.  `force=true` on the DELETE routes suppresses the
//! status-guard errors so test cleanup can bulldoze running agents.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};

use herd_engine::{events, EventGateway, Orchestrator, SubscriptionRegistry};
use herd_model::{catalog, Agent, AgentConfig, AgentId, AgentType, Error, LaunchRequest, RequestId};
use herd_store::{AgentRepository, MessageStore};

use crate::config::RepositoryKind;
use crate::gateway::WsGateway;

// ── State ─────────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub registry: Arc<SubscriptionRegistry>,
    pub gateway: Arc<WsGateway>,
    pub repo: Arc<dyn AgentRepository>,
    pub store: Arc<dyn MessageStore>,
    pub repository_kind: RepositoryKind,
    pub started_at: Instant,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/agents", post(launch_agent).get(list_agents))
        .route("/api/agents/active", get(list_active))
        .route("/api/agents/queue", get(queue_info))
        .route("/api/agents/queue/:request_id", delete(cancel_queued))
        .route("/api/agents/:id", get(get_agent).delete(terminate_agent))
        .route("/api/agents/:id/status", get(get_agent_status))
        .route("/api/agents/:id/messages", get(get_agent_messages))
        .route("/api/agents/:id/delete", delete(delete_agent))
        .route("/api/providers", get(providers))
        .route("/api/health", get(health))
        .route("/ws", get(crate::ws::ws_handler))
        .with_state(state)
}

// ── Error mapping ─────────────────────────────────────────────────────────────

pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, name) = match &self.0 {
            Error::Validation(_) => (StatusCode::BAD_REQUEST, "ValidationError"),
            Error::NotFound(_) => (StatusCode::NOT_FOUND, "NotFoundError"),
            Error::Conflict(_) | Error::IllegalTransition { .. } => {
                (StatusCode::BAD_REQUEST, "ConflictError")
            }
            Error::AgentMissing(_) => (StatusCode::NOT_FOUND, "AgentNotFoundError"),
            Error::Cancelled(_) => (StatusCode::CONFLICT, "CancelledError"),
            Error::Backend(_) => (StatusCode::BAD_GATEWAY, "BackendError"),
            Error::Io { .. } | Error::Storage(_) | Error::InstanceAlreadyRunning { .. } => {
                (StatusCode::INTERNAL_SERVER_ERROR, "InternalError")
            }
        };
        let body = json!({
            "statusCode": status.as_u16(),
            "error": name,
            "message": self.0.to_string(),
        });
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

fn parse_agent_id(raw: &str) -> ApiResult<AgentId> {
    Ok(AgentId::parse(raw)?)
}

fn timestamp() -> String {
    Utc::now().to_rfc3339()
}

// ── DTOs ──────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LaunchAgentDto {
    pub agent_type: AgentType,
    pub prompt: String,
    #[serde(default)]
    pub config: AgentConfig,
}

#[derive(Debug, Default, Deserialize)]
pub struct ForceQuery {
    #[serde(default)]
    pub force: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SinceQuery {
    #[serde(default)]
    pub since: Option<u64>,
}

// ── Handlers ──────────────────────────────────────────────────────────────────

async fn launch_agent(
    State(state): State<AppState>,
    Json(dto): Json<LaunchAgentDto>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let request = LaunchRequest::new(dto.agent_type, &dto.prompt, dto.config)?;
    let agent = state.orchestrator.launch(request).await?;

    state
        .gateway
        .emit_to_all(
            events::AGENT_CREATED,
            json!({ "agent": agent, "timestamp": timestamp() }),
        )
        .await;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "agentId": agent.id,
            "status": agent.status,
            "createdAt": agent.created_at,
        })),
    ))
}

async fn list_agents(State(state): State<AppState>) -> ApiResult<Json<Vec<Agent>>> {
    Ok(Json(state.orchestrator.list_all().await?))
}

async fn list_active(State(state): State<AppState>) -> ApiResult<Json<Vec<Agent>>> {
    Ok(Json(state.orchestrator.list_active().await?))
}

async fn get_agent(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Agent>> {
    let agent_id = parse_agent_id(&id)?;
    Ok(Json(state.orchestrator.get_agent(agent_id).await?))
}

async fn get_agent_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let agent_id = parse_agent_id(&id)?;
    let status = state.orchestrator.get_status(agent_id).await?;
    Ok(Json(json!({ "agentId": agent_id, "status": status })))
}

async fn get_agent_messages(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<SinceQuery>,
) -> ApiResult<Json<Value>> {
    let agent_id = parse_agent_id(&id)?;
    // 404 for unknown agents, not an empty list.
    state.orchestrator.get_agent(agent_id).await?;
    let messages = match query.since {
        Some(since) => state.store.list_since(agent_id, since).await?,
        None => state.store.list_by_agent(agent_id).await?,
    };
    Ok(Json(json!(messages)))
}

/// DELETE `/api/agents/:id` — terminate.
async fn terminate_agent(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<ForceQuery>,
) -> ApiResult<StatusCode> {
    let agent_id = parse_agent_id(&id)?;
    let force = query.force.unwrap_or(false);
    match state.orchestrator.terminate(agent_id).await {
        Ok(agent) => {
            state
                .gateway
                .emit_to_all(
                    events::AGENT_UPDATED,
                    json!({ "agentId": agent.id, "status": agent.status, "timestamp": timestamp() }),
                )
                .await;
            Ok(StatusCode::NO_CONTENT)
        }
        // Already-terminal agents are fine under force (test cleanup).
        Err(Error::Conflict(_)) if force => Ok(StatusCode::NO_CONTENT),
        Err(e) => Err(e.into()),
    }
}

/// DELETE `/api/agents/:id/delete` — remove from storage (messages cascade).
async fn delete_agent(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<ForceQuery>,
) -> ApiResult<Json<Value>> {
    let agent_id = parse_agent_id(&id)?;
    state
        .orchestrator
        .delete(agent_id, query.force.unwrap_or(false))
        .await?;
    state
        .gateway
        .emit_to_all(
            events::AGENT_DELETED,
            json!({ "agentId": agent_id, "timestamp": timestamp() }),
        )
        .await;
    Ok(Json(json!({ "success": true })))
}

async fn queue_info(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "queueLength": state.orchestrator.queue_length() }))
}

async fn cancel_queued(
    State(state): State<AppState>,
    Path(request_id): Path<String>,
) -> ApiResult<StatusCode> {
    let request_id = RequestId::parse(&request_id)?;
    // In-flight requests are untouched by design; both outcomes are a 204.
    state.orchestrator.cancel_launch(request_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn providers() -> Json<Value> {
    let providers = catalog::providers();
    Json(json!({ "totalCount": providers.len(), "providers": providers }))
}

async fn health(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let all = state.orchestrator.list_all().await?;
    let active = all.iter().filter(|a| a.is_active()).count();
    Ok(Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "uptimeSeconds": state.started_at.elapsed().as_secs(),
        "agents": { "total": all.len(), "active": active },
        "queueLength": state.orchestrator.queue_length(),
        "repository": state.repository_kind.as_str(),
    })))
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
