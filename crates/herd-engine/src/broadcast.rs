// Copyright (c) 2024-2026 The herd project developers
//
// SPDX-License-Identifier: Apache-2.0
//!
//! The streaming broadcaster: persist, then emit.
//!
//! Messages are appended to the store before any socket sees them, so a
//! client that fetches history right after an event never misses it and the
//! sequence numbers it observes are dense.  Terminal transitions follow the
//! same rule: the agent row is updated before `agent:complete` goes out.
//!
//! Append failures are propagated back to the runner (which logs them) —
//! a dropped message is worse than a visible failure.  Persistence failures
//! on the completion path are logged and the emission still happens.

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tracing::{debug, error, warn};

use async_trait::async_trait;
use herd_model::{AgentError, AgentId, AgentMessage, AgentStatus, Error, NewMessage, Result};
use herd_runner::{AgentObserver, RunResult, RunStatus, RunnerEvent};
use herd_store::{AgentRepository, MessageStore};

use crate::gateway::{agent_room, events, EventGateway};

pub struct StreamBroadcaster {
    repo: Arc<dyn AgentRepository>,
    store: Arc<dyn MessageStore>,
    gateway: Arc<dyn EventGateway>,
}

impl StreamBroadcaster {
    pub fn new(
        repo: Arc<dyn AgentRepository>,
        store: Arc<dyn MessageStore>,
        gateway: Arc<dyn EventGateway>,
    ) -> Arc<Self> {
        Arc::new(Self {
            repo,
            store,
            gateway,
        })
    }

    /// The singleton observer wired between one agent's runner and this
    /// broadcaster.  The registry creates exactly one per agent.
    pub fn observer(self: &Arc<Self>) -> Arc<dyn AgentObserver> {
        Arc::new(BroadcastObserver {
            broadcaster: self.clone(),
        })
    }

    fn timestamp() -> String {
        Utc::now().to_rfc3339()
    }

    /// Persist one message, then fan it out to the agent's room.
    pub async fn on_message(&self, message: NewMessage) -> Result<AgentMessage> {
        let agent_id = message.agent_id;
        let saved = match self.store.append(message).await {
            Ok(saved) => saved,
            Err(e) => {
                if e.is_agent_missing() {
                    // Surface the broken write to anyone watching the room.
                    self.gateway
                        .emit_to_room(
                            &agent_room(agent_id),
                            events::AGENT_ERROR,
                            json!({
                                "agentId": agent_id,
                                "error": {
                                    "name": "AgentNotFoundError",
                                    "message": e.to_string(),
                                },
                                "timestamp": Self::timestamp(),
                            }),
                        )
                        .await;
                }
                return Err(e);
            }
        };

        self.gateway
            .emit_to_room(
                &agent_room(agent_id),
                events::AGENT_MESSAGE,
                json!({
                    "agentId": agent_id,
                    "message": saved,
                    "timestamp": Self::timestamp(),
                }),
            )
            .await;
        Ok(saved)
    }

    /// Status changes are not persisted as messages.  A legal transition is
    /// written to the agent row; the event is emitted either way.
    pub async fn on_status_change(&self, agent_id: AgentId, status: AgentStatus) {
        match self.repo.find_by_id(agent_id).await {
            Ok(Some(mut agent)) if agent.status != status => {
                let applied = match status {
                    AgentStatus::Running => agent.mark_running(),
                    AgentStatus::Completed => agent.mark_completed(),
                    AgentStatus::Failed => {
                        agent.mark_failed(AgentError::new("BackendError", "backend reported failure"))
                    }
                    AgentStatus::Terminated => agent.mark_terminated(),
                    AgentStatus::Initializing => Err(Error::IllegalTransition {
                        from: agent.status,
                        to: status,
                    }),
                };
                match applied {
                    Ok(()) => {
                        if let Err(e) = self.repo.save(&agent).await {
                            warn!(agent = %agent_id, "status persistence failed: {e}");
                        }
                    }
                    Err(e) => debug!(agent = %agent_id, "status change not persisted: {e}"),
                }
            }
            Ok(_) => {}
            Err(e) => warn!(agent = %agent_id, "status change lookup failed: {e}"),
        }

        let timestamp = Self::timestamp();
        self.gateway
            .emit_to_room(
                &agent_room(agent_id),
                events::AGENT_STATUS,
                json!({ "agentId": agent_id, "status": status, "timestamp": timestamp }),
            )
            .await;
        // Cross-agent list views update via the broadcast channel.
        self.gateway
            .emit_to_all(
                events::AGENT_UPDATED,
                json!({ "agentId": agent_id, "status": status, "timestamp": timestamp }),
            )
            .await;
    }

    /// Backend error: persist FAILED first, then emit.
    pub async fn on_error(&self, agent_id: AgentId, error: AgentError) {
        self.finalize(agent_id, AgentStatus::Failed, Some(error.clone()))
            .await;

        let timestamp = Self::timestamp();
        self.gateway
            .emit_to_room(
                &agent_room(agent_id),
                events::AGENT_ERROR,
                json!({
                    "agentId": agent_id,
                    "error": { "name": error.name, "message": error.message },
                    "timestamp": timestamp,
                }),
            )
            .await;
        self.gateway
            .emit_to_all(
                events::AGENT_UPDATED,
                json!({ "agentId": agent_id, "status": AgentStatus::Failed, "timestamp": timestamp }),
            )
            .await;
    }

    /// Backend finished: persist the terminal status first, then emit.
    pub async fn on_complete(&self, agent_id: AgentId, result: RunResult) {
        let status = match result.status {
            RunStatus::Success => AgentStatus::Completed,
            RunStatus::Failed => AgentStatus::Failed,
        };
        let error = match result.status {
            RunStatus::Success => None,
            RunStatus::Failed => Some(AgentError::new("BackendError", "backend run failed")),
        };
        self.finalize(agent_id, status, error).await;

        let timestamp = Self::timestamp();
        self.gateway
            .emit_to_room(
                &agent_room(agent_id),
                events::AGENT_COMPLETE,
                json!({ "agentId": agent_id, "result": result, "timestamp": timestamp }),
            )
            .await;
        self.gateway
            .emit_to_all(
                events::AGENT_UPDATED,
                json!({ "agentId": agent_id, "status": status, "timestamp": timestamp }),
            )
            .await;
    }

    /// Apply a terminal transition to the stored agent.  Failures are logged
    /// and never block the emission that follows.
    async fn finalize(&self, agent_id: AgentId, status: AgentStatus, error: Option<AgentError>) {
        let mut agent = match self.repo.find_by_id(agent_id).await {
            Ok(Some(agent)) => agent,
            Ok(None) => {
                warn!(agent = %agent_id, "finalize: agent not in storage");
                return;
            }
            Err(e) => {
                error!(agent = %agent_id, "finalize lookup failed: {e}");
                return;
            }
        };
        let applied = match status {
            AgentStatus::Completed => agent.mark_completed(),
            AgentStatus::Failed => agent.mark_failed(
                error.unwrap_or_else(|| AgentError::new("BackendError", "backend failed")),
            ),
            _ => return,
        };
        match applied {
            Ok(()) => {
                if let Err(e) = self.repo.save(&agent).await {
                    error!(agent = %agent_id, "terminal status persistence failed: {e}");
                }
            }
            // Already terminal (e.g. terminated while the backend was dying)
            // — the stored status wins.
            Err(e) => debug!(agent = %agent_id, "finalize skipped: {e}"),
        }
    }
}

/// Adapter from the runner event stream onto the broadcaster.
struct BroadcastObserver {
    broadcaster: Arc<StreamBroadcaster>,
}

#[async_trait]
impl AgentObserver for BroadcastObserver {
    async fn on_event(&self, event: RunnerEvent) -> Result<()> {
        match event {
            RunnerEvent::Message(message) => {
                self.broadcaster.on_message(message).await?;
            }
            RunnerEvent::StatusChange { agent_id, status } => {
                self.broadcaster.on_status_change(agent_id, status).await;
            }
            RunnerEvent::Error { agent_id, error } => {
                self.broadcaster.on_error(agent_id, error).await;
            }
            RunnerEvent::Complete { agent_id, result } => {
                self.broadcaster.on_complete(agent_id, result).await;
            }
        }
        Ok(())
    }
}
