// Copyright (c) 2024-2026 The herd project developers
//
// SPDX-License-Identifier: MIT
use serde::{Deserialize, Serialize};
use serde_json::Value;

use herd_model::{AgentError, AgentId, AgentStatus, NewMessage};

/// Events emitted by a runner while an agent is executing.
/// The streaming broadcaster is the canonical consumer; clients receive the
/// translated `agent:*` events.
#[derive(Debug, Clone)]
pub enum RunnerEvent {
    /// A new piece of backend output, ready for persistence.
    Message(NewMessage),
    /// The backend's view of the agent state changed.
    StatusChange {
        agent_id: AgentId,
        status: AgentStatus,
    },
    /// A backend error; the broadcaster decides persistence policy.
    Error {
        agent_id: AgentId,
        error: AgentError,
    },
    /// The backend finished.
    Complete {
        agent_id: AgentId,
        result: RunResult,
    },
}

impl RunnerEvent {
    pub fn agent_id(&self) -> AgentId {
        match self {
            Self::Message(m) => m.agent_id,
            Self::StatusChange { agent_id, .. }
            | Self::Error { agent_id, .. }
            | Self::Complete { agent_id, .. } => *agent_id,
        }
    }
}

/// Terminal outcome of one backend run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Success,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunResult {
    pub status: RunStatus,
    pub duration_ms: u64,
    pub message_count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<Value>,
}

impl RunResult {
    pub fn success(duration_ms: u64, message_count: u64) -> Self {
        Self {
            status: RunStatus::Success,
            duration_ms,
            message_count,
            stats: None,
        }
    }

    pub fn failed(duration_ms: u64, message_count: u64) -> Self {
        Self {
            status: RunStatus::Failed,
            duration_ms,
            message_count,
            stats: None,
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
