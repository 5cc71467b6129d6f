// Copyright (c) 2024-2026 The herd project developers
//
// SPDX-License-Identifier: MIT
//!
//! Agent identity and lifecycle.
//!
//! The status machine is the single source of truth for legal transitions:
//!
//! ```text
//! INITIALIZING ──► RUNNING ──► COMPLETED
//!                     │
//!                     ├──────► FAILED
//!                     └──────► TERMINATED
//! ```
//!
//! Every other mutation is rejected with [`Error::IllegalTransition`] and
//! leaves the entity untouched.  Timestamps are set by the transition
//! methods, never by callers.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::AgentConfig;
use crate::error::{Error, Result};

// ── Identifiers ───────────────────────────────────────────────────────────────

/// Opaque agent identifier.  Canonical form is the lowercase hyphenated UUID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(Uuid);

impl AgentId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse from the canonical form; rejects anything that is not a UUID.
    pub fn parse(s: &str) -> Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|_| Error::Validation(format!("invalid agent id: {s:?}")))
    }
}

impl Default for AgentId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Uuid renders hyphenated lowercase, which is the canonical form.
        self.0.fmt(f)
    }
}

impl FromStr for AgentId {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Identifier of a queued launch request.  Distinct from [`AgentId`]: the
/// request exists before any agent does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(Uuid);

impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn parse(s: &str) -> Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|_| Error::Validation(format!("invalid request id: {s:?}")))
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// ── Agent type ────────────────────────────────────────────────────────────────

/// Which backend drives the agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AgentType {
    /// Anthropic's `claude` CLI (subprocess or python proxy).
    ClaudeCode,
    /// Google's `gemini` CLI.
    GeminiCli,
    /// Scripted in-process runner for deterministic tests.
    Synthetic,
}

impl AgentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ClaudeCode => "claude-code",
            Self::GeminiCli => "gemini-cli",
            Self::Synthetic => "synthetic",
        }
    }
}

impl fmt::Display for AgentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentType {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self> {
        match s {
            "claude-code" => Ok(Self::ClaudeCode),
            "gemini-cli" => Ok(Self::GeminiCli),
            "synthetic" => Ok(Self::Synthetic),
            other => Err(Error::Validation(format!("unknown agent type: {other:?}"))),
        }
    }
}

// ── Status machine ────────────────────────────────────────────────────────────

/// Lifecycle state of an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Initializing,
    Running,
    Completed,
    Failed,
    Terminated,
}

impl AgentStatus {
    /// True once the agent can never change state again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Terminated)
    }

    /// True while the backend may still produce output.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Initializing | Self::Running)
    }

    /// The legal transition set.  Everything not listed here is rejected.
    pub fn can_transition_to(&self, next: AgentStatus) -> bool {
        matches!(
            (self, next),
            (Self::Initializing, Self::Running)
                | (Self::Running, Self::Completed)
                | (Self::Running, Self::Failed)
                | (Self::Running, Self::Terminated)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initializing => "initializing",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Terminated => "terminated",
        }
    }
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error kind + message attached to a FAILED agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentError {
    /// Short machine-readable kind, e.g. `"BackendError"`.
    pub name: String,
    pub message: String,
}

impl AgentError {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
        }
    }
}

// ── Agent entity ──────────────────────────────────────────────────────────────

/// One managed lifecycle around a single backend invocation.
///
/// Readers hold cloned snapshots; the only mutators are the orchestrator and
/// the streaming broadcaster, always through the `mark_*` methods.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Agent {
    pub id: AgentId,
    #[serde(rename = "type")]
    pub agent_type: AgentType,
    pub status: AgentStatus,
    pub prompt: String,
    #[serde(default)]
    pub config: AgentConfig,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Present iff status is FAILED.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<AgentError>,
}

impl Agent {
    pub fn new(id: AgentId, agent_type: AgentType, prompt: String, config: AgentConfig) -> Self {
        Self {
            id,
            agent_type,
            status: AgentStatus::Initializing,
            prompt,
            config,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            error: None,
        }
    }

    fn transition(&mut self, next: AgentStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(Error::IllegalTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    pub fn mark_running(&mut self) -> Result<()> {
        self.transition(AgentStatus::Running)?;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    pub fn mark_completed(&mut self) -> Result<()> {
        self.transition(AgentStatus::Completed)?;
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    pub fn mark_failed(&mut self, error: AgentError) -> Result<()> {
        self.transition(AgentStatus::Failed)?;
        self.completed_at = Some(Utc::now());
        self.error = Some(error);
        Ok(())
    }

    pub fn mark_terminated(&mut self) -> Result<()> {
        self.transition(AgentStatus::Terminated)?;
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
