// Copyright (c) 2024-2026 The herd project developers
//
// SPDX-License-Identifier: MIT
//!
//! Per-agent session configuration and the launch request that carries it.
//!
//! `AgentConfig` is stored verbatim alongside the agent (serialized JSON
//! column) and forwarded to the runner, so the wire names are the camelCase
//! forms browser clients send.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::mcp::McpConfig;
use crate::types::{AgentType, RequestId};

/// Upper bound for the custom-instructions payload.
pub const MAX_INSTRUCTIONS_LEN: usize = 100_000;

/// Output framing requested from the backend CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OutputFormat {
    /// One JSON event per line as the run progresses (default).
    StreamJson,
    /// A single JSON document on exit.
    Json,
}

/// Recognized per-launch options.  Everything is optional; unknown client
/// fields are rejected by serde rather than silently dropped.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct AgentConfig {
    /// Opaque client-supplied correlation id, forwarded to the backend.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_format: Option<OutputFormat>,
    /// Extra CLI arguments appended after the assembled ones, in order.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_args: Option<Vec<String>>,
    /// Overall run timeout in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allowed_tools: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disallowed_tools: Option<Vec<String>>,
    /// Custom instructions injected into the CLI's instruction files for the
    /// duration of the launch (see the instruction handler).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub working_directory: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mcp: Option<McpConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Free-form mapping forwarded untouched to runners and clients.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Map<String, Value>>,
}

impl AgentConfig {
    /// Check the documented constraints.  Called by [`LaunchRequest::new`];
    /// exposed separately for handlers that accept raw configs.
    pub fn validate(&self) -> Result<()> {
        if let Some(instructions) = &self.instructions {
            if instructions.chars().count() > MAX_INSTRUCTIONS_LEN {
                return Err(Error::Validation(format!(
                    "instructions exceed {MAX_INSTRUCTIONS_LEN} characters"
                )));
            }
        }
        if let Some(mcp) = &self.mcp {
            mcp.validate()?;
        }
        Ok(())
    }
}

/// What a runner needs to drive one backend invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSession {
    pub prompt: String,
    #[serde(default)]
    pub config: AgentConfig,
}

impl AgentSession {
    pub fn new(prompt: impl Into<String>, config: AgentConfig) -> Self {
        Self {
            prompt: prompt.into(),
            config,
        }
    }
}

/// Ephemeral, queue-owned launch request.
///
/// Construction validates; a `LaunchRequest` that exists is well-formed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LaunchRequest {
    pub id: RequestId,
    pub agent_type: AgentType,
    /// Trimmed, guaranteed non-empty.
    pub prompt: String,
    #[serde(default)]
    pub config: AgentConfig,
}

impl LaunchRequest {
    pub fn new(agent_type: AgentType, prompt: &str, config: AgentConfig) -> Result<Self> {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return Err(Error::Validation("prompt must not be empty".into()));
        }
        config.validate()?;
        Ok(Self {
            id: RequestId::new(),
            agent_type,
            prompt: prompt.to_string(),
            config,
        })
    }

    pub fn session(&self) -> AgentSession {
        AgentSession::new(self.prompt.clone(), self.config.clone())
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
