// Copyright (c) 2024-2026 The herd project developers
//
// SPDX-License-Identifier: Apache-2.0
use std::path::PathBuf;

use thiserror::Error;

use crate::types::{AgentId, AgentStatus, RequestId};

pub type Result<T> = std::result::Result<T, Error>;

/// Error taxonomy for the whole engine.
///
/// Kinds, not transport codes — the HTTP layer maps these onto status codes
/// and the WebSocket layer onto `agent:error` payloads.  Domain invariant
/// violations (`IllegalTransition`, `AgentMissing`) are never swallowed.
#[derive(Debug, Error)]
pub enum Error {
    /// Input did not meet a documented constraint (empty prompt, over-length
    /// instructions, bad UUID form, invalid MCP server name).
    #[error("validation failed: {0}")]
    Validation(String),

    /// The referenced agent / request / subscription target does not exist.
    #[error("{0} not found")]
    NotFound(String),

    /// The agent is in a state incompatible with the requested operation
    /// (e.g. delete-while-running without `force`).
    #[error("conflict: {0}")]
    Conflict(String),

    /// A message append hit the agent foreign-key check: the agent row is
    /// gone.  Fatal for that write; the runner logs it and the broadcaster
    /// surfaces it to subscribed clients.
    #[error("agent {0} does not exist; message not persisted")]
    AgentMissing(AgentId),

    /// The status mutation is not on the lifecycle DAG.
    #[error("illegal status transition {from} -> {to}")]
    IllegalTransition { from: AgentStatus, to: AgentStatus },

    /// The upstream CLI or proxy failed.
    #[error("backend error: {0}")]
    Backend(String),

    /// Filesystem or network I/O failed; `path` names the failing file.
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The storage engine failed in a way that is not a domain condition.
    #[error("storage error: {0}")]
    Storage(String),

    /// A pending launch was cancelled before it started.
    #[error("launch request {0} cancelled before start")]
    Cancelled(RequestId),

    /// Another engine instance holds the process lock.
    #[error("another instance is already running (pid {pid}, port {port})")]
    InstanceAlreadyRunning { pid: u32, port: u16 },
}

impl Error {
    /// Helper for I/O failures that keeps the failing path attached.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// True for the append-time foreign-key violation kind.
    pub fn is_agent_missing(&self) -> bool {
        matches!(self, Self::AgentMissing(_))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
