// Copyright (c) 2024-2026 The herd project developers
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Backend runners: each one drives a single kind of agent backend and
//! translates its output into the common [`RunnerEvent`] shape.
//!
//! Three implementations share the [`AgentRunner`] contract:
//!
//! - [`SubprocessRunner`] spawns the backend CLI and parses its
//!   line-delimited streaming output;
//! - [`ProxyRunner`] opens `POST /agent/stream` against an HTTP proxy and
//!   consumes Server-Sent Events;
//! - [`ScriptedRunner`] replays a pre-registered schedule, giving tests a
//!   deterministic backend.
//!
//! Two rules hold everywhere: a parser returns `None` for framing-only
//! events, which are silently dropped; and a failing observer is logged and
//! never aborts its siblings.

pub mod command;
pub mod events;
pub mod factory;
pub mod observer;
pub mod parser;
pub mod process;
pub mod proxy;
pub mod scripted;

pub use events::{RunResult, RunStatus, RunnerEvent};
pub use factory::{ClaudeAdapter, RunnerFactory, StandardRunnerFactory};
pub use observer::{AgentObserver, ObserverSet};
pub use parser::{ClaudeStreamParser, GeminiStreamParser, StreamParser};
pub use process::SubprocessRunner;
pub use proxy::ProxyRunner;
pub use scripted::{ScriptedAction, ScriptedEvent, ScriptedRunner};

use std::sync::Arc;

use async_trait::async_trait;

use herd_model::{AgentId, AgentSession, AgentStatus, Result};

/// Process-like handle over one backend.
///
/// `start` takes the agent id as an explicit parameter — the orchestrator
/// mints it and the runner adopts it, so messages can reference the agent
/// row that already exists by the time the first event fires.
#[async_trait]
pub trait AgentRunner: Send + Sync {
    /// Register backend-side state and begin emitting events.
    async fn start(&self, agent_id: AgentId, session: AgentSession) -> Result<()>;

    /// Best-effort termination.  Unknown agents report
    /// [`herd_model::Error::NotFound`]; callers on the terminate path
    /// swallow that.
    async fn stop(&self, agent_id: AgentId) -> Result<()>;

    /// The runner-side view of the agent's state.
    async fn status(&self, agent_id: AgentId) -> Result<AgentStatus>;

    /// Add an observer for this agent's events.
    async fn subscribe(&self, agent_id: AgentId, observer: Arc<dyn AgentObserver>);

    /// Remove a previously subscribed observer (matched by identity).
    async fn unsubscribe(&self, agent_id: AgentId, observer: &Arc<dyn AgentObserver>);
}
