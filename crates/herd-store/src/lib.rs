// Copyright (c) 2024-2026 The herd project developers
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Persistence for agents and their message streams.
//!
//! Two backends implement the same pair of traits: [`SqliteStore`] for the
//! durable default and [`MemoryStore`] for `REPOSITORY_TYPE=memory` and the
//! engine's scenario tests.  Both enforce the same observable contract:
//!
//! - `save` is an upsert — an existing agent row is updated in place so its
//!   message children survive.
//! - message sequence numbers are allocated atomically inside the append and
//!   are dense from 1 per agent;
//! - appending against a missing agent fails with
//!   [`herd_model::Error::AgentMissing`], never with a silent drop.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use async_trait::async_trait;

use herd_model::{Agent, AgentId, AgentMessage, AgentStatus, AgentType, NewMessage, Result};

/// Agent entity persistence.
#[async_trait]
pub trait AgentRepository: Send + Sync {
    /// Insert or update by id.  Never re-inserts an existing row.
    async fn save(&self, agent: &Agent) -> Result<()>;
    async fn find_by_id(&self, id: AgentId) -> Result<Option<Agent>>;
    /// All agents, newest first.
    async fn find_all(&self) -> Result<Vec<Agent>>;
    async fn find_by_status(&self, status: AgentStatus) -> Result<Vec<Agent>>;
    async fn find_by_type(&self, agent_type: AgentType) -> Result<Vec<Agent>>;
    /// Returns true when a row was removed.  Messages cascade.
    async fn delete(&self, id: AgentId) -> Result<bool>;
    async fn exists(&self, id: AgentId) -> Result<bool>;
}

/// Append-only message persistence with per-agent sequencing.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Persist one message, allocating the next dense sequence number for
    /// its agent inside the same write.
    async fn append(&self, message: NewMessage) -> Result<AgentMessage>;
    /// All messages for the agent, ascending by sequence.
    async fn list_by_agent(&self, agent_id: AgentId) -> Result<Vec<AgentMessage>>;
    /// Messages with `sequence_number > since`, ascending.
    async fn list_since(&self, agent_id: AgentId, since: u64) -> Result<Vec<AgentMessage>>;
}
