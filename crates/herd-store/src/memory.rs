// Copyright (c) 2024-2026 The herd project developers
//
// SPDX-License-Identifier: Apache-2.0
//!
//! In-memory twin of the SQLite store for `REPOSITORY_TYPE=memory` and the
//! engine's scenario tests.  Same observable contract, including the
//! content canonicalize-then-parse round-trip and the append-time
//! foreign-key check.

use std::collections::HashMap;

use chrono::Utc;
use tokio::sync::Mutex;
use uuid::Uuid;

use async_trait::async_trait;
use herd_model::message::{content_from_text, metadata_from_text};
use herd_model::{
    Agent, AgentId, AgentMessage, AgentStatus, AgentType, Error, NewMessage, Result,
};

use crate::{AgentRepository, MessageStore};

#[derive(Default)]
struct Inner {
    agents: HashMap<AgentId, Agent>,
    messages: HashMap<AgentId, Vec<AgentMessage>>,
}

/// Volatile store; everything is lost on drop.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AgentRepository for MemoryStore {
    async fn save(&self, agent: &Agent) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.agents.insert(agent.id, agent.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: AgentId) -> Result<Option<Agent>> {
        let inner = self.inner.lock().await;
        Ok(inner.agents.get(&id).cloned())
    }

    async fn find_all(&self) -> Result<Vec<Agent>> {
        let inner = self.inner.lock().await;
        let mut all: Vec<Agent> = inner.agents.values().cloned().collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(all)
    }

    async fn find_by_status(&self, status: AgentStatus) -> Result<Vec<Agent>> {
        Ok(self
            .find_all()
            .await?
            .into_iter()
            .filter(|a| a.status == status)
            .collect())
    }

    async fn find_by_type(&self, agent_type: AgentType) -> Result<Vec<Agent>> {
        Ok(self
            .find_all()
            .await?
            .into_iter()
            .filter(|a| a.agent_type == agent_type)
            .collect())
    }

    async fn delete(&self, id: AgentId) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        let removed = inner.agents.remove(&id).is_some();
        // Messages cascade with their agent.
        inner.messages.remove(&id);
        Ok(removed)
    }

    async fn exists(&self, id: AgentId) -> Result<bool> {
        let inner = self.inner.lock().await;
        Ok(inner.agents.contains_key(&id))
    }
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn append(&self, message: NewMessage) -> Result<AgentMessage> {
        let mut inner = self.inner.lock().await;
        if !inner.agents.contains_key(&message.agent_id) {
            return Err(Error::AgentMissing(message.agent_id));
        }
        let list = inner.messages.entry(message.agent_id).or_default();
        // Same canonicalization as the durable store so the observable
        // content shape does not depend on the backend.
        let content_text = message.content_text();
        let raw_text = message.raw.as_ref().map(|v| v.to_string());
        let metadata_text = message.metadata.as_ref().map(|v| v.to_string());
        let saved = AgentMessage {
            id: Uuid::new_v4(),
            agent_id: message.agent_id,
            sequence_number: list.len() as u64 + 1,
            message_type: message.message_type,
            role: message.role,
            content: content_from_text(&content_text),
            raw: raw_text.as_deref().map(content_from_text),
            metadata: metadata_from_text(metadata_text.as_deref()),
            created_at: Utc::now(),
        };
        list.push(saved.clone());
        Ok(saved)
    }

    async fn list_by_agent(&self, agent_id: AgentId) -> Result<Vec<AgentMessage>> {
        let inner = self.inner.lock().await;
        Ok(inner.messages.get(&agent_id).cloned().unwrap_or_default())
    }

    async fn list_since(&self, agent_id: AgentId, since: u64) -> Result<Vec<AgentMessage>> {
        Ok(self
            .list_by_agent(agent_id)
            .await?
            .into_iter()
            .filter(|m| m.sequence_number > since)
            .collect())
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
