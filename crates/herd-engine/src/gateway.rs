// Copyright (c) 2024-2026 The herd project developers
//
// SPDX-License-Identifier: Apache-2.0
//!
//! The gateway port consumed by the broadcaster and the registry.
//!
//! A room is the set of currently subscribed clients for one agent, keyed
//! `"agent:<id>"`.  Emission to an empty room is a no-op; implementations
//! log it at debug level.

use async_trait::async_trait;
use serde_json::Value;

use herd_model::AgentId;

/// Wire event names, server → client.
pub mod events {
    pub const CONNECTED: &str = "connected";
    pub const SUBSCRIBED: &str = "subscribed";
    pub const UNSUBSCRIBED: &str = "unsubscribed";
    pub const AGENT_CREATED: &str = "agent:created";
    pub const AGENT_UPDATED: &str = "agent:updated";
    pub const AGENT_DELETED: &str = "agent:deleted";
    pub const AGENT_MESSAGE: &str = "agent:message";
    pub const AGENT_STATUS: &str = "agent:status";
    pub const AGENT_ERROR: &str = "agent:error";
    pub const AGENT_COMPLETE: &str = "agent:complete";
}

/// Room name for one agent's subscribers.
pub fn agent_room(agent_id: AgentId) -> String {
    format!("agent:{agent_id}")
}

/// Abstract room-membership + event-emission contract.
///
/// Client ids are opaque here; their lifecycle belongs to the transport.
#[async_trait]
pub trait EventGateway: Send + Sync {
    async fn emit_to_client(&self, client_id: &str, event: &str, data: Value);
    async fn emit_to_all(&self, event: &str, data: Value);
    async fn emit_to_room(&self, room: &str, event: &str, data: Value);

    async fn join_room(&self, client_id: &str, room: &str);
    async fn leave_room(&self, client_id: &str, room: &str);
    /// Drain every client from `"agent:<id>"` (terminate/delete path).
    async fn cleanup_agent_rooms(&self, agent_id: AgentId);

    async fn connected_clients(&self) -> Vec<String>;
    async fn is_client_connected(&self, client_id: &str) -> bool;
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn room_name_uses_the_canonical_id_form() {
        let id = AgentId::parse("a7f8b4c2-0000-4000-8000-000000000001").unwrap();
        assert_eq!(
            agent_room(id),
            "agent:a7f8b4c2-0000-4000-8000-000000000001"
        );
    }
}
