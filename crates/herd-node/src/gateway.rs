// Copyright (c) 2024-2026 The herd project developers
//
// SPDX-License-Identifier: Apache-2.0
//!
//! WebSocket-backed implementation of the engine's gateway port.
//!
//! Clients are registered with an unbounded frame channel; the WS handler
//! task drains it onto the socket.  Rooms are plain client-id sets in a
//! `DashMap` — fan-out is a clone of the member set plus one send per
//! member, no locks held while sending.

use std::collections::HashSet;

use dashmap::DashMap;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::debug;

use async_trait::async_trait;
use herd_engine::{agent_room, EventGateway};
use herd_model::AgentId;

/// One serialized frame: `{"event": <name>, "data": <payload>}`.
pub fn frame(event: &str, data: &Value) -> String {
    json!({ "event": event, "data": data }).to_string()
}

#[derive(Default)]
pub struct WsGateway {
    clients: DashMap<String, mpsc::UnboundedSender<String>>,
    rooms: DashMap<String, HashSet<String>>,
}

impl WsGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called by the WS handler on connect.
    pub fn register_client(&self, client_id: &str, tx: mpsc::UnboundedSender<String>) {
        self.clients.insert(client_id.to_string(), tx);
    }

    /// Called by the WS handler on disconnect; also leaves every room.
    pub fn remove_client(&self, client_id: &str) {
        self.clients.remove(client_id);
        for mut room in self.rooms.iter_mut() {
            room.value_mut().remove(client_id);
        }
    }

    fn send(&self, client_id: &str, text: String) {
        if let Some(tx) = self.clients.get(client_id) {
            // A closed channel means the handler is mid-teardown; the
            // disconnect path will clean the maps.
            let _ = tx.send(text);
        }
    }

    fn room_members(&self, room: &str) -> Vec<String> {
        self.rooms
            .get(room)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl EventGateway for WsGateway {
    async fn emit_to_client(&self, client_id: &str, event: &str, data: Value) {
        self.send(client_id, frame(event, &data));
    }

    async fn emit_to_all(&self, event: &str, data: Value) {
        let text = frame(event, &data);
        for entry in self.clients.iter() {
            let _ = entry.value().send(text.clone());
        }
    }

    async fn emit_to_room(&self, room: &str, event: &str, data: Value) {
        let members = self.room_members(room);
        if members.is_empty() {
            debug!(room, event, "emit to empty room");
            return;
        }
        let text = frame(event, &data);
        for client_id in members {
            self.send(&client_id, text.clone());
        }
    }

    async fn join_room(&self, client_id: &str, room: &str) {
        self.rooms
            .entry(room.to_string())
            .or_default()
            .insert(client_id.to_string());
    }

    async fn leave_room(&self, client_id: &str, room: &str) {
        if let Some(mut members) = self.rooms.get_mut(room) {
            members.remove(client_id);
        }
    }

    async fn cleanup_agent_rooms(&self, agent_id: AgentId) {
        self.rooms.remove(&agent_room(agent_id));
    }

    async fn connected_clients(&self) -> Vec<String> {
        self.clients.iter().map(|e| e.key().clone()).collect()
    }

    async fn is_client_connected(&self, client_id: &str) -> bool {
        self.clients.contains_key(client_id)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
