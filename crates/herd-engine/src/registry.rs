// Copyright (c) 2024-2026 The herd project developers
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Client ↔ agent subscription registry.
//!
//! Two maps, both owned here and mutated only under one lock:
//! `by_agent` holds the runner, the singleton broadcaster observer and the
//! subscribed client set; `by_client` is the reverse index used for
//! disconnect teardown.  The invariant: at most one observer per
//! agent-runner pair, created by the first subscriber and detached when the
//! last one leaves.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info};

use herd_model::AgentId;
use herd_runner::{AgentObserver, AgentRunner};

use crate::broadcast::StreamBroadcaster;
use crate::gateway::{agent_room, EventGateway};

struct AgentEntry {
    runner: Arc<dyn AgentRunner>,
    observer: Arc<dyn AgentObserver>,
    clients: HashSet<String>,
}

#[derive(Default)]
struct RegistryState {
    by_agent: HashMap<AgentId, AgentEntry>,
    by_client: HashMap<String, HashSet<AgentId>>,
}

pub struct SubscriptionRegistry {
    broadcaster: Arc<StreamBroadcaster>,
    gateway: Arc<dyn EventGateway>,
    state: Mutex<RegistryState>,
}

impl SubscriptionRegistry {
    pub fn new(broadcaster: Arc<StreamBroadcaster>, gateway: Arc<dyn EventGateway>) -> Arc<Self> {
        Arc::new(Self {
            broadcaster,
            gateway,
            state: Mutex::new(RegistryState::default()),
        })
    }

    /// Subscribe a client to an agent's stream.  The first subscriber wires
    /// the singleton observer into the runner; later ones only join the
    /// room.
    pub async fn subscribe(
        &self,
        agent_id: AgentId,
        client_id: &str,
        runner: Arc<dyn AgentRunner>,
    ) {
        let mut state = self.state.lock().await;
        match state.by_agent.get_mut(&agent_id) {
            Some(entry) => {
                entry.clients.insert(client_id.to_string());
            }
            None => {
                let observer = self.broadcaster.observer();
                runner.subscribe(agent_id, observer.clone()).await;
                let mut clients = HashSet::new();
                clients.insert(client_id.to_string());
                state.by_agent.insert(
                    agent_id,
                    AgentEntry {
                        runner,
                        observer,
                        clients,
                    },
                );
                info!(agent = %agent_id, "observer attached");
            }
        }
        state
            .by_client
            .entry(client_id.to_string())
            .or_default()
            .insert(agent_id);
        drop(state);

        self.gateway
            .join_room(client_id, &agent_room(agent_id))
            .await;
        debug!(agent = %agent_id, client = client_id, "subscribed");
    }

    /// Remove one client from one agent.  The last client out detaches the
    /// observer from the runner.
    pub async fn unsubscribe_from_agent(&self, agent_id: AgentId, client_id: &str) {
        let mut state = self.state.lock().await;
        let mut detach: Option<(Arc<dyn AgentRunner>, Arc<dyn AgentObserver>)> = None;

        if let Some(mut entry) = state.by_agent.remove(&agent_id) {
            entry.clients.remove(client_id);
            if entry.clients.is_empty() {
                detach = Some((entry.runner, entry.observer));
            } else {
                state.by_agent.insert(agent_id, entry);
            }
        }
        if let Some(agents) = state.by_client.get_mut(client_id) {
            agents.remove(&agent_id);
            if agents.is_empty() {
                state.by_client.remove(client_id);
            }
        }
        drop(state);

        self.gateway
            .leave_room(client_id, &agent_room(agent_id))
            .await;
        if let Some((runner, observer)) = detach {
            runner.unsubscribe(agent_id, &observer).await;
            info!(agent = %agent_id, "observer detached (no subscribers left)");
        }
    }

    /// Mass detach on client disconnect.
    pub async fn unsubscribe_client(&self, client_id: &str) {
        let agents: Vec<AgentId> = {
            let state = self.state.lock().await;
            state
                .by_client
                .get(client_id)
                .map(|set| set.iter().copied().collect())
                .unwrap_or_default()
        };
        for agent_id in agents {
            self.unsubscribe_from_agent(agent_id, client_id).await;
        }
    }

    /// Tear down everything for one agent (terminate/delete path), draining
    /// its room in the gateway as well.
    pub async fn unsubscribe_all_for_agent(&self, agent_id: AgentId) {
        let entry = {
            let mut state = self.state.lock().await;
            let entry = state.by_agent.remove(&agent_id);
            if let Some(entry) = &entry {
                for client in &entry.clients {
                    if let Some(agents) = state.by_client.get_mut(client) {
                        agents.remove(&agent_id);
                        if agents.is_empty() {
                            state.by_client.remove(client);
                        }
                    }
                }
            }
            entry
        };
        if let Some(entry) = entry {
            entry.runner.unsubscribe(agent_id, &entry.observer).await;
            info!(agent = %agent_id, "all subscriptions removed");
        }
        self.gateway.cleanup_agent_rooms(agent_id).await;
    }

    /// Number of clients subscribed to the agent.
    pub async fn client_count(&self, agent_id: AgentId) -> usize {
        self.state
            .lock()
            .await
            .by_agent
            .get(&agent_id)
            .map(|e| e.clients.len())
            .unwrap_or(0)
    }

    /// Agents a client is subscribed to.
    pub async fn agents_for_client(&self, client_id: &str) -> Vec<AgentId> {
        self.state
            .lock()
            .await
            .by_client
            .get(client_id)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Both maps agree on the subscription relation (test invariant).
    #[cfg(test)]
    pub async fn is_consistent(&self) -> bool {
        let state = self.state.lock().await;
        for (agent_id, entry) in &state.by_agent {
            for client in &entry.clients {
                match state.by_client.get(client) {
                    Some(agents) if agents.contains(agent_id) => {}
                    _ => return false,
                }
            }
        }
        for (client, agents) in &state.by_client {
            for agent_id in agents {
                match state.by_agent.get(agent_id) {
                    Some(entry) if entry.clients.contains(client) => {}
                    _ => return false,
                }
            }
        }
        true
    }
}
