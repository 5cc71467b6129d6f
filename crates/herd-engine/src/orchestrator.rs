// Copyright (c) 2024-2026 The herd project developers
//
// SPDX-License-Identifier: Apache-2.0
//!
//! The orchestration coordinator: composes repository, runners, instruction
//! handler, queue, registry and broadcaster into the launch and terminate
//! use cases.
//!
//! # Launch sequence (executed by the queue worker, one at a time)
//!
//! 1. Back up / substitute the instruction files.
//! 2. Construct the agent (INITIALIZING) with a coordinator-minted id.
//! 3. Persist it **before** the runner starts — the message FK races the
//!    first emitted event otherwise.
//! 4. Register the system observer via the registry, so output is persisted
//!    from the very first event even with zero clients connected.
//! 5. Start the runner with the minted id.
//! 6. Mark RUNNING, persist again, record `agent id → runner`.
//! 7. Restore the instruction files (the CLI read them at startup) —
//!    also on every failure path.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use async_trait::async_trait;
use herd_model::{
    Agent, AgentId, AgentStatus, Error, LaunchRequest, RequestId, Result,
};
use herd_runner::{AgentRunner, RunnerFactory};
use herd_store::AgentRepository;

use crate::instructions::InstructionHandler;
use crate::queue::{LaunchExecutor, LaunchQueue};
use crate::registry::SubscriptionRegistry;

/// Client id under which the engine's own observer joins each agent's room.
/// It keeps the broadcaster attached for the life of the runner entry, not
/// just while browsers are connected.
pub const SYSTEM_CLIENT_ID: &str = "system-orchestrator";

/// Everything the queue worker needs to run one launch.  Shared with the
/// public facade; nothing here refers back to the orchestrator.
struct LaunchContext {
    repo: Arc<dyn AgentRepository>,
    factory: Arc<dyn RunnerFactory>,
    instructions: InstructionHandler,
    registry: Arc<SubscriptionRegistry>,
    runners: Mutex<HashMap<AgentId, Arc<dyn AgentRunner>>>,
}

impl LaunchContext {
    async fn launch_inner(&self, request: &LaunchRequest) -> Result<Agent> {
        let mut agent = Agent::new(
            AgentId::new(),
            request.agent_type,
            request.prompt.clone(),
            request.config.clone(),
        );
        // Persist before start: the FK from messages to agents must already
        // hold when the first event fires.
        self.repo.save(&agent).await?;

        let runner = self.factory.runner_for(request.agent_type)?;
        // The system observer attaches before start for the same reason —
        // a backend that emits immediately must not race the broadcaster.
        self.registry
            .subscribe(agent.id, SYSTEM_CLIENT_ID, runner.clone())
            .await;

        if let Err(e) = runner.start(agent.id, request.session()).await {
            self.registry.unsubscribe_all_for_agent(agent.id).await;
            return Err(e);
        }

        agent.mark_running()?;
        self.repo.save(&agent).await?;
        self.runners.lock().await.insert(agent.id, runner);

        info!(agent = %agent.id, backend = %agent.agent_type, "agent launched");
        Ok(agent)
    }
}

#[async_trait]
impl LaunchExecutor for LaunchContext {
    async fn execute(&self, request: LaunchRequest) -> Result<Agent> {
        let backup = self
            .instructions
            .prepare_environment(request.config.instructions.as_deref())
            .await?;

        let result = self.launch_inner(&request).await;

        // Restore on success and failure alike; a lost restore would leak
        // the injected instructions into the next launch's backup.
        if let Err(e) = self.instructions.restore_environment(backup).await {
            error!(request = %request.id, "instruction restore failed: {e}");
        }
        result
    }
}

/// Public coordinator facade.
pub struct Orchestrator {
    ctx: Arc<LaunchContext>,
    queue: LaunchQueue,
    registry: Arc<SubscriptionRegistry>,
}

impl Orchestrator {
    pub fn new(
        repo: Arc<dyn AgentRepository>,
        factory: Arc<dyn RunnerFactory>,
        instructions: InstructionHandler,
        registry: Arc<SubscriptionRegistry>,
    ) -> Arc<Self> {
        let ctx = Arc::new(LaunchContext {
            repo,
            factory,
            instructions,
            registry: registry.clone(),
            runners: Mutex::new(HashMap::new()),
        });
        let queue = LaunchQueue::new(ctx.clone());
        Arc::new(Self {
            ctx,
            queue,
            registry,
        })
    }

    /// Enqueue a launch; resolves once the serialized launch has run.
    pub async fn launch(&self, request: LaunchRequest) -> Result<Agent> {
        self.queue.enqueue(request).await
    }

    /// Stop the backend (best effort), tear down subscriptions and rooms,
    /// and mark the agent TERMINATED.  Authoritative even when the backend
    /// is already dead.
    pub async fn terminate(&self, agent_id: AgentId) -> Result<Agent> {
        let mut agent = self
            .ctx
            .repo
            .find_by_id(agent_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("agent {agent_id}")))?;

        if let Some(runner) = self.ctx.runners.lock().await.remove(&agent_id) {
            match runner.stop(agent_id).await {
                Ok(()) => {}
                // Already dead backends are fine; termination is about the
                // stored state.
                Err(Error::NotFound(_)) => debug!(agent = %agent_id, "backend already gone"),
                Err(e) => warn!(agent = %agent_id, "backend stop failed: {e}"),
            }
        }
        self.registry.unsubscribe_all_for_agent(agent_id).await;

        agent.mark_terminated().map_err(|e| match e {
            Error::IllegalTransition { from, .. } => Error::Conflict(format!(
                "agent {agent_id} cannot be terminated from status {from}"
            )),
            other => other,
        })?;
        self.ctx.repo.save(&agent).await?;
        info!(agent = %agent_id, "agent terminated");
        Ok(agent)
    }

    /// Delete the agent row (messages cascade).  Active agents require
    /// `force`, which terminates them first.
    pub async fn delete(&self, agent_id: AgentId, force: bool) -> Result<()> {
        let agent = self
            .ctx
            .repo
            .find_by_id(agent_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("agent {agent_id}")))?;

        if agent.is_active() {
            if !force {
                return Err(Error::Conflict(format!(
                    "agent {agent_id} is {}; pass force=true to delete it",
                    agent.status
                )));
            }
            if let Err(e) = self.terminate(agent_id).await {
                warn!(agent = %agent_id, "terminate during forced delete failed: {e}");
            }
        } else {
            self.registry.unsubscribe_all_for_agent(agent_id).await;
        }

        self.ctx.repo.delete(agent_id).await?;
        info!(agent = %agent_id, "agent deleted");
        Ok(())
    }

    /// Register a runner for an agent created outside the launch path
    /// (synthetic agents with pre-registered schedules).  Wires the system
    /// observer exactly like a launch does.
    pub async fn register_runner(&self, agent_id: AgentId, runner: Arc<dyn AgentRunner>) {
        self.ctx.runners.lock().await.insert(agent_id, runner.clone());
        self.registry
            .subscribe(agent_id, SYSTEM_CLIENT_ID, runner)
            .await;
    }

    /// The runner driving an agent, for re-subscription.
    pub async fn runner_for_agent(&self, agent_id: AgentId) -> Option<Arc<dyn AgentRunner>> {
        self.ctx.runners.lock().await.get(&agent_id).cloned()
    }

    pub async fn get_agent(&self, agent_id: AgentId) -> Result<Agent> {
        self.ctx
            .repo
            .find_by_id(agent_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("agent {agent_id}")))
    }

    pub async fn get_status(&self, agent_id: AgentId) -> Result<AgentStatus> {
        Ok(self.get_agent(agent_id).await?.status)
    }

    pub async fn list_all(&self) -> Result<Vec<Agent>> {
        self.ctx.repo.find_all().await
    }

    pub async fn list_active(&self) -> Result<Vec<Agent>> {
        Ok(self
            .ctx
            .repo
            .find_all()
            .await?
            .into_iter()
            .filter(Agent::is_active)
            .collect())
    }

    pub fn queue_length(&self) -> usize {
        self.queue.queue_length()
    }

    pub async fn cancel_launch(&self, request_id: RequestId) -> Result<bool> {
        self.queue.cancel(request_id).await
    }

    /// Terminate every active agent.  Failures are logged; shutdown always
    /// proceeds.
    pub async fn shutdown(&self) {
        let active = match self.list_active().await {
            Ok(agents) => agents,
            Err(e) => {
                error!("could not enumerate active agents at shutdown: {e}");
                return;
            }
        };
        for agent in active {
            if let Err(e) = self.terminate(agent.id).await {
                error!(agent = %agent.id, "terminate at shutdown failed: {e}");
            }
        }
    }
}
