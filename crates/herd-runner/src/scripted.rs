// Copyright (c) 2024-2026 The herd project developers
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Scripted runner: replays a pre-registered event schedule on the tokio
//! clock.  The deterministic backend behind `AgentType::Synthetic` and the
//! engine's scenario tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{oneshot, Mutex};
use tokio::time::Instant;
use tracing::info;

use async_trait::async_trait;
use herd_model::{
    AgentError, AgentId, AgentSession, AgentStatus, Error, MessageType, NewMessage, Result,
};

use crate::events::{RunResult, RunnerEvent};
use crate::observer::{AgentObserver, ObserverSet};
use crate::AgentRunner;

/// What a scripted agent does at one schedule offset.
#[derive(Debug, Clone)]
pub enum ScriptedAction {
    Message {
        message_type: MessageType,
        content: Value,
    },
    Error {
        name: String,
        message: String,
    },
    Complete {
        success: bool,
        stats: Option<Value>,
    },
}

#[derive(Debug, Clone)]
pub struct ScriptedEvent {
    pub delay_ms: u64,
    pub action: ScriptedAction,
}

impl ScriptedEvent {
    pub fn message_at(delay_ms: u64, content: impl Into<String>) -> Self {
        Self {
            delay_ms,
            action: ScriptedAction::Message {
                message_type: MessageType::Assistant,
                content: Value::String(content.into()),
            },
        }
    }

    pub fn complete_at(delay_ms: u64, success: bool) -> Self {
        Self {
            delay_ms,
            action: ScriptedAction::Complete {
                success,
                stats: None,
            },
        }
    }

    pub fn error_at(delay_ms: u64, name: &str, message: &str) -> Self {
        Self {
            delay_ms,
            action: ScriptedAction::Error {
                name: name.into(),
                message: message.into(),
            },
        }
    }
}

struct Entry {
    kill_tx: oneshot::Sender<()>,
}

/// Deterministic runner for synthetic agents.
#[derive(Default)]
pub struct ScriptedRunner {
    scripts: Mutex<HashMap<AgentId, Vec<ScriptedEvent>>>,
    /// Scripts for agents whose ids are minted at launch time, consumed in
    /// registration order by the next `start` without a per-id script.
    next_scripts: Mutex<VecDeque<Vec<ScriptedEvent>>>,
    observers: Arc<ObserverSet>,
    entries: Arc<Mutex<HashMap<AgentId, Entry>>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the schedule the agent will replay when started.
    /// An agent without a script just ends without events.
    pub async fn register_script(&self, agent_id: AgentId, mut script: Vec<ScriptedEvent>) {
        script.sort_by_key(|e| e.delay_ms);
        self.scripts.lock().await.insert(agent_id, script);
    }

    /// Register a schedule for the next launched agent, whatever id the
    /// coordinator mints for it.
    pub async fn register_next_script(&self, mut script: Vec<ScriptedEvent>) {
        script.sort_by_key(|e| e.delay_ms);
        self.next_scripts.lock().await.push_back(script);
    }
}

#[async_trait]
impl AgentRunner for ScriptedRunner {
    async fn start(&self, agent_id: AgentId, _session: AgentSession) -> Result<()> {
        let script = match self.scripts.lock().await.get(&agent_id).cloned() {
            Some(script) => script,
            None => self
                .next_scripts
                .lock()
                .await
                .pop_front()
                .unwrap_or_default(),
        };

        let (kill_tx, mut kill_rx) = oneshot::channel();
        self.entries
            .lock()
            .await
            .insert(agent_id, Entry { kill_tx });

        let observers = self.observers.clone();
        let entries = self.entries.clone();
        tokio::spawn(async move {
            let started = Instant::now();
            let mut message_count = 0u64;
            let mut completed = false;

            'script: for event in script {
                let at = started + Duration::from_millis(event.delay_ms);
                tokio::select! {
                    _ = &mut kill_rx => break 'script,
                    _ = tokio::time::sleep_until(at) => {}
                }
                match event.action {
                    ScriptedAction::Message {
                        message_type,
                        content,
                    } => {
                        message_count += 1;
                        observers
                            .notify(RunnerEvent::Message(NewMessage {
                                agent_id,
                                message_type,
                                role: Some("assistant".into()),
                                content,
                                raw: None,
                                metadata: None,
                            }))
                            .await;
                    }
                    ScriptedAction::Error { name, message } => {
                        observers
                            .notify(RunnerEvent::Error {
                                agent_id,
                                error: AgentError::new(name, message),
                            })
                            .await;
                    }
                    ScriptedAction::Complete { success, stats } => {
                        let duration_ms = started.elapsed().as_millis() as u64;
                        let mut result = if success {
                            RunResult::success(duration_ms, message_count)
                        } else {
                            RunResult::failed(duration_ms, message_count)
                        };
                        result.stats = stats;
                        observers
                            .notify(RunnerEvent::Complete { agent_id, result })
                            .await;
                        completed = true;
                        break 'script;
                    }
                }
            }

            if !completed {
                // A script without a Complete (or a killed one) just ends;
                // the terminate path owns the final status.
                info!(agent = %agent_id, "scripted run ended without complete");
            }
            entries.lock().await.remove(&agent_id);
            observers.clear(agent_id).await;
        });
        Ok(())
    }

    async fn stop(&self, agent_id: AgentId) -> Result<()> {
        let entry = self.entries.lock().await.remove(&agent_id);
        match entry {
            Some(entry) => {
                let _ = entry.kill_tx.send(());
                Ok(())
            }
            None => Err(Error::NotFound(format!("agent {agent_id}"))),
        }
    }

    async fn status(&self, agent_id: AgentId) -> Result<AgentStatus> {
        if self.entries.lock().await.contains_key(&agent_id) {
            Ok(AgentStatus::Running)
        } else {
            Err(Error::NotFound(format!("agent {agent_id}")))
        }
    }

    async fn subscribe(&self, agent_id: AgentId, observer: Arc<dyn AgentObserver>) {
        self.observers.subscribe(agent_id, observer).await;
    }

    async fn unsubscribe(&self, agent_id: AgentId, observer: &Arc<dyn AgentObserver>) {
        self.observers.unsubscribe(agent_id, observer).await;
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use herd_model::AgentConfig;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<RunnerEvent>>,
    }

    #[async_trait]
    impl AgentObserver for Recorder {
        async fn on_event(&self, event: RunnerEvent) -> Result<()> {
            self.events.lock().await.push(event);
            Ok(())
        }
    }

    fn session() -> AgentSession {
        AgentSession::new("scripted", AgentConfig::default())
    }

    #[tokio::test]
    async fn schedule_fires_in_order_and_completes() {
        let runner = ScriptedRunner::new();
        let agent_id = AgentId::new();
        runner
            .register_script(
                agent_id,
                vec![
                    ScriptedEvent::message_at(0, "one"),
                    ScriptedEvent::message_at(10, "two"),
                    ScriptedEvent::complete_at(20, true),
                ],
            )
            .await;

        let recorder = Arc::new(Recorder::default());
        runner.subscribe(agent_id, recorder.clone()).await;
        runner.start(agent_id, session()).await.unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        let events = recorder.events.lock().await;
        assert_eq!(events.len(), 3);
        assert!(matches!(&events[0], RunnerEvent::Message(m)
            if m.content == Value::String("one".into())));
        assert!(matches!(&events[1], RunnerEvent::Message(m)
            if m.content == Value::String("two".into())));
        match &events[2] {
            RunnerEvent::Complete { result, .. } => {
                assert_eq!(result.status, crate::RunStatus::Success);
                assert_eq!(result.message_count, 2);
            }
            other => panic!("expected Complete, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unscripted_agent_completes_immediately() {
        let runner = ScriptedRunner::new();
        let agent_id = AgentId::new();
        let recorder = Arc::new(Recorder::default());
        runner.subscribe(agent_id, recorder.clone()).await;
        runner.start(agent_id, session()).await.unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        // No Complete — the schedule was empty, the run just ends.
        assert!(runner.status(agent_id).await.is_err());
        assert!(recorder.events.lock().await.is_empty());
    }

    #[tokio::test]
    async fn stop_halts_the_schedule() {
        let runner = ScriptedRunner::new();
        let agent_id = AgentId::new();
        runner
            .register_script(
                agent_id,
                vec![
                    ScriptedEvent::message_at(5, "early"),
                    ScriptedEvent::message_at(5_000, "never"),
                    ScriptedEvent::complete_at(6_000, true),
                ],
            )
            .await;
        let recorder = Arc::new(Recorder::default());
        runner.subscribe(agent_id, recorder.clone()).await;
        runner.start(agent_id, session()).await.unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;
        runner.stop(agent_id).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;

        let events = recorder.events.lock().await;
        assert_eq!(events.len(), 1, "only the early message fires");
    }

    #[tokio::test]
    async fn next_script_binds_to_whatever_id_starts() {
        let runner = ScriptedRunner::new();
        runner
            .register_next_script(vec![
                ScriptedEvent::message_at(0, "minted"),
                ScriptedEvent::complete_at(5, true),
            ])
            .await;

        let agent_id = AgentId::new();
        let recorder = Arc::new(Recorder::default());
        runner.subscribe(agent_id, recorder.clone()).await;
        runner.start(agent_id, session()).await.unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        let events = recorder.events.lock().await;
        assert!(matches!(&events[0], RunnerEvent::Message(m) if m.agent_id == agent_id));
        assert!(matches!(&events[1], RunnerEvent::Complete { .. }));
    }

    #[tokio::test]
    async fn error_events_are_delivered() {
        let runner = ScriptedRunner::new();
        let agent_id = AgentId::new();
        runner
            .register_script(
                agent_id,
                vec![
                    ScriptedEvent::error_at(0, "BackendError", "synthetic failure"),
                    ScriptedEvent::complete_at(10, false),
                ],
            )
            .await;
        let recorder = Arc::new(Recorder::default());
        runner.subscribe(agent_id, recorder.clone()).await;
        runner.start(agent_id, session()).await.unwrap();

        tokio::time::sleep(Duration::from_millis(60)).await;
        let events = recorder.events.lock().await;
        assert!(matches!(&events[0], RunnerEvent::Error { error, .. }
            if error.name == "BackendError"));
        assert!(matches!(&events[1], RunnerEvent::Complete { result, .. }
            if result.status == crate::RunStatus::Failed));
    }
}
