// Copyright (c) 2024-2026 The herd project developers
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Subprocess-spawning runner: one backend CLI child per agent.
//!
//! stdout is read line by line and fed through the configured parser;
//! stderr is drained into the log.  When the child exits the runner emits
//! `Complete` and tears its entry down.  `stop` signals the drive task,
//! which kills the child and exits without a `Complete` — the terminate
//! path owns the final status in that case.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{oneshot, Mutex};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use async_trait::async_trait;
use herd_model::{AgentError, AgentId, AgentSession, AgentStatus, AgentType, Error, Result};

use crate::command::build_command;
use crate::events::{RunResult, RunnerEvent};
use crate::observer::{AgentObserver, ObserverSet};
use crate::parser::StreamParser;
use crate::AgentRunner;

struct Entry {
    kill_tx: oneshot::Sender<()>,
}

/// Runner that drives an external CLI process per agent.
pub struct SubprocessRunner {
    agent_type: AgentType,
    parser: Arc<dyn StreamParser>,
    observers: Arc<ObserverSet>,
    entries: Arc<Mutex<HashMap<AgentId, Entry>>>,
}

impl SubprocessRunner {
    pub fn new(agent_type: AgentType, parser: Arc<dyn StreamParser>) -> Self {
        Self {
            agent_type,
            parser,
            observers: Arc::new(ObserverSet::new()),
            entries: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Spawn `cmd` and wire its stdout into the event pipeline.
    /// Split out from [`AgentRunner::start`] so tests can drive the loop
    /// with an ordinary shell instead of an installed backend CLI.
    async fn start_child(
        &self,
        agent_id: AgentId,
        mut cmd: Command,
        timeout_ms: Option<u64>,
    ) -> Result<()> {
        let mut child = cmd
            .spawn()
            .map_err(|e| Error::Backend(format!("spawn {}: {e}", self.agent_type)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Backend("child stdout was not piped".into()))?;
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(drain_stderr(agent_id, stderr));
        }

        let (kill_tx, kill_rx) = oneshot::channel();
        self.entries
            .lock()
            .await
            .insert(agent_id, Entry { kill_tx });

        info!(agent = %agent_id, backend = %self.agent_type, "backend process started");
        tokio::spawn(drive(
            agent_id,
            child,
            stdout,
            self.parser.clone(),
            self.observers.clone(),
            self.entries.clone(),
            kill_rx,
            timeout_ms,
        ));
        Ok(())
    }
}

async fn drain_stderr(agent_id: AgentId, stderr: tokio::process::ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        debug!(agent = %agent_id, "backend stderr: {line}");
    }
}

#[allow(clippy::too_many_arguments)]
async fn drive(
    agent_id: AgentId,
    mut child: Child,
    stdout: tokio::process::ChildStdout,
    parser: Arc<dyn StreamParser>,
    observers: Arc<ObserverSet>,
    entries: Arc<Mutex<HashMap<AgentId, Entry>>>,
    mut kill_rx: oneshot::Receiver<()>,
    timeout_ms: Option<u64>,
) {
    let started = Instant::now();
    let mut lines = BufReader::new(stdout).lines();
    let mut message_count = 0u64;
    let mut stopped = false;
    let mut timed_out = false;

    let deadline = timeout_ms.map(|ms| started + Duration::from_millis(ms));
    let timeout_fut = async {
        match deadline {
            Some(d) => tokio::time::sleep_until(d).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(timeout_fut);

    loop {
        tokio::select! {
            // stop() fired, or the runner entry was dropped: kill and bail.
            _ = &mut kill_rx => {
                stopped = true;
                let _ = child.start_kill();
                break;
            }
            _ = &mut timeout_fut => {
                timed_out = true;
                let _ = child.start_kill();
                break;
            }
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    match parser.parse_line(agent_id, &line) {
                        Ok(Some(message)) => {
                            message_count += 1;
                            observers.notify(RunnerEvent::Message(message)).await;
                        }
                        Ok(None) => {}
                        Err(e) => warn!(agent = %agent_id, "unparseable output line: {e}"),
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!(agent = %agent_id, "stdout read error: {e}");
                    break;
                }
            }
        }
    }

    let exit = child.wait().await;
    let duration_ms = started.elapsed().as_millis() as u64;

    if stopped {
        info!(agent = %agent_id, "backend process stopped on request");
    } else if timed_out {
        warn!(agent = %agent_id, timeout_ms, "backend timed out");
        observers
            .notify(RunnerEvent::Error {
                agent_id,
                error: AgentError::new(
                    "TimeoutError",
                    format!("backend exceeded {}ms", timeout_ms.unwrap_or(0)),
                ),
            })
            .await;
        observers
            .notify(RunnerEvent::Complete {
                agent_id,
                result: RunResult::failed(duration_ms, message_count),
            })
            .await;
    } else {
        let success = exit.as_ref().map(|s| s.success()).unwrap_or(false);
        if let Ok(status) = &exit {
            info!(agent = %agent_id, %status, message_count, "backend process exited");
        }
        let result = if success {
            RunResult::success(duration_ms, message_count)
        } else {
            RunResult::failed(duration_ms, message_count)
        };
        observers
            .notify(RunnerEvent::Complete { agent_id, result })
            .await;
    }

    entries.lock().await.remove(&agent_id);
    observers.clear(agent_id).await;
}

#[async_trait]
impl AgentRunner for SubprocessRunner {
    async fn start(&self, agent_id: AgentId, session: AgentSession) -> Result<()> {
        let cmd = build_command(self.agent_type, &session)?;
        self.start_child(agent_id, cmd, session.config.timeout).await
    }

    async fn stop(&self, agent_id: AgentId) -> Result<()> {
        let entry = self.entries.lock().await.remove(&agent_id);
        match entry {
            Some(entry) => {
                // The drive task also treats a dropped sender as a kill, so
                // a lost send here still stops the child.
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
