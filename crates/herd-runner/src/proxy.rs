// Copyright (c) 2024-2026 The herd project developers
//
// SPDX-License-Identifier: Apache-2.0
//!
//! HTTP-SSE proxy runner.
//!
//! Opens `POST {base}/agent/stream` and consumes the response as
//! Server-Sent Events.  SSE lines can be split across TCP chunks, so the
//! decoder carries a remainder buffer forward and only complete lines are
//! interpreted.  The `X-Agent-Id` response header is remembered so `stop`
//! can hit `POST {base}/agent/stop/:id` later.

use std::collections::HashMap;
use std::sync::Arc;

use futures::StreamExt;
use serde_json::{json, Value};
use tokio::sync::{oneshot, Mutex};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use async_trait::async_trait;
use herd_model::{AgentError, AgentId, AgentSession, AgentStatus, Error, Result};

use crate::events::{RunResult, RunnerEvent};
use crate::observer::{AgentObserver, ObserverSet};
use crate::parser::StreamParser;
use crate::AgentRunner;

// ── SSE decoding ──────────────────────────────────────────────────────────────

/// One dispatched SSE event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SseFrame {
    pub event: String,
    pub data: String,
}

/// Incremental SSE decoder with a carry-forward line buffer.
#[derive(Default)]
pub(crate) struct SseDecoder {
    buf: String,
    event: Option<String>,
    data: Vec<String>,
}

impl SseDecoder {
    /// Feed one network chunk, returning every event completed by it.
    pub fn push(&mut self, chunk: &str) -> Vec<SseFrame> {
        self.buf.push_str(chunk);
        let mut frames = Vec::new();
        while let Some(pos) = self.buf.find('\n') {
            let line = self.buf[..pos].trim_end_matches('\r').to_string();
            self.buf.drain(..=pos);
            if line.is_empty() {
                // Blank line dispatches the accumulated event.
                if !self.data.is_empty() || self.event.is_some() {
                    frames.push(SseFrame {
                        event: self.event.take().unwrap_or_else(|| "message".to_string()),
                        data: self.data.join("\n"),
                    });
                    self.data.clear();
                }
            } else if let Some(value) = line.strip_prefix("event:") {
                self.event = Some(value.trim().to_string());
            } else if let Some(value) = line.strip_prefix("data:") {
                self.data.push(value.strip_prefix(' ').unwrap_or(value).to_string());
            }
            // Comment lines (":keepalive") and unknown fields are ignored.
        }
        frames
    }
}

// ── Runner ────────────────────────────────────────────────────────────────────

struct ProxyEntry {
    upstream_id: Option<String>,
    kill_tx: oneshot::Sender<()>,
}

/// Runner that delegates execution to an upstream HTTP proxy service.
pub struct ProxyRunner {
    base_url: String,
    client: reqwest::Client,
    parser: Arc<dyn StreamParser>,
    observers: Arc<ObserverSet>,
    entries: Arc<Mutex<HashMap<AgentId, ProxyEntry>>>,
}

impl ProxyRunner {
    pub fn new(base_url: impl Into<String>, parser: Arc<dyn StreamParser>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
            parser,
            observers: Arc::new(ObserverSet::new()),
            entries: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

/// The documented request body for `POST /agent/stream`.
fn stream_request_body(session: &AgentSession) -> Value {
    let config = &session.config;
    let mut body = json!({ "prompt": session.prompt });
    if let Some(session_id) = &config.session_id {
        body["session_id"] = json!(session_id);
    }
    if let Some(dir) = &config.working_directory {
        body["working_directory"] = json!(dir);
    }
    if let Some(model) = &config.model {
        body["model"] = json!(model);
    }
    if let Some(mcp) = &config.mcp {
        body["mcp_config"] = json!(mcp.to_proxy_string());
        body["mcp_strict"] = json!(mcp.strict);
    }
    body
}

#[async_trait]
impl AgentRunner for ProxyRunner {
    async fn start(&self, agent_id: AgentId, session: AgentSession) -> Result<()> {
        let url = format!("{}/agent/stream", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&stream_request_body(&session))
            .send()
            .await
            .map_err(|e| Error::Backend(format!("proxy request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(Error::Backend(format!("proxy returned {status}: {text}")));
        }

        let upstream_id = response
            .headers()
            .get("X-Agent-Id")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let (kill_tx, kill_rx) = oneshot::channel();
        self.entries.lock().await.insert(
            agent_id,
            ProxyEntry {
                upstream_id: upstream_id.clone(),
                kill_tx,
            },
        );

        info!(agent = %agent_id, upstream = ?upstream_id, "proxy stream opened");
        tokio::spawn(consume_stream(
            agent_id,
            response,
            self.parser.clone(),
            self.observers.clone(),
            self.entries.clone(),
            kill_rx,
        ));
        Ok(())
    }

    async fn stop(&self, agent_id: AgentId) -> Result<()> {
        let entry = self.entries.lock().await.remove(&agent_id);
        let Some(entry) = entry else {
            return Err(Error::NotFound(format!("agent {agent_id}")));
        };
        let _ = entry.kill_tx.send(());
        if let Some(upstream_id) = entry.upstream_id {
            let url = format!("{}/agent/stop/{upstream_id}", self.base_url);
            if let Err(e) = self.client.post(&url).send().await {
                // Best effort: the local stream is already torn down.
                warn!(agent = %agent_id, "proxy stop call failed: {e}");
            }
        }
        Ok(())
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

async fn consume_stream(
    agent_id: AgentId,
    response: reqwest::Response,
    parser: Arc<dyn StreamParser>,
    observers: Arc<ObserverSet>,
    entries: Arc<Mutex<HashMap<AgentId, ProxyEntry>>>,
    mut kill_rx: oneshot::Receiver<()>,
) {
    let started = Instant::now();
    let mut stream = response.bytes_stream();
    let mut decoder = SseDecoder::default();
    let mut message_count = 0u64;
    let mut completed = false;
    let mut stopped = false;

    'outer: loop {
        tokio::select! {
            _ = &mut kill_rx => {
                stopped = true;
                break;
            }
            chunk = stream.next() => match chunk {
                Some(Ok(bytes)) => {
                    let text = String::from_utf8_lossy(&bytes);
                    for frame in decoder.push(&text) {
                        if dispatch_frame(
                            agent_id,
                            &frame,
                            &parser,
                            &observers,
                            &mut message_count,
                            started,
                        )
                        .await
                        {
                            completed = true;
                            break 'outer;
                        }
                    }
                }
                Some(Err(e)) => {
                    warn!(agent = %agent_id, "proxy stream error: {e}");
                    observers
                        .notify(RunnerEvent::Error {
                            agent_id,
                            error: AgentError::new("BackendError", e.to_string()),
                        })
                        .await;
                    break;
                }
                None => break,
            }
        }
    }

    if !completed && !stopped {
        // Stream closed without a complete frame: the upstream died on us.
        let duration_ms = started.elapsed().as_millis() as u64;
        observers
            .notify(RunnerEvent::Complete {
                agent_id,
                result: RunResult::failed(duration_ms, message_count),
            })
            .await;
    }

    entries.lock().await.remove(&agent_id);
    observers.clear(agent_id).await;
}

/// Returns true when the frame was the terminal `complete`.
async fn dispatch_frame(
    agent_id: AgentId,
    frame: &SseFrame,
    parser: &Arc<dyn StreamParser>,
    observers: &Arc<ObserverSet>,
    message_count: &mut u64,
    started: Instant,
) -> bool {
    match frame.event.as_str() {
        "message" => {
            match parser.parse_line(agent_id, &frame.data) {
                Ok(Some(message)) => {
                    *message_count += 1;
                    observers.notify(RunnerEvent::Message(message)).await;
                }
                Ok(None) => debug!(agent = %agent_id, "framing-only proxy event dropped"),
                Err(e) => warn!(agent = %agent_id, "unparseable proxy message: {e}"),
            }
            false
        }
        "complete" => {
            let payload: Value = serde_json::from_str(&frame.data).unwrap_or(Value::Null);
            let success = payload["success"].as_bool().unwrap_or(false);
            let duration_ms = started.elapsed().as_millis() as u64;
            let mut result = if success {
                RunResult::success(duration_ms, *message_count)
            } else {
                RunResult::failed(duration_ms, *message_count)
            };
            if let Some(stats) = payload.get("stats") {
                result.stats = Some(stats.clone());
            }
            observers
                .notify(RunnerEvent::Complete { agent_id, result })
                .await;
            true
        }
        "error" => {
            let payload: Value = serde_json::from_str(&frame.data).unwrap_or(Value::Null);
            let message = payload["error"]
                .as_str()
                .unwrap_or("upstream error")
                .to_string();
            observers
                .notify(RunnerEvent::Error {
                    agent_id,
                    error: AgentError::new("BackendError", message),
                })
                .await;
            false
        }
        other => {
            debug!(agent = %agent_id, event = other, "unknown SSE event dropped");
            false
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::ClaudeStreamParser;
    use herd_model::{AgentConfig, McpConfig, McpServer};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    // ── SSE decoder ───────────────────────────────────────────────────────────

    #[test]
    fn decoder_handles_whole_events() {
        let mut d = SseDecoder::default();
        let frames = d.push("event: message\ndata: {\"a\":1}\n\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].event, "message");
        assert_eq!(frames[0].data, "{\"a\":1}");
    }

    #[test]
    fn decoder_carries_partial_lines_across_chunks() {
        let mut d = SseDecoder::default();
        assert!(d.push("event: com").is_empty());
        assert!(d.push("plete\ndata: {\"success\"").is_empty());
        let frames = d.push(": true}\n\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].event, "complete");
        assert_eq!(frames[0].data, "{\"success\": true}");
    }

    #[test]
    fn decoder_defaults_event_name_to_message() {
        let mut d = SseDecoder::default();
        let frames = d.push("data: x\n\n");
        assert_eq!(frames[0].event, "message");
    }

    #[test]
    fn decoder_joins_multi_line_data() {
        let mut d = SseDecoder::default();
        let frames = d.push("data: line1\ndata: line2\n\n");
        assert_eq!(frames[0].data, "line1\nline2");
    }

    #[test]
    fn decoder_ignores_comments_and_crlf() {
        let mut d = SseDecoder::default();
        let frames = d.push(":keepalive\r\nevent: error\r\ndata: {\"error\":\"x\"}\r\n\r\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].event, "error");
    }

    // ── Request body ──────────────────────────────────────────────────────────

    #[test]
    fn body_includes_only_present_fields() {
        let session = AgentSession::new("do it", AgentConfig::default());
        let body = stream_request_body(&session);
        assert_eq!(body["prompt"], "do it");
        assert!(body.get("model").is_none());
        assert!(body.get("mcp_config").is_none());
    }

    #[test]
    fn body_carries_mcp_as_a_json_string() {
        let mut mcp = McpConfig {
            strict: true,
            ..Default::default()
        };
        mcp.servers.insert(
            "files".into(),
            McpServer {
                command: "mcp-files".into(),
                ..Default::default()
            },
        );
        let config = AgentConfig {
            mcp: Some(mcp),
            session_id: Some("corr-1".into()),
            ..Default::default()
        };
        let body = stream_request_body(&AgentSession::new("x", config));
        assert_eq!(body["session_id"], "corr-1");
        assert_eq!(body["mcp_strict"], true);
        let mcp_str = body["mcp_config"].as_str().unwrap();
        assert!(mcp_str.contains("mcpServers"));
    }

    // ── End-to-end against a raw TCP fixture ──────────────────────────────────

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

    /// Serve one canned SSE response on an ephemeral port.
    async fn sse_fixture(body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            // Drain the request head; the fixture does not validate it.
            let mut buf = [0u8; 4096];
            let _ = socket.read(&mut buf).await;
            let response = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: text/event-stream\r\n\
                 X-Agent-Id: upstream-42\r\nConnection: close\r\n\r\n{body}"
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn proxy_stream_maps_events_to_observers() {
        let base = sse_fixture(
            "event: message\n\
             data: {\"type\":\"assistant\",\"message\":{\"role\":\"assistant\",\"content\":[{\"type\":\"text\",\"text\":\"hi\"}]}}\n\n\
             event: complete\n\
             data: {\"success\": true}\n\n",
        )
        .await;
        let runner = ProxyRunner::new(base, Arc::new(ClaudeStreamParser));
        let agent_id = AgentId::new();
        let recorder = Arc::new(Recorder::default());
        runner.subscribe(agent_id, recorder.clone()).await;

        runner
            .start(agent_id, AgentSession::new("go", AgentConfig::default()))
            .await
            .unwrap();

        for _ in 0..100 {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            let events = recorder.events.lock().await;
            if events
                .iter()
                .any(|e| matches!(e, RunnerEvent::Complete { .. }))
            {
                assert!(matches!(&events[0], RunnerEvent::Message(m)
                    if m.content == Value::String("hi".into())));
                match events.last().unwrap() {
                    RunnerEvent::Complete { result, .. } => {
                        assert_eq!(result.status, crate::RunStatus::Success);
                        assert_eq!(result.message_count, 1);
                    }
                    _ => unreachable!(),
                }
                return;
            }
        }
        panic!("proxy stream never completed");
    }

    #[tokio::test]
    async fn proxy_error_event_reaches_observers() {
        let base = sse_fixture(
            "event: error\n\
             data: {\"error\": \"upstream exploded\"}\n\n",
        )
        .await;
        let runner = ProxyRunner::new(base, Arc::new(ClaudeStreamParser));
        let agent_id = AgentId::new();
        let recorder = Arc::new(Recorder::default());
        runner.subscribe(agent_id, recorder.clone()).await;

        runner
            .start(agent_id, AgentSession::new("go", AgentConfig::default()))
            .await
            .unwrap();

        for _ in 0..100 {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            let events = recorder.events.lock().await;
            let got_error = events.iter().any(|e| matches!(e, RunnerEvent::Error { error, .. }
                if error.message == "upstream exploded"));
            // The closed stream without a complete frame counts as a failure.
            let got_complete = events.iter().any(|e| matches!(e, RunnerEvent::Complete { result, .. }
                if result.status == crate::RunStatus::Failed));
            if got_error && got_complete {
                return;
            }
        }
        panic!("error event never arrived");
    }

    #[tokio::test]
    async fn refused_connection_is_a_backend_error() {
        // Port 1 is essentially never listening.
        let runner = ProxyRunner::new("http://127.0.0.1:1", Arc::new(ClaudeStreamParser));
        let err = runner
            .start(
                AgentId::new(),
                AgentSession::new("go", AgentConfig::default()),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Backend(_)));
    }
}
