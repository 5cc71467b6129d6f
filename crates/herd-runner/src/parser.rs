// Copyright (c) 2024-2026 The herd project developers
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Stream parsers: one backend output line (or SSE `data:` payload) in, at
//! most one [`NewMessage`] out.
//!
//! `Ok(None)` means "framing-only event" — init banners, pings, stream
//! bookkeeping — and the caller drops it silently.  Parsers are tolerant by
//! design: backend CLIs add fields and event types between releases, and a
//! launch must not die because of an unrecognized frame.

use serde_json::{json, Value};
use tracing::debug;

use herd_model::{AgentId, MessageType, NewMessage, Result};

/// Maps raw backend lines into the common message shape.
pub trait StreamParser: Send + Sync {
    fn parse_line(&self, agent_id: AgentId, line: &str) -> Result<Option<NewMessage>>;
}

// ── Claude ────────────────────────────────────────────────────────────────────

/// Parser for the claude CLI's `--output-format stream-json` frames and the
/// python proxy's `event: message` payloads (same JSON shapes).
#[derive(Debug, Default, Clone, Copy)]
pub struct ClaudeStreamParser;

impl StreamParser for ClaudeStreamParser {
    fn parse_line(&self, agent_id: AgentId, line: &str) -> Result<Option<NewMessage>> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }
        let Ok(value) = serde_json::from_str::<Value>(line) else {
            // Non-JSON noise (deprecation warnings etc.) is not output.
            debug!(agent = %agent_id, "dropping non-JSON line: {line}");
            return Ok(None);
        };
        Ok(parse_claude_event(agent_id, &value))
    }
}

fn parse_claude_event(agent_id: AgentId, value: &Value) -> Option<NewMessage> {
    match value["type"].as_str().unwrap_or("") {
        "assistant" => Some(chat_message(agent_id, MessageType::Assistant, value)),
        "user" => Some(chat_message(agent_id, MessageType::User, value)),
        "result" => Some(result_message(agent_id, value)),
        "system" => match value["subtype"].as_str() {
            // The init banner only describes the session; it is framing.
            Some("init") => None,
            _ => Some(NewMessage {
                agent_id,
                message_type: MessageType::System,
                role: Some("system".into()),
                content: value
                    .get("message")
                    .cloned()
                    .unwrap_or_else(|| value.clone()),
                raw: Some(value.clone()),
                metadata: None,
            }),
        },
        // stream_event deltas, pings and future frame types are framing.
        _ => None,
    }
}

/// `assistant` / `user` frames wrap an API message with a content-block list.
fn chat_message(agent_id: AgentId, message_type: MessageType, value: &Value) -> NewMessage {
    let message = &value["message"];
    let content = &message["content"];

    // Pure-text turns collapse to a plain string; anything with tool blocks
    // keeps the structured block list.
    let flattened = flatten_text_blocks(content);
    let content = match flattened {
        Some(text) => Value::String(text),
        None => content.clone(),
    };

    let mut metadata = serde_json::Map::new();
    if let Some(model) = message["model"].as_str() {
        metadata.insert("model".into(), json!(model));
    }
    if let Some(session) = value["session_id"].as_str() {
        metadata.insert("sessionId".into(), json!(session));
    }

    NewMessage {
        agent_id,
        message_type,
        role: message["role"].as_str().map(str::to_string),
        content,
        raw: Some(value.clone()),
        metadata: if metadata.is_empty() {
            None
        } else {
            Some(Value::Object(metadata))
        },
    }
}

/// Join the text of a content-block list when every block is text.
fn flatten_text_blocks(content: &Value) -> Option<String> {
    match content {
        Value::String(s) => Some(s.clone()),
        Value::Array(blocks) => {
            let mut out = String::new();
            for block in blocks {
                match block["type"].as_str() {
                    Some("text") => out.push_str(block["text"].as_str().unwrap_or("")),
                    _ => return None,
                }
            }
            Some(out)
        }
        _ => None,
    }
}

/// The terminal `result` frame carries the run summary.
fn result_message(agent_id: AgentId, value: &Value) -> NewMessage {
    let content = value
        .get("result")
        .cloned()
        .unwrap_or_else(|| value.clone());
    let mut metadata = serde_json::Map::new();
    for key in ["duration_ms", "num_turns", "total_cost_usd", "is_error"] {
        if let Some(v) = value.get(key) {
            metadata.insert(key.into(), v.clone());
        }
    }
    NewMessage {
        agent_id,
        message_type: MessageType::Response,
        role: None,
        content,
        raw: Some(value.clone()),
        metadata: if metadata.is_empty() {
            None
        } else {
            Some(Value::Object(metadata))
        },
    }
}

// ── Gemini ────────────────────────────────────────────────────────────────────

/// Parser for gemini-cli output.  JSON frames follow the same
/// type-discriminated shape; bare text lines are assistant output.
#[derive(Debug, Default, Clone, Copy)]
pub struct GeminiStreamParser;

impl StreamParser for GeminiStreamParser {
    fn parse_line(&self, agent_id: AgentId, line: &str) -> Result<Option<NewMessage>> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }
        if let Ok(value) = serde_json::from_str::<Value>(line) {
            return Ok(parse_gemini_event(agent_id, &value));
        }
        // gemini-cli streams plain text when no JSON format is requested.
        Ok(Some(NewMessage {
            agent_id,
            message_type: MessageType::Assistant,
            role: Some("assistant".into()),
            content: Value::String(line.to_string()),
            raw: None,
            metadata: None,
        }))
    }
}

fn parse_gemini_event(agent_id: AgentId, value: &Value) -> Option<NewMessage> {
    match value["type"].as_str().unwrap_or("") {
        "message" | "assistant" => Some(NewMessage {
            agent_id,
            message_type: MessageType::Assistant,
            role: Some("assistant".into()),
            content: value
                .get("content")
                .or_else(|| value.get("text"))
                .cloned()
                .unwrap_or_else(|| value.clone()),
            raw: Some(value.clone()),
            metadata: None,
        }),
        "tool" | "tool_use" => Some(NewMessage {
            agent_id,
            message_type: MessageType::Tool,
            role: None,
            content: value.clone(),
            raw: Some(value.clone()),
            metadata: None,
        }),
        "error" => Some(NewMessage {
            agent_id,
            message_type: MessageType::Error,
            role: None,
            content: value
                .get("message")
                .cloned()
                .unwrap_or_else(|| value.clone()),
            raw: Some(value.clone()),
            metadata: None,
        }),
        // init / stats frames are framing.
        _ => None,
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn id() -> AgentId {
        AgentId::new()
    }

    // ── Claude ────────────────────────────────────────────────────────────────

    #[test]
    fn claude_init_banner_is_framing() {
        let line = r#"{"type":"system","subtype":"init","session_id":"s","tools":[]}"#;
        assert!(ClaudeStreamParser
            .parse_line(id(), line)
            .unwrap()
            .is_none());
    }

    #[test]
    fn claude_assistant_text_flattens() {
        let line = r#"{"type":"assistant","session_id":"s","message":{"role":"assistant","model":"claude-sonnet-4-5","content":[{"type":"text","text":"hello "},{"type":"text","text":"world"}]}}"#;
        let m = ClaudeStreamParser
            .parse_line(id(), line)
            .unwrap()
            .unwrap();
        assert_eq!(m.message_type, MessageType::Assistant);
        assert_eq!(m.role.as_deref(), Some("assistant"));
        assert_eq!(m.content, Value::String("hello world".into()));
        assert_eq!(m.metadata.as_ref().unwrap()["model"], "claude-sonnet-4-5");
        assert!(m.raw.is_some());
    }

    #[test]
    fn claude_tool_use_keeps_structured_blocks() {
        let line = r#"{"type":"assistant","message":{"role":"assistant","content":[{"type":"tool_use","id":"t1","name":"Bash","input":{"command":"ls"}}]}}"#;
        let m = ClaudeStreamParser
            .parse_line(id(), line)
            .unwrap()
            .unwrap();
        assert_eq!(m.content[0]["type"], "tool_use");
        assert_eq!(m.content[0]["name"], "Bash");
    }

    #[test]
    fn claude_result_becomes_response() {
        let line = r#"{"type":"result","subtype":"success","result":"done","duration_ms":1234,"num_turns":3}"#;
        let m = ClaudeStreamParser
            .parse_line(id(), line)
            .unwrap()
            .unwrap();
        assert_eq!(m.message_type, MessageType::Response);
        assert_eq!(m.content, Value::String("done".into()));
        assert_eq!(m.metadata.as_ref().unwrap()["duration_ms"], 1234);
    }

    #[test]
    fn claude_user_frame_maps_to_user() {
        let line = r#"{"type":"user","message":{"role":"user","content":[{"type":"tool_result","tool_use_id":"t1","content":"ok"}]}}"#;
        let m = ClaudeStreamParser
            .parse_line(id(), line)
            .unwrap()
            .unwrap();
        assert_eq!(m.message_type, MessageType::User);
        // tool_result blocks are not text; the block list is preserved.
        assert_eq!(m.content[0]["type"], "tool_result");
    }

    #[test]
    fn claude_unknown_frames_and_noise_are_dropped() {
        for line in [
            r#"{"type":"stream_event","event":{"type":"content_block_delta"}}"#,
            r#"{"type":"ping"}"#,
            "not json at all",
            "   ",
        ] {
            assert!(
                ClaudeStreamParser.parse_line(id(), line).unwrap().is_none(),
                "{line:?} should be dropped"
            );
        }
    }

    // ── Gemini ────────────────────────────────────────────────────────────────

    #[test]
    fn gemini_plain_text_is_assistant_output() {
        let m = GeminiStreamParser
            .parse_line(id(), "I will refactor the module.")
            .unwrap()
            .unwrap();
        assert_eq!(m.message_type, MessageType::Assistant);
        assert_eq!(
            m.content,
            Value::String("I will refactor the module.".into())
        );
    }

    #[test]
    fn gemini_json_message_frame() {
        let m = GeminiStreamParser
            .parse_line(id(), r#"{"type":"message","content":"hi"}"#)
            .unwrap()
            .unwrap();
        assert_eq!(m.message_type, MessageType::Assistant);
        assert_eq!(m.content, Value::String("hi".into()));
    }

    #[test]
    fn gemini_error_frame() {
        let m = GeminiStreamParser
            .parse_line(id(), r#"{"type":"error","message":"quota exceeded"}"#)
            .unwrap()
            .unwrap();
        assert_eq!(m.message_type, MessageType::Error);
        assert_eq!(m.content, Value::String("quota exceeded".into()));
    }

    #[test]
    fn gemini_init_frame_is_framing() {
        assert!(GeminiStreamParser
            .parse_line(id(), r#"{"type":"init","version":"1.0"}"#)
            .unwrap()
            .is_none());
    }
}
