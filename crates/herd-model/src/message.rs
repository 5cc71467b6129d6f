// Copyright (c) 2024-2026 The herd project developers
//
// SPDX-License-Identifier: MIT
//!
//! Append-only agent output messages.
//!
//! Content is stored as TEXT.  On the way in, structured content is
//! canonicalized to its JSON string form; on the way out the store attempts
//! to parse it back, falling back to the raw string.  That round-trip is part
//! of the external API contract, so both directions live here next to the
//! types rather than in the storage backends.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::types::AgentId;

/// Classification of one emitted message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Assistant,
    User,
    System,
    Error,
    Tool,
    Response,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Assistant => "assistant",
            Self::User => "user",
            Self::System => "system",
            Self::Error => "error",
            Self::Tool => "tool",
            Self::Response => "response",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "assistant" => Some(Self::Assistant),
            "user" => Some(Self::User),
            "system" => Some(Self::System),
            "error" => Some(Self::Error),
            "tool" => Some(Self::Tool),
            "response" => Some(Self::Response),
            _ => None,
        }
    }
}

/// A persisted message with its assigned per-agent sequence number.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentMessage {
    pub id: Uuid,
    pub agent_id: AgentId,
    /// Strictly positive, dense from 1 per agent.
    pub sequence_number: u64,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// Parsed JSON when the stored text is valid JSON, raw string otherwise.
    pub content: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    pub created_at: DateTime<Utc>,
}

/// Append DTO — everything the caller provides; id, sequence and timestamp
/// are assigned by the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMessage {
    pub agent_id: AgentId,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// String or any JSON-serializable value.
    pub content: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl NewMessage {
    pub fn text(agent_id: AgentId, message_type: MessageType, content: impl Into<String>) -> Self {
        Self {
            agent_id,
            message_type,
            role: None,
            content: Value::String(content.into()),
            raw: None,
            metadata: None,
        }
    }

    /// Canonical TEXT form for storage: strings verbatim, everything else as
    /// compact JSON.
    pub fn content_text(&self) -> String {
        content_to_text(&self.content)
    }
}

/// Storage canonicalization for content values.
pub fn content_to_text(content: &Value) -> String {
    match content {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Read-side round-trip: structured JSON when parseable, raw string if not.
pub fn content_from_text(text: &str) -> Value {
    serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
}

/// Metadata parses as structured JSON or not at all.
pub fn metadata_from_text(text: Option<&str>) -> Option<Value> {
    text.and_then(|t| serde_json::from_str(t).ok())
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn string_content_stored_verbatim() {
        let m = NewMessage::text(AgentId::new(), MessageType::Assistant, "plain text");
        assert_eq!(m.content_text(), "plain text");
    }

    #[test]
    fn object_content_canonicalized_to_json() {
        let m = NewMessage {
            content: json!({"a": 1, "b": [true]}),
            ..NewMessage::text(AgentId::new(), MessageType::Tool, "")
        };
        let text = m.content_text();
        let back: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(back["a"], 1);
        assert_eq!(back["b"][0], true);
    }

    #[test]
    fn json_text_round_trips_to_structure() {
        let v = content_from_text(r#"{"kind":"tool_use","name":"Bash"}"#);
        assert_eq!(v["kind"], "tool_use");
    }

    #[test]
    fn non_json_text_stays_a_string() {
        let v = content_from_text("just words { not json");
        assert_eq!(v, Value::String("just words { not json".into()));
    }

    #[test]
    fn broken_metadata_becomes_none() {
        assert!(metadata_from_text(Some("{oops")).is_none());
        assert!(metadata_from_text(None).is_none());
        assert_eq!(
            metadata_from_text(Some(r#"{"k":"v"}"#)).unwrap()["k"],
            "v"
        );
    }

    #[test]
    fn message_type_wire_form_is_type() {
        let m = NewMessage::text(AgentId::new(), MessageType::Assistant, "x");
        let json = serde_json::to_value(&m).unwrap();
        assert_eq!(json["type"], "assistant");
    }
}
