// Copyright (c) 2024-2026 The herd project developers
//
// SPDX-License-Identifier: MIT
//!
//! MCP server configuration forwarded to backend CLIs.
//!
//! The proxy wire format is the upstream CLIs' own config shape:
//!
//! ```json
//! {"mcpServers": {"<name>": {"command": "...", "args": [...], "env": {...},
//!                            "transport": "http"}},
//!  "strict": true}
//! ```
//!
//! `transport` is omitted for stdio servers — that is the upstream default
//! and older CLI versions reject the key.  `strict` is likewise omitted when
//! false, so the common case stays byte-identical to the upstream shape
//! while the full configuration still round-trips.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum McpTransport {
    #[default]
    Stdio,
    Http,
    Sse,
}

/// One configured MCP server.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct McpServer {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub transport: McpTransport,
}

/// The full per-launch MCP configuration.
///
/// A `BTreeMap` keyed by server name: duplicates cannot exist and the proxy
/// JSON is deterministic.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct McpConfig {
    #[serde(default)]
    pub servers: BTreeMap<String, McpServer>,
    /// Forwarded to the upstream CLI as `mcp_strict`.
    #[serde(default)]
    pub strict: bool,
}

fn valid_server_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

impl McpConfig {
    pub fn validate(&self) -> Result<()> {
        for (name, server) in &self.servers {
            if !valid_server_name(name) {
                return Err(Error::Validation(format!(
                    "invalid MCP server name {name:?} (allowed: [A-Za-z0-9_-]+)"
                )));
            }
            if server.command.trim().is_empty() {
                return Err(Error::Validation(format!(
                    "MCP server {name:?} has an empty command"
                )));
            }
        }
        Ok(())
    }

    /// Serialize to the documented proxy format.
    pub fn to_proxy_json(&self) -> Value {
        let mut servers = serde_json::Map::new();
        for (name, server) in &self.servers {
            let mut entry = json!({
                "command": server.command,
                "args": server.args,
                "env": server.env,
            });
            if server.transport != McpTransport::Stdio {
                entry["transport"] = json!(server.transport);
            }
            servers.insert(name.clone(), entry);
        }
        let mut out = json!({ "mcpServers": Value::Object(servers) });
        if self.strict {
            out["strict"] = json!(true);
        }
        out
    }

    /// The JSON string handed to the upstream proxy / CLI flag.
    pub fn to_proxy_string(&self) -> String {
        self.to_proxy_json().to_string()
    }

    /// Parse the proxy format back.  Everything `to_proxy_json` writes —
    /// names, commands, args, env, transports and `strict` — comes back
    /// intact.
    pub fn from_proxy_json(value: &Value) -> Result<Self> {
        let Some(servers) = value.get("mcpServers").and_then(Value::as_object) else {
            return Err(Error::Validation(
                "MCP config is missing the mcpServers object".into(),
            ));
        };
        let mut out = BTreeMap::new();
        for (name, entry) in servers {
            let server: McpServer = serde_json::from_value(entry.clone())
                .map_err(|e| Error::Validation(format!("MCP server {name:?}: {e}")))?;
            out.insert(name.clone(), server);
        }
        let config = Self {
            servers: out,
            strict: value.get("strict").and_then(Value::as_bool).unwrap_or(false),
        };
        config.validate()?;
        Ok(config)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn server(command: &str, transport: McpTransport) -> McpServer {
        McpServer {
            command: command.into(),
            args: vec!["--stdio".into()],
            env: BTreeMap::from([("TOKEN".to_string(), "t".to_string())]),
            transport,
        }
    }

    #[test]
    fn stdio_transport_is_omitted_on_the_wire() {
        let mut config = McpConfig::default();
        config
            .servers
            .insert("files".into(), server("mcp-files", McpTransport::Stdio));
        let v = config.to_proxy_json();
        assert!(v["mcpServers"]["files"].get("transport").is_none());
        assert_eq!(v["mcpServers"]["files"]["command"], "mcp-files");
    }

    #[test]
    fn non_stdio_transport_is_spelled_out() {
        let mut config = McpConfig::default();
        config
            .servers
            .insert("search".into(), server("mcp-search", McpTransport::Sse));
        let v = config.to_proxy_json();
        assert_eq!(v["mcpServers"]["search"]["transport"], "sse");
    }

    #[test]
    fn proxy_json_round_trips() {
        let mut config = McpConfig {
            strict: true,
            ..Default::default()
        };
        config
            .servers
            .insert("files".into(), server("mcp-files", McpTransport::Stdio));
        config
            .servers
            .insert("web".into(), server("mcp-web", McpTransport::Http));

        let back = McpConfig::from_proxy_json(&config.to_proxy_json()).unwrap();
        assert_eq!(back, config);
        assert_eq!(back.servers["files"].command, "mcp-files");
        assert_eq!(back.servers["files"].transport, McpTransport::Stdio);
        assert_eq!(back.servers["web"].transport, McpTransport::Http);
        assert_eq!(back.servers["web"].env["TOKEN"], "t");
        assert!(back.strict);
    }

    #[test]
    fn strict_false_is_omitted_but_still_round_trips() {
        let mut config = McpConfig::default();
        config
            .servers
            .insert("files".into(), server("mcp-files", McpTransport::Stdio));

        let wire = config.to_proxy_json();
        assert!(wire.get("strict").is_none(), "false is the upstream default");

        let back = McpConfig::from_proxy_json(&wire).unwrap();
        assert_eq!(back, config);
        assert!(!back.strict);
    }

    #[test]
    fn bad_server_names_rejected() {
        for name in ["", "has space", "semi;colon", "sla/sh"] {
            let mut config = McpConfig::default();
            config
                .servers
                .insert(name.into(), server("cmd", McpTransport::Stdio));
            assert!(config.validate().is_err(), "{name:?} should be invalid");
        }
    }

    #[test]
    fn valid_names_pass() {
        let mut config = McpConfig::default();
        config
            .servers
            .insert("A-z_09".into(), server("cmd", McpTransport::Stdio));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn empty_command_rejected() {
        let mut config = McpConfig::default();
        config
            .servers
            .insert("files".into(), server("   ", McpTransport::Stdio));
        assert!(config.validate().is_err());
    }
}
