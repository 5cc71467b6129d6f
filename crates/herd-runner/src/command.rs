// Copyright (c) 2024-2026 The herd project developers
//
// SPDX-License-Identifier: Apache-2.0
//!
//! CLI argument assembly for the subprocess backends.

use std::process::Stdio;

use tokio::process::Command;

use herd_model::{AgentSession, AgentType, Error, OutputFormat, Result};

/// Build the ready-to-spawn command for one launch.
///
/// The child is isolated from the service's terminal: stdin is null and
/// `kill_on_drop` guarantees no orphan keeps running if the reader task is
/// dropped.
pub fn build_command(agent_type: AgentType, session: &AgentSession) -> Result<Command> {
    let mut cmd = match agent_type {
        AgentType::ClaudeCode => claude_command(session),
        AgentType::GeminiCli => gemini_command(session),
        AgentType::Synthetic => {
            return Err(Error::Backend(
                "synthetic agents have no subprocess backend".into(),
            ))
        }
    };
    if let Some(dir) = &session.config.working_directory {
        cmd.current_dir(dir);
    }
    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());
    cmd.kill_on_drop(true);
    Ok(cmd)
}

fn claude_command(session: &AgentSession) -> Command {
    let config = &session.config;
    let mut cmd = Command::new("claude");
    cmd.arg("-p").arg(&session.prompt);

    let format = match config.output_format.unwrap_or(OutputFormat::StreamJson) {
        OutputFormat::StreamJson => "stream-json",
        OutputFormat::Json => "json",
    };
    cmd.arg("--output-format").arg(format);
    // stream-json requires --verbose in print mode.
    if format == "stream-json" {
        cmd.arg("--verbose");
    }

    if let Some(model) = &config.model {
        cmd.arg("--model").arg(model);
    }
    if let Some(session_id) = &config.session_id {
        cmd.arg("--session-id").arg(session_id);
    }
    if let Some(tools) = &config.allowed_tools {
        if !tools.is_empty() {
            cmd.arg("--allowedTools").arg(tools.join(","));
        }
    }
    if let Some(tools) = &config.disallowed_tools {
        if !tools.is_empty() {
            cmd.arg("--disallowedTools").arg(tools.join(","));
        }
    }
    if let Some(mcp) = &config.mcp {
        cmd.arg("--mcp-config").arg(mcp.to_proxy_string());
        if mcp.strict {
            cmd.arg("--strict-mcp-config");
        }
    }
    if let Some(extra) = &config.custom_args {
        cmd.args(extra);
    }
    cmd
}

fn gemini_command(session: &AgentSession) -> Command {
    let config = &session.config;
    let mut cmd = Command::new("gemini");
    cmd.arg("-p").arg(&session.prompt);
    if let Some(model) = &config.model {
        cmd.arg("-m").arg(model);
    }
    if let Some(extra) = &config.custom_args {
        cmd.args(extra);
    }
    cmd
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
