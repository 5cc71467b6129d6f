// Copyright (c) 2024-2026 The herd project developers
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Runner factory keyed by agent type.

use std::str::FromStr;
use std::sync::Arc;

use herd_model::{AgentType, Error, Result};

use crate::parser::{ClaudeStreamParser, GeminiStreamParser};
use crate::process::SubprocessRunner;
use crate::proxy::ProxyRunner;
use crate::scripted::ScriptedRunner;
use crate::AgentRunner;

/// How claude-code launches are executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClaudeAdapter {
    /// Spawn the locally installed `claude` CLI.
    Sdk,
    /// Delegate to the python proxy service over HTTP-SSE.
    #[default]
    PythonProxy,
}

impl FromStr for ClaudeAdapter {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self> {
        match s {
            "sdk" => Ok(Self::Sdk),
            "python-proxy" => Ok(Self::PythonProxy),
            other => Err(Error::Validation(format!(
                "unknown claude adapter {other:?} (expected sdk or python-proxy)"
            ))),
        }
    }
}

/// Hands out the runner responsible for an agent type.
pub trait RunnerFactory: Send + Sync {
    fn runner_for(&self, agent_type: AgentType) -> Result<Arc<dyn AgentRunner>>;

    /// The scripted runner, exposed so synthetic schedules can be
    /// registered before launch.
    fn scripted(&self) -> Arc<ScriptedRunner>;
}

/// The production factory: one long-lived runner per backend kind.
pub struct StandardRunnerFactory {
    claude: Arc<dyn AgentRunner>,
    gemini: Arc<dyn AgentRunner>,
    synthetic: Arc<ScriptedRunner>,
}

impl StandardRunnerFactory {
    pub fn new(claude_adapter: ClaudeAdapter, proxy_url: &str) -> Self {
        let claude: Arc<dyn AgentRunner> = match claude_adapter {
            ClaudeAdapter::Sdk => Arc::new(SubprocessRunner::new(
                AgentType::ClaudeCode,
                Arc::new(ClaudeStreamParser),
            )),
            ClaudeAdapter::PythonProxy => {
                Arc::new(ProxyRunner::new(proxy_url, Arc::new(ClaudeStreamParser)))
            }
        };
        Self {
            claude,
            gemini: Arc::new(SubprocessRunner::new(
                AgentType::GeminiCli,
                Arc::new(GeminiStreamParser),
            )),
            synthetic: Arc::new(ScriptedRunner::new()),
        }
    }
}

impl RunnerFactory for StandardRunnerFactory {
    fn runner_for(&self, agent_type: AgentType) -> Result<Arc<dyn AgentRunner>> {
        Ok(match agent_type {
            AgentType::ClaudeCode => self.claude.clone(),
            AgentType::GeminiCli => self.gemini.clone(),
            AgentType::Synthetic => self.synthetic.clone(),
        })
    }

    fn scripted(&self) -> Arc<ScriptedRunner> {
        self.synthetic.clone()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
