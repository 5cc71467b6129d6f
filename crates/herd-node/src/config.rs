// Copyright (c) 2024-2026 The herd project developers
//
// SPDX-License-Identifier: MIT
//!
//! Node configuration from the environment.
//!
//! Recognized settings:
//!
//! | Variable          | Default                  |
//! |-------------------|--------------------------|
//! | `PORT`            | `3000`                   |
//! | `CLAUDE_ADAPTER`  | `python-proxy`           |
//! | `CLAUDE_PROXY_URL`| `http://127.0.0.1:8001`  |
//! | `REPOSITORY_TYPE` | `sqlite`                 |
//! | `DATABASE_PATH`   | `herd.db`                |
//! | `PID_FILE_PATH`   | `herd.pid`               |
//! | `ANTHROPIC_API_KEY` | unset                  |
//! | `CORS_ORIGINS`    | localhost dev origins    |

use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use herd_model::{Error, Result};
use herd_runner::ClaudeAdapter;

pub const DEFAULT_PORT: u16 = 3000;

/// Which persistence backend the node runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepositoryKind {
    Memory,
    Sqlite,
}

impl RepositoryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Sqlite => "sqlite",
        }
    }
}

impl FromStr for RepositoryKind {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self> {
        match s {
            "memory" => Ok(Self::Memory),
            "sqlite" => Ok(Self::Sqlite),
            other => Err(Error::Validation(format!(
                "unknown repository type {other:?} (expected memory or sqlite)"
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub port: u16,
    pub claude_adapter: ClaudeAdapter,
    pub claude_proxy_url: String,
    pub repository: RepositoryKind,
    pub database_path: PathBuf,
    pub pid_file_path: PathBuf,
    pub anthropic_api_key: Option<String>,
    /// Allowed CORS origins; `*` means any.
    pub cors_origins: Vec<String>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            claude_adapter: ClaudeAdapter::default(),
            claude_proxy_url: "http://127.0.0.1:8001".into(),
            repository: RepositoryKind::Sqlite,
            database_path: PathBuf::from("herd.db"),
            pid_file_path: PathBuf::from("herd.pid"),
            anthropic_api_key: None,
            cors_origins: vec![
                "http://localhost:3000".into(),
                "http://localhost:5173".into(),
                "http://127.0.0.1:5173".into(),
            ],
        }
    }
}

fn env_nonempty(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

impl NodeConfig {
    /// Read the documented environment variables on top of the defaults.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(port) = env_nonempty("PORT") {
            config.port = port
                .parse()
                .map_err(|_| Error::Validation(format!("invalid PORT value {port:?}")))?;
        }
        if let Some(adapter) = env_nonempty("CLAUDE_ADAPTER") {
            config.claude_adapter = adapter.parse()?;
        }
        if let Some(url) = env_nonempty("CLAUDE_PROXY_URL") {
            config.claude_proxy_url = url;
        }
        if let Some(repository) = env_nonempty("REPOSITORY_TYPE") {
            config.repository = repository.parse()?;
        }
        if let Some(path) = env_nonempty("DATABASE_PATH") {
            config.database_path = PathBuf::from(path);
        }
        if let Some(path) = env_nonempty("PID_FILE_PATH") {
            config.pid_file_path = PathBuf::from(path);
        }
        config.anthropic_api_key = env_nonempty("ANTHROPIC_API_KEY");
        if let Some(origins) = env_nonempty("CORS_ORIGINS") {
            config.cors_origins = origins
                .split(',')
                .map(|o| o.trim().to_string())
                .filter(|o| !o.is_empty())
                .collect();
        }
        Ok(config)
    }

    pub fn allows_any_origin(&self) -> bool {
        self.cors_origins.iter().any(|o| o == "*")
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
