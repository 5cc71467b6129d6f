// Copyright (c) 2024-2026 The herd project developers
//
// SPDX-License-Identifier: MIT
//!
//! Core domain types shared by every herd crate: agent identity and
//! lifecycle, launch requests, messages, MCP configuration, the provider
//! catalog and the error taxonomy.
//!
//! This crate is deliberately free of I/O — storage, runners and transports
//! live in their own crates and all speak these types.

pub mod catalog;
pub mod config;
pub mod error;
pub mod mcp;
pub mod message;
pub mod types;

pub use config::{AgentConfig, AgentSession, LaunchRequest, OutputFormat, MAX_INSTRUCTIONS_LEN};
pub use error::{Error, Result};
pub use mcp::{McpConfig, McpServer, McpTransport};
pub use message::{AgentMessage, MessageType, NewMessage};
pub use types::{Agent, AgentError, AgentId, AgentStatus, AgentType, RequestId};
