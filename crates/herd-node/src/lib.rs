// Copyright (c) 2024-2026 The herd project developers
//
// SPDX-License-Identifier: Apache-2.0
//!
//! The herd node: HTTP API, WebSocket event channel, instance lock and
//! process lifecycle around the orchestration engine.

pub mod config;
pub mod gateway;
pub mod http;
pub mod lock;
pub mod server;
pub mod ws;

pub use config::{NodeConfig, RepositoryKind};
pub use gateway::WsGateway;
pub use lock::InstanceLock;
pub use server::serve;
