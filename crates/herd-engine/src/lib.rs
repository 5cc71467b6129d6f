// Copyright (c) 2024-2026 The herd project developers
//
// SPDX-License-Identifier: Apache-2.0
//!
//! The orchestration engine: everything between the transport layer and the
//! runners.
//!
//! ```text
//! HTTP handler ──► Orchestrator ──► LaunchQueue ──► LaunchContext
//!                      │                                │ instruction prep
//!                      │                                │ repo.save(INITIALIZING)
//!                      │                                │ runner.start
//!                      │                                ▼
//! WS handler ────► SubscriptionRegistry ──► singleton BroadcastObserver
//!                      │                                │ persist message
//!                      ▼                                ▼ then emit
//!                EventGateway port  ◄────────── StreamBroadcaster
//! ```
//!
//! The gateway is a port: the engine never knows the transport.  All shared
//! maps live behind their owning component, per the concurrency table in the
//! design notes.

pub mod broadcast;
pub mod gateway;
pub mod instructions;
pub mod orchestrator;
pub mod queue;
pub mod registry;


pub use broadcast::StreamBroadcaster;
pub use gateway::{agent_room, events, EventGateway};
pub use instructions::{InstructionBackup, InstructionHandler};
pub use orchestrator::{Orchestrator, SYSTEM_CLIENT_ID};
pub use queue::{LaunchExecutor, LaunchQueue};
pub use registry::SubscriptionRegistry;
