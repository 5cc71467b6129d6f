// Copyright (c) 2024-2026 The herd project developers
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Node startup and shutdown.
//!
//! # Startup sequence
//!
//! 1. Acquire the instance lock (stale locks are cleaned; a live holder
//!    aborts startup with exit code 1 upstream).
//! 2. Open the repository (SQLite file or in-memory).
//! 3. Assemble gateway → broadcaster → registry → runners → orchestrator.
//! 4. Serve the axum app until SIGINT/SIGTERM.
//!
//! # Shutdown sequence
//!
//! Terminate every active agent (errors logged, never aborting), close
//! storage, release the lock — always, last.

use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use axum::http::HeaderValue;
use axum::Router;
use tokio::net::TcpListener;
use tower_http::cors::{Any, AllowOrigin, CorsLayer};
use tracing::{error, info};

use herd_engine::{InstructionHandler, Orchestrator, StreamBroadcaster, SubscriptionRegistry};
use herd_runner::StandardRunnerFactory;
use herd_store::{AgentRepository, MemoryStore, MessageStore, SqliteStore};

use crate::config::{NodeConfig, RepositoryKind};
use crate::gateway::WsGateway;
use crate::http::{self, AppState};
use crate::lock::InstanceLock;

/// Build the application state from config.  Split out so integration
/// tests can boot the full app on an ephemeral port without env setup.
pub fn build_state(config: &NodeConfig) -> herd_model::Result<AppState> {
    let (repo, store): (Arc<dyn AgentRepository>, Arc<dyn MessageStore>) = match config.repository
    {
        RepositoryKind::Sqlite => {
            let sqlite = Arc::new(SqliteStore::open(&config.database_path)?);
            (sqlite.clone(), sqlite)
        }
        RepositoryKind::Memory => {
            let memory = Arc::new(MemoryStore::new());
            (memory.clone(), memory)
        }
    };

    let gateway = Arc::new(WsGateway::new());
    let broadcaster = StreamBroadcaster::new(repo.clone(), store.clone(), gateway.clone());
    let registry = SubscriptionRegistry::new(broadcaster, gateway.clone());
    let factory = Arc::new(StandardRunnerFactory::new(
        config.claude_adapter,
        &config.claude_proxy_url,
    ));
    let working_dir = std::env::current_dir().unwrap_or_else(|_| ".".into());
    let orchestrator = Orchestrator::new(
        repo.clone(),
        factory,
        InstructionHandler::for_claude(&working_dir),
        registry.clone(),
    );

    Ok(AppState {
        orchestrator,
        registry,
        gateway,
        repo,
        store,
        repository_kind: config.repository,
        started_at: Instant::now(),
    })
}

fn cors_layer(config: &NodeConfig) -> CorsLayer {
    if config.allows_any_origin() {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<HeaderValue> = config
            .cors_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods(Any)
            .allow_headers(Any)
    }
}

pub fn build_router(config: &NodeConfig, state: AppState) -> Router {
    http::router(state).layer(cors_layer(config))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if tokio::signal::ctrl_c().await.is_err() {
            // No signal handler — fall through to SIGTERM or run forever.
            std::future::pending::<()>().await;
        }
    };
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// Run the node until a shutdown signal.  Startup failures (port taken,
/// another instance holding the lock) are returned to the caller, which
/// exits with code 1.
pub async fn serve(config: NodeConfig) -> anyhow::Result<()> {
    let mut lock = InstanceLock::acquire(&config.pid_file_path, config.port)
        .context("could not acquire instance lock")?;

    let result = serve_locked(&config).await;

    // The lock is released on every path, last.
    if let Err(e) = lock.release() {
        error!("instance lock release failed: {e}");
    }
    result
}

async fn serve_locked(config: &NodeConfig) -> anyhow::Result<()> {
    let state = build_state(config).context("could not initialize storage and engine")?;
    let orchestrator = state.orchestrator.clone();
    let app = build_router(config, state);

    let listener = TcpListener::bind(("0.0.0.0", config.port))
        .await
        .with_context(|| format!("could not bind port {}", config.port))?;
    info!(
        port = config.port,
        repository = config.repository.as_str(),
        "herd node listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("shutting down: terminating active agents");
    orchestrator.shutdown().await;
    // Storage closes when the last Arc drops; SQLite in DELETE journal mode
    // has nothing to checkpoint.
    info!("shutdown complete");
    Ok(())
}
