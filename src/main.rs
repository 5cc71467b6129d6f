// Copyright (c) 2024-2026 The herd project developers
//
// SPDX-License-Identifier: MIT
mod cli;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use cli::{Cli, Commands};
use herd_node::NodeConfig;

fn init_logging(verbose: bool) {
    let default_filter = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Some(Commands::Providers { json }) => print_providers(json),
        Some(Commands::Serve {
            port,
            database,
            repository,
            pid_file,
        }) => {
            let mut config = NodeConfig::from_env().context("invalid environment")?;
            if let Some(port) = port {
                config.port = port;
            }
            if let Some(database) = database {
                config.database_path = database;
            }
            if let Some(repository) = repository {
                config.repository = repository.parse().context("invalid --repository")?;
            }
            if let Some(pid_file) = pid_file {
                config.pid_file_path = pid_file;
            }
            herd_node::serve(config).await
        }
        None => {
            let config = NodeConfig::from_env().context("invalid environment")?;
            herd_node::serve(config).await
        }
    }
}

fn print_providers(json: bool) -> anyhow::Result<()> {
    let providers = herd_model::catalog::providers();
    if json {
        println!("{}", serde_json::to_string_pretty(&providers)?);
        return Ok(());
    }
    for provider in providers {
        let marker = if provider.available { "✓" } else { "✗" };
        println!("{marker} {} ({})", provider.name, provider.id);
        for model in provider.models {
            println!("    {} — {}", model.id, model.capabilities.join(", "));
        }
    }
    Ok(())
}
