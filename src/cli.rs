// Copyright (c) 2024-2026 The herd project developers
//
// SPDX-License-Identifier: MIT
use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "herd",
    version,
    about = "Headless orchestration service for AI coding-agent CLIs"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Log at debug level (overrides RUST_LOG).
    #[arg(long, short, global = true)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run the node (the default when no subcommand is given).
    Serve {
        /// TCP port to listen on.
        #[arg(long, env = "PORT")]
        port: Option<u16>,

        /// SQLite database file.
        #[arg(long, env = "DATABASE_PATH")]
        database: Option<PathBuf>,

        /// Repository backend: memory or sqlite.
        #[arg(long, env = "REPOSITORY_TYPE")]
        repository: Option<String>,

        /// Instance lock file.
        #[arg(long, env = "PID_FILE_PATH")]
        pid_file: Option<PathBuf>,
    },

    /// Print the provider catalog.
    Providers {
        /// Emit JSON instead of a table.
        #[arg(long)]
        json: bool,
    },
}
