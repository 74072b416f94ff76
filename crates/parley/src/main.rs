// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Parley - multi-domain conversation orchestration server.
//!
//! This is the binary entry point.

mod config_cmd;
mod serve;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use parley_config::{ConfigError, ParleyConfig};

/// Parley - multi-domain conversation orchestration server.
#[derive(Parser, Debug)]
#[command(name = "parley", version, about, long_about = None)]
struct Cli {
    /// Explicit config file. Without it the XDG hierarchy is searched.
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the HTTP gateway and job workers.
    Serve,
    /// Inspect the effective configuration.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Validate the configuration and exit.
    Check,
    /// Print the effective configuration with secrets redacted.
    Show,
}

fn load(path: Option<&PathBuf>) -> Result<ParleyConfig, Vec<ConfigError>> {
    match path {
        Some(path) => parley_config::load_and_validate_path(path),
        None => parley_config::load_and_validate(),
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match load(cli.config.as_ref()) {
        Ok(config) => config,
        Err(errors) => {
            parley_config::render_errors(&errors);
            std::process::exit(1);
        }
    };

    let result = match cli.command {
        Some(Commands::Serve) => serve::run_serve(config).await,
        Some(Commands::Config {
            action: ConfigAction::Check,
        }) => {
            println!("{}", config_cmd::summary(&config));
            Ok(())
        }
        Some(Commands::Config {
            action: ConfigAction::Show,
        }) => config_cmd::show(&config).map(|rendered| print!("{rendered}")),
        None => {
            println!("parley: use --help for available commands");
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
