// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `parley serve` command implementation.
//!
//! Opens storage, assembles the runtime, recovers jobs interrupted by the
//! previous run, starts the job workers and the HTTP gateway, and drains
//! both on SIGINT/SIGTERM.

use std::sync::Arc;
use std::time::Duration;

use parley_config::ParleyConfig;
use parley_core::{ParleyError, SystemClock};
use parley_gateway::{GatewayState, start_server};
use parley_orchestrator::shutdown::{drain_workers, install_signal_handler};
use parley_orchestrator::{Adapters, Runtime};
use parley_storage::{SqliteStorage, open_stores};
use tracing::{info, warn};

/// Storage, adapters and runtime for `config`.
pub async fn build_runtime(
    config: ParleyConfig,
) -> Result<(Runtime, Option<SqliteStorage>), ParleyError> {
    let (stores, sqlite) = open_stores(&config.storage).await?;
    let adapters = Adapters::from_config(&config)?;
    let runtime = Runtime::assemble(config, stores, adapters, Arc::new(SystemClock))?;
    Ok((runtime, sqlite))
}

/// Runs the `parley serve` command.
pub async fn run_serve(config: ParleyConfig) -> Result<(), ParleyError> {
    init_tracing(&config.server.log_level);
    info!(
        host = %config.server.host,
        port = config.server.port,
        storage = ?config.storage.backend,
        "starting parley serve"
    );

    let (runtime, sqlite) = build_runtime(config).await?;
    let shutdown = install_signal_handler();

    let pool = runtime.worker_pool()?;
    pool.recover().await?;
    let workers = pool.spawn(shutdown.clone());
    info!(workers = workers.len(), "job workers started");

    let server_config = runtime.config.server.clone();
    let drain_timeout = Duration::from_secs(server_config.shutdown_timeout_secs);
    let state = GatewayState::new(runtime);
    let served = start_server(
        &server_config.host,
        server_config.port,
        state,
        shutdown.clone(),
    )
    .await;

    // A bind failure returns before any signal; stop the workers too.
    shutdown.cancel();
    if !drain_workers(workers, drain_timeout).await {
        warn!(
            timeout_secs = drain_timeout.as_secs(),
            "job workers did not stop in time"
        );
    }

    if let Some(sqlite) = sqlite
        && let Err(e) = sqlite.close().await
    {
        warn!(error = %e, "failed to checkpoint database on shutdown");
    }

    served?;
    info!("parley stopped");
    Ok(())
}

/// Initialize the tracing subscriber with the configured log level.
///
/// `RUST_LOG` takes precedence when set.
fn init_tracing(log_level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("parley={log_level},warn")));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(false)
        .try_init();
}
