//! # Alarm Reset Worker
//!
//! Long-running sweeper that turns expired alarm flags back to 0.
//!
//! Any store error ends the process with a non-zero exit status; a supervisor
//! is expected to restart it. All state lives in Redis, so the restarted
//! worker continues from the current due index.

use std::sync::Arc;

use anyhow::{Context, Result};
use lib_common::loggers::setup_logging;
use lib_common::{RedisStore, ResetWorker};

mod alarm_logic;
use alarm_logic::{config, shutdown};

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env file is fine; the environment may already be set.
    let _ = dotenvy::dotenv();

    let config = config::load_config().context("Failed to load configuration")?;
    let settings = config.settings()?;
    let _log_guards = setup_logging(&settings.logger).context("Failed to setup logging")?;

    let store = RedisStore::connect(&settings.redis_url)
        .await
        .context("Failed to connect to redis")?;
    let worker = ResetWorker::new(Arc::new(store), settings.worker)
        .context("Invalid reset worker options")?;

    tokio::select! {
        result = worker.run() => {
            if let Err(e) = result {
                tracing::error!("alarm reset worker stopped: {}", e);
                return Err(e).context("alarm reset worker stopped");
            }
        }
        _ = shutdown::shutdown_signal() => {}
    }

    tracing::info!("Shutdown complete.");
    Ok(())
}
