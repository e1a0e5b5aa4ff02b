//! # `alarm-ctl`: Operator Tool for Distributed Alarms
//!
//! Pulses, reads and inspects alarms in the shared Redis store, and can run a
//! single reset sweep by hand.
//!
//! ## Usage
//!
//! ```bash
//! # Raise an alarm for 22 seconds
//! alarm-ctl pulse health:svc sftp_upload:job1
//!
//! # Read its flag (prints 0 or 1)
//! alarm-ctl read health:svc sftp_upload:job1
//!
//! # Show what the reset worker is waiting on
//! alarm-ctl pending --limit 20
//!
//! # Run one sweep with the literal re-fetch comparison
//! alarm-ctl sweep --race-policy refetch
//! ```

#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use lib_common::alarms::{
    DEFAULT_BATCH, DEFAULT_DUE_INDEX, DEFAULT_PULSE_SECS, DEFAULT_TOKEN_PREFIX, decode_due, same_due,
};
use lib_common::{
    AlarmClient, AlarmKeys, Clock, RacePolicy, RedisStore, ResetWorker, ResetWorkerOptions,
    SystemClock,
};

/// # Command Line Arguments
#[derive(Parser, Debug)]
#[command(name = "alarm-ctl", author, version, about = "Pulse, read and inspect distributed alarms", long_about = None)]
struct Cli {
    /// Redis URL.
    #[arg(long, env = "REDIS_URL", default_value = "redis://127.0.0.1:6379/0")]
    redis_url: String,

    /// Name of the sorted due index.
    #[arg(long, env = "ALARM_DUE_ZSET", default_value = DEFAULT_DUE_INDEX)]
    due_zset: String,

    /// Prefix of the per-member token keys.
    #[arg(long, env = "ALARM_TOKEN_PREFIX", default_value = DEFAULT_TOKEN_PREFIX)]
    token_prefix: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Set an alarm to 1 and schedule its reset
    Pulse {
        namespace: String,
        field: String,
        /// Seconds until the alarm resets unless pulsed again
        #[arg(short, long, default_value_t = DEFAULT_PULSE_SECS)]
        duration: f64,
    },

    /// Print an alarm's flag (0 or 1)
    Read { namespace: String, field: String },

    /// List due-index entries, soonest first
    Pending {
        #[arg(short, long, default_value_t = 50)]
        limit: usize,
    },

    /// Run one reset sweep and print what it did
    Sweep {
        #[arg(short, long, default_value_t = DEFAULT_BATCH)]
        batch: usize,

        /// 'selected-score' or 'refetch'
        #[arg(long, default_value = "selected-score")]
        race_policy: RacePolicy,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let keys = AlarmKeys::new(cli.due_zset, cli.token_prefix);
    let store = Arc::new(
        RedisStore::connect(&cli.redis_url)
            .await
            .context("Failed to connect to redis")?,
    );
    let alarms = AlarmClient::new(store.clone()).with_keys(keys.clone());

    match cli.command {
        Command::Pulse {
            namespace,
            field,
            duration,
        } => {
            let due = alarms.pulse(&namespace, &field, duration).await?;
            println!(
                "{} {}:{} = 1, resets in {:.1}s (at {:.3})",
                "✓".green(),
                namespace.cyan(),
                field.cyan(),
                duration,
                due
            );
        }
        Command::Read { namespace, field } => {
            println!("{}", alarms.read_flag(&namespace, &field).await?);
        }
        Command::Pending { limit } => {
            let pending = alarms.pending(limit).await?;
            if pending.is_empty() {
                println!("No pending alarms");
            }
            let now = SystemClock.now();
            for entry in pending {
                let remaining = entry.due - now;
                let token = match entry.token.as_deref() {
                    Some(raw) if decode_due(raw).is_some_and(|t| same_due(t, entry.due)) => {
                        "token ok".dimmed()
                    }
                    Some(_) => "token stale".yellow(),
                    None => "no token".red(),
                };
                let when = if remaining >= 0.0 {
                    format!("in {:.1}s", remaining).normal()
                } else {
                    format!("overdue {:.1}s", -remaining).bright_red()
                };
                println!("{} {} {}", entry.member.cyan(), when, token);
            }
        }
        Command::Sweep { batch, race_policy } => {
            let worker = ResetWorker::new(
                store,
                ResetWorkerOptions {
                    keys,
                    poll_interval: Duration::ZERO,
                    batch,
                    race_policy,
                },
            )?;
            let report = worker.sweep().await?;
            println!("{} {}", "✓".green(), report);
        }
    }

    Ok(())
}
