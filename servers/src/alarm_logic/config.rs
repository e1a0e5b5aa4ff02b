use anyhow::{Context, Result};
use clap::Parser;
use lib_common::alarms::{
    AlarmKeys, DEFAULT_BATCH, DEFAULT_DUE_INDEX, DEFAULT_POLL_INTERVAL, DEFAULT_TOKEN_PREFIX,
    RacePolicy, ResetWorkerOptions,
};
use lib_common::loggers::LoggerOptions;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const PROCESS_NAME: &str = "alarm-reset-worker";

#[derive(Parser, Deserialize, Serialize, Debug, Clone, Default)]
#[command(about = "Clears distributed alarms whose pulse deadline has passed", version)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[arg(long, env = "ALARM_CONFIG_PATH", help = "Path to the JSON configuration file.")]
    pub config_path: Option<PathBuf>,

    #[arg(long, env = "REDIS_URL", help = "Full Redis URL. Takes precedence over host/port/db.")]
    pub redis_url: Option<String>,

    #[arg(long, env = "REDIS_HOST", help = "Redis host.")]
    pub redis_host: Option<String>,

    #[arg(long, env = "REDIS_PORT", help = "Redis port.")]
    pub redis_port: Option<u16>,

    #[arg(long, env = "REDIS_DB", help = "Redis logical database.")]
    pub redis_db: Option<i64>,

    #[arg(long, env = "ALARM_DUE_ZSET", help = "Name of the sorted due index.")]
    pub due_zset: Option<String>,

    #[arg(long, env = "ALARM_TOKEN_PREFIX", help = "Prefix of the per-member token keys.")]
    pub token_prefix: Option<String>,

    #[arg(long, env = "ALARM_POLL_INTERVAL_MS", help = "Sleep between empty sweeps, in milliseconds.")]
    pub poll_interval_ms: Option<u64>,

    #[arg(long, env = "ALARM_BATCH", help = "Maximum members examined per sweep.")]
    pub batch: Option<usize>,

    #[arg(long, env = "ALARM_RACE_POLICY", help = "Token comparison policy: 'selected-score' or 'refetch'.")]
    pub race_policy: Option<RacePolicy>,

    #[arg(long, env = "ALARM_LOG_DIR", help = "Directory for log files.")]
    pub log_dir: Option<PathBuf>,

    #[arg(long, env = "ALARM_LOG_LEVEL", help = "Logging level (trace, debug, info, warn, error).")]
    pub log_level: Option<String>,
}

/// Everything the worker process needs, fully resolved.
#[derive(Debug, Clone)]
pub struct Settings {
    pub redis_url: String,
    pub worker: ResetWorkerOptions,
    pub logger: LoggerOptions,
}

impl Config {
    // Merge two Config structs, where 'other' overrides 'self' for Some values
    fn merge(self, other: Config) -> Config {
        Config {
            config_path: other.config_path.or(self.config_path),
            redis_url: other.redis_url.or(self.redis_url),
            redis_host: other.redis_host.or(self.redis_host),
            redis_port: other.redis_port.or(self.redis_port),
            redis_db: other.redis_db.or(self.redis_db),
            due_zset: other.due_zset.or(self.due_zset),
            token_prefix: other.token_prefix.or(self.token_prefix),
            poll_interval_ms: other.poll_interval_ms.or(self.poll_interval_ms),
            batch: other.batch.or(self.batch),
            race_policy: other.race_policy.or(self.race_policy),
            log_dir: other.log_dir.or(self.log_dir),
            log_level: other.log_level.or(self.log_level),
        }
    }

    fn defaults() -> Config {
        Config {
            redis_host: Some("redis".to_string()),
            redis_port: Some(6379),
            redis_db: Some(0),
            due_zset: Some(DEFAULT_DUE_INDEX.to_string()),
            token_prefix: Some(DEFAULT_TOKEN_PREFIX.to_string()),
            poll_interval_ms: Some(DEFAULT_POLL_INTERVAL.as_millis() as u64),
            batch: Some(DEFAULT_BATCH),
            race_policy: Some(RacePolicy::default()),
            log_dir: Some(PathBuf::from("./logs")),
            log_level: Some("info".to_string()),
            ..Default::default()
        }
    }

    /// Turns the merged layers into concrete settings.
    pub fn settings(&self) -> Result<Settings> {
        let redis_url = match &self.redis_url {
            Some(url) => url.clone(),
            None => format!(
                "redis://{}:{}/{}",
                self.redis_host.as_deref().unwrap_or("redis"),
                self.redis_port.unwrap_or(6379),
                self.redis_db.unwrap_or(0)
            ),
        };

        let batch = self.batch.unwrap_or(DEFAULT_BATCH);
        anyhow::ensure!(batch > 0, "batch must be at least 1");

        let poll_interval = self
            .poll_interval_ms
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_POLL_INTERVAL);

        let keys = AlarmKeys::new(
            self.due_zset.as_deref().unwrap_or(DEFAULT_DUE_INDEX),
            self.token_prefix.as_deref().unwrap_or(DEFAULT_TOKEN_PREFIX),
        );

        Ok(Settings {
            redis_url,
            worker: ResetWorkerOptions {
                keys,
                poll_interval,
                batch,
                race_policy: self.race_policy.unwrap_or_default(),
            },
            logger: LoggerOptions {
                process_name: PROCESS_NAME.to_string(),
                log_dir: self.log_dir.clone(),
                level: self.log_level.clone().unwrap_or_else(|| "info".to_string()),
                ..Default::default()
            },
        })
    }
}

fn read_config_file(path: &Path) -> Result<Config> {
    let config_str = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    serde_json::from_str::<Config>(&config_str)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Layers defaults < config file < environment/CLI.
pub fn resolve(cli: Config) -> Result<Config> {
    let mut current_config = Config::defaults();

    let config_file_path = cli
        .config_path
        .clone()
        .unwrap_or_else(|| PathBuf::from("alarm_reset_worker.conf"));

    if config_file_path.exists() {
        current_config = current_config.merge(read_config_file(&config_file_path)?);
    } else if cli.config_path.is_some() {
        anyhow::bail!("Config file not found at {}", config_file_path.display());
    }

    Ok(current_config.merge(cli))
}

pub fn load_config() -> Result<Config> {
    // clap::Parser handles both env vars and CLI args.
    resolve(Config::parse())
}
