//! # lib_common
//!
//! Distributed self-clearing alarms. Producers `pulse` a (namespace, field)
//! flag to 1; the `ResetWorker` turns it back to 0 once its deadline passes
//! without a fresh pulse. Everything is coordinated through one shared store.
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use lib_common::{AlarmClient, RedisStore};
//!
//! let store = Arc::new(RedisStore::connect("redis://redis:6379/0").await?);
//! let alarms = AlarmClient::new(store);
//! alarms.pulse_default("health:svc", "sftp_upload:job1").await?;
//! assert_eq!(alarms.read_flag("health:svc", "sftp_upload:job1").await?, 1);
//! ```

#![forbid(unsafe_code)]

pub mod alarms;
pub mod connections;
pub mod error;
#[cfg(feature = "loggers")]
pub mod loggers;

pub use alarms::{
    AlarmClient, AlarmKeys, Clock, ManualClock, Member, PendingAlarm, RacePolicy, ResetWorker,
    ResetWorkerOptions, Resolution, SweepReport, SystemClock,
};
#[cfg(feature = "connections")]
pub use connections::RedisStore;
pub use connections::{AlarmStore, DueGuard, MemoryStore, StoreOp};
pub use error::{AlarmError, AlarmResult, StoreError};
