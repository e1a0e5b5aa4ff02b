//! # Alarms Module
//!
//! Self-clearing boolean flags coordinated only through the shared store.
//!
//! - **`keys`**: member encoding and the persisted key layout.
//! - **`clock`**: wall-clock source, swappable for deterministic runs.
//! - **`pulse`**: producer side (`AlarmClient::pulse`) and flag reads.
//! - **`reset_worker`**: the sweeper that turns expired flags back to 0.

pub mod clock;
pub mod keys;
pub mod pulse;
pub mod reset_worker;

pub use clock::{Clock, ManualClock, SystemClock};
pub use keys::{
    AlarmKeys, DEFAULT_DUE_INDEX, DEFAULT_PULSE_SECS, DEFAULT_TOKEN_PREFIX, DUE_TOLERANCE_SECS,
    MEMBER_SEPARATOR, Member, decode_due, encode_due, same_due,
};
pub use pulse::{AlarmClient, PendingAlarm};
pub use reset_worker::{
    DEFAULT_BATCH, DEFAULT_POLL_INTERVAL, RacePolicy, ResetWorker, ResetWorkerOptions, Resolution,
    SweepReport,
};
