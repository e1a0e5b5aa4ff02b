/// Installs the tracing subscriber with console and rolling JSON-lines output.
pub mod subscriber;

pub use subscriber::{LoggerError, LoggerOptions, LoggingGuards, setup_logging};
