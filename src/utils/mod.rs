pub mod logging;

pub use logging::{ActivityLog, LogEntry, LogLevel};
