//! Tracing setup and the queued activity log

mod logger;
mod subscriber;
pub mod types;

pub use logger::{ActivityLogger, LoggerConfig};
pub use subscriber::init_tracing;
pub use types::{ActivityLog, ActivityStatus, ActivityType};
