pub mod error;
pub mod scheduled_executor;

pub use error::{MonitorError, MonitorResult};
pub use scheduled_executor::{
    BackoffPolicy, JobContext, JobControl, Schedule, ScheduledExecutor, ScheduledTask,
};
