//! remindbot-cron: schedule validation and the local scheduling engine.
//!
//! Provides the 5-field cron grammar with next-fire computation and
//! plain-English descriptions, the input validators shared by the reminder
//! form and the AI bridge, and an engine that fires once-off and periodic
//! reminders.

pub mod describe;
pub mod engine;
pub mod expr;
pub mod store;
pub mod validate;

pub use engine::{EngineError, JobEngine, JobWorker, LocalEngine};
pub use expr::{CronError, CronSchedule};
pub use store::RunState;
pub use validate::{
    Clock, FixedClock, MAX_NAME_LEN, SystemClock, TIMESTAMP_FORMAT, ValidationError,
    parse_schedule_timestamp, validate_cron, validate_job_message, validate_job_name,
    validate_schedule_timestamp,
};
