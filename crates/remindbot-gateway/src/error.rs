use remindbot_cron::{EngineError, ValidationError};
use remindbot_storage::StorageError;

/// Failure of a user-facing reminder operation.
#[derive(Debug, thiserror::Error)]
pub enum ReminderError {
    /// Bad user input; the form stays on the same step.
    #[error("{0}")]
    Validation(#[from] ValidationError),
    /// Input arrived for a step the chat is not on.
    #[error("{0}")]
    WrongStep(&'static str),
    /// A command argument that does not parse.
    #[error("{0}")]
    InvalidArgument(&'static str),
    #[error("{0} not found")]
    NotFound(String),
    #[error("you can only cancel your own jobs")]
    PermissionDenied,
    #[error("{0}")]
    Engine(#[from] EngineError),
    #[error("{0}")]
    Storage(#[from] StorageError),
    #[error("the job details are incomplete, please start again with /newjob")]
    IncompleteForm,
    /// The AI service could not answer; the user can still type a cron expression.
    #[error("schedule assistant unavailable ({0}), please enter a cron expression instead")]
    Degraded(String),
}

impl From<rusqlite::Error> for ReminderError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Storage(StorageError::Sqlite(e))
    }
}

impl ReminderError {
    /// Whether the user can fix this by sending different input.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::Validation(_) | Self::WrongStep(_) | Self::InvalidArgument(_)
        )
    }
}

