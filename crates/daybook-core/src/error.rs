use thiserror::Error;

use crate::remote_store::StoreError;
use crate::transfer::TransferError;

/// Input rejected before it reaches any store.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Task text must not be empty")]
    EmptyText,
    #[error("Invalid time {0:?}; expected hh:mm AM/PM")]
    MalformedTime(String),
    #[error("Invalid reminder time {0:?}; expected HH:MM")]
    MalformedReminderTime(String),
    #[error("Invalid date {0:?}; expected YYYY-MM-DD")]
    MalformedDateKey(String),
    #[error("User id must not be empty")]
    EmptyUserId,
}

#[derive(Debug, Error)]
pub enum PlannerError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("Not found: {0}")]
    NotFound(String),
    /// The remote layer refused the change and it was rolled back.
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Remote store error: {0}")]
    Store(StoreError),
    #[error("Not signed in")]
    SignedOut,
    #[error(transparent)]
    Transfer(#[from] TransferError),
}

impl From<StoreError> for PlannerError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict(message) => PlannerError::Conflict(message),
            other => PlannerError::Store(other),
        }
    }
}

impl PlannerError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, PlannerError::Conflict(_))
    }
}

/// Trimmed, non-empty task or subtask text.
pub fn validate_text(text: &str) -> Result<String, ValidationError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::EmptyText);
    }
    Ok(trimmed.to_string())
}
