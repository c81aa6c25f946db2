// error.rs
//
// Public errors for the task supervision API. Recoverable parse-level
// problems never surface here; they are absorbed into the canonical
// result's error field and the terminal event.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TranscribeError {
    /// No live process is registered under this task id
    TaskNotFound(String),
    /// A live process already exists for this task id
    TaskAlreadyRunning(String),
}

impl fmt::Display for TranscribeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TranscribeError::TaskNotFound(id) => write!(f, "No active task with id {}", id),
            TranscribeError::TaskAlreadyRunning(id) => {
                write!(f, "Task {} already has a live process", id)
            }
        }
    }
}

impl std::error::Error for TranscribeError {}
