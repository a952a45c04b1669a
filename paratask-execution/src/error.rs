//! Error types for task execution

use crate::store::StoreError;
use crate::worker::WorkerProcessError;
use paratask_ipc::{IpcError, RemoteError, TaskValue};
use thiserror::Error;

/// Submission errors
#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Task {index} failed: {failure}")]
    TaskFailed { index: usize, failure: TaskValue },

    #[error("Payload error for task {index}: {message}")]
    Payload { index: usize, message: String },

    #[error("Worker error: {0}")]
    Worker(String),

    #[error("IPC error: {0}")]
    Ipc(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Submission was dropped before it settled")]
    Abandoned,
}

impl ExecutionError {
    /// The value a failing task reported, if this is a task failure
    pub fn failure(&self) -> Option<&TaskValue> {
        match self {
            ExecutionError::TaskFailed { failure, .. } => Some(failure),
            _ => None,
        }
    }

    /// Reconstructed error when the task failed with an error-kind value
    pub fn remote_error(&self) -> Option<RemoteError> {
        self.failure().and_then(TaskValue::as_error)
    }

    /// Index of the task this error belongs to, when there is one
    pub fn task_index(&self) -> Option<usize> {
        match self {
            ExecutionError::TaskFailed { index, .. } | ExecutionError::Payload { index, .. } => {
                Some(*index)
            }
            _ => None,
        }
    }

    pub fn is_invalid_argument(&self) -> bool {
        matches!(self, ExecutionError::InvalidArgument(_))
    }
}

// Convert from IPC errors
impl From<IpcError> for ExecutionError {
    fn from(err: IpcError) -> Self {
        Self::Ipc(err.to_string())
    }
}

// Convert from worker process errors
impl From<WorkerProcessError> for ExecutionError {
    fn from(err: WorkerProcessError) -> Self {
        Self::Worker(err.to_string())
    }
}

// Convert from config errors
impl From<paratask_config::ConfigError> for ExecutionError {
    fn from(err: paratask_config::ConfigError) -> Self {
        Self::Configuration(err.to_string())
    }
}
