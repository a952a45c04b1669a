//! Paratask execution engine
//!
//! Runs a list of tasks, each in its own worker process, and resolves a
//! single [`Completion`] with the results ordered by submission index, or
//! with the first failure reported by any worker.

pub mod aggregate;
pub mod completion;
pub mod error;
pub mod process;
pub mod store;
pub mod task;
pub mod validation;
pub mod worker;

// Re-export main types
pub use completion::{
    current_completion, reset_completion, use_completion, Completion, CompletionPrimitive,
    FuturesCompletion, Settler, TokioCompletion,
};
pub use error::ExecutionError;
pub use process::{ProcessExecutorConfig, ProcessTaskExecutor};
pub use store::{PayloadStore, SharedPayloadHandle, StoreError};
pub use task::Task;
pub use worker::{SlotState, WorkerEvent, WorkerProcessError, WorkerProcessManager};

// Re-export wire value types
pub use paratask_ipc::{RemoteError, TaskValue, ValueKind};
