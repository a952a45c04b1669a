//! Process-per-task executor
//!
//! A submission is driven by one background task that owns its workers,
//! its result table and the receiving end of the worker event channel.
//! Tasks are dispatched in submission order; events are handled as they
//! arrive, so a failure reported early stops dispatch of later tasks.

use paratask_config::{ConfigLoader, ExecutionConfig};
use paratask_ipc::{Payload, TaskValue};
use serde_json::Value as JsonValue;
use std::path::{Path, PathBuf};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::aggregate::ResultAggregator;
use crate::completion::{Completion, Settler};
use crate::error::ExecutionError;
use crate::store::PayloadStore;
use crate::task::Task;
use crate::validation::{task_from_json, validate_submission, validate_task};
use crate::worker::{discard_payload, WorkerEvent, WorkerLaunch, WorkerProcessManager};

/// Name of the worker binary looked up next to the current executable
const WORKER_BINARY: &str = "paratask-worker";

/// Configuration for the process executor
#[derive(Debug, Clone)]
pub struct ProcessExecutorConfig {
    pub worker_program: Option<PathBuf>,
    pub worker_args: Vec<String>,
    pub shared_data_dir: PathBuf,
    pub module_root: Option<PathBuf>,
    pub forward_worker_stderr: bool,
    pub worker_log_level: String,
}

impl Default for ProcessExecutorConfig {
    fn default() -> Self {
        Self::from(&ExecutionConfig::default())
    }
}

impl From<&ExecutionConfig> for ProcessExecutorConfig {
    fn from(config: &ExecutionConfig) -> Self {
        Self {
            worker_program: config.worker_program.clone(),
            worker_args: config.worker_args.clone(),
            shared_data_dir: config.shared_data_dir.clone(),
            module_root: config.module_root.clone(),
            forward_worker_stderr: config.forward_worker_stderr,
            worker_log_level: config.worker_log_level.clone(),
        }
    }
}

/// Runs every task of a submission in its own worker process
#[derive(Debug, Clone, Default)]
pub struct ProcessTaskExecutor {
    config: ProcessExecutorConfig,
}

impl ProcessTaskExecutor {
    pub fn new(config: ProcessExecutorConfig) -> Self {
        Self { config }
    }

    /// Create a new executor with default configuration
    pub fn with_defaults() -> Self {
        Self::default()
    }

    /// Build from `PARATASK_*` environment variables
    pub fn from_env() -> Result<Self, ExecutionError> {
        let config = ConfigLoader::new().from_env()?;
        Ok(Self::new(ProcessExecutorConfig::from(&config.execution)))
    }

    pub fn config(&self) -> &ProcessExecutorConfig {
        &self.config
    }

    /// Run typed tasks.
    ///
    /// Resolves with one value per task in submission order, or rejects
    /// with the first failure any task reports. Must be called from within
    /// a Tokio runtime.
    pub fn run(&self, tasks: Vec<Task>) -> Completion<Vec<TaskValue>> {
        let config = self.config.clone();
        Completion::new(move |settler| {
            if tasks.is_empty() {
                settler.reject(ExecutionError::InvalidArgument(
                    "1st argument must be a non-empty Array of task objects but was: {array} []"
                        .to_string(),
                ));
                return;
            }
            let entries = tasks.into_iter().map(Submitted::Typed).collect();
            start(config, entries, settler);
        })
    }

    /// Run a raw JSON submission, accepting the legacy `fork`/`context` keys
    pub fn run_json(&self, input: JsonValue) -> Completion<Vec<TaskValue>> {
        let config = self.config.clone();
        Completion::new(move |settler| match validate_submission(&input) {
            Ok(entries) => {
                let entries = entries.iter().cloned().map(Submitted::Raw).collect();
                start(config, entries, settler);
            }
            Err(e) => settler.reject(e),
        })
    }
}

/// One entry of a submission, validated when it is dispatched
enum Submitted {
    Typed(Task),
    Raw(JsonValue),
}

impl Submitted {
    fn into_task(self, index: usize) -> Result<Task, ExecutionError> {
        match self {
            Submitted::Typed(task) => validate_task(index, &task).map(|()| task),
            Submitted::Raw(entry) => task_from_json(index, &entry),
        }
    }
}

fn start(config: ProcessExecutorConfig, entries: Vec<Submitted>, settler: Settler) {
    match Handle::try_current() {
        Ok(runtime) => {
            runtime.spawn(drive(config, entries, settler));
        }
        Err(_) => settler.reject(ExecutionError::Configuration(
            "submissions must be started from within a Tokio runtime".to_string(),
        )),
    }
}

/// Locate the worker executable.
///
/// An explicitly configured program wins. Otherwise `paratask-worker` is
/// looked up next to the current executable and one directory above it,
/// which covers test binaries living in `target/*/deps`.
pub fn resolve_worker_program(configured: Option<&Path>) -> Result<PathBuf, ExecutionError> {
    if let Some(program) = configured {
        return Ok(program.to_path_buf());
    }

    let current_exe = std::env::current_exe().map_err(|e| {
        ExecutionError::Configuration(format!("Failed to get current exe: {}", e))
    })?;
    let name = format!("{}{}", WORKER_BINARY, std::env::consts::EXE_SUFFIX);

    current_exe
        .ancestors()
        .skip(1)
        .take(2)
        .map(|dir| dir.join(&name))
        .find(|candidate| candidate.is_file())
        .ok_or_else(|| {
            ExecutionError::Configuration(format!(
                "Cannot locate {} near {}; set execution.worker_program or PARATASK_WORKER_PROGRAM",
                name,
                current_exe.display()
            ))
        })
}

/// State of one in-flight submission
struct Submission {
    id: Uuid,
    aggregator: ResultAggregator,
    workers: WorkerProcessManager,
    store: PayloadStore,
    module_root: Option<PathBuf>,
    dispatch_complete: bool,
}

async fn drive(config: ProcessExecutorConfig, entries: Vec<Submitted>, settler: Settler) {
    let id = Uuid::new_v4();
    let task_count = entries.len();
    let mut aggregator = ResultAggregator::new(task_count, settler);

    let program = match resolve_worker_program(config.worker_program.as_deref()) {
        Ok(program) => program,
        Err(e) => {
            aggregator.finalize_failure(e);
            return;
        }
    };
    info!(submission = %id, tasks = task_count, program = %program.display(), "Starting submission");

    let store = PayloadStore::new(&config.shared_data_dir);
    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    let launch = WorkerLaunch {
        program,
        args: config.worker_args.clone(),
        module_root: config.module_root.clone(),
        log_level: config.worker_log_level.clone(),
        forward_stderr: config.forward_worker_stderr,
    };
    let label = id.simple().to_string()[..8].to_string();

    let mut submission = Submission {
        id,
        aggregator,
        workers: WorkerProcessManager::new(launch, store.clone(), label, task_count, events_tx),
        store,
        module_root: config.module_root,
        dispatch_complete: false,
    };

    for (index, entry) in entries.into_iter().enumerate() {
        if submission.aggregator.is_finalized() {
            break;
        }
        if let Err(e) = submission.dispatch(index, entry).await {
            submission.fail(e);
            break;
        }
        // let early failures stop the remaining dispatch
        while let Ok(event) = events_rx.try_recv() {
            submission.handle(event);
        }
    }

    submission.dispatch_complete = true;
    submission.check_completion();

    while !submission.aggregator.is_finalized() {
        match events_rx.recv().await {
            Some(event) => submission.handle(event),
            None => break,
        }
    }

    debug!(submission = %submission.id, "Submission finished");
}

impl Submission {
    /// Validate, stage, spawn and deliver task `index`
    async fn dispatch(&mut self, index: usize, entry: Submitted) -> Result<(), ExecutionError> {
        let task = entry.into_task(index)?;

        let payload =
            Payload::new(task.logic, task.scope).with_module_root(self.module_root.clone());
        let bytes = payload.encode().map_err(|e| ExecutionError::Payload {
            index,
            message: e.to_string(),
        })?;

        let handle = self.store.allocate(self.id, index);
        self.store
            .write(&handle, bytes)
            .await
            .map_err(|e| ExecutionError::Payload {
                index,
                message: e.to_string(),
            })?;

        if let Err(e) = self.workers.spawn(index) {
            discard_payload(&self.store, index, &handle);
            return Err(e.into());
        }

        self.workers.deliver_payload(index, handle)?;
        debug!(submission = %self.id, task = index, "Task dispatched");
        Ok(())
    }

    fn handle(&mut self, event: WorkerEvent) {
        match event {
            WorkerEvent::Message { index, outcome } => {
                if self.aggregator.is_finalized() {
                    return;
                }
                if outcome.is_failure() {
                    let failure = outcome.into_value();
                    warn!(submission = %self.id, task = index, "Task failed: {}", failure);
                    self.fail(ExecutionError::TaskFailed { index, failure });
                } else {
                    debug!(submission = %self.id, task = index, "Task succeeded");
                    self.aggregator.record(index, outcome.into_value());
                    self.workers.complete(index);
                    if self.aggregator.all_recorded() {
                        self.succeed();
                    }
                }
            }
            WorkerEvent::Closed { index } => {
                self.workers.complete(index);
                self.check_completion();
            }
            WorkerEvent::ChannelError { index, error } => {
                self.fail(ExecutionError::Ipc(format!("worker {}: {}", index, error)));
            }
        }
    }

    /// Resolve once dispatch is over and no worker is left running
    fn check_completion(&mut self) {
        if self.dispatch_complete && self.workers.live_count() == 0 {
            self.succeed();
        }
    }

    fn succeed(&mut self) {
        if self.aggregator.finalize_success() {
            self.workers.kill_all();
        }
    }

    fn fail(&mut self, error: ExecutionError) {
        if self.aggregator.finalize_failure(error) {
            self.workers.kill_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn executor_with(program: PathBuf) -> ProcessTaskExecutor {
        ProcessTaskExecutor::new(ProcessExecutorConfig {
            worker_program: Some(program),
            ..ProcessExecutorConfig::default()
        })
    }

    #[test]
    fn test_config_from_execution_config() {
        let mut execution = ExecutionConfig::default();
        execution.worker_log_level = "debug".to_string();
        execution.forward_worker_stderr = false;

        let config = ProcessExecutorConfig::from(&execution);
        assert_eq!(config.worker_log_level, "debug");
        assert!(!config.forward_worker_stderr);
        assert_eq!(config.shared_data_dir, execution.shared_data_dir);
    }

    #[test]
    fn test_configured_worker_program_wins() {
        let program = resolve_worker_program(Some(Path::new("/opt/paratask/worker"))).unwrap();
        assert_eq!(program, PathBuf::from("/opt/paratask/worker"));
    }

    #[tokio::test]
    async fn test_empty_submission_is_rejected() {
        let executor = ProcessTaskExecutor::with_defaults();
        assert!(executor.run(Vec::new()).await.unwrap_err().is_invalid_argument());
        assert!(executor.run_json(json!([])).await.unwrap_err().is_invalid_argument());
        assert!(executor.run_json(json!({})).await.unwrap_err().is_invalid_argument());
    }

    #[tokio::test]
    async fn test_invalid_entry_is_rejected_before_spawning() {
        let dir = tempfile::tempdir().unwrap();
        let executor = executor_with(dir.path().join("never-started"));

        let err = executor
            .run(vec![Task::new("not a function")])
            .await
            .unwrap_err();
        assert!(err.is_invalid_argument());
    }

    #[tokio::test]
    async fn test_missing_worker_program_fails_submission() {
        let dir = tempfile::tempdir().unwrap();
        let executor = ProcessTaskExecutor::new(ProcessExecutorConfig {
            worker_program: Some(dir.path().join("missing-worker")),
            shared_data_dir: dir.path().join("shared"),
            ..ProcessExecutorConfig::default()
        });

        let err = executor
            .run(vec![Task::new("function (resolve) { resolve(1); }")])
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutionError::Worker(_)));

        // the staged payload does not outlive the failed spawn
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        let leftovers = std::fs::read_dir(dir.path().join("shared")).unwrap().count();
        assert_eq!(leftovers, 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_unreadable_worker_output_fails_submission() {
        let dir = tempfile::tempdir().unwrap();
        let executor = ProcessTaskExecutor::new(ProcessExecutorConfig {
            worker_program: Some(PathBuf::from("/bin/sh")),
            worker_args: vec![
                "-c".to_string(),
                "echo 'not json'; cat > /dev/null".to_string(),
                "worker".to_string(),
            ],
            shared_data_dir: dir.path().join("shared"),
            ..ProcessExecutorConfig::default()
        });

        let err = executor
            .run(vec![Task::new("function (resolve) { resolve(1); }")])
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutionError::Ipc(_)));
    }

    #[test]
    fn test_run_outside_runtime_is_rejected() {
        let executor = ProcessTaskExecutor::with_defaults();
        let completion = executor.run(vec![Task::new("function (resolve) { resolve(1); }")]);
        let err = futures::executor::block_on(completion).unwrap_err();
        assert!(matches!(err, ExecutionError::Configuration(_)));
    }
}
