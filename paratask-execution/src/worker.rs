//! Worker process lifecycle
//!
//! One worker process per task. Each spawned worker gets a stdin writer
//! task, a stdout reader task and (optionally) a stderr forwarder; the
//! reader turns everything the worker says into [`WorkerEvent`]s on a
//! single channel owned by the submission driving it.

use crate::store::{PayloadStore, SharedPayloadHandle};
use paratask_ipc::{
    IpcError, LineReader, LineWriter, MessageEnvelope, OrchestratorMessage, WorkerOutcome,
};
use std::path::PathBuf;
use std::process::Stdio;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

/// Worker process errors
#[derive(Error, Debug)]
pub enum WorkerProcessError {
    #[error("Failed to spawn worker: {0}")]
    SpawnError(String),

    #[error("Communication error: {0}")]
    CommunicationError(String),

    #[error("Worker {0} is not running")]
    WorkerNotRunning(usize),

    #[error("IPC error: {0}")]
    IpcError(#[from] IpcError),
}

/// How worker processes are started
#[derive(Debug, Clone)]
pub struct WorkerLaunch {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub module_root: Option<PathBuf>,
    pub log_level: String,
    pub forward_stderr: bool,
}

/// Something a worker did, tagged with its task index
#[derive(Debug)]
pub enum WorkerEvent {
    /// The worker reported its outcome
    Message { index: usize, outcome: WorkerOutcome },
    /// The worker's output channel closed
    Closed { index: usize },
    /// The worker sent something that could not be accepted
    ChannelError { index: usize, error: IpcError },
}

/// Lifecycle of one slot. `Completed` and `Killed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Spawned,
    AwaitingResult,
    Completed,
    Killed,
}

impl SlotState {
    pub fn is_live(&self) -> bool {
        matches!(self, SlotState::Spawned | SlotState::AwaitingResult)
    }
}

/// A spawned worker bound to one task index
#[derive(Debug)]
pub struct WorkerSlot {
    pub index: usize,
    pub pid: Option<u32>,
    pub state: SlotState,
    payload: Option<SharedPayloadHandle>,
    child: Option<Child>,
    stdin_tx: Option<mpsc::UnboundedSender<OrchestratorMessage>>,
}

/// Owns every worker of one submission, indexed by task index
pub struct WorkerProcessManager {
    launch: WorkerLaunch,
    store: PayloadStore,
    label: String,
    slots: Vec<Option<WorkerSlot>>,
    events_tx: mpsc::UnboundedSender<WorkerEvent>,
}

impl WorkerProcessManager {
    pub fn new(
        launch: WorkerLaunch,
        store: PayloadStore,
        label: impl Into<String>,
        capacity: usize,
        events_tx: mpsc::UnboundedSender<WorkerEvent>,
    ) -> Self {
        Self {
            launch,
            store,
            label: label.into(),
            slots: (0..capacity).map(|_| None).collect(),
            events_tx,
        }
    }

    /// Start the worker process for task `index`
    pub fn spawn(&mut self, index: usize) -> Result<(), WorkerProcessError> {
        let worker_id = format!("{}-{}", self.label, index);
        debug!("Spawning worker process: {}", worker_id);

        let mut cmd = Command::new(&self.launch.program);
        cmd.args(&self.launch.args)
            .arg("--worker-id")
            .arg(&worker_id)
            .arg("--log-level")
            .arg(&self.launch.log_level)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(if self.launch.forward_stderr {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .kill_on_drop(true);
        if let Some(root) = &self.launch.module_root {
            cmd.current_dir(root);
        }

        let mut child = cmd.spawn().map_err(|e| {
            WorkerProcessError::SpawnError(format!(
                "Failed to spawn {}: {}",
                self.launch.program.display(),
                e
            ))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| WorkerProcessError::SpawnError("Failed to get stdin".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| WorkerProcessError::SpawnError("Failed to get stdout".to_string()))?;

        let (stdin_tx, stdin_rx) = mpsc::unbounded_channel();
        tokio::spawn(stdin_writer_task(index, stdin, stdin_rx));
        tokio::spawn(stdout_reader_task(index, stdout, self.events_tx.clone()));
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(stderr_forwarder_task(worker_id.clone(), stderr));
        }

        let slot = WorkerSlot {
            index,
            pid: child.id(),
            state: SlotState::Spawned,
            payload: None,
            child: Some(child),
            stdin_tx: Some(stdin_tx),
        };
        debug!(worker = %worker_id, pid = ?slot.pid, "Worker process started");

        if index >= self.slots.len() {
            self.slots.resize_with(index + 1, || None);
        }
        self.slots[index] = Some(slot);
        Ok(())
    }

    /// Send the staged payload location to the worker for task `index`.
    /// A payload that cannot be handed over is removed from the store.
    pub fn deliver_payload(
        &mut self,
        index: usize,
        handle: SharedPayloadHandle,
    ) -> Result<(), WorkerProcessError> {
        let store = self.store.clone();
        let Some(slot) = self.live_slot_mut(index) else {
            discard_payload(&store, index, &handle);
            return Err(WorkerProcessError::WorkerNotRunning(index));
        };

        let message = OrchestratorMessage::ExecutePayload {
            shared_payload_path: handle.path.clone(),
        };
        let sent = match &slot.stdin_tx {
            Some(stdin_tx) => stdin_tx.send(message).map_err(|e| {
                WorkerProcessError::CommunicationError(format!("Failed to send payload: {}", e))
            }),
            None => Err(WorkerProcessError::WorkerNotRunning(index)),
        };
        if let Err(e) = sent {
            discard_payload(&store, index, &handle);
            return Err(e);
        }

        slot.payload = Some(handle);
        slot.state = SlotState::AwaitingResult;
        Ok(())
    }

    /// Terminate the worker for task `index` and clean up its payload.
    /// Unknown or already released slots are ignored.
    pub fn kill(&mut self, index: usize) {
        self.release(index, SlotState::Killed);
    }

    /// Release a worker that finished: it reported a result or exited
    pub fn complete(&mut self, index: usize) {
        self.release(index, SlotState::Completed);
    }

    /// Kill every live worker. Safe to call repeatedly.
    pub fn kill_all(&mut self) {
        for index in 0..self.slots.len() {
            self.kill(index);
        }
    }

    pub fn state(&self, index: usize) -> Option<SlotState> {
        self.slots
            .get(index)
            .and_then(Option::as_ref)
            .map(|slot| slot.state)
    }

    pub fn pid(&self, index: usize) -> Option<u32> {
        self.slots
            .get(index)
            .and_then(Option::as_ref)
            .and_then(|slot| slot.pid)
    }

    /// Number of workers that have not reached a terminal state
    pub fn live_count(&self) -> usize {
        self.slots
            .iter()
            .flatten()
            .filter(|slot| slot.state.is_live())
            .count()
    }

    fn live_slot_mut(&mut self, index: usize) -> Option<&mut WorkerSlot> {
        self.slots
            .get_mut(index)
            .and_then(Option::as_mut)
            .filter(|slot| slot.state.is_live())
    }

    fn release(&mut self, index: usize, state: SlotState) {
        let store = self.store.clone();
        let Some(slot) = self.live_slot_mut(index) else {
            return;
        };

        slot.state = state;
        slot.stdin_tx = None;

        if let Some(mut child) = slot.child.take() {
            if let Err(e) = child.start_kill() {
                debug!("Worker {} already gone: {}", index, e);
            }
            // reap in the background; without a runtime, kill_on_drop covers it
            if let Ok(runtime) = Handle::try_current() {
                runtime.spawn(async move {
                    if let Err(e) = child.wait().await {
                        debug!("Failed to reap worker {}: {}", index, e);
                    }
                });
            }
        }

        if let Some(handle) = slot.payload.take() {
            discard_payload(&store, index, &handle);
        }

        debug!(worker = index, state = ?state, "Worker released");
    }
}

/// Remove a staged payload no worker will consume. Runs in the background;
/// outside a runtime the file is left for the store's owner.
pub(crate) fn discard_payload(store: &PayloadStore, index: usize, handle: &SharedPayloadHandle) {
    let Ok(runtime) = Handle::try_current() else {
        return;
    };
    let cleanup = store.remove_if_exists(handle);
    runtime.spawn(async move {
        match cleanup.await {
            Ok(true) => debug!("Removed unconsumed payload of task {}", index),
            Ok(false) => {}
            Err(e) => warn!("Failed to clean up payload of task {}: {}", index, e),
        }
    });
}

impl Drop for WorkerProcessManager {
    fn drop(&mut self) {
        self.kill_all();
    }
}

async fn stdin_writer_task(
    index: usize,
    stdin: ChildStdin,
    mut rx: mpsc::UnboundedReceiver<OrchestratorMessage>,
) {
    let mut writer = LineWriter::new(stdin);

    while let Some(message) = rx.recv().await {
        match writer.send(&MessageEnvelope::new(message)).await {
            Ok(()) => {}
            Err(e) if e.is_broken_pipe() => {
                debug!("Worker {} stdin closed (worker likely terminated)", index);
                return;
            }
            Err(e) => {
                error!("Failed to write to worker {} stdin: {}", index, e);
                return;
            }
        }
    }
}

async fn stdout_reader_task(
    index: usize,
    stdout: ChildStdout,
    events_tx: mpsc::UnboundedSender<WorkerEvent>,
) {
    let mut reader = LineReader::new(stdout);

    loop {
        let event = match reader.receive::<WorkerOutcome>().await {
            Ok(envelope) => WorkerEvent::Message {
                index,
                outcome: envelope.message,
            },
            Err(IpcError::ConnectionClosed) => {
                debug!("Worker {} stdout closed", index);
                let _ = events_tx.send(WorkerEvent::Closed { index });
                return;
            }
            // an unreadable outcome must not pass for a silent exit
            Err(error) => {
                error!("Failed to read from worker {} stdout: {}", index, error);
                let _ = events_tx.send(WorkerEvent::ChannelError { index, error });
                let _ = events_tx.send(WorkerEvent::Closed { index });
                return;
            }
        };

        if events_tx.send(event).is_err() {
            // submission already gone
            return;
        }
    }
}

async fn stderr_forwarder_task(worker_id: String, stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) if !line.trim().is_empty() => {
                debug!(target: "paratask::worker", worker = %worker_id, "{}", line)
            }
            Ok(Some(_)) => {}
            Ok(None) => return,
            Err(e) => {
                debug!("Stopped reading stderr of worker {}: {}", worker_id, e);
                return;
            }
        }
    }
}
