//! Worker process loop
//!
//! A worker handles exactly one `execute_payload` message: it reads and
//! removes the staged payload file, runs it and writes at most one outcome.

use crate::executor::execute_payload;
use crate::JsExecutionError;
use paratask_ipc::{
    IpcError, LineReader, LineWriter, MessageEnvelope, OrchestratorMessage, Payload, WorkerOutcome,
};
use std::any::Any;
use std::path::Path;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::task::LocalSet;
use tracing::{debug, info, warn};

/// Serve one orchestrator request over the given channel halves.
///
/// End of input before any request is a clean shutdown.
pub async fn run_worker_process<R, W>(
    mut reader: LineReader<R>,
    mut writer: LineWriter<W>,
) -> Result<(), JsExecutionError>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    let envelope = match reader.receive::<OrchestratorMessage>().await {
        Ok(envelope) => envelope,
        Err(IpcError::ConnectionClosed) => {
            info!("Channel closed before a payload arrived, shutting down");
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    let OrchestratorMessage::ExecutePayload { shared_payload_path } = envelope.message;
    debug!(path = %shared_payload_path.display(), "Received payload reference");

    match run_payload_file(&shared_payload_path).await {
        Some(outcome) => {
            debug!(failure = outcome.is_failure(), "Reporting task outcome");
            writer.send(&MessageEnvelope::new(outcome)).await?;
            writer.close().await?;
        }
        None => debug!("Task finished without reporting an outcome"),
    }

    Ok(())
}

/// Load, consume and run a staged payload file
pub async fn run_payload_file(path: &Path) -> Option<WorkerOutcome> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) => {
            return Some(WorkerOutcome::error(
                "PayloadUnavailable",
                format!("cannot read {}: {}", path.display(), e),
            ))
        }
    };

    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove consumed payload"),
    }

    let payload = match Payload::decode(&bytes) {
        Ok(payload) => payload,
        Err(IpcError::PayloadCorrupt(message)) => {
            return Some(WorkerOutcome::error("PayloadCorrupt", message))
        }
        Err(e) => return Some(WorkerOutcome::error("PayloadCorrupt", e)),
    };

    run_guarded(payload).await
}

/// Run on a local task so a panic in the engine becomes a failure outcome
async fn run_guarded(payload: Payload) -> Option<WorkerOutcome> {
    let local = LocalSet::new();
    let joined = local
        .run_until(async move {
            tokio::task::spawn_local(async move { execute_payload(&payload).await }).await
        })
        .await;

    match joined {
        Ok(outcome) => outcome,
        Err(e) if e.is_panic() => Some(WorkerOutcome::error(
            "InternalError",
            panic_message(e.into_panic()),
        )),
        Err(e) => Some(WorkerOutcome::error("InternalError", e)),
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "worker panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use paratask_ipc::{TaskValue, ValueKind};
    use serde_json::{json, Map};
    use tokio::io::{duplex, AsyncWriteExt};

    #[tokio::test]
    async fn test_payload_is_consumed_and_run() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("payload.json");
        let mut scope = Map::new();
        scope.insert("name".to_string(), json!("paratask"));
        let payload = Payload::new("function (resolve) { resolve('hi ' + name); }", scope);
        std::fs::write(&path, payload.encode().unwrap()).unwrap();

        let outcome = run_payload_file(&path).await;
        assert_eq!(
            outcome,
            Some(WorkerOutcome::success(TaskValue::new(
                json!("hi paratask"),
                ValueKind::String
            )))
        );
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_missing_payload_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let outcome = run_payload_file(&dir.path().join("gone.json")).await.unwrap();
        assert!(outcome.is_failure());
        assert_eq!(outcome.into_value().as_error().unwrap().name, "PayloadUnavailable");
    }

    #[tokio::test]
    async fn test_corrupt_payload_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("corrupt.json");
        std::fs::write(&path, "{ not json").unwrap();

        let outcome = run_payload_file(&path).await.unwrap();
        assert_eq!(outcome.into_value().as_error().unwrap().name, "PayloadCorrupt");
    }

    #[tokio::test]
    async fn test_worker_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("task.json");
        let payload = Payload::new("(resolve, reject) => reject('Test error')", Map::new());
        std::fs::write(&path, payload.encode().unwrap()).unwrap();

        let (mut to_worker, worker_in) = duplex(4096);
        let (worker_out, from_worker) = duplex(4096);

        let request = MessageEnvelope::new(OrchestratorMessage::ExecutePayload {
            shared_payload_path: path.clone(),
        });
        let mut line = serde_json::to_string(&request).unwrap();
        line.push('\n');
        to_worker.write_all(line.as_bytes()).await.unwrap();

        run_worker_process(LineReader::new(worker_in), LineWriter::new(worker_out))
            .await
            .unwrap();

        let mut reader = LineReader::new(from_worker);
        let reply: MessageEnvelope<WorkerOutcome> = reader.receive().await.unwrap();
        assert_eq!(
            reply.message,
            WorkerOutcome::failure(TaskValue::new(json!("Test error"), ValueKind::String))
        );
    }

    #[tokio::test]
    async fn test_eof_before_request_is_clean() {
        let (to_worker, worker_in) = duplex(64);
        drop(to_worker);
        let (worker_out, _from_worker) = duplex(64);

        assert!(
            run_worker_process(LineReader::new(worker_in), LineWriter::new(worker_out))
                .await
                .is_ok()
        );
    }
}
