//! IPC transport implementations
//!
//! Messages are newline-delimited JSON envelopes. Readers and writers are
//! split so the orchestrator can own a child's stdin and stdout in separate
//! tasks.

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::trace;

use crate::error::IpcError;
use crate::protocol::{MessageEnvelope, IPC_PROTOCOL_VERSION};

/// Writing half: one JSON envelope per line
pub struct LineWriter<W> {
    inner: Option<W>,
}

impl<W: AsyncWrite + Unpin + Send> LineWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner: Some(inner) }
    }

    pub async fn send<T: Serialize + Sync>(
        &mut self,
        message: &MessageEnvelope<T>,
    ) -> Result<(), IpcError> {
        let writer = self
            .inner
            .as_mut()
            .ok_or_else(|| {
                IpcError::IoError(std::io::Error::new(
                    std::io::ErrorKind::BrokenPipe,
                    "writer already closed",
                ))
            })?;

        let mut json = serde_json::to_string(message)
            .map_err(|e| IpcError::SerializationError(e.to_string()))?;
        json.push('\n');
        trace!(bytes = json.len(), "Sending IPC message");

        writer.write_all(json.as_bytes()).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Flush and drop the underlying writer, signalling EOF to the peer
    pub async fn close(&mut self) -> Result<(), IpcError> {
        if let Some(mut writer) = self.inner.take() {
            writer.shutdown().await?;
        }
        Ok(())
    }
}

/// Reading half with a persistent line buffer
pub struct LineReader<R> {
    inner: BufReader<R>,
    line: String,
}

impl<R: AsyncRead + Unpin + Send> LineReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner: BufReader::new(inner),
            line: String::new(),
        }
    }

    /// Read the next envelope, skipping blank lines.
    /// End of stream is reported as `ConnectionClosed`.
    pub async fn receive<T: DeserializeOwned>(&mut self) -> Result<MessageEnvelope<T>, IpcError> {
        loop {
            self.line.clear();
            let read = self.inner.read_line(&mut self.line).await?;
            if read == 0 {
                return Err(IpcError::ConnectionClosed);
            }

            let trimmed = self.line.trim();
            if trimmed.is_empty() {
                continue;
            }

            let envelope: MessageEnvelope<T> = serde_json::from_str(trimmed)
                .map_err(|e| IpcError::DeserializationError(e.to_string()))?;

            // Check protocol version compatibility
            if !envelope.is_compatible() {
                return Err(IpcError::ProtocolVersionMismatch {
                    expected: IPC_PROTOCOL_VERSION,
                    actual: envelope.protocol_version,
                });
            }

            return Ok(envelope);
        }
    }
}

/// Bidirectional line transport over any reader/writer pair
pub struct LineTransport<R, W> {
    reader: LineReader<R>,
    writer: LineWriter<W>,
}

impl<R, W> LineTransport<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader: LineReader::new(reader),
            writer: LineWriter::new(writer),
        }
    }

    pub fn into_split(self) -> (LineReader<R>, LineWriter<W>) {
        (self.reader, self.writer)
    }
}

/// Stdin/Stdout IPC transport used inside worker processes
pub type StdioTransport = LineTransport<tokio::io::Stdin, tokio::io::Stdout>;

impl LineTransport<tokio::io::Stdin, tokio::io::Stdout> {
    /// Create a new stdio transport
    pub fn stdio() -> Self {
        Self::new(tokio::io::stdin(), tokio::io::stdout())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{OrchestratorMessage, TaskValue, WorkerOutcome};
    use std::path::PathBuf;
    use tokio::io::{duplex, AsyncWriteExt};

    #[tokio::test]
    async fn test_duplex_exchange() {
        let (orchestrator_io, worker_io) = duplex(4096);
        let (o_read, o_write) = tokio::io::split(orchestrator_io);
        let (w_read, w_write) = tokio::io::split(worker_io);

        let (mut o_reader, mut o_writer) = LineTransport::new(o_read, o_write).into_split();
        let (mut w_reader, mut w_writer) = LineTransport::new(w_read, w_write).into_split();

        let request = OrchestratorMessage::ExecutePayload {
            shared_payload_path: PathBuf::from("/tmp/payload.json"),
        };
        o_writer.send(&MessageEnvelope::new(request.clone())).await.unwrap();

        let received: MessageEnvelope<OrchestratorMessage> = w_reader.receive().await.unwrap();
        assert_eq!(received.message, request);

        let outcome = WorkerOutcome::success(TaskValue::undefined());
        w_writer.send(&MessageEnvelope::new(outcome.clone())).await.unwrap();
        w_writer.close().await.unwrap();
        assert!(w_writer.send(&MessageEnvelope::new(outcome.clone())).await.unwrap_err().is_broken_pipe());

        let reply: MessageEnvelope<WorkerOutcome> = o_reader.receive().await.unwrap();
        assert_eq!(reply.message, outcome);

        let closed = o_reader.receive::<WorkerOutcome>().await;
        assert!(matches!(closed, Err(IpcError::ConnectionClosed)));
    }

    #[tokio::test]
    async fn test_version_mismatch_and_blank_lines() {
        let (mut tx, rx) = duplex(1024);
        let mut reader = LineReader::new(rx);

        tx.write_all(b"\n\n{\"protocol_version\":99,\"timestamp\":\"2024-01-01T00:00:00Z\",\"message\":{\"result_kind\":\"Null\"}}\n")
            .await
            .unwrap();

        let err = reader.receive::<WorkerOutcome>().await.unwrap_err();
        assert!(matches!(
            err,
            IpcError::ProtocolVersionMismatch { expected: 1, actual: 99 }
        ));
    }

    #[tokio::test]
    async fn test_garbage_line_is_deserialization_error() {
        let (mut tx, rx) = duplex(1024);
        let mut reader = LineReader::new(rx);
        tx.write_all(b"hello from a stray print\n").await.unwrap();

        let err = reader.receive::<WorkerOutcome>().await.unwrap_err();
        assert!(matches!(err, IpcError::DeserializationError(_)));
    }
}
