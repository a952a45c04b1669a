//! Inter-process communication for paratask
//!
//! This crate provides the wire protocol, the payload codec and the transport
//! abstractions used between the orchestrator and its worker processes.

pub mod error;
pub mod payload;
pub mod protocol;
pub mod transport;

// Re-export commonly used types
pub use error::IpcError;
pub use payload::Payload;
pub use protocol::{
    MessageEnvelope, OrchestratorMessage, RemoteError, TaskValue, ValueKind, WorkerOutcome,
    IPC_PROTOCOL_VERSION,
};
pub use transport::{LineReader, LineTransport, LineWriter, StdioTransport};
