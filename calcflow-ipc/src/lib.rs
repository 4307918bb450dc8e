//! Inter-process communication for Calcflow
//!
//! This crate provides the job protocol and transport abstractions used for
//! communication between the engine supervisor and its worksheet sidecar.

pub mod error;
pub mod payload;
pub mod protocol;
pub mod transport;

// Re-export commonly used types
pub use error::IpcError;
pub use payload::{
    CalculatePayload, ExportFormat, InputSpec, JobPayload, LoadFilePayload, MetadataPayload,
    SaveAsPayload, VariableDescriptor, WorksheetValue,
};
pub use protocol::{
    JobCommand, JobRequest, JobResult, JobStatus, MessageEnvelope, SidecarEvent, SidecarMessage,
    IPC_PROTOCOL_VERSION, UNKNOWN_JOB_ID,
};
pub use transport::{IpcTransport, LineReader, LineTransport, LineWriter, StdioTransport};

/// Keyed map carried by job payloads and job result data
pub type JsonMap = serde_json::Map<String, serde_json::Value>;
