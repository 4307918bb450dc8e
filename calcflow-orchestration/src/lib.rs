//! Calcflow orchestration
//!
//! Batch and workflow executors drive a [`JobEngine`] through
//! submit-and-poll. They never touch the sidecar directly, so any engine
//! implementation can back them.
//!
//! [`JobEngine`]: calcflow_execution::JobEngine

pub mod batch;
pub mod error;
pub mod export;
pub mod poll;
pub mod workflow;

pub use batch::{BatchExecutor, BatchRequest, BatchRow, BatchState, BatchStatus, RowStage, RowStatus};
pub use error::OrchestrationError;
pub use poll::JobPoller;
pub use workflow::{
    FileMapping, WorkflowConfig, WorkflowExecutor, WorkflowFile, WorkflowState, WorkflowStatus,
    WorkflowStatusReport,
};
