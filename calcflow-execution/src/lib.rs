//! Calcflow execution engine
//!
//! This crate hosts both ends of the sidecar boundary: the runner that drives
//! a worksheet service inside the sidecar process, and the supervisor that
//! spawns, feeds, and restarts that process from the coordinator.

pub mod engine;
pub mod error;
pub mod loopback;
pub mod sidecar;
pub mod supervisor;
pub mod worksheet;

// Re-export main types
pub use engine::JobEngine;
pub use error::EngineError;
pub use loopback::LoopbackWorksheet;
pub use sidecar::{serve_stdio, SidecarRunner};
pub use supervisor::EngineSupervisor;
pub use worksheet::{ServiceVersion, WorksheetError, WorksheetService};
