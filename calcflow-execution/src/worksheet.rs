//! The worksheet service capability driven by the sidecar

use calcflow_ipc::{ExportFormat, VariableDescriptor, WorksheetValue};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Version reported by the automation target on connect
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ServiceVersion {
    pub major: u32,
    pub minor: u32,
}

impl ServiceVersion {
    pub fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }
}

impl fmt::Display for ServiceVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Failures reported by a worksheet service
#[derive(Error, Debug)]
pub enum WorksheetError {
    #[error("Not connected to the worksheet service")]
    NotConnected,

    #[error("Connection to the worksheet service was lost: {0}")]
    ConnectionLost(String),

    #[error("File not found: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("No worksheet is open")]
    NoWorksheetOpen,

    #[error("Unknown alias: {0}")]
    UnknownAlias(String),

    #[error("Unsupported export format: {0}")]
    UnsupportedExportFormat(String),

    #[error("Worksheet service error: {0}")]
    Service(String),
}

/// Synchronous, stateful automation of one worksheet at a time.
///
/// Implementations are not re-entrant. The sidecar owns exactly one instance
/// and calls it from a single task.
pub trait WorksheetService: Send {
    /// Establish the connection and report the target's version
    fn connect(&mut self) -> Result<ServiceVersion, WorksheetError>;

    /// Version of the connected target, if connected
    fn version(&self) -> Option<ServiceVersion>;

    /// Make `path` the active worksheet
    fn open(&mut self, path: &Path) -> Result<(), WorksheetError>;

    fn list_inputs(&self) -> Result<Vec<VariableDescriptor>, WorksheetError>;

    fn list_outputs(&self) -> Result<Vec<VariableDescriptor>, WorksheetError>;

    /// Assign a numeric input; `None` keeps the worksheet's native unit
    fn set_real_input(
        &mut self,
        alias: &str,
        value: f64,
        units: Option<&str>,
    ) -> Result<(), WorksheetError>;

    fn set_string_input(&mut self, alias: &str, value: &str) -> Result<(), WorksheetError>;

    fn recalculate(&mut self) -> Result<(), WorksheetError>;

    fn get_output(&self, alias: &str) -> Result<WorksheetValue, WorksheetError>;

    /// Export the active worksheet
    fn save_as(&mut self, path: &Path, format: ExportFormat) -> Result<(), WorksheetError>;
}
