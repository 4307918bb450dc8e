//! Job protocol definitions and message types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::JsonMap;

/// IPC protocol version for compatibility checking
pub const IPC_PROTOCOL_VERSION: u32 = 1;

/// Job id used for results that cannot be attributed to a request
pub const UNKNOWN_JOB_ID: &str = "unknown";

/// Commands understood by the sidecar
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobCommand {
    Ping,
    Connect,
    LoadFile,
    GetMetadata,
    CalculateJob,
    SaveAs,
}

impl JobCommand {
    pub const ALL: [JobCommand; 6] = [
        JobCommand::Ping,
        JobCommand::Connect,
        JobCommand::LoadFile,
        JobCommand::GetMetadata,
        JobCommand::CalculateJob,
        JobCommand::SaveAs,
    ];

    /// Wire tag of the command
    pub fn as_str(&self) -> &'static str {
        match self {
            JobCommand::Ping => "ping",
            JobCommand::Connect => "connect",
            JobCommand::LoadFile => "load_file",
            JobCommand::GetMetadata => "get_metadata",
            JobCommand::CalculateJob => "calculate_job",
            JobCommand::SaveAs => "save_as",
        }
    }
}

impl fmt::Display for JobCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobCommand {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobCommand::ALL
            .into_iter()
            .find(|command| command.as_str() == s)
            .ok_or_else(|| format!("Unknown command: {}", s))
    }
}

/// A unit of work submitted to the sidecar.
///
/// `command` is kept as a plain string so that commands the sidecar does not
/// know can still travel over the wire and be reported back as errors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRequest {
    pub id: String,
    pub command: String,
    #[serde(default)]
    pub payload: JsonMap,
}

impl JobRequest {
    /// Create a request with a fresh id
    pub fn new(command: impl Into<String>, payload: JsonMap) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            command: command.into(),
            payload,
        }
    }

    /// Parse the command tag into a known command
    pub fn known_command(&self) -> Option<JobCommand> {
        self.command.parse().ok()
    }
}

/// Outcome status of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Success,
    Error,
}

/// Result produced by the sidecar for exactly one request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    pub job_id: String,
    pub status: JobStatus,
    #[serde(default)]
    pub data: JsonMap,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl JobResult {
    /// Create a successful result
    pub fn success(job_id: impl Into<String>, data: JsonMap) -> Self {
        Self {
            job_id: job_id.into(),
            status: JobStatus::Success,
            data,
            error_message: None,
        }
    }

    /// Create a failed result
    pub fn error(job_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            status: JobStatus::Error,
            data: JsonMap::new(),
            error_message: Some(message.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == JobStatus::Success
    }
}

/// Messages sent from the supervisor to the sidecar
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SidecarMessage {
    /// Execute a job
    Job(JobRequest),

    /// Exit sentinel
    Shutdown,
}

/// Messages sent from the sidecar to the supervisor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SidecarEvent {
    /// Sidecar is up and reading requests
    Ready { pid: u32 },

    /// Result of a dequeued job
    Result(JobResult),
}

/// Message envelope for all IPC communications
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageEnvelope<T> {
    pub protocol_version: u32,
    pub timestamp: DateTime<Utc>,
    pub message: T,
}

impl<T> MessageEnvelope<T> {
    /// Create a new message envelope
    pub fn new(message: T) -> Self {
        Self {
            protocol_version: IPC_PROTOCOL_VERSION,
            timestamp: Utc::now(),
            message,
        }
    }

    /// Check if protocol version is compatible
    pub fn is_compatible(&self) -> bool {
        self.protocol_version == IPC_PROTOCOL_VERSION
    }
}
