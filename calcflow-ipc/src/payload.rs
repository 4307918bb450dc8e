//! Typed payloads for the known job commands

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;
use std::path::Path;

use crate::error::IpcError;
use crate::protocol::JobCommand;
use crate::JsonMap;

/// Scalar value assigned to or read from a worksheet variable
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WorksheetValue {
    Number(f64),
    Text(String),
}

impl WorksheetValue {
    /// Interpret a loose JSON value as a worksheet scalar.
    ///
    /// Booleans map to 1/0, `null` yields nothing, and composite values are
    /// carried as their JSON text.
    pub fn from_json(value: &JsonValue) -> Option<Self> {
        match value {
            JsonValue::Null => None,
            JsonValue::Bool(flag) => Some(WorksheetValue::Number(if *flag { 1.0 } else { 0.0 })),
            JsonValue::Number(number) => number.as_f64().map(WorksheetValue::Number),
            JsonValue::String(text) => Some(WorksheetValue::Text(text.clone())),
            other => Some(WorksheetValue::Text(other.to_string())),
        }
    }

    pub fn to_json(&self) -> JsonValue {
        match self {
            WorksheetValue::Number(number) => serde_json::Number::from_f64(*number)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
            WorksheetValue::Text(text) => JsonValue::String(text.clone()),
        }
    }
}

impl fmt::Display for WorksheetValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorksheetValue::Number(number) => write!(f, "{}", number),
            WorksheetValue::Text(text) => f.write_str(text),
        }
    }
}

/// One named input assignment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputSpec {
    pub alias: String,
    pub value: WorksheetValue,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub units: Option<String>,
}

impl InputSpec {
    pub fn new(alias: impl Into<String>, value: WorksheetValue) -> Self {
        Self {
            alias: alias.into(),
            value,
            units: None,
        }
    }

    pub fn with_units(mut self, units: impl Into<String>) -> Self {
        self.units = Some(units.into());
        self
    }

    /// Build an input from a row entry.
    ///
    /// The entry is either a bare scalar or an object of the form
    /// `{"value": ..., "units": "..."}`.
    pub fn from_entry(alias: &str, entry: &JsonValue) -> Option<Self> {
        if let JsonValue::Object(fields) = entry {
            if let Some(inner) = fields.get("value") {
                let value = WorksheetValue::from_json(inner)?;
                let units = fields
                    .get("units")
                    .and_then(JsonValue::as_str)
                    .map(str::to_string);
                return Some(Self {
                    alias: alias.to_string(),
                    value,
                    units,
                });
            }
        }

        WorksheetValue::from_json(entry).map(|value| Self::new(alias, value))
    }

    /// Units to apply, or `None` to keep the worksheet's native unit
    pub fn explicit_units(&self) -> Option<&str> {
        self.units.as_deref().filter(|units| !units.trim().is_empty())
    }
}

/// Description of a declared worksheet input or output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableDescriptor {
    pub alias: String,
    pub name: String,
    #[serde(default)]
    pub units: String,
}

impl VariableDescriptor {
    pub fn named(alias: impl Into<String>) -> Self {
        let alias = alias.into();
        Self {
            name: alias.clone(),
            alias,
            units: String::new(),
        }
    }
}

/// Export formats accepted by `save_as`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Pdf,
    Mcdx,
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Pdf => "pdf",
            ExportFormat::Mcdx => "mcdx",
        }
    }

    /// Infer the format from a target file's extension
    pub fn from_path(path: impl AsRef<Path>) -> Option<Self> {
        let extension = path.as_ref().extension()?.to_str()?.to_ascii_lowercase();
        match extension.as_str() {
            "pdf" => Some(ExportFormat::Pdf),
            "mcdx" => Some(ExportFormat::Mcdx),
            _ => None,
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExportFormat::Pdf => f.write_str("PDF"),
            ExportFormat::Mcdx => f.write_str("MCDX"),
        }
    }
}

/// Typed view over a command's keyed payload
pub trait JobPayload: Serialize + DeserializeOwned {
    const COMMAND: JobCommand;

    fn into_payload(self) -> Result<JsonMap, IpcError> {
        match serde_json::to_value(self)? {
            JsonValue::Object(map) => Ok(map),
            other => Err(IpcError::InvalidPayload {
                command: Self::COMMAND.to_string(),
                reason: format!("expected an object, got {}", other),
            }),
        }
    }

    fn from_payload(payload: &JsonMap) -> Result<Self, IpcError> {
        serde_json::from_value(JsonValue::Object(payload.clone())).map_err(|e| {
            IpcError::InvalidPayload {
                command: Self::COMMAND.to_string(),
                reason: e.to_string(),
            }
        })
    }
}

/// Payload of `load_file`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadFilePayload {
    pub path: String,
}

impl JobPayload for LoadFilePayload {
    const COMMAND: JobCommand = JobCommand::LoadFile;
}

/// Payload of `get_metadata`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetadataPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl JobPayload for MetadataPayload {
    const COMMAND: JobCommand = JobCommand::GetMetadata;
}

/// Payload of `calculate_job`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CalculatePayload {
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub inputs: Vec<InputSpec>,
}

impl JobPayload for CalculatePayload {
    const COMMAND: JobCommand = JobCommand::CalculateJob;
}

/// Payload of `save_as`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaveAsPayload {
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<ExportFormat>,
}

impl SaveAsPayload {
    /// Explicit format, falling back to the target's extension
    pub fn resolved_format(&self) -> Option<ExportFormat> {
        self.format.or_else(|| ExportFormat::from_path(&self.path))
    }
}

impl JobPayload for SaveAsPayload {
    const COMMAND: JobCommand = JobCommand::SaveAs;
}
