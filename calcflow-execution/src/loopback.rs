//! In-process worksheet service without an external automation target.
//!
//! Every assigned input is declared as both an input and an output, and
//! recalculation copies the current inputs to the outputs. Exports write a
//! JSON snapshot of the worksheet's values to the target path.

use calcflow_ipc::{ExportFormat, VariableDescriptor, WorksheetValue};
use serde_json::json;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::worksheet::{ServiceVersion, WorksheetError, WorksheetService};

#[derive(Debug, Clone)]
struct Variable {
    value: WorksheetValue,
    units: Option<String>,
}

#[derive(Debug)]
pub struct LoopbackWorksheet {
    version: ServiceVersion,
    connected: bool,
    active: Option<PathBuf>,
    inputs: BTreeMap<String, Variable>,
    outputs: BTreeMap<String, Variable>,
}

impl LoopbackWorksheet {
    pub fn new() -> Self {
        Self::with_version(ServiceVersion::new(10, 0))
    }

    /// Pretend to be a specific automation target version
    pub fn with_version(version: ServiceVersion) -> Self {
        Self {
            version,
            connected: false,
            active: None,
            inputs: BTreeMap::new(),
            outputs: BTreeMap::new(),
        }
    }

    fn require_connected(&self) -> Result<(), WorksheetError> {
        if self.connected {
            Ok(())
        } else {
            Err(WorksheetError::NotConnected)
        }
    }

    fn require_open(&self) -> Result<&Path, WorksheetError> {
        self.require_connected()?;
        self.active.as_deref().ok_or(WorksheetError::NoWorksheetOpen)
    }

    fn describe(variables: &BTreeMap<String, Variable>) -> Vec<VariableDescriptor> {
        variables
            .iter()
            .map(|(alias, variable)| VariableDescriptor {
                alias: alias.clone(),
                name: alias.clone(),
                units: variable.units.clone().unwrap_or_default(),
            })
            .collect()
    }
}

impl Default for LoopbackWorksheet {
    fn default() -> Self {
        Self::new()
    }
}

impl WorksheetService for LoopbackWorksheet {
    fn connect(&mut self) -> Result<ServiceVersion, WorksheetError> {
        self.connected = true;
        Ok(self.version)
    }

    fn version(&self) -> Option<ServiceVersion> {
        self.connected.then_some(self.version)
    }

    fn open(&mut self, path: &Path) -> Result<(), WorksheetError> {
        self.require_connected()?;
        if !path.is_file() {
            return Err(WorksheetError::FileNotFound(path.to_path_buf()));
        }

        if self.active.as_deref() != Some(path) {
            debug!(path = %path.display(), "Opening worksheet");
            self.inputs.clear();
            self.outputs.clear();
            self.active = Some(path.to_path_buf());
        }
        Ok(())
    }

    fn list_inputs(&self) -> Result<Vec<VariableDescriptor>, WorksheetError> {
        self.require_open()?;
        Ok(Self::describe(&self.inputs))
    }

    fn list_outputs(&self) -> Result<Vec<VariableDescriptor>, WorksheetError> {
        self.require_open()?;
        // Declared outputs mirror the inputs, even before the first recalculation
        Ok(Self::describe(&self.inputs))
    }

    fn set_real_input(
        &mut self,
        alias: &str,
        value: f64,
        units: Option<&str>,
    ) -> Result<(), WorksheetError> {
        self.require_open()?;
        let units = match units {
            Some(units) => Some(units.to_string()),
            None => self.inputs.get(alias).and_then(|v| v.units.clone()),
        };
        self.inputs.insert(
            alias.to_string(),
            Variable {
                value: WorksheetValue::Number(value),
                units,
            },
        );
        Ok(())
    }

    fn set_string_input(&mut self, alias: &str, value: &str) -> Result<(), WorksheetError> {
        self.require_open()?;
        self.inputs.insert(
            alias.to_string(),
            Variable {
                value: WorksheetValue::Text(value.to_string()),
                units: None,
            },
        );
        Ok(())
    }

    fn recalculate(&mut self) -> Result<(), WorksheetError> {
        self.require_open()?;
        self.outputs = self.inputs.clone();
        Ok(())
    }

    fn get_output(&self, alias: &str) -> Result<WorksheetValue, WorksheetError> {
        self.require_open()?;
        self.outputs
            .get(alias)
            .map(|variable| variable.value.clone())
            .ok_or_else(|| WorksheetError::UnknownAlias(alias.to_string()))
    }

    fn save_as(&mut self, path: &Path, format: ExportFormat) -> Result<(), WorksheetError> {
        let source = self.require_open()?.to_path_buf();

        let values: serde_json::Map<String, serde_json::Value> = self
            .outputs
            .iter()
            .map(|(alias, variable)| (alias.clone(), variable.value.to_json()))
            .collect();
        let snapshot = json!({
            "source": source.display().to_string(),
            "format": format,
            "values": values,
        });

        let rendered = serde_json::to_vec_pretty(&snapshot)
            .map_err(|e| WorksheetError::Service(e.to_string()))?;
        std::fs::write(path, rendered).map_err(|e| {
            WorksheetError::Service(format!("Failed to write {}: {}", path.display(), e))
        })?;
        Ok(())
    }
}
