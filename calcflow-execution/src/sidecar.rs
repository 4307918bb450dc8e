//! The sidecar process loop
//!
//! The sidecar owns one worksheet service for its whole lifetime and executes
//! jobs strictly one at a time, in the order they arrive on stdin. Job
//! failures and handler panics are reported as error results; only the
//! shutdown sentinel or the coordinator closing stdin ends the loop.

use anyhow::{anyhow, bail, Context, Result};
use calcflow_config::SidecarConfig;
use calcflow_ipc::{
    CalculatePayload, ExportFormat, IpcError, IpcTransport, JobCommand, JobPayload, JobRequest,
    JobResult, JsonMap, LoadFilePayload, MessageEnvelope, MetadataPayload, SaveAsPayload,
    SidecarEvent, SidecarMessage, StdioTransport, WorksheetValue, UNKNOWN_JOB_ID,
};
use serde_json::{json, Value as JsonValue};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

use crate::worksheet::{WorksheetError, WorksheetService};

pub struct SidecarRunner<S> {
    service: S,
    config: SidecarConfig,
    connected: bool,
    active_file: Option<PathBuf>,
}

impl<S: WorksheetService> SidecarRunner<S> {
    pub fn new(service: S, config: SidecarConfig) -> Self {
        Self {
            service,
            config,
            connected: false,
            active_file: None,
        }
    }

    /// Worksheet the next path-less job will run against
    pub fn active_file(&self) -> Option<&Path> {
        self.active_file.as_deref()
    }

    /// Serve jobs until the shutdown sentinel arrives or the channel closes
    pub async fn run<T: IpcTransport>(&mut self, transport: &mut T) -> Result<()> {
        let pid = std::process::id();
        self.emit(transport, SidecarEvent::Ready { pid }).await;
        info!(pid, "Sidecar ready");

        loop {
            let received = match tokio::time::timeout(
                self.config.receive_timeout,
                transport.receive::<SidecarMessage>(),
            )
            .await
            {
                Ok(received) => received,
                Err(_) => continue,
            };

            match received {
                Ok(envelope) => match envelope.message {
                    SidecarMessage::Shutdown => {
                        info!("Shutdown requested");
                        break;
                    }
                    SidecarMessage::Job(request) => {
                        let result = self.execute(&request);
                        self.emit(transport, SidecarEvent::Result(result)).await;
                    }
                },
                Err(IpcError::ConnectionClosed) => {
                    info!("Command channel closed, exiting");
                    break;
                }
                Err(e) if e.is_malformed_frame() => {
                    warn!(error = %e, "Received malformed message");
                    let result = JobResult::error(UNKNOWN_JOB_ID, format!("Invalid message: {}", e));
                    self.emit(transport, SidecarEvent::Result(result)).await;
                }
                Err(e) => {
                    error!(error = %e, "Sidecar loop error");
                    tokio::time::sleep(self.config.error_backoff).await;
                }
            }
        }

        if let Err(e) = transport.close().await {
            debug!(error = %e, "Failed to close result channel");
        }
        Ok(())
    }

    async fn emit<T: IpcTransport>(&self, transport: &mut T, event: SidecarEvent) {
        if let Err(e) = transport.send(&MessageEnvelope::new(event)).await {
            error!(error = %e, "Failed to send event to coordinator");
            tokio::time::sleep(self.config.error_backoff).await;
        }
    }

    /// Execute one job and convert every outcome into a result
    pub fn execute(&mut self, request: &JobRequest) -> JobResult {
        debug!(job_id = %request.id, command = %request.command, "Executing job");

        match panic::catch_unwind(AssertUnwindSafe(|| self.dispatch(request))) {
            Ok(Ok(data)) => JobResult::success(&request.id, data),
            Ok(Err(e)) => {
                warn!(job_id = %request.id, command = %request.command, error = %e, "Job failed");
                JobResult::error(&request.id, format!("{:?}", e))
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!(job_id = %request.id, command = %request.command, "Job handler panicked: {}", message);
                JobResult::error(&request.id, format!("Job handler panicked: {}", message))
            }
        }
    }

    fn dispatch(&mut self, request: &JobRequest) -> Result<JsonMap> {
        let command = request
            .known_command()
            .ok_or_else(|| anyhow!("Unknown command: {}", request.command))?;

        match command {
            JobCommand::Ping => Ok(request.payload.clone()),
            JobCommand::Connect => self.connect(),
            JobCommand::LoadFile => self.load_file(LoadFilePayload::from_payload(&request.payload)?),
            JobCommand::GetMetadata => {
                self.get_metadata(MetadataPayload::from_payload(&request.payload)?)
            }
            JobCommand::CalculateJob => {
                self.calculate(CalculatePayload::from_payload(&request.payload)?)
            }
            JobCommand::SaveAs => self.save_as(SaveAsPayload::from_payload(&request.payload)?),
        }
    }

    fn connect(&mut self) -> Result<JsonMap> {
        let version = self
            .service
            .connect()
            .context("Failed to connect to the worksheet service")?;
        self.connected = true;
        info!(%version, "Connected to worksheet service");

        Ok(object(json!({
            "connected": true,
            "version": version.to_string(),
        })))
    }

    fn load_file(&mut self, payload: LoadFilePayload) -> Result<JsonMap> {
        self.require_connected()?;
        let path = PathBuf::from(&payload.path);
        self.open(&path)?;

        Ok(object(json!({
            "loaded": true,
            "path": payload.path,
        })))
    }

    fn get_metadata(&mut self, payload: MetadataPayload) -> Result<JsonMap> {
        if !self.connected {
            self.connect()?;
        }
        if let Some(path) = non_empty(payload.path.as_deref()) {
            self.open(Path::new(path))?;
        }

        let inputs = self.service.list_inputs().context("Failed to list inputs")?;
        let outputs = self.service.list_outputs().context("Failed to list outputs")?;

        Ok(object(json!({
            "path": self.active_file.as_ref().map(|p| p.display().to_string()),
            "inputs": inputs,
            "outputs": outputs,
        })))
    }

    fn calculate(&mut self, payload: CalculatePayload) -> Result<JsonMap> {
        self.require_connected()?;

        if let Some(path) = non_empty(payload.path.as_deref()) {
            let path = Path::new(path);
            if self.active_file.as_deref() == Some(path) {
                debug!(path = %path.display(), "Worksheet already active");
            } else {
                self.open(path)?;
            }
        }

        for input in &payload.inputs {
            let assigned = match &input.value {
                WorksheetValue::Number(value) => {
                    self.service
                        .set_real_input(&input.alias, *value, input.explicit_units())
                }
                WorksheetValue::Text(text) => self.service.set_string_input(&input.alias, text),
            };
            assigned.with_context(|| format!("Failed to set input '{}'", input.alias))?;
        }

        self.service.recalculate().context("Recalculation failed")?;

        let mut data = JsonMap::new();
        for output in self.service.list_outputs().context("Failed to list outputs")? {
            // A single unreadable output must not hide the others
            let value = match self.service.get_output(&output.alias) {
                Ok(value) => value.to_json(),
                Err(e) => JsonValue::String(format!("Error: {}", e)),
            };
            data.insert(output.alias, value);
        }
        Ok(data)
    }

    fn save_as(&mut self, payload: SaveAsPayload) -> Result<JsonMap> {
        self.require_connected()?;

        let format = payload.resolved_format().ok_or_else(|| {
            WorksheetError::UnsupportedExportFormat(format!(
                "cannot determine the export format of '{}'",
                payload.path
            ))
        })?;

        if format == ExportFormat::Pdf {
            let version = self.service.version().ok_or(WorksheetError::NotConnected)?;
            if version.major < self.config.min_pdf_major_version {
                bail!(WorksheetError::UnsupportedExportFormat(format!(
                    "PDF export requires worksheet service version {} or later, connected to {}",
                    self.config.min_pdf_major_version, version
                )));
            }
        }

        self.service
            .save_as(Path::new(&payload.path), format)
            .with_context(|| format!("Failed to export {} to {}", format, payload.path))?;

        Ok(object(json!({
            "saved": true,
            "path": payload.path,
            "format": format,
        })))
    }

    fn require_connected(&self) -> Result<(), WorksheetError> {
        if self.connected {
            Ok(())
        } else {
            Err(WorksheetError::NotConnected)
        }
    }

    fn open(&mut self, path: &Path) -> Result<(), WorksheetError> {
        if !path.exists() {
            return Err(WorksheetError::FileNotFound(path.to_path_buf()));
        }
        self.service.open(path)?;
        self.active_file = Some(path.to_path_buf());
        Ok(())
    }
}

/// Run a sidecar over this process's stdin and stdout
pub async fn serve_stdio<S: WorksheetService>(service: S, config: SidecarConfig) -> Result<()> {
    let mut transport = StdioTransport::stdio();
    let mut runner = SidecarRunner::new(service, config);
    runner.run(&mut transport).await
}

fn object(value: JsonValue) -> JsonMap {
    match value {
        JsonValue::Object(map) => map,
        _ => JsonMap::new(),
    }
}

fn non_empty(path: Option<&str>) -> Option<&str> {
    path.filter(|p| !p.trim().is_empty())
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
