//! Sidecar process supervision
//!
//! The supervisor owns at most one sidecar process. Requests are written to
//! the sidecar's stdin; a background collector drains its stdout into a
//! result table keyed by job id. Restarting is the only recovery mechanism:
//! a stop discards the process, the collector, and every collected result.

use async_trait::async_trait;
use calcflow_config::EngineConfig;
use calcflow_ipc::{
    IpcError, JobRequest, JobResult, JsonMap, LineReader, LineWriter, MessageEnvelope,
    SidecarEvent, SidecarMessage,
};
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::engine::JobEngine;
use crate::error::EngineError;

type ResultTable = Arc<RwLock<HashMap<String, JobResult>>>;

/// Pause after a read failure on the result channel
const COLLECTOR_ERROR_BACKOFF: Duration = Duration::from_millis(100);

struct SidecarHandle {
    child: Child,
    pid: u32,
    commands: LineWriter<ChildStdin>,
    collector: JoinHandle<()>,
    stop_collector: watch::Sender<bool>,
}

impl SidecarHandle {
    fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }
}

pub struct EngineSupervisor {
    config: EngineConfig,
    sidecar: Mutex<Option<SidecarHandle>>,
    results: ResultTable,
}

impl EngineSupervisor {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            sidecar: Mutex::new(None),
            results: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Start the sidecar unless a live one already exists
    pub async fn start(&self) -> Result<(), EngineError> {
        let mut slot = self.sidecar.lock().await;
        self.start_locked(&mut slot).await
    }

    /// Stop the sidecar and discard every collected result.
    ///
    /// Calling this while nothing is running does nothing.
    pub async fn stop(&self) -> Result<(), EngineError> {
        let mut slot = self.sidecar.lock().await;
        self.stop_locked(&mut slot).await;
        Ok(())
    }

    pub async fn restart(&self) -> Result<(), EngineError> {
        let mut slot = self.sidecar.lock().await;
        info!("Restarting engine");
        self.stop_locked(&mut slot).await;
        self.start_locked(&mut slot).await
    }

    pub async fn is_running(&self) -> bool {
        let mut slot = self.sidecar.lock().await;
        slot.as_mut().is_some_and(SidecarHandle::is_alive)
    }

    /// OS process id of the current sidecar
    pub async fn pid(&self) -> Option<u32> {
        self.sidecar.lock().await.as_ref().map(|handle| handle.pid)
    }

    /// Queue a job and return its id without waiting for the result
    pub async fn submit(&self, command: &str, payload: JsonMap) -> Result<String, EngineError> {
        let mut slot = self.sidecar.lock().await;
        let Some(handle) = slot.as_mut() else {
            return Err(EngineError::EngineNotRunning);
        };
        if !handle.is_alive() {
            return Err(EngineError::EngineNotRunning);
        }

        let request = JobRequest::new(command, payload);
        let job_id = request.id.clone();
        handle
            .commands
            .send(&MessageEnvelope::new(SidecarMessage::Job(request)))
            .await?;

        debug!(job_id = %job_id, command, "Job submitted");
        Ok(job_id)
    }

    pub async fn get_job(&self, job_id: &str) -> Option<JobResult> {
        self.results.read().await.get(job_id).cloned()
    }

    async fn start_locked(&self, slot: &mut Option<SidecarHandle>) -> Result<(), EngineError> {
        if let Some(handle) = slot.as_mut() {
            if handle.is_alive() {
                debug!(pid = handle.pid, "Engine already running");
                return Ok(());
            }
            warn!(pid = handle.pid, "Sidecar exited unexpectedly, replacing it");
            self.stop_locked(slot).await;
        }

        *slot = Some(self.spawn()?);
        Ok(())
    }

    async fn stop_locked(&self, slot: &mut Option<SidecarHandle>) {
        let Some(mut handle) = slot.take() else {
            debug!("Engine not running, nothing to stop");
            return;
        };
        let pid = handle.pid;
        info!(pid, "Stopping sidecar");

        let _ = handle.stop_collector.send(true);
        if let Err(e) = (&mut handle.collector).await {
            warn!(pid, error = %e, "Result collector ended abnormally");
        }

        if let Err(e) = handle
            .commands
            .send(&MessageEnvelope::new(SidecarMessage::Shutdown))
            .await
        {
            debug!(pid, error = %e, "Could not deliver shutdown sentinel");
        }

        match tokio::time::timeout(self.config.shutdown_grace_period, handle.child.wait()).await {
            Ok(Ok(status)) => info!(pid, %status, "Sidecar exited"),
            Ok(Err(e)) => warn!(pid, error = %e, "Failed to wait for sidecar"),
            Err(_) => {
                warn!(pid, "Sidecar did not exit within the grace period, killing it");
                if let Err(e) = handle.child.start_kill() {
                    warn!(pid, error = %e, "Failed to kill sidecar");
                }
                match tokio::time::timeout(self.config.kill_timeout, handle.child.wait()).await {
                    Ok(Ok(status)) => info!(pid, %status, "Sidecar killed"),
                    Ok(Err(e)) => warn!(pid, error = %e, "Failed to wait for killed sidecar"),
                    Err(_) => error!(pid, "Sidecar still alive after kill"),
                }
            }
        }

        self.results.write().await.clear();
    }

    fn spawn(&self) -> Result<SidecarHandle, EngineError> {
        let program = match &self.config.sidecar_program {
            Some(program) => program.clone(),
            None => std::env::current_exe()?,
        };

        let mut child = Command::new(&program)
            .args(&self.config.sidecar_args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| EngineError::SpawnFailed {
                program: program.display().to_string(),
                source,
            })?;

        let pid = child.id().unwrap_or_default();
        let stdin = child.stdin.take().ok_or(EngineError::MissingPipe("stdin"))?;
        let stdout = child.stdout.take().ok_or(EngineError::MissingPipe("stdout"))?;

        let (stop_collector, stop_rx) = watch::channel(false);
        let collector = tokio::spawn(collect_results(
            LineReader::new(stdout),
            Arc::clone(&self.results),
            stop_rx,
        ));

        info!(pid, program = %program.display(), "Sidecar started");
        Ok(SidecarHandle {
            child,
            pid,
            commands: LineWriter::new(stdin),
            collector,
            stop_collector,
        })
    }
}

/// Drain the sidecar's result channel into the table until told to stop
async fn collect_results(
    mut events: LineReader<ChildStdout>,
    results: ResultTable,
    mut stop: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            changed = stop.changed() => {
                if changed.is_err() || *stop.borrow() {
                    break;
                }
            }
            received = events.receive::<SidecarEvent>() => match received {
                Ok(envelope) => match envelope.message {
                    SidecarEvent::Ready { pid } => debug!(pid, "Sidecar ready"),
                    SidecarEvent::Result(result) => {
                        debug!(job_id = %result.job_id, status = ?result.status, "Job completed");
                        results.write().await.insert(result.job_id.clone(), result);
                    }
                },
                Err(IpcError::ConnectionClosed) => {
                    debug!("Sidecar closed its result channel");
                    break;
                }
                Err(e) if e.is_malformed_frame() => {
                    warn!(error = %e, "Discarding malformed frame from sidecar");
                }
                Err(e) => {
                    warn!(error = %e, "Failed to read from sidecar");
                    tokio::time::sleep(COLLECTOR_ERROR_BACKOFF).await;
                }
            }
        }
    }
    debug!("Result collector stopped");
}

#[async_trait]
impl JobEngine for EngineSupervisor {
    async fn submit(&self, command: &str, payload: JsonMap) -> Result<String, EngineError> {
        EngineSupervisor::submit(self, command, payload).await
    }

    async fn get_job(&self, job_id: &str) -> Option<JobResult> {
        EngineSupervisor::get_job(self, job_id).await
    }

    async fn restart(&self) -> Result<(), EngineError> {
        EngineSupervisor::restart(self).await
    }

    async fn is_running(&self) -> bool {
        EngineSupervisor::is_running(self).await
    }
}
