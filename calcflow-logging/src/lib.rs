//! Logging setup for Calcflow
//!
//! The coordinator logs according to [`LoggingConfig`]; the sidecar always
//! logs to stderr because its stdout carries job results.

pub mod init;

pub use calcflow_config::{LogFormat, LogLevel, LogTarget, LoggingConfig};
pub use init::{build_env_filter, init_logging, init_sidecar_logging};
