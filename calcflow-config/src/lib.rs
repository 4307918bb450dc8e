//! Domain-driven configuration management for Calcflow
//!
//! Configuration is split by functional domain (engine, sidecar,
//! orchestration, logging), with validation, defaults, and environment
//! variable overrides.

pub mod error;
pub mod loader;
pub mod validation;

// Domain-specific configuration modules
pub mod domains;

// Re-export main types
pub use error::{ConfigError, ConfigResult};
pub use loader::ConfigLoader;
pub use validation::Validatable;

// Re-export domain configurations
pub use domains::{
    engine::EngineConfig,
    logging::{LogFormat, LogLevel, LogTarget, LoggingConfig},
    orchestration::{BatchSettings, OrchestrationConfig, WorkflowSettings},
    sidecar::SidecarConfig,
    CalcflowConfig,
};

// Re-export utilities
pub use domains::utils::{serde_duration, serde_duration_ms};
