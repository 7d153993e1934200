//! Observability plumbing shared by the ingestion and query-serving
//! binaries: tracing/OpenTelemetry initialization and correlation-ID
//! propagation across a request's stages.

pub mod tracing_setup;
pub mod correlation;

pub use tracing_setup::*;
pub use correlation::*;

use thiserror::Error;

/// Observability errors
#[derive(Error, Debug)]
pub enum ObservabilityError {
    #[error("Tracing initialization failed: {0}")]
    TracingInit(String),

    #[error("Metrics error: {0}")]
    Metrics(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

pub type Result<T> = std::result::Result<T, ObservabilityError>;
