//! Shared data model, configuration, and cross-cutting interfaces for the
//! climate-document ingestion and retrieval system.

pub mod cache;
pub mod config;
pub mod error;
pub mod events;
pub mod traits;
pub mod types;

pub use config::*;
pub use error::*;
pub use types::*;

pub use cache::Cache as SimpleCache;
pub use events::{Event, EventPublisher as EventPublisherSimple, EventSubscriber};
pub use traits::{Cache, EventPublisher, HealthCheck, HealthStatus, Repository, Transaction};
