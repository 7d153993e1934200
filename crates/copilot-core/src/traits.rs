//! Cross-cutting interfaces shared by store adapters, independent of which
//! concrete backend implements them (§9: "Global singletons ... become
//! process-wide handles ... passed explicitly to every component").

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

/// A connection must auto-recover: a lost connection detected at operation
/// time triggers one reconnect attempt before surfacing an error (§4.7, §4.8).
#[async_trait]
pub trait HealthCheck: Send + Sync {
    async fn health_check(&self) -> HealthStatus;
}

/// Generic cache trait for key-value storage operations.
#[async_trait]
pub trait Cache: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, Self::Error>;

    async fn set<T: Serialize + Send + Sync>(&self, key: &str, value: &T) -> Result<(), Self::Error>
    where
        Self: Sync;

    async fn delete(&self, key: &str) -> Result<(), Self::Error>;

    async fn clear(&self) -> Result<(), Self::Error>;
}

/// A generic CRUD repository over one record type, keyed by a string id.
#[async_trait]
pub trait Repository<T>: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    async fn get(&self, id: &str) -> Result<Option<T>, Self::Error>;
    async fn put(&self, id: &str, value: &T) -> Result<(), Self::Error>;
    async fn delete(&self, id: &str) -> Result<(), Self::Error>;
}

/// A unit of work spanning more than one repository call.
#[async_trait]
pub trait Transaction: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    async fn commit(self: Box<Self>) -> Result<(), Self::Error>;
    async fn rollback(self: Box<Self>) -> Result<(), Self::Error>;
}

/// A pub/sub publisher for domain events (task lifecycle, status updates).
#[async_trait]
pub trait EventPublisher: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    async fn publish(&self, topic: &str, payload: serde_json::Value) -> Result<(), Self::Error>;
}
