pub mod cache;
pub mod resilience;
pub mod metrics;

pub use cache::redis::{RedisCache, RedisCacheConfig};
pub use cache::memory::{MemoryCache, MemoryCacheConfig};
pub use cache::response::{CachedResponse, ResponseCacheConfig, CacheKeyBuilder, CacheControl, ResponseCache};

pub use resilience::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerState,
    RetryPolicy, RetryConfig, ExponentialBackoff, FixedDelay,
    Bulkhead, BulkheadConfig,
    TimeoutPolicy, TimeoutError,
    ResilienceBuilder, ResilienceError,
};

pub use metrics::{
    PrometheusMetrics, MetricsConfig, MetricsHandle, HttpMetrics, DatabaseMetrics,
    CacheMetrics, CircuitBreakerMetrics, MetricsCollector, SystemMetrics,
};

#[derive(Debug, thiserror::Error)]
pub enum InfraError {
    #[error("Cache error: {0}")]
    Cache(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Health check failed: {0}")]
    HealthCheck(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, InfraError>;
