pub mod redis;
pub mod memory;
pub mod response;

pub use redis::{RedisCache, RedisCacheConfig};
pub use memory::{MemoryCache, MemoryCacheConfig};
pub use response::{
    CachedResponse, ResponseCacheConfig, CacheKeyBuilder, CacheControl, ResponseCache,
};
