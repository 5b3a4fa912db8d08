//! 缓存适配层：非权威的键值、计数器与集合存储

pub mod connection;
pub mod keys;
pub mod memory;
pub mod redis;
pub mod traits;

use std::sync::Arc;

use tracing::{info, warn};

pub use connection::RedisConnector;
pub use memory::MemoryCache;
pub use self::redis::RedisCache;
pub use traits::KvCache;

use crate::config::{CacheBackend, CacheConfig};
use crate::errors::Result;

pub struct CacheFactory;

impl CacheFactory {
    /// 按配置创建缓存。Redis 不可达只记录日志，
    /// 连接器会在每次调用时重试
    pub async fn create(
        config: &CacheConfig,
        connector: Option<&RedisConnector>,
    ) -> Result<Arc<dyn KvCache>> {
        match config.backend {
            CacheBackend::Memory => {
                info!("Using in-memory cache");
                Ok(Arc::new(MemoryCache::with_capacity(config.memory.max_capacity)))
            }
            CacheBackend::Redis => {
                let connector = match connector {
                    Some(c) => c.clone(),
                    None => RedisConnector::new(&config.redis.url, &config.redis.key_prefix)?,
                };
                if !connector.ping().await {
                    warn!(
                        "Redis cache at {} is not reachable yet; continuing degraded",
                        config.redis.url
                    );
                }
                info!("Using redis cache with prefix '{}'", connector.key_prefix());
                Ok(Arc::new(RedisCache::new(connector)))
            }
        }
    }
}
