//! 已发放短码的近似成员索引
//!
//! `exists == false` 表示该码一定未被添加；`true` 表示可能已添加，
//! 需要回到数据库确认。

pub mod local_bloom;
pub mod redis_bloom;

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

pub use local_bloom::LocalBloomIndex;
pub use redis_bloom::RedisBloomIndex;

use crate::cache::RedisConnector;
use crate::config::{BloomBackend, BloomConfig, RedisConfig};
use crate::errors::Result;
use crate::storage::LinkStore;

#[async_trait]
pub trait MembershipIndex: Send + Sync {
    /// 记录 `code` 已存在。概率结构不可用时退化为精确集合
    async fn add(&self, code: &str) -> Result<()>;

    async fn bulk_add(&self, codes: &[String]) -> Result<()>;

    /// 传输失败返回错误，绝不返回 `Ok(false)`
    async fn exists(&self, code: &str) -> Result<bool>;

    /// 当前是否由概率结构（而非精确兜底）提供服务
    async fn is_available(&self) -> bool;

    /// 清空全部成员状态，仅用于维护
    async fn reset(&self) -> Result<()>;

    fn capacity(&self) -> u64;

    fn backend_name(&self) -> &'static str;
}

pub struct IndexFactory;

impl IndexFactory {
    pub async fn create(
        bloom: &BloomConfig,
        redis: &RedisConfig,
        connector: Option<&RedisConnector>,
    ) -> Result<Arc<dyn MembershipIndex>> {
        match bloom.backend {
            BloomBackend::Local => {
                let index = LocalBloomIndex::new(bloom.local_capacity, bloom.error_rate);
                info!(
                    "Using local membership index (capacity {}, fp rate {}, bloom active: {})",
                    bloom.local_capacity,
                    bloom.error_rate,
                    index.is_available().await
                );
                Ok(Arc::new(index))
            }
            BloomBackend::Redis => {
                let connector = match connector {
                    Some(c) => c.clone(),
                    None => RedisConnector::new(&redis.url, &redis.key_prefix)?,
                };
                let index = RedisBloomIndex::new(connector, bloom);
                index.init().await;
                Ok(Arc::new(index))
            }
        }
    }
}

/// 从数据库加载全部已发放短码到索引
pub async fn warm_up(index: &dyn MembershipIndex, store: &dyn LinkStore) -> Result<usize> {
    let codes = store.all_codes().await?;
    if codes.len() as u64 > index.capacity() {
        warn!(
            "{} issued codes exceed the membership index capacity {}; false positives will rise",
            codes.len(),
            index.capacity()
        );
    }
    index.bulk_add(&codes).await?;
    info!("Membership index warmed with {} codes", codes.len());
    Ok(codes.len())
}
