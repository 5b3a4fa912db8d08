//! 持久化存储：短链与原始访问记录的权威数据源

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::DatabaseConfig;
use crate::errors::Result;

pub mod backend;
pub mod models;

pub use backend::SeaOrmStorage;
pub use models::{AccessEvent, LinkStatus, ParamTemplate, ShortLink};

/// 持久化存储的能力接口
///
/// 实现必须自行保证短码唯一，两个生成请求争抢同一个码时
/// 以 `create` 的结果为准
#[async_trait]
pub trait LinkStore: Send + Sync {
    /// 不存在时插入。短码已被占用返回 `Ok(false)`，
    /// 从不覆盖已有记录
    async fn create(&self, link: &ShortLink) -> Result<bool>;

    /// 按短码查询，不考虑状态和过期时间
    async fn get_by_code(&self, code: &str) -> Result<Option<ShortLink>>;

    /// 原始 URL 对应的最新一条有效且未过期的短链
    async fn get_by_url(&self, url: &str) -> Result<Option<ShortLink>>;

    async fn exists_by_code(&self, code: &str) -> Result<bool>;

    /// 全部已发放短码，用于预热成员索引
    async fn all_codes(&self) -> Result<Vec<String>>;

    async fn count(&self) -> Result<u64>;

    async fn list_expired(&self, limit: u64) -> Result<Vec<ShortLink>>;

    async fn delete_expired(&self) -> Result<u64>;

    /// 已有短链唯一允许的修改
    async fn disable(&self, code: &str) -> Result<bool>;

    async fn insert_access_event(&self, event: &AccessEvent) -> Result<()>;

    /// 按时间倒序
    async fn list_access_events(&self, code: &str, limit: u64) -> Result<Vec<AccessEvent>>;

    fn backend_name(&self) -> &str;
}

pub struct StorageFactory;

impl StorageFactory {
    pub async fn create(config: &DatabaseConfig) -> Result<Arc<SeaOrmStorage>> {
        let storage = SeaOrmStorage::new(config).await?;
        Ok(Arc::new(storage))
    }
}
