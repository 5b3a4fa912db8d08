use std::time::Duration;

use async_trait::async_trait;

use crate::errors::Result;

/// 带 TTL 的键值、计数器与集合操作
///
/// 缓存从不是权威数据源，任何条目都可能随时消失。
/// 键为逻辑键（见 [`crate::cache::keys`]），由实现追加命名空间。
/// `ttl` 为零表示不过期。
#[async_trait]
pub trait KvCache: Send + Sync {
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;

    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn exists(&self, key: &str) -> Result<bool>;

    /// 原子自增，计数器创建时设置 TTL
    async fn incr(&self, key: &str, ttl: Duration) -> Result<i64>;

    /// 原子添加集合成员，返回成员是否为新增
    async fn sadd(&self, key: &str, member: &str, ttl: Duration) -> Result<bool>;

    async fn scard(&self, key: &str) -> Result<u64>;

    /// 以 `prefix` 开头的逻辑键
    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>>;

    async fn delete(&self, key: &str) -> Result<bool>;

    fn backend_name(&self) -> &'static str;
}
