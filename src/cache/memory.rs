//! 进程内缓存，单节点部署和测试使用

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures_util::future::ready;
use moka::future::Cache;
use moka::ops::compute::{CompResult, Op};
use moka::policy::Expiry;
use tracing::debug;

use super::traits::KvCache;
use crate::errors::{OctolinkError, Result};

/// 未配置容量时的默认上限
const DEFAULT_MAX_CAPACITY: u64 = 100_000;

#[derive(Debug, Clone)]
enum Value {
    Text(String),
    Counter(i64),
    Set(Arc<HashSet<String>>),
}

#[derive(Debug, Clone)]
struct Slot {
    value: Value,
    ttl: Duration,
    /// 原地修改（incr / sadd）沿用创建时的剩余 TTL
    keep_ttl: bool,
}

impl Slot {
    fn fresh(value: Value, ttl: Duration) -> Self {
        Self {
            value,
            ttl,
            keep_ttl: false,
        }
    }

    fn modified(&self, value: Value) -> Self {
        Self {
            value,
            ttl: self.ttl,
            keep_ttl: true,
        }
    }

    /// 零 TTL 表示永不过期
    fn lifetime(&self) -> Option<Duration> {
        (!self.ttl.is_zero()).then_some(self.ttl)
    }
}

/// 按条目 TTL 计算过期时间
struct SlotExpiry;

impl Expiry<String, Slot> for SlotExpiry {
    fn expire_after_create(&self, _key: &String, value: &Slot, _created_at: Instant) -> Option<Duration> {
        value.lifetime()
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &Slot,
        _updated_at: Instant,
        duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        if value.keep_ttl {
            duration_until_expiry
        } else {
            value.lifetime()
        }
    }
}

fn wrong_type(key: &str) -> OctolinkError {
    OctolinkError::cache_connection(format!(
        "WRONGTYPE operation against key '{}' holding the wrong kind of value",
        key
    ))
}

/// moka 缓存，容量有上限，过期条目由后台维护任务回收
pub struct MemoryCache {
    inner: Cache<String, Slot>,
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_MAX_CAPACITY)
    }
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(max_capacity: u64) -> Self {
        let inner = Cache::builder()
            .max_capacity(max_capacity)
            .expire_after(SlotExpiry)
            .build();
        debug!("MemoryCache initialized with max capacity: {}", max_capacity);
        Self { inner }
    }

    /// 执行挂起的维护任务后返回条目数
    pub async fn entry_count(&self) -> u64 {
        self.inner.run_pending_tasks().await;
        self.inner.entry_count()
    }
}

#[async_trait]
impl KvCache for MemoryCache {
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        self.inner
            .insert(key.to_string(), Slot::fresh(Value::Text(value.to_string()), ttl))
            .await;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        match self.inner.get(key).await.map(|slot| slot.value) {
            None => Ok(None),
            Some(Value::Text(s)) => Ok(Some(s)),
            Some(Value::Counter(n)) => Ok(Some(n.to_string())),
            Some(Value::Set(_)) => Err(wrong_type(key)),
        }
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.inner.contains_key(key))
    }

    async fn incr(&self, key: &str, ttl: Duration) -> Result<i64> {
        let result = self
            .inner
            .entry(key.to_string())
            .and_compute_with(|current| {
                let op = match current {
                    None => Op::Put(Slot::fresh(Value::Counter(1), ttl)),
                    Some(entry) => {
                        let slot = entry.value();
                        let next = match &slot.value {
                            Value::Counter(n) => Some(n + 1),
                            Value::Text(s) => s.parse::<i64>().ok().map(|n| n + 1),
                            Value::Set(_) => None,
                        };
                        match next {
                            Some(n) => Op::Put(slot.modified(Value::Counter(n))),
                            None => Op::Nop,
                        }
                    }
                };
                ready(op)
            })
            .await;

        match result {
            CompResult::Inserted(entry) | CompResult::ReplacedWith(entry) => match entry.value().value {
                Value::Counter(n) => Ok(n),
                _ => Err(wrong_type(key)),
            },
            _ => Err(wrong_type(key)),
        }
    }

    async fn sadd(&self, key: &str, member: &str, ttl: Duration) -> Result<bool> {
        let result = self
            .inner
            .entry(key.to_string())
            .and_compute_with(|current| {
                let op = match current {
                    None => {
                        let members = HashSet::from([member.to_string()]);
                        Op::Put(Slot::fresh(Value::Set(Arc::new(members)), ttl))
                    }
                    Some(entry) => match &entry.value().value {
                        Value::Set(members) if !members.contains(member) => {
                            let mut members = HashSet::clone(members);
                            members.insert(member.to_string());
                            Op::Put(entry.value().modified(Value::Set(Arc::new(members))))
                        }
                        _ => Op::Nop,
                    },
                };
                ready(op)
            })
            .await;

        match result {
            CompResult::Inserted(_) | CompResult::ReplacedWith(_) => Ok(true),
            CompResult::Unchanged(entry) => match entry.value().value {
                Value::Set(_) => Ok(false),
                _ => Err(wrong_type(key)),
            },
            CompResult::Removed(_) | CompResult::StillNone(_) => Ok(false),
        }
    }

    async fn scard(&self, key: &str) -> Result<u64> {
        match self.inner.get(key).await.map(|slot| slot.value) {
            None => Ok(0),
            Some(Value::Set(members)) => Ok(members.len() as u64),
            Some(_) => Err(wrong_type(key)),
        }
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        // iter 跳过已过期条目
        let mut keys: Vec<String> = self
            .inner
            .iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| String::clone(&k))
            .collect();
        keys.sort_unstable();
        Ok(keys)
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.inner.remove(key).await.is_some())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
