//! 基于 RedisBloom 的成员索引
//!
//! 在单个键上使用 `BF.*` 命令。服务端未加载 bloom 模块时，
//! 退化为每个码一个普通键，结果精确但占用更多空间。

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use redis::RedisError;
use tracing::{debug, info, warn};

use super::MembershipIndex;
use crate::cache::RedisConnector;
use crate::cache::redis::escape_glob;
use crate::config::BloomConfig;
use crate::errors::{OctolinkError, Result};

const MADD_CHUNK: usize = 1000;

pub struct RedisBloomIndex {
    connector: RedisConnector,
    /// 布隆过滤器的逻辑键
    key: String,
    capacity: u64,
    error_rate: f64,
    /// 确认服务端缺少 bloom 模块后置位
    fallback: AtomicBool,
}

fn is_transport_error(err: &RedisError) -> bool {
    err.is_io_error()
        || err.is_connection_dropped()
        || err.is_connection_refusal()
        || err.is_timeout()
}

fn is_missing_module(err: &RedisError) -> bool {
    !is_transport_error(err) && err.to_string().to_lowercase().contains("unknown command")
}

impl RedisBloomIndex {
    pub fn new(connector: RedisConnector, config: &BloomConfig) -> Self {
        Self {
            connector,
            key: config.key.clone(),
            capacity: config.capacity,
            error_rate: config.error_rate,
            fallback: AtomicBool::new(false),
        }
    }

    fn fallback_key(&self, code: &str) -> String {
        format!("{}:fb:{}", self.key, code)
    }

    fn in_fallback(&self) -> bool {
        self.fallback.load(Ordering::Relaxed)
    }

    fn enter_fallback(&self, err: &RedisError) {
        if !self.fallback.swap(true, Ordering::Relaxed) {
            warn!(
                "RedisBloom unavailable ({}); using exact per-code keys for the membership index",
                err
            );
        }
    }

    fn wrap(&self, op: &str, err: RedisError) -> OctolinkError {
        OctolinkError::index_backend(format!("{} on '{}' failed: {}", op, self.key, err))
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection> {
        self.connector.get_connection().await.map_err(|e| {
            OctolinkError::index_backend(format!("redis connection failed: {}", e))
        })
    }

    async fn on_error(&self, op: &str, err: RedisError) -> OctolinkError {
        if is_transport_error(&err) {
            self.connector.reset_connection().await;
        }
        self.wrap(op, err)
    }

    /// 预留过滤器。过滤器已存在或服务端不可达都不算致命错误，
    /// 缺少模块时切换到兜底实现
    pub async fn init(&self) {
        let mut conn = match self.connection().await {
            Ok(c) => c,
            Err(e) => {
                warn!("{}; bloom filter will be reserved lazily", e);
                return;
            }
        };

        let result = redis::cmd("BF.RESERVE")
            .arg(self.connector.make_key(&self.key))
            .arg(self.error_rate)
            .arg(self.capacity)
            .query_async::<()>(&mut conn)
            .await;

        match result {
            Ok(()) => info!(
                "RedisBloom filter reserved (capacity {}, fp rate {})",
                self.capacity, self.error_rate
            ),
            Err(e) if is_missing_module(&e) => self.enter_fallback(&e),
            Err(e) if e.to_string().to_lowercase().contains("exists") => {
                debug!("RedisBloom filter already exists")
            }
            Err(e) => {
                if is_transport_error(&e) {
                    self.connector.reset_connection().await;
                }
                warn!("BF.RESERVE failed: {}", e)
            }
        }
    }

    async fn fallback_add(&self, conn: &mut redis::aio::MultiplexedConnection, code: &str) -> Result<()> {
        let key = self.connector.make_key(&self.fallback_key(code));
        match redis::cmd("SET").arg(&key).arg(1).query_async::<()>(conn).await {
            Ok(()) => Ok(()),
            Err(e) => Err(self.on_error("SET", e).await),
        }
    }

    async fn fallback_exists(&self, conn: &mut redis::aio::MultiplexedConnection, code: &str) -> Result<bool> {
        let key = self.connector.make_key(&self.fallback_key(code));
        match redis::cmd("EXISTS").arg(&key).query_async::<i64>(conn).await {
            Ok(n) => Ok(n > 0),
            Err(e) => Err(self.on_error("EXISTS", e).await),
        }
    }
}

#[async_trait]
impl MembershipIndex for RedisBloomIndex {
    async fn add(&self, code: &str) -> Result<()> {
        let mut conn = self.connection().await?;
        if self.in_fallback() {
            return self.fallback_add(&mut conn, code).await;
        }

        let result = redis::cmd("BF.ADD")
            .arg(self.connector.make_key(&self.key))
            .arg(code)
            .query_async::<i64>(&mut conn)
            .await;
        match result {
            Ok(_) => Ok(()),
            Err(e) if is_missing_module(&e) => {
                self.enter_fallback(&e);
                self.fallback_add(&mut conn, code).await
            }
            Err(e) => Err(self.on_error("BF.ADD", e).await),
        }
    }

    async fn bulk_add(&self, codes: &[String]) -> Result<()> {
        if codes.is_empty() {
            return Ok(());
        }
        let mut conn = self.connection().await?;

        for chunk in codes.chunks(MADD_CHUNK) {
            if !self.in_fallback() {
                let result = redis::cmd("BF.MADD")
                    .arg(self.connector.make_key(&self.key))
                    .arg(chunk)
                    .query_async::<Vec<i64>>(&mut conn)
                    .await;
                match result {
                    Ok(_) => continue,
                    Err(e) if is_missing_module(&e) => self.enter_fallback(&e),
                    Err(e) => return Err(self.on_error("BF.MADD", e).await),
                }
            }

            let mut pipe = redis::pipe();
            for code in chunk {
                pipe.cmd("SET")
                    .arg(self.connector.make_key(&self.fallback_key(code)))
                    .arg(1)
                    .ignore();
            }
            if let Err(e) = pipe.query_async::<()>(&mut conn).await {
                return Err(self.on_error("SET pipeline", e).await);
            }
        }

        debug!("Bulk inserted {} codes into redis index", codes.len());
        Ok(())
    }

    async fn exists(&self, code: &str) -> Result<bool> {
        let mut conn = self.connection().await?;
        if self.in_fallback() {
            return self.fallback_exists(&mut conn, code).await;
        }

        let result = redis::cmd("BF.EXISTS")
            .arg(self.connector.make_key(&self.key))
            .arg(code)
            .query_async::<i64>(&mut conn)
            .await;
        match result {
            Ok(n) => Ok(n > 0),
            Err(e) if is_missing_module(&e) => {
                self.enter_fallback(&e);
                self.fallback_exists(&mut conn, code).await
            }
            Err(e) => Err(self.on_error("BF.EXISTS", e).await),
        }
    }

    async fn is_available(&self) -> bool {
        if self.in_fallback() {
            return false;
        }
        let Ok(mut conn) = self.connection().await else {
            return false;
        };

        match redis::cmd("BF.INFO")
            .arg(self.connector.make_key(&self.key))
            .query_async::<redis::Value>(&mut conn)
            .await
        {
            Ok(_) => true,
            Err(e) if is_missing_module(&e) => {
                self.enter_fallback(&e);
                false
            }
            // 模块已加载，过滤器尚未创建
            Err(e) if e.to_string().to_lowercase().contains("not found") => true,
            Err(e) => {
                if is_transport_error(&e) {
                    self.connector.reset_connection().await;
                }
                false
            }
        }
    }

    async fn reset(&self) -> Result<()> {
        let mut conn = self.connection().await?;

        if let Err(e) = redis::cmd("DEL")
            .arg(self.connector.make_key(&self.key))
            .query_async::<i64>(&mut conn)
            .await
        {
            return Err(self.on_error("DEL", e).await);
        }

        let pattern = format!(
            "{}*",
            escape_glob(&self.connector.make_key(&self.fallback_key("")))
        );
        let mut cursor: u64 = 0;
        let mut removed = 0usize;
        loop {
            let (next, keys) = match redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(MADD_CHUNK)
                .query_async::<(u64, Vec<String>)>(&mut conn)
                .await
            {
                Ok(page) => page,
                Err(e) => return Err(self.on_error("SCAN", e).await),
            };
            if !keys.is_empty() {
                removed += keys.len();
                if let Err(e) = redis::cmd("DEL").arg(&keys).query_async::<i64>(&mut conn).await {
                    return Err(self.on_error("DEL", e).await);
                }
            }
            if next == 0 {
                break;
            }
            cursor = next;
        }

        info!("Redis membership index reset ({} fallback keys removed)", removed);
        if !self.in_fallback() {
            self.init().await;
        }
        Ok(())
    }

    fn capacity(&self) -> u64 {
        self.capacity
    }

    fn backend_name(&self) -> &'static str {
        "redis"
    }
}
