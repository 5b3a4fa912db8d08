//! 懒加载的共享 Redis 连接
//!
//! 首次使用时建立一条多路复用连接，之后每条命令克隆使用。
//! 传输错误后由调用方重置，下一条命令会重新连接。

use std::sync::Arc;

use redis::aio::MultiplexedConnection;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::errors::{OctolinkError, Result};

#[derive(Clone)]
pub struct RedisConnector {
    client: redis::Client,
    connection: Arc<RwLock<Option<MultiplexedConnection>>>,
    key_prefix: String,
}

impl RedisConnector {
    /// 只创建客户端，不发起网络请求
    pub fn new(url: &str, key_prefix: &str) -> Result<Self> {
        let client = redis::Client::open(url).map_err(|e| {
            OctolinkError::cache_connection(format!("invalid redis url '{}': {}", url, e))
        })?;

        Ok(Self {
            client,
            connection: Arc::new(RwLock::new(None)),
            key_prefix: key_prefix.to_string(),
        })
    }

    /// 获取或建立持久连接
    pub async fn get_connection(&self) -> redis::RedisResult<MultiplexedConnection> {
        {
            let conn_guard = self.connection.read().await;
            if let Some(ref conn) = *conn_guard {
                return Ok(conn.clone());
            }
        }

        let mut conn_guard = self.connection.write().await;

        // 双重检查，避免竞态条件
        if let Some(ref conn) = *conn_guard {
            return Ok(conn.clone());
        }

        let new_conn = self.client.get_multiplexed_async_connection().await?;
        *conn_guard = Some(new_conn.clone());
        debug!("Redis connection established");

        Ok(new_conn)
    }

    /// 重置连接（在连接错误时调用）
    pub async fn reset_connection(&self) {
        let mut conn_guard = self.connection.write().await;
        *conn_guard = None;
        debug!("Redis connection reset");
    }

    /// PING 一次，失败只记录日志，连接器仍可使用
    pub async fn ping(&self) -> bool {
        let mut conn = match self.get_connection().await {
            Ok(c) => c,
            Err(e) => {
                warn!("Redis unreachable: {}", e);
                return false;
            }
        };
        match redis::cmd("PING").query_async::<String>(&mut conn).await {
            Ok(_) => true,
            Err(e) => {
                warn!("Redis ping failed: {}", e);
                self.reset_connection().await;
                false
            }
        }
    }

    pub fn key_prefix(&self) -> &str {
        &self.key_prefix
    }

    pub fn make_key(&self, key: &str) -> String {
        format!("{}{}", self.key_prefix, key)
    }

    /// 传输失败时重置连接并包装错误
    pub async fn fail(&self, op: &str, key: &str, err: redis::RedisError) -> OctolinkError {
        if err.is_io_error() || err.is_connection_dropped() || err.is_connection_refusal() {
            self.reset_connection().await;
        }
        OctolinkError::cache_connection(format!("redis {} '{}' failed: {}", op, key, err))
    }
}
