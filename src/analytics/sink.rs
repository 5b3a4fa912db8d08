//! 访问日志输出
//!
//! 将原始访问记录写入持久化通道，尽力而为：
//! 主通道失败时由 [`FallbackSink`] 兜底，不配置 sink 也是合法的。

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::cache::RedisConnector;
use crate::config::{AccessLogBackend, AccessLogConfig, RedisConfig};
use crate::errors::Result;
use crate::storage::{AccessEvent, LinkStore};

/// 单次访问的传输格式
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessLogMessage {
    pub short_code: String,
    pub client_ip: String,
    #[serde(default)]
    pub user_agent: String,
    #[serde(default)]
    pub referer: String,
    pub access_time: DateTime<Utc>,
}

impl From<&AccessEvent> for AccessLogMessage {
    fn from(event: &AccessEvent) -> Self {
        Self {
            short_code: event.code.clone(),
            client_ip: event.client_ip.clone(),
            user_agent: event.user_agent.clone(),
            referer: event.referer.clone(),
            access_time: event.timestamp,
        }
    }
}

impl From<AccessLogMessage> for AccessEvent {
    fn from(msg: AccessLogMessage) -> Self {
        Self {
            code: msg.short_code,
            client_ip: msg.client_ip,
            user_agent: msg.user_agent,
            referer: msg.referer,
            timestamp: msg.access_time,
        }
    }
}

/// 访问日志 Sink
#[async_trait]
pub trait AccessLogSink: Send + Sync {
    async fn send(&self, msg: &AccessLogMessage) -> anyhow::Result<()>;

    fn name(&self) -> &'static str;
}

// ============ Redis Stream ============

/// `XADD` 到限长 Stream，短码单独作为字段便于消费端分区
pub struct RedisStreamSink {
    connector: RedisConnector,
    stream_key: String,
    max_len: usize,
}

impl RedisStreamSink {
    pub fn new(connector: RedisConnector, stream_key: &str, max_len: usize) -> Self {
        Self {
            connector,
            stream_key: stream_key.to_string(),
            max_len,
        }
    }
}

#[async_trait]
impl AccessLogSink for RedisStreamSink {
    async fn send(&self, msg: &AccessLogMessage) -> anyhow::Result<()> {
        let payload = serde_json::to_string(msg)?;
        let key = self.connector.make_key(&self.stream_key);
        let mut conn = self.connector.get_connection().await?;

        let mut cmd = redis::cmd("XADD");
        cmd.arg(&key);
        if self.max_len > 0 {
            cmd.arg("MAXLEN").arg("~").arg(self.max_len);
        }
        cmd.arg("*")
            .arg("code")
            .arg(&msg.short_code)
            .arg("payload")
            .arg(&payload);

        match cmd.query_async::<String>(&mut conn).await {
            Ok(id) => {
                debug!("Access log for {} appended to stream as {}", msg.short_code, id);
                Ok(())
            }
            Err(e) => Err(self.connector.fail("XADD", &key, e).await.into()),
        }
    }

    fn name(&self) -> &'static str {
        "redis_stream"
    }
}

// ============ 数据库 ============

pub struct StoreSink {
    store: Arc<dyn LinkStore>,
}

impl StoreSink {
    pub fn new(store: Arc<dyn LinkStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl AccessLogSink for StoreSink {
    async fn send(&self, msg: &AccessLogMessage) -> anyhow::Result<()> {
        let event = AccessEvent::from(msg.clone());
        self.store.insert_access_event(&event).await?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "database"
    }
}

// ============ 本地兜底 ============

/// 包装主 sink。主 sink 失败时将记录以 JSON 行追加到 `file`，
/// 未配置文件时输出到 `access_log` 日志目标。永不返回错误。
pub struct FallbackSink {
    primary: Arc<dyn AccessLogSink>,
    file: Option<PathBuf>,
    // 防止多个 worker 的行交错
    write_lock: Mutex<()>,
}

impl FallbackSink {
    pub fn new(primary: Arc<dyn AccessLogSink>, file: Option<PathBuf>) -> Self {
        Self {
            primary,
            file,
            write_lock: Mutex::new(()),
        }
    }

    async fn write_local(&self, line: &str) -> anyhow::Result<()> {
        let Some(path) = &self.file else {
            warn!(target: "access_log", "{}", line);
            return Ok(());
        };

        let _guard = self.write_lock.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.write_all(b"\n").await?;
        file.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl AccessLogSink for FallbackSink {
    async fn send(&self, msg: &AccessLogMessage) -> anyhow::Result<()> {
        let Err(e) = self.primary.send(msg).await else {
            return Ok(());
        };
        warn!(
            "Access log sink '{}' failed for {}: {}; using local fallback",
            self.primary.name(),
            msg.short_code,
            e
        );

        let line = serde_json::to_string(msg)?;
        if let Err(e) = self.write_local(&line).await {
            warn!("Local access log fallback failed: {}", e);
            warn!(target: "access_log", "{}", line);
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "fallback"
    }
}

pub struct SinkFactory;

impl SinkFactory {
    /// `backend = none` 时返回 `None`，不输出访问日志
    pub fn create(
        config: &AccessLogConfig,
        redis: &RedisConfig,
        connector: Option<&RedisConnector>,
        store: Arc<dyn LinkStore>,
    ) -> Result<Option<Arc<dyn AccessLogSink>>> {
        let primary: Arc<dyn AccessLogSink> = match config.backend {
            AccessLogBackend::None => {
                info!("Access log shipping disabled");
                return Ok(None);
            }
            AccessLogBackend::RedisStream => {
                let connector = match connector {
                    Some(c) => c.clone(),
                    None => RedisConnector::new(&redis.url, &redis.key_prefix)?,
                };
                Arc::new(RedisStreamSink::new(
                    connector,
                    &config.stream_key,
                    config.stream_max_len,
                ))
            }
            AccessLogBackend::Database => Arc::new(StoreSink::new(store)),
        };

        info!(
            "Access log sink: {} (fallback file: {})",
            primary.name(),
            config.fallback_file.as_deref().unwrap_or("<log>")
        );
        Ok(Some(Arc::new(FallbackSink::new(
            primary,
            config.fallback_file.as_ref().map(PathBuf::from),
        ))))
    }
}
