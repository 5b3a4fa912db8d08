//! Redis Stream 消费者，将访问日志落库

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use redis::streams::{StreamId, StreamReadReply};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::sink::AccessLogMessage;
use crate::cache::RedisConnector;
use crate::config::AccessLogConfig;
use crate::errors::{OctolinkError, Result};
use crate::storage::{AccessEvent, LinkStore};

/// 读取失败后的退避时间
const ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// 读取新消息时使用的 ID
const NEW_ENTRIES: &str = ">";

/// 从头重放本消费者 pending 列表时使用的 ID
const PENDING_START: &str = "0";

/// 落库后对消息的处理方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// 已落库，或消息无效直接丢弃
    Ack,
    /// 落库失败，留在 pending 列表等待重放
    Retry,
}

/// 单次 `poll_once` 的处理结果
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub read: usize,
    pub acked: usize,
    pub failed: usize,
}

/// 下一次 XREADGROUP 的起始 ID
///
/// 落库失败的消息留在本消费者的 pending 列表中。
/// 重放从 `0` 开始遍历该列表，读到空批次后切换为读取新消息；
/// 期间出现失败会再安排一轮重放。
#[derive(Debug)]
pub struct ReplayCursor {
    /// `None` 表示读取新消息
    after: Option<String>,
    replay_again: bool,
}

impl Default for ReplayCursor {
    fn default() -> Self {
        // 启动时先处理上次遗留的 pending 消息
        Self {
            after: Some(PENDING_START.to_string()),
            replay_again: false,
        }
    }
}

impl ReplayCursor {
    pub fn start_id(&self) -> &str {
        self.after.as_deref().unwrap_or(NEW_ENTRIES)
    }

    pub fn is_replaying(&self) -> bool {
        self.after.is_some()
    }

    /// 下一次读取从头重放 pending 列表
    pub fn rewind(&mut self) {
        if self.is_replaying() {
            self.replay_again = true;
        } else {
            self.after = Some(PENDING_START.to_string());
        }
    }

    /// 按本批最后一条消息的 ID 推进游标
    pub fn advance(&mut self, last_id: Option<&str>, failed: bool) {
        match (self.after.is_some(), last_id) {
            (true, Some(id)) => self.after = Some(id.to_string()),
            (true, None) => {
                self.after = if std::mem::take(&mut self.replay_again) {
                    Some(PENDING_START.to_string())
                } else {
                    None
                };
            }
            (false, _) => {}
        }
        if failed {
            self.rewind();
        }
    }
}

pub struct AccessLogConsumer {
    connector: RedisConnector,
    store: Arc<dyn LinkStore>,
    stream_key: String,
    group: String,
    consumer: String,
    batch_size: usize,
    idle_interval: Duration,
    cursor: Mutex<ReplayCursor>,
}

impl AccessLogConsumer {
    pub fn new(connector: RedisConnector, store: Arc<dyn LinkStore>, config: &AccessLogConfig) -> Self {
        Self {
            stream_key: connector.make_key(&config.stream_key),
            connector,
            store,
            group: config.consumer_group.clone(),
            consumer: config.consumer_name.clone(),
            batch_size: config.consumer_batch_size.max(1),
            idle_interval: Duration::from_millis(config.consumer_block_ms as u64),
            cursor: Mutex::new(ReplayCursor::default()),
        }
    }

    /// 创建消费者组（以及 Stream），组已存在时忽略
    pub async fn ensure_group(&self) -> Result<()> {
        let mut conn = self
            .connector
            .get_connection()
            .await
            .map_err(|e| OctolinkError::cache_connection(e.to_string()))?;

        let result = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&self.stream_key)
            .arg(&self.group)
            .arg("0")
            .arg("MKSTREAM")
            .query_async::<()>(&mut conn)
            .await;

        match result {
            Ok(()) => {
                info!("Created consumer group '{}' on {}", self.group, self.stream_key);
                Ok(())
            }
            Err(e) if e.to_string().contains("BUSYGROUP") => Ok(()),
            Err(e) => Err(self.connector.fail("XGROUP CREATE", &self.stream_key, e).await),
        }
    }

    /// 读取一批消息，落库并 ack
    ///
    /// 重放阶段读取本消费者的 pending 列表，
    /// 否则读取尚未投递给消费者组的新消息。
    pub async fn poll_once(&self) -> Result<BatchOutcome> {
        let start_id = self.cursor.lock().start_id().to_string();

        let mut conn = self
            .connector
            .get_connection()
            .await
            .map_err(|e| OctolinkError::cache_connection(e.to_string()))?;

        let reply = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(&self.group)
            .arg(&self.consumer)
            .arg("COUNT")
            .arg(self.batch_size)
            .arg("STREAMS")
            .arg(&self.stream_key)
            .arg(&start_id)
            .query_async::<Option<StreamReadReply>>(&mut conn)
            .await;

        let entries: Vec<StreamId> = match reply {
            Ok(Some(reply)) => reply.keys.into_iter().flat_map(|k| k.ids).collect(),
            Ok(None) => Vec::new(),
            Err(e) => return Err(self.connector.fail("XREADGROUP", &self.stream_key, e).await),
        };

        let mut outcome = BatchOutcome {
            read: entries.len(),
            ..Default::default()
        };
        for entry in &entries {
            match self.persist(entry).await {
                Disposition::Ack => {
                    let ack = redis::cmd("XACK")
                        .arg(&self.stream_key)
                        .arg(&self.group)
                        .arg(&entry.id)
                        .query_async::<i64>(&mut conn)
                        .await;
                    if let Err(e) = ack {
                        self.cursor.lock().rewind();
                        return Err(self.connector.fail("XACK", &self.stream_key, e).await);
                    }
                    outcome.acked += 1;
                }
                // 不 ack，留在 pending 列表等待重放
                Disposition::Retry => outcome.failed += 1,
            }
        }

        if start_id != NEW_ENTRIES && outcome.read == 0 {
            debug!("Pending access logs replayed for consumer '{}'", self.consumer);
        }
        self.cursor.lock().advance(
            entries.last().map(|e| e.id.as_str()),
            outcome.failed > 0,
        );
        Ok(outcome)
    }

    /// 落库单条消息
    pub async fn persist(&self, entry: &StreamId) -> Disposition {
        let Some(payload) = entry.get::<String>("payload") else {
            error!("Stream record {} has no payload; dropping", entry.id);
            return Disposition::Ack;
        };
        let msg: AccessLogMessage = match serde_json::from_str(&payload) {
            Ok(msg) => msg,
            Err(e) => {
                error!("Malformed access log record {}: {}; dropping", entry.id, e);
                return Disposition::Ack;
            }
        };

        let event = AccessEvent::from(msg);
        match self.store.insert_access_event(&event).await {
            Ok(()) => {
                debug!("Persisted access log {} for {}", entry.id, event.code);
                Disposition::Ack
            }
            Err(e) => {
                warn!("Failed to persist access log {}: {}", entry.id, e);
                Disposition::Retry
            }
        }
    }

    /// 循环消费，直到收到关闭信号
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        if let Err(e) = self.ensure_group().await {
            warn!("Consumer group setup failed: {}; will retry on read", e);
        }
        info!(
            "Access log consumer '{}' reading {} (group '{}')",
            self.consumer, self.stream_key, self.group
        );

        loop {
            let polled = self.poll_once().await;
            let replaying = self.cursor.lock().is_replaying();
            let pause = match polled {
                Ok(outcome) if outcome.failed > 0 => ERROR_BACKOFF,
                Ok(outcome) if outcome.read >= self.batch_size => Duration::ZERO,
                Ok(_) if replaying => Duration::ZERO,
                Ok(_) => self.idle_interval,
                Err(e) => {
                    warn!("Access log consumer read failed: {}", e);
                    self.cursor.lock().rewind();
                    if e.message().contains("NOGROUP")
                        && let Err(e) = self.ensure_group().await
                    {
                        warn!("Consumer group setup failed: {}", e);
                    }
                    ERROR_BACKOFF
                }
            };

            tokio::select! {
                _ = tokio::time::sleep(pause) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("Access log consumer stopped");
    }
}
