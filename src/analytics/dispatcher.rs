//! 访问事件的有界后台分发
//!
//! 重定向处理器通过 [`VisitDispatcher::submit`] 投递访问事件，从不等待。
//! 固定数量的 worker 消费队列，更新实时计数并把原始记录交给访问日志 sink。

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::sink::{AccessLogMessage, AccessLogSink};
use crate::config::AnalyticsConfig;
use crate::services::AnalyticsService;
use crate::storage::AccessEvent;

#[derive(Debug, Clone)]
pub struct DispatcherOptions {
    pub workers: usize,
    pub queue_capacity: usize,
    pub task_timeout: Duration,
}

impl From<&AnalyticsConfig> for DispatcherOptions {
    fn from(config: &AnalyticsConfig) -> Self {
        Self {
            workers: config.workers.max(1),
            queue_capacity: config.queue_capacity.max(1),
            task_timeout: Duration::from_millis(config.task_timeout_ms),
        }
    }
}

pub struct VisitDispatcher {
    tx: Mutex<Option<mpsc::Sender<AccessEvent>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    dropped: Arc<AtomicU64>,
}

impl VisitDispatcher {
    /// 启动 worker 池，必须在 tokio 运行时内调用
    pub fn start(
        analytics: Arc<AnalyticsService>,
        sink: Option<Arc<dyn AccessLogSink>>,
        options: DispatcherOptions,
    ) -> Self {
        let (tx, rx) = mpsc::channel(options.queue_capacity.max(1));
        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        let dropped = Arc::new(AtomicU64::new(0));

        let workers = (0..options.workers.max(1))
            .map(|id| {
                let rx = Arc::clone(&rx);
                let analytics = Arc::clone(&analytics);
                let sink = sink.clone();
                let task_timeout = options.task_timeout;
                tokio::spawn(async move {
                    loop {
                        // 只在取消息时持锁
                        let next = rx.lock().await.recv().await;
                        let Some(event) = next else { break };
                        process(&analytics, sink.as_deref(), &event, task_timeout).await;
                    }
                    debug!("Visit worker {} exited", id);
                })
            })
            .collect();

        info!(
            "Visit dispatcher started: {} workers, queue {}, sink {}",
            options.workers.max(1),
            options.queue_capacity,
            sink.as_ref().map(|s| s.name()).unwrap_or("none")
        );

        Self {
            tx: Mutex::new(Some(tx)),
            workers: Mutex::new(workers),
            dropped,
        }
    }

    /// 非阻塞入队。队列已满或已关闭时丢弃并返回 false
    pub fn submit(&self, event: AccessEvent) -> bool {
        let guard = self.tx.lock();
        let Some(tx) = guard.as_ref() else {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        };

        match tx.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(event)) => {
                let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(
                    "Visit queue full; dropped visit to {} ({} dropped so far)",
                    event.code, total
                );
                false
            }
            Err(TrySendError::Closed(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// 关闭队列并等待 worker 处理完剩余事件
    pub async fn shutdown(&self) {
        drop(self.tx.lock().take());
        let workers: Vec<JoinHandle<()>> = std::mem::take(&mut *self.workers.lock());
        if workers.is_empty() {
            return;
        }

        let count = workers.len();
        for handle in workers {
            if let Err(e) = handle.await {
                warn!("Visit worker ended abnormally: {}", e);
            }
        }
        info!("Visit dispatcher stopped ({} workers drained)", count);
    }
}

async fn process(
    analytics: &AnalyticsService,
    sink: Option<&dyn AccessLogSink>,
    event: &AccessEvent,
    task_timeout: Duration,
) {
    if timeout(task_timeout, analytics.record_event(event)).await.is_err() {
        warn!("Recording visit to {} timed out", event.code);
    }

    let Some(sink) = sink else { return };
    let msg = AccessLogMessage::from(event);
    match timeout(task_timeout, sink.send(&msg)).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!("Shipping access log for {} failed: {}", event.code, e),
        Err(_) => warn!("Shipping access log for {} timed out", event.code),
    }
}
