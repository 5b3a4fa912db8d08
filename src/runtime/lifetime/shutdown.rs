use std::sync::Arc;
use std::time::Duration;

use tokio::signal;
use tokio::time::timeout;
use tracing::{error, info, warn};

use super::startup::BackgroundTasks;
use crate::analytics::VisitDispatcher;

/// 关闭超时时间（秒）
const SHUTDOWN_TIMEOUT_SECS: u64 = 30;

/// 单个任务超时时间（秒）
const TASK_TIMEOUT_SECS: u64 = 10;

/// 等待 Ctrl+C 信号
pub async fn listen_for_shutdown() {
    match signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received, draining visit queue..."),
        Err(e) => warn!(
            "Failed to listen for Ctrl+C: {}. Proceeding with shutdown anyway.",
            e
        ),
    }
}

/// 排空访问队列并停止后台任务，受全局超时限制
pub async fn graceful_shutdown(dispatcher: Arc<VisitDispatcher>, background: BackgroundTasks) {
    let result = timeout(
        Duration::from_secs(SHUTDOWN_TIMEOUT_SECS),
        perform_shutdown_tasks(dispatcher, background),
    )
    .await;

    match result {
        Ok(()) => info!("All shutdown tasks completed successfully"),
        Err(_) => error!(
            "Shutdown tasks timed out after {} seconds; exiting anyway",
            SHUTDOWN_TIMEOUT_SECS
        ),
    }
}

/// 执行所有关闭任务（在超时内调用）
pub async fn perform_shutdown_tasks(dispatcher: Arc<VisitDispatcher>, background: BackgroundTasks) {
    match timeout(Duration::from_secs(TASK_TIMEOUT_SECS), dispatcher.shutdown()).await {
        Ok(()) => info!(
            "Visit dispatcher drained ({} visits dropped while running)",
            dispatcher.dropped()
        ),
        Err(_) => error!("Visit dispatcher drain timed out after {} seconds", TASK_TIMEOUT_SECS),
    }

    match timeout(Duration::from_secs(TASK_TIMEOUT_SECS), background.stop()).await {
        Ok(()) => info!("Background tasks stopped"),
        Err(_) => error!("Background tasks did not stop within {} seconds", TASK_TIMEOUT_SECS),
    }
}
