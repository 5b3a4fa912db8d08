use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::analytics::{AccessLogConsumer, DispatcherOptions, SinkFactory, VisitDispatcher};
use crate::cache::{CacheFactory, KvCache, RedisConnector};
use crate::config::{AccessLogBackend, AppConfig, BloomBackend, CacheBackend};
use crate::index::{self, IndexFactory, MembershipIndex};
use crate::services::{AnalyticsService, LinkService, LinkServiceOptions};
use crate::storage::{LinkStore, SeaOrmStorage, StorageFactory};

/// 每轮清理删除的链接数
const SWEEP_BATCH: u64 = 1000;

pub struct StartupContext {
    pub storage: Arc<SeaOrmStorage>,
    pub cache: Arc<dyn KvCache>,
    pub index: Arc<dyn MembershipIndex>,
    pub link_service: Arc<LinkService>,
    pub analytics_service: Arc<AnalyticsService>,
    pub dispatcher: Arc<VisitDispatcher>,
    pub background: BackgroundTasks,
}

/// 关闭时统一停止的后台任务
pub struct BackgroundTasks {
    shutdown_tx: watch::Sender<bool>,
    handles: Vec<(&'static str, JoinHandle<()>)>,
}

impl Default for BackgroundTasks {
    fn default() -> Self {
        Self::new()
    }
}

impl BackgroundTasks {
    pub fn new() -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            shutdown_tx,
            handles: Vec::new(),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    pub fn push(&mut self, name: &'static str, handle: JoinHandle<()>) {
        self.handles.push((name, handle));
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// 通知所有任务并等待其退出
    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(true);
        for (name, handle) in self.handles {
            match handle.await {
                Ok(()) => debug!("Background task '{}' stopped", name),
                Err(e) => warn!("Background task '{}' ended abnormally: {}", name, e),
            }
        }
    }
}

/// 定期删除过期链接，直到关闭
pub fn spawn_expiry_sweeper(
    links: Arc<LinkService>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // 第一次 tick 立即返回，跳过
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = links.purge_expired(SWEEP_BATCH).await {
                        warn!("Expired link sweep failed: {}", e);
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    })
}

fn needs_redis(config: &AppConfig) -> bool {
    config.cache.backend == CacheBackend::Redis
        || config.bloom.backend == BloomBackend::Redis
        || config.access_log.backend == AccessLogBackend::RedisStream
        || config.access_log.consumer_enabled
}

/// 准备服务器启动的上下文
pub async fn prepare_server_startup(config: &AppConfig) -> Result<StartupContext> {
    let start_time = std::time::Instant::now();
    debug!("Starting pre-startup processing...");

    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|e| anyhow::anyhow!("Failed to install rustls crypto provider: {:?}", e))?;

    let storage = StorageFactory::create(&config.database)
        .await
        .context("Failed to create storage backend")?;
    info!("Using storage backend: {}", storage.backend_name());
    let store: Arc<dyn LinkStore> = storage.clone();

    // 所有 Redis 组件共用一个连接
    let connector = if needs_redis(config) {
        Some(
            RedisConnector::new(&config.cache.redis.url, &config.cache.redis.key_prefix)
                .context("Failed to create redis client")?,
        )
    } else {
        None
    };

    let cache = CacheFactory::create(&config.cache, connector.as_ref())
        .await
        .context("Failed to create cache")?;

    let index = IndexFactory::create(&config.bloom, &config.cache.redis, connector.as_ref())
        .await
        .context("Failed to create membership index")?;
    match index::warm_up(index.as_ref(), store.as_ref()).await {
        Ok(n) => debug!("Membership index initialized with {} codes", n),
        // 索引缺失只会让生成多查几次库
        Err(e) => warn!("Membership index warm-up failed (non-fatal): {}", e),
    }

    let link_service = Arc::new(LinkService::new(
        store.clone(),
        cache.clone(),
        index.clone(),
        LinkServiceOptions::from(config),
    ));
    let analytics_service = Arc::new(AnalyticsService::from_config(cache.clone(), config));

    let sink = SinkFactory::create(
        &config.access_log,
        &config.cache.redis,
        connector.as_ref(),
        store.clone(),
    )
    .context("Failed to create access log sink")?;
    let dispatcher = Arc::new(VisitDispatcher::start(
        analytics_service.clone(),
        sink,
        DispatcherOptions::from(&config.analytics),
    ));

    let mut background = BackgroundTasks::new();

    if config.access_log.consumer_enabled
        && let Some(connector) = connector.clone()
    {
        let consumer = AccessLogConsumer::new(connector, store.clone(), &config.access_log);
        let shutdown = background.subscribe();
        background.push("access_log_consumer", tokio::spawn(consumer.run(shutdown)));
    }

    if config.maintenance.cleanup_interval_secs > 0 {
        let shutdown = background.subscribe();
        background.push(
            "expiry_sweeper",
            spawn_expiry_sweeper(
                link_service.clone(),
                Duration::from_secs(config.maintenance.cleanup_interval_secs),
                shutdown,
            ),
        );
        debug!(
            "Expired link sweeper runs every {}s",
            config.maintenance.cleanup_interval_secs
        );
    } else {
        debug!("Expired link sweeper is disabled");
    }

    info!(
        "Startup prepared in {:?} (cache: {}, index: {}, background tasks: {})",
        start_time.elapsed(),
        cache.backend_name(),
        index.backend_name(),
        background.len()
    );

    Ok(StartupContext {
        storage,
        cache,
        index,
        link_service,
        analytics_service,
        dispatcher,
        background,
    })
}
