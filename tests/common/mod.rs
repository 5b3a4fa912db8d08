//! Shared test doubles for the integration tests

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;

use octolink::cache::{KvCache, MemoryCache};
use octolink::errors::{OctolinkError, Result};
use octolink::index::{LocalBloomIndex, MembershipIndex};
use octolink::services::{AnalyticsService, LinkService, LinkServiceOptions};
use octolink::storage::{AccessEvent, LinkStatus, LinkStore, ShortLink};

// =============================================================================
// MockStore
// =============================================================================

/// In-memory `LinkStore` with failure injection
#[derive(Default)]
pub struct MockStore {
    links: Mutex<HashMap<String, ShortLink>>,
    events: Mutex<Vec<AccessEvent>>,
    /// 所有调用都返回持久化错误
    pub fail: AtomicBool,
    /// `exists_by_code` 永远返回 true
    pub all_taken: AtomicBool,
    /// 接下来 N 次 create 模拟并发冲突
    pub conflicts: AtomicU32,
    pub exists_calls: AtomicUsize,
    pub create_calls: AtomicUsize,
}

impl MockStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        let store = Self::new();
        store.fail.store(true, Ordering::SeqCst);
        store
    }

    /// Insert directly, bypassing all checks
    pub fn insert(&self, link: ShortLink) {
        self.links.lock().insert(link.code.clone(), link);
    }

    pub fn get(&self, code: &str) -> Option<ShortLink> {
        self.links.lock().get(code).cloned()
    }

    pub fn len(&self) -> usize {
        self.links.lock().len()
    }

    pub fn events(&self) -> Vec<AccessEvent> {
        self.events.lock().clone()
    }

    fn check(&self) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(OctolinkError::persistence("mock store unavailable"));
        }
        Ok(())
    }
}

#[async_trait]
impl LinkStore for MockStore {
    async fn create(&self, link: &ShortLink) -> Result<bool> {
        self.check()?;
        self.create_calls.fetch_add(1, Ordering::SeqCst);

        if self
            .conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            // 模拟另一个实例抢先写入了同一个码
            let mut rival = link.clone();
            rival.original_url = format!("{}#rival", link.original_url);
            self.links.lock().entry(link.code.clone()).or_insert(rival);
            return Ok(false);
        }

        let mut links = self.links.lock();
        if links.contains_key(&link.code) {
            return Ok(false);
        }
        links.insert(link.code.clone(), link.clone());
        Ok(true)
    }

    async fn get_by_code(&self, code: &str) -> Result<Option<ShortLink>> {
        self.check()?;
        Ok(self.get(code))
    }

    async fn get_by_url(&self, url: &str) -> Result<Option<ShortLink>> {
        self.check()?;
        let now = Utc::now();
        Ok(self
            .links
            .lock()
            .values()
            .filter(|l| l.original_url == url && l.is_active_at(now))
            .max_by_key(|l| l.created_at)
            .cloned())
    }

    async fn exists_by_code(&self, code: &str) -> Result<bool> {
        self.check()?;
        self.exists_calls.fetch_add(1, Ordering::SeqCst);
        if self.all_taken.load(Ordering::SeqCst) {
            return Ok(true);
        }
        Ok(self.links.lock().contains_key(code))
    }

    async fn all_codes(&self) -> Result<Vec<String>> {
        self.check()?;
        Ok(self.links.lock().keys().cloned().collect())
    }

    async fn count(&self) -> Result<u64> {
        self.check()?;
        Ok(self.links.lock().len() as u64)
    }

    async fn list_expired(&self, limit: u64) -> Result<Vec<ShortLink>> {
        self.check()?;
        let now = Utc::now();
        Ok(self
            .links
            .lock()
            .values()
            .filter(|l| l.is_expired_at(now))
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn delete_expired(&self) -> Result<u64> {
        self.check()?;
        let now = Utc::now();
        let mut links = self.links.lock();
        let before = links.len();
        links.retain(|_, l| !l.is_expired_at(now));
        Ok((before - links.len()) as u64)
    }

    async fn disable(&self, code: &str) -> Result<bool> {
        self.check()?;
        match self.links.lock().get_mut(code) {
            Some(link) => {
                link.status = LinkStatus::Disabled;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn insert_access_event(&self, event: &AccessEvent) -> Result<()> {
        self.check()?;
        self.events.lock().push(event.clone());
        Ok(())
    }

    async fn list_access_events(&self, code: &str, limit: u64) -> Result<Vec<AccessEvent>> {
        self.check()?;
        let mut events: Vec<AccessEvent> = self
            .events
            .lock()
            .iter()
            .filter(|e| e.code == code)
            .cloned()
            .collect();
        events.reverse();
        events.truncate(limit as usize);
        Ok(events)
    }

    fn backend_name(&self) -> &str {
        "mock"
    }
}

// =============================================================================
// FailingCache
// =============================================================================

/// Cache whose every call fails, as if Redis were down
pub struct FailingCache;

fn cache_down() -> OctolinkError {
    OctolinkError::cache_connection("mock cache unavailable")
}

#[async_trait]
impl KvCache for FailingCache {
    async fn set(&self, _key: &str, _value: &str, _ttl: Duration) -> Result<()> {
        Err(cache_down())
    }

    async fn get(&self, _key: &str) -> Result<Option<String>> {
        Err(cache_down())
    }

    async fn exists(&self, _key: &str) -> Result<bool> {
        Err(cache_down())
    }

    async fn incr(&self, _key: &str, _ttl: Duration) -> Result<i64> {
        Err(cache_down())
    }

    async fn sadd(&self, _key: &str, _member: &str, _ttl: Duration) -> Result<bool> {
        Err(cache_down())
    }

    async fn scard(&self, _key: &str) -> Result<u64> {
        Err(cache_down())
    }

    async fn scan_prefix(&self, _prefix: &str) -> Result<Vec<String>> {
        Err(cache_down())
    }

    async fn delete(&self, _key: &str) -> Result<bool> {
        Err(cache_down())
    }

    fn backend_name(&self) -> &'static str {
        "failing"
    }
}

/// Memory cache whose scans over source counters fail
#[derive(Default)]
pub struct SourceScanFailingCache {
    pub inner: MemoryCache,
}

#[async_trait]
impl KvCache for SourceScanFailingCache {
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        self.inner.set(key, value, ttl).await
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.inner.get(key).await
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        self.inner.exists(key).await
    }

    async fn incr(&self, key: &str, ttl: Duration) -> Result<i64> {
        self.inner.incr(key, ttl).await
    }

    async fn sadd(&self, key: &str, member: &str, ttl: Duration) -> Result<bool> {
        self.inner.sadd(key, member, ttl).await
    }

    async fn scard(&self, key: &str) -> Result<u64> {
        self.inner.scard(key).await
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        if prefix.starts_with("source:") {
            return Err(cache_down());
        }
        self.inner.scan_prefix(prefix).await
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        self.inner.delete(key).await
    }

    fn backend_name(&self) -> &'static str {
        "source_scan_failing"
    }
}

// =============================================================================
// MockIndex
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexMode {
    /// Every code "might" exist
    AlwaysMaybe,
    /// Every call fails
    Broken,
}

/// Membership index with a fixed answer; records every `add`
pub struct MockIndex {
    mode: IndexMode,
    added: Mutex<Vec<String>>,
}

impl MockIndex {
    pub fn new(mode: IndexMode) -> Self {
        Self {
            mode,
            added: Mutex::new(Vec::new()),
        }
    }

    pub fn added(&self) -> Vec<String> {
        self.added.lock().clone()
    }
}

#[async_trait]
impl MembershipIndex for MockIndex {
    async fn add(&self, code: &str) -> Result<()> {
        if self.mode == IndexMode::Broken {
            return Err(OctolinkError::index_backend("mock index down"));
        }
        self.added.lock().push(code.to_string());
        Ok(())
    }

    async fn bulk_add(&self, codes: &[String]) -> Result<()> {
        for code in codes {
            self.add(code).await?;
        }
        Ok(())
    }

    async fn exists(&self, _code: &str) -> Result<bool> {
        match self.mode {
            IndexMode::AlwaysMaybe => Ok(true),
            IndexMode::Broken => Err(OctolinkError::index_backend("mock index down")),
        }
    }

    async fn is_available(&self) -> bool {
        self.mode != IndexMode::Broken
    }

    async fn reset(&self) -> Result<()> {
        self.added.lock().clear();
        Ok(())
    }

    fn capacity(&self) -> u64 {
        0
    }

    fn backend_name(&self) -> &'static str {
        "mock"
    }
}

// =============================================================================
// Builders
// =============================================================================

pub fn test_options() -> LinkServiceOptions {
    LinkServiceOptions {
        domain: "https://s.test".to_string(),
        link_ttl: Duration::from_secs(3600),
        max_attempts_per_length: 16,
    }
}

pub fn local_index() -> Arc<LocalBloomIndex> {
    Arc::new(LocalBloomIndex::new(10_000, 0.001))
}

/// Service over a mock store, in-memory cache and local bloom index
pub fn create_service(store: Arc<MockStore>) -> (LinkService, Arc<MemoryCache>) {
    let cache = Arc::new(MemoryCache::new());
    let service = LinkService::new(store, cache.clone(), local_index(), test_options());
    (service, cache)
}

pub fn create_analytics(cache: Arc<dyn KvCache>) -> AnalyticsService {
    AnalyticsService::new(cache, Duration::from_secs(3600), 10)
}
