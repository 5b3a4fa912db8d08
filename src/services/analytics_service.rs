//! 实时访问统计
//!
//! PV、UV 与来源计数只存在于缓存中。所有读写都是尽力而为：
//! 失败时记录日志并按零处理。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{trace, warn};
use url::Url;

use crate::cache::{KvCache, keys};
use crate::config::AppConfig;
use crate::storage::AccessEvent;

/// 有序的平台关键词，按顺序取第一个匹配
const KNOWN_SOURCES: &[(&str, &str)] = &[
    ("google", "google"),
    ("baidu", "baidu"),
    ("bing", "bing"),
    ("weibo", "weibo"),
    ("weixin", "wechat"),
    ("wechat", "wechat"),
    ("qq", "qq"),
    ("zhihu", "zhihu"),
];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisitStats {
    pub pv: u64,
    pub uv: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceCount {
    pub source: String,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalyticsSnapshot {
    pub short_code: String,
    pub pv: u64,
    pub uv: u64,
    pub top_sources: Vec<SourceCount>,
}

/// 根据 referer 计算来源标签
///
/// 为空返回 `direct`，无法解析或没有主机名返回 `unknown`。
/// 已知平台按关键词匹配，其余取顶级域名左侧的一段
/// （`blog.example.com` 得到 `example`）。
pub fn extract_source(referer: &str) -> String {
    let referer = referer.trim();
    if referer.is_empty() {
        return "direct".to_string();
    }

    let Ok(parsed) = Url::parse(referer) else {
        return "unknown".to_string();
    };
    let Some(host) = parsed.host_str().filter(|h| !h.is_empty()) else {
        return "unknown".to_string();
    };
    let host = host.strip_prefix("www.").unwrap_or(host);

    if let Some((_, label)) = KNOWN_SOURCES.iter().find(|(kw, _)| host.contains(kw)) {
        return (*label).to_string();
    }

    let labels: Vec<&str> = host.split('.').collect();
    if labels.len() >= 2 {
        labels[labels.len() - 2].to_string()
    } else {
        host.to_string()
    }
}

/// 按计数降序，计数相同按标签排序
pub fn top_sources(counts: HashMap<String, u64>, limit: usize) -> Vec<SourceCount> {
    let mut sources: Vec<SourceCount> = counts
        .into_iter()
        .map(|(source, count)| SourceCount { source, count })
        .collect();
    sources.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.source.cmp(&b.source)));
    sources.truncate(limit);
    sources
}

fn day_of(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%d").to_string()
}

pub struct AnalyticsService {
    cache: Arc<dyn KvCache>,
    stats_ttl: Duration,
    top_n: usize,
}

impl AnalyticsService {
    pub fn new(cache: Arc<dyn KvCache>, stats_ttl: Duration, top_n: usize) -> Self {
        Self {
            cache,
            stats_ttl,
            top_n,
        }
    }

    pub fn from_config(cache: Arc<dyn KvCache>, config: &AppConfig) -> Self {
        Self::new(
            cache,
            Duration::from_secs(config.cache.stats_ttl_secs),
            config.analytics.top_sources,
        )
    }

    /// 记录一次当前时刻的访问，永不失败
    pub async fn record_access(&self, code: &str, client_ip: &str, user_agent: &str, referer: &str) {
        self.record_event(&AccessEvent::new(code, client_ip, user_agent, referer))
            .await;
    }

    /// 分别更新 PV、UV、来源三个计数，互不影响
    pub async fn record_event(&self, event: &AccessEvent) {
        let code = event.code.as_str();
        let day = day_of(event.timestamp);

        if let Err(e) = self.cache.incr(&keys::pv_key(code), self.stats_ttl).await {
            warn!("Failed to increment PV for {}: {}", code, e);
        }

        let visitor = format!("{}:{}", day, event.client_ip);
        if let Err(e) = self
            .cache
            .sadd(&keys::uv_key(code, &day), &visitor, self.stats_ttl)
            .await
        {
            warn!("Failed to add UV for {}: {}", code, e);
        }

        let source = extract_source(&event.referer);
        if !source.is_empty()
            && let Err(e) = self
                .cache
                .incr(&keys::source_key(code, &source, &day), self.stats_ttl)
                .await
        {
            warn!("Failed to count source '{}' for {}: {}", source, code, e);
        }

        trace!("Recorded visit to {} from {} via {}", code, event.client_ip, source);
    }

    pub async fn get_stats(&self, code: &str) -> VisitStats {
        VisitStats {
            pv: self.read_pv(code).await,
            uv: self.read_uv(code).await,
        }
    }

    pub async fn get_analytics(&self, code: &str) -> AnalyticsSnapshot {
        let stats = self.get_stats(code).await;
        let sources = self.read_sources(code).await;
        AnalyticsSnapshot {
            short_code: code.to_string(),
            pv: stats.pv,
            uv: stats.uv,
            top_sources: top_sources(sources, self.top_n),
        }
    }

    async fn read_pv(&self, code: &str) -> u64 {
        match self.cache.get(&keys::pv_key(code)).await {
            Ok(Some(raw)) => raw.parse().unwrap_or_else(|_| {
                warn!("PV counter for {} is not a number: '{}'", code, raw);
                0
            }),
            Ok(None) => 0,
            Err(e) => {
                warn!("Failed to read PV for {}: {}", code, e);
                0
            }
        }
    }

    /// 各天 UV 集合大小之和，同一 IP 跨天计两次
    async fn read_uv(&self, code: &str) -> u64 {
        let days = match self.cache.scan_prefix(&keys::uv_prefix(code)).await {
            Ok(found) => found,
            Err(e) => {
                warn!("Failed to list UV sets for {}: {}", code, e);
                return 0;
            }
        };

        let mut total = 0u64;
        for key in days {
            match self.cache.scard(&key).await {
                Ok(n) => total += n,
                Err(e) => warn!("Failed to read UV set {}: {}", key, e),
            }
        }
        total
    }

    async fn read_sources(&self, code: &str) -> HashMap<String, u64> {
        let mut counts = HashMap::new();
        let found = match self.cache.scan_prefix(&keys::source_prefix(code)).await {
            Ok(found) => found,
            Err(e) => {
                warn!("Failed to list sources for {}: {}", code, e);
                return counts;
            }
        };

        for key in found {
            let Some(label) = keys::source_label_from_key(code, &key) else {
                continue;
            };
            match self.cache.get(&key).await {
                Ok(Some(raw)) => {
                    let n: u64 = raw.parse().unwrap_or(0);
                    *counts.entry(label.to_string()).or_insert(0) += n;
                }
                Ok(None) => {}
                Err(e) => warn!("Failed to read source counter {}: {}", key, e),
            }
        }
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;

    #[test]
    fn test_extract_source() {
        assert_eq!(extract_source(""), "direct");
        assert_eq!(extract_source("://bad"), "unknown");
        assert_eq!(extract_source("https://www.google.com/search"), "google");
        assert_eq!(extract_source("https://blog.example.com"), "example");
        assert_eq!(extract_source("https://www.baidu.com/s?wd=x"), "baidu");
        assert_eq!(extract_source("https://mp.weixin.qq.com/s/abc"), "wechat");
        assert_eq!(extract_source("https://user.qzone.qq.com"), "qq");
        assert_eq!(extract_source("https://zhuanlan.zhihu.com/p/1"), "zhihu");
        assert_eq!(extract_source("http://localhost:3000/x"), "localhost");
        assert_eq!(extract_source("https://example.co.uk"), "co");
    }

    #[test]
    fn test_top_sources_order_and_limit() {
        let counts = HashMap::from([
            ("bing".to_string(), 3),
            ("google".to_string(), 7),
            ("direct".to_string(), 3),
            ("baidu".to_string(), 1),
        ]);
        let top = top_sources(counts, 3);
        let labels: Vec<&str> = top.iter().map(|s| s.source.as_str()).collect();
        assert_eq!(labels, vec!["google", "bing", "direct"]);
        assert_eq!(top[0].count, 7);
    }

    #[test]
    fn test_top_sources_empty() {
        assert!(top_sources(HashMap::new(), 10).is_empty());
    }

    #[tokio::test]
    async fn test_record_then_read() {
        let service = AnalyticsService::new(
            Arc::new(MemoryCache::new()),
            Duration::from_secs(60),
            10,
        );
        service
            .record_access("AAAB", "1.1.1.1", "ua", "https://www.google.com/")
            .await;
        service.record_access("AAAB", "1.1.1.1", "ua", "").await;
        service
            .record_access("AAAB", "2.2.2.2", "ua", "https://www.google.com/")
            .await;

        let stats = service.get_stats("AAAB").await;
        assert_eq!(stats, VisitStats { pv: 3, uv: 2 });

        let snapshot = service.get_analytics("AAAB").await;
        assert_eq!(snapshot.short_code, "AAAB");
        assert_eq!(
            snapshot.top_sources,
            vec![
                SourceCount { source: "google".into(), count: 2 },
                SourceCount { source: "direct".into(), count: 1 },
            ]
        );
    }

    #[tokio::test]
    async fn test_unknown_code_is_zero() {
        let service = AnalyticsService::new(Arc::new(MemoryCache::new()), Duration::ZERO, 10);
        let snapshot = service.get_analytics("ZZZZ").await;
        assert_eq!((snapshot.pv, snapshot.uv), (0, 0));
        assert!(snapshot.top_sources.is_empty());
    }

    #[tokio::test]
    async fn test_sources_merge_across_days() {
        let cache = Arc::new(MemoryCache::new());
        let ttl = Duration::from_secs(60);
        cache.incr(&keys::source_key("AAAB", "bing", "2026-01-01"), ttl).await.unwrap();
        cache.incr(&keys::source_key("AAAB", "bing", "2026-01-02"), ttl).await.unwrap();
        cache.incr(&keys::source_key("AAAB", "zhihu", "2026-01-02"), ttl).await.unwrap();

        let service = AnalyticsService::new(cache, ttl, 10);
        let top = service.get_analytics("AAAB").await.top_sources;
        assert_eq!(top[0], SourceCount { source: "bing".into(), count: 2 });
        assert_eq!(top[1], SourceCount { source: "zhihu".into(), count: 1 });
    }
}
