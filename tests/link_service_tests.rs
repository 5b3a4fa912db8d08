//! LinkService tests
//!
//! Generation, collision handling, resolution and expansion against mock
//! backends.

mod common;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use chrono::{Duration as ChronoDuration, Utc};
use xxhash_rust::xxh64::xxh64;

use octolink::cache::{KvCache, MemoryCache, keys};
use octolink::encoder;
use octolink::errors::OctolinkError;
use octolink::services::{GenerateRequest, LinkService, LinkServiceOptions};
use octolink::storage::{LinkStatus, ParamTemplate, ShortLink};

use common::{FailingCache, IndexMode, MockIndex, MockStore, create_service, local_index, test_options};

fn code_for(url: &str, offset: u64, length: usize) -> String {
    encoder::encode(xxh64(url.as_bytes(), 0).wrapping_add(offset), length)
}

fn template(pairs: &[(&str, &str)]) -> ParamTemplate {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

// =============================================================================
// Generate
// =============================================================================

#[tokio::test]
async fn test_generate_is_deterministic() {
    let store = Arc::new(MockStore::new());
    let (service, _cache) = create_service(store.clone());

    let link = service
        .generate(GenerateRequest::new("https://example.com/page"))
        .await
        .unwrap();

    assert_eq!(link.code, code_for("https://example.com/page", 0, 4));
    assert_eq!(link.code.len(), encoder::MIN_LENGTH);
    assert!(encoder::is_valid(&link.code));
    assert_eq!(link.status, LinkStatus::Active);
    assert_eq!(store.len(), 1);
}

#[tokio::test]
async fn test_generate_twice_returns_same_link() {
    let store = Arc::new(MockStore::new());
    let (service, _cache) = create_service(store.clone());

    let first = service
        .generate(GenerateRequest::new("https://example.com/a"))
        .await
        .unwrap();
    let second = service
        .generate(GenerateRequest::new("https://example.com/a"))
        .await
        .unwrap();

    assert_eq!(first.code, second.code);
    assert_eq!(store.len(), 1);
    assert_eq!(store.create_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_generate_reuses_stored_link_on_cache_miss() {
    let store = Arc::new(MockStore::new());
    let (service, _cache) = create_service(store.clone());
    let first = service
        .generate(GenerateRequest::new("https://example.com/b"))
        .await
        .unwrap();

    // 新实例的缓存是空的，只能靠存储去重
    let (fresh, _) = create_service(store.clone());
    let again = fresh
        .generate(GenerateRequest::new("https://example.com/b"))
        .await
        .unwrap();

    assert_eq!(first.code, again.code);
    assert_eq!(store.create_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_generate_trims_url() {
    let store = Arc::new(MockStore::new());
    let (service, _cache) = create_service(store);

    let a = service
        .generate(GenerateRequest::new("  https://example.com/c  "))
        .await
        .unwrap();
    assert_eq!(a.original_url, "https://example.com/c");

    let b = service
        .generate(GenerateRequest::new("https://example.com/c"))
        .await
        .unwrap();
    assert_eq!(a.code, b.code);
}

#[tokio::test]
async fn test_generate_different_urls() {
    let store = Arc::new(MockStore::new());
    let (service, _cache) = create_service(store.clone());

    let a = service
        .generate(GenerateRequest::new("https://example.com/1"))
        .await
        .unwrap();
    let b = service
        .generate(GenerateRequest::new("https://example.com/2"))
        .await
        .unwrap();

    assert_ne!(a.code, b.code);
    assert_eq!(store.len(), 2);
}

#[tokio::test]
async fn test_generate_stores_template() {
    let store = Arc::new(MockStore::new());
    let (service, _cache) = create_service(store.clone());

    let link = service
        .generate(
            GenerateRequest::new("https://example.com/t")
                .with_params(template(&[("utm_source", "mail")])),
        )
        .await
        .unwrap();

    let stored = store.get(&link.code).unwrap();
    assert_eq!(
        stored
            .param_template
            .as_ref()
            .and_then(|p| p.get("utm_source"))
            .map(String::as_str),
        Some("mail")
    );
}

#[tokio::test]
async fn test_templates_get_separate_cache_entries() {
    let store = Arc::new(MockStore::new());
    let (service, cache) = create_service(store.clone());
    let url = "https://example.com/campaign";

    let first = service
        .generate(GenerateRequest::new(url).with_params(template(&[("a", "1")])))
        .await
        .unwrap();

    // 库中出现更新的同 URL 记录，只有走库去重才能拿到它
    let mut newer = ShortLink::new("ZZZZ", url, None, None);
    newer.created_at = Utc::now() + ChronoDuration::minutes(1);
    store.insert(newer);

    let second = service
        .generate(GenerateRequest::new(url).with_params(template(&[("a", "2")])))
        .await
        .unwrap();
    assert_eq!(second.code, "ZZZZ");
    assert_ne!(second.code, first.code);
    assert_eq!(store.create_calls.load(Ordering::SeqCst), 1);

    let first_key = keys::url_key(&keys::composite_key(url, Some(&template(&[("a", "1")]))));
    let second_key = keys::url_key(&keys::composite_key(url, Some(&template(&[("a", "2")]))));
    assert_ne!(first_key, second_key);
    assert_eq!(cache.get(&first_key).await.unwrap(), Some(first.code.clone()));
    assert_eq!(cache.get(&second_key).await.unwrap(), Some("ZZZZ".to_string()));
    assert_eq!(cache.scan_prefix("url:").await.unwrap().len(), 2);

    // 第一个模板仍命中自己的缓存
    let again = service
        .generate(GenerateRequest::new(url).with_params(template(&[("a", "1")])))
        .await
        .unwrap();
    assert_eq!(again.code, first.code);
}

#[tokio::test]
async fn test_generate_rejects_invalid_urls() {
    let store = Arc::new(MockStore::new());
    let (service, _cache) = create_service(store.clone());

    for url in ["", "   ", "not a url", "ftp://example.com", "javascript:alert(1)"] {
        let err = service.generate(GenerateRequest::new(url)).await.unwrap_err();
        assert!(
            matches!(err, OctolinkError::InvalidInput(_)),
            "expected InvalidInput for {:?}, got {:?}",
            url,
            err
        );
    }

    let long = format!("https://example.com/{}", "a".repeat(2100));
    let err = service.generate(GenerateRequest::new(long)).await.unwrap_err();
    assert!(matches!(err, OctolinkError::InvalidInput(_)));

    assert_eq!(store.len(), 0);
}

#[tokio::test]
async fn test_generate_with_relative_expiry() {
    let store = Arc::new(MockStore::new());
    let (service, _cache) = create_service(store);

    let before = Utc::now();
    let link = service
        .generate(GenerateRequest::new("https://example.com/exp").with_expire_at("1d"))
        .await
        .unwrap();

    let expire_at = link.expire_at.unwrap();
    assert!(expire_at >= before + ChronoDuration::days(1));
    assert!(expire_at <= Utc::now() + ChronoDuration::days(1));
}

#[tokio::test]
async fn test_generate_with_rfc3339_expiry() {
    let store = Arc::new(MockStore::new());
    let (service, _cache) = create_service(store);

    let link = service
        .generate(
            GenerateRequest::new("https://example.com/rfc").with_expire_at("2099-01-01T00:00:00Z"),
        )
        .await
        .unwrap();

    assert_eq!(link.expire_at.unwrap().to_rfc3339(), "2099-01-01T00:00:00+00:00");
}

#[tokio::test]
async fn test_generate_rejects_bad_expiry() {
    let store = Arc::new(MockStore::new());
    let (service, _cache) = create_service(store.clone());

    let err = service
        .generate(GenerateRequest::new("https://example.com/bad").with_expire_at("soon"))
        .await
        .unwrap_err();
    assert!(matches!(err, OctolinkError::DateParse(_)));
    assert_eq!(store.len(), 0);
}

#[tokio::test]
async fn test_blank_expiry_means_none() {
    let store = Arc::new(MockStore::new());
    let (service, _cache) = create_service(store);

    let link = service
        .generate(GenerateRequest::new("https://example.com/blank").with_expire_at("  "))
        .await
        .unwrap();
    assert!(link.expire_at.is_none());
}

// =============================================================================
// Collisions
// =============================================================================

#[tokio::test]
async fn test_collision_tries_next_offset() {
    let url = "https://example.com/collide";
    let store = Arc::new(MockStore::new());
    store.insert(ShortLink::new(code_for(url, 0, 4), "https://other.com", None, None));

    let index = Arc::new(MockIndex::new(IndexMode::AlwaysMaybe));
    let service = LinkService::new(
        store.clone(),
        Arc::new(MemoryCache::new()),
        index.clone(),
        test_options(),
    );

    let link = service.generate(GenerateRequest::new(url)).await.unwrap();
    assert_eq!(link.code, code_for(url, 1, 4));
    assert_eq!(store.get(&code_for(url, 0, 4)).unwrap().original_url, "https://other.com");
    assert_eq!(index.added(), vec![link.code.clone()]);
}

#[tokio::test]
async fn test_saturated_length_escalates() {
    let url = "https://example.com/escalate";
    let store = Arc::new(MockStore::new());
    store.insert(ShortLink::new(code_for(url, 0, 4), "https://other.com", None, None));

    let service = LinkService::new(
        store.clone(),
        Arc::new(MemoryCache::new()),
        Arc::new(MockIndex::new(IndexMode::AlwaysMaybe)),
        LinkServiceOptions {
            max_attempts_per_length: 1,
            ..test_options()
        },
    );

    let link = service.generate(GenerateRequest::new(url)).await.unwrap();
    assert_eq!(link.code.len(), 5);
    assert_eq!(link.code, code_for(url, 0, 5));
}

#[tokio::test]
async fn test_capacity_exhausted() {
    let store = Arc::new(MockStore::new());
    store.all_taken.store(true, Ordering::SeqCst);

    let service = LinkService::new(
        store.clone(),
        Arc::new(MemoryCache::new()),
        Arc::new(MockIndex::new(IndexMode::AlwaysMaybe)),
        LinkServiceOptions {
            max_attempts_per_length: 2,
            ..test_options()
        },
    );

    let err = service
        .generate(GenerateRequest::new("https://example.com/full"))
        .await
        .unwrap_err();
    assert!(matches!(err, OctolinkError::CapacityExhausted(_)));

    let lengths = encoder::MAX_LENGTH - encoder::MIN_LENGTH + 1;
    assert_eq!(store.exists_calls.load(Ordering::SeqCst), 2 * lengths);
    assert_eq!(store.create_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_lost_insert_race_retries() {
    let url = "https://example.com/race";
    let store = Arc::new(MockStore::new());
    store.conflicts.store(1, Ordering::SeqCst);

    let index = local_index();
    let service = LinkService::new(
        store.clone(),
        Arc::new(MemoryCache::new()),
        index.clone(),
        test_options(),
    );

    let link = service.generate(GenerateRequest::new(url)).await.unwrap();
    assert_eq!(link.code, code_for(url, 1, 4));
    assert_eq!(store.create_calls.load(Ordering::SeqCst), 2);

    use octolink::index::MembershipIndex;
    // 输掉竞争的码也要进索引
    assert!(index.exists(&code_for(url, 0, 4)).await.unwrap());
    assert!(index.exists(&link.code).await.unwrap());
}

#[tokio::test]
async fn test_index_failure_falls_back_to_store() {
    let store = Arc::new(MockStore::new());
    let service = LinkService::new(
        store.clone(),
        Arc::new(MemoryCache::new()),
        Arc::new(MockIndex::new(IndexMode::Broken)),
        test_options(),
    );

    let link = service
        .generate(GenerateRequest::new("https://example.com/idx"))
        .await
        .unwrap();

    assert_eq!(link.code, code_for("https://example.com/idx", 0, 4));
    assert_eq!(store.exists_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_index_absent_skips_store_check() {
    let store = Arc::new(MockStore::new());
    let (service, _cache) = create_service(store.clone());

    service
        .generate(GenerateRequest::new("https://example.com/fast"))
        .await
        .unwrap();
    assert_eq!(store.exists_calls.load(Ordering::SeqCst), 0);
}

// =============================================================================
// Failure handling
// =============================================================================

#[tokio::test]
async fn test_store_failure_is_persistence_error() {
    let store = Arc::new(MockStore::failing());
    let (service, _cache) = create_service(store);

    let err = service
        .generate(GenerateRequest::new("https://example.com/down"))
        .await
        .unwrap_err();
    assert!(matches!(err, OctolinkError::Persistence(_)));

    let err = service.resolve("ABCD").await.unwrap_err();
    assert!(matches!(err, OctolinkError::Persistence(_)));
}

#[tokio::test]
async fn test_cache_failure_is_tolerated() {
    let store = Arc::new(MockStore::new());
    let service = LinkService::new(
        store.clone(),
        Arc::new(FailingCache),
        local_index(),
        test_options(),
    );

    let link = service
        .generate(GenerateRequest::new("https://example.com/nocache"))
        .await
        .unwrap();
    let resolved = service.resolve(&link.code).await.unwrap();
    assert_eq!(resolved.original_url, "https://example.com/nocache");

    let again = service
        .generate(GenerateRequest::new("https://example.com/nocache"))
        .await
        .unwrap();
    assert_eq!(again.code, link.code);
    assert_eq!(store.len(), 1);
}

#[tokio::test]
async fn test_stale_generation_cache_is_ignored() {
    let url = "https://example.com/stale";
    let store = Arc::new(MockStore::new());
    let (service, _cache) = create_service(store.clone());

    let first = service.generate(GenerateRequest::new(url)).await.unwrap();
    assert!(service.disable(&first.code).await.unwrap());

    let second = service.generate(GenerateRequest::new(url)).await.unwrap();
    assert_ne!(first.code, second.code);
    assert_eq!(second.code, code_for(url, 1, 4));
}

// =============================================================================
// Resolve
// =============================================================================

#[tokio::test]
async fn test_resolve_unknown_code() {
    let store = Arc::new(MockStore::new());
    let (service, _cache) = create_service(store);

    let err = service.resolve("ZZZZ").await.unwrap_err();
    assert!(matches!(err, OctolinkError::NotFound(_)));
}

#[tokio::test]
async fn test_resolve_expired_link() {
    let store = Arc::new(MockStore::new());
    store.insert(ShortLink::new(
        "OLDD",
        "https://example.com/old",
        None,
        Some(Utc::now() - ChronoDuration::minutes(1)),
    ));
    let (service, cache) = create_service(store);

    let err = service.resolve("OLDD").await.unwrap_err();
    assert!(matches!(err, OctolinkError::Expired(_)));
    assert!(cache.get(&keys::link_key("OLDD")).await.unwrap().is_none());
}

#[tokio::test]
async fn test_resolve_disabled_link() {
    let store = Arc::new(MockStore::new());
    let (service, _cache) = create_service(store);

    let link = service
        .generate(GenerateRequest::new("https://example.com/off"))
        .await
        .unwrap();
    service.disable(&link.code).await.unwrap();

    let err = service.resolve(&link.code).await.unwrap_err();
    assert!(matches!(err, OctolinkError::Expired(_)));
}

#[tokio::test]
async fn test_resolve_populates_cache() {
    let store = Arc::new(MockStore::new());
    store.insert(ShortLink::new("ABCD", "https://example.com/x", None, None));
    let (service, cache) = create_service(store.clone());

    let link = service.resolve("ABCD").await.unwrap();
    assert_eq!(link.original_url, "https://example.com/x");
    assert_eq!(
        cache.get(&keys::link_key("ABCD")).await.unwrap().as_deref(),
        Some("https://example.com/x")
    );

    // 缓存命中时不再访问存储
    store.fail.store(true, Ordering::SeqCst);
    let cached = service.resolve("ABCD").await.unwrap();
    assert_eq!(cached.original_url, "https://example.com/x");
}

// =============================================================================
// ExpandURL
// =============================================================================

#[tokio::test]
async fn test_expand_url_merges_query() {
    let store = Arc::new(MockStore::new());
    store.insert(ShortLink::new("QUER", "https://example.com/p?a=1&b=2", None, None));
    let (service, _cache) = create_service(store);

    let mut query = BTreeMap::new();
    query.insert("b".to_string(), "9".to_string());
    query.insert("c".to_string(), "3".to_string());

    let target = service.expand_url("QUER", &query).await.unwrap();
    assert_eq!(target, "https://example.com/p?a=1&b=9&c=3");
}

#[tokio::test]
async fn test_expand_url_without_query() {
    let store = Arc::new(MockStore::new());
    store.insert(ShortLink::new("PLAN", "https://example.com/plain", None, None));
    let (service, _cache) = create_service(store);

    let target = service.expand_url("PLAN", &BTreeMap::new()).await.unwrap();
    assert_eq!(target, "https://example.com/plain");
}

#[tokio::test]
async fn test_expand_url_does_not_replay_template() {
    let store = Arc::new(MockStore::new());
    store.insert(ShortLink::new(
        "TMPL",
        "https://example.com/t",
        Some(template(&[("utm", "x")])),
        None,
    ));
    let (service, _cache) = create_service(store);

    let target = service.expand_url("TMPL", &BTreeMap::new()).await.unwrap();
    assert_eq!(target, "https://example.com/t");
}

#[tokio::test]
async fn test_expand_url_missing_code() {
    let store = Arc::new(MockStore::new());
    let (service, _cache) = create_service(store);

    let err = service.expand_url("NONE", &BTreeMap::new()).await.unwrap_err();
    assert!(matches!(err, OctolinkError::NotFound(_)));
}

// =============================================================================
// Maintenance
// =============================================================================

#[tokio::test]
async fn test_purge_expired_evicts_cache() {
    let store = Arc::new(MockStore::new());
    store.insert(ShortLink::new(
        "GONE",
        "https://example.com/gone",
        None,
        Some(Utc::now() - ChronoDuration::seconds(5)),
    ));
    store.insert(ShortLink::new("KEEP", "https://example.com/keep", None, None));
    let (service, cache) = create_service(store.clone());

    cache
        .set(&keys::link_key("GONE"), "https://example.com/gone", std::time::Duration::ZERO)
        .await
        .unwrap();

    let removed = service.purge_expired(100).await.unwrap();
    assert_eq!(removed, 1);
    assert!(store.get("GONE").is_none());
    assert!(store.get("KEEP").is_some());
    assert!(cache.get(&keys::link_key("GONE")).await.unwrap().is_none());
}

#[tokio::test]
async fn test_render_uses_domain() {
    let store = Arc::new(MockStore::new());
    let (service, _cache) = create_service(store);

    let link = service
        .generate(GenerateRequest::new("https://example.com/r"))
        .await
        .unwrap();
    let rendered = service.render(&link);
    assert_eq!(rendered.short_link, format!("https://s.test/{}", link.code));
    assert_eq!(rendered.short_code, link.code);
    assert_eq!(rendered.original_url, "https://example.com/r");
}
