//! Link resolution engine
//!
//! Generation (cache, durable de-dup, encode and collision loop, persist,
//! cache populate, index update) and resolution (cache, then durable store).
//! Stateless between calls: everything lives behind the three capability
//! traits.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};
use xxhash_rust::xxh64::xxh64;

use crate::cache::{KvCache, keys};
use crate::config::AppConfig;
use crate::encoder;
use crate::errors::{OctolinkError, Result};
use crate::index::MembershipIndex;
use crate::storage::{LinkStatus, LinkStore, ParamTemplate, ShortLink};
use crate::utils::time_parser::parse_expire_at;
use crate::utils::url::{merge_query, validate_url};

const HASH_SEED: u64 = 0;

// ============ Request/Response DTOs ============

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GenerateRequest {
    pub url: String,
    #[serde(default)]
    pub params: Option<ParamTemplate>,
    /// RFC3339 or a relative span such as "7d"
    #[serde(default)]
    pub expire_at: Option<String>,
}

impl GenerateRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn with_params(mut self, params: ParamTemplate) -> Self {
        self.params = Some(params);
        self
    }

    pub fn with_expire_at(mut self, expire_at: impl Into<String>) -> Self {
        self.expire_at = Some(expire_at.into());
        self
    }
}

/// Public rendering of a generated link
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerateResponse {
    pub short_link: String,
    pub short_code: String,
    pub original_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expire_at: Option<DateTime<Utc>>,
}

/// Tunables the engine needs from the loaded configuration
#[derive(Debug, Clone)]
pub struct LinkServiceOptions {
    pub domain: String,
    pub link_ttl: Duration,
    pub max_attempts_per_length: u32,
}

impl Default for LinkServiceOptions {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl From<&AppConfig> for LinkServiceOptions {
    fn from(config: &AppConfig) -> Self {
        Self {
            domain: config.server.domain.trim_end_matches('/').to_string(),
            link_ttl: Duration::from_secs(config.cache.link_ttl_secs),
            max_attempts_per_length: config.generator.max_attempts_per_length,
        }
    }
}

/// Authoritative reads and writes surface as persistence failures.
fn authoritative(err: OctolinkError) -> OctolinkError {
    match err {
        OctolinkError::Persistence(_) => err,
        other => OctolinkError::persistence(other.message().to_string()),
    }
}

// ============ LinkService Implementation ============

pub struct LinkService {
    store: Arc<dyn LinkStore>,
    cache: Arc<dyn KvCache>,
    index: Arc<dyn MembershipIndex>,
    options: LinkServiceOptions,
}

impl LinkService {
    pub fn new(
        store: Arc<dyn LinkStore>,
        cache: Arc<dyn KvCache>,
        index: Arc<dyn MembershipIndex>,
        options: LinkServiceOptions,
    ) -> Self {
        Self {
            store,
            cache,
            index,
            options,
        }
    }

    pub fn store(&self) -> &Arc<dyn LinkStore> {
        &self.store
    }

    pub fn index(&self) -> &Arc<dyn MembershipIndex> {
        &self.index
    }

    /// `{domain}/{code}`
    pub fn short_link(&self, code: &str) -> String {
        format!("{}/{}", self.options.domain, code)
    }

    pub fn render(&self, link: &ShortLink) -> GenerateResponse {
        GenerateResponse {
            short_link: self.short_link(&link.code),
            short_code: link.code.clone(),
            original_url: link.original_url.clone(),
            expire_at: link.expire_at,
        }
    }

    /// Cache lifetime for `link`, never outliving its expiry.
    fn link_ttl(&self, link: &ShortLink, now: DateTime<Utc>) -> Duration {
        match link.expire_at {
            Some(exp) => {
                // 零 TTL 表示永不过期，这里至少保留一秒
                let remaining = (exp - now)
                    .to_std()
                    .unwrap_or(Duration::ZERO)
                    .max(Duration::from_secs(1));
                if self.options.link_ttl.is_zero() {
                    remaining
                } else {
                    remaining.min(self.options.link_ttl)
                }
            }
            None => self.options.link_ttl,
        }
    }

    // ============ Generate ============

    /// Map `req.url` (plus optional template) to a short code.
    ///
    /// Repeated identical requests return the same link. A fresh code is
    /// searched from length 4 upwards; once every length is saturated the
    /// call fails with `CapacityExhausted`.
    pub async fn generate(&self, req: GenerateRequest) -> Result<ShortLink> {
        let url = req.url.trim().to_string();
        validate_url(&url)?;

        let now = Utc::now();
        let expire_at = match req.expire_at.as_deref().map(str::trim) {
            Some(s) if !s.is_empty() => Some(parse_expire_at(s, now)?),
            _ => None,
        };
        let params = req.params.filter(|p| !p.is_empty());
        let composite = keys::composite_key(&url, params.as_ref());

        if let Some(link) = self.cached_generation(&composite).await {
            debug!("Generate cache hit for '{}' -> {}", url, link.code);
            return Ok(link);
        }

        if let Some(existing) = self.store.get_by_url(&url).await.map_err(authoritative)? {
            debug!("Generate reused stored link {} for '{}'", existing.code, url);
            self.populate_cache(&composite, &existing).await;
            return Ok(existing);
        }

        let link = self.create_with_fresh_code(&url, params, expire_at).await?;
        self.populate_cache(&composite, &link).await;
        if let Err(e) = self.index.add(&link.code).await {
            warn!("Failed to add {} to membership index: {}", link.code, e);
        }

        info!("Generated short link {} -> '{}'", link.code, link.original_url);
        Ok(link)
    }

    /// Composite-key cache hit that still resolves to an active stored link.
    async fn cached_generation(&self, composite: &str) -> Option<ShortLink> {
        let code = match self.cache.get(&keys::url_key(composite)).await {
            Ok(Some(code)) => code,
            Ok(None) => return None,
            Err(e) => {
                warn!("Cache read failed during generate: {}", e);
                return None;
            }
        };

        match self.store.get_by_code(&code).await {
            Ok(Some(link)) if link.is_active() => Some(link),
            Ok(_) => {
                debug!("Cached code {} is gone or inactive; ignoring", code);
                None
            }
            Err(e) => {
                warn!("Store lookup for cached code {} failed: {}", code, e);
                None
            }
        }
    }

    async fn create_with_fresh_code(
        &self,
        url: &str,
        params: Option<ParamTemplate>,
        expire_at: Option<DateTime<Utc>>,
    ) -> Result<ShortLink> {
        let base = xxh64(url.as_bytes(), HASH_SEED);

        for length in encoder::MIN_LENGTH..=encoder::MAX_LENGTH {
            for attempt in 0..self.options.max_attempts_per_length {
                let code = encoder::encode(base.wrapping_add(u64::from(attempt)), length);
                if !self.is_code_free(&code).await? {
                    continue;
                }

                let link = ShortLink::new(code, url, params.clone(), expire_at);
                if self.store.create(&link).await.map_err(authoritative)? {
                    return Ok(link);
                }

                // 并发生成抢占了同一个码
                debug!("Lost insert race for {}; retrying", link.code);
                if let Err(e) = self.index.add(&link.code).await {
                    warn!("Failed to add {} to membership index: {}", link.code, e);
                }
            }
            debug!("Code length {} saturated for '{}'; escalating", length, url);
        }

        error!("Code space exhausted at every supported length for '{}'", url);
        Err(OctolinkError::capacity_exhausted(format!(
            "no free code of length {}..={} after {} attempts per length",
            encoder::MIN_LENGTH,
            encoder::MAX_LENGTH,
            self.options.max_attempts_per_length
        )))
    }

    /// Index says "absent": trust it. Index says "maybe" or is unreachable:
    /// ask the store.
    async fn is_code_free(&self, code: &str) -> Result<bool> {
        match self.index.exists(code).await {
            Ok(false) => return Ok(true),
            Ok(true) => {}
            Err(e) => debug!("Membership index check for {} failed: {}", code, e),
        }
        let taken = self.store.exists_by_code(code).await.map_err(authoritative)?;
        Ok(!taken)
    }

    async fn populate_cache(&self, composite: &str, link: &ShortLink) {
        let ttl = self.link_ttl(link, Utc::now());
        if let Err(e) = self.cache.set(&keys::url_key(composite), &link.code, ttl).await {
            warn!("Failed to cache url mapping for {}: {}", link.code, e);
        }
        if let Err(e) = self
            .cache
            .set(&keys::link_key(&link.code), &link.original_url, ttl)
            .await
        {
            warn!("Failed to cache link {}: {}", link.code, e);
        }
    }

    // ============ Resolve ============

    /// Look up `code`, cache first.
    ///
    /// A cache hit is returned as-is without re-checking status or expiry;
    /// the cache TTL is capped at the link's expiry when it is populated.
    pub async fn resolve(&self, code: &str) -> Result<ShortLink> {
        match self.cache.get(&keys::link_key(code)).await {
            Ok(Some(url)) => {
                debug!("Resolve cache hit for {}", code);
                return Ok(ShortLink {
                    code: code.to_string(),
                    original_url: url,
                    param_template: None,
                    created_at: Utc::now(),
                    expire_at: None,
                    status: LinkStatus::Active,
                });
            }
            Ok(None) => {}
            Err(e) => warn!("Cache read failed while resolving {}: {}", code, e),
        }

        let link = self
            .store
            .get_by_code(code)
            .await
            .map_err(authoritative)?
            .ok_or_else(|| OctolinkError::not_found(format!("short code '{}' not found", code)))?;

        let now = Utc::now();
        if !link.is_active_at(now) {
            return Err(OctolinkError::expired(format!(
                "short code '{}' is expired or disabled",
                code
            )));
        }

        let ttl = self.link_ttl(&link, now);
        if let Err(e) = self
            .cache
            .set(&keys::link_key(code), &link.original_url, ttl)
            .await
        {
            warn!("Failed to cache link {}: {}", code, e);
        }
        Ok(link)
    }

    /// Redirect target for `code` with `query` merged into the stored URL.
    ///
    /// The stored parameter template is not replayed here.
    pub async fn expand_url(&self, code: &str, query: &BTreeMap<String, String>) -> Result<String> {
        let link = self.resolve(code).await?;
        Ok(merge_query(&link.original_url, query))
    }

    // ============ Maintenance ============

    /// Disable `code` and drop its cached mapping.
    pub async fn disable(&self, code: &str) -> Result<bool> {
        let changed = self.store.disable(code).await.map_err(authoritative)?;
        if let Err(e) = self.cache.delete(&keys::link_key(code)).await {
            warn!("Failed to evict {} from cache: {}", code, e);
        }
        Ok(changed)
    }

    /// Delete expired links and evict their cached mappings.
    pub async fn purge_expired(&self, batch: u64) -> Result<u64> {
        let expired = self.store.list_expired(batch).await.map_err(authoritative)?;
        for link in &expired {
            if let Err(e) = self.cache.delete(&keys::link_key(&link.code)).await {
                warn!("Failed to evict {} from cache: {}", link.code, e);
            }
        }
        let removed = self.store.delete_expired().await.map_err(authoritative)?;
        if removed > 0 {
            info!("Removed {} expired short links", removed);
        }
        Ok(removed)
    }
}
