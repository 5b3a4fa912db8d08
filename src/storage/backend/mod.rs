//! SeaORM 存储后端
//!
//! 支持 SQLite、MySQL/MariaDB 和 PostgreSQL，类型由数据库 URL 推断。

mod connection;
mod converters;
mod mutations;
mod query;
pub mod retry;

use std::time::Duration;

use async_trait::async_trait;
use moka::sync::Cache;
use sea_orm::DatabaseConnection;
use tracing::warn;

use crate::config::DatabaseConfig;
use crate::errors::{OctolinkError, Result};
use crate::storage::{AccessEvent, LinkStore, ShortLink};

pub use connection::{connect_generic, connect_sqlite, run_migrations};
pub use converters::{
    access_event_to_active_model, model_to_access_event, model_to_shortlink,
    shortlink_to_active_model,
};

/// 从数据库 URL 推断数据库类型
pub fn infer_backend_from_url(database_url: &str) -> Result<String> {
    if database_url.starts_with("sqlite:")
        || database_url.ends_with(".db")
        || database_url.ends_with(".sqlite")
        || database_url == ":memory:"
    {
        Ok("sqlite".to_string())
    } else if database_url.starts_with("mysql://") || database_url.starts_with("mariadb://") {
        Ok("mysql".to_string())
    } else if database_url.starts_with("postgres://") || database_url.starts_with("postgresql://") {
        Ok("postgres".to_string())
    } else {
        Err(OctolinkError::database_config(format!(
            "cannot infer database type from URL: {}. Supported: sqlite://, mysql://, mariadb://, postgres://",
            database_url
        )))
    }
}

const COUNT_CACHE_KEY: &str = "links";

/// 基于 SeaORM 的存储后端
#[derive(Clone)]
pub struct SeaOrmStorage {
    db: DatabaseConnection,
    backend_name: String,
    /// COUNT 缓存（TTL 30秒）
    count_cache: Cache<String, u64>,
    retry_config: retry::RetryConfig,
}

impl SeaOrmStorage {
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        let database_url = config.database_url.as_str();
        if database_url.is_empty() {
            return Err(OctolinkError::database_config("database_url is not set"));
        }

        let backend_name = infer_backend_from_url(database_url)?;
        let retry_config = retry::RetryConfig {
            max_retries: config.retry_count,
            base_delay_ms: config.retry_base_delay_ms,
            max_delay_ms: config.retry_max_delay_ms,
        };

        let db = if backend_name == "sqlite" {
            connect_sqlite(database_url).await?
        } else {
            connect_generic(database_url, &backend_name, config).await?
        };

        let storage = SeaOrmStorage {
            db,
            backend_name,
            count_cache: Cache::builder()
                .time_to_live(Duration::from_secs(30))
                .max_capacity(16)
                .build(),
            retry_config,
        };

        run_migrations(&storage.db).await?;

        warn!("{} storage initialized", storage.backend_name.to_uppercase());
        Ok(storage)
    }

    pub fn get_db(&self) -> &DatabaseConnection {
        &self.db
    }

    /// 数据变更时清除 COUNT 缓存
    pub fn invalidate_count_cache(&self) {
        self.count_cache.invalidate_all();
    }
}

#[async_trait]
impl LinkStore for SeaOrmStorage {
    async fn create(&self, link: &ShortLink) -> Result<bool> {
        self.insert_link(link).await
    }

    async fn get_by_code(&self, code: &str) -> Result<Option<ShortLink>> {
        self.find_by_code(code).await
    }

    async fn get_by_url(&self, url: &str) -> Result<Option<ShortLink>> {
        self.find_active_by_url(url).await
    }

    async fn exists_by_code(&self, code: &str) -> Result<bool> {
        self.code_exists(code).await
    }

    async fn all_codes(&self) -> Result<Vec<String>> {
        self.load_all_codes().await
    }

    async fn count(&self) -> Result<u64> {
        self.count_links().await
    }

    async fn list_expired(&self, limit: u64) -> Result<Vec<ShortLink>> {
        self.find_expired(limit).await
    }

    async fn delete_expired(&self) -> Result<u64> {
        self.remove_expired().await
    }

    async fn disable(&self, code: &str) -> Result<bool> {
        self.mark_disabled(code).await
    }

    async fn insert_access_event(&self, event: &AccessEvent) -> Result<()> {
        self.append_access_event(event).await
    }

    async fn list_access_events(&self, code: &str, limit: u64) -> Result<Vec<AccessEvent>> {
        self.find_access_events(code, limit).await
    }

    fn backend_name(&self) -> &str {
        &self.backend_name
    }
}
