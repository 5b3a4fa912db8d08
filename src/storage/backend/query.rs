//! SeaOrmStorage 的只读操作

use chrono::Utc;
use sea_orm::{
    ColumnTrait, Condition, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, QuerySelect,
};
use tracing::{debug, info};

use super::converters::{model_to_access_event, model_to_shortlink};
use super::{COUNT_CACHE_KEY, SeaOrmStorage, retry};
use crate::errors::{OctolinkError, Result};
use crate::storage::{AccessEvent, LinkStatus, ShortLink};

use migration::entities::{access_log, short_link};

impl SeaOrmStorage {
    pub(super) async fn find_by_code(&self, code: &str) -> Result<Option<ShortLink>> {
        let db = &self.db;
        let code_owned = code.to_string();

        let model = retry::with_retry(&format!("get_by_code({})", code), self.retry_config, || async {
            short_link::Entity::find_by_id(code_owned.clone()).one(db).await
        })
        .await
        .map_err(|e| OctolinkError::persistence(format!("failed to load '{}': {}", code, e)))?;

        Ok(model.map(model_to_shortlink))
    }

    pub(super) async fn find_active_by_url(&self, url: &str) -> Result<Option<ShortLink>> {
        let db = &self.db;
        let now = Utc::now();

        let model = retry::with_retry("get_by_url", self.retry_config, || async {
            short_link::Entity::find()
                .filter(short_link::Column::OriginalUrl.eq(url))
                .filter(short_link::Column::Status.eq(LinkStatus::Active.as_ref()))
                .filter(
                    Condition::any()
                        .add(short_link::Column::ExpireAt.is_null())
                        .add(short_link::Column::ExpireAt.gt(now)),
                )
                .order_by_desc(short_link::Column::CreatedAt)
                .one(db)
                .await
        })
        .await
        .map_err(|e| OctolinkError::persistence(format!("failed to look up url: {}", e)))?;

        Ok(model.map(model_to_shortlink))
    }

    pub(super) async fn code_exists(&self, code: &str) -> Result<bool> {
        let db = &self.db;
        let code_owned = code.to_string();

        let count = retry::with_retry(&format!("exists({})", code), self.retry_config, || async {
            short_link::Entity::find()
                .filter(short_link::Column::ShortCode.eq(code_owned.as_str()))
                .count(db)
                .await
        })
        .await
        .map_err(|e| {
            OctolinkError::persistence(format!("existence check for '{}' failed: {}", code, e))
        })?;

        Ok(count > 0)
    }

    /// 只加载短码（用于成员索引预热）
    pub(super) async fn load_all_codes(&self) -> Result<Vec<String>> {
        let codes: Vec<String> = short_link::Entity::find()
            .select_only()
            .column(short_link::Column::ShortCode)
            .into_tuple::<String>()
            .all(&self.db)
            .await
            .map_err(|e| OctolinkError::persistence(format!("failed to load codes: {}", e)))?;

        info!("Loaded {} short codes for the membership index", codes.len());
        Ok(codes)
    }

    pub(super) async fn count_links(&self) -> Result<u64> {
        if let Some(cached) = self.count_cache.get(COUNT_CACHE_KEY) {
            debug!("Link count cache hit: {}", cached);
            return Ok(cached);
        }

        let db = &self.db;
        let count = retry::with_retry("count", self.retry_config, || async {
            short_link::Entity::find().count(db).await
        })
        .await
        .map_err(|e| OctolinkError::persistence(format!("failed to count links: {}", e)))?;

        self.count_cache.insert(COUNT_CACHE_KEY.to_string(), count);
        Ok(count)
    }

    pub(super) async fn find_expired(&self, limit: u64) -> Result<Vec<ShortLink>> {
        let models = short_link::Entity::find()
            .filter(short_link::Column::ExpireAt.is_not_null())
            .filter(short_link::Column::ExpireAt.lte(Utc::now()))
            .order_by_asc(short_link::Column::ExpireAt)
            .limit(limit)
            .all(&self.db)
            .await
            .map_err(|e| {
                OctolinkError::persistence(format!("failed to list expired links: {}", e))
            })?;

        Ok(models.into_iter().map(model_to_shortlink).collect())
    }

    pub(super) async fn find_access_events(&self, code: &str, limit: u64) -> Result<Vec<AccessEvent>> {
        let models = access_log::Entity::find()
            .filter(access_log::Column::ShortCode.eq(code))
            .order_by_desc(access_log::Column::AccessTime)
            .order_by_desc(access_log::Column::Id)
            .limit(limit)
            .all(&self.db)
            .await
            .map_err(|e| {
                OctolinkError::persistence(format!("failed to list access logs for '{}': {}", code, e))
            })?;

        Ok(models.into_iter().map(model_to_access_event).collect())
    }
}
