//! SeaOrmStorage 的写操作

use chrono::Utc;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter, sea_query::Expr};
use tracing::{debug, info};

use super::converters::{access_event_to_active_model, shortlink_to_active_model};
use super::{SeaOrmStorage, retry};
use crate::errors::{OctolinkError, Result};
use crate::storage::{AccessEvent, LinkStatus, ShortLink};

use migration::entities::{access_log, short_link};

impl SeaOrmStorage {
    /// 普通 INSERT，主键冲突返回 `false`，不做更新
    pub(super) async fn insert_link(&self, link: &ShortLink) -> Result<bool> {
        let db = &self.db;
        let active_model = shortlink_to_active_model(link)?;

        let result = retry::with_retry(&format!("create({})", link.code), self.retry_config, || {
            let am = active_model.clone();
            async move { short_link::Entity::insert(am).exec(db).await }
        })
        .await;

        match result {
            Ok(_) => {
                self.invalidate_count_cache();
                debug!("Short link created: {}", link.code);
                Ok(true)
            }
            Err(e) if retry::is_unique_violation(&e) => {
                debug!("Short code already taken: {}", link.code);
                Ok(false)
            }
            Err(e) => Err(OctolinkError::persistence(format!(
                "failed to create '{}': {}",
                link.code, e
            ))),
        }
    }

    pub(super) async fn remove_expired(&self) -> Result<u64> {
        let db = &self.db;
        let now = Utc::now();

        let result = retry::with_retry("delete_expired", self.retry_config, || async {
            short_link::Entity::delete_many()
                .filter(short_link::Column::ExpireAt.is_not_null())
                .filter(short_link::Column::ExpireAt.lte(now))
                .exec(db)
                .await
        })
        .await
        .map_err(|e| OctolinkError::persistence(format!("failed to delete expired links: {}", e)))?;

        if result.rows_affected > 0 {
            self.invalidate_count_cache();
            info!("Deleted {} expired short links", result.rows_affected);
        }
        Ok(result.rows_affected)
    }

    pub(super) async fn mark_disabled(&self, code: &str) -> Result<bool> {
        let db = &self.db;
        let code_owned = code.to_string();

        let result = retry::with_retry(&format!("disable({})", code), self.retry_config, || async {
            short_link::Entity::update_many()
                .col_expr(
                    short_link::Column::Status,
                    Expr::value(LinkStatus::Disabled.as_ref()),
                )
                .filter(short_link::Column::ShortCode.eq(code_owned.as_str()))
                .exec(db)
                .await
        })
        .await
        .map_err(|e| OctolinkError::persistence(format!("failed to disable '{}': {}", code, e)))?;

        if result.rows_affected > 0 {
            info!("Short link disabled: {}", code);
        }
        Ok(result.rows_affected > 0)
    }

    pub(super) async fn append_access_event(&self, event: &AccessEvent) -> Result<()> {
        let db = &self.db;
        let active_model = access_event_to_active_model(event);

        retry::with_retry("insert_access_event", self.retry_config, || {
            let am = active_model.clone();
            async move { access_log::Entity::insert(am).exec(db).await }
        })
        .await
        .map_err(|e| {
            OctolinkError::persistence(format!(
                "failed to insert access log for '{}': {}",
                event.code, e
            ))
        })?;

        Ok(())
    }
}
