use std::sync::Arc;
use std::time::Duration;

use actix_web::http::StatusCode;
use actix_web::{HttpResponse, Responder, web};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, trace};

use crate::analytics::VisitDispatcher;
use crate::services::LinkService;

// 应用启动时间
#[derive(Clone, Debug)]
pub struct AppStartTime {
    pub start_datetime: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: DateTime<Utc>,
    pub uptime_secs: i64,
    pub store: StoreHealth,
    pub index: IndexHealth,
    pub dropped_visits: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StoreHealth {
    pub status: String,
    pub backend: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub links_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct IndexHealth {
    pub backend: String,
    /// 运行在精确兜底实现上时为 false
    pub probabilistic: bool,
}

/// 健康检查直接读 store，不经过生成/解析逻辑
pub struct HealthService;

impl HealthService {
    pub async fn health_check(
        links: web::Data<Arc<LinkService>>,
        dispatcher: web::Data<Arc<VisitDispatcher>>,
        start: web::Data<AppStartTime>,
    ) -> impl Responder {
        trace!("Received health check request");
        let store = links.store();

        let store_health = match tokio::time::timeout(Duration::from_secs(5), store.count()).await {
            Ok(Ok(count)) => StoreHealth {
                status: "healthy".to_string(),
                backend: store.backend_name().to_string(),
                links_count: Some(count),
                error: None,
            },
            Ok(Err(e)) => {
                error!("Store health check failed: {}", e);
                StoreHealth {
                    status: "unhealthy".to_string(),
                    backend: store.backend_name().to_string(),
                    links_count: None,
                    error: Some(e.to_string()),
                }
            }
            Err(_) => {
                error!("Store health check timeout");
                StoreHealth {
                    status: "unhealthy".to_string(),
                    backend: store.backend_name().to_string(),
                    links_count: None,
                    error: Some("timeout".to_string()),
                }
            }
        };

        let index = links.index();
        let index_health = IndexHealth {
            backend: index.backend_name().to_string(),
            probabilistic: index.is_available().await,
        };

        let now = Utc::now();
        let healthy = store_health.status == "healthy";
        let body = HealthResponse {
            status: if healthy { "healthy" } else { "unhealthy" }.to_string(),
            timestamp: now,
            uptime_secs: (now - start.start_datetime).num_seconds(),
            store: store_health,
            index: index_health,
            dropped_visits: dispatcher.dropped(),
        };

        let status = if healthy {
            StatusCode::OK
        } else {
            StatusCode::SERVICE_UNAVAILABLE
        };
        HttpResponse::build(status).json(body)
    }
}
