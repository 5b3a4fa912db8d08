//! 短链与统计服务之上的 HTTP 接口层

pub mod middleware;
pub mod response;
pub mod services;

use actix_web::web;

use services::{AnalyticsApi, GenerateService, HealthService, redirect_routes};

/// 注册全部路由，兜底的重定向 scope 放在最后
///
/// 需要 `Arc<LinkService>`、`Arc<AnalyticsService>`、
/// `Arc<VisitDispatcher>` 和 `AppStartTime` 的 `web::Data`
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            .route(
                "/shortlink/generate",
                web::post().to(GenerateService::generate),
            )
            .route(
                "/analytics/{code}",
                web::get().to(AnalyticsApi::get_analytics),
            ),
    )
    .route("/health", web::get().to(HealthService::health_check))
    .route("/health", web::head().to(HealthService::health_check))
    .service(redirect_routes());
}
