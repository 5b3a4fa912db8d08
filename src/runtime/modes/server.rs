//! Server mode
//!
//! Builds every component from the loaded configuration, serves HTTP and
//! drains background work on Ctrl+C.

use actix_web::{App, HttpServer, middleware::DefaultHeaders, web};
use anyhow::{Context, Result};
use tracing::warn;

use crate::api::configure_routes;
use crate::api::middleware::TimingMiddleware;
use crate::api::services::AppStartTime;
use crate::config::AppConfig;
use crate::runtime::lifetime;

/// Request bodies are small JSON documents
const MAX_PAYLOAD_BYTES: usize = 64 * 1024;

/// Run the HTTP server
///
/// **Note**: Logging must be initialized before calling this function
pub async fn run_server(config: AppConfig) -> Result<()> {
    let app_start_time = AppStartTime {
        start_datetime: chrono::Utc::now(),
    };

    let startup = lifetime::startup::prepare_server_startup(&config)
        .await
        .inspect_err(|e| tracing::error!("Server startup failed: {:#}", e))?;

    let link_service = startup.link_service.clone();
    let analytics_service = startup.analytics_service.clone();
    let dispatcher = startup.dispatcher.clone();

    let server = HttpServer::new(move || {
        App::new()
            .wrap(TimingMiddleware)
            .app_data(web::Data::new(link_service.clone()))
            .app_data(web::Data::new(analytics_service.clone()))
            .app_data(web::Data::new(dispatcher.clone()))
            .app_data(web::Data::new(app_start_time.clone()))
            .app_data(web::PayloadConfig::new(MAX_PAYLOAD_BYTES))
            .app_data(web::JsonConfig::default().limit(MAX_PAYLOAD_BYTES))
            .wrap(DefaultHeaders::new().add(("Cache-Control", "no-cache, no-store, must-revalidate")))
            .configure(configure_routes)
    })
    .keep_alive(std::time::Duration::from_secs(30))
    .client_request_timeout(std::time::Duration::from_millis(5000))
    .client_disconnect_timeout(std::time::Duration::from_millis(1000));

    let bind_address = format!("{}:{}", config.server.host, config.server.port);
    warn!("Starting server at http://{}", bind_address);
    let server = server
        .bind(&bind_address)
        .with_context(|| format!("Failed to bind {}", bind_address))?
        .disable_signals()
        .run();
    let handle = server.handle();
    tokio::pin!(server);

    // Wait for server or shutdown signal
    let result = tokio::select! {
        res = &mut server => res.context("HTTP server failed"),
        _ = lifetime::shutdown::listen_for_shutdown() => {
            handle.stop(true).await;
            Ok(())
        }
    };

    // 无论服务器因何退出都要排空队列
    lifetime::shutdown::graceful_shutdown(startup.dispatcher, startup.background).await;
    warn!("Graceful shutdown: all tasks completed");

    result
}
