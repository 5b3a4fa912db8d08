//! Octolink - deterministic URL shortener with real-time visit analytics

use clap::Parser;

use octolink::cli::Cli;
use octolink::config::AppConfig;
use octolink::errors::OctolinkError;
use octolink::runtime::modes;
use octolink::system::logging::init_logging;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // 生成示例配置后直接退出
    if let Some(path) = cli.generate_config.as_deref() {
        AppConfig::default()
            .save_to_file(path)
            .map_err(|e| report(&e))?;
        println!("Sample configuration written to {}", path);
        return Ok(());
    }

    let config = AppConfig::load(&cli.config).map_err(|e| report(&e))?;

    // guard 必须存活到进程结束，否则文件日志会丢失
    let _log_guard = init_logging(&config.logging).map_err(|e| report(&e))?;

    modes::run_server(config).await
}

/// Print a configuration error in color and hand it back as anyhow
fn report(err: &OctolinkError) -> anyhow::Error {
    #[cfg(feature = "server")]
    eprintln!("{}", err.format_colored());
    #[cfg(not(feature = "server"))]
    eprintln!("{}", err.format_simple());
    anyhow::anyhow!(err.format_simple())
}
