//! Throttle Gateway

use std::net::SocketAddr;
use std::sync::Arc;
use throttle_config::AppConfig;
use throttle_gateway::{PolicyTable, ThrottleMiddleware, limiter, routing};
use throttle_telemetry::{init_metrics, init_tracing_with};
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    // 加载配置
    let config_dir =
        std::env::var("GATEWAY_CONFIG_DIR").unwrap_or_else(|_| "gateway/config".to_string());
    let config = AppConfig::load(&config_dir)?;

    // 初始化 tracing 与 metrics
    // 生产环境总是输出 JSON 日志
    init_tracing_with(
        &config.telemetry.log_level,
        config.telemetry.json || config.is_production(),
    );
    let metrics = init_metrics()?;

    info!(app = %config.app_name, env = %config.app_env, "Loaded configuration");

    // 限流器与中间件
    let limiter = limiter::build_limiter(&config).await?;
    let policies = PolicyTable::from_config(&config.throttle)?;
    info!(
        max_attempts = policies.default_policy().max_attempts(),
        decay_seconds = policies.default_policy().decay_seconds(),
        route_overrides = config.throttle.routes.len(),
        "Throttle policies ready"
    );
    let throttle = Arc::new(ThrottleMiddleware::new(limiter.limiter()).with_policies(policies));

    let app = routing::app(throttle, Some(metrics));

    // 启动服务器
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    info!(%addr, "Starting gateway");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    limiter.shutdown();
    info!("Gateway stopped");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
