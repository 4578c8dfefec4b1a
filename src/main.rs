/// Mojang API proxy server
use mojang_api_proxy::{
    config::ServerConfig, context::AppContext, error::ProxyResult, jobs::JobScheduler, server,
};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> ProxyResult<()> {
    // Load configuration (also reads .env, which may set RUST_LOG)
    let config = ServerConfig::from_env()?;

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_new(&config.logging.level)
                .unwrap_or_else(|_| "mojang_api_proxy=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Mojang API proxy v{}", config.service.version);

    // Create application context
    let ctx = Arc::new(AppContext::new(config)?);

    // Start background jobs
    let scheduler = Arc::new(JobScheduler::new(Arc::clone(&ctx))?);
    scheduler.start();

    // Serve until Ctrl-C / SIGTERM
    let result = server::serve((*ctx).clone(), server::shutdown_signal()).await;

    scheduler.stop();
    ctx.shutdown().await;

    result
}
