use anyhow::Result;
use fin_jobs::{EngineConfig, JobEngine};
use fin_axum::DashboardApp;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let config = EngineConfig::load();
    fin_queue::init_tracing(config.log_json)?;

    let engine = JobEngine::start(&config).await?;

    let mut app = DashboardApp::new(engine.service().clone()).use_get("/health", || async { "ok" });
    if config.dashboard_enabled {
        info!(path = %config.dashboard_path, "Queue dashboard enabled");
        app = app.with_dashboard(&config.dashboard_path);
    }

    app.listen(config.http_addr(), shutdown_signal()).await?;

    info!("Stopping job engine");
    engine.shutdown().await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to install Ctrl+C handler: {}", e);
        std::future::pending::<()>().await;
    }
}
