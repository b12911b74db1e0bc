use anyhow::Result;
use std::net::SocketAddr;
use tracing::info;

use bot_rag_server::config::Settings;
use bot_rag_server::database::{schema, DbPool};
use bot_rag_server::logging::{init_tracing, ActivityLogger, LoggerConfig};
use bot_rag_server::routes::build_router;
use bot_rag_server::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    let settings = Settings::load()?;
    init_tracing(&settings.logging)?;

    let mode = std::env::args().nth(1).unwrap_or_else(|| "serve".to_string());
    info!("Starting bot-rag-server ({})", mode);

    let db_pool = DbPool::new(&settings.database).await?;
    schema::ensure_schema(&db_pool).await?;
    info!("Database ready");

    match mode.as_str() {
        "serve" => serve(settings, db_pool).await,
        "reembed" => reembed(settings, db_pool).await,
        other => anyhow::bail!("unknown command '{}', expected 'serve' or 'reembed'", other),
    }
}

async fn serve(settings: Settings, db_pool: DbPool) -> Result<()> {
    let logger = ActivityLogger::new(
        db_pool.get_pool().clone(),
        LoggerConfig::from(&settings.logging),
    );

    let addr = SocketAddr::from((
        settings.server.host.parse::<std::net::IpAddr>()?,
        settings.server.port,
    ));

    let state = AppState::new(settings, db_pool, logger)?;
    let app = build_router(state);

    info!("Server listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

async fn reembed(settings: Settings, db_pool: DbPool) -> Result<()> {
    let state = AppState::new(settings, db_pool.clone(), ActivityLogger::disabled())?;
    let report = state.reembed_job().run().await?;
    info!(
        "Re-embed report: scanned={}, embedded={}, failed={}",
        report.scanned, report.embedded, report.failed
    );
    db_pool.close().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
}
