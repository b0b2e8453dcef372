pub mod commands;
pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod signal;
pub mod state;

use commands::app_info::app_info;
use commands::health::health;
use commands::sync::{dashboard_frame, sync_start, sync_stop, sync_subscribe};
use config::AppConfig;
use db::initialize_pool_from_path;
use error::AppError;
use signal::settings::load_settings;
use state::AppState;

/// Headless dashboard: syncs the configured signal and logs a frame per store change.
pub async fn run() -> Result<(), AppError> {
    if let Err(error) = dotenvy::dotenv() {
        if !error.not_found() {
            eprintln!("ignoring unreadable .env file: {error}");
        }
    }
    logging::init_logging();

    let config = AppConfig::from_env()?;
    let db_pool = initialize_pool_from_path(&config.db_path).await?;
    let settings = load_settings(&db_pool).await?;
    let state = AppState::new(db_pool, config, settings)?;

    let info = app_info(&state);
    tracing::info!(
        version = %info.version,
        platform = %info.platform,
        arch = %info.arch,
        api_url = %info.api_url,
        ws_url = %info.ws_url,
        "signal desk starting"
    );

    let session = sync_start(&state).await?;
    tracing::info!(
        symbol = %session.params.symbol,
        timeframe = session.params.timeframe.as_str(),
        strategy = session.params.strategy.as_str(),
        initial_sync_ok = session.initial_sync_ok,
        "sync client running"
    );

    let report = health(&state).await?;
    tracing::info!(db = report.db, sync = report.sync, uptime_ms = report.uptime_ms as u64, "health");

    let mut revisions = sync_subscribe(&state).await?;
    loop {
        tokio::select! {
            interrupt = tokio::signal::ctrl_c() => {
                interrupt?;
                tracing::info!("shutdown requested");
                break;
            }
            changed = revisions.changed() => {
                if changed.is_err() {
                    tracing::warn!("sync client stopped publishing");
                    break;
                }
                let frame = dashboard_frame(&state).await?;
                tracing::info!(revision = frame.revision, "{}", frame.summary_line());
            }
        }
    }

    sync_stop(&state).await?;
    state.db_pool.close().await;
    Ok(())
}
