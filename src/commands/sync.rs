use crate::error::AppError;
use crate::signal::api::SignalSource;
use crate::signal::connection::WebSocketConnector;
use crate::signal::overlay::{project, Overlay};
use crate::signal::sync::{SignalSyncClient, SyncOptions, SyncView};
use crate::signal::types::{PriceQuote, SyncParams};
use crate::signal::view::DashboardFrame;
use crate::state::AppState;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncSession {
    pub params: SyncParams,
    pub initial_sync_ok: bool,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStopResult {
    pub stopped: bool,
}

/// Starts a sync client for the current settings, replacing any running one.
/// Holds the settings read lock and the slot until the client is installed, so
/// a concurrent `settings_save` lands on the new client.
pub async fn sync_start(state: &AppState) -> Result<SyncSession, AppError> {
    let settings = state.settings.read().await;
    let params = settings.sync_params();
    let mut sync_slot = state.sync.lock().await;

    if let Some(mut handle) = sync_slot.take() {
        handle.stop().await;
    }

    let source: Arc<dyn SignalSource> = state.api.clone();
    let handle = SignalSyncClient::spawn(
        source,
        Arc::new(WebSocketConnector),
        SyncOptions::new(state.config.ws_url.clone()),
        params.clone(),
    );

    let initial = handle.configure(params.clone()).await;
    if let Err(error) = &initial {
        tracing::warn!(%error, symbol = %params.symbol, "initial sync failed, timer will retry");
    }
    *sync_slot = Some(handle);
    drop(sync_slot);
    drop(settings);

    Ok(SyncSession {
        params,
        initial_sync_ok: initial.is_ok(),
        reason: initial.err().map(|error| error.to_string()),
    })
}

pub async fn sync_stop(state: &AppState) -> Result<SyncStopResult, AppError> {
    let existing_handle = {
        let mut sync_slot = state.sync.lock().await;
        sync_slot.take()
    };

    let stopped = match existing_handle {
        Some(mut handle) => {
            handle.stop().await;
            true
        }
        None => false,
    };

    Ok(SyncStopResult { stopped })
}

pub async fn sync_status(state: &AppState) -> Result<SyncView, AppError> {
    let slot = state.sync.lock().await;
    let handle = slot.as_ref().ok_or(AppError::ChannelClosed)?;
    Ok(handle.view())
}

pub async fn sync_subscribe(state: &AppState) -> Result<watch::Receiver<u64>, AppError> {
    let slot = state.sync.lock().await;
    let handle = slot.as_ref().ok_or(AppError::ChannelClosed)?;
    Ok(handle.subscribe())
}

pub async fn sync_refresh_now(state: &AppState) -> Result<SyncView, AppError> {
    let slot = state.sync.lock().await;
    let handle = slot.as_ref().ok_or(AppError::ChannelClosed)?;
    handle.refresh_now().await?;
    Ok(handle.view())
}

pub async fn sync_force_reconnect(state: &AppState) -> Result<(), AppError> {
    let slot = state.sync.lock().await;
    let handle = slot.as_ref().ok_or(AppError::ChannelClosed)?;
    handle.force_reconnect().await
}

pub async fn chart_overlays(state: &AppState) -> Result<Vec<Overlay>, AppError> {
    let view = sync_status(state).await?;
    Ok(view
        .snapshot
        .as_ref()
        .map(|snapshot| project(snapshot, &view.series))
        .unwrap_or_default())
}

pub async fn dashboard_frame(state: &AppState) -> Result<DashboardFrame, AppError> {
    let view = sync_status(state).await?;
    let settings = state.settings.read().await.clone();
    Ok(DashboardFrame::build(&view, &settings))
}

pub async fn price_quote(state: &AppState) -> Result<PriceQuote, AppError> {
    let symbol = state.settings.read().await.symbol.clone();
    state.api.fetch_price(&symbol).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::db::initialize_memory_pool;
    use crate::signal::settings::DashboardSettings;
    use crate::signal::types::DirectionalCall;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn mount_backend(server: &MockServer) {
        Mock::given(method("GET"))
            .and(path("/api/signals/BTC-USDT"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "symbol": "BTC/USDT",
                "timeframe": "15m",
                "current_price": 64000.0,
                "signal": "LONG",
                "confidence": 68.0,
                "entry_price": 63900.0,
                "stop_loss": 63200.0,
                "take_profit_1": 64800.0
            })))
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/ohlcv/BTC-USDT"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [
                    {"timestamp": 1000, "open": 1.0, "high": 2.0, "low": 0.5, "close": 1.5, "volume": 3.0},
                    {"timestamp": 2000, "open": 1.5, "high": 2.5, "low": 1.0, "close": 2.0, "volume": 4.0}
                ]
            })))
            .mount(server)
            .await;
    }

    async fn state_for(server: &MockServer) -> AppState {
        let config = AppConfig {
            api_url: server.uri(),
            ws_url: "ws://127.0.0.1:9/ws".to_string(),
            ..AppConfig::default()
        };
        AppState::new(
            initialize_memory_pool().await,
            config,
            DashboardSettings::default(),
        )
        .expect("state should build")
    }

    #[tokio::test]
    async fn start_builds_dashboard_frame_and_stop_clears_slot() {
        let server = MockServer::start().await;
        mount_backend(&server).await;
        let state = state_for(&server).await;

        let session = sync_start(&state).await.expect("sync should start");
        assert!(session.initial_sync_ok);

        let frame = dashboard_frame(&state).await.expect("frame should build");
        let card = frame.signal.expect("signal card expected");
        assert_eq!(card.call, DirectionalCall::Long);
        assert_eq!(frame.candle_count, 2);
        assert_eq!(frame.overlays.len(), 4);

        let overlays = chart_overlays(&state).await.expect("overlays should project");
        assert_eq!(overlays, frame.overlays);

        let result = sync_stop(&state).await.expect("stop should succeed");
        assert!(result.stopped);
        assert!(matches!(
            sync_status(&state).await,
            Err(AppError::ChannelClosed)
        ));
    }

    #[tokio::test]
    async fn failed_initial_sync_still_leaves_client_running() {
        let server = MockServer::start().await;
        let state = state_for(&server).await;

        let session = sync_start(&state).await.expect("start itself succeeds");
        assert!(!session.initial_sync_ok);
        assert!(session.reason.is_some());

        let view = sync_status(&state).await.expect("client is running");
        assert!(view.snapshot.is_none());
        assert!(view.last_error.is_some());

        sync_stop(&state).await.expect("stop should succeed");
    }
}
