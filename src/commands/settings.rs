use crate::error::AppError;
use crate::signal::settings::{
    save_settings, DashboardSettings, SaveSettingsArgs, SettingsChange, SettingsPreset,
};
use crate::state::AppState;
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsPresetDto {
    pub preset: SettingsPreset,
    pub label: &'static str,
    pub min_confidence_diff: u32,
    pub cooldown_minutes: u32,
    pub mtf_timeframes: u32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsSaveResult {
    pub settings: DashboardSettings,
    pub resynced: bool,
    pub sync_error: Option<String>,
}

pub async fn settings_get(state: &AppState) -> Result<DashboardSettings, AppError> {
    Ok(state.settings.read().await.clone())
}

pub fn settings_presets() -> Vec<SettingsPresetDto> {
    SettingsPreset::ALL
        .into_iter()
        .map(|preset| {
            let (min_confidence_diff, cooldown_minutes, mtf_timeframes) = preset.stability();
            SettingsPresetDto {
                preset,
                label: preset.label(),
                min_confidence_diff,
                cooldown_minutes,
                mtf_timeframes,
            }
        })
        .collect()
}

/// Persists the settings, then reconfigures or reschedules the running sync client.
/// Saves are serialized on the settings write lock, held until the sync client has the change.
pub async fn settings_save(
    state: &AppState,
    args: SaveSettingsArgs,
) -> Result<SettingsSaveResult, AppError> {
    let mut cached = state.settings.write().await;
    let change = save_settings(&state.db_pool, args).await?;
    *cached = change.current.clone();

    let sync_outcome = apply_to_sync(state, &change).await;
    drop(cached);
    if let Err(error) = &sync_outcome {
        tracing::warn!(%error, "settings saved but sync client did not accept them");
    }

    Ok(SettingsSaveResult {
        settings: change.current,
        resynced: matches!(sync_outcome, Ok(true)),
        sync_error: sync_outcome.err().map(|error| error.to_string()),
    })
}

async fn apply_to_sync(state: &AppState, change: &SettingsChange) -> Result<bool, AppError> {
    let slot = state.sync.lock().await;
    let Some(handle) = slot.as_ref() else {
        return Ok(false);
    };

    if change.requires_resync() {
        handle.configure(change.current.sync_params()).await?;
        return Ok(true);
    }
    if change.refresh_interval_changed() {
        handle
            .set_refresh_interval(change.current.auto_refresh_interval)
            .await?;
    }
    if change.mtf_changed() {
        handle.set_mtf_enabled(change.current.enable_mtf).await?;
    }
    Ok(false)
}
