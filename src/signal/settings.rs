use crate::error::AppError;
use crate::signal::now_unix_ms;
use crate::signal::types::{
    normalize_symbol, Strategy, SyncParams, Timeframe, DEFAULT_ENABLE_MTF,
    DEFAULT_REFRESH_INTERVAL_SECS, DEFAULT_STRATEGY, DEFAULT_SYMBOL, DEFAULT_TIMEFRAME,
};
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};

pub const SETTINGS_KEY: &str = "signal_desk.settings";

pub const DEFAULT_MIN_CONFIDENCE_DIFF: u32 = 15;
pub const DEFAULT_COOLDOWN_MINUTES: u32 = 10;
pub const DEFAULT_MTF_TIMEFRAMES: u32 = 3;
pub const DEFAULT_SHOW_PREVIOUS_SIGNAL: bool = true;
pub const MIN_CONFIDENCE_DIFF: u32 = 10;
pub const MAX_CONFIDENCE_DIFF: u32 = 30;
pub const MIN_COOLDOWN_MINUTES: u32 = 5;
pub const MAX_COOLDOWN_MINUTES: u32 = 30;
pub const MIN_MTF_TIMEFRAMES: u32 = 2;
pub const MAX_MTF_TIMEFRAMES: u32 = 4;
pub const MIN_REFRESH_INTERVAL_SECS: i64 = 1;
pub const MAX_REFRESH_INTERVAL_SECS: i64 = 3_600;

/// User-tunable dashboard parameters, persisted as one flat JSON object.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DashboardSettings {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub strategy: Strategy,
    pub min_confidence_diff: u32,
    pub cooldown_minutes: u32,
    #[serde(rename = "enableMTF")]
    pub enable_mtf: bool,
    pub mtf_timeframes: u32,
    pub show_previous_signal: bool,
    pub auto_refresh_interval: u64,
}

impl Default for DashboardSettings {
    fn default() -> Self {
        Self {
            symbol: DEFAULT_SYMBOL.to_string(),
            timeframe: DEFAULT_TIMEFRAME,
            strategy: DEFAULT_STRATEGY,
            min_confidence_diff: DEFAULT_MIN_CONFIDENCE_DIFF,
            cooldown_minutes: DEFAULT_COOLDOWN_MINUTES,
            enable_mtf: DEFAULT_ENABLE_MTF,
            mtf_timeframes: DEFAULT_MTF_TIMEFRAMES,
            show_previous_signal: DEFAULT_SHOW_PREVIOUS_SIGNAL,
            auto_refresh_interval: DEFAULT_REFRESH_INTERVAL_SECS,
        }
    }
}

impl DashboardSettings {
    pub fn sync_params(&self) -> SyncParams {
        SyncParams {
            symbol: self.symbol.clone(),
            timeframe: self.timeframe,
            strategy: self.strategy,
            refresh_interval_secs: self.auto_refresh_interval,
            enable_mtf: self.enable_mtf,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum SettingsPreset {
    DayTrader,
    Balanced,
    SwingTrader,
}

impl SettingsPreset {
    pub const ALL: [SettingsPreset; 3] = [
        SettingsPreset::DayTrader,
        SettingsPreset::Balanced,
        SettingsPreset::SwingTrader,
    ];

    pub fn label(self) -> &'static str {
        match self {
            SettingsPreset::DayTrader => "Day Trader",
            SettingsPreset::Balanced => "Balanced",
            SettingsPreset::SwingTrader => "Swing Trader",
        }
    }

    /// `(min_confidence_diff, cooldown_minutes, mtf_timeframes)`
    pub fn stability(self) -> (u32, u32, u32) {
        match self {
            SettingsPreset::DayTrader => (10, 5, 2),
            SettingsPreset::Balanced => (15, 10, 3),
            SettingsPreset::SwingTrader => (20, 20, 4),
        }
    }
}

/// Partial update; unset fields keep their current value.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SaveSettingsArgs {
    pub symbol: Option<String>,
    pub timeframe: Option<String>,
    pub strategy: Option<String>,
    pub preset: Option<SettingsPreset>,
    pub min_confidence_diff: Option<u32>,
    pub cooldown_minutes: Option<u32>,
    #[serde(rename = "enableMTF")]
    pub enable_mtf: Option<bool>,
    pub mtf_timeframes: Option<u32>,
    pub show_previous_signal: Option<bool>,
    pub auto_refresh_interval: Option<i64>,
}

impl SaveSettingsArgs {
    pub fn normalize(self, current: &DashboardSettings) -> Result<DashboardSettings, AppError> {
        let symbol = match self.symbol {
            Some(raw) => normalize_symbol(&raw)?,
            None => current.symbol.clone(),
        };
        let timeframe = match self.timeframe {
            Some(raw) => Timeframe::parse_str(&raw)?,
            None => current.timeframe,
        };
        let strategy = match self.strategy {
            Some(raw) => Strategy::parse_str(&raw)?,
            None => current.strategy,
        };

        let (preset_confidence, preset_cooldown, preset_mtf) = match self.preset {
            Some(preset) => preset.stability(),
            None => (
                current.min_confidence_diff,
                current.cooldown_minutes,
                current.mtf_timeframes,
            ),
        };

        let min_confidence_diff = self.min_confidence_diff.unwrap_or(preset_confidence);
        if !(MIN_CONFIDENCE_DIFF..=MAX_CONFIDENCE_DIFF).contains(&min_confidence_diff) {
            return Err(AppError::Validation(format!(
                "minConfidenceDiff must be between {MIN_CONFIDENCE_DIFF} and {MAX_CONFIDENCE_DIFF}"
            )));
        }

        let cooldown_minutes = self.cooldown_minutes.unwrap_or(preset_cooldown);
        if !(MIN_COOLDOWN_MINUTES..=MAX_COOLDOWN_MINUTES).contains(&cooldown_minutes) {
            return Err(AppError::Validation(format!(
                "cooldownMinutes must be between {MIN_COOLDOWN_MINUTES} and {MAX_COOLDOWN_MINUTES}"
            )));
        }

        let mtf_timeframes = self.mtf_timeframes.unwrap_or(preset_mtf);
        if !(MIN_MTF_TIMEFRAMES..=MAX_MTF_TIMEFRAMES).contains(&mtf_timeframes) {
            return Err(AppError::Validation(format!(
                "mtfTimeframes must be between {MIN_MTF_TIMEFRAMES} and {MAX_MTF_TIMEFRAMES}"
            )));
        }

        let auto_refresh_interval = match self.auto_refresh_interval {
            Some(secs) => {
                if !(MIN_REFRESH_INTERVAL_SECS..=MAX_REFRESH_INTERVAL_SECS).contains(&secs) {
                    return Err(AppError::Validation(format!(
                        "autoRefreshInterval must be a whole number of seconds between {MIN_REFRESH_INTERVAL_SECS} and {MAX_REFRESH_INTERVAL_SECS}"
                    )));
                }
                secs as u64
            }
            None => current.auto_refresh_interval,
        };

        Ok(DashboardSettings {
            symbol,
            timeframe,
            strategy,
            min_confidence_diff,
            cooldown_minutes,
            enable_mtf: self.enable_mtf.unwrap_or(current.enable_mtf),
            mtf_timeframes,
            show_previous_signal: self
                .show_previous_signal
                .unwrap_or(current.show_previous_signal),
            auto_refresh_interval,
        })
    }
}

/// Outcome of a successful save; tells the caller which sync action to take.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SettingsChange {
    pub previous: DashboardSettings,
    pub current: DashboardSettings,
}

impl SettingsChange {
    /// Symbol, timeframe or strategy changed; the caller must reconfigure the sync client.
    pub fn requires_resync(&self) -> bool {
        !self
            .previous
            .sync_params()
            .same_identity(&self.current.sync_params())
    }

    pub fn refresh_interval_changed(&self) -> bool {
        self.previous.auto_refresh_interval != self.current.auto_refresh_interval
    }

    pub fn mtf_changed(&self) -> bool {
        self.previous.enable_mtf != self.current.enable_mtf
    }
}

fn decode_settings(payload_json: &str) -> Result<DashboardSettings, AppError> {
    let stored: SaveSettingsArgs = serde_json::from_str(payload_json)?;
    stored.normalize(&DashboardSettings::default())
}

pub async fn load_settings(pool: &SqlitePool) -> Result<DashboardSettings, AppError> {
    let row = sqlx::query("SELECT payload_json FROM settings_store WHERE namespace_key = ?")
        .bind(SETTINGS_KEY)
        .fetch_optional(pool)
        .await?;

    let Some(row) = row else {
        return Ok(DashboardSettings::default());
    };

    let payload_json: String = row.try_get("payload_json")?;
    match decode_settings(&payload_json) {
        Ok(settings) => Ok(settings),
        Err(error) => {
            tracing::warn!(%error, key = SETTINGS_KEY, "stored settings unreadable, using defaults");
            Ok(DashboardSettings::default())
        }
    }
}

/// Validates `args` against the stored settings and persists the result.
/// Invalid input is rejected and leaves the stored value untouched.
/// Load and upsert are separate statements; concurrent callers must serialize.
pub async fn save_settings(
    pool: &SqlitePool,
    args: SaveSettingsArgs,
) -> Result<SettingsChange, AppError> {
    let previous = load_settings(pool).await?;
    let current = args.normalize(&previous)?;
    let payload_json = serde_json::to_string(&current)?;

    sqlx::query(
        "INSERT INTO settings_store (namespace_key, payload_json, updated_at_ms) VALUES (?, ?, ?) \
         ON CONFLICT(namespace_key) DO UPDATE SET payload_json=excluded.payload_json, updated_at_ms=excluded.updated_at_ms",
    )
    .bind(SETTINGS_KEY)
    .bind(payload_json)
    .bind(now_unix_ms())
    .execute(pool)
    .await?;

    tracing::info!(
        symbol = %current.symbol,
        timeframe = current.timeframe.as_str(),
        strategy = current.strategy.as_str(),
        refresh_secs = current.auto_refresh_interval,
        "settings saved"
    );

    Ok(SettingsChange { previous, current })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::initialize_memory_pool;

    #[tokio::test]
    async fn load_returns_defaults_when_nothing_is_stored() {
        let pool = initialize_memory_pool().await;
        let settings = load_settings(&pool).await.expect("load should succeed");

        assert_eq!(settings, DashboardSettings::default());
        assert_eq!(settings.auto_refresh_interval, 30);
        assert_eq!(settings.strategy, Strategy::Technical);
        assert!(settings.enable_mtf);
    }

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let pool = initialize_memory_pool().await;
        let change = save_settings(
            &pool,
            SaveSettingsArgs {
                symbol: Some("eth-usdt".to_string()),
                timeframe: Some("1h".to_string()),
                strategy: Some("smc".to_string()),
                min_confidence_diff: Some(25),
                cooldown_minutes: Some(15),
                enable_mtf: Some(false),
                mtf_timeframes: Some(4),
                show_previous_signal: Some(false),
                auto_refresh_interval: Some(45),
                ..SaveSettingsArgs::default()
            },
        )
        .await
        .expect("valid settings should save");

        let loaded = load_settings(&pool).await.expect("load should succeed");
        assert_eq!(loaded, change.current);
        assert_eq!(loaded.symbol, "ETH/USDT");
        assert_eq!(loaded.timeframe, Timeframe::H1);
        assert_eq!(loaded.strategy, Strategy::Smc);
        assert_eq!(loaded.auto_refresh_interval, 45);
        assert!(change.requires_resync());
        assert!(change.refresh_interval_changed());
    }

    #[tokio::test]
    async fn invalid_refresh_interval_keeps_previous_value() {
        let pool = initialize_memory_pool().await;
        save_settings(
            &pool,
            SaveSettingsArgs {
                auto_refresh_interval: Some(60),
                ..SaveSettingsArgs::default()
            },
        )
        .await
        .expect("valid interval should save");

        for rejected in [0, -5] {
            let result = save_settings(
                &pool,
                SaveSettingsArgs {
                    auto_refresh_interval: Some(rejected),
                    ..SaveSettingsArgs::default()
                },
            )
            .await;
            assert!(matches!(result, Err(AppError::Validation(_))));
        }

        let loaded = load_settings(&pool).await.expect("load should succeed");
        assert_eq!(loaded.auto_refresh_interval, 60);
    }

    #[tokio::test]
    async fn unknown_strategy_is_rejected() {
        let pool = initialize_memory_pool().await;
        let result = save_settings(
            &pool,
            SaveSettingsArgs {
                strategy: Some("MOMENTUM".to_string()),
                ..SaveSettingsArgs::default()
            },
        )
        .await;

        assert!(matches!(result, Err(AppError::Validation(_))));
        let loaded = load_settings(&pool).await.expect("load should succeed");
        assert_eq!(loaded.strategy, Strategy::Technical);
    }

    #[tokio::test]
    async fn corrupt_storage_falls_back_to_defaults() {
        let pool = initialize_memory_pool().await;
        sqlx::query(
            "INSERT INTO settings_store (namespace_key, payload_json, updated_at_ms) VALUES (?, ?, 0)",
        )
        .bind(SETTINGS_KEY)
        .bind("{not-json")
        .execute(&pool)
        .await
        .expect("raw insert should succeed");

        let loaded = load_settings(&pool).await.expect("corrupt storage is not an error");
        assert_eq!(loaded, DashboardSettings::default());
    }

    #[test]
    fn interval_only_change_does_not_require_resync() {
        let previous = DashboardSettings::default();
        let current = SaveSettingsArgs {
            auto_refresh_interval: Some(10),
            enable_mtf: Some(false),
            ..SaveSettingsArgs::default()
        }
        .normalize(&previous)
        .expect("valid args");

        let change = SettingsChange { previous, current };
        assert!(!change.requires_resync());
        assert!(change.refresh_interval_changed());
        assert!(change.mtf_changed());
    }

    #[test]
    fn preset_sets_stability_fields_and_explicit_values_win() {
        let current = DashboardSettings::default();
        let swing = SaveSettingsArgs {
            preset: Some(SettingsPreset::SwingTrader),
            ..SaveSettingsArgs::default()
        }
        .normalize(&current)
        .expect("preset is valid");
        assert_eq!(
            (swing.min_confidence_diff, swing.cooldown_minutes, swing.mtf_timeframes),
            (20, 20, 4)
        );

        let tuned = SaveSettingsArgs {
            preset: Some(SettingsPreset::DayTrader),
            cooldown_minutes: Some(30),
            ..SaveSettingsArgs::default()
        }
        .normalize(&current)
        .expect("override is valid");
        assert_eq!(
            (tuned.min_confidence_diff, tuned.cooldown_minutes, tuned.mtf_timeframes),
            (10, 30, 2)
        );
    }

    #[test]
    fn persisted_keys_are_flat_camel_case() {
        let value = serde_json::to_value(DashboardSettings::default()).expect("serializable");
        assert_eq!(value["strategy"], "TECHNICAL");
        assert_eq!(value["minConfidenceDiff"], 15);
        assert_eq!(value["enableMTF"], true);
        assert_eq!(value["autoRefreshInterval"], 30);
    }
}
