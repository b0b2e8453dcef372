use crate::error::AppError;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_API_URL: &str = "http://localhost:8000";
pub const DEFAULT_WS_URL: &str = "ws://localhost:8000/ws";
pub const DEFAULT_DB_FILENAME: &str = "signal-desk.db";
pub const DEFAULT_HTTP_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_CANDLE_LIMIT: u16 = 100;
pub const MIN_HTTP_TIMEOUT_MS: u64 = 500;
pub const MAX_HTTP_TIMEOUT_MS: u64 = 120_000;
pub const MIN_CANDLE_LIMIT: u16 = 10;
pub const MAX_CANDLE_LIMIT: u16 = 1_000;

const API_URL_ENV: &str = "SIGNAL_DESK_API_URL";
const WS_URL_ENV: &str = "SIGNAL_DESK_WS_URL";
const DB_PATH_ENV: &str = "SIGNAL_DESK_DB_PATH";
const HTTP_TIMEOUT_ENV: &str = "SIGNAL_DESK_HTTP_TIMEOUT_MS";
const CANDLE_LIMIT_ENV: &str = "SIGNAL_DESK_CANDLE_LIMIT";

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub api_url: String,
    pub ws_url: String,
    pub db_path: PathBuf,
    pub http_timeout: Duration,
    pub candle_limit: u16,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            ws_url: DEFAULT_WS_URL.to_string(),
            db_path: PathBuf::from(DEFAULT_DB_FILENAME),
            http_timeout: Duration::from_millis(DEFAULT_HTTP_TIMEOUT_MS),
            candle_limit: DEFAULT_CANDLE_LIMIT,
        }
    }
}

fn read_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

impl AppConfig {
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(read_env)
    }

    /// Builds the config from an arbitrary key lookup so tests need not touch the process env.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_url = lookup(API_URL_ENV)
            .unwrap_or_else(|| DEFAULT_API_URL.to_string())
            .trim_end_matches('/')
            .to_string();
        let parsed_api = url::Url::parse(&api_url)?;
        if !matches!(parsed_api.scheme(), "http" | "https") {
            return Err(AppError::Validation(format!(
                "{API_URL_ENV} must use http or https"
            )));
        }

        let ws_url = lookup(WS_URL_ENV).unwrap_or_else(|| DEFAULT_WS_URL.to_string());
        let parsed_ws = url::Url::parse(&ws_url)?;
        if !matches!(parsed_ws.scheme(), "ws" | "wss") {
            return Err(AppError::Validation(format!(
                "{WS_URL_ENV} must use ws or wss"
            )));
        }

        let db_path = lookup(DB_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DB_FILENAME));

        let http_timeout_ms = match lookup(HTTP_TIMEOUT_ENV) {
            Some(raw) => raw.parse::<u64>().map_err(|_| {
                AppError::Validation(format!("{HTTP_TIMEOUT_ENV} must be an integer"))
            })?,
            None => DEFAULT_HTTP_TIMEOUT_MS,
        };
        if !(MIN_HTTP_TIMEOUT_MS..=MAX_HTTP_TIMEOUT_MS).contains(&http_timeout_ms) {
            return Err(AppError::Validation(format!(
                "{HTTP_TIMEOUT_ENV} must be between {MIN_HTTP_TIMEOUT_MS} and {MAX_HTTP_TIMEOUT_MS}"
            )));
        }

        let candle_limit = match lookup(CANDLE_LIMIT_ENV) {
            Some(raw) => raw.parse::<u16>().map_err(|_| {
                AppError::Validation(format!("{CANDLE_LIMIT_ENV} must be an integer"))
            })?,
            None => DEFAULT_CANDLE_LIMIT,
        };
        if !(MIN_CANDLE_LIMIT..=MAX_CANDLE_LIMIT).contains(&candle_limit) {
            return Err(AppError::Validation(format!(
                "{CANDLE_LIMIT_ENV} must be between {MIN_CANDLE_LIMIT} and {MAX_CANDLE_LIMIT}"
            )));
        }

        Ok(Self {
            api_url,
            ws_url,
            db_path,
            http_timeout: Duration::from_millis(http_timeout_ms),
            candle_limit,
        })
    }
}
