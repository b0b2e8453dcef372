use crate::config::AppConfig;
use crate::error::AppError;
use crate::signal::api::SignalApiClient;
use crate::signal::settings::DashboardSettings;
use crate::signal::sync::SyncHandle;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, RwLock};

pub struct AppState {
    pub started_at: Instant,
    pub db_pool: SqlitePool,
    pub config: AppConfig,
    pub api: Arc<SignalApiClient>,
    pub sync: Mutex<Option<SyncHandle>>,
    pub settings: Arc<RwLock<DashboardSettings>>,
}

impl AppState {
    pub fn new(
        db_pool: SqlitePool,
        config: AppConfig,
        settings: DashboardSettings,
    ) -> Result<Self, AppError> {
        let api = Arc::new(SignalApiClient::new(&config)?);

        Ok(Self {
            started_at: Instant::now(),
            db_pool,
            config,
            api,
            sync: Mutex::new(None),
            settings: Arc::new(RwLock::new(settings)),
        })
    }
}
