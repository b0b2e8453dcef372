use crate::{error::AppError, state::AppState};
use serde::Serialize;
use sqlx::SqlitePool;
use std::time::Instant;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub uptime_ms: u128,
    pub db: &'static str,
    pub sync: &'static str,
    pub push_connected: bool,
}

pub async fn build_health_response(
    started_at: Instant,
    pool: &SqlitePool,
    sync_running: bool,
    push_connected: bool,
) -> HealthResponse {
    let db_status = match sqlx::query_scalar::<_, i64>("SELECT 1")
        .fetch_one(pool)
        .await
    {
        Ok(_) => "ok",
        Err(_) => "error",
    };

    HealthResponse {
        status: "ok",
        uptime_ms: started_at.elapsed().as_millis(),
        db: db_status,
        sync: if sync_running { "running" } else { "stopped" },
        push_connected: sync_running && push_connected,
    }
}

pub async fn health(state: &AppState) -> Result<HealthResponse, AppError> {
    let (sync_running, push_connected) = match state.sync.lock().await.as_ref() {
        Some(handle) => (handle.is_running(), handle.view().connected),
        None => (false, false),
    };

    Ok(build_health_response(state.started_at, &state.db_pool, sync_running, push_connected).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::initialize_memory_pool;

    #[tokio::test]
    async fn health_reports_ok_status_and_db_health() {
        let pool = initialize_memory_pool().await;

        let response = build_health_response(Instant::now(), &pool, false, true).await;

        assert_eq!(response.status, "ok");
        assert_eq!(response.db, "ok");
        assert_eq!(response.sync, "stopped");
        assert!(!response.push_connected);
        assert!(response.uptime_ms <= 1_000);
    }
}
