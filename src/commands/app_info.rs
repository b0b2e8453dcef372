use crate::state::AppState;
use serde::Serialize;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppInfoResponse {
    pub product_name: String,
    pub version: String,
    pub api_url: String,
    pub ws_url: String,
    pub platform: String,
    pub arch: String,
}

pub fn build_app_info_response(
    product_name: String,
    version: String,
    api_url: String,
    ws_url: String,
) -> AppInfoResponse {
    AppInfoResponse {
        product_name,
        version,
        api_url,
        ws_url,
        platform: std::env::consts::OS.to_string(),
        arch: std::env::consts::ARCH.to_string(),
    }
}

pub fn app_info(state: &AppState) -> AppInfoResponse {
    build_app_info_response(
        env!("CARGO_PKG_NAME").to_string(),
        env!("CARGO_PKG_VERSION").to_string(),
        state.config.api_url.clone(),
        state.config.ws_url.clone(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn app_info_contains_runtime_metadata() {
        let response = build_app_info_response(
            "signal-desk".to_string(),
            "0.1.0".to_string(),
            "http://localhost:8000".to_string(),
            "ws://localhost:8000/ws".to_string(),
        );

        assert!(!response.product_name.is_empty());
        assert!(!response.version.is_empty());
        assert_eq!(response.ws_url, "ws://localhost:8000/ws");
        assert!(!response.platform.is_empty());
        assert!(!response.arch.is_empty());
    }
}
