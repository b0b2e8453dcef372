use crate::config::AppConfig;
use crate::error::AppError;
use crate::signal::types::{
    Candle, CandleSeries, OhlcvResponseWire, PriceQuote, SignalSnapshot, SyncParams, Timeframe,
};
use futures_util::future::BoxFuture;
use reqwest::Client;
use serde_json::Value;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::{connect_async_with_config, MaybeTlsStream, WebSocketStream};
use url::Url;

pub type PushWsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

fn signal_endpoint(base_url: &str, params: &SyncParams) -> Result<Url, AppError> {
    let endpoint = format!("{base_url}/api/signals/{}", params.path_symbol());
    Ok(Url::parse_with_params(
        &endpoint,
        &[
            ("timeframe", params.timeframe.as_str()),
            ("strategy", params.strategy.as_str()),
        ],
    )?)
}

fn ohlcv_endpoint(
    base_url: &str,
    path_symbol: &str,
    timeframe: Timeframe,
    limit: u16,
) -> Result<Url, AppError> {
    let endpoint = format!("{base_url}/api/ohlcv/{path_symbol}");
    Ok(Url::parse_with_params(
        &endpoint,
        &[
            ("timeframe", timeframe.as_str().to_string()),
            ("limit", limit.to_string()),
        ],
    )?)
}

fn price_endpoint(base_url: &str, path_symbol: &str) -> Result<Url, AppError> {
    Ok(Url::parse(&format!("{base_url}/api/price/{path_symbol}"))?)
}

/// Push channel target with the session parameters encoded as query pairs.
pub fn push_endpoint(ws_base_url: &str, params: &SyncParams) -> Result<Url, AppError> {
    Ok(Url::parse_with_params(
        ws_base_url,
        &[
            ("symbol", params.symbol.as_str()),
            ("timeframe", params.timeframe.as_str()),
            ("strategy", params.strategy.as_str()),
        ],
    )?)
}

/// Read side of the signal backend, as consumed by the sync client.
pub trait SignalSource: Send + Sync + 'static {
    fn fetch_signal<'a>(
        &'a self,
        params: &'a SyncParams,
    ) -> BoxFuture<'a, Result<SignalSnapshot, AppError>>;

    fn fetch_candles<'a>(
        &'a self,
        params: &'a SyncParams,
    ) -> BoxFuture<'a, Result<CandleSeries, AppError>>;
}

#[derive(Debug, Clone)]
pub struct SignalApiClient {
    client: Client,
    base_url: String,
    candle_limit: u16,
}

impl SignalApiClient {
    pub fn new(config: &AppConfig) -> Result<Self, AppError> {
        let client = Client::builder().timeout(config.http_timeout).build()?;
        Ok(Self::with_client(
            client,
            config.api_url.clone(),
            config.candle_limit,
        ))
    }

    pub fn with_client(client: Client, base_url: impl Into<String>, candle_limit: u16) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            candle_limit,
        }
    }

    pub async fn fetch_signal(&self, params: &SyncParams) -> Result<SignalSnapshot, AppError> {
        let endpoint = signal_endpoint(&self.base_url, params)?;
        let response = self.client.get(endpoint).send().await?.error_for_status()?;
        let payload = response.json::<Value>().await?;
        SignalSnapshot::from_value(payload)
    }

    pub async fn fetch_candles(&self, params: &SyncParams) -> Result<CandleSeries, AppError> {
        let endpoint = ohlcv_endpoint(
            &self.base_url,
            &params.path_symbol(),
            params.timeframe,
            self.candle_limit,
        )?;
        let response = self.client.get(endpoint).send().await?.error_for_status()?;
        let payload = response.json::<OhlcvResponseWire>().await?;
        let candles: Vec<Candle> = payload.data;
        CandleSeries::from_batch(candles)
    }

    pub async fn fetch_price(&self, symbol: &str) -> Result<PriceQuote, AppError> {
        let endpoint = price_endpoint(&self.base_url, &symbol.replace('/', "-"))?;
        let response = self.client.get(endpoint).send().await?.error_for_status()?;
        let quote = response.json::<PriceQuote>().await?;
        if !quote.price.is_finite() {
            return Err(AppError::Validation(
                "quoted price must be finite".to_string(),
            ));
        }
        Ok(quote)
    }
}

impl SignalSource for SignalApiClient {
    fn fetch_signal<'a>(
        &'a self,
        params: &'a SyncParams,
    ) -> BoxFuture<'a, Result<SignalSnapshot, AppError>> {
        Box::pin(SignalApiClient::fetch_signal(self, params))
    }

    fn fetch_candles<'a>(
        &'a self,
        params: &'a SyncParams,
    ) -> BoxFuture<'a, Result<CandleSeries, AppError>> {
        Box::pin(SignalApiClient::fetch_candles(self, params))
    }
}

pub async fn connect_push_stream(endpoint: &Url) -> Result<PushWsStream, AppError> {
    let ws_config = WebSocketConfig {
        max_message_size: Some(16 << 20),
        max_frame_size: Some(4 << 20),
        ..Default::default()
    };

    let (stream, _) = connect_async_with_config(endpoint.as_str(), Some(ws_config), true).await?;
    Ok(stream)
}
