use crate::error::AppError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_SYMBOL: &str = "BTC/USDT";
pub const DEFAULT_TIMEFRAME: Timeframe = Timeframe::M15;
pub const DEFAULT_STRATEGY: Strategy = Strategy::Technical;
pub const DEFAULT_REFRESH_INTERVAL_SECS: u64 = 30;
pub const DEFAULT_ENABLE_MTF: bool = true;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Timeframe {
    #[serde(rename = "1m")]
    M1,
    #[serde(rename = "5m")]
    M5,
    #[serde(rename = "15m")]
    M15,
    #[serde(rename = "30m")]
    M30,
    #[serde(rename = "1h")]
    H1,
    #[serde(rename = "4h")]
    H4,
    #[serde(rename = "1d")]
    D1,
    #[serde(rename = "1w")]
    W1,
}

impl Timeframe {
    pub const ALL: [Timeframe; 8] = [
        Self::M1,
        Self::M5,
        Self::M15,
        Self::M30,
        Self::H1,
        Self::H4,
        Self::D1,
        Self::W1,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::M1 => "1m",
            Self::M5 => "5m",
            Self::M15 => "15m",
            Self::M30 => "30m",
            Self::H1 => "1h",
            Self::H4 => "4h",
            Self::D1 => "1d",
            Self::W1 => "1w",
        }
    }

    pub fn parse_str(raw: &str) -> Result<Self, AppError> {
        let trimmed = raw.trim();
        Self::ALL
            .into_iter()
            .find(|timeframe| timeframe.as_str() == trimmed)
            .ok_or_else(|| AppError::Validation(format!("unsupported timeframe '{trimmed}'")))
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Strategy {
    Technical,
    Smc,
}

impl Strategy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Technical => "TECHNICAL",
            Self::Smc => "SMC",
        }
    }

    pub fn parse_str(raw: &str) -> Result<Self, AppError> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "TECHNICAL" => Ok(Self::Technical),
            "SMC" => Ok(Self::Smc),
            other => Err(AppError::Validation(format!(
                "unrecognized strategy '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DirectionalCall {
    Long,
    Short,
    #[default]
    Hold,
    SetupPending,
    AwaitingConfirmation,
}

impl DirectionalCall {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Long => "LONG",
            Self::Short => "SHORT",
            Self::Hold => "HOLD",
            Self::SetupPending => "SETUP_PENDING",
            Self::AwaitingConfirmation => "AWAITING_CONFIRMATION",
        }
    }

    /// Whether the call carries a tradable entry (everything but hold and pending setup).
    pub fn is_active(self) -> bool {
        !matches!(self, Self::Hold | Self::SetupPending)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignalStrength {
    Strong,
    Moderate,
    Weak,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LimitOrderCandidate {
    pub price: f64,
    #[serde(rename = "type")]
    pub kind: String,
    pub confluence: u32,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub stop_loss: Option<f64>,
    #[serde(default)]
    pub take_profit: Option<Vec<f64>>,
    #[serde(default)]
    pub risk_reward: Option<f64>,
}

/// Fib retracement levels of the optimal trade entry zone.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct OteLevels {
    #[serde(default, alias = "ote_0.62")]
    pub ote_0_62: Option<f64>,
    #[serde(default, alias = "ote_0.705")]
    pub ote_0_705: Option<f64>,
    #[serde(default, alias = "ote_0.79")]
    pub ote_0_79: Option<f64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct TimeframeVote {
    #[serde(default)]
    pub signal: Option<String>,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub strength: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct TrendAlignment {
    #[serde(default)]
    pub is_aligned: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct MtfSummary {
    #[serde(default)]
    pub mtf_signal: Option<String>,
    #[serde(default)]
    pub mtf_confidence: Option<f64>,
    #[serde(default)]
    pub mtf_reason: Option<String>,
    #[serde(default, rename = "override")]
    pub override_applied: Option<bool>,
    #[serde(default)]
    pub trend_alignment: Option<TrendAlignment>,
    #[serde(default)]
    pub signals_by_timeframe: Option<BTreeMap<String, TimeframeVote>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LeverageSuggestion {
    pub suggested_leverage: u32,
    pub risk_level: String,
    #[serde(default)]
    pub recommendation: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Most recently known signal for one (symbol, timeframe, strategy) triple.
///
/// Fields the client does not model are kept in `extra` so a partial push
/// merge never drops backend data.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SignalSnapshot {
    #[serde(default)]
    pub symbol: String,
    #[serde(default)]
    pub timeframe: String,
    #[serde(default)]
    pub strategy: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
    pub current_price: f64,
    #[serde(default)]
    pub signal: DirectionalCall,
    #[serde(default)]
    pub strength: Option<SignalStrength>,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub entry_price: Option<f64>,
    #[serde(default)]
    pub stop_loss: Option<f64>,
    #[serde(default)]
    pub take_profit_1: Option<f64>,
    #[serde(default)]
    pub take_profit_2: Option<f64>,
    #[serde(default)]
    pub take_profit_3: Option<f64>,
    #[serde(default)]
    pub risk_reward_ratio: Option<f64>,
    #[serde(default)]
    pub position_size_suggestion: Option<String>,
    #[serde(default)]
    pub indicators: BTreeMap<String, Option<f64>>,
    #[serde(default)]
    pub confluences: Vec<String>,
    #[serde(default)]
    pub trend: Option<String>,
    #[serde(default)]
    pub volatility: Option<String>,
    #[serde(default)]
    pub mtf_analysis: Option<MtfSummary>,
    #[serde(default)]
    pub signal_stability: Option<String>,
    #[serde(default)]
    pub previous_signal: Option<String>,
    #[serde(default)]
    pub setup_state: Option<String>,
    #[serde(default)]
    pub limit_orders: Option<Vec<LimitOrderCandidate>>,
    #[serde(default)]
    pub leverage_suggestion: Option<LeverageSuggestion>,
    #[serde(default)]
    pub killzone_active: Option<bool>,
    #[serde(default)]
    pub killzone_name: Option<String>,
    #[serde(default)]
    pub ote_data: Option<OteLevels>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl SignalSnapshot {
    pub fn from_value(value: Value) -> Result<Self, AppError> {
        let snapshot: Self = serde_json::from_value(value)?;
        snapshot.validate()
    }

    fn validate(self) -> Result<Self, AppError> {
        if !self.current_price.is_finite() {
            return Err(AppError::Validation(
                "current_price must be finite".to_string(),
            ));
        }
        if !self.confidence.is_finite() || !(0.0..=100.0).contains(&self.confidence) {
            return Err(AppError::Validation(format!(
                "confidence {} must lie within 0..=100",
                self.confidence
            )));
        }
        Ok(self)
    }

    /// True when the backend reports a previous call that differs from the current one.
    pub fn signal_changed(&self) -> bool {
        self.previous_signal
            .as_deref()
            .map(|previous| previous != self.signal.as_str())
            .unwrap_or(false)
    }
}

/// Shallow field-union merge of a push payload into a snapshot.
///
/// Keys present in `patch` replace the snapshot's value (an explicit `null`
/// clears an optional field); keys absent from `patch` are kept. The merged
/// record must still be a valid snapshot, otherwise the patch is rejected and
/// the caller keeps the previous value.
pub fn merge_signal_patch(
    base: Option<&SignalSnapshot>,
    patch: &Map<String, Value>,
) -> Result<SignalSnapshot, AppError> {
    let mut merged = match base {
        Some(snapshot) => match serde_json::to_value(snapshot)? {
            Value::Object(fields) => fields,
            _ => Map::new(),
        },
        None => Map::new(),
    };

    for (key, value) in patch {
        merged.insert(key.clone(), value.clone());
    }

    SignalSnapshot::from_value(Value::Object(merged))
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Candle {
    #[serde(alias = "time")]
    pub timestamp: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    #[serde(default)]
    pub volume: f64,
}

impl Candle {
    fn is_finite(&self) -> bool {
        self.open.is_finite()
            && self.high.is_finite()
            && self.low.is_finite()
            && self.close.is_finite()
            && self.volume.is_finite()
    }
}

#[derive(Debug, Deserialize)]
pub struct OhlcvResponseWire {
    pub data: Vec<Candle>,
}

/// Immutable, time-ordered candle batch. A refresh swaps the whole series.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct CandleSeries(Arc<Vec<Candle>>);

impl CandleSeries {
    pub fn from_batch(mut candles: Vec<Candle>) -> Result<Self, AppError> {
        if let Some(bad) = candles.iter().find(|candle| !candle.is_finite()) {
            return Err(AppError::Validation(format!(
                "candle at {} carries non-finite values",
                bad.timestamp
            )));
        }
        candles.sort_by_key(|candle| candle.timestamp);
        Ok(Self(Arc::new(candles)))
    }

    pub fn as_slice(&self) -> &[Candle] {
        self.0.as_slice()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// First and last timestamps of the series.
    pub fn time_extent(&self) -> Option<(i64, i64)> {
        let first = self.0.first()?;
        let last = self.0.last()?;
        Some((first.timestamp, last.timestamp))
    }

    pub fn last_close(&self) -> Option<f64> {
        self.0.last().map(|candle| candle.close)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PriceQuote {
    pub symbol: String,
    pub price: f64,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub change_24h: Option<f64>,
    #[serde(default)]
    pub volume_24h: Option<f64>,
}

/// Parameters that drive one synchronization session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SyncParams {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub strategy: Strategy,
    pub refresh_interval_secs: u64,
    pub enable_mtf: bool,
}

impl Default for SyncParams {
    fn default() -> Self {
        Self {
            symbol: DEFAULT_SYMBOL.to_string(),
            timeframe: DEFAULT_TIMEFRAME,
            strategy: DEFAULT_STRATEGY,
            refresh_interval_secs: DEFAULT_REFRESH_INTERVAL_SECS,
            enable_mtf: DEFAULT_ENABLE_MTF,
        }
    }
}

impl SyncParams {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs.max(1))
    }

    /// Symbol as it appears in REST paths (`BTC/USDT` becomes `BTC-USDT`).
    pub fn path_symbol(&self) -> String {
        self.symbol.replace('/', "-")
    }

    pub fn same_identity(&self, other: &SyncParams) -> bool {
        self.symbol == other.symbol
            && self.timeframe == other.timeframe
            && self.strategy == other.strategy
    }
}

pub fn normalize_symbol(raw: &str) -> Result<String, AppError> {
    let symbol = raw.trim().to_ascii_uppercase().replace('-', "/");
    let valid = !symbol.is_empty()
        && symbol
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || ch == '/')
        && !symbol.starts_with('/')
        && !symbol.ends_with('/');
    if !valid {
        return Err(AppError::Validation(format!(
            "symbol '{raw}' must look like BASE/QUOTE"
        )));
    }
    Ok(symbol)
}

#[derive(Debug, Deserialize)]
struct PushEnvelopeWire {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Option<Value>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PushMessage {
    SignalUpdate(Map<String, Value>),
    Connected { message: Option<String> },
    ServerError { message: Option<String> },
    Unknown(String),
}

pub fn parse_push_payload(payload: &mut [u8]) -> Result<PushMessage, AppError> {
    let wire: PushEnvelopeWire = simd_json::serde::from_slice(payload)?;
    match wire.kind.as_str() {
        "signal_update" => match wire.data {
            Some(Value::Object(fields)) => Ok(PushMessage::SignalUpdate(fields)),
            _ => Err(AppError::MalformedMessage(
                "signal_update without an object payload".to_string(),
            )),
        },
        "connected" => Ok(PushMessage::Connected {
            message: wire.message,
        }),
        "error" => Ok(PushMessage::ServerError {
            message: wire.message,
        }),
        _ => Ok(PushMessage::Unknown(wire.kind)),
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStatus {
    pub state: ConnectionState,
    pub retry_count: u32,
    pub exhausted: bool,
    pub next_retry_in_ms: Option<u64>,
    pub reason: Option<String>,
}

impl ConnectionStatus {
    pub fn idle() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            retry_count: 0,
            exhausted: false,
            next_retry_in_ms: None,
            reason: None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }
}
