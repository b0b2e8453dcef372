use crate::signal::overlay::{project, Overlay, OverlayKind};
use crate::signal::settings::DashboardSettings;
use crate::signal::sync::SyncView;
use crate::signal::types::{
    ConnectionState, ConnectionStatus, DirectionalCall, LeverageSuggestion, MtfSummary,
    SignalSnapshot, SignalStrength,
};
use serde::Serialize;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum ConnectivityBanner {
    Online,
    #[serde(rename_all = "camelCase")]
    Reconnecting {
        attempt: u32,
        next_retry_in_ms: Option<u64>,
    },
    #[serde(rename_all = "camelCase")]
    Offline { retries_exhausted: bool, reason: Option<String> },
}

impl ConnectivityBanner {
    pub fn from_status(status: &ConnectionStatus) -> Self {
        if status.exhausted {
            return ConnectivityBanner::Offline {
                retries_exhausted: true,
                reason: status.reason.clone(),
            };
        }

        match status.state {
            ConnectionState::Connected => ConnectivityBanner::Online,
            ConnectionState::Connecting => ConnectivityBanner::Reconnecting {
                attempt: status.retry_count,
                next_retry_in_ms: None,
            },
            ConnectionState::Disconnected if status.next_retry_in_ms.is_some() => {
                ConnectivityBanner::Reconnecting {
                    attempt: status.retry_count,
                    next_retry_in_ms: status.next_retry_in_ms,
                }
            }
            ConnectionState::Disconnected => ConnectivityBanner::Offline {
                retries_exhausted: false,
                reason: status.reason.clone(),
            },
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            ConnectivityBanner::Online => "online",
            ConnectivityBanner::Reconnecting { .. } => "reconnecting",
            ConnectivityBanner::Offline { .. } => "offline",
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SignalCard {
    pub call: DirectionalCall,
    pub strength: Option<SignalStrength>,
    pub confidence: f64,
    pub current_price: f64,
    pub risk_reward_ratio: Option<f64>,
    pub position_size_suggestion: Option<String>,
    pub trend: Option<String>,
    pub volatility: Option<String>,
    pub confluences: Vec<String>,
    pub stability: Option<String>,
    pub setup_state: Option<String>,
    pub previous_signal: Option<String>,
    pub signal_changed: bool,
    pub killzone: Option<String>,
    pub leverage: Option<LeverageSuggestion>,
}

impl SignalCard {
    fn build(snapshot: &SignalSnapshot, settings: &DashboardSettings) -> Self {
        let previous_signal = if settings.show_previous_signal {
            snapshot.previous_signal.clone()
        } else {
            None
        };

        Self {
            call: snapshot.signal,
            strength: snapshot.strength,
            confidence: snapshot.confidence,
            current_price: snapshot.current_price,
            risk_reward_ratio: snapshot.risk_reward_ratio,
            position_size_suggestion: snapshot.position_size_suggestion.clone(),
            trend: snapshot.trend.clone(),
            volatility: snapshot.volatility.clone(),
            confluences: snapshot.confluences.clone(),
            stability: snapshot.signal_stability.clone(),
            setup_state: snapshot.setup_state.clone(),
            signal_changed: settings.show_previous_signal && snapshot.signal_changed(),
            previous_signal,
            killzone: snapshot
                .killzone_active
                .unwrap_or(false)
                .then(|| snapshot.killzone_name.clone())
                .flatten(),
            leverage: snapshot.leverage_suggestion.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LegendEntry {
    pub label: String,
    pub color: &'static str,
}

fn first_of(overlays: &[Overlay], predicate: fn(&OverlayKind) -> bool) -> Option<&Overlay> {
    overlays.iter().find(|overlay| predicate(&overlay.kind))
}

/// Legend rows for the categories that actually produced an overlay.
pub fn legend(snapshot: &SignalSnapshot, overlays: &[Overlay]) -> Vec<LegendEntry> {
    let mut entries = Vec::new();
    let first = |predicate: fn(&OverlayKind) -> bool| first_of(overlays, predicate);

    if let Some(overlay) = first(|kind| matches!(kind, OverlayKind::CurrentPrice)) {
        entries.push(LegendEntry {
            label: "Current Price".to_string(),
            color: overlay.style.color,
        });
    }
    if let Some(overlay) = first(|kind| matches!(kind, OverlayKind::Entry)) {
        entries.push(LegendEntry {
            label: format!("Entry ({})", snapshot.signal.as_str()),
            color: overlay.style.color,
        });
    }
    if let Some(overlay) = first(|kind| matches!(kind, OverlayKind::StopLoss)) {
        entries.push(LegendEntry {
            label: "Stop Loss".to_string(),
            color: overlay.style.color,
        });
    }

    let targets = overlays
        .iter()
        .filter(|overlay| matches!(overlay.kind, OverlayKind::TakeProfit { .. }))
        .count();
    if let Some(overlay) = first(|kind| matches!(kind, OverlayKind::TakeProfit { .. })) {
        entries.push(LegendEntry {
            label: format!("Take Profits ({targets})"),
            color: overlay.style.color,
        });
    }
    if let Some(overlay) = first(|kind| matches!(kind, OverlayKind::OptimalEntry { .. })) {
        entries.push(LegendEntry {
            label: "OTE Zones".to_string(),
            color: overlay.style.color,
        });
    }
    if let Some(overlay) = first(|kind| matches!(kind, OverlayKind::LimitOrder { .. })) {
        let candidates = snapshot.limit_orders.as_ref().map(Vec::len).unwrap_or(0);
        entries.push(LegendEntry {
            label: format!("Limit Orders ({candidates})"),
            color: overlay.style.color,
        });
    }

    entries
}

/// Everything the dashboard renders for one store revision.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DashboardFrame {
    pub revision: u64,
    pub symbol: String,
    pub timeframe: String,
    pub strategy: String,
    pub last_update_ms: Option<i64>,
    pub banner: ConnectivityBanner,
    pub signal: Option<SignalCard>,
    pub mtf: Option<MtfSummary>,
    pub candle_count: usize,
    pub last_close: Option<f64>,
    pub overlays: Vec<Overlay>,
    pub legend: Vec<LegendEntry>,
    pub last_error: Option<String>,
}

impl DashboardFrame {
    pub fn build(view: &SyncView, settings: &DashboardSettings) -> Self {
        let (signal, mtf, overlays, legend) = match view.snapshot.as_ref() {
            Some(snapshot) => {
                let overlays = project(snapshot, &view.series);
                let legend = legend(snapshot, &overlays);
                let mtf = if settings.enable_mtf {
                    snapshot.mtf_analysis.clone()
                } else {
                    None
                };
                (
                    Some(SignalCard::build(snapshot, settings)),
                    mtf,
                    overlays,
                    legend,
                )
            }
            None => (None, None, Vec::new(), Vec::new()),
        };

        Self {
            revision: view.revision,
            symbol: view.params.symbol.clone(),
            timeframe: view.params.timeframe.as_str().to_string(),
            strategy: view.params.strategy.as_str().to_string(),
            last_update_ms: view.last_update_ms,
            banner: ConnectivityBanner::from_status(&view.connection),
            signal,
            mtf,
            candle_count: view.series.len(),
            last_close: view.series.last_close(),
            overlays,
            legend,
            last_error: view.last_error.clone(),
        }
    }

    /// One-line rendering used by the headless binary.
    pub fn summary_line(&self) -> String {
        let signal = match &self.signal {
            Some(card) => format!(
                "{} {:.0}% @ {}",
                card.call.as_str(),
                card.confidence,
                card.current_price
            ),
            None => "no signal yet".to_string(),
        };

        format!(
            "{} {} [{}] {} | {} candles | {} overlays | {}",
            self.symbol,
            self.timeframe,
            self.strategy,
            signal,
            self.candle_count,
            self.overlays.len(),
            self.banner.as_str()
        )
    }
}
