use crate::signal::types::{CandleSeries, LimitOrderCandidate, SignalSnapshot};
use serde::Serialize;

pub const MAX_LIMIT_ORDER_OVERLAYS: usize = 3;
pub const HIGH_CONFLUENCE: u32 = 5;
pub const MEDIUM_CONFLUENCE: u32 = 3;

const CURRENT_COLOR: &str = "#6366f1";
const ENTRY_COLOR: &str = "#8b5cf6";
const STOP_COLOR: &str = "#ef4444";
const TARGET_COLOR: &str = "#10b981";
const OTE_COLOR: &str = "#f59e0b";
const BEST_LIMIT_COLOR: &str = "#8b5cf6";
const LIMIT_COLOR: &str = "#a78bfa";

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LineStyle {
    Solid,
    Dashed,
    Dotted,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LabelAnchor {
    Start,
    End,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OverlayStyle {
    pub color: &'static str,
    pub line: LineStyle,
    pub width: u8,
    pub anchor: LabelAnchor,
}

impl OverlayStyle {
    const fn new(color: &'static str, line: LineStyle, width: u8, anchor: LabelAnchor) -> Self {
        Self {
            color,
            line,
            width,
            anchor,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

pub fn limit_order_severity(confluence: u32) -> Severity {
    if confluence >= HIGH_CONFLUENCE {
        Severity::High
    } else if confluence >= MEDIUM_CONFLUENCE {
        Severity::Medium
    } else {
        Severity::Low
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub enum OteLevel {
    #[serde(rename = "0.62")]
    Low,
    #[serde(rename = "0.705")]
    Golden,
    #[serde(rename = "0.79")]
    High,
}

impl OteLevel {
    pub fn ratio(self) -> &'static str {
        match self {
            OteLevel::Low => "0.62",
            OteLevel::Golden => "0.705",
            OteLevel::High => "0.79",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(tag = "category", rename_all = "camelCase")]
pub enum OverlayKind {
    CurrentPrice,
    Entry,
    StopLoss,
    TakeProfit { index: u8 },
    OptimalEntry { level: OteLevel },
    LimitOrder { rank: u8, best: bool },
}

/// Time range the line spans, taken from the candle series.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TimeSpan {
    pub from_ms: i64,
    pub to_ms: i64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Overlay {
    pub rank: u32,
    pub kind: OverlayKind,
    pub price: f64,
    pub label: String,
    pub style: OverlayStyle,
    pub severity: Option<Severity>,
    pub span: Option<TimeSpan>,
}

struct OverlayBuilder {
    overlays: Vec<Overlay>,
    span: Option<TimeSpan>,
}

impl OverlayBuilder {
    fn push(
        &mut self,
        kind: OverlayKind,
        price: Option<f64>,
        label: String,
        style: OverlayStyle,
        severity: Option<Severity>,
    ) {
        let Some(price) = price.filter(|price| price.is_finite()) else {
            return;
        };
        self.overlays.push(Overlay {
            rank: self.overlays.len() as u32,
            kind,
            price,
            label,
            style,
            severity,
            span: self.span,
        });
    }
}

/// Top candidates by descending confluence; equal counts keep backend order.
pub fn rank_limit_orders(candidates: &[LimitOrderCandidate]) -> Vec<&LimitOrderCandidate> {
    let mut ranked: Vec<&LimitOrderCandidate> = candidates.iter().collect();
    ranked.sort_by(|left, right| right.confluence.cmp(&left.confluence));
    ranked.truncate(MAX_LIMIT_ORDER_OVERLAYS);
    ranked
}

/// Projects a snapshot into chart annotations in fixed precedence order.
///
/// Current price, entry (active calls only), stop loss, take profits 1..3,
/// optimal entry levels, then up to three limit orders. Missing fields are
/// skipped and ranks follow the emitted order.
pub fn project(snapshot: &SignalSnapshot, series: &CandleSeries) -> Vec<Overlay> {
    let mut builder = OverlayBuilder {
        overlays: Vec::new(),
        span: series
            .time_extent()
            .map(|(from_ms, to_ms)| TimeSpan { from_ms, to_ms }),
    };

    builder.push(
        OverlayKind::CurrentPrice,
        Some(snapshot.current_price),
        "Current".to_string(),
        OverlayStyle::new(CURRENT_COLOR, LineStyle::Dashed, 2, LabelAnchor::End),
        None,
    );

    if snapshot.signal.is_active() {
        builder.push(
            OverlayKind::Entry,
            snapshot.entry_price,
            format!("Entry {}", snapshot.signal.as_str()),
            OverlayStyle::new(ENTRY_COLOR, LineStyle::Solid, 2, LabelAnchor::End),
            None,
        );
    }

    builder.push(
        OverlayKind::StopLoss,
        snapshot.stop_loss,
        "SL".to_string(),
        OverlayStyle::new(STOP_COLOR, LineStyle::Solid, 2, LabelAnchor::End),
        None,
    );

    let targets = [
        (1_u8, snapshot.take_profit_1, LineStyle::Solid),
        (2, snapshot.take_profit_2, LineStyle::Dashed),
        (3, snapshot.take_profit_3, LineStyle::Dotted),
    ];
    for (index, price, line) in targets {
        builder.push(
            OverlayKind::TakeProfit { index },
            price,
            format!("TP{index}"),
            OverlayStyle::new(TARGET_COLOR, line, 1, LabelAnchor::End),
            None,
        );
    }

    if let Some(ote) = snapshot.ote_data.as_ref() {
        let levels = [
            (OteLevel::Low, ote.ote_0_62),
            (OteLevel::Golden, ote.ote_0_705),
            (OteLevel::High, ote.ote_0_79),
        ];
        for (level, price) in levels {
            let (label, width) = match level {
                OteLevel::Golden => (format!("OTE {} (Golden)", level.ratio()), 2),
                _ => (format!("OTE {}", level.ratio()), 1),
            };
            builder.push(
                OverlayKind::OptimalEntry { level },
                price,
                label,
                OverlayStyle::new(OTE_COLOR, LineStyle::Dashed, width, LabelAnchor::Start),
                None,
            );
        }
    }

    let candidates = snapshot.limit_orders.as_deref().unwrap_or_default();
    for (position, candidate) in rank_limit_orders(candidates).into_iter().enumerate() {
        let rank = position as u8 + 1;
        let best = position == 0;
        let style = if best {
            OverlayStyle::new(BEST_LIMIT_COLOR, LineStyle::Dashed, 2, LabelAnchor::End)
        } else {
            OverlayStyle::new(LIMIT_COLOR, LineStyle::Dashed, 1, LabelAnchor::End)
        };
        builder.push(
            OverlayKind::LimitOrder { rank, best },
            Some(candidate.price),
            format!("Limit {rank} ({})", candidate.confluence),
            style,
            Some(limit_order_severity(candidate.confluence)),
        );
    }

    builder.overlays
}
