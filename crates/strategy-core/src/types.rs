use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// OHLCV bar at a discrete epoch-ms timestamp.
///
/// Bar series are strictly increasing in `time`; gaps are tolerated.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    /// Epoch milliseconds (UTC).
    #[serde(rename = "t")]
    pub time: i64,
    #[serde(rename = "o")]
    pub open: f64,
    #[serde(rename = "h")]
    pub high: f64,
    #[serde(rename = "l")]
    pub low: f64,
    #[serde(rename = "c")]
    pub close: f64,
    #[serde(rename = "v", default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<f64>,
}

impl Bar {
    pub fn range(&self) -> f64 {
        self.high - self.low
    }
}

/// Trade direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// +1 for longs, -1 for shorts. Used when converting price moves to R.
    pub fn sign(&self) -> f64 {
        match self {
            Side::Buy => 1.0,
            Side::Sell => -1.0,
        }
    }
}

/// Final classification of a simulated trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Open,
    Win,
    Loss,
    Expired,
}

/// Why the simulator closed (or did not close) a trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    Tp,
    Sl,
    Timeout,
    Open,
}

/// The five strategy families that emit candidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SetupKind {
    RangeBreakout,
    BreakRetest,
    FvgRetrace,
    TrendPullback,
    MeanReversion,
}

impl SetupKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SetupKind::RangeBreakout => "range_breakout",
            SetupKind::BreakRetest => "break_retest",
            SetupKind::FvgRetrace => "fvg_retrace",
            SetupKind::TrendPullback => "trend_pullback",
            SetupKind::MeanReversion => "mean_reversion",
        }
    }
}

/// A proposed trade emitted by a generator: entry, stop, and target are set,
/// but nothing has been filled yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub id: String,
    pub setup: SetupKind,
    pub side: Side,
    /// Bar index at which the setup fired. Never reads bars past this index.
    pub signal_index: usize,
    /// Provisional entry bar index; the simulator may move it forward.
    pub entry_index: usize,
    pub entry_price: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub meta: Map<String, Value>,
}

impl Candidate {
    /// Initial risk per unit, `|entry - stop|`.
    pub fn risk(&self) -> f64 {
        (self.entry_price - self.stop_loss).abs()
    }
}

/// A candidate after execution simulation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub id: String,
    pub setup: SetupKind,
    pub side: Side,
    pub signal_index: usize,
    pub entry_index: usize,
    pub entry_time: i64,
    pub entry_price: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_index: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_time: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_price: Option<f64>,
    pub exit_reason: ExitReason,
    /// Net result in R units, fee-adjusted and fill-scaled. `None` while open.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub r_multiple: Option<f64>,
    /// Total execution costs converted to R units.
    pub fees_r: f64,
    /// Filled fraction of the intended size, in `(0, 1]`.
    pub fill_ratio: f64,
    pub outcome: Outcome,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub meta: Map<String, Value>,
}

impl Trade {
    pub fn is_closed(&self) -> bool {
        self.exit_price.is_some()
    }

    pub fn risk(&self) -> f64 {
        (self.entry_price - self.stop_loss).abs()
    }
}

/// Validate a bar series: non-empty and strictly increasing in time.
pub fn check_bars(bars: &[Bar]) -> Result<(), crate::EngineError> {
    if bars.is_empty() {
        return Err(crate::EngineError::InvalidInput(
            "bar series is empty".to_string(),
        ));
    }
    for w in bars.windows(2) {
        if w[1].time <= w[0].time {
            return Err(crate::EngineError::InvalidInput(format!(
                "bar timestamps not strictly increasing at t={}",
                w[1].time
            )));
        }
    }
    Ok(())
}
