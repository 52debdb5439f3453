use serde::{Deserialize, Serialize};
use strategy_core::{Bar, EngineError};
use technical_indicators::{ema, rolling_max, rolling_min, sma};
use tracing::debug;

use crate::models::{BiasMode, ConfluenceConfig};

/// Higher-timeframe directional bias for one bar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Bias {
    Bull,
    Bear,
    Neutral,
}

impl Bias {
    pub fn as_str(&self) -> &'static str {
        match self {
            Bias::Bull => "bull",
            Bias::Bear => "bear",
            Bias::Neutral => "neutral",
        }
    }
}

/// Precomputed HTF bias projected onto the LTF index axis.
#[derive(Debug)]
pub struct BiasSeries {
    /// Bias per HTF bar.
    pub htf_bias: Vec<Bias>,
    /// LTF index → HTF index. `None` before the first usable HTF bar.
    pub ltf_to_htf: Vec<Option<usize>>,
    pub resolution_ms: i64,
}

impl BiasSeries {
    /// Bias at an LTF index; `Neutral` where no HTF bar is available.
    pub fn at(&self, ltf_index: usize) -> Bias {
        self.ltf_to_htf
            .get(ltf_index)
            .copied()
            .flatten()
            .map(|h| self.htf_bias[h])
            .unwrap_or(Bias::Neutral)
    }
}

/// Parse a resolution string like `"5m"`, `"1h"`, `"4h"`, `"1d"` into a bar
/// duration in milliseconds.
pub fn parse_resolution(s: &str) -> Option<i64> {
    let s = s.trim();
    if s.len() < 2 {
        return None;
    }
    let (count, unit) = s.split_at(s.len() - 1);
    let count: i64 = count.parse().ok()?;
    if count <= 0 {
        return None;
    }
    let unit_ms = match unit {
        "m" => 60_000,
        "h" => 3_600_000,
        "d" => 86_400_000,
        "w" => 7 * 86_400_000,
        _ => return None,
    };
    Some(count * unit_ms)
}

/// Compute the HTF bias series and its projection onto the LTF index axis.
///
/// Fails with `BiasUnavailable` when the HTF series is empty or the
/// resolution string does not parse; callers downgrade that to a warning and
/// skip confluence filtering.
pub fn compute_bias(
    ltf: &[Bar],
    htf: &[Bar],
    config: &ConfluenceConfig,
) -> Result<BiasSeries, EngineError> {
    let resolution_ms = parse_resolution(&config.htf_resolution).ok_or_else(|| {
        EngineError::BiasUnavailable(format!(
            "unknown htf resolution '{}'",
            config.htf_resolution
        ))
    })?;
    if htf.is_empty() {
        return Err(EngineError::BiasUnavailable(
            "htf bar series is empty".to_string(),
        ));
    }

    let htf_bias = htf_bias_per_bar(htf, config);

    // LTF index → containing HTF bar (last HTF bar opened at or before the
    // LTF timestamp), optionally stepped back to the previous closed bar.
    let mut ltf_to_htf = Vec::with_capacity(ltf.len());
    for bar in ltf {
        let pos = htf.partition_point(|h| h.time <= bar.time);
        let containing = pos.checked_sub(1);
        let mapped = if config.use_prev_htf_bar {
            containing.and_then(|c| c.checked_sub(1))
        } else {
            containing
        };
        ltf_to_htf.push(mapped);
    }

    debug!(
        htf_bars = htf.len(),
        ltf_bars = ltf.len(),
        resolution_ms,
        "computed htf bias projection"
    );

    Ok(BiasSeries {
        htf_bias,
        ltf_to_htf,
        resolution_ms,
    })
}

fn htf_bias_per_bar(htf: &[Bar], config: &ConfluenceConfig) -> Vec<Bias> {
    let closes: Vec<f64> = htf.iter().map(|b| b.close).collect();

    match config.bias_mode {
        BiasMode::Ema => {
            let fast = ema(&closes, config.ema_fast);
            let slow = ema(&closes, config.ema_slow);
            closes
                .iter()
                .enumerate()
                .map(|(i, _)| match (fast[i], slow[i]) {
                    (Some(f), Some(s)) if f > s => Bias::Bull,
                    (Some(f), Some(s)) if f < s => Bias::Bear,
                    _ => Bias::Neutral,
                })
                .collect()
        }
        BiasMode::Sma => {
            let ma = sma(&closes, config.sma_period);
            closes
                .iter()
                .enumerate()
                .map(|(i, close)| match ma[i] {
                    Some(m) if *close > m => Bias::Bull,
                    Some(m) if *close < m => Bias::Bear,
                    _ => Bias::Neutral,
                })
                .collect()
        }
        BiasMode::Range => {
            let highs: Vec<f64> = htf.iter().map(|b| b.high).collect();
            let lows: Vec<f64> = htf.iter().map(|b| b.low).collect();
            let hh = rolling_max(&highs, config.range_lookback);
            let ll = rolling_min(&lows, config.range_lookback);
            closes
                .iter()
                .enumerate()
                .map(|(i, close)| match (hh[i], ll[i]) {
                    (Some(h), _) if *close > h => Bias::Bull,
                    (_, Some(l)) if *close < l => Bias::Bear,
                    _ => Bias::Neutral,
                })
                .collect()
        }
    }
}
