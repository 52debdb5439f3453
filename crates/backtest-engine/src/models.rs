use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use strategy_core::{EngineError, SetupKind, Trade};

// =============================================================================
// Execution configuration
// =============================================================================

/// When a candidate's entry is referenced relative to its signal bar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryTiming {
    #[default]
    NextOpen,
    SignalClose,
}

/// Order type used to enter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderKind {
    #[default]
    Market,
    Limit,
    Stop,
}

/// Whether exits trigger on intrabar touches or only on closes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitMode {
    #[default]
    Touch,
    Close,
}

/// Resolution when stop and target are both reachable in the same bar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TieBreaker {
    #[default]
    Sl,
    Tp,
}

/// Pricing model for one execution cost (spread, slippage, or commission).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CostModel {
    #[default]
    None,
    Fixed,
    Atr,
    Percent,
}

/// One execution cost: a model plus the value/multiplier/percent it reads.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CostSpec {
    #[serde(default)]
    pub model: CostModel,
    /// Absolute price units, used by the `fixed` model.
    #[serde(default)]
    pub value: f64,
    /// ATR multiplier, used by the `atr` model.
    #[serde(default)]
    pub atr_mult: f64,
    /// Fraction of price (0.001 = 0.1%), used by the `percent` model.
    #[serde(default)]
    pub percent: f64,
}

/// Trading-session bucket of an entry bar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionFilter {
    #[default]
    All,
    Asia,
    London,
    Ny,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionTimezone {
    #[default]
    Utc,
    Local,
}

/// Cost multipliers applied while a given session is active.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SessionCosts {
    #[serde(default = "default_one")]
    pub spread: f64,
    #[serde(default = "default_one")]
    pub slippage: f64,
    #[serde(default = "default_one")]
    pub commission: f64,
}

impl Default for SessionCosts {
    fn default() -> Self {
        Self {
            spread: 1.0,
            slippage: 1.0,
            commission: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SessionCostTable {
    #[serde(default)]
    pub asia: SessionCosts,
    #[serde(default)]
    pub london: SessionCosts,
    #[serde(default)]
    pub ny: SessionCosts,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MinStopMode {
    #[default]
    Adjust,
    Skip,
}

/// Minimum stop distance policy: required minimum is
/// `max(value, atr_mult * ATR)` at the entry bar.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MinStopPolicy {
    #[serde(default)]
    pub value: f64,
    #[serde(default)]
    pub atr_mult: f64,
    #[serde(default)]
    pub mode: MinStopMode,
}

/// Volatility-regime scaling of slippage. `lookback = 0` disables it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VolatilitySlippage {
    #[serde(default)]
    pub lookback: usize,
    #[serde(default = "default_vol_low_threshold")]
    pub low_threshold: f64,
    #[serde(default = "default_vol_high_threshold")]
    pub high_threshold: f64,
    #[serde(default = "default_one")]
    pub low_mult: f64,
    #[serde(default = "default_one")]
    pub mid_mult: f64,
    #[serde(default = "default_one")]
    pub high_mult: f64,
}

impl Default for VolatilitySlippage {
    fn default() -> Self {
        Self {
            lookback: 0,
            low_threshold: default_vol_low_threshold(),
            high_threshold: default_vol_high_threshold(),
            low_mult: 1.0,
            mid_mult: 1.0,
            high_mult: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartialFillMode {
    #[default]
    None,
    Range,
}

/// Range-proportional partial fills on narrow bars.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PartialFill {
    #[serde(default)]
    pub mode: PartialFillMode,
    #[serde(default = "default_one")]
    pub atr_mult: f64,
    #[serde(default = "default_min_ratio")]
    pub min_ratio: f64,
    /// Also measure the exit bar and keep the smaller ratio.
    #[serde(default)]
    pub on_exit: bool,
}

impl Default for PartialFill {
    fn default() -> Self {
        Self {
            mode: PartialFillMode::None,
            atr_mult: 1.0,
            min_ratio: default_min_ratio(),
            on_exit: false,
        }
    }
}

/// Cost amplification on news-spike bars. `atr_mult = 0` disables it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NewsSpike {
    #[serde(default)]
    pub atr_mult: f64,
    #[serde(default = "default_one")]
    pub slippage_mult: f64,
    #[serde(default = "default_one")]
    pub spread_mult: f64,
}

impl Default for NewsSpike {
    fn default() -> Self {
        Self {
            atr_mult: 0.0,
            slippage_mult: 1.0,
            spread_mult: 1.0,
        }
    }
}

/// Execution realism model for turning candidates into trades.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExecutionConfig {
    #[serde(default)]
    pub entry_timing: EntryTiming,
    #[serde(default)]
    pub order_type: OrderKind,
    #[serde(default)]
    pub entry_delay_bars: usize,
    #[serde(default = "default_max_entry_wait")]
    pub max_entry_wait_bars: usize,
    #[serde(default)]
    pub exit_mode: ExitMode,
    #[serde(default = "default_true")]
    pub allow_same_bar_exit: bool,
    #[serde(default)]
    pub tie_breaker: TieBreaker,
    /// Period backing every ATR-denominated execution knob below.
    #[serde(default = "default_atr_period")]
    pub atr_period: usize,
    #[serde(default)]
    pub spread: CostSpec,
    #[serde(default)]
    pub slippage: CostSpec,
    #[serde(default)]
    pub commission: CostSpec,
    /// Absolute cap on the spread after model and session multipliers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_spread_value: Option<f64>,
    #[serde(default)]
    pub session_filter: SessionFilter,
    #[serde(default)]
    pub session_timezone: SessionTimezone,
    #[serde(default)]
    pub session_costs: SessionCostTable,
    #[serde(default)]
    pub min_stop: MinStopPolicy,
    #[serde(default)]
    pub volatility_slippage: VolatilitySlippage,
    #[serde(default)]
    pub partial_fill: PartialFill,
    #[serde(default)]
    pub news_spike: NewsSpike,
    /// Force an exit at the close of the Nth bar after entry. 0 = unlimited.
    #[serde(default)]
    pub max_hold_bars: usize,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            entry_timing: EntryTiming::NextOpen,
            order_type: OrderKind::Market,
            entry_delay_bars: 0,
            max_entry_wait_bars: default_max_entry_wait(),
            exit_mode: ExitMode::Touch,
            allow_same_bar_exit: true,
            tie_breaker: TieBreaker::Sl,
            atr_period: default_atr_period(),
            spread: CostSpec::default(),
            slippage: CostSpec::default(),
            commission: CostSpec::default(),
            max_spread_value: None,
            session_filter: SessionFilter::All,
            session_timezone: SessionTimezone::Utc,
            session_costs: SessionCostTable::default(),
            min_stop: MinStopPolicy::default(),
            volatility_slippage: VolatilitySlippage::default(),
            partial_fill: PartialFill::default(),
            news_spike: NewsSpike::default(),
            max_hold_bars: 0,
        }
    }
}

impl ExecutionConfig {
    /// Reject combinations the simulator cannot honor.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.entry_timing == EntryTiming::SignalClose && self.order_type != OrderKind::Market {
            return Err(EngineError::ConfigConflict(
                "entry_timing=signal_close requires a market order; limit/stop \
                 orders cannot trigger on the signal bar"
                    .to_string(),
            ));
        }
        if self.atr_period == 0 {
            return Err(EngineError::InvalidInput(
                "atr_period must be positive".to_string(),
            ));
        }
        if let Some(cap) = self.max_spread_value {
            if cap < 0.0 {
                return Err(EngineError::InvalidInput(
                    "max_spread_value must be non-negative".to_string(),
                ));
            }
        }
        let vs = &self.volatility_slippage;
        if vs.lookback > 0 && vs.low_threshold > vs.high_threshold {
            return Err(EngineError::InvalidInput(
                "volatility_slippage low_threshold exceeds high_threshold".to_string(),
            ));
        }
        let pf = &self.partial_fill;
        if pf.mode == PartialFillMode::Range && !(pf.min_ratio > 0.0 && pf.min_ratio <= 1.0) {
            return Err(EngineError::InvalidInput(
                "partial_fill.min_ratio must lie in (0, 1]".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_one() -> f64 {
    1.0
}
fn default_true() -> bool {
    true
}
fn default_atr_period() -> usize {
    14
}
fn default_max_entry_wait() -> usize {
    5
}
fn default_min_ratio() -> f64 {
    0.25
}
fn default_vol_low_threshold() -> f64 {
    0.5
}
fn default_vol_high_threshold() -> f64 {
    2.0
}

// =============================================================================
// Confluence configuration
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BiasMode {
    #[default]
    Ema,
    Sma,
    Range,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BiasReference {
    #[default]
    Signal,
    Entry,
}

/// Higher-timeframe bias filter configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfluenceConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_htf_resolution")]
    pub htf_resolution: String,
    #[serde(default)]
    pub bias_mode: BiasMode,
    #[serde(default = "default_ema_fast")]
    pub ema_fast: usize,
    #[serde(default = "default_ema_slow")]
    pub ema_slow: usize,
    #[serde(default = "default_sma_period")]
    pub sma_period: usize,
    #[serde(default = "default_range_lookback")]
    pub range_lookback: usize,
    #[serde(default)]
    pub allow_neutral: bool,
    #[serde(default = "default_true")]
    pub use_prev_htf_bar: bool,
    #[serde(default)]
    pub bias_reference: BiasReference,
}

impl Default for ConfluenceConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            htf_resolution: default_htf_resolution(),
            bias_mode: BiasMode::Ema,
            ema_fast: default_ema_fast(),
            ema_slow: default_ema_slow(),
            sma_period: default_sma_period(),
            range_lookback: default_range_lookback(),
            allow_neutral: false,
            use_prev_htf_bar: true,
            bias_reference: BiasReference::Signal,
        }
    }
}

impl ConfluenceConfig {
    pub fn validate(&self) -> Result<(), EngineError> {
        if !self.enabled {
            return Ok(());
        }
        match self.bias_mode {
            BiasMode::Ema => {
                if self.ema_fast == 0 || self.ema_slow == 0 || self.ema_fast >= self.ema_slow {
                    return Err(EngineError::InvalidInput(
                        "confluence ema_fast must be positive and below ema_slow".to_string(),
                    ));
                }
            }
            BiasMode::Sma => {
                if self.sma_period == 0 {
                    return Err(EngineError::InvalidInput(
                        "confluence sma_period must be positive".to_string(),
                    ));
                }
            }
            BiasMode::Range => {
                if self.range_lookback == 0 {
                    return Err(EngineError::InvalidInput(
                        "confluence range_lookback must be positive".to_string(),
                    ));
                }
            }
        }
        Ok(())
    }
}

fn default_htf_resolution() -> String {
    "1h".to_string()
}
fn default_ema_fast() -> usize {
    20
}
fn default_ema_slow() -> usize {
    50
}
fn default_sma_period() -> usize {
    20
}
fn default_range_lookback() -> usize {
    20
}

// =============================================================================
// Strategy configurations (one per family)
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakoutMode {
    #[default]
    Close,
    Wick,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmMode {
    #[default]
    Touch,
    Close,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FvgEntryMode {
    #[default]
    Mid,
    Edge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PullbackEma {
    #[default]
    Fast,
    Slow,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RangeBreakoutConfig {
    #[serde(default = "default_lookback_bars")]
    pub lookback_bars: usize,
    #[serde(default = "default_strategy_atr_period")]
    pub atr_period: usize,
    #[serde(default)]
    pub buffer_atr_mult: f64,
    #[serde(default = "default_rr")]
    pub rr: f64,
    #[serde(default)]
    pub breakout_mode: BreakoutMode,
    #[serde(default = "default_cooldown")]
    pub cooldown_bars: usize,
}

impl Default for RangeBreakoutConfig {
    fn default() -> Self {
        Self {
            lookback_bars: default_lookback_bars(),
            atr_period: default_strategy_atr_period(),
            buffer_atr_mult: 0.0,
            rr: default_rr(),
            breakout_mode: BreakoutMode::Close,
            cooldown_bars: default_cooldown(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BreakRetestConfig {
    #[serde(default = "default_lookback_bars")]
    pub lookback_bars: usize,
    #[serde(default = "default_strategy_atr_period")]
    pub atr_period: usize,
    #[serde(default)]
    pub buffer_atr_mult: f64,
    #[serde(default = "default_rr")]
    pub rr: f64,
    #[serde(default)]
    pub breakout_mode: BreakoutMode,
    #[serde(default = "default_retest_bars")]
    pub retest_bars: usize,
    #[serde(default = "default_retest_buffer")]
    pub retest_buffer_atr_mult: f64,
    #[serde(default)]
    pub confirm: ConfirmMode,
    #[serde(default = "default_cooldown")]
    pub cooldown_bars: usize,
}

impl Default for BreakRetestConfig {
    fn default() -> Self {
        Self {
            lookback_bars: default_lookback_bars(),
            atr_period: default_strategy_atr_period(),
            buffer_atr_mult: 0.0,
            rr: default_rr(),
            breakout_mode: BreakoutMode::Close,
            retest_bars: default_retest_bars(),
            retest_buffer_atr_mult: default_retest_buffer(),
            confirm: ConfirmMode::Touch,
            cooldown_bars: default_cooldown(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FvgRetraceConfig {
    #[serde(default = "default_strategy_atr_period")]
    pub atr_period: usize,
    #[serde(default = "default_min_gap")]
    pub min_gap_atr_mult: f64,
    #[serde(default = "default_max_wait")]
    pub max_wait_bars: usize,
    #[serde(default)]
    pub entry_mode: FvgEntryMode,
    #[serde(default = "default_stop_cushion")]
    pub stop_cushion_atr_mult: f64,
    #[serde(default = "default_rr")]
    pub rr: f64,
    #[serde(default = "default_cooldown")]
    pub cooldown_bars: usize,
}

impl Default for FvgRetraceConfig {
    fn default() -> Self {
        Self {
            atr_period: default_strategy_atr_period(),
            min_gap_atr_mult: default_min_gap(),
            max_wait_bars: default_max_wait(),
            entry_mode: FvgEntryMode::Mid,
            stop_cushion_atr_mult: default_stop_cushion(),
            rr: default_rr(),
            cooldown_bars: default_cooldown(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TrendPullbackConfig {
    #[serde(default = "default_ema_fast_strategy")]
    pub ema_fast: usize,
    #[serde(default = "default_ema_slow_strategy")]
    pub ema_slow: usize,
    #[serde(default = "default_min_trend_bars")]
    pub min_trend_bars: usize,
    #[serde(default)]
    pub pullback_ema: PullbackEma,
    #[serde(default)]
    pub confirm: ConfirmMode,
    #[serde(default = "default_strategy_atr_period")]
    pub atr_period: usize,
    #[serde(default = "default_stop_atr_mult")]
    pub stop_atr_mult: f64,
    #[serde(default = "default_rr")]
    pub rr: f64,
    #[serde(default = "default_cooldown")]
    pub cooldown_bars: usize,
}

impl Default for TrendPullbackConfig {
    fn default() -> Self {
        Self {
            ema_fast: default_ema_fast_strategy(),
            ema_slow: default_ema_slow_strategy(),
            min_trend_bars: default_min_trend_bars(),
            pullback_ema: PullbackEma::Fast,
            confirm: ConfirmMode::Touch,
            atr_period: default_strategy_atr_period(),
            stop_atr_mult: default_stop_atr_mult(),
            rr: default_rr(),
            cooldown_bars: default_cooldown(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MeanReversionConfig {
    #[serde(default = "default_sma_period")]
    pub sma_period: usize,
    #[serde(default = "default_strategy_atr_period")]
    pub atr_period: usize,
    #[serde(default = "default_band_atr_mult")]
    pub band_atr_mult: f64,
    #[serde(default = "default_stop_atr_mult")]
    pub stop_atr_mult: f64,
    #[serde(default = "default_rr")]
    pub rr: f64,
    #[serde(default)]
    pub use_rsi_filter: bool,
    #[serde(default = "default_rsi_period")]
    pub rsi_period: usize,
    #[serde(default = "default_rsi_oversold")]
    pub rsi_oversold: f64,
    #[serde(default = "default_rsi_overbought")]
    pub rsi_overbought: f64,
    #[serde(default = "default_cooldown")]
    pub cooldown_bars: usize,
}

impl Default for MeanReversionConfig {
    fn default() -> Self {
        Self {
            sma_period: default_sma_period(),
            atr_period: default_strategy_atr_period(),
            band_atr_mult: default_band_atr_mult(),
            stop_atr_mult: default_stop_atr_mult(),
            rr: default_rr(),
            use_rsi_filter: false,
            rsi_period: default_rsi_period(),
            rsi_oversold: default_rsi_oversold(),
            rsi_overbought: default_rsi_overbought(),
            cooldown_bars: default_cooldown(),
        }
    }
}

fn default_lookback_bars() -> usize {
    20
}
fn default_strategy_atr_period() -> usize {
    14
}
fn default_rr() -> f64 {
    2.0
}
fn default_cooldown() -> usize {
    0
}
fn default_retest_bars() -> usize {
    5
}
fn default_retest_buffer() -> f64 {
    0.25
}
fn default_min_gap() -> f64 {
    0.5
}
fn default_max_wait() -> usize {
    10
}
fn default_stop_cushion() -> f64 {
    0.25
}
fn default_ema_fast_strategy() -> usize {
    9
}
fn default_ema_slow_strategy() -> usize {
    21
}
fn default_min_trend_bars() -> usize {
    5
}
fn default_stop_atr_mult() -> f64 {
    1.5
}
fn default_band_atr_mult() -> f64 {
    2.0
}
fn default_rsi_period() -> usize {
    14
}
fn default_rsi_oversold() -> f64 {
    30.0
}
fn default_rsi_overbought() -> f64 {
    70.0
}

/// One strategy family plus its parameters. Generators dispatch on the
/// variant; there is no shared interface hiding per-family fields.
///
/// Serialized as `{"setup": "...", "params": {...}}` so the per-family
/// structs keep rejecting unknown fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "setup", content = "params", rename_all = "snake_case")]
pub enum StrategyConfig {
    RangeBreakout(RangeBreakoutConfig),
    BreakRetest(BreakRetestConfig),
    FvgRetrace(FvgRetraceConfig),
    TrendPullback(TrendPullbackConfig),
    MeanReversion(MeanReversionConfig),
}

impl StrategyConfig {
    pub fn setup(&self) -> SetupKind {
        match self {
            StrategyConfig::RangeBreakout(_) => SetupKind::RangeBreakout,
            StrategyConfig::BreakRetest(_) => SetupKind::BreakRetest,
            StrategyConfig::FvgRetrace(_) => SetupKind::FvgRetrace,
            StrategyConfig::TrendPullback(_) => SetupKind::TrendPullback,
            StrategyConfig::MeanReversion(_) => SetupKind::MeanReversion,
        }
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        let bad = |msg: &str| Err(EngineError::InvalidInput(msg.to_string()));
        match self {
            StrategyConfig::RangeBreakout(c) => {
                if c.lookback_bars == 0 || c.atr_period == 0 {
                    return bad("range_breakout periods must be positive");
                }
                if c.rr <= 0.0 {
                    return bad("range_breakout rr must be positive");
                }
            }
            StrategyConfig::BreakRetest(c) => {
                if c.lookback_bars == 0 || c.atr_period == 0 || c.retest_bars == 0 {
                    return bad("break_retest periods must be positive");
                }
                if c.rr <= 0.0 {
                    return bad("break_retest rr must be positive");
                }
            }
            StrategyConfig::FvgRetrace(c) => {
                if c.atr_period == 0 || c.max_wait_bars == 0 {
                    return bad("fvg_retrace periods must be positive");
                }
                if c.rr <= 0.0 || c.min_gap_atr_mult < 0.0 {
                    return bad("fvg_retrace rr/min_gap_atr_mult out of range");
                }
            }
            StrategyConfig::TrendPullback(c) => {
                if c.ema_fast == 0 || c.ema_slow == 0 || c.ema_fast >= c.ema_slow {
                    return bad("trend_pullback ema_fast must be positive and below ema_slow");
                }
                if c.atr_period == 0 || c.min_trend_bars == 0 {
                    return bad("trend_pullback periods must be positive");
                }
                if c.rr <= 0.0 || c.stop_atr_mult <= 0.0 {
                    return bad("trend_pullback rr/stop_atr_mult must be positive");
                }
            }
            StrategyConfig::MeanReversion(c) => {
                if c.sma_period == 0 || c.atr_period == 0 {
                    return bad("mean_reversion periods must be positive");
                }
                if c.use_rsi_filter && c.rsi_period == 0 {
                    return bad("mean_reversion rsi_period must be positive");
                }
                if c.rr <= 0.0 || c.band_atr_mult <= 0.0 || c.stop_atr_mult <= 0.0 {
                    return bad("mean_reversion rr/band/stop multipliers must be positive");
                }
            }
        }
        Ok(())
    }
}

// =============================================================================
// Aggregation results
// =============================================================================

/// Closed-trade statistics. `Option` fields are undefined when the relevant
/// denominator has no samples.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Stats {
    pub total: usize,
    pub closed: usize,
    pub wins: usize,
    pub losses: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub win_rate: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expectancy: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avg_win: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avg_loss: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profit_factor: Option<f64>,
    pub gross_win_r: f64,
    pub gross_loss_r: f64,
}

/// A point on the cumulative-R equity curve, keyed by entry index.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EquityPoint {
    pub index: usize,
    pub equity: f64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Performance {
    pub net_r: f64,
    pub max_drawdown: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_drawdown_pct: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avg_r: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub median_r: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avg_hold_ms: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avg_hold_bars: Option<f64>,
    pub max_win_streak: usize,
    pub max_loss_streak: usize,
    pub curve: Vec<EquityPoint>,
}

/// Result of one full pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestReport {
    pub trades: Vec<Trade>,
    pub stats: Stats,
    pub performance: Performance,
    /// Non-fatal conditions surfaced to the caller (e.g. bias unavailable).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

// =============================================================================
// Validation & walk-forward
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SplitMode {
    #[default]
    Percent,
    LastDays,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ValidationConfig {
    #[serde(default)]
    pub mode: SplitMode,
    /// Train share for `percent` mode, 0-100.
    #[serde(default = "default_train_percent")]
    pub percent: f64,
    /// Trailing test window for `last_days` mode.
    #[serde(default = "default_last_days")]
    pub days: f64,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            mode: SplitMode::Percent,
            percent: default_train_percent(),
            days: default_last_days(),
        }
    }
}

fn default_train_percent() -> f64 {
    70.0
}
fn default_last_days() -> f64 {
    30.0
}

/// Half-open bar-index range `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexRange {
    pub start: usize,
    pub end: usize,
}

impl IndexRange {
    pub fn contains(&self, index: usize) -> bool {
        index >= self.start && index < self.end
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub mode: SplitMode,
    pub split_index: usize,
    pub train_range: IndexRange,
    pub test_range: IndexRange,
    pub train_stats: Stats,
    pub test_stats: Stats,
    pub train_equity: Vec<EquityPoint>,
    pub test_equity: Vec<EquityPoint>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WalkForwardConfig {
    pub train_days: f64,
    pub test_days: f64,
    pub step_days: f64,
    #[serde(default = "default_min_trades")]
    pub min_trades: usize,
}

fn default_min_trades() -> usize {
    5
}

/// One (train window, test window) pair drawn by the rolling schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fold {
    pub id: usize,
    pub train_range: IndexRange,
    pub test_range: IndexRange,
    pub train_stats: Stats,
    pub test_stats: Stats,
    pub train_equity: Vec<EquityPoint>,
    pub test_equity: Vec<EquityPoint>,
}

/// Diagnostic flags indicating recent test-window behavior diverging from
/// the overall history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DriftFlag {
    LowPositiveFraction,
    RecentNetrDegraded,
    RecentWinrateDegraded,
    RecentPfBelowOne,
    LastTwoNegative,
    LowStability,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalkForwardSummary {
    pub folds: usize,
    pub avg_net_r: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avg_expectancy: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avg_win_rate: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avg_profit_factor: Option<f64>,
    pub avg_max_drawdown: f64,
    /// Fraction of folds with positive test net R, 0-100.
    pub positive_net_pct: f64,
    /// 0-100, rounded.
    pub stability_score: f64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub drift_flags: Vec<DriftFlag>,
    pub recent_net_r: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recent_win_rate: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recent_profit_factor: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalkForwardReport {
    pub folds: Vec<Fold>,
    /// Absent when no fold survived the schedule and min-trade filters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<WalkForwardSummary>,
}

// =============================================================================
// Optimizer
// =============================================================================

/// Metric the optimizer ranks by. `max_drawdown` is minimized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RankBy {
    #[default]
    NetR,
    Expectancy,
    ProfitFactor,
    WinRate,
    MaxDrawdown,
}

/// Allowed values per strategy parameter. `BTreeMap` fixes the field
/// ordering, making the Cartesian enumeration lexicographic and stable.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ParamGrid {
    pub values: BTreeMap<String, Vec<f64>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizerResult {
    pub id: usize,
    pub setup: SetupKind,
    pub params: BTreeMap<String, f64>,
    pub stats: Stats,
    pub net_r: f64,
    pub max_drawdown: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub win_rate: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expectancy: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profit_factor: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Running,
    Complete,
    Cancelled,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Progress {
    pub done: usize,
    pub total: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizerSummary {
    /// Combinations actually evaluated (or attempted).
    pub attempted: usize,
    /// True when the full Cartesian product exceeded `max_combos`.
    pub truncated: bool,
    /// Combinations that errored; their slots are excluded from results.
    pub failed: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizerSession {
    pub session_id: String,
    pub status: SessionStatus,
    pub progress: Progress,
    pub results: Vec<OptimizerResult>,
    pub summary: OptimizerSummary,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
