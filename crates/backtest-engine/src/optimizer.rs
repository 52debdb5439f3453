use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use strategy_core::{check_bars, Bar, EngineError};
use tracing::debug;

use crate::cache::stable_key;
use crate::engine::run_backtest;
use crate::models::{
    ConfluenceConfig, ExecutionConfig, OptimizerResult, OptimizerSession, OptimizerSummary,
    ParamGrid, Progress, RankBy, SessionStatus, StrategyConfig,
};

/// Combinations evaluated per rayon batch. Batch boundaries are the
/// cancellation points; committed batches are never discarded.
const CHUNK: usize = 16;

/// Cooperative cancellation flag, polled between combinations.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// A bounded grid search over one strategy family's numeric parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizeRequest {
    pub strategy: StrategyConfig,
    pub grid: ParamGrid,
    pub execution: ExecutionConfig,
    pub confluence: ConfluenceConfig,
    #[serde(default)]
    pub ranking: RankBy,
    /// Enumeration stops here; 0 = unbounded.
    #[serde(default)]
    pub max_combos: usize,
    /// Results kept after ranking; 0 = all.
    #[serde(default)]
    pub top_n: usize,
}

/// Enumerate the parameter grid in lexicographic order, evaluate each
/// combination through the full pipeline, and rank the survivors.
///
/// Progress fires after every committed combination; the cancellation flag
/// is honored at batch boundaries and preserves already-committed results.
pub fn optimize(
    bars: &[Bar],
    htf_bars: Option<&[Bar]>,
    request: &OptimizeRequest,
    cancel: &CancelFlag,
    mut on_progress: impl FnMut(Progress),
) -> Result<OptimizerSession, EngineError> {
    check_bars(bars)?;
    request.strategy.validate()?;
    request.execution.validate()?;
    request.confluence.validate()?;

    let fields: Vec<(String, Vec<f64>)> = request
        .grid
        .values
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    for (name, values) in &fields {
        if values.is_empty() {
            return Err(EngineError::InvalidInput(format!(
                "grid field '{name}' has no candidate values"
            )));
        }
        // Reject unknown fields up front rather than per combination.
        apply_param(&request.strategy, name, values[0])?;
    }

    let full_product: usize = fields
        .iter()
        .map(|(_, v)| v.len())
        .fold(1usize, |acc, n| acc.saturating_mul(n));
    let attempted = if request.max_combos > 0 {
        full_product.min(request.max_combos)
    } else {
        full_product
    };
    let truncated = attempted < full_product;

    let evaluate = |combo_id: usize| -> Result<OptimizerResult, String> {
        let params = combo_at(&fields, combo_id);
        let mut strategy = request.strategy.clone();
        for (name, value) in &params {
            strategy = apply_param(&strategy, name, *value).map_err(|e| e.to_string())?;
        }
        strategy.validate().map_err(|e| e.to_string())?;
        let report = run_backtest(
            bars,
            std::slice::from_ref(&strategy),
            &request.execution,
            &request.confluence,
            htf_bars,
        )
        .map_err(|e| e.to_string())?;

        Ok(OptimizerResult {
            id: combo_id,
            setup: request.strategy.setup(),
            params,
            net_r: report.performance.net_r,
            max_drawdown: report.performance.max_drawdown,
            win_rate: report.stats.win_rate,
            expectancy: report.stats.expectancy,
            profit_factor: report.stats.profit_factor,
            stats: report.stats,
        })
    };

    let mut results: Vec<OptimizerResult> = Vec::new();
    let mut failed = 0usize;
    let mut first_error: Option<String> = None;
    let mut done = 0usize;
    let mut cancelled = false;

    let mut next = 0usize;
    while next < attempted {
        if cancel.is_cancelled() {
            cancelled = true;
            break;
        }
        let upper = (next + CHUNK).min(attempted);
        let batch: Vec<Result<OptimizerResult, String>> =
            (next..upper).into_par_iter().map(evaluate).collect();
        for outcome in batch {
            done += 1;
            match outcome {
                Ok(result) => results.push(result),
                Err(message) => {
                    failed += 1;
                    if first_error.is_none() {
                        first_error = Some(message);
                    }
                }
            }
            on_progress(Progress {
                done,
                total: attempted,
            });
        }
        debug!(done, total = attempted, "optimizer batch committed");
        next = upper;
    }

    // Parallel batches keep enumeration order, but re-sort anyway so the
    // ranking is deterministic by construction.
    sort_results(&mut results, request.ranking);
    if request.top_n > 0 {
        results.truncate(request.top_n);
    }

    let status = if cancelled {
        SessionStatus::Cancelled
    } else if attempted > 0 && failed == attempted {
        SessionStatus::Failed
    } else {
        SessionStatus::Complete
    };
    let error = if cancelled && first_error.is_none() {
        Some(EngineError::Cancelled("stopped at a combination boundary".to_string()).to_string())
    } else {
        first_error
    };

    Ok(OptimizerSession {
        session_id: format!("opt-{}", &stable_key(bars, request)[..12]),
        status,
        progress: Progress {
            done,
            total: attempted,
        },
        results,
        summary: OptimizerSummary {
            attempted: done,
            truncated,
            failed,
        },
        error,
    })
}

/// The combination at `index` in lexicographic order over the fixed field
/// ordering: the last field varies fastest.
fn combo_at(fields: &[(String, Vec<f64>)], index: usize) -> BTreeMap<String, f64> {
    let mut out = BTreeMap::new();
    let mut rest = index;
    for (name, values) in fields.iter().rev() {
        out.insert(name.clone(), values[rest % values.len()]);
        rest /= values.len();
    }
    out
}

fn to_count(value: f64) -> Result<usize, EngineError> {
    if value < 0.0 || value.fract() != 0.0 || value > usize::MAX as f64 {
        return Err(EngineError::InvalidInput(format!(
            "grid value {value} is not a non-negative integer"
        )));
    }
    Ok(value as usize)
}

/// Apply one grid parameter to a copy of the base strategy config.
fn apply_param(
    base: &StrategyConfig,
    field: &str,
    value: f64,
) -> Result<StrategyConfig, EngineError> {
    let mut config = base.clone();
    let unknown = || {
        EngineError::InvalidInput(format!(
            "unknown grid field '{}' for {}",
            field,
            base.setup().as_str()
        ))
    };
    match &mut config {
        StrategyConfig::RangeBreakout(c) => match field {
            "lookback_bars" => c.lookback_bars = to_count(value)?,
            "atr_period" => c.atr_period = to_count(value)?,
            "buffer_atr_mult" => c.buffer_atr_mult = value,
            "rr" => c.rr = value,
            "cooldown_bars" => c.cooldown_bars = to_count(value)?,
            _ => return Err(unknown()),
        },
        StrategyConfig::BreakRetest(c) => match field {
            "lookback_bars" => c.lookback_bars = to_count(value)?,
            "atr_period" => c.atr_period = to_count(value)?,
            "buffer_atr_mult" => c.buffer_atr_mult = value,
            "rr" => c.rr = value,
            "retest_bars" => c.retest_bars = to_count(value)?,
            "retest_buffer_atr_mult" => c.retest_buffer_atr_mult = value,
            "cooldown_bars" => c.cooldown_bars = to_count(value)?,
            _ => return Err(unknown()),
        },
        StrategyConfig::FvgRetrace(c) => match field {
            "atr_period" => c.atr_period = to_count(value)?,
            "min_gap_atr_mult" => c.min_gap_atr_mult = value,
            "max_wait_bars" => c.max_wait_bars = to_count(value)?,
            "stop_cushion_atr_mult" => c.stop_cushion_atr_mult = value,
            "rr" => c.rr = value,
            "cooldown_bars" => c.cooldown_bars = to_count(value)?,
            _ => return Err(unknown()),
        },
        StrategyConfig::TrendPullback(c) => match field {
            "ema_fast" => c.ema_fast = to_count(value)?,
            "ema_slow" => c.ema_slow = to_count(value)?,
            "min_trend_bars" => c.min_trend_bars = to_count(value)?,
            "atr_period" => c.atr_period = to_count(value)?,
            "stop_atr_mult" => c.stop_atr_mult = value,
            "rr" => c.rr = value,
            "cooldown_bars" => c.cooldown_bars = to_count(value)?,
            _ => return Err(unknown()),
        },
        StrategyConfig::MeanReversion(c) => match field {
            "sma_period" => c.sma_period = to_count(value)?,
            "atr_period" => c.atr_period = to_count(value)?,
            "band_atr_mult" => c.band_atr_mult = value,
            "stop_atr_mult" => c.stop_atr_mult = value,
            "rr" => c.rr = value,
            "rsi_period" => c.rsi_period = to_count(value)?,
            "rsi_oversold" => c.rsi_oversold = value,
            "rsi_overbought" => c.rsi_overbought = value,
            "cooldown_bars" => c.cooldown_bars = to_count(value)?,
            _ => return Err(unknown()),
        },
    }
    Ok(config)
}

fn rank_value(result: &OptimizerResult, key: RankBy) -> Option<f64> {
    match key {
        RankBy::NetR => Some(result.net_r),
        RankBy::Expectancy => result.expectancy,
        RankBy::ProfitFactor => result.profit_factor,
        RankBy::WinRate => result.win_rate,
        RankBy::MaxDrawdown => Some(result.max_drawdown),
    }
}

/// Descending on the ranking key (ascending for drawdown); undefined values
/// rank last, ties fall back to combination id.
fn sort_results(results: &mut [OptimizerResult], key: RankBy) {
    results.sort_by(|a, b| {
        let ord = match (rank_value(a, key), rank_value(b, key)) {
            (Some(x), Some(y)) => {
                let cmp = if key == RankBy::MaxDrawdown {
                    x.partial_cmp(&y)
                } else {
                    y.partial_cmp(&x)
                };
                cmp.unwrap_or(std::cmp::Ordering::Equal)
            }
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => std::cmp::Ordering::Equal,
        };
        ord.then(a.id.cmp(&b.id))
    });
}
