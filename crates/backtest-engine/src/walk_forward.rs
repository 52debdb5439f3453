use statrs::statistics::Statistics;
use strategy_core::{check_bars, Bar, EngineError, Trade};
use tracing::debug;

use crate::aggregate::{compute_performance, compute_stats};
use crate::models::{
    DriftFlag, Fold, IndexRange, WalkForwardConfig, WalkForwardReport, WalkForwardSummary,
};

const DAY_MS: f64 = 86_400_000.0;

/// Roll (train, test) day windows across the bar series, score each fold on
/// the trades whose entry falls inside it, and summarize fold-to-fold
/// stability and drift.
///
/// A schedule that fits no fold (or whose folds all fail the min-trade
/// filter) yields an empty fold list and no summary; that is not an error.
pub fn run_walk_forward(
    trades: &[Trade],
    bars: &[Bar],
    config: &WalkForwardConfig,
) -> Result<WalkForwardReport, EngineError> {
    check_bars(bars)?;
    if config.train_days <= 0.0 || config.test_days <= 0.0 || config.step_days <= 0.0 {
        return Err(EngineError::InvalidInput(
            "walk-forward day windows must be positive".to_string(),
        ));
    }

    let first_time = bars[0].time;
    let last_time = bars[bars.len() - 1].time;
    let train_ms = (config.train_days * DAY_MS) as i64;
    let test_ms = (config.test_days * DAY_MS) as i64;
    let step_ms = (config.step_days * DAY_MS) as i64;
    if train_ms <= 0 || test_ms <= 0 || step_ms <= 0 {
        return Err(EngineError::InvalidInput(
            "walk-forward day windows truncate below one millisecond".to_string(),
        ));
    }

    let index_range = |from: i64, to: i64| -> IndexRange {
        IndexRange {
            start: bars.partition_point(|b| b.time < from),
            end: bars.partition_point(|b| b.time < to),
        }
    };

    let mut folds = Vec::new();
    let mut test_metrics: Vec<FoldMetrics> = Vec::new();
    let mut start = first_time;
    let mut id = 0usize;
    loop {
        let train_end = start + train_ms;
        let test_end = train_end + test_ms;
        if test_end > last_time + 1 {
            break;
        }

        let train_range = index_range(start, train_end);
        let test_range = index_range(train_end, test_end);
        let train: Vec<Trade> = trades
            .iter()
            .filter(|t| train_range.contains(t.entry_index))
            .cloned()
            .collect();
        let test: Vec<Trade> = trades
            .iter()
            .filter(|t| test_range.contains(t.entry_index))
            .cloned()
            .collect();

        if train.len() >= config.min_trades && test.len() >= config.min_trades {
            let train_stats = compute_stats(&train);
            let test_stats = compute_stats(&test);
            let train_perf = compute_performance(&train, None);
            let test_perf = compute_performance(&test, None);

            test_metrics.push(FoldMetrics {
                net_r: test_perf.net_r,
                max_drawdown: test_perf.max_drawdown,
                expectancy: test_stats.expectancy,
                win_rate: test_stats.win_rate,
                profit_factor: test_stats.profit_factor,
                gross_win_r: test_stats.gross_win_r,
                gross_loss_r: test_stats.gross_loss_r,
                wins: test_stats.wins,
                closed: test_stats.closed,
            });
            folds.push(Fold {
                id,
                train_range,
                test_range,
                train_stats,
                test_stats,
                train_equity: train_perf.curve,
                test_equity: test_perf.curve,
            });
            id += 1;
        } else {
            debug!(
                train = train.len(),
                test = test.len(),
                min = config.min_trades,
                "fold discarded below min-trade threshold"
            );
        }

        start += step_ms;
    }

    let summary = (!folds.is_empty()).then(|| summarize(&test_metrics));
    Ok(WalkForwardReport { folds, summary })
}

struct FoldMetrics {
    net_r: f64,
    max_drawdown: f64,
    expectancy: Option<f64>,
    win_rate: Option<f64>,
    profit_factor: Option<f64>,
    gross_win_r: f64,
    gross_loss_r: f64,
    wins: usize,
    closed: usize,
}

fn summarize(metrics: &[FoldMetrics]) -> WalkForwardSummary {
    let folds = metrics.len();
    let net_rs: Vec<f64> = metrics.iter().map(|m| m.net_r).collect();
    let avg_net_r = net_rs.iter().sum::<f64>() / folds as f64;
    let avg_max_drawdown = metrics.iter().map(|m| m.max_drawdown).sum::<f64>() / folds as f64;

    let avg_expectancy = mean_of(metrics.iter().filter_map(|m| m.expectancy));
    let win_rates: Vec<f64> = metrics.iter().filter_map(|m| m.win_rate).collect();
    let avg_win_rate = mean_of(win_rates.iter().copied());
    let finite_pfs: Vec<f64> = metrics
        .iter()
        .filter_map(|m| m.profit_factor)
        .filter(|pf| pf.is_finite())
        .collect();
    let avg_profit_factor = mean_of(finite_pfs.iter().copied());

    let positive = net_rs.iter().filter(|r| **r > 0.0).count();
    let positive_frac = positive as f64 / folds as f64;
    let positive_net_pct = positive_frac * 100.0;

    // Stability: weighted blend of the positive fraction and capped
    // coefficients of variation on the per-fold test metrics.
    let stability_raw = 0.45 * positive_frac
        + 0.30 * stability_term(coefficient_of_variation(&net_rs), 1.5)
        + 0.15 * stability_term(coefficient_of_variation(&win_rates), 0.5)
        + 0.10 * stability_term(coefficient_of_variation(&finite_pfs), 0.75);
    let stability_score = (100.0 * stability_raw).round();

    // Recent window: the last three folds.
    let recent = &metrics[folds.saturating_sub(3)..];
    let recent_net_r = recent.iter().map(|m| m.net_r).sum::<f64>() / recent.len() as f64;
    let recent_win_rate = aggregate_win_rate(recent);
    let recent_profit_factor = aggregate_profit_factor(recent);
    let overall_profit_factor = aggregate_profit_factor(metrics);

    let mut drift_flags = Vec::new();
    if positive_frac < 0.5 {
        drift_flags.push(DriftFlag::LowPositiveFraction);
    }
    if avg_net_r > 0.0 && recent_net_r < 0.4 * avg_net_r {
        drift_flags.push(DriftFlag::RecentNetrDegraded);
    }
    if let (Some(avg_wr), Some(recent_wr)) = (avg_win_rate, recent_win_rate) {
        if recent_wr < avg_wr - 0.15 {
            drift_flags.push(DriftFlag::RecentWinrateDegraded);
        }
    }
    if let (Some(overall_pf), Some(recent_pf)) = (overall_profit_factor, recent_profit_factor) {
        if overall_pf >= 1.1 && recent_pf < 1.0 {
            drift_flags.push(DriftFlag::RecentPfBelowOne);
        }
    }
    if folds >= 2 && net_rs[folds - 1] < 0.0 && net_rs[folds - 2] < 0.0 {
        drift_flags.push(DriftFlag::LastTwoNegative);
    }
    if stability_score < 50.0 {
        drift_flags.push(DriftFlag::LowStability);
    }

    WalkForwardSummary {
        folds,
        avg_net_r,
        avg_expectancy,
        avg_win_rate,
        avg_profit_factor,
        avg_max_drawdown,
        positive_net_pct,
        stability_score,
        drift_flags,
        recent_net_r,
        recent_win_rate,
        recent_profit_factor,
    }
}

fn mean_of(values: impl Iterator<Item = f64>) -> Option<f64> {
    let collected: Vec<f64> = values.collect();
    (!collected.is_empty()).then(|| collected.iter().sum::<f64>() / collected.len() as f64)
}

/// Sample coefficient of variation, `std / |mean|`. Degenerate samples
/// (fewer than two points) read as perfectly stable; a zero mean as
/// maximally unstable.
fn coefficient_of_variation(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let mean = values.to_vec().mean();
    if mean.abs() < 1e-12 {
        return f64::INFINITY;
    }
    values.to_vec().std_dev() / mean.abs()
}

fn stability_term(cv: f64, cap: f64) -> f64 {
    (1.0 - cv.min(cap) / cap).max(0.0)
}

fn aggregate_win_rate(metrics: &[FoldMetrics]) -> Option<f64> {
    let closed: usize = metrics.iter().map(|m| m.closed).sum();
    let wins: usize = metrics.iter().map(|m| m.wins).sum();
    (closed > 0).then(|| wins as f64 / closed as f64)
}

fn aggregate_profit_factor(metrics: &[FoldMetrics]) -> Option<f64> {
    let gross_win: f64 = metrics.iter().map(|m| m.gross_win_r).sum();
    let gross_loss: f64 = metrics.iter().map(|m| m.gross_loss_r).sum();
    if gross_loss < 0.0 {
        Some(gross_win / gross_loss.abs())
    } else if gross_win > 0.0 {
        Some(f64::INFINITY)
    } else {
        None
    }
}
