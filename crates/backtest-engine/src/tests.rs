use serde_json::{json, Map};
use strategy_core::{Bar, Candidate, EngineError, ExitReason, Outcome, SetupKind, Side, Trade};

use crate::aggregate::{compute_performance, compute_stats};
use crate::bias::{compute_bias, parse_resolution, Bias, BiasSeries};
use crate::cache::{stable_key, ResultCache};
use crate::confluence;
use crate::engine::run_backtest;
use crate::execution::simulate;
use crate::indicator_bank::IndicatorBank;
use crate::models::*;
use crate::optimizer::{optimize, CancelFlag, OptimizeRequest};
use crate::validation::validate;
use crate::walk_forward::run_walk_forward;

const MINUTE: i64 = 60_000;
const DAY: i64 = 86_400_000;

/// Helper: create a bar at an epoch-ms timestamp.
fn bar(time: i64, open: f64, high: f64, low: f64, close: f64) -> Bar {
    Bar {
        time,
        open,
        high,
        low,
        close,
        volume: Some(1_000.0),
    }
}

/// Helper: one-minute bars from OHLC tuples.
fn minute_bars(prices: &[(f64, f64, f64, f64)]) -> Vec<Bar> {
    prices
        .iter()
        .enumerate()
        .map(|(i, (o, h, l, c))| bar(i as i64 * MINUTE, *o, *h, *l, *c))
        .collect()
}

/// Helper: daily bars with a flat mild drift, for window schedules.
fn daily_bars(days: usize) -> Vec<Bar> {
    (0..days)
        .map(|i| {
            let base = 100.0 + i as f64 * 0.1;
            bar(i as i64 * DAY, base, base + 1.0, base - 1.0, base + 0.5)
        })
        .collect()
}

/// Helper: a cost-free execution config.
fn no_cost_execution() -> ExecutionConfig {
    ExecutionConfig::default()
}

/// Helper: a bare candidate for direct simulator tests.
fn candidate(side: Side, signal_index: usize, entry: f64, stop: f64, take_profit: f64) -> Candidate {
    Candidate {
        id: "test-0".to_string(),
        setup: SetupKind::RangeBreakout,
        side,
        signal_index,
        entry_index: signal_index,
        entry_price: entry,
        stop_loss: stop,
        take_profit,
        meta: Map::new(),
    }
}

/// Helper: a closed trade with a given entry index and R, for the analyses.
fn closed_trade(id: &str, entry_index: usize, entry_time: i64, r: f64) -> Trade {
    Trade {
        id: id.to_string(),
        setup: SetupKind::RangeBreakout,
        side: Side::Buy,
        signal_index: entry_index.saturating_sub(1),
        entry_index,
        entry_time,
        entry_price: 100.0,
        stop_loss: 99.0,
        take_profit: 102.0,
        exit_index: Some(entry_index + 1),
        exit_time: Some(entry_time + MINUTE),
        exit_price: Some(100.0 + r),
        exit_reason: if r >= 0.0 { ExitReason::Tp } else { ExitReason::Sl },
        r_multiple: Some(r),
        fees_r: 0.0,
        fill_ratio: 1.0,
        outcome: if r >= 0.0 { Outcome::Win } else { Outcome::Loss },
        meta: Map::new(),
    }
}

fn breakout_bars() -> Vec<Bar> {
    vec![
        bar(0, 1.0, 1.1, 0.9, 1.0),
        bar(60_000, 1.0, 1.5, 1.0, 1.4),
        bar(120_000, 1.4, 1.6, 1.3, 1.5),
        bar(180_000, 1.5, 2.0, 1.5, 2.0),
    ]
}

fn breakout_strategy() -> StrategyConfig {
    StrategyConfig::RangeBreakout(RangeBreakoutConfig {
        lookback_bars: 2,
        atr_period: 2,
        buffer_atr_mult: 0.0,
        rr: 1.0,
        breakout_mode: BreakoutMode::Close,
        cooldown_bars: 0,
    })
}

// =============================================================================
// A single-bar breakout enters at the next open and stays OPEN
// =============================================================================

#[test]
fn test_breakout_enters_next_open_and_stays_open() {
    let bars = breakout_bars();
    let report = run_backtest(
        &bars,
        &[breakout_strategy()],
        &no_cost_execution(),
        &ConfluenceConfig::default(),
        None,
    )
    .unwrap();

    assert_eq!(report.trades.len(), 1);
    let trade = &report.trades[0];
    assert_eq!(trade.side, Side::Buy);
    assert_eq!(trade.signal_index, 2);
    assert_eq!(trade.entry_index, 3);
    assert!((trade.entry_price - 1.5).abs() < 1e-12);
    assert!((trade.stop_loss - 0.9).abs() < 1e-12);
    assert!((trade.take_profit - 2.1).abs() < 1e-12);
    assert_eq!(trade.outcome, Outcome::Open);
    assert_eq!(trade.exit_reason, ExitReason::Open);
    assert_eq!(trade.r_multiple, None);
    assert_eq!(report.stats.total, 1);
    assert_eq!(report.stats.closed, 0);
}

// =============================================================================
// Same-bar tp+sl resolves by the tie-breaker, regardless of bar width
// =============================================================================

#[test]
fn test_same_bar_tie_break() {
    let bars = vec![
        bar(0, 100.0, 100.0, 100.0, 100.0),
        // One bar wide enough to reach both the stop and the target.
        bar(MINUTE, 100.0, 120.0, 80.0, 100.0),
    ];
    let cand = candidate(Side::Buy, 0, 100.0, 90.0, 110.0);

    let mut sl_config = no_cost_execution();
    sl_config.tie_breaker = TieBreaker::Sl;
    let mut bank = IndicatorBank::new(&bars);
    let output = simulate(vec![cand.clone()], &sl_config, &mut bank);
    assert_eq!(output.trades.len(), 1);
    let trade = &output.trades[0];
    assert_eq!(trade.outcome, Outcome::Loss);
    assert_eq!(trade.exit_price, Some(90.0));
    assert!((trade.r_multiple.unwrap() + 1.0).abs() < 1e-12);

    let mut tp_config = no_cost_execution();
    tp_config.tie_breaker = TieBreaker::Tp;
    let mut bank = IndicatorBank::new(&bars);
    let output = simulate(vec![cand], &tp_config, &mut bank);
    let trade = &output.trades[0];
    assert_eq!(trade.outcome, Outcome::Win);
    assert_eq!(trade.exit_price, Some(110.0));
    assert!((trade.r_multiple.unwrap() - 1.0).abs() < 1e-12);
}

// =============================================================================
// A limit entry never touched expires and leaves no trade behind
// =============================================================================

#[test]
fn test_limit_entry_expiry() {
    let bars = minute_bars(&[
        (100.0, 101.0, 99.5, 100.5),
        (100.5, 101.5, 100.0, 101.0),
        (101.0, 102.0, 100.5, 101.5),
        (101.5, 102.5, 101.0, 102.0),
        (102.0, 103.0, 101.5, 102.5),
    ]);
    // Limit buy parked far below the series; it can never fill.
    let cand = candidate(Side::Buy, 0, 90.0, 85.0, 95.0);

    let mut config = no_cost_execution();
    config.order_type = OrderKind::Limit;
    config.max_entry_wait_bars = 3;
    let mut bank = IndicatorBank::new(&bars);
    let output = simulate(vec![cand], &config, &mut bank);

    assert!(output.trades.is_empty());
    assert_eq!(output.dropped.len(), 1);
    assert_eq!(
        output.dropped[0].meta.get("drop_reason"),
        Some(&json!("entry_expired"))
    );
}

// =============================================================================
// An unfillable walk-forward schedule yields no folds and no summary
// =============================================================================

#[test]
fn test_walk_forward_unfillable_schedule() {
    let bars = daily_bars(10);
    let trades: Vec<Trade> = (0..8)
        .map(|i| closed_trade(&format!("t{i}"), i, i as i64 * DAY, 1.0))
        .collect();
    let config = WalkForwardConfig {
        train_days: 20.0,
        test_days: 5.0,
        step_days: 5.0,
        min_trades: 1,
    };

    let report = run_walk_forward(&trades, &bars, &config).unwrap();
    assert!(report.folds.is_empty());
    assert!(report.summary.is_none());
}

// =============================================================================
// Confluence removes counter-bias candidates and honors allow_neutral
// =============================================================================

#[test]
fn test_confluence_counter_bias_and_neutral() {
    let n = 4;
    let execution = no_cost_execution();
    let config = ConfluenceConfig {
        enabled: true,
        allow_neutral: false,
        ..ConfluenceConfig::default()
    };
    let buy = candidate(Side::Buy, 1, 100.0, 99.0, 102.0);

    let bear = BiasSeries {
        htf_bias: vec![Bias::Bear],
        ltf_to_htf: vec![Some(0); n],
        resolution_ms: 3_600_000,
    };
    let kept = confluence::apply(vec![buy.clone()], &bear, &config, &execution, n);
    assert!(kept.is_empty());

    let neutral = BiasSeries {
        htf_bias: vec![Bias::Neutral],
        ltf_to_htf: vec![Some(0); n],
        resolution_ms: 3_600_000,
    };
    let tolerant = ConfluenceConfig {
        allow_neutral: true,
        ..config
    };
    let kept = confluence::apply(vec![buy], &neutral, &tolerant, &execution, n);
    assert_eq!(kept.len(), 1);
    assert_eq!(kept[0].meta.get("htf_bias"), Some(&json!("neutral")));
}

// =============================================================================
// Optimizer truncation at max_combos with top_n respected
// =============================================================================

#[test]
fn test_optimizer_truncation_at_max_combos() {
    let bars = breakout_bars();
    let mut values = std::collections::BTreeMap::new();
    values.insert(
        "lookback_bars".to_string(),
        (2..12).map(|v| v as f64).collect(),
    );
    values.insert("rr".to_string(), (1..11).map(|v| v as f64).collect());
    values.insert(
        "cooldown_bars".to_string(),
        (0..10).map(|v| v as f64).collect(),
    );
    let request = OptimizeRequest {
        strategy: breakout_strategy(),
        grid: ParamGrid { values },
        execution: no_cost_execution(),
        confluence: ConfluenceConfig::default(),
        ranking: RankBy::NetR,
        max_combos: 100,
        top_n: 5,
    };

    let mut updates = Vec::new();
    let session = optimize(&bars, None, &request, &CancelFlag::new(), |p| {
        updates.push(p)
    })
    .unwrap();

    assert_eq!(session.status, SessionStatus::Complete);
    assert_eq!(session.summary.attempted, 100);
    assert!(session.summary.truncated);
    assert_eq!(session.progress, Progress { done: 100, total: 100 });
    assert!(session.results.len() <= 5);
    assert_eq!(updates.len(), 100);
    assert_eq!(updates.last(), Some(&Progress { done: 100, total: 100 }));
    for (i, p) in updates.iter().enumerate() {
        assert_eq!(p.done, i + 1);
        assert_eq!(p.total, 100);
    }
}

// =============================================================================
// Determinism: bit-identical reports for identical inputs
// =============================================================================

#[test]
fn test_determinism_across_runs() {
    let bars = trending_bars(120);
    let strategies = vec![
        breakout_strategy(),
        StrategyConfig::TrendPullback(TrendPullbackConfig::default()),
        StrategyConfig::MeanReversion(MeanReversionConfig::default()),
    ];
    let execution = no_cost_execution();
    let confluence = ConfluenceConfig::default();

    let a = run_backtest(&bars, &strategies, &execution, &confluence, None).unwrap();
    let b = run_backtest(&bars, &strategies, &execution, &confluence, None).unwrap();
    assert_eq!(a, b);
}

/// A deterministic series that trends up with periodic pullbacks, busy
/// enough to exercise several generators at once.
fn trending_bars(n: usize) -> Vec<Bar> {
    let mut out = Vec::with_capacity(n);
    let mut price: f64 = 100.0;
    for i in 0..n {
        let phase = i % 10;
        let drift = if phase < 7 { 0.6 } else { -0.9 };
        let open = price;
        let close = price + drift;
        let high = open.max(close) + 0.4;
        let low = open.min(close) - 0.4;
        out.push(bar(i as i64 * MINUTE, open, high, low, close));
        price = close;
    }
    out
}

// =============================================================================
// Chronology and R accounting over a mixed pipeline run
// =============================================================================

#[test]
fn test_chronology_and_r_accounting() {
    let bars = trending_bars(150);
    let mut execution = no_cost_execution();
    execution.spread = CostSpec {
        model: CostModel::Fixed,
        value: 0.05,
        ..CostSpec::default()
    };
    execution.commission = CostSpec {
        model: CostModel::Percent,
        percent: 0.0002,
        ..CostSpec::default()
    };
    let strategies = vec![
        breakout_strategy(),
        StrategyConfig::MeanReversion(MeanReversionConfig::default()),
    ];
    let report = run_backtest(
        &bars,
        &strategies,
        &execution,
        &ConfluenceConfig::default(),
        None,
    )
    .unwrap();

    assert!(!report.trades.is_empty());
    let mut r_sum = 0.0;
    for trade in &report.trades {
        assert!(trade.entry_index >= trade.signal_index);
        if let Some(exit_index) = trade.exit_index {
            assert!(exit_index >= trade.entry_index);
        }
        assert!(trade.fill_ratio > 0.0 && trade.fill_ratio <= 1.0);
        if let Some(r) = trade.r_multiple {
            r_sum += r;
        }
    }
    assert!((r_sum - report.performance.net_r).abs() < 1e-9 * report.trades.len() as f64 + 1e-12);
}

// =============================================================================
// Aggregator: permutation invariance and streaks
// =============================================================================

#[test]
fn test_aggregator_permutation_invariance() {
    let trades: Vec<Trade> = [1.0, -0.5, 2.0, -1.0, -1.0, 0.5]
        .iter()
        .enumerate()
        .map(|(i, r)| closed_trade(&format!("t{i}"), i * 2, i as i64 * MINUTE, *r))
        .collect();

    let forward = compute_performance(&trades, None);
    let mut shuffled = trades.clone();
    shuffled.reverse();
    shuffled.swap(0, 3);
    let scrambled = compute_performance(&shuffled, None);

    assert_eq!(forward, scrambled);
    assert!((forward.net_r - 1.0).abs() < 1e-12);
    assert_eq!(forward.max_win_streak, 1);
    assert_eq!(forward.max_loss_streak, 2);
    // Peak after trade 3 (r=+2): equity 2.5; trough after the two losses: 0.5.
    assert!((forward.max_drawdown - 2.0).abs() < 1e-12);
}

#[test]
fn test_stats_edge_cases() {
    let stats = compute_stats(&[]);
    assert_eq!(stats.total, 0);
    assert_eq!(stats.win_rate, None);
    assert_eq!(stats.expectancy, None);
    assert_eq!(stats.profit_factor, None);

    let winners: Vec<Trade> = (0..3)
        .map(|i| closed_trade(&format!("w{i}"), i, i as i64 * MINUTE, 1.0))
        .collect();
    let stats = compute_stats(&winners);
    assert_eq!(stats.wins, 3);
    assert_eq!(stats.losses, 0);
    assert_eq!(stats.profit_factor, Some(f64::INFINITY));
    assert_eq!(stats.win_rate, Some(1.0));
}

// =============================================================================
// Execution details: costs, min-stop, sessions, partial fills
// =============================================================================

#[test]
fn test_fees_reduce_r() {
    let bars = vec![
        bar(0, 100.0, 100.0, 100.0, 100.0),
        bar(MINUTE, 100.0, 100.0, 100.0, 100.0),
        bar(2 * MINUTE, 100.0, 112.0, 100.0, 111.0),
    ];
    let cand = candidate(Side::Buy, 0, 100.0, 90.0, 110.0);
    let mut config = no_cost_execution();
    config.spread = CostSpec {
        model: CostModel::Fixed,
        value: 0.5,
        ..CostSpec::default()
    };
    config.slippage = CostSpec {
        model: CostModel::Fixed,
        value: 0.25,
        ..CostSpec::default()
    };
    config.commission = CostSpec {
        model: CostModel::Fixed,
        value: 0.25,
        ..CostSpec::default()
    };

    let mut bank = IndicatorBank::new(&bars);
    let output = simulate(vec![cand], &config, &mut bank);
    let trade = &output.trades[0];
    // (0.5 + 0.25 + 0.25) price units over 10 risk = 0.1R in fees.
    assert!((trade.fees_r - 0.1).abs() < 1e-12);
    assert_eq!(trade.outcome, Outcome::Win);
    assert!((trade.r_multiple.unwrap() - 0.9).abs() < 1e-12);
}

#[test]
fn test_min_stop_policy() {
    let bars = vec![
        bar(0, 100.0, 100.0, 100.0, 100.0),
        bar(MINUTE, 100.0, 101.0, 99.0, 100.0),
    ];
    let tight = candidate(Side::Buy, 0, 100.0, 98.0, 104.0);

    let mut adjust = no_cost_execution();
    adjust.min_stop = MinStopPolicy {
        value: 5.0,
        atr_mult: 0.0,
        mode: MinStopMode::Adjust,
    };
    let mut bank = IndicatorBank::new(&bars);
    let output = simulate(vec![tight.clone()], &adjust, &mut bank);
    assert_eq!(output.trades.len(), 1);
    assert!((output.trades[0].stop_loss - 95.0).abs() < 1e-12);

    let mut skip = adjust.clone();
    skip.min_stop.mode = MinStopMode::Skip;
    let mut bank = IndicatorBank::new(&bars);
    let output = simulate(vec![tight], &skip, &mut bank);
    assert!(output.trades.is_empty());
    assert_eq!(
        output.dropped[0].meta.get("drop_reason"),
        Some(&json!("min_stop"))
    );
}

#[test]
fn test_session_filter_drops_off_session_entries() {
    // Entry bar lands at 02:00 UTC, which is the asia bucket.
    let bars = vec![
        bar(2 * 3_600_000 - MINUTE, 100.0, 100.5, 99.5, 100.0),
        bar(2 * 3_600_000, 100.0, 101.0, 99.0, 100.5),
        bar(2 * 3_600_000 + MINUTE, 100.5, 101.5, 99.5, 101.0),
    ];
    let cand = candidate(Side::Buy, 0, 100.0, 99.0, 102.0);

    let mut ny_only = no_cost_execution();
    ny_only.session_filter = SessionFilter::Ny;
    let mut bank = IndicatorBank::new(&bars);
    let output = simulate(vec![cand.clone()], &ny_only, &mut bank);
    assert!(output.trades.is_empty());
    assert_eq!(
        output.dropped[0].meta.get("drop_reason"),
        Some(&json!("session_filtered"))
    );

    let mut asia_only = no_cost_execution();
    asia_only.session_filter = SessionFilter::Asia;
    let mut bank = IndicatorBank::new(&bars);
    let output = simulate(vec![cand], &asia_only, &mut bank);
    assert_eq!(output.trades.len(), 1);
    assert_eq!(output.trades[0].meta.get("session"), Some(&json!("asia")));
}

#[test]
fn test_partial_fill_on_narrow_bars() {
    // Warm the ATR with 3-point true ranges, then enter on a bar whose
    // high-low range is half that (its true range stays 3 via the gap).
    let mut bars: Vec<Bar> = (0..20)
        .map(|i| bar(i as i64 * MINUTE, 100.0, 102.0, 99.0, 100.0))
        .collect();
    bars.push(bar(20 * MINUTE, 102.0, 103.0, 101.5, 102.0));
    bars.push(bar(21 * MINUTE, 102.0, 120.0, 102.0, 119.0));

    let cand = candidate(Side::Buy, 19, 102.0, 97.0, 112.0);
    let mut config = no_cost_execution();
    config.partial_fill = PartialFill {
        mode: PartialFillMode::Range,
        atr_mult: 1.0,
        min_ratio: 0.25,
        on_exit: false,
    };

    let mut bank = IndicatorBank::new(&bars);
    let output = simulate(vec![cand], &config, &mut bank);
    let trade = &output.trades[0];
    // Entry bar range 1.5 vs ATR 3.0 → half fill, scaling R linearly.
    assert!((trade.fill_ratio - 0.5).abs() < 1e-9);
    assert_eq!(trade.outcome, Outcome::Win);
    let expected = (112.0 - 102.0) / 5.0 * 0.5;
    assert!((trade.r_multiple.unwrap() - expected).abs() < 1e-9);
}

#[test]
fn test_timeout_exit_expires_trade() {
    let bars: Vec<Bar> = (0..10)
        .map(|i| bar(i as i64 * MINUTE, 100.0, 100.5, 99.5, 100.2))
        .collect();
    let cand = candidate(Side::Buy, 0, 100.0, 95.0, 105.0);
    let mut config = no_cost_execution();
    config.max_hold_bars = 3;

    let mut bank = IndicatorBank::new(&bars);
    let output = simulate(vec![cand], &config, &mut bank);
    let trade = &output.trades[0];
    assert_eq!(trade.exit_reason, ExitReason::Timeout);
    assert_eq!(trade.outcome, Outcome::Expired);
    assert_eq!(trade.exit_index, Some(4));
    assert_eq!(trade.exit_price, Some(100.2));
}

#[test]
fn test_config_conflict_signal_close_limit() {
    let mut config = no_cost_execution();
    config.entry_timing = EntryTiming::SignalClose;
    config.order_type = OrderKind::Limit;

    let err = run_backtest(
        &breakout_bars(),
        &[breakout_strategy()],
        &config,
        &ConfluenceConfig::default(),
        None,
    )
    .unwrap_err();
    assert!(matches!(err, EngineError::ConfigConflict(_)));
}

#[test]
fn test_non_monotonic_bars_rejected() {
    let mut bars = breakout_bars();
    bars[2].time = bars[1].time;
    let err = run_backtest(
        &bars,
        &[breakout_strategy()],
        &no_cost_execution(),
        &ConfluenceConfig::default(),
        None,
    )
    .unwrap_err();
    assert!(matches!(err, EngineError::InvalidInput(_)));
}

// =============================================================================
// Bias engine
// =============================================================================

#[test]
fn test_parse_resolution() {
    assert_eq!(parse_resolution("1m"), Some(60_000));
    assert_eq!(parse_resolution("4h"), Some(4 * 3_600_000));
    assert_eq!(parse_resolution("1d"), Some(86_400_000));
    assert_eq!(parse_resolution("0h"), None);
    assert_eq!(parse_resolution("fast"), None);
    assert_eq!(parse_resolution(""), None);
}

#[test]
fn test_bias_unavailable_on_bad_resolution() {
    let ltf = daily_bars(5);
    let config = ConfluenceConfig {
        enabled: true,
        htf_resolution: "??".to_string(),
        ..ConfluenceConfig::default()
    };
    let err = compute_bias(&ltf, &ltf, &config).unwrap_err();
    assert!(matches!(err, EngineError::BiasUnavailable(_)));
}

#[test]
fn test_bias_unavailable_surfaces_warning_not_error() {
    let bars = breakout_bars();
    let config = ConfluenceConfig {
        enabled: true,
        ..ConfluenceConfig::default()
    };
    // Confluence enabled but no HTF series: the run continues unfiltered.
    let report = run_backtest(&bars, &[breakout_strategy()], &no_cost_execution(), &config, None).unwrap();
    assert_eq!(report.trades.len(), 1);
    assert_eq!(report.warnings.len(), 1);
}

#[test]
fn test_sma_bias_projection() {
    // HTF: hourly bars trending down, so close < SMA → bear.
    let htf: Vec<Bar> = (0..6)
        .map(|i| {
            let p = 110.0 - i as f64 * 2.0;
            bar(i as i64 * 3_600_000, p, p + 0.5, p - 2.5, p - 2.0)
        })
        .collect();
    let ltf: Vec<Bar> = (0..12)
        .map(|i| bar(i as i64 * 30 * MINUTE, 100.0, 101.0, 99.0, 100.0))
        .collect();
    let config = ConfluenceConfig {
        enabled: true,
        htf_resolution: "1h".to_string(),
        bias_mode: BiasMode::Sma,
        sma_period: 3,
        use_prev_htf_bar: false,
        ..ConfluenceConfig::default()
    };

    let bias = compute_bias(&ltf, &htf, &config).unwrap();
    assert_eq!(bias.ltf_to_htf[0], Some(0));
    assert_eq!(bias.ltf_to_htf[2], Some(1));
    // Warm-up HTF bars are neutral, later ones bear.
    assert_eq!(bias.at(0), Bias::Neutral);
    assert_eq!(bias.at(11), Bias::Bear);

    let prev = ConfluenceConfig {
        use_prev_htf_bar: true,
        ..config
    };
    let bias_prev = compute_bias(&ltf, &htf, &prev).unwrap();
    assert_eq!(bias_prev.ltf_to_htf[0], None);
    assert_eq!(bias_prev.ltf_to_htf[2], Some(0));
}

#[test]
fn test_confluence_idempotence() {
    let n = 6;
    let bias = BiasSeries {
        htf_bias: vec![Bias::Bull],
        ltf_to_htf: vec![Some(0); n],
        resolution_ms: 3_600_000,
    };
    let config = ConfluenceConfig {
        enabled: true,
        ..ConfluenceConfig::default()
    };
    let execution = no_cost_execution();
    let candidates = vec![
        candidate(Side::Buy, 1, 100.0, 99.0, 102.0),
        candidate(Side::Sell, 2, 100.0, 101.0, 98.0),
    ];

    let once = confluence::apply(candidates, &bias, &config, &execution, n);
    let twice = confluence::apply(once.clone(), &bias, &config, &execution, n);
    assert_eq!(once, twice);
    assert_eq!(once.len(), 1);
    assert_eq!(once[0].side, Side::Buy);
}

// =============================================================================
// Validation and walk-forward
// =============================================================================

#[test]
fn test_percent_split() {
    let bars = daily_bars(10);
    let trades: Vec<Trade> = (0..10)
        .map(|i| closed_trade(&format!("t{i}"), i, i as i64 * DAY, if i % 2 == 0 { 1.0 } else { -1.0 }))
        .collect();
    let config = ValidationConfig {
        mode: SplitMode::Percent,
        percent: 50.0,
        days: 0.0,
    };
    let report = validate(&trades, &bars, &config).unwrap();

    assert_eq!(report.split_index, 4);
    assert_eq!(report.train_range, IndexRange { start: 0, end: 5 });
    assert_eq!(report.test_range, IndexRange { start: 5, end: 10 });
    assert_eq!(report.train_stats.total, 5);
    assert_eq!(report.test_stats.total, 5);
}

#[test]
fn test_last_days_split() {
    let bars = daily_bars(10);
    let trades: Vec<Trade> = (0..10)
        .map(|i| closed_trade(&format!("t{i}"), i, i as i64 * DAY, 1.0))
        .collect();
    let config = ValidationConfig {
        mode: SplitMode::LastDays,
        percent: 0.0,
        days: 3.0,
    };
    let report = validate(&trades, &bars, &config).unwrap();

    // Last bar at day 9; the trailing 3-day window starts at day 6.
    assert_eq!(report.split_index, 6);
    assert_eq!(report.test_stats.total, 4);
    assert_eq!(report.train_stats.total, 6);
}

#[test]
fn test_single_bar_series_cannot_split() {
    let bars = daily_bars(1);
    let err = validate(&[], &bars, &ValidationConfig::default()).unwrap_err();
    assert!(matches!(err, EngineError::InsufficientData(_)));
}

#[test]
fn test_walk_forward_folds_and_coverage() {
    let bars = daily_bars(30);
    let trades: Vec<Trade> = (0..30)
        .map(|i| {
            closed_trade(
                &format!("t{i}"),
                i,
                i as i64 * DAY,
                if i % 3 == 0 { -0.5 } else { 1.0 },
            )
        })
        .collect();
    let config = WalkForwardConfig {
        train_days: 10.0,
        test_days: 5.0,
        step_days: 5.0,
        min_trades: 2,
    };

    let report = run_walk_forward(&trades, &bars, &config).unwrap();
    assert_eq!(report.folds.len(), 3);
    for fold in &report.folds {
        assert!(fold.train_stats.total >= config.min_trades);
        assert!(fold.test_stats.total >= config.min_trades);
        // Train and test index ranges are disjoint.
        assert!(fold.train_range.end <= fold.test_range.start);
    }

    let summary = report.summary.unwrap();
    assert_eq!(summary.folds, 3);
    assert!((0.0..=100.0).contains(&summary.stability_score));
    assert!((0.0..=100.0).contains(&summary.positive_net_pct));
    assert!(summary.avg_net_r > 0.0);
}

#[test]
fn test_walk_forward_drift_flags_on_degrading_strategy() {
    let bars = daily_bars(40);
    // Strong early folds, consistently negative late folds.
    let trades: Vec<Trade> = (0..40)
        .map(|i| {
            let r = if i < 20 { 1.0 } else { -1.0 };
            closed_trade(&format!("t{i}"), i, i as i64 * DAY, r)
        })
        .collect();
    let config = WalkForwardConfig {
        train_days: 10.0,
        test_days: 5.0,
        step_days: 5.0,
        min_trades: 2,
    };

    let summary = run_walk_forward(&trades, &bars, &config)
        .unwrap()
        .summary
        .unwrap();
    assert!(summary.recent_net_r < 0.0);
    assert!(summary.drift_flags.contains(&DriftFlag::LastTwoNegative));
    assert!(summary
        .drift_flags
        .contains(&DriftFlag::RecentWinrateDegraded));
}

// =============================================================================
// Optimizer ranking, cancellation, and grid validation
// =============================================================================

fn ranking_bars() -> Vec<Bar> {
    let mut bars = breakout_bars();
    bars.push(bar(240_000, 2.0, 3.0, 2.0, 3.0));
    bars
}

#[test]
fn test_optimizer_ranking_by_net_r() {
    let mut values = std::collections::BTreeMap::new();
    values.insert("rr".to_string(), vec![0.5, 1.0, 5.0]);
    let request = OptimizeRequest {
        strategy: breakout_strategy(),
        grid: ParamGrid { values },
        execution: no_cost_execution(),
        confluence: ConfluenceConfig::default(),
        ranking: RankBy::NetR,
        max_combos: 0,
        top_n: 0,
    };

    let session = optimize(&ranking_bars(), None, &request, &CancelFlag::new(), |_| {}).unwrap();
    assert_eq!(session.status, SessionStatus::Complete);
    assert_eq!(session.results.len(), 3);
    let best = session.results[0].net_r;
    for result in &session.results {
        assert!(best >= result.net_r);
    }
    // rr=1 closes at +1R; rr=0.5 at +0.5R; rr=5 never exits.
    assert_eq!(session.results[0].params.get("rr"), Some(&1.0));
    assert!((session.results[0].net_r - 1.0).abs() < 1e-12);
}

#[test]
fn test_optimizer_cancellation_preserves_results() {
    let mut values = std::collections::BTreeMap::new();
    values.insert("rr".to_string(), (1..50).map(|v| v as f64).collect());
    let request = OptimizeRequest {
        strategy: breakout_strategy(),
        grid: ParamGrid { values },
        execution: no_cost_execution(),
        confluence: ConfluenceConfig::default(),
        ranking: RankBy::NetR,
        max_combos: 0,
        top_n: 0,
    };

    let cancel = CancelFlag::new();
    cancel.cancel();
    let session = optimize(&ranking_bars(), None, &request, &cancel, |_| {}).unwrap();
    assert_eq!(session.status, SessionStatus::Cancelled);
    assert_eq!(session.progress.done, 0);
    assert!(session.results.is_empty());
    assert!(session.error.unwrap().starts_with("cancelled"));
}

#[test]
fn test_optimizer_rejects_empty_grid_field() {
    let mut values = std::collections::BTreeMap::new();
    values.insert("rr".to_string(), Vec::new());
    let request = OptimizeRequest {
        strategy: breakout_strategy(),
        grid: ParamGrid { values },
        execution: no_cost_execution(),
        confluence: ConfluenceConfig::default(),
        ranking: RankBy::NetR,
        max_combos: 10,
        top_n: 5,
    };
    let err = optimize(&breakout_bars(), None, &request, &CancelFlag::new(), |_| {}).unwrap_err();
    assert!(matches!(err, EngineError::InvalidInput(_)));
}

#[test]
fn test_optimizer_session_id_is_stable() {
    let mut values = std::collections::BTreeMap::new();
    values.insert("rr".to_string(), vec![1.0, 2.0]);
    let request = OptimizeRequest {
        strategy: breakout_strategy(),
        grid: ParamGrid { values },
        execution: no_cost_execution(),
        confluence: ConfluenceConfig::default(),
        ranking: RankBy::NetR,
        max_combos: 0,
        top_n: 0,
    };
    let bars = ranking_bars();
    let a = optimize(&bars, None, &request, &CancelFlag::new(), |_| {}).unwrap();
    let b = optimize(&bars, None, &request, &CancelFlag::new(), |_| {}).unwrap();
    assert_eq!(a.session_id, b.session_id);
    assert_eq!(a, b);
}

// =============================================================================
// Serialization contract
// =============================================================================

#[test]
fn test_enum_wire_casing() {
    assert_eq!(serde_json::to_value(Side::Buy).unwrap(), json!("buy"));
    assert_eq!(
        serde_json::to_value(SetupKind::RangeBreakout).unwrap(),
        json!("range_breakout")
    );
    assert_eq!(
        serde_json::to_value(ExitReason::Timeout).unwrap(),
        json!("timeout")
    );
    assert_eq!(
        serde_json::to_value(DriftFlag::LowPositiveFraction).unwrap(),
        json!("LOW_POSITIVE_FRACTION")
    );
    assert_eq!(
        serde_json::to_value(SessionStatus::Cancelled).unwrap(),
        json!("cancelled")
    );
}

#[test]
fn test_unknown_config_fields_rejected() {
    let result: Result<ExecutionConfig, _> = serde_json::from_value(json!({
        "entry_timing": "next_open",
        "made_up_field": 3
    }));
    assert!(result.is_err());

    let result: Result<ConfluenceConfig, _> = serde_json::from_value(json!({
        "enabled": true,
        "htf_res": "4h"
    }));
    assert!(result.is_err());
}

#[test]
fn test_bars_and_trades_round_trip() {
    let original = breakout_bars();
    let json = serde_json::to_string(&original).unwrap();
    let back: Vec<Bar> = serde_json::from_str(&json).unwrap();
    assert_eq!(original, back);

    let report = run_backtest(
        &original,
        &[breakout_strategy()],
        &no_cost_execution(),
        &ConfluenceConfig::default(),
        None,
    )
    .unwrap();
    let json = serde_json::to_string(&report.trades).unwrap();
    let back: Vec<Trade> = serde_json::from_str(&json).unwrap();
    assert_eq!(report.trades, back);
}

// =============================================================================
// Result cache
// =============================================================================

#[test]
fn test_stable_key_sensitivity() {
    let bars = breakout_bars();
    let a = stable_key(&bars, &breakout_strategy());
    let b = stable_key(&bars, &breakout_strategy());
    assert_eq!(a, b);

    let other = StrategyConfig::RangeBreakout(RangeBreakoutConfig {
        rr: 3.0,
        ..RangeBreakoutConfig::default()
    });
    assert_ne!(a, stable_key(&bars, &other));
    assert_ne!(a, stable_key(&bars[..3], &breakout_strategy()));
}

#[test]
fn test_result_cache_lru_and_ttl() {
    let mut cache: ResultCache<u32> = ResultCache::new(2, 1_000);
    cache.insert("a".to_string(), 1, 0);
    cache.insert("b".to_string(), 2, 0);
    assert_eq!(cache.get("a", 10), Some(&1));

    // "b" is now least-recently used and gets evicted.
    cache.insert("c".to_string(), 3, 20);
    assert_eq!(cache.len(), 2);
    assert_eq!(cache.get("b", 30), None);
    assert_eq!(cache.get("a", 30), Some(&1));

    // TTL expiry removes entries lazily on access.
    assert_eq!(cache.get("c", 2_000), None);
    assert!(cache.get("a", 30).is_some());
}
