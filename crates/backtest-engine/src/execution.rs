use chrono::{TimeZone, Timelike};
use serde_json::Value;
use strategy_core::{Bar, Candidate, ExitReason, Outcome, Side, Trade};
use technical_indicators::Series;
use tracing::debug;

use crate::indicator_bank::IndicatorBank;
use crate::models::{
    CostModel, CostSpec, EntryTiming, ExecutionConfig, ExitMode, MinStopMode, OrderKind,
    PartialFill, PartialFillMode, SessionCosts, SessionFilter, SessionTimezone, TieBreaker,
    VolatilitySlippage,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Session {
    Asia,
    London,
    Ny,
}

impl Session {
    fn as_str(&self) -> &'static str {
        match self {
            Session::Asia => "asia",
            Session::London => "london",
            Session::Ny => "ny",
        }
    }
}

fn session_of_hour(hour: u32) -> Session {
    match hour {
        8..=12 => Session::London,
        13..=20 => Session::Ny,
        _ => Session::Asia,
    }
}

fn bar_hour(time_ms: i64, timezone: SessionTimezone) -> u32 {
    match timezone {
        SessionTimezone::Utc => chrono::Utc
            .timestamp_millis_opt(time_ms)
            .single()
            .map(|d| d.hour())
            .unwrap_or(0),
        SessionTimezone::Local => chrono::Local
            .timestamp_millis_opt(time_ms)
            .earliest()
            .map(|d| d.hour())
            .unwrap_or(0),
    }
}

fn eval_cost(spec: &CostSpec, atr: Option<f64>, price: f64) -> f64 {
    match spec.model {
        CostModel::None => 0.0,
        CostModel::Fixed => spec.value,
        CostModel::Atr => atr.map(|a| spec.atr_mult * a).unwrap_or(0.0),
        CostModel::Percent => spec.percent * price,
    }
}

/// Slippage multiplier from the bar's range relative to its recent average.
/// Uses the bars strictly before the entry bar; falls back to the mid
/// multiplier with insufficient history.
fn volatility_mult(config: &VolatilitySlippage, bars: &[Bar], index: usize) -> f64 {
    if config.lookback == 0 || index < config.lookback {
        return config.mid_mult;
    }
    let avg: f64 = bars[index - config.lookback..index]
        .iter()
        .map(|b| b.range())
        .sum::<f64>()
        / config.lookback as f64;
    if avg <= 0.0 {
        return config.mid_mult;
    }
    let ratio = bars[index].range() / avg;
    if ratio < config.low_threshold {
        config.low_mult
    } else if ratio > config.high_threshold {
        config.high_mult
    } else {
        config.mid_mult
    }
}

/// Fill fraction at one bar: full when the bar range reaches the ATR
/// threshold, proportional (floored at `min_ratio`) below it.
fn fill_ratio_at(config: &PartialFill, bars: &[Bar], index: usize, atr: Option<f64>) -> f64 {
    if config.mode != PartialFillMode::Range {
        return 1.0;
    }
    let Some(a) = atr else { return 1.0 };
    let threshold = config.atr_mult * a;
    if threshold <= 0.0 {
        return 1.0;
    }
    let range = bars[index].range();
    if range < threshold {
        (range / threshold).max(config.min_ratio)
    } else {
        1.0
    }
}

pub struct SimulationOutput {
    pub trades: Vec<Trade>,
    /// Candidates removed during simulation, each with a `drop_reason`.
    pub dropped: Vec<Candidate>,
}

/// Run every candidate through the execution model, in signal order.
pub fn simulate(
    candidates: Vec<Candidate>,
    config: &ExecutionConfig,
    bank: &mut IndicatorBank,
) -> SimulationOutput {
    let bars = bank.bars();
    let atr = bank.atr(config.atr_period);

    let mut trades = Vec::new();
    let mut dropped = Vec::new();
    for mut c in candidates {
        match simulate_one(&c, bars, config, &atr) {
            Ok(trade) => trades.push(trade),
            Err(reason) => {
                debug!(id = %c.id, reason, "candidate dropped during execution");
                c.meta
                    .insert("drop_reason".to_string(), Value::from(reason));
                dropped.push(c);
            }
        }
    }
    SimulationOutput { trades, dropped }
}

fn resolve_entry(
    c: &Candidate,
    bars: &[Bar],
    config: &ExecutionConfig,
) -> Result<(usize, f64), &'static str> {
    let n = bars.len();
    let base = match config.entry_timing {
        EntryTiming::SignalClose => c.signal_index,
        EntryTiming::NextOpen => c.signal_index + 1,
    } + config.entry_delay_bars;
    if base >= n {
        return Err("no_entry_bar");
    }

    match config.order_type {
        OrderKind::Market => {
            let price = match config.entry_timing {
                EntryTiming::SignalClose => bars[base].close,
                EntryTiming::NextOpen => bars[base].open,
            };
            Ok((base, price))
        }
        OrderKind::Limit | OrderKind::Stop => {
            let trigger = c.entry_price;
            let last = (base + config.max_entry_wait_bars).min(n - 1);
            for k in base..=last {
                let bar = &bars[k];
                let crossed = match (config.order_type, c.side) {
                    (OrderKind::Limit, Side::Buy) => bar.low <= trigger,
                    (OrderKind::Limit, Side::Sell) => bar.high >= trigger,
                    (OrderKind::Stop, Side::Buy) => bar.high >= trigger,
                    (OrderKind::Stop, Side::Sell) => bar.low <= trigger,
                    _ => unreachable!(),
                };
                if crossed {
                    // A gap through the trigger fills at the open instead.
                    let price = match (config.order_type, c.side) {
                        (OrderKind::Limit, Side::Buy) => bar.open.min(trigger),
                        (OrderKind::Limit, Side::Sell) => bar.open.max(trigger),
                        (OrderKind::Stop, Side::Buy) => bar.open.max(trigger),
                        (OrderKind::Stop, Side::Sell) => bar.open.min(trigger),
                        _ => unreachable!(),
                    };
                    return Ok((k, price));
                }
            }
            Err("entry_expired")
        }
    }
}

fn simulate_one(
    c: &Candidate,
    bars: &[Bar],
    config: &ExecutionConfig,
    atr: &Series,
) -> Result<Trade, &'static str> {
    let n = bars.len();
    let (entry_index, entry_price) = resolve_entry(c, bars, config)?;
    let entry_bar = &bars[entry_index];
    let entry_atr = atr[entry_index];

    // Session bucket of the entry bar.
    let hour = bar_hour(entry_bar.time, config.session_timezone);
    let session = session_of_hour(hour);
    let wanted = match config.session_filter {
        SessionFilter::All => None,
        SessionFilter::Asia => Some(Session::Asia),
        SessionFilter::London => Some(Session::London),
        SessionFilter::Ny => Some(Session::Ny),
    };
    if let Some(wanted) = wanted {
        if session != wanted {
            return Err("session_filtered");
        }
    }
    let session_costs: &SessionCosts = match session {
        Session::Asia => &config.session_costs.asia,
        Session::London => &config.session_costs.london,
        Session::Ny => &config.session_costs.ny,
    };

    // News-spike amplification.
    let news_spike = config.news_spike.atr_mult > 0.0
        && matches!(entry_atr, Some(a) if entry_bar.range() >= config.news_spike.atr_mult * a);

    // Costs at the entry bar. They never move the fill price; everything
    // funnels into fees_r.
    let mut spread = eval_cost(&config.spread, entry_atr, entry_price) * session_costs.spread;
    let mut slippage = eval_cost(&config.slippage, entry_atr, entry_price)
        * session_costs.slippage
        * volatility_mult(&config.volatility_slippage, bars, entry_index);
    if news_spike {
        spread *= config.news_spike.spread_mult;
        slippage *= config.news_spike.slippage_mult;
    }
    if let Some(cap) = config.max_spread_value {
        spread = spread.min(cap);
    }
    let commission =
        eval_cost(&config.commission, entry_atr, entry_price) * session_costs.commission;

    // Minimum-stop policy against the actual fill price.
    let mut stop = c.stop_loss;
    let mut risk = (entry_price - stop).abs();
    let required = config
        .min_stop
        .value
        .max(config.min_stop.atr_mult * entry_atr.unwrap_or(0.0));
    if required > 0.0 && risk < required {
        match config.min_stop.mode {
            MinStopMode::Skip => return Err("min_stop"),
            MinStopMode::Adjust => {
                stop = match c.side {
                    Side::Buy => entry_price - required,
                    Side::Sell => entry_price + required,
                };
                risk = required;
            }
        }
    }
    if risk <= 0.0 {
        return Err("zero_risk");
    }

    let entry_fill = fill_ratio_at(&config.partial_fill, bars, entry_index, entry_atr);
    let fees_r = (spread + slippage + commission) / risk;

    // Forward exit scan.
    let take_profit = c.take_profit;
    let scan_start = if config.allow_same_bar_exit {
        entry_index
    } else {
        entry_index + 1
    };
    let mut exit: Option<(usize, f64, ExitReason)> = None;
    for j in scan_start..n {
        let bar = &bars[j];
        let (sl_hit, tp_hit) = match config.exit_mode {
            ExitMode::Touch => match c.side {
                Side::Buy => (bar.low <= stop, bar.high >= take_profit),
                Side::Sell => (bar.high >= stop, bar.low <= take_profit),
            },
            ExitMode::Close => match c.side {
                Side::Buy => (bar.close <= stop, bar.close >= take_profit),
                Side::Sell => (bar.close >= stop, bar.close <= take_profit),
            },
        };
        if sl_hit || tp_hit {
            // Both reachable in one bar: the tie-breaker decides, not the
            // order of checks.
            let use_sl = if sl_hit && tp_hit {
                config.tie_breaker == TieBreaker::Sl
            } else {
                sl_hit
            };
            let (price, reason) = match config.exit_mode {
                ExitMode::Touch => {
                    if use_sl {
                        (stop, ExitReason::Sl)
                    } else {
                        (take_profit, ExitReason::Tp)
                    }
                }
                ExitMode::Close => (
                    bar.close,
                    if use_sl { ExitReason::Sl } else { ExitReason::Tp },
                ),
            };
            exit = Some((j, price, reason));
            break;
        }
        if config.max_hold_bars > 0 && j >= entry_index + config.max_hold_bars {
            exit = Some((j, bar.close, ExitReason::Timeout));
            break;
        }
    }

    let mut meta = c.meta.clone();
    meta.insert("session".to_string(), Value::from(session.as_str()));
    if news_spike {
        meta.insert("news_spike".to_string(), Value::from(true));
    }

    let trade = match exit {
        Some((exit_index, exit_price, exit_reason)) => {
            let exit_fill = if config.partial_fill.on_exit {
                fill_ratio_at(&config.partial_fill, bars, exit_index, atr[exit_index])
            } else {
                1.0
            };
            let fill_ratio = entry_fill.min(exit_fill);
            let raw_r = (exit_price - entry_price) * c.side.sign() / risk;
            let r_multiple = (raw_r - fees_r) * fill_ratio;
            let outcome = match exit_reason {
                ExitReason::Tp => Outcome::Win,
                ExitReason::Sl => Outcome::Loss,
                ExitReason::Timeout => Outcome::Expired,
                ExitReason::Open => unreachable!(),
            };
            Trade {
                id: c.id.clone(),
                setup: c.setup,
                side: c.side,
                signal_index: c.signal_index,
                entry_index,
                entry_time: entry_bar.time,
                entry_price,
                stop_loss: stop,
                take_profit,
                exit_index: Some(exit_index),
                exit_time: Some(bars[exit_index].time),
                exit_price: Some(exit_price),
                exit_reason,
                r_multiple: Some(r_multiple),
                fees_r,
                fill_ratio,
                outcome,
                meta,
            }
        }
        None => Trade {
            id: c.id.clone(),
            setup: c.setup,
            side: c.side,
            signal_index: c.signal_index,
            entry_index,
            entry_time: entry_bar.time,
            entry_price,
            stop_loss: stop,
            take_profit,
            exit_index: None,
            exit_time: None,
            exit_price: None,
            exit_reason: ExitReason::Open,
            r_multiple: None,
            fees_r,
            fill_ratio: entry_fill,
            outcome: Outcome::Open,
            meta,
        },
    };
    Ok(trade)
}
