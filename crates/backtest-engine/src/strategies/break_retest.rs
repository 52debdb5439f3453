use strategy_core::{Candidate, SetupKind, Side};

use super::candidate;
use crate::indicator_bank::IndicatorBank;
use crate::models::{BreakRetestConfig, BreakoutMode, ConfirmMode};

struct PendingBreak {
    side: Side,
    /// The broken range edge (buffer included).
    level: f64,
    /// Opposite range edge at break time; becomes the trade's stop.
    stop: f64,
    expires: usize,
}

/// Range break followed by a retest of the broken level.
///
/// The break itself emits nothing; the signal fires when price returns to
/// within `retest_buffer_atr_mult * ATR` of the level inside `retest_bars`
/// and confirms per `confirm`. A close through the far side of the retest
/// zone invalidates the break.
pub(super) fn generate(config: &BreakRetestConfig, bank: &mut IndicatorBank) -> Vec<Candidate> {
    let bars = bank.bars();
    let highs = bank.prior_high(config.lookback_bars);
    let lows = bank.prior_low(config.lookback_bars);
    let atr = bank.atr(config.atr_period);

    let mut out = Vec::new();
    let mut cooldown_until = 0usize;
    let mut was_above = false;
    let mut was_below = false;
    let mut pending: Option<PendingBreak> = None;

    for (i, bar) in bars.iter().enumerate() {
        // 1. Resolve any pending retest before looking for a new break.
        if let Some(p) = pending.take() {
            let mut keep = false;
            if i <= p.expires {
                match atr[i] {
                    None => keep = true,
                    Some(a) => {
                        let zone = config.retest_buffer_atr_mult * a;
                        let failed = match p.side {
                            Side::Buy => bar.close < p.level - zone,
                            Side::Sell => bar.close > p.level + zone,
                        };
                        if !failed {
                            let reached = match (p.side, config.confirm) {
                                (Side::Buy, ConfirmMode::Touch) => bar.low <= p.level + zone,
                                (Side::Buy, ConfirmMode::Close) => bar.close <= p.level + zone,
                                (Side::Sell, ConfirmMode::Touch) => bar.high >= p.level - zone,
                                (Side::Sell, ConfirmMode::Close) => bar.close >= p.level - zone,
                            };
                            if reached {
                                if i >= cooldown_until {
                                    let entry = bar.close;
                                    let viable = match p.side {
                                        Side::Buy => entry > p.stop,
                                        Side::Sell => p.stop > entry,
                                    };
                                    if viable {
                                        let risk = (entry - p.stop).abs();
                                        let take_profit = match p.side {
                                            Side::Buy => entry + config.rr * risk,
                                            Side::Sell => entry - config.rr * risk,
                                        };
                                        out.push(candidate(
                                            SetupKind::BreakRetest,
                                            p.side,
                                            i,
                                            entry,
                                            p.stop,
                                            take_profit,
                                        ));
                                        cooldown_until = i + 1 + config.cooldown_bars;
                                    }
                                }
                            } else {
                                keep = true;
                            }
                        }
                    }
                }
            }
            if keep {
                pending = Some(p);
            }
        }

        // 2. Detect a fresh structure break (same edge logic as range_breakout).
        let (Some(range_high), Some(range_low)) = (highs[i], lows[i]) else {
            continue;
        };
        let buffer = if config.buffer_atr_mult > 0.0 {
            match atr[i] {
                Some(a) => config.buffer_atr_mult * a,
                None => continue,
            }
        } else {
            0.0
        };
        let (buy_ref, sell_ref) = match config.breakout_mode {
            BreakoutMode::Close => (bar.close, bar.close),
            BreakoutMode::Wick => (bar.high, bar.low),
        };
        let above = buy_ref >= range_high + buffer;
        let below = sell_ref <= range_low - buffer;

        if above && !was_above {
            pending = Some(PendingBreak {
                side: Side::Buy,
                level: range_high + buffer,
                stop: range_low - buffer,
                expires: i + config.retest_bars,
            });
        } else if below && !was_below {
            pending = Some(PendingBreak {
                side: Side::Sell,
                level: range_low - buffer,
                stop: range_high + buffer,
                expires: i + config.retest_bars,
            });
        }

        was_above = above;
        was_below = below;
    }
    out
}
