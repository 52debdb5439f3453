use strategy_core::{Candidate, SetupKind, Side};

use super::candidate;
use crate::indicator_bank::IndicatorBank;
use crate::models::{BreakoutMode, RangeBreakoutConfig};

/// Breakout of the prior N-bar range.
///
/// Fires on the bar where the reference price (close or wick) first clears
/// the range edge plus buffer; being beyond the edge is a state, the signal
/// is the transition into it. Stop sits at the opposite range edge.
pub(super) fn generate(config: &RangeBreakoutConfig, bank: &mut IndicatorBank) -> Vec<Candidate> {
    let bars = bank.bars();
    let highs = bank.prior_high(config.lookback_bars);
    let lows = bank.prior_low(config.lookback_bars);
    let atr = bank.atr(config.atr_period);

    let mut out = Vec::new();
    let mut cooldown_until = 0usize;
    let mut was_above = false;
    let mut was_below = false;

    for (i, bar) in bars.iter().enumerate() {
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

        if i >= cooldown_until {
            if above && !was_above {
                let entry = bar.close;
                let stop = range_low - buffer;
                if entry > stop {
                    let take_profit = entry + config.rr * (entry - stop);
                    out.push(candidate(
                        SetupKind::RangeBreakout,
                        Side::Buy,
                        i,
                        entry,
                        stop,
                        take_profit,
                    ));
                    cooldown_until = i + 1 + config.cooldown_bars;
                }
            } else if below && !was_below {
                let entry = bar.close;
                let stop = range_high + buffer;
                if stop > entry {
                    let take_profit = entry - config.rr * (stop - entry);
                    out.push(candidate(
                        SetupKind::RangeBreakout,
                        Side::Sell,
                        i,
                        entry,
                        stop,
                        take_profit,
                    ));
                    cooldown_until = i + 1 + config.cooldown_bars;
                }
            }
        }

        was_above = above;
        was_below = below;
    }
    out
}
