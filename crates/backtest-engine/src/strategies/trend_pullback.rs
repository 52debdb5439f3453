use strategy_core::{Candidate, SetupKind, Side};

use super::candidate;
use crate::indicator_bank::IndicatorBank;
use crate::models::{ConfirmMode, PullbackEma, TrendPullbackConfig};

/// Pullback to a moving average inside an established EMA trend.
///
/// Requires `min_trend_bars` consecutive bars of fast EMA above (bull) or
/// below (bear) the slow EMA, then fires on the bar where price first pulls
/// back to the chosen EMA (`touch` uses the wick, `close` the close).
pub(super) fn generate(config: &TrendPullbackConfig, bank: &mut IndicatorBank) -> Vec<Candidate> {
    let bars = bank.bars();
    let fast = bank.ema(config.ema_fast);
    let slow = bank.ema(config.ema_slow);
    let atr = bank.atr(config.atr_period);

    let mut out = Vec::new();
    let mut cooldown_until = 0usize;
    let mut bull_run = 0usize;
    let mut bear_run = 0usize;
    let mut was_pulled_back_bull = false;
    let mut was_pulled_back_bear = false;

    for (i, bar) in bars.iter().enumerate() {
        let (Some(f), Some(s)) = (fast[i], slow[i]) else {
            continue;
        };
        if f > s {
            bull_run += 1;
            bear_run = 0;
        } else if f < s {
            bear_run += 1;
            bull_run = 0;
        } else {
            bull_run = 0;
            bear_run = 0;
        }

        let pullback_level = match config.pullback_ema {
            PullbackEma::Fast => f,
            PullbackEma::Slow => s,
        };

        let pulled_back_bull = match config.confirm {
            ConfirmMode::Touch => bar.low <= pullback_level,
            ConfirmMode::Close => bar.close <= pullback_level,
        };
        let pulled_back_bear = match config.confirm {
            ConfirmMode::Touch => bar.high >= pullback_level,
            ConfirmMode::Close => bar.close >= pullback_level,
        };

        if i >= cooldown_until {
            if bull_run >= config.min_trend_bars && pulled_back_bull && !was_pulled_back_bull {
                if let Some(a) = atr[i] {
                    let entry = bar.close;
                    let stop = entry - config.stop_atr_mult * a;
                    let take_profit = entry + config.rr * (entry - stop);
                    out.push(candidate(
                        SetupKind::TrendPullback,
                        Side::Buy,
                        i,
                        entry,
                        stop,
                        take_profit,
                    ));
                    cooldown_until = i + 1 + config.cooldown_bars;
                }
            } else if bear_run >= config.min_trend_bars && pulled_back_bear && !was_pulled_back_bear
            {
                if let Some(a) = atr[i] {
                    let entry = bar.close;
                    let stop = entry + config.stop_atr_mult * a;
                    let take_profit = entry - config.rr * (stop - entry);
                    out.push(candidate(
                        SetupKind::TrendPullback,
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

        was_pulled_back_bull = pulled_back_bull;
        was_pulled_back_bear = pulled_back_bear;
    }
    out
}
