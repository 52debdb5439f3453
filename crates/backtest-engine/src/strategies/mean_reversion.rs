use strategy_core::{Candidate, SetupKind, Side};

use super::candidate;
use crate::indicator_bank::IndicatorBank;
use crate::models::MeanReversionConfig;

/// Counter-trend entry at an ATR band around an SMA.
///
/// Buys the first touch of the lower band, sells the first touch of the
/// upper band, with an optional RSI oversold/overbought gate.
pub(super) fn generate(config: &MeanReversionConfig, bank: &mut IndicatorBank) -> Vec<Candidate> {
    let bars = bank.bars();
    let ma = bank.sma(config.sma_period);
    let atr = bank.atr(config.atr_period);
    let rsi = if config.use_rsi_filter {
        Some(bank.rsi(config.rsi_period))
    } else {
        None
    };

    let mut out = Vec::new();
    let mut cooldown_until = 0usize;
    let mut was_at_lower = false;
    let mut was_at_upper = false;

    for (i, bar) in bars.iter().enumerate() {
        let (Some(mid), Some(a)) = (ma[i], atr[i]) else {
            continue;
        };
        let lower = mid - config.band_atr_mult * a;
        let upper = mid + config.band_atr_mult * a;

        let at_lower = bar.low <= lower;
        let at_upper = bar.high >= upper;

        let rsi_ok_buy = match &rsi {
            Some(series) => matches!(series[i], Some(v) if v <= config.rsi_oversold),
            None => true,
        };
        let rsi_ok_sell = match &rsi {
            Some(series) => matches!(series[i], Some(v) if v >= config.rsi_overbought),
            None => true,
        };

        if i >= cooldown_until {
            if at_lower && !was_at_lower && rsi_ok_buy {
                let entry = bar.close;
                let stop = entry - config.stop_atr_mult * a;
                let take_profit = entry + config.rr * (entry - stop);
                out.push(candidate(
                    SetupKind::MeanReversion,
                    Side::Buy,
                    i,
                    entry,
                    stop,
                    take_profit,
                ));
                cooldown_until = i + 1 + config.cooldown_bars;
            } else if at_upper && !was_at_upper && rsi_ok_sell {
                let entry = bar.close;
                let stop = entry + config.stop_atr_mult * a;
                let take_profit = entry - config.rr * (stop - entry);
                out.push(candidate(
                    SetupKind::MeanReversion,
                    Side::Sell,
                    i,
                    entry,
                    stop,
                    take_profit,
                ));
                cooldown_until = i + 1 + config.cooldown_bars;
            }
        }

        was_at_lower = at_lower;
        was_at_upper = at_upper;
    }
    out
}
