use strategy_core::{Candidate, SetupKind, Side};

use super::candidate;
use crate::indicator_bank::IndicatorBank;
use crate::models::{FvgEntryMode, FvgRetraceConfig};

struct PendingGap {
    side: Side,
    entry_level: f64,
    stop: f64,
    expires: usize,
}

/// Three-bar fair-value-gap fade.
///
/// A bull gap at detection index `d` means `low[d-2] > high[d]` (zone
/// `[high[d], low[d-2]]`, price below it); the trade buys the retrace back
/// into the zone. Bear is symmetric. Entry is the gap mid or the near edge;
/// the stop sits beyond the near edge by an ATR cushion.
pub(super) fn generate(config: &FvgRetraceConfig, bank: &mut IndicatorBank) -> Vec<Candidate> {
    let bars = bank.bars();
    let atr = bank.atr(config.atr_period);

    let mut out = Vec::new();
    let mut cooldown_until = 0usize;
    let mut pending: Option<PendingGap> = None;

    for i in 0..bars.len() {
        // 1. Retrace into a previously detected gap.
        if let Some(p) = pending.take() {
            if i <= p.expires {
                let reached = match p.side {
                    Side::Buy => bars[i].high >= p.entry_level,
                    Side::Sell => bars[i].low <= p.entry_level,
                };
                if reached {
                    if i >= cooldown_until {
                        let risk = (p.entry_level - p.stop).abs();
                        if risk > 0.0 {
                            let take_profit = match p.side {
                                Side::Buy => p.entry_level + config.rr * risk,
                                Side::Sell => p.entry_level - config.rr * risk,
                            };
                            out.push(candidate(
                                SetupKind::FvgRetrace,
                                p.side,
                                i,
                                p.entry_level,
                                p.stop,
                                take_profit,
                            ));
                            cooldown_until = i + 1 + config.cooldown_bars;
                        }
                    }
                } else {
                    pending = Some(p);
                }
            }
        }

        // 2. Detect a fresh gap across bars i-2, i-1, i.
        if i < 2 {
            continue;
        }
        let Some(a) = atr[i] else { continue };
        let min_gap = config.min_gap_atr_mult * a;
        let cushion = config.stop_cushion_atr_mult * a;

        let first = &bars[i - 2];
        let third = &bars[i];

        if first.low > third.high {
            // Gap down: zone [third.high, first.low], price below — bull fade.
            let bottom = third.high;
            let top = first.low;
            if top - bottom >= min_gap {
                let entry_level = match config.entry_mode {
                    FvgEntryMode::Mid => (top + bottom) / 2.0,
                    FvgEntryMode::Edge => bottom,
                };
                pending = Some(PendingGap {
                    side: Side::Buy,
                    entry_level,
                    stop: bottom - cushion,
                    expires: i + config.max_wait_bars,
                });
            }
        } else if first.high < third.low {
            // Gap up: zone [first.high, third.low], price above — bear fade.
            let bottom = first.high;
            let top = third.low;
            if top - bottom >= min_gap {
                let entry_level = match config.entry_mode {
                    FvgEntryMode::Mid => (top + bottom) / 2.0,
                    FvgEntryMode::Edge => top,
                };
                pending = Some(PendingGap {
                    side: Side::Sell,
                    entry_level,
                    stop: top + cushion,
                    expires: i + config.max_wait_bars,
                });
            }
        }
    }
    out
}
