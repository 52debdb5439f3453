mod break_retest;
mod fvg_retrace;
mod mean_reversion;
mod range_breakout;
mod trend_pullback;

use serde_json::Map;
use strategy_core::{Candidate, EngineError, SetupKind, Side};
use tracing::debug;

use crate::indicator_bank::IndicatorBank;
use crate::models::StrategyConfig;

/// Fixed generator evaluation order; ties at identical signal indices are
/// broken by this rank, then by creation order within a generator.
fn family_rank(setup: SetupKind) -> usize {
    match setup {
        SetupKind::RangeBreakout => 0,
        SetupKind::BreakRetest => 1,
        SetupKind::FvgRetrace => 2,
        SetupKind::TrendPullback => 3,
        SetupKind::MeanReversion => 4,
    }
}

/// Run every configured generator and merge their candidates, sorted by
/// signal index with the family-rank tie-break.
pub fn generate_all(
    strategies: &[StrategyConfig],
    bank: &mut IndicatorBank,
) -> Result<Vec<Candidate>, EngineError> {
    if strategies.is_empty() {
        return Err(EngineError::InvalidInput(
            "at least one strategy config is required".to_string(),
        ));
    }
    for strategy in strategies {
        strategy.validate()?;
    }

    let mut ordered: Vec<(usize, &StrategyConfig)> = strategies.iter().enumerate().collect();
    ordered.sort_by_key(|(slot, s)| (family_rank(s.setup()), *slot));

    let mut all = Vec::new();
    for (slot, strategy) in ordered {
        let mut candidates = match strategy {
            StrategyConfig::RangeBreakout(c) => range_breakout::generate(c, bank),
            StrategyConfig::BreakRetest(c) => break_retest::generate(c, bank),
            StrategyConfig::FvgRetrace(c) => fvg_retrace::generate(c, bank),
            StrategyConfig::TrendPullback(c) => trend_pullback::generate(c, bank),
            StrategyConfig::MeanReversion(c) => mean_reversion::generate(c, bank),
        };
        for (seq, candidate) in candidates.iter_mut().enumerate() {
            candidate.id = format!("{}-{}-{}", candidate.setup.as_str(), slot, seq);
        }
        debug!(
            setup = strategy.setup().as_str(),
            count = candidates.len(),
            "generated candidates"
        );
        all.extend(candidates);
    }

    // Stable: preserves family rank and creation order at equal signal index.
    all.sort_by_key(|c| c.signal_index);
    Ok(all)
}

/// Shared candidate constructor; ids are assigned by `generate_all`.
fn candidate(
    setup: SetupKind,
    side: Side,
    signal_index: usize,
    entry_price: f64,
    stop_loss: f64,
    take_profit: f64,
) -> Candidate {
    Candidate {
        id: String::new(),
        setup,
        side,
        signal_index,
        entry_index: signal_index,
        entry_price,
        stop_loss,
        take_profit,
        meta: Map::new(),
    }
}
