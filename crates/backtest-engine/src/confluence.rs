use serde_json::Value;
use strategy_core::{Candidate, Side};
use tracing::debug;

use crate::bias::{Bias, BiasSeries};
use crate::models::{BiasMode, BiasReference, ConfluenceConfig, EntryTiming, ExecutionConfig};

/// Entry bar index a candidate would resolve to before simulation. Used as
/// the bias reference when `bias_reference = entry`; limit-order fill bars
/// are not known yet, so this is the earliest possible entry bar.
pub(crate) fn provisional_entry_index(
    signal_index: usize,
    execution: &ExecutionConfig,
    n_bars: usize,
) -> usize {
    let base = match execution.entry_timing {
        EntryTiming::SignalClose => signal_index,
        EntryTiming::NextOpen => signal_index + 1,
    };
    (base + execution.entry_delay_bars).min(n_bars.saturating_sub(1))
}

fn mode_str(mode: BiasMode) -> &'static str {
    match mode {
        BiasMode::Ema => "ema",
        BiasMode::Sma => "sma",
        BiasMode::Range => "range",
    }
}

/// Keep candidates aligned with the higher-timeframe bias.
///
/// `bull` passes buys, `bear` passes sells, `neutral` passes only when
/// allowed. Survivors are stamped with the bias metadata; the operation is
/// idempotent for a fixed bias series.
pub fn apply(
    candidates: Vec<Candidate>,
    bias: &BiasSeries,
    config: &ConfluenceConfig,
    execution: &ExecutionConfig,
    n_bars: usize,
) -> Vec<Candidate> {
    candidates
        .into_iter()
        .filter_map(|mut c| {
            let reference = match config.bias_reference {
                BiasReference::Signal => c.signal_index,
                BiasReference::Entry => provisional_entry_index(c.signal_index, execution, n_bars),
            };
            let bar_bias = bias.at(reference);
            let passes = match bar_bias {
                Bias::Bull => c.side == Side::Buy,
                Bias::Bear => c.side == Side::Sell,
                Bias::Neutral => config.allow_neutral,
            };
            if !passes {
                debug!(
                    id = %c.id,
                    bias = bar_bias.as_str(),
                    reference,
                    "candidate removed by confluence filter"
                );
                return None;
            }
            c.meta
                .insert("htf_bias".to_string(), Value::from(bar_bias.as_str()));
            c.meta.insert(
                "htf_resolution".to_string(),
                Value::from(config.htf_resolution.clone()),
            );
            c.meta
                .insert("htf_mode".to_string(), Value::from(mode_str(config.bias_mode)));
            c.meta
                .insert("htf_reference".to_string(), Value::from(reference as u64));
            Some(c)
        })
        .collect()
}
