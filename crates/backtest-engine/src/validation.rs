use strategy_core::{check_bars, Bar, EngineError, Trade};

use crate::aggregate::{compute_performance, compute_stats};
use crate::models::{IndexRange, SplitMode, ValidationConfig, ValidationReport};

const DAY_MS: i64 = 86_400_000;

/// Holdout split: partition trades into train/test windows by bar index and
/// report per-window stats and equity.
pub fn validate(
    trades: &[Trade],
    bars: &[Bar],
    config: &ValidationConfig,
) -> Result<ValidationReport, EngineError> {
    check_bars(bars)?;
    let n = bars.len();
    if n < 2 {
        return Err(EngineError::InsufficientData(
            "holdout split requires at least two bars".to_string(),
        ));
    }

    let (split_index, train_range, test_range) = match config.mode {
        SplitMode::Percent => {
            if !(0.0..=100.0).contains(&config.percent) {
                return Err(EngineError::InvalidInput(
                    "validation percent must lie in [0, 100]".to_string(),
                ));
            }
            let split = ((n - 1) as f64 * config.percent / 100.0).floor() as usize;
            (
                split,
                IndexRange {
                    start: 0,
                    end: split + 1,
                },
                IndexRange {
                    start: split + 1,
                    end: n,
                },
            )
        }
        SplitMode::LastDays => {
            if config.days <= 0.0 {
                return Err(EngineError::InvalidInput(
                    "validation days must be positive".to_string(),
                ));
            }
            let cutoff = bars[n - 1].time - (config.days * DAY_MS as f64) as i64;
            let split = bars.partition_point(|b| b.time < cutoff);
            (
                split,
                IndexRange {
                    start: 0,
                    end: split,
                },
                IndexRange {
                    start: split,
                    end: n,
                },
            )
        }
    };

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

    Ok(ValidationReport {
        mode: config.mode,
        split_index,
        train_range,
        test_range,
        train_stats: compute_stats(&train),
        test_stats: compute_stats(&test),
        train_equity: compute_performance(&train, None).curve,
        test_equity: compute_performance(&test, None).curve,
    })
}
