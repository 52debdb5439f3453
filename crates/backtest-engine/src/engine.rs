use strategy_core::{check_bars, Bar, EngineError};
use tracing::{debug, warn};

use crate::aggregate::{compute_performance, compute_stats};
use crate::bias::compute_bias;
use crate::confluence;
use crate::execution;
use crate::indicator_bank::IndicatorBank;
use crate::models::{BacktestReport, ConfluenceConfig, ExecutionConfig, StrategyConfig};
use crate::strategies::generate_all;

/// Run the full pipeline: generate → confluence filter → simulate →
/// aggregate.
///
/// `htf_bars` is only consulted when confluence is enabled; a missing or
/// unusable HTF series downgrades the filter to a no-op and surfaces a
/// warning on the report instead of failing the run.
pub fn run_backtest(
    bars: &[Bar],
    strategies: &[StrategyConfig],
    execution_config: &ExecutionConfig,
    confluence_config: &ConfluenceConfig,
    htf_bars: Option<&[Bar]>,
) -> Result<BacktestReport, EngineError> {
    check_bars(bars)?;
    execution_config.validate()?;
    confluence_config.validate()?;

    let mut bank = IndicatorBank::new(bars);
    let mut candidates = generate_all(strategies, &mut bank)?;
    let generated = candidates.len();
    let mut warnings = Vec::new();

    if confluence_config.enabled {
        match htf_bars {
            None => {
                let msg = "bias unavailable: confluence enabled without htf bars".to_string();
                warn!("{msg}");
                warnings.push(msg);
            }
            Some(htf) => match compute_bias(bars, htf, confluence_config) {
                Ok(bias) => {
                    candidates = confluence::apply(
                        candidates,
                        &bias,
                        confluence_config,
                        execution_config,
                        bars.len(),
                    );
                }
                Err(err) => {
                    let msg = err.to_string();
                    warn!("{msg}");
                    warnings.push(msg);
                }
            },
        }
    }

    let output = execution::simulate(candidates, execution_config, &mut bank);
    debug!(
        generated,
        filtered = output.trades.len() + output.dropped.len(),
        executed = output.trades.len(),
        dropped = output.dropped.len(),
        "pipeline complete"
    );

    let stats = compute_stats(&output.trades);
    let performance = compute_performance(&output.trades, None);

    Ok(BacktestReport {
        trades: output.trades,
        stats,
        performance,
        warnings,
    })
}
