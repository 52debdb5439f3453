use strategy_core::Trade;

use crate::models::{EquityPoint, Performance, Stats};

/// Closed-trade statistics. Open trades count toward `total` only.
pub fn compute_stats(trades: &[Trade]) -> Stats {
    let total = trades.len();
    let rs: Vec<f64> = trades.iter().filter_map(|t| t.r_multiple).collect();
    let closed = rs.len();
    let wins = rs.iter().filter(|r| **r > 0.0).count();
    let losses = rs.iter().filter(|r| **r < 0.0).count();
    let gross_win_r: f64 = rs.iter().filter(|r| **r > 0.0).sum();
    let gross_loss_r: f64 = rs.iter().filter(|r| **r < 0.0).sum();

    let win_rate = (closed > 0).then(|| wins as f64 / closed as f64);
    let expectancy = (closed > 0).then(|| rs.iter().sum::<f64>() / closed as f64);
    let avg_win = (wins > 0).then(|| gross_win_r / wins as f64);
    let avg_loss = (losses > 0).then(|| gross_loss_r / losses as f64);
    let profit_factor = if gross_loss_r < 0.0 {
        Some(gross_win_r / gross_loss_r.abs())
    } else if wins > 0 {
        Some(f64::INFINITY)
    } else {
        None
    };

    Stats {
        total,
        closed,
        wins,
        losses,
        win_rate,
        expectancy,
        avg_win,
        avg_loss,
        profit_factor,
        gross_win_r,
        gross_loss_r,
    }
}

/// Equity curve, drawdown, streaks, and hold durations over closed trades.
///
/// Trades may arrive in any permutation; everything path-dependent is
/// computed after an internal sort by entry index.
pub fn compute_performance(trades: &[Trade], equity_base: Option<f64>) -> Performance {
    let mut closed: Vec<&Trade> = trades.iter().filter(|t| t.r_multiple.is_some()).collect();
    closed.sort_by(|a, b| {
        a.entry_index
            .cmp(&b.entry_index)
            .then(a.signal_index.cmp(&b.signal_index))
            .then(a.id.cmp(&b.id))
    });

    let mut curve = Vec::with_capacity(closed.len());
    let mut equity = 0.0;
    let mut peak = 0.0;
    let mut max_drawdown = 0.0f64;

    let base = equity_base.filter(|b| *b > 0.0);
    let mut account_peak = base.unwrap_or(0.0);
    let mut max_drawdown_pct: Option<f64> = None;

    let mut win_streak = 0usize;
    let mut loss_streak = 0usize;
    let mut max_win_streak = 0usize;
    let mut max_loss_streak = 0usize;

    for t in &closed {
        let r = t.r_multiple.unwrap_or(0.0);
        equity += r;
        if equity > peak {
            peak = equity;
        }
        max_drawdown = max_drawdown.max(peak - equity);

        if let Some(b) = base {
            let account = b + equity;
            if account > account_peak {
                account_peak = account;
            }
            if account_peak > 0.0 {
                let dd = (account_peak - account) / account_peak * 100.0;
                max_drawdown_pct = Some(max_drawdown_pct.unwrap_or(0.0).max(dd));
            }
        }

        if r > 0.0 {
            win_streak += 1;
            loss_streak = 0;
            max_win_streak = max_win_streak.max(win_streak);
        } else if r < 0.0 {
            loss_streak += 1;
            win_streak = 0;
            max_loss_streak = max_loss_streak.max(loss_streak);
        } else {
            win_streak = 0;
            loss_streak = 0;
        }

        curve.push(EquityPoint {
            index: t.entry_index,
            equity,
        });
    }

    let n = closed.len();
    let net_r = equity;
    let avg_r = (n > 0).then(|| net_r / n as f64);
    let median_r = (n > 0).then(|| {
        let mut rs: Vec<f64> = closed.iter().filter_map(|t| t.r_multiple).collect();
        rs.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        if rs.len() % 2 == 1 {
            rs[rs.len() / 2]
        } else {
            (rs[rs.len() / 2 - 1] + rs[rs.len() / 2]) / 2.0
        }
    });

    let hold_bars: Vec<f64> = closed
        .iter()
        .filter_map(|t| t.exit_index.map(|e| (e - t.entry_index) as f64))
        .collect();
    let avg_hold_bars = (!hold_bars.is_empty())
        .then(|| hold_bars.iter().sum::<f64>() / hold_bars.len() as f64);

    let hold_ms: Vec<f64> = closed
        .iter()
        .filter_map(|t| t.exit_time.map(|e| (e - t.entry_time) as f64))
        .collect();
    let avg_hold_ms =
        (!hold_ms.is_empty()).then(|| hold_ms.iter().sum::<f64>() / hold_ms.len() as f64);

    Performance {
        net_r,
        max_drawdown,
        max_drawdown_pct,
        avg_r,
        median_r,
        avg_hold_ms,
        avg_hold_bars,
        max_win_streak,
        max_loss_streak,
        curve,
    }
}
