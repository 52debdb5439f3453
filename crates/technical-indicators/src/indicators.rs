use strategy_core::Bar;

/// Indicator outputs are aligned index-for-index with the input series.
/// Warm-up slots are `None`, never NaN, so callers can address values by bar
/// index without offset bookkeeping.
pub type Series = Vec<Option<f64>>;

/// Simple Moving Average. Defined from index `period - 1`.
pub fn sma(data: &[f64], period: usize) -> Series {
    let mut out = vec![None; data.len()];
    if period == 0 || data.len() < period {
        return out;
    }

    let mut sum: f64 = data[..period].iter().sum();
    out[period - 1] = Some(sum / period as f64);
    for i in period..data.len() {
        sum += data[i] - data[i - period];
        out[i] = Some(sum / period as f64);
    }
    out
}

/// Exponential Moving Average, seeded with the SMA over the first `period`
/// elements. Defined from index `period - 1`.
pub fn ema(data: &[f64], period: usize) -> Series {
    let mut out = vec![None; data.len()];
    if period == 0 || data.len() < period {
        return out;
    }

    let multiplier = 2.0 / (period as f64 + 1.0);
    let seed: f64 = data[..period].iter().sum::<f64>() / period as f64;
    out[period - 1] = Some(seed);

    let mut prev = seed;
    for i in period..data.len() {
        let val = (data[i] - prev) * multiplier + prev;
        out[i] = Some(val);
        prev = val;
    }
    out
}

/// Wilder RSI. Defined from index `period` (needs `period + 1` closes).
pub fn rsi(data: &[f64], period: usize) -> Series {
    let mut out = vec![None; data.len()];
    if period == 0 || data.len() < period + 1 {
        return out;
    }

    let mut avg_gain = 0.0;
    let mut avg_loss = 0.0;
    for i in 1..=period {
        let change = data[i] - data[i - 1];
        if change > 0.0 {
            avg_gain += change;
        } else {
            avg_loss += change.abs();
        }
    }
    avg_gain /= period as f64;
    avg_loss /= period as f64;
    out[period] = Some(rsi_value(avg_gain, avg_loss));

    for i in period + 1..data.len() {
        let change = data[i] - data[i - 1];
        let gain = change.max(0.0);
        let loss = (-change).max(0.0);
        avg_gain = (avg_gain * (period - 1) as f64 + gain) / period as f64;
        avg_loss = (avg_loss * (period - 1) as f64 + loss) / period as f64;
        out[i] = Some(rsi_value(avg_gain, avg_loss));
    }
    out
}

fn rsi_value(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss == 0.0 {
        return 100.0;
    }
    let rs = avg_gain / avg_loss;
    100.0 - (100.0 / (1.0 + rs))
}

/// Wilder Average True Range. Defined from index `period`.
pub fn atr(bars: &[Bar], period: usize) -> Series {
    let mut out = vec![None; bars.len()];
    if period == 0 || bars.len() < period + 1 {
        return out;
    }

    let tr = |i: usize| -> f64 {
        let high_low = bars[i].high - bars[i].low;
        let high_close = (bars[i].high - bars[i - 1].close).abs();
        let low_close = (bars[i].low - bars[i - 1].close).abs();
        high_low.max(high_close).max(low_close)
    };

    let mut acc = 0.0;
    for i in 1..=period {
        acc += tr(i);
    }
    let mut prev = acc / period as f64;
    out[period] = Some(prev);

    for i in period + 1..bars.len() {
        prev = (prev * (period - 1) as f64 + tr(i)) / period as f64;
        out[i] = Some(prev);
    }
    out
}

/// Rolling maximum over the `window` bars strictly before each index
/// (the current bar is excluded). Defined from index `window`.
pub fn rolling_max(data: &[f64], window: usize) -> Series {
    rolling_extreme(data, window, f64::max)
}

/// Rolling minimum over the `window` bars strictly before each index.
pub fn rolling_min(data: &[f64], window: usize) -> Series {
    rolling_extreme(data, window, f64::min)
}

fn rolling_extreme(data: &[f64], window: usize, pick: fn(f64, f64) -> f64) -> Series {
    let mut out = vec![None; data.len()];
    if window == 0 {
        return out;
    }
    for i in window..data.len() {
        let ext = data[i - window..i]
            .iter()
            .copied()
            .reduce(pick)
            .unwrap_or(data[i - 1]);
        out[i] = Some(ext);
    }
    out
}
