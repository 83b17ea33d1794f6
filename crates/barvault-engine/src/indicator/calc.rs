//! Indicator kernels.
//!
//! Every kernel returns one output slot per input bar, `None` during warmup,
//! and is deterministic: identical inputs produce bit-identical outputs.
//! Smoothed indicators (RSI, ATR, ADX) use Wilder's smoothing.

/// Simple moving average of `values` over `period`.
pub fn sma(values: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; values.len()];
    if period == 0 || values.len() < period {
        return out;
    }
    let mut sum: f64 = values[..period].iter().sum();
    out[period - 1] = Some(sum / period as f64);
    for i in period..values.len() {
        sum += values[i] - values[i - period];
        out[i] = Some(sum / period as f64);
    }
    out
}

/// Exponential moving average seeded with the SMA of the first `period` values.
pub fn ema(values: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; values.len()];
    if period == 0 || values.len() < period {
        return out;
    }
    let multiplier = 2.0 / (period as f64 + 1.0);
    let mut current: f64 = values[..period].iter().sum::<f64>() / period as f64;
    out[period - 1] = Some(current);
    for i in period..values.len() {
        current = (values[i] - current) * multiplier + current;
        out[i] = Some(current);
    }
    out
}

/// Relative strength index over closes.
pub fn rsi(closes: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; closes.len()];
    if period == 0 || closes.len() <= period {
        return out;
    }

    let mut avg_gain = 0.0;
    let mut avg_loss = 0.0;
    for i in 1..=period {
        let change = closes[i] - closes[i - 1];
        if change > 0.0 {
            avg_gain += change;
        } else {
            avg_loss -= change;
        }
    }
    avg_gain /= period as f64;
    avg_loss /= period as f64;
    out[period] = Some(rsi_value(avg_gain, avg_loss));

    for i in (period + 1)..closes.len() {
        let change = closes[i] - closes[i - 1];
        let (gain, loss) = if change > 0.0 {
            (change, 0.0)
        } else {
            (0.0, -change)
        };
        avg_gain = (avg_gain * (period as f64 - 1.0) + gain) / period as f64;
        avg_loss = (avg_loss * (period as f64 - 1.0) + loss) / period as f64;
        out[i] = Some(rsi_value(avg_gain, avg_loss));
    }
    out
}

fn rsi_value(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss == 0.0 {
        100.0
    } else {
        100.0 - 100.0 / (1.0 + avg_gain / avg_loss)
    }
}

fn true_ranges(high: &[f64], low: &[f64], close: &[f64]) -> Vec<f64> {
    (0..high.len())
        .map(|i| {
            if i == 0 {
                high[0] - low[0]
            } else {
                let range = high[i] - low[i];
                let up = (high[i] - close[i - 1]).abs();
                let down = (low[i] - close[i - 1]).abs();
                range.max(up).max(down)
            }
        })
        .collect()
}

/// Average true range.
pub fn atr(high: &[f64], low: &[f64], close: &[f64], period: usize) -> Vec<Option<f64>> {
    let len = high.len();
    let mut out = vec![None; len];
    if period == 0 || len < period {
        return out;
    }

    let tr = true_ranges(high, low, close);
    let mut current: f64 = tr[..period].iter().sum::<f64>() / period as f64;
    out[period - 1] = Some(current);
    for i in period..len {
        current = (current * (period as f64 - 1.0) + tr[i]) / period as f64;
        out[i] = Some(current);
    }
    out
}

/// Average directional index.
pub fn adx(high: &[f64], low: &[f64], close: &[f64], period: usize) -> Vec<Option<f64>> {
    let len = high.len();
    let mut out = vec![None; len];
    // ADX needs one smoothing pass over DX values, which themselves need a
    // full period of directional movement.
    if period == 0 || len < 2 * period {
        return out;
    }

    let tr = true_ranges(high, low, close);
    let mut plus_dm = vec![0.0; len];
    let mut minus_dm = vec![0.0; len];
    for i in 1..len {
        let up = high[i] - high[i - 1];
        let down = low[i - 1] - low[i];
        if up > down && up > 0.0 {
            plus_dm[i] = up;
        }
        if down > up && down > 0.0 {
            minus_dm[i] = down;
        }
    }

    let mut smoothed_tr: f64 = tr[1..=period].iter().sum();
    let mut smoothed_plus: f64 = plus_dm[1..=period].iter().sum();
    let mut smoothed_minus: f64 = minus_dm[1..=period].iter().sum();

    let mut dx = vec![None; len];
    dx[period] = Some(dx_value(smoothed_plus, smoothed_minus, smoothed_tr));
    for i in (period + 1)..len {
        smoothed_tr = smoothed_tr - smoothed_tr / period as f64 + tr[i];
        smoothed_plus = smoothed_plus - smoothed_plus / period as f64 + plus_dm[i];
        smoothed_minus = smoothed_minus - smoothed_minus / period as f64 + minus_dm[i];
        dx[i] = Some(dx_value(smoothed_plus, smoothed_minus, smoothed_tr));
    }

    let first = 2 * period - 1;
    let mut current: f64 = (period..=first)
        .filter_map(|i| dx[i])
        .sum::<f64>()
        / period as f64;
    out[first] = Some(current);
    for i in (first + 1)..len {
        if let Some(dx) = dx[i] {
            current = (current * (period as f64 - 1.0) + dx) / period as f64;
            out[i] = Some(current);
        }
    }
    out
}

fn dx_value(plus: f64, minus: f64, tr: f64) -> f64 {
    if tr == 0.0 {
        return 0.0;
    }
    let plus_di = 100.0 * plus / tr;
    let minus_di = 100.0 * minus / tr;
    let sum = plus_di + minus_di;
    if sum == 0.0 {
        0.0
    } else {
        100.0 * (plus_di - minus_di).abs() / sum
    }
}
