use arena_core::Bar;

/// Guard against NaN/inf leaking out of a division-heavy computation.
#[inline]
fn finite(val: f64) -> Option<f64> {
    val.is_finite().then_some(val)
}

/// Simple moving average series, aligned to the tail of the input.
/// `result[i]` covers `data[i..i + period]`.
pub fn sma_series(data: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || data.len() < period {
        return vec![];
    }
    let mut window_sum: f64 = data[..period].iter().sum();
    let mut result = vec![window_sum / period as f64];
    for i in period..data.len() {
        window_sum += data[i] - data[i - period];
        result.push(window_sum / period as f64);
    }
    result
}

/// Exponential moving average series, SMA-seeded, same length as input.
pub fn ema_series(data: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || data.len() < period {
        return vec![];
    }
    let alpha = 2.0 / (period as f64 + 1.0);
    let seed: f64 = data[..period].iter().sum::<f64>() / period as f64;
    let mut result = vec![seed; period];
    for i in period..data.len() {
        let prev = result[i - 1];
        result.push(prev + alpha * (data[i] - prev));
    }
    result
}

/// Latest RSI value using Wilder smoothing.
pub fn rsi(data: &[f64], period: usize) -> Option<f64> {
    if period == 0 || data.len() < period + 1 {
        return None;
    }
    let mut avg_gain = 0.0;
    let mut avg_loss = 0.0;
    for w in data[..=period].windows(2) {
        let change = w[1] - w[0];
        if change > 0.0 {
            avg_gain += change;
        } else {
            avg_loss -= change;
        }
    }
    avg_gain /= period as f64;
    avg_loss /= period as f64;

    for w in data[period..].windows(2) {
        let change = w[1] - w[0];
        let (gain, loss) = if change > 0.0 { (change, 0.0) } else { (0.0, -change) };
        avg_gain = (avg_gain * (period - 1) as f64 + gain) / period as f64;
        avg_loss = (avg_loss * (period - 1) as f64 + loss) / period as f64;
    }

    if avg_loss == 0.0 {
        return Some(100.0);
    }
    finite(100.0 - 100.0 / (1.0 + avg_gain / avg_loss))
}

/// MACD panel: latest line/signal/histogram plus the previous histogram
/// value so callers can detect a fresh crossover.
#[derive(Debug, Clone, Copy)]
pub struct Macd {
    pub line: f64,
    pub signal: f64,
    pub histogram: f64,
    pub prev_histogram: Option<f64>,
}

pub fn macd(data: &[f64], fast: usize, slow: usize, signal: usize) -> Option<Macd> {
    if fast == 0 || slow <= fast || signal == 0 || data.len() < slow + signal {
        return None;
    }
    let ema_fast = ema_series(data, fast);
    let ema_slow = ema_series(data, slow);
    let line: Vec<f64> = ema_fast
        .iter()
        .zip(ema_slow.iter())
        .skip(slow)
        .map(|(f, s)| f - s)
        .collect();
    if line.len() < signal {
        return None;
    }
    let signal_line = ema_series(&line, signal);
    let last = line.len() - 1;
    let histogram = line[last] - signal_line[last];
    let prev_histogram = if last >= 1 {
        Some(line[last - 1] - signal_line[last - 1])
    } else {
        None
    };
    Some(Macd {
        line: line[last],
        signal: signal_line[last],
        histogram,
        prev_histogram,
    })
}

/// Latest Bollinger Bands.
#[derive(Debug, Clone, Copy)]
pub struct Bands {
    pub upper: f64,
    pub middle: f64,
    pub lower: f64,
}

pub fn bollinger(data: &[f64], period: usize, width: f64) -> Option<Bands> {
    if period == 0 || data.len() < period {
        return None;
    }
    let window = &data[data.len() - period..];
    let mean = window.iter().sum::<f64>() / period as f64;
    let variance = window.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / period as f64;
    let std = variance.sqrt();
    finite(std).map(|std| Bands {
        upper: mean + width * std,
        middle: mean,
        lower: mean - width * std,
    })
}

/// Latest stochastic oscillator: raw %K smoothed over `k_smooth` bars,
/// %D as a further `d_period` average.
#[derive(Debug, Clone, Copy)]
pub struct Stochastic {
    pub k: f64,
    pub d: f64,
}

pub fn stochastic(bars: &[Bar], k_period: usize, k_smooth: usize, d_period: usize) -> Option<Stochastic> {
    if k_period == 0 || k_smooth == 0 || d_period == 0 {
        return None;
    }
    let needed = k_period + k_smooth + d_period - 2;
    if bars.len() < needed {
        return None;
    }

    let mut raw_k = Vec::with_capacity(bars.len() - k_period + 1);
    for i in (k_period - 1)..bars.len() {
        let window = &bars[i + 1 - k_period..=i];
        let highest = window.iter().map(|b| b.high).fold(f64::NEG_INFINITY, f64::max);
        let lowest = window.iter().map(|b| b.low).fold(f64::INFINITY, f64::min);
        let k = if highest > lowest {
            100.0 * (bars[i].close - lowest) / (highest - lowest)
        } else {
            50.0
        };
        raw_k.push(k);
    }

    let smoothed = sma_series(&raw_k, k_smooth);
    let d = sma_series(&smoothed, d_period);
    match (smoothed.last(), d.last()) {
        (Some(&k), Some(&d)) => Some(Stochastic { k, d }),
        _ => None,
    }
}

/// Latest ATR using Wilder smoothing.
pub fn atr(bars: &[Bar], period: usize) -> Option<f64> {
    if period == 0 || bars.len() < period + 1 {
        return None;
    }
    let ranges: Vec<f64> = bars
        .windows(2)
        .map(|w| {
            let hl = w[1].high - w[1].low;
            let hc = (w[1].high - w[0].close).abs();
            let lc = (w[1].low - w[0].close).abs();
            hl.max(hc).max(lc)
        })
        .collect();

    let mut value = ranges[..period].iter().sum::<f64>() / period as f64;
    for tr in &ranges[period..] {
        value = (value * (period - 1) as f64 + tr) / period as f64;
    }
    finite(value)
}

/// Latest ADX with the directional components needed to read trend
/// direction when strength is high.
#[derive(Debug, Clone, Copy)]
pub struct Adx {
    pub adx: f64,
    pub plus_di: f64,
    pub minus_di: f64,
}

pub fn adx(bars: &[Bar], period: usize) -> Option<Adx> {
    if period == 0 || bars.len() < 2 * period + 1 {
        return None;
    }

    let mut plus_dm = Vec::with_capacity(bars.len() - 1);
    let mut minus_dm = Vec::with_capacity(bars.len() - 1);
    let mut tr = Vec::with_capacity(bars.len() - 1);
    for w in bars.windows(2) {
        let up = w[1].high - w[0].high;
        let down = w[0].low - w[1].low;
        plus_dm.push(if up > down && up > 0.0 { up } else { 0.0 });
        minus_dm.push(if down > up && down > 0.0 { down } else { 0.0 });
        let hl = w[1].high - w[1].low;
        let hc = (w[1].high - w[0].close).abs();
        let lc = (w[1].low - w[0].close).abs();
        tr.push(hl.max(hc).max(lc));
    }

    let mut sm_plus: f64 = plus_dm[..period].iter().sum();
    let mut sm_minus: f64 = minus_dm[..period].iter().sum();
    let mut sm_tr: f64 = tr[..period].iter().sum();

    let mut dx_values = Vec::new();
    let mut last_pdi = 0.0;
    let mut last_mdi = 0.0;
    for i in period..plus_dm.len() {
        sm_plus += plus_dm[i] - sm_plus / period as f64;
        sm_minus += minus_dm[i] - sm_minus / period as f64;
        sm_tr += tr[i] - sm_tr / period as f64;

        if sm_tr <= 0.0 {
            continue;
        }
        last_pdi = 100.0 * sm_plus / sm_tr;
        last_mdi = 100.0 * sm_minus / sm_tr;
        let di_sum = last_pdi + last_mdi;
        if di_sum > 0.0 {
            dx_values.push(100.0 * (last_pdi - last_mdi).abs() / di_sum);
        }
    }

    if dx_values.len() < period {
        return None;
    }
    let mut adx_val = dx_values[..period].iter().sum::<f64>() / period as f64;
    for dx in &dx_values[period..] {
        adx_val = (adx_val * (period - 1) as f64 + dx) / period as f64;
    }
    finite(adx_val).map(|adx| Adx {
        adx,
        plus_di: last_pdi,
        minus_di: last_mdi,
    })
}

/// Latest cumulative on-balance volume.
pub fn obv(bars: &[Bar]) -> Option<f64> {
    if bars.is_empty() {
        return None;
    }
    let mut value = bars[0].volume;
    for w in bars.windows(2) {
        if w[1].close > w[0].close {
            value += w[1].volume;
        } else if w[1].close < w[0].close {
            value -= w[1].volume;
        }
    }
    Some(value)
}

/// Support and resistance from recent pivot lows/highs (2-bar confirmation).
#[derive(Debug, Clone, Copy, Default)]
pub struct PivotLevels {
    pub support: Option<f64>,
    pub resistance: Option<f64>,
}

pub fn pivot_levels(bars: &[Bar], lookback: usize) -> PivotLevels {
    if bars.len() < 5 {
        return PivotLevels::default();
    }
    let window = &bars[bars.len().saturating_sub(lookback)..];
    let last_close = bars[bars.len() - 1].close;

    let mut support: Option<f64> = None;
    let mut resistance: Option<f64> = None;
    for i in 2..window.len().saturating_sub(2) {
        let high = window[i].high;
        if high > window[i - 1].high
            && high > window[i - 2].high
            && high > window[i + 1].high
            && high > window[i + 2].high
            && high > last_close
        {
            resistance = Some(resistance.map_or(high, |r: f64| r.min(high)));
        }
        let low = window[i].low;
        if low < window[i - 1].low
            && low < window[i - 2].low
            && low < window[i + 1].low
            && low < window[i + 2].low
            && low < last_close
        {
            support = Some(support.map_or(low, |s: f64| s.max(low)));
        }
    }
    PivotLevels { support, resistance }
}

/// Percent change over the last `offset` bars of a close series.
pub fn percent_change(closes: &[f64], offset: usize) -> Option<f64> {
    if closes.len() <= offset {
        return None;
    }
    let past = closes[closes.len() - 1 - offset];
    if past == 0.0 {
        return None;
    }
    finite((closes[closes.len() - 1] - past) / past * 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn bars_from_closes(closes: &[f64]) -> Vec<Bar> {
        closes
            .iter()
            .enumerate()
            .map(|(i, &close)| Bar {
                symbol: "SAP.DE".into(),
                timestamp: Utc::now() - chrono::Duration::days((closes.len() - i) as i64),
                open: close,
                high: close * 1.01,
                low: close * 0.99,
                close,
                volume: 1_000.0 + i as f64,
            })
            .collect()
    }

    #[test]
    fn sma_matches_hand_computation() {
        let data = [1.0, 2.0, 3.0, 4.0, 5.0];
        let result = sma_series(&data, 3);
        assert_eq!(result, vec![2.0, 3.0, 4.0]);
    }

    #[test]
    fn sma_short_input_is_empty() {
        assert!(sma_series(&[1.0, 2.0], 3).is_empty());
    }

    #[test]
    fn ema_tracks_input_length() {
        let data: Vec<f64> = (1..=30).map(f64::from).collect();
        let result = ema_series(&data, 12);
        assert_eq!(result.len(), data.len());
        // Monotonic input keeps EMA below the latest value
        assert!(*result.last().unwrap() < 30.0);
    }

    #[test]
    fn rsi_extremes() {
        let rising: Vec<f64> = (1..=30).map(f64::from).collect();
        assert_eq!(rsi(&rising, 14), Some(100.0));

        let falling: Vec<f64> = (1..=30).rev().map(f64::from).collect();
        let value = rsi(&falling, 14).unwrap();
        assert!(value < 1.0, "rsi of straight decline was {value}");
    }

    #[test]
    fn rsi_needs_enough_data() {
        assert!(rsi(&[1.0; 10], 14).is_none());
    }

    #[test]
    fn macd_sign_follows_trend() {
        let mut data: Vec<f64> = (1..=60).map(|i| 100.0 + i as f64 * 0.1).collect();
        let rising = macd(&data, 12, 26, 9).unwrap();
        assert!(rising.line > 0.0);

        data.reverse();
        let falling = macd(&data, 12, 26, 9).unwrap();
        assert!(falling.line < 0.0);
    }

    #[test]
    fn bollinger_brackets_the_mean() {
        let data: Vec<f64> = (0..40).map(|i| 100.0 + (i % 5) as f64).collect();
        let bands = bollinger(&data, 20, 2.0).unwrap();
        assert!(bands.lower < bands.middle && bands.middle < bands.upper);
    }

    #[test]
    fn stochastic_high_in_uptrend() {
        let closes: Vec<f64> = (1..=40).map(|i| 100.0 + i as f64).collect();
        let bars = bars_from_closes(&closes);
        let stoch = stochastic(&bars, 14, 3, 3).unwrap();
        assert!(stoch.k > 80.0, "uptrend %K was {}", stoch.k);
    }

    #[test]
    fn atr_positive_for_moving_prices() {
        let closes: Vec<f64> = (1..=40).map(|i| 100.0 + (i % 7) as f64).collect();
        let bars = bars_from_closes(&closes);
        assert!(atr(&bars, 14).unwrap() > 0.0);
    }

    #[test]
    fn adx_detects_strong_trend_direction() {
        let closes: Vec<f64> = (1..=80).map(|i| 100.0 + i as f64 * 2.0).collect();
        let bars = bars_from_closes(&closes);
        let result = adx(&bars, 14).unwrap();
        assert!(result.adx > 25.0, "trend adx was {}", result.adx);
        assert!(result.plus_di > result.minus_di);
    }

    #[test]
    fn obv_accumulates_with_rising_closes() {
        let closes: Vec<f64> = (1..=10).map(f64::from).collect();
        let bars = bars_from_closes(&closes);
        let total = obv(&bars).unwrap();
        let expected: f64 = bars.iter().map(|b| b.volume).sum();
        assert_eq!(total, expected);
    }

    #[test]
    fn percent_change_offsets() {
        let closes = [100.0, 110.0, 121.0];
        assert!((percent_change(&closes, 1).unwrap() - 10.0).abs() < 1e-9);
        assert!((percent_change(&closes, 2).unwrap() - 21.0).abs() < 1e-9);
        assert!(percent_change(&closes, 3).is_none());
    }
}
