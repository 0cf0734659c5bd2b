use analysis_core::{Bar, IndicatorSnapshot};
use serde::{Deserialize, Serialize};

/// Simple Moving Average
pub fn sma(data: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || data.len() < period {
        return vec![];
    }

    let mut result = Vec::with_capacity(data.len() - period + 1);
    let mut sum: f64 = data[..period].iter().sum();
    result.push(sum / period as f64);
    for i in period..data.len() {
        sum += data[i] - data[i - period];
        result.push(sum / period as f64);
    }
    result
}

/// Exponential Moving Average, seeded with the SMA of the first `period` values.
/// The first output corresponds to `data[period - 1]`.
pub fn ema(data: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || data.len() < period {
        return vec![];
    }

    let multiplier = 2.0 / (period as f64 + 1.0);
    let mut result = Vec::with_capacity(data.len() - period + 1);
    result.push(data[..period].iter().sum::<f64>() / period as f64);

    for value in &data[period..] {
        let prev = result[result.len() - 1];
        result.push((value - prev) * multiplier + prev);
    }

    result
}

/// Relative Strength Index with Wilder smoothing.
/// The first output corresponds to `data[period]`.
pub fn rsi(data: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || data.len() < period + 1 {
        return vec![];
    }

    let mut gains = Vec::with_capacity(data.len() - 1);
    let mut losses = Vec::with_capacity(data.len() - 1);

    for i in 1..data.len() {
        let change = data[i] - data[i - 1];
        if change > 0.0 {
            gains.push(change);
            losses.push(0.0);
        } else {
            gains.push(0.0);
            losses.push(change.abs());
        }
    }

    let mut avg_gain = gains[..period].iter().sum::<f64>() / period as f64;
    let mut avg_loss = losses[..period].iter().sum::<f64>() / period as f64;

    let mut rsi_values = Vec::with_capacity(data.len() - period);
    rsi_values.push(rsi_from_averages(avg_gain, avg_loss));

    for i in period..gains.len() {
        avg_gain = (avg_gain * (period - 1) as f64 + gains[i]) / period as f64;
        avg_loss = (avg_loss * (period - 1) as f64 + losses[i]) / period as f64;
        rsi_values.push(rsi_from_averages(avg_gain, avg_loss));
    }

    rsi_values
}

fn rsi_from_averages(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss == 0.0 {
        // Flat series has no direction
        if avg_gain == 0.0 { 50.0 } else { 100.0 }
    } else {
        100.0 - (100.0 / (1.0 + avg_gain / avg_loss))
    }
}

/// MACD (Moving Average Convergence Divergence)
pub struct MacdResult {
    pub macd_line: Vec<f64>,
    pub signal_line: Vec<f64>,
    pub histogram: Vec<f64>,
}

pub fn macd(data: &[f64], fast_period: usize, slow_period: usize, signal_period: usize) -> MacdResult {
    if fast_period == 0 || signal_period == 0 || slow_period <= fast_period {
        return MacdResult { macd_line: vec![], signal_line: vec![], histogram: vec![] };
    }

    let ema_fast = ema(data, fast_period);
    let ema_slow = ema(data, slow_period);
    if ema_slow.is_empty() {
        return MacdResult { macd_line: vec![], signal_line: vec![], histogram: vec![] };
    }

    // Both EMAs end on the last bar; the fast one starts earlier
    let offset = slow_period - fast_period;
    let macd_line: Vec<f64> = ema_slow
        .iter()
        .enumerate()
        .map(|(i, slow)| ema_fast[i + offset] - slow)
        .collect();

    let signal_line = ema(&macd_line, signal_period);

    let hist_offset = macd_line.len() - signal_line.len();
    let histogram = signal_line
        .iter()
        .enumerate()
        .map(|(i, signal)| macd_line[i + hist_offset] - signal)
        .collect();

    MacdResult {
        macd_line,
        signal_line,
        histogram,
    }
}

/// Pad an indicator series that ends on the last bar so it lines up with bar
/// indices; warm-up slots are `None`.
pub fn align_to_bars(values: &[f64], len: usize) -> Vec<Option<f64>> {
    let pad = len.saturating_sub(values.len());
    let skip = values.len().saturating_sub(len);
    std::iter::repeat(None)
        .take(pad)
        .chain(values[skip..].iter().map(|v| Some(*v)))
        .collect()
}

/// Periods used when building an [`IndicatorTable`]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndicatorParams {
    pub rsi_period: usize,
    pub macd_fast: usize,
    pub macd_slow: usize,
    pub macd_signal: usize,
    pub sma_short: usize,
    pub sma_long: usize,
    pub volume_short: usize,
    pub volume_medium: usize,
    pub volume_long: usize,
}

impl Default for IndicatorParams {
    fn default() -> Self {
        Self {
            rsi_period: 14,
            macd_fast: 12,
            macd_slow: 26,
            macd_signal: 9,
            sma_short: 20,
            sma_long: 50,
            volume_short: 20,
            volume_medium: 50,
            volume_long: 200,
        }
    }
}

/// Per-bar indicator columns, each indexed like the bars they came from
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndicatorTable {
    pub rsi: Vec<Option<f64>>,
    pub macd: Vec<Option<f64>>,
    pub macd_signal: Vec<Option<f64>>,
    pub macd_histogram: Vec<Option<f64>>,
    pub sma_20: Vec<Option<f64>>,
    pub sma_50: Vec<Option<f64>>,
    pub volume_avg_20: Vec<Option<f64>>,
    pub volume_avg_50: Vec<Option<f64>>,
    pub volume_avg_200: Vec<Option<f64>>,
}

impl IndicatorTable {
    pub fn len(&self) -> usize {
        self.rsi.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rsi.is_empty()
    }

    /// Snapshot of every column at bar `index`
    pub fn snapshot_at(&self, index: usize) -> Option<IndicatorSnapshot> {
        if index >= self.len() {
            return None;
        }
        let prev_macd_histogram = index
            .checked_sub(1)
            .and_then(|prev| self.macd_histogram[prev]);

        Some(IndicatorSnapshot {
            rsi: self.rsi[index],
            macd: self.macd[index],
            macd_signal: self.macd_signal[index],
            macd_histogram: self.macd_histogram[index],
            prev_macd_histogram,
            sma_20: self.sma_20[index],
            sma_50: self.sma_50[index],
            volume_avg_20: self.volume_avg_20[index],
            volume_avg_50: self.volume_avg_50[index],
            volume_avg_200: self.volume_avg_200[index],
        })
    }

    /// Snapshot at the last bar; all-`None` for an empty table
    pub fn latest(&self) -> IndicatorSnapshot {
        self.len()
            .checked_sub(1)
            .and_then(|last| self.snapshot_at(last))
            .unwrap_or_default()
    }
}

/// RSI-14, MACD(12,26,9), 20/50-bar close SMAs and 20/50/200-bar volume
/// averages
pub fn compute_indicators(bars: &[Bar]) -> IndicatorTable {
    compute_indicators_with(bars, &IndicatorParams::default())
}

pub fn compute_indicators_with(bars: &[Bar], params: &IndicatorParams) -> IndicatorTable {
    let len = bars.len();
    let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
    let volumes: Vec<f64> = bars.iter().map(|b| b.volume).collect();

    let macd_result = macd(&closes, params.macd_fast, params.macd_slow, params.macd_signal);

    IndicatorTable {
        rsi: align_to_bars(&rsi(&closes, params.rsi_period), len),
        macd: align_to_bars(&macd_result.macd_line, len),
        macd_signal: align_to_bars(&macd_result.signal_line, len),
        macd_histogram: align_to_bars(&macd_result.histogram, len),
        sma_20: align_to_bars(&sma(&closes, params.sma_short), len),
        sma_50: align_to_bars(&sma(&closes, params.sma_long), len),
        volume_avg_20: align_to_bars(&sma(&volumes, params.volume_short), len),
        volume_avg_50: align_to_bars(&sma(&volumes, params.volume_medium), len),
        volume_avg_200: align_to_bars(&sma(&volumes, params.volume_long), len),
    }
}
