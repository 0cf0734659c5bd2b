use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::AnalysisError;

/// OHLCV bar data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Bar {
    /// True when high and low are finite and positive, i.e. the bar can take
    /// part in extreme comparisons without NaN semantics leaking in.
    pub fn is_priced(&self) -> bool {
        self.high.is_finite() && self.low.is_finite() && self.high > 0.0 && self.low > 0.0
    }

    /// Reject bars a data provider should never have produced.
    pub fn validate(&self) -> Result<(), AnalysisError> {
        for (name, value) in [
            ("open", self.open),
            ("high", self.high),
            ("low", self.low),
            ("close", self.close),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(AnalysisError::InvalidInput(format!(
                    "bar at {} has non-positive {}: {}",
                    self.timestamp, name, value
                )));
            }
        }
        if self.high < self.low {
            return Err(AnalysisError::InvalidInput(format!(
                "bar at {} has high {} below low {}",
                self.timestamp, self.high, self.low
            )));
        }
        if !self.volume.is_finite() || self.volume < 0.0 {
            return Err(AnalysisError::InvalidInput(format!(
                "bar at {} has invalid volume: {}",
                self.timestamp, self.volume
            )));
        }
        Ok(())
    }
}

/// Validate every bar and require strictly increasing timestamps.
pub fn validate_series(bars: &[Bar]) -> Result<(), AnalysisError> {
    for bar in bars {
        bar.validate()?;
    }
    if let Some(w) = bars.windows(2).find(|w| w[1].timestamp <= w[0].timestamp) {
        return Err(AnalysisError::InvalidInput(format!(
            "bars out of order or duplicated at {}",
            w[1].timestamp
        )));
    }
    Ok(())
}

/// Which extreme a pivot marks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PivotKind {
    High,
    Low,
}

/// A confirmed swing high or swing low
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pivot {
    /// Index into the bar series the pivot was detected in
    pub index: usize,
    /// High of the bar for a pivot-high, low for a pivot-low
    pub price: f64,
    pub timestamp: DateTime<Utc>,
    pub volume: f64,
    pub kind: PivotKind,
}

/// Role of a zone relative to the price it was built against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZoneKind {
    Support,
    Resistance,
}

impl ZoneKind {
    pub fn opposite(&self) -> Self {
        match self {
            ZoneKind::Support => ZoneKind::Resistance,
            ZoneKind::Resistance => ZoneKind::Support,
        }
    }

    /// The pivot kind that normally forms this role
    pub fn natural_origin(&self) -> PivotKind {
        match self {
            ZoneKind::Support => PivotKind::Low,
            ZoneKind::Resistance => PivotKind::High,
        }
    }
}

/// A price band formed by clustered pivots
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Zone {
    pub upper: f64,
    pub lower: f64,
    pub middle: f64,
    pub touch_count: usize,
    /// 0.0 to 1.0
    pub strength: f64,
    pub kind: ZoneKind,
    /// Signed percent from the reference price to `middle` (positive above)
    pub distance_pct: f64,
    pub total_volume: f64,
    pub last_touch: DateTime<Utc>,
    /// Majority pivot kind among the members
    pub origin: PivotKind,
    /// Set when the zone plays the role opposite to its origin
    pub role_reversed: bool,
    pub pivots: Vec<Pivot>,
}

/// Direction of a move through a zone
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakDirection {
    /// Upward through resistance
    Breakout,
    /// Downward through support
    Breakdown,
}

impl BreakDirection {
    pub fn to_label(&self) -> &'static str {
        match self {
            BreakDirection::Breakout => "breakout",
            BreakDirection::Breakdown => "breakdown",
        }
    }
}

/// Fields of an indicator snapshot the scorer may ask for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndicatorField {
    Rsi,
    Macd,
    MacdSignal,
    MacdHistogram,
    PrevMacdHistogram,
    #[serde(rename = "sma_20")]
    Sma20,
    #[serde(rename = "sma_50")]
    Sma50,
    #[serde(rename = "volume_avg_20")]
    VolumeAvg20,
    #[serde(rename = "volume_avg_50")]
    VolumeAvg50,
    #[serde(rename = "volume_avg_200")]
    VolumeAvg200,
}

/// Indicator values at one bar. `None` means the indicator could not be
/// computed (warm-up period, provider gap).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndicatorSnapshot {
    pub rsi: Option<f64>,
    pub macd: Option<f64>,
    pub macd_signal: Option<f64>,
    pub macd_histogram: Option<f64>,
    pub prev_macd_histogram: Option<f64>,
    /// Close-price moving averages
    pub sma_20: Option<f64>,
    pub sma_50: Option<f64>,
    pub volume_avg_20: Option<f64>,
    pub volume_avg_50: Option<f64>,
    pub volume_avg_200: Option<f64>,
}

impl IndicatorSnapshot {
    pub fn get(&self, field: IndicatorField) -> Option<f64> {
        let value = match field {
            IndicatorField::Rsi => self.rsi,
            IndicatorField::Macd => self.macd,
            IndicatorField::MacdSignal => self.macd_signal,
            IndicatorField::MacdHistogram => self.macd_histogram,
            IndicatorField::PrevMacdHistogram => self.prev_macd_histogram,
            IndicatorField::Sma20 => self.sma_20,
            IndicatorField::Sma50 => self.sma_50,
            IndicatorField::VolumeAvg20 => self.volume_avg_20,
            IndicatorField::VolumeAvg50 => self.volume_avg_50,
            IndicatorField::VolumeAvg200 => self.volume_avg_200,
        };
        // A NaN from an upstream library is as good as missing
        value.filter(|v| v.is_finite())
    }
}

/// One component of a confidence score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubScore {
    /// 0.0 to 1.0
    pub value: f64,
    /// True when part of the value is a neutral fallback for missing inputs
    pub degraded: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub missing: Vec<IndicatorField>,
}

impl SubScore {
    pub fn new(value: f64) -> Self {
        Self {
            value: clamp_unit(value),
            degraded: false,
            missing: Vec::new(),
        }
    }

    pub fn degraded(value: f64, missing: Vec<IndicatorField>) -> Self {
        Self {
            value: clamp_unit(value),
            degraded: true,
            missing,
        }
    }
}

/// Clamp into [0, 1], mapping NaN to 0
pub fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// Relative weights of the four confidence components
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfidenceWeights {
    pub volume: f64,
    pub zone: f64,
    pub momentum: f64,
    pub pattern: f64,
}

impl Default for ConfidenceWeights {
    fn default() -> Self {
        Self {
            volume: 0.25,
            zone: 0.25,
            momentum: 0.25,
            pattern: 0.25,
        }
    }
}

impl ConfidenceWeights {
    pub fn validate(&self) -> Result<(), AnalysisError> {
        let all = [self.volume, self.zone, self.momentum, self.pattern];
        if all.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(AnalysisError::InvalidInput(format!(
                "confidence weights must be finite and non-negative: {:?}",
                self
            )));
        }
        if all.iter().sum::<f64>() <= 0.0 {
            return Err(AnalysisError::InvalidInput(
                "confidence weights sum to zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Weighted mean of the four sub-score values
    pub fn combine(&self, volume: f64, zone: f64, momentum: f64, pattern: f64) -> f64 {
        let total = self.volume + self.zone + self.momentum + self.pattern;
        if total <= 0.0 {
            return 0.0;
        }
        clamp_unit(
            (self.volume * volume + self.zone * zone + self.momentum * momentum + self.pattern * pattern)
                / total,
        )
    }
}

/// Lowest score read as `Interpretation::VeryHigh`
pub const VERY_HIGH_FLOOR: f64 = 0.75;

/// Discrete reading of an overall confidence score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Interpretation {
    VeryHigh,
    High,
    Moderate,
    Low,
    VeryLow,
}

impl Interpretation {
    /// Bands are inclusive-lower / exclusive-upper, top band closed.
    pub fn from_score(score: f64) -> Self {
        match score {
            s if s >= VERY_HIGH_FLOOR => Interpretation::VeryHigh,
            s if s >= 0.60 => Interpretation::High,
            s if s >= 0.45 => Interpretation::Moderate,
            s if s >= 0.30 => Interpretation::Low,
            _ => Interpretation::VeryLow,
        }
    }

    pub fn to_label(&self) -> &'static str {
        match self {
            Interpretation::VeryHigh => "very high",
            Interpretation::High => "high",
            Interpretation::Moderate => "moderate",
            Interpretation::Low => "low",
            Interpretation::VeryLow => "very low",
        }
    }
}

/// Credibility estimate for one break through one zone
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceReport {
    /// 0.0 to 1.0
    pub overall: f64,
    pub volume_strength: SubScore,
    pub zone_strength: SubScore,
    pub momentum_strength: SubScore,
    pub pattern_strength: SubScore,
    pub interpretation: Interpretation,
    pub direction: BreakDirection,
    pub weights: ConfidenceWeights,
    /// A close re-entered the zone after the break inside the lookback window
    pub failed_retest: bool,
    pub zone: Zone,
}

impl ConfidenceReport {
    /// True if any sub-score relied on a neutral fallback
    pub fn is_degraded(&self) -> bool {
        [
            &self.volume_strength,
            &self.zone_strength,
            &self.momentum_strength,
            &self.pattern_strength,
        ]
        .iter()
        .any(|s| s.degraded)
    }
}
