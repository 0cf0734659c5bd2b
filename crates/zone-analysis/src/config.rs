use analysis_core::{AnalysisError, ConfidenceWeights};
use serde::{Deserialize, Serialize};
use technical_analysis::SurgeConfig;

/// Window sizes for swing detection
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PivotConfig {
    pub left_bars: usize,
    pub right_bars: usize,
}

impl Default for PivotConfig {
    fn default() -> Self {
        Self {
            left_bars: 5,
            right_bars: 5,
        }
    }
}

impl PivotConfig {
    /// Shortest series that can hold one candidate
    pub fn min_len(&self) -> usize {
        self.left_bars + self.right_bars + 1
    }
}

/// Saturation scales and weights of the zone strength components.
///
/// Each component maps into [0, 1] and grows with its input, so more
/// touches, more volume, a narrower band or fresher pivots never lower the
/// score for positive scales and weights.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StrengthParams {
    pub touch_scale: f64,
    pub volume_scale: f64,
    /// Band width, in percent of the middle, at which the width component is 0.5
    pub width_scale: f64,
    /// Age in bars at which a member's recency falls to 1/e
    pub recency_scale: f64,
    pub touch_weight: f64,
    pub volume_weight: f64,
    pub width_weight: f64,
    pub recency_weight: f64,
}

impl Default for StrengthParams {
    fn default() -> Self {
        Self {
            touch_scale: 3.0,
            volume_scale: 4.0,
            width_scale: 1.0,
            recency_scale: 60.0,
            touch_weight: 0.35,
            volume_weight: 0.20,
            width_weight: 0.25,
            recency_weight: 0.20,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ZoneConfig {
    /// Max distance from a group's centroid, in percent of the centroid
    pub tolerance_percent: f64,
    pub min_touches: usize,
    pub strength: StrengthParams,
}

impl Default for ZoneConfig {
    fn default() -> Self {
        Self {
            tolerance_percent: 1.5,
            min_touches: 2,
            strength: StrengthParams::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub weights: ConfidenceWeights,
    /// Closes inspected by the pattern sub-score and by break detection
    pub pattern_lookback: usize,
    /// Volume above this multiple of any average earns the bonus
    pub volume_bonus_multiple: f64,
    /// Ceiling on the pattern sub-score after a failed retest
    pub failed_retest_cap: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            weights: ConfidenceWeights::default(),
            pattern_lookback: 5,
            volume_bonus_multiple: 1.5,
            failed_retest_cap: 0.0,
        }
    }
}

/// What the calling pipeline asks of its data collaborators
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    pub min_bars: usize,
    /// A live quote further than this factor from the last close is rejected
    pub max_price_ratio: f64,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            min_bars: 200,
            max_price_ratio: 10.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ZoneAnalysisConfig {
    pub pivots: PivotConfig,
    pub zones: ZoneConfig,
    pub scoring: ScoringConfig,
    pub history: HistoryConfig,
    pub surge: SurgeConfig,
}

impl ZoneAnalysisConfig {
    /// Defaults overridden by environment variables where set and parseable
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    pub fn with_env_overrides(mut self) -> Self {
        self.pivots.left_bars = env_or("PIVOT_LEFT_BARS", self.pivots.left_bars);
        self.pivots.right_bars = env_or("PIVOT_RIGHT_BARS", self.pivots.right_bars);
        self.zones.tolerance_percent = env_or("ZONE_TOLERANCE_PCT", self.zones.tolerance_percent);
        self.zones.min_touches = env_or("ZONE_MIN_TOUCHES", self.zones.min_touches);
        self.history.min_bars = env_or("HISTORY_MIN_BARS", self.history.min_bars);
        self.history.max_price_ratio = env_or("PRICE_MAX_RATIO", self.history.max_price_ratio);
        self
    }

    pub fn from_json(json: &str) -> Result<Self, AnalysisError> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| AnalysisError::InvalidInput(format!("config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AnalysisError> {
        if !self.zones.tolerance_percent.is_finite() || self.zones.tolerance_percent < 0.0 {
            return Err(AnalysisError::InvalidInput(format!(
                "tolerance_percent must be finite and non-negative, got {}",
                self.zones.tolerance_percent
            )));
        }
        if self.zones.min_touches == 0 {
            return Err(AnalysisError::InvalidInput("min_touches must be at least 1".to_string()));
        }
        if !self.history.max_price_ratio.is_finite() || self.history.max_price_ratio <= 1.0 {
            return Err(AnalysisError::InvalidInput(format!(
                "max_price_ratio must be greater than 1, got {}",
                self.history.max_price_ratio
            )));
        }
        self.scoring.weights.validate()
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
