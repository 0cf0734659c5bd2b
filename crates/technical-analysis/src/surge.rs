use analysis_core::Bar;
use serde::{Deserialize, Serialize};

use crate::indicators::sma;

/// Thresholds for volume and price surge detection
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SurgeConfig {
    /// Volume must reach this multiple of its average (1.5 = 150%)
    pub volume_multiplier: f64,
    /// Absolute close-to-close change, in percent
    pub price_change_pct: f64,
    /// Averaging window used when neither the 20 nor the 50 bar average exists
    pub lookback_periods: usize,
    /// Bars between the two closes compared for a price surge
    pub price_periods: usize,
    /// Require both a volume and a price surge
    pub require_both: bool,
}

impl Default for SurgeConfig {
    fn default() -> Self {
        Self {
            volume_multiplier: 1.5,
            price_change_pct: 3.0,
            lookback_periods: 20,
            price_periods: 1,
            require_both: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolumeSurge {
    pub current_volume: f64,
    pub average_volume: f64,
    pub volume_ratio: f64,
    pub is_surge: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceSurge {
    pub current_price: f64,
    pub previous_price: f64,
    pub price_change_pct: f64,
    pub is_surge: bool,
    pub is_up: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SurgeSignal {
    pub has_surge: bool,
    pub volume: Option<VolumeSurge>,
    pub price: Option<PriceSurge>,
}

/// Latest volume against its 20-bar average, falling back to the 50-bar
/// average and then to `lookback_periods`. `None` when no average exists.
pub fn detect_volume_surge(bars: &[Bar], config: &SurgeConfig) -> Option<VolumeSurge> {
    let current_volume = bars.last()?.volume;
    let volumes: Vec<f64> = bars.iter().map(|b| b.volume).collect();

    let average_volume = [20, 50, config.lookback_periods]
        .iter()
        .filter_map(|&period| sma(&volumes, period).last().copied())
        .find(|avg| avg.is_finite())?;

    let volume_ratio = if average_volume > 0.0 {
        current_volume / average_volume
    } else {
        0.0
    };

    Some(VolumeSurge {
        current_volume,
        average_volume,
        volume_ratio,
        is_surge: volume_ratio >= config.volume_multiplier,
    })
}

/// Close change over `price_periods` bars
pub fn detect_price_surge(bars: &[Bar], config: &SurgeConfig) -> Option<PriceSurge> {
    let periods = config.price_periods.max(1);
    if bars.len() < periods + 1 {
        return None;
    }

    let current_price = bars[bars.len() - 1].close;
    let previous_price = bars[bars.len() - 1 - periods].close;
    let price_change_pct = if previous_price > 0.0 {
        (current_price - previous_price) / previous_price * 100.0
    } else {
        0.0
    };

    Some(PriceSurge {
        current_price,
        previous_price,
        price_change_pct,
        is_surge: price_change_pct.abs() >= config.price_change_pct,
        is_up: current_price > previous_price,
    })
}

pub fn detect_surge(bars: &[Bar], config: &SurgeConfig) -> SurgeSignal {
    let volume = detect_volume_surge(bars, config);
    let price = detect_price_surge(bars, config);

    let volume_hit = volume.as_ref().is_some_and(|v| v.is_surge);
    let price_hit = price.as_ref().is_some_and(|p| p.is_surge);

    let has_surge = if config.require_both {
        volume_hit && price_hit
    } else {
        volume_hit || price_hit
    };

    SurgeSignal { has_surge, volume, price }
}
