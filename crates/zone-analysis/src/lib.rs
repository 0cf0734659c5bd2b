//! Support/resistance zones from swing pivots, and confidence scoring for
//! breaks through them.
//!
//! Everything here is a pure function of its inputs. Bars flow through
//! [`find_pivots`] into [`build_zones`]; [`analyze_bars`] adds indicators,
//! break detection and scoring on top for one instrument, and
//! [`analyze_batch`] runs many instruments across the rayon pool.

pub mod breaks;
pub mod confidence;
pub mod config;
pub mod pivots;
pub mod zones;

pub use breaks::*;
pub use confidence::*;
pub use config::*;
pub use pivots::*;
pub use zones::*;

use analysis_core::{AnalysisError, Bar, ConfidenceReport, IndicatorSnapshot, Zone};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use technical_analysis::{compute_indicators, detect_surge, SurgeSignal};

/// Pivots and zones for one instrument at one reference price
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LevelAnalysis {
    pub pivots: PivotSet,
    pub zones: ZoneSet,
    pub nearest_support: Option<Zone>,
    pub nearest_resistance: Option<Zone>,
}

pub fn analyze_levels(
    bars: &[Bar],
    current_price: f64,
    config: &ZoneAnalysisConfig,
) -> Result<LevelAnalysis, AnalysisError> {
    let pivots = find_pivots(bars, &config.pivots);
    let zones = build_zones(&pivots, current_price, &config.zones)?;

    Ok(LevelAnalysis {
        nearest_support: zones.nearest_support().cloned(),
        nearest_resistance: zones.nearest_resistance().cloned(),
        pivots,
        zones,
    })
}

/// A scored break together with the zone's role after it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakReport {
    pub confidence: ConfidenceReport,
    pub reclassified: Zone,
}

/// Levels, latest indicators, scored breaks and surge state for one series
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BarAnalysis {
    pub bar_count: usize,
    pub current_price: f64,
    pub levels: LevelAnalysis,
    pub indicators: IndicatorSnapshot,
    pub breaks: Vec<BreakReport>,
    pub surge: SurgeSignal,
}

/// Run the whole synchronous pipeline over one bar series. The nearest
/// support and resistance are checked for a fresh break and scored if one
/// is found.
pub fn analyze_bars(
    bars: &[Bar],
    current_price: f64,
    config: &ZoneAnalysisConfig,
) -> Result<BarAnalysis, AnalysisError> {
    if bars.is_empty() {
        return Err(AnalysisError::InsufficientHistory("no bars to analyze".to_string()));
    }

    let levels = analyze_levels(bars, current_price, config)?;
    let indicators = compute_indicators(bars).latest();

    let lookback = config.scoring.pattern_lookback.max(2);
    let recent = &bars[bars.len().saturating_sub(lookback)..];

    let mut breaks = Vec::new();
    for zone in levels.nearest_support.iter().chain(levels.nearest_resistance.iter()) {
        let Some(direction) = detect_break(zone, bars, lookback) else {
            continue;
        };
        let confidence = score_breakout(zone, &indicators, recent, direction, &config.scoring)?;
        let reclassified = reclassify_after_break(zone, direction, current_price)?;
        breaks.push(BreakReport { confidence, reclassified });
    }

    Ok(BarAnalysis {
        bar_count: bars.len(),
        current_price,
        surge: detect_surge(bars, &config.surge),
        levels,
        indicators,
        breaks,
    })
}

/// One instrument's input to [`analyze_batch`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchRequest {
    pub symbol: String,
    pub bars: Vec<Bar>,
    pub current_price: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BatchResult {
    pub symbol: String,
    pub result: Result<BarAnalysis, AnalysisError>,
}

/// Analyze independent instruments in parallel; output order follows input
pub fn analyze_batch(requests: &[BatchRequest], config: &ZoneAnalysisConfig) -> Vec<BatchResult> {
    requests
        .par_iter()
        .map(|req| BatchResult {
            symbol: req.symbol.clone(),
            result: analyze_bars(&req.bars, req.current_price, config),
        })
        .collect()
}
