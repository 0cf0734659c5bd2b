use analysis_core::{
    AnalysisError, Bar, BreakDirection, ConfidenceReport, IndicatorField, IndicatorSnapshot,
    Interpretation, SubScore, Zone, VERY_HIGH_FLOOR,
};

use crate::config::ScoringConfig;

/// Volume averages and the credit for beating each, strongest first
const VOLUME_CREDITS: [(IndicatorField, f64); 3] = [
    (IndicatorField::VolumeAvg200, 0.35),
    (IndicatorField::VolumeAvg50, 0.25),
    (IndicatorField::VolumeAvg20, 0.15),
];
const VOLUME_BONUS: f64 = 0.25;

const NEUTRAL: f64 = 0.5;

const PATTERN_BASE: f64 = 0.4;
const PATTERN_PER_CONFIRMATION: f64 = 0.15;
const PATTERN_MAX_CONFIRMATIONS: usize = 2;
const PATTERN_HOLD_BONUS: f64 = 0.3;

/// Ceiling on the overall score once a close has fallen back into the zone.
/// Keeps a failed retest out of the top band whatever the weights.
pub const FAILED_RETEST_CEILING: f64 = VERY_HIGH_FLOOR - 0.01;

/// Score how credible a break of `zone` in `direction` looks.
///
/// Missing indicator fields never fail the call; the affected sub-score falls
/// back to a neutral value and is marked degraded. Structurally bad input
/// (no bars, malformed bars, an inverted or non-finite zone, unusable weights)
/// is an error rather than a low score.
pub fn score_breakout(
    zone: &Zone,
    snapshot: &IndicatorSnapshot,
    recent_bars: &[Bar],
    direction: BreakDirection,
    config: &ScoringConfig,
) -> Result<ConfidenceReport, AnalysisError> {
    config.weights.validate()?;
    validate_zone(zone)?;

    let latest = recent_bars.last().ok_or_else(|| {
        AnalysisError::InsufficientHistory("no recent bars to score a break against".to_string())
    })?;
    for bar in recent_bars {
        bar.validate()?;
    }

    let volume_strength = volume_score(latest.volume, snapshot, config.volume_bonus_multiple);
    let zone_strength = SubScore::new(zone.strength);
    let momentum_strength = momentum_score(snapshot, direction);
    let (pattern_strength, failed_retest) = pattern_score(zone, recent_bars, direction, config);

    let mut overall = config.weights.combine(
        volume_strength.value,
        zone_strength.value,
        momentum_strength.value,
        pattern_strength.value,
    );
    if failed_retest {
        overall = overall.min(FAILED_RETEST_CEILING);
    }

    tracing::debug!(
        "{} through {:.4}-{:.4}: volume {:.2} zone {:.2} momentum {:.2} pattern {:.2} -> {:.3} ({})",
        direction.to_label(),
        zone.lower,
        zone.upper,
        volume_strength.value,
        zone_strength.value,
        momentum_strength.value,
        pattern_strength.value,
        overall,
        Interpretation::from_score(overall).to_label()
    );

    Ok(ConfidenceReport {
        overall,
        volume_strength,
        zone_strength,
        momentum_strength,
        pattern_strength,
        interpretation: Interpretation::from_score(overall),
        direction,
        weights: config.weights,
        failed_retest,
        zone: zone.clone(),
    })
}

fn validate_zone(zone: &Zone) -> Result<(), AnalysisError> {
    if !zone.upper.is_finite() || !zone.lower.is_finite() || zone.upper < zone.lower {
        return Err(AnalysisError::InvalidInput(format!(
            "zone bounds must be finite with upper >= lower, got {}..{}",
            zone.lower, zone.upper
        )));
    }
    if !zone.strength.is_finite() {
        return Err(AnalysisError::InvalidInput(format!(
            "zone strength is not finite: {}",
            zone.strength
        )));
    }
    Ok(())
}

/// Credit for each average the latest volume beats, plus a bonus for a clear
/// multiple of any of them. Averages that are absent (or zero) earn nothing;
/// with none at all the score is neutral.
pub fn volume_score(volume: f64, snapshot: &IndicatorSnapshot, bonus_multiple: f64) -> SubScore {
    let mut missing = Vec::new();
    let mut score = 0.0;
    let mut bonus = false;
    let mut any_available = false;

    for (field, credit) in VOLUME_CREDITS {
        match snapshot.get(field).filter(|avg| *avg > 0.0) {
            Some(avg) => {
                any_available = true;
                if volume > avg {
                    score += credit;
                }
                if volume > bonus_multiple * avg {
                    bonus = true;
                }
            }
            None => missing.push(field),
        }
    }

    if !any_available {
        return SubScore::degraded(NEUTRAL, missing);
    }
    if bonus {
        score += VOLUME_BONUS;
    }

    let mut sub = SubScore::new(score);
    sub.missing = missing;
    sub
}

/// Half RSI, half MACD, each read in the direction of the break
pub fn momentum_score(snapshot: &IndicatorSnapshot, direction: BreakDirection) -> SubScore {
    let mut missing = Vec::new();

    let rsi_component = match snapshot.get(IndicatorField::Rsi) {
        Some(rsi) => rsi_component(rsi, direction),
        None => {
            missing.push(IndicatorField::Rsi);
            NEUTRAL
        }
    };

    let macd = snapshot.get(IndicatorField::Macd);
    let signal = snapshot.get(IndicatorField::MacdSignal);
    let macd_component = match (macd, signal) {
        (Some(macd), Some(signal)) => {
            let histogram = snapshot
                .get(IndicatorField::MacdHistogram)
                .unwrap_or(macd - signal);
            macd_component(
                macd,
                signal,
                histogram,
                snapshot.get(IndicatorField::PrevMacdHistogram),
                direction,
            )
        }
        _ => {
            if macd.is_none() {
                missing.push(IndicatorField::Macd);
            }
            if signal.is_none() {
                missing.push(IndicatorField::MacdSignal);
            }
            NEUTRAL
        }
    };

    let value = 0.5 * rsi_component + 0.5 * macd_component;
    if missing.is_empty() {
        SubScore::new(value)
    } else {
        SubScore::degraded(value, missing)
    }
}

/// 1.0 inside the healthy band, linear decay to 0 over 30 points on the weak
/// side, linear decay to a 0.4 floor on the overextended side
fn rsi_component(rsi: f64, direction: BreakDirection) -> f64 {
    let r = match direction {
        BreakDirection::Breakout => rsi,
        BreakDirection::Breakdown => 100.0 - rsi,
    };

    if (50.0..=70.0).contains(&r) {
        1.0
    } else if r < 50.0 {
        (1.0 - (50.0 - r) / 30.0).max(0.0)
    } else {
        (1.0 - (r - 70.0) / 30.0 * 0.6).max(0.4)
    }
}

fn macd_component(
    macd: f64,
    signal: f64,
    histogram: f64,
    prev_histogram: Option<f64>,
    direction: BreakDirection,
) -> f64 {
    let sign = match direction {
        BreakDirection::Breakout => 1.0,
        BreakDirection::Breakdown => -1.0,
    };

    let spread = sign * (macd - signal);
    let crossover = if spread > 0.0 {
        0.6
    } else if spread == 0.0 {
        0.3
    } else {
        0.0
    };

    let accelerating = match prev_histogram {
        Some(prev) => sign * (histogram - prev) > 0.0,
        None => sign * histogram > 0.0,
    };

    crossover + if accelerating { 0.4 } else { 0.0 }
}

/// How cleanly recent closes hold beyond the broken boundary. Returns the
/// sub-score and whether a close fell back after breaking.
pub fn pattern_score(
    zone: &Zone,
    recent_bars: &[Bar],
    direction: BreakDirection,
    config: &ScoringConfig,
) -> (SubScore, bool) {
    let lookback = config.pattern_lookback.max(1);
    let start = recent_bars.len().saturating_sub(lookback);
    let beyond: Vec<bool> = recent_bars[start..]
        .iter()
        .map(|bar| match direction {
            BreakDirection::Breakout => bar.close > zone.upper,
            BreakDirection::Breakdown => bar.close < zone.lower,
        })
        .collect();

    let failed_retest = beyond
        .iter()
        .position(|b| *b)
        .is_some_and(|first| beyond[first + 1..].iter().any(|b| !b));

    let mut score = 0.0;
    if beyond.last().copied().unwrap_or(false) {
        score += PATTERN_BASE;

        let confirmations = beyond[..beyond.len() - 1]
            .iter()
            .rev()
            .take_while(|b| **b)
            .count()
            .min(PATTERN_MAX_CONFIRMATIONS);
        score += PATTERN_PER_CONFIRMATION * confirmations as f64;

        if !failed_retest {
            score += PATTERN_HOLD_BONUS;
        }
    }

    if failed_retest {
        score = score.min(config.failed_retest_cap);
    }

    (SubScore::new(score), failed_retest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use analysis_core::{ConfidenceWeights, PivotKind, ZoneKind};
    use chrono::{Duration, TimeZone, Utc};

    fn bars_from_closes(closes: &[f64], volume: f64) -> Vec<Bar> {
        let start = Utc.with_ymd_and_hms(2024, 6, 3, 0, 0, 0).unwrap();
        closes
            .iter()
            .enumerate()
            .map(|(i, &close)| Bar {
                timestamp: start + Duration::days(i as i64),
                open: close,
                high: close + 0.2,
                low: close - 0.2,
                close,
                volume,
            })
            .collect()
    }

    fn resistance(lower: f64, upper: f64, strength: f64) -> Zone {
        Zone {
            upper,
            lower,
            middle: (upper + lower) / 2.0,
            touch_count: 3,
            strength,
            kind: ZoneKind::Resistance,
            distance_pct: 5.0,
            total_volume: 3_000_000.0,
            last_touch: Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap(),
            origin: PivotKind::High,
            role_reversed: false,
            pivots: vec![],
        }
    }

    fn bullish_snapshot(avg: f64) -> IndicatorSnapshot {
        IndicatorSnapshot {
            rsi: Some(62.0),
            macd: Some(0.8),
            macd_signal: Some(0.5),
            macd_histogram: Some(0.3),
            prev_macd_histogram: Some(0.2),
            volume_avg_20: Some(avg),
            volume_avg_50: Some(avg),
            volume_avg_200: Some(avg),
            ..Default::default()
        }
    }

    #[test]
    fn test_strong_breakout_scores_high() {
        let zone = resistance(28.0, 29.0, 0.5);
        let bars = bars_from_closes(&[28.5, 28.8, 29.6, 30.1, 30.5], 1_600_000.0);
        let report = score_breakout(
            &zone,
            &bullish_snapshot(1_000_000.0),
            &bars,
            BreakDirection::Breakout,
            &ScoringConfig::default(),
        )
        .unwrap();

        assert!(report.overall >= 0.60, "overall {}", report.overall);
        assert!(matches!(
            report.interpretation,
            Interpretation::High | Interpretation::VeryHigh
        ));
        assert_eq!(report.volume_strength.value, 1.0);
        assert_eq!(report.momentum_strength.value, 1.0);
        assert_eq!(report.pattern_strength.value, 1.0);
        assert!(!report.failed_retest);
        assert!(!report.is_degraded());
    }

    #[test]
    fn test_failed_retest_blocks_very_high() {
        let zone = resistance(28.0, 29.0, 0.95);
        // Breaks, falls back under the boundary, breaks again
        let bars = bars_from_closes(&[28.5, 29.6, 28.9, 29.8, 30.4], 5_000_000.0);
        let report = score_breakout(
            &zone,
            &bullish_snapshot(1_000_000.0),
            &bars,
            BreakDirection::Breakout,
            &ScoringConfig::default(),
        )
        .unwrap();

        assert!(report.failed_retest);
        assert_eq!(report.volume_strength.value, 1.0);
        assert_eq!(report.momentum_strength.value, 1.0);
        assert_eq!(report.pattern_strength.value, 0.0);
        assert!(report.overall < 0.75);
        assert_ne!(report.interpretation, Interpretation::VeryHigh);
    }

    #[test]
    fn test_failed_retest_on_perfect_zone_stays_below_very_high() {
        let zone = resistance(28.0, 29.0, 1.0);
        let bars = bars_from_closes(&[28.5, 29.6, 28.9, 29.8, 30.4], 5_000_000.0);
        let report = score_breakout(
            &zone,
            &bullish_snapshot(1_000_000.0),
            &bars,
            BreakDirection::Breakout,
            &ScoringConfig::default(),
        )
        .unwrap();

        assert!(report.failed_retest);
        assert_eq!(report.zone_strength.value, 1.0);
        assert_eq!(report.pattern_strength.value, 0.0);
        assert!(report.overall < VERY_HIGH_FLOOR, "overall {}", report.overall);
        assert_eq!(report.interpretation, Interpretation::High);
    }

    #[test]
    fn test_failed_retest_ceiling_holds_for_any_weights() {
        let zone = resistance(28.0, 29.0, 1.0);
        let bars = bars_from_closes(&[28.5, 29.6, 28.9, 29.8, 30.4], 5_000_000.0);
        let mut config = ScoringConfig::default();
        config.weights = ConfidenceWeights {
            volume: 1.0,
            zone: 1.0,
            momentum: 1.0,
            pattern: 0.0,
        };
        config.failed_retest_cap = 1.0;

        let report = score_breakout(
            &zone,
            &bullish_snapshot(1_000_000.0),
            &bars,
            BreakDirection::Breakout,
            &config,
        )
        .unwrap();

        assert!(report.failed_retest);
        assert_eq!(report.overall, FAILED_RETEST_CEILING);
        assert_ne!(report.interpretation, Interpretation::VeryHigh);
    }

    #[test]
    fn test_missing_rsi_only_touches_momentum() {
        let zone = resistance(28.0, 29.0, 0.5);
        let bars = bars_from_closes(&[28.5, 28.8, 29.6, 30.1, 30.5], 1_600_000.0);
        let config = ScoringConfig::default();

        let full = bullish_snapshot(1_000_000.0);
        let without_rsi = IndicatorSnapshot { rsi: None, ..full.clone() };

        let a = score_breakout(&zone, &full, &bars, BreakDirection::Breakout, &config).unwrap();
        let b = score_breakout(&zone, &without_rsi, &bars, BreakDirection::Breakout, &config).unwrap();

        assert_eq!(a.volume_strength, b.volume_strength);
        assert_eq!(a.zone_strength, b.zone_strength);
        assert_eq!(a.pattern_strength, b.pattern_strength);
        assert_ne!(a.momentum_strength, b.momentum_strength);
        assert!(b.momentum_strength.degraded);
        assert_eq!(b.momentum_strength.missing, vec![IndicatorField::Rsi]);
        assert!((b.momentum_strength.value - 0.75).abs() < 1e-12);
        assert!(b.is_degraded());
    }

    #[test]
    fn test_volume_without_averages_is_neutral() {
        let sub = volume_score(1_000.0, &IndicatorSnapshot::default(), 1.5);
        assert!(sub.degraded);
        assert_eq!(sub.value, 0.5);
        assert_eq!(sub.missing.len(), 3);
    }

    #[test]
    fn test_volume_partial_averages() {
        // Young listing: only the 20 and 50 bar averages exist
        let snapshot = IndicatorSnapshot {
            volume_avg_20: Some(1_000.0),
            volume_avg_50: Some(1_200.0),
            ..Default::default()
        };
        let sub = volume_score(1_100.0, &snapshot, 1.5);
        assert!(!sub.degraded);
        assert!((sub.value - 0.15).abs() < 1e-12);
        assert_eq!(sub.missing, vec![IndicatorField::VolumeAvg200]);

        let surge = volume_score(2_000.0, &snapshot, 1.5);
        assert!((surge.value - (0.25 + 0.15 + 0.25)).abs() < 1e-12);
    }

    #[test]
    fn test_rsi_component_bands() {
        assert_eq!(rsi_component(60.0, BreakDirection::Breakout), 1.0);
        assert!((rsi_component(35.0, BreakDirection::Breakout) - 0.5).abs() < 1e-12);
        assert_eq!(rsi_component(15.0, BreakDirection::Breakout), 0.0);
        assert!((rsi_component(85.0, BreakDirection::Breakout) - 0.7).abs() < 1e-12);
        assert!((rsi_component(100.0, BreakDirection::Breakout) - 0.4).abs() < 1e-12);

        // Mirrored for a breakdown
        assert_eq!(rsi_component(40.0, BreakDirection::Breakdown), 1.0);
        assert!((rsi_component(15.0, BreakDirection::Breakdown) - 0.7).abs() < 1e-12);
        assert_eq!(rsi_component(85.0, BreakDirection::Breakdown), 0.0);
    }

    #[test]
    fn test_macd_component() {
        assert_eq!(macd_component(1.0, 0.5, 0.5, Some(0.4), BreakDirection::Breakout), 1.0);
        assert_eq!(macd_component(1.0, 0.5, 0.5, Some(0.6), BreakDirection::Breakout), 0.6);
        assert_eq!(macd_component(0.5, 0.5, 0.0, None, BreakDirection::Breakout), 0.3);
        assert_eq!(macd_component(0.2, 0.5, -0.3, None, BreakDirection::Breakout), 0.0);
        assert_eq!(macd_component(0.2, 0.5, -0.3, None, BreakDirection::Breakdown), 1.0);
    }

    #[test]
    fn test_missing_macd_signal_is_flagged() {
        let snapshot = IndicatorSnapshot {
            rsi: Some(60.0),
            macd: Some(0.4),
            ..Default::default()
        };
        let sub = momentum_score(&snapshot, BreakDirection::Breakout);
        assert!(sub.degraded);
        assert_eq!(sub.missing, vec![IndicatorField::MacdSignal]);
        assert!((sub.value - 0.75).abs() < 1e-12);
    }

    #[test]
    fn test_breakdown_pattern() {
        let mut zone = resistance(48.0, 50.0, 0.6);
        zone.kind = ZoneKind::Support;
        let bars = bars_from_closes(&[49.0, 48.5, 47.5, 47.0], 1_000.0);
        let (sub, failed) = pattern_score(&zone, &bars, BreakDirection::Breakdown, &ScoringConfig::default());
        assert!(!failed);
        // base + one confirmation + hold bonus
        assert!((sub.value - 0.85).abs() < 1e-12);
    }

    #[test]
    fn test_latest_back_inside_is_a_failed_retest() {
        let zone = resistance(28.0, 29.0, 0.6);
        let bars = bars_from_closes(&[28.5, 29.5, 29.8, 28.7], 1_000.0);
        let config = ScoringConfig { failed_retest_cap: 0.2, ..Default::default() };
        let (sub, failed) = pattern_score(&zone, &bars, BreakDirection::Breakout, &config);
        assert!(failed);
        assert_eq!(sub.value, 0.0);
    }

    #[test]
    fn test_lookback_limits_the_pattern_window() {
        let zone = resistance(28.0, 29.0, 0.6);
        // The early failure is outside a 3-bar window
        let bars = bars_from_closes(&[29.5, 28.5, 29.2, 29.4, 29.6], 1_000.0);
        let config = ScoringConfig { pattern_lookback: 3, ..Default::default() };
        let (sub, failed) = pattern_score(&zone, &bars, BreakDirection::Breakout, &config);
        assert!(!failed);
        assert!((sub.value - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_structural_errors() {
        let zone = resistance(28.0, 29.0, 0.5);
        let snapshot = bullish_snapshot(1_000.0);
        let config = ScoringConfig::default();

        assert!(matches!(
            score_breakout(&zone, &snapshot, &[], BreakDirection::Breakout, &config),
            Err(AnalysisError::InsufficientHistory(_))
        ));

        let bars = bars_from_closes(&[30.0], 1_000.0);
        let inverted = resistance(29.0, 28.0, 0.5);
        assert!(matches!(
            score_breakout(&inverted, &snapshot, &bars, BreakDirection::Breakout, &config),
            Err(AnalysisError::InvalidInput(_))
        ));

        let mut bad_bars = bars.clone();
        bad_bars[0].close = f64::NAN;
        assert!(matches!(
            score_breakout(&zone, &snapshot, &bad_bars, BreakDirection::Breakout, &config),
            Err(AnalysisError::InvalidInput(_))
        ));

        let mut bad_weights = config;
        bad_weights.weights.zone = -1.0;
        assert!(score_breakout(&zone, &snapshot, &bars, BreakDirection::Breakout, &bad_weights).is_err());
    }

    #[test]
    fn test_custom_weights() {
        let zone = resistance(28.0, 29.0, 0.0);
        let bars = bars_from_closes(&[28.5, 28.8, 29.6, 30.1, 30.5], 1_600_000.0);
        let mut config = ScoringConfig::default();
        config.weights.zone = 0.0;

        let report = score_breakout(
            &zone,
            &bullish_snapshot(1_000_000.0),
            &bars,
            BreakDirection::Breakout,
            &config,
        )
        .unwrap();
        assert!((report.overall - 1.0).abs() < 1e-12);
        assert_eq!(report.interpretation, Interpretation::VeryHigh);
    }

    #[test]
    fn test_subscores_stay_in_unit_range() {
        let zone = resistance(28.0, 29.0, 0.5);
        let closes = [28.0, 31.0, 27.0, 33.0, 26.0, 34.0];
        let bars = bars_from_closes(&closes, 9_000_000.0);
        let snapshot = IndicatorSnapshot {
            rsi: Some(99.0),
            macd: Some(-5.0),
            macd_signal: Some(5.0),
            macd_histogram: Some(-10.0),
            prev_macd_histogram: Some(4.0),
            volume_avg_20: Some(1.0),
            volume_avg_50: Some(1.0),
            volume_avg_200: Some(1.0),
            ..Default::default()
        };
        for direction in [BreakDirection::Breakout, BreakDirection::Breakdown] {
            let report = score_breakout(&zone, &snapshot, &bars, direction, &ScoringConfig::default()).unwrap();
            for sub in [
                &report.volume_strength,
                &report.zone_strength,
                &report.momentum_strength,
                &report.pattern_strength,
            ] {
                assert!((0.0..=1.0).contains(&sub.value));
            }
            assert!((0.0..=1.0).contains(&report.overall));
        }
    }
}
