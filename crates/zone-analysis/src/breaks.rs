use analysis_core::{AnalysisError, Bar, BreakDirection, Zone, ZoneKind};

use crate::zones::validate_price;

/// Whether the latest close has just left `zone`.
///
/// A breakout needs the latest close above `upper` with at least one earlier
/// close in the last `lookback` bars at or below it; a breakdown mirrors that
/// on `lower`. The zone's current kind is not consulted, since a freshly
/// broken resistance is already classified as support by position.
pub fn detect_break(zone: &Zone, recent_bars: &[Bar], lookback: usize) -> Option<BreakDirection> {
    let start = recent_bars.len().saturating_sub(lookback.max(2));
    let window = &recent_bars[start..];
    let (latest, earlier) = window.split_last()?;
    if earlier.is_empty() {
        return None;
    }

    if latest.close > zone.upper && earlier.iter().any(|b| b.close <= zone.upper) {
        Some(BreakDirection::Breakout)
    } else if latest.close < zone.lower && earlier.iter().any(|b| b.close >= zone.lower) {
        Some(BreakDirection::Breakdown)
    } else {
        None
    }
}

/// Flip a zone's role after a confirmed break: broken resistance becomes
/// support and broken support becomes resistance. Distance is recomputed
/// against `current_price`.
pub fn reclassify_after_break(
    zone: &Zone,
    direction: BreakDirection,
    current_price: f64,
) -> Result<Zone, AnalysisError> {
    validate_price(current_price)?;

    let kind = match direction {
        BreakDirection::Breakout => ZoneKind::Support,
        BreakDirection::Breakdown => ZoneKind::Resistance,
    };

    let mut flipped = zone.clone();
    flipped.kind = kind;
    flipped.role_reversed = zone.origin != kind.natural_origin();
    flipped.distance_pct = (zone.middle - current_price) / current_price * 100.0;
    Ok(flipped)
}
