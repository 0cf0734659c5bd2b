use analysis_core::{Bar, Pivot, PivotKind};
use serde::{Deserialize, Serialize};

use crate::config::PivotConfig;

/// Swing highs and lows found in one bar series, in chronological order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PivotSet {
    pub pivot_highs: Vec<Pivot>,
    pub pivot_lows: Vec<Pivot>,
    /// Length of the scanned series, so pivot ages can be derived later
    pub series_len: usize,
    /// Mean volume over the scanned series
    pub mean_volume: f64,
}

impl PivotSet {
    pub fn is_empty(&self) -> bool {
        self.pivot_highs.is_empty() && self.pivot_lows.is_empty()
    }

    pub fn len(&self) -> usize {
        self.pivot_highs.len() + self.pivot_lows.len()
    }

    /// Highs and lows together, in no particular order
    pub fn iter(&self) -> impl Iterator<Item = &Pivot> {
        self.pivot_highs.iter().chain(self.pivot_lows.iter())
    }
}

/// Find bars whose high (low) is strictly above (below) every other bar in a
/// `left_bars` / `right_bars` window around them.
///
/// Series too short to hold a single window give an empty set. Bars without a
/// finite positive high and low never become pivots, and they disqualify any
/// candidate whose window they fall in.
pub fn find_pivots(bars: &[Bar], config: &PivotConfig) -> PivotSet {
    let mean_volume = mean_volume(bars);
    let mut set = PivotSet {
        series_len: bars.len(),
        mean_volume,
        ..Default::default()
    };

    if bars.len() < config.min_len() {
        tracing::debug!(
            "{} bars is below the {}-bar pivot window, no pivots",
            bars.len(),
            config.min_len()
        );
        return set;
    }

    for i in config.left_bars..bars.len() - config.right_bars {
        let bar = &bars[i];
        if !bar.is_priced() {
            continue;
        }
        let window = &bars[i - config.left_bars..=i + config.right_bars];
        if window.iter().any(|b| !b.is_priced()) {
            continue;
        }

        let others = window
            .iter()
            .enumerate()
            .filter(|(j, _)| *j != config.left_bars)
            .map(|(_, b)| b);

        let mut is_high = true;
        let mut is_low = true;
        for other in others {
            if other.high >= bar.high {
                is_high = false;
            }
            if other.low <= bar.low {
                is_low = false;
            }
            if !is_high && !is_low {
                break;
            }
        }

        if is_high {
            set.pivot_highs.push(pivot_at(bars, i, PivotKind::High));
        }
        if is_low {
            set.pivot_lows.push(pivot_at(bars, i, PivotKind::Low));
        }
    }

    tracing::debug!(
        "found {} pivot highs and {} pivot lows in {} bars",
        set.pivot_highs.len(),
        set.pivot_lows.len(),
        bars.len()
    );
    set
}

fn pivot_at(bars: &[Bar], index: usize, kind: PivotKind) -> Pivot {
    let bar = &bars[index];
    Pivot {
        index,
        price: match kind {
            PivotKind::High => bar.high,
            PivotKind::Low => bar.low,
        },
        timestamp: bar.timestamp,
        volume: bar.volume,
        kind,
    }
}

fn mean_volume(bars: &[Bar]) -> f64 {
    let volumes: Vec<f64> = bars
        .iter()
        .map(|b| b.volume)
        .filter(|v| v.is_finite() && *v >= 0.0)
        .collect();
    if volumes.is_empty() {
        0.0
    } else {
        volumes.iter().sum::<f64>() / volumes.len() as f64
    }
}
