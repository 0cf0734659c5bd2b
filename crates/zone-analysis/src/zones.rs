use analysis_core::{clamp_unit, AnalysisError, Pivot, PivotKind, Zone, ZoneKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::{StrengthParams, ZoneConfig};
use crate::pivots::PivotSet;

/// Where a band sits relative to a reference price
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZonePosition {
    Support,
    Resistance,
    /// The price is inside the band; the zone is neither
    Straddling,
}

impl ZonePosition {
    pub fn classify(lower: f64, upper: f64, price: f64) -> Self {
        if lower > price {
            ZonePosition::Resistance
        } else if upper < price {
            ZonePosition::Support
        } else {
            ZonePosition::Straddling
        }
    }

    pub fn zone_kind(&self) -> Option<ZoneKind> {
        match self {
            ZonePosition::Support => Some(ZoneKind::Support),
            ZonePosition::Resistance => Some(ZoneKind::Resistance),
            ZonePosition::Straddling => None,
        }
    }
}

/// Running accumulator of one price group
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PivotCluster {
    pub count: usize,
    pub sum: f64,
    pub min: f64,
    pub max: f64,
    pub total_volume: f64,
    pub last_touch: DateTime<Utc>,
    pub members: Vec<Pivot>,
}

impl PivotCluster {
    fn start(pivot: Pivot) -> Self {
        Self {
            count: 1,
            sum: pivot.price,
            min: pivot.price,
            max: pivot.price,
            total_volume: pivot.volume.max(0.0),
            last_touch: pivot.timestamp,
            members: vec![pivot],
        }
    }

    pub fn centroid(&self) -> f64 {
        self.sum / self.count as f64
    }

    fn accepts(&self, price: f64, tolerance_percent: f64) -> bool {
        let centroid = self.centroid();
        (price - centroid).abs() <= centroid * tolerance_percent / 100.0
    }

    fn push(&mut self, pivot: Pivot) {
        self.count += 1;
        self.sum += pivot.price;
        self.min = self.min.min(pivot.price);
        self.max = self.max.max(pivot.price);
        if pivot.volume.is_finite() && pivot.volume > 0.0 {
            self.total_volume += pivot.volume;
        }
        if pivot.timestamp > self.last_touch {
            self.last_touch = pivot.timestamp;
        }
        self.members.push(pivot);
    }

    /// Majority member kind; ties go to the kind matching the position
    fn origin(&self, position: ZonePosition) -> PivotKind {
        let highs = self.members.iter().filter(|p| p.kind == PivotKind::High).count();
        let lows = self.count - highs;
        match highs.cmp(&lows) {
            std::cmp::Ordering::Greater => PivotKind::High,
            std::cmp::Ordering::Less => PivotKind::Low,
            std::cmp::Ordering::Equal => match position {
                ZonePosition::Resistance => PivotKind::High,
                ZonePosition::Support | ZonePosition::Straddling => PivotKind::Low,
            },
        }
    }
}

/// Group price-sorted pivots in one greedy pass. A pivot joins the open group
/// when it lies within `tolerance_percent` of the group's running centroid,
/// otherwise it starts a new group. Every group is returned, whatever its size.
///
/// Raising the tolerance never shrinks the group holding the lowest pivot.
/// Later groups carry no such guarantee: a wider earlier group can absorb
/// their first members.
pub fn cluster_pivots<'a, I>(pivots: I, tolerance_percent: f64) -> Vec<PivotCluster>
where
    I: IntoIterator<Item = &'a Pivot>,
{
    let mut sorted: Vec<Pivot> = pivots
        .into_iter()
        .filter(|p| p.price.is_finite() && p.price > 0.0)
        .cloned()
        .collect();
    sorted.sort_by(|a, b| a.price.total_cmp(&b.price));

    sorted.into_iter().fold(Vec::new(), |mut clusters: Vec<PivotCluster>, pivot| {
        match clusters.last_mut().filter(|open| open.accepts(pivot.price, tolerance_percent)) {
            Some(open) => open.push(pivot),
            None => clusters.push(PivotCluster::start(pivot)),
        }
        clusters
    })
}

/// Zones split by role around the reference price
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ZoneSet {
    /// Highest first, so the nearest support leads
    pub support_zones: Vec<Zone>,
    /// Lowest first, so the nearest resistance leads
    pub resistance_zones: Vec<Zone>,
    /// Support and resistance together, ascending by middle
    pub all_zones: Vec<Zone>,
    /// Qualifying groups that contained the reference price
    pub straddling_excluded: usize,
}

impl ZoneSet {
    pub fn nearest_support(&self) -> Option<&Zone> {
        self.support_zones.first()
    }

    pub fn nearest_resistance(&self) -> Option<&Zone> {
        self.resistance_zones.first()
    }

    pub fn is_empty(&self) -> bool {
        self.all_zones.is_empty()
    }
}

pub fn build_zones(
    pivots: &PivotSet,
    current_price: f64,
    config: &ZoneConfig,
) -> Result<ZoneSet, AnalysisError> {
    validate_price(current_price)?;
    if !config.tolerance_percent.is_finite() || config.tolerance_percent < 0.0 {
        return Err(AnalysisError::InvalidInput(format!(
            "tolerance_percent must be finite and non-negative, got {}",
            config.tolerance_percent
        )));
    }

    let clusters = cluster_pivots(pivots.iter(), config.tolerance_percent);
    let mut set = ZoneSet::default();

    for cluster in clusters.into_iter().filter(|c| c.count >= config.min_touches) {
        let position = ZonePosition::classify(cluster.min, cluster.max, current_price);
        let Some(kind) = position.zone_kind() else {
            set.straddling_excluded += 1;
            continue;
        };

        let strength = zone_strength(&cluster, pivots.series_len, pivots.mean_volume, &config.strength);
        let origin = cluster.origin(position);
        let middle = (cluster.max + cluster.min) / 2.0;

        let zone = Zone {
            upper: cluster.max,
            lower: cluster.min,
            middle,
            touch_count: cluster.count,
            strength,
            kind,
            distance_pct: (middle - current_price) / current_price * 100.0,
            total_volume: cluster.total_volume,
            last_touch: cluster.last_touch,
            origin,
            role_reversed: origin != kind.natural_origin(),
            pivots: cluster.members,
        };

        match kind {
            ZoneKind::Support => set.support_zones.push(zone),
            ZoneKind::Resistance => set.resistance_zones.push(zone),
        }
    }

    set.support_zones.sort_by(|a, b| b.middle.total_cmp(&a.middle));
    set.resistance_zones.sort_by(|a, b| a.middle.total_cmp(&b.middle));
    set.all_zones = set
        .support_zones
        .iter()
        .chain(set.resistance_zones.iter())
        .cloned()
        .collect();
    set.all_zones.sort_by(|a, b| a.middle.total_cmp(&b.middle));

    tracing::debug!(
        "built {} support and {} resistance zones around {:.4} ({} straddling)",
        set.support_zones.len(),
        set.resistance_zones.len(),
        current_price,
        set.straddling_excluded
    );
    Ok(set)
}

/// Weighted mean of the touch, volume, width and recency components
pub fn zone_strength(
    cluster: &PivotCluster,
    series_len: usize,
    mean_volume: f64,
    params: &StrengthParams,
) -> f64 {
    let touches = saturate(cluster.count as f64, params.touch_scale);

    let volume = if mean_volume > 0.0 {
        saturate(cluster.total_volume / mean_volume, params.volume_scale)
    } else {
        0.0
    };

    let middle = (cluster.max + cluster.min) / 2.0;
    let width_pct = if middle > 0.0 {
        (cluster.max - cluster.min) / middle * 100.0
    } else {
        0.0
    };
    let width = if params.width_scale > 0.0 {
        1.0 / (1.0 + width_pct / params.width_scale)
    } else {
        0.0
    };

    let recency = if params.recency_scale > 0.0 && !cluster.members.is_empty() {
        let last = series_len.saturating_sub(1);
        cluster
            .members
            .iter()
            .map(|p| (-(last.saturating_sub(p.index) as f64) / params.recency_scale).exp())
            .sum::<f64>()
            / cluster.members.len() as f64
    } else {
        0.0
    };

    let weights = [
        params.touch_weight,
        params.volume_weight,
        params.width_weight,
        params.recency_weight,
    ];
    let total: f64 = weights.iter().filter(|w| **w > 0.0).sum();
    if total <= 0.0 {
        return 0.0;
    }

    let score = [touches, volume, width, recency]
        .iter()
        .zip(weights.iter())
        .filter(|(_, w)| **w > 0.0)
        .map(|(c, w)| c * w)
        .sum::<f64>()
        / total;
    clamp_unit(score)
}

fn saturate(x: f64, scale: f64) -> f64 {
    if scale > 0.0 && x.is_finite() {
        1.0 - (-x / scale).exp()
    } else {
        0.0
    }
}

pub(crate) fn validate_price(price: f64) -> Result<(), AnalysisError> {
    if !price.is_finite() || price <= 0.0 {
        return Err(AnalysisError::InvalidInput(format!(
            "current price must be finite and positive, got {}",
            price
        )));
    }
    Ok(())
}
