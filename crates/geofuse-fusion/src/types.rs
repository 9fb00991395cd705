//! Fusion types.

use geofuse_core::geo::{haversine_m, weighted_spherical_mean};
use geofuse_core::{GeoCandidate, Source};
use serde::Serialize;

/// Candidates judged to denote the same place.
#[derive(Debug, Clone, PartialEq)]
pub struct Cluster {
    /// Members in stable (source, coordinate) order.
    pub members: Vec<GeoCandidate>,
    /// Unweighted spherical centroid.
    pub centroid: (f64, f64),
    /// Maximum pairwise great-circle distance in meters.
    pub span_m: f64,
}

impl Cluster {
    /// Build a cluster from a non-empty, already ordered member list.
    pub fn from_members(members: Vec<GeoCandidate>) -> Self {
        let points: Vec<(f64, f64, f64)> = members
            .iter()
            .map(|c| (c.latitude, c.longitude, 1.0))
            .collect();
        let centroid = weighted_spherical_mean(&points)
            .or_else(|| members.first().map(|c| (c.latitude, c.longitude)))
            .unwrap_or((0.0, 0.0));

        let mut span_m: f64 = 0.0;
        for (i, a) in members.iter().enumerate() {
            for b in &members[i + 1..] {
                span_m = span_m.max(haversine_m(a.latitude, a.longitude, b.latitude, b.longitude));
            }
        }

        Self {
            members,
            centroid,
            span_m,
        }
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Distinct sources in this cluster, in source order.
    pub fn distinct_sources(&self) -> Vec<Source> {
        let mut sources: Vec<Source> = self.members.iter().map(|c| c.source).collect();
        sources.sort();
        sources.dedup();
        sources
    }
}

/// Coarse precision bucket derived from a cluster's span.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AccuracyClass {
    High,
    Medium,
    Low,
}

impl AccuracyClass {
    pub fn from_span(span_m: f64, high_max_m: f64, medium_max_m: f64) -> Self {
        if span_m <= high_max_m {
            Self::High
        } else if span_m <= medium_max_m {
            Self::Medium
        } else {
            Self::Low
        }
    }

    /// Higher is better.
    pub fn rank(&self) -> u8 {
        match self {
            Self::High => 2,
            Self::Medium => 1,
            Self::Low => 0,
        }
    }
}

impl std::fmt::Display for AccuracyClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::High => write!(f, "high"),
            Self::Medium => write!(f, "medium"),
            Self::Low => write!(f, "low"),
        }
    }
}

/// One location after fusion.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FusedEstimate {
    pub latitude: f64,
    pub longitude: f64,
    /// Calibrated confidence in [0, 1].
    pub confidence: f64,
    pub accuracy_class: AccuracyClass,
    /// Distinct contributing sources, heaviest first.
    pub contributing_sources: Vec<Source>,
    pub span_m: f64,
    pub member_count: usize,
    /// Summed member weight before normalization.
    pub total_weight: f64,
    /// Every member fell below the raw confidence floor.
    pub low_confidence: bool,
    /// Confidence reached the reliability threshold.
    pub is_reliable: bool,
}

impl FusedEstimate {
    pub fn is_corroborated(&self) -> bool {
        self.contributing_sources.len() >= 2
    }
}

/// Ranked output handed back to the caller.
#[derive(Debug, Clone, Serialize)]
pub struct RankedResult {
    pub primary: FusedEstimate,
    /// Estimates that cleared the threshold, excluding the primary.
    pub alternatives: Vec<FusedEstimate>,
    /// Estimates below the threshold. Never promoted to alternatives.
    pub rejected: Vec<FusedEstimate>,
    /// No estimate cleared the threshold (or the primary cluster was weak)
    /// and the primary is a best guess.
    pub low_confidence: bool,
    /// Human-readable summary of which sources contributed.
    pub reasoning: String,
    /// Diagnostics only; never feeds back into confidence.
    pub validation: ValidationMetrics,
}

/// Cross-checks on a ranked result.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ValidationMetrics {
    /// 1.0 when the alternatives sit on top of the primary, falling toward
    /// 0 as their mean distance grows. 1.0 without alternatives.
    pub consistency_score: f64,
    /// The primary lies in the open ocean box that null-island style
    /// placeholder coordinates land in.
    pub outlier_detection: bool,
}
