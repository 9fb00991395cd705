//! Fusion engine — reduce a cluster to one weighted estimate.
//!
//! Member weight is
//! `raw_confidence * prior(source) / (1 + radius / reference_radius)`,
//! so confident, trusted and precise candidates pull hardest. Coordinates
//! are combined as a weighted mean of unit vectors on the sphere.

use std::sync::Arc;

use geofuse_core::geo::weighted_spherical_mean;
use geofuse_core::{FusionSettings, GeoCandidate, ReliabilityPriors, Source};
use tracing::debug;

use crate::types::{AccuracyClass, Cluster, FusedEstimate};

/// Reduces clusters to fused estimates with calibrated confidence.
#[derive(Debug, Clone)]
pub struct FusionEngine {
    settings: FusionSettings,
    priors: Arc<ReliabilityPriors>,
}

impl FusionEngine {
    pub fn new(settings: FusionSettings, priors: Arc<ReliabilityPriors>) -> Self {
        Self { settings, priors }
    }

    pub fn settings(&self) -> &FusionSettings {
        &self.settings
    }

    /// Weight a single member contributes to its cluster.
    pub fn member_weight(&self, candidate: &GeoCandidate) -> f64 {
        let radius = candidate
            .uncertainty_radius_m
            .unwrap_or(self.settings.unknown_radius_m);
        candidate.raw_confidence * self.priors.weight(candidate.source)
            / (1.0 + radius / self.settings.reference_radius_m)
    }

    /// Fuse every cluster, preserving cluster order.
    pub fn fuse_all(&self, clusters: &[Cluster]) -> Vec<FusedEstimate> {
        clusters.iter().map(|c| self.fuse(c)).collect()
    }

    /// Fuse one cluster.
    ///
    /// A cluster made only of weak members is still fused and flagged
    /// `low_confidence`; dropping it is the ranker's call.
    pub fn fuse(&self, cluster: &Cluster) -> FusedEstimate {
        let weights: Vec<f64> = cluster.members.iter().map(|m| self.member_weight(m)).collect();
        let total_weight: f64 = weights.iter().sum();

        // All-zero weights still deserve a location: fall back to uniform.
        let effective: Vec<f64> = if total_weight > 0.0 {
            weights.clone()
        } else {
            vec![1.0; weights.len()]
        };

        let points: Vec<(f64, f64, f64)> = cluster
            .members
            .iter()
            .zip(effective.iter())
            .map(|(m, w)| (m.latitude, m.longitude, *w))
            .collect();

        let (latitude, longitude) = weighted_spherical_mean(&points)
            .unwrap_or_else(|| heaviest_member(&cluster.members, &effective));

        let contributing_sources = sources_by_weight(&cluster.members, &weights);
        let confidence = self.calibrate(total_weight, contributing_sources.len());

        let low_confidence = cluster
            .members
            .iter()
            .all(|m| m.raw_confidence < self.settings.raw_confidence_floor);

        let accuracy_class = AccuracyClass::from_span(
            cluster.span_m,
            self.settings.high_accuracy_span_m,
            self.settings.medium_accuracy_span_m,
        );

        debug!(
            members = cluster.len(),
            total_weight,
            confidence,
            "Fused cluster at ({:.5}, {:.5})",
            latitude,
            longitude
        );

        FusedEstimate {
            latitude,
            longitude,
            confidence,
            accuracy_class,
            contributing_sources,
            span_m: cluster.span_m,
            member_count: cluster.len(),
            total_weight,
            low_confidence,
            is_reliable: confidence >= self.settings.reliable_threshold,
        }
    }

    /// Normalized weight plus a capped corroboration bonus.
    ///
    /// The bonus takes a share of the remaining headroom `1 - base`, so the
    /// result never exceeds 1. A single source, or a cluster with no
    /// weight at all, gets no bonus.
    pub fn calibrate(&self, total_weight: f64, distinct_sources: usize) -> f64 {
        let base = (total_weight / self.settings.confidence_normalization).clamp(0.0, 1.0);
        if distinct_sources < 2 || base == 0.0 {
            return base;
        }
        let share = (self.settings.corroboration_bonus * (distinct_sources - 1) as f64)
            .min(self.settings.max_corroboration_bonus);
        (base + (1.0 - base) * share).min(1.0)
    }
}

/// Distinct sources ordered by summed weight, heaviest first, ties in
/// source order.
fn sources_by_weight(members: &[GeoCandidate], weights: &[f64]) -> Vec<Source> {
    let mut totals: Vec<(Source, f64)> = Vec::new();
    for (member, w) in members.iter().zip(weights) {
        match totals.iter_mut().find(|(s, _)| *s == member.source) {
            Some((_, total)) => *total += w,
            None => totals.push((member.source, *w)),
        }
    }
    totals.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    totals.into_iter().map(|(s, _)| s).collect()
}

fn heaviest_member(members: &[GeoCandidate], weights: &[f64]) -> (f64, f64) {
    members
        .iter()
        .zip(weights)
        .fold(None::<(&GeoCandidate, f64)>, |best, (m, w)| match best {
            Some((_, bw)) if bw >= *w => best,
            _ => Some((m, *w)),
        })
        .map(|(m, _)| (m.latitude, m.longitude))
        .unwrap_or((0.0, 0.0))
}
