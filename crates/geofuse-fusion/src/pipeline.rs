//! Cluster → fuse → rank, in one call.

use std::sync::Arc;

use geofuse_core::{FusionSettings, GeoCandidate, ReliabilityPriors, Result};
use tracing::info;

use crate::cluster::SpatialClusterer;
use crate::fusion::FusionEngine;
use crate::rank::ResultRanker;
use crate::types::{FusedEstimate, RankedResult};

/// The synchronous back half of a geolocation job.
#[derive(Debug, Clone)]
pub struct FusionPipeline {
    clusterer: SpatialClusterer,
    engine: FusionEngine,
    ranker: ResultRanker,
}

impl FusionPipeline {
    pub fn new(settings: FusionSettings, priors: Arc<ReliabilityPriors>) -> Self {
        let clusterer = SpatialClusterer::new(settings.cluster_distance_m);
        let ranker = ResultRanker::new(settings.min_confidence, settings.below_threshold_policy);
        let engine = FusionEngine::new(settings, priors);
        Self {
            clusterer,
            engine,
            ranker,
        }
    }

    pub fn engine(&self) -> &FusionEngine {
        &self.engine
    }

    /// Cluster and fuse without ranking.
    pub fn fuse(&self, candidates: Vec<GeoCandidate>) -> Vec<FusedEstimate> {
        let clusters = self.clusterer.cluster(candidates);
        self.engine.fuse_all(&clusters)
    }

    /// Run the full back half on gathered candidates.
    pub fn run(&self, candidates: Vec<GeoCandidate>) -> Result<RankedResult> {
        let start = std::time::Instant::now();
        let input = candidates.len();
        let estimates = self.fuse(candidates);
        let clusters = estimates.len();
        let result = self.ranker.rank(estimates)?;

        info!(
            "Fusion complete: candidates={}, clusters={}, confidence={:.3}, duration={}us",
            input,
            clusters,
            result.primary.confidence,
            start.elapsed().as_micros()
        );

        Ok(result)
    }
}
