//! Single-link spatial clustering of candidates.

use std::collections::HashMap;

use geofuse_core::geo::haversine_m;
use geofuse_core::GeoCandidate;
use petgraph::unionfind::UnionFind;
use tracing::{debug, warn};

use crate::types::Cluster;

/// Groups candidates into connected components of the "within `D` meters"
/// graph. Distance is geodesic only; sources play no part.
#[derive(Debug, Clone)]
pub struct SpatialClusterer {
    distance_m: f64,
}

impl SpatialClusterer {
    pub fn new(distance_m: f64) -> Self {
        Self { distance_m }
    }

    pub fn distance_m(&self) -> f64 {
        self.distance_m
    }

    /// Drop candidates with invalid coordinates and normalize the rest.
    pub fn sanitize(candidates: Vec<GeoCandidate>) -> Vec<GeoCandidate> {
        candidates
            .into_iter()
            .filter_map(|c| match c.validated() {
                Ok(c) => Some(c),
                Err(e) => {
                    warn!("Dropping candidate: {}", e);
                    None
                }
            })
            .collect()
    }

    /// Partition candidates into clusters.
    ///
    /// Candidates are validated and sorted by a stable key first, so the
    /// result depends only on the candidate set. Clusters come out in the
    /// order of their first member in that sorted sequence.
    pub fn cluster(&self, candidates: Vec<GeoCandidate>) -> Vec<Cluster> {
        let mut candidates = Self::sanitize(candidates);
        candidates.sort_by(|a, b| a.stable_cmp(b));

        let n = candidates.len();
        if n == 0 {
            return Vec::new();
        }

        let mut components = UnionFind::<usize>::new(n);
        for i in 0..n {
            for j in (i + 1)..n {
                let a = &candidates[i];
                let b = &candidates[j];
                if haversine_m(a.latitude, a.longitude, b.latitude, b.longitude) <= self.distance_m
                {
                    components.union(i, j);
                }
            }
        }

        let mut slot_by_root: HashMap<usize, usize> = HashMap::new();
        let mut groups: Vec<Vec<GeoCandidate>> = Vec::new();
        for (i, candidate) in candidates.into_iter().enumerate() {
            let root = components.find(i);
            let slot = *slot_by_root.entry(root).or_insert_with(|| {
                groups.push(Vec::new());
                groups.len() - 1
            });
            groups[slot].push(candidate);
        }

        debug!(
            "Clustered {} candidates into {} clusters (D={}m)",
            n,
            groups.len(),
            self.distance_m
        );

        groups.into_iter().map(Cluster::from_members).collect()
    }
}
