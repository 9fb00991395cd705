//! Shared application state.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use geofuse_core::GeoFuseConfig;
use geofuse_estimators::Estimator;
use geofuse_runtime::{JobManifest, Orchestrator};
use parking_lot::RwLock;
use uuid::Uuid;

/// Shared application state accessible from all route handlers.
pub struct AppState {
    pub config: GeoFuseConfig,
    pub orchestrator: Orchestrator,
    pub started_at: Instant,
    recent_jobs: RwLock<VecDeque<JobManifest>>,
}

impl AppState {
    pub fn new(config: GeoFuseConfig, estimators: Vec<Arc<dyn Estimator>>) -> Self {
        let orchestrator = Orchestrator::new(&config, estimators);
        let capacity = config.server.recent_jobs;
        Self {
            config,
            orchestrator,
            started_at: Instant::now(),
            recent_jobs: RwLock::new(VecDeque::with_capacity(capacity)),
        }
    }

    /// Keep a manifest, evicting the oldest beyond the configured capacity.
    pub fn remember(&self, manifest: JobManifest) {
        let capacity = self.config.server.recent_jobs;
        if capacity == 0 {
            return;
        }
        let mut jobs = self.recent_jobs.write();
        while jobs.len() >= capacity {
            jobs.pop_front();
        }
        jobs.push_back(manifest);
    }

    pub fn find_job(&self, id: Uuid) -> Option<JobManifest> {
        self.recent_jobs
            .read()
            .iter()
            .rev()
            .find(|m| m.job_id == id)
            .cloned()
    }

    pub fn recent_job_count(&self) -> usize {
        self.recent_jobs.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geofuse_runtime::JobState;

    fn manifest() -> JobManifest {
        JobManifest {
            job_id: Uuid::new_v4(),
            image_sha256: "ab".into(),
            state: JobState::Completed,
            created_at: chrono::Utc::now(),
            elapsed_ms: 12,
            deadline_ms: 45_000,
            entries: Vec::new(),
            error: None,
        }
    }

    #[test]
    fn test_ring_evicts_oldest() {
        let mut config = GeoFuseConfig::default();
        config.server.recent_jobs = 2;
        let state = AppState::new(config, Vec::new());

        let first = manifest();
        let first_id = first.job_id;
        state.remember(first);
        state.remember(manifest());
        let third = manifest();
        let third_id = third.job_id;
        state.remember(third);

        assert_eq!(state.recent_job_count(), 2);
        assert!(state.find_job(first_id).is_none());
        assert_eq!(state.find_job(third_id).unwrap().job_id, third_id);
    }
}
