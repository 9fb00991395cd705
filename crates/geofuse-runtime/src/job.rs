//! Per-request orchestration job.

use std::time::Duration;

use chrono::{DateTime, Utc};
use geofuse_core::Source;
use geofuse_estimators::ImageRef;
use tokio::time::Instant;
use tracing::debug;
use uuid::Uuid;

use crate::types::{JobManifest, JobState, ManifestEntry};

/// State carried by one geolocation request from arrival to response.
#[derive(Debug)]
pub struct OrchestrationJob {
    id: Uuid,
    image: ImageRef,
    context: Option<String>,
    state: JobState,
    created_at: DateTime<Utc>,
    started: Instant,
    deadline: Instant,
    budget: Duration,
    entries: Vec<ManifestEntry>,
}

impl OrchestrationJob {
    /// A pending job whose deadline starts counting now.
    pub fn new(image: ImageRef, context: Option<String>, budget: Duration) -> Self {
        let started = Instant::now();
        Self {
            id: Uuid::new_v4(),
            image,
            context,
            state: JobState::Pending,
            created_at: Utc::now(),
            started,
            deadline: started.checked_add(budget).unwrap_or_else(|| far_future(started)),
            budget,
            entries: Vec::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn image(&self) -> &ImageRef {
        &self.image
    }

    pub fn context(&self) -> Option<&str> {
        self.context.as_deref()
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn entries(&self) -> &[ManifestEntry] {
        &self.entries
    }

    pub fn transition(&mut self, next: JobState) {
        debug!(job_id = %self.id, from = ?self.state, to = ?next, "Job state change");
        self.state = next;
    }

    pub fn record(&mut self, entry: ManifestEntry) {
        self.entries.push(entry);
    }

    /// Sort entries by source then estimator name, so manifests read the
    /// same whatever order estimators finished in.
    pub fn sort_entries(&mut self) {
        self.entries.sort_by(|a, b| {
            a.source
                .cmp(&b.source)
                .then_with(|| a.estimator.cmp(&b.estimator))
        });
    }

    pub fn succeeded_sources(&self) -> Vec<Source> {
        self.entries
            .iter()
            .filter(|e| e.outcome.is_success())
            .map(|e| e.source)
            .collect()
    }

    /// Snapshot for diagnostics.
    pub fn manifest(&self, error: Option<String>) -> JobManifest {
        JobManifest {
            job_id: self.id,
            image_sha256: self.image.sha256().to_string(),
            state: self.state,
            created_at: self.created_at,
            elapsed_ms: self.elapsed().as_millis() as u64,
            deadline_ms: self.budget.as_millis() as u64,
            entries: self.entries.clone(),
            error,
        }
    }
}

/// Stand-in deadline for budgets too large to add to an `Instant`.
fn far_future(from: Instant) -> Instant {
    from + Duration::from_secs(86_400 * 365 * 30)
}
