//! Runtime types.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use geofuse_core::{GeoCandidate, Result, Source};
use geofuse_estimators::{Estimator, FailureKind, ImageRef};
use geofuse_fusion::RankedResult;
use serde::Serialize;
use uuid::Uuid;

/// Lifecycle of an orchestration job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    /// Waiting for an admission slot.
    Pending,
    /// Estimators in flight.
    Running,
    /// Clustering, fusing and ranking.
    Fusing,
    Completed,
    Failed,
}

/// What happened to one estimator within a job.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum EstimatorOutcome {
    Success { candidates: usize },
    Failed { kind: FailureKind, message: String },
    /// Stopped once the job already had enough to go on.
    Cancelled,
}

impl EstimatorOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            Self::Failed { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}

/// One row of the diagnostics manifest.
#[derive(Debug, Clone, Serialize)]
pub struct ManifestEntry {
    pub estimator: String,
    pub source: Source,
    #[serde(flatten)]
    pub outcome: EstimatorOutcome,
    /// Attempts that ran to completion, retries included.
    pub attempts: u32,
    pub elapsed_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_hint_ms: Option<u64>,
}

/// Diagnostics for a finished job. Never shown to end users.
#[derive(Debug, Clone, Serialize)]
pub struct JobManifest {
    pub job_id: Uuid,
    pub image_sha256: String,
    pub state: JobState,
    pub created_at: DateTime<Utc>,
    pub elapsed_ms: u64,
    pub deadline_ms: u64,
    pub entries: Vec<ManifestEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JobManifest {
    pub fn entry(&self, source: Source) -> Option<&ManifestEntry> {
        self.entries.iter().find(|e| e.source == source)
    }

    pub fn succeeded(&self) -> usize {
        self.entries.iter().filter(|e| e.outcome.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| matches!(e.outcome, EstimatorOutcome::Failed { .. }))
            .count()
    }

    /// `estimator=Kind` pairs for every failed estimator.
    pub fn failure_summary(&self) -> String {
        self.entries
            .iter()
            .filter_map(|e| {
                e.outcome
                    .failure_kind()
                    .map(|kind| format!("{}={}", e.estimator, kind))
            })
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Input to `Orchestrator::run`.
#[derive(Clone)]
pub struct JobRequest {
    pub image: ImageRef,
    pub context: Option<String>,
    /// Replaces the orchestrator's configured set when present.
    pub estimators: Option<Vec<Arc<dyn Estimator>>>,
    /// Added on top of the enabled set, e.g. an upstream EXIF fix.
    pub extra: Vec<Arc<dyn Estimator>>,
    /// Overrides the configured job deadline.
    pub deadline: Option<Duration>,
}

impl JobRequest {
    pub fn new(image: ImageRef) -> Self {
        Self {
            image,
            context: None,
            estimators: None,
            extra: Vec::new(),
            deadline: None,
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        let context = context.into();
        if !context.trim().is_empty() {
            self.context = Some(context);
        }
        self
    }

    pub fn with_estimators(mut self, estimators: Vec<Arc<dyn Estimator>>) -> Self {
        self.estimators = Some(estimators);
        self
    }

    pub fn with_extra(mut self, estimator: Arc<dyn Estimator>) -> Self {
        self.extra.push(estimator);
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

/// Everything a finished job produced.
#[derive(Debug)]
pub struct JobReport {
    pub manifest: JobManifest,
    /// Candidates gathered from successful estimators, before validation.
    pub candidates: Vec<GeoCandidate>,
    pub outcome: Result<RankedResult>,
}

impl JobReport {
    pub fn job_id(&self) -> Uuid {
        self.manifest.job_id
    }

    pub fn into_result(self) -> Result<RankedResult> {
        self.outcome
    }
}
