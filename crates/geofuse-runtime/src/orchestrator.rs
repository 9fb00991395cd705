//! Orchestrator — fans a request out to every estimator and fuses what
//! comes back before the deadline.

use std::sync::Arc;
use std::time::Duration;

use geofuse_core::{Error, GeoCandidate, GeoFuseConfig, OrchestrationSettings, Source};
use geofuse_estimators::{Estimator, FailureKind};
use geofuse_fusion::FusionPipeline;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::gateway::{EstimatorGateway, GatewayOutcome};
use crate::job::OrchestrationJob;
use crate::types::*;

/// Why the gather loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GatherStop {
    /// Every task reported.
    Drained,
    /// Enough estimators succeeded and the grace window ran out.
    Quorum,
    /// The job deadline passed.
    Deadline,
}

/// Coordinates estimator fan-out, the partial-failure policy and the
/// fusion back half. One instance serves all requests.
pub struct Orchestrator {
    settings: OrchestrationSettings,
    gateway: EstimatorGateway,
    pipeline: FusionPipeline,
    estimators: Vec<Arc<dyn Estimator>>,
    permits: Arc<Semaphore>,
}

impl Orchestrator {
    pub fn new(config: &GeoFuseConfig, estimators: Vec<Arc<dyn Estimator>>) -> Self {
        let pipeline = FusionPipeline::new(config.fusion.clone(), Arc::new(config.priors.clone()));
        Self::with_pipeline(config.orchestration.clone(), pipeline, estimators)
    }

    pub fn with_pipeline(
        settings: OrchestrationSettings,
        pipeline: FusionPipeline,
        estimators: Vec<Arc<dyn Estimator>>,
    ) -> Self {
        let names: Vec<&str> = estimators.iter().map(|e| e.name()).collect();
        info!(
            "Orchestrator initialized: estimators=[{}], deadline={}ms, max_concurrent_jobs={}",
            names.join(", "),
            settings.job_deadline_ms,
            settings.max_concurrent_jobs
        );

        Self {
            gateway: EstimatorGateway::from_settings(&settings),
            permits: Arc::new(Semaphore::new(settings.max_concurrent_jobs)),
            settings,
            pipeline,
            estimators,
        }
    }

    pub fn settings(&self) -> &OrchestrationSettings {
        &self.settings
    }

    pub fn estimators(&self) -> &[Arc<dyn Estimator>] {
        &self.estimators
    }

    /// Admission slots currently free.
    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }

    /// Run one geolocation job to completion.
    ///
    /// Always returns a report; the outcome inside is `NoLocationFound` when
    /// no estimator succeeded and `Busy` when no admission slot freed up
    /// before the deadline.
    pub async fn run(&self, request: JobRequest) -> JobReport {
        let JobRequest {
            image,
            context,
            estimators,
            extra,
            deadline,
        } = request;

        let budget = deadline.unwrap_or_else(|| self.settings.job_deadline());
        let mut job = OrchestrationJob::new(image, context, budget);
        let mut enabled = estimators.unwrap_or_else(|| self.estimators.clone());
        enabled.extend(extra);

        info!(
            job_id = %job.id(),
            image = job.image().short_id(),
            estimators = enabled.len(),
            deadline_ms = budget.as_millis() as u64,
            "Job received"
        );

        let admission =
            tokio::time::timeout_at(job.deadline(), self.permits.clone().acquire_owned()).await;
        let _permit = match admission {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => {
                return self.fail(job, Vec::new(), Error::Internal("admission closed".into()));
            }
            Err(_) => {
                let busy = Error::Busy(format!(
                    "{} jobs already running",
                    self.settings.max_concurrent_jobs
                ));
                return self.fail(job, Vec::new(), busy);
            }
        };

        job.transition(JobState::Running);
        let candidates = self.gather(&mut job, enabled).await;

        if job.succeeded_sources().is_empty() {
            let reason = if job.entries().is_empty() {
                "no estimators enabled".to_string()
            } else {
                format!(
                    "all {} estimators failed ({})",
                    job.entries().len(),
                    job.manifest(None).failure_summary()
                )
            };
            return self.fail(job, candidates, Error::NoLocationFound(reason));
        }

        job.transition(JobState::Fusing);
        match self.pipeline.run(candidates.clone()) {
            Ok(result) => {
                job.transition(JobState::Completed);
                info!(
                    job_id = %job.id(),
                    elapsed_ms = job.elapsed().as_millis() as u64,
                    confidence = result.primary.confidence,
                    low_confidence = result.low_confidence,
                    "Job completed"
                );
                JobReport {
                    manifest: job.manifest(None),
                    candidates,
                    outcome: Ok(result),
                }
            }
            Err(e) => self.fail(job, candidates, e),
        }
    }

    /// Dispatch every enabled estimator and collect results until all have
    /// reported, the quorum grace window closes, or the deadline passes.
    /// Estimators still running at that point are aborted and their late
    /// results never observed.
    async fn gather(
        &self,
        job: &mut OrchestrationJob,
        enabled: Vec<Arc<dyn Estimator>>,
    ) -> Vec<GeoCandidate> {
        let deadline = job.deadline();
        let mut tasks = JoinSet::new();
        for (idx, estimator) in enabled.iter().enumerate() {
            let gateway = self.gateway.clone();
            let estimator = Arc::clone(estimator);
            let image = job.image().clone();
            let context = job.context().map(str::to_string);
            tasks.spawn(async move {
                let outcome = gateway
                    .invoke(estimator.as_ref(), &image, context.as_deref(), deadline)
                    .await;
                (idx, outcome)
            });
        }

        let mut finished = vec![false; enabled.len()];
        let mut gathered: Vec<Vec<GeoCandidate>> = vec![Vec::new(); enabled.len()];
        let mut successes = 0usize;
        let mut cutoff: Option<Instant> = None;

        let stop = loop {
            let by_quorum = cutoff.map_or(false, |c| c < deadline);
            let until = cutoff.map_or(deadline, |c| c.min(deadline));

            match tokio::time::timeout_at(until, tasks.join_next()).await {
                Ok(Some(Ok((idx, outcome)))) => {
                    finished[idx] = true;
                    let estimator = enabled[idx].as_ref();
                    if let Some(candidates) = self.record(job, estimator, outcome) {
                        successes += 1;
                        let exact_fix = estimator.source() == Source::Metadata
                            && candidates
                                .iter()
                                .any(|c| c.is_exact() && c.has_valid_coordinates());
                        gathered[idx] = candidates;

                        if cutoff.is_none() && self.quorum_reached(successes, exact_fix) {
                            debug!(
                                job_id = %job.id(),
                                successes,
                                exact_fix,
                                grace_ms = self.settings.quorum_grace_ms,
                                "Quorum reached"
                            );
                            cutoff = Some(
                                Instant::now()
                                    .checked_add(self.settings.quorum_grace())
                                    .unwrap_or(deadline),
                            );
                        }
                    }
                }
                Ok(Some(Err(e))) => {
                    error!(job_id = %job.id(), "Estimator task failed: {}", e);
                }
                Ok(None) => break GatherStop::Drained,
                Err(_) if by_quorum => break GatherStop::Quorum,
                Err(_) => break GatherStop::Deadline,
            }
        };

        tasks.abort_all();

        let elapsed = job.elapsed();
        for (idx, done) in finished.iter().enumerate() {
            if *done {
                continue;
            }
            let estimator = enabled[idx].as_ref();
            let outcome = match stop {
                GatherStop::Quorum => EstimatorOutcome::Cancelled,
                GatherStop::Deadline => {
                    warn!(
                        job_id = %job.id(),
                        estimator = estimator.name(),
                        "Estimator cancelled at job deadline"
                    );
                    EstimatorOutcome::Failed {
                        kind: FailureKind::EstimatorTimeout,
                        message: format!(
                            "still running at the {} ms job deadline",
                            elapsed.as_millis()
                        ),
                    }
                }
                GatherStop::Drained => EstimatorOutcome::Failed {
                    kind: FailureKind::EstimatorUnavailable,
                    message: "estimator task aborted".into(),
                },
            };
            job.record(manifest_entry(estimator, outcome, 0, elapsed));
        }
        job.sort_entries();

        info!(
            job_id = %job.id(),
            succeeded = successes,
            total = enabled.len(),
            stop = ?stop,
            elapsed_ms = elapsed.as_millis() as u64,
            "Estimators gathered"
        );

        gathered.into_iter().flatten().collect()
    }

    /// Record a finished estimator; returns its candidates on success.
    fn record(
        &self,
        job: &mut OrchestrationJob,
        estimator: &dyn Estimator,
        outcome: GatewayOutcome,
    ) -> Option<Vec<GeoCandidate>> {
        let GatewayOutcome {
            result,
            attempts,
            elapsed,
        } = outcome;

        match result {
            Ok(candidates) => {
                if let Some(hint) = estimator.latency_hint() {
                    if elapsed > hint {
                        warn!(
                            estimator = estimator.name(),
                            elapsed_ms = elapsed.as_millis() as u64,
                            hint_ms = hint.as_millis() as u64,
                            "Estimator exceeded its latency hint"
                        );
                    }
                }
                let outcome = EstimatorOutcome::Success {
                    candidates: candidates.len(),
                };
                job.record(manifest_entry(estimator, outcome, attempts, elapsed));
                Some(candidates)
            }
            Err(e) => {
                let outcome = EstimatorOutcome::Failed {
                    kind: e.kind(),
                    message: e.to_string(),
                };
                job.record(manifest_entry(estimator, outcome, attempts, elapsed));
                None
            }
        }
    }

    fn quorum_reached(&self, successes: usize, exact_fix: bool) -> bool {
        (self.settings.metadata_short_circuit && exact_fix)
            || self
                .settings
                .min_viable_estimators
                .map_or(false, |n| successes >= n)
    }

    fn fail(
        &self,
        mut job: OrchestrationJob,
        candidates: Vec<GeoCandidate>,
        error: Error,
    ) -> JobReport {
        job.transition(JobState::Failed);
        warn!(job_id = %job.id(), "Job failed: {}", error);
        JobReport {
            manifest: job.manifest(Some(error.to_string())),
            candidates,
            outcome: Err(error),
        }
    }
}

fn manifest_entry(
    estimator: &dyn Estimator,
    outcome: EstimatorOutcome,
    attempts: u32,
    elapsed: Duration,
) -> ManifestEntry {
    ManifestEntry {
        estimator: estimator.name().to_string(),
        source: estimator.source(),
        outcome,
        attempts,
        elapsed_ms: elapsed.as_millis() as u64,
        latency_hint_ms: estimator.latency_hint().map(|h| h.as_millis() as u64),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geofuse_estimators::{EstimatorError, FixedEstimator, ImageRef};

    fn config() -> GeoFuseConfig {
        let mut config = GeoFuseConfig::default();
        config.orchestration.job_deadline_ms = 2_000;
        config.orchestration.estimator_timeout_ms = 1_000;
        config.orchestration.retry_base_delay_ms = 10;
        config.orchestration.retry_max_delay_ms = 20;
        config
    }

    fn request() -> JobRequest {
        JobRequest::new(ImageRef::new(vec![0xFF, 0xD8, 0xFF], Some("test.jpg".into())))
    }

    fn visual(lat: f64, lon: f64) -> Arc<dyn Estimator> {
        Arc::new(FixedEstimator::new(
            Source::Visual,
            vec![GeoCandidate::new(Source::Visual, lat, lon, 0.6).with_radius(500.0)],
        ))
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_success() {
        let orch = Orchestrator::new(&config(), vec![visual(40.0, -3.7)]);
        let report = orch.run(request()).await;
        assert_eq!(report.manifest.state, JobState::Completed);
        let result = report.into_result().unwrap();
        assert_eq!(result.primary.contributing_sources, vec![Source::Visual]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_estimators_is_no_location() {
        let orch = Orchestrator::new(&config(), Vec::new());
        let report = orch.run(request()).await;
        assert_eq!(report.manifest.state, JobState::Failed);
        assert!(matches!(report.outcome, Err(Error::NoLocationFound(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_recorded_without_aborting() {
        let failing: Arc<dyn Estimator> = Arc::new(FixedEstimator::failing(
            Source::Landmark,
            EstimatorError::InvalidResponse("garbage".into()),
        ));
        let orch = Orchestrator::new(&config(), vec![failing, visual(40.0, -3.7)]);
        let report = orch.run(request()).await;
        assert!(report.outcome.is_ok());
        let entry = report.manifest.entry(Source::Landmark).unwrap();
        assert_eq!(
            entry.outcome.failure_kind(),
            Some(FailureKind::EstimatorInvalidResponse)
        );
        assert_eq!(report.manifest.succeeded(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_extra_estimator_joins_enabled_set() {
        let orch = Orchestrator::new(&config(), vec![visual(48.857, 2.351)]);
        let report = orch
            .run(request().with_extra(Arc::new(FixedEstimator::gps_fix(48.8566, 2.3522))))
            .await;
        let result = report.into_result().unwrap();
        assert_eq!(
            result.primary.contributing_sources,
            vec![Source::Metadata, Source::Visual]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_busy_when_no_slot_frees() {
        let mut config = config();
        config.orchestration.max_concurrent_jobs = 1;
        let slow: Arc<dyn Estimator> = Arc::new(
            FixedEstimator::new(
                Source::Visual,
                vec![GeoCandidate::new(Source::Visual, 1.0, 1.0, 0.5)],
            )
            .with_delay(Duration::from_millis(900)),
        );
        let orch = Arc::new(Orchestrator::new(&config, vec![slow]));

        let first = {
            let orch = Arc::clone(&orch);
            tokio::spawn(async move { orch.run(request()).await })
        };
        tokio::task::yield_now().await;
        assert_eq!(orch.available_permits(), 0);

        let second = orch
            .run(request().with_deadline(Duration::from_millis(100)))
            .await;
        assert!(matches!(second.outcome, Err(Error::Busy(_))));

        let first = first.await.unwrap();
        assert!(first.outcome.is_ok());
        assert_eq!(orch.available_permits(), 1);
    }

    #[test]
    fn test_quorum_rules() {
        let mut config = config();
        config.orchestration.min_viable_estimators = Some(2);
        let orch = Orchestrator::new(&config, Vec::new());
        assert!(orch.quorum_reached(1, true));
        assert!(!orch.quorum_reached(1, false));
        assert!(orch.quorum_reached(2, false));

        config.orchestration.metadata_short_circuit = false;
        config.orchestration.min_viable_estimators = None;
        let orch = Orchestrator::new(&config, Vec::new());
        assert!(!orch.quorum_reached(1, true));
        assert!(!orch.quorum_reached(5, false));
    }
}
