//! Configuration surface consumed by the pipeline and the server.
//!
//! Loaded once at startup from an optional JSON file, then overridden by
//! `GEOFUSE_*` environment variables. Every field has a default so a
//! partial file is valid.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::candidate::{ReliabilityPriors, Source};
use crate::error::{Error, Result};

/// What the ranker does when no estimate clears the minimum confidence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BelowThresholdPolicy {
    /// Return the best estimate anyway, flagged as low confidence.
    BestGuess,
    /// Fail the request with `NoConfidentEstimate`.
    Fail,
}

impl Default for BelowThresholdPolicy {
    fn default() -> Self {
        Self::BestGuess
    }
}

/// HTTP listener and ingress limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Maximum accepted upload size in bytes.
    #[serde(default = "default_max_image_bytes")]
    pub max_image_bytes: usize,
    /// Accepted file extensions, upper case.
    #[serde(default = "default_allowed_formats")]
    pub allowed_formats: Vec<String>,
    /// Number of job manifests kept for diagnostics.
    #[serde(default = "default_recent_jobs")]
    pub recent_jobs: usize,
}

fn default_host() -> String {
    "0.0.0.0".into()
}
fn default_port() -> u16 {
    8000
}
fn default_max_image_bytes() -> usize {
    5_000_000
}
fn default_allowed_formats() -> Vec<String> {
    ["JPEG", "PNG", "JPG", "TIFF"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
fn default_recent_jobs() -> usize {
    256
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_image_bytes: default_max_image_bytes(),
            allowed_formats: default_allowed_formats(),
            recent_jobs: default_recent_jobs(),
        }
    }
}

/// Fan-out, timeout, retry and admission settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestrationSettings {
    #[serde(default = "default_estimator_timeout_ms")]
    pub estimator_timeout_ms: u64,
    #[serde(default = "default_job_deadline_ms")]
    pub job_deadline_ms: u64,
    /// Retries after the first attempt for transient failures.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,
    /// Once this many estimators have succeeded, the rest get at most
    /// `quorum_grace_ms` more before being cancelled. `None` waits for all.
    #[serde(default)]
    pub min_viable_estimators: Option<usize>,
    #[serde(default = "default_quorum_grace_ms")]
    pub quorum_grace_ms: u64,
    /// An exact metadata fix satisfies the quorum on its own.
    #[serde(default = "default_true")]
    pub metadata_short_circuit: bool,
}

fn default_estimator_timeout_ms() -> u64 {
    30_000
}
fn default_job_deadline_ms() -> u64 {
    45_000
}
fn default_max_retries() -> u32 {
    3
}
fn default_retry_base_delay_ms() -> u64 {
    200
}
fn default_retry_max_delay_ms() -> u64 {
    2_000
}
fn default_max_concurrent_jobs() -> usize {
    8
}
fn default_quorum_grace_ms() -> u64 {
    250
}
fn default_true() -> bool {
    true
}

impl Default for OrchestrationSettings {
    fn default() -> Self {
        Self {
            estimator_timeout_ms: default_estimator_timeout_ms(),
            job_deadline_ms: default_job_deadline_ms(),
            max_retries: default_max_retries(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            retry_max_delay_ms: default_retry_max_delay_ms(),
            max_concurrent_jobs: default_max_concurrent_jobs(),
            min_viable_estimators: None,
            quorum_grace_ms: default_quorum_grace_ms(),
            metadata_short_circuit: true,
        }
    }
}

impl OrchestrationSettings {
    pub fn estimator_timeout(&self) -> Duration {
        Duration::from_millis(self.estimator_timeout_ms)
    }

    pub fn job_deadline(&self) -> Duration {
        Duration::from_millis(self.job_deadline_ms)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    pub fn retry_max_delay(&self) -> Duration {
        Duration::from_millis(self.retry_max_delay_ms)
    }

    pub fn quorum_grace(&self) -> Duration {
        Duration::from_millis(self.quorum_grace_ms)
    }
}

/// Clustering, fusion and ranking parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FusionSettings {
    /// Single-link distance threshold `D` in meters.
    #[serde(default = "default_cluster_distance_m")]
    pub cluster_distance_m: f64,
    /// Radius normalization in the member weight. A candidate whose radius
    /// equals this contributes half the weight of an exact one.
    #[serde(default = "default_reference_radius_m")]
    pub reference_radius_m: f64,
    /// Radius assumed for weighting when a candidate reports none. Zero
    /// means an unstated radius carries no precision discount.
    #[serde(default = "default_unknown_radius_m")]
    pub unknown_radius_m: f64,
    /// Divisor applied to the summed cluster weight.
    #[serde(default = "default_confidence_normalization")]
    pub confidence_normalization: f64,
    /// Share of the remaining headroom granted per extra distinct source.
    #[serde(default = "default_corroboration_bonus")]
    pub corroboration_bonus: f64,
    #[serde(default = "default_max_corroboration_bonus")]
    pub max_corroboration_bonus: f64,
    /// A cluster whose members all fall below this raw confidence is
    /// flagged low confidence.
    #[serde(default = "default_raw_confidence_floor")]
    pub raw_confidence_floor: f64,
    /// Ranker cutoff; estimates below it are rejected.
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,
    /// Estimates at or above this are marked reliable.
    #[serde(default = "default_reliable_threshold")]
    pub reliable_threshold: f64,
    #[serde(default)]
    pub below_threshold_policy: BelowThresholdPolicy,
    #[serde(default = "default_high_accuracy_span_m")]
    pub high_accuracy_span_m: f64,
    #[serde(default = "default_medium_accuracy_span_m")]
    pub medium_accuracy_span_m: f64,
}

fn default_cluster_distance_m() -> f64 {
    5_000.0
}
fn default_reference_radius_m() -> f64 {
    20_000.0
}
fn default_unknown_radius_m() -> f64 {
    0.0
}
fn default_confidence_normalization() -> f64 {
    1.0
}
fn default_corroboration_bonus() -> f64 {
    0.2
}
fn default_max_corroboration_bonus() -> f64 {
    0.5
}
fn default_raw_confidence_floor() -> f64 {
    0.3
}
fn default_min_confidence() -> f64 {
    0.15
}
fn default_reliable_threshold() -> f64 {
    0.7
}
fn default_high_accuracy_span_m() -> f64 {
    1_000.0
}
fn default_medium_accuracy_span_m() -> f64 {
    20_000.0
}

impl Default for FusionSettings {
    fn default() -> Self {
        Self {
            cluster_distance_m: default_cluster_distance_m(),
            reference_radius_m: default_reference_radius_m(),
            unknown_radius_m: default_unknown_radius_m(),
            confidence_normalization: default_confidence_normalization(),
            corroboration_bonus: default_corroboration_bonus(),
            max_corroboration_bonus: default_max_corroboration_bonus(),
            raw_confidence_floor: default_raw_confidence_floor(),
            min_confidence: default_min_confidence(),
            reliable_threshold: default_reliable_threshold(),
            below_threshold_policy: BelowThresholdPolicy::default(),
            high_accuracy_span_m: default_high_accuracy_span_m(),
            medium_accuracy_span_m: default_medium_accuracy_span_m(),
        }
    }
}

/// Remote endpoint for one estimator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointSettings {
    pub source: Source,
    pub url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    /// Confidence used when the estimator does not score itself.
    #[serde(default = "default_endpoint_confidence")]
    pub default_confidence: f64,
    /// Declared maximum latency, in milliseconds.
    #[serde(default)]
    pub latency_hint_ms: Option<u64>,
}

fn default_endpoint_confidence() -> f64 {
    0.5
}

/// Top-level GeoFuse configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GeoFuseConfig {
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub orchestration: OrchestrationSettings,
    #[serde(default)]
    pub fusion: FusionSettings,
    #[serde(default)]
    pub priors: ReliabilityPriors,
    #[serde(default)]
    pub estimators: Vec<EndpointSettings>,
}

impl GeoFuseConfig {
    /// Load from `path` if it exists, then apply environment overrides and
    /// validate.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) if p.exists() => {
                let data = std::fs::read_to_string(p)?;
                let config: GeoFuseConfig = serde_json::from_str(&data)?;
                info!("Loaded configuration from {}", p.display());
                config
            }
            Some(p) => {
                warn!("Config file {} not found, using defaults", p.display());
                GeoFuseConfig::default()
            }
            None => GeoFuseConfig::default(),
        };
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Apply `GEOFUSE_*` overrides from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary key lookup.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let parse = |key: &str| lookup(key);

        if let Some(v) = parse("GEOFUSE_HOST") {
            self.server.host = v;
        }
        override_parsed(&parse, "GEOFUSE_PORT", &mut self.server.port);
        override_parsed(&parse, "GEOFUSE_MAX_IMAGE_SIZE", &mut self.server.max_image_bytes);
        if let Some(v) = parse("GEOFUSE_ALLOWED_IMAGE_FORMATS") {
            self.server.allowed_formats = v
                .split(',')
                .map(|s| s.trim().to_ascii_uppercase())
                .filter(|s| !s.is_empty())
                .collect();
        }

        override_parsed(&parse, "GEOFUSE_CONFIDENCE_THRESHOLD", &mut self.fusion.min_confidence);
        override_parsed(&parse, "GEOFUSE_RELIABLE_THRESHOLD", &mut self.fusion.reliable_threshold);
        override_parsed(&parse, "GEOFUSE_CLUSTER_DISTANCE_M", &mut self.fusion.cluster_distance_m);

        let mut secs: Option<u64> = None;
        override_parsed_opt(&parse, "GEOFUSE_ESTIMATOR_TIMEOUT_SECS", &mut secs);
        if let Some(s) = secs.take() {
            self.orchestration.estimator_timeout_ms = s.saturating_mul(1000);
        }
        override_parsed_opt(&parse, "GEOFUSE_JOB_DEADLINE_SECS", &mut secs);
        if let Some(s) = secs.take() {
            self.orchestration.job_deadline_ms = s.saturating_mul(1000);
        }
        override_parsed(&parse, "GEOFUSE_MAX_RETRIES", &mut self.orchestration.max_retries);
        override_parsed(
            &parse,
            "GEOFUSE_MAX_CONCURRENT_JOBS",
            &mut self.orchestration.max_concurrent_jobs,
        );

        for source in Source::ALL {
            let prior_key = format!("GEOFUSE_{}_PRIOR", source.as_str().to_ascii_uppercase());
            let mut prior: Option<f64> = None;
            override_parsed_opt(&parse, &prior_key, &mut prior);
            if let Some(weight) = prior {
                self.priors.set_weight(source, weight);
            }

            let key = format!("GEOFUSE_{}_URL", source.as_str().to_ascii_uppercase());
            if let Some(url) = parse(&key) {
                let api_key = parse(&format!(
                    "GEOFUSE_{}_API_KEY",
                    source.as_str().to_ascii_uppercase()
                ));
                match self.estimators.iter_mut().find(|e| e.source == source) {
                    Some(existing) => {
                        existing.url = url;
                        if api_key.is_some() {
                            existing.api_key = api_key;
                        }
                    }
                    None => self.estimators.push(EndpointSettings {
                        source,
                        url,
                        api_key,
                        default_confidence: default_endpoint_confidence(),
                        latency_hint_ms: None,
                    }),
                }
            }
        }
    }

    /// Reject values the pipeline cannot work with. A per-estimator timeout
    /// longer than the job deadline is clamped rather than rejected.
    pub fn validate(&mut self) -> Result<()> {
        self.priors.validate()?;

        let f = &self.fusion;
        let positive = [
            ("cluster_distance_m", f.cluster_distance_m),
            ("reference_radius_m", f.reference_radius_m),
            ("confidence_normalization", f.confidence_normalization),
        ];
        for (name, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(Error::Config(format!("{} must be positive, got {}", name, value)));
            }
        }
        if !(f.unknown_radius_m.is_finite() && f.unknown_radius_m >= 0.0) {
            return Err(Error::Config(format!(
                "unknown_radius_m must be non-negative, got {}",
                f.unknown_radius_m
            )));
        }
        let unit = [
            ("corroboration_bonus", f.corroboration_bonus),
            ("max_corroboration_bonus", f.max_corroboration_bonus),
            ("raw_confidence_floor", f.raw_confidence_floor),
            ("min_confidence", f.min_confidence),
            ("reliable_threshold", f.reliable_threshold),
        ];
        for (name, value) in unit {
            if !(0.0..=1.0).contains(&value) {
                return Err(Error::Config(format!("{} must be in [0, 1], got {}", name, value)));
            }
        }
        if f.high_accuracy_span_m > f.medium_accuracy_span_m {
            return Err(Error::Config(
                "high_accuracy_span_m must not exceed medium_accuracy_span_m".into(),
            ));
        }

        let o = &mut self.orchestration;
        if o.job_deadline_ms == 0 {
            return Err(Error::Config("job_deadline_ms must be positive".into()));
        }
        if o.max_concurrent_jobs == 0 {
            return Err(Error::Config("max_concurrent_jobs must be positive".into()));
        }
        if o.min_viable_estimators == Some(0) {
            return Err(Error::Config("min_viable_estimators must be at least 1".into()));
        }
        if o.estimator_timeout_ms == 0 || o.estimator_timeout_ms > o.job_deadline_ms {
            warn!(
                estimator_timeout_ms = o.estimator_timeout_ms,
                job_deadline_ms = o.job_deadline_ms,
                "Clamping estimator timeout to the job deadline"
            );
            o.estimator_timeout_ms = o.job_deadline_ms;
        }

        for endpoint in &self.estimators {
            if endpoint.url.trim().is_empty() {
                return Err(Error::Config(format!("Empty URL for {} estimator", endpoint.source)));
            }
            if !(0.0..=1.0).contains(&endpoint.default_confidence) {
                return Err(Error::Config(format!(
                    "default_confidence for {} must be in [0, 1]",
                    endpoint.source
                )));
            }
        }

        Ok(())
    }

    /// Save config to disk as pretty JSON.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        info!("Saved configuration to {}", path.display());
        Ok(())
    }
}

fn override_parsed<F, T>(lookup: &F, key: &str, target: &mut T)
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    if let Some(raw) = lookup(key) {
        match raw.trim().parse() {
            Ok(v) => *target = v,
            Err(_) => warn!("Ignoring unparsable {}={}", key, raw),
        }
    }
}

fn override_parsed_opt<F, T>(lookup: &F, key: &str, target: &mut Option<T>)
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    if let Some(raw) = lookup(key) {
        match raw.trim().parse() {
            Ok(v) => *target = Some(v),
            Err(_) => warn!("Ignoring unparsable {}={}", key, raw),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_are_valid() {
        let mut config = GeoFuseConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.orchestration.max_retries, 3);
        assert_eq!(config.fusion.cluster_distance_m, 5_000.0);
        assert_eq!(config.fusion.below_threshold_policy, BelowThresholdPolicy::BestGuess);
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let json = r#"{"fusion": {"min_confidence": 0.4}, "priors": {"visual": 0.5}}"#;
        let config: GeoFuseConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.fusion.min_confidence, 0.4);
        assert_eq!(config.fusion.reference_radius_m, 20_000.0);
        assert_eq!(config.fusion.unknown_radius_m, 0.0);
        assert_eq!(config.priors.visual, 0.5);
        assert_eq!(config.priors.metadata, 0.95);
    }

    #[test]
    fn test_overrides() {
        let mut config = GeoFuseConfig::default();
        config.apply_overrides(lookup(&[
            ("GEOFUSE_PORT", "9100"),
            ("GEOFUSE_CONFIDENCE_THRESHOLD", "0.25"),
            ("GEOFUSE_ESTIMATOR_TIMEOUT_SECS", "5"),
            ("GEOFUSE_MAX_RETRIES", "not-a-number"),
            ("GEOFUSE_ALLOWED_IMAGE_FORMATS", "jpeg, webp"),
            ("GEOFUSE_VISUAL_URL", "http://localhost:9001/estimate"),
            ("GEOFUSE_REASONING_PRIOR", "0.55"),
        ]));
        assert_eq!(config.server.port, 9100);
        assert_eq!(config.fusion.min_confidence, 0.25);
        assert_eq!(config.orchestration.estimator_timeout_ms, 5_000);
        assert_eq!(config.orchestration.max_retries, 3);
        assert_eq!(config.server.allowed_formats, vec!["JPEG", "WEBP"]);
        assert_eq!(config.estimators.len(), 1);
        assert_eq!(config.estimators[0].source, Source::Visual);
        assert_eq!(config.priors.reasoning, 0.55);
        assert_eq!(config.priors.visual, 0.6);
    }

    #[test]
    fn test_huge_seconds_override_saturates() {
        let mut config = GeoFuseConfig::default();
        config.apply_overrides(lookup(&[
            ("GEOFUSE_JOB_DEADLINE_SECS", "18446744073709551615"),
            ("GEOFUSE_ESTIMATOR_TIMEOUT_SECS", "18446744073709551615"),
        ]));
        assert_eq!(config.orchestration.job_deadline_ms, u64::MAX);
        assert_eq!(config.orchestration.estimator_timeout_ms, u64::MAX);
    }

    #[test]
    fn test_out_of_range_prior_override_is_rejected() {
        let mut config = GeoFuseConfig::default();
        config.apply_overrides(lookup(&[("GEOFUSE_LANDMARK_PRIOR", "1.5")]));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_clamps_timeout() {
        let mut config = GeoFuseConfig::default();
        config.orchestration.estimator_timeout_ms = 60_000;
        config.orchestration.job_deadline_ms = 10_000;
        assert!(config.validate().is_ok());
        assert_eq!(config.orchestration.estimator_timeout_ms, 10_000);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = GeoFuseConfig::default();
        config.fusion.cluster_distance_m = -1.0;
        assert!(config.validate().is_err());

        let mut config = GeoFuseConfig::default();
        config.fusion.min_confidence = 1.5;
        assert!(config.validate().is_err());

        let mut config = GeoFuseConfig::default();
        config.orchestration.min_viable_estimators = Some(0);
        assert!(config.validate().is_err());

        let mut config = GeoFuseConfig::default();
        config.fusion.unknown_radius_m = -1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_and_save_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("geofuse.json");

        let mut config = GeoFuseConfig::default();
        config.fusion.cluster_distance_m = 2_500.0;
        config.save(&path).unwrap();

        let loaded = GeoFuseConfig::load(Some(&path)).unwrap();
        assert_eq!(loaded.fusion.cluster_distance_m, 2_500.0);
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = GeoFuseConfig::load(Some(&dir.path().join("absent.json"))).unwrap();
        assert_eq!(config.fusion.min_confidence, 0.15);
    }
}
