//! Result ranking and the low-confidence fallback.

use std::cmp::Ordering;

use geofuse_core::geo::haversine_m;
use geofuse_core::{BelowThresholdPolicy, Error, Result};
use tracing::{debug, warn};

use crate::types::{FusedEstimate, RankedResult, ValidationMetrics};

/// Mean alternative distance at which consistency drops to one half.
const CONSISTENCY_SCALE_KM: f64 = 10.0;

/// Orders fused estimates and applies the minimum-confidence cutoff.
#[derive(Debug, Clone)]
pub struct ResultRanker {
    min_confidence: f64,
    policy: BelowThresholdPolicy,
}

impl ResultRanker {
    pub fn new(min_confidence: f64, policy: BelowThresholdPolicy) -> Self {
        Self {
            min_confidence,
            policy,
        }
    }

    /// Confidence descending, then accuracy class, then more sources, then
    /// smaller span. Coordinates break any remaining tie.
    pub fn compare(a: &FusedEstimate, b: &FusedEstimate) -> Ordering {
        b.confidence
            .total_cmp(&a.confidence)
            .then_with(|| b.accuracy_class.rank().cmp(&a.accuracy_class.rank()))
            .then_with(|| {
                b.contributing_sources
                    .len()
                    .cmp(&a.contributing_sources.len())
            })
            .then_with(|| a.span_m.total_cmp(&b.span_m))
            .then_with(|| a.latitude.total_cmp(&b.latitude))
            .then_with(|| a.longitude.total_cmp(&b.longitude))
    }

    /// Rank estimates into the output contract.
    ///
    /// Fails with `NoLocationFound` on empty input. When nothing clears the
    /// threshold, the best estimate is returned flagged low confidence, or
    /// `NoConfidentEstimate` under the `Fail` policy.
    pub fn rank(&self, mut estimates: Vec<FusedEstimate>) -> Result<RankedResult> {
        if estimates.is_empty() {
            return Err(Error::NoLocationFound(
                "no valid candidates to rank".into(),
            ));
        }

        estimates.sort_by(Self::compare);

        let (accepted, mut rejected): (Vec<_>, Vec<_>) = estimates
            .into_iter()
            .partition(|e| e.confidence >= self.min_confidence);

        let mut accepted = accepted.into_iter();
        let (primary, alternatives, below_threshold) = match accepted.next() {
            Some(primary) => (primary, accepted.collect::<Vec<_>>(), false),
            None => {
                // Input was non-empty, so everything landed in `rejected`.
                let best = rejected.remove(0);
                if self.policy == BelowThresholdPolicy::Fail {
                    return Err(Error::NoConfidentEstimate {
                        best: best.confidence,
                        threshold: self.min_confidence,
                    });
                }
                warn!(
                    confidence = best.confidence,
                    threshold = self.min_confidence,
                    "No estimate cleared the confidence threshold, returning best guess"
                );
                (best, Vec::new(), true)
            }
        };

        debug!(
            alternatives = alternatives.len(),
            rejected = rejected.len(),
            "Ranked estimates"
        );

        let low_confidence = below_threshold || primary.low_confidence;
        let reasoning = reasoning_trace(&primary, &alternatives, below_threshold, self.min_confidence);
        let validation = validation_metrics(&primary, &alternatives);

        Ok(RankedResult {
            primary,
            alternatives,
            rejected,
            low_confidence,
            reasoning,
            validation,
        })
    }
}

/// Consistency of the alternatives with the primary and the outlier flag.
pub fn validation_metrics(primary: &FusedEstimate, alternatives: &[FusedEstimate]) -> ValidationMetrics {
    let consistency_score = if alternatives.is_empty() {
        1.0
    } else {
        let mean_km = alternatives
            .iter()
            .map(|a| haversine_m(primary.latitude, primary.longitude, a.latitude, a.longitude))
            .sum::<f64>()
            / alternatives.len() as f64
            / 1000.0;
        1.0 / (1.0 + mean_km / CONSISTENCY_SCALE_KM)
    };

    let outlier_detection = primary.latitude > -5.0
        && primary.latitude < 5.0
        && primary.longitude > -170.0
        && primary.longitude < -160.0;

    ValidationMetrics {
        consistency_score,
        outlier_detection,
    }
}

/// Human-readable summary of how the primary estimate came about.
pub fn reasoning_trace(
    primary: &FusedEstimate,
    alternatives: &[FusedEstimate],
    below_threshold: bool,
    threshold: f64,
) -> String {
    let sources: Vec<&str> = primary
        .contributing_sources
        .iter()
        .map(|s| s.as_str())
        .collect();

    let mut out = format!(
        "Location ({:.5}, {:.5}) estimated from {} with confidence {:.2} ({} accuracy).",
        primary.latitude,
        primary.longitude,
        sources.join(", "),
        primary.confidence,
        primary.accuracy_class
    );

    if primary.is_corroborated() {
        out.push_str(&format!(
            " {} independent sources agree within {:.0} m.",
            primary.contributing_sources.len(),
            primary.span_m
        ));
    } else if primary.member_count > 1 {
        out.push_str(&format!(
            " {} candidates from a single source, not independently corroborated.",
            primary.member_count
        ));
    } else {
        out.push_str(" Single uncorroborated candidate.");
    }

    if !alternatives.is_empty() {
        out.push_str(&format!(
            " {} alternative location{} considered.",
            alternatives.len(),
            if alternatives.len() == 1 { "" } else { "s" }
        ));
    }

    if below_threshold {
        out.push_str(&format!(
            " Low confidence: no estimate reached the {:.2} threshold; this is a best guess.",
            threshold
        ));
    } else if primary.low_confidence {
        out.push_str(" Low confidence: every contributing candidate was weak.");
    }

    out
}
