//! Runtime — gateway, job lifecycle and orchestration.
//!
//! The orchestrator fans a request out to every enabled estimator through
//! the gateway, gathers whatever arrives before the deadline and hands the
//! candidates to the fusion pipeline.

pub mod gateway;
pub mod job;
pub mod orchestrator;
pub mod types;

pub use gateway::{EstimatorGateway, GatewayOutcome, RetryPolicy};
pub use job::OrchestrationJob;
pub use orchestrator::Orchestrator;
pub use types::*;
