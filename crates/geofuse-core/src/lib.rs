//! GeoFuse Core — candidate model, reliability priors, geodesy, configuration.

pub mod candidate;
pub mod config;
pub mod error;
pub mod geo;

pub use candidate::{GeoCandidate, ReliabilityPriors, Source};
pub use config::{
    BelowThresholdPolicy, EndpointSettings, FusionSettings, GeoFuseConfig, OrchestrationSettings,
    ServerSettings,
};
pub use error::{Error, Result};
