//! Uplink Physical Layer Processing Library
//!
//! Implements the 5G NR uplink receive algorithms according to 3GPP TS 38.211:
//! PRACH preamble detection, multiport channel estimation from DM-RS and PUSCH
//! soft demodulation. Every processor is stateless across calls.

pub mod channel_equalizer;
pub mod channel_estimate;
pub mod demodulation_mapper;
pub mod dmrs;
pub mod log_likelihood_ratio;
pub mod modulation;
pub mod port_channel_estimator;
pub mod prach;
pub mod prach_detector;
pub mod prach_generator;
pub mod pseudo_random;
pub mod pusch_demodulator;
pub mod resource_grid;

// Re-export commonly used types
pub use channel_equalizer::EqualizerAlgorithm;
pub use channel_estimate::{ChannelEstimate, ChannelEstimateDimensions, PortMetrics};
pub use log_likelihood_ratio::LogLikelihoodRatio;
pub use port_channel_estimator::{
    estimate_channel, LayerDmrsPattern, PortChannelEstimator, PortChannelEstimatorConfig,
};
pub use prach::{PrachBuffer, PrachDetectorConfig, PrachFormat, RestrictedSetConfig};
pub use prach_detector::{
    detect_prach, PrachDetectionOutcome, PrachDetectionResult, PrachDetector, PreambleIndication,
};
pub use pusch_demodulator::{
    demodulate_pusch, pusch_processor_capabilities, DemodulationStats, PuschDemodulator,
    PuschDemodulatorConfig, PuschDemodulatorResult, PuschProcessorCapabilities,
};
pub use resource_grid::ResourceGrid;

use common::ParseError;
use thiserror::Error;

/// Errors reported by the PHY processors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PhyError {
    /// Malformed shapes, count mismatches or unsupported values. Always caller-fixable.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The processing completed but found nothing to report
    #[error("Not found: {0}")]
    NotFound(String),

    /// The requested configuration is recognised but not implemented
    #[error("Unsupported: {0}")]
    Unsupported(String),
}

impl From<ParseError> for PhyError {
    fn from(err: ParseError) -> Self {
        PhyError::InvalidArgument(err.to_string())
    }
}
