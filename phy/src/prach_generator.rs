//! PRACH preamble generator
//!
//! Produces the frequency-domain sequence a PRACH detector expects for a given
//! preamble index and propagation delay. Used to build test waveforms.

use crate::prach::{
    generate_frequency_domain_root, PrachBuffer, PrachDetectorConfig, PreambleLayout,
};
use crate::PhyError;
use num_complex::Complex32;
use rustfft::FftPlanner;
use std::f64::consts::PI;
use tracing::debug;

/// Generate a preamble repeated over `nof_symbols` PRACH symbols
///
/// `delay` is expressed in PRACH sequence samples, one sample lasting
/// `1 / (L * delta_f_RA)`. Fractional delays are allowed.
pub fn generate_prach_preamble(
    config: &PrachDetectorConfig,
    preamble_index: usize,
    delay: f64,
    nof_symbols: usize,
) -> Result<PrachBuffer, PhyError> {
    if preamble_index >= crate::prach::constants::MAX_NUM_PREAMBLES {
        return Err(PhyError::InvalidArgument(format!(
            "Invalid preamble index {}",
            preamble_index
        )));
    }

    let layout = PreambleLayout::new(config.format, config.zero_correlation_zone)?;
    let length = layout.sequence_length;
    let (root_offset, cyclic_shift) = layout.root_and_shift(preamble_index);
    let root = layout.physical_root(config.root_sequence_index as usize + root_offset);

    debug!(
        "Generating PRACH preamble {}: root={}, C_v={}, delay={:.2}",
        preamble_index, root, cyclic_shift, delay
    );

    let mut planner = FftPlanner::new();
    let dft = planner.plan_fft_forward(length);
    let base = generate_frequency_domain_root(dft.as_ref(), root);

    // Cyclic shift advances the sequence, the delay retards it
    let sequence: Vec<Complex32> = base
        .iter()
        .enumerate()
        .map(|(k, &x)| {
            let signed_k = if k <= length / 2 { k as f64 } else { k as f64 - length as f64 };
            let shift_phase = 2.0 * PI * (k * cyclic_shift % length) as f64 / length as f64;
            let delay_phase = -2.0 * PI * signed_k * delay / length as f64;
            x * Complex32::from_polar(1.0, (shift_phase + delay_phase) as f32)
        })
        .collect();

    PrachBuffer::from_symbols(&vec![sequence; nof_symbols.max(1)])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prach::PrachFormat;

    #[test]
    fn test_preamble_has_unit_energy_per_sample() {
        let config = PrachDetectorConfig::default();
        let buffer = generate_prach_preamble(&config, 5, 3.5, 2).unwrap();

        assert!(buffer.is_long());
        assert_eq!(buffer.nof_symbols(), 2);
        let energy: f32 = buffer.symbol(1).unwrap().iter().map(|x| x.norm_sqr()).sum();
        assert!((energy / 839.0 - 1.0).abs() < 1e-3);
    }

    #[test]
    fn test_short_format_preamble() {
        let config = PrachDetectorConfig {
            format: PrachFormat::FormatA1,
            zero_correlation_zone: 5,
            ..Default::default()
        };
        let buffer = generate_prach_preamble(&config, 0, 0.0, 1).unwrap();
        assert_eq!(buffer.sequence_length(), 139);
    }

    #[test]
    fn test_invalid_preamble_index() {
        let config = PrachDetectorConfig::default();
        assert!(generate_prach_preamble(&config, 64, 0.0, 1).is_err());
    }
}
