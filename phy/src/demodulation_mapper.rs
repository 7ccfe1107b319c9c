//! Soft demodulation mapper
//!
//! Max-log LLRs of the constellations in [`crate::modulation`], evaluated per
//! PAM axis and quantized to [`LogLikelihoodRatio`].

use crate::log_likelihood_ratio::LogLikelihoodRatio;
use crate::modulation::{axis_level, bits_per_axis, modulation_scaling};
use common::ModulationScheme;
use num_complex::Complex32;

/// Maximum number of bits on one constellation axis (256QAM)
const MAX_BITS_PER_AXIS: usize = 4;

/// Real-valued LLR magnitude mapped onto `LLR_MAX`
pub fn llr_range_limit(modulation: ModulationScheme) -> f32 {
    match modulation {
        ModulationScheme::PiHalfBpsk | ModulationScheme::Bpsk | ModulationScheme::Qpsk => 24.0,
        ModulationScheme::Qam16 | ModulationScheme::Qam64 => 20.0,
        ModulationScheme::Qam256 => 24.0,
    }
}

/// Divide a distance difference by the noise variance
///
/// Zero noise saturates in the direction of the difference.
fn scale_by_noise(distance_difference: f32, noise_var: f32) -> f32 {
    if noise_var.is_infinite() || noise_var.is_nan() {
        0.0
    } else if noise_var > 0.0 {
        distance_difference / noise_var
    } else if distance_difference == 0.0 {
        0.0
    } else {
        distance_difference.signum() * f32::INFINITY
    }
}

/// Real LLRs of the bits carried on one axis
fn axis_llrs(x: f32, nof_bits: usize, scale: f32, noise_var: f32, llrs: &mut [f32]) {
    let mut min_zero = [f32::INFINITY; MAX_BITS_PER_AXIS];
    let mut min_one = [f32::INFINITY; MAX_BITS_PER_AXIS];

    for label in 0..(1usize << nof_bits) {
        let bits = (0..nof_bits).map(|b| ((label >> (nof_bits - 1 - b)) & 1) as u8);
        let level = scale * axis_level(bits);
        let distance = (x - level) * (x - level);

        for b in 0..nof_bits {
            if (label >> (nof_bits - 1 - b)) & 1 == 0 {
                min_zero[b] = min_zero[b].min(distance);
            } else {
                min_one[b] = min_one[b].min(distance);
            }
        }
    }

    for (b, llr) in llrs.iter_mut().enumerate().take(nof_bits) {
        *llr = scale_by_noise(min_one[b] - min_zero[b], noise_var);
    }
}

/// Demodulate one equalized symbol and append its soft bits
///
/// `noise_var` is the post-equalization noise variance of the symbol and
/// `symbol_index` its position in the layer, used to undo the pi/2-BPSK
/// rotation.
pub fn demodulate_symbol(
    symbol: Complex32,
    noise_var: f32,
    modulation: ModulationScheme,
    symbol_index: usize,
    llrs: &mut Vec<LogLikelihoodRatio>,
) {
    let range_limit = llr_range_limit(modulation);
    let scale = modulation_scaling(modulation);

    match modulation {
        ModulationScheme::Bpsk | ModulationScheme::PiHalfBpsk => {
            let symbol = if modulation == ModulationScheme::PiHalfBpsk && symbol_index % 2 == 1 {
                symbol * Complex32::new(0.0, -1.0)
            } else {
                symbol
            };
            // |y + c|^2 - |y - c|^2 with c = scale * (1 + 1j)
            let difference = 4.0 * scale * (symbol.re + symbol.im);
            llrs.push(LogLikelihoodRatio::quantize(
                scale_by_noise(difference, noise_var),
                range_limit,
            ));
        }
        _ => {
            let nof_bits = bits_per_axis(modulation);
            let mut llr_i = [0.0; MAX_BITS_PER_AXIS];
            let mut llr_q = [0.0; MAX_BITS_PER_AXIS];
            axis_llrs(symbol.re, nof_bits, scale, noise_var, &mut llr_i);
            axis_llrs(symbol.im, nof_bits, scale, noise_var, &mut llr_q);

            for b in 0..nof_bits {
                llrs.push(LogLikelihoodRatio::quantize(llr_i[b], range_limit));
                llrs.push(LogLikelihoodRatio::quantize(llr_q[b], range_limit));
            }
        }
    }
}

/// Demodulate a sequence of symbols with per-symbol noise variances
pub fn demodulate_soft(
    symbols: &[Complex32],
    noise_vars: &[f32],
    modulation: ModulationScheme,
) -> Vec<LogLikelihoodRatio> {
    let mut llrs = Vec::with_capacity(symbols.len() * modulation.bits_per_symbol());
    for (index, (&symbol, &noise_var)) in symbols.iter().zip(noise_vars).enumerate() {
        demodulate_symbol(symbol, noise_var, modulation, index, &mut llrs);
    }
    llrs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modulation::modulate;

    const ALL_MODULATIONS: [ModulationScheme; 6] = [
        ModulationScheme::PiHalfBpsk,
        ModulationScheme::Bpsk,
        ModulationScheme::Qpsk,
        ModulationScheme::Qam16,
        ModulationScheme::Qam64,
        ModulationScheme::Qam256,
    ];

    fn pattern_bits(count: usize) -> Vec<u8> {
        (0..count).map(|i| ((i * 7 + i / 3) % 2) as u8).collect()
    }

    #[test]
    fn test_signs_match_transmitted_bits() {
        for modulation in ALL_MODULATIONS {
            let bits = pattern_bits(modulation.bits_per_symbol() * 32);
            let symbols = modulate(&bits, modulation).unwrap();
            let llrs = demodulate_soft(&symbols, &vec![0.01; symbols.len()], modulation);

            assert_eq!(llrs.len(), bits.len());
            for (llr, &bit) in llrs.iter().zip(&bits) {
                assert!(!llr.is_zero(), "{}", modulation);
                assert_eq!(llr.hard_decision(), bit, "{}", modulation);
            }
        }
    }

    #[test]
    fn test_zero_noise_saturates() {
        let bits = [0, 1, 1, 0];
        let symbols = modulate(&bits, ModulationScheme::Qpsk).unwrap();
        let llrs = demodulate_soft(&symbols, &[0.0, 0.0], ModulationScheme::Qpsk);

        let values: Vec<i8> = llrs.iter().map(|llr| llr.value()).collect();
        assert_eq!(values, vec![120, -120, -120, 120]);
    }

    #[test]
    fn test_infinite_noise_erases() {
        let symbols = [Complex32::new(0.7, -0.7)];
        let llrs = demodulate_soft(&symbols, &[f32::INFINITY], ModulationScheme::Qpsk);
        assert!(llrs.iter().all(|llr| llr.is_zero()));
    }

    #[test]
    fn test_qpsk_llr_scales_with_noise() {
        let s = std::f32::consts::FRAC_1_SQRT_2;
        // LLR = 4 * s * x / noise = 2 for x = s, noise = 1
        let llrs = demodulate_soft(&[Complex32::new(s, s)], &[1.0], ModulationScheme::Qpsk);
        assert_eq!(llrs[0].value(), 10);

        let weaker = demodulate_soft(&[Complex32::new(s, s)], &[2.0], ModulationScheme::Qpsk);
        assert_eq!(weaker[0].value(), 5);
    }
}
