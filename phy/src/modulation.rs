//! Modulation mapper
//!
//! Constellations of 3GPP TS 38.211 Section 5.1. Bits are given one per byte.
//! Even bits select the in-phase level, odd bits the quadrature level.

use crate::PhyError;
use common::ModulationScheme;
use num_complex::Complex32;

/// Amplitude normalisation giving unit average symbol energy
pub fn modulation_scaling(modulation: ModulationScheme) -> f32 {
    match modulation {
        ModulationScheme::PiHalfBpsk | ModulationScheme::Bpsk | ModulationScheme::Qpsk => {
            std::f32::consts::FRAC_1_SQRT_2
        }
        ModulationScheme::Qam16 => 1.0 / 10.0_f32.sqrt(),
        ModulationScheme::Qam64 => 1.0 / 42.0_f32.sqrt(),
        ModulationScheme::Qam256 => 1.0 / 170.0_f32.sqrt(),
    }
}

/// Number of bits mapped onto each of the I and Q axes of a QAM constellation
pub(crate) fn bits_per_axis(modulation: ModulationScheme) -> usize {
    (modulation.bits_per_symbol() / 2).max(1)
}

/// Unnormalised PAM level of one axis
///
/// For 16QAM the in-phase level is `(1 - 2 b0)(2 - (1 - 2 b2))`, and the
/// same nesting extends to 64QAM and 256QAM.
pub(crate) fn axis_level(bits: impl DoubleEndedIterator<Item = u8> + ExactSizeIterator) -> f32 {
    let nof_bits = bits.len();
    let mut level = 1.0;
    let mut first_sign = 1.0;

    for (i, bit) in bits.enumerate().rev() {
        let sign = 1.0 - 2.0 * (bit & 1) as f32;
        if i == 0 {
            first_sign = sign;
        } else {
            let weight = (1u32 << (nof_bits - i)) as f32;
            level = weight - sign * level;
        }
    }

    first_sign * level
}

/// Map the bits of one symbol
///
/// `symbol_index` only matters for pi/2-BPSK, where odd symbols are rotated
/// by 90 degrees.
pub fn modulate_symbol(
    bits: &[u8],
    modulation: ModulationScheme,
    symbol_index: usize,
) -> Complex32 {
    let scale = modulation_scaling(modulation);

    match modulation {
        ModulationScheme::Bpsk | ModulationScheme::PiHalfBpsk => {
            let a = scale * (1.0 - 2.0 * (bits[0] & 1) as f32);
            let symbol = Complex32::new(a, a);
            if modulation == ModulationScheme::PiHalfBpsk && symbol_index % 2 == 1 {
                symbol * Complex32::i()
            } else {
                symbol
            }
        }
        _ => {
            let i = axis_level(bits.iter().step_by(2).copied());
            let q = axis_level(bits.iter().skip(1).step_by(2).copied());
            Complex32::new(scale * i, scale * q)
        }
    }
}

/// Map a bit sequence onto modulation symbols
pub fn modulate(bits: &[u8], modulation: ModulationScheme) -> Result<Vec<Complex32>, PhyError> {
    let bits_per_symbol = modulation.bits_per_symbol();
    if bits.len() % bits_per_symbol != 0 {
        return Err(PhyError::InvalidArgument(format!(
            "{} bits do not fill an integer number of {} symbols",
            bits.len(),
            modulation
        )));
    }

    Ok(bits
        .chunks_exact(bits_per_symbol)
        .enumerate()
        .map(|(index, symbol_bits)| modulate_symbol(symbol_bits, modulation, index))
        .collect())
}

/// Nearest constellation point of a received symbol
///
/// Pi/2-BPSK symbols must already be de-rotated.
pub fn hard_decision(symbol: Complex32, modulation: ModulationScheme) -> Complex32 {
    let scale = modulation_scaling(modulation);

    match modulation {
        ModulationScheme::Bpsk | ModulationScheme::PiHalfBpsk => {
            let a = if symbol.re + symbol.im >= 0.0 { scale } else { -scale };
            Complex32::new(a, a)
        }
        _ => {
            let max_level = ((1u32 << bits_per_axis(modulation)) - 1) as f32;
            let slice = |x: f32| {
                // Odd integer nearest to x within the constellation
                let level = 2.0 * ((x / scale - 1.0) / 2.0).round() + 1.0;
                scale * level.clamp(-max_level, max_level)
            };
            Complex32::new(slice(symbol.re), slice(symbol.im))
        }
    }
}
