//! PRACH (Physical Random Access Channel) configuration and sequences
//!
//! Preamble formats, zero-correlation-zone tables and Zadoff-Chu root sequences
//! according to 3GPP TS 38.211 Section 6.3.3

use crate::PhyError;
use common::{ParseError, PhyTime};
use ndarray::{s, Array2};
use num_complex::Complex32;
use rustfft::Fft;
use std::str::FromStr;

/// PRACH constants according to 3GPP
pub mod constants {
    /// Long sequence length (for formats 0-3)
    pub const LONG_SEQUENCE_LENGTH: usize = 839;
    /// Short sequence length (for formats A1-C2)
    pub const SHORT_SEQUENCE_LENGTH: usize = 139;
    /// Maximum number of preambles
    pub const MAX_NUM_PREAMBLES: usize = 64;
    /// Basic time unit kappa * T_c in seconds (1 / 30.72 MHz)
    pub const KAPPA_TC: f64 = 1.0 / 30.72e6;
}

use constants::*;

/// Cyclic shift N_cs for formats 0-2, Table 6.3.3.1-5 (unrestricted set)
const NCS_LONG_1_25_KHZ: [u16; 16] = [
    0, 13, 15, 18, 22, 26, 32, 38, 46, 59, 76, 93, 119, 167, 279, 419,
];

/// Cyclic shift N_cs for format 3, Table 6.3.3.1-6 (unrestricted set)
const NCS_LONG_5_KHZ: [u16; 16] = [
    0, 13, 26, 33, 38, 41, 49, 55, 64, 76, 93, 119, 139, 209, 279, 419,
];

/// Cyclic shift N_cs for short formats, Table 6.3.3.1-7 (unrestricted set)
const NCS_SHORT: [u16; 16] = [0, 2, 4, 6, 8, 10, 12, 13, 15, 17, 19, 23, 27, 34, 46, 69];

/// PRACH format type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrachFormat {
    /// Format 0: 839 sequence length, 1ms duration
    Format0,
    /// Format 1: 839 sequence length, 2ms duration
    Format1,
    /// Format 2: 839 sequence length, 4ms duration
    Format2,
    /// Format 3: 839 sequence length, 5 kHz spacing
    Format3,
    /// Format A1: 139 sequence length (short)
    FormatA1,
    /// Format A2: 139 sequence length (short)
    FormatA2,
    /// Format A3: 139 sequence length (short)
    FormatA3,
    /// Format B1: 139 sequence length (short)
    FormatB1,
    /// Format B4: 139 sequence length (short)
    FormatB4,
    /// Format C0: 139 sequence length (short)
    FormatC0,
    /// Format C2: 139 sequence length (short)
    FormatC2,
}

impl PrachFormat {
    /// Check if this is a long preamble format
    pub fn is_long(&self) -> bool {
        matches!(self, Self::Format0 | Self::Format1 | Self::Format2 | Self::Format3)
    }

    /// Get sequence length for this format
    pub fn sequence_length(&self) -> usize {
        if self.is_long() {
            LONG_SEQUENCE_LENGTH
        } else {
            SHORT_SEQUENCE_LENGTH
        }
    }

    /// Get number of PRACH symbols
    pub fn num_symbols(&self) -> usize {
        match self {
            Self::Format0 => 1,
            Self::Format1 => 2,
            Self::Format2 => 4,
            Self::Format3 => 4,
            Self::FormatA1 => 2,
            Self::FormatA2 => 4,
            Self::FormatA3 => 6,
            Self::FormatB1 => 2,
            Self::FormatB4 => 12,
            Self::FormatC0 => 1,
            Self::FormatC2 => 4,
        }
    }

    /// PRACH subcarrier spacing in Hz
    ///
    /// Short formats are evaluated at the 15 kHz numerology.
    pub fn subcarrier_spacing_hz(&self) -> f64 {
        match self {
            Self::Format0 | Self::Format1 | Self::Format2 => 1.25e3,
            Self::Format3 => 5e3,
            _ => 15e3,
        }
    }

    /// Cyclic prefix duration, Tables 6.3.3.1-1 and 6.3.3.1-2
    pub fn cyclic_prefix_duration(&self) -> PhyTime {
        let n_cp = match self {
            Self::Format0 => 3168,
            Self::Format1 => 21024,
            Self::Format2 => 4688,
            Self::Format3 => 3168,
            Self::FormatA1 => 288,
            Self::FormatA2 => 576,
            Self::FormatA3 => 864,
            Self::FormatB1 => 216,
            Self::FormatB4 => 936,
            Self::FormatC0 => 1240,
            Self::FormatC2 => 2048,
        };
        PhyTime::from_seconds(n_cp as f64 * KAPPA_TC)
    }

    /// Cyclic shift N_cs for a zero-correlation-zone index, unrestricted set
    pub fn cyclic_shift(&self, zero_correlation_zone: u8) -> Result<usize, PhyError> {
        let table = match self {
            Self::Format0 | Self::Format1 | Self::Format2 => &NCS_LONG_1_25_KHZ,
            Self::Format3 => &NCS_LONG_5_KHZ,
            _ => &NCS_SHORT,
        };
        table
            .get(zero_correlation_zone as usize)
            .map(|&n_cs| n_cs as usize)
            .ok_or_else(|| {
                PhyError::InvalidArgument(format!(
                    "Invalid zero correlation zone {}",
                    zero_correlation_zone
                ))
            })
    }
}

impl FromStr for PrachFormat {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "0" => Ok(Self::Format0),
            "1" => Ok(Self::Format1),
            "2" => Ok(Self::Format2),
            "3" => Ok(Self::Format3),
            "A1" => Ok(Self::FormatA1),
            "A2" => Ok(Self::FormatA2),
            "A3" => Ok(Self::FormatA3),
            "B1" => Ok(Self::FormatB1),
            "B4" => Ok(Self::FormatB4),
            "C0" => Ok(Self::FormatC0),
            "C2" => Ok(Self::FormatC2),
            other => Err(ParseError::UnknownTag {
                kind: "preamble format",
                value: other.to_string(),
            }),
        }
    }
}

/// Restricted set configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestrictedSetConfig {
    Unrestricted,
    TypeA,
    TypeB,
}

impl FromStr for RestrictedSetConfig {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "UnrestrictedSet" => Ok(Self::Unrestricted),
            "RestrictedSetTypeA" => Ok(Self::TypeA),
            "RestrictedSetTypeB" => Ok(Self::TypeB),
            other => Err(ParseError::UnknownTag {
                kind: "restricted set",
                value: other.to_string(),
            }),
        }
    }
}

/// PRACH detector configuration
#[derive(Debug, Clone)]
pub struct PrachDetectorConfig {
    /// Logical root sequence index
    pub root_sequence_index: u16,
    /// Preamble format
    pub format: PrachFormat,
    /// Restricted set configuration
    pub restricted_set: RestrictedSetConfig,
    /// Zero correlation zone configuration index (0-15)
    pub zero_correlation_zone: u8,
    /// First preamble index to monitor
    pub start_preamble_index: u8,
    /// Number of preamble indices to monitor
    pub nof_preamble_indices: u8,
}

impl Default for PrachDetectorConfig {
    fn default() -> Self {
        Self {
            root_sequence_index: 0,
            format: PrachFormat::Format0,
            restricted_set: RestrictedSetConfig::Unrestricted,
            zero_correlation_zone: 12,
            start_preamble_index: 0,
            nof_preamble_indices: MAX_NUM_PREAMBLES as u8,
        }
    }
}

/// Mapping of preamble indices to root sequences and cyclic shifts
#[derive(Debug, Clone, Copy)]
pub struct PreambleLayout {
    /// Sequence length L
    pub sequence_length: usize,
    /// Cyclic shift N_cs (0 means a single shift spanning the whole sequence)
    pub n_cs: usize,
    /// Number of cyclic shifts per root sequence
    pub nof_shifts: usize,
}

impl PreambleLayout {
    /// Derive the layout of a configuration
    pub fn new(format: PrachFormat, zero_correlation_zone: u8) -> Result<Self, PhyError> {
        let sequence_length = format.sequence_length();
        let n_cs = format.cyclic_shift(zero_correlation_zone)?;
        let nof_shifts = if n_cs > 0 { sequence_length / n_cs } else { 1 };

        Ok(Self {
            sequence_length,
            n_cs,
            nof_shifts,
        })
    }

    /// Window length in sequence samples
    pub fn window_length(&self) -> usize {
        if self.n_cs > 0 {
            self.n_cs
        } else {
            self.sequence_length
        }
    }

    /// Root offset and cyclic shift C_v of a preamble index
    pub fn root_and_shift(&self, preamble_index: usize) -> (usize, usize) {
        let root_offset = preamble_index / self.nof_shifts;
        let shift = (preamble_index % self.nof_shifts) * self.n_cs;
        (root_offset, shift)
    }

    /// Physical root sequence number u for a logical root index
    pub fn physical_root(&self, logical_root: usize) -> usize {
        (logical_root % (self.sequence_length - 1)) + 1
    }
}

/// Generate Zadoff-Chu sequence
/// x_u(n) = exp(-j * pi * u * n * (n + 1) / N_zc)
pub fn generate_zc_sequence(root: usize, length: usize) -> Vec<Complex32> {
    let n_zc = length as f64;

    (0..length)
        .map(|n| {
            // Reduce the quadratic term modulo 2 * N_zc to keep the phase accurate
            let n = n as u64;
            let q = (root as u64 * n * (n + 1)) % (2 * length as u64);
            let phase = -std::f64::consts::PI * q as f64 / n_zc;
            Complex32::from_polar(1.0, phase as f32)
        })
        .collect()
}

/// Frequency-domain root sequence, unit magnitude per element
///
/// `dft` is a forward transform whose length is the sequence length.
pub fn generate_frequency_domain_root(dft: &dyn Fft<f32>, root: usize) -> Vec<Complex32> {
    let length = dft.len();
    let mut sequence = generate_zc_sequence(root, length);
    dft.process(&mut sequence);

    let norm = 1.0 / (length as f32).sqrt();
    sequence.iter_mut().for_each(|x| *x *= norm);
    sequence
}

/// PRACH buffer holding the frequency-domain sequence of every PRACH symbol
#[derive(Debug, Clone)]
pub struct PrachBuffer {
    /// 2D buffer: [symbols, samples]
    samples: Array2<Complex32>,
}

impl PrachBuffer {
    /// Create a zeroed buffer for long-sequence formats
    pub fn new_long(nof_symbols: usize) -> Self {
        Self {
            samples: Array2::zeros((nof_symbols.max(1), LONG_SEQUENCE_LENGTH)),
        }
    }

    /// Create a zeroed buffer for short-sequence formats
    pub fn new_short(nof_symbols: usize) -> Self {
        Self {
            samples: Array2::zeros((nof_symbols.max(1), SHORT_SEQUENCE_LENGTH)),
        }
    }

    /// Create a buffer from per-symbol sample vectors
    ///
    /// The number of samples per symbol selects the long or short path and must
    /// be the same for every symbol.
    pub fn from_symbols(symbols: &[Vec<Complex32>]) -> Result<Self, PhyError> {
        let nof_samples = symbols.first().map(Vec::len).unwrap_or(0);
        let mut buffer = match nof_samples {
            LONG_SEQUENCE_LENGTH => Self::new_long(symbols.len()),
            SHORT_SEQUENCE_LENGTH => Self::new_short(symbols.len()),
            _ => {
                return Err(PhyError::InvalidArgument(format!(
                    "Unsupported buffer shape: {} symbols of {} samples",
                    symbols.len(),
                    nof_samples
                )))
            }
        };

        for (i_symbol, symbol) in symbols.iter().enumerate() {
            if symbol.len() != nof_samples {
                return Err(PhyError::InvalidArgument(format!(
                    "Unsupported buffer shape: symbol {} has {} samples, expected {}",
                    i_symbol,
                    symbol.len(),
                    nof_samples
                )));
            }
            buffer
                .samples
                .slice_mut(s![i_symbol, ..])
                .assign(&ndarray::ArrayView1::from(symbol.as_slice()));
        }

        Ok(buffer)
    }

    /// Number of PRACH symbols
    pub fn nof_symbols(&self) -> usize {
        self.samples.nrows()
    }

    /// Number of samples per symbol
    pub fn sequence_length(&self) -> usize {
        self.samples.ncols()
    }

    /// Check if the buffer holds long sequences
    pub fn is_long(&self) -> bool {
        self.sequence_length() == LONG_SEQUENCE_LENGTH
    }

    /// Samples of one symbol
    pub fn symbol(&self, symbol: usize) -> Option<ndarray::ArrayView1<'_, Complex32>> {
        (symbol < self.nof_symbols()).then(|| self.samples.row(symbol))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zc_sequence_generation() {
        let seq = generate_zc_sequence(1, LONG_SEQUENCE_LENGTH);
        assert_eq!(seq.len(), 839);

        // Check that all elements have unit magnitude
        for c in &seq {
            assert!((c.norm() - 1.0).abs() < 1e-6);
        }
    }

    #[test]
    fn test_frequency_domain_root_is_constant_amplitude() {
        let mut planner = rustfft::FftPlanner::new();
        let dft = planner.plan_fft_forward(SHORT_SEQUENCE_LENGTH);
        let root = generate_frequency_domain_root(dft.as_ref(), 25);
        for c in &root {
            assert!((c.norm() - 1.0).abs() < 1e-3);
        }
    }

    #[test]
    fn test_cyclic_shift_tables() {
        assert_eq!(PrachFormat::Format0.cyclic_shift(12).unwrap(), 119);
        assert_eq!(PrachFormat::Format3.cyclic_shift(12).unwrap(), 139);
        assert_eq!(PrachFormat::FormatA1.cyclic_shift(15).unwrap(), 69);
        assert_eq!(PrachFormat::Format1.cyclic_shift(0).unwrap(), 0);
        assert!(PrachFormat::Format0.cyclic_shift(16).is_err());
    }

    #[test]
    fn test_preamble_layout() {
        let layout = PreambleLayout::new(PrachFormat::Format0, 12).unwrap();
        assert_eq!(layout.nof_shifts, 7);
        assert_eq!(layout.root_and_shift(0), (0, 0));
        assert_eq!(layout.root_and_shift(9), (1, 2 * 119));
        assert_eq!(layout.physical_root(837), 838);
        assert_eq!(layout.physical_root(838), 1);

        let single = PreambleLayout::new(PrachFormat::Format0, 0).unwrap();
        assert_eq!(single.nof_shifts, 1);
        assert_eq!(single.window_length(), LONG_SEQUENCE_LENGTH);
    }

    #[test]
    fn test_format_tags() {
        assert_eq!("0".parse::<PrachFormat>().unwrap(), PrachFormat::Format0);
        assert_eq!("B4".parse::<PrachFormat>().unwrap(), PrachFormat::FormatB4);
        assert!("D1".parse::<PrachFormat>().is_err());
        assert_eq!(
            "RestrictedSetTypeB".parse::<RestrictedSetConfig>().unwrap(),
            RestrictedSetConfig::TypeB
        );
        assert!("Restricted".parse::<RestrictedSetConfig>().is_err());
    }

    #[test]
    fn test_cyclic_prefix_duration() {
        let cp = PrachFormat::Format0.cyclic_prefix_duration();
        assert!((cp.to_microseconds() - 103.125).abs() < 1e-6);
    }

    #[test]
    fn test_buffer_shape_selects_path() {
        let long = PrachBuffer::from_symbols(&vec![vec![Complex32::new(1.0, 0.0); 839]; 2]).unwrap();
        assert!(long.is_long());
        assert_eq!(long.nof_symbols(), 2);

        let short = PrachBuffer::from_symbols(&[vec![Complex32::new(0.0, 1.0); 139]]).unwrap();
        assert!(!short.is_long());

        let invalid = PrachBuffer::from_symbols(&[vec![Complex32::new(0.0, 0.0); 1024]]);
        assert!(matches!(invalid, Err(PhyError::InvalidArgument(_))));
    }
}
