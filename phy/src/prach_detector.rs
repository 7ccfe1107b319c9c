//! PRACH detector
//!
//! Correlates the received frequency-domain PRACH sequence with every root
//! sequence of the configured preamble range and searches the delay domain
//! window of each cyclic shift for a correlation peak.

use crate::prach::{
    constants::MAX_NUM_PREAMBLES, generate_frequency_domain_root, PrachBuffer, PrachDetectorConfig,
    PreambleLayout, RestrictedSetConfig,
};
use crate::PhyError;
use common::{convert_power_to_db, PhyTime};
use num_complex::Complex32;
use num_traits::Zero;
use rustfft::{Fft, FftPlanner};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

/// IDFT size of the long preamble correlator
const DFT_SIZE_LONG: usize = 1536;
/// IDFT size of the short preamble correlator
const DFT_SIZE_SHORT: usize = 256;
/// Minimum ratio between a window peak and the noise floor
const DETECTION_THRESHOLD: f32 = 15.0;
/// Minimum ratio between a window peak and the strongest peak
const DYNAMIC_RANGE: f32 = 0.1;

/// Detection of a single preamble
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PreambleIndication {
    /// Detected preamble index (0-63)
    pub preamble_index: u8,
    /// Timing advance of the preamble
    pub time_advance: PhyTime,
    /// Correlation peak power relative to a unit-amplitude preamble in dB
    pub power_db: f32,
    /// Peak to noise floor ratio in dB
    pub snr_db: f32,
}

/// PRACH detection result
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PrachDetectionResult {
    /// Average received power per sample in dB
    pub rssi_db: f32,
    /// Timing advance granularity
    pub time_resolution: PhyTime,
    /// Largest timing advance the configuration can measure
    pub time_advance_max: PhyTime,
    /// Detected preambles in ascending preamble index
    pub preambles: Vec<PreambleIndication>,
}

impl PrachDetectionResult {
    /// Last detected preamble, the one a single-result caller reports
    pub fn last_preamble(&self) -> Option<&PreambleIndication> {
        self.preambles.last()
    }
}

/// Outcome of a detection call
#[derive(Debug, Clone, PartialEq)]
pub enum PrachDetectionOutcome {
    /// Detection ran and found at least one preamble
    Detected(PrachDetectionResult),
    /// The configuration is not processed, no result is produced
    Skipped,
}

impl PrachDetectionOutcome {
    pub fn is_skipped(&self) -> bool {
        matches!(self, Self::Skipped)
    }

    /// Convert a skipped detection into [`PhyError::Unsupported`]
    pub fn into_result(self) -> Result<PrachDetectionResult, PhyError> {
        match self {
            Self::Detected(result) => Ok(result),
            Self::Skipped => Err(PhyError::Unsupported(
                "Restricted set PRACH configurations are not supported".to_string(),
            )),
        }
    }
}

/// Window peak of one preamble candidate
#[derive(Debug, Clone, Copy)]
struct Candidate {
    preamble_index: usize,
    root_offset: usize,
    bin: usize,
    metric: f32,
    energy: f32,
    delay: f64,
}

/// Delay-domain correlation of one root sequence
struct RootCorrelation {
    /// Normalised metric per delay bin, in [0, 1]
    metric: Vec<f32>,
    /// Squared correlation magnitude per delay bin, summed over symbols
    energy: Vec<f32>,
}

/// PRACH detector
///
/// Holds the transforms planned at construction and is otherwise stateless.
pub struct PrachDetector {
    /// DFT generating long root sequences
    dft_long: Arc<dyn Fft<f32>>,
    /// DFT generating short root sequences
    dft_short: Arc<dyn Fft<f32>>,
    /// IDFT processor for long preambles
    idft_long: Arc<dyn Fft<f32>>,
    /// IDFT processor for short preambles
    idft_short: Arc<dyn Fft<f32>>,
}

impl Default for PrachDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl PrachDetector {
    /// Create a new PRACH detector
    pub fn new() -> Self {
        let mut fft_planner = FftPlanner::new();

        Self {
            dft_long: fft_planner.plan_fft_forward(crate::prach::constants::LONG_SEQUENCE_LENGTH),
            dft_short: fft_planner.plan_fft_forward(crate::prach::constants::SHORT_SEQUENCE_LENGTH),
            idft_long: fft_planner.plan_fft_inverse(DFT_SIZE_LONG),
            idft_short: fft_planner.plan_fft_inverse(DFT_SIZE_SHORT),
        }
    }

    /// Detect PRACH preambles in a received buffer
    pub fn detect(
        &self,
        buffer: &PrachBuffer,
        config: &PrachDetectorConfig,
    ) -> Result<PrachDetectionOutcome, PhyError> {
        if config.restricted_set != RestrictedSetConfig::Unrestricted {
            warn!(
                "PRACH detection skipped: restricted set {:?} is not supported",
                config.restricted_set
            );
            return Ok(PrachDetectionOutcome::Skipped);
        }

        let layout = validate(buffer, config)?;
        let length = layout.sequence_length;
        let nof_symbols = buffer.nof_symbols();
        let (dft, idft) = if buffer.is_long() {
            (&self.dft_long, &self.idft_long)
        } else {
            (&self.dft_short, &self.idft_short)
        };
        let dft_size = idft.len();
        let scs = config.format.subcarrier_spacing_hz();

        let total_energy: f32 = (0..nof_symbols)
            .filter_map(|symbol| buffer.symbol(symbol))
            .map(|samples| samples.iter().map(|x| x.norm_sqr()).sum::<f32>())
            .sum();
        let rssi_db = convert_power_to_db(total_energy / (nof_symbols * length) as f32);
        let time_resolution = PhyTime::from_seconds(1.0 / (dft_size as f64 * scs));
        let window_duration = layout.window_length() as f64 / (length as f64 * scs);
        let time_advance_max = PhyTime::from_seconds(
            window_duration.min(config.format.cyclic_prefix_duration().to_seconds()),
        );

        debug!(
            "PRACH detection: format={:?}, root={}, N_cs={}, shifts={}, symbols={}, rssi={:.1}dB",
            config.format,
            config.root_sequence_index,
            layout.n_cs,
            layout.nof_shifts,
            nof_symbols,
            rssi_db
        );

        if total_energy <= 0.0 {
            return Err(PhyError::NotFound("No PRACH energy received".to_string()));
        }

        let first = config.start_preamble_index as usize;
        let last = first + config.nof_preamble_indices as usize - 1;
        let first_root = layout.root_and_shift(first).0;
        let last_root = layout.root_and_shift(last).0;

        // Correlate against every root covering the preamble range
        let mut correlations = Vec::with_capacity(last_root - first_root + 1);
        for root_offset in first_root..=last_root {
            let root = layout.physical_root(config.root_sequence_index as usize + root_offset);
            let sequence = generate_frequency_domain_root(dft.as_ref(), root);
            correlations.push(self.correlate(buffer, &sequence, idft.as_ref(), total_energy));
            trace!("Correlated root offset {} (u={})", root_offset, root);
        }

        // Window peak of every monitored preamble
        let candidates: Vec<Candidate> = (first..=last)
            .filter_map(|preamble_index| {
                let (root_offset, cyclic_shift) = layout.root_and_shift(preamble_index);
                let correlation = &correlations[root_offset - first_root];
                find_window_peak(&correlation.metric, &layout, cyclic_shift, dft_size).map(
                    |(bin, delay)| Candidate {
                        preamble_index,
                        root_offset,
                        bin,
                        metric: correlation.metric[bin],
                        energy: correlation.energy[bin],
                        delay,
                    },
                )
            })
            .collect();

        let guard = guard_bins(dft_size, length);
        let noise_floors: Vec<f32> = correlations
            .iter()
            .enumerate()
            .map(|(i_root, correlation)| {
                estimate_noise_floor(correlation, &candidates, first_root + i_root, guard, dft_size)
            })
            .collect();
        let strongest = candidates.iter().map(|c| c.metric).fold(0.0_f32, f32::max);

        let mut accepted: Vec<Candidate> = Vec::new();
        let mut ranked: Vec<Candidate> = candidates
            .into_iter()
            .filter(|c| {
                c.metric > 0.0
                    && c.metric > DETECTION_THRESHOLD * noise_floors[c.root_offset - first_root]
                    && c.metric >= DYNAMIC_RANGE * strongest
            })
            .collect();
        ranked.sort_by(|a, b| b.metric.total_cmp(&a.metric));

        for candidate in ranked {
            // Main-lobe leakage of a stronger peak into a neighbouring window
            let leaks = accepted.iter().any(|a| {
                a.root_offset == candidate.root_offset
                    && circular_distance(a.bin, candidate.bin, dft_size) <= guard
            });
            if !leaks {
                accepted.push(candidate);
            }
        }
        accepted.sort_by_key(|c| c.preamble_index);

        let preambles: Vec<PreambleIndication> = accepted
            .iter()
            .map(|c| {
                let noise_floor = noise_floors[c.root_offset - first_root];
                let snr = if noise_floor > 0.0 {
                    c.metric / (length as f32 * noise_floor)
                } else {
                    f32::INFINITY
                };
                PreambleIndication {
                    preamble_index: c.preamble_index as u8,
                    time_advance: PhyTime::from_seconds(c.delay / (length as f64 * scs)),
                    power_db: convert_power_to_db(
                        c.energy / (nof_symbols * length * length) as f32,
                    ),
                    snr_db: convert_power_to_db(snr),
                }
            })
            .collect();

        if preambles.is_empty() {
            return Err(PhyError::NotFound("No PRACH preamble detected".to_string()));
        }

        for preamble in &preambles {
            info!(
                "Detected preamble {}: TA={:.2}us, power={:.1}dB, snr={:.1}dB",
                preamble.preamble_index,
                preamble.time_advance.to_microseconds(),
                preamble.power_db,
                preamble.snr_db
            );
        }

        Ok(PrachDetectionOutcome::Detected(PrachDetectionResult {
            rssi_db,
            time_resolution,
            time_advance_max,
            preambles,
        }))
    }

    /// Correlate received signal with root sequence
    fn correlate(
        &self,
        buffer: &PrachBuffer,
        root_sequence: &[Complex32],
        idft: &dyn Fft<f32>,
        total_energy: f32,
    ) -> RootCorrelation {
        let length = root_sequence.len();
        let dft_size = idft.len();
        let mut energy = vec![0.0_f32; dft_size];
        let mut idft_buffer = vec![Complex32::zero(); dft_size];

        for symbol in 0..buffer.nof_symbols() {
            let Some(samples) = buffer.symbol(symbol) else {
                continue;
            };
            idft_buffer.fill(Complex32::zero());

            for (i, (&y, x)) in samples.iter().zip(root_sequence).enumerate() {
                let prod = y * x.conj();

                // Map to IDFT input (frequency domain arrangement)
                if i < length / 2 + 1 {
                    idft_buffer[i] = prod;
                } else {
                    idft_buffer[dft_size - (length - i)] = prod;
                }
            }

            idft.process(&mut idft_buffer);
            for (acc, z) in energy.iter_mut().zip(&idft_buffer) {
                *acc += z.norm_sqr();
            }
        }

        let norm = 1.0 / (length as f32 * total_energy);
        let metric = energy.iter().map(|&e| e * norm).collect();
        RootCorrelation { metric, energy }
    }
}

/// Detect PRACH preambles with a freshly built detector
pub fn detect_prach(
    buffer: &PrachBuffer,
    config: &PrachDetectorConfig,
) -> Result<PrachDetectionOutcome, PhyError> {
    PrachDetector::new().detect(buffer, config)
}

fn validate(
    buffer: &PrachBuffer,
    config: &PrachDetectorConfig,
) -> Result<PreambleLayout, PhyError> {
    if buffer.sequence_length() != config.format.sequence_length() {
        return Err(PhyError::InvalidArgument(format!(
            "Unsupported buffer shape: {} samples per symbol for format {:?}",
            buffer.sequence_length(),
            config.format
        )));
    }

    let start = config.start_preamble_index as usize;
    let count = config.nof_preamble_indices as usize;
    if count == 0 || start + count > MAX_NUM_PREAMBLES {
        return Err(PhyError::InvalidArgument(format!(
            "Invalid preamble range: start={}, count={}",
            start, count
        )));
    }

    if buffer.nof_symbols() != config.format.num_symbols() {
        debug!(
            "PRACH buffer has {} symbols, format {:?} defines {}",
            buffer.nof_symbols(),
            config.format,
            config.format.num_symbols()
        );
    }

    PreambleLayout::new(config.format, config.zero_correlation_zone)
}

/// Delay bins guarding the main lobe of a peak
fn guard_bins(dft_size: usize, length: usize) -> usize {
    (1.5 * dft_size as f64 / length as f64).ceil() as usize
}

fn circular_distance(a: usize, b: usize, size: usize) -> usize {
    let d = a.abs_diff(b);
    d.min(size - d)
}

/// Strongest bin within the delay window of a cyclic shift
///
/// The window covers the bins nearest to its sample boundaries, so a peak at
/// zero delay stays in its own window. Returns the bin and the delay it
/// represents in sequence samples, clamped to the window.
fn find_window_peak(
    metric: &[f32],
    layout: &PreambleLayout,
    cyclic_shift: usize,
    dft_size: usize,
) -> Option<(usize, f64)> {
    let bins_per_sample = dft_size as f64 / layout.sequence_length as f64;
    let window_length = layout.window_length() as f64;
    let window_start = ((layout.sequence_length - cyclic_shift) % layout.sequence_length) as f64;
    let first_bin = (window_start * bins_per_sample).round() as usize;
    let end_bin = ((window_start + window_length) * bins_per_sample).round() as usize;

    let mut peak: Option<(usize, f32)> = None;
    for unwrapped in first_bin..end_bin {
        let value = metric[unwrapped % dft_size];
        if peak.map_or(true, |(_, best)| value > best) {
            peak = Some((unwrapped, value));
        }
    }

    peak.map(|(unwrapped, _)| {
        let delay = (unwrapped as f64 / bins_per_sample - window_start).clamp(0.0, window_length);
        (unwrapped % dft_size, delay)
    })
}

/// Mean metric of one root away from its window peaks
fn estimate_noise_floor(
    correlation: &RootCorrelation,
    candidates: &[Candidate],
    root_offset: usize,
    guard: usize,
    dft_size: usize,
) -> f32 {
    let peaks: Vec<usize> = candidates
        .iter()
        .filter(|c| c.root_offset == root_offset)
        .map(|c| c.bin)
        .collect();

    let (sum, count) = correlation
        .metric
        .iter()
        .enumerate()
        .filter(|&(bin, _)| peaks.iter().all(|&p| circular_distance(p, bin, dft_size) > guard))
        .fold((0.0_f32, 0usize), |(sum, count), (_, &value)| (sum + value, count + 1));

    if count > 0 {
        sum / count as f32
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prach::PrachFormat;
    use crate::prach_generator::generate_prach_preamble;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn detected(outcome: PrachDetectionOutcome) -> PrachDetectionResult {
        match outcome {
            PrachDetectionOutcome::Detected(result) => result,
            PrachDetectionOutcome::Skipped => panic!("detection was skipped"),
        }
    }

    fn expected_time_advance(config: &PrachDetectorConfig, delay: f64) -> f64 {
        delay / (config.format.sequence_length() as f64 * config.format.subcarrier_spacing_hz())
    }

    #[test]
    fn test_detect_long_preamble_with_delay() {
        let config = PrachDetectorConfig {
            root_sequence_index: 22,
            ..Default::default()
        };
        let delay = 37.3;
        let buffer = generate_prach_preamble(&config, 9, delay, 1).unwrap();

        let result = detected(detect_prach(&buffer, &config).unwrap());

        assert_eq!(result.preambles.len(), 1);
        let preamble = result.last_preamble().unwrap();
        assert_eq!(preamble.preamble_index, 9);
        let error =
            (preamble.time_advance.to_seconds() - expected_time_advance(&config, delay)).abs();
        assert!(error <= result.time_resolution.to_seconds(), "error={}", error);
        assert!(preamble.power_db.abs() < 1.5);
        assert!(result.rssi_db.abs() < 0.1);
    }

    #[test]
    fn test_zero_delay_stays_in_its_window() {
        let cases = [
            (PrachFormat::Format0, 12, 1),
            (PrachFormat::Format0, 1, 40),
            (PrachFormat::Format3, 6, 7),
            (PrachFormat::FormatA1, 5, 15),
            (PrachFormat::FormatB4, 14, 13),
        ];

        for (format, zero_correlation_zone, preamble_index) in cases {
            let config = PrachDetectorConfig {
                format,
                zero_correlation_zone,
                ..Default::default()
            };
            let nof_symbols = format.num_symbols();
            let buffer =
                generate_prach_preamble(&config, preamble_index, 0.0, nof_symbols).unwrap();

            let result = detected(detect_prach(&buffer, &config).unwrap());

            let indices: Vec<u8> = result.preambles.iter().map(|p| p.preamble_index).collect();
            assert_eq!(
                indices,
                vec![preamble_index as u8],
                "{:?} zcz={}",
                format,
                zero_correlation_zone
            );
            let ta = result.preambles[0].time_advance.to_seconds();
            assert!(
                (0.0..=result.time_resolution.to_seconds()).contains(&ta),
                "{:?} zcz={} ta={}",
                format,
                zero_correlation_zone,
                ta
            );
        }
    }

    #[test]
    fn test_detect_short_preamble() {
        let config = PrachDetectorConfig {
            root_sequence_index: 7,
            format: PrachFormat::FormatA1,
            zero_correlation_zone: 5,
            ..Default::default()
        };
        let buffer = generate_prach_preamble(&config, 15, 4.0, 2).unwrap();

        let result = detected(detect_prach(&buffer, &config).unwrap());

        assert_eq!(result.preambles.len(), 1);
        assert_eq!(result.preambles[0].preamble_index, 15);
        let time_advance = result.preambles[0].time_advance.to_seconds();
        let error = (time_advance - expected_time_advance(&config, 4.0)).abs();
        assert!(error <= result.time_resolution.to_seconds());
    }

    #[test]
    fn test_detect_two_preambles_sorted() {
        let config = PrachDetectorConfig::default();
        let first = generate_prach_preamble(&config, 20, 10.0, 1).unwrap();
        let second = generate_prach_preamble(&config, 3, 55.0, 1).unwrap();
        let combined: Vec<Complex32> = first
            .symbol(0)
            .unwrap()
            .iter()
            .zip(second.symbol(0).unwrap().iter())
            .map(|(a, b)| a + b)
            .collect();
        let buffer = PrachBuffer::from_symbols(&[combined]).unwrap();

        let result = detected(detect_prach(&buffer, &config).unwrap());

        let indices: Vec<u8> = result.preambles.iter().map(|p| p.preamble_index).collect();
        assert_eq!(indices, vec![3, 20]);
        assert_eq!(result.last_preamble().unwrap().preamble_index, 20);
    }

    #[test]
    fn test_detect_in_noise() {
        let config = PrachDetectorConfig {
            root_sequence_index: 100,
            ..Default::default()
        };
        let clean = generate_prach_preamble(&config, 30, 12.0, 1).unwrap();
        let mut rng = StdRng::seed_from_u64(1234);
        let noisy: Vec<Complex32> = clean
            .symbol(0)
            .unwrap()
            .iter()
            .map(|&x| {
                // Unit-variance complex Gaussian noise (0 dB SNR per sample)
                let u1: f32 = rng.gen_range(1e-9..1.0);
                let u2: f32 = rng.gen();
                x + Complex32::from_polar((-u1.ln()).sqrt(), 2.0 * std::f32::consts::PI * u2)
            })
            .collect();
        let buffer = PrachBuffer::from_symbols(&[noisy]).unwrap();

        let result = detected(detect_prach(&buffer, &config).unwrap());

        assert_eq!(result.preambles.len(), 1);
        assert_eq!(result.preambles[0].preamble_index, 30);
        assert!(result.preambles[0].snr_db > -4.0 && result.preambles[0].snr_db < 3.0);
    }

    #[test]
    fn test_restricted_set_is_skipped() {
        let config = PrachDetectorConfig {
            restricted_set: RestrictedSetConfig::TypeA,
            ..Default::default()
        };
        let buffer = generate_prach_preamble(&PrachDetectorConfig::default(), 0, 0.0, 1).unwrap();

        let outcome = detect_prach(&buffer, &config).unwrap();
        assert!(outcome.is_skipped());
        assert!(matches!(outcome.into_result(), Err(PhyError::Unsupported(_))));
    }

    #[test]
    fn test_empty_buffer_not_found() {
        let buffer = PrachBuffer::new_long(1);
        let result = detect_prach(&buffer, &PrachDetectorConfig::default());
        assert!(matches!(result, Err(PhyError::NotFound(_))));
    }

    #[test]
    fn test_buffer_format_mismatch() {
        let buffer = PrachBuffer::new_short(2);
        let result = detect_prach(&buffer, &PrachDetectorConfig::default());
        assert!(matches!(result, Err(PhyError::InvalidArgument(_))));
    }

    #[test]
    fn test_invalid_preamble_range() {
        let buffer = generate_prach_preamble(&PrachDetectorConfig::default(), 0, 0.0, 1).unwrap();
        let config = PrachDetectorConfig {
            start_preamble_index: 60,
            nof_preamble_indices: 8,
            ..Default::default()
        };
        assert!(detect_prach(&buffer, &config).is_err());
    }

    #[test]
    fn test_preamble_outside_range_is_not_reported() {
        let buffer = generate_prach_preamble(&PrachDetectorConfig::default(), 40, 5.0, 1).unwrap();
        let config = PrachDetectorConfig {
            start_preamble_index: 0,
            nof_preamble_indices: 32,
            ..Default::default()
        };
        assert!(matches!(detect_prach(&buffer, &config), Err(PhyError::NotFound(_))));
    }
}
