//! Port channel estimator
//!
//! Estimates the single-layer channel response seen by every receive port from
//! the DM-RS carried in a resource grid, together with noise variance, RSRP,
//! EPRE, SINR and time alignment per port.

use crate::channel_estimate::{ChannelEstimate, ChannelEstimateDimensions, PortMetrics};
use crate::resource_grid::ResourceGrid;
use crate::PhyError;
use common::{count_set, set_indices, CyclicPrefix, PhyTime, SubcarrierSpacing, NRE};
use num_complex::Complex32;
use num_traits::Zero;
use std::ops::Range;
use tracing::{debug, trace};

/// DM-RS allocation of one transmit layer
#[derive(Debug, Clone, PartialEq)]
pub struct LayerDmrsPattern {
    /// OFDM symbols of the slot carrying DM-RS
    pub symbols: Vec<bool>,
    /// Resource blocks carrying DM-RS
    pub rb_mask: Vec<bool>,
    /// Resource blocks carrying DM-RS after the hop, same size as `rb_mask`
    pub rb_mask2: Vec<bool>,
    /// First symbol of the second hop, if frequency hopping is enabled
    pub hopping_symbol_index: Option<usize>,
    /// Subcarriers of a resource block carrying DM-RS (12 entries)
    pub re_pattern: Vec<bool>,
}

/// Port channel estimator configuration
#[derive(Debug, Clone)]
pub struct PortChannelEstimatorConfig {
    /// Cyclic prefix
    pub cp: CyclicPrefix,
    /// Subcarrier spacing
    pub scs: SubcarrierSpacing,
    /// First OFDM symbol of the time allocation
    pub first_symbol: usize,
    /// Number of OFDM symbols of the time allocation
    pub nof_symbols: usize,
    /// DM-RS pattern, one entry per transmit layer
    pub dmrs_pattern: Vec<LayerDmrsPattern>,
    /// DM-RS amplitude scaling (beta)
    pub scaling: f32,
    /// Grid port read for every estimate port
    pub rx_ports: Vec<usize>,
}

/// Pilots of one frequency hop
struct HopSegment {
    /// Pilot subcarriers in ascending order
    subcarriers: Vec<usize>,
    /// OFDM symbols carrying pilots
    pilot_symbols: Vec<usize>,
    /// Resource blocks of the hop
    rbs: Vec<usize>,
    /// OFDM symbols the estimate of this hop is written to
    allocation: Range<usize>,
    /// Index of the first pilot of this hop
    pilot_offset: usize,
}

/// Port channel estimator
#[derive(Debug, Clone, Copy)]
pub struct PortChannelEstimator {
    /// Frequency span of the smoothing filter in subcarriers
    smoothing_width: usize,
}

impl Default for PortChannelEstimator {
    fn default() -> Self {
        Self {
            smoothing_width: NRE,
        }
    }
}

impl PortChannelEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a different smoothing span, at least one subcarrier
    pub fn with_smoothing_width(smoothing_width: usize) -> Self {
        Self {
            smoothing_width: smoothing_width.max(1),
        }
    }

    /// Estimate the channel of every configured receive port
    ///
    /// `pilots` holds the transmitted DM-RS, ordered subcarrier first, then symbol.
    pub fn estimate(
        &self,
        grid: &ResourceGrid,
        pilots: &[Complex32],
        config: &PortChannelEstimatorConfig,
    ) -> Result<ChannelEstimate, PhyError> {
        let pattern = validate(grid, pilots, config)?;
        let segments = hop_segments(pattern, config);

        debug!(
            "Estimating channel: ports={:?}, symbols=[{}, {}), hops={}, pilots={}",
            config.rx_ports,
            config.first_symbol,
            config.first_symbol + config.nof_symbols,
            segments.len(),
            pilots.len()
        );

        let mut estimate = ChannelEstimate::new(ChannelEstimateDimensions {
            nof_prb: pattern.rb_mask.len(),
            nof_symbols: pattern.symbols.len(),
            nof_rx_ports: config.rx_ports.len(),
            nof_tx_layers: 1,
        })?;

        for (port, &grid_port) in config.rx_ports.iter().enumerate() {
            self.estimate_port(grid, grid_port, pilots, config, &segments, port, &mut estimate)?;
        }

        Ok(estimate)
    }

    #[allow(clippy::too_many_arguments)]
    fn estimate_port(
        &self,
        grid: &ResourceGrid,
        grid_port: usize,
        pilots: &[Complex32],
        config: &PortChannelEstimatorConfig,
        segments: &[HopSegment],
        port: usize,
        estimate: &mut ChannelEstimate,
    ) -> Result<(), PhyError> {
        let beta = config.scaling;

        // Least-squares taps averaged over the pilot symbols of each hop
        let mut averaged = Vec::with_capacity(segments.len());
        for segment in segments {
            let nof_pilot_symbols = segment.pilot_symbols.len() as f32;
            let mut taps = vec![Complex32::zero(); segment.subcarriers.len()];

            for (i_symbol, &symbol) in segment.pilot_symbols.iter().enumerate() {
                let rx = grid.get_symbol(grid_port, symbol)?;
                let offset = segment.pilot_offset + i_symbol * segment.subcarriers.len();
                for (j, &sc) in segment.subcarriers.iter().enumerate() {
                    let reference = pilots[offset + j] * beta;
                    if reference.norm_sqr() > 0.0 {
                        taps[j] += rx[sc] / reference / nof_pilot_symbols;
                    }
                }
            }
            averaged.push(taps);
        }

        let phase_slope = estimate_phase_slope(segments, &averaged);
        let time_alignment = PhyTime::from_seconds(
            -(phase_slope as f64) / (2.0 * std::f64::consts::PI * config.scs.to_hz()),
        );

        let mut rsrp = 0.0;
        let mut epre = 0.0;
        let mut noise = 0.0;
        let mut nof_pilots = 0usize;
        let nof_subcarriers = estimate.dimensions().nof_subcarriers();

        for (segment, taps) in segments.iter().zip(&averaged) {
            let derotated: Vec<Complex32> = segment
                .subcarriers
                .iter()
                .zip(taps)
                .map(|(&sc, &tap)| tap * Complex32::from_polar(1.0, -phase_slope * sc as f32))
                .collect();
            let smoothed = smooth(&segment.subcarriers, &derotated, self.smoothing_width);

            // Dense response over the allocated resource blocks of the hop
            let mut dense = vec![Complex32::zero(); nof_subcarriers];
            for &rb in &segment.rbs {
                for sc in rb * NRE..(rb + 1) * NRE {
                    dense[sc] = interpolate(&segment.subcarriers, &smoothed, sc)
                        * Complex32::from_polar(1.0, phase_slope * sc as f32);
                }
            }

            let mut path = estimate.path_mut(port, 0);
            for symbol in segment.allocation.clone() {
                for &rb in &segment.rbs {
                    for sc in rb * NRE..(rb + 1) * NRE {
                        path[(symbol, sc)] = dense[sc];
                    }
                }
            }

            for (i_symbol, &symbol) in segment.pilot_symbols.iter().enumerate() {
                let rx = grid.get_symbol(grid_port, symbol)?;
                let offset = segment.pilot_offset + i_symbol * segment.subcarriers.len();
                for (j, &sc) in segment.subcarriers.iter().enumerate() {
                    let h = dense[sc];
                    let y = rx[sc];
                    rsrp += h.norm_sqr();
                    epre += y.norm_sqr();
                    noise += (y - pilots[offset + j] * beta * h).norm_sqr();
                    nof_pilots += 1;
                }
            }
        }

        let nof_pilots = nof_pilots.max(1) as f32;
        let rsrp = rsrp / nof_pilots;
        let epre = epre / nof_pilots;
        let noise_variance = noise / nof_pilots;
        estimate.set_port_measurements(port, rsrp, epre, noise_variance, time_alignment);

        trace!(
            "Port {} (grid port {}): rsrp={:.3e}, epre={:.3e}, noise={:.3e}, ta={:.3}us",
            port,
            grid_port,
            rsrp,
            epre,
            noise_variance,
            time_alignment.to_microseconds()
        );

        Ok(())
    }
}

/// Estimate the channel of every receive port in `config.rx_ports`
///
/// Returns the estimate together with the metrics of each port, in estimate
/// port order.
pub fn estimate_channel(
    grid: &ResourceGrid,
    pilots: &[Complex32],
    config: &PortChannelEstimatorConfig,
) -> Result<(ChannelEstimate, Vec<PortMetrics>), PhyError> {
    let estimate = PortChannelEstimator::new().estimate(grid, pilots, config)?;
    let metrics = estimate.all_port_metrics();
    Ok((estimate, metrics))
}

fn validate<'a>(
    grid: &ResourceGrid,
    pilots: &[Complex32],
    config: &'a PortChannelEstimatorConfig,
) -> Result<&'a LayerDmrsPattern, PhyError> {
    let invalid = |msg: String| Err(PhyError::InvalidArgument(msg));

    if config.dmrs_pattern.len() != 1 {
        return invalid(format!(
            "Only single-layer estimation is supported, got {} DM-RS patterns",
            config.dmrs_pattern.len()
        ));
    }
    let pattern = &config.dmrs_pattern[0];

    if config.rx_ports.len() != grid.nof_ports() {
        return invalid(format!(
            "Number of receive ports ({}) does not match the grid ports ({})",
            config.rx_ports.len(),
            grid.nof_ports()
        ));
    }
    if let Some(&port) = config.rx_ports.iter().find(|&&p| p >= grid.nof_ports()) {
        return invalid(format!(
            "Receive port {} exceeds the grid ports ({})",
            port,
            grid.nof_ports()
        ));
    }

    if pattern.re_pattern.len() != NRE {
        return invalid(format!(
            "RE pattern has {} entries, expected {}",
            pattern.re_pattern.len(),
            NRE
        ));
    }
    if pattern.rb_mask.len() * NRE > grid.nof_subcarriers() {
        return invalid(format!(
            "RB mask of {} RBs exceeds the grid ({} RBs)",
            pattern.rb_mask.len(),
            grid.nof_prb()
        ));
    }
    if pattern.symbols.len() > grid.nof_symbols() {
        return invalid(format!(
            "DM-RS symbol mask of {} symbols exceeds the grid ({} symbols)",
            pattern.symbols.len(),
            grid.nof_symbols()
        ));
    }

    let allocation_end = config.first_symbol + config.nof_symbols;
    if config.nof_symbols == 0
        || allocation_end > pattern.symbols.len()
        || allocation_end > config.cp.nof_symbols_per_slot()
    {
        return invalid(format!(
            "Time allocation [{}, {}) does not fit the slot",
            config.first_symbol, allocation_end
        ));
    }
    if set_indices(&pattern.symbols)
        .iter()
        .any(|&symbol| symbol < config.first_symbol || symbol >= allocation_end)
    {
        return invalid("DM-RS symbols outside the time allocation".to_string());
    }
    if !config.scaling.is_finite() || config.scaling == 0.0 {
        return invalid(format!("Invalid DM-RS scaling {}", config.scaling));
    }

    let nof_rb = count_set(&pattern.rb_mask);
    let nof_re = count_set(&pattern.re_pattern);
    let nof_symbols = count_set(&pattern.symbols);
    if nof_rb == 0 || nof_re == 0 || nof_symbols == 0 {
        return invalid("Empty DM-RS pattern".to_string());
    }

    if let Some(hop) = pattern.hopping_symbol_index {
        if pattern.rb_mask2.len() != pattern.rb_mask.len()
            || count_set(&pattern.rb_mask2) != nof_rb
        {
            return invalid("Second hop RB mask does not match the first hop".to_string());
        }
        let has_pilots = |range: Range<usize>| range.into_iter().any(|s| pattern.symbols[s]);
        if hop <= config.first_symbol
            || hop >= allocation_end
            || !has_pilots(config.first_symbol..hop)
            || !has_pilots(hop..allocation_end)
        {
            return invalid(format!("Hopping symbol index {} leaves a hop without DM-RS", hop));
        }
    }

    let expected = nof_rb * nof_re * nof_symbols;
    if pilots.len() != expected {
        return invalid(format!(
            "Number of pilots ({}) does not match the DM-RS pattern ({})",
            pilots.len(),
            expected
        ));
    }

    Ok(pattern)
}

fn hop_segments(
    pattern: &LayerDmrsPattern,
    config: &PortChannelEstimatorConfig,
) -> Vec<HopSegment> {
    let allocation_end = config.first_symbol + config.nof_symbols;
    let bounds = match pattern.hopping_symbol_index {
        Some(hop) => vec![
            (config.first_symbol..hop, &pattern.rb_mask),
            (hop..allocation_end, &pattern.rb_mask2),
        ],
        None => vec![(config.first_symbol..allocation_end, &pattern.rb_mask)],
    };

    let re_indices = set_indices(&pattern.re_pattern);
    let mut pilot_offset = 0;

    bounds
        .into_iter()
        .map(|(allocation, rb_mask)| {
            let rbs = set_indices(rb_mask);
            let subcarriers: Vec<usize> = rbs
                .iter()
                .flat_map(|&rb| re_indices.iter().map(move |&k| rb * NRE + k))
                .collect();
            let pilot_symbols: Vec<usize> =
                allocation.clone().filter(|&s| pattern.symbols[s]).collect();

            let segment = HopSegment {
                pilot_offset,
                subcarriers,
                pilot_symbols,
                rbs,
                allocation,
            };
            pilot_offset += segment.subcarriers.len() * segment.pilot_symbols.len();
            segment
        })
        .collect()
}

/// Common phase rotation per subcarrier, from adjacent pilot pairs
fn estimate_phase_slope(segments: &[HopSegment], taps: &[Vec<Complex32>]) -> f32 {
    let mut weighted_phase = 0.0;
    let mut weighted_distance = 0.0;

    for (segment, taps) in segments.iter().zip(taps) {
        for j in 1..taps.len() {
            let distance = segment.subcarriers[j] - segment.subcarriers[j - 1];
            if distance > NRE {
                continue;
            }
            let correlation = taps[j] * taps[j - 1].conj();
            let weight = correlation.norm();
            weighted_phase += weight * correlation.arg();
            weighted_distance += weight * distance as f32;
        }
    }

    if weighted_distance > 0.0 {
        weighted_phase / weighted_distance
    } else {
        0.0
    }
}

/// Moving average over the pilots within half the smoothing width
fn smooth(subcarriers: &[usize], taps: &[Complex32], width: usize) -> Vec<Complex32> {
    let half_width = width as f32 / 2.0;

    subcarriers
        .iter()
        .map(|&center| {
            let (sum, count) = subcarriers
                .iter()
                .zip(taps)
                .filter(|(&sc, _)| (sc as f32 - center as f32).abs() < half_width)
                .fold((Complex32::zero(), 0usize), |(sum, count), (_, &tap)| {
                    (sum + tap, count + 1)
                });
            sum / count.max(1) as f32
        })
        .collect()
}

/// Linear interpolation between pilots, constant beyond the outermost ones
fn interpolate(subcarriers: &[usize], values: &[Complex32], sc: usize) -> Complex32 {
    let upper = subcarriers.partition_point(|&x| x < sc);
    if upper == 0 {
        return values[0];
    }
    if upper == subcarriers.len() {
        return values[upper - 1];
    }
    if subcarriers[upper] == sc {
        return values[upper];
    }

    let (x0, x1) = (subcarriers[upper - 1] as f32, subcarriers[upper] as f32);
    let alpha = (sc as f32 - x0) / (x1 - x0);
    values[upper - 1] * (1.0 - alpha) + values[upper] * alpha
}
