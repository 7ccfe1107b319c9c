//! PUSCH (Physical Uplink Shared Channel) demodulator
//! Based on 3GPP TS 38.211 Sections 6.3.1 and 6.4.1.1
//!
//! Equalizes the data resource elements of a PUSCH allocation, demaps them to
//! soft bits and reverts the scrambling.

use crate::channel_equalizer::{ChannelEqualizer, EqualizerAlgorithm};
use crate::channel_estimate::{ChannelEstimate, ChannelEstimateDimensions};
use crate::demodulation_mapper::demodulate_symbol;
use crate::dmrs::DmrsType;
use crate::log_likelihood_ratio::LogLikelihoodRatio;
use crate::modulation::hard_decision;
use crate::pseudo_random::PseudoRandomGenerator;
use crate::resource_grid::{ResourceGrid, ResourceGridCoordinate};
use crate::PhyError;
use common::{
    convert_power_to_db, set_indices, ModulationScheme, Rnti, MAX_NSYMB_PER_SLOT, MAX_RB, NRE,
};
use ndarray::Array2;
use num_complex::Complex32;
use num_traits::Zero;
use serde::Serialize;
use tracing::{debug, trace};

/// Maximum number of transmit layers
pub const MAX_NOF_LAYERS: usize = 4;

/// Largest scrambling identity
const MAX_N_ID: u16 = 1023;

/// PUSCH demodulator configuration
#[derive(Debug, Clone)]
pub struct PuschDemodulatorConfig {
    /// RNTI of the transmitting UE
    pub rnti: Rnti,
    /// Allocated resource blocks
    pub rb_mask: Vec<bool>,
    /// Modulation scheme
    pub modulation: ModulationScheme,
    /// First OFDM symbol of the allocation
    pub start_symbol_index: usize,
    /// Number of OFDM symbols of the allocation
    pub nof_symbols: usize,
    /// OFDM symbols of the slot carrying DM-RS
    pub dmrs_symb_pos: Vec<bool>,
    /// DM-RS configuration type
    pub dmrs_config_type: DmrsType,
    /// Number of DM-RS CDM groups without data (1-3)
    pub nof_cdm_groups_without_data: usize,
    /// Scrambling identity (0-1023)
    pub n_id: u16,
    /// Number of transmit layers
    pub nof_tx_layers: usize,
    /// Bit positions set to the neutral soft bit instead of being descrambled
    pub placeholders: Vec<usize>,
    /// Grid port read for every channel estimate port
    pub rx_ports: Vec<usize>,
}

/// Statistics of one demodulation
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DemodulationStats {
    /// Average post-equalization SINR in dB
    pub sinr_db: f32,
    /// Error vector magnitude (RMS, relative to unit symbol energy)
    pub evm: f32,
}

/// Soft bits and statistics of one demodulation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PuschDemodulatorResult {
    /// Soft bits in resource element, then layer, then bit order
    pub llrs: Vec<LogLikelihoodRatio>,
    pub stats: DemodulationStats,
}

/// Limits of the PUSCH processing chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PuschProcessorCapabilities {
    /// Maximum number of transmit layers
    pub max_nof_layers: usize,
}

/// Report the limits of the PUSCH processing chain
pub fn pusch_processor_capabilities() -> PuschProcessorCapabilities {
    PuschProcessorCapabilities {
        max_nof_layers: MAX_NOF_LAYERS,
    }
}

/// Calculate PUSCH scrambling initialization value
/// c_init = n_RNTI * 2^15 + n_ID
pub fn calculate_pusch_scrambling_cinit(rnti: Rnti, n_id: u16) -> u32 {
    ((rnti.value() as u32) << 15) + n_id as u32
}

/// Subcarriers of one symbol carrying PUSCH data, in ascending order
fn data_subcarriers(config: &PuschDemodulatorConfig, symbol: usize) -> Vec<usize> {
    let reserved = if config.dmrs_symb_pos.get(symbol).copied().unwrap_or(false) {
        config
            .dmrs_config_type
            .reserved_pattern(config.nof_cdm_groups_without_data)
    } else {
        [false; NRE]
    };

    set_indices(&config.rb_mask)
        .into_iter()
        .flat_map(|rb| (0..NRE).filter(move |&k| !reserved[k]).map(move |k| rb * NRE + k))
        .collect()
}

/// Resource elements carrying PUSCH data, symbol by symbol
pub fn data_re_coordinates(config: &PuschDemodulatorConfig) -> Vec<ResourceGridCoordinate> {
    (config.start_symbol_index..config.start_symbol_index + config.nof_symbols)
        .flat_map(|symbol| {
            data_subcarriers(config, symbol)
                .into_iter()
                .map(move |sc| ResourceGridCoordinate {
                    subcarrier: sc as u16,
                    symbol: symbol as u8,
                })
        })
        .collect()
}

fn validate_config(config: &PuschDemodulatorConfig) -> Result<(), PhyError> {
    let invalid = |msg: String| Err(PhyError::InvalidArgument(msg));

    if config.nof_tx_layers == 0 || config.nof_tx_layers > MAX_NOF_LAYERS {
        return invalid(format!(
            "Number of transmit layers {} outside [1, {}]",
            config.nof_tx_layers, MAX_NOF_LAYERS
        ));
    }
    if config.rx_ports.len() < config.nof_tx_layers {
        return invalid(format!(
            "{} receive ports cannot separate {} layers",
            config.rx_ports.len(),
            config.nof_tx_layers
        ));
    }
    if config.n_id > MAX_N_ID {
        return invalid(format!("Scrambling identity {} exceeds {}", config.n_id, MAX_N_ID));
    }
    if config.dmrs_symb_pos.len() > MAX_NSYMB_PER_SLOT
        || config.nof_symbols == 0
        || config.start_symbol_index + config.nof_symbols > config.dmrs_symb_pos.len()
    {
        return invalid(format!(
            "Time allocation [{}, {}) does not fit a slot of {} symbols",
            config.start_symbol_index,
            config.start_symbol_index + config.nof_symbols,
            config.dmrs_symb_pos.len()
        ));
    }
    if config.rb_mask.len() > MAX_RB {
        return invalid(format!(
            "RB mask of {} entries exceeds {} resource blocks",
            config.rb_mask.len(),
            MAX_RB
        ));
    }
    if !config.rb_mask.iter().any(|&rb| rb) {
        return invalid("Empty RB allocation".to_string());
    }
    if config.nof_cdm_groups_without_data == 0
        || config.nof_cdm_groups_without_data > config.dmrs_config_type.nof_cdm_groups()
    {
        return invalid(format!(
            "Invalid number of CDM groups without data {} for {:?}",
            config.nof_cdm_groups_without_data, config.dmrs_config_type
        ));
    }
    Ok(())
}

/// PUSCH demodulator
///
/// The equalization strategy is fixed at construction.
#[derive(Debug, Clone, Copy, Default)]
pub struct PuschDemodulator {
    equalizer: ChannelEqualizer,
}

impl PuschDemodulator {
    pub fn new(algorithm: EqualizerAlgorithm) -> Self {
        Self {
            equalizer: ChannelEqualizer::new(algorithm),
        }
    }

    /// Demodulate the PUSCH carried in a resource grid
    ///
    /// Port `i` of the estimate corresponds to grid port `config.rx_ports[i]`.
    pub fn demodulate(
        &self,
        grid: &ResourceGrid,
        estimate: &ChannelEstimate,
        config: &PuschDemodulatorConfig,
    ) -> Result<PuschDemodulatorResult, PhyError> {
        validate_config(config)?;

        let dims = estimate.dimensions();
        let allocation_end = config.start_symbol_index + config.nof_symbols;
        if dims.nof_rx_ports != config.rx_ports.len()
            || dims.nof_tx_layers != config.nof_tx_layers
        {
            return Err(PhyError::InvalidArgument(format!(
                "Channel estimate holds {} ports and {} layers, expected {} and {}",
                dims.nof_rx_ports,
                dims.nof_tx_layers,
                config.rx_ports.len(),
                config.nof_tx_layers
            )));
        }
        if dims.nof_prb < config.rb_mask.len() || dims.nof_symbols < allocation_end {
            return Err(PhyError::InvalidArgument(
                "Channel estimate does not cover the allocation".to_string(),
            ));
        }
        if grid.nof_subcarriers() < config.rb_mask.len() * NRE
            || grid.nof_symbols() < allocation_end
        {
            return Err(PhyError::InvalidArgument(
                "Resource grid does not cover the allocation".to_string(),
            ));
        }
        if let Some(&port) = config.rx_ports.iter().find(|&&p| p >= grid.nof_ports()) {
            return Err(PhyError::InvalidArgument(format!(
                "Receive port {} exceeds the grid ports ({})",
                port,
                grid.nof_ports()
            )));
        }

        let nof_data_re: usize = (config.start_symbol_index..allocation_end)
            .map(|symbol| data_subcarriers(config, symbol).len())
            .sum();
        let nof_bits = nof_data_re * config.nof_tx_layers * config.modulation.bits_per_symbol();
        if let Some(&placeholder) = config.placeholders.iter().find(|&&p| p >= nof_bits) {
            return Err(PhyError::InvalidArgument(format!(
                "Placeholder {} outside the {} demodulated bits",
                placeholder, nof_bits
            )));
        }

        debug!(
            "Demodulating PUSCH: rnti={:?}, {} REs, {} layers, {}, {:?}",
            config.rnti,
            nof_data_re,
            config.nof_tx_layers,
            config.modulation,
            self.equalizer.algorithm()
        );

        let nof_ports = config.rx_ports.len();
        let nof_layers = config.nof_tx_layers;
        let noise_vars: Vec<f32> = (0..nof_ports)
            .map(|port| {
                (0..nof_layers)
                    .map(|layer| estimate.noise_variance(port, layer))
                    .sum::<f32>()
                    / nof_layers as f32
            })
            .collect();

        let mut llrs = Vec::with_capacity(nof_bits);
        let mut stats = StatsAccumulator::default();
        let mut rx = vec![Complex32::zero(); nof_ports];
        let mut channel = Array2::<Complex32>::zeros((nof_ports, nof_layers));
        let mut symbols = vec![Complex32::zero(); nof_layers];
        let mut post_noise_vars = vec![0.0; nof_layers];
        let mut re_index = 0;

        for symbol in config.start_symbol_index..allocation_end {
            let rows = config
                .rx_ports
                .iter()
                .map(|&grid_port| grid.get_symbol(grid_port, symbol))
                .collect::<Result<Vec<_>, _>>()?;

            for sc in data_subcarriers(config, symbol) {
                for port in 0..nof_ports {
                    rx[port] = rows[port][sc];
                    for layer in 0..nof_layers {
                        channel[(port, layer)] = estimate.get(port, layer, symbol, sc);
                    }
                }

                self.equalizer
                    .equalize(&rx, channel.view(), &noise_vars, &mut symbols, &mut post_noise_vars);

                for layer in 0..nof_layers {
                    demodulate_symbol(
                        symbols[layer],
                        post_noise_vars[layer],
                        config.modulation,
                        re_index,
                        &mut llrs,
                    );
                    stats.add(symbols[layer], post_noise_vars[layer], config.modulation, re_index);
                }
                re_index += 1;
            }
        }

        descramble(&mut llrs, config);
        let stats = stats.finish();
        trace!("PUSCH demodulation stats: sinr={:.1}dB, evm={:.3}", stats.sinr_db, stats.evm);

        Ok(PuschDemodulatorResult { llrs, stats })
    }
}

/// Demodulate PUSCH from flat buffers of data resource elements
///
/// `rx` holds the data REs of every receive port, port after port. `ce` holds
/// the matching channel coefficients, ordered by port, then layer, then RE.
/// The data REs follow [`data_re_coordinates`] and `noise_var` applies to
/// every port.
pub fn demodulate_pusch(
    rx: &[Complex32],
    ce: &[Complex32],
    noise_var: f32,
    config: &PuschDemodulatorConfig,
) -> Result<PuschDemodulatorResult, PhyError> {
    validate_config(config)?;

    let coordinates = data_re_coordinates(config);
    let nof_re = coordinates.len();
    let nof_ports = config.rx_ports.len();
    let nof_layers = config.nof_tx_layers;

    if rx.len() != nof_re * nof_ports {
        return Err(PhyError::InvalidArgument(format!(
            "Received {} REs, the allocation holds {} data REs on {} ports",
            rx.len(),
            nof_re,
            nof_ports
        )));
    }
    if ce.len() != nof_re * nof_ports * nof_layers {
        return Err(PhyError::InvalidArgument(format!(
            "Received {} channel coefficients, expected {}",
            ce.len(),
            nof_re * nof_ports * nof_layers
        )));
    }

    // Rebuild a grid and an estimate holding only the data REs
    let nof_symbols = config.start_symbol_index + config.nof_symbols;
    let mut grid = ResourceGrid::new(config.rb_mask.len() * NRE, nof_symbols, nof_ports)?;
    let mut estimate = ChannelEstimate::new(ChannelEstimateDimensions {
        nof_prb: config.rb_mask.len(),
        nof_symbols,
        nof_rx_ports: nof_ports,
        nof_tx_layers: nof_layers,
    })?;

    for port in 0..nof_ports {
        grid.put_coordinates(port, &coordinates, &rx[port * nof_re..(port + 1) * nof_re])?;

        for layer in 0..nof_layers {
            let offset = (port * nof_layers + layer) * nof_re;
            let mut path = estimate.path_mut(port, layer);
            for (coordinate, &h) in coordinates.iter().zip(&ce[offset..offset + nof_re]) {
                path[(coordinate.symbol as usize, coordinate.subcarrier as usize)] = h;
            }
            estimate.set_noise_variance(port, layer, noise_var);
        }
    }

    let flat_config = PuschDemodulatorConfig {
        rx_ports: (0..nof_ports).collect(),
        ..config.clone()
    };
    PuschDemodulator::default().demodulate(&grid, &estimate, &flat_config)
}

/// Revert the scrambling and apply the placeholders
fn descramble(llrs: &mut [LogLikelihoodRatio], config: &PuschDemodulatorConfig) {
    let c_init = calculate_pusch_scrambling_cinit(config.rnti, config.n_id);
    let mut generator = PseudoRandomGenerator::new(c_init);

    for llr in llrs.iter_mut() {
        if generator.next_bit() == 1 {
            *llr = -*llr;
        }
    }

    for &placeholder in &config.placeholders {
        llrs[placeholder] = LogLikelihoodRatio::ZERO;
    }
}

#[derive(Default)]
struct StatsAccumulator {
    sinr_sum: f32,
    error_energy: f32,
    count: usize,
}

impl StatsAccumulator {
    fn add(
        &mut self,
        symbol: Complex32,
        noise_var: f32,
        modulation: ModulationScheme,
        symbol_index: usize,
    ) {
        if !noise_var.is_finite() {
            return;
        }

        let symbol = if modulation == ModulationScheme::PiHalfBpsk && symbol_index % 2 == 1 {
            symbol * Complex32::new(0.0, -1.0)
        } else {
            symbol
        };

        self.sinr_sum += if noise_var > 0.0 { 1.0 / noise_var } else { f32::INFINITY };
        self.error_energy += (symbol - hard_decision(symbol, modulation)).norm_sqr();
        self.count += 1;
    }

    fn finish(self) -> DemodulationStats {
        if self.count == 0 {
            return DemodulationStats {
                sinr_db: f32::NAN,
                evm: f32::NAN,
            };
        }

        let count = self.count as f32;
        DemodulationStats {
            sinr_db: convert_power_to_db(self.sinr_sum / count),
            evm: (self.error_energy / count).sqrt(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modulation::modulate;

    const NOF_PRB: usize = 4;

    fn config(
        modulation: ModulationScheme,
        nof_ports: usize,
        nof_layers: usize,
    ) -> PuschDemodulatorConfig {
        let mut dmrs_symb_pos = vec![false; 14];
        dmrs_symb_pos[2] = true;
        dmrs_symb_pos[11] = true;

        PuschDemodulatorConfig {
            rnti: Rnti::new(0x4601),
            rb_mask: vec![false, true, true, false],
            modulation,
            start_symbol_index: 0,
            nof_symbols: 14,
            dmrs_symb_pos,
            dmrs_config_type: DmrsType::Type1,
            nof_cdm_groups_without_data: 2,
            n_id: 500,
            nof_tx_layers: nof_layers,
            placeholders: Vec::new(),
            rx_ports: (0..nof_ports).collect(),
        }
    }

    fn payload(count: usize) -> Vec<u8> {
        (0..count).map(|i| ((i * 5 + i / 7) % 2) as u8).collect()
    }

    fn scramble(bits: &[u8], config: &PuschDemodulatorConfig) -> Vec<u8> {
        let mut generator =
            PseudoRandomGenerator::new(calculate_pusch_scrambling_cinit(config.rnti, config.n_id));
        bits.iter().map(|&b| b ^ generator.next_bit()).collect()
    }

    /// Transmit `bits` through a flat channel matrix `h[port][layer]`
    fn transmit(
        bits: &[u8],
        config: &PuschDemodulatorConfig,
        h: &[Vec<Complex32>],
        noise_var: f32,
    ) -> (ResourceGrid, ChannelEstimate) {
        let nof_layers = config.nof_tx_layers;
        let nof_ports = h.len();
        let symbols = modulate(&scramble(bits, config), config.modulation).unwrap();
        let coordinates = data_re_coordinates(config);

        let mut grid = ResourceGrid::new(NOF_PRB * NRE, 14, nof_ports).unwrap();
        let mut estimate = ChannelEstimate::new(ChannelEstimateDimensions {
            nof_prb: NOF_PRB,
            nof_symbols: 14,
            nof_rx_ports: nof_ports,
            nof_tx_layers: nof_layers,
        })
        .unwrap();

        for port in 0..nof_ports {
            let values: Vec<Complex32> = (0..coordinates.len())
                .map(|re| {
                    (0..nof_layers)
                        .map(|layer| h[port][layer] * symbols[re * nof_layers + layer])
                        .sum()
                })
                .collect();
            grid.put_coordinates(port, &coordinates, &values).unwrap();

            for layer in 0..nof_layers {
                estimate.path_mut(port, layer).fill(h[port][layer]);
                estimate.set_noise_variance(port, layer, noise_var);
            }
        }

        (grid, estimate)
    }

    fn nof_bits(config: &PuschDemodulatorConfig) -> usize {
        data_re_coordinates(config).len()
            * config.nof_tx_layers
            * config.modulation.bits_per_symbol()
    }

    #[test]
    fn test_data_re_count() {
        // Two RBs, 12 data symbols, DM-RS symbols without data
        let full = config(ModulationScheme::Qpsk, 1, 1);
        assert_eq!(data_re_coordinates(&full).len(), 2 * NRE * 12);

        // One CDM group without data leaves the odd subcarriers of DM-RS symbols
        let shared = PuschDemodulatorConfig {
            nof_cdm_groups_without_data: 1,
            ..full
        };
        let coordinates = data_re_coordinates(&shared);
        assert_eq!(coordinates.len(), 2 * NRE * 12 + 2 * 2 * 6);
        assert!(coordinates
            .iter()
            .filter(|c| c.symbol == 2)
            .all(|c| c.subcarrier % 2 == 1 && c.subcarrier >= 12));
    }

    #[test]
    fn test_qpsk_zero_noise_saturates() {
        let config = config(ModulationScheme::Qpsk, 1, 1);
        let bits = payload(nof_bits(&config));
        let gain = Complex32::new(0.3, -1.2);
        let (grid, estimate) = transmit(&bits, &config, &[vec![gain]], 0.0);

        let result = PuschDemodulator::default().demodulate(&grid, &estimate, &config).unwrap();

        assert_eq!(result.llrs.len(), bits.len());
        for (llr, &bit) in result.llrs.iter().zip(&bits) {
            assert_eq!(llr.value().unsigned_abs(), LogLikelihoodRatio::LLR_MAX as u8);
            assert_eq!(llr.hard_decision(), bit);
        }
        assert!(result.stats.sinr_db.is_infinite());
        assert!(result.stats.evm < 1e-4);
    }

    #[test]
    fn test_placeholders_are_neutral() {
        let mut config = config(ModulationScheme::Qam16, 1, 1);
        config.placeholders = vec![0, 5, 17, 301];
        let bits = payload(nof_bits(&config));
        let (grid, estimate) = transmit(&bits, &config, &[vec![Complex32::new(1.0, 0.0)]], 0.01);

        let result = PuschDemodulator::default().demodulate(&grid, &estimate, &config).unwrap();

        for (i, llr) in result.llrs.iter().enumerate() {
            if config.placeholders.contains(&i) {
                assert_eq!(*llr, LogLikelihoodRatio::ZERO);
            } else {
                assert_eq!(llr.hard_decision(), bits[i]);
            }
        }
        assert!((result.stats.sinr_db - 20.0).abs() < 1e-3);
    }

    #[test]
    fn test_two_layer_zero_forcing() {
        let config = config(ModulationScheme::Qam64, 2, 2);
        let bits = payload(nof_bits(&config));
        let h = vec![
            vec![Complex32::new(1.0, 0.2), Complex32::new(0.4, -0.3)],
            vec![Complex32::new(-0.2, 0.5), Complex32::new(0.9, 0.1)],
        ];
        let (grid, estimate) = transmit(&bits, &config, &h, 1e-3);

        let result = PuschDemodulator::new(EqualizerAlgorithm::ZeroForcing)
            .demodulate(&grid, &estimate, &config)
            .unwrap();

        let decided: Vec<u8> = result.llrs.iter().map(|llr| llr.hard_decision()).collect();
        assert_eq!(decided, bits);
        assert!(result.stats.evm < 1e-3);
    }

    #[test]
    fn test_flat_and_grid_entry_points_agree() {
        let config = config(ModulationScheme::Qpsk, 2, 1);
        let bits = payload(nof_bits(&config));
        let h = vec![vec![Complex32::new(0.8, 0.1)], vec![Complex32::new(-0.4, 0.6)]];
        let noise_var = 0.05;
        let (grid, estimate) = transmit(&bits, &config, &h, noise_var);

        let coordinates = data_re_coordinates(&config);
        let mut rx = Vec::new();
        let mut ce = Vec::new();
        for port in 0..2 {
            for c in &coordinates {
                rx.push(grid.get_re(port, c.symbol as usize, c.subcarrier as usize).unwrap());
                ce.push(h[port][0]);
            }
        }

        let from_grid = PuschDemodulator::default().demodulate(&grid, &estimate, &config).unwrap();
        let from_flat = demodulate_pusch(&rx, &ce, noise_var, &config).unwrap();

        assert_eq!(from_grid, from_flat);
    }

    #[test]
    fn test_port_mapping() {
        let mut config = config(ModulationScheme::Qpsk, 1, 1);
        config.rx_ports = vec![1];
        let bits = payload(nof_bits(&config));
        // Grid port 0 carries nothing, grid port 1 the signal
        let (single, estimate) = transmit(&bits, &config, &[vec![Complex32::new(1.0, 0.0)]], 0.0);
        let mut grid = ResourceGrid::new(NOF_PRB * NRE, 14, 2).unwrap();
        for symbol in 0..14 {
            grid.put(1, symbol, 0, single.get_symbol(0, symbol).unwrap()).unwrap();
        }

        let result = PuschDemodulator::default().demodulate(&grid, &estimate, &config).unwrap();
        let decided: Vec<u8> = result.llrs.iter().map(|llr| llr.hard_decision()).collect();
        assert_eq!(decided, bits);
    }

    #[test]
    fn test_invalid_configurations() {
        let base = config(ModulationScheme::Qpsk, 1, 1);
        let nof_re = data_re_coordinates(&base).len();
        let rx = vec![Complex32::new(1.0, 0.0); nof_re];
        let ce = vec![Complex32::new(1.0, 0.0); nof_re];

        assert!(demodulate_pusch(&rx, &ce, 0.1, &base).is_ok());
        assert!(matches!(
            demodulate_pusch(&rx[1..], &ce, 0.1, &base),
            Err(PhyError::InvalidArgument(_))
        ));

        let too_many_layers = PuschDemodulatorConfig {
            nof_tx_layers: 5,
            rx_ports: (0..5).collect(),
            ..base.clone()
        };
        assert!(matches!(
            demodulate_pusch(&rx, &ce, 0.1, &too_many_layers),
            Err(PhyError::InvalidArgument(_))
        ));

        let bad_n_id = PuschDemodulatorConfig { n_id: 1024, ..base.clone() };
        assert!(demodulate_pusch(&rx, &ce, 0.1, &bad_n_id).is_err());

        let bad_placeholder = PuschDemodulatorConfig {
            placeholders: vec![2 * nof_re],
            ..base.clone()
        };
        assert!(demodulate_pusch(&rx, &ce, 0.1, &bad_placeholder).is_err());

        let bad_cdm = PuschDemodulatorConfig {
            nof_cdm_groups_without_data: 3,
            ..base
        };
        assert!(demodulate_pusch(&rx, &ce, 0.1, &bad_cdm).is_err());

        let unknown_modulation = "8PSK".parse::<ModulationScheme>().map_err(PhyError::from);
        assert!(matches!(unknown_modulation, Err(PhyError::InvalidArgument(_))));
    }

    #[test]
    fn test_oversized_rb_mask_rejected() {
        let mut rb_mask = vec![false; 5462];
        rb_mask[5461] = true;
        let oversized = PuschDemodulatorConfig {
            rb_mask,
            ..config(ModulationScheme::Qpsk, 1, 1)
        };
        let rx = vec![Complex32::new(0.7, 0.7); NRE];
        let ce = vec![Complex32::new(1.0, 0.0); NRE];

        assert!(matches!(
            demodulate_pusch(&rx, &ce, 0.0, &oversized),
            Err(PhyError::InvalidArgument(_))
        ));

        // The largest carrier is still accepted
        let mut widest = config(ModulationScheme::Qpsk, 1, 1);
        widest.rb_mask = vec![false; MAX_RB];
        widest.rb_mask[MAX_RB - 1] = true;
        let nof_re = data_re_coordinates(&widest).len();
        let rx = vec![Complex32::new(0.7, 0.7); nof_re];
        let ce = vec![Complex32::new(1.0, 0.0); nof_re];
        assert!(demodulate_pusch(&rx, &ce, 0.1, &widest).is_ok());
    }

    #[test]
    fn test_capabilities() {
        assert_eq!(pusch_processor_capabilities().max_nof_layers, MAX_NOF_LAYERS);
    }
}
