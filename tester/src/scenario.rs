//! Scenario runners
//!
//! Each runner synthesises the received signal of one component, passes it
//! through an AWGN channel, runs the component and returns a JSON report.

use crate::config::{ChannelEstimationScenario, PrachScenario, PuschScenario, SlotConfig};
use anyhow::{anyhow, bail, Context, Result};
use common::{
    convert_db_to_power, mask_from_range, set_indices, CyclicPrefix, PhyTime, Rnti,
    SubcarrierSpacing, NRE,
};
use num_complex::Complex32;
use phy::dmrs::{generate_pusch_dmrs, DmrsType};
use phy::modulation::modulate;
use phy::prach_generator::generate_prach_preamble;
use phy::pseudo_random::PseudoRandomGenerator;
use phy::pusch_demodulator::{calculate_pusch_scrambling_cinit, data_re_coordinates};
use phy::{
    detect_prach, ChannelEstimate, ChannelEstimateDimensions, EqualizerAlgorithm, LayerDmrsPattern,
    PhyError, PortChannelEstimator, PortChannelEstimatorConfig, PortMetrics, PrachBuffer,
    PrachDetectionOutcome, PrachDetectorConfig, PuschDemodulator, PuschDemodulatorConfig,
    ResourceGrid,
};
use rand::rngs::StdRng;
use rand::Rng;
use serde_json::{json, Value};
use std::f32::consts::PI;
use tracing::{debug, info};

/// Complex AWGN source
pub struct NoiseSource {
    rng: StdRng,
    /// Standard deviation of each of the real and imaginary parts
    sigma: f32,
}

impl NoiseSource {
    pub fn new(rng: StdRng, snr_db: f32) -> Self {
        let noise_var = 1.0 / convert_db_to_power(snr_db);
        Self {
            rng,
            sigma: (noise_var / 2.0).sqrt(),
        }
    }

    /// Noise power per complex sample
    pub fn variance(&self) -> f32 {
        2.0 * self.sigma * self.sigma
    }

    /// Zero mean complex Gaussian sample of unit variance
    pub fn gaussian(&mut self) -> Complex32 {
        // Box-Muller
        let u1: f32 = self.rng.gen_range(f32::EPSILON..1.0);
        let u2: f32 = self.rng.gen();
        let r = (-u1.ln()).sqrt();
        Complex32::from_polar(r, 2.0 * PI * u2)
    }

    /// One noise sample
    pub fn sample(&mut self) -> Complex32 {
        self.gaussian() * self.variance().sqrt()
    }

    /// Random bit
    pub fn bit(&mut self) -> u8 {
        self.rng.gen_range(0..2)
    }

    /// Random unit-magnitude phasor
    pub fn phasor(&mut self) -> Complex32 {
        Complex32::from_polar(1.0, 2.0 * PI * self.rng.gen::<f32>())
    }
}

/// Detect preambles transmitted through an AWGN channel
pub fn run_prach(scenario: &PrachScenario, noise: &mut NoiseSource) -> Result<Value> {
    let config = PrachDetectorConfig {
        root_sequence_index: scenario.root_sequence_index,
        format: scenario.format.parse().map_err(PhyError::from)?,
        restricted_set: scenario.restricted_set.parse().map_err(PhyError::from)?,
        zero_correlation_zone: scenario.zero_correlation_zone,
        start_preamble_index: scenario.start_preamble_index,
        nof_preamble_indices: scenario.nof_preamble_indices,
    };
    let nof_symbols = scenario.nof_symbols.unwrap_or_else(|| config.format.num_symbols());
    let length = config.format.sequence_length();
    let sample_rate = length as f64 * config.format.subcarrier_spacing_hz();

    let mut symbols = vec![vec![Complex32::new(0.0, 0.0); length]; nof_symbols];
    for preamble in &scenario.preambles {
        let delay = preamble.delay_us * 1e-6 * sample_rate;
        let buffer = generate_prach_preamble(&config, preamble.preamble_index, delay, nof_symbols)
            .with_context(|| format!("Failed to generate preamble {}", preamble.preamble_index))?;

        for (i, symbol) in symbols.iter_mut().enumerate() {
            let generated = buffer
                .symbol(i)
                .ok_or_else(|| anyhow!("Generated preamble lacks symbol {}", i))?;
            for (out, &value) in symbol.iter_mut().zip(generated.iter()) {
                *out += value;
            }
        }
    }
    for value in symbols.iter_mut().flatten() {
        *value += noise.sample();
    }

    let buffer = PrachBuffer::from_symbols(&symbols)?;
    info!(
        "Running PRACH detection: format={:?}, {} preambles, {} symbols",
        config.format,
        scenario.preambles.len(),
        nof_symbols
    );

    match detect_prach(&buffer, &config) {
        Ok(PrachDetectionOutcome::Detected(result)) => Ok(json!({
            "status": "detected",
            "result": result,
        })),
        Ok(PrachDetectionOutcome::Skipped) => Ok(json!({ "status": "skipped" })),
        Err(PhyError::NotFound(reason)) => Ok(json!({
            "status": "not_found",
            "reason": reason,
        })),
        Err(e) => Err(e.into()),
    }
}

/// Parsed slot layout
struct Slot {
    cp: CyclicPrefix,
    scs: SubcarrierSpacing,
    nof_symbols_per_slot: usize,
    rb_mask: Vec<bool>,
    dmrs_symbols: Vec<bool>,
}

impl Slot {
    fn new(config: &SlotConfig) -> Result<Self> {
        let cp: CyclicPrefix = config.cyclic_prefix.parse().map_err(PhyError::from)?;
        let scs = SubcarrierSpacing::from_khz(config.scs_khz).map_err(PhyError::from)?;
        let nof_symbols_per_slot = cp.nof_symbols_per_slot();

        if config.rb_start + config.nof_rb > config.grid_prb {
            bail!(
                "Allocation of {} RBs from {} exceeds the {} RB grid",
                config.nof_rb,
                config.rb_start,
                config.grid_prb
            );
        }
        if let Some(&symbol) = config.dmrs_symbols.iter().find(|&&s| s >= nof_symbols_per_slot) {
            bail!("DM-RS symbol {} outside the slot", symbol);
        }

        Ok(Self {
            cp,
            scs,
            nof_symbols_per_slot,
            rb_mask: mask_from_range(
                config.grid_prb,
                config.rb_start,
                config.rb_start + config.nof_rb,
            ),
            dmrs_symbols: (0..nof_symbols_per_slot)
                .map(|s| config.dmrs_symbols.contains(&s))
                .collect(),
        })
    }

    /// Linear phase of a propagation delay at one subcarrier
    fn delay_phasor(&self, config: &SlotConfig, subcarrier: usize) -> Complex32 {
        let delay = config.delay_ns * 1e-9;
        let phase = -2.0 * std::f64::consts::PI * subcarrier as f64 * self.scs.to_hz() * delay;
        Complex32::from_polar(1.0, phase as f32)
    }
}

/// Pilots of a DM-RS pattern, subcarrier first then symbol, one hop after the other
fn pilots_for(
    slot_number: u32,
    n_id: u16,
    pattern: &LayerDmrsPattern,
    dmrs_type: DmrsType,
) -> Vec<Complex32> {
    let generate = |symbols: &[bool], rb_mask: &[bool]| {
        generate_pusch_dmrs(slot_number, n_id, symbols, rb_mask, dmrs_type, 1.0)
    };

    match pattern.hopping_symbol_index {
        None => generate(&pattern.symbols, &pattern.rb_mask),
        Some(hop) => {
            let hop_symbols = |second_hop: bool| -> Vec<bool> {
                pattern
                    .symbols
                    .iter()
                    .enumerate()
                    .map(|(s, &is_dmrs)| is_dmrs && (s >= hop) == second_hop)
                    .collect()
            };
            let mut pilots = generate(&hop_symbols(false), &pattern.rb_mask);
            pilots.extend(generate(&hop_symbols(true), &pattern.rb_mask2));
            pilots
        }
    }
}

/// Write `channel(port, subcarrier) * pilot` at every pilot RE of a pattern
fn place_pilots(
    grid: &mut ResourceGrid,
    pattern: &LayerDmrsPattern,
    pilots: &[Complex32],
    nof_ports: usize,
    channel: impl Fn(usize, usize) -> Complex32,
) -> Result<()> {
    for port in 0..nof_ports {
        let mut index = 0;
        for symbol in set_indices(&pattern.symbols) {
            let rb_mask = match pattern.hopping_symbol_index {
                Some(hop) if symbol >= hop => &pattern.rb_mask2,
                _ => &pattern.rb_mask,
            };
            for rb in set_indices(rb_mask) {
                for k in set_indices(&pattern.re_pattern) {
                    let sc = rb * NRE + k;
                    let pilot = pilots
                        .get(index)
                        .ok_or_else(|| anyhow!("Pilot sequence shorter than the DM-RS pattern"))?;
                    grid.put(port, symbol, sc, &[channel(port, sc) * pilot])?;
                    index += 1;
                }
            }
        }
    }
    Ok(())
}

fn add_noise(grid: &mut ResourceGrid, noise: &mut NoiseSource) -> Result<()> {
    for port in 0..grid.nof_ports() {
        for symbol in 0..grid.nof_symbols() {
            let row: Vec<Complex32> = grid
                .get_symbol(port, symbol)?
                .iter()
                .map(|&x| x + noise.sample())
                .collect();
            grid.put(port, symbol, 0, &row)?;
        }
    }
    Ok(())
}

fn metrics_report(metrics: &[PortMetrics], expected_noise: f32, expected_ta: PhyTime) -> Value {
    json!({
        "ports": metrics,
        "aggregate": PortMetrics::aggregate(metrics),
        "expected": {
            "noise_variance": expected_noise,
            "time_alignment": expected_ta,
        },
    })
}

/// Estimate the channel of a DM-RS transmission
pub fn run_channel_estimation(
    scenario: &ChannelEstimationScenario,
    noise: &mut NoiseSource,
) -> Result<Value> {
    let slot_config = &scenario.slot;
    let slot = Slot::new(slot_config)?;

    let (rb_mask2, hopping_symbol_index) = match scenario.hop_rb_start {
        Some(start) => (
            mask_from_range(slot_config.grid_prb, start, start + slot_config.nof_rb),
            Some(slot_config.start_symbol + slot_config.nof_symbols / 2),
        ),
        None => (Vec::new(), None),
    };
    let pattern = LayerDmrsPattern {
        symbols: slot.dmrs_symbols.clone(),
        rb_mask: slot.rb_mask.clone(),
        rb_mask2,
        hopping_symbol_index,
        re_pattern: DmrsType::Type1.cdm_group_pattern(0).to_vec(),
    };
    let config = PortChannelEstimatorConfig {
        cp: slot.cp,
        scs: slot.scs,
        first_symbol: slot_config.start_symbol,
        nof_symbols: slot_config.nof_symbols,
        dmrs_pattern: vec![pattern],
        scaling: scenario.scaling,
        rx_ports: (0..slot_config.nof_rx_ports).collect(),
    };

    let pattern = &config.dmrs_pattern[0];
    let pilots = pilots_for(slot_config.slot, slot_config.n_id_dmrs, pattern, DmrsType::Type1);
    let gains: Vec<Complex32> = (0..slot_config.nof_rx_ports).map(|_| noise.phasor()).collect();
    let mut grid = ResourceGrid::new(
        slot_config.grid_prb * NRE,
        slot.nof_symbols_per_slot,
        slot_config.nof_rx_ports,
    )?;
    place_pilots(&mut grid, &config.dmrs_pattern[0], &pilots, slot_config.nof_rx_ports, |port, sc| {
        gains[port] * slot.delay_phasor(slot_config, sc) * scenario.scaling
    })?;
    add_noise(&mut grid, noise)?;

    info!(
        "Running channel estimation: {} RBs, {} ports, {} pilots",
        slot_config.nof_rb,
        slot_config.nof_rx_ports,
        pilots.len()
    );
    let estimate = PortChannelEstimator::with_smoothing_width(scenario.smoothing_width)
        .estimate(&grid, &pilots, &config)?;

    Ok(metrics_report(
        &estimate.all_port_metrics(),
        noise.variance(),
        PhyTime::from_seconds(slot_config.delay_ns * 1e-9),
    ))
}

/// Demodulate a PUSCH transmission and count bit errors
pub fn run_pusch(scenario: &PuschScenario, noise: &mut NoiseSource) -> Result<Value> {
    let slot_config = &scenario.slot;
    let slot = Slot::new(slot_config)?;
    let nof_ports = slot_config.nof_rx_ports;
    let nof_layers = scenario.nof_tx_layers;
    let algorithm = match scenario.equalizer.as_str() {
        "zf" => EqualizerAlgorithm::ZeroForcing,
        "mrc" => EqualizerAlgorithm::MaximumRatio,
        other => bail!("Unknown equalizer {}", other),
    };
    let dmrs_type = DmrsType::from_index(scenario.dmrs_type)?;

    let config = PuschDemodulatorConfig {
        rnti: Rnti::new(scenario.rnti),
        rb_mask: slot.rb_mask.clone(),
        modulation: scenario.modulation.parse().map_err(PhyError::from)?,
        start_symbol_index: slot_config.start_symbol,
        nof_symbols: slot_config.nof_symbols,
        dmrs_symb_pos: slot.dmrs_symbols.clone(),
        dmrs_config_type: dmrs_type,
        nof_cdm_groups_without_data: scenario.nof_cdm_groups_without_data,
        n_id: scenario.n_id,
        nof_tx_layers: nof_layers,
        placeholders: Vec::new(),
        rx_ports: (0..nof_ports).collect(),
    };

    // Transmitted codeword, scrambled and mapped
    let coordinates = data_re_coordinates(&config);
    let nof_bits = coordinates.len() * nof_layers * config.modulation.bits_per_symbol();
    let bits: Vec<u8> = (0..nof_bits).map(|_| noise.bit()).collect();
    let c_init = calculate_pusch_scrambling_cinit(config.rnti, config.n_id);
    let mut scrambler = PseudoRandomGenerator::new(c_init);
    let scrambled: Vec<u8> = bits.iter().map(|&b| b ^ scrambler.next_bit()).collect();
    let symbols = modulate(&scrambled, config.modulation)?;

    // Each port favours one layer so that the layers stay separable
    let gains: Vec<Vec<Complex32>> = (0..nof_ports)
        .map(|port| {
            (0..nof_layers)
                .map(|layer| noise.phasor() * if port % nof_layers == layer { 1.0 } else { 0.3 })
                .collect()
        })
        .collect();
    let channel = |port: usize, layer: usize, sc: usize| {
        gains[port][layer] * slot.delay_phasor(slot_config, sc)
    };

    let mut grid =
        ResourceGrid::new(slot_config.grid_prb * NRE, slot.nof_symbols_per_slot, nof_ports)?;
    for port in 0..nof_ports {
        let values: Vec<Complex32> = coordinates
            .iter()
            .enumerate()
            .map(|(re, c)| {
                (0..nof_layers)
                    .map(|layer| {
                        let symbol = symbols[re * nof_layers + layer];
                        channel(port, layer, c.subcarrier as usize) * symbol
                    })
                    .sum()
            })
            .collect();
        grid.put_coordinates(port, &coordinates, &values)?;
    }

    // Single layer transmissions carry DM-RS and are estimated, others use ideal CSI
    let estimated = nof_layers == 1;
    if estimated {
        let pattern = LayerDmrsPattern {
            symbols: slot.dmrs_symbols.clone(),
            rb_mask: slot.rb_mask.clone(),
            rb_mask2: Vec::new(),
            hopping_symbol_index: None,
            re_pattern: dmrs_type.cdm_group_pattern(0).to_vec(),
        };
        let pilots = pilots_for(slot_config.slot, slot_config.n_id_dmrs, &pattern, dmrs_type);
        place_pilots(&mut grid, &pattern, &pilots, nof_ports, |port, sc| channel(port, 0, sc))?;
    }
    add_noise(&mut grid, noise)?;

    let estimate = if estimated {
        let estimator_config = PortChannelEstimatorConfig {
            cp: slot.cp,
            scs: slot.scs,
            first_symbol: slot_config.start_symbol,
            nof_symbols: slot_config.nof_symbols,
            dmrs_pattern: vec![LayerDmrsPattern {
                symbols: slot.dmrs_symbols.clone(),
                rb_mask: slot.rb_mask.clone(),
                rb_mask2: Vec::new(),
                hopping_symbol_index: None,
                re_pattern: dmrs_type.cdm_group_pattern(0).to_vec(),
            }],
            scaling: 1.0,
            rx_ports: config.rx_ports.clone(),
        };
        let pattern = &estimator_config.dmrs_pattern[0];
        let pilots = pilots_for(slot_config.slot, slot_config.n_id_dmrs, pattern, dmrs_type);
        PortChannelEstimator::new().estimate(&grid, &pilots, &estimator_config)?
    } else {
        ideal_estimate(&slot, slot_config, nof_layers, noise.variance(), channel)?
    };

    info!(
        "Running PUSCH demodulation: {} data REs, {} layers, {} ports, {}",
        coordinates.len(),
        nof_layers,
        nof_ports,
        config.modulation
    );
    let result = PuschDemodulator::new(algorithm).demodulate(&grid, &estimate, &config)?;

    let bit_errors = result
        .llrs
        .iter()
        .zip(&bits)
        .filter(|(llr, &bit)| llr.hard_decision() != bit)
        .count();
    debug!("PUSCH bit errors: {}/{}", bit_errors, nof_bits);

    Ok(json!({
        "channel_state": if estimated { "estimated" } else { "ideal" },
        "nof_bits": nof_bits,
        "bit_errors": bit_errors,
        "ber": bit_errors as f64 / nof_bits.max(1) as f64,
        "stats": result.stats,
    }))
}

/// Channel estimate equal to the true channel
fn ideal_estimate(
    slot: &Slot,
    slot_config: &SlotConfig,
    nof_layers: usize,
    noise_variance: f32,
    channel: impl Fn(usize, usize, usize) -> Complex32,
) -> Result<ChannelEstimate> {
    let mut estimate = ChannelEstimate::new(ChannelEstimateDimensions {
        nof_prb: slot_config.grid_prb,
        nof_symbols: slot.nof_symbols_per_slot,
        nof_rx_ports: slot_config.nof_rx_ports,
        nof_tx_layers: nof_layers,
    })?;

    for port in 0..slot_config.nof_rx_ports {
        for layer in 0..nof_layers {
            let mut path = estimate.path_mut(port, layer);
            for ((_, sc), value) in path.indexed_iter_mut() {
                *value = channel(port, layer, sc);
            }
            estimate.set_noise_variance(port, layer, noise_variance);
        }
    }
    Ok(estimate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScenarioConfig;
    use rand::SeedableRng;

    fn noise(snr_db: f32) -> NoiseSource {
        NoiseSource::new(StdRng::seed_from_u64(7), snr_db)
    }

    #[test]
    fn test_noise_variance_matches_snr() {
        let mut source = noise(10.0);
        assert!((source.variance() - 0.1).abs() < 1e-6);

        let power: f32 = (0..20000).map(|_| source.sample().norm_sqr()).sum::<f32>() / 20000.0;
        assert!((power - 0.1).abs() < 0.01);
    }

    #[test]
    fn test_prach_scenario_detects_preamble() {
        let config = ScenarioConfig::from_toml(
            r#"
            component = "prach"

            [prach]
            root_sequence_index = 22
            preambles = [{ preamble_index = 9, delay_us = 20.0 }]
            "#,
        )
        .unwrap();

        let report = run_prach(config.prach.as_ref().unwrap(), &mut noise(30.0)).unwrap();
        assert_eq!(report["status"], "detected");
        assert_eq!(report["result"]["preambles"][0]["preamble_index"], 9);
    }

    #[test]
    fn test_pusch_scenario_without_errors() {
        let config = ScenarioConfig::from_toml(
            r#"
            component = "pusch"

            [pusch]
            grid_prb = 10
            nof_rb = 4
            rb_start = 2
            nof_rx_ports = 2
            "#,
        )
        .unwrap();

        let report = run_pusch(config.pusch.as_ref().unwrap(), &mut noise(30.0)).unwrap();
        assert_eq!(report["channel_state"], "estimated");
        assert_eq!(report["bit_errors"], 0);
    }

    #[test]
    fn test_two_layer_pusch_uses_ideal_csi() {
        let config = ScenarioConfig::from_toml(
            r#"
            component = "pusch"

            [pusch]
            grid_prb = 4
            nof_rb = 4
            nof_rx_ports = 2
            nof_tx_layers = 2
            "#,
        )
        .unwrap();

        let report = run_pusch(config.pusch.as_ref().unwrap(), &mut noise(40.0)).unwrap();
        assert_eq!(report["channel_state"], "ideal");
        assert!(report["ber"].as_f64().unwrap() < 0.05);
    }

    #[test]
    fn test_channel_estimation_report() {
        let config = ScenarioConfig::from_toml(
            r#"
            component = "channel_estimation"

            [channel_estimation]
            grid_prb = 20
            nof_rb = 20
            nof_rx_ports = 2
            "#,
        )
        .unwrap();

        let scenario = config.channel_estimation.as_ref().unwrap();
        let report = run_channel_estimation(scenario, &mut noise(30.0)).unwrap();
        assert_eq!(report["ports"].as_array().unwrap().len(), 2);
        let rsrp = report["aggregate"]["rsrp"].as_f64().unwrap();
        assert!((rsrp - 1.0).abs() < 0.1);
    }

    #[test]
    fn test_unknown_equalizer_rejected() {
        let config = ScenarioConfig::from_toml(
            r#"
            component = "pusch"

            [pusch]
            equalizer = "mmse"
            "#,
        )
        .unwrap();

        assert!(run_pusch(config.pusch.as_ref().unwrap(), &mut noise(30.0)).is_err());
    }
}
