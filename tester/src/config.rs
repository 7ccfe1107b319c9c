//! Scenario configuration structures
//!
//! A scenario names the component under test, the channel impairments and the
//! parameters of that component. Enumerations are written as the usual 3GPP
//! tags ("QPSK", "A1", "UnrestrictedSet", ...) and mapped on use.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Component exercised by a scenario
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Component {
    Prach,
    ChannelEstimation,
    Pusch,
}

/// Top level scenario file
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScenarioConfig {
    /// Component under test
    pub component: Component,
    /// Signal to noise ratio per received sample in dB
    #[serde(default = "default_snr_db")]
    pub snr_db: f32,
    /// Seed of the noise generator
    #[serde(default)]
    pub seed: u64,
    /// PRACH detection parameters
    pub prach: Option<PrachScenario>,
    /// Channel estimation parameters
    pub channel_estimation: Option<ChannelEstimationScenario>,
    /// PUSCH demodulation parameters
    pub pusch: Option<PuschScenario>,
}

fn default_snr_db() -> f32 {
    30.0
}

/// PRACH scenario
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PrachScenario {
    /// Preamble format tag ("0".."3", "A1", "B4", ...)
    #[serde(default = "default_prach_format")]
    pub format: String,
    /// Logical root sequence index
    #[serde(default)]
    pub root_sequence_index: u16,
    /// Restricted set tag
    #[serde(default = "default_restricted_set")]
    pub restricted_set: String,
    /// Zero correlation zone configuration index
    #[serde(default = "default_zero_correlation_zone")]
    pub zero_correlation_zone: u8,
    /// First monitored preamble index
    #[serde(default)]
    pub start_preamble_index: u8,
    /// Number of monitored preamble indices
    #[serde(default = "default_nof_preamble_indices")]
    pub nof_preamble_indices: u8,
    /// Transmitted preambles
    #[serde(default = "default_preambles")]
    pub preambles: Vec<PreambleTransmission>,
    /// Number of PRACH symbols, the format's own count when absent
    pub nof_symbols: Option<usize>,
}

/// One transmitted preamble
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PreambleTransmission {
    /// Preamble index (0-63)
    pub preamble_index: usize,
    /// Propagation delay in microseconds
    #[serde(default)]
    pub delay_us: f64,
}

fn default_prach_format() -> String {
    "0".to_string()
}

fn default_restricted_set() -> String {
    "UnrestrictedSet".to_string()
}

fn default_zero_correlation_zone() -> u8 {
    12
}

fn default_nof_preamble_indices() -> u8 {
    64
}

fn default_preambles() -> Vec<PreambleTransmission> {
    vec![PreambleTransmission {
        preamble_index: 0,
        delay_us: 0.0,
    }]
}

/// Uplink slot layout shared by the channel estimation and PUSCH scenarios
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SlotConfig {
    /// Cyclic prefix tag ("normal" or "extended")
    #[serde(default = "default_cyclic_prefix")]
    pub cyclic_prefix: String,
    /// Subcarrier spacing in kHz
    #[serde(default = "default_scs_khz")]
    pub scs_khz: u32,
    /// Slot number within the frame
    #[serde(default)]
    pub slot: u32,
    /// Resource blocks of the grid
    #[serde(default = "default_grid_prb")]
    pub grid_prb: usize,
    /// First allocated resource block
    #[serde(default)]
    pub rb_start: usize,
    /// Number of allocated resource blocks
    #[serde(default = "default_nof_rb")]
    pub nof_rb: usize,
    /// First OFDM symbol of the allocation
    #[serde(default)]
    pub start_symbol: usize,
    /// Number of OFDM symbols of the allocation
    #[serde(default = "default_nof_symbols")]
    pub nof_symbols: usize,
    /// OFDM symbols carrying DM-RS
    #[serde(default = "default_dmrs_symbols")]
    pub dmrs_symbols: Vec<usize>,
    /// DM-RS scrambling identity
    #[serde(default)]
    pub n_id_dmrs: u16,
    /// Number of receive ports
    #[serde(default = "default_nof_rx_ports")]
    pub nof_rx_ports: usize,
    /// Propagation delay in nanoseconds
    #[serde(default)]
    pub delay_ns: f64,
}

fn default_cyclic_prefix() -> String {
    "normal".to_string()
}

fn default_scs_khz() -> u32 {
    30
}

fn default_grid_prb() -> usize {
    52
}

fn default_nof_rb() -> usize {
    52
}

fn default_nof_symbols() -> usize {
    14
}

fn default_dmrs_symbols() -> Vec<usize> {
    vec![2, 11]
}

fn default_nof_rx_ports() -> usize {
    1
}

/// Channel estimation scenario
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChannelEstimationScenario {
    #[serde(flatten)]
    pub slot: SlotConfig,
    /// DM-RS amplitude scaling
    #[serde(default = "default_scaling")]
    pub scaling: f32,
    /// First allocated resource block after the hop, no hopping when absent
    pub hop_rb_start: Option<usize>,
    /// Frequency span of the smoothing filter in subcarriers
    #[serde(default = "default_smoothing_width")]
    pub smoothing_width: usize,
}

fn default_scaling() -> f32 {
    1.0
}

fn default_smoothing_width() -> usize {
    12
}

/// PUSCH demodulation scenario
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PuschScenario {
    #[serde(flatten)]
    pub slot: SlotConfig,
    /// Modulation tag ("pi/2-BPSK", "QPSK", "QAM16", ...)
    #[serde(default = "default_modulation")]
    pub modulation: String,
    /// RNTI of the UE
    #[serde(default = "default_rnti")]
    pub rnti: u16,
    /// Data scrambling identity
    #[serde(default)]
    pub n_id: u16,
    /// DM-RS configuration type (1 or 2)
    #[serde(default = "default_dmrs_type")]
    pub dmrs_type: u8,
    /// Number of DM-RS CDM groups without data
    #[serde(default = "default_cdm_groups")]
    pub nof_cdm_groups_without_data: usize,
    /// Number of transmit layers
    #[serde(default = "default_nof_layers")]
    pub nof_tx_layers: usize,
    /// Equalizer ("zf" or "mrc")
    #[serde(default = "default_equalizer")]
    pub equalizer: String,
}

fn default_modulation() -> String {
    "QPSK".to_string()
}

fn default_rnti() -> u16 {
    0x4601
}

fn default_dmrs_type() -> u8 {
    1
}

fn default_cdm_groups() -> usize {
    2
}

fn default_nof_layers() -> usize {
    1
}

fn default_equalizer() -> String {
    "zf".to_string()
}

impl ScenarioConfig {
    /// Load a scenario from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read scenario file {}", path.display()))?;
        Self::from_toml(&content)
            .with_context(|| format!("Failed to parse scenario file {}", path.display()))
    }

    /// Parse a scenario from TOML text
    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }
}
