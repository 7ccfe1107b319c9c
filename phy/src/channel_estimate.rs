//! Channel estimate container
//!
//! Holds the estimated channel response of every receive port and transmit
//! layer together with the per-port measurements of the estimator.

use crate::PhyError;
use common::{convert_power_to_db, PhyTime, NRE};
use ndarray::{s, Array2, Array4, ArrayView1, ArrayView2, ArrayViewMut2};
use num_complex::Complex32;
use serde::Serialize;

/// Dimensions of a channel estimate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelEstimateDimensions {
    /// Number of resource blocks covered, starting at subcarrier 0
    pub nof_prb: usize,
    /// Number of OFDM symbols covered, starting at symbol 0
    pub nof_symbols: usize,
    /// Number of receive ports
    pub nof_rx_ports: usize,
    /// Number of transmit layers
    pub nof_tx_layers: usize,
}

impl ChannelEstimateDimensions {
    pub fn nof_subcarriers(&self) -> usize {
        self.nof_prb * NRE
    }

    fn nof_elements(&self) -> usize {
        self.nof_subcarriers() * self.nof_symbols * self.nof_rx_ports * self.nof_tx_layers
    }
}

/// Measurements of one receive port
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PortMetrics {
    /// Noise variance (linear)
    pub noise_variance: f32,
    /// Reference signal received power (linear)
    pub rsrp: f32,
    /// Energy per resource element of the received pilots (linear)
    pub epre: f32,
    /// Signal to interference plus noise ratio in dB
    pub sinr_db: f32,
    /// Time alignment of the channel
    pub time_alignment: PhyTime,
}

impl PortMetrics {
    /// Average the metrics of several ports
    ///
    /// The combined SINR depends on how the ports are combined, so it is NaN.
    pub fn aggregate(ports: &[PortMetrics]) -> PortMetrics {
        let n = ports.len() as f32;
        let mean = |f: fn(&PortMetrics) -> f32| ports.iter().map(f).sum::<f32>() / n;

        PortMetrics {
            noise_variance: mean(|m| m.noise_variance),
            rsrp: mean(|m| m.rsrp),
            epre: mean(|m| m.epre),
            sinr_db: f32::NAN,
            time_alignment: PhyTime::from_seconds(
                ports
                    .iter()
                    .map(|m| m.time_alignment.to_seconds())
                    .sum::<f64>()
                    / ports.len() as f64,
            ),
        }
    }
}

/// Estimated channel response and measurements
#[derive(Debug, Clone)]
pub struct ChannelEstimate {
    dimensions: ChannelEstimateDimensions,
    /// 4D estimate: [rx_port, tx_layer, symbol, subcarrier]
    coefficients: Array4<Complex32>,
    /// Noise variance: [rx_port, tx_layer]
    noise_variance: Array2<f32>,
    rsrp: Vec<f32>,
    epre: Vec<f32>,
    sinr_db: Vec<f32>,
    time_alignment: Vec<PhyTime>,
}

impl ChannelEstimate {
    /// Create an all-zero estimate
    pub fn new(dimensions: ChannelEstimateDimensions) -> Result<Self, PhyError> {
        if dimensions.nof_elements() == 0 {
            return Err(PhyError::InvalidArgument(format!(
                "Channel estimate dimensions must be non-zero: {:?}",
                dimensions
            )));
        }

        let ChannelEstimateDimensions {
            nof_symbols,
            nof_rx_ports,
            nof_tx_layers,
            ..
        } = dimensions;

        Ok(Self {
            dimensions,
            coefficients: Array4::zeros((
                nof_rx_ports,
                nof_tx_layers,
                nof_symbols,
                dimensions.nof_subcarriers(),
            )),
            noise_variance: Array2::zeros((nof_rx_ports, nof_tx_layers)),
            rsrp: vec![0.0; nof_rx_ports],
            epre: vec![0.0; nof_rx_ports],
            sinr_db: vec![0.0; nof_rx_ports],
            time_alignment: vec![PhyTime::ZERO; nof_rx_ports],
        })
    }

    /// Create an estimate from a flat buffer
    ///
    /// The buffer is ordered subcarrier first, then symbol, then receive port,
    /// then transmit layer.
    pub fn from_flat(
        dimensions: ChannelEstimateDimensions,
        data: &[Complex32],
    ) -> Result<Self, PhyError> {
        let mut estimate = Self::new(dimensions)?;
        if data.len() != dimensions.nof_elements() {
            return Err(PhyError::InvalidArgument(format!(
                "Channel estimate buffer holds {} elements, expected {}",
                data.len(),
                dimensions.nof_elements()
            )));
        }

        let path_len = dimensions.nof_subcarriers() * dimensions.nof_symbols;
        for (i_path, path) in data.chunks_exact(path_len).enumerate() {
            let port = i_path % dimensions.nof_rx_ports;
            let layer = i_path / dimensions.nof_rx_ports;
            let shape = (dimensions.nof_symbols, dimensions.nof_subcarriers());
            let view = ArrayView2::from_shape(shape, path)
                .map_err(|e| PhyError::InvalidArgument(e.to_string()))?;
            estimate.path_mut(port, layer).assign(&view);
        }

        Ok(estimate)
    }

    /// Flatten in the order used by [`ChannelEstimate::from_flat`]
    pub fn to_flat(&self) -> Vec<Complex32> {
        let mut data = Vec::with_capacity(self.dimensions.nof_elements());
        for layer in 0..self.dimensions.nof_tx_layers {
            for port in 0..self.dimensions.nof_rx_ports {
                data.extend(self.path(port, layer).iter().copied());
            }
        }
        data
    }

    pub fn dimensions(&self) -> ChannelEstimateDimensions {
        self.dimensions
    }

    /// Coefficient of one resource element
    pub fn get(&self, port: usize, layer: usize, symbol: usize, subcarrier: usize) -> Complex32 {
        self.coefficients
            .get((port, layer, symbol, subcarrier))
            .copied()
            .unwrap_or_default()
    }

    /// Estimate of one port and layer: [symbol, subcarrier]
    pub fn path(&self, port: usize, layer: usize) -> ArrayView2<'_, Complex32> {
        self.coefficients.slice(s![port, layer, .., ..])
    }

    /// Mutable estimate of one port and layer: [symbol, subcarrier]
    pub fn path_mut(&mut self, port: usize, layer: usize) -> ArrayViewMut2<'_, Complex32> {
        self.coefficients.slice_mut(s![port, layer, .., ..])
    }

    /// Estimate of one port, layer and symbol
    pub fn symbol(&self, port: usize, layer: usize, symbol: usize) -> ArrayView1<'_, Complex32> {
        self.coefficients.slice(s![port, layer, symbol, ..])
    }

    pub fn noise_variance(&self, port: usize, layer: usize) -> f32 {
        self.noise_variance[(port, layer)]
    }

    pub fn set_noise_variance(&mut self, port: usize, layer: usize, noise_variance: f32) {
        self.noise_variance[(port, layer)] = noise_variance;
    }

    /// Measurements of one receive port
    pub fn port_metrics(&self, port: usize) -> PortMetrics {
        let layers = self.dimensions.nof_tx_layers as f32;
        PortMetrics {
            noise_variance: self.noise_variance.row(port).sum() / layers,
            rsrp: self.rsrp[port],
            epre: self.epre[port],
            sinr_db: self.sinr_db[port],
            time_alignment: self.time_alignment[port],
        }
    }

    /// Measurements of every receive port, in port order
    pub fn all_port_metrics(&self) -> Vec<PortMetrics> {
        (0..self.dimensions.nof_rx_ports)
            .map(|port| self.port_metrics(port))
            .collect()
    }

    /// Store the measurements of one port
    ///
    /// SINR is derived from RSRP and noise variance, infinite when the noise is zero.
    pub fn set_port_measurements(
        &mut self,
        port: usize,
        rsrp: f32,
        epre: f32,
        noise_variance: f32,
        time_alignment: PhyTime,
    ) {
        self.rsrp[port] = rsrp;
        self.epre[port] = epre;
        self.sinr_db[port] = if noise_variance > 0.0 {
            convert_power_to_db(rsrp / noise_variance)
        } else {
            f32::INFINITY
        };
        self.time_alignment[port] = time_alignment;
        self.noise_variance.row_mut(port).fill(noise_variance);
    }
}
