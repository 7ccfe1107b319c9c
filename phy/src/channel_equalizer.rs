//! Channel equalizer for multi-port, multi-layer reception
//!
//! Recovers the transmitted layer symbols of one resource element together
//! with their post-equalization noise variances.

use ndarray::{Array2, ArrayView2};
use num_complex::Complex32;
use num_traits::Zero;

/// Equalization strategy, selected when the demodulator is built
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EqualizerAlgorithm {
    /// Noise-whitened pseudo-inverse of the channel matrix
    #[default]
    ZeroForcing,
    /// Per-layer matched filter combining across receive ports
    MaximumRatio,
}

/// Channel equalizer
#[derive(Debug, Clone, Copy, Default)]
pub struct ChannelEqualizer {
    algorithm: EqualizerAlgorithm,
}

impl ChannelEqualizer {
    pub fn new(algorithm: EqualizerAlgorithm) -> Self {
        Self { algorithm }
    }

    pub fn algorithm(&self) -> EqualizerAlgorithm {
        self.algorithm
    }

    /// Equalize one resource element
    ///
    /// `rx` holds one sample per receive port, `channel` is indexed
    /// `[port, layer]` and `noise_vars` holds one variance per port. Layers
    /// that cannot be recovered are set to zero with infinite noise.
    pub fn equalize(
        &self,
        rx: &[Complex32],
        channel: ArrayView2<'_, Complex32>,
        noise_vars: &[f32],
        symbols: &mut [Complex32],
        post_noise_vars: &mut [f32],
    ) {
        let (nof_ports, nof_layers) = channel.dim();
        debug_assert_eq!(rx.len(), nof_ports);
        debug_assert_eq!(noise_vars.len(), nof_ports);

        // Whiten with the per-port noise when every port reports some. Otherwise
        // fall back to an unweighted filter scaled by the mean noise.
        let whitened = noise_vars.iter().all(|&n| n > 0.0 && n.is_finite());
        let weights: Vec<f32> = if whitened {
            noise_vars.iter().map(|&n| 1.0 / n).collect()
        } else {
            vec![1.0; nof_ports]
        };
        let noise_scale = if whitened {
            1.0
        } else {
            noise_vars.iter().sum::<f32>() / nof_ports.max(1) as f32
        };

        let recovered = match self.algorithm {
            EqualizerAlgorithm::ZeroForcing => {
                zero_forcing(rx, channel, &weights, noise_scale, symbols, post_noise_vars)
            }
            EqualizerAlgorithm::MaximumRatio => {
                maximum_ratio(rx, channel, &weights, noise_scale, symbols, post_noise_vars);
                true
            }
        };

        if !recovered {
            symbols[..nof_layers].fill(Complex32::zero());
            post_noise_vars[..nof_layers].fill(f32::INFINITY);
        }
    }
}

fn zero_forcing(
    rx: &[Complex32],
    channel: ArrayView2<'_, Complex32>,
    weights: &[f32],
    noise_scale: f32,
    symbols: &mut [Complex32],
    post_noise_vars: &mut [f32],
) -> bool {
    let (nof_ports, nof_layers) = channel.dim();

    // Gram matrix G = H^H W H and matched output H^H W y
    let mut gram = Array2::<Complex32>::zeros((nof_layers, nof_layers));
    let mut matched = vec![Complex32::zero(); nof_layers];
    for port in 0..nof_ports {
        let w = weights[port];
        for i in 0..nof_layers {
            let h_conj = channel[(port, i)].conj() * w;
            matched[i] += h_conj * rx[port];
            for j in 0..nof_layers {
                gram[(i, j)] += h_conj * channel[(port, j)];
            }
        }
    }

    let inverse = match invert(gram) {
        Some(inverse) => inverse,
        None => return false,
    };

    for layer in 0..nof_layers {
        symbols[layer] = (0..nof_layers)
            .map(|j| inverse[(layer, j)] * matched[j])
            .sum();
        post_noise_vars[layer] = inverse[(layer, layer)].re.max(0.0) * noise_scale;
    }
    true
}

fn maximum_ratio(
    rx: &[Complex32],
    channel: ArrayView2<'_, Complex32>,
    weights: &[f32],
    noise_scale: f32,
    symbols: &mut [Complex32],
    post_noise_vars: &mut [f32],
) {
    let (nof_ports, nof_layers) = channel.dim();

    for layer in 0..nof_layers {
        let mut numerator = Complex32::zero();
        let mut gain = 0.0;
        for port in 0..nof_ports {
            let h = channel[(port, layer)];
            numerator += h.conj() * rx[port] * weights[port];
            gain += h.norm_sqr() * weights[port];
        }

        if gain > 0.0 {
            symbols[layer] = numerator / gain;
            post_noise_vars[layer] = noise_scale / gain;
        } else {
            symbols[layer] = Complex32::zero();
            post_noise_vars[layer] = f32::INFINITY;
        }
    }
}

/// Invert a square matrix by Gauss-Jordan elimination with partial pivoting
///
/// Returns `None` when the matrix is singular.
pub fn invert(mut matrix: Array2<Complex32>) -> Option<Array2<Complex32>> {
    let n = matrix.nrows();
    if n != matrix.ncols() {
        return None;
    }

    let magnitude = matrix.iter().map(|x| x.norm()).fold(0.0_f32, f32::max);
    if magnitude == 0.0 {
        return None;
    }
    let tolerance = magnitude * f32::EPSILON * n as f32;

    let mut inverse = Array2::<Complex32>::eye(n);

    for col in 0..n {
        let pivot_row = (col..n).max_by(|&a, &b| {
            matrix[(a, col)]
                .norm()
                .total_cmp(&matrix[(b, col)].norm())
        })?;
        if matrix[(pivot_row, col)].norm() <= tolerance {
            return None;
        }

        if pivot_row != col {
            for k in 0..n {
                matrix.swap((pivot_row, k), (col, k));
                inverse.swap((pivot_row, k), (col, k));
            }
        }

        let pivot_inv = matrix[(col, col)].inv();
        for k in 0..n {
            matrix[(col, k)] *= pivot_inv;
            inverse[(col, k)] *= pivot_inv;
        }

        for row in 0..n {
            if row == col {
                continue;
            }
            let factor = matrix[(row, col)];
            if factor.is_zero() {
                continue;
            }
            for k in 0..n {
                let m = matrix[(col, k)];
                let i = inverse[(col, k)];
                matrix[(row, k)] -= factor * m;
                inverse[(row, k)] -= factor * i;
            }
        }
    }

    Some(inverse)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn c(re: f32, im: f32) -> Complex32 {
        Complex32::new(re, im)
    }

    #[test]
    fn test_invert_2x2() {
        let m = array![[c(2.0, 0.0), c(1.0, 1.0)], [c(0.0, -1.0), c(3.0, 0.0)]];
        let inverse = invert(m.clone()).unwrap();
        let product = m.dot(&inverse);

        for i in 0..2 {
            for j in 0..2 {
                let expected = if i == j { c(1.0, 0.0) } else { c(0.0, 0.0) };
                assert!((product[(i, j)] - expected).norm() < 1e-5);
            }
        }
    }

    #[test]
    fn test_invert_singular() {
        let m = array![[c(1.0, 0.0), c(2.0, 0.0)], [c(2.0, 0.0), c(4.0, 0.0)]];
        assert!(invert(m).is_none());
        assert!(invert(Array2::zeros((3, 3))).is_none());
    }

    #[test]
    fn test_zero_forcing_separates_layers() {
        let channel = array![[c(1.0, 0.0), c(0.5, 0.5)], [c(-0.3, 0.2), c(1.0, -0.4)]];
        let tx = [c(0.7, 0.7), c(-0.7, 0.7)];
        let rx: Vec<Complex32> = (0..2)
            .map(|p| channel[(p, 0)] * tx[0] + channel[(p, 1)] * tx[1])
            .collect();

        let equalizer = ChannelEqualizer::new(EqualizerAlgorithm::ZeroForcing);
        let mut symbols = [Complex32::zero(); 2];
        let mut noise = [0.0; 2];
        equalizer.equalize(&rx, channel.view(), &[0.1, 0.1], &mut symbols, &mut noise);

        for layer in 0..2 {
            assert!((symbols[layer] - tx[layer]).norm() < 1e-5);
            assert!(noise[layer] > 0.0 && noise[layer].is_finite());
        }
    }

    #[test]
    fn test_single_layer_algorithms_agree() {
        let channel = array![[c(0.8, -0.1)], [c(0.2, 0.9)]];
        let tx = c(-0.3, 0.9);
        let rx = [channel[(0, 0)] * tx, channel[(1, 0)] * tx];
        let noise_vars = [0.05, 0.2];

        let mut zf = ([Complex32::zero(); 1], [0.0; 1]);
        let mut mrc = ([Complex32::zero(); 1], [0.0; 1]);
        ChannelEqualizer::new(EqualizerAlgorithm::ZeroForcing)
            .equalize(&rx, channel.view(), &noise_vars, &mut zf.0, &mut zf.1);
        ChannelEqualizer::new(EqualizerAlgorithm::MaximumRatio)
            .equalize(&rx, channel.view(), &noise_vars, &mut mrc.0, &mut mrc.1);

        assert!((zf.0[0] - tx).norm() < 1e-5);
        assert!((mrc.0[0] - tx).norm() < 1e-5);
        assert!((zf.1[0] - mrc.1[0]).abs() < 1e-5);
    }

    #[test]
    fn test_zero_channel_gives_infinite_noise() {
        let channel = Array2::<Complex32>::zeros((2, 1));
        let mut symbols = [c(1.0, 1.0)];
        let mut noise = [0.0];

        ChannelEqualizer::default().equalize(
            &[c(0.3, 0.1), c(0.0, 1.0)],
            channel.view(),
            &[0.1, 0.1],
            &mut symbols,
            &mut noise,
        );

        assert_eq!(symbols[0], Complex32::zero());
        assert!(noise[0].is_infinite());
    }
}
