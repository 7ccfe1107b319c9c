//! Resource Grid for 5G NR uplink processing
//!
//! Dense complex container indexed by antenna port, OFDM symbol and
//! subcarrier, written by symbol and read by symbol or by region.

use crate::PhyError;
use common::NRE;
use ndarray::{s, Array3};
use num_complex::Complex32;
use tracing::{debug, trace};

/// Position of a resource element within one port of the grid
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceGridCoordinate {
    /// Subcarrier index
    pub subcarrier: u16,
    /// OFDM symbol index within the slot
    pub symbol: u8,
}

/// Resource grid for one slot and several antenna ports
#[derive(Debug, Clone)]
pub struct ResourceGrid {
    /// 3D grid: [ports, symbols, subcarriers]
    grid: Array3<Complex32>,
}

impl ResourceGrid {
    /// Create a new resource grid with all elements set to zero
    pub fn new(
        nof_subcarriers: usize,
        nof_symbols: usize,
        nof_ports: usize,
    ) -> Result<Self, PhyError> {
        if nof_subcarriers == 0 || nof_symbols == 0 || nof_ports == 0 {
            return Err(PhyError::InvalidArgument(format!(
                "Resource grid dimensions must be non-zero: subcarriers={}, symbols={}, ports={}",
                nof_subcarriers, nof_symbols, nof_ports
            )));
        }

        debug!(
            "Creating resource grid with dimensions: ({}, {}, {})",
            nof_ports, nof_symbols, nof_subcarriers
        );
        let grid = Array3::zeros((nof_ports, nof_symbols, nof_subcarriers));

        Ok(Self { grid })
    }

    /// Create a grid from a flat buffer ordered subcarrier first, then symbol, then port
    pub fn from_column_major(
        nof_subcarriers: usize,
        nof_symbols: usize,
        nof_ports: usize,
        data: &[Complex32],
    ) -> Result<Self, PhyError> {
        let mut grid = Self::new(nof_subcarriers, nof_symbols, nof_ports)?;
        if data.len() != nof_subcarriers * nof_symbols * nof_ports {
            return Err(PhyError::InvalidArgument(format!(
                "Grid buffer holds {} elements, expected {}",
                data.len(),
                nof_subcarriers * nof_symbols * nof_ports
            )));
        }

        for (i_symbol_port, symbol_data) in data.chunks_exact(nof_subcarriers).enumerate() {
            let port = i_symbol_port / nof_symbols;
            let symbol = i_symbol_port % nof_symbols;
            grid.put(port, symbol, 0, symbol_data)?;
        }

        Ok(grid)
    }

    /// Number of subcarriers
    pub fn nof_subcarriers(&self) -> usize {
        self.grid.dim().2
    }

    /// Number of OFDM symbols
    pub fn nof_symbols(&self) -> usize {
        self.grid.dim().1
    }

    /// Number of antenna ports
    pub fn nof_ports(&self) -> usize {
        self.grid.dim().0
    }

    /// Number of complete resource blocks spanned by the grid width
    pub fn nof_prb(&self) -> usize {
        self.nof_subcarriers() / NRE
    }

    /// Clear the entire grid
    pub fn set_all_zero(&mut self) {
        self.grid.fill(Complex32::new(0.0, 0.0));
    }

    /// Write a contiguous run of samples into one symbol of one port
    pub fn put(
        &mut self,
        port: usize,
        symbol: usize,
        offset: usize,
        values: &[Complex32],
    ) -> Result<(), PhyError> {
        self.check_port_symbol(port, symbol)?;
        let end = offset + values.len();
        if end > self.nof_subcarriers() {
            return Err(PhyError::InvalidArgument(format!(
                "Write of {} samples at offset {} exceeds grid width {}",
                values.len(),
                offset,
                self.nof_subcarriers()
            )));
        }

        self.grid
            .slice_mut(s![port, symbol, offset..end])
            .assign(&ndarray::ArrayView1::from(values));
        trace!(
            "Wrote {} samples to port={}, symbol={}, offset={}",
            values.len(),
            port,
            symbol,
            offset
        );
        Ok(())
    }

    /// Write a list of resource elements of one port
    pub fn put_coordinates(
        &mut self,
        port: usize,
        coordinates: &[ResourceGridCoordinate],
        values: &[Complex32],
    ) -> Result<(), PhyError> {
        if coordinates.len() != values.len() {
            return Err(PhyError::InvalidArgument(format!(
                "Number of coordinates ({}) and values ({}) do not match",
                coordinates.len(),
                values.len()
            )));
        }

        for (coordinate, &value) in coordinates.iter().zip(values) {
            let symbol = coordinate.symbol as usize;
            let subcarrier = coordinate.subcarrier as usize;
            self.check_port_symbol(port, symbol)?;
            if subcarrier >= self.nof_subcarriers() {
                return Err(PhyError::InvalidArgument(format!(
                    "RE out of bounds: subcarrier={}, symbol={}",
                    subcarrier, symbol
                )));
            }
            self.grid[(port, symbol, subcarrier)] = value;
        }

        Ok(())
    }

    /// Full-width view of one symbol of one port
    pub fn get_symbol(&self, port: usize, symbol: usize) -> Result<&[Complex32], PhyError> {
        self.get_region(port, symbol, 0, self.nof_subcarriers())
    }

    /// View of `count` subcarriers of one symbol starting at `start`
    pub fn get_region(
        &self,
        port: usize,
        symbol: usize,
        start: usize,
        count: usize,
    ) -> Result<&[Complex32], PhyError> {
        self.check_port_symbol(port, symbol)?;
        if start + count > self.nof_subcarriers() {
            return Err(PhyError::InvalidArgument(format!(
                "Region [{}, {}) exceeds grid width {}",
                start,
                start + count,
                self.nof_subcarriers()
            )));
        }

        self.grid
            .slice(s![port, symbol, start..start + count])
            .to_slice()
            .ok_or_else(|| PhyError::InvalidArgument("Grid symbol is not contiguous".to_string()))
    }

    /// Get a single resource element
    pub fn get_re(&self, port: usize, symbol: usize, subcarrier: usize) -> Option<Complex32> {
        self.grid.get((port, symbol, subcarrier)).copied()
    }

    fn check_port_symbol(&self, port: usize, symbol: usize) -> Result<(), PhyError> {
        if port >= self.nof_ports() || symbol >= self.nof_symbols() {
            return Err(PhyError::InvalidArgument(format!(
                "Port {} or symbol {} out of bounds (ports={}, symbols={})",
                port,
                symbol,
                self.nof_ports(),
                self.nof_symbols()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(len: usize, scale: f32) -> Vec<Complex32> {
        (0..len).map(|i| Complex32::new(i as f32 * scale, -(i as f32))).collect()
    }

    #[test]
    fn test_resource_grid_creation() {
        let grid = ResourceGrid::new(52 * NRE, 14, 2).unwrap();

        assert_eq!(grid.nof_subcarriers(), 624);
        assert_eq!(grid.nof_symbols(), 14);
        assert_eq!(grid.nof_ports(), 2);
        assert_eq!(grid.nof_prb(), 52);
        assert!(grid.get_symbol(1, 13).unwrap().iter().all(|v| v.norm() == 0.0));
        assert!(ResourceGrid::new(0, 14, 1).is_err());
    }

    #[test]
    fn test_write_then_read() {
        let mut grid = ResourceGrid::new(48, 14, 2).unwrap();
        let values = ramp(20, 0.5);

        grid.put(1, 3, 7, &values).unwrap();

        assert_eq!(grid.get_region(1, 3, 7, 20).unwrap(), values.as_slice());
        // Other ports and symbols are untouched
        assert!(grid.get_symbol(0, 3).unwrap().iter().all(|v| v.norm() == 0.0));
        assert!(grid.get_symbol(1, 4).unwrap().iter().all(|v| v.norm() == 0.0));
        assert_eq!(grid.get_re(1, 3, 7), Some(values[0]));
    }

    #[test]
    fn test_write_exceeding_width_fails() {
        let mut grid = ResourceGrid::new(12, 1, 1).unwrap();

        let result = grid.put(0, 0, 5, &ramp(8, 1.0));
        assert!(matches!(result, Err(PhyError::InvalidArgument(_))));
        assert!(grid.get_region(0, 0, 10, 3).is_err());
        assert!(grid.get_symbol(1, 0).is_err());
    }

    #[test]
    fn test_put_coordinates() {
        let mut grid = ResourceGrid::new(24, 14, 1).unwrap();
        let coordinates = [
            ResourceGridCoordinate { subcarrier: 3, symbol: 2 },
            ResourceGridCoordinate { subcarrier: 23, symbol: 13 },
        ];
        let values = [Complex32::new(1.0, 2.0), Complex32::new(-1.0, 0.5)];

        grid.put_coordinates(0, &coordinates, &values).unwrap();

        assert_eq!(grid.get_re(0, 2, 3), Some(values[0]));
        assert_eq!(grid.get_re(0, 13, 23), Some(values[1]));

        let outside = [ResourceGridCoordinate { subcarrier: 24, symbol: 0 }];
        assert!(grid.put_coordinates(0, &outside, &values[..1]).is_err());
    }

    #[test]
    fn test_from_column_major_layout() {
        // Subcarrier first, then symbol, then port
        let data = ramp(12 * 2 * 2, 1.0);
        let grid = ResourceGrid::from_column_major(12, 2, 2, &data).unwrap();

        assert_eq!(grid.get_symbol(0, 0).unwrap(), &data[0..12]);
        assert_eq!(grid.get_symbol(0, 1).unwrap(), &data[12..24]);
        assert_eq!(grid.get_symbol(1, 0).unwrap(), &data[24..36]);
        assert!(ResourceGrid::from_column_major(12, 2, 2, &data[1..]).is_err());
    }

    #[test]
    fn test_set_all_zero() {
        let mut grid = ResourceGrid::new(12, 2, 1).unwrap();
        grid.put(0, 1, 0, &ramp(12, 1.0)).unwrap();

        grid.set_all_zero();

        assert!(grid.get_symbol(0, 1).unwrap().iter().all(|v| v.norm() == 0.0));
    }
}
