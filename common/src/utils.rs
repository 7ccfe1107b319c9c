//! Common Utilities
//!
//! Provides the power conversion and bit mask helpers used across the PHY

use tracing::trace;

/// Convert a linear power ratio to decibels
pub fn convert_power_to_db(power: f32) -> f32 {
    10.0 * power.log10()
}

/// Convert decibels to a linear power ratio
pub fn convert_db_to_power(db: f32) -> f32 {
    10.0_f32.powf(db / 10.0)
}

/// Number of entries set in a boolean mask
pub fn count_set(mask: &[bool]) -> usize {
    mask.iter().filter(|&&bit| bit).count()
}

/// Indices of the entries set in a boolean mask, in ascending order
pub fn set_indices(mask: &[bool]) -> Vec<usize> {
    let indices: Vec<usize> = mask
        .iter()
        .enumerate()
        .filter_map(|(i, &bit)| bit.then_some(i))
        .collect();
    trace!("Mask of {} entries has {} set", mask.len(), indices.len());
    indices
}

/// Build a mask of `len` entries with the range `[start, end)` set
pub fn mask_from_range(len: usize, start: usize, end: usize) -> Vec<bool> {
    (0..len).map(|i| i >= start && i < end).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_power_conversion() {
        assert!((convert_power_to_db(100.0) - 20.0).abs() < 1e-5);
        assert!((convert_db_to_power(-3.0) - 0.501_187).abs() < 1e-5);
        assert_eq!(convert_power_to_db(0.0), f32::NEG_INFINITY);
    }

    #[test]
    fn test_mask_helpers() {
        let mask = mask_from_range(6, 1, 4);
        assert_eq!(mask, vec![false, true, true, true, false, false]);
        assert_eq!(count_set(&mask), 3);
        assert_eq!(set_indices(&mask), vec![1, 2, 3]);
    }
}
