/// DMRS (Demodulation Reference Signal) helpers for PUSCH
/// Based on 3GPP TS 38.211 Section 6.4.1.1

use crate::pseudo_random::PseudoRandomGenerator;
use crate::PhyError;
use common::NRE;
use num_complex::Complex32;
use num_derive::FromPrimitive;
use num_traits::FromPrimitive;

/// DMRS Type configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive)]
pub enum DmrsType {
    Type1 = 1,
    Type2 = 2,
}

impl DmrsType {
    /// Map the configuration index (1 or 2)
    pub fn from_index(index: u8) -> Result<Self, PhyError> {
        Self::from_u8(index)
            .ok_or_else(|| PhyError::InvalidArgument(format!("Unknown DMRS type {}", index)))
    }

    /// Get number of DMRS per resource block and CDM group
    pub fn nof_dmrs_per_rb(&self) -> usize {
        match self {
            DmrsType::Type1 => 6,  // Every other subcarrier
            DmrsType::Type2 => 4,  // Two groups of 2 consecutive subcarriers
        }
    }

    /// Number of CDM groups
    pub fn nof_cdm_groups(&self) -> usize {
        match self {
            DmrsType::Type1 => 2,
            DmrsType::Type2 => 3,
        }
    }

    /// Subcarriers within a resource block occupied by a CDM group
    pub fn cdm_group_pattern(&self, cdm_group: usize) -> [bool; NRE] {
        let mut pattern = [false; NRE];
        for (k, re) in pattern.iter_mut().enumerate() {
            *re = match self {
                DmrsType::Type1 => k % 2 == cdm_group,
                DmrsType::Type2 => (k % 6) / 2 == cdm_group,
            };
        }
        pattern
    }

    /// Subcarriers within a resource block of a DM-RS symbol that cannot carry data
    pub fn reserved_pattern(&self, nof_cdm_groups_without_data: usize) -> [bool; NRE] {
        let mut reserved = [false; NRE];
        for cdm_group in 0..nof_cdm_groups_without_data.min(self.nof_cdm_groups()) {
            for (re, used) in reserved.iter_mut().zip(self.cdm_group_pattern(cdm_group)) {
                *re |= used;
            }
        }
        reserved
    }
}

/// Calculate PUSCH DMRS initialization value (transform precoding disabled)
/// c_init = (2^17 * (N_symb * n_slot + l + 1) * (2 * N_ID + 1) + 2 * N_ID + n_SCID) mod 2^31
pub fn calculate_pusch_dmrs_cinit(
    slot: u32,
    symbol: u8,
    nof_symbols_per_slot: u32,
    n_id: u16,
    n_scid: bool,
) -> u32 {
    let l = symbol as u64;
    let n_id = n_id as u64;
    let scid = if n_scid { 1 } else { 0 };
    let c_init = (1u64 << 17) * (nof_symbols_per_slot as u64 * slot as u64 + l + 1) * (2 * n_id + 1)
        + 2 * n_id
        + scid;
    (c_init & 0x7FFF_FFFF) as u32
}

/// Generate DMRS sequence for given resource blocks
pub fn generate_dmrs_sequence(
    rb_mask: &[bool],
    nof_dmrs_per_rb: usize,
    generator: &mut PseudoRandomGenerator,
    amplitude: f32,
) -> Vec<Complex32> {
    let mut sequence = Vec::new();
    let mut current_rb = 0;

    for (rb, &is_allocated) in rb_mask.iter().enumerate() {
        if !is_allocated {
            continue;
        }

        // Skip the QPSK symbols of the RBs between the current position and this RB
        if rb > current_rb {
            generator.skip(2 * (rb - current_rb) * nof_dmrs_per_rb);
        }

        for _ in 0..nof_dmrs_per_rb {
            sequence.push(generator.next_qpsk_symbol(amplitude));
        }

        current_rb = rb + 1;
    }

    sequence
}

/// Generate the PUSCH DM-RS of CDM group 0 for every symbol flagged in `symbols`
///
/// The output is ordered subcarrier first, then symbol, matching the pilot
/// layout consumed by the port channel estimator.
pub fn generate_pusch_dmrs(
    slot: u32,
    n_id: u16,
    symbols: &[bool],
    rb_mask: &[bool],
    dmrs_type: DmrsType,
    amplitude: f32,
) -> Vec<Complex32> {
    let nof_symbols_per_slot = symbols.len() as u32;

    symbols
        .iter()
        .enumerate()
        .filter(|(_, &is_dmrs)| is_dmrs)
        .flat_map(|(symbol, _)| {
            let c_init =
                calculate_pusch_dmrs_cinit(slot, symbol as u8, nof_symbols_per_slot, n_id, false);
            let mut generator = PseudoRandomGenerator::new(c_init);
            generate_dmrs_sequence(rb_mask, dmrs_type.nof_dmrs_per_rb(), &mut generator, amplitude)
        })
        .collect()
}
