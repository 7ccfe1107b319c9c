//! Pseudo-random sequence generator
//!
//! Length-31 Gold sequence of 3GPP TS 38.211 Section 5.2.1, used for DM-RS
//! generation and PUSCH scrambling.

use num_complex::Complex32;

/// Number of initial iterations discarded from the sequence
const NC: usize = 1600;

/// Mask of the 31-bit LFSR state
const STATE_MASK: u32 = 0x7FFF_FFFF;

/// Gold sequence generator
#[derive(Debug, Clone)]
pub struct PseudoRandomGenerator {
    /// Bit 0 holds x1(n), bit 30 holds x1(n + 30)
    x1: u32,
    /// Bit 0 holds x2(n), bit 30 holds x2(n + 30)
    x2: u32,
}

impl PseudoRandomGenerator {
    /// Create a generator initialised with `c_init`
    pub fn new(c_init: u32) -> Self {
        // x1(0) = 1, x1(n) = 0 for n = 1..30
        let mut generator = Self {
            x1: 1,
            x2: c_init & STATE_MASK,
        };

        for _ in 0..NC {
            generator.advance();
        }

        generator
    }

    fn advance(&mut self) {
        // x1(n+31) = (x1(n+3) + x1(n)) mod 2
        let x1_new = ((self.x1 >> 3) ^ self.x1) & 1;
        self.x1 = ((self.x1 >> 1) | (x1_new << 30)) & STATE_MASK;

        // x2(n+31) = (x2(n+3) + x2(n+2) + x2(n+1) + x2(n)) mod 2
        let x2_new = ((self.x2 >> 3) ^ (self.x2 >> 2) ^ (self.x2 >> 1) ^ self.x2) & 1;
        self.x2 = ((self.x2 >> 1) | (x2_new << 30)) & STATE_MASK;
    }

    /// Generate the next bit of the sequence
    pub fn next_bit(&mut self) -> u8 {
        let c = (self.x1 ^ self.x2) & 1;
        self.advance();
        c as u8
    }

    /// Generate the next `count` bits
    pub fn generate_bits(&mut self, count: usize) -> Vec<u8> {
        (0..count).map(|_| self.next_bit()).collect()
    }

    /// Generate a QPSK symbol from the next two bits
    pub fn next_qpsk_symbol(&mut self, amplitude: f32) -> Complex32 {
        let c0 = self.next_bit();
        let c1 = self.next_bit();

        Complex32::new(
            amplitude * (1.0 - 2.0 * c0 as f32),
            amplitude * (1.0 - 2.0 * c1 as f32),
        )
    }

    /// Skip `count` bits
    pub fn skip(&mut self, count: usize) {
        for _ in 0..count {
            self.advance();
        }
    }
}
