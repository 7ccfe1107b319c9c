//! Common Types for the 5G NR uplink PHY
//!
//! Defines the fundamental radio types shared by the PHY processors

use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::FromPrimitive;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Number of subcarriers in a resource block
pub const NRE: usize = 12;

/// Maximum number of resource blocks in a carrier
pub const MAX_RB: usize = 275;

/// Maximum number of OFDM symbols in a slot (normal cyclic prefix)
pub const MAX_NSYMB_PER_SLOT: usize = 14;

/// Error returned when a configuration tag cannot be mapped to a radio type
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("Unknown modulation {0}")]
    UnknownModulation(String),

    #[error("Unknown cyclic prefix {0}")]
    UnknownCyclicPrefix(String),

    #[error("Unknown subcarrier spacing {0} kHz")]
    UnknownSubcarrierSpacing(u32),

    #[error("Unknown {kind} {value}")]
    UnknownTag { kind: &'static str, value: String },
}

/// Radio Network Temporary Identifier (RNTI)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rnti(pub u16);

impl Rnti {
    /// Create a new RNTI
    pub fn new(value: u16) -> Self {
        Self(value)
    }

    /// Get the RNTI value
    pub fn value(&self) -> u16 {
        self.0
    }
}

/// Subcarrier spacing values in kHz
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, ToPrimitive, Serialize, Deserialize)]
pub enum SubcarrierSpacing {
    /// 15 kHz
    Scs15 = 15,
    /// 30 kHz
    Scs30 = 30,
    /// 60 kHz
    Scs60 = 60,
    /// 120 kHz
    Scs120 = 120,
    /// 240 kHz
    Scs240 = 240,
}

impl SubcarrierSpacing {
    /// Map a spacing given in kHz
    pub fn from_khz(scs_khz: u32) -> Result<Self, ParseError> {
        Self::from_u32(scs_khz).ok_or(ParseError::UnknownSubcarrierSpacing(scs_khz))
    }

    /// Spacing in Hz
    pub fn to_hz(self) -> f64 {
        (self as u32) as f64 * 1e3
    }
}

/// Cyclic prefix type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CyclicPrefix {
    Normal,
    Extended,
}

impl CyclicPrefix {
    /// Number of OFDM symbols in one slot
    pub fn nof_symbols_per_slot(self) -> usize {
        match self {
            CyclicPrefix::Normal => 14,
            CyclicPrefix::Extended => 12,
        }
    }
}

impl FromStr for CyclicPrefix {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "normal" => Ok(CyclicPrefix::Normal),
            "extended" => Ok(CyclicPrefix::Extended),
            other => Err(ParseError::UnknownCyclicPrefix(other.to_string())),
        }
    }
}

/// Modulation schemes of TS 38.211 Section 5.1
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModulationScheme {
    /// pi/2-BPSK
    PiHalfBpsk,
    /// BPSK
    Bpsk,
    /// QPSK
    Qpsk,
    /// 16QAM
    Qam16,
    /// 64QAM
    Qam64,
    /// 256QAM
    Qam256,
}

impl ModulationScheme {
    /// Number of bits carried by one modulation symbol
    pub fn bits_per_symbol(self) -> usize {
        match self {
            ModulationScheme::PiHalfBpsk | ModulationScheme::Bpsk => 1,
            ModulationScheme::Qpsk => 2,
            ModulationScheme::Qam16 => 4,
            ModulationScheme::Qam64 => 6,
            ModulationScheme::Qam256 => 8,
        }
    }
}

impl FromStr for ModulationScheme {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "BPSK" => Ok(ModulationScheme::Bpsk),
            "pi/2-BPSK" => Ok(ModulationScheme::PiHalfBpsk),
            "QPSK" => Ok(ModulationScheme::Qpsk),
            "QAM16" | "16QAM" => Ok(ModulationScheme::Qam16),
            "QAM64" | "64QAM" => Ok(ModulationScheme::Qam64),
            "QAM256" | "256QAM" => Ok(ModulationScheme::Qam256),
            other => Err(ParseError::UnknownModulation(other.to_string())),
        }
    }
}

impl fmt::Display for ModulationScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ModulationScheme::PiHalfBpsk => "pi/2-BPSK",
            ModulationScheme::Bpsk => "BPSK",
            ModulationScheme::Qpsk => "QPSK",
            ModulationScheme::Qam16 => "QAM16",
            ModulationScheme::Qam64 => "QAM64",
            ModulationScheme::Qam256 => "QAM256",
        };
        f.write_str(name)
    }
}

/// Physical-layer time interval, stored in seconds
///
/// Used for timing advances, time alignments and time resolutions. The value
/// may be negative (a time alignment can lead or lag).
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
pub struct PhyTime(f64);

impl PhyTime {
    /// Zero duration
    pub const ZERO: Self = Self(0.0);

    /// Create from seconds
    pub fn from_seconds(seconds: f64) -> Self {
        Self(seconds)
    }

    /// Create from a number of samples at the given sampling rate
    pub fn from_samples(samples: f64, sampling_rate_hz: f64) -> Self {
        Self(samples / sampling_rate_hz)
    }

    /// Value in seconds
    pub fn to_seconds(self) -> f64 {
        self.0
    }

    /// Value in microseconds
    pub fn to_microseconds(self) -> f64 {
        self.0 * 1e6
    }
}
