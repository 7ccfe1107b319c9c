//! Common Utilities and Types Library
//! 
//! This crate provides the radio types and helpers shared by the uplink PHY
//! processors and the tester tool.

pub mod types;
pub mod utils;

// Re-export commonly used items
pub use types::*;
pub use utils::*;
