//! Bus transports for NerdCAN

pub mod statistics;

#[cfg(feature = "socketcan")]
pub mod socketcan;
