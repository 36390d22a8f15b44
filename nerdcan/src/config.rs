use crate::echo::EchoPolicy;
use derive_setters::Setters;
use std::time::Duration;

/// Session configuration for a [`crate::Monitor`]
#[derive(Clone, Debug, Setters)]
pub struct Config {
    /// Bus interface name, e.g. `can0`
    #[setters(into)]
    pub interface: String,
    /// Nominal bus bit rate used by the load estimate
    pub bitrate: u32,
    /// Assumed bits on the wire per payload byte (load estimate only)
    pub bits_per_byte: u32,
    /// Bus health sampling period
    pub health_interval: Duration,
    /// Extra time granted beyond one period for a cyclic sender to
    /// acknowledge a stop
    pub stop_grace: Duration,
    pub echo_policy: EchoPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            interface: "can0".to_string(),
            bitrate: 500_000,
            bits_per_byte: 10,
            health_interval: Duration::from_secs(1),
            stop_grace: Duration::from_millis(20),
            echo_policy: EchoPolicy::default(),
        }
    }
}
