//! NerdCAN library for live CAN bus monitoring and cyclic transmission

pub mod config;
pub mod echo;
pub mod error;
pub mod event;
pub mod filter;
pub mod health;
mod ingest;
pub mod monitor;
pub mod scheduler;
pub mod stats;
pub mod tracker;
pub mod transport;

pub use config::Config;
pub use echo::EchoPolicy;
pub use error::{Error, Result};
pub use event::{BusEvent, Direction, MonitorEvent, TriggerKind};
pub use filter::{FilterMode, FilterSet};
pub use health::{BusHealthSnapshot, BusStatus, HealthSampler};
pub use monitor::Monitor;
pub use scheduler::{OutgoingMessageSpec, Scheduler};
pub use transport::{ErrorFrame, InterfaceStatistics, Transport};

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Largest 11-bit identifier
pub const MAX_STANDARD_ID: u32 = 0x7FF;
/// Largest 29-bit identifier
pub const MAX_EXTENDED_ID: u32 = 0x1FFF_FFFF;

/// A raw bus frame, as moved through a [`Transport`]
#[derive(Default, Clone, Debug, PartialEq, Eq)]
pub struct Packet {
    pub extended: bool,
    pub id: u32,
    pub bytes: Vec<u8>,
}

impl Packet {
    /// Frames with identifiers above the 11-bit range use extended framing.
    pub fn new(id: u32, bytes: &[u8]) -> Self {
        Self {
            extended: id > MAX_STANDARD_ID,
            id,
            bytes: bytes.to_vec(),
        }
    }

    pub fn id_string(&self) -> String {
        if self.extended {
            format!("{:08X}", self.id)
        } else {
            format!("{:03X}", self.id)
        }
    }

    pub fn data_string(&self) -> String {
        self.bytes
            .iter()
            .map(|b| format!("{:02X}", b))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Shared state stays usable after a panicking holder; every critical
/// section leaves it consistent.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
