use crate::{Error, Packet};
use std::time::{Duration, Instant};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Received,
    Transmitted,
}

/// What caused a transmission
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TriggerKind {
    Manual,
    Periodic,
}

impl TriggerKind {
    pub fn name(&self) -> &'static str {
        match self {
            TriggerKind::Manual => "manual",
            TriggerKind::Periodic => "timer",
        }
    }
}

/// One observed or self-generated frame instance
#[derive(Clone, Debug, PartialEq)]
pub struct BusEvent {
    pub packet: Packet,
    /// Monotonic time the frame was received or sent
    pub time: Instant,
    pub direction: Direction,
    /// Time since the previous non-echo event with the same identifier;
    /// zero on first occurrence
    pub cycle_time: Duration,
    /// Sent by this process, directly or as seen through its echo
    pub self_originated: bool,
    pub trigger: Option<TriggerKind>,
    /// Received copy of our own transmission; never a new log row
    pub echo: bool,
}

impl BusEvent {
    pub fn received(packet: Packet, time: Instant) -> Self {
        Self {
            packet,
            time,
            direction: Direction::Received,
            cycle_time: Duration::ZERO,
            self_originated: false,
            trigger: None,
            echo: false,
        }
    }

    pub fn transmitted(
        packet: Packet,
        time: Instant,
        trigger: TriggerKind,
        cycle_time: Duration,
    ) -> Self {
        Self {
            packet,
            time,
            direction: Direction::Transmitted,
            cycle_time,
            self_originated: true,
            trigger: Some(trigger),
            echo: false,
        }
    }

    pub fn id(&self) -> u32 {
        self.packet.id
    }

    /// Whether an append-only (log mode) view shows this event.
    pub fn is_log_row(&self) -> bool {
        !self.echo
    }
}

/// Item on the ordered stream handed to the view layer
#[derive(Debug)]
pub enum MonitorEvent {
    Bus(BusEvent),
    Fault(Error),
}
