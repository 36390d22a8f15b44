use crate::echo::EchoPolicy;
use crate::tracker::CycleTimeTracker;
use crate::{BusEvent, Direction, Packet};
use std::collections::HashMap;

/// Latest event per identifier, with cycle-time and echo handling
#[derive(Default, Clone, Debug)]
pub struct Stats {
    pub frames: u64,
    pub bytes: u64,
    echo_policy: EchoPolicy,
    messages: HashMap<u32, Message>,
    tracker: CycleTimeTracker,
    in_flight: Vec<Packet>,
}

/// Message stats
#[derive(Clone, Debug, PartialEq)]
pub struct Message {
    pub count: u64,
    pub current: BusEvent,
}

impl Stats {
    pub fn new(echo_policy: EchoPolicy) -> Self {
        Self {
            echo_policy,
            ..Default::default()
        }
    }

    /// Classify, time and store an event, returning it as the view layer
    /// should see it.
    pub fn process_event(&mut self, mut event: BusEvent) -> BusEvent {
        self.frames = self.frames.saturating_add(1);
        self.bytes =
            self.bytes.saturating_add(event.packet.bytes.len() as u64);

        let id = event.id();
        let previous = self.messages.get(&id).map(|m| &m.current);

        if event.direction == Direction::Received && self.is_echo(&event) {
            event.echo = true;
            event.self_originated = true;
        }

        let delta = self.tracker.record(id, event.time, event.echo);
        if event.echo {
            // an echo keeps the cycle time of what it reflects
            event.cycle_time = previous.map(|p| p.cycle_time).unwrap_or_default();
        } else if event.direction == Direction::Received {
            event.cycle_time = delta;
        }

        let in_order = previous.is_none_or(|p| event.time >= p.time);
        let message = self.messages.entry(id).or_insert_with(|| Message {
            count: 0,
            current: event.clone(),
        });
        message.count = message.count.saturating_add(1);
        if in_order {
            message.current = event.clone();
        }
        event
    }

    /// Note a frame handed to the transport but not yet published, so an
    /// echo overtaking the transmit event is still recognised.
    pub fn expect_echo(&mut self, packet: &Packet) {
        self.in_flight.push(packet.clone());
    }

    /// The transmit of `packet` finished, successfully or not.
    pub fn settle(&mut self, packet: &Packet) {
        if let Some(index) = self.in_flight.iter().position(|p| p == packet) {
            self.in_flight.swap_remove(index);
        }
    }

    fn is_echo(&self, event: &BusEvent) -> bool {
        let stored = self
            .messages
            .get(&event.id())
            .is_some_and(|m| self.echo_policy.is_echo(&m.current, &event.packet));
        stored
            || self
                .in_flight
                .iter()
                .any(|sent| self.echo_policy.matches(sent, &event.packet))
    }

    pub fn latest(&self, id: u32) -> Option<&BusEvent> {
        self.messages.get(&id).map(|m| &m.current)
    }

    pub fn message(&self, id: u32) -> Option<&Message> {
        self.messages.get(&id)
    }

    /// Messages sorted by identifier
    pub fn messages(&self) -> Vec<&Message> {
        let mut messages: Vec<&Message> = self.messages.values().collect();
        messages.sort_by_key(|m| m.current.id());
        messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn clear(&mut self) {
        self.messages.clear();
        self.tracker.clear();
    }
}
