//! Echo classification for frames reflected back by the transport.
//!
//! Once an identifier has been transmitted by this process, later received
//! frames with the same identifier are treated as echoes of our own traffic.
//! The heuristic cannot tell a hardware echo from a second transmitter on
//! the bus using the same identifier, hence the selectable policy.

use crate::{BusEvent, Packet};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum EchoPolicy {
    /// Identifier match alone marks an echo
    #[default]
    Identifier,
    /// Identifier and payload must both match the stored frame
    IdentifierAndPayload,
    /// Never classify received frames as echoes
    Disabled,
}

impl EchoPolicy {
    /// Decide whether `received` is an echo given the stored event for the
    /// same identifier.
    pub fn is_echo(&self, previous: &BusEvent, received: &Packet) -> bool {
        previous.self_originated && self.matches(&previous.packet, received)
    }

    /// Whether `received` could be the reflection of `sent`.
    pub fn matches(&self, sent: &Packet, received: &Packet) -> bool {
        match self {
            EchoPolicy::Identifier => sent.id == received.id,
            EchoPolicy::IdentifierAndPayload => sent == received,
            EchoPolicy::Disabled => false,
        }
    }
}
