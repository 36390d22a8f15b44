pub mod loopback;

pub use loopback::LoopbackTransport;

use crate::Packet;
use std::io;

/// Error flag in the identifier word of an error frame
pub const CAN_ERR_FLAG: u32 = 0x8000_0000;
/// Error class bits in the identifier word of an error frame
pub const CAN_ERR_MASK: u32 = 0x1FFF;

/// A single bus interface. Receive blocks; everything else returns
/// promptly. Implementations must allow `send` while another thread is
/// blocked in `receive`.
pub trait Transport: Send + Sync {
    fn name(&self) -> String;
    fn baud(&self) -> u32;

    /// Block until the next frame arrives.
    fn receive(&self) -> io::Result<Packet>;

    fn send(&self, packet: &Packet) -> io::Result<()>;

    /// Drain pending error frames without waiting.
    fn error_frames(&self) -> io::Result<Vec<ErrorFrame>>;

    /// Cumulative interface counters.
    fn statistics(&self) -> io::Result<InterfaceStatistics>;
}

/// Raw error frame: flag and class bits live in the identifier word, the
/// payload carries class specific detail.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ErrorFrame {
    pub id_word: u32,
    pub data: [u8; 8],
}

impl ErrorFrame {
    pub fn new(id_word: u32, data: &[u8]) -> Self {
        let mut frame = Self {
            id_word,
            ..Default::default()
        };
        let len = data.len().min(frame.data.len());
        frame.data[..len].copy_from_slice(&data[..len]);
        frame
    }

    /// Build a flagged error frame for the given class bits.
    pub fn with_class(class: u32) -> Self {
        Self::new(CAN_ERR_FLAG | (class & CAN_ERR_MASK), &[])
    }

    pub fn is_error(&self) -> bool {
        self.id_word & CAN_ERR_FLAG != 0
    }

    pub fn class(&self) -> u32 {
        self.id_word & CAN_ERR_MASK
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct InterfaceStatistics {
    pub rx_errors: u64,
    pub tx_errors: u64,
    pub rx_bytes: u64,
    pub tx_bytes: u64,
    pub rx_frames: u64,
    pub tx_frames: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_frame_bits() {
        let frame = ErrorFrame::with_class(0x80);
        assert!(frame.is_error());
        assert_eq!(frame.class(), 0x80);
        assert_eq!(frame.id_word, 0x8000_0080);

        let plain = ErrorFrame::new(0x0000_0080, &[1, 2, 3]);
        assert!(!plain.is_error());
        assert_eq!(plain.data, [1, 2, 3, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn oversized_error_payload_is_truncated() {
        let frame = ErrorFrame::new(CAN_ERR_FLAG, &[0xFF; 12]);
        assert_eq!(frame.data, [0xFF; 8]);
    }
}
