use crate::statistics::{self, SYSFS_NET};
use log::{debug, error};
use nerdcan::{Error, ErrorFrame, InterfaceStatistics, Packet, Transport};
use socketcan::{
    CanFrame, CanInterface, CanSocket, EmbeddedFrame, ExtendedId, Frame, Id,
    Socket, SocketOptions, StandardId,
};
use std::io;
use std::path::Path;

/// Error frames drained per call at most, so a babbling controller
/// cannot stall the health sampler
const MAX_ERROR_FRAMES: usize = 1024;

/// SocketCAN interface with separate receive, transmit and error sockets.
/// Frames sent on the transmit socket come back on the receive socket
/// through the kernel's local loopback; that is the echo the core
/// classifies.
pub struct SocketCanTransport {
    name: String,
    baud: u32,
    rx: CanSocket,
    tx: CanSocket,
    errors: CanSocket,
}

impl SocketCanTransport {
    pub fn open(name: &str, default_baud: u32) -> Result<Self, Error> {
        let unavailable = |source: io::Error| Error::TransportUnavailable {
            interface: name.to_string(),
            source,
        };

        // virtual interfaces have no bit timing
        let baud = match CanInterface::open(name) {
            Ok(iface) => {
                iface.bit_rate().ok().flatten().unwrap_or(default_baud)
            }
            Err(_) => default_baud,
        };

        let rx = CanSocket::open(name).map_err(unavailable)?;
        let tx = CanSocket::open(name).map_err(unavailable)?;
        let errors = CanSocket::open(name).map_err(unavailable)?;
        errors.set_filter_drop_all().map_err(unavailable)?;
        errors.set_error_filter_accept_all().map_err(unavailable)?;
        errors.set_nonblocking(true).map_err(unavailable)?;

        debug!("opened {} at {} bit/s", name, baud);
        Ok(Self {
            name: name.to_string(),
            baud,
            rx,
            tx,
            errors,
        })
    }

    fn frame(packet: &Packet) -> io::Result<CanFrame> {
        let id: Option<Id> = if packet.extended {
            ExtendedId::new(packet.id).map(Id::Extended)
        } else {
            u16::try_from(packet.id)
                .ok()
                .and_then(StandardId::new)
                .map(Id::Standard)
        };
        let id = id.ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid identifier {:X}", packet.id),
            )
        })?;
        // classic sockets carry at most 8 bytes
        CanFrame::new(id, &packet.bytes).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "{} bytes do not fit a classic frame",
                    packet.bytes.len()
                ),
            )
        })
    }
}

impl Transport for SocketCanTransport {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn baud(&self) -> u32 {
        self.baud
    }

    fn receive(&self) -> io::Result<Packet> {
        loop {
            let frame = self.rx.read_frame()?;
            if frame.is_error_frame() {
                continue;
            }
            return Ok(Packet {
                extended: frame.is_extended(),
                id: frame.raw_id(),
                bytes: frame.data().to_vec(),
            });
        }
    }

    fn send(&self, packet: &Packet) -> io::Result<()> {
        let frame = Self::frame(packet)?;
        self.tx.write_frame(&frame)
    }

    fn error_frames(&self) -> io::Result<Vec<ErrorFrame>> {
        let mut frames = vec![];
        while frames.len() < MAX_ERROR_FRAMES {
            match self.errors.read_frame() {
                Ok(frame) if frame.is_error_frame() => {
                    frames.push(ErrorFrame::new(frame.id_word(), frame.data()))
                }
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    error!("reading error frames on {}: {}", self.name, e);
                    return Err(e);
                }
            }
        }
        Ok(frames)
    }

    fn statistics(&self) -> io::Result<InterfaceStatistics> {
        statistics::read(Path::new(SYSFS_NET), &self.name)
    }
}
