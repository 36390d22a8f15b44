//! Bus health: error frame classification and an approximate load figure.
//!
//! The load estimate multiplies payload bytes by a constant bits-per-byte
//! overhead and divides by the nominal bit rate. It ignores bit stuffing,
//! identifier length and inter-frame spacing, so treat it as a rough
//! indication rather than calibrated telemetry.

use crate::transport::{ErrorFrame, InterfaceStatistics};
use crate::{Config, Result, Transport, lock};
use crossbeam::channel::{self, Sender, select};
use log::{debug, warn};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Error class bits of an error frame identifier word, as laid out by
/// the kernel in `linux/can/error.h`
pub const CAN_ERR_TX_TIMEOUT: u32 = 0x0000_0001;
pub const CAN_ERR_LOSTARB: u32 = 0x0000_0002;
pub const CAN_ERR_CRTL: u32 = 0x0000_0004;
pub const CAN_ERR_PROT: u32 = 0x0000_0008;
pub const CAN_ERR_TRX: u32 = 0x0000_0010;
pub const CAN_ERR_ACK: u32 = 0x0000_0020;
pub const CAN_ERR_BUSOFF: u32 = 0x0000_0040;
pub const CAN_ERR_BUSERROR: u32 = 0x0000_0080;
pub const CAN_ERR_RESTARTED: u32 = 0x0000_0100;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum BusStatus {
    #[default]
    Unknown,
    Up,
    BusOff,
    ErrorPassive,
    AckError,
    ProtocolError,
    TransceiverError,
    GenericError,
}

impl BusStatus {
    /// Classify an error frame by its class bits. The first recognised
    /// bit wins, in the order bus-off, controller, ack, protocol,
    /// transceiver. Bus error, lost arbitration, tx timeout and restart
    /// only count when nothing more specific is set, as a generic error.
    pub fn classify(frame: &ErrorFrame) -> Self {
        const CLASSES: [(u32, BusStatus); 5] = [
            (CAN_ERR_BUSOFF, BusStatus::BusOff),
            (CAN_ERR_CRTL, BusStatus::ErrorPassive),
            (CAN_ERR_ACK, BusStatus::AckError),
            (CAN_ERR_PROT, BusStatus::ProtocolError),
            (CAN_ERR_TRX, BusStatus::TransceiverError),
        ];
        let class = frame.class();
        CLASSES
            .iter()
            .find(|(bits, _)| class & bits != 0)
            .map(|(_, status)| *status)
            .unwrap_or(BusStatus::GenericError)
    }

    pub fn name(&self) -> &'static str {
        match self {
            BusStatus::Unknown => "UNKNOWN",
            BusStatus::Up => "UP",
            BusStatus::BusOff => "BUS-OFF",
            BusStatus::ErrorPassive => "ERROR-PASSIVE",
            BusStatus::AckError => "ACK-ERROR",
            BusStatus::ProtocolError => "PROTOCOL-ERROR",
            BusStatus::TransceiverError => "TRANSCEIVER-ERROR",
            BusStatus::GenericError => "ERROR",
        }
    }

    pub fn is_error(&self) -> bool {
        !matches!(self, BusStatus::Unknown | BusStatus::Up)
    }
}

/// Bus health for one sampling window, replaced wholesale every tick
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BusHealthSnapshot {
    pub interface: String,
    pub status: BusStatus,
    /// Interface receive error counter
    pub rx_errors: u64,
    /// Interface transmit error counter
    pub tx_errors: u64,
    /// Error frames drained during the window
    pub error_frames: u64,
    /// Approximate; see module docs
    pub load_percent: f64,
    pub frames_per_second: f64,
    pub sampled_at: Option<Instant>,
}

/// Turns successive counter samples into snapshots
#[derive(Clone, Debug)]
pub struct HealthMeter {
    interface: String,
    bitrate: u32,
    bits_per_byte: u32,
    last: Option<(Instant, InterfaceStatistics)>,
}

impl HealthMeter {
    pub fn new(interface: &str, bitrate: u32, bits_per_byte: u32) -> Self {
        Self {
            interface: interface.to_string(),
            bitrate,
            bits_per_byte,
            last: None,
        }
    }

    /// Set the reference point for the first window.
    pub fn prime(&mut self, now: Instant, statistics: InterfaceStatistics) {
        self.last = Some((now, statistics));
    }

    pub fn sample(
        &mut self,
        now: Instant,
        statistics: InterfaceStatistics,
        errors: &[ErrorFrame],
    ) -> BusHealthSnapshot {
        let status = errors
            .iter()
            .filter(|frame| frame.is_error())
            .map(BusStatus::classify)
            .last()
            .unwrap_or(BusStatus::Up);

        let (load_percent, frames_per_second) = match self.last {
            Some((then, previous)) => {
                let elapsed = now.saturating_duration_since(then).as_secs_f64();
                self.rates(elapsed, &previous, &statistics)
            }
            None => (0.0, 0.0),
        };
        self.last = Some((now, statistics));

        BusHealthSnapshot {
            interface: self.interface.clone(),
            status,
            rx_errors: statistics.rx_errors,
            tx_errors: statistics.tx_errors,
            error_frames: errors.iter().filter(|f| f.is_error()).count() as u64,
            load_percent,
            frames_per_second,
            sampled_at: Some(now),
        }
    }

    fn rates(
        &self,
        elapsed: f64,
        previous: &InterfaceStatistics,
        current: &InterfaceStatistics,
    ) -> (f64, f64) {
        if elapsed <= 0.0 || self.bitrate == 0 {
            return (0.0, 0.0);
        }
        // counters may restart when the interface is reset
        let bytes = (current.rx_bytes + current.tx_bytes)
            .saturating_sub(previous.rx_bytes + previous.tx_bytes);
        let frames = (current.rx_frames + current.tx_frames)
            .saturating_sub(previous.rx_frames + previous.tx_frames);

        let bits = bytes as f64 * self.bits_per_byte as f64;
        let load = 100.0 * bits / (self.bitrate as f64 * elapsed);
        (load.max(0.0), frames as f64 / elapsed)
    }
}

/// Periodic sampler thread. Each instance starts from a fresh meter, so
/// closing and reopening carries nothing over.
pub struct HealthSampler {
    snapshot: Arc<Mutex<BusHealthSnapshot>>,
    stop: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl HealthSampler {
    pub fn start(transport: Arc<dyn Transport>, config: &Config) -> Result<Self> {
        let mut meter = HealthMeter::new(
            &transport.name(),
            config.bitrate,
            config.bits_per_byte,
        );
        if let Ok(statistics) = transport.statistics() {
            meter.prime(Instant::now(), statistics);
        }
        // stale error frames belong to no window
        transport.error_frames().ok();

        let snapshot = Arc::new(Mutex::new(BusHealthSnapshot {
            interface: transport.name(),
            ..Default::default()
        }));
        let (stop_tx, stop_rx) = channel::bounded::<()>(0);
        let interval = config.health_interval;

        let handle = thread::Builder::new()
            .name("nerdcan-health".to_string())
            .spawn({
                let snapshot = snapshot.clone();
                move || {
                    let ticker = channel::tick(interval);
                    loop {
                        select! {
                            recv(ticker) -> _ => {
                                let next = tick(transport.as_ref(), &mut meter);
                                *lock(&snapshot) = next;
                            }
                            recv(stop_rx) -> _ => break,
                        }
                    }
                    debug!("health sampler stopped");
                }
            })?;

        debug!("health sampler started every {:?}", interval);
        Ok(Self {
            snapshot,
            stop: Some(stop_tx),
            handle: Some(handle),
        })
    }

    pub fn snapshot(&self) -> BusHealthSnapshot {
        lock(&self.snapshot).clone()
    }

    pub fn stop(&mut self) {
        self.stop.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("health sampler panicked");
            }
        }
    }
}

impl Drop for HealthSampler {
    fn drop(&mut self) {
        self.stop();
    }
}

fn tick(transport: &dyn Transport, meter: &mut HealthMeter) -> BusHealthSnapshot {
    let now = Instant::now();
    let statistics = match transport.statistics() {
        Ok(statistics) => statistics,
        Err(e) => {
            warn!("reading statistics of {} failed: {}", transport.name(), e);
            return BusHealthSnapshot {
                interface: transport.name(),
                sampled_at: Some(now),
                ..Default::default()
            };
        }
    };
    let errors = transport.error_frames().unwrap_or_else(|e| {
        warn!("reading error frames of {} failed: {}", transport.name(), e);
        vec![]
    });
    meter.sample(now, statistics, &errors)
}
