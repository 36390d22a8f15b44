//! In-memory bus, for tests and running without hardware.

use super::{ErrorFrame, InterfaceStatistics, Transport};
use crate::{Packet, lock};
use crossbeam::channel::{self, Receiver, Sender};
use std::io;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

pub struct LoopbackTransport {
    name: String,
    baud: u32,
    echo: bool,
    rx: Receiver<Packet>,
    tx: Mutex<Option<Sender<Packet>>>,
    errors: Mutex<Vec<ErrorFrame>>,
    statistics: Mutex<InterfaceStatistics>,
    sent: Mutex<Vec<Packet>>,
    fail_sends: AtomicBool,
    send_delay: Mutex<Duration>,
}

impl LoopbackTransport {
    pub fn new(name: &str, baud: u32) -> Self {
        let (tx, rx) = channel::unbounded();
        Self {
            name: name.to_string(),
            baud,
            echo: false,
            rx,
            tx: Mutex::new(Some(tx)),
            errors: Mutex::new(vec![]),
            statistics: Mutex::new(InterfaceStatistics::default()),
            sent: Mutex::new(vec![]),
            fail_sends: AtomicBool::new(false),
            send_delay: Mutex::new(Duration::ZERO),
        }
    }

    /// Reflect every sent frame back onto the receive path, like a
    /// controller with loopback enabled.
    pub fn with_echo(mut self, echo: bool) -> Self {
        self.echo = echo;
        self
    }

    /// Put a frame on the bus as if another node had sent it.
    pub fn inject(&self, packet: Packet) {
        {
            let mut stats = lock(&self.statistics);
            stats.rx_frames += 1;
            stats.rx_bytes += packet.bytes.len() as u64;
        }
        self.push(packet);
    }

    pub fn inject_error(&self, frame: ErrorFrame) {
        lock(&self.errors).push(frame);
    }

    pub fn set_statistics(&self, statistics: InterfaceStatistics) {
        *lock(&self.statistics) = statistics;
    }

    pub fn set_fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    /// Hold every send for `delay`, as a congested controller would.
    pub fn set_send_delay(&self, delay: Duration) {
        *lock(&self.send_delay) = delay;
    }

    pub fn sent(&self) -> Vec<Packet> {
        lock(&self.sent).clone()
    }

    pub fn sent_count(&self) -> usize {
        lock(&self.sent).len()
    }

    /// Disconnect the bus; blocked and future receives fail.
    pub fn close(&self) {
        lock(&self.tx).take();
    }

    fn push(&self, packet: Packet) {
        if let Some(tx) = lock(&self.tx).as_ref() {
            tx.send(packet).ok();
        }
    }
}

impl Transport for LoopbackTransport {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn baud(&self) -> u32 {
        self.baud
    }

    fn receive(&self) -> io::Result<Packet> {
        self.rx.recv().map_err(|_| {
            io::Error::new(io::ErrorKind::BrokenPipe, "loopback bus closed")
        })
    }

    fn send(&self, packet: &Packet) -> io::Result<()> {
        let delay = *lock(&self.send_delay);
        if !delay.is_zero() {
            thread::sleep(delay);
        }
        if self.fail_sends.load(Ordering::SeqCst) {
            lock(&self.statistics).tx_errors += 1;
            return Err(io::Error::new(
                io::ErrorKind::Other,
                "no buffer space available",
            ));
        }
        if lock(&self.tx).is_none() {
            return Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "loopback bus closed",
            ));
        }

        lock(&self.sent).push(packet.clone());
        {
            let mut stats = lock(&self.statistics);
            stats.tx_frames += 1;
            stats.tx_bytes += packet.bytes.len() as u64;
        }
        if self.echo {
            self.push(packet.clone());
        }
        Ok(())
    }

    fn error_frames(&self) -> io::Result<Vec<ErrorFrame>> {
        Ok(std::mem::take(&mut *lock(&self.errors)))
    }

    fn statistics(&self) -> io::Result<InterfaceStatistics> {
        Ok(*lock(&self.statistics))
    }
}
