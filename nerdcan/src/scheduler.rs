//! Outgoing messages and their cyclic senders.
//!
//! Each running cyclic message owns one sender thread driven by a ticker.
//! The thread is paired 1:1 with a cancellation token; stopping drops the
//! token and waits at most one period (plus grace) for the thread to hang
//! up its acknowledgement channel, so a stuck transmit cannot hold up the
//! caller.

use crate::monitor::Publisher;
use crate::{
    Error, MAX_EXTENDED_ID, Packet, Result, Transport, TriggerKind, lock,
};
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender, select};
use log::{debug, warn};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Payload lengths a frame may carry (classic 0-8, FD above that)
const VALID_LENGTHS: [usize; 16] =
    [0, 1, 2, 3, 4, 5, 6, 7, 8, 12, 16, 20, 24, 32, 48, 64];

/// A user-configured frame to transmit
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutgoingMessageSpec {
    pub id: Uuid,
    pub identifier: u32,
    pub payload: Vec<u8>,
    /// Zero means one-shot only
    pub period: Duration,
    /// A cyclic sender is running
    pub active: bool,
    /// Set by the most recent send
    pub trigger: Option<TriggerKind>,
}

impl OutgoingMessageSpec {
    pub fn new(identifier: u32, payload: &[u8], period: Duration) -> Self {
        Self {
            id: Uuid::new_v4(),
            identifier,
            payload: payload.to_vec(),
            period,
            active: false,
            trigger: None,
        }
    }

    pub fn dlc(&self) -> usize {
        self.payload.len()
    }

    pub fn is_cyclic(&self) -> bool {
        !self.period.is_zero()
    }

    pub fn packet(&self) -> Packet {
        Packet::new(self.identifier, &self.payload)
    }

    pub fn validate(&self) -> Result<()> {
        if self.identifier > MAX_EXTENDED_ID {
            return Err(Error::InvalidSpec(format!(
                "identifier {:X} exceeds 29 bits",
                self.identifier
            )));
        }
        if !VALID_LENGTHS.contains(&self.payload.len()) {
            return Err(Error::InvalidSpec(format!(
                "payload length {} is not a valid frame length",
                self.payload.len()
            )));
        }
        Ok(())
    }
}

/// Held by the scheduler; dropping the signal wakes the sender.
struct CancelToken {
    cancelled: Arc<AtomicBool>,
    signal: Option<Sender<()>>,
}

/// Held by the sender thread.
struct CancelListener {
    cancelled: Arc<AtomicBool>,
    signal: Receiver<()>,
}

fn cancel_pair() -> (CancelToken, CancelListener) {
    let cancelled = Arc::new(AtomicBool::new(false));
    let (tx, rx) = channel::bounded(0);
    (
        CancelToken {
            cancelled: cancelled.clone(),
            signal: Some(tx),
        },
        CancelListener {
            cancelled,
            signal: rx,
        },
    )
}

impl CancelToken {
    fn cancel(&mut self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.signal.take();
    }
}

impl CancelListener {
    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Scheduler side of a running sender
struct CyclicTask {
    identifier: u32,
    period: Duration,
    token: CancelToken,
    done: Receiver<()>,
}

impl CyclicTask {
    fn cancel(&mut self) {
        self.token.cancel();
    }

    /// Wait until `deadline` for the sender to hang up. A sender stuck in
    /// a transmit is left to exit on its own once the transmit returns.
    fn acknowledge(&self, deadline: Instant) {
        match self.done.recv_deadline(deadline) {
            Err(RecvTimeoutError::Timeout) => warn!(
                "cyclic sender {:03X} did not acknowledge stop in time",
                self.identifier,
            ),
            _ => debug!("cyclic sender {:03X} stopped", self.identifier),
        }
    }
}

/// Thread side of a running sender
struct CyclicSender {
    packet: Packet,
    period: Duration,
    transport: Arc<dyn Transport>,
    publisher: Publisher,
    cancel: CancelListener,
    _done: Sender<()>,
}

impl CyclicSender {
    fn run(self) {
        let ticker = channel::tick(self.period);
        loop {
            select! {
                recv(ticker) -> _ => {
                    if self.cancel.is_cancelled() {
                        break;
                    }
                    self.transmit();
                }
                recv(self.cancel.signal) -> _ => break,
            }
        }
    }

    fn transmit(&self) {
        let sent = self.publisher.transmit(
            self.transport.as_ref(),
            &self.packet,
            TriggerKind::Periodic,
            self.period,
        );
        if let Err(e) = sent {
            self.publisher.fault(e);
        }
    }
}

#[derive(Default)]
struct Registry {
    specs: Vec<OutgoingMessageSpec>,
    tasks: HashMap<Uuid, CyclicTask>,
}

impl Registry {
    fn spec_mut(&mut self, id: Uuid) -> Result<&mut OutgoingMessageSpec> {
        self.specs
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or(Error::UnknownSpec(id))
    }

    fn take_all_tasks(&mut self) -> Vec<CyclicTask> {
        for spec in self.specs.iter_mut() {
            spec.active = false;
        }
        self.tasks.drain().map(|(_, task)| task).collect()
    }
}

/// Owns the outgoing message list and every cyclic sender. All running
/// senders are stopped when the scheduler is dropped.
pub struct Scheduler {
    transport: Arc<dyn Transport>,
    publisher: Publisher,
    stop_grace: Duration,
    registry: Mutex<Registry>,
}

impl Scheduler {
    pub(crate) fn new(
        transport: Arc<dyn Transport>,
        publisher: Publisher,
        stop_grace: Duration,
    ) -> Self {
        Self {
            transport,
            publisher,
            stop_grace,
            registry: Mutex::new(Registry::default()),
        }
    }

    pub fn list_specs(&self) -> Vec<OutgoingMessageSpec> {
        lock(&self.registry).specs.clone()
    }

    pub fn spec(&self, id: Uuid) -> Option<OutgoingMessageSpec> {
        lock(&self.registry).specs.iter().find(|s| s.id == id).cloned()
    }

    pub fn is_running(&self, id: Uuid) -> bool {
        lock(&self.registry).tasks.contains_key(&id)
    }

    /// Transmit a message once, regardless of its cyclic state.
    pub fn send_once(&self, id: Uuid) -> Result<()> {
        let spec = {
            let mut registry = lock(&self.registry);
            let spec = registry.spec_mut(id)?;
            spec.validate()?;
            spec.trigger = Some(TriggerKind::Manual);
            spec.clone()
        };

        let packet = spec.packet();
        self.publisher
            .transmit(
                self.transport.as_ref(),
                &packet,
                TriggerKind::Manual,
                Duration::ZERO,
            )
            .inspect_err(|e| warn!("{}", e))
    }

    /// Start cyclic transmission. Starting a message that is already
    /// running does nothing.
    pub fn start_cyclic(&self, id: Uuid) -> Result<()> {
        let mut registry = lock(&self.registry);
        if registry.tasks.contains_key(&id) {
            debug!("cyclic sender for {} already running", id);
            return Ok(());
        }

        let spec = registry.spec_mut(id)?;
        spec.validate()?;
        if !spec.is_cyclic() {
            return Err(Error::InvalidSpec(
                "cyclic transmission needs a non-zero period".to_string(),
            ));
        }

        let (token, listener) = cancel_pair();
        let (done_tx, done_rx) = channel::bounded(0);
        let sender = CyclicSender {
            packet: spec.packet(),
            period: spec.period,
            transport: self.transport.clone(),
            publisher: self.publisher.clone(),
            cancel: listener,
            _done: done_tx,
        };
        thread::Builder::new()
            .name(format!("nerdcan-tx-{:03X}", spec.identifier))
            .spawn(move || sender.run())?;

        debug!(
            "cyclic sender {:03X} started every {:?}",
            spec.identifier, spec.period
        );
        spec.active = true;
        spec.trigger = Some(TriggerKind::Periodic);
        let task = CyclicTask {
            identifier: spec.identifier,
            period: spec.period,
            token,
            done: done_rx,
        };
        registry.tasks.insert(id, task);
        Ok(())
    }

    /// Stop cyclic transmission, returning whether a sender was running.
    /// No further frames are sent once this returns.
    pub fn stop_cyclic(&self, id: Uuid) -> bool {
        let task = {
            let mut registry = lock(&self.registry);
            if let Ok(spec) = registry.spec_mut(id) {
                spec.active = false;
            }
            registry.tasks.remove(&id)
        };
        match task {
            Some(mut task) => {
                task.cancel();
                task.acknowledge(Instant::now() + task.period + self.stop_grace);
                true
            }
            None => false,
        }
    }

    /// Stop every running sender; all messages are idle on return. The
    /// senders share one deadline, the longest period plus grace.
    pub fn stop_all(&self) {
        let mut tasks = lock(&self.registry).take_all_tasks();
        for task in tasks.iter_mut() {
            task.cancel();
        }
        let longest = tasks
            .iter()
            .map(|task| task.period)
            .max()
            .unwrap_or_default();
        let deadline = Instant::now() + longest + self.stop_grace;
        for task in tasks.iter() {
            task.acknowledge(deadline);
        }
    }

    /// Send a one-shot message, or toggle a cyclic one.
    pub fn trigger(&self, id: Uuid) -> Result<()> {
        let spec = self.spec(id).ok_or(Error::UnknownSpec(id))?;
        if !spec.is_cyclic() {
            self.send_once(id)
        } else if self.stop_cyclic(id) {
            Ok(())
        } else {
            self.start_cyclic(id)
        }
    }

    /// Add a message, or replace the one with the same id. A running
    /// message is restarted with its new content.
    pub fn upsert_spec(&self, mut spec: OutgoingMessageSpec) -> Result<()> {
        spec.validate()?;
        let was_running = self.stop_cyclic(spec.id);
        spec.active = false;

        let id = spec.id;
        let restart = was_running && spec.is_cyclic();
        {
            let mut registry = lock(&self.registry);
            match registry.specs.iter_mut().find(|s| s.id == id) {
                Some(existing) => *existing = spec,
                None => registry.specs.push(spec),
            }
        }
        if restart {
            self.start_cyclic(id)?;
        }
        Ok(())
    }

    pub fn remove_spec(&self, id: Uuid) -> Option<OutgoingMessageSpec> {
        self.stop_cyclic(id);
        let mut registry = lock(&self.registry);
        let index = registry.specs.iter().position(|s| s.id == id)?;
        Some(registry.specs.remove(index))
    }

    /// Replace the whole list, e.g. after loading from storage. Nothing is
    /// replaced if any message is invalid.
    pub fn replace_specs(&self, specs: Vec<OutgoingMessageSpec>) -> Result<()> {
        for spec in specs.iter() {
            spec.validate()?;
        }
        self.stop_all();
        lock(&self.registry).specs = specs
            .into_iter()
            .map(|spec| OutgoingMessageSpec {
                active: false,
                ..spec
            })
            .collect();
        Ok(())
    }

    pub fn clear_specs(&self) {
        self.stop_all();
        lock(&self.registry).specs.clear();
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.stop_all();
    }
}
