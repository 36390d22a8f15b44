use crate::health::{BusHealthSnapshot, HealthSampler};
use crate::scheduler::{OutgoingMessageSpec, Scheduler};
use crate::stats::{Message, Stats};
use crate::{
    BusEvent, Config, Error, FilterMode, FilterSet, MonitorEvent, Packet,
    Result, Transport, TriggerKind, lock,
};
use log::{debug, warn};
use std::sync::{Arc, Mutex, PoisonError, RwLock, mpsc};
use std::time::{Duration, Instant};
use uuid::Uuid;

struct Shared {
    stats: Stats,
    events: mpsc::Sender<MonitorEvent>,
}

/// Single entry point for everything that lands in the message table.
/// The table update and the stream send happen under one lock, so the
/// stream order per identifier matches the table.
#[derive(Clone)]
pub(crate) struct Publisher {
    shared: Arc<Mutex<Shared>>,
    filter: Arc<RwLock<FilterSet>>,
}

impl Publisher {
    pub(crate) fn new(config: &Config) -> (Self, mpsc::Receiver<MonitorEvent>) {
        let (tx, rx) = mpsc::channel();
        let publisher = Self {
            shared: Arc::new(Mutex::new(Shared {
                stats: Stats::new(config.echo_policy),
                events: tx,
            })),
            filter: Arc::new(RwLock::new(FilterSet::new())),
        };
        (publisher, rx)
    }

    pub(crate) fn publish(&self, event: BusEvent) {
        let mut shared = lock(&self.shared);
        let event = shared.stats.process_event(event);
        if self.filter().is_visible(event.id()) {
            // a closed stream only means the consumer has gone
            shared.events.send(MonitorEvent::Bus(event)).ok();
        }
    }

    /// Hand `packet` to the transport, then publish it as transmitted.
    /// The event carries the time the transmit started, so it orders
    /// before any echo of it.
    pub(crate) fn transmit(
        &self,
        transport: &dyn Transport,
        packet: &Packet,
        trigger: TriggerKind,
        cycle_time: Duration,
    ) -> Result<()> {
        let time = Instant::now();
        lock(&self.shared).stats.expect_echo(packet);
        let sent = transport.send(packet);
        lock(&self.shared).stats.settle(packet);
        match sent {
            Ok(()) => {
                self.publish(BusEvent::transmitted(
                    packet.clone(),
                    time,
                    trigger,
                    cycle_time,
                ));
                Ok(())
            }
            Err(e) => Err(Error::send_failed(packet.id, e)),
        }
    }

    pub(crate) fn fault(&self, error: Error) {
        warn!("{}", error);
        lock(&self.shared).events.send(MonitorEvent::Fault(error)).ok();
    }

    fn with_stats<R>(&self, f: impl FnOnce(&mut Stats) -> R) -> R {
        f(&mut lock(&self.shared).stats)
    }

    fn filter(&self) -> std::sync::RwLockReadGuard<'_, FilterSet> {
        self.filter.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn filter_mut(&self) -> std::sync::RwLockWriteGuard<'_, FilterSet> {
        self.filter.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// One monitoring session on one bus interface.
///
/// Starting a monitor spawns the receive loop and returns the ordered event
/// stream for the view layer. Dropping it stops every cyclic sender and the
/// health sampler; the receive loop ends with the transport.
pub struct Monitor {
    config: Config,
    transport: Arc<dyn Transport>,
    publisher: Publisher,
    scheduler: Scheduler,
    health: Mutex<Option<HealthSampler>>,
}

impl Monitor {
    pub fn start(
        transport: Arc<dyn Transport>,
        config: Config,
    ) -> Result<(Self, mpsc::Receiver<MonitorEvent>)> {
        let (publisher, events) = Publisher::new(&config);
        crate::ingest::spawn(transport.clone(), publisher.clone())?;
        let scheduler = Scheduler::new(
            transport.clone(),
            publisher.clone(),
            config.stop_grace,
        );
        let monitor = Self {
            config,
            transport,
            publisher,
            scheduler,
            health: Mutex::new(None),
        };
        Ok((monitor, events))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Latest message per identifier, sorted by identifier
    pub fn latest(&self) -> Vec<Message> {
        self.publisher.with_stats(|stats| {
            stats.messages().into_iter().cloned().collect()
        })
    }

    pub fn latest_for(&self, id: u32) -> Option<BusEvent> {
        self.publisher
            .with_stats(|stats| stats.latest(id).cloned())
    }

    /// Total frames and payload bytes seen this session
    pub fn totals(&self) -> (u64, u64) {
        self.publisher.with_stats(|stats| (stats.frames, stats.bytes))
    }

    /// Session reset: stop all senders and forget every message.
    pub fn reset(&self) {
        self.scheduler.stop_all();
        self.publisher.with_stats(|stats| stats.clear());
        debug!("session reset");
    }

    pub fn filter(&self) -> FilterSet {
        self.publisher.filter().clone()
    }

    pub fn set_filter_mode(&self, mode: FilterMode) {
        self.publisher.filter_mut().set_mode(mode);
    }

    pub fn cycle_filter_mode(&self) -> FilterMode {
        let mut filter = self.publisher.filter_mut();
        let mode = filter.mode.next();
        filter.set_mode(mode);
        mode
    }

    /// Returns whether `id` is now in the filter set.
    pub fn toggle_filter_id(&self, id: u32) -> bool {
        self.publisher.filter_mut().toggle(id)
    }

    pub fn send_once(&self, id: Uuid) -> Result<()> {
        self.scheduler.send_once(id)
    }

    pub fn start_cyclic(&self, id: Uuid) -> Result<()> {
        self.scheduler.start_cyclic(id)
    }

    pub fn stop_cyclic(&self, id: Uuid) -> bool {
        self.scheduler.stop_cyclic(id)
    }

    pub fn stop_all_cyclic(&self) {
        self.scheduler.stop_all()
    }

    pub fn trigger(&self, id: Uuid) -> Result<()> {
        self.scheduler.trigger(id)
    }

    pub fn list_specs(&self) -> Vec<OutgoingMessageSpec> {
        self.scheduler.list_specs()
    }

    pub fn upsert_spec(&self, spec: OutgoingMessageSpec) -> Result<()> {
        self.scheduler.upsert_spec(spec)
    }

    pub fn remove_spec(&self, id: Uuid) -> Option<OutgoingMessageSpec> {
        self.scheduler.remove_spec(id)
    }

    pub fn replace_specs(&self, specs: Vec<OutgoingMessageSpec>) -> Result<()> {
        self.scheduler.replace_specs(specs)
    }

    pub fn clear_specs(&self) {
        self.scheduler.clear_specs()
    }

    /// Start a health sampler unless one is running.
    pub fn open_health(&self) -> Result<()> {
        let mut health = lock(&self.health);
        if health.is_none() {
            *health =
                Some(HealthSampler::start(self.transport.clone(), &self.config)?);
        }
        Ok(())
    }

    pub fn close_health(&self) {
        let sampler = lock(&self.health).take();
        if let Some(mut sampler) = sampler {
            sampler.stop();
        }
    }

    pub fn is_health_open(&self) -> bool {
        lock(&self.health).is_some()
    }

    /// Last health snapshot, or the default one while no sampler runs.
    pub fn health(&self) -> BusHealthSnapshot {
        lock(&self.health)
            .as_ref()
            .map(|sampler| sampler.snapshot())
            .unwrap_or_default()
    }
}

impl Drop for Monitor {
    fn drop(&mut self) {
        self.scheduler.stop_all();
        self.close_health();
    }
}
