//! End-to-end behaviour of a monitor session on an in-memory bus.

use nerdcan::health::CAN_ERR_BUSOFF;
use nerdcan::transport::LoopbackTransport;
use nerdcan::{
    BusEvent, BusHealthSnapshot, BusStatus, Config, Direction, Error,
    ErrorFrame, FilterMode, Monitor, MonitorEvent, OutgoingMessageSpec, Packet,
    TriggerKind,
};
use std::sync::{Arc, mpsc};
use std::thread;
use std::time::{Duration, Instant};

fn session(
    echo: bool,
) -> (Monitor, Arc<LoopbackTransport>, mpsc::Receiver<MonitorEvent>) {
    let bus =
        Arc::new(LoopbackTransport::new("vcan0", 500_000).with_echo(echo));
    let config = Config::default().interface("vcan0");
    let (monitor, events) = Monitor::start(bus.clone(), config).unwrap();
    (monitor, bus, events)
}

/// Collect stream items until `window` has passed.
fn collect(
    events: &mpsc::Receiver<MonitorEvent>,
    window: Duration,
) -> Vec<MonitorEvent> {
    let deadline = Instant::now() + window;
    let mut items = vec![];
    while let Some(left) = deadline.checked_duration_since(Instant::now()) {
        match events.recv_timeout(left) {
            Ok(item) => items.push(item),
            Err(_) => break,
        }
    }
    items
}

fn bus_events(items: Vec<MonitorEvent>) -> Vec<BusEvent> {
    items
        .into_iter()
        .filter_map(|item| match item {
            MonitorEvent::Bus(event) => Some(event),
            MonitorEvent::Fault(_) => None,
        })
        .collect()
}

fn next_bus_event(events: &mpsc::Receiver<MonitorEvent>) -> BusEvent {
    match events.recv_timeout(Duration::from_secs(1)) {
        Ok(MonitorEvent::Bus(event)) => event,
        other => panic!("expected bus event, got {:?}", other),
    }
}

#[test]
fn received_cycle_time() {
    let (_monitor, bus, events) = session(false);

    bus.inject(Packet::new(0x100, &[1]));
    let first = next_bus_event(&events);
    thread::sleep(Duration::from_millis(100));
    bus.inject(Packet::new(0x100, &[2]));
    let second = next_bus_event(&events);

    assert_eq!(first.direction, Direction::Received);
    assert_eq!(first.cycle_time, Duration::ZERO);
    assert!(!second.self_originated);
    assert!(second.cycle_time >= Duration::from_millis(95));
    assert!(second.cycle_time < Duration::from_millis(250));
}

#[test]
fn latest_follows_last_event_per_identifier() {
    let (monitor, bus, events) = session(false);
    for (id, byte) in [(0x300, 1), (0x100, 2), (0x300, 3), (0x200, 4)] {
        bus.inject(Packet::new(id, &[byte]));
    }
    assert_eq!(bus_events(collect(&events, Duration::from_millis(100))).len(), 4);

    let latest = monitor.latest();
    let ids: Vec<u32> = latest.iter().map(|m| m.current.id()).collect();
    assert_eq!(ids, vec![0x100, 0x200, 0x300]);
    assert_eq!(monitor.latest_for(0x300).unwrap().packet.bytes, vec![3]);
    assert_eq!(latest[2].count, 2);
    assert_eq!(monitor.totals(), (4, 4));
}

#[test]
fn periodic_transmission() {
    let (monitor, bus, events) = session(false);
    let spec = OutgoingMessageSpec::new(0x200, &[0xAB], Duration::from_millis(50));
    let id = spec.id;
    monitor.upsert_spec(spec).unwrap();
    monitor.start_cyclic(id).unwrap();
    assert!(monitor.list_specs()[0].active);

    let sent = bus_events(collect(&events, Duration::from_millis(200)));
    monitor.stop_cyclic(id);

    assert!(sent.len() >= 3, "only {} periodic frames", sent.len());
    for event in sent.iter() {
        assert_eq!(event.direction, Direction::Transmitted);
        assert_eq!(event.trigger, Some(TriggerKind::Periodic));
        assert_eq!(event.cycle_time, Duration::from_millis(50));
        assert!(event.self_originated);
    }
    for pair in sent.windows(2) {
        let spacing = pair[1].time - pair[0].time;
        assert!(spacing >= Duration::from_millis(25), "{:?}", spacing);
        assert!(spacing <= Duration::from_millis(100), "{:?}", spacing);
    }
    assert_eq!(bus.sent_count(), sent.len());
}

#[test]
fn one_shot_never_recurs() {
    let (monitor, bus, events) = session(false);
    let spec = OutgoingMessageSpec::new(0x7DF, &[2, 1, 0], Duration::ZERO);
    let id = spec.id;
    monitor.upsert_spec(spec).unwrap();
    monitor.trigger(id).unwrap();

    let sent = bus_events(collect(&events, Duration::from_millis(150)));
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].direction, Direction::Transmitted);
    assert_eq!(sent[0].trigger, Some(TriggerKind::Manual));
    assert_eq!(sent[0].cycle_time, Duration::ZERO);
    assert_eq!(bus.sent_count(), 1);
    assert!(!monitor.list_specs()[0].active);
}

#[test]
fn double_start_keeps_one_sender() {
    let (monitor, bus, _events) = session(false);
    let spec = OutgoingMessageSpec::new(0x101, &[], Duration::from_millis(50));
    let id = spec.id;
    monitor.upsert_spec(spec).unwrap();
    monitor.start_cyclic(id).unwrap();
    monitor.start_cyclic(id).unwrap();

    thread::sleep(Duration::from_millis(260));
    monitor.stop_cyclic(id);

    // one sender manages about five ticks here, two would double that
    let count = bus.sent_count();
    assert!((3..=6).contains(&count), "{} frames sent", count);
}

#[test]
fn no_sends_after_stop_returns() {
    let (monitor, bus, _events) = session(false);
    let spec = OutgoingMessageSpec::new(0x102, &[1], Duration::from_millis(10));
    let id = spec.id;
    monitor.upsert_spec(spec).unwrap();
    monitor.start_cyclic(id).unwrap();
    thread::sleep(Duration::from_millis(55));

    let started = Instant::now();
    assert!(monitor.stop_cyclic(id));
    assert!(started.elapsed() < Duration::from_millis(10 + 20 + 50));

    let count = bus.sent_count();
    assert!(count > 0);
    thread::sleep(Duration::from_millis(60));
    assert_eq!(bus.sent_count(), count);
    assert!(!monitor.stop_cyclic(id));
}

#[test]
fn stuck_transmit_does_not_block_stop() {
    let (monitor, bus, _events) = session(false);
    bus.set_send_delay(Duration::from_millis(400));
    let spec = OutgoingMessageSpec::new(0x103, &[], Duration::from_millis(20));
    let id = spec.id;
    monitor.upsert_spec(spec).unwrap();
    monitor.start_cyclic(id).unwrap();
    thread::sleep(Duration::from_millis(40));

    let started = Instant::now();
    monitor.stop_cyclic(id);
    assert!(started.elapsed() < Duration::from_millis(200));
    assert!(!monitor.list_specs()[0].active);

    // the frame already on its way completes; nothing follows it
    thread::sleep(Duration::from_millis(500));
    let count = bus.sent_count();
    assert!(count <= 1);
    thread::sleep(Duration::from_millis(100));
    assert_eq!(bus.sent_count(), count);
}

#[test]
fn stop_all_leaves_every_message_idle() {
    let (monitor, bus, _events) = session(false);
    let specs: Vec<OutgoingMessageSpec> = (0..3)
        .map(|n| {
            OutgoingMessageSpec::new(
                0x400 + n,
                &[n as u8],
                Duration::from_millis(15),
            )
        })
        .collect();
    for spec in specs.iter() {
        monitor.upsert_spec(spec.clone()).unwrap();
        monitor.start_cyclic(spec.id).unwrap();
    }
    thread::sleep(Duration::from_millis(50));

    monitor.stop_all_cyclic();
    assert!(monitor.list_specs().iter().all(|s| !s.active));
    for spec in specs.iter() {
        assert!(!monitor.scheduler().is_running(spec.id));
    }
    let count = bus.sent_count();
    thread::sleep(Duration::from_millis(50));
    assert_eq!(bus.sent_count(), count);
}

#[test]
fn failed_send_keeps_cyclic_sender_alive() {
    let (monitor, bus, events) = session(false);
    bus.set_fail_sends(true);
    let spec = OutgoingMessageSpec::new(0x104, &[], Duration::from_millis(20));
    let id = spec.id;
    monitor.upsert_spec(spec).unwrap();
    monitor.start_cyclic(id).unwrap();

    let items = collect(&events, Duration::from_millis(70));
    assert!(items.iter().any(|item| matches!(
        item,
        MonitorEvent::Fault(Error::SendFailed { identifier: 0x104, .. })
    )));
    assert!(monitor.scheduler().is_running(id));

    bus.set_fail_sends(false);
    let sent = bus_events(collect(&events, Duration::from_millis(70)));
    assert!(!sent.is_empty());
    monitor.stop_cyclic(id);
}

#[test]
fn echo_is_recorded_but_not_a_log_row() {
    let (monitor, _bus, events) = session(true);
    let spec = OutgoingMessageSpec::new(0x105, &[7], Duration::ZERO);
    let id = spec.id;
    monitor.upsert_spec(spec).unwrap();
    monitor.send_once(id).unwrap();

    // the echo may overtake the transmit event on a loopback bus
    let items = bus_events(collect(&events, Duration::from_millis(100)));
    assert_eq!(items.len(), 2);
    let sent = items
        .iter()
        .find(|e| e.direction == Direction::Transmitted)
        .unwrap();
    let echo = items
        .iter()
        .find(|e| e.direction == Direction::Received)
        .unwrap();
    assert!(sent.is_log_row());
    assert!(sent.time <= echo.time);
    assert!(echo.echo);
    assert!(echo.self_originated);
    assert!(!echo.is_log_row());
    assert_eq!(echo.cycle_time, Duration::ZERO);

    let log_rows = items.iter().filter(|e| e.is_log_row()).count();
    assert_eq!(log_rows, 1);

    let stored = monitor.latest_for(0x105).unwrap();
    assert_eq!(stored.direction, Direction::Received);
    assert!(stored.self_originated);
}

#[test]
fn whitelist_hides_events_but_table_updates() {
    let (monitor, bus, events) = session(false);
    monitor.set_filter_mode(FilterMode::Whitelist);

    bus.inject(Packet::new(0x120, &[1]));
    bus.inject(Packet::new(0x121, &[1]));
    assert!(bus_events(collect(&events, Duration::from_millis(80))).is_empty());
    assert_eq!(monitor.latest().len(), 2);

    assert!(monitor.toggle_filter_id(0x120));
    bus.inject(Packet::new(0x120, &[2]));
    bus.inject(Packet::new(0x121, &[2]));
    let visible = bus_events(collect(&events, Duration::from_millis(80)));
    assert_eq!(visible.len(), 1);
    assert_eq!(visible[0].id(), 0x120);
    assert_eq!(monitor.latest_for(0x121).unwrap().packet.bytes, vec![2]);

    assert_eq!(monitor.cycle_filter_mode(), FilterMode::Blacklist);
    assert!(monitor.filter().contains(0x120));
}

#[test]
fn reset_clears_table_and_senders() {
    let (monitor, bus, events) = session(false);
    let spec = OutgoingMessageSpec::new(0x106, &[], Duration::from_millis(20));
    let id = spec.id;
    monitor.upsert_spec(spec).unwrap();
    monitor.start_cyclic(id).unwrap();
    bus.inject(Packet::new(0x107, &[]));
    collect(&events, Duration::from_millis(50));

    monitor.reset();
    assert!(monitor.latest().is_empty());
    assert!(!monitor.list_specs()[0].active);
    assert_eq!(monitor.list_specs().len(), 1);
}

#[test]
fn closed_transport_terminates_receive() {
    let (_monitor, bus, events) = session(false);
    bus.close();
    match events.recv_timeout(Duration::from_secs(1)) {
        Ok(MonitorEvent::Fault(Error::ReceiveTerminated(_))) => {}
        other => panic!("expected receive termination, got {:?}", other),
    }
}

#[test]
fn health_reports_bus_off() {
    let bus = Arc::new(LoopbackTransport::new("vcan0", 500_000));
    let config = Config::default().health_interval(Duration::from_millis(40));
    let (monitor, _events) = Monitor::start(bus.clone(), config).unwrap();

    assert_eq!(monitor.health().status, BusStatus::Unknown);
    monitor.open_health().unwrap();
    monitor.open_health().unwrap();
    assert!(monitor.is_health_open());

    bus.inject_error(ErrorFrame::with_class(CAN_ERR_BUSOFF));
    let deadline = Instant::now() + Duration::from_secs(1);
    let mut seen = BusStatus::Unknown;
    while Instant::now() < deadline && seen != BusStatus::BusOff {
        seen = monitor.health().status;
        thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(seen, BusStatus::BusOff);

    bus.inject_error(ErrorFrame::with_class(0x1000));
    let deadline = Instant::now() + Duration::from_secs(1);
    while Instant::now() < deadline && seen != BusStatus::GenericError {
        seen = monitor.health().status;
        thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(seen, BusStatus::GenericError);

    monitor.close_health();
    assert!(!monitor.is_health_open());
    assert_eq!(monitor.health(), BusHealthSnapshot::default());

    // a reopened sampler starts from scratch
    monitor.open_health().unwrap();
    assert_eq!(monitor.health().status, BusStatus::Unknown);
    assert_eq!(monitor.health().interface, "vcan0");
}
