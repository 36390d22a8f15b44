use crate::monitor::Publisher;
use crate::{BusEvent, Error, Transport};
use log::{debug, warn};
use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

/// Spawn the receive loop. It owns the receive side of the transport for
/// the lifetime of the bus connection and is never joined; read-side
/// teardown has nothing to undo.
pub(crate) fn spawn(
    transport: Arc<dyn Transport>,
    publisher: Publisher,
) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("nerdcan-rx".to_string())
        .spawn(move || run(transport.as_ref(), &publisher))
}

fn run(transport: &dyn Transport, publisher: &Publisher) {
    debug!("receiving on {}", transport.name());
    loop {
        match transport.receive() {
            Ok(packet) => {
                publisher.publish(BusEvent::received(packet, Instant::now()))
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                warn!("receive on {} stopped: {}", transport.name(), e);
                publisher.fault(Error::ReceiveTerminated(e.to_string()));
                break;
            }
        }
    }
}
