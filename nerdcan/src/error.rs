use std::io;
use uuid::Uuid;

/// Failures reported by the monitor core. None of these are fatal to the
/// process; the caller decides what to surface.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("CAN interface {interface} unavailable: {source}")]
    TransportUnavailable {
        interface: String,
        #[source]
        source: io::Error,
    },

    #[error("sending {identifier:03X} failed: {reason}")]
    SendFailed { identifier: u32, reason: String },

    #[error("receive loop terminated: {0}")]
    ReceiveTerminated(String),

    #[error("invalid message: {0}")]
    InvalidSpec(String),

    #[error("no outgoing message with id {0}")]
    UnknownSpec(Uuid),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl Error {
    pub fn send_failed(identifier: u32, err: impl ToString) -> Self {
        Self::SendFailed {
            identifier,
            reason: err.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
