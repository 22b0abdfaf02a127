//! Host errors and the injected error sink.

use std::net::Ipv4Addr;

use lanchat_core::CoreError;
use log::{error, warn};

#[derive(Debug, thiserror::Error)]
pub enum NetError {
    #[error("{0} is not a multicast address")]
    NotMulticast(Ipv4Addr),
    #[error("no free port in {first}..={last}")]
    NoFreePort { first: u16, last: u16 },
    #[error("not connected to the network")]
    NotConnected,
    #[error("{0} has no private chat port")]
    NoPrivateChat(String),
    #[error("no address known for {0}")]
    NoAddress(String),
    #[error("no transfer {0}")]
    UnknownTransfer(lanchat_core::TransferId),
    #[error(transparent)]
    Core(#[from] CoreError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Where recoverable faults are reported. Passed to every component that can fail at runtime.
pub trait ErrorSink: Send + Sync {
    fn show_error(&self, message: &str);

    /// Something the session cannot recover from on its own.
    fn show_critical_error(&self, message: &str);
}

/// Sink that only logs.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogErrorSink;

impl ErrorSink for LogErrorSink {
    fn show_error(&self, message: &str) {
        warn!("{message}");
    }

    fn show_critical_error(&self, message: &str) {
        error!("{message}");
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Mutex;

    use super::*;

    /// Collects reported errors for assertions.
    #[derive(Default)]
    pub(crate) struct RecordingSink {
        pub errors: Mutex<Vec<String>>,
    }

    impl ErrorSink for RecordingSink {
        fn show_error(&self, message: &str) {
            self.errors.lock().unwrap().push(message.to_string());
        }

        fn show_critical_error(&self, message: &str) {
            self.errors.lock().unwrap().push(format!("critical: {message}"));
        }
    }

    #[test]
    fn messages_are_readable() {
        let e = NetError::NoFreePort {
            first: 40656,
            last: 40705,
        };
        assert_eq!(e.to_string(), "no free port in 40656..=40705");
        let e: NetError = CoreError::NotLoggedOn.into();
        assert_eq!(e.to_string(), "not logged on");
    }

    #[test]
    fn recording_sink_keeps_order() {
        let sink = RecordingSink::default();
        sink.show_error("a");
        sink.show_critical_error("b");
        assert_eq!(*sink.errors.lock().unwrap(), ["a", "critical: b"]);
    }
}
