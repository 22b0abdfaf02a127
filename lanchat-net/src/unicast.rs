//! Unicast UDP for private messages: a receiver on the first free port from a base, and a sender.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex};

use lanchat_core::protocol::{PACKET_SIZE, PORT_ATTEMPTS};
use log::{debug, info, warn};
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;

use crate::error::{ErrorSink, NetError};
use crate::multicast::{receive_loop, DatagramSender};

/// Try `bind` on `base`, `base + 1`, ... for up to `PORT_ATTEMPTS` ports.
pub(crate) fn bind_first_free<T>(
    base: u16,
    mut bind: impl FnMut(u16) -> std::io::Result<T>,
) -> Result<(T, u16), NetError> {
    let mut last = base;
    for port in (0..PORT_ATTEMPTS).filter_map(|i| base.checked_add(i)) {
        last = port;
        match bind(port) {
            Ok(bound) => return Ok((bound, port)),
            Err(e) => debug!("Port {port} unavailable: {e}"),
        }
    }
    Err(NetError::NoFreePort { first: base, last })
}

struct Running {
    port: u16,
    cancel: CancellationToken,
}

/// Receives private messages on a unicast port.
pub struct UnicastReceiver {
    base_port: u16,
    listener: DatagramSender,
    errors: Arc<dyn ErrorSink>,
    running: Mutex<Option<Running>>,
}

impl UnicastReceiver {
    pub fn new(base_port: u16, listener: DatagramSender, errors: Arc<dyn ErrorSink>) -> Self {
        Self {
            base_port,
            listener,
            errors,
            running: Mutex::new(None),
        }
    }

    /// Bind and start receiving. Idempotent. When every port is taken the failure is
    /// reported once through the error sink and private chat stays unavailable.
    pub fn start(&self) -> bool {
        let Ok(mut running) = self.running.lock() else {
            return false;
        };
        if running.is_some() {
            return true;
        }
        let bound = bind_first_free(self.base_port, |port| {
            let s = std::net::UdpSocket::bind((Ipv4Addr::UNSPECIFIED, port))?;
            s.set_nonblocking(true)?;
            Ok(s)
        })
        .and_then(|(s, _)| {
            let port = s.local_addr()?.port();
            Ok((UdpSocket::from_std(s)?, port))
        });
        match bound {
            Ok((socket, port)) => {
                let cancel = CancellationToken::new();
                tokio::spawn(receive_loop(
                    Arc::new(socket),
                    cancel.clone(),
                    self.listener.clone(),
                    self.errors.clone(),
                ));
                info!("Private chat receiver on port {port}");
                *running = Some(Running { port, cancel });
                true
            }
            Err(e) => {
                self.errors.show_error(&format!(
                    "Failed to initialize network for private chat ({e}). Private chat will be unavailable."
                ));
                false
            }
        }
    }

    pub fn stop(&self) {
        if let Some(running) = self.running.lock().ok().and_then(|mut r| r.take()) {
            running.cancel.cancel();
            info!("Private chat receiver on port {} stopped", running.port);
        }
    }

    /// Bound port, or `None` when not started.
    pub fn port(&self) -> Option<u16> {
        self.running.lock().ok().and_then(|r| r.as_ref().map(|r| r.port))
    }

    pub fn is_connected(&self) -> bool {
        self.port().is_some()
    }
}

impl Drop for UnicastReceiver {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Sends private messages to a peer's receiver.
pub struct UnicastSender {
    socket: UdpSocket,
}

impl UnicastSender {
    pub async fn bind() -> std::io::Result<Self> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await?;
        Ok(Self { socket })
    }

    pub async fn send(&self, text: &str, to: SocketAddr) -> bool {
        let bytes = text.as_bytes();
        if bytes.len() > PACKET_SIZE {
            warn!(
                "Message is {} bytes, over the {PACKET_SIZE} byte packet size: {text}",
                bytes.len()
            );
        }
        match self.socket.send_to(bytes, to).await {
            Ok(_) => {
                debug!(">> {to}: {text}");
                true
            }
            Err(e) => {
                warn!("Private send to {to} failed: {e}");
                false
            }
        }
    }
}
