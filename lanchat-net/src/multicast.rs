//! Multicast channel: one socket joined to a group, sending to it and forwarding what arrives.

use std::net::{IpAddr, Ipv4Addr, SocketAddrV4};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use lanchat_core::protocol::PACKET_SIZE;
use log::{debug, info, warn};
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::{ErrorSink, NetError};

/// Text received on a socket, with the address it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Datagram {
    pub text: String,
    pub from: IpAddr,
}

/// The single listener of a receiving transport.
pub type DatagramSender = mpsc::UnboundedSender<Datagram>;

const RECEIVE_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Trimmed UTF-8 text of a received payload.
pub(crate) fn payload_text(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes)
        .trim_matches(|c: char| c.is_whitespace() || c == '\0')
        .to_string()
}

/// UDP socket bound to `port` with `SO_REUSEADDR`, so several peers on one host share the port.
fn bind_shared(port: u16) -> std::io::Result<Socket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    socket.bind(&SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port).into())?;
    Ok(socket)
}

pub(crate) fn make_multicast_socket(
    group: Ipv4Addr,
    port: u16,
    interface: Option<Ipv4Addr>,
    ttl: u32,
) -> std::io::Result<UdpSocket> {
    let socket = bind_shared(port)?;
    socket.join_multicast_v4(&group, &interface.unwrap_or(Ipv4Addr::UNSPECIFIED))?;
    if let Some(interface) = interface {
        socket.set_multicast_if_v4(&interface)?;
    }
    socket.set_multicast_ttl_v4(ttl)?;
    socket.set_multicast_loop_v4(true)?;
    socket.set_nonblocking(true)?;
    UdpSocket::from_std(socket.into())
}

/// Read datagrams until `cancel` fires, forwarding each to `listener`.
/// Errors after cancellation are shutdown noise and are not reported.
pub(crate) async fn receive_loop(
    socket: Arc<UdpSocket>,
    cancel: CancellationToken,
    listener: DatagramSender,
    errors: Arc<dyn ErrorSink>,
) {
    let mut buf = [0u8; PACKET_SIZE];
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            res = socket.recv_from(&mut buf) => match res {
                Ok((n, from)) => {
                    let text = payload_text(&buf[..n]);
                    debug!("<< {from}: {text}");
                    if listener.send(Datagram { text, from: from.ip() }).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    if cancel.is_cancelled() {
                        break;
                    }
                    errors.show_error(&format!("Receive failed: {e}"));
                    tokio::time::sleep(RECEIVE_ERROR_BACKOFF).await;
                }
            }
        }
    }
    debug!("Receiver on {:?} stopped", socket.local_addr().ok());
}

struct Running {
    socket: Arc<UdpSocket>,
    cancel: CancellationToken,
}

/// Send and receive on one multicast group.
pub struct MulticastChannel {
    group: Ipv4Addr,
    port: u16,
    ttl: u32,
    interface: Option<Ipv4Addr>,
    listener: DatagramSender,
    errors: Arc<dyn ErrorSink>,
    running: Mutex<Option<Running>>,
}

impl MulticastChannel {
    /// Fails only if `group` is not a multicast address.
    pub fn new(
        group: Ipv4Addr,
        port: u16,
        ttl: u32,
        interface: Option<Ipv4Addr>,
        listener: DatagramSender,
        errors: Arc<dyn ErrorSink>,
    ) -> Result<Self, NetError> {
        if !group.is_multicast() {
            return Err(NetError::NotMulticast(group));
        }
        Ok(Self {
            group,
            port,
            ttl,
            interface,
            listener,
            errors,
            running: Mutex::new(None),
        })
    }

    /// Join the group and start receiving. Returns whether the channel is connected;
    /// calling it again while connected does nothing.
    pub fn start(&self) -> bool {
        let Ok(mut running) = self.running.lock() else {
            return false;
        };
        if running.is_some() {
            return true;
        }
        match make_multicast_socket(self.group, self.port, self.interface, self.ttl) {
            Ok(socket) => {
                let socket = Arc::new(socket);
                let cancel = CancellationToken::new();
                tokio::spawn(receive_loop(
                    socket.clone(),
                    cancel.clone(),
                    self.listener.clone(),
                    self.errors.clone(),
                ));
                info!(
                    "Joined {}:{} on {}",
                    self.group,
                    self.port,
                    self.interface
                        .map(|i| i.to_string())
                        .unwrap_or_else(|| "default interface".to_string())
                );
                *running = Some(Running { socket, cancel });
                true
            }
            Err(e) => {
                self.errors
                    .show_error(&format!("Failed to join {}:{}: {e}", self.group, self.port));
                false
            }
        }
    }

    /// Leave the group and stop the receiver.
    pub fn stop(&self) {
        let stopped = self.running.lock().ok().and_then(|mut r| r.take());
        if let Some(running) = stopped {
            running.cancel.cancel();
            if let Err(e) = running
                .socket
                .leave_multicast_v4(self.group, self.interface.unwrap_or(Ipv4Addr::UNSPECIFIED))
            {
                debug!("Leaving {} failed: {e}", self.group);
            }
            info!("Left {}:{}", self.group, self.port);
        }
    }

    pub fn is_connected(&self) -> bool {
        self.running.lock().map(|r| r.is_some()).unwrap_or(false)
    }

    fn socket(&self) -> Option<Arc<UdpSocket>> {
        self.running
            .lock()
            .ok()
            .and_then(|r| r.as_ref().map(|r| r.socket.clone()))
    }

    /// Send `text` to the group. Oversized payloads are logged and still sent.
    pub async fn send(&self, text: &str) -> bool {
        let Some(socket) = self.socket() else {
            warn!("Not connected, dropping: {text}");
            return false;
        };
        let bytes = text.as_bytes();
        if bytes.len() > PACKET_SIZE {
            warn!(
                "Message is {} bytes, over the {PACKET_SIZE} byte packet size: {text}",
                bytes.len()
            );
        }
        match socket.send_to(bytes, (self.group, self.port)).await {
            Ok(_) => {
                debug!(">> {text}");
                true
            }
            Err(e) => {
                warn!("Send to {}:{} failed: {e}", self.group, self.port);
                false
            }
        }
    }
}

impl Drop for MulticastChannel {
    fn drop(&mut self) {
        self.stop();
    }
}
