//! Startup probe finding the interface the OS uses for multicast: send a tagged message to a
//! temporary group and see which local address the loopback copy comes from.

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;

use lanchat_core::PeerCode;
use log::{debug, info};
use tokio::sync::mpsc;

use crate::error::ErrorSink;
use crate::multicast::{Datagram, MulticastChannel};

pub const PROBE_STEP: Duration = Duration::from_millis(50);
pub const PROBE_STEPS: u32 = 40;

pub fn probe_message(code: PeerCode) -> String {
    format!("getOperatingSystemNetworkInterface({code})")
}

/// Wait up to `steps * step` for a datagram whose text is exactly `expected`.
pub async fn wait_for_echo(
    rx: &mut mpsc::UnboundedReceiver<Datagram>,
    expected: &str,
    step: Duration,
    steps: u32,
) -> Option<IpAddr> {
    let wait = async {
        while let Some(datagram) = rx.recv().await {
            if datagram.text == expected {
                return Some(datagram.from);
            }
            debug!("Probe ignoring {:?} from {}", datagram.text, datagram.from);
        }
        None
    };
    tokio::time::timeout(step * steps, wait).await.ok().flatten()
}

/// Interface to use for `ip`, if it is a usable local IPv4 address.
pub fn interface_for(ip: IpAddr) -> Option<Ipv4Addr> {
    let IpAddr::V4(v4) = ip else {
        return None;
    };
    if v4.is_loopback() || v4.is_unspecified() {
        return None;
    }
    // Binding succeeds only for addresses assigned to this host.
    std::net::UdpSocket::bind((v4, 0)).ok().map(|_| v4)
}

pub struct NetworkProbe {
    group: Ipv4Addr,
    port: u16,
    ttl: u32,
    code: PeerCode,
    errors: Arc<dyn ErrorSink>,
}

impl NetworkProbe {
    pub fn new(
        group: Ipv4Addr,
        port: u16,
        ttl: u32,
        code: PeerCode,
        errors: Arc<dyn ErrorSink>,
    ) -> Self {
        Self {
            group,
            port,
            ttl,
            code,
            errors,
        }
    }

    /// Run once. `None` means no preference: let the OS pick.
    pub async fn find_interface(self) -> Option<Ipv4Addr> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let channel =
            match MulticastChannel::new(self.group, self.port, self.ttl, None, tx, self.errors) {
                Ok(c) => c,
                Err(e) => {
                    debug!("Probe skipped: {e}");
                    return None;
                }
            };
        if !channel.start() {
            return None;
        }
        let message = probe_message(self.code);
        let echo = if channel.send(&message).await {
            wait_for_echo(&mut rx, &message, PROBE_STEP, PROBE_STEPS).await
        } else {
            None
        };
        channel.stop();

        match echo.and_then(interface_for) {
            Some(interface) => {
                info!("Operating system uses {interface} for multicast");
                Some(interface)
            }
            None => {
                info!("No multicast interface found, using the OS default");
                None
            }
        }
    }
}
