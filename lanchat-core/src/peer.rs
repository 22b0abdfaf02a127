//! Peer identity: session code, nick rules, and the per-peer presence record.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::net::IpAddr;
use std::str::FromStr;

use rand::Rng;

use crate::protocol::CLIENT_NAME;

/// Longest nick accepted on the wire.
pub const MAX_NICK_LEN: usize = 10;

/// Session-scoped peer identity. Never reused within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerCode(pub i32);

impl PeerCode {
    /// Random code for the local peer, fixed for the lifetime of the process.
    pub fn generate() -> Self {
        PeerCode(rand::thread_rng().gen_range(10_000_000..20_000_000))
    }

    /// The nick a peer falls back to when its own nick is rejected.
    pub fn as_nick(&self) -> String {
        self.0.to_string()
    }
}

impl fmt::Display for PeerCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for PeerCode {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(PeerCode)
    }
}

/// Opaque handle of an open private chat, owned by the front end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrivateChatHandle(pub u32);

/// Nick is valid if it has 1 to 10 characters of `[a-zA-Z0-9_-]`.
pub fn is_valid_nick(nick: &str) -> bool {
    let len = nick.chars().count();
    (1..=MAX_NICK_LEN).contains(&len)
        && nick
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// A participant in the chat. Equality and hashing use the code only.
#[derive(Debug, Clone)]
pub struct Peer {
    pub code: PeerCode,
    pub nick: String,
    pub ip_address: Option<IpAddr>,
    pub host_name: Option<String>,
    pub client: Option<String>,
    pub operating_system: Option<String>,
    /// Epoch millis.
    pub logon_time: i64,
    /// Epoch millis of the last `IDLE` seen.
    pub last_idle: i64,
    pub away: bool,
    pub away_msg: String,
    /// 0 when private chat with this peer is unreachable.
    pub private_chat_port: u16,
    pub writing: bool,
    pub private_chat: Option<PrivateChatHandle>,
}

impl Peer {
    pub fn new(nick: impl Into<String>, code: PeerCode) -> Self {
        Self {
            code,
            nick: nick.into(),
            ip_address: None,
            host_name: None,
            client: None,
            operating_system: None,
            logon_time: 0,
            last_idle: 0,
            away: false,
            away_msg: String::new(),
            private_chat_port: 0,
            writing: false,
            private_chat: None,
        }
    }

    /// The local peer, with client and operating system filled in.
    pub fn local(nick: impl Into<String>, code: PeerCode, now: i64) -> Self {
        let mut me = Self::new(nick, code);
        me.client = Some(CLIENT_NAME.to_string());
        me.operating_system = Some(format!(
            "{} {}",
            std::env::consts::OS,
            std::env::consts::ARCH
        ));
        me.logon_time = now;
        me.last_idle = now;
        me
    }

    /// A peer announced on the network from `ip` at `now`.
    pub fn seen(nick: impl Into<String>, code: PeerCode, ip: IpAddr, now: i64) -> Self {
        let mut peer = Self::new(nick, code);
        peer.ip_address = Some(ip);
        peer.logon_time = now;
        peer.last_idle = now;
        peer
    }

    pub fn set_away(&mut self, away: bool, away_msg: impl Into<String>) {
        self.away = away;
        self.away_msg = if away { away_msg.into() } else { String::new() };
    }

    /// `"host (ip)"`, or just the ip when the host name is unknown.
    pub fn host_info(&self) -> String {
        let ip = self
            .ip_address
            .map(|ip| ip.to_string())
            .unwrap_or_else(|| "unknown".to_string());
        match &self.host_name {
            Some(host) => format!("{host} ({ip})"),
            None => ip,
        }
    }
}

impl PartialEq for Peer {
    fn eq(&self, other: &Self) -> bool {
        self.code == other.code
    }
}

impl Eq for Peer {}

impl Hash for Peer {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.code.hash(state);
    }
}
