//! Lanchat wire protocol: well-known groups and ports, and the typed main-channel messages.

use std::net::Ipv4Addr;

use crate::peer::PeerCode;

/// Multicast group carrying the main chat channel.
pub const CHAT_GROUP: Ipv4Addr = Ipv4Addr::new(224, 168, 5, 200);
/// Port of the main chat channel.
pub const CHAT_PORT: u16 = 40556;
/// Temporary group used once at startup to find the interface the OS picks.
pub const PROBE_GROUP: Ipv4Addr = Ipv4Addr::new(224, 168, 5, 250);
/// Port of the temporary probe group.
pub const PROBE_PORT: u16 = 50050;
/// First port tried for the private chat receiver.
pub const PRIVATE_CHAT_PORT: u16 = 40656;
/// First port tried for a file transfer listener.
pub const FILE_TRANSFER_PORT: u16 = 40756;
/// How many consecutive ports are tried before a bind is given up.
pub const PORT_ATTEMPTS: u16 = 50;
/// Datagram payload cap, in bytes.
pub const PACKET_SIZE: usize = 512;
/// Largest chat text the sending side accepts, in bytes.
pub const MESSAGE_MAX_BYTES: usize = 450;
/// Client string advertised in `CLIENT` messages.
pub const CLIENT_NAME: &str = concat!("lanchat v", env!("CARGO_PKG_VERSION"));

/// Header of every main-channel datagram: who sent it and under which nick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub code: PeerCode,
    pub nick: String,
    pub message: Message,
}

impl Envelope {
    pub fn new(code: PeerCode, nick: impl Into<String>, message: Message) -> Self {
        Self {
            code,
            nick: nick.into(),
            message,
        }
    }
}

/// All main-channel message types. Text encoding lives in the wire module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Ordinary chat line.
    Msg { color: i32, text: String },
    Logon,
    Logoff,
    /// Ask everyone to announce themselves.
    Expose,
    /// Identity announcement. Empty `away_msg` means the peer is not away.
    Exposing { away_msg: String },
    Away { away_msg: String },
    Back,
    /// Sent to a peer whose logon nick collides with ours.
    NickCrash { nick: String },
    Writing,
    StoppedWriting,
    GetTopic,
    /// `topic == None` removes the topic.
    Topic {
        setter: String,
        time: i64,
        topic: Option<String>,
    },
    /// The new nick travels in the envelope header.
    Nick,
    Idle,
    Client {
        client: String,
        time_since_logon: i64,
        operating_system: String,
        private_chat_port: u16,
    },
    SendFile {
        to: PeerCode,
        size: u64,
        hash: i32,
        file_name: String,
    },
    SendFileAccept {
        to: PeerCode,
        port: u16,
        hash: i32,
        file_name: String,
    },
    SendFileAbort {
        to: PeerCode,
        hash: i32,
        file_name: String,
    },
}

impl Message {
    /// Wire name of the message type.
    pub fn type_name(&self) -> &'static str {
        match self {
            Message::Msg { .. } => "MSG",
            Message::Logon => "LOGON",
            Message::Logoff => "LOGOFF",
            Message::Expose => "EXPOSE",
            Message::Exposing { .. } => "EXPOSING",
            Message::Away { .. } => "AWAY",
            Message::Back => "BACK",
            Message::NickCrash { .. } => "NICKCRASH",
            Message::Writing => "WRITING",
            Message::StoppedWriting => "STOPPEDWRITING",
            Message::GetTopic => "GETTOPIC",
            Message::Topic { .. } => "TOPIC",
            Message::Nick => "NICK",
            Message::Idle => "IDLE",
            Message::Client { .. } => "CLIENT",
            Message::SendFile { .. } => "SENDFILE",
            Message::SendFileAccept { .. } => "SENDFILEACCEPT",
            Message::SendFileAbort { .. } => "SENDFILEABORT",
        }
    }
}
