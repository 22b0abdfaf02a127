//! Host-driven presence state machine: ChatCore receives decoded events from the host, returns actions.

use std::net::IpAddr;

use log::{debug, error, warn};

use crate::peer::{is_valid_nick, Peer, PeerCode, PrivateChatHandle};
use crate::peer_list::PeerList;
use crate::privmsg::decode_private_message;
use crate::protocol::{Envelope, Message, MESSAGE_MAX_BYTES};
use crate::state::{ChatState, Topic, WaitingList};
use crate::wire;

/// Peers not heard from for this long are dropped.
pub const IDLE_TIMEOUT_MILLIS: i64 = 120_000;
/// Poll step while waiting for an unknown peer to identify itself.
pub const WAITING_POLL_MILLIS: u64 = 50;
/// Poll steps before a deferred event gives up (2 seconds in total).
pub const WAITING_POLL_STEPS: u32 = 40;
/// Waiting-list entries older than this are given up on.
const WAITING_MAX_AGE_MILLIS: i64 = WAITING_POLL_MILLIS as i64 * WAITING_POLL_STEPS as i64;

/// Something for the front end to show.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// Main chat system line.
    System(String),
    /// System line for the private chat with `peer`.
    PrivateSystem { peer: PeerCode, text: String },
    Message {
        peer: PeerCode,
        nick: String,
        text: String,
        color: i32,
    },
    PrivateMessage {
        peer: PeerCode,
        nick: String,
        text: String,
        color: i32,
    },
    /// The topic (or the local nick shown with it) changed.
    TopicChanged(Topic),
}

/// A file offered to us by a peer that is known locally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileOffer {
    pub peer: Peer,
    pub size: u64,
    pub hash: i32,
    pub file_name: String,
}

/// An event held back until its sender is identified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Deferred {
    Message {
        peer: PeerCode,
        text: String,
        color: i32,
    },
    PrivateMessage {
        peer: PeerCode,
        text: String,
        color: i32,
    },
    FileOffer {
        peer: PeerCode,
        size: u64,
        hash: i32,
        file_name: String,
    },
}

impl Deferred {
    pub fn peer(&self) -> PeerCode {
        match self {
            Deferred::Message { peer, .. }
            | Deferred::PrivateMessage { peer, .. }
            | Deferred::FileOffer { peer, .. } => *peer,
        }
    }
}

/// What the host must do after an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Send on the main multicast channel.
    Broadcast(Envelope),
    Notify(Notice),
    /// Wait for `peer()` to leave the waiting list, then call [`ChatCore::resume`].
    Defer(Deferred),
    /// Ask the user whether to accept, then accept or abort.
    ReceiveFile(FileOffer),
    /// The peer opened a listener for a file we offered.
    StartSend {
        peer: Peer,
        file_name: String,
        hash: i32,
        port: u16,
    },
    /// The peer aborted a transfer of `file_name` in either direction.
    AbortTransfer {
        peer: PeerCode,
        file_name: String,
        hash: i32,
    },
    /// The peer is gone; its transfers and private chat should be closed.
    PeerLeft(PeerCode),
}

/// Rejected local operation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoreError {
    #[error("not logged on")]
    NotLoggedOn,
    #[error("'{0}' is not a valid nick")]
    InvalidNick(String),
    #[error("nick '{0}' is in use by someone else")]
    NickInUse(String),
    #[error("unknown peer {0}")]
    UnknownPeer(PeerCode),
    #[error("message is {0} bytes, too long to send")]
    MessageTooLong(usize),
    #[error("empty message")]
    EmptyMessage,
}

/// Current time as epoch millis.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn format_time(millis: i64) -> String {
    chrono::DateTime::<chrono::Utc>::from_timestamp_millis(millis)
        .map(|t| {
            t.with_timezone(&chrono::Local)
                .format("%H:%M:%S, %d. %b. %y")
                .to_string()
        })
        .unwrap_or_else(|| millis.to_string())
}

fn system(text: impl Into<String>) -> Action {
    Action::Notify(Notice::System(text.into()))
}

/// Presence state of one session: the local peer, the peer table, topic and waiting list.
pub struct ChatCore {
    me: Peer,
    state: ChatState,
    peers: PeerList,
    waiting: WaitingList,
    /// Latest event time seen, in epoch millis.
    clock: i64,
}

impl ChatCore {
    pub fn new(me: Peer) -> Self {
        Self {
            me,
            state: ChatState::new(),
            peers: PeerList::new(),
            waiting: WaitingList::new(),
            clock: 0,
        }
    }

    pub fn me(&self) -> &Peer {
        &self.me
    }

    pub fn me_mut(&mut self) -> &mut Peer {
        &mut self.me
    }

    pub fn state(&self) -> &ChatState {
        &self.state
    }

    pub fn topic(&self) -> &Topic {
        &self.state.topic
    }

    pub fn peers(&self) -> &PeerList {
        &self.peers
    }

    /// Mutable access, for subscribing observers.
    pub fn peers_mut(&mut self) -> &mut PeerList {
        &mut self.peers
    }

    pub fn peer(&self, code: PeerCode) -> Option<&Peer> {
        self.peers.get(code)
    }

    pub fn is_new_peer(&self, code: PeerCode) -> bool {
        !self.peers.contains(code)
    }

    pub fn is_waiting(&self, code: PeerCode) -> bool {
        self.waiting.is_waiting(code)
    }

    pub fn waiting_list(&self) -> &WaitingList {
        &self.waiting
    }

    /// Nick taken by the local peer or any peer other than `except`, ignoring case.
    pub fn is_nick_in_use(&self, nick: &str, except: Option<PeerCode>) -> bool {
        (except != Some(self.me.code) && self.me.nick.trim().eq_ignore_ascii_case(nick.trim()))
            || self.peers.is_nick_in_use(nick, except)
    }

    fn envelope(&self, message: Message) -> Envelope {
        Envelope::new(self.me.code, self.me.nick.clone(), message)
    }

    fn broadcast(&self, message: Message) -> Action {
        Action::Broadcast(self.envelope(message))
    }

    // Incoming events.

    /// Decode and handle one main-channel datagram. Malformed data is logged and dropped.
    pub fn handle_datagram(&mut self, payload: &str, ip: IpAddr, now: i64) -> Vec<Action> {
        match wire::decode(payload) {
            Ok(Some(envelope)) => self.handle(envelope, ip, now),
            Ok(None) => {
                debug!("Ignoring unknown message type from {ip}: {payload}");
                Vec::new()
            }
            Err(e) => {
                warn!("Dropping malformed message from {ip}: {e}: {payload}");
                Vec::new()
            }
        }
    }

    /// Decode and handle one private datagram.
    pub fn handle_private_datagram(&mut self, payload: &str, ip: IpAddr, now: i64) -> Vec<Action> {
        self.advance_clock(now);
        match decode_private_message(payload, self.me.code) {
            Ok(Some(msg)) => self.private_message_arrived(msg.from, msg.text, msg.color),
            Ok(None) => Vec::new(),
            Err(e) => {
                warn!("Dropping malformed private message from {ip}: {e}: {payload}");
                Vec::new()
            }
        }
    }

    /// Handle a decoded main-channel event.
    pub fn handle(&mut self, envelope: Envelope, ip: IpAddr, now: i64) -> Vec<Action> {
        let Envelope {
            code,
            nick,
            message,
        } = envelope;
        self.advance_clock(now);

        if code == self.me.code {
            return match message {
                Message::Logon => self.me_log_on(ip),
                Message::Idle if self.state.logged_on => self.me_idle(ip, now),
                _ => Vec::new(),
            };
        }
        if !self.state.logged_on {
            return Vec::new();
        }

        match message {
            Message::Msg { color, text } => self.message_arrived(code, text, color),
            Message::Logon => self.user_log_on(Peer::seen(nick, code, ip, now)),
            Message::Logoff => self.user_log_off(code),
            Message::Expose => self.expose_requested(now),
            Message::Exposing { away_msg } => {
                let mut peer = Peer::seen(nick, code, ip, now);
                peer.set_away(!away_msg.is_empty(), away_msg);
                self.user_exposing(peer)
            }
            Message::Away { away_msg } => self.away_changed(code, true, away_msg),
            Message::Back => self.away_changed(code, false, String::new()),
            Message::NickCrash { nick: crashed } => {
                if crashed == self.me.nick {
                    self.nick_crash()
                } else {
                    Vec::new()
                }
            }
            Message::Writing => self.writing_changed(code, true),
            Message::StoppedWriting => self.writing_changed(code, false),
            Message::GetTopic => self.topic_requested(),
            Message::Topic {
                setter,
                time,
                topic,
            } => self.topic_changed(code, topic, setter, time),
            Message::Nick => self.nick_changed(code, nick),
            Message::Idle => self.user_idle(code, ip, now),
            Message::Client {
                client,
                time_since_logon,
                operating_system,
                private_chat_port,
            } => self.client_info(
                code,
                client,
                now.saturating_sub(time_since_logon.max(0)),
                operating_system,
                private_chat_port,
            ),
            Message::SendFile {
                to,
                size,
                hash,
                file_name,
            } if to == self.me.code => self.file_offered(code, size, hash, file_name),
            Message::SendFileAccept {
                to,
                port,
                hash,
                file_name,
            } if to == self.me.code => self.file_accepted(code, file_name, hash, port),
            Message::SendFileAbort {
                to,
                hash,
                file_name,
            } if to == self.me.code => self.file_aborted(code, file_name, hash),
            Message::SendFile { .. }
            | Message::SendFileAccept { .. }
            | Message::SendFileAbort { .. } => Vec::new(),
        }
    }

    /// Move the clock forward and drop waiting codes nobody identified in time.
    fn advance_clock(&mut self, now: i64) {
        self.clock = self.clock.max(now);
        for code in self.waiting.expire(self.clock, WAITING_MAX_AGE_MILLIS) {
            debug!("Peer {code} never identified itself");
        }
    }

    /// Put `code` on the waiting list and ask everyone to identify themselves.
    fn unknown_sender(&mut self, code: PeerCode) -> Vec<Action> {
        debug!("Unknown peer {code}, asking for identification");
        self.waiting.add(code, self.clock);
        vec![
            self.broadcast(Message::Expose),
            self.broadcast(Message::GetTopic),
        ]
    }

    fn defer_or(&mut self, deferred: Deferred) -> Vec<Action> {
        let peer = deferred.peer();
        if self.is_new_peer(peer) {
            let mut actions = self.unknown_sender(peer);
            actions.push(Action::Defer(deferred));
            actions
        } else {
            self.deliver(deferred)
        }
    }

    /// Called by the host when a deferred event's wait is over, resolved or not.
    pub fn resume(&mut self, deferred: Deferred) -> Vec<Action> {
        let peer = deferred.peer();
        if self.is_new_peer(peer) {
            error!("Could not find peer {peer}, dropping {deferred:?}");
            self.waiting.remove(peer);
            return Vec::new();
        }
        self.deliver(deferred)
    }

    fn deliver(&mut self, deferred: Deferred) -> Vec<Action> {
        let Some(peer) = self.peers.get(deferred.peer()) else {
            return Vec::new();
        };
        match deferred {
            Deferred::Message { text, color, .. } => {
                if peer.away {
                    debug!("Ignoring message from {} while away", peer.nick);
                    return Vec::new();
                }
                vec![Action::Notify(Notice::Message {
                    peer: peer.code,
                    nick: peer.nick.clone(),
                    text,
                    color,
                })]
            }
            Deferred::PrivateMessage { text, color, .. } => {
                vec![Action::Notify(Notice::PrivateMessage {
                    peer: peer.code,
                    nick: peer.nick.clone(),
                    text,
                    color,
                })]
            }
            Deferred::FileOffer {
                size,
                hash,
                file_name,
                ..
            } => vec![Action::ReceiveFile(FileOffer {
                peer: peer.clone(),
                size,
                hash,
                file_name,
            })],
        }
    }

    fn message_arrived(&mut self, code: PeerCode, text: String, color: i32) -> Vec<Action> {
        self.defer_or(Deferred::Message {
            peer: code,
            text,
            color,
        })
    }

    fn private_message_arrived(&mut self, code: PeerCode, text: String, color: i32) -> Vec<Action> {
        self.defer_or(Deferred::PrivateMessage {
            peer: code,
            text,
            color,
        })
    }

    /// Apply nick rules to a newcomer and insert it. The nick falls back to the code on conflict.
    fn admit(&mut self, mut peer: Peer) -> (Vec<Action>, String) {
        let mut actions = Vec::new();
        if self.me.nick.trim().eq_ignore_ascii_case(&peer.nick) {
            actions.push(self.broadcast(Message::NickCrash {
                nick: peer.nick.clone(),
            }));
            peer.nick = peer.code.as_nick();
        } else if self.peers.is_nick_in_use(&peer.nick, Some(peer.code))
            || !is_valid_nick(&peer.nick)
        {
            peer.nick = peer.code.as_nick();
        }
        let nick = peer.nick.clone();
        self.waiting.remove(peer.code);
        self.peers.add(peer);
        (actions, nick)
    }

    fn user_log_on(&mut self, peer: Peer) -> Vec<Action> {
        if !self.is_new_peer(peer.code) {
            return self.reconcile(&peer);
        }
        let ip = peer.host_info();
        let (mut actions, nick) = self.admit(peer);
        actions.push(system(format!("{nick} logged on from {ip}")));
        actions
    }

    fn user_log_off(&mut self, code: PeerCode) -> Vec<Action> {
        self.waiting.remove(code);
        match self.peers.remove(code) {
            Some(peer) => vec![
                system(format!("{} logged off", peer.nick)),
                Action::PeerLeft(code),
            ],
            None => Vec::new(),
        }
    }

    fn user_exposing(&mut self, peer: Peer) -> Vec<Action> {
        if !self.is_new_peer(peer.code) {
            return self.reconcile(&peer);
        }
        if self.state.logon_completed {
            let ip = peer.host_info();
            let (mut actions, nick) = self.admit(peer);
            actions.push(system(format!("{nick} showed up unexpectedly from {ip}")));
            actions
        } else {
            self.waiting.remove(peer.code);
            self.peers.add(peer);
            Vec::new()
        }
    }

    /// Bring a known peer in line with what it just advertised.
    fn reconcile(&mut self, advertised: &Peer) -> Vec<Action> {
        let Some(stored) = self.peers.get(advertised.code) else {
            return Vec::new();
        };
        let nick_drift = stored.nick != advertised.nick;
        let away_drift = stored.away_msg != advertised.away_msg;
        let mut actions = Vec::new();
        if nick_drift {
            actions.extend(self.nick_changed(advertised.code, advertised.nick.clone()));
        }
        if away_drift {
            actions.extend(self.away_changed(
                advertised.code,
                advertised.away,
                advertised.away_msg.clone(),
            ));
        }
        actions
    }

    fn away_changed(&mut self, code: PeerCode, away: bool, away_msg: String) -> Vec<Action> {
        if self.is_new_peer(code) {
            return self.unknown_sender(code);
        }
        self.peers.update(code, |p| p.set_away(away, away_msg.clone()));
        let Some(peer) = self.peers.get(code) else {
            return Vec::new();
        };
        let text = if away {
            format!("{} went away: {}", peer.nick, peer.away_msg)
        } else {
            format!("{} came back", peer.nick)
        };
        let mut actions = vec![system(text.clone())];
        if peer.private_chat.is_some() {
            actions.push(Action::Notify(Notice::PrivateSystem { peer: code, text }));
        }
        actions
    }

    fn nick_changed(&mut self, code: PeerCode, new_nick: String) -> Vec<Action> {
        if self.is_new_peer(code) {
            return self.unknown_sender(code);
        }
        let Some(old_nick) = self.peers.get(code).map(|p| p.nick.clone()) else {
            return Vec::new();
        };
        if self.is_nick_in_use(&new_nick, Some(code)) || !is_valid_nick(&new_nick) {
            error!("{old_nick} tried to change nick to '{new_nick}', which is invalid");
            return Vec::new();
        }
        self.peers.update(code, |p| p.nick = new_nick.clone());
        let text = format!("{old_nick} changed nick to {new_nick}");
        let mut actions = vec![system(text.clone())];
        if self.peers.get(code).is_some_and(|p| p.private_chat.is_some()) {
            actions.push(Action::Notify(Notice::PrivateSystem { peer: code, text }));
        }
        actions
    }

    fn writing_changed(&mut self, code: PeerCode, writing: bool) -> Vec<Action> {
        self.peers.update(code, |p| p.writing = writing);
        Vec::new()
    }

    fn nick_crash(&mut self) -> Vec<Action> {
        self.me.nick = self.me.code.as_nick();
        vec![
            system(format!("Nick crash, resetting nick to {}", self.me.nick)),
            Action::Notify(Notice::TopicChanged(self.state.topic.clone())),
        ]
    }

    fn topic_requested(&self) -> Vec<Action> {
        if !self.state.logon_completed || self.state.topic.time == 0 {
            return Vec::new();
        }
        vec![self.topic_message()]
    }

    fn topic_message(&self) -> Action {
        let topic = &self.state.topic;
        self.broadcast(Message::Topic {
            setter: topic.nick.clone(),
            time: topic.time,
            topic: topic.is_set().then(|| topic.text.clone()),
        })
    }

    fn topic_changed(
        &mut self,
        code: PeerCode,
        new_topic: Option<String>,
        setter: String,
        time: i64,
    ) -> Vec<Action> {
        if self.is_new_peer(code) {
            return self.unknown_sender(code);
        }
        if time <= 0 || setter.is_empty() {
            return Vec::new();
        }
        let completed = self.state.logon_completed;
        let text = match new_topic {
            Some(text) => {
                if !self.state.topic.change(&text, &setter, time) {
                    return Vec::new();
                }
                if completed {
                    format!("{setter} changed the topic to: {text}")
                } else {
                    format!("Topic is: {text} (set by {setter} at {})", format_time(time))
                }
            }
            None => {
                if !completed || !self.state.topic.remove(time) {
                    return Vec::new();
                }
                format!("{setter} removed the topic")
            }
        };
        vec![
            system(text),
            Action::Notify(Notice::TopicChanged(self.state.topic.clone())),
        ]
    }

    fn expose_requested(&self, now: i64) -> Vec<Action> {
        vec![
            self.broadcast(Message::Exposing {
                away_msg: self.me.away_msg.clone(),
            }),
            Action::Broadcast(self.client_message(now)),
        ]
    }

    fn me_log_on(&mut self, ip: IpAddr) -> Vec<Action> {
        self.state.logged_on = true;
        self.me.ip_address = Some(ip);
        vec![
            system(format!(
                "You logged on as {} from {}",
                self.me.nick,
                self.me.host_info()
            )),
            Action::Notify(Notice::TopicChanged(self.state.topic.clone())),
        ]
    }

    fn me_idle(&mut self, ip: IpAddr, now: i64) -> Vec<Action> {
        self.me.last_idle = now;
        match self.me.ip_address {
            Some(old) if old != ip => {
                self.me.ip_address = Some(ip);
                vec![system(format!("You changed ip from {old} to {ip}"))]
            }
            _ => Vec::new(),
        }
    }

    fn user_idle(&mut self, code: PeerCode, ip: IpAddr, now: i64) -> Vec<Action> {
        if self.is_new_peer(code) {
            return self.unknown_sender(code);
        }
        let mut actions = Vec::new();
        if let Some(peer) = self.peers.get(code) {
            if let Some(old) = peer.ip_address.filter(|old| *old != ip) {
                actions.push(system(format!(
                    "{} changed ip from {old} to {ip}",
                    peer.nick
                )));
            }
        }
        self.peers.update(code, |p| {
            p.last_idle = now;
            p.ip_address = Some(ip);
        });
        actions
    }

    fn client_info(
        &mut self,
        code: PeerCode,
        client: String,
        logon_time: i64,
        operating_system: String,
        private_chat_port: u16,
    ) -> Vec<Action> {
        let found = self.peers.update(code, |p| {
            p.client = Some(client);
            p.logon_time = logon_time;
            p.operating_system = Some(operating_system);
            p.private_chat_port = private_chat_port;
        });
        if !found {
            error!("Could not find peer {code} for client info");
        }
        Vec::new()
    }

    fn file_offered(&mut self, code: PeerCode, size: u64, hash: i32, file_name: String) -> Vec<Action> {
        self.defer_or(Deferred::FileOffer {
            peer: code,
            size,
            hash,
            file_name,
        })
    }

    fn file_accepted(&mut self, code: PeerCode, file_name: String, hash: i32, port: u16) -> Vec<Action> {
        let Some(peer) = self.peers.get(code) else {
            error!("Could not find peer {code} accepting {file_name}");
            return Vec::new();
        };
        vec![
            system(format!("{} accepted sending of {file_name}", peer.nick)),
            Action::StartSend {
                peer: peer.clone(),
                file_name,
                hash,
                port,
            },
        ]
    }

    fn file_aborted(&mut self, code: PeerCode, file_name: String, hash: i32) -> Vec<Action> {
        if self.is_new_peer(code) {
            error!("Could not find peer {code} aborting {file_name}");
            return Vec::new();
        }
        vec![Action::AbortTransfer {
            peer: code,
            file_name,
            hash,
        }]
    }

    /// Drop peers whose last `IDLE` is older than the timeout.
    pub fn tick(&mut self, now: i64) -> Vec<Action> {
        self.advance_clock(now);
        let stale: Vec<PeerCode> = self
            .peers
            .iter()
            .filter(|p| now - p.last_idle > IDLE_TIMEOUT_MILLIS)
            .map(|p| p.code)
            .collect();
        let mut actions = Vec::new();
        for code in stale {
            if let Some(peer) = self.peers.remove(code) {
                actions.push(system(format!("{} timed out", peer.nick)));
                actions.push(Action::PeerLeft(code));
            }
        }
        actions
    }

    // Local operations. Each returns what to broadcast and show.

    /// Messages announcing ourselves when joining the channel.
    pub fn log_on_messages(&self, now: i64) -> Vec<Envelope> {
        vec![
            self.envelope(Message::Logon),
            self.client_message(now),
            self.envelope(Message::Expose),
            self.envelope(Message::GetTopic),
        ]
    }

    /// The identification burst after logon is over.
    pub fn complete_logon(&mut self) {
        self.state.logon_completed = true;
    }

    /// Leave the channel: forget every peer and reset the logon flags.
    pub fn log_off(&mut self) -> Envelope {
        let goodbye = self.envelope(Message::Logoff);
        let codes: Vec<PeerCode> = self.peers.iter().map(|p| p.code).collect();
        for code in codes {
            self.peers.remove(code);
        }
        self.waiting.clear();
        self.state.logged_on = false;
        self.state.logon_completed = false;
        self.state.wrote = false;
        goodbye
    }

    pub fn client_message(&self, now: i64) -> Envelope {
        self.envelope(Message::Client {
            client: self.me.client.clone().unwrap_or_default(),
            time_since_logon: now - self.me.logon_time,
            operating_system: self.me.operating_system.clone().unwrap_or_default(),
            private_chat_port: self.me.private_chat_port,
        })
    }

    pub fn idle_message(&self) -> Envelope {
        self.envelope(Message::Idle)
    }

    pub fn chat_message(&self, text: &str, color: i32) -> Result<Vec<Action>, CoreError> {
        if !self.state.logged_on {
            return Err(CoreError::NotLoggedOn);
        }
        check_text(text)?;
        Ok(vec![
            self.broadcast(Message::Msg {
                color,
                text: text.to_string(),
            }),
            Action::Notify(Notice::Message {
                peer: self.me.code,
                nick: self.me.nick.clone(),
                text: text.to_string(),
                color,
            }),
        ])
    }

    pub fn change_nick(&mut self, new_nick: &str) -> Result<Vec<Action>, CoreError> {
        let new_nick = new_nick.trim();
        if !is_valid_nick(new_nick) {
            return Err(CoreError::InvalidNick(new_nick.to_string()));
        }
        if self.is_nick_in_use(new_nick, Some(self.me.code)) {
            return Err(CoreError::NickInUse(new_nick.to_string()));
        }
        self.me.nick = new_nick.to_string();
        let mut actions = Vec::new();
        if self.state.logged_on {
            actions.push(self.broadcast(Message::Nick));
        }
        actions.push(system(format!("You changed nick to {new_nick}")));
        actions.push(Action::Notify(Notice::TopicChanged(self.state.topic.clone())));
        Ok(actions)
    }

    /// Set (or with an empty text, remove) the topic.
    pub fn change_topic(&mut self, text: &str, now: i64) -> Result<Vec<Action>, CoreError> {
        if !self.state.logged_on {
            return Err(CoreError::NotLoggedOn);
        }
        let text = text.trim();
        if text.len() > MESSAGE_MAX_BYTES {
            return Err(CoreError::MessageTooLong(text.len()));
        }
        let nick = self.me.nick.clone();
        let applied = if text.is_empty() {
            self.state.topic.remove(now)
        } else {
            self.state.topic.change(text, &nick, now)
        };
        if !applied {
            return Ok(Vec::new());
        }
        let line = if text.is_empty() {
            "You removed the topic".to_string()
        } else {
            format!("You changed the topic to: {text}")
        };
        Ok(vec![
            self.topic_message(),
            system(line),
            Action::Notify(Notice::TopicChanged(self.state.topic.clone())),
        ])
    }

    pub fn go_away(&mut self, away_msg: &str) -> Result<Vec<Action>, CoreError> {
        let away_msg = away_msg.trim();
        check_text(away_msg)?;
        self.me.set_away(true, away_msg);
        let mut actions = Vec::new();
        if self.state.logged_on {
            actions.push(self.broadcast(Message::Away {
                away_msg: away_msg.to_string(),
            }));
        }
        actions.push(system(format!("You went away: {away_msg}")));
        Ok(actions)
    }

    pub fn come_back(&mut self) -> Vec<Action> {
        if !self.me.away {
            return Vec::new();
        }
        self.me.set_away(false, "");
        let mut actions = Vec::new();
        if self.state.logged_on {
            actions.push(self.broadcast(Message::Back));
        }
        actions.push(system("You came back"));
        actions
    }

    /// Local writing indicator. Broadcasts only on change.
    pub fn set_writing(&mut self, writing: bool) -> Vec<Action> {
        if self.state.wrote == writing || !self.state.logged_on {
            return Vec::new();
        }
        self.state.wrote = writing;
        vec![self.broadcast(if writing {
            Message::Writing
        } else {
            Message::StoppedWriting
        })]
    }

    /// Record that the front end opened (or closed) a private chat with `code`.
    pub fn set_private_chat(
        &mut self,
        code: PeerCode,
        handle: Option<PrivateChatHandle>,
    ) -> Result<(), CoreError> {
        if self.peers.update(code, |p| p.private_chat = handle) {
            Ok(())
        } else {
            Err(CoreError::UnknownPeer(code))
        }
    }

    pub fn offer_file(
        &self,
        to: PeerCode,
        file_name: &str,
        size: u64,
        hash: i32,
    ) -> Result<Envelope, CoreError> {
        if !self.state.logged_on {
            return Err(CoreError::NotLoggedOn);
        }
        if self.is_new_peer(to) {
            return Err(CoreError::UnknownPeer(to));
        }
        Ok(self.envelope(Message::SendFile {
            to,
            size,
            hash,
            file_name: file_name.to_string(),
        }))
    }

    pub fn accept_file(&self, offer: &FileOffer, port: u16) -> Envelope {
        self.envelope(Message::SendFileAccept {
            to: offer.peer.code,
            port,
            hash: offer.hash,
            file_name: offer.file_name.clone(),
        })
    }

    pub fn abort_file(&self, to: PeerCode, file_name: &str, hash: i32) -> Envelope {
        self.envelope(Message::SendFileAbort {
            to,
            hash,
            file_name: file_name.to_string(),
        })
    }
}

fn check_text(text: &str) -> Result<(), CoreError> {
    if text.trim().is_empty() {
        return Err(CoreError::EmptyMessage);
    }
    if text.len() > MESSAGE_MAX_BYTES {
        return Err(CoreError::MessageTooLong(text.len()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::peer_list::PeerListEvent;

    const ME: PeerCode = PeerCode(11111111);
    const NOW: i64 = 1_700_000_000_000;

    fn ip(last: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(192, 168, 1, last))
    }

    fn logged_on(completed: bool) -> ChatCore {
        let mut core = ChatCore::new(Peer::local("Me", ME, NOW));
        core.handle(Envelope::new(ME, "Me", Message::Logon), ip(1), NOW);
        if completed {
            core.complete_logon();
        }
        core
    }

    fn from(code: i32, nick: &str, message: Message) -> Envelope {
        Envelope::new(PeerCode(code), nick, message)
    }

    fn exposing(code: i32, nick: &str) -> Envelope {
        from(
            code,
            nick,
            Message::Exposing {
                away_msg: String::new(),
            },
        )
    }

    fn broadcasts(actions: &[Action]) -> Vec<&Message> {
        actions
            .iter()
            .filter_map(|a| match a {
                Action::Broadcast(env) => Some(&env.message),
                _ => None,
            })
            .collect()
    }

    fn systems(actions: &[Action]) -> Vec<&str> {
        actions
            .iter()
            .filter_map(|a| match a {
                Action::Notify(Notice::System(s)) => Some(s.as_str()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn own_logon_echo_logs_us_on() {
        let mut core = ChatCore::new(Peer::local("Me", ME, NOW));
        assert!(!core.state().logged_on);
        let actions = core.handle(from(ME.0, "Me", Message::Logon), ip(1), NOW);
        assert!(core.state().logged_on);
        assert_eq!(core.me().ip_address, Some(ip(1)));
        assert_eq!(systems(&actions), ["You logged on as Me from 192.168.1.1"]);
    }

    #[test]
    fn events_ignored_before_logon() {
        let mut core = ChatCore::new(Peer::local("Me", ME, NOW));
        let actions = core.handle(from(42, "Bob", Message::Logon), ip(2), NOW);
        assert!(actions.is_empty());
        assert!(core.peers().is_empty());
    }

    #[test]
    fn logon_adds_peer() {
        let mut core = logged_on(true);
        let actions = core.handle(from(42, "Bob", Message::Logon), ip(2), NOW);
        assert_eq!(core.peer(PeerCode(42)).unwrap().nick, "Bob");
        assert_eq!(systems(&actions), ["Bob logged on from 192.168.1.2"]);
    }

    #[test]
    fn nick_collision_with_me_sends_crash_and_renames() {
        let mut core = logged_on(true);
        let actions = core.handle(from(42, "ME", Message::Logon), ip(2), NOW);
        assert_eq!(core.peer(PeerCode(42)).unwrap().nick, "42");
        assert_eq!(
            broadcasts(&actions),
            [&Message::NickCrash {
                nick: "ME".to_string()
            }]
        );
    }

    #[test]
    fn nick_in_use_by_third_peer_is_replaced() {
        let mut core = logged_on(true);
        core.handle(from(42, "Bob", Message::Logon), ip(2), NOW);
        let actions = core.handle(from(43, "bob", Message::Logon), ip(3), NOW);
        assert_eq!(core.peer(PeerCode(43)).unwrap().nick, "43");
        assert!(broadcasts(&actions).is_empty());
    }

    #[test]
    fn invalid_nick_is_replaced() {
        let mut core = logged_on(true);
        core.handle(from(42, "way too long nick", Message::Logon), ip(2), NOW);
        assert_eq!(core.peer(PeerCode(42)).unwrap().nick, "42");
    }

    #[test]
    fn duplicate_logon_is_idempotent() {
        let mut core = logged_on(true);
        core.handle(from(42, "Bob", Message::Logon), ip(2), NOW);
        let actions = core.handle(from(42, "Bob", Message::Logon), ip(2), NOW);
        assert!(actions.is_empty());
        assert_eq!(core.peers().len(), 1);
    }

    #[test]
    fn expose_during_startup_is_silent() {
        let mut core = logged_on(false);
        let actions = core.handle(exposing(42, "Bob"), ip(2), NOW);
        assert!(actions.is_empty());
        assert_eq!(core.peer(PeerCode(42)).unwrap().nick, "Bob");
    }

    #[test]
    fn expose_after_startup_is_surprise_logon() {
        let mut core = logged_on(true);
        let actions = core.handle(exposing(42, "me"), ip(2), NOW);
        assert_eq!(core.peer(PeerCode(42)).unwrap().nick, "42");
        assert_eq!(
            systems(&actions),
            ["42 showed up unexpectedly from 192.168.1.2"]
        );
        assert_eq!(broadcasts(&actions).len(), 1);
    }

    #[test]
    fn expose_reconciles_nick_and_away_drift() {
        let mut core = logged_on(true);
        core.handle(from(42, "Bob", Message::Logon), ip(2), NOW);
        let actions = core.handle(
            from(
                42,
                "Bobby",
                Message::Exposing {
                    away_msg: "lunch".to_string(),
                },
            ),
            ip(2),
            NOW,
        );
        let peer = core.peer(PeerCode(42)).unwrap();
        assert_eq!(peer.nick, "Bobby");
        assert!(peer.away);
        assert_eq!(peer.away_msg, "lunch");
        assert_eq!(
            systems(&actions),
            ["Bob changed nick to Bobby", "Bobby went away: lunch"]
        );
    }

    #[test]
    fn topic_last_writer_wins() {
        let mut core = logged_on(true);
        core.handle(from(42, "Bob", Message::Logon), ip(2), NOW);
        let topic = |text: &str, time| {
            from(
                42,
                "Bob",
                Message::Topic {
                    setter: "Bob".to_string(),
                    time,
                    topic: Some(text.to_string()),
                },
            )
        };
        core.handle(topic("A", 5), ip(2), NOW);
        assert_eq!(core.topic().text, "A");
        let actions = core.handle(topic("B", 3), ip(2), NOW);
        assert!(actions.is_empty());
        assert_eq!(core.topic().text, "A");
        let actions = core.handle(topic("B", 7), ip(2), NOW);
        assert_eq!(core.topic().text, "B");
        assert_eq!(systems(&actions), ["Bob changed the topic to: B"]);
    }

    #[test]
    fn topic_without_time_or_setter_is_ignored() {
        let mut core = logged_on(true);
        core.handle(from(42, "Bob", Message::Logon), ip(2), NOW);
        for (setter, time) in [("", 10), ("Bob", 0)] {
            core.handle(
                from(
                    42,
                    "Bob",
                    Message::Topic {
                        setter: setter.to_string(),
                        time,
                        topic: Some("x".to_string()),
                    },
                ),
                ip(2),
                NOW,
            );
        }
        assert!(!core.topic().is_set());
    }

    #[test]
    fn topic_removal_only_after_logon_completed() {
        let mut core = logged_on(false);
        core.handle(exposing(42, "Bob"), ip(2), NOW);
        let set = from(
            42,
            "Bob",
            Message::Topic {
                setter: "Bob".to_string(),
                time: 5,
                topic: Some("A".to_string()),
            },
        );
        let actions = core.handle(set, ip(2), NOW);
        assert!(systems(&actions)[0].starts_with("Topic is: A (set by Bob at "));
        let removal = from(
            42,
            "Bob",
            Message::Topic {
                setter: "Bob".to_string(),
                time: 6,
                topic: None,
            },
        );
        core.handle(removal.clone(), ip(2), NOW);
        assert_eq!(core.topic().text, "A");
        core.complete_logon();
        let actions = core.handle(removal, ip(2), NOW);
        assert!(!core.topic().is_set());
        assert_eq!(systems(&actions), ["Bob removed the topic"]);
    }

    #[test]
    fn unknown_sender_message_is_deferred_then_delivered() {
        let mut core = logged_on(true);
        let actions = core.handle(
            from(
                42,
                "Bob",
                Message::Msg {
                    color: 7,
                    text: "hello".to_string(),
                },
            ),
            ip(2),
            NOW,
        );
        assert_eq!(
            broadcasts(&actions),
            [&Message::Expose, &Message::GetTopic]
        );
        let deferred = match actions.last() {
            Some(Action::Defer(d)) => d.clone(),
            other => panic!("expected Defer, got {other:?}"),
        };
        assert!(core.is_waiting(PeerCode(42)));

        core.handle(exposing(42, "Bob"), ip(2), NOW);
        assert!(!core.is_waiting(PeerCode(42)));

        let delivered = core.resume(deferred);
        assert_eq!(
            delivered,
            [Action::Notify(Notice::Message {
                peer: PeerCode(42),
                nick: "Bob".to_string(),
                text: "hello".to_string(),
                color: 7,
            })]
        );
    }

    #[test]
    fn unresolved_deferral_is_dropped() {
        let mut core = logged_on(true);
        let actions = core.handle(
            from(
                42,
                "Bob",
                Message::Msg {
                    color: 0,
                    text: "hi".to_string(),
                },
            ),
            ip(2),
            NOW,
        );
        let Some(Action::Defer(deferred)) = actions.last().cloned() else {
            panic!("expected Defer");
        };
        assert!(core.resume(deferred).is_empty());
        assert!(!core.is_waiting(PeerCode(42)));
    }

    #[test]
    fn updates_from_unknown_peers_request_identity() {
        let mut core = logged_on(true);
        for message in [
            Message::Nick,
            Message::Idle,
            Message::Away {
                away_msg: "x".to_string(),
            },
            Message::Topic {
                setter: "Bob".to_string(),
                time: 9,
                topic: Some("t".to_string()),
            },
        ] {
            let actions = core.handle(from(42, "Bob", message), ip(2), NOW);
            assert_eq!(
                broadcasts(&actions),
                [&Message::Expose, &Message::GetTopic]
            );
        }
        assert!(core.is_waiting(PeerCode(42)));
        assert!(core.peers().is_empty());
        assert!(!core.topic().is_set());
    }

    #[test]
    fn nick_crash_resets_local_nick() {
        let mut core = logged_on(true);
        core.handle(
            from(
                42,
                "Bob",
                Message::NickCrash {
                    nick: "Someone".to_string(),
                },
            ),
            ip(2),
            NOW,
        );
        assert_eq!(core.me().nick, "Me");
        core.handle(
            from(
                42,
                "Bob",
                Message::NickCrash {
                    nick: "Me".to_string(),
                },
            ),
            ip(2),
            NOW,
        );
        assert_eq!(core.me().nick, ME.as_nick());
    }

    #[test]
    fn nick_change_rejected_when_taken() {
        let mut core = logged_on(true);
        core.handle(from(42, "Bob", Message::Logon), ip(2), NOW);
        core.handle(from(43, "Eve", Message::Logon), ip(3), NOW);
        core.handle(from(43, "bob", Message::Nick), ip(3), NOW);
        core.handle(from(42, "me", Message::Nick), ip(2), NOW);
        assert_eq!(core.peer(PeerCode(43)).unwrap().nick, "Eve");
        assert_eq!(core.peer(PeerCode(42)).unwrap().nick, "Bob");
        core.handle(from(42, "BOB", Message::Nick), ip(2), NOW);
        assert_eq!(core.peer(PeerCode(42)).unwrap().nick, "BOB");
    }

    #[test]
    fn away_mirrored_into_private_chat() {
        let mut core = logged_on(true);
        core.handle(from(42, "Bob", Message::Logon), ip(2), NOW);
        core.set_private_chat(PeerCode(42), Some(PrivateChatHandle(1)))
            .unwrap();
        let actions = core.handle(
            from(
                42,
                "Bob",
                Message::Away {
                    away_msg: "brb".to_string(),
                },
            ),
            ip(2),
            NOW,
        );
        assert!(actions.contains(&Action::Notify(Notice::PrivateSystem {
            peer: PeerCode(42),
            text: "Bob went away: brb".to_string(),
        })));
        let actions = core.handle(from(42, "Bob", Message::Back), ip(2), NOW);
        assert_eq!(systems(&actions), ["Bob came back"]);
        assert!(!core.peer(PeerCode(42)).unwrap().away);
    }

    #[test]
    fn idle_updates_ip_and_timeout_removes() {
        let mut core = logged_on(true);
        core.handle(from(42, "Bob", Message::Logon), ip(2), NOW);
        let actions = core.handle(from(42, "Bob", Message::Idle), ip(9), NOW + 1000);
        assert_eq!(
            systems(&actions),
            ["Bob changed ip from 192.168.1.2 to 192.168.1.9"]
        );
        assert!(core.tick(NOW + 1000 + IDLE_TIMEOUT_MILLIS).is_empty());
        let actions = core.tick(NOW + 1001 + IDLE_TIMEOUT_MILLIS);
        assert_eq!(systems(&actions), ["Bob timed out"]);
        assert!(actions.contains(&Action::PeerLeft(PeerCode(42))));
        assert!(core.peers().is_empty());
    }

    #[test]
    fn expose_request_answered_with_identity_and_client() {
        let mut core = logged_on(true);
        core.me_mut().private_chat_port = 40657;
        let actions = core.handle(from(42, "Bob", Message::Expose), ip(2), NOW + 500);
        let sent = broadcasts(&actions);
        assert_eq!(sent.len(), 2);
        assert!(matches!(sent[0], Message::Exposing { .. }));
        assert!(matches!(
            sent[1],
            Message::Client {
                time_since_logon: 500,
                private_chat_port: 40657,
                ..
            }
        ));
    }

    #[test]
    fn client_info_updates_peer() {
        let mut core = logged_on(true);
        core.handle(from(42, "Bob", Message::Logon), ip(2), NOW);
        core.handle(
            from(
                42,
                "Bob",
                Message::Client {
                    client: "lanchat v0.1.0".to_string(),
                    time_since_logon: 1000,
                    operating_system: "linux".to_string(),
                    private_chat_port: 40656,
                },
            ),
            ip(2),
            NOW,
        );
        let peer = core.peer(PeerCode(42)).unwrap();
        assert_eq!(peer.private_chat_port, 40656);
        assert_eq!(peer.logon_time, NOW - 1000);
        assert_eq!(peer.client.as_deref(), Some("lanchat v0.1.0"));
    }

    #[test]
    fn client_time_since_logon_out_of_range() {
        let mut core = logged_on(true);
        core.handle_datagram("42!LOGON#Bob:", ip(2), NOW);
        let actions =
            core.handle_datagram("42!CLIENT#Bob:(x)[-9223372036854775808]{os}<0>", ip(2), NOW);
        assert!(actions.is_empty());
        assert_eq!(core.peer(PeerCode(42)).unwrap().logon_time, NOW);

        core.handle_datagram("42!CLIENT#Bob:(x)[9223372036854775807]{os}<0>", ip(2), NOW);
        assert_eq!(core.peer(PeerCode(42)).unwrap().logon_time, NOW - i64::MAX);
    }

    #[test]
    fn unresolved_waiting_entry_expires() {
        let mut core = logged_on(true);
        core.handle(from(42, "Bob", Message::Idle), ip(2), NOW);
        assert!(core.is_waiting(PeerCode(42)));
        core.tick(NOW + 1_000);
        assert!(core.is_waiting(PeerCode(42)));
        core.handle(from(43, "Eve", Message::Back), ip(3), NOW + 2_001);
        assert!(!core.is_waiting(PeerCode(42)));
        assert!(core.is_waiting(PeerCode(43)));
    }

    #[test]
    fn log_off_forgets_waiting_peers() {
        let mut core = logged_on(true);
        core.handle(from(42, "Bob", Message::Idle), ip(2), NOW);
        assert!(core.is_waiting(PeerCode(42)));
        core.log_off();
        assert!(!core.is_waiting(PeerCode(42)));
        assert!(core.waiting_list().is_empty());
    }

    #[test]
    fn file_handshake_for_someone_else_is_ignored() {
        let mut core = logged_on(true);
        core.handle(from(42, "Bob", Message::Logon), ip(2), NOW);
        let actions = core.handle(
            from(
                42,
                "Bob",
                Message::SendFile {
                    to: PeerCode(5),
                    size: 10,
                    hash: 1,
                    file_name: "a".to_string(),
                },
            ),
            ip(2),
            NOW,
        );
        assert!(actions.is_empty());
    }

    #[test]
    fn file_offer_accept_and_abort() {
        let mut core = logged_on(true);
        core.handle(from(42, "Bob", Message::Logon), ip(2), NOW);
        let actions = core.handle(
            from(
                42,
                "Bob",
                Message::SendFile {
                    to: ME,
                    size: 10_000,
                    hash: 77,
                    file_name: "a.txt".to_string(),
                },
            ),
            ip(2),
            NOW,
        );
        let Some(Action::ReceiveFile(offer)) = actions.first() else {
            panic!("expected ReceiveFile, got {actions:?}");
        };
        assert_eq!(offer.size, 10_000);
        let accept = core.accept_file(offer, 40756);
        assert_eq!(
            accept.message,
            Message::SendFileAccept {
                to: PeerCode(42),
                port: 40756,
                hash: 77,
                file_name: "a.txt".to_string()
            }
        );

        let actions = core.handle(
            from(
                42,
                "Bob",
                Message::SendFileAccept {
                    to: ME,
                    port: 40757,
                    hash: 3,
                    file_name: "b.txt".to_string(),
                },
            ),
            ip(2),
            NOW,
        );
        assert!(actions.iter().any(|a| matches!(
            a,
            Action::StartSend { port: 40757, hash: 3, .. }
        )));

        let actions = core.handle(
            from(
                42,
                "Bob",
                Message::SendFileAbort {
                    to: ME,
                    hash: 3,
                    file_name: "b.txt".to_string(),
                },
            ),
            ip(2),
            NOW,
        );
        assert_eq!(
            actions,
            [Action::AbortTransfer {
                peer: PeerCode(42),
                file_name: "b.txt".to_string(),
                hash: 3
            }]
        );
    }

    #[test]
    fn private_message_from_known_peer() {
        let mut core = logged_on(true);
        core.handle(from(42, "Bob", Message::Logon), ip(2), NOW);
        let raw = crate::privmsg::encode_private_message(PeerCode(42), "Bob", ME, 3, "psst");
        let actions = core.handle_private_datagram(&raw, ip(2), NOW);
        assert_eq!(
            actions,
            [Action::Notify(Notice::PrivateMessage {
                peer: PeerCode(42),
                nick: "Bob".to_string(),
                text: "psst".to_string(),
                color: 3
            })]
        );
        assert!(core.handle_private_datagram("junk", ip(2), NOW).is_empty());
    }

    #[test]
    fn malformed_datagram_is_dropped() {
        let mut core = logged_on(true);
        assert!(core.handle_datagram("nonsense", ip(2), NOW).is_empty());
        assert!(core.handle_datagram("42!NEWTHING#Bob:x", ip(2), NOW).is_empty());
    }

    #[test]
    fn local_operations() {
        let mut core = logged_on(true);
        core.handle(from(42, "Bob", Message::Logon), ip(2), NOW);
        assert_eq!(
            core.change_nick("bob"),
            Err(CoreError::NickInUse("bob".to_string()))
        );
        assert!(matches!(
            core.change_nick("no spaces"),
            Err(CoreError::InvalidNick(_))
        ));
        core.change_nick("Alice").unwrap();
        assert_eq!(core.me().nick, "Alice");

        let long = "x".repeat(MESSAGE_MAX_BYTES + 1);
        assert_eq!(
            core.chat_message(&long, 0),
            Err(CoreError::MessageTooLong(MESSAGE_MAX_BYTES + 1))
        );
        assert_eq!(core.chat_message("  ", 0), Err(CoreError::EmptyMessage));

        let actions = core.change_topic("plans", NOW).unwrap();
        assert_eq!(core.topic().nick, "Alice");
        assert!(matches!(
            broadcasts(&actions)[0],
            Message::Topic { topic: Some(t), .. } if t == "plans"
        ));
        let actions = core.change_topic("", NOW + 1).unwrap();
        assert!(matches!(
            broadcasts(&actions)[0],
            Message::Topic { topic: None, .. }
        ));

        assert_eq!(core.set_writing(true).len(), 1);
        assert!(core.set_writing(true).is_empty());

        core.go_away("lunch").unwrap();
        assert!(core.me().away);
        assert_eq!(core.come_back().len(), 2);
        assert!(core.come_back().is_empty());
    }

    #[test]
    fn log_off_clears_peers_and_notifies_observers() {
        let mut core = logged_on(true);
        let removed = Arc::new(Mutex::new(0));
        let r = removed.clone();
        core.peers_mut().subscribe(Box::new(move |e| {
            if let PeerListEvent::Removed { .. } = e {
                *r.lock().unwrap() += 1;
            }
        }));
        core.handle(from(42, "Bob", Message::Logon), ip(2), NOW);
        core.handle(from(43, "Eve", Message::Logon), ip(3), NOW);
        let bye = core.log_off();
        assert_eq!(bye.message, Message::Logoff);
        assert_eq!(*removed.lock().unwrap(), 2);
        assert!(!core.state().logged_on);
        assert!(!core.state().logon_completed);
    }

    #[test]
    fn offer_file_needs_known_peer() {
        let core = logged_on(true);
        assert_eq!(
            core.offer_file(PeerCode(42), "a", 1, 1),
            Err(CoreError::UnknownPeer(PeerCode(42)))
        );
    }
}
