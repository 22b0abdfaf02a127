//! Session state: logon flags, the channel topic, and peers waiting to be identified.

use std::collections::HashMap;

use crate::peer::PeerCode;

/// Channel topic with last-writer-wins-by-timestamp semantics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Topic {
    pub text: String,
    pub nick: String,
    /// Epoch millis of the change; 0 when no topic was ever seen.
    pub time: i64,
}

impl Topic {
    pub fn is_set(&self) -> bool {
        !self.text.is_empty()
    }

    /// Apply a change if it is strictly newer and actually differs. Returns whether it applied.
    pub fn change(&mut self, text: &str, nick: &str, time: i64) -> bool {
        if time <= self.time || text == self.text {
            return false;
        }
        self.text = text.to_string();
        self.nick = nick.to_string();
        self.time = time;
        true
    }

    /// Remove the topic if a topic is set and the removal is strictly newer.
    pub fn remove(&mut self, time: i64) -> bool {
        if !self.is_set() || time <= self.time {
            return false;
        }
        self.text.clear();
        self.nick.clear();
        self.time = time;
        true
    }
}

/// Per-session chat state.
#[derive(Debug, Clone, Default)]
pub struct ChatState {
    /// Joined the multicast group (our own `LOGON` came back).
    pub logged_on: bool,
    /// Identification burst after logon is over.
    pub logon_completed: bool,
    /// Local peer is writing.
    pub wrote: bool,
    pub topic: Topic,
}

impl ChatState {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Peer codes that were referenced before their identity was known, with when they were added.
#[derive(Debug, Clone, Default)]
pub struct WaitingList {
    codes: HashMap<PeerCode, i64>,
}

impl WaitingList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start waiting for `code`. A code already waiting keeps its first timestamp.
    pub fn add(&mut self, code: PeerCode, since: i64) {
        self.codes.entry(code).or_insert(since);
    }

    pub fn is_waiting(&self, code: PeerCode) -> bool {
        self.codes.contains_key(&code)
    }

    /// Mark the code as resolved. Returns whether it was waiting.
    pub fn remove(&mut self, code: PeerCode) -> bool {
        self.codes.remove(&code).is_some()
    }

    /// Give up on codes added more than `max_age` millis before `now`. Returns them.
    pub fn expire(&mut self, now: i64, max_age: i64) -> Vec<PeerCode> {
        let stale: Vec<PeerCode> = self
            .codes
            .iter()
            .filter(|(_, since)| now.saturating_sub(**since) > max_age)
            .map(|(code, _)| *code)
            .collect();
        for code in &stale {
            self.codes.remove(code);
        }
        stale
    }

    pub fn clear(&mut self) {
        self.codes.clear();
    }

    pub fn len(&self) -> usize {
        self.codes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }
}
