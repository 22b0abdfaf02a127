//! Peer table kept sorted by nick, with synchronous change notification to observers.

use std::cmp::Ordering;

use crate::peer::{Peer, PeerCode};

/// Change published to observers. `pos` is the index in the sorted list.
#[derive(Debug, Clone)]
pub enum PeerListEvent {
    Added { pos: usize, peer: Peer },
    Changed { pos: usize, peer: Peer },
    Removed { pos: usize, peer: Peer },
}

/// Callback registered with [`PeerList::subscribe`].
pub type PeerListObserver = Box<dyn Fn(&PeerListEvent) + Send + Sync>;

/// Identifies a subscription for [`PeerList::unsubscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObserverId(u64);

fn by_nick(a: &Peer, b: &Peer) -> Ordering {
    a.nick
        .to_lowercase()
        .cmp(&b.nick.to_lowercase())
        .then(a.code.cmp(&b.code))
}

#[derive(Default)]
pub struct PeerList {
    peers: Vec<Peer>,
    observers: Vec<(ObserverId, PeerListObserver)>,
    next_observer: u64,
}

impl PeerList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an observer. It sees every later mutation, in the thread doing the mutation.
    pub fn subscribe(&mut self, observer: PeerListObserver) -> ObserverId {
        let id = ObserverId(self.next_observer);
        self.next_observer += 1;
        self.observers.push((id, observer));
        id
    }

    pub fn unsubscribe(&mut self, id: ObserverId) -> bool {
        let before = self.observers.len();
        self.observers.retain(|(o, _)| *o != id);
        self.observers.len() != before
    }

    fn publish(&self, event: PeerListEvent) {
        for (_, observer) in &self.observers {
            observer(&event);
        }
    }

    fn position(&self, code: PeerCode) -> Option<usize> {
        self.peers.iter().position(|p| p.code == code)
    }

    /// Insert a peer. Returns false if the code is already present.
    pub fn add(&mut self, peer: Peer) -> bool {
        if self.contains(peer.code) {
            return false;
        }
        let code = peer.code;
        self.peers.push(peer);
        self.peers.sort_by(by_nick);
        if let Some(pos) = self.position(code) {
            self.publish(PeerListEvent::Added {
                pos,
                peer: self.peers[pos].clone(),
            });
        }
        true
    }

    /// Mutate a peer in place, re-sort, and notify. Returns false for unknown codes.
    pub fn update(&mut self, code: PeerCode, f: impl FnOnce(&mut Peer)) -> bool {
        let Some(pos) = self.position(code) else {
            return false;
        };
        f(&mut self.peers[pos]);
        self.peers.sort_by(by_nick);
        if let Some(pos) = self.position(code) {
            self.publish(PeerListEvent::Changed {
                pos,
                peer: self.peers[pos].clone(),
            });
        }
        true
    }

    pub fn remove(&mut self, code: PeerCode) -> Option<Peer> {
        let pos = self.position(code)?;
        let peer = self.peers.remove(pos);
        self.publish(PeerListEvent::Removed {
            pos,
            peer: peer.clone(),
        });
        Some(peer)
    }

    pub fn get(&self, code: PeerCode) -> Option<&Peer> {
        self.peers.iter().find(|p| p.code == code)
    }

    pub fn contains(&self, code: PeerCode) -> bool {
        self.position(code).is_some()
    }

    /// Case-insensitive nick lookup, skipping `except`.
    pub fn is_nick_in_use(&self, nick: &str, except: Option<PeerCode>) -> bool {
        let nick = nick.trim();
        self.peers
            .iter()
            .filter(|p| Some(p.code) != except)
            .any(|p| p.nick.eq_ignore_ascii_case(nick))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Peer> {
        self.peers.iter()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}
