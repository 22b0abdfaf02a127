//! Lanchat protocol reference implementation.
//! Host-driven: no I/O; host passes events and receives actions.

pub mod core;
pub mod peer;
pub mod peer_list;
pub mod privmsg;
pub mod protocol;
pub mod state;
pub mod transfer;
pub mod wire;

pub use core::{now_millis, Action, ChatCore, CoreError, Deferred, FileOffer, Notice};
pub use peer::{is_valid_nick, Peer, PeerCode, PrivateChatHandle};
pub use peer_list::{PeerList, PeerListEvent, PeerListObserver};
pub use privmsg::{decode_private_message, encode_private_message, PrivateMessage};
pub use protocol::{Envelope, Message};
pub use state::{ChatState, Topic, WaitingList};
pub use transfer::{Direction, TransferId, TransferList, TransferProgress, TransferStatus};
pub use wire::{decode, encode, WireError};
