//! File transfer bookkeeping: status lifecycle, progress cadence, throughput, and the transfer table.
//! The byte streaming itself is done by the host.

use std::time::{Duration, Instant};

use sha2::{Digest, Sha256};

use crate::peer::PeerCode;

/// Read/write unit of the byte stream.
pub const CHUNK_SIZE: usize = 1024;
/// Progress is reported at least this often, in chunks, even when the percentage is flat.
pub const UPDATE_EVERY_CHUNKS: u32 = 250;
/// Connect attempts made by the sending side.
pub const CONNECT_ATTEMPTS: u32 = 10;
/// Pause between connect attempts.
pub const CONNECT_RETRY_DELAY: Duration = Duration::from_millis(100);
/// How long the receiving side waits for the sender to connect.
pub const ACCEPT_TIMEOUT: Duration = Duration::from_secs(15);
/// Pause before connecting, so the receiver has its listener up.
pub const ACCEPT_GRACE: Duration = Duration::from_millis(200);

/// Unique per session, starting at 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransferId(pub u32);

impl std::fmt::Display for TransferId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Send,
    Receive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStatus {
    Waiting,
    Connecting,
    Transferring,
    Completed,
    Failed,
    Canceled,
}

impl TransferStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TransferStatus::Completed | TransferStatus::Failed | TransferStatus::Canceled
        )
    }
}

/// Status holder that accepts exactly one terminal state.
#[derive(Debug, Clone)]
pub struct TransferLifecycle {
    status: TransferStatus,
}

impl Default for TransferLifecycle {
    fn default() -> Self {
        Self {
            status: TransferStatus::Waiting,
        }
    }
}

impl TransferLifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self) -> TransferStatus {
        self.status
    }

    /// Move to `next`. Returns false, leaving the status untouched, once a terminal state is reached.
    pub fn advance(&mut self, next: TransferStatus) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = next;
        true
    }
}

/// Bytes per second over a sliding one-second window.
#[derive(Debug, Clone)]
pub struct ByteCounter {
    window_start: Instant,
    window_bytes: u64,
    bytes_per_sec: u64,
}

impl Default for ByteCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl ByteCounter {
    const WINDOW: Duration = Duration::from_secs(1);

    pub fn new() -> Self {
        Self {
            window_start: Instant::now(),
            window_bytes: 0,
            bytes_per_sec: 0,
        }
    }

    /// Restart measuring, e.g. right before the first byte moves.
    pub fn prepare(&mut self) {
        *self = Self::new();
    }

    pub fn add_bytes(&mut self, n: u64) {
        self.add_bytes_at(n, Instant::now());
    }

    pub fn add_bytes_at(&mut self, n: u64, now: Instant) {
        self.window_bytes += n;
        let elapsed = now.saturating_duration_since(self.window_start);
        if elapsed >= Self::WINDOW {
            let millis = elapsed.as_millis().max(1) as u64;
            self.bytes_per_sec = self.window_bytes * 1000 / millis;
            self.window_bytes = 0;
            self.window_start = now;
        }
    }

    pub fn bytes_per_sec(&self) -> u64 {
        self.bytes_per_sec
    }
}

/// Byte count and percentage of one transfer, deciding when progress is worth reporting.
#[derive(Debug, Clone)]
pub struct TransferProgress {
    size: u64,
    transferred: u64,
    percent: u8,
    reported_percent: u8,
    chunks_since_report: u32,
    counter: ByteCounter,
}

impl TransferProgress {
    pub fn new(size: u64) -> Self {
        Self {
            size,
            transferred: 0,
            percent: 0,
            reported_percent: 0,
            chunks_since_report: 0,
            counter: ByteCounter::new(),
        }
    }

    /// Reset before streaming starts.
    pub fn start(&mut self) {
        *self = Self::new(self.size);
    }

    /// Record one chunk of `n` bytes. Returns true when listeners should hear about it:
    /// the percentage went up, or `UPDATE_EVERY_CHUNKS` chunks passed since the last report.
    pub fn record(&mut self, n: u64) -> bool {
        self.transferred += n;
        self.counter.add_bytes(n);
        self.percent = percent_of(self.transferred, self.size);
        self.chunks_since_report += 1;
        if self.percent > self.reported_percent || self.chunks_since_report >= UPDATE_EVERY_CHUNKS
        {
            self.reported_percent = self.percent;
            self.chunks_since_report = 0;
            return true;
        }
        false
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn transferred(&self) -> u64 {
        self.transferred
    }

    pub fn percent(&self) -> u8 {
        self.percent
    }

    pub fn speed(&self) -> u64 {
        self.counter.bytes_per_sec()
    }

    pub fn is_complete(&self) -> bool {
        self.transferred == self.size
    }
}

fn percent_of(done: u64, total: u64) -> u8 {
    if total == 0 {
        return 100;
    }
    ((done.min(total) as u128 * 100) / total as u128) as u8
}

/// Disambiguator carried in file offers so both sides can tell same-named files apart.
pub fn file_hash(path: &str, size: u64) -> i32 {
    let mut hasher = Sha256::new();
    hasher.update(path.as_bytes());
    hasher.update(size.to_be_bytes());
    let digest = hasher.finalize();
    i32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]])
}

/// `"12.00KB"` or `"3.50MB"`.
pub fn format_size(bytes: u64) -> String {
    let kb = bytes as f64 / 1024.0;
    if kb > 1024.0 {
        format!("{:.2}MB", kb / 1024.0)
    } else {
        format!("{kb:.2}KB")
    }
}

/// One row of the transfer table.
#[derive(Debug)]
pub struct TransferEntry<T> {
    pub id: TransferId,
    pub peer: PeerCode,
    pub file_name: String,
    pub hash: i32,
    pub direction: Direction,
    pub handle: T,
}

/// Active transfers, keyed by id and by the (peer, file name, hash) the handshake names.
#[derive(Debug)]
pub struct TransferList<T> {
    entries: Vec<TransferEntry<T>>,
    next_id: u32,
}

impl<T> Default for TransferList<T> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            next_id: 1,
        }
    }
}

impl<T> TransferList<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the next id and store the handle built for it.
    pub fn add(
        &mut self,
        peer: PeerCode,
        file_name: impl Into<String>,
        hash: i32,
        direction: Direction,
        make: impl FnOnce(TransferId) -> T,
    ) -> TransferId {
        let id = TransferId(self.next_id);
        self.next_id += 1;
        self.entries.push(TransferEntry {
            id,
            peer,
            file_name: file_name.into(),
            hash,
            direction,
            handle: make(id),
        });
        id
    }

    pub fn get(&self, id: TransferId) -> Option<&TransferEntry<T>> {
        self.entries.iter().find(|e| e.id == id)
    }

    pub fn find_sender(&self, peer: PeerCode, file_name: &str, hash: i32) -> Option<&TransferEntry<T>> {
        self.entries.iter().find(|e| {
            e.direction == Direction::Send
                && e.peer == peer
                && e.file_name == file_name
                && e.hash == hash
        })
    }

    pub fn find_receiver(&self, peer: PeerCode, file_name: &str) -> Option<&TransferEntry<T>> {
        self.entries.iter().find(|e| {
            e.direction == Direction::Receive && e.peer == peer && e.file_name == file_name
        })
    }

    pub fn remove(&mut self, id: TransferId) -> Option<TransferEntry<T>> {
        let pos = self.entries.iter().position(|e| e.id == id)?;
        Some(self.entries.remove(pos))
    }

    /// All transfers with `peer`, e.g. to cancel them when the peer leaves.
    pub fn for_peer(&self, peer: PeerCode) -> impl Iterator<Item = &TransferEntry<T>> {
        self.entries.iter().filter(move |e| e.peer == peer)
    }

    pub fn iter(&self) -> impl Iterator<Item = &TransferEntry<T>> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
