//! TCP byte stream for accepted file offers. The receiver listens, the sender connects and streams.
//!
//! Every transfer reaches exactly one terminal status; `cancel` may race with the streaming task
//! and only the first terminal status sticks.

use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use lanchat_core::transfer::{
    TransferLifecycle, ACCEPT_GRACE, ACCEPT_TIMEOUT, CHUNK_SIZE, CONNECT_ATTEMPTS,
    CONNECT_RETRY_DELAY,
};
use lanchat_core::{TransferId, TransferProgress, TransferStatus};
use log::{debug, info, warn};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

use crate::error::NetError;
use crate::unicast::bind_first_free;

/// Told about status changes and progress of transfers.
pub trait TransferObserver: Send + Sync {
    fn status_changed(&self, id: TransferId, status: TransferStatus);
    fn progress(&self, id: TransferId, progress: &TransferProgress);
}

/// Shared status and cancel switch of one transfer. Cheap to clone, safe to use from any task.
#[derive(Clone)]
pub struct TransferControl {
    id: TransferId,
    cancel: CancellationToken,
    lifecycle: Arc<Mutex<TransferLifecycle>>,
    aborted_by_peer: Arc<AtomicBool>,
    observer: Arc<dyn TransferObserver>,
}

impl TransferControl {
    pub fn new(id: TransferId, observer: Arc<dyn TransferObserver>) -> Self {
        Self {
            id,
            cancel: CancellationToken::new(),
            lifecycle: Arc::new(Mutex::new(TransferLifecycle::new())),
            aborted_by_peer: Arc::new(AtomicBool::new(false)),
            observer,
        }
    }

    pub fn id(&self) -> TransferId {
        self.id
    }

    pub fn status(&self) -> TransferStatus {
        self.lifecycle
            .lock()
            .map(|l| l.status())
            .unwrap_or(TransferStatus::Failed)
    }

    /// Move to `next` and notify. Returns false once the transfer has ended.
    fn advance(&self, next: TransferStatus) -> bool {
        let changed = self
            .lifecycle
            .lock()
            .map(|mut l| l.advance(next))
            .unwrap_or(false);
        if changed {
            debug!("Transfer {} is {next:?}", self.id);
            self.observer.status_changed(self.id, next);
        }
        changed
    }

    /// Stop the transfer. Returns false if it had already ended.
    pub fn cancel(&self) -> bool {
        self.cancel.cancel();
        self.advance(TransferStatus::Canceled)
    }

    /// The peer aborted: stop and mark failed, without answering with an abort of our own.
    pub fn abort_by_peer(&self) -> bool {
        self.aborted_by_peer.store(true, Ordering::SeqCst);
        self.cancel.cancel();
        self.advance(TransferStatus::Failed)
    }

    pub fn is_canceled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Whether the peer should get an abort message after the transfer ended as it did.
    pub fn peer_needs_abort(&self) -> bool {
        self.status() != TransferStatus::Completed && !self.aborted_by_peer.load(Ordering::SeqCst)
    }

    fn finish(&self, outcome: TransferStatus) -> TransferStatus {
        self.advance(outcome);
        self.status()
    }

    fn report(&self, progress: &TransferProgress) {
        self.observer.progress(self.id, progress);
    }
}

/// Sending side of an accepted offer.
#[derive(Clone)]
pub struct FileSender {
    control: TransferControl,
    path: PathBuf,
    size: u64,
}

impl FileSender {
    pub fn new(control: TransferControl, path: impl Into<PathBuf>, size: u64) -> Self {
        Self {
            control,
            path: path.into(),
            size,
        }
    }

    pub fn control(&self) -> &TransferControl {
        &self.control
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    async fn connect(&self, addr: SocketAddr) -> Option<TcpStream> {
        let cancel = &self.control.cancel;
        for attempt in 1..=CONNECT_ATTEMPTS {
            tokio::select! {
                _ = cancel.cancelled() => return None,
                res = TcpStream::connect(addr) => match res {
                    Ok(stream) => return Some(stream),
                    Err(e) => debug!("Connect {attempt}/{CONNECT_ATTEMPTS} to {addr} failed: {e}"),
                },
            }
            tokio::select! {
                _ = cancel.cancelled() => return None,
                _ = tokio::time::sleep(CONNECT_RETRY_DELAY) => {}
            }
        }
        None
    }

    /// Connect to the receiver listening at `addr` and stream the file to it.
    pub async fn send(&self, addr: SocketAddr) -> TransferStatus {
        if !self.control.advance(TransferStatus::Connecting) {
            return self.control.status();
        }
        tokio::select! {
            _ = self.control.cancel.cancelled() => return self.control.status(),
            _ = tokio::time::sleep(ACCEPT_GRACE) => {}
        }
        let Some(mut stream) = self.connect(addr).await else {
            warn!("Could not connect to {addr} for transfer {}", self.control.id);
            return self.control.finish(TransferStatus::Failed);
        };
        if !self.control.advance(TransferStatus::Transferring) {
            return self.control.status();
        }
        let sent = match self.stream_to(&mut stream).await {
            Ok(n) => n,
            Err(e) => {
                warn!("Sending {} failed: {e}", self.path.display());
                return self.control.finish(TransferStatus::Failed);
            }
        };
        let _ = stream.shutdown().await;
        if sent == self.size && !self.control.is_canceled() {
            info!("Sent {} ({sent} bytes)", self.path.display());
            self.control.finish(TransferStatus::Completed)
        } else {
            self.control.finish(TransferStatus::Failed)
        }
    }

    async fn stream_to(&self, stream: &mut TcpStream) -> std::io::Result<u64> {
        let mut file = File::open(&self.path).await?;
        let mut buf = [0u8; CHUNK_SIZE];
        let mut progress = TransferProgress::new(self.size);
        progress.start();
        loop {
            let n = tokio::select! {
                _ = self.control.cancel.cancelled() => break,
                n = file.read(&mut buf) => n?,
            };
            if n == 0 {
                break;
            }
            tokio::select! {
                _ = self.control.cancel.cancelled() => break,
                res = stream.write_all(&buf[..n]) => res?,
            }
            if progress.record(n as u64) {
                self.control.report(&progress);
            }
        }
        stream.flush().await?;
        Ok(progress.transferred())
    }
}

/// Receiving side of an accepted offer.
#[derive(Clone)]
pub struct FileReceiver {
    control: TransferControl,
    path: PathBuf,
    size: u64,
}

impl FileReceiver {
    pub fn new(control: TransferControl, path: impl Into<PathBuf>, size: u64) -> Self {
        Self {
            control,
            path: path.into(),
            size,
        }
    }

    pub fn control(&self) -> &TransferControl {
        &self.control
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Listen on the first free port from `base_port`; the port goes into the accept message.
    pub fn bind(base_port: u16) -> Result<(TcpListener, u16), NetError> {
        let (listener, _) = bind_first_free(base_port, |port| {
            let l = std::net::TcpListener::bind((Ipv4Addr::UNSPECIFIED, port))?;
            l.set_nonblocking(true)?;
            Ok(l)
        })?;
        let port = listener.local_addr()?.port();
        Ok((TcpListener::from_std(listener)?, port))
    }

    /// Wait for the sender on `listener` and write exactly `size` bytes to the file.
    /// A partial file is removed unless the transfer completes.
    pub async fn receive(&self, listener: TcpListener) -> TransferStatus {
        if !self.control.advance(TransferStatus::Connecting) {
            return self.control.status();
        }
        let accepted = tokio::select! {
            _ = self.control.cancel.cancelled() => return self.control.status(),
            res = tokio::time::timeout(ACCEPT_TIMEOUT, listener.accept()) => res,
        };
        drop(listener);
        let mut stream = match accepted {
            Ok(Ok((stream, from))) => {
                debug!("Transfer {} connected from {from}", self.control.id);
                stream
            }
            Ok(Err(e)) => {
                warn!("Accept for transfer {} failed: {e}", self.control.id);
                return self.control.finish(TransferStatus::Failed);
            }
            Err(_) => {
                warn!("Nobody connected for transfer {}", self.control.id);
                return self.control.finish(TransferStatus::Failed);
            }
        };
        if !self.control.advance(TransferStatus::Transferring) {
            return self.control.status();
        }
        let received = self.stream_from(&mut stream).await;
        let status = match received {
            Ok(n) if n == self.size && !self.control.is_canceled() => {
                info!("Received {} ({n} bytes)", self.path.display());
                self.control.finish(TransferStatus::Completed)
            }
            Ok(n) => {
                warn!(
                    "Transfer {} ended after {n} of {} bytes",
                    self.control.id, self.size
                );
                self.control.finish(TransferStatus::Failed)
            }
            Err(e) => {
                warn!("Receiving {} failed: {e}", self.path.display());
                self.control.finish(TransferStatus::Failed)
            }
        };
        if status != TransferStatus::Completed {
            if let Err(e) = tokio::fs::remove_file(&self.path).await {
                debug!("Removing {} failed: {e}", self.path.display());
            }
        }
        status
    }

    async fn stream_from(&self, stream: &mut TcpStream) -> std::io::Result<u64> {
        let mut file = File::create(&self.path).await?;
        let mut buf = [0u8; CHUNK_SIZE];
        let mut progress = TransferProgress::new(self.size);
        progress.start();
        while progress.transferred() < self.size {
            let want = CHUNK_SIZE.min((self.size - progress.transferred()) as usize);
            let n = tokio::select! {
                _ = self.control.cancel.cancelled() => break,
                n = stream.read(&mut buf[..want]) => n?,
            };
            if n == 0 {
                break;
            }
            file.write_all(&buf[..n]).await?;
            if progress.record(n as u64) {
                self.control.report(&progress);
            }
        }
        file.flush().await?;
        Ok(progress.transferred())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::time::Duration;

    use tokio::sync::mpsc;

    use super::*;

    #[derive(Default)]
    pub(crate) struct Recorder {
        pub statuses: Mutex<Vec<(TransferId, TransferStatus)>>,
        pub progress: Mutex<Vec<(TransferId, u8, u64)>>,
        pub tx: Mutex<Option<mpsc::UnboundedSender<TransferStatus>>>,
    }

    impl TransferObserver for Recorder {
        fn status_changed(&self, id: TransferId, status: TransferStatus) {
            self.statuses.lock().unwrap().push((id, status));
            if let Some(tx) = self.tx.lock().unwrap().as_ref() {
                let _ = tx.send(status);
            }
        }

        fn progress(&self, id: TransferId, progress: &TransferProgress) {
            self.progress
                .lock()
                .unwrap()
                .push((id, progress.percent(), progress.speed()));
        }
    }

    impl Recorder {
        fn terminals(&self, id: TransferId) -> Vec<TransferStatus> {
            self.statuses
                .lock()
                .unwrap()
                .iter()
                .filter(|(i, s)| *i == id && s.is_terminal())
                .map(|(_, s)| *s)
                .collect()
        }
    }

    fn loopback(port: u16) -> SocketAddr {
        SocketAddr::from((Ipv4Addr::LOCALHOST, port))
    }

    #[tokio::test]
    async fn sends_whole_file() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("source.bin");
        let target = dir.path().join("target.bin");
        let data: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        std::fs::write(&source, &data).unwrap();

        let recorder = Arc::new(Recorder::default());
        let receiver = FileReceiver::new(
            TransferControl::new(TransferId(1), recorder.clone()),
            &target,
            10_000,
        );
        let sender = FileSender::new(
            TransferControl::new(TransferId(2), recorder.clone()),
            &source,
            10_000,
        );
        let (listener, port) = FileReceiver::bind(0).unwrap();
        let (received, sent) =
            tokio::join!(receiver.receive(listener), sender.send(loopback(port)));

        assert_eq!(received, TransferStatus::Completed);
        assert_eq!(sent, TransferStatus::Completed);
        assert_eq!(std::fs::read(&target).unwrap(), data);
        assert_eq!(recorder.terminals(TransferId(1)), [TransferStatus::Completed]);
        assert_eq!(recorder.terminals(TransferId(2)), [TransferStatus::Completed]);
        let progress = recorder.progress.lock().unwrap();
        let last_sent = progress
            .iter()
            .filter(|(id, _, _)| *id == TransferId(2))
            .last()
            .unwrap();
        assert_eq!(last_sent.1, 100);
        assert!(!sender.control().peer_needs_abort());
    }

    #[tokio::test]
    async fn cancel_while_transferring_ends_once() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("partial.bin");
        let (tx, mut rx) = mpsc::unbounded_channel();
        let recorder = Arc::new(Recorder {
            tx: Mutex::new(Some(tx)),
            ..Default::default()
        });
        let receiver = FileReceiver::new(
            TransferControl::new(TransferId(7), recorder.clone()),
            &target,
            1_000_000,
        );
        let (listener, port) = FileReceiver::bind(0).unwrap();
        let task = {
            let receiver = receiver.clone();
            tokio::spawn(async move { receiver.receive(listener).await })
        };

        let mut peer = TcpStream::connect(loopback(port)).await.unwrap();
        peer.write_all(&[1u8; 4096]).await.unwrap();
        while rx.recv().await != Some(TransferStatus::Transferring) {}

        assert!(receiver.control().cancel());
        assert!(!receiver.control().cancel());
        assert_eq!(task.await.unwrap(), TransferStatus::Canceled);
        assert!(receiver.control().is_canceled());
        assert_eq!(recorder.terminals(TransferId(7)), [TransferStatus::Canceled]);
        assert!(!target.exists());
        assert!(receiver.control().peer_needs_abort());

        let mut buf = [0u8; 16];
        let closed = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                match peer.write_all(&buf).await {
                    Ok(()) => tokio::time::sleep(Duration::from_millis(10)).await,
                    Err(_) => break,
                }
                buf[0] = buf[0].wrapping_add(1);
            }
        })
        .await;
        assert!(closed.is_ok());
    }

    #[tokio::test]
    async fn short_stream_fails_and_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("short.bin");
        let recorder = Arc::new(Recorder::default());
        let receiver = FileReceiver::new(
            TransferControl::new(TransferId(3), recorder.clone()),
            &target,
            100,
        );
        let (listener, port) = FileReceiver::bind(0).unwrap();
        let peer = async {
            let mut s = TcpStream::connect(loopback(port)).await.unwrap();
            s.write_all(&[0u8; 10]).await.unwrap();
        };
        let (status, ()) = tokio::join!(receiver.receive(listener), peer);
        assert_eq!(status, TransferStatus::Failed);
        assert!(!target.exists());
        assert_eq!(recorder.terminals(TransferId(3)), [TransferStatus::Failed]);
    }

    #[tokio::test]
    async fn unreachable_receiver_fails_after_retries() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("a.txt");
        std::fs::write(&source, b"abc").unwrap();
        let port = {
            let l = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            l.local_addr().unwrap().port()
        };
        let recorder = Arc::new(Recorder::default());
        let sender = FileSender::new(
            TransferControl::new(TransferId(4), recorder.clone()),
            &source,
            3,
        );
        assert_eq!(sender.send(loopback(port)).await, TransferStatus::Failed);
        assert_eq!(recorder.terminals(TransferId(4)), [TransferStatus::Failed]);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_before_connecting_returns_at_once() {
        let recorder = Arc::new(Recorder::default());
        let sender = FileSender::new(
            TransferControl::new(TransferId(7), recorder.clone()),
            "/nonexistent",
            1,
        );
        let control = sender.control().clone();
        let started = tokio::time::Instant::now();
        let task = tokio::spawn(async move { sender.send(loopback(1)).await });
        tokio::task::yield_now().await;
        assert!(control.cancel());
        assert_eq!(task.await.unwrap(), TransferStatus::Canceled);
        assert!(started.elapsed() < ACCEPT_GRACE);
        assert_eq!(recorder.terminals(TransferId(7)), [TransferStatus::Canceled]);
    }

    #[tokio::test(start_paused = true)]
    async fn receiver_gives_up_when_nobody_connects() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = Arc::new(Recorder::default());
        let receiver = FileReceiver::new(
            TransferControl::new(TransferId(5), recorder.clone()),
            dir.path().join("never.bin"),
            10,
        );
        let (listener, _) = FileReceiver::bind(0).unwrap();
        assert_eq!(receiver.receive(listener).await, TransferStatus::Failed);
    }

    #[tokio::test]
    async fn peer_abort_is_not_echoed() {
        let recorder = Arc::new(Recorder::default());
        let control = TransferControl::new(TransferId(6), recorder.clone());
        assert!(control.abort_by_peer());
        assert!(!control.cancel());
        assert_eq!(control.status(), TransferStatus::Failed);
        assert!(!control.peer_needs_abort());
        let sender = FileSender::new(control, "/nonexistent", 1);
        assert_eq!(sender.send(loopback(1)).await, TransferStatus::Failed);
        assert_eq!(recorder.terminals(TransferId(6)), [TransferStatus::Failed]);
    }
}
