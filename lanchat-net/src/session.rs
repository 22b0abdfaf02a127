//! Session glue: owns the transports, feeds received datagrams to the core under one lock,
//! and carries out the actions the core returns.

use std::future::Future;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::Path;
use std::pin::Pin;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, MutexGuard};
use std::time::Duration;

use lanchat_core::core::{WAITING_POLL_MILLIS, WAITING_POLL_STEPS};
use lanchat_core::peer_list::ObserverId;
use lanchat_core::protocol::MESSAGE_MAX_BYTES;
use lanchat_core::transfer::{file_hash, format_size};
use lanchat_core::{
    encode, encode_private_message, is_valid_nick, now_millis, Action, ChatCore, CoreError,
    Deferred, Direction, Envelope, FileOffer, Notice, Peer, PeerCode, PeerListObserver,
    PrivateChatHandle, Topic, TransferId, TransferList, TransferStatus,
};
use log::{debug, info, warn};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::error::{ErrorSink, NetError};
use crate::file_transfer::{FileReceiver, FileSender, TransferControl, TransferObserver};
use crate::frontend::{Frontend, FrontendObserver};
use crate::multicast::{Datagram, MulticastChannel};
use crate::probe::NetworkProbe;
use crate::unicast::{UnicastReceiver, UnicastSender};

/// Time after logon during which the identification burst is expected.
pub const LOGON_COMPLETE_DELAY: Duration = Duration::from_millis(1500);
/// Interval of the `IDLE` keep-alive and the peer timeout check.
pub const IDLE_INTERVAL: Duration = Duration::from_secs(15);

/// A transfer in the session's table.
#[derive(Clone)]
pub enum Transfer {
    Send(FileSender),
    Receive(FileReceiver),
}

impl Transfer {
    pub fn control(&self) -> &TransferControl {
        match self {
            Transfer::Send(s) => s.control(),
            Transfer::Receive(r) => r.control(),
        }
    }
}

/// Configured nick if valid, else the login name if valid, else the peer code.
pub fn choose_nick(configured: Option<&str>, login: Option<&str>, code: PeerCode) -> String {
    configured
        .map(str::trim)
        .filter(|n| is_valid_nick(n))
        .or_else(|| login.map(str::trim).filter(|n| is_valid_nick(n)))
        .map(str::to_string)
        .unwrap_or_else(|| code.as_nick())
}

/// Poll until `code` is off the waiting list. Returns false if it is still there after
/// `WAITING_POLL_STEPS` polls.
pub async fn wait_for_identity(core: &Mutex<ChatCore>, code: PeerCode) -> bool {
    for _ in 0..WAITING_POLL_STEPS {
        if !core.lock().await.is_waiting(code) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(WAITING_POLL_MILLIS)).await;
    }
    !core.lock().await.is_waiting(code)
}

struct Inner {
    config: Config,
    core: Mutex<ChatCore>,
    chat: MulticastChannel,
    private_receiver: Option<UnicastReceiver>,
    private_sender: UnicastSender,
    transfers: std::sync::Mutex<TransferList<Transfer>>,
    frontend: Arc<dyn Frontend>,
    errors: Arc<dyn ErrorSink>,
    next_private_chat: AtomicU32,
    shutdown: CancellationToken,
    logon: std::sync::Mutex<Option<CancellationToken>>,
}

/// One participant in the chat: the local peer with its transports and transfers.
#[derive(Clone)]
pub struct Session {
    inner: Arc<Inner>,
}

impl Session {
    /// Probe for the multicast interface, then build the session. Not logged on yet.
    pub async fn new(
        config: Config,
        frontend: Arc<dyn Frontend>,
        errors: Arc<dyn ErrorSink>,
    ) -> Result<Self, NetError> {
        let code = PeerCode::generate();
        let interface = NetworkProbe::new(
            config.probe_group,
            config.probe_port,
            config.multicast_ttl,
            code,
            errors.clone(),
        )
        .find_interface()
        .await;
        Self::with_interface(config, code, interface, frontend, errors).await
    }

    /// Build the session on a known interface (`None` lets the OS choose).
    pub async fn with_interface(
        config: Config,
        code: PeerCode,
        interface: Option<Ipv4Addr>,
        frontend: Arc<dyn Frontend>,
        errors: Arc<dyn ErrorSink>,
    ) -> Result<Self, NetError> {
        let login = std::env::var("USER").ok();
        let nick = choose_nick(config.nick.as_deref(), login.as_deref(), code);
        let me = Peer::local(nick, code, now_millis());

        let (chat_tx, chat_rx) = mpsc::unbounded_channel();
        let chat = MulticastChannel::new(
            config.multicast_group,
            config.chat_port,
            config.multicast_ttl,
            interface,
            chat_tx,
            errors.clone(),
        )?;
        let (private_tx, private_rx) = mpsc::unbounded_channel();
        let private_receiver = (!config.no_private_chat)
            .then(|| UnicastReceiver::new(config.private_chat_port, private_tx, errors.clone()));
        let private_sender = UnicastSender::bind().await?;

        let inner = Arc::new(Inner {
            config,
            core: Mutex::new(ChatCore::new(me)),
            chat,
            private_receiver,
            private_sender,
            transfers: std::sync::Mutex::new(TransferList::new()),
            frontend,
            errors,
            next_private_chat: AtomicU32::new(1),
            shutdown: CancellationToken::new(),
            logon: std::sync::Mutex::new(None),
        });
        tokio::spawn(chat_loop(inner.clone(), chat_rx));
        tokio::spawn(private_loop(inner.clone(), private_rx));
        Ok(Self { inner })
    }

    pub async fn me(&self) -> Peer {
        self.inner.core.lock().await.me().clone()
    }

    /// Peers in nick order.
    pub async fn peers(&self) -> Vec<Peer> {
        self.inner.core.lock().await.peers().iter().cloned().collect()
    }

    pub async fn topic(&self) -> Topic {
        self.inner.core.lock().await.topic().clone()
    }

    pub async fn subscribe_peers(&self, observer: PeerListObserver) -> ObserverId {
        self.inner.core.lock().await.peers_mut().subscribe(observer)
    }

    pub async fn unsubscribe_peers(&self, id: ObserverId) -> bool {
        self.inner.core.lock().await.peers_mut().unsubscribe(id)
    }

    /// Join the chat, announce ourselves and start the keep-alive.
    pub async fn log_on(&self) -> Result<(), NetError> {
        let inner = &self.inner;
        if !inner.chat.start() {
            inner
                .errors
                .show_critical_error("Could not join the chat channel");
            return Err(NetError::NotConnected);
        }
        let private_port = inner
            .private_receiver
            .as_ref()
            .filter(|r| r.start())
            .and_then(|r| r.port())
            .unwrap_or(0);
        let envelopes = {
            let mut core = inner.core.lock().await;
            let now = now_millis();
            core.me_mut().private_chat_port = private_port;
            core.me_mut().logon_time = now;
            core.log_on_messages(now)
        };
        for envelope in &envelopes {
            inner.broadcast(envelope).await;
        }

        let token = inner.shutdown.child_token();
        if let Some(old) = lock(&inner.logon).replace(token.clone()) {
            old.cancel();
        }
        tokio::spawn(complete_logon(inner.clone(), token.clone()));
        tokio::spawn(idle_loop(inner.clone(), token));
        Ok(())
    }

    /// Say goodbye and leave the chat. Running transfers are canceled.
    pub async fn log_off(&self) {
        let inner = &self.inner;
        if let Some(token) = lock(&inner.logon).take() {
            token.cancel();
        }
        let goodbye = {
            let mut core = inner.core.lock().await;
            core.me_mut().private_chat_port = 0;
            core.log_off()
        };
        inner.broadcast(&goodbye).await;
        inner.chat.stop();
        if let Some(receiver) = &inner.private_receiver {
            receiver.stop();
        }
        let controls: Vec<TransferControl> = inner
            .transfers()
            .iter()
            .map(|e| e.handle.control().clone())
            .collect();
        for control in controls {
            control.cancel();
        }
        info!("Logged off");
    }

    /// Log off if needed and stop every task of the session.
    pub async fn shutdown(&self) {
        let logged_on = self.inner.core.lock().await.state().logged_on;
        if logged_on || self.inner.chat.is_connected() {
            self.log_off().await;
        }
        self.inner.shutdown.cancel();
    }

    pub async fn send_chat_message(&self, text: &str, color: i32) -> Result<(), NetError> {
        let actions = self.inner.core.lock().await.chat_message(text, color)?;
        if !self.inner.chat.is_connected() {
            return Err(NetError::NotConnected);
        }
        self.inner.run(actions).await;
        Ok(())
    }

    pub async fn change_nick(&self, nick: &str) -> Result<(), NetError> {
        let actions = self.inner.core.lock().await.change_nick(nick)?;
        self.inner.run(actions).await;
        Ok(())
    }

    /// Set the topic; an empty text removes it.
    pub async fn change_topic(&self, text: &str) -> Result<(), NetError> {
        let actions = self
            .inner
            .core
            .lock()
            .await
            .change_topic(text, now_millis())?;
        self.inner.run(actions).await;
        Ok(())
    }

    pub async fn go_away(&self, away_msg: &str) -> Result<(), NetError> {
        let actions = self.inner.core.lock().await.go_away(away_msg)?;
        self.inner.run(actions).await;
        Ok(())
    }

    pub async fn come_back(&self) {
        let actions = self.inner.core.lock().await.come_back();
        self.inner.run(actions).await;
    }

    pub async fn set_writing(&self, writing: bool) {
        let actions = self.inner.core.lock().await.set_writing(writing);
        self.inner.run(actions).await;
    }

    pub async fn open_private_chat(&self, code: PeerCode) -> Result<PrivateChatHandle, NetError> {
        let handle = PrivateChatHandle(self.inner.next_private_chat.fetch_add(1, Ordering::Relaxed));
        self.inner
            .core
            .lock()
            .await
            .set_private_chat(code, Some(handle))?;
        Ok(handle)
    }

    pub async fn close_private_chat(&self, code: PeerCode) -> Result<(), NetError> {
        self.inner.core.lock().await.set_private_chat(code, None)?;
        Ok(())
    }

    /// Send a private message to the peer's unicast receiver.
    pub async fn send_private_message(
        &self,
        code: PeerCode,
        text: &str,
        color: i32,
    ) -> Result<(), NetError> {
        if text.trim().is_empty() {
            return Err(CoreError::EmptyMessage.into());
        }
        if text.len() > MESSAGE_MAX_BYTES {
            return Err(CoreError::MessageTooLong(text.len()).into());
        }
        let (payload, to, my_nick) = {
            let core = self.inner.core.lock().await;
            let peer = core.peer(code).ok_or(CoreError::UnknownPeer(code))?;
            if peer.private_chat_port == 0 {
                return Err(NetError::NoPrivateChat(peer.nick.clone()));
            }
            let ip = peer
                .ip_address
                .ok_or_else(|| NetError::NoAddress(peer.nick.clone()))?;
            let me = core.me();
            (
                encode_private_message(me.code, &me.nick, code, color, text),
                SocketAddr::new(ip, peer.private_chat_port),
                me.nick.clone(),
            )
        };
        if !self.inner.private_sender.send(&payload, to).await {
            return Err(NetError::NotConnected);
        }
        self.inner.frontend.notify(&Notice::PrivateMessage {
            peer: code,
            nick: my_nick,
            text: text.to_string(),
            color,
        });
        Ok(())
    }

    /// Offer a file to a peer. The transfer waits until the peer accepts or aborts.
    pub async fn send_file(&self, code: PeerCode, path: &Path) -> Result<TransferId, NetError> {
        let meta = tokio::fs::metadata(path).await?;
        if !meta.is_file() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("{} is not a file", path.display()),
            )
            .into());
        }
        let size = meta.len();
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let hash = file_hash(&path.to_string_lossy(), size);

        let (offer, nick) = {
            let core = self.inner.core.lock().await;
            let offer = core.offer_file(code, &file_name, size, hash)?;
            let nick = core.peer(code).map(|p| p.nick.clone()).unwrap_or_default();
            (offer, nick)
        };
        let observer: Arc<dyn TransferObserver> =
            Arc::new(FrontendObserver(self.inner.frontend.clone()));
        let id = self.inner.transfers().add(
            code,
            file_name.clone(),
            hash,
            Direction::Send,
            |id| Transfer::Send(FileSender::new(TransferControl::new(id, observer), path, size)),
        );
        self.inner.broadcast(&offer).await;
        self.inner.frontend.notify(&Notice::System(format!(
            "Trying to send the file {file_name} [{}] to {nick}",
            format_size(size)
        )));
        Ok(id)
    }

    /// Cancel a transfer in any state. The peer is told with an abort message.
    pub async fn cancel_transfer(&self, id: TransferId) -> Result<(), NetError> {
        let control = self
            .inner
            .transfers()
            .get(id)
            .map(|e| e.handle.control().clone())
            .ok_or(NetError::UnknownTransfer(id))?;
        let waiting = control.status() == TransferStatus::Waiting;
        control.cancel();
        if waiting {
            // No task is streaming yet, so nobody else will clean up.
            self.inner.transfer_finished(id, control.status()).await;
        }
        Ok(())
    }

    pub fn transfer_status(&self, id: TransferId) -> Option<TransferStatus> {
        self.inner
            .transfers()
            .get(id)
            .map(|e| e.handle.control().status())
    }
}

fn lock<T>(m: &std::sync::Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

impl Inner {
    fn transfers(&self) -> MutexGuard<'_, TransferList<Transfer>> {
        lock(&self.transfers)
    }

    async fn broadcast(&self, envelope: &Envelope) -> bool {
        self.chat.send(&encode(envelope)).await
    }

    async fn nick_of(&self, code: PeerCode) -> String {
        self.core
            .lock()
            .await
            .peer(code)
            .map(|p| p.nick.clone())
            .unwrap_or_else(|| code.as_nick())
    }

    async fn handle_chat(self: &Arc<Self>, datagram: Datagram) {
        let actions =
            self.core
                .lock()
                .await
                .handle_datagram(&datagram.text, datagram.from, now_millis());
        self.run(actions).await;
    }

    async fn handle_private(self: &Arc<Self>, datagram: Datagram) {
        let actions = self
            .core
            .lock()
            .await
            .handle_private_datagram(&datagram.text, datagram.from, now_millis());
        self.run(actions).await;
    }

    async fn run(self: &Arc<Self>, actions: Vec<Action>) {
        for action in actions {
            match action {
                Action::Broadcast(envelope) => {
                    self.broadcast(&envelope).await;
                }
                Action::Notify(notice) => self.frontend.notify(&notice),
                Action::Defer(deferred) => self.spawn_deferred(deferred),
                Action::ReceiveFile(offer) => {
                    let inner = self.clone();
                    tokio::spawn(async move { inner.receive_offer(offer).await });
                }
                Action::StartSend {
                    peer,
                    file_name,
                    hash,
                    port,
                } => self.start_send(peer, &file_name, hash, port),
                Action::AbortTransfer {
                    peer,
                    file_name,
                    hash,
                } => self.peer_aborted(peer, &file_name, hash).await,
                Action::PeerLeft(code) => self.peer_left(code),
            }
        }
    }

    /// Hold `deferred` until its sender is identified or the wait runs out, then resume it.
    /// Logging off drops it.
    fn spawn_deferred(self: &Arc<Self>, deferred: Deferred) {
        let inner = self.clone();
        let cancel = lock(&self.logon)
            .clone()
            .unwrap_or_else(|| self.shutdown.clone());
        let task: Pin<Box<dyn Future<Output = ()> + Send>> = Box::pin(async move {
            let code = deferred.peer();
            let identified = tokio::select! {
                _ = cancel.cancelled() => return,
                identified = wait_for_identity(&inner.core, code) => identified,
            };
            if !identified {
                debug!("Peer {code} did not identify itself in time");
            }
            let actions = inner.core.lock().await.resume(deferred);
            inner.run(actions).await;
        });
        tokio::spawn(task);
    }

    async fn receive_offer(self: &Arc<Self>, offer: FileOffer) {
        let nick = offer.peer.nick.clone();
        self.frontend.notify(&Notice::System(format!(
            "{nick} is trying to send the file {} [{}]",
            offer.file_name,
            format_size(offer.size)
        )));
        let Some(path) = self.frontend.ask_file_save(&offer) else {
            self.decline(&offer).await;
            self.frontend.notify(&Notice::System(format!(
                "You declined to receive {} from {nick}",
                offer.file_name
            )));
            return;
        };
        let (listener, port) = match FileReceiver::bind(self.config.file_transfer_port) {
            Ok(bound) => bound,
            Err(e) => {
                self.errors
                    .show_error(&format!("Could not receive {}: {e}", offer.file_name));
                self.decline(&offer).await;
                return;
            }
        };

        let observer: Arc<dyn TransferObserver> = Arc::new(FrontendObserver(self.frontend.clone()));
        let mut receiver = None;
        let id = self.transfers().add(
            offer.peer.code,
            offer.file_name.clone(),
            offer.hash,
            Direction::Receive,
            |id| {
                let r = FileReceiver::new(TransferControl::new(id, observer), path, offer.size);
                receiver = Some(r.clone());
                Transfer::Receive(r)
            },
        );
        let Some(receiver) = receiver else {
            return;
        };

        let accept = self.core.lock().await.accept_file(&offer, port);
        self.broadcast(&accept).await;
        let status = receiver.receive(listener).await;
        self.transfer_finished(id, status).await;
    }

    async fn decline(&self, offer: &FileOffer) {
        let abort = self
            .core
            .lock()
            .await
            .abort_file(offer.peer.code, &offer.file_name, offer.hash);
        self.broadcast(&abort).await;
    }

    fn start_send(self: &Arc<Self>, peer: Peer, file_name: &str, hash: i32, port: u16) {
        let found = self
            .transfers()
            .find_sender(peer.code, file_name, hash)
            .map(|e| (e.id, e.handle.clone()));
        let Some((id, Transfer::Send(sender))) = found else {
            warn!("{} accepted {file_name}, which we did not offer", peer.nick);
            return;
        };
        let inner = self.clone();
        tokio::spawn(async move {
            let status = match peer.ip_address {
                Some(ip) => sender.send(SocketAddr::new(ip, port)).await,
                None => {
                    warn!("No address for {}", peer.nick);
                    sender.control().cancel();
                    sender.control().status()
                }
            };
            inner.transfer_finished(id, status).await;
        });
    }

    async fn peer_aborted(&self, peer: PeerCode, file_name: &str, hash: i32) {
        let found = {
            let transfers = self.transfers();
            transfers
                .find_sender(peer, file_name, hash)
                .or_else(|| transfers.find_receiver(peer, file_name))
                .map(|e| (e.id, e.direction, e.handle.control().clone()))
        };
        let Some((id, direction, control)) = found else {
            debug!("Abort of unknown transfer {file_name} from {peer}");
            return;
        };
        let waiting = control.status() == TransferStatus::Waiting;
        control.abort_by_peer();
        let nick = self.nick_of(peer).await;
        let text = match direction {
            Direction::Send => format!("{nick} aborted reception of {file_name}"),
            Direction::Receive => format!("{nick} aborted sending of {file_name}"),
        };
        self.frontend.notify(&Notice::System(text));
        if waiting {
            self.transfers().remove(id);
        }
    }

    /// Stop every transfer with a peer that left. Offers nobody answered are dropped.
    fn peer_left(&self, code: PeerCode) {
        let controls: Vec<(TransferId, TransferControl)> = self
            .transfers()
            .for_peer(code)
            .map(|e| (e.id, e.handle.control().clone()))
            .collect();
        for (id, control) in controls {
            let waiting = control.status() == TransferStatus::Waiting;
            control.cancel();
            if waiting {
                self.transfers().remove(id);
            }
        }
    }

    /// Drop a finished transfer, tell the peer if it did not complete, and report.
    async fn transfer_finished(&self, id: TransferId, status: TransferStatus) {
        let Some(entry) = self.transfers().remove(id) else {
            return;
        };
        if entry.handle.control().peer_needs_abort() {
            let abort = self
                .core
                .lock()
                .await
                .abort_file(entry.peer, &entry.file_name, entry.hash);
            self.broadcast(&abort).await;
        }
        let nick = self.nick_of(entry.peer).await;
        let file_name = &entry.file_name;
        let text = match (status, &entry.handle) {
            (TransferStatus::Completed, Transfer::Send(_)) => {
                format!("{file_name} successfully sent to {nick}")
            }
            (TransferStatus::Completed, Transfer::Receive(r)) => format!(
                "Successfully received {file_name} from {nick}, and saved as {}",
                r.path().display()
            ),
            (TransferStatus::Canceled, _) => {
                format!("The transfer of {file_name} with {nick} was canceled")
            }
            _ => format!("The transfer of {file_name} with {nick} failed"),
        };
        self.frontend.notify(&Notice::System(text));
    }
}

async fn chat_loop(inner: Arc<Inner>, mut rx: mpsc::UnboundedReceiver<Datagram>) {
    loop {
        let datagram = tokio::select! {
            _ = inner.shutdown.cancelled() => break,
            d = rx.recv() => match d {
                Some(d) => d,
                None => break,
            },
        };
        inner.handle_chat(datagram).await;
    }
}

async fn private_loop(inner: Arc<Inner>, mut rx: mpsc::UnboundedReceiver<Datagram>) {
    loop {
        let datagram = tokio::select! {
            _ = inner.shutdown.cancelled() => break,
            d = rx.recv() => match d {
                Some(d) => d,
                None => break,
            },
        };
        inner.handle_private(datagram).await;
    }
}

async fn complete_logon(inner: Arc<Inner>, cancel: CancellationToken) {
    tokio::select! {
        _ = cancel.cancelled() => {}
        _ = tokio::time::sleep(LOGON_COMPLETE_DELAY) => {
            inner.core.lock().await.complete_logon();
            debug!("Logon completed");
        }
    }
}

/// Broadcast `IDLE` and drop silent peers until logged off.
async fn idle_loop(inner: Arc<Inner>, cancel: CancellationToken) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(IDLE_INTERVAL) => {}
        }
        let (idle, actions) = {
            let mut core = inner.core.lock().await;
            (core.idle_message(), core.tick(now_millis()))
        };
        inner.broadcast(&idle).await;
        inner.run(actions).await;
    }
}
