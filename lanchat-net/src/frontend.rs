//! What the session needs from a user interface, and a logging implementation for the daemon.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use lanchat_core::transfer::format_size;
use lanchat_core::{FileOffer, Notice, TransferId, TransferProgress, TransferStatus};
use log::info;

use crate::file_transfer::TransferObserver;

pub trait Frontend: Send + Sync {
    fn notify(&self, notice: &Notice);

    /// Where to save an offered file, or `None` to decline.
    fn ask_file_save(&self, offer: &FileOffer) -> Option<PathBuf>;

    fn transfer_status(&self, _id: TransferId, _status: TransferStatus) {}

    fn transfer_progress(&self, _id: TransferId, _progress: &TransferProgress) {}
}

/// Routes transfer callbacks to a [`Frontend`].
pub(crate) struct FrontendObserver(pub Arc<dyn Frontend>);

impl TransferObserver for FrontendObserver {
    fn status_changed(&self, id: TransferId, status: TransferStatus) {
        self.0.transfer_status(id, status);
    }

    fn progress(&self, id: TransferId, progress: &TransferProgress) {
        self.0.transfer_progress(id, progress);
    }
}

/// `name` inside `dir`, suffixed with `.1`, `.2`, ... until it names no existing file.
/// Path components in `name` are stripped.
pub fn unique_path(dir: &Path, name: &str) -> PathBuf {
    let base = Path::new(name)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| "download".to_string());
    let mut candidate = dir.join(&base);
    let mut n = 1;
    while candidate.exists() {
        candidate = dir.join(format!("{base}.{n}"));
        n += 1;
    }
    candidate
}

/// Writes everything to the log. Accepts offers into `download_dir` when `auto_accept` is set.
pub struct LogFrontend {
    download_dir: PathBuf,
    auto_accept: bool,
}

impl LogFrontend {
    pub fn new(download_dir: impl Into<PathBuf>, auto_accept: bool) -> Self {
        Self {
            download_dir: download_dir.into(),
            auto_accept,
        }
    }
}

impl Frontend for LogFrontend {
    fn notify(&self, notice: &Notice) {
        match notice {
            Notice::System(text) => info!("*** {text}"),
            Notice::PrivateSystem { peer, text } => info!("*** [{peer}] {text}"),
            Notice::Message { nick, text, .. } => info!("<{nick}> {text}"),
            Notice::PrivateMessage { nick, text, .. } => info!("<{nick}> (private) {text}"),
            Notice::TopicChanged(topic) if topic.is_set() => {
                info!("Topic: {} ({})", topic.text, topic.nick)
            }
            Notice::TopicChanged(_) => info!("No topic"),
        }
    }

    fn ask_file_save(&self, offer: &FileOffer) -> Option<PathBuf> {
        if !self.auto_accept {
            info!(
                "Declining {} ({}) from {}",
                offer.file_name,
                format_size(offer.size),
                offer.peer.nick
            );
            return None;
        }
        if let Err(e) = std::fs::create_dir_all(&self.download_dir) {
            log::warn!("Cannot create {}: {e}", self.download_dir.display());
            return None;
        }
        Some(unique_path(&self.download_dir, &offer.file_name))
    }

    fn transfer_status(&self, id: TransferId, status: TransferStatus) {
        info!("Transfer {id}: {status:?}");
    }

    fn transfer_progress(&self, id: TransferId, progress: &TransferProgress) {
        info!(
            "Transfer {id}: {}% of {} at {}/s",
            progress.percent(),
            format_size(progress.size()),
            format_size(progress.speed())
        );
    }
}
