//! Load config from file and environment.

use serde::Deserialize;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

use lanchat_core::protocol::{
    CHAT_GROUP, CHAT_PORT, FILE_TRANSFER_PORT, PRIVATE_CHAT_PORT, PROBE_GROUP, PROBE_PORT,
};

/// Session configuration. File: ~/.config/lanchat/config.toml or /etc/lanchat/config.toml.
/// Env overrides: LANCHAT_NICK, LANCHAT_CHAT_PORT, LANCHAT_PRIVATE_CHAT_PORT,
/// LANCHAT_FILE_TRANSFER_PORT, LANCHAT_NO_PRIVATE_CHAT.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct Config {
    /// Nick to log on with. Falls back to the user name, then to the peer code.
    pub nick: Option<String>,
    /// Main chat group (default 224.168.5.200).
    pub multicast_group: Ipv4Addr,
    /// Main chat port (default 40556).
    pub chat_port: u16,
    /// Group used for the startup interface probe (default 224.168.5.250).
    pub probe_group: Ipv4Addr,
    pub probe_port: u16,
    /// First port tried for the private chat receiver (default 40656).
    pub private_chat_port: u16,
    /// First port tried for file transfer listeners (default 40756).
    pub file_transfer_port: u16,
    /// Do not open the private chat receiver.
    pub no_private_chat: bool,
    pub multicast_ttl: u32,
    /// Where accepted files are saved.
    pub download_dir: PathBuf,
    /// Accept every file offer without asking.
    pub auto_accept_files: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            nick: None,
            multicast_group: CHAT_GROUP,
            chat_port: CHAT_PORT,
            probe_group: PROBE_GROUP,
            probe_port: PROBE_PORT,
            private_chat_port: PRIVATE_CHAT_PORT,
            file_transfer_port: FILE_TRANSFER_PORT,
            no_private_chat: false,
            multicast_ttl: 64,
            download_dir: default_download_dir(),
            auto_accept_files: false,
        }
    }
}

fn default_download_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(|h| PathBuf::from(h).join("Downloads"))
        .unwrap_or_else(std::env::temp_dir)
}

/// Load config: merge default, then config file (if present), then env vars.
pub fn load() -> Config {
    let mut c = load_file().unwrap_or_default();
    apply_env(&mut c, |key| std::env::var(key).ok());
    c
}

/// Apply overrides from `lookup`; unparsable values are ignored.
pub fn apply_env(c: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(s) = lookup("LANCHAT_NICK") {
        let s = s.trim();
        if !s.is_empty() {
            c.nick = Some(s.to_string());
        }
    }
    if let Some(p) = lookup("LANCHAT_CHAT_PORT").and_then(|s| s.parse::<u16>().ok()) {
        c.chat_port = p;
    }
    if let Some(p) = lookup("LANCHAT_PRIVATE_CHAT_PORT").and_then(|s| s.parse::<u16>().ok()) {
        c.private_chat_port = p;
    }
    if let Some(p) = lookup("LANCHAT_FILE_TRANSFER_PORT").and_then(|s| s.parse::<u16>().ok()) {
        c.file_transfer_port = p;
    }
    if let Some(s) = lookup("LANCHAT_NO_PRIVATE_CHAT") {
        c.no_private_chat = matches!(s.trim(), "1" | "true" | "yes");
    }
}

fn config_paths() -> Vec<PathBuf> {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    let mut out = Vec::new();
    if let Some(h) = home {
        out.push(h.join(".config/lanchat/config.toml"));
    }
    out.push(PathBuf::from("/etc/lanchat/config.toml"));
    out
}

fn load_file() -> Option<Config> {
    let path = config_paths().into_iter().find(|p| p.exists())?;
    match read_file(&path) {
        Ok(c) => Some(c),
        Err(e) => {
            log::warn!("Ignoring {}: {e}", path.display());
            None
        }
    }
}

/// Parse one config file.
pub fn read_file(path: &Path) -> anyhow::Result<Config> {
    let s = std::fs::read_to_string(path)?;
    Ok(toml::from_str::<Config>(&s)?)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::io::Write;

    use super::*;

    #[test]
    fn defaults_match_protocol() {
        let c = Config::default();
        assert_eq!(c.multicast_group, Ipv4Addr::new(224, 168, 5, 200));
        assert_eq!(c.chat_port, 40556);
        assert_eq!(c.private_chat_port, 40656);
        assert_eq!(c.file_transfer_port, 40756);
        assert_eq!(c.multicast_ttl, 64);
        assert!(!c.no_private_chat);
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let c: Config = toml::from_str("nick = \"alice\"\nchat_port = 5000\n").unwrap();
        assert_eq!(c.nick.as_deref(), Some("alice"));
        assert_eq!(c.chat_port, 5000);
        assert_eq!(c.probe_port, 50050);
    }

    #[test]
    fn unknown_key_is_rejected() {
        assert!(toml::from_str::<Config>("proxy_port = 1\n").is_err());
    }

    #[test]
    fn env_overrides_file() {
        let mut c = Config::default();
        let env: HashMap<&str, &str> = [
            ("LANCHAT_NICK", " bob "),
            ("LANCHAT_CHAT_PORT", "6000"),
            ("LANCHAT_PRIVATE_CHAT_PORT", "not a port"),
            ("LANCHAT_NO_PRIVATE_CHAT", "true"),
        ]
        .into_iter()
        .collect();
        apply_env(&mut c, |k| env.get(k).map(|v| v.to_string()));
        assert_eq!(c.nick.as_deref(), Some("bob"));
        assert_eq!(c.chat_port, 6000);
        assert_eq!(c.private_chat_port, 40656);
        assert!(c.no_private_chat);
    }

    #[test]
    fn read_file_reports_bad_toml() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "chat_port = \"x\"").unwrap();
        assert!(read_file(f.path()).is_err());

        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "auto_accept_files = true").unwrap();
        assert!(read_file(f.path()).unwrap().auto_accept_files);
    }
}
