//! Main-channel text codec: `<code>!<TYPE>#<nick>:<rest>`, with type-specific `rest`.
//!
//! Fields inside `rest` are wrapped in `(..)`, `[..]`, `{..}` and `<..>`; free text always comes
//! last so it may contain any of those characters.

use std::str::FromStr;

use crate::peer::PeerCode;
use crate::protocol::{Envelope, Message};

/// Error decoding a datagram (missing or misplaced delimiter, bad number).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    #[error("missing delimiter '{0}'")]
    MissingDelimiter(char),
    #[error("delimiter '{0}' out of place")]
    MisplacedDelimiter(char),
    #[error("not a number: {0:?}")]
    BadNumber(String),
}

/// Parse a number field exactly as written.
pub(crate) fn number<T: FromStr>(s: &str) -> Result<T, WireError> {
    s.parse().map_err(|_| WireError::BadNumber(s.to_string()))
}

/// Content between the first `open` and the first `close` in `s`, and everything after `close`.
pub(crate) fn between(s: &str, open: char, close: char) -> Result<(&str, &str), WireError> {
    let start = s.find(open).ok_or(WireError::MissingDelimiter(open))?;
    let end = s.find(close).ok_or(WireError::MissingDelimiter(close))?;
    if end < start {
        return Err(WireError::MisplacedDelimiter(close));
    }
    Ok((&s[start + open.len_utf8()..end], &s[end + close.len_utf8()..]))
}

/// Encode an envelope into its datagram text.
pub fn encode(envelope: &Envelope) -> String {
    let rest = match &envelope.message {
        Message::Msg { color, text } => format!("[{color}]{text}"),
        Message::Exposing { away_msg } | Message::Away { away_msg } => away_msg.clone(),
        Message::NickCrash { nick } => nick.clone(),
        Message::Topic {
            setter,
            time,
            topic,
        } => format!("({setter})[{time}]{}", topic.as_deref().unwrap_or("")),
        Message::Client {
            client,
            time_since_logon,
            operating_system,
            private_chat_port,
        } => format!("({client})[{time_since_logon}]{{{operating_system}}}<{private_chat_port}>"),
        Message::SendFile {
            to,
            size,
            hash,
            file_name,
        } => format!("({to})[{size}]{{{hash}}}{file_name}"),
        Message::SendFileAccept {
            to,
            port,
            hash,
            file_name,
        } => format!("({to})[{port}]{{{hash}}}{file_name}"),
        Message::SendFileAbort {
            to,
            hash,
            file_name,
        } => format!("({to}){{{hash}}}{file_name}"),
        Message::Logon
        | Message::Logoff
        | Message::Expose
        | Message::Back
        | Message::Writing
        | Message::StoppedWriting
        | Message::GetTopic
        | Message::Nick
        | Message::Idle => String::new(),
    };
    format!(
        "{}!{}#{}:{}",
        envelope.code,
        envelope.message.type_name(),
        envelope.nick,
        rest
    )
}

/// Decode datagram text. `Ok(None)` means a well-formed header with a type we do not know.
pub fn decode(payload: &str) -> Result<Option<Envelope>, WireError> {
    let exclamation = payload.find('!').ok_or(WireError::MissingDelimiter('!'))?;
    let hash = payload.find('#').ok_or(WireError::MissingDelimiter('#'))?;
    if hash < exclamation {
        return Err(WireError::MisplacedDelimiter('#'));
    }
    let colon = payload[hash..]
        .find(':')
        .map(|i| i + hash)
        .ok_or(WireError::MissingDelimiter(':'))?;
    let code = PeerCode(number(&payload[..exclamation])?);
    let kind = &payload[exclamation + 1..hash];
    let nick = &payload[hash + 1..colon];
    let rest = &payload[colon + 1..];

    let message = match kind {
        "MSG" => {
            let (color, text) = between(rest, '[', ']')?;
            Message::Msg {
                color: number(color)?,
                text: text.to_string(),
            }
        }
        "LOGON" => Message::Logon,
        "LOGOFF" => Message::Logoff,
        "EXPOSE" => Message::Expose,
        "EXPOSING" => Message::Exposing {
            away_msg: rest.to_string(),
        },
        "AWAY" => Message::Away {
            away_msg: rest.to_string(),
        },
        "BACK" => Message::Back,
        "NICKCRASH" => Message::NickCrash {
            nick: rest.to_string(),
        },
        "WRITING" => Message::Writing,
        "STOPPEDWRITING" => Message::StoppedWriting,
        "GETTOPIC" => Message::GetTopic,
        "TOPIC" => {
            let (setter, _) = between(rest, '(', ')')?;
            let (time, topic) = between(rest, '[', ']')?;
            Message::Topic {
                setter: setter.to_string(),
                time: number(time)?,
                topic: (!topic.is_empty()).then(|| topic.to_string()),
            }
        }
        "NICK" => Message::Nick,
        "IDLE" => Message::Idle,
        "CLIENT" => {
            let (client, _) = between(rest, '(', ')')?;
            let (time, _) = between(rest, '[', ']')?;
            let (os, _) = between(rest, '{', '}')?;
            let (port, _) = between(rest, '<', '>')?;
            Message::Client {
                client: client.to_string(),
                time_since_logon: number(time)?,
                operating_system: os.to_string(),
                private_chat_port: number(port)?,
            }
        }
        "SENDFILE" => {
            let (to, _) = between(rest, '(', ')')?;
            let (size, _) = between(rest, '[', ']')?;
            let (file_hash, file_name) = between(rest, '{', '}')?;
            Message::SendFile {
                to: PeerCode(number(to)?),
                size: number(size)?,
                hash: number(file_hash)?,
                file_name: file_name.to_string(),
            }
        }
        "SENDFILEACCEPT" => {
            let (to, _) = between(rest, '(', ')')?;
            let (port, _) = between(rest, '[', ']')?;
            let (file_hash, file_name) = between(rest, '{', '}')?;
            Message::SendFileAccept {
                to: PeerCode(number(to)?),
                port: number(port)?,
                hash: number(file_hash)?,
                file_name: file_name.to_string(),
            }
        }
        "SENDFILEABORT" => {
            let (to, _) = between(rest, '(', ')')?;
            let (file_hash, file_name) = between(rest, '{', '}')?;
            Message::SendFileAbort {
                to: PeerCode(number(to)?),
                hash: number(file_hash)?,
                file_name: file_name.to_string(),
            }
        }
        _ => return Ok(None),
    };
    Ok(Some(Envelope {
        code,
        nick: nick.to_string(),
        message,
    }))
}
