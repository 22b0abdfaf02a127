//! Private message codec: `<fromCode>!PRIVMSG#<nick>:(<toCode>)[<color>]<text>`.

use crate::peer::PeerCode;
use crate::wire::{between, number, WireError};

/// A decoded private message addressed to the local peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrivateMessage {
    pub from: PeerCode,
    pub color: i32,
    pub text: String,
}

/// Encode a private message from `from` (known as `nick`) to `to`.
pub fn encode_private_message(
    from: PeerCode,
    nick: &str,
    to: PeerCode,
    color: i32,
    text: &str,
) -> String {
    format!("{from}!PRIVMSG#{nick}:({to})[{color}]{text}")
}

/// Parse a raw private datagram as seen by `local`.
///
/// Returns `Ok(None)` for well-formed payloads that are not for us: sent by ourselves,
/// addressed to someone else, or of a type we do not know.
pub fn decode_private_message(
    payload: &str,
    local: PeerCode,
) -> Result<Option<PrivateMessage>, WireError> {
    let exclamation = payload.find('!').ok_or(WireError::MissingDelimiter('!'))?;
    let hash = payload.find('#').ok_or(WireError::MissingDelimiter('#'))?;
    let colon = payload.find(':').ok_or(WireError::MissingDelimiter(':'))?;
    let from = PeerCode(number(&payload[..exclamation])?);
    let kind = payload
        .get(exclamation + 1..hash)
        .ok_or(WireError::MisplacedDelimiter('#'))?;
    let rest = &payload[colon + 1..];
    let (to, _) = between(rest, '(', ')')?;
    let to = PeerCode(number(to)?);

    if from == local || to != local {
        return Ok(None);
    }
    if kind != "PRIVMSG" {
        return Ok(None);
    }
    let (color, after) = between(rest, '[', ']')?;
    Ok(Some(PrivateMessage {
        from,
        color: number(color)?,
        text: after.to_string(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    const ME: PeerCode = PeerCode(12345678);

    #[test]
    fn decodes_message_for_us() {
        let raw = encode_private_message(PeerCode(42), "Bob", ME, -16776961, "hello (there) [x]");
        let msg = decode_private_message(&raw, ME).unwrap().unwrap();
        assert_eq!(msg.from, PeerCode(42));
        assert_eq!(msg.color, -16776961);
        assert_eq!(msg.text, "hello (there) [x]");
    }

    #[test]
    fn empty_body_is_allowed() {
        let msg = decode_private_message("42!PRIVMSG#Bob:(12345678)[0]", ME)
            .unwrap()
            .unwrap();
        assert_eq!(msg.text, "");
    }

    #[test]
    fn ignores_message_for_someone_else() {
        let raw = encode_private_message(PeerCode(42), "Bob", PeerCode(7), 0, "hi");
        assert_eq!(decode_private_message(&raw, ME).unwrap(), None);
    }

    #[test]
    fn ignores_message_from_self() {
        let raw = encode_private_message(ME, "Me", ME, 0, "hi");
        assert_eq!(decode_private_message(&raw, ME).unwrap(), None);
    }

    #[test]
    fn ignores_unknown_type() {
        let raw = "42!PRIVFILE#Bob:(12345678)[0]hi";
        assert_eq!(decode_private_message(raw, ME).unwrap(), None);
    }

    #[test]
    fn malformed_payloads_are_errors() {
        for raw in [
            "",
            "garbage",
            "x!PRIVMSG#Bob:(12345678)[0]hi",
            "42!PRIVMSG#Bob:12345678[0]hi",
            "42!PRIVMSG#Bob:(abc)[0]hi",
            "42!PRIVMSG#Bob:(12345678)0]hi",
            "42!PRIVMSG#Bob:(12345678)[red]hi",
            "42#PRIVMSG!Bob:(12345678)[0]hi",
        ] {
            assert!(decode_private_message(raw, ME).is_err(), "{raw}");
        }
    }
}
