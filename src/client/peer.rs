use std::fmt;
use std::str::FromStr;

use super::error::ClientError;

const INVITE_PREFIX: &str = "https://t.me/";

/// The configured conversation, as written by the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerTarget {
    /// `@name`, stored without the leading `@`.
    Username(String),
    /// Full `https://t.me/...` link.
    InviteLink(String),
    /// Numeric identifier (channels and supergroups are negative).
    Id(i64),
}

impl PeerTarget {
    /// Filesystem-safe key used to name per-target state files.
    pub fn state_key(&self) -> String {
        let raw = match self {
            PeerTarget::Username(name) => name.clone(),
            PeerTarget::InviteLink(link) => link
                .strip_prefix(INVITE_PREFIX)
                .unwrap_or(link)
                .to_string(),
            PeerTarget::Id(id) => id.to_string(),
        };
        raw.chars()
            .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '-')
            .collect()
    }
}

impl FromStr for PeerTarget {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Some(name) = s.strip_prefix('@') {
            if !name.is_empty() {
                return Ok(PeerTarget::Username(name.to_string()));
            }
        } else if let Some(rest) = s.strip_prefix(INVITE_PREFIX) {
            if !rest.is_empty() {
                return Ok(PeerTarget::InviteLink(s.to_string()));
            }
        } else if let Ok(id) = s.parse::<i64>() {
            return Ok(PeerTarget::Id(id));
        }
        Err(ClientError::UnsupportedPeer(s.to_string()))
    }
}

impl fmt::Display for PeerTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeerTarget::Username(name) => write!(f, "@{name}"),
            PeerTarget::InviteLink(link) => f.write_str(link),
            PeerTarget::Id(id) => write!(f, "{id}"),
        }
    }
}

/// Resolved peer identifier as understood by the remote side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeerId(pub i64);

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_username() {
        assert_eq!(
            "@some_channel".parse::<PeerTarget>().unwrap(),
            PeerTarget::Username("some_channel".into())
        );
    }

    #[test]
    fn test_parse_invite_link() {
        let target: PeerTarget = "https://t.me/+AbCdEf".parse().unwrap();
        assert_eq!(target, PeerTarget::InviteLink("https://t.me/+AbCdEf".into()));
        assert_eq!(target.to_string(), "https://t.me/+AbCdEf");
    }

    #[test]
    fn test_parse_numeric_id() {
        assert_eq!(
            "-10023423".parse::<PeerTarget>().unwrap(),
            PeerTarget::Id(-10023423)
        );
    }

    #[test]
    fn test_unsupported_formats() {
        for input in ["", "@", "https://t.me/", "http://t.me/foo", "channel", "12ab"] {
            match input.parse::<PeerTarget>() {
                Err(ClientError::UnsupportedPeer(_)) => {}
                other => panic!("{input:?} should be unsupported, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_state_key_is_filesystem_safe() {
        assert_eq!(PeerTarget::Username("my.chan".into()).state_key(), "mychan");
        assert_eq!(
            PeerTarget::InviteLink("https://t.me/+AbC_d".into()).state_key(),
            "AbC_d"
        );
        assert_eq!(PeerTarget::Id(-100).state_key(), "-100");
    }
}
