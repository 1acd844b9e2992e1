use thiserror::Error;

/// Typed failures surfaced by a protocol client.
///
/// Adapters map their transport-level errors onto these variants so the
/// engine can route failures (retry, recover the session, give up) without
/// inspecting error text itself.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Transient network error: {0}")]
    TransientNetwork(String),

    #[error("Session invalid: {0}")]
    SessionInvalid(String),

    #[error("Transfer incomplete: {0}")]
    TransferIncomplete(String),

    #[error("Transfer cancelled: {0}")]
    TransferCancelled(String),

    #[error("Unsupported peer format: {0}")]
    UnsupportedPeer(String),

    #[error("Remote error (HTTP {status}): {message}")]
    Remote { status: u16, message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ClientError {
    /// Whether the active session must be rebuilt before trying again.
    pub fn is_session_invalid(&self) -> bool {
        matches!(self, ClientError::SessionInvalid(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, ClientError::TransferCancelled(_))
    }

    /// Classify a raw error reported by the remote side.
    ///
    /// Session markers win over everything else: a revoked session looks like
    /// a 401 to some gateways and like a 400/500 with a `SESSION_*` or
    /// `AUTH_KEY_*` code to others.
    pub fn classify(status: Option<u16>, message: &str) -> Self {
        let upper = message.to_ascii_uppercase();
        let message = message.to_string();

        if status == Some(401) || upper.contains("SESSION") || upper.contains("AUTH_KEY") {
            return ClientError::SessionInvalid(message);
        }
        if upper.contains("CANCEL") {
            return ClientError::TransferCancelled(message);
        }
        match status {
            None => ClientError::TransientNetwork(message),
            Some(code) if code == 429 || code >= 500 => ClientError::TransientNetwork(message),
            Some(code) => ClientError::Remote {
                status: code,
                message,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_401_is_session_invalid() {
        assert!(ClientError::classify(Some(401), "unauthorized").is_session_invalid());
    }

    #[test]
    fn test_session_marker_in_text() {
        let e = ClientError::classify(Some(400), "SESSION_REVOKED");
        assert!(e.is_session_invalid());
        let e = ClientError::classify(Some(500), "AUTH_KEY_UNREGISTERED");
        assert!(e.is_session_invalid());
    }

    #[test]
    fn test_session_marker_case_insensitive() {
        assert!(ClientError::classify(None, "session expired").is_session_invalid());
    }

    #[test]
    fn test_cancelled_transfer() {
        let e = ClientError::classify(Some(499), "Download was cancelled by peer");
        assert!(e.is_cancelled());
        assert!(!e.is_session_invalid());
    }

    #[test]
    fn test_rate_limit_and_server_errors_are_transient() {
        assert!(matches!(
            ClientError::classify(Some(429), "FLOOD_WAIT_3"),
            ClientError::TransientNetwork(_)
        ));
        assert!(matches!(
            ClientError::classify(Some(503), "unavailable"),
            ClientError::TransientNetwork(_)
        ));
        assert!(matches!(
            ClientError::classify(None, "connection reset"),
            ClientError::TransientNetwork(_)
        ));
    }

    #[test]
    fn test_other_status_is_remote() {
        match ClientError::classify(Some(403), "CHAT_FORBIDDEN") {
            ClientError::Remote { status, message } => {
                assert_eq!(status, 403);
                assert_eq!(message, "CHAT_FORBIDDEN");
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }
}
