//! Seam between the ingestion engine and the remote protocol.
//!
//! The engine needs four things from the remote side: resolve the target
//! peer, fetch one page of history, transfer one item's media to disk and
//! bootstrap a session. Everything else (handshake, encryption, wire
//! encoding) stays behind [`ProtocolClient`] and [`SessionBootstrap`].

pub mod error;
#[cfg(test)]
pub(crate) mod fake;
pub mod http;
pub mod peer;
mod responses;

use std::path::{Path, PathBuf};
use std::sync::Arc;

pub use self::error::ClientError;
pub use self::peer::{PeerId, PeerTarget};

/// Media attached to a history item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaDescriptor {
    /// Byte size announced by the source, when it announces one.
    pub expected_size: Option<u64>,
    /// Opaque handle the client uses to fetch the content.
    pub locator: String,
    pub file_name: Option<String>,
}

/// One history entry. Read-only snapshot of what the source returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    pub id: i64,
    pub media: Option<MediaDescriptor>,
}

impl Item {
    pub fn has_media(&self) -> bool {
        self.media.is_some()
    }

    pub fn expected_size(&self) -> Option<u64> {
        self.media.as_ref().and_then(|m| m.expected_size)
    }
}

/// Operations the engine performs against the remote conversation feed.
#[async_trait::async_trait]
pub trait ProtocolClient: Send + Sync {
    async fn resolve_peer(&self, target: &PeerTarget) -> Result<PeerId, ClientError>;

    /// Fetch one page of history starting at `offset_id`. An empty page
    /// means the history is exhausted.
    async fn fetch_history(
        &self,
        peer: PeerId,
        offset_id: i64,
        limit: u32,
        hash: i64,
    ) -> Result<Vec<Item>, ClientError>;

    /// Transfer an item's media into `dest_dir`, returning where it landed.
    async fn transfer_media(
        &self,
        item: &Item,
        dest_dir: &Path,
    ) -> Result<Option<PathBuf>, ClientError>;

    /// Cheap request proving the session is usable.
    async fn probe(&self) -> Result<(), ClientError> {
        Ok(())
    }
}

/// Shared handle to a live client session.
pub type ClientHandle = Arc<dyn ProtocolClient>;

/// Creates (or restores) a session stored at `session_path`.
///
/// Must reuse an existing valid session file rather than authenticating
/// again.
#[async_trait::async_trait]
pub trait SessionBootstrap: Send + Sync {
    async fn bootstrap(&self, session_path: &Path) -> Result<ClientHandle, ClientError>;
}
