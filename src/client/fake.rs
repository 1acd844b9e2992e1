//! Scripted protocol client for engine tests.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use super::{
    ClientError, ClientHandle, Item, MediaDescriptor, PeerId, PeerTarget, ProtocolClient,
    SessionBootstrap,
};

/// What a single `transfer_media` call does.
pub(crate) enum TransferStep {
    /// Write a file with this many bytes.
    Bytes(u64),
    /// Report success without producing a file.
    Nothing,
    Fail(ClientError),
}

pub(crate) fn media_item(id: i64, size: Option<u64>) -> Item {
    Item {
        id,
        media: Some(MediaDescriptor {
            expected_size: size,
            locator: format!("loc-{id}"),
            file_name: None,
        }),
    }
}

pub(crate) fn text_item(id: i64) -> Item {
    Item { id, media: None }
}

/// Plays back scripted batches and transfers, recording every call.
///
/// Unscripted fetches return an empty batch; unscripted transfers write a
/// file of the expected size.
#[derive(Default)]
pub(crate) struct FakeClient {
    batches: Mutex<VecDeque<Result<Vec<Item>, ClientError>>>,
    transfers: Mutex<HashMap<i64, VecDeque<TransferStep>>>,
    probe_failures: Mutex<VecDeque<ClientError>>,
    fetch_offsets: Mutex<Vec<i64>>,
    transfer_calls: Mutex<Vec<i64>>,
}

impl FakeClient {
    pub(crate) fn push_batch(&self, batch: Vec<Item>) {
        self.batches.lock().unwrap().push_back(Ok(batch));
    }

    pub(crate) fn push_fetch_error(&self, error: ClientError) {
        self.batches.lock().unwrap().push_back(Err(error));
    }

    pub(crate) fn script_transfer(&self, id: i64, steps: Vec<TransferStep>) {
        self.transfers
            .lock()
            .unwrap()
            .entry(id)
            .or_default()
            .extend(steps);
    }

    pub(crate) fn fail_next_probe(&self, error: ClientError) {
        self.probe_failures.lock().unwrap().push_back(error);
    }

    pub(crate) fn fetch_offsets(&self) -> Vec<i64> {
        self.fetch_offsets.lock().unwrap().clone()
    }

    pub(crate) fn transfer_calls(&self) -> Vec<i64> {
        self.transfer_calls.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl ProtocolClient for FakeClient {
    async fn resolve_peer(&self, target: &PeerTarget) -> Result<PeerId, ClientError> {
        match target {
            PeerTarget::Id(id) => Ok(PeerId(*id)),
            other => Err(ClientError::UnsupportedPeer(other.to_string())),
        }
    }

    async fn fetch_history(
        &self,
        _peer: PeerId,
        offset_id: i64,
        _limit: u32,
        _hash: i64,
    ) -> Result<Vec<Item>, ClientError> {
        self.fetch_offsets.lock().unwrap().push(offset_id);
        self.batches
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(Vec::new()))
    }

    async fn transfer_media(
        &self,
        item: &Item,
        dest_dir: &Path,
    ) -> Result<Option<PathBuf>, ClientError> {
        self.transfer_calls.lock().unwrap().push(item.id);
        let step = self
            .transfers
            .lock()
            .unwrap()
            .get_mut(&item.id)
            .and_then(|steps| steps.pop_front());
        let bytes = match step {
            Some(TransferStep::Bytes(n)) => n,
            Some(TransferStep::Nothing) => return Ok(None),
            Some(TransferStep::Fail(e)) => return Err(e),
            None => item.expected_size().unwrap_or(1),
        };
        let path = dest_dir.join(format!("{}.bin", item.id));
        std::fs::write(&path, vec![0u8; bytes as usize])?;
        Ok(Some(path))
    }

    async fn probe(&self) -> Result<(), ClientError> {
        match self.probe_failures.lock().unwrap().pop_front() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Hands out the same [`FakeClient`] on every bootstrap so scripts survive
/// session recovery.
pub(crate) struct FakeBootstrap {
    pub(crate) client: Arc<FakeClient>,
    bootstraps: AtomicU32,
    failing: AtomicBool,
}

impl FakeBootstrap {
    pub(crate) fn new(client: Arc<FakeClient>) -> Self {
        Self {
            client,
            bootstraps: AtomicU32::new(0),
            failing: AtomicBool::new(false),
        }
    }

    pub(crate) fn bootstraps(&self) -> u32 {
        self.bootstraps.load(Ordering::SeqCst)
    }

    pub(crate) fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait::async_trait]
impl SessionBootstrap for FakeBootstrap {
    async fn bootstrap(&self, session_path: &Path) -> Result<ClientHandle, ClientError> {
        self.bootstraps.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(ClientError::TransientNetwork("bootstrap refused".into()));
        }
        if !session_path.exists() {
            std::fs::write(session_path, b"{}")?;
        }
        let handle: ClientHandle = self.client.clone();
        Ok(handle)
    }
}
