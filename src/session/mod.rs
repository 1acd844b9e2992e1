//! Session recovery controller.
//!
//! Owns the process-wide active session. Callers take a [`SessionLease`] at
//! the start of every operation instead of caching a client, so a recovery
//! performed by one caller is picked up by all others on their next
//! operation. Recovery replaces the session wholesale: the old handle is
//! dropped, never patched.

pub mod error;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::client::{ClientError, ClientHandle, SessionBootstrap};

pub use self::error::SessionError;

/// A client handle plus the generation it belongs to.
#[derive(Clone)]
pub struct SessionLease {
    pub client: ClientHandle,
    pub generation: u64,
}

impl std::fmt::Debug for SessionLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionLease")
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}

pub struct SessionManager {
    bootstrapper: Arc<dyn SessionBootstrap>,
    session_path: PathBuf,
    active: RwLock<SessionLease>,
    recoveries: AtomicU64,
}

impl SessionManager {
    /// Bootstrap the session and prove it works.
    ///
    /// A session that fails to load or to answer the probe is reset once via
    /// the regular recovery path. If that fails too, startup fails.
    pub async fn start(
        bootstrapper: Arc<dyn SessionBootstrap>,
        session_path: PathBuf,
    ) -> Result<Self, SessionError> {
        let client = match Self::bootstrap_and_probe(bootstrapper.as_ref(), &session_path).await {
            Ok(client) => client,
            Err(e) => {
                tracing::warn!("Session unusable at startup ({}), resetting", e);
                let client = reset_and_bootstrap(bootstrapper.as_ref(), &session_path).await?;
                tracing::info!("Session reset at startup");
                client
            }
        };

        Ok(Self {
            bootstrapper,
            session_path,
            active: RwLock::new(SessionLease {
                client,
                generation: 0,
            }),
            recoveries: AtomicU64::new(0),
        })
    }

    async fn bootstrap_and_probe(
        bootstrapper: &dyn SessionBootstrap,
        session_path: &Path,
    ) -> Result<ClientHandle, ClientError> {
        let client = bootstrapper.bootstrap(session_path).await?;
        client.probe().await?;
        Ok(client)
    }

    /// The session to use for the next operation.
    pub async fn current(&self) -> SessionLease {
        self.active.read().await.clone()
    }

    /// Rebuild the session after `trigger` invalidated it.
    ///
    /// `observed_generation` is the generation of the lease that failed. If
    /// the active session is already newer, someone else recovered in the
    /// meantime and the current lease is returned untouched.
    pub async fn recover(
        &self,
        observed_generation: u64,
        trigger: &ClientError,
    ) -> Result<SessionLease, SessionError> {
        let mut active = self.active.write().await;
        if active.generation != observed_generation {
            tracing::debug!(
                observed = observed_generation,
                current = active.generation,
                "Session already recovered by another caller"
            );
            return Ok(active.clone());
        }

        tracing::warn!(trigger = %trigger, "Resetting session...");
        let client = reset_and_bootstrap(self.bootstrapper.as_ref(), &self.session_path).await?;
        *active = SessionLease {
            client,
            generation: active.generation + 1,
        };
        self.recoveries.fetch_add(1, Ordering::SeqCst);
        tracing::info!(generation = active.generation, "Session re-established");
        Ok(active.clone())
    }

    /// Number of completed recoveries since startup.
    pub fn recoveries(&self) -> u64 {
        self.recoveries.load(Ordering::SeqCst)
    }
}

/// Delete the persisted session, then authenticate from scratch.
async fn reset_and_bootstrap(
    bootstrapper: &dyn SessionBootstrap,
    session_path: &Path,
) -> Result<ClientHandle, SessionError> {
    match tokio::fs::remove_file(session_path).await {
        Ok(()) => tracing::debug!("Removed session file {}", session_path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => {
            return Err(SessionError::RemoveSession {
                path: session_path.to_path_buf(),
                source: e,
            })
        }
    }
    bootstrapper
        .bootstrap(session_path)
        .await
        .map_err(SessionError::RecoveryFailed)
}
