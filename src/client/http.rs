//! HTTP/JSON adapter for a history gateway.
//!
//! The gateway fronts the real messaging network and exposes just what the
//! engine needs: session creation, peer resolution, history pages and media
//! downloads. This module maps its responses onto [`ClientError`] so the
//! engine never looks at status codes or error strings.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::{Client, Response, StatusCode, Url};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use super::error::ClientError;
use super::responses::{
    AuthRequest, AuthResponse, ErrorResponse, HistoryResponse, JoinRequest, PeerResponse,
};
use super::{ClientHandle, Item, PeerId, PeerTarget, ProtocolClient, SessionBootstrap};

/// Token persisted between runs so restarts don't re-authenticate.
#[derive(Debug, Serialize, Deserialize)]
struct SessionFile {
    token: String,
    device_id: String,
    created_at: i64,
}

impl SessionFile {
    async fn load(path: &Path) -> Option<Self> {
        let contents = match fs::read_to_string(path).await {
            Ok(c) => c,
            Err(_) => {
                tracing::info!("Session file does not exist");
                return None;
            }
        };
        match serde_json::from_str(&contents) {
            Ok(session) => {
                tracing::debug!("Loaded session from {}", path.display());
                Some(session)
            }
            Err(_) => {
                tracing::info!("Session file corrupt, starting fresh");
                None
            }
        }
    }

    async fn save(&self, path: &Path) -> Result<(), ClientError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| ClientError::Io(std::io::Error::other(e)))?;
        fs::write(path, json).await?;
        #[cfg(unix)]
        {
            // Session files hold bearer tokens, restrict to owner-only
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).await?;
        }
        tracing::debug!("Saved session to {}", path.display());
        Ok(())
    }
}

fn from_reqwest(e: reqwest::Error) -> ClientError {
    ClientError::TransientNetwork(e.to_string())
}

/// Turn a non-2xx response into a classified error.
async fn check_status(response: Response) -> Result<Response, ClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let message = match serde_json::from_str::<ErrorResponse>(&body) {
        Ok(e) => e.error,
        Err(_) if body.is_empty() => status.to_string(),
        Err(_) => body,
    };
    Err(ClientError::classify(Some(status.as_u16()), &message))
}

fn local_file_name(id: i64, file_name: Option<&str>) -> String {
    match file_name
        .and_then(|n| Path::new(n).file_name())
        .and_then(|n| n.to_str())
    {
        Some(name) if !name.is_empty() => format!("{id}_{name}"),
        _ => id.to_string(),
    }
}

/// `{base}/media/{locator}` with the locator escaped as a single segment.
fn media_url(base_url: &str, locator: &str) -> Result<Url, ClientError> {
    if locator.is_empty() || locator == "." || locator == ".." {
        return Err(ClientError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("invalid media locator {locator:?}"),
        )));
    }
    let mut url = Url::parse(base_url).map_err(|e| ClientError::Io(std::io::Error::other(e)))?;
    url.path_segments_mut()
        .map_err(|_| {
            ClientError::Io(std::io::Error::other(format!(
                "gateway URL cannot take a path: {base_url}"
            )))
        })?
        .pop_if_empty()
        .push("media")
        .push(locator);
    Ok(url)
}

/// Stream the body into `part`. Returns the number of bytes written.
async fn stream_to_part(response: Response, part: &Path) -> Result<u64, ClientError> {
    let content_length = response.content_length();
    let mut file = fs::File::create(part).await?;
    let mut bytes_written: u64 = 0;
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| {
            ClientError::TransferIncomplete(format!(
                "body interrupted after {bytes_written} bytes: {e}"
            ))
        })?;
        file.write_all(&chunk).await?;
        bytes_written += chunk.len() as u64;
    }
    file.flush().await?;

    if let Some(expected) = content_length {
        if bytes_written != expected {
            return Err(ClientError::TransferIncomplete(format!(
                "received {bytes_written} of {expected} bytes"
            )));
        }
    }
    Ok(bytes_written)
}

fn part_path(target: &Path) -> PathBuf {
    let mut s = target.as_os_str().to_owned();
    s.push(".part");
    PathBuf::from(s)
}

/// Creates gateway sessions from API credentials.
pub struct HttpBootstrap {
    base_url: String,
    api_id: i32,
    api_hash: String,
    timeout: Duration,
}

impl std::fmt::Debug for HttpBootstrap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpBootstrap")
            .field("base_url", &self.base_url)
            .field("api_id", &self.api_id)
            .field("api_hash", &"<redacted>")
            .finish()
    }
}

impl HttpBootstrap {
    pub fn new(base_url: &str, api_id: i32, api_hash: &str, timeout_secs: u64) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_id,
            api_hash: api_hash.to_string(),
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    /// `timeout` bounds connecting and each idle gap between reads, never a
    /// whole request, so a slow but progressing media body is not cut off.
    fn build_client(&self) -> Result<Client, ClientError> {
        Client::builder()
            .connect_timeout(self.timeout)
            .read_timeout(self.timeout)
            .user_agent(concat!("chatpd-rs/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ClientError::Io(std::io::Error::other(e)))
    }

    async fn create_session(&self, http: &Client) -> Result<SessionFile, ClientError> {
        let device_id = Uuid::new_v4().to_string();
        let response = http
            .post(format!("{}/auth/session", self.base_url))
            .json(&AuthRequest {
                api_id: self.api_id,
                api_hash: &self.api_hash,
                device_id: &device_id,
            })
            .send()
            .await
            .map_err(from_reqwest)?;
        let auth: AuthResponse = check_status(response)
            .await?
            .json()
            .await
            .map_err(from_reqwest)?;
        Ok(SessionFile {
            token: auth.token,
            device_id,
            created_at: chrono::Utc::now().timestamp(),
        })
    }
}

#[async_trait::async_trait]
impl SessionBootstrap for HttpBootstrap {
    async fn bootstrap(&self, session_path: &Path) -> Result<ClientHandle, ClientError> {
        let http = self.build_client()?;
        let session = match SessionFile::load(session_path).await {
            Some(session) => session,
            None => {
                tracing::info!("Creating new gateway session");
                let session = self.create_session(&http).await?;
                session.save(session_path).await?;
                session
            }
        };
        let client: ClientHandle = Arc::new(HttpClient {
            http,
            base_url: self.base_url.clone(),
            token: session.token,
        });
        Ok(client)
    }
}

/// Authenticated gateway client. Cheap to share behind an `Arc`.
pub struct HttpClient {
    http: Client,
    base_url: String,
    token: String,
}

#[async_trait::async_trait]
impl ProtocolClient for HttpClient {
    async fn resolve_peer(&self, target: &PeerTarget) -> Result<PeerId, ClientError> {
        let request = match target {
            PeerTarget::InviteLink(link) => self
                .http
                .post(format!("{}/chats/join", self.base_url))
                .json(&JoinRequest { invite: link }),
            other => self
                .http
                .get(format!("{}/peers/resolve", self.base_url))
                .query(&[("target", other.to_string())]),
        };
        let response = request
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(from_reqwest)?;
        let response = match check_status(response).await {
            Ok(r) => r,
            Err(ClientError::Remote {
                status: 400 | 404,
                message,
            }) => return Err(ClientError::UnsupportedPeer(format!("{target}: {message}"))),
            Err(e) => return Err(e),
        };
        let peer: PeerResponse = response.json().await.map_err(from_reqwest)?;
        Ok(PeerId(peer.id))
    }

    async fn fetch_history(
        &self,
        peer: PeerId,
        offset_id: i64,
        limit: u32,
        hash: i64,
    ) -> Result<Vec<Item>, ClientError> {
        let response = self
            .http
            .get(format!("{}/history", self.base_url))
            .query(&[
                ("peer", peer.0.to_string()),
                ("offset_id", offset_id.to_string()),
                ("limit", limit.to_string()),
                ("hash", hash.to_string()),
            ])
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(from_reqwest)?;
        let history: HistoryResponse = check_status(response)
            .await?
            .json()
            .await
            .map_err(from_reqwest)?;
        Ok(history.messages.into_iter().map(Item::from).collect())
    }

    async fn transfer_media(
        &self,
        item: &Item,
        dest_dir: &Path,
    ) -> Result<Option<PathBuf>, ClientError> {
        let Some(media) = item.media.as_ref() else {
            return Ok(None);
        };
        let target = dest_dir.join(local_file_name(item.id, media.file_name.as_deref()));

        // A complete copy from an earlier run makes the transfer a no-op
        if let Some(expected) = media.expected_size {
            if let Ok(meta) = fs::metadata(&target).await {
                if meta.len() == expected {
                    tracing::debug!(item_id = item.id, "Already present: {}", target.display());
                    return Ok(Some(target));
                }
            }
        }

        let response = self
            .http
            .get(media_url(&self.base_url, &media.locator)?)
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(from_reqwest)?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = check_status(response).await?;

        let part = part_path(&target);
        let result = match stream_to_part(response, &part).await {
            Ok(bytes) => fs::rename(&part, &target)
                .await
                .map(|_| bytes)
                .map_err(ClientError::from),
            Err(e) => Err(e),
        };
        match result {
            Ok(bytes) => {
                tracing::debug!(item_id = item.id, bytes, "Saved {}", target.display());
                Ok(Some(target))
            }
            Err(e) => {
                let _ = fs::remove_file(&part).await;
                Err(e)
            }
        }
    }

    async fn probe(&self) -> Result<(), ClientError> {
        let response = self
            .http
            .get(format!("{}/me", self.base_url))
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(from_reqwest)?;
        check_status(response).await?;
        Ok(())
    }
}
