use serde::{Deserialize, Serialize};

use super::{Item, MediaDescriptor};

#[derive(Debug, Serialize)]
pub(super) struct AuthRequest<'a> {
    pub api_id: i32,
    pub api_hash: &'a str,
    pub device_id: &'a str,
}

#[derive(Debug, Deserialize)]
pub(super) struct AuthResponse {
    pub token: String,
}

#[derive(Debug, Serialize)]
pub(super) struct JoinRequest<'a> {
    pub invite: &'a str,
}

#[derive(Debug, Deserialize)]
pub(super) struct PeerResponse {
    pub id: i64,
}

#[derive(Debug, Deserialize)]
pub(super) struct ErrorResponse {
    pub error: String,
}

#[derive(Debug, Deserialize)]
pub(super) struct HistoryResponse {
    #[serde(default)]
    pub messages: Vec<MessageRecord>,
}

#[derive(Debug, Deserialize)]
pub(super) struct MessageRecord {
    pub id: i64,
    #[serde(default)]
    pub media: Option<MediaRecord>,
}

#[derive(Debug, Deserialize)]
pub(super) struct MediaRecord {
    #[serde(default)]
    pub size: Option<u64>,
    pub locator: String,
    #[serde(default)]
    pub file_name: Option<String>,
}

impl From<MessageRecord> for Item {
    fn from(record: MessageRecord) -> Self {
        Item {
            id: record.id,
            media: record.media.map(|m| MediaDescriptor {
                expected_size: m.size,
                locator: m.locator,
                file_name: m.file_name,
            }),
        }
    }
}
