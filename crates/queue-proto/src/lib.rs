//! Request and response shapes exchanged between the queue broker, the
//! downloader, and the CLI. JSON on the wire, camelCase field names.

use core::fmt;

use serde::{Deserialize, Serialize};

/// Observable state of an item, derived by the broker at read time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ItemState {
    Unspecified,
    Queued,
    Downloading,
    Complete,
    Failed,
}

impl fmt::Display for ItemState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ItemState::Unspecified => "Unspecified",
            ItemState::Queued => "Queued",
            ItemState::Downloading => "Downloading",
            ItemState::Complete => "Complete",
            ItemState::Failed => "Failed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateQueueRequest {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueInfo {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListQueuesResponse {
    pub queues: Vec<QueueInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnqueueItemRequest {
    pub source: String,
    pub destination: String,
    #[serde(default)]
    pub category: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnqueueItemResponse {
    pub id: String,
}

/// Body of a successful claim; `item` is absent when the queue has no
/// claimable entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimNextItemResponse {
    pub item: Option<ClaimedItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimedItem {
    pub id: String,
    pub source: String,
    pub destination: String,
    pub category: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetItemStateRequest {
    pub id: String,
    pub state: ItemState,
    pub downloaded_bytes: u64,
    pub total_size_bytes: u64,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelItemRequest {
    pub id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemWithState {
    pub id: String,
    pub source: String,
    pub destination: String,
    pub category: String,
    pub state: ItemState,
    pub downloaded_bytes: u64,
    pub total_size_bytes: u64,
    pub message: String,
    /// Unix seconds of the last known change.
    pub updated_at: i64,
}

/// One page of a listing; `next` is the key to resume from, empty at the end
/// of the namespace.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemPage {
    pub items: Vec<ItemWithState>,
    pub next: String,
}

/// Client-supplied pagination; both fields optional, clamped server-side.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageParams {
    pub limit: Option<u32>,
    pub next: Option<String>,
}
