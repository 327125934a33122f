use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::RepoError;

/// Queue metadata, stored at the `meta` key of the queue's namespace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueMeta {
    pub id: String,
    pub name: String,
    /// Unix seconds at creation.
    pub created_at: i64,
}

/// An item still owned by the queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Item {
    pub id: String,
    pub source: String,
    pub destination: String,
    pub category: String,
    pub total_size_bytes: u64,
    pub downloaded_bytes: u64,
    /// Unix seconds until which the item is leased; 0 when never claimed.
    pub claim_expiry: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FinishedState {
    Success,
    Failed,
    Cancelled,
}

/// Immutable record of a terminal outcome, embedding a copy of the active
/// item as it looked at finalization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinishedItem {
    pub state: FinishedState,
    pub total_size_bytes: u64,
    pub downloaded_bytes: u64,
    /// Unix seconds at the move to the finished namespace.
    pub finished_at: i64,
    pub message: String,
    pub item: Item,
}

// Named-field MessagePack so records can grow fields compatibly.

pub(crate) fn encode<T: Serialize>(record: &T) -> Result<Vec<u8>, RepoError> {
    rmp_serde::to_vec_named(record).map_err(RepoError::codec)
}

pub(crate) fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, RepoError> {
    rmp_serde::from_slice(bytes).map_err(RepoError::codec)
}
