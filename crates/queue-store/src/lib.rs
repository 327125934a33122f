//! Durable storage for download queues.
//!
//! Two layers: [`store`] is a single-file transactional key-value store with
//! nested namespaces, ordered iteration, and per-namespace sequence counters;
//! [`repository`] encodes the queue domain on top of it (queues, active
//! items, claim leases, finished history, pagination).

#[macro_use]
extern crate tracing;

mod error;
mod model;
mod repository;
mod store;

pub use error::{RepoError, StoreError};
pub use model::{FinishedItem, FinishedState, Item, QueueMeta};
pub use repository::{sanitize_queue_name, QueueDb, DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE};
pub use store::{NamespaceId, Store, StoreRead, StoreReader, StoreWriter, ROOT};
