use std::ops::ControlFlow;
use std::sync::Arc;

use camino::Utf8Path;
use rand::rngs::OsRng;
use rand::RngCore as _;
use serde::de::DeserializeOwned;
use time::OffsetDateTime;

use crate::error::{RepoError, StoreError};
use crate::model::{decode, encode, FinishedItem, FinishedState, Item, QueueMeta};
use crate::store::{NamespaceId, Store, StoreRead, StoreWriter, ROOT};

const QUEUES_NAMESPACE: &str = "queues";
const ITEMS_NAMESPACE: &str = "items";
const FINISHED_NAMESPACE: &str = "finished";
const META_KEY: &str = "meta";
const ID_SEPARATOR: char = ':';

/// Leases are refreshed by every progress report; a silent claimer loses the
/// item to the next scan once this elapses.
const CLAIM_TTL: time::Duration = time::Duration::seconds(30);

/// First sequence value issued by a fresh queue.
const FIRST_SEQUENCE: u64 = 10;

pub const DEFAULT_PAGE_SIZE: u32 = 50;
pub const MAX_PAGE_SIZE: u32 = 100;

type Clock = Arc<dyn Fn() -> OffsetDateTime + Send + Sync>;

/// The queue domain on top of [`Store`]: queues, active items with claim
/// leases, finished history, and key-based pagination.
///
/// Every operation is one transaction; the store serializes writers, so there
/// is no cross-operation coordination to reason about.
pub struct QueueDb {
    store: Store,
    clock: Clock,
}

impl QueueDb {
    pub fn open(path: &Utf8Path) -> Result<Self, StoreError> {
        Ok(QueueDb {
            store: Store::open(path)?,
            clock: Arc::new(OffsetDateTime::now_utc),
        })
    }

    #[cfg(test)]
    fn open_with_clock(path: &Utf8Path, clock: Clock) -> Result<Self, StoreError> {
        Ok(QueueDb {
            store: Store::open(path)?,
            clock,
        })
    }

    /// Creates a queue addressed by the sanitized form of `name`.
    ///
    /// Two names collapsing to the same id collide; the second creation fails
    /// with [`RepoError::Conflict`].
    pub fn create_queue(&self, name: &str) -> Result<QueueMeta, RepoError> {
        let now = (self.clock)();

        self.store.update(|w| {
            let queues = w.ensure_namespace(ROOT, QUEUES_NAMESPACE)?;

            let id = sanitize_queue_name(name);
            let queue = match w.create_namespace(queues, &id) {
                Ok(ns) => ns,
                Err(StoreError::AlreadyExists) => return Err(RepoError::Conflict),
                Err(error) => return Err(error.into()),
            };

            let items = w.ensure_namespace(queue, ITEMS_NAMESPACE)?;
            w.ensure_namespace(queue, FINISHED_NAMESPACE)?;
            w.set_sequence(items, FIRST_SEQUENCE)?;

            let meta = QueueMeta {
                id: id.clone(),
                name: name.to_owned(),
                created_at: now.unix_timestamp(),
            };
            w.put(queue, META_KEY, &encode(&meta)?)?;

            debug!(queue = %id, "Created queue");

            Ok(meta)
        })
    }

    pub fn list_queues(&self) -> Result<Vec<QueueMeta>, RepoError> {
        self.store.view(|r| {
            let Some(queues) = r.namespace(ROOT, QUEUES_NAMESPACE)? else {
                return Ok(Vec::new());
            };

            let mut namespaces = Vec::new();
            r.for_each_namespace(queues, |_, ns| -> Result<ControlFlow<()>, RepoError> {
                namespaces.push(ns);
                Ok(ControlFlow::Continue(()))
            })?;

            let mut out = Vec::with_capacity(namespaces.len());
            for ns in namespaces {
                let Some(bytes) = r.get(ns, META_KEY)? else {
                    continue;
                };
                out.push(decode::<QueueMeta>(&bytes)?);
            }
            Ok(out)
        })
    }

    /// Appends an item with zero progress and zero claim expiry, keyed by the
    /// queue id and a zero-padded sequence so key order is insertion order.
    pub fn enqueue_item(&self, queue: &str, source: &str, destination: &str, category: &str) -> Result<String, RepoError> {
        self.store.update(|w| {
            let items = inner_namespace(w, queue, ITEMS_NAMESPACE)?;

            let sequence = w.next_sequence(items)?;
            let item_id = format!("{}{}{:020}", sanitize_queue_name(queue), ID_SEPARATOR, sequence);

            let item = Item {
                id: item_id.clone(),
                source: source.to_owned(),
                destination: destination.to_owned(),
                category: category.to_owned(),
                total_size_bytes: 0,
                downloaded_bytes: 0,
                claim_expiry: 0,
            };
            w.put(items, &item_id, &encode(&item)?)?;

            debug!(item_id = %item_id, source, "Enqueued item");

            Ok(item_id)
        })
    }

    /// Returns the first item in key order whose lease is strictly in the
    /// past (a zero expiry qualifies), extending its lease in place; `None`
    /// when every item is leased or the queue is empty.
    ///
    /// Key order is insertion order, which gives FIFO service with
    /// head-of-line recovery when a claimer dies and its lease lapses.
    pub fn claim_next_item(&self, queue: &str) -> Result<Option<Item>, RepoError> {
        let now = (self.clock)();
        let now_ts = now.unix_timestamp();

        self.store.update(|w| {
            let items = inner_namespace(w, queue, ITEMS_NAMESPACE)?;

            let mut candidate: Option<(String, Item)> = None;
            w.for_each(items, |key, value| -> Result<ControlFlow<()>, RepoError> {
                let item: Item = decode(value)?;
                if item.claim_expiry < now_ts {
                    candidate = Some((key.to_owned(), item));
                    return Ok(ControlFlow::Break(()));
                }
                Ok(ControlFlow::Continue(()))
            })?;

            let Some((key, mut item)) = candidate else {
                return Ok(None);
            };

            item.claim_expiry = (now + CLAIM_TTL).unix_timestamp();
            w.put(items, &key, &encode(&item)?)?;

            trace!(item_id = %item.id, expiry = item.claim_expiry, "Claimed item");

            Ok(Some(item))
        })
    }

    /// Updates progress counters and refreshes the lease.
    ///
    /// Fails with [`RepoError::Invalid`] on a malformed id and
    /// [`RepoError::NotFound`] when the item was already finalized.
    pub fn set_progress(&self, item_id: &str, downloaded: u64, total: u64) -> Result<(), RepoError> {
        let now = (self.clock)();

        self.store.update(|w| {
            let queue = queue_id_from_item_id(item_id)?;
            let items = inner_namespace(w, queue, ITEMS_NAMESPACE)?;

            let bytes = w.get(items, item_id)?.ok_or(RepoError::NotFound)?;
            let mut item: Item = decode(&bytes)?;

            item.downloaded_bytes = downloaded;
            item.total_size_bytes = total;
            item.claim_expiry = (now + CLAIM_TTL).unix_timestamp();

            w.put(items, item_id, &encode(&item)?)?;

            trace!(item_id, downloaded, total, "Progress updated");

            Ok(())
        })
    }

    pub fn complete_item(&self, item_id: &str, total: u64) -> Result<(), RepoError> {
        self.move_item_to_finished(item_id, total, total, FinishedState::Success, "")
    }

    pub fn fail_item(&self, item_id: &str, downloaded: u64, total: u64, message: &str) -> Result<(), RepoError> {
        self.move_item_to_finished(item_id, downloaded, total, FinishedState::Failed, message)
    }

    pub fn cancel_item(&self, item_id: &str) -> Result<(), RepoError> {
        self.move_item_to_finished(item_id, 0, 0, FinishedState::Cancelled, "cancelled by user")
    }

    /// Atomically records the terminal outcome in the finished namespace and
    /// removes the active record, within one transaction.
    fn move_item_to_finished(
        &self,
        item_id: &str,
        downloaded: u64,
        total: u64,
        state: FinishedState,
        message: &str,
    ) -> Result<(), RepoError> {
        let now = (self.clock)();

        self.store.update(|w| {
            let queue = queue_id_from_item_id(item_id)?;
            let items = inner_namespace(w, queue, ITEMS_NAMESPACE)?;
            let finished = inner_namespace(w, queue, FINISHED_NAMESPACE)?;

            let bytes = w.get(items, item_id)?.ok_or(RepoError::NotFound)?;
            let item: Item = decode(&bytes)?;

            let record = FinishedItem {
                state,
                total_size_bytes: total,
                downloaded_bytes: downloaded,
                finished_at: now.unix_timestamp(),
                message: message.to_owned(),
                item,
            };

            let key = ordered_key(now);
            w.put(finished, &key, &encode(&record)?)?;
            w.delete(items, item_id)?;

            debug!(item_id, ?state, "Item finished");

            Ok(())
        })
    }

    pub fn get_queue_items(&self, queue: &str, start_key: &str, limit: u32) -> Result<(Vec<Item>, String), RepoError> {
        self.page(queue, ITEMS_NAMESPACE, start_key, limit)
    }

    pub fn get_finished_items(
        &self,
        queue: &str,
        start_key: &str,
        limit: u32,
    ) -> Result<(Vec<FinishedItem>, String), RepoError> {
        self.page(queue, FINISHED_NAMESPACE, start_key, limit)
    }

    /// Key-ordered page: entries lexicographically below `start_key` are
    /// skipped, at most `min(limit or 50, 100)` are returned, and the second
    /// component is the key to resume from (empty at the end).
    fn page<T: DeserializeOwned>(
        &self,
        queue: &str,
        inner: &str,
        start_key: &str,
        limit: u32,
    ) -> Result<(Vec<T>, String), RepoError> {
        let page_size = default_if_zero(DEFAULT_PAGE_SIZE, limit).min(MAX_PAGE_SIZE) as usize;

        self.store.view(|r| {
            let ns = inner_namespace(r, queue, inner)?;

            let mut items = Vec::with_capacity(page_size);
            let mut next_key = String::new();

            r.for_each(ns, |key, value| -> Result<ControlFlow<()>, RepoError> {
                if !start_key.is_empty() && key < start_key {
                    return Ok(ControlFlow::Continue(()));
                }
                if items.len() >= page_size {
                    next_key = key.to_owned();
                    return Ok(ControlFlow::Break(()));
                }
                items.push(decode::<T>(value)?);
                Ok(ControlFlow::Continue(()))
            })?;

            Ok((items, next_key))
        })
    }

    /// Deletes every finished record of the queue. Individual delete failures
    /// are logged and skipped so one bad key cannot wedge the sweep.
    pub fn clear_history(&self, queue: &str) -> Result<(), RepoError> {
        self.store.update(|w| {
            let finished = inner_namespace(w, queue, FINISHED_NAMESPACE)?;

            let mut keys = Vec::new();
            w.for_each(finished, |key, _| -> Result<ControlFlow<()>, RepoError> {
                keys.push(key.to_owned());
                Ok(ControlFlow::Continue(()))
            })?;

            for key in keys {
                if let Err(error) = w.delete(finished, &key) {
                    warn!(%error, key = %key, "Failed to delete finished item");
                }
            }

            Ok(())
        })
    }
}

/// Replaces every character outside `[A-Za-z0-9_-]` with `_`, yielding the
/// queue's storage id. Unconditional, so distinct names may collide.
pub fn sanitize_queue_name(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
        .collect()
}

fn inner_namespace(r: &impl StoreRead, queue: &str, inner: &str) -> Result<NamespaceId, RepoError> {
    let queues = r.namespace(ROOT, QUEUES_NAMESPACE)?.ok_or(RepoError::NotFound)?;
    let queue = r
        .namespace(queues, &sanitize_queue_name(queue))?
        .ok_or(RepoError::NotFound)?;
    r.namespace(queue, inner)?.ok_or(RepoError::NotFound)
}

// Separator below index 2 is rejected: queue ids shorter than two characters
// are not addressable through item ids.
fn queue_id_from_item_id(item_id: &str) -> Result<&str, RepoError> {
    let col = item_id.find(ID_SEPARATOR).ok_or(RepoError::Invalid)?;
    if col <= 1 {
        return Err(RepoError::Invalid);
    }
    Ok(&item_id[..col])
}

/// 256 hex characters: 8 bytes of big-endian nanosecond unix time followed by
/// 120 bytes of OS randomness, so finished keys sort chronologically and
/// never collide.
fn ordered_key(now: OffsetDateTime) -> String {
    const KEY_SIZE: usize = 128;

    let mut buf = [0u8; KEY_SIZE];
    OsRng.fill_bytes(&mut buf);

    let nanos = u64::try_from(now.unix_timestamp_nanos()).unwrap_or_default();
    buf[..8].copy_from_slice(&nanos.to_be_bytes());

    hex::encode(buf)
}

fn default_if_zero(default: u32, value: u32) -> u32 {
    if value == 0 {
        default
    } else {
        value
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicI64, Ordering};

    use super::*;

    const BASE_TS: i64 = 1_700_000_000;

    struct TestEnv {
        _dir: tempfile::TempDir,
        db: QueueDb,
        offset: Arc<AtomicI64>,
    }

    impl TestEnv {
        fn new() -> Self {
            let dir = tempfile::tempdir().expect("tempdir");
            let path = Utf8Path::from_path(dir.path()).expect("utf-8 temp dir").join("queue.db");

            let offset = Arc::new(AtomicI64::new(0));
            let clock = {
                let offset = Arc::clone(&offset);
                Arc::new(move || {
                    OffsetDateTime::from_unix_timestamp(BASE_TS + offset.load(Ordering::SeqCst)).expect("valid ts")
                })
            };

            let db = QueueDb::open_with_clock(&path, clock).expect("open db");

            TestEnv { _dir: dir, db, offset }
        }

        fn advance_secs(&self, secs: i64) {
            self.offset.fetch_add(secs, Ordering::SeqCst);
        }
    }

    #[test]
    fn create_queue_sanitizes_name_and_conflicts_on_collision() {
        let env = TestEnv::new();

        let meta = env.db.create_queue("a b").expect("create");
        assert_eq!(meta.id, "a_b");
        assert_eq!(meta.name, "a b");

        let err = env.db.create_queue("a_b").expect_err("collision");
        assert!(matches!(err, RepoError::Conflict));
    }

    #[test]
    fn enqueue_assigns_padded_sequence_starting_at_ten() {
        let env = TestEnv::new();
        env.db.create_queue("q1").expect("create");

        let first = env.db.enqueue_item("q1", "http://example/a", "file:///a", "").expect("enqueue");
        let second = env.db.enqueue_item("q1", "http://example/b", "file:///b", "").expect("enqueue");

        assert_eq!(first, "q1:00000000000000000010");
        assert_eq!(second, "q1:00000000000000000011");
    }

    #[test]
    fn enqueue_into_unknown_queue_is_not_found() {
        let env = TestEnv::new();

        let err = env
            .db
            .enqueue_item("ghost", "http://example/a", "file:///a", "")
            .expect_err("unknown queue");
        assert!(matches!(err, RepoError::NotFound));
    }

    #[test]
    fn claim_serves_items_in_enqueue_order() {
        let env = TestEnv::new();
        env.db.create_queue("q1").expect("create");

        let a = env.db.enqueue_item("q1", "http://example/a", "file:///a", "").expect("enqueue");
        let b = env.db.enqueue_item("q1", "http://example/b", "file:///b", "").expect("enqueue");

        let first = env.db.claim_next_item("q1").expect("claim").expect("item");
        let second = env.db.claim_next_item("q1").expect("claim").expect("item");

        assert_eq!(first.id, a);
        assert_eq!(second.id, b);
    }

    #[test]
    fn claim_is_exclusive_while_leased() {
        let env = TestEnv::new();
        env.db.create_queue("q1").expect("create");
        env.db.enqueue_item("q1", "http://example/a", "file:///a", "").expect("enqueue");

        let claimed = env.db.claim_next_item("q1").expect("claim");
        assert!(claimed.is_some());

        env.advance_secs(29);
        let second = env.db.claim_next_item("q1").expect("claim");
        assert!(second.is_none());
    }

    #[test]
    fn expired_lease_is_reclaimable() {
        let env = TestEnv::new();
        env.db.create_queue("q1").expect("create");
        let id = env.db.enqueue_item("q1", "http://example/a", "file:///a", "").expect("enqueue");

        env.db.claim_next_item("q1").expect("claim").expect("item");

        env.advance_secs(31);
        let reclaimed = env.db.claim_next_item("q1").expect("claim").expect("item");
        assert_eq!(reclaimed.id, id);
    }

    #[test]
    fn set_progress_refreshes_the_lease() {
        let env = TestEnv::new();
        env.db.create_queue("q1").expect("create");
        let id = env.db.enqueue_item("q1", "http://example/a", "file:///a", "").expect("enqueue");

        env.db.claim_next_item("q1").expect("claim").expect("item");

        env.advance_secs(29);
        env.db.set_progress(&id, 100, 200).expect("progress");

        // Past the original lease, but within the refreshed one.
        env.advance_secs(29);
        assert!(env.db.claim_next_item("q1").expect("claim").is_none());

        env.advance_secs(31);
        assert!(env.db.claim_next_item("q1").expect("claim").is_some());
    }

    #[test]
    fn set_progress_rejects_malformed_ids() {
        let env = TestEnv::new();

        for id in ["noseparator", ":leading", "a:0000"] {
            let err = env.db.set_progress(id, 0, 0).expect_err("malformed id");
            assert!(matches!(err, RepoError::Invalid), "{id}");
        }
    }

    #[test]
    fn finalize_moves_item_atomically() {
        let env = TestEnv::new();
        env.db.create_queue("q1").expect("create");
        let id = env.db.enqueue_item("q1", "http://example/a", "file:///x/y", "").expect("enqueue");

        env.db.claim_next_item("q1").expect("claim").expect("item");
        env.db.set_progress(&id, 1000, 2000).expect("progress");
        env.db.complete_item(&id, 2000).expect("complete");

        let (active, _) = env.db.get_queue_items("q1", "", 0).expect("active page");
        assert!(active.is_empty());

        let (finished, next) = env.db.get_finished_items("q1", "", 0).expect("finished page");
        assert_eq!(finished.len(), 1);
        assert!(next.is_empty());
        assert_eq!(finished[0].state, FinishedState::Success);
        assert_eq!(finished[0].total_size_bytes, 2000);
        assert_eq!(finished[0].downloaded_bytes, 2000);
        assert_eq!(finished[0].item.id, id);

        let err = env.db.set_progress(&id, 0, 0).expect_err("already finished");
        assert!(matches!(err, RepoError::NotFound));
    }

    #[test]
    fn fail_records_partial_progress_and_message() {
        let env = TestEnv::new();
        env.db.create_queue("q1").expect("create");
        let id = env.db.enqueue_item("q1", "http://example/a", "file:///a", "").expect("enqueue");

        env.db.fail_item(&id, 10, 100, "connection reset").expect("fail");

        let (finished, _) = env.db.get_finished_items("q1", "", 0).expect("page");
        assert_eq!(finished[0].state, FinishedState::Failed);
        assert_eq!(finished[0].downloaded_bytes, 10);
        assert_eq!(finished[0].total_size_bytes, 100);
        assert_eq!(finished[0].message, "connection reset");
    }

    #[test]
    fn cancel_records_zero_totals() {
        let env = TestEnv::new();
        env.db.create_queue("q1").expect("create");
        let id = env.db.enqueue_item("q1", "http://example/a", "file:///a", "").expect("enqueue");

        env.db.cancel_item(&id).expect("cancel");

        let (finished, _) = env.db.get_finished_items("q1", "", 0).expect("page");
        assert_eq!(finished[0].state, FinishedState::Cancelled);
        assert_eq!(finished[0].downloaded_bytes, 0);
        assert_eq!(finished[0].total_size_bytes, 0);
        assert_eq!(finished[0].message, "cancelled by user");
    }

    #[test]
    fn finished_items_are_listed_chronologically() {
        let env = TestEnv::new();
        env.db.create_queue("q1").expect("create");

        let mut ids = Vec::new();
        for i in 0..3 {
            let id = env
                .db
                .enqueue_item("q1", &format!("http://example/{i}"), "file:///a", "")
                .expect("enqueue");
            ids.push(id);
        }

        for id in &ids {
            env.db.complete_item(id, 1).expect("complete");
            env.advance_secs(2);
        }

        let (finished, _) = env.db.get_finished_items("q1", "", 0).expect("page");
        let listed: Vec<_> = finished.iter().map(|f| f.item.id.clone()).collect();
        assert_eq!(listed, ids);
    }

    #[test]
    fn pagination_walks_the_namespace_without_gaps_or_duplicates() {
        let env = TestEnv::new();
        env.db.create_queue("q1").expect("create");

        let mut expected = Vec::new();
        for i in 0..125 {
            let id = env
                .db
                .enqueue_item("q1", &format!("http://example/{i}"), "file:///a", "")
                .expect("enqueue");
            expected.push(id);
        }

        let (page1, next1) = env.db.get_queue_items("q1", "", 0).expect("page 1");
        assert_eq!(page1.len(), 50);
        assert!(!next1.is_empty());

        let (page2, next2) = env.db.get_queue_items("q1", &next1, 0).expect("page 2");
        assert_eq!(page2.len(), 50);
        assert!(!next2.is_empty());

        let (page3, next3) = env.db.get_queue_items("q1", &next2, 0).expect("page 3");
        assert_eq!(page3.len(), 25);
        assert!(next3.is_empty());

        let walked: Vec<_> = page1.iter().chain(&page2).chain(&page3).map(|i| i.id.clone()).collect();
        assert_eq!(walked, expected);
    }

    #[test]
    fn page_size_is_clamped_to_the_maximum() {
        let env = TestEnv::new();
        env.db.create_queue("q1").expect("create");

        for i in 0..125 {
            env.db
                .enqueue_item("q1", &format!("http://example/{i}"), "file:///a", "")
                .expect("enqueue");
        }

        let (page, _) = env.db.get_queue_items("q1", "", 500).expect("page");
        assert_eq!(page.len(), 100);
    }

    #[test]
    fn clear_history_is_idempotent() {
        let env = TestEnv::new();
        env.db.create_queue("q1").expect("create");

        for i in 0..3 {
            let id = env
                .db
                .enqueue_item("q1", &format!("http://example/{i}"), "file:///a", "")
                .expect("enqueue");
            env.db.complete_item(&id, 1).expect("complete");
        }

        env.db.clear_history("q1").expect("clear");
        let (finished, _) = env.db.get_finished_items("q1", "", 0).expect("page");
        assert!(finished.is_empty());

        env.db.clear_history("q1").expect("clear again");
        let (finished, _) = env.db.get_finished_items("q1", "", 0).expect("page");
        assert!(finished.is_empty());
    }

    #[test]
    fn list_queues_returns_metadata() {
        let env = TestEnv::new();
        env.db.create_queue("alpha").expect("create");
        env.db.create_queue("beta queue").expect("create");

        let mut queues = env.db.list_queues().expect("list");
        queues.sort_by(|a, b| a.id.cmp(&b.id));

        assert_eq!(queues.len(), 2);
        assert_eq!(queues[0].id, "alpha");
        assert_eq!(queues[1].id, "beta_queue");
        assert_eq!(queues[1].name, "beta queue");
    }

    #[test]
    fn sequence_is_not_reused_after_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = Utf8Path::from_path(dir.path()).expect("utf-8 temp dir").join("queue.db");

        {
            let db = QueueDb::open(&path).expect("open");
            db.create_queue("q1").expect("create");
            let id = db.enqueue_item("q1", "http://example/a", "file:///a", "").expect("enqueue");
            assert_eq!(id, "q1:00000000000000000010");
        }

        let db = QueueDb::open(&path).expect("reopen");
        let id = db.enqueue_item("q1", "http://example/b", "file:///b", "").expect("enqueue");
        assert_eq!(id, "q1:00000000000000000011");
    }
}
