use std::ops::ControlFlow;
use std::time::{Duration, Instant};

use camino::Utf8Path;
use redb::{Database, DatabaseError, ReadTransaction, ReadableTable, StorageError, TableDefinition, WriteTransaction};

use crate::error::StoreError;

// Entries and child namespaces are both keyed by (owning namespace, name), so
// a single range scan per namespace yields keys in lexicographic order.
const NAMESPACES: TableDefinition<'static, (u64, &'static str), u64> = TableDefinition::new("namespaces");
const ENTRIES: TableDefinition<'static, (u64, &'static str), &'static [u8]> = TableDefinition::new("entries");
const SEQUENCES: TableDefinition<'static, u64, u64> = TableDefinition::new("sequences");

/// The root namespace's sequence row doubles as the namespace-id allocator;
/// issued namespace ids therefore start at 1.
const NS_ALLOCATOR: u64 = 0;

const OPEN_LOCK_WAIT: Duration = Duration::from_secs(1);
const OPEN_LOCK_RETRY: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NamespaceId(u64);

pub const ROOT: NamespaceId = NamespaceId(0);

/// Single-file transactional store with nested namespaces.
///
/// All mutations go through [`Store::update`] and run inside one serialized
/// write transaction; [`Store::view`] provides concurrent read snapshots.
pub struct Store {
    db: Database,
}

impl Store {
    /// Opens (creating if needed) the store file, waiting at most about one
    /// second for a file lock held by another process.
    pub fn open(path: &Utf8Path) -> Result<Self, StoreError> {
        let deadline = Instant::now() + OPEN_LOCK_WAIT;

        let db = loop {
            match Database::create(path.as_std_path()) {
                Ok(db) => break db,
                Err(error) if is_lock_contention(&error) && Instant::now() < deadline => {
                    std::thread::sleep(OPEN_LOCK_RETRY);
                }
                Err(error) => return Err(StoreError::io(error)),
            }
        };

        let store = Store { db };

        // Create the tables and the namespace-id allocator up front so that
        // read transactions never observe a missing table.
        store.update(|w| {
            let _ = w.txn.open_table(NAMESPACES).map_err(StoreError::io)?;
            let _ = w.txn.open_table(ENTRIES).map_err(StoreError::io)?;
            let mut sequences = w.txn.open_table(SEQUENCES).map_err(StoreError::io)?;
            let allocator = sequences.get(NS_ALLOCATOR).map_err(StoreError::io)?.map(|g| g.value());
            if allocator.is_none() {
                sequences.insert(NS_ALLOCATOR, 1).map_err(StoreError::io)?;
            }
            Ok::<(), StoreError>(())
        })?;

        Ok(store)
    }

    /// Runs `f` inside a read-write transaction; the transaction commits when
    /// `f` returns `Ok` and aborts otherwise.
    pub fn update<T, E>(&self, f: impl FnOnce(&mut StoreWriter<'_>) -> Result<T, E>) -> Result<T, E>
    where
        E: From<StoreError>,
    {
        let txn = self.db.begin_write().map_err(|e| E::from(StoreError::io(e)))?;
        let mut writer = StoreWriter { txn: &txn };
        let out = f(&mut writer)?;
        txn.commit().map_err(|e| E::from(StoreError::io(e)))?;
        Ok(out)
    }

    /// Runs `f` against a read-only snapshot.
    pub fn view<T, E>(&self, f: impl FnOnce(&StoreReader) -> Result<T, E>) -> Result<T, E>
    where
        E: From<StoreError>,
    {
        let txn = self.db.begin_read().map_err(|e| E::from(StoreError::io(e)))?;
        let reader = StoreReader { txn };
        f(&reader)
    }
}

fn is_lock_contention(error: &DatabaseError) -> bool {
    match error {
        DatabaseError::DatabaseAlreadyOpen => true,
        DatabaseError::Storage(StorageError::Io(io)) => io.kind() == std::io::ErrorKind::WouldBlock,
        _ => false,
    }
}

/// Read operations shared by [`StoreReader`] and [`StoreWriter`].
pub trait StoreRead {
    fn namespace(&self, parent: NamespaceId, name: &str) -> Result<Option<NamespaceId>, StoreError>;

    fn get(&self, ns: NamespaceId, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Visits entries of `ns` in key order until the visitor breaks or fails.
    fn for_each<E, F>(&self, ns: NamespaceId, visit: F) -> Result<(), E>
    where
        E: From<StoreError>,
        F: FnMut(&str, &[u8]) -> Result<ControlFlow<()>, E>;

    /// Visits child namespaces of `parent` in name order.
    fn for_each_namespace<E, F>(&self, parent: NamespaceId, visit: F) -> Result<(), E>
    where
        E: From<StoreError>,
        F: FnMut(&str, NamespaceId) -> Result<ControlFlow<()>, E>;
}

pub struct StoreWriter<'txn> {
    txn: &'txn WriteTransaction,
}

impl StoreWriter<'_> {
    /// Creates a child namespace, failing with [`StoreError::AlreadyExists`]
    /// when `parent` already has a child of that name.
    pub fn create_namespace(&mut self, parent: NamespaceId, name: &str) -> Result<NamespaceId, StoreError> {
        let mut namespaces = self.txn.open_table(NAMESPACES).map_err(StoreError::io)?;

        if namespaces.get((parent.0, name)).map_err(StoreError::io)?.is_some() {
            return Err(StoreError::AlreadyExists);
        }

        let id = {
            let mut sequences = self.txn.open_table(SEQUENCES).map_err(StoreError::io)?;
            let next = sequences
                .get(NS_ALLOCATOR)
                .map_err(StoreError::io)?
                .map(|g| g.value())
                .unwrap_or(1);
            sequences.insert(NS_ALLOCATOR, next + 1).map_err(StoreError::io)?;
            next
        };

        namespaces.insert((parent.0, name), id).map_err(StoreError::io)?;

        Ok(NamespaceId(id))
    }

    /// Create-or-get; never fails on an existing namespace.
    pub fn ensure_namespace(&mut self, parent: NamespaceId, name: &str) -> Result<NamespaceId, StoreError> {
        match self.create_namespace(parent, name) {
            Ok(ns) => Ok(ns),
            Err(StoreError::AlreadyExists) => self
                .namespace(parent, name)?
                .ok_or_else(|| StoreError::io("namespace disappeared during ensure")),
            Err(error) => Err(error),
        }
    }

    pub fn put(&mut self, ns: NamespaceId, key: &str, value: &[u8]) -> Result<(), StoreError> {
        let mut entries = self.txn.open_table(ENTRIES).map_err(StoreError::io)?;
        entries.insert((ns.0, key), value).map_err(StoreError::io)?;
        Ok(())
    }

    pub fn delete(&mut self, ns: NamespaceId, key: &str) -> Result<(), StoreError> {
        let mut entries = self.txn.open_table(ENTRIES).map_err(StoreError::io)?;
        entries.remove((ns.0, key)).map_err(StoreError::io)?;
        Ok(())
    }

    /// Returns the current sequence value of `ns` and advances it; after
    /// `set_sequence(n)` the next call returns `n`.
    pub fn next_sequence(&mut self, ns: NamespaceId) -> Result<u64, StoreError> {
        let mut sequences = self.txn.open_table(SEQUENCES).map_err(StoreError::io)?;
        let current = sequences.get(ns.0).map_err(StoreError::io)?.map(|g| g.value()).unwrap_or(0);
        sequences.insert(ns.0, current + 1).map_err(StoreError::io)?;
        Ok(current)
    }

    pub fn set_sequence(&mut self, ns: NamespaceId, value: u64) -> Result<(), StoreError> {
        let mut sequences = self.txn.open_table(SEQUENCES).map_err(StoreError::io)?;
        sequences.insert(ns.0, value).map_err(StoreError::io)?;
        Ok(())
    }
}

impl StoreRead for StoreWriter<'_> {
    fn namespace(&self, parent: NamespaceId, name: &str) -> Result<Option<NamespaceId>, StoreError> {
        let namespaces = self.txn.open_table(NAMESPACES).map_err(StoreError::io)?;
        lookup_namespace(&namespaces, parent, name)
    }

    fn get(&self, ns: NamespaceId, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let entries = self.txn.open_table(ENTRIES).map_err(StoreError::io)?;
        get_entry(&entries, ns, key)
    }

    fn for_each<E, F>(&self, ns: NamespaceId, visit: F) -> Result<(), E>
    where
        E: From<StoreError>,
        F: FnMut(&str, &[u8]) -> Result<ControlFlow<()>, E>,
    {
        let entries = self.txn.open_table(ENTRIES).map_err(|e| E::from(StoreError::io(e)))?;
        scan_entries(&entries, ns, visit)
    }

    fn for_each_namespace<E, F>(&self, parent: NamespaceId, visit: F) -> Result<(), E>
    where
        E: From<StoreError>,
        F: FnMut(&str, NamespaceId) -> Result<ControlFlow<()>, E>,
    {
        let namespaces = self.txn.open_table(NAMESPACES).map_err(|e| E::from(StoreError::io(e)))?;
        scan_namespaces(&namespaces, parent, visit)
    }
}

pub struct StoreReader {
    txn: ReadTransaction,
}

impl StoreRead for StoreReader {
    fn namespace(&self, parent: NamespaceId, name: &str) -> Result<Option<NamespaceId>, StoreError> {
        let namespaces = self.txn.open_table(NAMESPACES).map_err(StoreError::io)?;
        lookup_namespace(&namespaces, parent, name)
    }

    fn get(&self, ns: NamespaceId, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let entries = self.txn.open_table(ENTRIES).map_err(StoreError::io)?;
        get_entry(&entries, ns, key)
    }

    fn for_each<E, F>(&self, ns: NamespaceId, visit: F) -> Result<(), E>
    where
        E: From<StoreError>,
        F: FnMut(&str, &[u8]) -> Result<ControlFlow<()>, E>,
    {
        let entries = self.txn.open_table(ENTRIES).map_err(|e| E::from(StoreError::io(e)))?;
        scan_entries(&entries, ns, visit)
    }

    fn for_each_namespace<E, F>(&self, parent: NamespaceId, visit: F) -> Result<(), E>
    where
        E: From<StoreError>,
        F: FnMut(&str, NamespaceId) -> Result<ControlFlow<()>, E>,
    {
        let namespaces = self.txn.open_table(NAMESPACES).map_err(|e| E::from(StoreError::io(e)))?;
        scan_namespaces(&namespaces, parent, visit)
    }
}

fn lookup_namespace(
    table: &impl ReadableTable<(u64, &'static str), u64>,
    parent: NamespaceId,
    name: &str,
) -> Result<Option<NamespaceId>, StoreError> {
    let guard = table.get((parent.0, name)).map_err(StoreError::io)?;
    Ok(guard.map(|g| NamespaceId(g.value())))
}

fn get_entry(
    table: &impl ReadableTable<(u64, &'static str), &'static [u8]>,
    ns: NamespaceId,
    key: &str,
) -> Result<Option<Vec<u8>>, StoreError> {
    let guard = table.get((ns.0, key)).map_err(StoreError::io)?;
    Ok(guard.map(|g| g.value().to_vec()))
}

fn scan_entries<E, F>(
    table: &impl ReadableTable<(u64, &'static str), &'static [u8]>,
    ns: NamespaceId,
    mut visit: F,
) -> Result<(), E>
where
    E: From<StoreError>,
    F: FnMut(&str, &[u8]) -> Result<ControlFlow<()>, E>,
{
    let range = table
        .range((ns.0, "")..(ns.0 + 1, ""))
        .map_err(|e| E::from(StoreError::io(e)))?;

    for entry in range {
        let (key, value) = entry.map_err(|e| E::from(StoreError::io(e)))?;
        let (_, key) = key.value();
        if let ControlFlow::Break(()) = visit(key, value.value())? {
            break;
        }
    }

    Ok(())
}

fn scan_namespaces<E, F>(
    table: &impl ReadableTable<(u64, &'static str), u64>,
    parent: NamespaceId,
    mut visit: F,
) -> Result<(), E>
where
    E: From<StoreError>,
    F: FnMut(&str, NamespaceId) -> Result<ControlFlow<()>, E>,
{
    let range = table
        .range((parent.0, "")..(parent.0 + 1, ""))
        .map_err(|e| E::from(StoreError::io(e)))?;

    for entry in range {
        let (key, value) = entry.map_err(|e| E::from(StoreError::io(e)))?;
        let (_, name) = key.value();
        if let ControlFlow::Break(()) = visit(name, NamespaceId(value.value()))? {
            break;
        }
    }

    Ok(())
}
