//! RocksDB-backed store for the sync queues and the chain tip.

use crate::{StorageError, StorageResult};
use rocksdb::{ColumnFamilyDescriptor, DBWithThreadMode, MultiThreaded, Options, WriteBatch};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Column families for organizing data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnFamily {
    /// Pending blocks keyed by big-endian block number.
    BlockQueue,
    /// Hashes of all pending blocks.
    HashSet,
    /// Ordered hashes awaiting block retrieval.
    HashStore,
    /// Chain tip and other node metadata.
    Metadata,
    /// Default column family (required by RocksDB).
    Default,
}

impl ColumnFamily {
    fn name(&self) -> &'static str {
        match self {
            ColumnFamily::BlockQueue => "blockqueue",
            ColumnFamily::HashSet => "hashset",
            ColumnFamily::HashStore => "hashstore",
            ColumnFamily::Metadata => "metadata",
            ColumnFamily::Default => "default",
        }
    }

    fn all() -> &'static [ColumnFamily] {
        &[
            ColumnFamily::BlockQueue,
            ColumnFamily::HashSet,
            ColumnFamily::HashStore,
            ColumnFamily::Metadata,
            ColumnFamily::Default,
        ]
    }
}

/// Store handle shared by the queues and the chain tip tracker.
///
/// Opened exactly once per process; clones share the underlying
/// RocksDB instance. Reads are point lookups and whole-family scans
/// used to rebuild the in-memory mirrors on startup; every multi-key
/// update goes through [`Database::commit`] so a mutation either lands
/// completely or not at all.
#[derive(Clone)]
pub struct Database {
    db: Arc<DBWithThreadMode<MultiThreaded>>,
}

impl Database {
    /// Open or create a database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> StorageResult<Self> {
        let path = path.as_ref();
        info!("Opening database at {:?}", path);

        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);
        opts.set_max_open_files(256);
        opts.set_keep_log_file_num(1);

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = ColumnFamily::all()
            .iter()
            .map(|cf| {
                let mut cf_opts = Options::default();
                cf_opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
                ColumnFamilyDescriptor::new(cf.name(), cf_opts)
            })
            .collect();

        let db =
            DBWithThreadMode::<MultiThreaded>::open_cf_descriptors(&opts, path, cf_descriptors)?;

        debug!("Database opened successfully");

        Ok(Self { db: Arc::new(db) })
    }

    fn handle(&self, cf: ColumnFamily) -> StorageResult<Arc<rocksdb::BoundColumnFamily<'_>>> {
        self.db
            .cf_handle(cf.name())
            .ok_or_else(|| StorageError::ColumnFamilyNotFound(cf.name().to_string()))
    }

    /// Read a single value.
    pub fn get(&self, cf: ColumnFamily, key: &[u8]) -> StorageResult<Option<Vec<u8>>> {
        Ok(self.db.get_cf(&self.handle(cf)?, key)?)
    }

    /// All keys of a column family. Used on open to rebuild the block
    /// index and the pending-hash set from what survived a restart.
    pub fn keys(&self, cf: ColumnFamily) -> StorageResult<Vec<Vec<u8>>> {
        let handle = self.handle(cf)?;
        let mut keys = Vec::new();
        for entry in self.db.iterator_cf(&handle, rocksdb::IteratorMode::Start) {
            let (key, _) = entry?;
            keys.push(key.to_vec());
        }
        Ok(keys)
    }

    /// All entries of a column family. Used on open where the values
    /// matter too, such as restoring retrieval order.
    pub fn entries(&self, cf: ColumnFamily) -> StorageResult<Vec<(Vec<u8>, Vec<u8>)>> {
        let handle = self.handle(cf)?;
        let mut entries = Vec::new();
        for entry in self.db.iterator_cf(&handle, rocksdb::IteratorMode::Start) {
            let (key, value) = entry?;
            entries.push((key.to_vec(), value.to_vec()));
        }
        Ok(entries)
    }

    /// Stage writes through the closure and apply them atomically.
    pub fn commit(&self, build: impl FnOnce(&mut Commit<'_>)) -> StorageResult<()> {
        let mut commit = Commit {
            db: self,
            batch: WriteBatch::default(),
            error: None,
        };
        build(&mut commit);

        let Commit { batch, error, .. } = commit;
        if let Some(error) = error {
            return Err(error);
        }
        self.db.write(batch)?;
        Ok(())
    }

    /// Drop every entry of a column family in one write. Returns how
    /// many entries were removed.
    pub fn clear(&self, cf: ColumnFamily) -> StorageResult<usize> {
        let keys = self.keys(cf)?;
        if keys.is_empty() {
            return Ok(0);
        }
        self.commit(|commit| {
            for key in &keys {
                commit.delete(cf, key);
            }
        })?;
        Ok(keys.len())
    }
}

/// One atomic write set under construction.
///
/// Staging never touches the store; the batch lands when the enclosing
/// [`Database::commit`] call returns.
pub struct Commit<'a> {
    db: &'a Database,
    batch: WriteBatch,
    error: Option<StorageError>,
}

impl Commit<'_> {
    /// Stage a put.
    pub fn put(&mut self, cf: ColumnFamily, key: impl AsRef<[u8]>, value: impl AsRef<[u8]>) {
        match self.db.handle(cf) {
            Ok(handle) => self.batch.put_cf(&handle, key, value),
            Err(error) => {
                if self.error.is_none() {
                    self.error = Some(error);
                }
            }
        }
    }

    /// Stage a delete.
    pub fn delete(&mut self, cf: ColumnFamily, key: impl AsRef<[u8]>) {
        match self.db.handle(cf) {
            Ok(handle) => self.batch.delete_cf(&handle, key),
            Err(error) => {
                if self.error.is_none() {
                    self.error = Some(error);
                }
            }
        }
    }
}
