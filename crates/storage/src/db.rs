//! RocksDB wrapper with column families for sync data
//!
//! One database holds both persistent keyspaces of the downloader: trie
//! nodes in the `state` column family and contract code in the `code`
//! column family. Each column family is exposed as an independent
//! [`SnapshotableStore`] whose pending overlay is flushed through a RocksDB
//! write batch on commit.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use rocksdb::{
    BoundColumnFamily, ColumnFamilyDescriptor, DBWithThreadMode, MultiThreaded, Options,
    WriteBatchWithTransaction,
};
use tracing::{debug, info};

use crate::store::SnapshotableStore;
use crate::{Hash, Result, StorageError};

/// Column family names
pub mod cf {
    /// State column family - trie nodes keyed by their Keccak256 digest
    pub const STATE: &str = "state";
    /// Code column family - contract code blobs plus the progress record
    pub const CODE: &str = "code";

    /// All column families
    pub const ALL: &[&str] = &[STATE, CODE];
}

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Path to the database directory
    pub path: String,
    /// Enable compression (LZ4)
    pub enable_compression: bool,
    /// Maximum number of open files
    pub max_open_files: i32,
    /// Write buffer size in bytes
    pub write_buffer_size: usize,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: String::from("./data/fastsync"),
            enable_compression: true,
            max_open_files: 512,
            write_buffer_size: 64 * 1024 * 1024, // 64 MB
        }
    }
}

/// RocksDB wrapper with the sync column families
pub struct Database {
    inner: DBWithThreadMode<MultiThreaded>,
    config: DatabaseConfig,
}

impl Database {
    /// Open or create a database at the configured path
    pub fn open(config: DatabaseConfig) -> Result<Self> {
        info!("Opening database at: {}", config.path);

        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);
        opts.set_max_open_files(config.max_open_files);
        opts.set_write_buffer_size(config.write_buffer_size);
        if config.enable_compression {
            opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        }

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = cf::ALL
            .iter()
            .map(|name| {
                let mut cf_opts = Options::default();
                if config.enable_compression {
                    cf_opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
                }
                ColumnFamilyDescriptor::new(*name, cf_opts)
            })
            .collect();

        let path = Path::new(&config.path);
        let db = DBWithThreadMode::<MultiThreaded>::open_cf_descriptors(&opts, path, cf_descriptors)
            .map_err(|e| StorageError::Database(e.to_string()))?;

        Ok(Self { inner: db, config })
    }

    /// Open a database with default configuration at the given path
    pub fn open_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config = DatabaseConfig {
            path: path.as_ref().to_string_lossy().to_string(),
            ..Default::default()
        };
        Self::open(config)
    }

    /// Get a column family handle
    fn cf_handle(&self, name: &str) -> Result<Arc<BoundColumnFamily<'_>>> {
        self.inner
            .cf_handle(name)
            .ok_or_else(|| StorageError::ColumnFamilyNotFound(name.to_string()))
    }

    /// Get a value from a column family
    pub fn get(&self, cf_name: &str, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let cf = self.cf_handle(cf_name)?;
        self.inner
            .get_cf(&cf, key)
            .map_err(|e| StorageError::Database(e.to_string()))
    }

    /// Write a set of key-value pairs atomically into one column family
    pub fn write_batch(&self, cf_name: &str, entries: &HashMap<Vec<u8>, Vec<u8>>) -> Result<()> {
        let cf = self.cf_handle(cf_name)?;
        let mut batch = WriteBatchWithTransaction::<false>::default();
        for (key, value) in entries {
            batch.put_cf(&cf, key, value);
        }
        self.inner
            .write(batch)
            .map_err(|e| StorageError::Database(e.to_string()))
    }

    /// Get the path to the database
    pub fn path(&self) -> &str {
        &self.config.path
    }
}

/// A [`SnapshotableStore`] over one column family of a shared [`Database`].
///
/// Writes are buffered in an in-memory overlay and flushed through a single
/// RocksDB write batch on [`commit`](SnapshotableStore::commit), so a batch
/// of node saves becomes durable as a unit.
pub struct RocksStore {
    db: Arc<Database>,
    cf_name: &'static str,
    pending: HashMap<Vec<u8>, Vec<u8>>,
}

impl RocksStore {
    /// Create a store over the given column family.
    pub fn new(db: Arc<Database>, cf_name: &'static str) -> Self {
        Self {
            db,
            cf_name,
            pending: HashMap::new(),
        }
    }

    /// Store over the `state` column family.
    pub fn state(db: Arc<Database>) -> Self {
        Self::new(db, cf::STATE)
    }

    /// Store over the `code` column family.
    pub fn code(db: Arc<Database>) -> Self {
        Self::new(db, cf::CODE)
    }

    fn lookup(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        if let Some(value) = self.pending.get(key) {
            return Ok(Some(value.clone()));
        }
        self.db.get(self.cf_name, key)
    }
}

impl SnapshotableStore for RocksStore {
    fn get(&self, key: &Hash) -> Result<Option<Vec<u8>>> {
        self.lookup(key.as_slice())
    }

    fn set(&mut self, key: Hash, value: Vec<u8>) {
        self.pending.insert(key.to_vec(), value);
    }

    fn key_exists(&self, key: &Hash) -> Result<bool> {
        Ok(self.lookup(key.as_slice())?.is_some())
    }

    fn get_indexed(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.lookup(key)
    }

    fn put_indexed(&mut self, key: &[u8], value: Vec<u8>) {
        self.pending.insert(key.to_vec(), value);
    }

    fn commit(&mut self) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        self.db.write_batch(self.cf_name, &self.pending)?;
        debug!(
            "Committed {} entries to column family {}",
            self.pending.len(),
            self.cf_name
        );
        self.pending.clear();
        Ok(())
    }

    fn pending_len(&self) -> usize {
        self.pending.len()
    }
}
