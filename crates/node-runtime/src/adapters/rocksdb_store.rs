//! # RocksDB Storage Adapter
//!
//! Production implementation of the column-store port: one column family
//! per keyspace, atomic multi-CF write batches, Snappy compression, bloom
//! filters for point reads, and a free-disk guard before every batch.

use fs2::{available_space, total_space};
use rocksdb::{ColumnFamilyDescriptor, Options, WriteBatch as RocksBatch, WriteOptions, DB};
use shared_types::storage::{BatchOp, Column, ColumnStore, WriteBatch};
use shared_types::StoreError;
use std::path::{Path, PathBuf};
use tracing::info;

/// Tuning knobs for the database.
#[derive(Debug, Clone)]
pub struct RocksDbConfig {
    pub path: PathBuf,
    /// Block cache size in bytes.
    pub block_cache_size: usize,
    /// Write buffer size in bytes.
    pub write_buffer_size: usize,
    pub max_write_buffer_number: i32,
    /// fsync after each batch.
    pub sync_writes: bool,
    /// Refuse writes when free disk drops below this percentage.
    pub min_free_disk_percent: u8,
}

impl RocksDbConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            block_cache_size: 256 * 1024 * 1024,
            write_buffer_size: 64 * 1024 * 1024,
            max_write_buffer_number: 3,
            sync_writes: true,
            min_free_disk_percent: 5,
        }
    }

    /// Small buffers, no fsync: test profile.
    pub fn for_testing(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            block_cache_size: 8 * 1024 * 1024,
            write_buffer_size: 4 * 1024 * 1024,
            max_write_buffer_number: 2,
            sync_writes: false,
            min_free_disk_percent: 0,
        }
    }
}

/// RocksDB-backed column store.
pub struct RocksDbStore {
    db: DB,
    config: RocksDbConfig,
}

impl RocksDbStore {
    /// Open or create the database with all column families.
    pub fn open(config: RocksDbConfig) -> Result<Self, StoreError> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);
        opts.set_write_buffer_size(config.write_buffer_size);
        opts.set_max_write_buffer_number(config.max_write_buffer_number);
        opts.set_compression_type(rocksdb::DBCompressionType::Snappy);

        let mut block_opts = rocksdb::BlockBasedOptions::default();
        block_opts.set_bloom_filter(10.0, false);
        block_opts.set_block_cache(&rocksdb::Cache::new_lru_cache(config.block_cache_size));
        opts.set_block_based_table_factory(&block_opts);

        let descriptors: Vec<ColumnFamilyDescriptor> = Column::ALL
            .iter()
            .map(|column| {
                let mut cf_opts = Options::default();
                cf_opts.set_compression_type(rocksdb::DBCompressionType::Snappy);
                ColumnFamilyDescriptor::new(column.name(), cf_opts)
            })
            .collect();

        let db = DB::open_cf_descriptors(&opts, &config.path, descriptors)
            .map_err(|e| StoreError::Io(format!("open rocksdb: {e}")))?;

        info!(path = %config.path.display(), "rocksdb opened");
        Ok(Self { db, config })
    }

    fn cf(&self, column: Column) -> Result<&rocksdb::ColumnFamily, StoreError> {
        self.db
            .cf_handle(column.name())
            .ok_or_else(|| StoreError::Io(format!("missing column family {}", column.name())))
    }

    fn check_disk_space(&self) -> Result<(), StoreError> {
        if self.config.min_free_disk_percent == 0 {
            return Ok(());
        }
        let path: &Path = &self.config.path;
        let free = available_space(path).map_err(|e| StoreError::Io(e.to_string()))?;
        let total = total_space(path).map_err(|e| StoreError::Io(e.to_string()))?;
        if total == 0 {
            return Err(StoreError::Io("cannot determine disk space".into()));
        }
        let percent = (free as f64 / total as f64 * 100.0) as u8;
        if percent < self.config.min_free_disk_percent {
            return Err(StoreError::Io(format!(
                "only {percent}% disk free, refusing writes"
            )));
        }
        Ok(())
    }
}

impl ColumnStore for RocksDbStore {
    fn get(&self, column: Column, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        let cf = self.cf(column)?;
        self.db
            .get_cf(cf, key)
            .map_err(|e| StoreError::Io(format!("rocksdb get: {e}")))
    }

    fn write(&self, batch: WriteBatch) -> Result<(), StoreError> {
        self.check_disk_space()?;

        let mut rocks_batch = RocksBatch::default();
        for op in batch.into_ops() {
            match op {
                BatchOp::Put { column, key, value } => {
                    rocks_batch.put_cf(self.cf(column)?, key, value);
                }
                BatchOp::Delete { column, key } => {
                    rocks_batch.delete_cf(self.cf(column)?, key);
                }
            }
        }

        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(self.config.sync_writes);
        self.db
            .write_opt(rocks_batch, &write_opts)
            .map_err(|e| StoreError::Io(format!("rocksdb batch write: {e}")))
    }
}
