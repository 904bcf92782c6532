//! Storage adapters backing the column-store port.

pub mod rocksdb_store;

pub use rocksdb_store::{RocksDbConfig, RocksDbStore};
