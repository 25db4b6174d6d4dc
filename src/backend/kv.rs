//! Hot-tier key-value backend backed by redb
//!
//! Small payloads live in a single embedded table of opaque keys to raw
//! bytes. One write transaction per operation keeps the backend safe for
//! interleaved callers.

use std::path::Path;

use async_trait::async_trait;
use redb::{ReadableDatabase, ReadableTable, TableDefinition};

use super::{BackendError, BackendResult, StorageBackend};

/// Table of page keys to chunk bytes
const PAGES_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("pages");

/// Embedded KV backend for the hot tier
pub struct RedbBackend {
	db: redb::Database,
}

impl RedbBackend {
	/// Open or create the backing database file
	pub fn open(db_path: &Path) -> BackendResult<Self> {
		let db = redb::Database::create(db_path).map_err(BackendError::storage)?;
		// Ensure the table exists
		{
			let write_txn = db.begin_write().map_err(BackendError::storage)?;
			let _ = write_txn.open_table(PAGES_TABLE).map_err(BackendError::storage)?;
			write_txn.commit().map_err(BackendError::storage)?;
		}
		Ok(RedbBackend { db })
	}
}

#[async_trait]
impl StorageBackend for RedbBackend {
	async fn put(&self, key: &str, bytes: &[u8]) -> BackendResult<()> {
		let write_txn = self.db.begin_write().map_err(BackendError::storage)?;
		{
			let mut table = write_txn.open_table(PAGES_TABLE).map_err(BackendError::storage)?;
			table.insert(key, bytes).map_err(BackendError::storage)?;
		}
		write_txn.commit().map_err(BackendError::storage)?;
		Ok(())
	}

	async fn get(&self, key: &str) -> BackendResult<Option<Vec<u8>>> {
		let read_txn = self.db.begin_read().map_err(BackendError::storage)?;
		let table = read_txn.open_table(PAGES_TABLE).map_err(BackendError::storage)?;
		match table.get(key).map_err(BackendError::storage)? {
			Some(value) => Ok(Some(value.value().to_vec())),
			None => Ok(None),
		}
	}

	async fn delete(&self, key: &str) -> BackendResult<bool> {
		let write_txn = self.db.begin_write().map_err(BackendError::storage)?;
		let existed = {
			let mut table = write_txn.open_table(PAGES_TABLE).map_err(BackendError::storage)?;
			let removed = table.remove(key).map_err(BackendError::storage)?;
			removed.is_some()
		};
		write_txn.commit().map_err(BackendError::storage)?;
		Ok(existed)
	}

	async fn list(&self, prefix: &str) -> BackendResult<Vec<(String, Vec<u8>)>> {
		let read_txn = self.db.begin_read().map_err(BackendError::storage)?;
		let table = read_txn.open_table(PAGES_TABLE).map_err(BackendError::storage)?;

		let mut out = Vec::new();
		let mut iter = table.iter().map_err(BackendError::storage)?;
		loop {
			match iter.next() {
				Some(Ok((key, value))) => {
					let k = key.value();
					if k.starts_with(prefix) {
						out.push((k.to_string(), value.value().to_vec()));
					}
				}
				Some(Err(e)) => return Err(BackendError::storage(e)),
				None => break,
			}
		}
		Ok(out)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use tempfile::TempDir;

	#[tokio::test]
	async fn test_redb_round_trip() {
		let tmp = TempDir::new().unwrap();
		let backend = RedbBackend::open(&tmp.path().join("hot.redb")).unwrap();

		backend.put("blob/000000", b"page zero").await.unwrap();
		assert_eq!(backend.get("blob/000000").await.unwrap(), Some(b"page zero".to_vec()));
		assert_eq!(backend.get("blob/000001").await.unwrap(), None);
	}

	#[tokio::test]
	async fn test_redb_delete_and_list() {
		let tmp = TempDir::new().unwrap();
		let backend = RedbBackend::open(&tmp.path().join("hot.redb")).unwrap();

		backend.put("b1/000000", b"a").await.unwrap();
		backend.put("b1/000001", b"b").await.unwrap();
		backend.put("b2/000000", b"c").await.unwrap();

		let listed = backend.list("b1/").await.unwrap();
		assert_eq!(listed.len(), 2);

		assert!(backend.delete("b1/000000").await.unwrap());
		assert!(!backend.delete("b1/000000").await.unwrap());
		assert_eq!(backend.list("b1/").await.unwrap().len(), 1);
	}
}

// vim: ts=4
