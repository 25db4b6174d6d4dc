//! In-memory storage backend
//!
//! Used for tests and for host integrations that inject their own
//! persistence elsewhere. An optional byte quota lets tests exercise the
//! out-of-space path.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;

use super::{BackendError, BackendResult, StorageBackend};

/// BTreeMap-backed backend; keys list in lexicographic order
#[derive(Debug, Default)]
pub struct MemoryBackend {
	map: Mutex<BTreeMap<String, Vec<u8>>>,
	quota_bytes: Option<u64>,
}

impl MemoryBackend {
	pub fn new() -> Self {
		Self::default()
	}

	/// Backend that rejects writes once total stored bytes would exceed `quota`
	pub fn with_quota(quota: u64) -> Self {
		MemoryBackend { map: Mutex::new(BTreeMap::new()), quota_bytes: Some(quota) }
	}

	/// Total stored bytes
	pub fn used_bytes(&self) -> u64 {
		self.map.lock().unwrap().values().map(|v| v.len() as u64).sum()
	}

	/// Number of stored keys
	pub fn len(&self) -> usize {
		self.map.lock().unwrap().len()
	}

	pub fn is_empty(&self) -> bool {
		self.map.lock().unwrap().is_empty()
	}
}

#[async_trait]
impl StorageBackend for MemoryBackend {
	async fn put(&self, key: &str, bytes: &[u8]) -> BackendResult<()> {
		let mut map = self.map.lock().unwrap();
		if let Some(quota) = self.quota_bytes {
			let current: u64 = map
				.iter()
				.filter(|(k, _)| k.as_str() != key)
				.map(|(_, v)| v.len() as u64)
				.sum();
			if current + bytes.len() as u64 > quota {
				return Err(BackendError::Quota { key: key.to_string() });
			}
		}
		map.insert(key.to_string(), bytes.to_vec());
		Ok(())
	}

	async fn get(&self, key: &str) -> BackendResult<Option<Vec<u8>>> {
		Ok(self.map.lock().unwrap().get(key).cloned())
	}

	async fn delete(&self, key: &str) -> BackendResult<bool> {
		Ok(self.map.lock().unwrap().remove(key).is_some())
	}

	async fn list(&self, prefix: &str) -> BackendResult<Vec<(String, Vec<u8>)>> {
		let map = self.map.lock().unwrap();
		Ok(map
			.range(prefix.to_string()..)
			.take_while(|(k, _)| k.starts_with(prefix))
			.map(|(k, v)| (k.clone(), v.clone()))
			.collect())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn test_put_get_delete() {
		let backend = MemoryBackend::new();
		backend.put("a/1", b"one").await.unwrap();
		assert_eq!(backend.get("a/1").await.unwrap(), Some(b"one".to_vec()));
		assert_eq!(backend.get("a/2").await.unwrap(), None);
		assert!(backend.delete("a/1").await.unwrap());
		assert!(!backend.delete("a/1").await.unwrap());
	}

	#[tokio::test]
	async fn test_list_prefix() {
		let backend = MemoryBackend::new();
		backend.put("blob1/000000", b"x").await.unwrap();
		backend.put("blob1/000001", b"y").await.unwrap();
		backend.put("blob2/000000", b"z").await.unwrap();

		let listed = backend.list("blob1/").await.unwrap();
		assert_eq!(listed.len(), 2);
		assert_eq!(listed[0].0, "blob1/000000");
		assert_eq!(listed[1].0, "blob1/000001");
	}

	#[tokio::test]
	async fn test_quota_rejects_writes() {
		let backend = MemoryBackend::with_quota(10);
		backend.put("k1", b"12345").await.unwrap();
		let err = backend.put("k2", b"123456789").await.unwrap_err();
		assert!(err.is_quota());
		// Replacing an existing key charges only the delta
		backend.put("k1", b"1234567890").await.unwrap();
	}
}

// vim: ts=4
