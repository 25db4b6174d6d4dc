//! Chunked page storage
//!
//! Payloads are split into fixed-size 2 MiB pages stored as individually
//! addressable backend records. Page keys derive from the blob id and chunk
//! index; the blob record's key list is authoritative for order. Page I/O
//! fans out in parallel with a bounded concurrency.

use std::collections::HashMap;
use std::error::Error;
use std::fmt;
use std::sync::Mutex;

use futures::stream::{self, StreamExt, TryStreamExt};
use futures::FutureExt;

use crate::backend::{BackendError, StorageBackend};

/// Fixed page size: 2 MiB
pub const PAGE_SIZE: usize = 2 * 1024 * 1024;

/// Default parallel fan-out for page reads and writes
pub const DEFAULT_FAN_OUT: usize = 8;

/// Key of chunk `index` of a blob
///
/// Zero-padded so that prefix listing returns pages in chunk order.
pub fn page_key(blob_id: &str, index: usize) -> String {
	format!("{}/{:06}", blob_id, index)
}

/// Error type for page operations
#[derive(Debug)]
pub enum PageError {
	/// A referenced page key is missing from the backend
	NotFound { key: String },

	/// Range request outside the blob
	OutOfBounds { offset: u64, length: u64, size: u64 },

	/// Backend failure (nested)
	Backend(BackendError),
}

impl fmt::Display for PageError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			PageError::NotFound { key } => write!(f, "Page not found: {}", key),
			PageError::OutOfBounds { offset, length, size } => {
				write!(f, "Range {}+{} out of bounds for size {}", offset, length, size)
			}
			PageError::Backend(e) => write!(f, "Backend error: {}", e),
		}
	}
}

impl Error for PageError {}

impl From<BackendError> for PageError {
	fn from(e: BackendError) -> Self {
		PageError::Backend(e)
	}
}

/// Blob-level metadata assembled from the page layer
#[derive(Debug, Clone, PartialEq)]
pub struct PageMetadata {
	pub blob_id: String,
	pub total_size: u64,
	pub chunk_count: usize,
	pub page_keys: Vec<String>,
}

/// Page store: splitting, parallel I/O, range access and the size cache
///
/// The store itself is stateless apart from the size cache; the backend a
/// blob lives on is chosen per call by tier placement.
pub struct PageStore {
	fan_out: usize,
	sizes: Mutex<HashMap<String, u64>>,
}

impl Default for PageStore {
	fn default() -> Self {
		Self::new(DEFAULT_FAN_OUT)
	}
}

impl PageStore {
	pub fn new(fan_out: usize) -> Self {
		PageStore { fan_out: fan_out.max(1), sizes: Mutex::new(HashMap::new()) }
	}

	fn lock_sizes(&self) -> std::sync::MutexGuard<'_, HashMap<String, u64>> {
		self.sizes.lock().unwrap_or_else(|poison| poison.into_inner())
	}

	/// Cache the total size of a blob
	pub fn cache_size(&self, blob_id: &str, size: u64) {
		self.lock_sizes().insert(blob_id.to_string(), size);
	}

	/// Drop the cached size of a blob
	pub fn evict_size(&self, blob_id: &str) {
		self.lock_sizes().remove(blob_id);
	}

	/// Split a payload into pages and write them in parallel
	///
	/// Empty payloads produce an empty key list. The total size is cached
	/// against the blob id.
	pub async fn write_pages(
		&self,
		backend: &dyn StorageBackend,
		blob_id: &str,
		bytes: &[u8],
	) -> Result<Vec<String>, PageError> {
		let jobs: Vec<(String, &[u8])> = bytes
			.chunks(PAGE_SIZE)
			.enumerate()
			.map(|(index, chunk)| (page_key(blob_id, index), chunk))
			.collect();
		let keys: Vec<String> = jobs.iter().map(|(key, _)| key.clone()).collect();

		stream::iter(jobs)
			.map(|(key, chunk)| {
				async move { backend.put(&key, chunk).await.map_err(PageError::Backend) }.boxed()
			})
			.buffer_unordered(self.fan_out)
			.try_collect::<Vec<()>>()
			.await?;

		self.cache_size(blob_id, bytes.len() as u64);
		Ok(keys)
	}

	/// Fetch all pages in parallel and concatenate them in key order
	pub async fn read_pages(
		&self,
		backend: &dyn StorageBackend,
		keys: &[String],
	) -> Result<Vec<u8>, PageError> {
		let chunks: Vec<Vec<u8>> = stream::iter(keys)
			.map(|key| {
				async move {
					backend
						.get(key)
						.await
						.map_err(PageError::Backend)?
						.ok_or_else(|| PageError::NotFound { key: key.clone() })
				}
				.boxed()
			})
			.buffered(self.fan_out)
			.try_collect()
			.await?;
		Ok(chunks.concat())
	}

	/// Read `length` bytes starting at `offset`, touching only the pages
	/// that intersect the range
	pub async fn read_range(
		&self,
		backend: &dyn StorageBackend,
		blob_id: &str,
		keys: &[String],
		offset: u64,
		length: u64,
	) -> Result<Vec<u8>, PageError> {
		let total = self.get_total_size(backend, blob_id, keys).await?;
		if offset + length > total {
			return Err(PageError::OutOfBounds { offset, length, size: total });
		}
		if length == 0 {
			return Ok(Vec::new());
		}

		let page = PAGE_SIZE as u64;
		let first = (offset / page) as usize;
		let last = ((offset + length - 1) / page) as usize;

		let assembled = self.read_pages(backend, &keys[first..=last]).await?;
		let skip = (offset - first as u64 * page) as usize;
		Ok(assembled[skip..skip + length as usize].to_vec())
	}

	/// In-place overwrite of `data` at `offset`
	///
	/// Read-modify-write of each affected page; untouched pages are left
	/// alone and every page keeps its size.
	pub async fn update_range(
		&self,
		backend: &dyn StorageBackend,
		blob_id: &str,
		keys: &[String],
		offset: u64,
		data: &[u8],
	) -> Result<(), PageError> {
		if data.is_empty() {
			return Ok(());
		}
		let total = self.get_total_size(backend, blob_id, keys).await?;
		let length = data.len() as u64;
		if offset + length > total {
			return Err(PageError::OutOfBounds { offset, length, size: total });
		}

		let page = PAGE_SIZE as u64;
		let first = (offset / page) as usize;
		let last = ((offset + length - 1) / page) as usize;

		stream::iter(first..=last)
			.map(|index| {
				let key = &keys[index];
				async move {
					let mut chunk = backend
						.get(key)
						.await
						.map_err(PageError::Backend)?
						.ok_or_else(|| PageError::NotFound { key: key.clone() })?;

					let chunk_start = index as u64 * page;
					let start = offset.max(chunk_start);
					let end = (offset + length).min(chunk_start + chunk.len() as u64);
					let cs = (start - chunk_start) as usize;
					let ce = (end - chunk_start) as usize;
					let ds = (start - offset) as usize;
					let de = (end - offset) as usize;
					chunk[cs..ce].copy_from_slice(&data[ds..de]);

					backend.put(key, &chunk).await.map_err(PageError::Backend)
				}
			})
			.buffer_unordered(self.fan_out)
			.try_collect::<Vec<()>>()
			.await?;
		Ok(())
	}

	/// Delete pages; idempotent, missing keys are silently ignored
	pub async fn delete_pages(
		&self,
		backend: &dyn StorageBackend,
		keys: &[String],
	) -> Result<(), PageError> {
		if keys.is_empty() {
			return Ok(());
		}
		stream::iter(keys)
			.map(|key| async move {
				backend.delete(key).await.map(|_| ()).map_err(PageError::Backend)
			})
			.buffer_unordered(self.fan_out)
			.try_collect::<Vec<()>>()
			.await?;
		Ok(())
	}

	/// Total byte count of a blob, from cache when possible
	///
	/// On a cache miss every page length is fetched in parallel, summed and
	/// cached.
	pub async fn get_total_size(
		&self,
		backend: &dyn StorageBackend,
		blob_id: &str,
		keys: &[String],
	) -> Result<u64, PageError> {
		if let Some(size) = self.lock_sizes().get(blob_id).copied() {
			return Ok(size);
		}

		let lengths: Vec<u64> = stream::iter(keys)
			.map(|key| async move {
				backend
					.get(key)
					.await
					.map_err(PageError::Backend)?
					.map(|bytes| bytes.len() as u64)
					.ok_or_else(|| PageError::NotFound { key: key.clone() })
			})
			.buffered(self.fan_out)
			.try_collect()
			.await?;

		let total = lengths.iter().sum();
		self.cache_size(blob_id, total);
		Ok(total)
	}

	/// Blob-level metadata snapshot
	pub async fn get_metadata(
		&self,
		backend: &dyn StorageBackend,
		blob_id: &str,
		keys: &[String],
	) -> Result<PageMetadata, PageError> {
		let total_size = self.get_total_size(backend, blob_id, keys).await?;
		Ok(PageMetadata {
			blob_id: blob_id.to_string(),
			total_size,
			chunk_count: keys.len(),
			page_keys: keys.to_vec(),
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::backend::MemoryBackend;

	fn pattern(len: usize) -> Vec<u8> {
		(0..len).map(|i| (i % 256) as u8).collect()
	}

	#[tokio::test]
	async fn test_write_read_round_trip_boundaries() {
		let backend = MemoryBackend::new();
		let store = PageStore::default();

		for (i, len) in [0, 1, PAGE_SIZE - 1, PAGE_SIZE, PAGE_SIZE + 1, 3 * PAGE_SIZE]
			.iter()
			.enumerate()
		{
			let blob_id = format!("blob{}", i);
			let data = pattern(*len);
			let keys = store.write_pages(&backend, &blob_id, &data).await.unwrap();
			assert_eq!(keys.len(), (*len + PAGE_SIZE - 1) / PAGE_SIZE);
			let read = store.read_pages(&backend, &keys).await.unwrap();
			assert_eq!(read, data);
		}
	}

	#[tokio::test]
	async fn test_empty_payload_produces_no_keys() {
		let backend = MemoryBackend::new();
		let store = PageStore::default();
		let keys = store.write_pages(&backend, "empty", b"").await.unwrap();
		assert!(keys.is_empty());
		assert_eq!(store.get_total_size(&backend, "empty", &keys).await.unwrap(), 0);
	}

	#[tokio::test]
	async fn test_read_range_across_page_boundary() {
		let backend = MemoryBackend::new();
		let store = PageStore::default();
		let data = pattern(3 * PAGE_SIZE);
		let keys = store.write_pages(&backend, "b", &data).await.unwrap();

		// Spans the first and second page
		let offset = PAGE_SIZE as u64 - 512 * 1024;
		let length = 1024 * 1024u64;
		let got = store.read_range(&backend, "b", &keys, offset, length).await.unwrap();
		assert_eq!(got, &data[offset as usize..(offset + length) as usize]);

		// Single byte at the exact boundary
		let got = store.read_range(&backend, "b", &keys, PAGE_SIZE as u64, 1).await.unwrap();
		assert_eq!(got, &data[PAGE_SIZE..PAGE_SIZE + 1]);

		// At offset zero
		let got = store.read_range(&backend, "b", &keys, 0, 10).await.unwrap();
		assert_eq!(got, &data[..10]);
	}

	#[tokio::test]
	async fn test_read_range_out_of_bounds() {
		let backend = MemoryBackend::new();
		let store = PageStore::default();
		let keys = store.write_pages(&backend, "b", &pattern(100)).await.unwrap();

		assert!(matches!(
			store.read_range(&backend, "b", &keys, 90, 20).await,
			Err(PageError::OutOfBounds { .. })
		));
		assert!(matches!(
			store.read_range(&backend, "b", &keys, 200, 1).await,
			Err(PageError::OutOfBounds { .. })
		));
		// Zero-length read at the end is fine
		assert_eq!(store.read_range(&backend, "b", &keys, 100, 0).await.unwrap(), Vec::<u8>::new());
	}

	#[tokio::test]
	async fn test_update_range_preserves_untouched_pages() {
		let backend = MemoryBackend::new();
		let store = PageStore::default();
		let mut data = pattern(3 * PAGE_SIZE);
		let keys = store.write_pages(&backend, "b", &data).await.unwrap();

		let patch = vec![0xAAu8; 1000];
		let offset = PAGE_SIZE as u64 - 500;
		store.update_range(&backend, "b", &keys, offset, &patch).await.unwrap();

		data[offset as usize..offset as usize + 1000].copy_from_slice(&patch);
		let read = store.read_pages(&backend, &keys).await.unwrap();
		assert_eq!(read, data);

		// Third page untouched by the patch
		let third = backend.get(&keys[2]).await.unwrap().unwrap();
		assert_eq!(third, &data[2 * PAGE_SIZE..]);
	}

	#[tokio::test]
	async fn test_update_range_rejects_growth() {
		let backend = MemoryBackend::new();
		let store = PageStore::default();
		let keys = store.write_pages(&backend, "b", &pattern(100)).await.unwrap();
		assert!(matches!(
			store.update_range(&backend, "b", &keys, 50, &[0u8; 100]).await,
			Err(PageError::OutOfBounds { .. })
		));
	}

	#[tokio::test]
	async fn test_delete_pages_idempotent() {
		let backend = MemoryBackend::new();
		let store = PageStore::default();
		let keys = store.write_pages(&backend, "b", &pattern(PAGE_SIZE + 1)).await.unwrap();

		store.delete_pages(&backend, &keys).await.unwrap();
		// Second delete of the same keys is a no-op
		store.delete_pages(&backend, &keys).await.unwrap();
		store.delete_pages(&backend, &[]).await.unwrap();
		assert!(backend.is_empty());
	}

	#[tokio::test]
	async fn test_size_cache_and_recompute() {
		let backend = MemoryBackend::new();
		let store = PageStore::default();
		let data = pattern(PAGE_SIZE + 123);
		let keys = store.write_pages(&backend, "b", &data).await.unwrap();

		assert_eq!(store.get_total_size(&backend, "b", &keys).await.unwrap(), data.len() as u64);

		// Evict and recompute from page lengths
		store.evict_size("b");
		assert_eq!(store.get_total_size(&backend, "b", &keys).await.unwrap(), data.len() as u64);

		let meta = store.get_metadata(&backend, "b", &keys).await.unwrap();
		assert_eq!(meta.total_size, data.len() as u64);
		assert_eq!(meta.chunk_count, 2);
		assert_eq!(meta.page_keys, keys);
	}

	#[tokio::test]
	async fn test_missing_page_fails_read() {
		let backend = MemoryBackend::new();
		let store = PageStore::default();
		let keys = vec![page_key("ghost", 0)];
		assert!(matches!(
			store.read_pages(&backend, &keys).await,
			Err(PageError::NotFound { .. })
		));
	}
}

// vim: ts=4
