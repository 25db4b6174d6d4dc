//! Ref-counted blob lifecycle
//!
//! A write registers its blob with refcount 1. Hard links and
//! copy-by-reference increment; unlinking decrements, and a decrement that
//! reaches zero cascades to page deletion and blob-record deletion inside
//! the caller's metadata transaction. Orphan sweep and refcount resync
//! repair divergence after a crash between metadata commit and backend
//! write.

use std::sync::Arc;

use crate::error::FsError;
use crate::logging::*;
use crate::metadata::MetadataStore;
use crate::pages::{PageError, PageStore};
use crate::tiering::TierManager;
use crate::types::{BlobRecord, Tier};
use crate::util::{checksum, new_id, now_ms};

/// Blob manager tying the metadata store, page store and placement engine
/// together
#[derive(Clone)]
pub struct BlobManager {
	store: MetadataStore,
	pages: Arc<PageStore>,
	tiers: Arc<TierManager>,
}

impl BlobManager {
	pub fn new(store: MetadataStore, pages: Arc<PageStore>, tiers: Arc<TierManager>) -> Self {
		BlobManager { store, pages, tiers }
	}

	/// Write a payload into its size-selected tier and register the blob
	/// with refcount 1
	pub async fn create_blob(&self, bytes: &[u8]) -> Result<BlobRecord, FsError> {
		let tier = self.tiers.place(bytes.len() as u64);
		let backend = self
			.tiers
			.backend_for(tier)
			.or_else(|| self.tiers.backend_for(Tier::Hot))
			.ok_or_else(|| FsError::invalid("write", "", "no backend available"))?;

		let blob_id = new_id();
		let page_keys = self.pages.write_pages(backend.as_ref(), &blob_id, bytes).await?;

		let blob = BlobRecord {
			id: blob_id,
			tier,
			size: bytes.len() as u64,
			checksum: Some(checksum(bytes)),
			created_at: now_ms(),
			ref_count: 1,
			page_keys,
		};
		self.store.register_blob(&blob)?;
		trace!("registered blob {} ({} bytes, {})", blob.id, blob.size, blob.tier);
		Ok(blob)
	}

	/// Read the whole payload, walking tiers in order when the blob's own
	/// tier misses
	pub async fn read_blob(&self, blob: &BlobRecord) -> Result<Vec<u8>, FsError> {
		if blob.page_keys.is_empty() {
			return Ok(Vec::new());
		}
		let mut last_missing: Option<PageError> = None;
		for tier in self.tiers.read_order(blob.tier) {
			let backend = match self.tiers.backend_for(tier) {
				Some(b) => b,
				None => continue,
			};
			match self.pages.read_pages(backend.as_ref(), &blob.page_keys).await {
				Ok(bytes) => {
					if tier != blob.tier {
						debug!("blob {} read from fallback tier {}", blob.id, tier);
					}
					return Ok(bytes);
				}
				Err(e @ PageError::NotFound { .. }) => last_missing = Some(e),
				Err(e) => return Err(e.into()),
			}
		}
		Err(last_missing
			.unwrap_or(PageError::NotFound { key: blob.page_keys[0].clone() })
			.into())
	}

	/// Range read with the same tier-walk fallback
	pub async fn read_blob_range(
		&self,
		blob: &BlobRecord,
		offset: u64,
		length: u64,
	) -> Result<Vec<u8>, FsError> {
		if blob.page_keys.is_empty() && offset == 0 && length == 0 {
			return Ok(Vec::new());
		}
		let mut last_missing: Option<PageError> = None;
		for tier in self.tiers.read_order(blob.tier) {
			let backend = match self.tiers.backend_for(tier) {
				Some(b) => b,
				None => continue,
			};
			match self
				.pages
				.read_range(backend.as_ref(), &blob.id, &blob.page_keys, offset, length)
				.await
			{
				Ok(bytes) => return Ok(bytes),
				Err(e @ PageError::NotFound { .. }) => last_missing = Some(e),
				Err(e) => return Err(e.into()),
			}
		}
		Err(last_missing
			.unwrap_or(PageError::OutOfBounds { offset, length, size: blob.size })
			.into())
	}

	/// In-place overwrite within the blob's current pages
	pub async fn update_blob_range(
		&self,
		blob: &BlobRecord,
		offset: u64,
		data: &[u8],
	) -> Result<(), FsError> {
		let backend = self
			.tiers
			.backend_for(blob.tier)
			.ok_or_else(|| FsError::invalid("write", "", "blob tier disabled"))?;
		self.pages
			.update_range(backend.as_ref(), &blob.id, &blob.page_keys, offset, data)
			.await?;
		Ok(())
	}

	/// Increment the refcount for a hard link or copy-by-reference
	pub fn link(&self, blob_id: &str) -> Result<i64, FsError> {
		Ok(self.store.increment_ref_count(blob_id)?)
	}

	/// Decrement the refcount; deletes pages and the blob record when it
	/// reaches zero. Returns whether the blob was deleted.
	pub async fn release(&self, blob_id: &str) -> Result<bool, FsError> {
		if !self.store.decrement_ref_count(blob_id)? {
			return Ok(false);
		}
		self.delete_blob_storage(blob_id).await?;
		Ok(true)
	}

	/// Delete pages (best effort across tiers) and the blob record
	async fn delete_blob_storage(&self, blob_id: &str) -> Result<(), FsError> {
		if let Some(blob) = self.store.get_blob(blob_id)? {
			for tier in self.tiers.read_order(blob.tier) {
				if let Some(backend) = self.tiers.backend_for(tier) {
					self.pages.delete_pages(backend.as_ref(), &blob.page_keys).await?;
				}
			}
			self.pages.evict_size(blob_id);
			self.tiers.forget_access(blob_id);
			self.store.delete_blob(blob_id)?;
			debug!("deleted blob {} ({} pages)", blob_id, blob.page_keys.len());
		}
		Ok(())
	}

	/// Delete blobs with zero refcount and no live entry reference
	pub async fn sweep_orphans(&self) -> Result<usize, FsError> {
		let orphans = self.store.list_orphan_blobs()?;
		let count = orphans.len();
		for blob in orphans {
			self.delete_blob_storage(&blob.id).await?;
		}
		if count > 0 {
			info!("swept {} orphan blobs", count);
		}
		Ok(count)
	}

	/// Set one blob's refcount to its live entry count
	pub fn resync(&self, blob_id: &str) -> Result<i64, FsError> {
		Ok(self.store.sync_blob_ref_count(blob_id)?)
	}

	/// Resync every blob; returns how many counts changed
	///
	/// Used on startup and after detected inconsistency.
	pub fn resync_all(&self) -> Result<usize, FsError> {
		let mut changed = 0;
		for blob in self.store.list_blobs()? {
			let synced = self.store.sync_blob_ref_count(&blob.id)?;
			if synced != blob.ref_count {
				warn!("blob {} refcount resynced {} -> {}", blob.id, blob.ref_count, synced);
				changed += 1;
			}
		}
		Ok(changed)
	}

	/// Move a blob's pages to another tier and update the record
	pub async fn migrate(&self, blob_id: &str, target: Tier) -> Result<(), FsError> {
		let blob = match self.store.get_blob(blob_id)? {
			Some(b) => b,
			None => return Ok(()),
		};
		if blob.tier == target {
			return Ok(());
		}
		let target_backend = self
			.tiers
			.backend_for(target)
			.ok_or_else(|| FsError::invalid("migrate", blob_id, "target tier disabled"))?;

		let bytes = self.read_blob(&blob).await?;
		self.pages.write_pages(target_backend.as_ref(), &blob.id, &bytes).await?;
		self.store.update_blob_tier(&blob.id, target)?;

		// Remove the pages from the source only after the target holds them
		if let Some(source) = self.tiers.backend_for(blob.tier) {
			self.pages.delete_pages(source.as_ref(), &blob.page_keys).await?;
		}
		info!("migrated blob {} {} -> {}", blob.id, blob.tier, target);
		Ok(())
	}

	/// Promote a file blob after an access when policy and size allow
	pub async fn maybe_promote(&self, blob: &BlobRecord) -> Result<Option<Tier>, FsError> {
		let access = self.tiers.access_record(&blob.id);
		let target = self.tiers.promotion_target(blob.tier, blob.size, access, now_ms());
		if let Some(target) = target {
			self.migrate(&blob.id, target).await?;
		}
		Ok(target)
	}

	/// One demotion sweep over all blobs; returns how many moved
	pub async fn run_demotion_cycle(&self) -> Result<usize, FsError> {
		let now = now_ms();
		let mut demoted = 0;
		for blob in self.store.list_blobs()? {
			let last_access = self
				.tiers
				.access_record(&blob.id)
				.map(|record| record.last_access_ms)
				.unwrap_or(blob.created_at);
			if let Some(target) = self.tiers.demotion_target(blob.tier, last_access, now) {
				self.migrate(&blob.id, target).await?;
				demoted += 1;
			}
		}
		Ok(demoted)
	}
}


// vim: ts=4
