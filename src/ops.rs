//! Filesystem operations facade
//!
//! `TierFs` ties the metadata store, page store, placement engine and blob
//! manager together behind the Node-compatible operation surface. Every
//! operation normalizes its path, enforces the POSIX error taxonomy and
//! runs its metadata mutations inside a retrying transaction.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::engine::Engine;

use crate::backend::{MemoryBackend, StorageBackend};
use crate::blobs::BlobManager;
use crate::cancel::CancelSignal;
use crate::config::TierConfig;
use crate::encoding::{self, Encoding};
use crate::error::FsError;
use crate::flags::OpenFlags;
use crate::handle::FileHandle;
use crate::ident::IdentityContext;
use crate::logging::*;
use crate::metadata::{MetadataStore, TxOptions};
use crate::pages::{PageError, PageStore};
use crate::path::{self, NormalizedPath};
use crate::symlink::{self, Resolution, MAX_SYMLINK_DEPTH};
use crate::tiering::TierManager;
use crate::types::{DirEntry, Entry, EntryKind, FileStats, Tier};
use crate::util::{new_id, now_ms};

/// Options for `write_file` and `append_file`
#[derive(Debug, Clone, Default)]
pub struct WriteOptions {
	/// Open flag token (`w`, `wx`, `a`, `ax`, ...); defaults to `w`
	pub flag: Option<String>,

	/// Permission bits for newly created files
	pub mode: Option<u32>,

	pub signal: Option<CancelSignal>,
}

/// Options for `read_file`
#[derive(Debug, Clone, Default)]
pub struct ReadOptions {
	/// Byte offset of an optional range read
	pub offset: Option<u64>,

	/// Length of an optional range read; clamped to the file size
	pub length: Option<u64>,

	pub signal: Option<CancelSignal>,
}

/// Options for `rm`
#[derive(Debug, Clone, Copy, Default)]
pub struct RemoveOptions {
	pub recursive: bool,
	pub force: bool,
}

/// Options for `mkdir`
#[derive(Debug, Clone, Copy, Default)]
pub struct MkdirOptions {
	/// Create missing ancestors with the same mode
	pub recursive: bool,
	pub mode: Option<u32>,
}

/// Options for `rmdir`
#[derive(Debug, Clone, Copy, Default)]
pub struct RmdirOptions {
	pub recursive: bool,
}

/// Options for `rename`
#[derive(Debug, Clone, Copy, Default)]
pub struct RenameOptions {
	/// Replace an existing destination
	pub overwrite: bool,
}

/// Options for `copy_file` and `cp`
#[derive(Debug, Clone, Copy)]
pub struct CopyOptions {
	/// Replace an existing destination (exclusive copy when false)
	pub overwrite: bool,

	/// Walk directories (only honored by `cp`)
	pub recursive: bool,
}

impl Default for CopyOptions {
	fn default() -> Self {
		CopyOptions { overwrite: true, recursive: false }
	}
}

/// Options for `readdir`
#[derive(Debug, Clone, Default)]
pub struct ReadDirOptions {
	/// Concatenate all descendants, names relative to the listed directory
	pub recursive: bool,

	/// Opaque cursor from a previous page; not supported with `recursive`
	pub cursor: Option<String>,

	pub limit: Option<u32>,
}

/// One page of a directory listing
#[derive(Debug, Clone)]
pub struct ReadDirPage {
	pub entries: Vec<DirEntry>,

	/// Present when `limit` was given and more entries may follow
	pub next_cursor: Option<String>,
}

/// The tiered virtual filesystem
#[derive(Clone)]
pub struct TierFs {
	inner: Arc<FsInner>,
}

pub(crate) struct FsInner {
	store: MetadataStore,
	pages: Arc<PageStore>,
	tiers: Arc<TierManager>,
	blobs: BlobManager,
	identity: IdentityContext,
	next_fd: AtomicU64,
}

/// Builder wiring backends, configuration and identity into a `TierFs`
pub struct TierFsBuilder {
	config: TierConfig,
	hot: Option<Arc<dyn StorageBackend>>,
	warm: Option<Arc<dyn StorageBackend>>,
	cold: Option<Arc<dyn StorageBackend>>,
	identity: Option<IdentityContext>,
	metadata_path: Option<PathBuf>,
	env_overrides: bool,
}

impl Default for TierFsBuilder {
	fn default() -> Self {
		Self::new()
	}
}

impl TierFsBuilder {
	pub fn new() -> Self {
		TierFsBuilder {
			config: TierConfig::default(),
			hot: None,
			warm: None,
			cold: None,
			identity: None,
			metadata_path: None,
			env_overrides: false,
		}
	}

	pub fn config(mut self, config: TierConfig) -> Self {
		self.config = config;
		self
	}

	/// Merge `TIERFS_*` environment variables on top of the configuration
	pub fn env_overrides(mut self, enabled: bool) -> Self {
		self.env_overrides = enabled;
		self
	}

	pub fn hot_backend(mut self, backend: Arc<dyn StorageBackend>) -> Self {
		self.hot = Some(backend);
		self
	}

	pub fn warm_backend(mut self, backend: Arc<dyn StorageBackend>) -> Self {
		self.warm = Some(backend);
		self
	}

	pub fn cold_backend(mut self, backend: Arc<dyn StorageBackend>) -> Self {
		self.cold = Some(backend);
		self
	}

	pub fn identity(mut self, identity: IdentityContext) -> Self {
		self.identity = Some(identity);
		self
	}

	/// File-backed metadata store; in-memory when unset
	pub fn metadata_path(mut self, db_path: impl Into<PathBuf>) -> Self {
		self.metadata_path = Some(db_path.into());
		self
	}

	pub fn build(self) -> Result<TierFs, FsError> {
		let mut config = self.config;
		if self.env_overrides {
			config.apply_env_overrides();
		}
		config.validate()?;

		let store = match &self.metadata_path {
			Some(db_path) => MetadataStore::open(db_path)?,
			None => MetadataStore::open_in_memory()?,
		};
		store.recover_transactions()?;

		let identity = self.identity.unwrap_or_default();
		store.ensure_root(identity.uid, identity.gid)?;

		let hot = self.hot.unwrap_or_else(|| Arc::new(MemoryBackend::new()));
		let tiers = Arc::new(TierManager::new(config, hot, self.warm, self.cold)?);
		let pages = Arc::new(PageStore::default());
		let blobs = BlobManager::new(store.clone(), pages.clone(), tiers.clone());

		// Refcount resync repairs divergence left by a crash between a
		// metadata commit and the corresponding backend write
		let repaired = blobs.resync_all()?;
		if repaired > 0 {
			info!("startup refcount resync repaired {} blobs", repaired);
		}

		Ok(TierFs {
			inner: Arc::new(FsInner {
				store,
				pages,
				tiers,
				blobs,
				identity,
				next_fd: AtomicU64::new(3),
			}),
		})
	}
}

impl TierFs {
	pub fn builder() -> TierFsBuilder {
		TierFsBuilder::new()
	}

	/// All-in-memory instance with all three tiers; convenient for tests
	pub fn new_in_memory() -> Result<TierFs, FsError> {
		Self::builder()
			.warm_backend(Arc::new(MemoryBackend::new()))
			.cold_backend(Arc::new(MemoryBackend::new()))
			.build()
	}

	pub fn store(&self) -> &MetadataStore {
		&self.inner.store
	}

	pub fn tiers(&self) -> &Arc<TierManager> {
		&self.inner.tiers
	}

	pub fn blobs(&self) -> &BlobManager {
		&self.inner.blobs
	}

	pub fn identity(&self) -> &IdentityContext {
		&self.inner.identity
	}

	pub(crate) fn next_fd(&self) -> u64 {
		self.inner.next_fd.fetch_add(1, Ordering::SeqCst)
	}

	// === Path plumbing ===

	fn resolve_input(&self, input: &str, syscall: &'static str) -> Result<NormalizedPath, FsError> {
		let normalized = path::normalize(input, syscall)?;
		match self.inner.tiers.config().base_path {
			Some(base) => {
				let prefixed = if normalized.path == "/" {
					base
				} else {
					format!("{}{}", base, normalized.path)
				};
				let mut rebased = path::normalize(&prefixed, syscall)?;
				rebased.must_be_dir = normalized.must_be_dir;
				Ok(rebased)
			}
			None => Ok(normalized),
		}
	}

	fn lookup(&self, p: &str) -> Result<Option<Entry>, FsError> {
		Ok(self.inner.store.get_entry_by_path(p)?)
	}

	/// Look up an entry and follow symlinks when asked
	fn resolve_existing(
		&self,
		np: &NormalizedPath,
		syscall: &'static str,
		follow: bool,
	) -> Result<Entry, FsError> {
		let entry = self
			.lookup(&np.path)?
			.ok_or_else(|| FsError::not_found(syscall, &np.path))?;
		if !follow {
			if np.must_be_dir && !entry.is_directory() {
				return Err(FsError::not_a_directory(syscall, &np.path));
			}
			return Ok(entry);
		}
		match symlink::resolve_entry(&self.inner.store, entry, np.must_be_dir)? {
			Resolution::Resolved(entry) => Ok(entry),
			Resolution::Broken { path: p } => Err(FsError::not_found(syscall, p)),
			Resolution::Circular { path: p } => Err(FsError::symlink_loop(syscall, p)),
		}
	}

	/// Follow symlink chains toward a (possibly not yet existing) write
	/// target; returns the final path and the entry there, if any
	fn resolve_for_write(
		&self,
		start: &str,
		syscall: &'static str,
	) -> Result<(String, Option<Entry>), FsError> {
		let mut current = start.to_string();
		let mut hops: u32 = 0;
		loop {
			match self.lookup(&current)? {
				None => return Ok((current, None)),
				Some(entry) if entry.is_symlink() => {
					if hops >= MAX_SYMLINK_DEPTH {
						return Err(FsError::symlink_loop(syscall, start));
					}
					let target = match &entry.link_target {
						Some(t) => t.clone(),
						None => return Ok((current, Some(entry))),
					};
					let base = path::parent(&entry.path).unwrap_or_else(|| "/".to_string());
					current = path::normalize(&path::join(&base, &target), syscall)?.path;
					hops += 1;
				}
				Some(entry) => return Ok((current, Some(entry))),
			}
		}
	}

	/// The parent of `p` must exist and be a directory
	///
	/// A missing parent and a parent that is a regular file both surface as
	/// `ENOENT` (the probe only asks "does a parent directory exist").
	fn require_parent_dir(&self, p: &str, syscall: &'static str) -> Result<Entry, FsError> {
		let parent_path = path::parent(p).ok_or_else(|| FsError::is_directory(syscall, p))?;
		let parent = self
			.lookup(&parent_path)?
			.ok_or_else(|| FsError::not_found(syscall, p))?;
		if !parent.is_directory() {
			return Err(FsError::not_found(syscall, p));
		}
		Ok(parent)
	}

	fn check_signal(
		signal: &Option<CancelSignal>,
		syscall: &'static str,
	) -> Result<(), FsError> {
		if let Some(signal) = signal {
			if signal.is_tripped() {
				return Err(FsError::aborted(syscall));
			}
		}
		Ok(())
	}

	fn map_space(e: FsError, syscall: &'static str, p: &str) -> FsError {
		match &e {
			FsError::Pages(PageError::Backend(b)) if b.is_quota() => {
				FsError::no_space(syscall, p)
			}
			FsError::Backend(b) if b.is_quota() => FsError::no_space(syscall, p),
			_ => e,
		}
	}

	fn new_entry(
		&self,
		p: &str,
		parent_id: String,
		kind: EntryKind,
		mode: u32,
		now: i64,
	) -> Entry {
		Entry {
			id: new_id(),
			path: p.to_string(),
			name: path::file_name(p).to_string(),
			parent_id: Some(parent_id),
			kind,
			mode: mode & 0o7777,
			uid: self.inner.identity.uid,
			gid: self.inner.identity.gid,
			size: 0,
			blob_id: None,
			link_target: None,
			atime: now,
			mtime: now,
			ctime: now,
			birthtime: now,
			nlink: 1,
		}
	}

	async fn load_blob_of(&self, entry: &Entry, syscall: &'static str) -> Result<Vec<u8>, FsError> {
		match &entry.blob_id {
			None => Ok(Vec::new()),
			Some(blob_id) => {
				let blob = self
					.inner
					.store
					.get_blob(blob_id)?
					.ok_or_else(|| FsError::not_found(syscall, &entry.path))?;
				self.inner.blobs.read_blob(&blob).await
			}
		}
	}

	/// Decrement and possibly delete the blob an entry points at
	async fn release_entry_blob(&self, entry: &Entry) -> Result<(), FsError> {
		if let Some(blob_id) = &entry.blob_id {
			self.inner.store.adjust_nlink(blob_id, -1)?;
			self.inner.blobs.release(blob_id).await?;
		}
		Ok(())
	}

	// === Read path ===

	/// Read a file's payload, optionally a byte range
	pub async fn read_file(&self, input: &str, opts: ReadOptions) -> Result<Vec<u8>, FsError> {
		Self::check_signal(&opts.signal, "read")?;
		let np = self.resolve_input(input, "read")?;
		let entry = self.resolve_existing(&np, "read", true)?;
		if entry.is_directory() {
			return Err(FsError::is_directory("read", &np.path));
		}
		if !entry.is_file() {
			return Err(FsError::invalid("read", &np.path, "not a regular file"));
		}

		let bytes = match &entry.blob_id {
			None => Vec::new(),
			Some(blob_id) => {
				let blob = self
					.inner
					.store
					.get_blob(blob_id)?
					.ok_or_else(|| FsError::not_found("read", &np.path))?;

				let data = match (opts.offset, opts.length) {
					(None, None) => self.inner.blobs.read_blob(&blob).await?,
					(offset, length) => {
						let offset = offset.unwrap_or(0);
						if offset > blob.size {
							return Err(FsError::invalid(
								"read",
								&np.path,
								"offset beyond end of file",
							));
						}
						let length = length.unwrap_or(blob.size - offset).min(blob.size - offset);
						self.inner.blobs.read_blob_range(&blob, offset, length).await?
					}
				};

				// Access accounting feeds promotion
				self.inner.tiers.record_access(blob_id, now_ms());
				if let Err(e) = self.inner.blobs.maybe_promote(&blob).await {
					warn!("promotion of blob {} failed: {}", blob_id, e);
				}
				data
			}
		};

		let now = now_ms();
		self.inner.store.touch_times(&entry.id, now, entry.mtime, entry.ctime)?;
		Ok(bytes)
	}

	/// Read and decode a file as text
	pub async fn read_file_string(
		&self,
		input: &str,
		encoding_name: &str,
	) -> Result<String, FsError> {
		let encoding = Encoding::parse(encoding_name, "read")?;
		let bytes = self.read_file(input, ReadOptions::default()).await?;
		encoding::decode(&bytes, encoding, "read")
	}

	// === Write path ===

	/// Write a payload; flag semantics: `w` truncate-or-create, `wx`
	/// exclusive-create, `a` append-or-create, `ax` exclusive-append
	pub async fn write_file(
		&self,
		input: &str,
		data: &[u8],
		opts: WriteOptions,
	) -> Result<(), FsError> {
		Self::check_signal(&opts.signal, "write")?;
		let np = self.resolve_input(input, "write")?;
		if np.path == "/" {
			return Err(FsError::is_directory("write", "/"));
		}
		if np.must_be_dir {
			return Err(FsError::is_directory("write", &np.path));
		}
		let flags =
			OpenFlags::parse(opts.flag.as_deref().unwrap_or("w"), "write")?;
		if !flags.write {
			return Err(FsError::bad_descriptor("write"));
		}

		let fs = self.clone();
		let p = np.path.clone();
		let data: Arc<Vec<u8>> = Arc::new(data.to_vec());
		let mode = opts.mode;
		self.inner
			.store
			.transaction(TxOptions::default(), move || {
				let fs = fs.clone();
				let p = p.clone();
				let data = data.clone();
				Box::pin(async move { fs.write_file_tx(&p, &data, flags, mode).await })
			})
			.await
			.map_err(|e| Self::map_space(e, "write", &np.path))
	}

	async fn write_file_tx(
		&self,
		p: &str,
		data: &[u8],
		flags: OpenFlags,
		mode: Option<u32>,
	) -> Result<(), FsError> {
		let (final_path, existing) = self.resolve_for_write(p, "write")?;

		if let Some(entry) = &existing {
			if flags.exclusive {
				return Err(FsError::already_exists("write", &final_path));
			}
			if entry.is_directory() {
				return Err(FsError::is_directory("write", &final_path));
			}
		}

		let content: Vec<u8> = match (&existing, flags.append) {
			(Some(entry), true) => {
				let mut old = self.load_blob_of(entry, "write").await?;
				old.extend_from_slice(data);
				old
			}
			_ => data.to_vec(),
		};

		let blob = if content.is_empty() {
			None
		} else {
			Some(self.inner.blobs.create_blob(&content).await?)
		};
		let blob_id = blob.as_ref().map(|b| b.id.clone());
		let now = now_ms();

		match existing {
			Some(entry) => {
				// Overwrite keeps mode and birthtime
				self.release_entry_blob(&entry).await?;
				self.inner.store.set_entry_content(
					&entry.id,
					content.len() as u64,
					blob_id.as_deref(),
					now,
					now,
				)?;
			}
			None => {
				let parent = self.require_parent_dir(&final_path, "write")?;
				let mut entry = self.new_entry(
					&final_path,
					parent.id,
					EntryKind::File,
					mode.unwrap_or(self.inner.tiers.config().default_mode),
					now,
				);
				entry.size = content.len() as u64;
				entry.blob_id = blob_id;
				self.inner.store.create_entry(&entry)?;
			}
		}
		trace!("wrote {} bytes to {}", content.len(), final_path);
		Ok(())
	}

	/// Encode text and write it
	pub async fn write_file_string(
		&self,
		input: &str,
		text: &str,
		encoding_name: &str,
		opts: WriteOptions,
	) -> Result<(), FsError> {
		let encoding = Encoding::parse(encoding_name, "write")?;
		let bytes = encoding::encode(text, encoding, "write")?;
		self.write_file(input, &bytes, opts).await
	}

	/// `write_file` with flag `a`; preserves mode and birthtime for
	/// existing paths
	pub async fn append_file(
		&self,
		input: &str,
		data: &[u8],
		mut opts: WriteOptions,
	) -> Result<(), FsError> {
		if opts.flag.is_none() {
			opts.flag = Some("a".to_string());
		}
		self.write_file(input, data, opts).await
	}

	// === Removal ===

	/// Remove a file or symlink; refuses directories
	pub async fn unlink(&self, input: &str) -> Result<(), FsError> {
		let np = self.resolve_input(input, "unlink")?;
		let fs = self.clone();
		let p = np.path.clone();
		self.inner
			.store
			.transaction(TxOptions::default(), move || {
				let fs = fs.clone();
				let p = p.clone();
				Box::pin(async move { fs.unlink_tx(&p).await })
			})
			.await
	}

	async fn unlink_tx(&self, p: &str) -> Result<(), FsError> {
		let entry = self.lookup(p)?.ok_or_else(|| FsError::not_found("unlink", p))?;
		if entry.is_directory() {
			return Err(FsError::is_directory("unlink", p));
		}
		self.inner.store.delete_entry(&entry.id)?;
		self.release_entry_blob(&entry).await?;
		Ok(())
	}

	/// Remove a directory; non-empty directories need `recursive`
	pub async fn rmdir(&self, input: &str, opts: RmdirOptions) -> Result<(), FsError> {
		let np = self.resolve_input(input, "rmdir")?;
		if np.path == "/" {
			return Err(FsError::not_permitted("rmdir", "/"));
		}
		let fs = self.clone();
		let p = np.path.clone();
		self.inner
			.store
			.transaction(TxOptions::default(), move || {
				let fs = fs.clone();
				let p = p.clone();
				Box::pin(async move { fs.rmdir_tx(&p, opts).await })
			})
			.await
	}

	async fn rmdir_tx(&self, p: &str, opts: RmdirOptions) -> Result<(), FsError> {
		let entry = self.lookup(p)?.ok_or_else(|| FsError::not_found("rmdir", p))?;
		if !entry.is_directory() {
			return Err(FsError::not_a_directory("rmdir", p));
		}
		if !opts.recursive && self.inner.store.count_children(&entry.id)? > 0 {
			return Err(FsError::not_empty("rmdir", p));
		}
		self.delete_subtree_tx(&entry).await
	}

	/// Remove files and directories; `force` tolerates missing paths
	pub async fn rm(&self, input: &str, opts: RemoveOptions) -> Result<(), FsError> {
		let np = self.resolve_input(input, "rm")?;
		if np.path == "/" {
			return Err(FsError::not_permitted("rm", "/"));
		}
		let fs = self.clone();
		let p = np.path.clone();
		self.inner
			.store
			.transaction(TxOptions::default(), move || {
				let fs = fs.clone();
				let p = p.clone();
				Box::pin(async move { fs.rm_tx(&p, opts).await })
			})
			.await
	}

	async fn rm_tx(&self, p: &str, opts: RemoveOptions) -> Result<(), FsError> {
		let entry = match self.lookup(p)? {
			Some(entry) => entry,
			None if opts.force => return Ok(()),
			None => return Err(FsError::not_found("rm", p)),
		};
		if entry.is_directory() {
			if !opts.recursive {
				return Err(FsError::is_directory("rm", p));
			}
			return self.delete_subtree_tx(&entry).await;
		}
		self.inner.store.delete_entry(&entry.id)?;
		self.release_entry_blob(&entry).await?;
		Ok(())
	}

	/// Delete a directory entry and everything underneath it
	async fn delete_subtree_tx(&self, base: &Entry) -> Result<(), FsError> {
		let descendants = self.inner.store.list_subtree(&base.path)?;
		// Deepest first so directories empty out before their own removal
		for entry in descendants.iter().rev() {
			self.inner.store.delete_entry(&entry.id)?;
			if entry.is_file() {
				self.release_entry_blob(entry).await?;
			}
		}
		self.inner.store.delete_entry(&base.id)?;
		debug!("removed subtree {} ({} descendants)", base.path, descendants.len());
		Ok(())
	}

	// === Directories ===

	/// Create a directory; `recursive` creates missing ancestors
	pub async fn mkdir(&self, input: &str, opts: MkdirOptions) -> Result<(), FsError> {
		let np = self.resolve_input(input, "mkdir")?;
		let fs = self.clone();
		let p = np.path.clone();
		self.inner
			.store
			.transaction(TxOptions::default(), move || {
				let fs = fs.clone();
				let p = p.clone();
				Box::pin(async move { fs.mkdir_tx(&p, opts).await })
			})
			.await
	}

	async fn mkdir_tx(&self, p: &str, opts: MkdirOptions) -> Result<(), FsError> {
		if let Some(entry) = self.lookup(p)? {
			if opts.recursive && entry.is_directory() {
				return Ok(());
			}
			return Err(FsError::already_exists("mkdir", p));
		}
		if p == "/" {
			return Ok(());
		}
		let mode = opts.mode.unwrap_or(self.inner.tiers.config().default_dir_mode);
		let now = now_ms();

		if !opts.recursive {
			let parent = self.require_parent_dir(p, "mkdir")?;
			let entry = self.new_entry(p, parent.id, EntryKind::Directory, mode, now);
			self.inner.store.create_entry(&entry)?;
			return Ok(());
		}

		// Walk down from the root, creating what is missing
		let mut ancestors: Vec<String> = Vec::new();
		let mut cursor = p.to_string();
		loop {
			ancestors.push(cursor.clone());
			match path::parent(&cursor) {
				Some(parent) if parent != "/" => cursor = parent,
				_ => break,
			}
		}
		let mut to_create: Vec<Entry> = Vec::new();
		let mut parent_entry =
			self.lookup("/")?.ok_or_else(|| FsError::not_found("mkdir", "/"))?;
		for ancestor in ancestors.iter().rev() {
			match self.lookup(ancestor)? {
				Some(existing) => {
					if !existing.is_directory() {
						return Err(FsError::not_found("mkdir", ancestor));
					}
					parent_entry = existing;
				}
				None => {
					let entry = self.new_entry(
						ancestor,
						parent_entry.id.clone(),
						EntryKind::Directory,
						mode,
						now,
					);
					to_create.push(entry.clone());
					parent_entry = entry;
				}
			}
		}
		for entry in &to_create {
			self.inner.store.create_entry(entry)?;
		}
		Ok(())
	}

	/// List a directory, optionally recursively or paginated
	pub async fn readdir(
		&self,
		input: &str,
		opts: ReadDirOptions,
	) -> Result<ReadDirPage, FsError> {
		let np = self.resolve_input(input, "scandir")?;
		let entry = self.resolve_existing(&np, "scandir", true)?;
		if !entry.is_directory() {
			return Err(FsError::not_a_directory("scandir", &np.path));
		}

		if opts.recursive {
			if opts.cursor.is_some() {
				return Err(FsError::invalid(
					"scandir",
					&np.path,
					"cursor not supported with recursive listing",
				));
			}
			let base = &entry.path;
			let strip = if base == "/" { 1 } else { base.len() + 1 };
			let mut entries: Vec<DirEntry> = self
				.inner
				.store
				.list_subtree(base)?
				.into_iter()
				.map(|e| DirEntry {
					name: e.path[strip.min(e.path.len())..].to_string(),
					path: e.path,
					kind: e.kind,
				})
				.collect();
			if let Some(limit) = opts.limit {
				entries.truncate(limit as usize);
			}
			return Ok(ReadDirPage { entries, next_cursor: None });
		}

		let cursor_name = match &opts.cursor {
			None => None,
			Some(cursor) => {
				let decoded = BASE64
					.decode(cursor)
					.ok()
					.and_then(|bytes| String::from_utf8(bytes).ok())
					.ok_or_else(|| {
						FsError::invalid("scandir", &np.path, "invalid cursor")
					})?;
				Some(decoded)
			}
		};
		let children = self.inner.store.list_children(
			&entry.id,
			cursor_name.as_deref(),
			opts.limit,
		)?;
		let next_cursor = match (opts.limit, children.last()) {
			(Some(limit), Some(last)) if children.len() == limit as usize => {
				Some(BASE64.encode(last.name.as_bytes()))
			}
			_ => None,
		};
		let entries = children
			.into_iter()
			.map(|e| DirEntry { name: e.name.clone(), path: e.path, kind: e.kind })
			.collect();
		Ok(ReadDirPage { entries, next_cursor })
	}

	/// Child names of a directory
	pub async fn readdir_names(&self, input: &str) -> Result<Vec<String>, FsError> {
		let page = self.readdir(input, ReadDirOptions::default()).await?;
		Ok(page.entries.into_iter().map(|e| e.name).collect())
	}

	// === Rename / copy ===

	/// Atomic rename within the metadata store
	pub async fn rename(
		&self,
		from: &str,
		to: &str,
		opts: RenameOptions,
	) -> Result<(), FsError> {
		let np_from = self.resolve_input(from, "rename")?;
		let np_to = self.resolve_input(to, "rename")?;
		if np_from.path == "/" || np_to.path == "/" {
			return Err(FsError::not_permitted("rename", "/"));
		}
		if np_from.path == np_to.path {
			return Ok(());
		}
		let fs = self.clone();
		let old = np_from.path.clone();
		let new = np_to.path.clone();
		self.inner
			.store
			.transaction(TxOptions::default(), move || {
				let fs = fs.clone();
				let old = old.clone();
				let new = new.clone();
				Box::pin(async move { fs.rename_tx(&old, &new, opts).await })
			})
			.await
	}

	async fn rename_tx(&self, old: &str, new: &str, opts: RenameOptions) -> Result<(), FsError> {
		let src = self.lookup(old)?.ok_or_else(|| FsError::not_found("rename", old))?;
		if src.is_directory() && path::is_within(new, old) {
			return Err(FsError::invalid("rename", new, "destination inside source"));
		}
		let new_parent = self.require_parent_dir(new, "rename")?;

		if let Some(dst) = self.lookup(new)? {
			if !opts.overwrite {
				return Err(FsError::already_exists("rename", new));
			}
			if dst.is_directory() {
				if !src.is_directory() {
					return Err(FsError::is_directory("rename", new));
				}
				if self.inner.store.count_children(&dst.id)? > 0 {
					return Err(FsError::not_empty("rename", new));
				}
				self.inner.store.delete_entry(&dst.id)?;
			} else {
				if src.is_directory() {
					return Err(FsError::not_a_directory("rename", new));
				}
				self.inner.store.delete_entry(&dst.id)?;
				self.release_entry_blob(&dst).await?;
			}
		}

		if src.is_directory() {
			self.inner.store.rename_subtree(old, new)?;
		}
		let mut moved = src.clone();
		moved.path = new.to_string();
		moved.name = path::file_name(new).to_string();
		moved.parent_id = Some(new_parent.id);
		moved.ctime = now_ms();
		self.inner.store.update_entry(&moved)?;
		debug!("renamed {} -> {}", old, new);
		Ok(())
	}

	/// Copy-by-reference: the new entry shares the source blob and bumps
	/// its refcount; no chunk copy happens
	pub async fn copy_file(
		&self,
		from: &str,
		to: &str,
		opts: CopyOptions,
	) -> Result<(), FsError> {
		let np_from = self.resolve_input(from, "copyfile")?;
		let np_to = self.resolve_input(to, "copyfile")?;
		let fs = self.clone();
		let src_path = np_from.clone();
		let dst = np_to.path.clone();
		self.inner
			.store
			.transaction(TxOptions::default(), move || {
				let fs = fs.clone();
				let src_path = src_path.clone();
				let dst = dst.clone();
				Box::pin(async move {
					let src = fs.resolve_existing(&src_path, "copyfile", true)?;
					if src.is_directory() {
						return Err(FsError::is_directory("copyfile", &src_path.path));
					}
					fs.copy_entry_tx(&src, &dst, opts.overwrite).await
				})
			})
			.await
	}

	async fn copy_entry_tx(
		&self,
		src: &Entry,
		dst: &str,
		overwrite: bool,
	) -> Result<(), FsError> {
		let parent = self.require_parent_dir(dst, "copyfile")?;
		if let Some(existing) = self.lookup(dst)? {
			if !overwrite {
				return Err(FsError::already_exists("copyfile", dst));
			}
			if existing.is_directory() {
				return Err(FsError::is_directory("copyfile", dst));
			}
			self.inner.store.delete_entry(&existing.id)?;
			self.release_entry_blob(&existing).await?;
		}

		let now = now_ms();
		let mut copy = self.new_entry(dst, parent.id, src.kind, src.mode, now);
		copy.size = src.size;
		copy.blob_id = src.blob_id.clone();
		copy.link_target = src.link_target.clone();
		if let Some(blob_id) = &src.blob_id {
			self.inner.blobs.link(blob_id)?;
		}
		self.inner.store.create_entry(&copy)?;
		Ok(())
	}

	/// Recursive copy; directories require `recursive`
	pub async fn cp(&self, from: &str, to: &str, opts: CopyOptions) -> Result<(), FsError> {
		let np_from = self.resolve_input(from, "cp")?;
		let np_to = self.resolve_input(to, "cp")?;
		let fs = self.clone();
		let src_np = np_from.clone();
		let dst = np_to.path.clone();
		self.inner
			.store
			.transaction(TxOptions::default(), move || {
				let fs = fs.clone();
				let src_np = src_np.clone();
				let dst = dst.clone();
				Box::pin(async move { fs.cp_tx(&src_np, &dst, opts).await })
			})
			.await
	}

	async fn cp_tx(
		&self,
		src_np: &NormalizedPath,
		dst: &str,
		opts: CopyOptions,
	) -> Result<(), FsError> {
		let src = self.resolve_existing(src_np, "cp", true)?;
		if !src.is_directory() {
			return self.copy_entry_tx(&src, dst, opts.overwrite).await;
		}
		if !opts.recursive {
			return Err(FsError::is_directory("cp", &src_np.path));
		}

		// Breadth-first walk creating directories before their contents
		let mut queue: Vec<(Entry, String)> = vec![(src, dst.to_string())];
		while let Some((entry, target)) = queue.pop() {
			match entry.kind {
				EntryKind::Directory => {
					let parent = self.require_parent_dir(&target, "cp")?;
					match self.lookup(&target)? {
						Some(existing) if existing.is_directory() => {}
						Some(_) => return Err(FsError::already_exists("cp", &target)),
						None => {
							let dir = self.new_entry(
								&target,
								parent.id,
								EntryKind::Directory,
								entry.mode,
								now_ms(),
							);
							self.inner.store.create_entry(&dir)?;
						}
					}
					for child in self.inner.store.list_children(&entry.id, None, None)? {
						let child_target = path::join(&target, &child.name);
						queue.push((child, child_target));
					}
				}
				_ => {
					self.copy_entry_tx(&entry, &target, opts.overwrite).await?;
				}
			}
		}
		Ok(())
	}

	// === Truncate ===

	/// Resize a file to `length` bytes; shrinking drops whole pages and
	/// shortens the last retained one, growing zero-extends
	pub async fn truncate(&self, input: &str, length: u64) -> Result<(), FsError> {
		let np = self.resolve_input(input, "truncate")?;
		let fs = self.clone();
		let p = np.clone();
		self.inner
			.store
			.transaction(TxOptions::default(), move || {
				let fs = fs.clone();
				let p = p.clone();
				Box::pin(async move { fs.truncate_tx(&p, length).await })
			})
			.await
			.map_err(|e| Self::map_space(e, "truncate", &np.path))
	}

	async fn truncate_tx(&self, np: &NormalizedPath, length: u64) -> Result<(), FsError> {
		let entry = self.resolve_existing(np, "truncate", true)?;
		if entry.is_directory() {
			return Err(FsError::is_directory("truncate", &np.path));
		}
		if !entry.is_file() {
			return Err(FsError::invalid("truncate", &np.path, "not a regular file"));
		}
		let now = now_ms();
		if length == entry.size {
			self.inner.store.touch_times(&entry.id, entry.atime, now, now)?;
			return Ok(());
		}

		// Truncate to zero releases the payload entirely
		if length == 0 {
			self.release_entry_blob(&entry).await?;
			self.inner.store.set_entry_content(&entry.id, 0, None, now, now)?;
			return Ok(());
		}

		let blob = match &entry.blob_id {
			Some(blob_id) => self.inner.store.get_blob(blob_id)?,
			None => None,
		};

		let new_blob_id = match blob {
			None => {
				// Zero-extend an empty file
				let blob = self.inner.blobs.create_blob(&vec![0u8; length as usize]).await?;
				Some(blob.id)
			}
			Some(blob) if blob.ref_count > 1 => {
				// Shared payload: leave the other links alone
				let bytes = if length < blob.size {
					self.inner.blobs.read_blob_range(&blob, 0, length).await?
				} else {
					let mut bytes = self.inner.blobs.read_blob(&blob).await?;
					bytes.resize(length as usize, 0);
					bytes
				};
				let fresh = self.inner.blobs.create_blob(&bytes).await?;
				self.release_entry_blob(&entry).await?;
				Some(fresh.id)
			}
			Some(blob) => {
				self.resize_blob_in_place(&blob, length).await?;
				Some(blob.id)
			}
		};

		self.inner.store.set_entry_content(
			&entry.id,
			length,
			new_blob_id.as_deref(),
			now,
			now,
		)?;
		Ok(())
	}

	/// Sole-owner resize: shrink drops pages past the cut and shortens the
	/// last one; growth rewrites the payload zero-extended
	async fn resize_blob_in_place(
		&self,
		blob: &crate::types::BlobRecord,
		length: u64,
	) -> Result<(), FsError> {
		let backend = self
			.inner
			.tiers
			.backend_for(blob.tier)
			.or_else(|| self.inner.tiers.backend_for(Tier::Hot))
			.ok_or_else(|| FsError::invalid("truncate", &blob.id, "no backend available"))?;
		let pages = self.inner.pages.clone();

		if length < blob.size {
			let page = crate::pages::PAGE_SIZE as u64;
			let keep = ((length + page - 1) / page) as usize;
			let kept = blob.page_keys[..keep].to_vec();
			let dropped = blob.page_keys[keep..].to_vec();

			let cut = (length - (keep as u64 - 1) * page) as usize;
			let last_key = &kept[keep - 1];
			let mut last = self
				.inner
				.pages
				.read_pages(backend.as_ref(), std::slice::from_ref(last_key))
				.await?;
			if last.len() > cut {
				last.truncate(cut);
				backend.put(last_key, &last).await.map_err(FsError::from)?;
			}
			pages.delete_pages(backend.as_ref(), &dropped).await?;
			pages.evict_size(&blob.id);
			pages.cache_size(&blob.id, length);
			self.inner.store.set_blob_pages(&blob.id, &kept, length)?;
		} else {
			let mut bytes = self.inner.blobs.read_blob(blob).await?;
			bytes.resize(length as usize, 0);
			let keys = pages.write_pages(backend.as_ref(), &blob.id, &bytes).await?;
			self.inner.store.set_blob_pages(&blob.id, &keys, length)?;
		}
		Ok(())
	}

	// === Stat family ===

	fn stats_for(&self, entry: &Entry) -> Result<FileStats, FsError> {
		let tier = match &entry.blob_id {
			Some(blob_id) => self.inner.store.get_blob(blob_id)?.map(|b| b.tier),
			None => None,
		};
		Ok(FileStats::from_entry(entry, tier))
	}

	/// Stat following symlinks
	pub async fn stat(&self, input: &str) -> Result<FileStats, FsError> {
		let np = self.resolve_input(input, "stat")?;
		let entry = self.resolve_existing(&np, "stat", true)?;
		self.stats_for(&entry)
	}

	/// Stat of the entry itself; symlinks are not followed
	pub async fn lstat(&self, input: &str) -> Result<FileStats, FsError> {
		let np = self.resolve_input(input, "lstat")?;
		let entry = self.resolve_existing(&np, "lstat", false)?;
		self.stats_for(&entry)
	}

	/// Whether a path resolves to an existing entry
	pub async fn exists(&self, input: &str) -> Result<bool, FsError> {
		match self.stat(input).await {
			Ok(_) => Ok(true),
			Err(e) => match e.kind() {
				crate::error::ErrorKind::Enoent
				| crate::error::ErrorKind::Enotdir
				| crate::error::ErrorKind::Eloop => Ok(false),
				_ => Err(e),
			},
		}
	}

	/// Permission probe against the identity context; `mode_mask` is an OR
	/// of the `R_OK`/`W_OK`/`X_OK` bits, 0 checks bare existence
	pub async fn access(&self, input: &str, mode_mask: u32) -> Result<(), FsError> {
		let np = self.resolve_input(input, "access")?;
		let entry = self.resolve_existing(&np, "access", true)?;
		if mode_mask == 0 || self.inner.identity.is_privileged() {
			return Ok(());
		}
		let perms = entry.mode;
		let granted = if self.inner.identity.uid == entry.uid {
			(perms >> 6) & 0o7
		} else if self.inner.identity.gid == entry.gid {
			(perms >> 3) & 0o7
		} else {
			perms & 0o7
		};
		if granted & mode_mask == mode_mask {
			Ok(())
		} else {
			Err(FsError::not_permitted("access", &np.path))
		}
	}

	// === Attributes ===

	/// Update permission bits; follows symlinks
	pub async fn chmod(&self, input: &str, mode: u32) -> Result<(), FsError> {
		let np = self.resolve_input(input, "chmod")?;
		let entry = self.resolve_existing(&np, "chmod", true)?;
		self.inner.store.set_entry_mode(&entry.id, mode, now_ms())?;
		Ok(())
	}

	/// Change ownership; `None` leaves a field unchanged. Requires a
	/// privileged identity.
	pub async fn chown(
		&self,
		input: &str,
		uid: Option<u32>,
		gid: Option<u32>,
	) -> Result<(), FsError> {
		self.chown_inner(input, uid, gid, true, "chown").await
	}

	/// `chown` on the symlink itself
	pub async fn lchown(
		&self,
		input: &str,
		uid: Option<u32>,
		gid: Option<u32>,
	) -> Result<(), FsError> {
		self.chown_inner(input, uid, gid, false, "lchown").await
	}

	async fn chown_inner(
		&self,
		input: &str,
		uid: Option<u32>,
		gid: Option<u32>,
		follow: bool,
		syscall: &'static str,
	) -> Result<(), FsError> {
		let np = self.resolve_input(input, syscall)?;
		let entry = self.resolve_existing(&np, syscall, follow)?;

		let new_uid = uid.unwrap_or(entry.uid);
		let new_gid = gid.unwrap_or(entry.gid);
		let changes = new_uid != entry.uid || new_gid != entry.gid;
		if changes && !self.inner.identity.is_privileged() {
			return Err(FsError::not_permitted(syscall, &np.path));
		}
		self.inner.store.set_entry_owner(&entry.id, new_uid, new_gid, now_ms())?;
		Ok(())
	}

	/// Set access and modification times (epoch milliseconds)
	pub async fn utimes(&self, input: &str, atime: i64, mtime: i64) -> Result<(), FsError> {
		let np = self.resolve_input(input, "utime")?;
		let entry = self.resolve_existing(&np, "utime", true)?;
		self.inner.store.touch_times(&entry.id, atime, mtime, now_ms())?;
		Ok(())
	}

	// === Links ===

	/// Create a symlink storing `target` verbatim
	pub async fn symlink(&self, target: &str, input: &str) -> Result<(), FsError> {
		let np = self.resolve_input(input, "symlink")?;
		if np.path == "/" {
			return Err(FsError::already_exists("symlink", "/"));
		}
		let fs = self.clone();
		let p = np.path.clone();
		let target = target.to_string();
		self.inner
			.store
			.transaction(TxOptions::default(), move || {
				let fs = fs.clone();
				let p = p.clone();
				let target = target.clone();
				Box::pin(async move {
					if fs.lookup(&p)?.is_some() {
						return Err(FsError::already_exists("symlink", &p));
					}
					let parent = fs.require_parent_dir(&p, "symlink")?;
					let mut entry =
						fs.new_entry(&p, parent.id, EntryKind::Symlink, 0o777, now_ms());
					entry.size = target.len() as u64;
					entry.link_target = Some(target);
					fs.inner.store.create_entry(&entry)?;
					Ok(())
				})
			})
			.await
	}

	/// Create a hard link: a duplicated entry record sharing the blob
	pub async fn link(&self, existing: &str, new: &str) -> Result<(), FsError> {
		let np_src = self.resolve_input(existing, "link")?;
		let np_new = self.resolve_input(new, "link")?;
		let fs = self.clone();
		let src_path = np_src.path.clone();
		let new_path = np_new.path.clone();
		self.inner
			.store
			.transaction(TxOptions::default(), move || {
				let fs = fs.clone();
				let src_path = src_path.clone();
				let new_path = new_path.clone();
				Box::pin(async move { fs.link_tx(&src_path, &new_path).await })
			})
			.await
	}

	async fn link_tx(&self, src_path: &str, new_path: &str) -> Result<(), FsError> {
		let src = self
			.lookup(src_path)?
			.ok_or_else(|| FsError::not_found("link", src_path))?;
		if src.is_directory() {
			return Err(FsError::not_permitted("link", src_path));
		}
		if self.lookup(new_path)?.is_some() {
			return Err(FsError::already_exists("link", new_path));
		}
		let parent = self.require_parent_dir(new_path, "link")?;

		let mut linked = src.clone();
		linked.id = new_id();
		linked.path = new_path.to_string();
		linked.name = path::file_name(new_path).to_string();
		linked.parent_id = Some(parent.id);
		linked.nlink = src.nlink + 1;
		linked.ctime = now_ms();

		match &src.blob_id {
			Some(blob_id) => {
				// Bump the count on every entry already sharing the blob,
				// then register the new reference
				self.inner.store.adjust_nlink(blob_id, 1)?;
				self.inner.blobs.link(blob_id)?;
				self.inner.store.create_entry(&linked)?;
			}
			None => {
				let mut src_updated = src.clone();
				src_updated.nlink += 1;
				src_updated.ctime = linked.ctime;
				self.inner.store.update_entry(&src_updated)?;
				self.inner.store.create_entry(&linked)?;
			}
		}
		Ok(())
	}

	/// Stored target of a symlink
	pub async fn readlink(&self, input: &str) -> Result<String, FsError> {
		let np = self.resolve_input(input, "readlink")?;
		let entry = self.resolve_existing(&np, "readlink", false)?;
		match entry.link_target {
			Some(target) if entry.is_symlink() => Ok(target),
			_ => Err(FsError::invalid("readlink", &np.path, "not a symbolic link")),
		}
	}

	/// Canonical path with every symlink component resolved
	pub async fn realpath(&self, input: &str) -> Result<String, FsError> {
		let np = self.resolve_input(input, "realpath")?;
		let mut remaining: std::collections::VecDeque<String> = np
			.path
			.split('/')
			.filter(|segment| !segment.is_empty())
			.map(String::from)
			.collect();
		let mut resolved = String::from("/");
		let mut hops: u32 = 0;

		while let Some(segment) = remaining.pop_front() {
			match segment.as_str() {
				"." => continue,
				".." => {
					resolved = path::parent(&resolved).unwrap_or_else(|| "/".to_string());
					continue;
				}
				_ => {}
			}
			let candidate = path::join(&resolved, &segment);
			let entry = self
				.lookup(&candidate)?
				.ok_or_else(|| FsError::not_found("realpath", &np.path))?;
			if entry.is_symlink() {
				hops += 1;
				if hops > MAX_SYMLINK_DEPTH {
					return Err(FsError::symlink_loop("realpath", &np.path));
				}
				let target = entry
					.link_target
					.clone()
					.ok_or_else(|| FsError::not_found("realpath", &np.path))?;
				let target_segments: Vec<String> = target
					.split('/')
					.filter(|segment| !segment.is_empty())
					.map(String::from)
					.collect();
				for segment in target_segments.into_iter().rev() {
					remaining.push_front(segment);
				}
				if target.starts_with('/') {
					resolved = String::from("/");
				}
				continue;
			}
			if !remaining.is_empty() && !entry.is_directory() {
				return Err(FsError::not_a_directory("realpath", &np.path));
			}
			resolved = candidate;
		}
		Ok(resolved)
	}

	// === Handles ===

	/// Open a file handle with full POSIX flag parsing
	pub async fn open(
		&self,
		input: &str,
		flag: &str,
		mode: Option<u32>,
	) -> Result<FileHandle, FsError> {
		let flags = OpenFlags::parse(flag, "open")?;
		let np = self.resolve_input(input, "open")?;

		let fs = self.clone();
		let p = np.path.clone();
		let (entry, content) = self
			.inner
			.store
			.transaction(TxOptions::default(), move || {
				let fs = fs.clone();
				let p = p.clone();
				Box::pin(async move { fs.open_tx(&p, flags, mode).await })
			})
			.await
			.map_err(|e| Self::map_space(e, "open", &np.path))?;

		Ok(FileHandle::new(self.clone(), self.next_fd(), entry, flags, content))
	}

	async fn open_tx(
		&self,
		p: &str,
		flags: OpenFlags,
		mode: Option<u32>,
	) -> Result<(Entry, Vec<u8>), FsError> {
		let (final_path, existing) = self.resolve_for_write(p, "open")?;
		match existing {
			Some(entry) if entry.is_directory() => {
				Err(FsError::is_directory("open", &final_path))
			}
			Some(entry) => {
				if flags.create && flags.exclusive {
					return Err(FsError::already_exists("open", &final_path));
				}
				if flags.truncate && flags.write {
					self.release_entry_blob(&entry).await?;
					let now = now_ms();
					self.inner.store.set_entry_content(&entry.id, 0, None, now, now)?;
					let refreshed = self
						.lookup(&final_path)?
						.ok_or_else(|| FsError::not_found("open", &final_path))?;
					return Ok((refreshed, Vec::new()));
				}
				let content = if flags.read || flags.append {
					self.load_blob_of(&entry, "open").await?
				} else {
					Vec::new()
				};
				Ok((entry, content))
			}
			None => {
				if !flags.create {
					return Err(FsError::not_found("open", &final_path));
				}
				let parent = self.require_parent_dir(&final_path, "open")?;
				let entry = self.new_entry(
					&final_path,
					parent.id,
					EntryKind::File,
					mode.unwrap_or(self.inner.tiers.config().default_mode),
					now_ms(),
				);
				self.inner.store.create_entry(&entry)?;
				Ok((entry, Vec::new()))
			}
		}
	}

	// === Maintenance ===

	/// One demotion sweep; returns how many blobs moved down
	pub async fn run_demotion_cycle(&self) -> Result<usize, FsError> {
		self.inner.blobs.run_demotion_cycle().await
	}

	/// Delete blobs nothing references anymore
	pub async fn sweep_orphans(&self) -> Result<usize, FsError> {
		self.inner.blobs.sweep_orphans().await
	}

	/// Recompute every blob refcount from live entries
	pub fn sync_ref_counts(&self) -> Result<usize, FsError> {
		self.inner.blobs.resync_all()
	}
}

// vim: ts=4
