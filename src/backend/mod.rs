//! Storage backend abstraction
//!
//! Each tier is served by one backend honoring the same capability set:
//! `put`, `get`, `delete`, `list`. The adapters absorb backend-specific
//! differences (KV-style for hot, object-store for warm/cold). The tier
//! placement engine treats a missing backend as "tier disabled".

use async_trait::async_trait;
use std::error::Error;
use std::fmt;
use std::io;

mod kv;
mod memory;
mod object;

pub use kv::RedbBackend;
pub use memory::MemoryBackend;
pub use object::ObjectDirBackend;

/// Result type for backend operations
pub type BackendResult<T> = Result<T, BackendError>;

/// Uniform capability set over hot/warm/cold storage
///
/// Keys are opaque strings that may contain `/` separators; implementations
/// must treat them as flat identifiers (the separator only matters for
/// prefix listing).
#[async_trait]
pub trait StorageBackend: Send + Sync {
	/// Store a value under a key, replacing any previous value
	async fn put(&self, key: &str, bytes: &[u8]) -> BackendResult<()>;

	/// Fetch a value; `None` when the key is absent
	async fn get(&self, key: &str) -> BackendResult<Option<Vec<u8>>>;

	/// Remove a key; returns whether it existed
	async fn delete(&self, key: &str) -> BackendResult<bool>;

	/// All key/value pairs whose key starts with `prefix`
	async fn list(&self, prefix: &str) -> BackendResult<Vec<(String, Vec<u8>)>>;
}

/// Backend-specific errors
#[derive(Debug)]
pub enum BackendError {
	/// I/O error from an object-store backend
	Io { source: io::Error },

	/// Embedded-database failure
	Storage { source: Box<dyn Error + Send + Sync> },

	/// Write rejected due to quota
	Quota { key: String },

	/// Key not acceptable for this backend
	InvalidKey { key: String },
}

impl BackendError {
	pub(crate) fn storage<E: Error + Send + Sync + 'static>(e: E) -> Self {
		BackendError::Storage { source: Box::new(e) }
	}

	/// Whether the failure means "out of space"
	pub fn is_quota(&self) -> bool {
		match self {
			BackendError::Quota { .. } => true,
			BackendError::Io { source } => source.kind() == io::ErrorKind::StorageFull,
			_ => false,
		}
	}
}

impl fmt::Display for BackendError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			BackendError::Io { source } => write!(f, "I/O error: {}", source),
			BackendError::Storage { source } => write!(f, "Storage error: {}", source),
			BackendError::Quota { key } => write!(f, "Quota exceeded writing '{}'", key),
			BackendError::InvalidKey { key } => write!(f, "Invalid key '{}'", key),
		}
	}
}

impl Error for BackendError {}

impl From<io::Error> for BackendError {
	fn from(e: io::Error) -> Self {
		BackendError::Io { source: e }
	}
}

// vim: ts=4
