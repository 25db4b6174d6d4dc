//! Metadata engine
//!
//! Relational storage of filesystem entries and blob records with ACID
//! transactions, nested savepoints, retry-on-contention, crash recovery and
//! observability hooks. The store has a single logical writer; refcount
//! mutations are single atomic updates in SQL, never read-modify-write in
//! application code.

use std::error::Error;
use std::fmt;

mod schema;
mod store;
mod transaction;

pub use store::MetadataStore;
pub use transaction::{
	TransactionHooks, TxEvent, TxEventKind, TxLogEntry, TxOptions, TxStatus,
};

/// Error type for metadata store operations
#[derive(Debug)]
pub enum MetadataError {
	/// Underlying SQL failure
	Sqlite(rusqlite::Error),

	/// Contention signal ("BUSY"/"LOCKED"); retryable
	Busy { message: String },

	/// Transaction exceeded its wall-clock bound
	Timeout { elapsed_ms: u64 },

	/// Commit/rollback without an open transaction
	NoTransaction { op: &'static str },

	/// Stored data failed to decode
	Corrupted { message: String },
}

impl MetadataError {
	pub fn busy(message: impl Into<String>) -> Self {
		MetadataError::Busy { message: message.into() }
	}

	/// Default retry classification: contention signals only
	pub fn is_retryable(&self) -> bool {
		match self {
			MetadataError::Busy { .. } => true,
			MetadataError::Sqlite(e) => {
				let message = e.to_string().to_uppercase();
				message.contains("BUSY") || message.contains("LOCKED")
			}
			_ => false,
		}
	}
}

impl fmt::Display for MetadataError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			MetadataError::Sqlite(e) => write!(f, "SQL error: {}", e),
			MetadataError::Busy { message } => write!(f, "Store busy: {}", message),
			MetadataError::Timeout { elapsed_ms } => {
				write!(f, "Transaction timed out after {}ms", elapsed_ms)
			}
			MetadataError::NoTransaction { op } => {
				write!(f, "No open transaction for {}", op)
			}
			MetadataError::Corrupted { message } => write!(f, "Store corrupted: {}", message),
		}
	}
}

impl Error for MetadataError {}

impl From<rusqlite::Error> for MetadataError {
	fn from(e: rusqlite::Error) -> Self {
		MetadataError::Sqlite(e)
	}
}


// vim: ts=4
