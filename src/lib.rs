//! # TierFS - Tiered POSIX-Style Virtual Filesystem
//!
//! TierFS is a virtual filesystem whose storage is transparently tiered
//! across three backends: a hot key-value table for small payloads, a warm
//! object store for medium objects, and a cold object store for archival
//! objects. Files are addressed by absolute paths; payloads are stored as
//! sequences of fixed-size 2 MiB pages behind opaque blob ids.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use tierfs::TierFs;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let fs = TierFs::builder().build()?;
//!     fs.write_file("/hello.txt", b"Hello, World!", Default::default()).await?;
//!     let data = fs.read_file("/hello.txt", Default::default()).await?;
//!     assert_eq!(data, b"Hello, World!");
//!     Ok(())
//! }
//! ```
//!
//! ## Injecting Backends
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tierfs::{TierFs, backend::ObjectDirBackend, config::TierConfig};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let fs = TierFs::builder()
//!     .config(TierConfig::preset("balanced")?)
//!     .warm_backend(Arc::new(ObjectDirBackend::new("/var/lib/tierfs/warm")?))
//!     .build()?;
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(dead_code)]

pub mod backend;
pub mod batch;
pub mod blobs;
pub mod cancel;
pub mod config;
pub mod encoding;
pub mod error;
pub mod flags;
pub mod handle;
pub mod ident;
pub mod logging;
pub mod metadata;
pub mod ops;
pub mod pages;
pub mod path;
pub mod stream;
pub mod symlink;
pub mod tiering;
pub mod types;
pub mod util;

// Re-export commonly used types and functions
pub use backend::{BackendError, StorageBackend};
pub use cancel::CancelSignal;
pub use config::{DemotionPolicy, PromotionPolicy, TierConfig};
pub use error::{ErrorKind, FsError};
pub use flags::OpenFlags;
pub use handle::{with_file, FileHandle};
pub use ident::IdentityContext;
pub use metadata::{MetadataStore, TransactionHooks, TxEvent, TxEventKind, TxOptions};
pub use ops::{TierFs, TierFsBuilder};
pub use types::{BlobRecord, DirEntry, Entry, EntryKind, FileStats, Tier};

// vim: ts=4
