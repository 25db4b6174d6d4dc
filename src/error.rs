//! Error types for TierFS operations

use std::error::Error;
use std::fmt;
use std::io;

// Import nested error types that need From implementations
use crate::backend::BackendError;
use crate::metadata::MetadataError;
use crate::pages::PageError;

/// POSIX-style error classification
///
/// Every filesystem error maps onto exactly one of these kinds. Callers can
/// match on `FsError::kind()` without destructuring the full variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
	/// Missing path, missing parent, broken symlink, parent-is-a-file
	Enoent,

	/// Target is a directory on a file operation
	Eisdir,

	/// Intermediate component is not a directory
	Enotdir,

	/// Exclusive create against an existing path
	Eexist,

	/// Non-recursive removal of a non-empty directory
	Enotempty,

	/// Relative path, unknown flag, invalid parameter
	Einval,

	/// Operation on a closed handle or against its access mode
	Ebadf,

	/// Non-privileged ownership change
	Eperm,

	/// Symlink depth exceeded
	Eloop,

	/// Backend rejected a write due to quota
	Enospc,

	/// Operation observed a tripped cancellation signal
	Aborted,

	/// Internal store/backend failure
	Other,
}

impl ErrorKind {
	/// POSIX-style code string ("ENOENT", "EISDIR", ...)
	pub fn code(&self) -> &'static str {
		match self {
			ErrorKind::Enoent => "ENOENT",
			ErrorKind::Eisdir => "EISDIR",
			ErrorKind::Enotdir => "ENOTDIR",
			ErrorKind::Eexist => "EEXIST",
			ErrorKind::Enotempty => "ENOTEMPTY",
			ErrorKind::Einval => "EINVAL",
			ErrorKind::Ebadf => "EBADF",
			ErrorKind::Eperm => "EPERM",
			ErrorKind::Eloop => "ELOOP",
			ErrorKind::Enospc => "ENOSPC",
			ErrorKind::Aborted => "ABORTED",
			ErrorKind::Other => "EIO",
		}
	}
}

/// Main error type for filesystem operations
///
/// POSIX-like variants carry the syscall name and the offending path so the
/// caller sees `ENOENT: no such file or directory, open '/a/b'` style
/// messages. Store and page failures are nested and surface verbatim.
#[derive(Debug)]
pub enum FsError {
	/// ENOENT - no such file or directory
	NotFound { syscall: &'static str, path: String },

	/// EISDIR - illegal operation on a directory
	IsDirectory { syscall: &'static str, path: String },

	/// ENOTDIR - not a directory
	NotADirectory { syscall: &'static str, path: String },

	/// EEXIST - file already exists
	AlreadyExists { syscall: &'static str, path: String },

	/// ENOTEMPTY - directory not empty
	NotEmpty { syscall: &'static str, path: String },

	/// EINVAL - invalid argument
	InvalidArgument { syscall: &'static str, path: String, message: String },

	/// EBADF - bad file descriptor
	BadDescriptor { syscall: &'static str },

	/// EPERM - operation not permitted
	NotPermitted { syscall: &'static str, path: String },

	/// ELOOP - too many levels of symbolic links
	SymlinkLoop { syscall: &'static str, path: String },

	/// ENOSPC - no space left on device
	NoSpace { syscall: &'static str, path: String },

	/// Cancellation signal observed
	Aborted { syscall: &'static str },

	/// Metadata store error (nested)
	Metadata(MetadataError),

	/// Chunked page store error (nested)
	Pages(PageError),

	/// Storage backend error (nested)
	Backend(BackendError),

	/// I/O error
	Io(io::Error),
}

impl FsError {
	pub fn not_found(syscall: &'static str, path: impl Into<String>) -> Self {
		FsError::NotFound { syscall, path: path.into() }
	}

	pub fn is_directory(syscall: &'static str, path: impl Into<String>) -> Self {
		FsError::IsDirectory { syscall, path: path.into() }
	}

	pub fn not_a_directory(syscall: &'static str, path: impl Into<String>) -> Self {
		FsError::NotADirectory { syscall, path: path.into() }
	}

	pub fn already_exists(syscall: &'static str, path: impl Into<String>) -> Self {
		FsError::AlreadyExists { syscall, path: path.into() }
	}

	pub fn not_empty(syscall: &'static str, path: impl Into<String>) -> Self {
		FsError::NotEmpty { syscall, path: path.into() }
	}

	pub fn invalid(
		syscall: &'static str,
		path: impl Into<String>,
		message: impl Into<String>,
	) -> Self {
		FsError::InvalidArgument { syscall, path: path.into(), message: message.into() }
	}

	pub fn bad_descriptor(syscall: &'static str) -> Self {
		FsError::BadDescriptor { syscall }
	}

	pub fn not_permitted(syscall: &'static str, path: impl Into<String>) -> Self {
		FsError::NotPermitted { syscall, path: path.into() }
	}

	pub fn symlink_loop(syscall: &'static str, path: impl Into<String>) -> Self {
		FsError::SymlinkLoop { syscall, path: path.into() }
	}

	pub fn no_space(syscall: &'static str, path: impl Into<String>) -> Self {
		FsError::NoSpace { syscall, path: path.into() }
	}

	pub fn aborted(syscall: &'static str) -> Self {
		FsError::Aborted { syscall }
	}

	/// Error classification for matching without destructuring
	pub fn kind(&self) -> ErrorKind {
		match self {
			FsError::NotFound { .. } => ErrorKind::Enoent,
			FsError::IsDirectory { .. } => ErrorKind::Eisdir,
			FsError::NotADirectory { .. } => ErrorKind::Enotdir,
			FsError::AlreadyExists { .. } => ErrorKind::Eexist,
			FsError::NotEmpty { .. } => ErrorKind::Enotempty,
			FsError::InvalidArgument { .. } => ErrorKind::Einval,
			FsError::BadDescriptor { .. } => ErrorKind::Ebadf,
			FsError::NotPermitted { .. } => ErrorKind::Eperm,
			FsError::SymlinkLoop { .. } => ErrorKind::Eloop,
			FsError::NoSpace { .. } => ErrorKind::Enospc,
			FsError::Aborted { .. } => ErrorKind::Aborted,
			FsError::Metadata(_) | FsError::Pages(_) | FsError::Backend(_) | FsError::Io(_) => {
				ErrorKind::Other
			}
		}
	}

	/// Whether a failed metadata transaction may be retried
	///
	/// Default classification: contention signals from the underlying store
	/// ("BUSY" / "LOCKED" in the message).
	pub fn is_retryable(&self) -> bool {
		match self {
			FsError::Metadata(e) => e.is_retryable(),
			_ => false,
		}
	}
}

impl fmt::Display for FsError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			FsError::NotFound { syscall, path } => {
				write!(f, "ENOENT: no such file or directory, {} '{}'", syscall, path)
			}
			FsError::IsDirectory { syscall, path } => {
				write!(f, "EISDIR: illegal operation on a directory, {} '{}'", syscall, path)
			}
			FsError::NotADirectory { syscall, path } => {
				write!(f, "ENOTDIR: not a directory, {} '{}'", syscall, path)
			}
			FsError::AlreadyExists { syscall, path } => {
				write!(f, "EEXIST: file already exists, {} '{}'", syscall, path)
			}
			FsError::NotEmpty { syscall, path } => {
				write!(f, "ENOTEMPTY: directory not empty, {} '{}'", syscall, path)
			}
			FsError::InvalidArgument { syscall, path, message } => {
				write!(f, "EINVAL: {}, {} '{}'", message, syscall, path)
			}
			FsError::BadDescriptor { syscall } => {
				write!(f, "EBADF: bad file descriptor, {}", syscall)
			}
			FsError::NotPermitted { syscall, path } => {
				write!(f, "EPERM: operation not permitted, {} '{}'", syscall, path)
			}
			FsError::SymlinkLoop { syscall, path } => {
				write!(f, "ELOOP: too many symbolic links encountered, {} '{}'", syscall, path)
			}
			FsError::NoSpace { syscall, path } => {
				write!(f, "ENOSPC: no space left on device, {} '{}'", syscall, path)
			}
			FsError::Aborted { syscall } => {
				write!(f, "AbortError: operation was aborted, {}", syscall)
			}
			FsError::Metadata(e) => write!(f, "Metadata store error: {}", e),
			FsError::Pages(e) => write!(f, "Page store error: {}", e),
			FsError::Backend(e) => write!(f, "Backend error: {}", e),
			FsError::Io(e) => write!(f, "I/O error: {}", e),
		}
	}
}

impl Error for FsError {}

impl From<io::Error> for FsError {
	fn from(e: io::Error) -> Self {
		FsError::Io(e)
	}
}

impl From<MetadataError> for FsError {
	fn from(e: MetadataError) -> Self {
		FsError::Metadata(e)
	}
}

impl From<PageError> for FsError {
	fn from(e: PageError) -> Self {
		FsError::Pages(e)
	}
}

impl From<BackendError> for FsError {
	fn from(e: BackendError) -> Self {
		FsError::Backend(e)
	}
}


// vim: ts=4
