//! Utility functions for TierFS
//!
//! This module contains small helpers shared across the crate: the epoch
//! clock, opaque id generation, payload digests and safe wrappers around
//! system calls that require unsafe blocks.

use base64::engine::Engine;

/// Current wall-clock time in epoch milliseconds
///
/// All entry timestamps (atime/mtime/ctime/birthtime) use this clock.
pub fn now_ms() -> i64 {
	std::time::SystemTime::now()
		.duration_since(std::time::UNIX_EPOCH)
		.map(|d| d.as_millis() as i64)
		.unwrap_or(0)
}

/// Generate a new opaque id for entries, blobs and transactions
pub fn new_id() -> String {
	uuid::Uuid::new_v4().simple().to_string()
}

/// Hash a payload using BLAKE3 and return the hex-encoded digest
pub fn checksum(buf: &[u8]) -> String {
	hex::encode(blake3::hash(buf).as_bytes())
}

/// Hash a buffer using BLAKE3 and return base64-encoded result
#[allow(dead_code)]
pub fn hash_base64(buf: &[u8]) -> String {
	base64::engine::general_purpose::STANDARD.encode(blake3::hash(buf).as_bytes())
}

/// Get the effective user ID of the current process
///
/// Returns the effective UID on Unix systems, or a default value on other platforms.
/// This function wraps the unsafe libc call in a safe interface.
#[allow(unsafe_code)] // Safe wrapper around system call
pub fn get_effective_uid() -> u32 {
	#[cfg(unix)]
	{
		// SAFETY: geteuid() is always safe to call - it just returns a value
		// from the process credentials without any side effects.
		unsafe { libc::geteuid() }
	}

	#[cfg(not(unix))]
	{
		1000 // Default non-root UID on non-Unix platforms
	}
}

/// Get the effective group ID of the current process
///
/// Returns the effective GID on Unix systems, or a default value on other platforms.
/// This function wraps the unsafe libc call in a safe interface.
#[allow(unsafe_code)] // Safe wrapper around system call
pub fn get_effective_gid() -> u32 {
	#[cfg(unix)]
	{
		// SAFETY: getegid() is always safe to call - it just returns a value
		// from the process credentials without any side effects.
		unsafe { libc::getegid() }
	}

	#[cfg(not(unix))]
	{
		1000 // Default GID on non-Unix platforms
	}
}


// vim: ts=4
