//! Symlink resolution
//!
//! A bounded walk over `(current_entry, hops)`: non-symlinks terminate the
//! chain, missing targets classify as broken, and chains longer than
//! [`MAX_SYMLINK_DEPTH`] classify as circular. The trailing-slash directory
//! requirement is enforced on the terminal entry.

use crate::metadata::{MetadataError, MetadataStore};
use crate::path;
use crate::types::Entry;

/// Maximum symlink hops before a chain is reported circular
pub const MAX_SYMLINK_DEPTH: u32 = 40;

/// Outcome of resolving a symlink chain
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
	/// Terminal non-symlink entry
	Resolved(Entry),

	/// A link target does not exist, or a trailing-slash path ended on a
	/// non-directory
	Broken { path: String },

	/// Chain exceeded [`MAX_SYMLINK_DEPTH`]
	Circular { path: String },
}

/// Follow a chain starting at `start` until a non-symlink entry
///
/// Relative link targets resolve against the directory containing the
/// symlink. `origin` is reported in broken/circular results so errors name
/// the path the caller asked about.
pub fn resolve_entry(
	store: &MetadataStore,
	start: Entry,
	must_be_dir: bool,
) -> Result<Resolution, MetadataError> {
	let origin = start.path.clone();
	let mut current = start;
	let mut hops: u32 = 0;

	loop {
		if !current.is_symlink() {
			if must_be_dir && !current.is_directory() {
				return Ok(Resolution::Broken { path: origin });
			}
			return Ok(Resolution::Resolved(current));
		}
		if hops >= MAX_SYMLINK_DEPTH {
			return Ok(Resolution::Circular { path: origin });
		}

		let target_raw = match &current.link_target {
			Some(target) => target.clone(),
			None => return Ok(Resolution::Broken { path: origin }),
		};
		let base = path::parent(&current.path).unwrap_or_else(|| "/".to_string());
		let joined = path::join(&base, &target_raw);
		let target = match path::normalize(&joined, "stat") {
			Ok(normalized) => normalized.path,
			Err(_) => return Ok(Resolution::Broken { path: origin }),
		};

		match store.get_entry_by_path(&target)? {
			Some(next) => {
				current = next;
				hops += 1;
			}
			None => return Ok(Resolution::Broken { path: origin }),
		}
	}
}


// vim: ts=4
