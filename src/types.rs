//! Core data types for TierFS

use serde::{Deserialize, Serialize};

/// Storage tier of a blob
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
	Hot,
	Warm,
	Cold,
}

impl Tier {
	/// Tiers in resolution order (hot first)
	pub const ALL: [Tier; 3] = [Tier::Hot, Tier::Warm, Tier::Cold];

	pub fn as_str(&self) -> &'static str {
		match self {
			Tier::Hot => "hot",
			Tier::Warm => "warm",
			Tier::Cold => "cold",
		}
	}

	pub fn parse(s: &str) -> Option<Tier> {
		match s {
			"hot" => Some(Tier::Hot),
			"warm" => Some(Tier::Warm),
			"cold" => Some(Tier::Cold),
			_ => None,
		}
	}
}

impl std::fmt::Display for Tier {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Filesystem object type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
	File,
	Directory,
	Symlink,
	Block,
	Character,
	Fifo,
	Socket,
}

impl EntryKind {
	pub fn as_str(&self) -> &'static str {
		match self {
			EntryKind::File => "file",
			EntryKind::Directory => "directory",
			EntryKind::Symlink => "symlink",
			EntryKind::Block => "block",
			EntryKind::Character => "character",
			EntryKind::Fifo => "fifo",
			EntryKind::Socket => "socket",
		}
	}

	pub fn parse(s: &str) -> Option<EntryKind> {
		match s {
			"file" => Some(EntryKind::File),
			"directory" => Some(EntryKind::Directory),
			"symlink" => Some(EntryKind::Symlink),
			"block" => Some(EntryKind::Block),
			"character" => Some(EntryKind::Character),
			"fifo" => Some(EntryKind::Fifo),
			"socket" => Some(EntryKind::Socket),
			_ => None,
		}
	}

	/// POSIX file-type bits for this kind (`S_IFREG`, `S_IFDIR`, ...)
	pub fn mode_bits(&self) -> u32 {
		match self {
			EntryKind::File => libc::S_IFREG as u32,
			EntryKind::Directory => libc::S_IFDIR as u32,
			EntryKind::Symlink => libc::S_IFLNK as u32,
			EntryKind::Block => libc::S_IFBLK as u32,
			EntryKind::Character => libc::S_IFCHR as u32,
			EntryKind::Fifo => libc::S_IFIFO as u32,
			EntryKind::Socket => libc::S_IFSOCK as u32,
		}
	}
}

/// One record per filesystem object
///
/// The metadata store keeps one row per entry; `mode` holds only the 12-bit
/// permission part, the file-type bits are derived from `kind`.
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
	/// Opaque stable identifier
	pub id: String,

	/// Absolute normalized path, unique
	pub path: String,

	/// Final path segment
	pub name: String,

	/// Containing directory id; `None` only for the root
	pub parent_id: Option<String>,

	pub kind: EntryKind,

	/// 12-bit POSIX permission bits
	pub mode: u32,

	pub uid: u32,
	pub gid: u32,

	/// Byte count for files; 0 otherwise
	pub size: u64,

	/// Reference into the blob store; `None` for non-files and empty files
	pub blob_id: Option<String>,

	/// Stored target path for symlinks
	pub link_target: Option<String>,

	/// Epoch milliseconds
	pub atime: i64,
	pub mtime: i64,
	pub ctime: i64,
	pub birthtime: i64,

	/// Hard-link count
	pub nlink: u32,
}

impl Entry {
	pub fn is_file(&self) -> bool {
		self.kind == EntryKind::File
	}

	pub fn is_directory(&self) -> bool {
		self.kind == EntryKind::Directory
	}

	pub fn is_symlink(&self) -> bool {
		self.kind == EntryKind::Symlink
	}
}

/// One record per chunked payload
#[derive(Debug, Clone, PartialEq)]
pub struct BlobRecord {
	/// Opaque identifier
	pub id: String,

	pub tier: Tier,

	/// Total byte count across all pages (cached)
	pub size: u64,

	/// Optional BLAKE3 digest of the full payload, hex-encoded
	pub checksum: Option<String>,

	/// Epoch milliseconds
	pub created_at: i64,

	/// Number of entries referencing this blob
	pub ref_count: i64,

	/// Ordered page keys; authoritative for chunk order
	pub page_keys: Vec<String>,
}

/// Stat snapshot returned by `stat`/`lstat` and `FileHandle::stat`
#[derive(Debug, Clone, PartialEq)]
pub struct FileStats {
	pub kind: EntryKind,

	/// Full `st_mode`: permission bits plus file-type bits
	pub mode: u32,

	pub uid: u32,
	pub gid: u32,
	pub size: u64,
	pub blob_id: Option<String>,

	/// Storage tier of the payload, when one exists
	pub tier: Option<Tier>,

	pub atime: i64,
	pub mtime: i64,
	pub ctime: i64,
	pub birthtime: i64,
	pub nlink: u32,
}

impl FileStats {
	pub fn from_entry(entry: &Entry, tier: Option<Tier>) -> Self {
		FileStats {
			kind: entry.kind,
			mode: entry.kind.mode_bits() | (entry.mode & 0o7777),
			uid: entry.uid,
			gid: entry.gid,
			size: entry.size,
			blob_id: entry.blob_id.clone(),
			tier,
			atime: entry.atime,
			mtime: entry.mtime,
			ctime: entry.ctime,
			birthtime: entry.birthtime,
			nlink: entry.nlink,
		}
	}

	pub fn is_file(&self) -> bool {
		self.kind == EntryKind::File
	}

	pub fn is_directory(&self) -> bool {
		self.kind == EntryKind::Directory
	}

	pub fn is_symbolic_link(&self) -> bool {
		self.kind == EntryKind::Symlink
	}

	/// Permission part of the mode (low 12 bits)
	pub fn permissions(&self) -> u32 {
		self.mode & 0o7777
	}
}

/// Directory listing element
#[derive(Debug, Clone, PartialEq)]
pub struct DirEntry {
	/// Name relative to the listed directory (descendant paths in
	/// recursive mode use `/` separators)
	pub name: String,

	/// Absolute path of the entry
	pub path: String,

	pub kind: EntryKind,
}

impl DirEntry {
	pub fn is_file(&self) -> bool {
		self.kind == EntryKind::File
	}

	pub fn is_directory(&self) -> bool {
		self.kind == EntryKind::Directory
	}

	pub fn is_symbolic_link(&self) -> bool {
		self.kind == EntryKind::Symlink
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_tier_round_trip() {
		for t in Tier::ALL.iter() {
			assert_eq!(Tier::parse(t.as_str()), Some(*t));
		}
		assert_eq!(Tier::parse("lukewarm"), None);
	}

	#[test]
	fn test_kind_round_trip() {
		for k in &[
			EntryKind::File,
			EntryKind::Directory,
			EntryKind::Symlink,
			EntryKind::Block,
			EntryKind::Character,
			EntryKind::Fifo,
			EntryKind::Socket,
		] {
			assert_eq!(EntryKind::parse(k.as_str()), Some(*k));
		}
	}

	#[test]
	fn test_stats_mode_composition() {
		let entry = Entry {
			id: "e1".into(),
			path: "/f".into(),
			name: "f".into(),
			parent_id: Some("root".into()),
			kind: EntryKind::File,
			mode: 0o644,
			uid: 1000,
			gid: 1000,
			size: 3,
			blob_id: Some("b1".into()),
			link_target: None,
			atime: 1,
			mtime: 2,
			ctime: 2,
			birthtime: 1,
			nlink: 1,
		};
		let stats = FileStats::from_entry(&entry, Some(Tier::Hot));
		assert!(stats.is_file());
		assert_eq!(stats.permissions(), 0o644);
		assert_eq!(stats.mode & libc::S_IFMT as u32, libc::S_IFREG as u32);
		assert_eq!(stats.tier, Some(Tier::Hot));
	}
}

// vim: ts=4
