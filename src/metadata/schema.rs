//! SQL schema and connection pragmas for the metadata store

/// Pragmas applied to file-backed databases after enabling WAL
pub const WAL_PRAGMAS: &str = "
PRAGMA synchronous = NORMAL;
PRAGMA temp_store = MEMORY;
PRAGMA cache_size = -16000;
PRAGMA foreign_keys = ON;
";

/// Schema for entries and blob records (idempotent)
///
/// `files.mode` holds only the 12-bit permission part; file-type bits are
/// derived from `kind`. `blobs.page_keys` is a JSON array and is the
/// authoritative chunk ordering.
pub const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS files (
	id TEXT PRIMARY KEY,
	path TEXT NOT NULL,
	name TEXT NOT NULL,
	parent_id TEXT,
	kind TEXT NOT NULL,
	mode INTEGER NOT NULL,
	uid INTEGER NOT NULL,
	gid INTEGER NOT NULL,
	size INTEGER NOT NULL DEFAULT 0,
	blob_id TEXT,
	link_target TEXT,
	atime INTEGER NOT NULL,
	mtime INTEGER NOT NULL,
	ctime INTEGER NOT NULL,
	birthtime INTEGER NOT NULL,
	nlink INTEGER NOT NULL DEFAULT 1
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_files_path ON files(path);
CREATE INDEX IF NOT EXISTS idx_files_parent ON files(parent_id);
CREATE INDEX IF NOT EXISTS idx_files_blob ON files(blob_id);

CREATE TABLE IF NOT EXISTS blobs (
	id TEXT PRIMARY KEY,
	tier TEXT NOT NULL,
	size INTEGER NOT NULL DEFAULT 0,
	checksum TEXT,
	created_at INTEGER NOT NULL,
	ref_count INTEGER NOT NULL DEFAULT 0,
	page_keys TEXT NOT NULL DEFAULT '[]'
);
";

// vim: ts=4
