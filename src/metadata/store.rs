//! Relational store of entries and blob records
//!
//! One row per filesystem object in `files`, one row per chunked payload in
//! `blobs`. All refcount mutations are single atomic SQL updates.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use rusqlite::{params, Connection, OptionalExtension, Row};

use super::schema::{SCHEMA, WAL_PRAGMAS};
use super::transaction::TxController;
use super::MetadataError;
use crate::types::{BlobRecord, Entry, EntryKind, Tier};
use crate::util::{new_id, now_ms};

const ENTRY_COLS: &str = "id, path, name, parent_id, kind, mode, uid, gid, size, \
	blob_id, link_target, atime, mtime, ctime, birthtime, nlink";

const BLOB_COLS: &str = "id, tier, size, checksum, created_at, ref_count, page_keys";

/// Handle to the metadata store; cheap to clone
#[derive(Clone)]
pub struct MetadataStore {
	pub(super) inner: Arc<StoreInner>,
}

pub(super) struct StoreInner {
	pub(super) conn: Mutex<Connection>,
	pub(super) tx: TxController,
}

impl MetadataStore {
	/// Open or create a file-backed store and apply WAL plus schema
	pub fn open(db_path: &Path) -> Result<Self, MetadataError> {
		let conn = Connection::open(db_path)?;
		conn.query_row("PRAGMA journal_mode = WAL", [], |_| Ok(()))?;
		conn.execute_batch(WAL_PRAGMAS)?;
		conn.execute_batch(SCHEMA)?;
		Ok(Self::from_conn(conn))
	}

	/// Open an in-memory store with the same schema (no WAL pragmas needed)
	pub fn open_in_memory() -> Result<Self, MetadataError> {
		let conn = Connection::open_in_memory()?;
		conn.execute_batch(SCHEMA)?;
		Ok(Self::from_conn(conn))
	}

	fn from_conn(conn: Connection) -> Self {
		MetadataStore {
			inner: Arc::new(StoreInner { conn: Mutex::new(conn), tx: TxController::new() }),
		}
	}

	pub(super) fn lock_conn(&self) -> MutexGuard<'_, Connection> {
		self.inner.conn.lock().unwrap_or_else(|poison| poison.into_inner())
	}

	/// Create the root directory entry if it does not exist yet
	pub fn ensure_root(&self, uid: u32, gid: u32) -> Result<Entry, MetadataError> {
		if let Some(root) = self.get_entry_by_path("/")? {
			return Ok(root);
		}
		let now = now_ms();
		let root = Entry {
			id: new_id(),
			path: "/".to_string(),
			name: String::new(),
			parent_id: None,
			kind: EntryKind::Directory,
			mode: 0o755,
			uid,
			gid,
			size: 0,
			blob_id: None,
			link_target: None,
			atime: now,
			mtime: now,
			ctime: now,
			birthtime: now,
			nlink: 1,
		};
		self.create_entry(&root)?;
		Ok(root)
	}

	// === Entry CRUD ===

	pub fn create_entry(&self, entry: &Entry) -> Result<(), MetadataError> {
		let conn = self.lock_conn();
		conn.execute(
			"INSERT INTO files (id, path, name, parent_id, kind, mode, uid, gid, size, \
				blob_id, link_target, atime, mtime, ctime, birthtime, nlink) \
				VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
			params![
				entry.id,
				entry.path,
				entry.name,
				entry.parent_id,
				entry.kind.as_str(),
				entry.mode,
				entry.uid,
				entry.gid,
				entry.size as i64,
				entry.blob_id,
				entry.link_target,
				entry.atime,
				entry.mtime,
				entry.ctime,
				entry.birthtime,
				entry.nlink,
			],
		)?;
		Ok(())
	}

	/// Create several entries atomically
	pub fn batch_create_entries(&self, entries: &[Entry]) -> Result<(), MetadataError> {
		self.begin()?;
		for entry in entries {
			if let Err(e) = self.create_entry(entry) {
				let _ = self.rollback();
				return Err(e);
			}
		}
		self.commit()
	}

	pub fn get_entry_by_path(&self, path: &str) -> Result<Option<Entry>, MetadataError> {
		let conn = self.lock_conn();
		let entry = conn
			.query_row(
				&format!("SELECT {} FROM files WHERE path = ?1", ENTRY_COLS),
				params![path],
				entry_from_row,
			)
			.optional()?;
		Ok(entry)
	}

	pub fn get_entry(&self, id: &str) -> Result<Option<Entry>, MetadataError> {
		let conn = self.lock_conn();
		let entry = conn
			.query_row(
				&format!("SELECT {} FROM files WHERE id = ?1", ENTRY_COLS),
				params![id],
				entry_from_row,
			)
			.optional()?;
		Ok(entry)
	}

	/// Full-row update by id
	pub fn update_entry(&self, entry: &Entry) -> Result<(), MetadataError> {
		let conn = self.lock_conn();
		conn.execute(
			"UPDATE files SET path = ?2, name = ?3, parent_id = ?4, kind = ?5, mode = ?6, \
				uid = ?7, gid = ?8, size = ?9, blob_id = ?10, link_target = ?11, atime = ?12, \
				mtime = ?13, ctime = ?14, birthtime = ?15, nlink = ?16 WHERE id = ?1",
			params![
				entry.id,
				entry.path,
				entry.name,
				entry.parent_id,
				entry.kind.as_str(),
				entry.mode,
				entry.uid,
				entry.gid,
				entry.size as i64,
				entry.blob_id,
				entry.link_target,
				entry.atime,
				entry.mtime,
				entry.ctime,
				entry.birthtime,
				entry.nlink,
			],
		)?;
		Ok(())
	}

	pub fn delete_entry(&self, id: &str) -> Result<bool, MetadataError> {
		let conn = self.lock_conn();
		let rows = conn.execute("DELETE FROM files WHERE id = ?1", params![id])?;
		Ok(rows > 0)
	}

	/// Children of a directory ordered by name
	///
	/// `cursor` is the last name of the previous page; `limit` of `None`
	/// returns everything.
	pub fn list_children(
		&self,
		parent_id: &str,
		cursor: Option<&str>,
		limit: Option<u32>,
	) -> Result<Vec<Entry>, MetadataError> {
		let conn = self.lock_conn();
		let mut stmt = conn.prepare(&format!(
			"SELECT {} FROM files WHERE parent_id = ?1 AND name > ?2 ORDER BY name LIMIT ?3",
			ENTRY_COLS
		))?;
		let limit = limit.map(|l| l as i64).unwrap_or(-1);
		let rows = stmt.query_map(params![parent_id, cursor.unwrap_or(""), limit], entry_from_row)?;
		let mut entries = Vec::new();
		for row in rows {
			entries.push(row?);
		}
		Ok(entries)
	}

	pub fn count_children(&self, parent_id: &str) -> Result<u64, MetadataError> {
		let conn = self.lock_conn();
		let n: i64 = conn.query_row(
			"SELECT COUNT(*) FROM files WHERE parent_id = ?1",
			params![parent_id],
			|row| row.get(0),
		)?;
		Ok(n.max(0) as u64)
	}

	/// All descendants of a directory path (the directory itself excluded),
	/// ordered by path
	pub fn list_subtree(&self, base: &str) -> Result<Vec<Entry>, MetadataError> {
		let pattern = subtree_pattern(base);
		let conn = self.lock_conn();
		let mut stmt = conn.prepare(&format!(
			"SELECT {} FROM files WHERE path LIKE ?1 ESCAPE '\\' ORDER BY path",
			ENTRY_COLS
		))?;
		let rows = stmt.query_map(params![pattern], entry_from_row)?;
		let mut entries = Vec::new();
		for row in rows {
			entries.push(row?);
		}
		Ok(entries)
	}

	/// Rewrite descendant paths after a directory rename
	///
	/// The moved entry itself is updated separately via `update_entry`; this
	/// only rewrites the `path` column of everything underneath.
	pub fn rename_subtree(&self, old_base: &str, new_base: &str) -> Result<u64, MetadataError> {
		let pattern = subtree_pattern(old_base);
		let conn = self.lock_conn();
		let rows = conn.execute(
			"UPDATE files SET path = ?2 || substr(path, ?3) WHERE path LIKE ?1 ESCAPE '\\'",
			params![pattern, new_base, old_base.len() as i64 + 1],
		)?;
		Ok(rows as u64)
	}

	pub fn count_entries(&self) -> Result<u64, MetadataError> {
		let conn = self.lock_conn();
		let n: i64 = conn.query_row("SELECT COUNT(*) FROM files", [], |row| row.get(0))?;
		Ok(n.max(0) as u64)
	}

	// === Targeted entry updates ===

	pub fn touch_times(
		&self,
		id: &str,
		atime: i64,
		mtime: i64,
		ctime: i64,
	) -> Result<(), MetadataError> {
		let conn = self.lock_conn();
		conn.execute(
			"UPDATE files SET atime = ?2, mtime = ?3, ctime = ?4 WHERE id = ?1",
			params![id, atime, mtime, ctime],
		)?;
		Ok(())
	}

	pub fn set_entry_mode(&self, id: &str, mode: u32, ctime: i64) -> Result<(), MetadataError> {
		let conn = self.lock_conn();
		conn.execute(
			"UPDATE files SET mode = ?2, ctime = ?3 WHERE id = ?1",
			params![id, mode & 0o7777, ctime],
		)?;
		Ok(())
	}

	pub fn set_entry_owner(
		&self,
		id: &str,
		uid: u32,
		gid: u32,
		ctime: i64,
	) -> Result<(), MetadataError> {
		let conn = self.lock_conn();
		conn.execute(
			"UPDATE files SET uid = ?2, gid = ?3, ctime = ?4 WHERE id = ?1",
			params![id, uid, gid, ctime],
		)?;
		Ok(())
	}

	/// Point an entry at new payload and adjust times in one statement
	pub fn set_entry_content(
		&self,
		id: &str,
		size: u64,
		blob_id: Option<&str>,
		mtime: i64,
		ctime: i64,
	) -> Result<(), MetadataError> {
		let conn = self.lock_conn();
		conn.execute(
			"UPDATE files SET size = ?2, blob_id = ?3, mtime = ?4, ctime = ?5 WHERE id = ?1",
			params![id, size as i64, blob_id, mtime, ctime],
		)?;
		Ok(())
	}

	/// Shift the hard-link count of every entry sharing a blob
	pub fn adjust_nlink(&self, blob_id: &str, delta: i32) -> Result<(), MetadataError> {
		let conn = self.lock_conn();
		conn.execute(
			"UPDATE files SET nlink = MAX(1, nlink + ?2) WHERE blob_id = ?1",
			params![blob_id, delta],
		)?;
		Ok(())
	}

	// === Blob records ===

	pub fn register_blob(&self, blob: &BlobRecord) -> Result<(), MetadataError> {
		let page_keys = serde_json::to_string(&blob.page_keys)
			.map_err(|e| MetadataError::Corrupted { message: e.to_string() })?;
		let conn = self.lock_conn();
		conn.execute(
			"INSERT INTO blobs (id, tier, size, checksum, created_at, ref_count, page_keys) \
				VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
			params![
				blob.id,
				blob.tier.as_str(),
				blob.size as i64,
				blob.checksum,
				blob.created_at,
				blob.ref_count,
				page_keys,
			],
		)?;
		Ok(())
	}

	pub fn get_blob(&self, id: &str) -> Result<Option<BlobRecord>, MetadataError> {
		let conn = self.lock_conn();
		let blob = conn
			.query_row(
				&format!("SELECT {} FROM blobs WHERE id = ?1", BLOB_COLS),
				params![id],
				blob_from_row,
			)
			.optional()?;
		Ok(blob)
	}

	pub fn update_blob_tier(&self, id: &str, tier: Tier) -> Result<(), MetadataError> {
		let conn = self.lock_conn();
		conn.execute("UPDATE blobs SET tier = ?2 WHERE id = ?1", params![id, tier.as_str()])?;
		Ok(())
	}

	/// Replace the page list and cached size of a blob
	pub fn set_blob_pages(
		&self,
		id: &str,
		page_keys: &[String],
		size: u64,
	) -> Result<(), MetadataError> {
		let keys = serde_json::to_string(page_keys)
			.map_err(|e| MetadataError::Corrupted { message: e.to_string() })?;
		let conn = self.lock_conn();
		conn.execute(
			"UPDATE blobs SET page_keys = ?2, size = ?3 WHERE id = ?1",
			params![id, keys, size as i64],
		)?;
		Ok(())
	}

	pub fn delete_blob(&self, id: &str) -> Result<bool, MetadataError> {
		let conn = self.lock_conn();
		let rows = conn.execute("DELETE FROM blobs WHERE id = ?1", params![id])?;
		Ok(rows > 0)
	}

	pub fn list_blobs(&self) -> Result<Vec<BlobRecord>, MetadataError> {
		let conn = self.lock_conn();
		let mut stmt =
			conn.prepare(&format!("SELECT {} FROM blobs ORDER BY created_at", BLOB_COLS))?;
		let rows = stmt.query_map([], blob_from_row)?;
		let mut blobs = Vec::new();
		for row in rows {
			blobs.push(row?);
		}
		Ok(blobs)
	}

	/// Blobs with zero refcount and no live entry reference
	pub fn list_orphan_blobs(&self) -> Result<Vec<BlobRecord>, MetadataError> {
		let conn = self.lock_conn();
		let mut stmt = conn.prepare(&format!(
			"SELECT {} FROM blobs b WHERE b.ref_count = 0 \
				AND NOT EXISTS (SELECT 1 FROM files f WHERE f.blob_id = b.id)",
			BLOB_COLS
		))?;
		let rows = stmt.query_map([], blob_from_row)?;
		let mut blobs = Vec::new();
		for row in rows {
			blobs.push(row?);
		}
		Ok(blobs)
	}

	// === Refcounts ===
	// All three mutations are single atomic updates in the store.

	/// `ref_count = ref_count + 1`; returns the new count
	pub fn increment_ref_count(&self, blob_id: &str) -> Result<i64, MetadataError> {
		let conn = self.lock_conn();
		let count = conn.query_row(
			"UPDATE blobs SET ref_count = ref_count + 1 WHERE id = ?1 RETURNING ref_count",
			params![blob_id],
			|row| row.get(0),
		)?;
		Ok(count)
	}

	/// `ref_count = MAX(0, ref_count - 1)`; returns whether the count
	/// reached zero so callers can cascade to blob deletion
	pub fn decrement_ref_count(&self, blob_id: &str) -> Result<bool, MetadataError> {
		let conn = self.lock_conn();
		let count: i64 = conn.query_row(
			"UPDATE blobs SET ref_count = MAX(0, ref_count - 1) WHERE id = ?1 RETURNING ref_count",
			params![blob_id],
			|row| row.get(0),
		)?;
		Ok(count == 0)
	}

	pub fn set_ref_count(&self, blob_id: &str, count: i64) -> Result<(), MetadataError> {
		let conn = self.lock_conn();
		conn.execute(
			"UPDATE blobs SET ref_count = ?2 WHERE id = ?1",
			params![blob_id, count.max(0)],
		)?;
		Ok(())
	}

	/// Live count of entries referencing a blob
	pub fn count_blob_references(&self, blob_id: &str) -> Result<i64, MetadataError> {
		let conn = self.lock_conn();
		let n = conn.query_row(
			"SELECT COUNT(*) FROM files WHERE blob_id = ?1",
			params![blob_id],
			|row| row.get(0),
		)?;
		Ok(n)
	}

	/// Set `ref_count` to the live entry count; returns the new value
	pub fn sync_blob_ref_count(&self, blob_id: &str) -> Result<i64, MetadataError> {
		let conn = self.lock_conn();
		let count = conn.query_row(
			"UPDATE blobs SET ref_count = \
				(SELECT COUNT(*) FROM files WHERE blob_id = ?1) \
				WHERE id = ?1 RETURNING ref_count",
			params![blob_id],
			|row| row.get(0),
		)?;
		Ok(count)
	}
}

/// LIKE pattern matching everything strictly below `base`
fn subtree_pattern(base: &str) -> String {
	let escaped = base.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_");
	if base == "/" {
		// "_" forces at least one character after the slash, excluding the root itself
		"/_%".to_string()
	} else {
		format!("{}/%", escaped)
	}
}

fn bad_column(what: &str) -> rusqlite::Error {
	rusqlite::Error::FromSqlConversionFailure(
		0,
		rusqlite::types::Type::Text,
		format!("unexpected value for {}", what).into(),
	)
}

fn entry_from_row(row: &Row<'_>) -> rusqlite::Result<Entry> {
	let kind_str: String = row.get(4)?;
	let kind = EntryKind::parse(&kind_str).ok_or_else(|| bad_column("files.kind"))?;
	let size: i64 = row.get(8)?;
	Ok(Entry {
		id: row.get(0)?,
		path: row.get(1)?,
		name: row.get(2)?,
		parent_id: row.get(3)?,
		kind,
		mode: row.get(5)?,
		uid: row.get(6)?,
		gid: row.get(7)?,
		size: size.max(0) as u64,
		blob_id: row.get(9)?,
		link_target: row.get(10)?,
		atime: row.get(11)?,
		mtime: row.get(12)?,
		ctime: row.get(13)?,
		birthtime: row.get(14)?,
		nlink: row.get(15)?,
	})
}

fn blob_from_row(row: &Row<'_>) -> rusqlite::Result<BlobRecord> {
	let tier_str: String = row.get(1)?;
	let tier = Tier::parse(&tier_str).ok_or_else(|| bad_column("blobs.tier"))?;
	let size: i64 = row.get(2)?;
	let keys_json: String = row.get(6)?;
	let page_keys: Vec<String> =
		serde_json::from_str(&keys_json).map_err(|_| bad_column("blobs.page_keys"))?;
	Ok(BlobRecord {
		id: row.get(0)?,
		tier,
		size: size.max(0) as u64,
		checksum: row.get(3)?,
		created_at: row.get(4)?,
		ref_count: row.get(5)?,
		page_keys,
	})
}

#[cfg(test)]
mod tests {
	use super::*;

	fn store() -> MetadataStore {
		let store = MetadataStore::open_in_memory().unwrap();
		store.ensure_root(0, 0).unwrap();
		store
	}

	fn file_entry(store: &MetadataStore, path: &str, blob_id: Option<&str>) -> Entry {
		let root = store.get_entry_by_path("/").unwrap().unwrap();
		let now = now_ms();
		Entry {
			id: new_id(),
			path: path.to_string(),
			name: crate::path::file_name(path).to_string(),
			parent_id: Some(root.id),
			kind: EntryKind::File,
			mode: 0o644,
			uid: 0,
			gid: 0,
			size: 0,
			blob_id: blob_id.map(String::from),
			link_target: None,
			atime: now,
			mtime: now,
			ctime: now,
			birthtime: now,
			nlink: 1,
		}
	}

	#[test]
	fn test_root_is_singleton() {
		let store = store();
		store.ensure_root(0, 0).unwrap();
		assert_eq!(store.count_entries().unwrap(), 1);
		let root = store.get_entry_by_path("/").unwrap().unwrap();
		assert_eq!(root.kind, EntryKind::Directory);
		assert!(root.parent_id.is_none());
	}

	#[test]
	fn test_entry_round_trip() {
		let store = store();
		let entry = file_entry(&store, "/a.txt", None);
		store.create_entry(&entry).unwrap();

		let loaded = store.get_entry_by_path("/a.txt").unwrap().unwrap();
		assert_eq!(loaded, entry);
		assert_eq!(store.get_entry(&entry.id).unwrap().unwrap(), entry);
		assert!(store.get_entry_by_path("/missing").unwrap().is_none());
	}

	#[test]
	fn test_batch_create_is_atomic() {
		let store = store();
		let good = file_entry(&store, "/ok", None);
		let clash = file_entry(&store, "/ok", None); // duplicate path

		assert!(store.batch_create_entries(&[good.clone(), clash]).is_err());
		// Nothing from the failed batch landed
		assert!(store.get_entry_by_path("/ok").unwrap().is_none());

		let other = file_entry(&store, "/other", None);
		store.batch_create_entries(&[good, other]).unwrap();
		assert!(store.get_entry_by_path("/ok").unwrap().is_some());
		assert!(store.get_entry_by_path("/other").unwrap().is_some());
	}

	#[test]
	fn test_path_uniqueness_enforced() {
		let store = store();
		store.create_entry(&file_entry(&store, "/dup", None)).unwrap();
		assert!(store.create_entry(&file_entry(&store, "/dup", None)).is_err());
	}

	#[test]
	fn test_list_children_pagination() {
		let store = store();
		for name in &["a", "b", "c", "d"] {
			store.create_entry(&file_entry(&store, &format!("/{}", name), None)).unwrap();
		}
		let root = store.get_entry_by_path("/").unwrap().unwrap();

		let first = store.list_children(&root.id, None, Some(2)).unwrap();
		assert_eq!(first.len(), 2);
		assert_eq!(first[0].name, "a");

		let rest = store.list_children(&root.id, Some(&first[1].name), None).unwrap();
		assert_eq!(rest.len(), 2);
		assert_eq!(rest[0].name, "c");
		assert_eq!(store.count_children(&root.id).unwrap(), 4);
	}

	#[test]
	fn test_rename_subtree_rewrites_paths() {
		let store = store();
		let root = store.get_entry_by_path("/").unwrap().unwrap();
		let now = now_ms();
		let dir = Entry {
			id: new_id(),
			path: "/old".into(),
			name: "old".into(),
			parent_id: Some(root.id),
			kind: EntryKind::Directory,
			mode: 0o755,
			uid: 0,
			gid: 0,
			size: 0,
			blob_id: None,
			link_target: None,
			atime: now,
			mtime: now,
			ctime: now,
			birthtime: now,
			nlink: 1,
		};
		store.create_entry(&dir).unwrap();
		let mut child = file_entry(&store, "/old/f.txt", None);
		child.parent_id = Some(dir.id.clone());
		store.create_entry(&child).unwrap();

		store.rename_subtree("/old", "/new").unwrap();
		assert!(store.get_entry_by_path("/new/f.txt").unwrap().is_some());
		assert!(store.get_entry_by_path("/old/f.txt").unwrap().is_none());
	}

	#[test]
	fn test_blob_round_trip_and_refcounts() {
		let store = store();
		let blob = BlobRecord {
			id: new_id(),
			tier: Tier::Hot,
			size: 42,
			checksum: Some("abc".into()),
			created_at: now_ms(),
			ref_count: 1,
			page_keys: vec![format!("{}/000000", "k")],
		};
		store.register_blob(&blob).unwrap();
		assert_eq!(store.get_blob(&blob.id).unwrap().unwrap(), blob);

		assert_eq!(store.increment_ref_count(&blob.id).unwrap(), 2);
		assert!(!store.decrement_ref_count(&blob.id).unwrap());
		assert!(!store.decrement_ref_count(&blob.id).unwrap());
		// Clamped at zero
		assert!(store.decrement_ref_count(&blob.id).unwrap());
	}

	#[test]
	fn test_sync_ref_count_from_live_entries() {
		let store = store();
		let blob = BlobRecord {
			id: new_id(),
			tier: Tier::Hot,
			size: 1,
			checksum: None,
			created_at: now_ms(),
			ref_count: 7, // wrong on purpose
			page_keys: vec![],
		};
		store.register_blob(&blob).unwrap();
		store.create_entry(&file_entry(&store, "/one", Some(&blob.id))).unwrap();
		store.create_entry(&file_entry(&store, "/two", Some(&blob.id))).unwrap();

		assert_eq!(store.count_blob_references(&blob.id).unwrap(), 2);
		assert_eq!(store.sync_blob_ref_count(&blob.id).unwrap(), 2);
		assert_eq!(store.get_blob(&blob.id).unwrap().unwrap().ref_count, 2);
	}

	#[test]
	fn test_orphan_listing() {
		let store = store();
		let orphan = BlobRecord {
			id: new_id(),
			tier: Tier::Warm,
			size: 3,
			checksum: None,
			created_at: now_ms(),
			ref_count: 0,
			page_keys: vec![],
		};
		let live = BlobRecord { id: new_id(), ref_count: 1, ..orphan.clone() };
		store.register_blob(&orphan).unwrap();
		store.register_blob(&live).unwrap();
		store.create_entry(&file_entry(&store, "/live", Some(&live.id))).unwrap();

		let orphans = store.list_orphan_blobs().unwrap();
		assert_eq!(orphans.len(), 1);
		assert_eq!(orphans[0].id, orphan.id);
	}
}

// vim: ts=4
