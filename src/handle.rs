//! File handles
//!
//! A handle buffers the file payload in memory and tracks position, access
//! mode and a dirty flag. `sync`/`datasync`/`close` persist the buffer
//! through the blob layer; `close` releases the buffer and clears the dirty
//! flag even when the final sync fails, so repeated close stays a no-op.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::encoding::{self, Encoding};
use crate::error::FsError;
use crate::flags::OpenFlags;
use crate::ops::{TierFs, WriteOptions};
use crate::types::{Entry, EntryKind, FileStats};
use crate::util::now_ms;

struct HandleState {
	buf: Vec<u8>,
	pos: u64,
	closed: bool,
	dirty: bool,
	mode: u32,
	uid: u32,
	gid: u32,
	atime: i64,
	mtime: i64,
	ctime: i64,
	birthtime: i64,
	nlink: u32,
}

/// An open file
///
/// Reads and writes go against the in-memory buffer; nothing reaches the
/// backends until `sync`, `datasync` or `close`.
pub struct FileHandle {
	fs: TierFs,
	fd: u64,
	path: String,
	flags: OpenFlags,
	state: Mutex<HandleState>,
}

impl FileHandle {
	pub(crate) fn new(
		fs: TierFs,
		fd: u64,
		entry: Entry,
		flags: OpenFlags,
		content: Vec<u8>,
	) -> Self {
		FileHandle {
			fs,
			fd,
			path: entry.path,
			flags,
			state: Mutex::new(HandleState {
				buf: content,
				pos: 0,
				closed: false,
				dirty: false,
				mode: entry.mode,
				uid: entry.uid,
				gid: entry.gid,
				atime: entry.atime,
				mtime: entry.mtime,
				ctime: entry.ctime,
				birthtime: entry.birthtime,
				nlink: entry.nlink,
			}),
		}
	}

	pub fn fd(&self) -> u64 {
		self.fd
	}

	pub fn path(&self) -> &str {
		&self.path
	}

	pub fn flags(&self) -> OpenFlags {
		self.flags
	}

	/// Copy bytes into `buf[offset..]`
	///
	/// Without an explicit `position` the internal position advances by the
	/// bytes read; with one it stays untouched, so position-carrying reads
	/// are independent of each other. Reads at or past EOF return 0.
	pub async fn read(
		&self,
		buf: &mut [u8],
		offset: usize,
		length: Option<usize>,
		position: Option<u64>,
	) -> Result<usize, FsError> {
		let mut state = self.state.lock().await;
		if state.closed || !self.flags.read {
			return Err(FsError::bad_descriptor("read"));
		}
		if offset > buf.len() {
			return Err(FsError::invalid("read", &self.path, "offset beyond buffer end"));
		}

		let read_pos = position.unwrap_or(state.pos);
		let size = state.buf.len() as u64;
		if read_pos >= size {
			return Ok(0);
		}

		let capacity = buf.len() - offset;
		let wanted = length.unwrap_or(capacity).min(capacity);
		let available = (size - read_pos) as usize;
		let count = wanted.min(available);

		let start = read_pos as usize;
		buf[offset..offset + count].copy_from_slice(&state.buf[start..start + count]);
		if position.is_none() {
			state.pos = read_pos + count as u64;
		}
		state.atime = now_ms();
		Ok(count)
	}

	/// Write bytes at `position` (or the current position)
	///
	/// Append-mode handles ignore `position` and always write at the end.
	/// Writing past EOF zero-fills the gap.
	pub async fn write(&self, data: &[u8], position: Option<u64>) -> Result<usize, FsError> {
		let mut state = self.state.lock().await;
		if state.closed || !self.flags.write {
			return Err(FsError::bad_descriptor("write"));
		}

		let write_pos = if self.flags.append {
			state.buf.len() as u64
		} else {
			position.unwrap_or(state.pos)
		};

		let end = write_pos as usize + data.len();
		if state.buf.len() < write_pos as usize {
			state.buf.resize(write_pos as usize, 0);
		}
		if state.buf.len() < end {
			state.buf.resize(end, 0);
		}
		state.buf[write_pos as usize..end].copy_from_slice(data);

		if position.is_none() || self.flags.append {
			state.pos = end as u64;
		}
		let now = now_ms();
		state.mtime = now;
		state.ctime = now;
		state.dirty = true;
		Ok(data.len())
	}

	/// Encode text with the given encoding and write it
	pub async fn write_str(
		&self,
		text: &str,
		encoding: Encoding,
		position: Option<u64>,
	) -> Result<usize, FsError> {
		let bytes = encoding::encode(text, encoding, "write")?;
		self.write(&bytes, position).await
	}

	/// Resize the in-memory buffer; zero-fills on growth
	pub async fn truncate(&self, length: u64) -> Result<(), FsError> {
		let mut state = self.state.lock().await;
		if state.closed || !self.flags.write {
			return Err(FsError::bad_descriptor("ftruncate"));
		}
		state.buf.resize(length as usize, 0);
		let now = now_ms();
		state.mtime = now;
		state.ctime = now;
		state.dirty = true;
		Ok(())
	}

	/// Snapshot reflecting the handle's current size, pending writes
	/// included; does not flush
	pub async fn stat(&self) -> Result<FileStats, FsError> {
		let state = self.state.lock().await;
		if state.closed {
			return Err(FsError::bad_descriptor("fstat"));
		}
		Ok(FileStats {
			kind: EntryKind::File,
			mode: EntryKind::File.mode_bits() | (state.mode & 0o7777),
			uid: state.uid,
			gid: state.gid,
			size: state.buf.len() as u64,
			blob_id: None,
			tier: None,
			atime: state.atime,
			mtime: state.mtime,
			ctime: state.ctime,
			birthtime: state.birthtime,
			nlink: state.nlink,
		})
	}

	/// Persist the buffer when dirty; a clean handle returns immediately
	pub async fn sync(&self) -> Result<(), FsError> {
		let mut state = self.state.lock().await;
		if state.closed {
			return Err(FsError::bad_descriptor("fsync"));
		}
		if !state.dirty {
			return Ok(());
		}
		self.persist(&mut state).await?;
		state.dirty = false;
		Ok(())
	}

	/// Identical to [`sync`](Self::sync) in this model: payload and
	/// metadata persist together
	pub async fn datasync(&self) -> Result<(), FsError> {
		self.sync().await
	}

	async fn persist(&self, state: &mut HandleState) -> Result<(), FsError> {
		let opts = WriteOptions {
			flag: Some("w".to_string()),
			mode: Some(state.mode),
			signal: None,
		};
		self.fs.write_file(&self.path, &state.buf, opts).await
	}

	/// Close the handle; idempotent
	///
	/// A dirty buffer is synced first, but the buffer is released and the
	/// dirty flag cleared even when that sync fails, so a repeated close
	/// stays a no-op and never re-attempts I/O.
	pub async fn close(&self) -> Result<(), FsError> {
		let mut state = self.state.lock().await;
		if state.closed {
			return Ok(());
		}
		let result = if state.dirty {
			self.persist(&mut state).await
		} else {
			Ok(())
		};
		state.closed = true;
		state.dirty = false;
		state.buf = Vec::new();
		result
	}
}

/// Scoped acquisition: open, run `f`, close on every exit path
pub async fn with_file<T, F, Fut>(
	fs: &TierFs,
	path: &str,
	flag: &str,
	f: F,
) -> Result<T, FsError>
where
	F: FnOnce(Arc<FileHandle>) -> Fut,
	Fut: Future<Output = Result<T, FsError>>,
{
	let handle = Arc::new(fs.open(path, flag, None).await?);
	let result = f(handle.clone()).await;
	let close_result = handle.close().await;
	match result {
		Ok(value) => {
			close_result?;
			Ok(value)
		}
		Err(e) => Err(e),
	}
}


// vim: ts=4
