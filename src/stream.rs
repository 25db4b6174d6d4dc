//! Streaming read/write factories
//!
//! Streams buffer in memory by design: a read stream loads its byte range
//! up front and yields fixed-size chunks, a write stream accumulates chunks
//! and persists atomically at close. Cancellation is observed at the next
//! suspension point; a tripped signal discards buffered chunks.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;

use crate::cancel::CancelSignal;
use crate::error::FsError;
use crate::logging::*;
use crate::ops::{ReadOptions, TierFs, WriteOptions};

/// Default chunk size yielded by read streams
pub const DEFAULT_STREAM_CHUNK: usize = 64 * 1024;

/// Options for `create_read_stream`
#[derive(Debug, Clone, Default)]
pub struct ReadStreamOptions {
	/// First byte offset (default 0)
	pub start: Option<u64>,

	/// Last byte offset, inclusive (default: end of file)
	pub end: Option<u64>,

	pub chunk_size: Option<usize>,
	pub signal: Option<CancelSignal>,
}

/// Options for `create_write_stream`
#[derive(Debug, Clone, Default)]
pub struct WriteStreamOptions {
	/// Open flag token; defaults to `w`
	pub flag: Option<String>,

	pub mode: Option<u32>,
	pub signal: Option<CancelSignal>,
}

/// Byte-chunk producer over a fully buffered range
pub struct ReadStream {
	buf: Vec<u8>,
	pos: usize,
	chunk_size: usize,
	signal: Option<CancelSignal>,
}

impl ReadStream {
	/// Next chunk, or `None` at the end of the range
	pub fn next_chunk(&mut self) -> Option<Result<Vec<u8>, FsError>> {
		if let Some(signal) = &self.signal {
			if signal.is_tripped() {
				self.pos = self.buf.len();
				return Some(Err(FsError::aborted("read")));
			}
		}
		if self.pos >= self.buf.len() {
			return None;
		}
		let end = (self.pos + self.chunk_size).min(self.buf.len());
		let chunk = self.buf[self.pos..end].to_vec();
		self.pos = end;
		Some(Ok(chunk))
	}

	pub fn remaining(&self) -> usize {
		self.buf.len().saturating_sub(self.pos)
	}
}

impl Stream for ReadStream {
	type Item = Result<Vec<u8>, FsError>;

	fn poll_next(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
		Poll::Ready(self.get_mut().next_chunk())
	}
}

/// Byte-chunk consumer that persists atomically at close
pub struct WriteStream {
	fs: TierFs,
	path: String,
	buf: Vec<u8>,
	flag: String,
	mode: Option<u32>,
	signal: Option<CancelSignal>,
	closed: bool,
	aborted: bool,
}

impl WriteStream {
	/// Buffer one chunk
	///
	/// Fails with an abort error (and discards everything buffered) when
	/// the cancellation signal has tripped.
	pub async fn write(&mut self, chunk: &[u8]) -> Result<(), FsError> {
		if self.closed {
			return Err(FsError::bad_descriptor("write"));
		}
		if self.check_aborted() {
			return Err(FsError::aborted("write"));
		}
		self.buf.extend_from_slice(chunk);
		Ok(())
	}

	/// Discard buffered chunks and mark the stream aborted
	pub fn abort(&mut self) {
		self.aborted = true;
		self.buf = Vec::new();
	}

	/// Number of buffered bytes not yet persisted
	pub fn buffered(&self) -> usize {
		self.buf.len()
	}

	/// Concatenate the buffered chunks and persist them in one write
	///
	/// Idempotent; an aborted stream discards its buffer and reports the
	/// abort instead of writing.
	pub async fn close(&mut self) -> Result<(), FsError> {
		if self.closed {
			return Ok(());
		}
		self.closed = true;
		if self.check_aborted() {
			self.buf = Vec::new();
			return Err(FsError::aborted("write"));
		}
		let data = std::mem::take(&mut self.buf);
		let opts = WriteOptions {
			flag: Some(self.flag.clone()),
			mode: self.mode,
			signal: self.signal.clone(),
		};
		debug!("write stream closing {} with {} buffered bytes", self.path, data.len());
		self.fs.write_file(&self.path, &data, opts).await
	}

	fn check_aborted(&mut self) -> bool {
		if self.aborted {
			return true;
		}
		if let Some(signal) = &self.signal {
			if signal.is_tripped() {
				self.abort();
				return true;
			}
		}
		false
	}
}

impl TierFs {
	/// Open a byte-chunk producer over `[start, end]` of a file
	pub async fn create_read_stream(
		&self,
		path: &str,
		opts: ReadStreamOptions,
	) -> Result<ReadStream, FsError> {
		if let Some(signal) = &opts.signal {
			if signal.is_tripped() {
				return Err(FsError::aborted("read"));
			}
		}
		let size = self.stat(path).await?.size;
		let start = opts.start.unwrap_or(0).min(size);
		let end_excl = opts.end.map(|e| (e + 1).min(size)).unwrap_or(size);
		let length = end_excl.saturating_sub(start);

		let buf = self
			.read_file(
				path,
				ReadOptions {
					offset: Some(start),
					length: Some(length),
					signal: opts.signal.clone(),
				},
			)
			.await?;
		Ok(ReadStream {
			buf,
			pos: 0,
			chunk_size: opts.chunk_size.unwrap_or(DEFAULT_STREAM_CHUNK).max(1),
			signal: opts.signal,
		})
	}

	/// Open a byte-chunk consumer persisting at close
	pub async fn create_write_stream(
		&self,
		path: &str,
		opts: WriteStreamOptions,
	) -> Result<WriteStream, FsError> {
		if let Some(signal) = &opts.signal {
			if signal.is_tripped() {
				return Err(FsError::aborted("write"));
			}
		}
		Ok(WriteStream {
			fs: self.clone(),
			path: path.to_string(),
			buf: Vec::new(),
			flag: opts.flag.unwrap_or_else(|| "w".to_string()),
			mode: opts.mode,
			signal: opts.signal,
			closed: false,
			aborted: false,
		})
	}
}


// vim: ts=4
