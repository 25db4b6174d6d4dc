//! Append batching
//!
//! `AppendBatcher` accumulates small appends for one path and flushes them
//! as a single `append_file` when a byte threshold fills or a timer fires.
//! Each flush is atomic end-to-end, but the batcher is not concurrency-safe
//! across paths: two batchers on the same path may interleave their
//! committed appends in either order.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::error::FsError;
use crate::logging::*;
use crate::ops::TierFs;

/// Thresholds for the batcher
#[derive(Debug, Clone)]
pub struct BatcherOptions {
	/// Flush once this many bytes are pending
	pub max_bytes: usize,

	/// Flush at least this often while data is pending
	pub max_delay: Duration,
}

impl Default for BatcherOptions {
	fn default() -> Self {
		BatcherOptions { max_bytes: 64 * 1024, max_delay: Duration::from_millis(200) }
	}
}

struct BatchInner {
	fs: TierFs,
	path: String,
	max_bytes: usize,
	pending: Mutex<Vec<u8>>,
}

impl BatchInner {
	async fn flush(&self) -> Result<(), FsError> {
		let mut pending = self.pending.lock().await;
		if pending.is_empty() {
			return Ok(());
		}
		let data = std::mem::take(&mut *pending);
		// Hold the lock through the append so flushes cannot reorder
		self.fs.append_file(&self.path, &data, Default::default()).await
	}
}

/// Accumulates appends to one path and flushes on byte or time threshold
pub struct AppendBatcher {
	inner: Arc<BatchInner>,
	flusher: Option<JoinHandle<()>>,
}

impl AppendBatcher {
	pub fn new(fs: TierFs, path: impl Into<String>, opts: BatcherOptions) -> Self {
		let inner = Arc::new(BatchInner {
			fs,
			path: path.into(),
			max_bytes: opts.max_bytes.max(1),
			pending: Mutex::new(Vec::new()),
		});

		let ticker = inner.clone();
		let max_delay = opts.max_delay;
		let flusher = tokio::spawn(async move {
			let mut interval = tokio::time::interval(max_delay);
			interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
			loop {
				interval.tick().await;
				if let Err(e) = ticker.flush().await {
					warn!("timed flush of {} failed: {}", ticker.path, e);
				}
			}
		});

		AppendBatcher { inner, flusher: Some(flusher) }
	}

	/// Queue bytes; flushes inline once the byte threshold fills
	pub async fn append(&self, data: &[u8]) -> Result<(), FsError> {
		let should_flush = {
			let mut pending = self.inner.pending.lock().await;
			pending.extend_from_slice(data);
			pending.len() >= self.inner.max_bytes
		};
		if should_flush {
			self.inner.flush().await?;
		}
		Ok(())
	}

	/// Flush whatever is pending right now
	pub async fn flush(&self) -> Result<(), FsError> {
		self.inner.flush().await
	}

	/// Number of bytes waiting for the next flush
	pub async fn pending_bytes(&self) -> usize {
		self.inner.pending.lock().await.len()
	}

	/// Stop the timer and flush the remainder
	pub async fn close(mut self) -> Result<(), FsError> {
		if let Some(flusher) = self.flusher.take() {
			flusher.abort();
		}
		self.inner.flush().await
	}
}

impl Drop for AppendBatcher {
	fn drop(&mut self) {
		if let Some(flusher) = self.flusher.take() {
			flusher.abort();
		}
	}
}


// vim: ts=4
