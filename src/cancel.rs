//! Cancellation signals
//!
//! Operations that accept a [`CancelSignal`] fail immediately with an abort
//! error when the signal is already tripped, and otherwise observe the
//! signal at their next suspension point. Pending backend I/O is never
//! forcibly interrupted.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

/// A cheap-to-clone, trip-once cancellation token
#[derive(Debug, Clone, Default)]
pub struct CancelSignal {
	inner: Arc<CancelInner>,
}

#[derive(Debug, Default)]
struct CancelInner {
	tripped: AtomicBool,
	notify: Notify,
}

impl CancelSignal {
	pub fn new() -> Self {
		Self::default()
	}

	/// Trip the signal; idempotent
	pub fn trip(&self) {
		self.inner.tripped.store(true, Ordering::SeqCst);
		self.inner.notify.notify_waiters();
	}

	pub fn is_tripped(&self) -> bool {
		self.inner.tripped.load(Ordering::SeqCst)
	}

	/// Wait until the signal trips
	pub async fn tripped(&self) {
		loop {
			if self.is_tripped() {
				return;
			}
			self.inner.notify.notified().await;
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_trip_is_sticky() {
		let sig = CancelSignal::new();
		assert!(!sig.is_tripped());
		sig.trip();
		sig.trip();
		assert!(sig.is_tripped());
		assert!(sig.clone().is_tripped());
	}

	#[tokio::test]
	async fn test_tripped_wakes_waiter() {
		let sig = CancelSignal::new();
		let waiter = sig.clone();
		let task = tokio::spawn(async move { waiter.tripped().await });
		sig.trip();
		task.await.unwrap();
	}
}

// vim: ts=4
