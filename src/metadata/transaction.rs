//! Transaction lifecycle for the metadata store
//!
//! Transactions nest through a depth counter: depth 0 issues `BEGIN`, every
//! deeper level creates a uniquely named savepoint. Outermost commit issues
//! `COMMIT`, inner commits release their savepoint; rollback at depth 1
//! aborts the whole transaction, deeper rollbacks only abort the savepoint.
//! An optional timer forces a full `ROLLBACK` when it fires, whatever the
//! current level. The `transaction` helper retries on contention signals
//! with exponential backoff.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};

use crate::error::FsError;
use crate::logging::*;
use crate::util::{new_id, now_ms};

use super::store::{MetadataStore, StoreInner};
use super::MetadataError;

/// Default bound for the in-memory transaction log
const TX_LOG_CAPACITY: usize = 128;

/// Options for the retrying `transaction` helper
#[derive(Debug, Clone)]
pub struct TxOptions {
	/// Retries after the first attempt when the error is retryable
	pub max_retries: u32,

	/// Base backoff; the delay doubles each attempt
	pub retry_delay_ms: u64,

	/// Wall-clock bound for the entire call, retries included
	pub timeout: Option<Duration>,
}

impl Default for TxOptions {
	fn default() -> Self {
		TxOptions { max_retries: 3, retry_delay_ms: 50, timeout: None }
	}
}

/// Transaction lifecycle events delivered to hooks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxEventKind {
	Begin,
	Commit,
	Rollback,
	Retry,
	Timeout,
}

/// One observability event
#[derive(Debug, Clone)]
pub struct TxEvent {
	pub kind: TxEventKind,

	/// Per-transaction opaque id
	pub tx_id: String,

	/// Nesting depth after the operation applied
	pub depth: u32,

	/// Milliseconds since the outermost begin
	pub elapsed_ms: u64,

	/// Rollback reason, when one is known
	pub reason: Option<String>,
}

/// Observer interface for transaction lifecycle events
pub trait TransactionHooks: Send + Sync {
	fn on_event(&self, event: &TxEvent);
}

/// Final status of a completed transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxStatus {
	Committed,
	RolledBack,
	TimedOut,
}

/// Bounded log record of one completed transaction
#[derive(Debug, Clone)]
pub struct TxLogEntry {
	pub tx_id: String,
	pub began_at: i64,
	pub ended_at: i64,
	pub status: TxStatus,
	pub retry_count: u32,
	pub reason: Option<String>,
}

#[derive(Default)]
struct TxState {
	depth: u32,
	savepoints: Vec<String>,
	savepoint_seq: u64,
	tx_id: Option<String>,
	last_tx_id: Option<String>,
	began_at: Option<Instant>,
	began_at_ms: i64,
	retry_count: u32,
	pending_retry_count: u32,
	timer: Option<tokio::task::JoinHandle<()>>,
}

pub(super) struct TxController {
	state: Mutex<TxState>,
	hooks: Mutex<Option<Arc<dyn TransactionHooks>>>,
	log: Mutex<VecDeque<TxLogEntry>>,
	log_capacity: usize,
}

impl TxController {
	pub(super) fn new() -> Self {
		TxController {
			state: Mutex::new(TxState::default()),
			hooks: Mutex::new(None),
			log: Mutex::new(VecDeque::new()),
			log_capacity: TX_LOG_CAPACITY,
		}
	}

	fn lock_state(&self) -> std::sync::MutexGuard<'_, TxState> {
		self.state.lock().unwrap_or_else(|poison| poison.into_inner())
	}

	fn emit(&self, event: TxEvent) {
		let hooks = self.hooks.lock().unwrap_or_else(|poison| poison.into_inner()).clone();
		if let Some(hooks) = hooks {
			hooks.on_event(&event);
		}
	}

	fn push_log(&self, entry: TxLogEntry) {
		let mut log = self.log.lock().unwrap_or_else(|poison| poison.into_inner());
		if log.len() >= self.log_capacity {
			log.pop_front();
		}
		log.push_back(entry);
	}
}

impl MetadataStore {
	/// Open a transaction level: `BEGIN` at depth 0, a savepoint otherwise
	pub fn begin(&self) -> Result<(), MetadataError> {
		self.begin_with_timeout(None)
	}

	/// Like [`begin`](Self::begin) but arms a timer that forces a full
	/// rollback when it fires, whatever the nesting level at that moment
	pub fn begin_with_timeout(&self, timeout: Option<Duration>) -> Result<(), MetadataError> {
		let tx = &self.inner.tx;
		let event = {
			let conn = self.lock_conn();
			let mut st = tx.lock_state();
			if st.depth == 0 {
				conn.execute_batch("BEGIN")?;
				let id = new_id();
				st.tx_id = Some(id.clone());
				st.last_tx_id = Some(id);
				st.began_at = Some(Instant::now());
				st.began_at_ms = now_ms();
				st.retry_count = st.pending_retry_count;
				st.pending_retry_count = 0;
			} else {
				st.savepoint_seq += 1;
				let name = format!("sp_{}", st.savepoint_seq);
				conn.execute_batch(&format!("SAVEPOINT {}", name))?;
				st.savepoints.push(name);
			}
			st.depth += 1;
			tx_event(&st, TxEventKind::Begin, None)
		};
		tx.emit(event);

		if let Some(duration) = timeout {
			self.arm_timer(duration);
		}
		Ok(())
	}

	/// Close one transaction level: `COMMIT` at the outermost level,
	/// `RELEASE` of the matching savepoint otherwise
	pub fn commit(&self) -> Result<(), MetadataError> {
		let tx = &self.inner.tx;
		let (event, log_entry) = {
			let conn = self.lock_conn();
			let mut st = tx.lock_state();
			match st.depth {
				0 => return Err(MetadataError::NoTransaction { op: "commit" }),
				1 => {
					conn.execute_batch("COMMIT")?;
					st.depth = 0;
					let event = tx_event(&st, TxEventKind::Commit, None);
					let log_entry = finish_log(&st, TxStatus::Committed, None);
					clear_state(&mut st);
					(event, Some(log_entry))
				}
				_ => {
					let name = st.savepoints.pop().unwrap_or_else(|| "sp_0".to_string());
					conn.execute_batch(&format!("RELEASE SAVEPOINT {}", name))?;
					st.depth -= 1;
					(tx_event(&st, TxEventKind::Commit, None), None)
				}
			}
		};
		tx.emit(event);
		if let Some(entry) = log_entry {
			tx.push_log(entry);
		}
		Ok(())
	}

	/// Abort one transaction level: a full `ROLLBACK` at the outermost
	/// level, a savepoint rollback otherwise
	pub fn rollback(&self) -> Result<(), MetadataError> {
		self.rollback_with_reason(None)
	}

	pub fn rollback_with_reason(&self, reason: Option<String>) -> Result<(), MetadataError> {
		let tx = &self.inner.tx;
		let (event, log_entry) = {
			let conn = self.lock_conn();
			let mut st = tx.lock_state();
			match st.depth {
				0 => return Err(MetadataError::NoTransaction { op: "rollback" }),
				1 => {
					conn.execute_batch("ROLLBACK")?;
					st.depth = 0;
					let event = tx_event(&st, TxEventKind::Rollback, reason.clone());
					let log_entry = finish_log(&st, TxStatus::RolledBack, reason);
					clear_state(&mut st);
					(event, Some(log_entry))
				}
				_ => {
					let name = st.savepoints.pop().unwrap_or_else(|| "sp_0".to_string());
					conn.execute_batch(&format!(
						"ROLLBACK TO SAVEPOINT {0}; RELEASE SAVEPOINT {0}",
						name
					))?;
					st.depth -= 1;
					(tx_event(&st, TxEventKind::Rollback, reason), None)
				}
			}
		};
		tx.emit(event);
		if let Some(entry) = log_entry {
			tx.push_log(entry);
		}
		Ok(())
	}

	/// Current nesting depth (0 when quiescent)
	pub fn transaction_depth(&self) -> u32 {
		self.inner.tx.lock_state().depth
	}

	/// Install the lifecycle observer
	pub fn set_hooks(&self, hooks: Arc<dyn TransactionHooks>) {
		*self.inner.tx.hooks.lock().unwrap_or_else(|poison| poison.into_inner()) = Some(hooks);
	}

	/// Snapshot of the bounded transaction log, oldest first
	pub fn transaction_log(&self) -> Vec<TxLogEntry> {
		self.inner.tx.log.lock().unwrap_or_else(|poison| poison.into_inner()).iter().cloned().collect()
	}

	/// Clear any leaked transaction state; called at init
	///
	/// Aborts a pending timer, rolls back a transaction left open by a
	/// crashed caller and returns the store to a quiescent condition.
	pub fn recover_transactions(&self) -> Result<(), MetadataError> {
		let tx = &self.inner.tx;
		let recovered = {
			let conn = self.lock_conn();
			let mut st = tx.lock_state();
			let leaked = st.depth > 0 || !conn.is_autocommit();
			if !conn.is_autocommit() {
				conn.execute_batch("ROLLBACK")?;
			}
			let entry = if st.depth > 0 {
				Some(finish_log(&st, TxStatus::RolledBack, Some("recovered at init".to_string())))
			} else {
				None
			};
			clear_state(&mut st);
			if leaked {
				warn!("recovered leaked metadata transaction state");
			}
			entry
		};
		if let Some(entry) = recovered {
			tx.push_log(entry);
		}
		Ok(())
	}

	/// Run `f` inside `begin`/`commit`, rolling back on error and retrying
	/// the whole function when the error is classified as retryable
	///
	/// The retry delay is exponential (`retry_delay_ms * 2^attempt`); the
	/// optional `timeout` bounds the entire call including retries.
	pub async fn transaction<T>(
		&self,
		opts: TxOptions,
		f: impl Fn() -> std::pin::Pin<Box<dyn Future<Output = Result<T, FsError>> + Send>>,
	) -> Result<T, FsError> {
		let started = Instant::now();
		let run = async {
			let mut attempt: u32 = 0;
			loop {
				self.begin()?;
				match f().await {
					Ok(value) => {
						self.commit()?;
						return Ok(value);
					}
					Err(e) => {
						let _ = self.rollback_with_reason(Some(e.to_string()));
						if e.is_retryable() && attempt < opts.max_retries {
							self.note_retry(attempt + 1, &e);
							let delay =
								opts.retry_delay_ms.saturating_mul(1u64 << attempt.min(16));
							tokio::time::sleep(Duration::from_millis(delay)).await;
							attempt += 1;
							continue;
						}
						return Err(e);
					}
				}
			}
		};

		match opts.timeout {
			None => run.await,
			Some(bound) => match tokio::time::timeout(bound, run).await {
				Ok(result) => result,
				Err(_) => {
					self.force_timeout();
					Err(FsError::Metadata(MetadataError::Timeout {
						elapsed_ms: started.elapsed().as_millis() as u64,
					}))
				}
			},
		}
	}

	fn note_retry(&self, retry_count: u32, error: &FsError) {
		let tx = &self.inner.tx;
		let event = {
			let mut st = tx.lock_state();
			st.pending_retry_count = retry_count;
			TxEvent {
				kind: TxEventKind::Retry,
				tx_id: st.last_tx_id.clone().unwrap_or_default(),
				depth: st.depth,
				elapsed_ms: 0,
				reason: Some(error.to_string()),
			}
		};
		debug!("retrying metadata transaction (attempt {}): {}", retry_count, event.reason.as_deref().unwrap_or(""));
		tx.emit(event);
	}

	/// Roll back whatever is open and clear depth, used by timers
	fn force_timeout(&self) {
		let tx = &self.inner.tx;
		let result = {
			let conn = self.lock_conn();
			let mut st = tx.lock_state();
			if st.depth == 0 {
				None
			} else {
				let rolled_back = conn.execute_batch("ROLLBACK").is_ok();
				let event = tx_event(&st, TxEventKind::Timeout, Some("timeout".to_string()));
				let entry = finish_log(&st, TxStatus::TimedOut, Some("timeout".to_string()));
				clear_state(&mut st);
				Some((event, entry, rolled_back))
			}
		};
		if let Some((event, entry, rolled_back)) = result {
			if !rolled_back {
				error!("forced rollback failed during transaction timeout");
			}
			tx.emit(event);
			tx.push_log(entry);
		}
	}

	fn arm_timer(&self, duration: Duration) {
		let weak: Weak<StoreInner> = Arc::downgrade(&self.inner);
		let armed_tx = self.inner.tx.lock_state().tx_id.clone();
		let handle = tokio::spawn(async move {
			tokio::time::sleep(duration).await;
			if let Some(inner) = weak.upgrade() {
				let store = MetadataStore { inner };
				// Only fire if the armed transaction is still the open one
				let still_open = store.inner.tx.lock_state().tx_id == armed_tx;
				if still_open {
					warn!("transaction timer fired, forcing rollback");
					store.force_timeout();
				}
			}
		});
		let mut st = self.inner.tx.lock_state();
		if let Some(old) = st.timer.take() {
			old.abort();
		}
		st.timer = Some(handle);
	}
}

fn tx_event(st: &TxState, kind: TxEventKind, reason: Option<String>) -> TxEvent {
	TxEvent {
		kind,
		tx_id: st.tx_id.clone().or_else(|| st.last_tx_id.clone()).unwrap_or_default(),
		depth: st.depth,
		elapsed_ms: st.began_at.map(|t| t.elapsed().as_millis() as u64).unwrap_or(0),
		reason,
	}
}

fn finish_log(st: &TxState, status: TxStatus, reason: Option<String>) -> TxLogEntry {
	TxLogEntry {
		tx_id: st.tx_id.clone().or_else(|| st.last_tx_id.clone()).unwrap_or_default(),
		began_at: st.began_at_ms,
		ended_at: now_ms(),
		status,
		retry_count: st.retry_count,
		reason,
	}
}

fn clear_state(st: &mut TxState) {
	st.depth = 0;
	st.savepoints.clear();
	st.tx_id = None;
	st.began_at = None;
	if let Some(timer) = st.timer.take() {
		timer.abort();
	}
}


// vim: ts=4
