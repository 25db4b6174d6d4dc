use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tierfs::metadata::{MetadataError, TxEvent, TxEventKind, TxStatus};
use tierfs::{FsError, TierFs, TransactionHooks, TxOptions};

fn fs() -> TierFs {
	TierFs::new_in_memory().unwrap()
}

struct RecordingHooks {
	events: Mutex<Vec<(TxEventKind, String, u32)>>,
}

impl TransactionHooks for RecordingHooks {
	fn on_event(&self, event: &TxEvent) {
		self.events.lock().unwrap().push((event.kind, event.tx_id.clone(), event.depth));
	}
}

#[tokio::test]
async fn test_busy_retry_scenario() {
	let fs = fs();
	let hooks = Arc::new(RecordingHooks { events: Mutex::new(Vec::new()) });
	fs.store().set_hooks(hooks.clone());

	let attempts = Arc::new(AtomicU32::new(0));
	let attempts_in = attempts.clone();
	let store = fs.store().clone();
	let result: Result<&'static str, FsError> = store
		.transaction(
			TxOptions { max_retries: 2, retry_delay_ms: 10, timeout: None },
			move || {
				let attempts = attempts_in.clone();
				Box::pin(async move {
					if attempts.fetch_add(1, Ordering::SeqCst) < 2 {
						Err(FsError::Metadata(MetadataError::busy("SQLITE_BUSY")))
					} else {
						Ok("done")
					}
				})
			},
		)
		.await;

	assert_eq!(result.unwrap(), "done");
	assert_eq!(attempts.load(Ordering::SeqCst), 3);

	let events = hooks.events.lock().unwrap();
	let retries = events.iter().filter(|(kind, _, _)| *kind == TxEventKind::Retry).count();
	let commits = events.iter().filter(|(kind, _, _)| *kind == TxEventKind::Commit).count();
	assert_eq!(retries, 2);
	assert_eq!(commits, 1);

	// Every event of one attempt carries the same transaction id
	let begin_ids: Vec<&String> = events
		.iter()
		.filter(|(kind, _, _)| *kind == TxEventKind::Begin)
		.map(|(_, id, _)| id)
		.collect();
	assert_eq!(begin_ids.len(), 3);
	assert!(!begin_ids[0].is_empty());
}

#[tokio::test]
async fn test_transaction_log_records_status() {
	let fs = fs();
	fs.write_file("/a", b"1", Default::default()).await.unwrap();
	fs.write_file("/b", b"2", Default::default()).await.unwrap();

	let log = fs.store().transaction_log();
	assert!(log.len() >= 2);
	assert!(log.iter().all(|entry| entry.status == TxStatus::Committed));
	assert!(log.iter().all(|entry| entry.ended_at >= entry.began_at));
}

#[tokio::test]
async fn test_rolled_back_operation_leaves_no_trace() {
	let fs = fs();
	fs.mkdir("/d", Default::default()).await.unwrap();

	// Failing operation: exclusive write against an existing path, after
	// the transaction already begun
	fs.write_file("/d/f", b"x", Default::default()).await.unwrap();
	let err = fs
		.write_file(
			"/d/f",
			b"y",
			tierfs::ops::WriteOptions { flag: Some("wx".to_string()), ..Default::default() },
		)
		.await
		.unwrap_err();
	assert_eq!(err.kind(), tierfs::ErrorKind::Eexist);

	let log = fs.store().transaction_log();
	assert_eq!(log.last().unwrap().status, TxStatus::RolledBack);
	assert_eq!(fs.read_file_string("/d/f", "utf-8").await.unwrap(), "x");
}

#[tokio::test]
async fn test_nested_savepoints_through_store() {
	let fs = fs();
	let store = fs.store();

	store.begin().unwrap();
	fs.write_file("/outer", b"kept", Default::default()).await.unwrap();
	store.begin().unwrap();
	fs.write_file("/inner", b"dropped", Default::default()).await.unwrap();
	store.rollback().unwrap();
	store.commit().unwrap();

	assert!(fs.exists("/outer").await.unwrap());
	assert!(!fs.exists("/inner").await.unwrap());
}

#[tokio::test]
async fn test_wall_clock_timeout_rolls_back() {
	let fs = fs();
	let store = fs.store().clone();
	let result: Result<(), FsError> = store
		.transaction(
			TxOptions {
				max_retries: 0,
				retry_delay_ms: 1,
				timeout: Some(Duration::from_millis(30)),
			},
			|| {
				Box::pin(async {
					tokio::time::sleep(Duration::from_secs(10)).await;
					Ok(())
				})
			},
		)
		.await;

	assert!(matches!(result, Err(FsError::Metadata(MetadataError::Timeout { .. }))));
	assert_eq!(fs.store().transaction_depth(), 0);
	assert_eq!(fs.store().transaction_log().last().unwrap().status, TxStatus::TimedOut);
}

#[tokio::test]
async fn test_recover_transactions_quiesces() {
	let fs = fs();
	fs.store().begin().unwrap();
	fs.store().begin().unwrap();
	assert_eq!(fs.store().transaction_depth(), 2);

	fs.store().recover_transactions().unwrap();
	assert_eq!(fs.store().transaction_depth(), 0);

	// Store is fully usable afterwards
	fs.write_file("/after", b"ok", Default::default()).await.unwrap();
	assert!(fs.exists("/after").await.unwrap());
}
