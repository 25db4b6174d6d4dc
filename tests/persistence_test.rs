use std::sync::Arc;

use tempfile::TempDir;
use tierfs::backend::{ObjectDirBackend, RedbBackend};
use tierfs::{TierConfig, TierFs, Tier};

fn open_fs(dir: &TempDir) -> TierFs {
	let mut config = TierConfig::default();
	config.thresholds.hot_max_size = 1024;
	config.thresholds.warm_max_size = 1024 * 1024;

	TierFs::builder()
		.config(config)
		.metadata_path(dir.path().join("meta.db"))
		.hot_backend(Arc::new(RedbBackend::open(&dir.path().join("hot.redb")).unwrap()))
		.warm_backend(Arc::new(ObjectDirBackend::new(dir.path().join("warm")).unwrap()))
		.cold_backend(Arc::new(ObjectDirBackend::new(dir.path().join("cold")).unwrap()))
		.build()
		.unwrap()
}

#[tokio::test]
async fn test_data_survives_reopen() {
	let dir = TempDir::new().unwrap();
	{
		let fs = open_fs(&dir);
		fs.write_file("/small.txt", b"hot payload", Default::default()).await.unwrap();
		fs.write_file("/medium.bin", &vec![42u8; 10_000], Default::default()).await.unwrap();
		fs.mkdir("/docs", Default::default()).await.unwrap();
		fs.symlink("/small.txt", "/docs/link").await.unwrap();
	}

	let fs = open_fs(&dir);
	assert_eq!(fs.read_file_string("/small.txt", "utf-8").await.unwrap(), "hot payload");
	assert_eq!(fs.read_file("/medium.bin", Default::default()).await.unwrap(), vec![42u8; 10_000]);
	assert_eq!(fs.stat("/small.txt").await.unwrap().tier, Some(Tier::Hot));
	assert_eq!(fs.stat("/medium.bin").await.unwrap().tier, Some(Tier::Warm));
	assert_eq!(fs.read_file_string("/docs/link", "utf-8").await.unwrap(), "hot payload");
}

#[tokio::test]
async fn test_reopen_resyncs_diverged_refcounts() {
	let dir = TempDir::new().unwrap();
	let blob_id;
	{
		let fs = open_fs(&dir);
		fs.write_file("/f", b"payload", Default::default()).await.unwrap();
		blob_id = fs.stat("/f").await.unwrap().blob_id.unwrap();
		// Simulate a crash leaving a wrong count behind
		fs.store().set_ref_count(&blob_id, 12).unwrap();
	}

	let fs = open_fs(&dir);
	let blob = fs.store().get_blob(&blob_id).unwrap().unwrap();
	assert_eq!(blob.ref_count, 1);
}

#[tokio::test]
async fn test_orphan_sweep_after_reopen() {
	let dir = TempDir::new().unwrap();
	let blob_id;
	{
		let fs = open_fs(&dir);
		fs.write_file("/doomed", b"orphan bytes", Default::default()).await.unwrap();
		blob_id = fs.stat("/doomed").await.unwrap().blob_id.unwrap();
		// Simulate a crash between entry delete and blob release
		if let Some(entry) = fs.store().get_entry_by_path("/doomed").unwrap() {
			fs.store().delete_entry(&entry.id).unwrap();
		}
	}

	let fs = open_fs(&dir);
	// Startup resync zeroes the count; the sweep then collects it
	let swept = fs.sweep_orphans().await.unwrap();
	assert_eq!(swept, 1);
	assert!(fs.store().get_blob(&blob_id).unwrap().is_none());
}

#[tokio::test]
async fn test_rename_survives_reopen() {
	let dir = TempDir::new().unwrap();
	{
		let fs = open_fs(&dir);
		fs.mkdir("/a", Default::default()).await.unwrap();
		fs.write_file("/a/f", b"v", Default::default()).await.unwrap();
		fs.rename("/a", "/b", Default::default()).await.unwrap();
	}

	let fs = open_fs(&dir);
	assert!(!fs.exists("/a").await.unwrap());
	assert_eq!(fs.read_file_string("/b/f", "utf-8").await.unwrap(), "v");
}
