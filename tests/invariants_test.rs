//! Store-level invariants checked after mixed operation sequences.

use tierfs::ops::MkdirOptions;
use tierfs::TierFs;

fn fs() -> TierFs {
	TierFs::new_in_memory().unwrap()
}

/// Walk the whole store and assert the structural invariants.
fn check_invariants(fs: &TierFs) {
	let store = fs.store();
	let root = store.get_entry_by_path("/").unwrap().expect("root must exist");
	assert!(root.is_directory());
	assert!(root.parent_id.is_none());

	let mut entries = store.list_subtree("/").unwrap();
	entries.push(root);

	for entry in &entries {
		// Every non-root entry hangs off an existing directory whose path
		// prefixes its own
		if let Some(parent_id) = &entry.parent_id {
			let parent = store.get_entry(parent_id).unwrap().expect("parent must exist");
			assert!(parent.is_directory(), "parent of {} is not a directory", entry.path);
			let expected_prefix =
				if parent.path == "/" { "/".to_string() } else { format!("{}/", parent.path) };
			assert!(
				entry.path.starts_with(&expected_prefix),
				"{} not under {}",
				entry.path,
				parent.path
			);
		}

		// Files with payload reference a live blob of equal size
		match &entry.blob_id {
			Some(blob_id) => {
				let blob = store.get_blob(blob_id).unwrap().expect("referenced blob must exist");
				assert_eq!(blob.size, entry.size, "blob/entry size mismatch for {}", entry.path);
			}
			None => {
				if entry.is_file() {
					assert_eq!(entry.size, 0, "file {} has size but no blob", entry.path);
				}
			}
		}

		// Timestamps are ordered
		assert!(entry.mtime >= entry.birthtime);
		assert!(entry.ctime >= entry.birthtime);
	}

	// Every blob refcount equals its live entry references
	for blob in store.list_blobs().unwrap() {
		let live = store.count_blob_references(&blob.id).unwrap();
		assert_eq!(blob.ref_count, live, "refcount drift on blob {}", blob.id);
	}
}

#[tokio::test]
async fn test_invariants_after_write_heavy_sequence() {
	let fs = fs();
	fs.mkdir("/a/b", MkdirOptions { recursive: true, mode: None }).await.unwrap();
	for i in 0..10 {
		fs.write_file(&format!("/a/f{}", i), &vec![i as u8; 100 * i], Default::default())
			.await
			.unwrap();
	}
	fs.write_file("/a/f3", b"overwritten", Default::default()).await.unwrap();
	fs.append_file("/a/f4", b" plus tail", Default::default()).await.unwrap();
	check_invariants(&fs);
}

#[tokio::test]
async fn test_invariants_after_links_and_copies() {
	let fs = fs();
	fs.write_file("/base", &vec![9u8; 5000], Default::default()).await.unwrap();
	fs.link("/base", "/hard1").await.unwrap();
	fs.link("/base", "/hard2").await.unwrap();
	fs.copy_file("/base", "/copy", Default::default()).await.unwrap();
	fs.symlink("/base", "/soft").await.unwrap();
	check_invariants(&fs);

	fs.unlink("/hard1").await.unwrap();
	fs.unlink("/base").await.unwrap();
	check_invariants(&fs);

	fs.unlink("/hard2").await.unwrap();
	fs.unlink("/copy").await.unwrap();
	check_invariants(&fs);

	// All payload references are gone now
	assert!(fs.store().list_blobs().unwrap().is_empty());
}

#[tokio::test]
async fn test_invariants_after_renames_and_removals() {
	let fs = fs();
	fs.mkdir("/x/y/z", MkdirOptions { recursive: true, mode: None }).await.unwrap();
	fs.write_file("/x/y/z/deep", b"deep", Default::default()).await.unwrap();
	fs.write_file("/x/top", b"top", Default::default()).await.unwrap();
	fs.rename("/x/y", "/moved", Default::default()).await.unwrap();
	check_invariants(&fs);

	fs.rm("/moved", tierfs::ops::RemoveOptions { recursive: true, force: false })
		.await
		.unwrap();
	check_invariants(&fs);
}

#[tokio::test]
async fn test_invariants_after_truncates() {
	let fs = fs();
	let page = tierfs::pages::PAGE_SIZE;
	fs.write_file("/t", &vec![1u8; 2 * page + 500], Default::default()).await.unwrap();
	fs.truncate("/t", page as u64 + 1).await.unwrap();
	check_invariants(&fs);
	fs.truncate("/t", 3 * page as u64).await.unwrap();
	check_invariants(&fs);
	fs.truncate("/t", 0).await.unwrap();
	check_invariants(&fs);
}

#[tokio::test]
async fn test_write_unlink_leaves_nothing() {
	let fs = fs();
	fs.write_file("/tmp.bin", &vec![5u8; 4096], Default::default()).await.unwrap();
	fs.unlink("/tmp.bin").await.unwrap();
	assert!(!fs.exists("/tmp.bin").await.unwrap());
	assert!(fs.store().list_blobs().unwrap().is_empty());
	check_invariants(&fs);
}
