use tierfs::{ErrorKind, TierFs};

fn fs() -> TierFs {
	TierFs::new_in_memory().unwrap()
}

#[tokio::test]
async fn test_hard_link_refcount_lifecycle() {
	let fs = fs();
	let payload = vec![7u8; 64];
	fs.write_file("/p", &payload, Default::default()).await.unwrap();
	fs.link("/p", "/q").await.unwrap();

	let blob_id = fs.stat("/p").await.unwrap().blob_id.unwrap();
	let blob = fs.store().get_blob(&blob_id).unwrap().unwrap();
	assert_eq!(blob.ref_count, 2);
	assert_eq!(fs.stat("/p").await.unwrap().nlink, 2);
	assert_eq!(fs.stat("/q").await.unwrap().nlink, 2);

	fs.unlink("/p").await.unwrap();
	let blob = fs.store().get_blob(&blob_id).unwrap().unwrap();
	assert_eq!(blob.ref_count, 1);
	assert_eq!(fs.read_file("/q", Default::default()).await.unwrap(), payload);
	assert_eq!(fs.stat("/q").await.unwrap().nlink, 1);

	fs.unlink("/q").await.unwrap();
	assert!(fs.store().get_blob(&blob_id).unwrap().is_none());
}

#[tokio::test]
async fn test_link_errors() {
	let fs = fs();
	assert_eq!(fs.link("/missing", "/l").await.unwrap_err().kind(), ErrorKind::Enoent);

	fs.mkdir("/dir", Default::default()).await.unwrap();
	assert_eq!(fs.link("/dir", "/l").await.unwrap_err().kind(), ErrorKind::Eperm);

	fs.write_file("/f", b"x", Default::default()).await.unwrap();
	fs.write_file("/taken", b"y", Default::default()).await.unwrap();
	assert_eq!(fs.link("/f", "/taken").await.unwrap_err().kind(), ErrorKind::Eexist);
}

#[tokio::test]
async fn test_symlink_loop_detection() {
	let fs = fs();
	fs.symlink("/b", "/a").await.unwrap();
	fs.symlink("/a", "/b").await.unwrap();

	let err = fs.stat("/a").await.unwrap_err();
	assert_eq!(err.kind(), ErrorKind::Eloop);

	let lstats = fs.lstat("/a").await.unwrap();
	assert!(lstats.is_symbolic_link());
}

#[tokio::test]
async fn test_stat_follows_lstat_does_not() {
	let fs = fs();
	fs.write_file("/target", b"content", Default::default()).await.unwrap();
	fs.symlink("/target", "/link").await.unwrap();

	let stats = fs.stat("/link").await.unwrap();
	assert!(stats.is_file());
	assert_eq!(stats.size, 7);

	let lstats = fs.lstat("/link").await.unwrap();
	assert!(lstats.is_symbolic_link());
	assert_eq!(lstats.size, "/target".len() as u64);
}

#[tokio::test]
async fn test_read_through_symlink_chain() {
	let fs = fs();
	fs.write_file("/real", b"deep", Default::default()).await.unwrap();
	fs.symlink("/real", "/one").await.unwrap();
	fs.symlink("/one", "/two").await.unwrap();

	assert_eq!(fs.read_file_string("/two", "utf-8").await.unwrap(), "deep");
}

#[tokio::test]
async fn test_broken_symlink_is_enoent() {
	let fs = fs();
	fs.symlink("/nowhere", "/dangling").await.unwrap();
	assert_eq!(fs.stat("/dangling").await.unwrap_err().kind(), ErrorKind::Enoent);
	assert!(!fs.exists("/dangling").await.unwrap());
	// The link itself is visible
	assert!(fs.lstat("/dangling").await.unwrap().is_symbolic_link());
}

#[tokio::test]
async fn test_write_through_dangling_symlink_creates_target() {
	let fs = fs();
	fs.symlink("/created-later", "/via").await.unwrap();
	fs.write_file("/via", b"materialized", Default::default()).await.unwrap();

	assert_eq!(fs.read_file_string("/created-later", "utf-8").await.unwrap(), "materialized");
	assert!(fs.lstat("/via").await.unwrap().is_symbolic_link());
}

#[tokio::test]
async fn test_readlink() {
	let fs = fs();
	fs.symlink("relative/target", "/link").await.unwrap();
	assert_eq!(fs.readlink("/link").await.unwrap(), "relative/target");

	fs.write_file("/plain", b"x", Default::default()).await.unwrap();
	assert_eq!(fs.readlink("/plain").await.unwrap_err().kind(), ErrorKind::Einval);
}

#[tokio::test]
async fn test_realpath_resolves_components() {
	let fs = fs();
	fs.mkdir("/real/dir", tierfs::ops::MkdirOptions { recursive: true, mode: None })
		.await
		.unwrap();
	fs.write_file("/real/dir/file", b"x", Default::default()).await.unwrap();
	fs.symlink("/real", "/alias").await.unwrap();
	fs.symlink("dir", "/real/shortcut").await.unwrap();

	assert_eq!(fs.realpath("/alias/dir/file").await.unwrap(), "/real/dir/file");
	assert_eq!(fs.realpath("/real/shortcut/file").await.unwrap(), "/real/dir/file");
	assert_eq!(fs.realpath("/real/dir/../dir/file").await.unwrap(), "/real/dir/file");

	assert_eq!(fs.realpath("/alias/missing").await.unwrap_err().kind(), ErrorKind::Enoent);
}

#[tokio::test]
async fn test_realpath_loop_is_eloop() {
	let fs = fs();
	fs.symlink("/loop-b", "/loop-a").await.unwrap();
	fs.symlink("/loop-a", "/loop-b").await.unwrap();
	assert_eq!(fs.realpath("/loop-a").await.unwrap_err().kind(), ErrorKind::Eloop);
}

#[tokio::test]
async fn test_symlink_on_existing_path_is_eexist() {
	let fs = fs();
	fs.write_file("/occupied", b"x", Default::default()).await.unwrap();
	assert_eq!(
		fs.symlink("/anywhere", "/occupied").await.unwrap_err().kind(),
		ErrorKind::Eexist
	);
}
