//! Object-store backend over a directory tree
//!
//! Warm and cold tiers store each object as one file under a root
//! directory; `/` separators in keys become subdirectories. Out-of-space
//! errors from the filesystem surface as quota failures.

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;

use super::{BackendError, BackendResult, StorageBackend};

/// Directory-tree object store for the warm and cold tiers
#[derive(Debug)]
pub struct ObjectDirBackend {
	root: PathBuf,
}

impl ObjectDirBackend {
	/// Create the root directory if needed and return the backend
	pub fn new(root: impl Into<PathBuf>) -> BackendResult<Self> {
		let root = root.into();
		std::fs::create_dir_all(&root)?;
		Ok(ObjectDirBackend { root })
	}

	fn key_path(&self, key: &str) -> BackendResult<PathBuf> {
		if key.is_empty() || key.split('/').any(|seg| seg.is_empty() || seg == "." || seg == "..") {
			return Err(BackendError::InvalidKey { key: key.to_string() });
		}
		Ok(self.root.join(key))
	}
}

#[async_trait]
impl StorageBackend for ObjectDirBackend {
	async fn put(&self, key: &str, bytes: &[u8]) -> BackendResult<()> {
		let path = self.key_path(key)?;
		if let Some(parent) = path.parent() {
			tokio::fs::create_dir_all(parent).await?;
		}
		tokio::fs::write(&path, bytes).await.map_err(|e| {
			if e.kind() == io::ErrorKind::StorageFull {
				BackendError::Quota { key: key.to_string() }
			} else {
				BackendError::Io { source: e }
			}
		})
	}

	async fn get(&self, key: &str) -> BackendResult<Option<Vec<u8>>> {
		let path = self.key_path(key)?;
		match tokio::fs::read(&path).await {
			Ok(bytes) => Ok(Some(bytes)),
			Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
			Err(e) => Err(e.into()),
		}
	}

	async fn delete(&self, key: &str) -> BackendResult<bool> {
		let path = self.key_path(key)?;
		match tokio::fs::remove_file(&path).await {
			Ok(()) => Ok(true),
			Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
			Err(e) => Err(e.into()),
		}
	}

	async fn list(&self, prefix: &str) -> BackendResult<Vec<(String, Vec<u8>)>> {
		let mut out = Vec::new();
		let mut stack = vec![self.root.clone()];
		while let Some(dir) = stack.pop() {
			let mut entries = match tokio::fs::read_dir(&dir).await {
				Ok(rd) => rd,
				Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
				Err(e) => return Err(e.into()),
			};
			while let Some(entry) = entries.next_entry().await? {
				let path = entry.path();
				if entry.file_type().await?.is_dir() {
					stack.push(path);
					continue;
				}
				let key = relative_key(&self.root, &path);
				if key.starts_with(prefix) {
					let bytes = tokio::fs::read(&path).await?;
					out.push((key, bytes));
				}
			}
		}
		out.sort_by(|a, b| a.0.cmp(&b.0));
		Ok(out)
	}
}

fn relative_key(root: &Path, path: &Path) -> String {
	path.strip_prefix(root)
		.unwrap_or(path)
		.components()
		.map(|c| c.as_os_str().to_string_lossy())
		.collect::<Vec<_>>()
		.join("/")
}

#[cfg(test)]
mod tests {
	use super::*;
	use tempfile::TempDir;

	#[tokio::test]
	async fn test_object_round_trip() {
		let tmp = TempDir::new().unwrap();
		let backend = ObjectDirBackend::new(tmp.path().join("warm")).unwrap();

		backend.put("blob42/000000", b"chunk data").await.unwrap();
		assert_eq!(backend.get("blob42/000000").await.unwrap(), Some(b"chunk data".to_vec()));
		assert_eq!(backend.get("blob42/000001").await.unwrap(), None);
		assert!(backend.delete("blob42/000000").await.unwrap());
		assert!(!backend.delete("blob42/000000").await.unwrap());
	}

	#[tokio::test]
	async fn test_object_list_prefix() {
		let tmp = TempDir::new().unwrap();
		let backend = ObjectDirBackend::new(tmp.path().join("cold")).unwrap();

		backend.put("a/000000", b"1").await.unwrap();
		backend.put("a/000001", b"2").await.unwrap();
		backend.put("b/000000", b"3").await.unwrap();

		let listed = backend.list("a/").await.unwrap();
		assert_eq!(listed.len(), 2);
		assert_eq!(listed[0].0, "a/000000");
	}

	#[tokio::test]
	async fn test_rejects_traversal_keys() {
		let tmp = TempDir::new().unwrap();
		let backend = ObjectDirBackend::new(tmp.path().join("warm")).unwrap();
		assert!(backend.put("../escape", b"x").await.is_err());
		assert!(backend.put("a//b", b"x").await.is_err());
	}
}

// vim: ts=4
