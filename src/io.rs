//! I/O managers for archive storage backends

use crate::error::{BatchError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// Storage backend types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    /// Local file system
    FileSystem,
    /// Process-local map, for tests and in-memory pipelines
    Memory,
}

impl StorageBackend {
    /// Parse storage backend from URL scheme
    pub fn from_url(url: &str) -> Result<Self> {
        if let Some(scheme_end) = url.find("://") {
            let scheme = &url[..scheme_end];
            match scheme {
                "file" => Ok(StorageBackend::FileSystem),
                "mem" => Ok(StorageBackend::Memory),
                _ => Err(BatchError::InvalidUrl(format!("Unknown scheme: {}", scheme))),
            }
        } else {
            // Assume file system if no scheme
            Ok(StorageBackend::FileSystem)
        }
    }
}

/// Trait for I/O operations on per-item archive files.
///
/// Paths are relative, `/`-separated, e.g. `patient-1/data.blk`.
#[async_trait]
pub trait IOManager: Send + Sync {
    /// Read data from a path
    async fn read(&self, path: &str) -> Result<Bytes>;

    /// Write data to a path, creating parent directories
    async fn write(&self, path: &str, data: &[u8]) -> Result<()>;

    /// Check if a path exists
    async fn exists(&self, path: &str) -> Result<bool>;

    /// Remove a directory and everything below it; missing directories are fine
    async fn delete_dir(&self, path: &str) -> Result<()>;

    /// List entries directly below a prefix
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;

    /// Get the backend type
    fn backend(&self) -> StorageBackend;
}

/// File system I/O manager
pub struct FileSystemIOManager {
    base_path: PathBuf,
}

impl FileSystemIOManager {
    /// Create a new file system I/O manager
    pub fn new(base_path: impl AsRef<Path>) -> Self {
        Self {
            base_path: base_path.as_ref().to_path_buf(),
        }
    }

    /// Get the full path for a relative path
    fn full_path(&self, path: &str) -> PathBuf {
        self.base_path.join(path)
    }
}

#[async_trait]
impl IOManager for FileSystemIOManager {
    async fn read(&self, path: &str) -> Result<Bytes> {
        let full_path = self.full_path(path);
        match fs::read(&full_path).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(BatchError::NotFound(full_path.display().to_string()))
            }
            Err(e) => Err(BatchError::Io(e)),
        }
    }

    async fn write(&self, path: &str, data: &[u8]) -> Result<()> {
        let full_path = self.full_path(path);

        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let mut file = fs::File::create(&full_path).await?;
        file.write_all(data).await?;
        file.flush().await?;
        Ok(())
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        Ok(fs::try_exists(self.full_path(path)).await?)
    }

    async fn delete_dir(&self, path: &str) -> Result<()> {
        match fs::remove_dir_all(self.full_path(path)).await {
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            other => Ok(other?),
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let full_path = self.full_path(prefix);
        let mut entries = Vec::new();

        if fs::metadata(&full_path).await.is_ok_and(|m| m.is_dir()) {
            let mut read_dir = fs::read_dir(&full_path).await?;

            while let Some(entry) = read_dir.next_entry().await? {
                if let Some(name) = entry.file_name().to_str() {
                    entries.push(name.to_string());
                }
            }
        }

        entries.sort();
        Ok(entries)
    }

    fn backend(&self) -> StorageBackend {
        StorageBackend::FileSystem
    }
}

/// In-memory I/O manager keyed by relative path
#[derive(Debug, Default)]
pub struct MemoryIOManager {
    files: RwLock<HashMap<String, Bytes>>,
}

impl MemoryIOManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored files
    pub fn len(&self) -> usize {
        self.files.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.read().is_empty()
    }
}

fn dir_prefix(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("{}/", trimmed)
    }
}

#[async_trait]
impl IOManager for MemoryIOManager {
    async fn read(&self, path: &str) -> Result<Bytes> {
        self.files
            .read()
            .get(path)
            .cloned()
            .ok_or_else(|| BatchError::NotFound(path.to_string()))
    }

    async fn write(&self, path: &str, data: &[u8]) -> Result<()> {
        self.files
            .write()
            .insert(path.to_string(), Bytes::copy_from_slice(data));
        Ok(())
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        let prefix = dir_prefix(path);
        let files = self.files.read();
        Ok(files.contains_key(path) || files.keys().any(|k| k.starts_with(&prefix)))
    }

    async fn delete_dir(&self, path: &str) -> Result<()> {
        let prefix = dir_prefix(path);
        self.files.write().retain(|k, _| !k.starts_with(&prefix));
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let prefix = dir_prefix(prefix);
        let mut entries: Vec<String> = self
            .files
            .read()
            .keys()
            .filter_map(|k| k.strip_prefix(&prefix))
            .map(|rest| rest.split('/').next().unwrap_or(rest).to_string())
            .collect();
        entries.sort();
        entries.dedup();
        Ok(entries)
    }

    fn backend(&self) -> StorageBackend {
        StorageBackend::Memory
    }
}

/// Parse URL and create appropriate I/O manager
pub fn create_io_manager(url: &str) -> Result<Box<dyn IOManager>> {
    match StorageBackend::from_url(url)? {
        StorageBackend::FileSystem => {
            // Extract path from file:// URL or use as-is
            let path = url.strip_prefix("file://").unwrap_or(url);
            Ok(Box::new(FileSystemIOManager::new(path)))
        }
        StorageBackend::Memory => Ok(Box::new(MemoryIOManager::new())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_file_system_io() {
        let temp_dir = TempDir::new().unwrap();
        let io = FileSystemIOManager::new(temp_dir.path());

        io.write("p1/data.blk", b"voxels").await.unwrap();
        let read_data = io.read("p1/data.blk").await.unwrap();
        assert_eq!(&read_data[..], b"voxels");

        assert!(io.exists("p1/data.blk").await.unwrap());
        assert!(!io.exists("p1/origin.bin").await.unwrap());
        assert_eq!(io.list("p1").await.unwrap(), vec!["data.blk".to_string()]);

        io.delete_dir("p1").await.unwrap();
        assert!(!io.exists("p1").await.unwrap());
        // deleting again is not an error
        io.delete_dir("p1").await.unwrap();

        assert!(matches!(
            io.read("p1/data.blk").await,
            Err(BatchError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_memory_io() {
        let io = MemoryIOManager::new();
        io.write("a/data.blk", b"1").await.unwrap();
        io.write("a/origin.bin", b"2").await.unwrap();
        io.write("ab/data.blk", b"3").await.unwrap();

        assert!(io.exists("a").await.unwrap());
        assert_eq!(
            io.list("a").await.unwrap(),
            vec!["data.blk".to_string(), "origin.bin".to_string()]
        );
        assert_eq!(
            io.list("").await.unwrap(),
            vec!["a".to_string(), "ab".to_string()]
        );

        io.delete_dir("a").await.unwrap();
        assert_eq!(io.len(), 1);
        assert!(io.exists("ab/data.blk").await.unwrap());
    }

    #[test]
    fn test_backend_from_url() {
        assert_eq!(
            StorageBackend::from_url("file:///data/batches").unwrap(),
            StorageBackend::FileSystem
        );
        assert_eq!(
            StorageBackend::from_url("/data/batches").unwrap(),
            StorageBackend::FileSystem
        );
        assert_eq!(
            StorageBackend::from_url("mem://scratch").unwrap(),
            StorageBackend::Memory
        );
        assert!(matches!(
            StorageBackend::from_url("s3://bucket/batches"),
            Err(BatchError::InvalidUrl(_))
        ));
    }
}
