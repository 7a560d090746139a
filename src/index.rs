//! Ordered set of item identifiers backing a batch

use crate::error::{BatchError, Result};
use crate::io::IOManager;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Position or identifier used to address a single item
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemKey<'a> {
    /// Position in the batch; negative values are rejected
    Position(i64),
    /// Identifier from the index
    Id(&'a str),
}

impl From<usize> for ItemKey<'_> {
    fn from(pos: usize) -> Self {
        ItemKey::Position(pos as i64)
    }
}

impl From<i64> for ItemKey<'_> {
    fn from(pos: i64) -> Self {
        ItemKey::Position(pos)
    }
}

impl From<i32> for ItemKey<'_> {
    fn from(pos: i32) -> Self {
        ItemKey::Position(pos as i64)
    }
}

impl<'a> From<&'a str> for ItemKey<'a> {
    fn from(id: &'a str) -> Self {
        ItemKey::Id(id)
    }
}

impl<'a> From<&'a String> for ItemKey<'a> {
    fn from(id: &'a String) -> Self {
        ItemKey::Id(id.as_str())
    }
}

/// Immutable, ordered collection of unique item identifiers
#[derive(Debug, Clone, Default)]
pub struct BatchIndex {
    ids: Vec<String>,
    positions: HashMap<String, usize>,
    /// Directory entry behind each id, kept when extensions were stripped
    paths: HashMap<String, PathBuf>,
    base_path: Option<PathBuf>,
}

impl BatchIndex {
    /// Build an index from identifiers in iteration order
    pub fn new<I, S>(ids: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let ids: Vec<String> = ids.into_iter().map(Into::into).collect();
        let mut positions = HashMap::with_capacity(ids.len());
        for (pos, id) in ids.iter().enumerate() {
            if positions.insert(id.clone(), pos).is_some() {
                return Err(BatchError::DuplicateIdentifier(id.clone()));
            }
        }
        Ok(Self {
            ids,
            positions,
            paths: HashMap::new(),
            base_path: None,
        })
    }

    /// Build an index from the entries of a directory, sorted by name.
    ///
    /// With `strip_extension` set, `scan.mhd` is indexed as `scan`.
    pub fn from_dir(path: impl AsRef<Path>, strip_extension: bool) -> Result<Self> {
        let path = path.as_ref();
        let mut entries: Vec<(String, PathBuf)> = fs::read_dir(path)?
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let entry_path = entry.path();
                let name = if strip_extension {
                    entry_path.file_stem()
                } else {
                    entry_path.file_name()
                };
                let id = name.and_then(|n| n.to_str())?.to_string();
                Some((id, entry_path))
            })
            .filter(|(id, _)| !id.starts_with('.'))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));

        let mut index = Self::new(entries.iter().map(|(id, _)| id.clone()))?;
        index.paths = entries.into_iter().collect();
        index.base_path = Some(path.to_path_buf());
        Ok(index)
    }

    /// Build an index from the item directories below `prefix` of an archive
    pub async fn from_io(io: &dyn IOManager, prefix: &str) -> Result<Self> {
        let ids = io
            .list(prefix)
            .await?
            .into_iter()
            .filter(|name| !name.starts_with('.'));
        Self::new(ids)
    }

    /// Attach a base directory used by `full_path`
    pub fn with_base_path(mut self, base_path: impl AsRef<Path>) -> Self {
        self.base_path = Some(base_path.as_ref().to_path_buf());
        self
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Identifiers in batch order
    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    /// Identifier at `pos`
    pub fn id(&self, pos: usize) -> Option<&str> {
        self.ids.get(pos).map(String::as_str)
    }

    /// Position of `id` in the batch
    pub fn get_pos(&self, id: &str) -> Result<usize> {
        self.positions
            .get(id)
            .copied()
            .ok_or_else(|| BatchError::UnknownIdentifier(id.to_string()))
    }

    /// Resolve a key to a position, checking the range
    pub fn resolve(&self, key: ItemKey<'_>) -> Result<usize> {
        match key {
            ItemKey::Position(pos) if pos >= 0 && (pos as usize) < self.len() => Ok(pos as usize),
            ItemKey::Position(pos) => Err(BatchError::IndexOutOfRange {
                index: pos,
                len: self.len(),
            }),
            ItemKey::Id(id) => self.get_pos(id),
        }
    }

    /// On-disk location of an item, when the index was built from a directory
    pub fn full_path(&self, id: &str) -> Option<PathBuf> {
        self.paths
            .get(id)
            .cloned()
            .or_else(|| self.base_path.as_ref().map(|base| base.join(id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::MemoryIOManager;
    use tempfile::TempDir;

    #[test]
    fn test_resolve_keys() {
        let index = BatchIndex::new(["a", "b", "c"]).unwrap();
        assert_eq!(index.resolve(ItemKey::from(2usize)).unwrap(), 2);
        assert_eq!(index.resolve(ItemKey::from("b")).unwrap(), 1);
        assert!(matches!(
            index.resolve(ItemKey::from(-1i64)),
            Err(BatchError::IndexOutOfRange { index: -1, len: 3 })
        ));
        assert!(matches!(
            index.resolve(ItemKey::from(3usize)),
            Err(BatchError::IndexOutOfRange { .. })
        ));
        assert!(matches!(
            index.resolve(ItemKey::from("zzz")),
            Err(BatchError::UnknownIdentifier(_))
        ));
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        assert!(matches!(
            BatchIndex::new(["a", "b", "a"]),
            Err(BatchError::DuplicateIdentifier(id)) if id == "a"
        ));
    }

    #[test]
    fn test_from_dir_sorted() {
        let temp_dir = TempDir::new().unwrap();
        for name in ["p2.mhd", "p1.mhd", "p3.mhd"] {
            fs::write(temp_dir.path().join(name), b"").unwrap();
        }

        let index = BatchIndex::from_dir(temp_dir.path(), true).unwrap();
        assert_eq!(index.ids(), &["p1", "p2", "p3"]);
        let path = index.full_path("p2").unwrap();
        assert!(path.exists());
        assert_eq!(path, temp_dir.path().join("p2.mhd"));
    }

    #[test]
    fn test_base_path_joins_ids() {
        let index = BatchIndex::new(["scan-a"]).unwrap().with_base_path("/data/ct");
        assert_eq!(
            index.full_path("scan-a").unwrap(),
            PathBuf::from("/data/ct/scan-a")
        );
        assert!(BatchIndex::new(["scan-a"]).unwrap().full_path("scan-a").is_none());
    }

    #[tokio::test]
    async fn test_from_io_lists_item_dirs() {
        let io = MemoryIOManager::new();
        for path in ["b/data.blk", "a/data.blk", "a/origin.bin", ".lock"] {
            io.write(path, b"").await.unwrap();
        }
        let index = BatchIndex::from_io(&io, "").await.unwrap();
        assert_eq!(index.ids(), &["a", "b"]);
    }
}
