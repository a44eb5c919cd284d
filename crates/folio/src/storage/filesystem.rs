use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::StorageError;

/// Local filesystem operations for working and derivative trees.
///
/// All writes are temp-then-rename: a stage that dies mid-write leaves a
/// `.tmp` orphan, never a truncated artifact at a final path.
pub struct LocalStore;

impl LocalStore {
    pub fn ensure_dir(path: &Path) -> Result<(), StorageError> {
        if !path.exists() {
            std::fs::create_dir_all(path).map_err(|e| StorageError::CreateDirectory {
                path: path.to_path_buf(),
                source: e,
            })?;
        }
        Ok(())
    }

    /// Returns the temporary sibling used while producing `dest`.
    pub fn temp_sibling(dest: &Path) -> PathBuf {
        let mut name = dest
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "output".to_string());
        name.push_str(".tmp");
        dest.with_file_name(name)
    }

    /// Writes `content` to `dest` atomically (write temp, fsync, rename).
    pub fn write_atomic(dest: &Path, content: &[u8]) -> Result<(), StorageError> {
        if let Some(parent) = dest.parent() {
            Self::ensure_dir(parent)?;
        }

        let tmp = Self::temp_sibling(dest);
        let mut file = std::fs::File::create(&tmp).map_err(|e| StorageError::WriteFile {
            path: tmp.clone(),
            source: e,
        })?;
        file.write_all(content).map_err(|e| StorageError::WriteFile {
            path: tmp.clone(),
            source: e,
        })?;
        file.sync_all().map_err(|e| StorageError::WriteFile {
            path: tmp.clone(),
            source: e,
        })?;
        drop(file);

        Self::rename_into_place(&tmp, dest)
    }

    /// Moves a finished temp output to its final path.
    pub fn rename_into_place(tmp: &Path, dest: &Path) -> Result<(), StorageError> {
        std::fs::rename(tmp, dest).map_err(|e| StorageError::Rename {
            from: tmp.to_path_buf(),
            to: dest.to_path_buf(),
            source: e,
        })
    }

    /// True when the file exists with at least one byte. Used by retryable
    /// stages to skip work that already completed.
    pub fn is_nonempty_file(path: &Path) -> bool {
        std::fs::metadata(path)
            .map(|m| m.is_file() && m.len() > 0)
            .unwrap_or(false)
    }

    pub fn file_size(path: &Path) -> Result<u64, StorageError> {
        std::fs::metadata(path)
            .map(|m| m.len())
            .map_err(|e| StorageError::ReadFile {
                path: path.to_path_buf(),
                source: e,
            })
    }

    /// Recursively removes a directory tree. Missing trees are fine: cleanup
    /// must be re-runnable after a partial earlier run.
    pub fn remove_tree(path: &Path) -> Result<(), StorageError> {
        match std::fs::remove_dir_all(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::RemoveTree {
                path: path.to_path_buf(),
                source: e,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_write_atomic_creates_parents() {
        let tmp = TempDir::new().unwrap();
        let dest = tmp.path().join("a/b/c/manifest.json");

        LocalStore::write_atomic(&dest, b"{}").unwrap();

        assert!(dest.exists());
        assert_eq!(std::fs::read(&dest).unwrap(), b"{}");
        // No temp file left behind.
        assert!(!LocalStore::temp_sibling(&dest).exists());
    }

    #[test]
    fn test_write_atomic_overwrites() {
        let tmp = TempDir::new().unwrap();
        let dest = tmp.path().join("file.json");

        LocalStore::write_atomic(&dest, b"first").unwrap();
        LocalStore::write_atomic(&dest, b"second").unwrap();

        assert_eq!(std::fs::read(&dest).unwrap(), b"second");
    }

    #[test]
    fn test_temp_sibling_stays_in_directory() {
        let dest = Path::new("/derivatives/b1/images/obj1/0001.jp2");
        let tmp = LocalStore::temp_sibling(dest);
        assert_eq!(tmp.parent(), dest.parent());
        assert_eq!(tmp.file_name().unwrap(), "0001.jp2.tmp");
    }

    #[test]
    fn test_is_nonempty_file() {
        let tmp = TempDir::new().unwrap();
        let empty = tmp.path().join("empty");
        let full = tmp.path().join("full");
        std::fs::write(&empty, b"").unwrap();
        std::fs::write(&full, b"x").unwrap();

        assert!(!LocalStore::is_nonempty_file(&empty));
        assert!(LocalStore::is_nonempty_file(&full));
        assert!(!LocalStore::is_nonempty_file(&tmp.path().join("missing")));
        assert!(!LocalStore::is_nonempty_file(tmp.path()));
    }

    #[test]
    fn test_file_size() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("sized");
        std::fs::write(&path, b"12345").unwrap();

        assert_eq!(LocalStore::file_size(&path).unwrap(), 5);
        assert!(LocalStore::file_size(&tmp.path().join("missing")).is_err());
    }

    #[test]
    fn test_remove_tree_tolerates_missing() {
        let tmp = TempDir::new().unwrap();
        let tree = tmp.path().join("tree");
        std::fs::create_dir_all(tree.join("nested")).unwrap();
        std::fs::write(tree.join("nested/file"), b"x").unwrap();

        LocalStore::remove_tree(&tree).unwrap();
        assert!(!tree.exists());

        // Second removal is a no-op, not an error.
        LocalStore::remove_tree(&tree).unwrap();
    }
}
