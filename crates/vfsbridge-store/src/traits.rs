//! Core store traits and types.

use async_trait::async_trait;
use std::fmt;
use std::io;
use std::sync::Arc;

/// Kind of directory entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirEntryKind {
    File,
    Directory,
}

/// A directory entry as returned by [`DirectoryHandle::list`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    /// Name of the entry (not full path).
    pub name: String,
    /// Kind of entry.
    pub kind: DirEntryKind,
}

impl DirEntry {
    /// Create a new directory entry.
    pub fn directory(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: DirEntryKind::Directory,
        }
    }

    /// Create a new file entry.
    pub fn file(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: DirEntryKind::File,
        }
    }
}

/// Reject names that are not a single path component.
///
/// Handles address one level at a time, so `a/b`, `.`, `..` and the empty
/// string are never valid entry names.
pub fn validate_name(name: &str) -> io::Result<()> {
    if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\']) {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("invalid entry name: {name:?}"),
        ));
    }
    Ok(())
}

/// A directory in the backing store.
///
/// All operations address direct children by name. Walking a path is the
/// caller's job (see the proxy's resolver).
#[async_trait]
pub trait DirectoryHandle: Send + Sync + fmt::Debug {
    /// Name of this directory (empty for the root).
    fn name(&self) -> &str;

    /// Get a child directory, creating it if `create` is set.
    ///
    /// Returns `NotFound` if it is missing and `create` is false, and
    /// `NotADirectory` if the name belongs to a file.
    async fn get_directory(&self, name: &str, create: bool) -> io::Result<Arc<dyn DirectoryHandle>>;

    /// Get a child file, creating an empty one if `create` is set.
    ///
    /// Returns `NotFound` if it is missing and `create` is false, and
    /// `IsADirectory` if the name belongs to a directory.
    async fn get_file(&self, name: &str, create: bool) -> io::Result<Arc<dyn FileHandle>>;

    /// Remove a child entry.
    ///
    /// A non-empty directory is only removed when `recursive` is set
    /// (`DirectoryNotEmpty` otherwise). A file with an open
    /// [`SyncAccessHandle`] cannot be removed (`ResourceBusy`).
    async fn remove_entry(&self, name: &str, recursive: bool) -> io::Result<()>;

    /// List direct children, sorted by name.
    async fn list(&self) -> io::Result<Vec<DirEntry>>;

    /// Check if a child exists, without creating anything.
    async fn contains(&self, name: &str) -> bool {
        match self.list().await {
            Ok(entries) => entries.iter().any(|e| e.name == name),
            Err(_) => false,
        }
    }
}

/// A file in the backing store.
#[async_trait]
pub trait FileHandle: Send + Sync + fmt::Debug {
    /// Name of this file.
    fn name(&self) -> &str;

    /// Current size in bytes.
    async fn size(&self) -> io::Result<u64>;

    /// Acquire exclusive synchronous access.
    ///
    /// Only one access handle may exist per file at a time; a second
    /// acquisition fails with `ResourceBusy` until the first is closed.
    async fn open_sync(&self) -> io::Result<Box<dyn SyncAccessHandle>>;
}

/// Exclusive, synchronous access to one file.
///
/// Once acquired, I/O through this handle does not need the async runtime,
/// which is what lets a single Executor turn each request around without
/// interleaving.
pub trait SyncAccessHandle: Send + fmt::Debug {
    /// Read into `buf` starting at `offset`. Returns the number of bytes
    /// read, which is less than `buf.len()` only at end of file.
    fn read_at(&mut self, buf: &mut [u8], offset: u64) -> io::Result<usize>;

    /// Write `data` at `offset`, growing the file with zeroes if needed.
    /// Returns the number of bytes written.
    fn write_at(&mut self, data: &[u8], offset: u64) -> io::Result<usize>;

    /// Set the file length.
    fn truncate(&mut self, size: u64) -> io::Result<()>;

    /// Persist pending writes.
    fn flush(&mut self) -> io::Result<()>;

    /// Current size in bytes.
    fn size(&self) -> io::Result<u64>;

    /// Release exclusive access.
    fn close(self: Box<Self>) -> io::Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("")]
    #[case(".")]
    #[case("..")]
    #[case("a/b")]
    #[case("a\\b")]
    fn rejects_non_component_names(#[case] name: &str) {
        let err = validate_name(name).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[rstest]
    #[case("c.db")]
    #[case("c.db-journal")]
    #[case("...")]
    fn accepts_plain_names(#[case] name: &str) {
        validate_name(name).unwrap();
    }
}
