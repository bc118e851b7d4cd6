//! Local filesystem backend.
//!
//! Maps directory handles onto real directories under a root, with optional
//! read-only mode. Exclusive access is enforced per store through an
//! in-process lock table, since the OS does not provide one portably.

use super::traits::{validate_name, DirEntry, DirEntryKind, DirectoryHandle, FileHandle, SyncAccessHandle};
use async_trait::async_trait;
use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::fs;
use tracing::{debug, trace};

/// Paths that currently have an open [`SyncAccessHandle`].
#[derive(Debug, Default)]
struct LockTable {
    held: Mutex<HashSet<PathBuf>>,
}

impl LockTable {
    fn acquire(&self, path: &Path) -> io::Result<()> {
        let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
        if !held.insert(path.to_path_buf()) {
            return Err(io::Error::new(
                io::ErrorKind::ResourceBusy,
                format!("file already open: {}", path.display()),
            ));
        }
        Ok(())
    }

    fn release(&self, path: &Path) {
        self.held
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(path);
    }

    fn is_held(&self, path: &Path) -> bool {
        self.held
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(path)
    }

    fn any_held_under(&self, dir: &Path) -> bool {
        self.held
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .any(|p| p.starts_with(dir))
    }
}

/// A directory on the local filesystem.
///
/// Every handle descends from a root created with [`LocalDir::open`] or
/// [`LocalDir::read_only`]; children are addressed one component at a time,
/// and symlinks are never followed, so a handle cannot escape its root.
#[derive(Debug, Clone)]
pub struct LocalDir {
    path: PathBuf,
    name: String,
    read_only: bool,
    locks: Arc<LockTable>,
}

/// A file on the local filesystem.
#[derive(Debug, Clone)]
pub struct LocalFile {
    path: PathBuf,
    name: String,
    read_only: bool,
    locks: Arc<LockTable>,
}

/// Exclusive positional access to a local file.
#[derive(Debug)]
struct LocalAccess {
    file: std::fs::File,
    path: PathBuf,
    read_only: bool,
    locks: Arc<LockTable>,
}

impl LocalDir {
    /// Open a writable store rooted at `root`.
    ///
    /// The path must exist and be a directory.
    pub async fn open(root: impl Into<PathBuf>) -> io::Result<Arc<Self>> {
        Self::rooted(root.into(), false).await
    }

    /// Open a read-only store rooted at `root`.
    pub async fn read_only(root: impl Into<PathBuf>) -> io::Result<Arc<Self>> {
        Self::rooted(root.into(), true).await
    }

    async fn rooted(root: PathBuf, read_only: bool) -> io::Result<Arc<Self>> {
        let meta = fs::metadata(&root).await?;
        if !meta.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::NotADirectory,
                format!("store root is not a directory: {}", root.display()),
            ));
        }
        Ok(Arc::new(Self {
            path: root,
            name: String::new(),
            read_only,
            locks: Arc::new(LockTable::default()),
        }))
    }

    /// Get the real path of this directory.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Check if write operations are allowed.
    fn check_writable(&self) -> io::Result<()> {
        if self.read_only {
            Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "store is read-only",
            ))
        } else {
            Ok(())
        }
    }

    /// Kind of the child `name`, or `None` if it does not exist.
    async fn child_kind(&self, name: &str) -> io::Result<Option<DirEntryKind>> {
        let child = self.path.join(name);
        match fs::symlink_metadata(&child).await {
            Ok(meta) if meta.file_type().is_symlink() => Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                format!("refusing to follow symlink: {}", child.display()),
            )),
            Ok(meta) if meta.is_dir() => Ok(Some(DirEntryKind::Directory)),
            // Special files (sockets, pipes, devices) are classified as File
            Ok(_) => Ok(Some(DirEntryKind::File)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn child_dir(&self, name: &str) -> LocalDir {
        LocalDir {
            path: self.path.join(name),
            name: name.to_string(),
            read_only: self.read_only,
            locks: self.locks.clone(),
        }
    }

    fn child_file(&self, name: &str) -> LocalFile {
        LocalFile {
            path: self.path.join(name),
            name: name.to_string(),
            read_only: self.read_only,
            locks: self.locks.clone(),
        }
    }
}

#[async_trait]
impl DirectoryHandle for LocalDir {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get_directory(&self, name: &str, create: bool) -> io::Result<Arc<dyn DirectoryHandle>> {
        validate_name(name)?;
        match self.child_kind(name).await? {
            Some(DirEntryKind::Directory) => Ok(Arc::new(self.child_dir(name))),
            Some(DirEntryKind::File) => Err(io::Error::new(
                io::ErrorKind::NotADirectory,
                format!("not a directory: {name}"),
            )),
            None if create => {
                self.check_writable()?;
                match fs::create_dir(self.path.join(name)).await {
                    Ok(()) => {}
                    // Lost a race with another creator; fine
                    Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
                    Err(e) => return Err(e),
                }
                trace!(path = %self.path.join(name).display(), "created directory");
                Ok(Arc::new(self.child_dir(name)))
            }
            None => Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("not found: {name}"),
            )),
        }
    }

    async fn get_file(&self, name: &str, create: bool) -> io::Result<Arc<dyn FileHandle>> {
        validate_name(name)?;
        match self.child_kind(name).await? {
            Some(DirEntryKind::File) => Ok(Arc::new(self.child_file(name))),
            Some(DirEntryKind::Directory) => Err(io::Error::new(
                io::ErrorKind::IsADirectory,
                format!("is a directory: {name}"),
            )),
            None if create => {
                self.check_writable()?;
                fs::OpenOptions::new()
                    .write(true)
                    .create(true)
                    .truncate(false)
                    .open(self.path.join(name))
                    .await?;
                trace!(path = %self.path.join(name).display(), "created file");
                Ok(Arc::new(self.child_file(name)))
            }
            None => Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("not found: {name}"),
            )),
        }
    }

    async fn remove_entry(&self, name: &str, recursive: bool) -> io::Result<()> {
        validate_name(name)?;
        self.check_writable()?;
        let full_path = self.path.join(name);

        match self.child_kind(name).await? {
            None => Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("not found: {name}"),
            )),
            Some(DirEntryKind::File) => {
                if self.locks.is_held(&full_path) {
                    return Err(io::Error::new(
                        io::ErrorKind::ResourceBusy,
                        format!("file is open: {name}"),
                    ));
                }
                fs::remove_file(&full_path).await?;
                debug!(path = %full_path.display(), "removed file");
                Ok(())
            }
            Some(DirEntryKind::Directory) => {
                if self.locks.any_held_under(&full_path) {
                    return Err(io::Error::new(
                        io::ErrorKind::ResourceBusy,
                        format!("directory holds open files: {name}"),
                    ));
                }
                debug!(path = %full_path.display(), recursive, "removing directory");
                if recursive {
                    fs::remove_dir_all(&full_path).await
                } else {
                    fs::remove_dir(&full_path).await.map_err(|e| {
                        // remove_dir reports a non-empty directory inconsistently
                        // across platforms; normalize it
                        if std::fs::read_dir(&full_path)
                            .map(|mut it| it.next().is_some())
                            .unwrap_or(false)
                        {
                            io::Error::new(
                                io::ErrorKind::DirectoryNotEmpty,
                                format!("directory not empty: {name}"),
                            )
                        } else {
                            e
                        }
                    })
                }
            }
        }
    }

    async fn list(&self) -> io::Result<Vec<DirEntry>> {
        let mut entries = Vec::new();
        let mut dir = fs::read_dir(&self.path).await?;

        while let Some(entry) = dir.next_entry().await? {
            // Use symlink_metadata to detect symlinks without following them
            let metadata = fs::symlink_metadata(entry.path()).await?;
            let file_type = metadata.file_type();
            if file_type.is_symlink() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if file_type.is_dir() {
                entries.push(DirEntry::directory(name));
            } else {
                entries.push(DirEntry::file(name));
            }
        }

        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    async fn contains(&self, name: &str) -> bool {
        validate_name(name).is_ok() && matches!(self.child_kind(name).await, Ok(Some(_)))
    }
}

#[async_trait]
impl FileHandle for LocalFile {
    fn name(&self) -> &str {
        &self.name
    }

    async fn size(&self) -> io::Result<u64> {
        Ok(fs::metadata(&self.path).await?.len())
    }

    async fn open_sync(&self) -> io::Result<Box<dyn SyncAccessHandle>> {
        self.locks.acquire(&self.path)?;
        let opened = fs::OpenOptions::new()
            .read(true)
            .write(!self.read_only)
            .open(&self.path)
            .await;
        match opened {
            Ok(file) => Ok(Box::new(LocalAccess {
                file: file.into_std().await,
                path: self.path.clone(),
                read_only: self.read_only,
                locks: self.locks.clone(),
            })),
            Err(e) => {
                self.locks.release(&self.path);
                Err(e)
            }
        }
    }
}

impl LocalAccess {
    fn check_writable(&self) -> io::Result<()> {
        if self.read_only {
            Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "store is read-only",
            ))
        } else {
            Ok(())
        }
    }
}

#[cfg(unix)]
fn read_once(file: &std::fs::File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    use std::os::unix::fs::FileExt;
    file.read_at(buf, offset)
}

#[cfg(unix)]
fn write_once(file: &std::fs::File, data: &[u8], offset: u64) -> io::Result<usize> {
    use std::os::unix::fs::FileExt;
    file.write_at(data, offset)
}

#[cfg(windows)]
fn read_once(file: &std::fs::File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    use std::os::windows::fs::FileExt;
    file.seek_read(buf, offset)
}

#[cfg(windows)]
fn write_once(file: &std::fs::File, data: &[u8], offset: u64) -> io::Result<usize> {
    use std::os::windows::fs::FileExt;
    file.seek_write(data, offset)
}

impl SyncAccessHandle for LocalAccess {
    fn read_at(&mut self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        // Positional reads may come back short before EOF; keep going
        let mut filled = 0;
        while filled < buf.len() {
            match read_once(&self.file, &mut buf[filled..], offset + filled as u64) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        Ok(filled)
    }

    fn write_at(&mut self, data: &[u8], offset: u64) -> io::Result<usize> {
        self.check_writable()?;
        let mut written = 0;
        while written < data.len() {
            match write_once(&self.file, &data[written..], offset + written as u64) {
                Ok(0) => break,
                Ok(n) => written += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        Ok(written)
    }

    fn truncate(&mut self, size: u64) -> io::Result<()> {
        self.check_writable()?;
        self.file.set_len(size)
    }

    fn flush(&mut self) -> io::Result<()> {
        if self.read_only {
            return Ok(());
        }
        self.file.sync_data()
    }

    fn size(&self) -> io::Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    fn close(self: Box<Self>) -> io::Result<()> {
        // Drop releases the lock and the descriptor
        Ok(())
    }
}

impl Drop for LocalAccess {
    fn drop(&mut self) {
        self.locks.release(&self.path);
    }
}
