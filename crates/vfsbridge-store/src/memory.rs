//! In-memory store implementation.
//!
//! Used for tests and scratch sessions. All data is ephemeral.

use super::traits::{validate_name, DirEntry, DirectoryHandle, FileHandle, SyncAccessHandle};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::RwLock;

/// Entry in a memory directory.
#[derive(Debug, Clone)]
enum Node {
    File(MemoryFile),
    Directory(Arc<MemoryDir>),
}

/// In-memory directory.
///
/// Thread-safe via internal `RwLock`. Handles stay valid after their entry
/// is removed, but every lookup through a removed directory is `NotFound`.
#[derive(Debug)]
pub struct MemoryDir {
    name: String,
    entries: RwLock<BTreeMap<String, Node>>,
    removed: AtomicBool,
}

/// Contents of one in-memory file plus its exclusive-access flag.
#[derive(Debug)]
struct FileState {
    name: String,
    data: Mutex<Vec<u8>>,
    locked: AtomicBool,
}

/// Handle to an in-memory file. Clones share the same contents.
#[derive(Debug, Clone)]
pub struct MemoryFile {
    state: Arc<FileState>,
}

/// Exclusive access to a [`MemoryFile`]. Releases the lock on close or drop.
#[derive(Debug)]
struct MemoryAccess {
    state: Arc<FileState>,
}

impl MemoryDir {
    /// Create a new empty root directory.
    pub fn root() -> Arc<Self> {
        Arc::new(Self::named(""))
    }

    fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            entries: RwLock::new(BTreeMap::new()),
            removed: AtomicBool::new(false),
        }
    }

    fn check_live(&self) -> io::Result<()> {
        if self.removed.load(Ordering::Acquire) {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("directory was removed: {}", self.name),
            ));
        }
        Ok(())
    }

    /// Mark `dir` and everything under it removed, failing with
    /// `ResourceBusy` if any file below it is open.
    async fn detach_tree(dir: &Arc<MemoryDir>) -> io::Result<()> {
        // Check first so a busy file leaves the tree untouched
        let mut stack = vec![dir.clone()];
        let mut seen = Vec::new();
        while let Some(current) = stack.pop() {
            let entries = current.entries.read().await;
            for node in entries.values() {
                match node {
                    Node::File(file) => {
                        if file.is_locked() {
                            return Err(io::Error::new(
                                io::ErrorKind::ResourceBusy,
                                format!("file is open: {}", file.state.name),
                            ));
                        }
                    }
                    Node::Directory(child) => stack.push(child.clone()),
                }
            }
            drop(entries);
            seen.push(current);
        }
        for current in seen {
            current.removed.store(true, Ordering::Release);
        }
        Ok(())
    }
}

impl MemoryFile {
    fn new(name: &str) -> Self {
        Self {
            state: Arc::new(FileState {
                name: name.to_string(),
                data: Mutex::new(Vec::new()),
                locked: AtomicBool::new(false),
            }),
        }
    }

    fn is_locked(&self) -> bool {
        self.state.locked.load(Ordering::Acquire)
    }
}

impl FileState {
    fn data(&self) -> std::sync::MutexGuard<'_, Vec<u8>> {
        self.data.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl DirectoryHandle for MemoryDir {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get_directory(&self, name: &str, create: bool) -> io::Result<Arc<dyn DirectoryHandle>> {
        validate_name(name)?;
        self.check_live()?;
        let mut entries = self.entries.write().await;

        match entries.get(name) {
            Some(Node::Directory(dir)) => Ok(dir.clone()),
            Some(Node::File(_)) => Err(io::Error::new(
                io::ErrorKind::NotADirectory,
                format!("not a directory: {name}"),
            )),
            None if create => {
                let dir = Arc::new(MemoryDir::named(name));
                entries.insert(name.to_string(), Node::Directory(dir.clone()));
                Ok(dir)
            }
            None => Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("not found: {name}"),
            )),
        }
    }

    async fn get_file(&self, name: &str, create: bool) -> io::Result<Arc<dyn FileHandle>> {
        validate_name(name)?;
        self.check_live()?;
        let mut entries = self.entries.write().await;

        match entries.get(name) {
            Some(Node::File(file)) => Ok(Arc::new(file.clone())),
            Some(Node::Directory(_)) => Err(io::Error::new(
                io::ErrorKind::IsADirectory,
                format!("is a directory: {name}"),
            )),
            None if create => {
                let file = MemoryFile::new(name);
                entries.insert(name.to_string(), Node::File(file.clone()));
                Ok(Arc::new(file))
            }
            None => Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("not found: {name}"),
            )),
        }
    }

    async fn remove_entry(&self, name: &str, recursive: bool) -> io::Result<()> {
        validate_name(name)?;
        self.check_live()?;
        let mut entries = self.entries.write().await;

        match entries.get(name) {
            None => Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("not found: {name}"),
            )),
            Some(Node::File(file)) => {
                if file.is_locked() {
                    return Err(io::Error::new(
                        io::ErrorKind::ResourceBusy,
                        format!("file is open: {name}"),
                    ));
                }
                entries.remove(name);
                Ok(())
            }
            Some(Node::Directory(dir)) => {
                let dir = dir.clone();
                if !recursive && !dir.entries.read().await.is_empty() {
                    return Err(io::Error::new(
                        io::ErrorKind::DirectoryNotEmpty,
                        format!("directory not empty: {name}"),
                    ));
                }
                MemoryDir::detach_tree(&dir).await?;
                entries.remove(name);
                Ok(())
            }
        }
    }

    async fn list(&self) -> io::Result<Vec<DirEntry>> {
        self.check_live()?;
        let entries = self.entries.read().await;
        // BTreeMap keeps names sorted
        Ok(entries
            .iter()
            .map(|(name, node)| match node {
                Node::File(_) => DirEntry::file(name.clone()),
                Node::Directory(_) => DirEntry::directory(name.clone()),
            })
            .collect())
    }

    async fn contains(&self, name: &str) -> bool {
        if self.check_live().is_err() {
            return false;
        }
        self.entries.read().await.contains_key(name)
    }
}

#[async_trait]
impl FileHandle for MemoryFile {
    fn name(&self) -> &str {
        &self.state.name
    }

    async fn size(&self) -> io::Result<u64> {
        Ok(self.state.data().len() as u64)
    }

    async fn open_sync(&self) -> io::Result<Box<dyn SyncAccessHandle>> {
        if self
            .state
            .locked
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(io::Error::new(
                io::ErrorKind::ResourceBusy,
                format!("file already open: {}", self.state.name),
            ));
        }
        Ok(Box::new(MemoryAccess {
            state: self.state.clone(),
        }))
    }
}

impl SyncAccessHandle for MemoryAccess {
    fn read_at(&mut self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        let data = self.state.data();
        let Ok(start) = usize::try_from(offset) else {
            return Ok(0);
        };
        if start >= data.len() {
            return Ok(0);
        }
        let n = buf.len().min(data.len() - start);
        buf[..n].copy_from_slice(&data[start..start + n]);
        Ok(n)
    }

    fn write_at(&mut self, src: &[u8], offset: u64) -> io::Result<usize> {
        let start = usize::try_from(offset)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "offset too large"))?;
        let end = start + src.len();
        let mut data = self.state.data();
        if data.len() < end {
            data.resize(end, 0);
        }
        data[start..end].copy_from_slice(src);
        Ok(src.len())
    }

    fn truncate(&mut self, size: u64) -> io::Result<()> {
        let size = usize::try_from(size)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "size too large"))?;
        self.state.data().resize(size, 0);
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn size(&self) -> io::Result<u64> {
        Ok(self.state.data().len() as u64)
    }

    fn close(self: Box<Self>) -> io::Result<()> {
        // Drop releases the lock
        Ok(())
    }
}

impl Drop for MemoryAccess {
    fn drop(&mut self) {
        self.state.locked.store(false, Ordering::Release);
    }
}
