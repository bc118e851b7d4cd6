//! Asynchronous, handle-based storage for vfsbridge.
//!
//! The store is the thing the Executor talks to. Its API is async for
//! everything that touches the directory structure, and synchronous only
//! once a file has been opened for exclusive access:
//!
//! - **DirectoryHandle**: look up / create children, remove entries, list
//! - **FileHandle**: size, and acquire an exclusive [`SyncAccessHandle`]
//! - **SyncAccessHandle**: positional read/write, truncate, flush, close
//!
//! Two backends ship here:
//!
//! - **MemoryDir**: in-memory tree (tests, scratch use)
//! - **LocalDir**: a directory on the real filesystem
//!
//! ```text
//! root (DirectoryHandle)
//! ├── a/ (DirectoryHandle)
//! │   └── b/
//! │       └── c.db (FileHandle ──open_sync──▶ SyncAccessHandle)
//! └── scratch.tmp
//! ```

mod local;
mod memory;
mod traits;
mod walk;

pub use local::LocalDir;
pub use memory::MemoryDir;
pub use traits::{validate_name, DirEntry, DirEntryKind, DirectoryHandle, FileHandle, SyncAccessHandle};
pub use walk::tree;
