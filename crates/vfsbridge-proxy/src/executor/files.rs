//! Executor-side table of open files.

use std::collections::HashMap;
use std::sync::Arc;

use vfsbridge_store::{DirectoryHandle, SyncAccessHandle};
use vfsbridge_types::FileId;

use crate::channel::SharedBuffer;

/// Everything the Executor holds for one open file.
#[derive(Debug)]
pub(crate) struct OpenFile {
    pub path: String,
    /// Directory containing the file, for delete-on-close.
    pub dir: Arc<dyn DirectoryHandle>,
    pub name: String,
    pub created: bool,
    pub delete_on_close: bool,
    pub read_only: bool,
    pub access: Box<dyn SyncAccessHandle>,
    pub buffer: SharedBuffer,
}

#[derive(Debug, Default)]
pub(crate) struct FileTable {
    files: HashMap<FileId, OpenFile>,
}

impl FileTable {
    pub fn contains(&self, file: FileId) -> bool {
        self.files.contains_key(&file)
    }

    pub fn insert(&mut self, file: FileId, open: OpenFile) {
        self.files.insert(file, open);
    }

    pub fn get_mut(&mut self, file: FileId) -> Option<&mut OpenFile> {
        self.files.get_mut(&file)
    }

    pub fn remove(&mut self, file: FileId) -> Option<OpenFile> {
        self.files.remove(&file)
    }

    /// Take every entry, in id order so shutdown is deterministic.
    pub fn drain(&mut self) -> Vec<(FileId, OpenFile)> {
        let mut all: Vec<_> = self.files.drain().collect();
        all.sort_by_key(|(id, _)| *id);
        all
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }
}
