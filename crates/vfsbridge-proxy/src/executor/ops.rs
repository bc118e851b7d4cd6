//! Handlers, one per op kind.
//!
//! Each returns `Ok(())` for success or the [`ErrorKind`] to report; the
//! dispatcher turns that into a code. Store errors are logged here, where
//! the path and file id are known.

use std::io;

use tracing::{debug, info, warn};

use vfsbridge_store::{FileHandle, SyncAccessHandle};
use vfsbridge_types::{ErrorKind, FileId, OpenFlags};

use super::files::OpenFile;
use super::{Executor, Session};
use crate::channel::SharedBuffer;
use crate::resolver;

type Outcome = Result<(), ErrorKind>;

/// NotFound stays NotFound; anything else is a generic I/O failure.
fn classify(e: &io::Error) -> ErrorKind {
    if e.kind() == io::ErrorKind::NotFound {
        ErrorKind::NotFound
    } else {
        ErrorKind::Io
    }
}

impl Executor {
    pub(super) async fn open(
        &mut self,
        session: &Session,
        file: FileId,
        path: String,
        flags: OpenFlags,
        buffer: SharedBuffer,
    ) -> Outcome {
        if self.files.contains(file) {
            warn!(%file, %path, "file id already open");
            return Err(ErrorKind::Misuse);
        }
        if buffer.capacity() != session.buffer_capacity {
            warn!(%file, capacity = buffer.capacity(), "buffer does not match handshake capacity");
            return Err(ErrorKind::Misuse);
        }

        let (dir, name) = match self.resolver.resolve(&path, flags.create).await {
            Ok(found) => found,
            Err(e) => {
                debug!(%path, %e, "open: cannot resolve path");
                return Err(ErrorKind::NotFound);
            }
        };

        let (handle, created) = match dir.get_file(&name, false).await {
            Ok(handle) => (handle, false),
            Err(e) if e.kind() == io::ErrorKind::NotFound && flags.create => {
                match dir.get_file(&name, true).await {
                    Ok(handle) => (handle, true),
                    Err(e) => {
                        warn!(%path, %e, "open: cannot create file");
                        return Err(ErrorKind::Io);
                    }
                }
            }
            Err(e) => {
                debug!(%path, %e, "open: cannot get file");
                return Err(classify(&e));
            }
        };

        let access = match self.acquire_access(handle.as_ref(), &path).await {
            Ok(access) => access,
            Err(e) => {
                warn!(%path, %e, "open: cannot acquire file");
                return Err(ErrorKind::Io);
            }
        };

        let read_only = flags.effective_read_only();
        debug!(%file, %path, created, read_only, "opened");
        self.files.insert(
            file,
            OpenFile {
                path,
                dir,
                name,
                created,
                delete_on_close: flags.delete_on_close,
                read_only,
                access,
                buffer,
            },
        );
        Ok(())
    }

    /// Acquire exclusive access, backing off while another holder has it.
    async fn acquire_access(
        &self,
        handle: &dyn FileHandle,
        path: &str,
    ) -> io::Result<Box<dyn SyncAccessHandle>> {
        let mut attempt: u32 = 0;
        loop {
            match handle.open_sync().await {
                Ok(access) => return Ok(access),
                Err(e) if e.kind() == io::ErrorKind::ResourceBusy && attempt < self.acquire.retries => {
                    attempt += 1;
                    let wait = self.acquire.backoff * attempt;
                    info!(%path, attempt, ?wait, "file busy, retrying");
                    tokio::time::sleep(wait).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    pub(super) async fn close(&mut self, file: FileId) -> Outcome {
        let Some(open) = self.files.remove(file) else {
            debug!(%file, "close: not open");
            return Err(ErrorKind::NotFound);
        };
        release(file, open).await;
        Ok(())
    }

    /// Close every open file. Used by shutdown and when the Caller vanishes.
    pub(super) async fn close_all(&mut self) {
        for (file, open) in self.files.drain() {
            release(file, open).await;
        }
    }

    pub(super) fn read(&mut self, file: FileId, len: u32, offset: u32) -> Outcome {
        let open = self.files.get_mut(file).ok_or(ErrorKind::NotFound)?;
        let OpenFile {
            access, buffer, path, ..
        } = open;

        let len = len as usize;
        let mut bytes = buffer.lock();
        let Some(dest) = bytes.get_mut(..len) else {
            warn!(%file, len, "read larger than buffer");
            return Err(ErrorKind::Misuse);
        };

        match access.read_at(dest, u64::from(offset)) {
            Ok(n) if n < len => {
                dest[n..].fill(0);
                debug!(%file, offset, len, got = n, "short read");
                Err(ErrorKind::ShortRead)
            }
            Ok(_) => Ok(()),
            Err(e) => {
                warn!(%file, path = %path, %e, "read failed");
                Err(ErrorKind::Io)
            }
        }
    }

    pub(super) fn write(&mut self, file: FileId, len: u32, offset: u32) -> Outcome {
        let open = self.files.get_mut(file).ok_or(ErrorKind::NotFound)?;
        if open.read_only {
            warn!(%file, path = %open.path, "write to read-only file");
            return Err(ErrorKind::WriteFailure);
        }
        let OpenFile {
            access, buffer, path, ..
        } = open;

        let len = len as usize;
        let bytes = buffer.lock();
        let Some(src) = bytes.get(..len) else {
            warn!(%file, len, "write larger than buffer");
            return Err(ErrorKind::Misuse);
        };

        match access.write_at(src, u64::from(offset)) {
            Ok(n) if n == len => Ok(()),
            Ok(n) => {
                warn!(%file, path = %path, len, wrote = n, "partial write");
                Err(ErrorKind::WriteFailure)
            }
            Err(e) => {
                warn!(%file, path = %path, %e, "write failed");
                Err(ErrorKind::WriteFailure)
            }
        }
    }

    pub(super) fn sync(&mut self, file: FileId) -> Outcome {
        let open = self.files.get_mut(file).ok_or(ErrorKind::NotFound)?;
        if open.read_only {
            return Ok(());
        }
        open.access.flush().map_err(|e| {
            warn!(%file, path = %open.path, %e, "sync failed");
            ErrorKind::Io
        })
    }

    pub(super) fn truncate(&mut self, file: FileId, size: u32) -> Outcome {
        let open = self.files.get_mut(file).ok_or(ErrorKind::NotFound)?;
        if open.read_only {
            warn!(%file, path = %open.path, "truncate of read-only file");
            return Err(ErrorKind::TruncateFailure);
        }
        open.access.truncate(u64::from(size)).map_err(|e| {
            warn!(%file, path = %open.path, %e, "truncate failed");
            ErrorKind::TruncateFailure
        })
    }

    pub(super) fn file_size(&mut self, file: FileId) -> Outcome {
        let open = self.files.get_mut(file).ok_or(ErrorKind::NotFound)?;
        let size = open.access.size().map_err(|e| {
            warn!(%file, path = %open.path, %e, "size failed");
            ErrorKind::Io
        })?;
        open.buffer.put_u64(size);
        Ok(())
    }

    pub(super) async fn delete(&mut self, path: &str, clean_ancestors: bool) -> Outcome {
        let (dir, name) = self.resolver.resolve(path, false).await.map_err(|e| {
            debug!(%path, %e, "delete: cannot resolve path");
            ErrorKind::NotFound
        })?;

        if let Err(e) = dir.remove_entry(&name, false).await {
            debug!(%path, %e, "delete failed");
            return Err(classify(&e));
        }
        // The entry may have been a directory
        self.resolver.evict(path);
        debug!(%path, "deleted");

        if clean_ancestors {
            self.remove_empty_ancestors(path).await;
        }
        Ok(())
    }

    /// Remove now-empty parents of `path`, innermost first. Stops at the
    /// first directory that cannot be removed and never touches the root.
    async fn remove_empty_ancestors(&mut self, path: &str) {
        let mut current = resolver::parent(path);
        while let Some(dir_path) = current.take().filter(|p| !p.is_empty()) {
            let (parent, name) = match self.resolver.resolve(&dir_path, false).await {
                Ok(found) => found,
                Err(e) => {
                    debug!(dir = %dir_path, %e, "ancestor cleanup: cannot resolve");
                    return;
                }
            };
            if let Err(e) = parent.remove_entry(&name, false).await {
                debug!(dir = %dir_path, %e, "ancestor cleanup stopped");
                return;
            }
            self.resolver.evict(&dir_path);
            debug!(dir = %dir_path, "removed empty ancestor");
            current = resolver::parent(&dir_path);
        }
    }

    pub(super) async fn access(&mut self, path: &str) -> Outcome {
        let (dir, name) = self
            .resolver
            .resolve(path, false)
            .await
            .map_err(|_| ErrorKind::NotFound)?;
        dir.get_file(&name, false)
            .await
            .map(|_| ())
            .map_err(|_| ErrorKind::NotFound)
    }

    pub(super) async fn mkdir(&mut self, path: &str) -> Outcome {
        let (dir, name) = self.resolver.resolve(path, true).await.map_err(|e| {
            warn!(%path, %e, "mkdir: cannot resolve parents");
            classify(&e)
        })?;
        dir.get_directory(&name, true).await.map(|_| ()).map_err(|e| {
            warn!(%path, %e, "mkdir failed");
            classify(&e)
        })
    }
}

/// Close the access handle, then honour delete-on-close.
async fn release(file: FileId, open: OpenFile) {
    let OpenFile {
        path,
        dir,
        name,
        created,
        delete_on_close,
        access,
        ..
    } = open;

    if let Err(e) = access.close() {
        warn!(%file, %path, %e, "close failed");
    }
    if delete_on_close {
        if let Err(e) = dir.remove_entry(&name, false).await {
            warn!(%file, %path, %e, "delete on close failed");
        }
    }
    debug!(%file, %path, created, "closed");
}
