//! The Caller: a blocking [`Vfs`] backed by an Executor.
//!
//! Every method packs its arguments into a [`Request`], submits it, and
//! parks the thread until the Executor posts a code. Calls are serialized
//! by a single guard; the control block has one slot per op kind, so two
//! concurrent calls of the same kind would otherwise race for it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tracing::{debug, error, warn};

use vfsbridge_store::DirectoryHandle;
use vfsbridge_types::{
    checked_len, checked_offset, ErrorKind, FileId, OpenFlags, Opened, ReadStatus, SlotMap,
    Vfs, VfsError, VfsResult, SUCCESS,
};

use crate::channel::{channel, CallerLink, LinkError, PendingCaller, Request, SharedBuffer};
use crate::config::ProxyConfig;
use crate::error::StartError;
use crate::executor::Executor;
use crate::metrics::{self, Metrics, MetricsSnapshot};

/// Name of the thread [`ProxyVfs::start`] runs the Executor on.
pub const EXECUTOR_THREAD: &str = "vfsbridge-executor";

/// Caller-side record of an open file.
#[derive(Debug, Clone)]
struct CallerFile {
    path: String,
    read_only: bool,
    buffer: SharedBuffer,
}

/// A file as listed by [`ProxyVfs::open_files`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenFileInfo {
    pub file: FileId,
    pub path: String,
    pub read_only: bool,
}

#[derive(Debug)]
pub struct ProxyVfs {
    link: CallerLink,
    files: Mutex<HashMap<FileId, CallerFile>>,
    next_file: AtomicU64,
    call_guard: Mutex<()>,
    metrics: Metrics,
    executor: Option<JoinHandle<()>>,
    shut_down: bool,
}

impl ProxyVfs {
    /// Spawn an Executor serving `root` on its own thread and connect to it.
    ///
    /// Must be called from outside any async runtime.
    pub fn start(root: Arc<dyn DirectoryHandle>, config: &ProxyConfig) -> Result<Self, StartError> {
        config.validate()?;
        if tokio::runtime::Handle::try_current().is_ok() {
            return Err(StartError::InsideRuntime);
        }

        let (pending, link) = channel();
        let executor = Executor::new(root, config);
        let thread = std::thread::Builder::new()
            .name(EXECUTOR_THREAD.to_string())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_time()
                    .build()
                {
                    Ok(rt) => rt,
                    Err(e) => {
                        // Dropping the link fails the handshake
                        error!(%e, "cannot build executor runtime");
                        return;
                    }
                };
                runtime.block_on(executor.run(link));
            })
            .map_err(StartError::Spawn)?;

        match Self::connect(pending, config) {
            Ok(mut vfs) => {
                vfs.executor = Some(thread);
                Ok(vfs)
            }
            Err(e) => {
                if thread.join().is_err() {
                    error!("executor thread panicked during startup");
                }
                Err(e)
            }
        }
    }

    /// Connect to an Executor already running elsewhere.
    pub fn connect(pending: PendingCaller, config: &ProxyConfig) -> Result<Self, StartError> {
        config.validate()?;
        let link = pending.handshake(
            SlotMap::standard(),
            config.buffer_capacity,
            config.codes,
        )?;
        Ok(Self {
            link,
            files: Mutex::new(HashMap::new()),
            next_file: AtomicU64::new(1),
            call_guard: Mutex::new(()),
            metrics: Metrics::default(),
            executor: None,
            shut_down: false,
        })
    }

    /// Create a directory and any missing parents.
    pub fn mkdir(&self, path: &str) -> VfsResult<()> {
        let code = self.call(Request::Mkdir {
            path: path.to_string(),
        })?;
        self.check(code)
    }

    /// Caller-side timings: how long each op kept the caller blocked.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Files this caller currently has open, by id.
    pub fn open_files(&self) -> Vec<OpenFileInfo> {
        let mut out: Vec<_> = lock(&self.files)
            .iter()
            .map(|(file, f)| OpenFileInfo {
                file: *file,
                path: f.path.clone(),
                read_only: f.read_only,
            })
            .collect();
        out.sort_by_key(|f| f.file);
        out
    }

    pub fn buffer_capacity(&self) -> usize {
        self.link.buffer_capacity()
    }

    /// Close every file and stop the Executor. Idempotent; also run on drop.
    pub fn shutdown(&mut self) -> VfsResult<()> {
        if self.shut_down {
            return Ok(());
        }
        self.shut_down = true;
        let result = self.call(Request::Shutdown).and_then(|code| self.check(code));
        lock(&self.files).clear();
        if let Some(thread) = self.executor.take() {
            if thread.join().is_err() {
                error!("executor thread panicked");
            }
        }
        result
    }

    /// Submit and wait, under the call guard.
    fn call(&self, request: Request) -> VfsResult<i32> {
        let kind = request.kind();
        let _guard = lock(&self.call_guard);
        let started = Instant::now();
        let result = self.link.call(request);
        let failed = match result {
            Ok(SUCCESS) => false,
            Ok(code) => {
                let error = self.link.codes().kind(code).unwrap_or(ErrorKind::Io);
                metrics::is_failure(kind, Some(error))
            }
            Err(_) => true,
        };
        self.metrics.record(kind, started.elapsed(), failed);

        result.map_err(|e| {
            match e {
                LinkError::Disconnected => warn!(op = %kind, "executor is gone"),
                other => error!(op = %kind, %other, "cannot submit"),
            }
            VfsError::Io
        })
    }

    fn kind_of(&self, code: i32) -> ErrorKind {
        self.link.codes().kind(code).unwrap_or_else(|| {
            warn!(code, "unrecognized result code");
            ErrorKind::Io
        })
    }

    /// Map a code to success or its error. A short read is not expected
    /// here and reports as I/O.
    fn check(&self, code: i32) -> VfsResult<()> {
        if code == SUCCESS {
            return Ok(());
        }
        Err(VfsError::from_kind(self.kind_of(code)).unwrap_or(VfsError::Io))
    }

    fn buffer_for(&self, file: FileId, len: usize) -> VfsResult<SharedBuffer> {
        let buffer = lock(&self.files)
            .get(&file)
            .map(|f| f.buffer.clone())
            .ok_or(VfsError::NotFound)?;
        if len > buffer.capacity() {
            warn!(%file, len, capacity = buffer.capacity(), "transfer larger than buffer");
            return Err(VfsError::Misuse);
        }
        Ok(buffer)
    }
}

impl Vfs for ProxyVfs {
    fn open(&self, path: &str, flags: OpenFlags) -> VfsResult<Opened> {
        let file = FileId(self.next_file.fetch_add(1, Ordering::Relaxed));
        let buffer = SharedBuffer::new(self.link.buffer_capacity());
        let code = self.call(Request::Open {
            file,
            path: path.to_string(),
            flags,
            buffer: buffer.clone(),
        })?;
        self.check(code)?;

        let read_only = flags.effective_read_only();
        lock(&self.files).insert(
            file,
            CallerFile {
                path: path.to_string(),
                read_only,
                buffer,
            },
        );
        debug!(%file, path, read_only, "open");
        Ok(Opened { file, read_only })
    }

    fn close(&self, file: FileId) -> VfsResult<()> {
        let code = self.call(Request::Close { file })?;
        lock(&self.files).remove(&file);
        self.check(code)
    }

    fn read(&self, file: FileId, buf: &mut [u8], offset: u64) -> VfsResult<ReadStatus> {
        let len = checked_len(buf.len())?;
        let offset = checked_offset(offset)?;
        let buffer = self.buffer_for(file, buf.len())?;

        let code = self.call(Request::Read { file, len, offset })?;
        if code == SUCCESS {
            buffer.copy_to(buf);
            return Ok(ReadStatus::Complete);
        }
        match self.kind_of(code) {
            ErrorKind::ShortRead => {
                buffer.copy_to(buf);
                Ok(ReadStatus::Short)
            }
            kind => Err(VfsError::from_kind(kind).unwrap_or(VfsError::Io)),
        }
    }

    fn write(&self, file: FileId, data: &[u8], offset: u64) -> VfsResult<()> {
        let len = checked_len(data.len())?;
        let offset = checked_offset(offset)?;
        let buffer = self.buffer_for(file, data.len())?;

        buffer.fill_from(data);
        let code = self.call(Request::Write { file, len, offset })?;
        self.check(code)
    }

    fn sync(&self, file: FileId) -> VfsResult<()> {
        let code = self.call(Request::Sync { file })?;
        self.check(code)
    }

    fn truncate(&self, file: FileId, size: u64) -> VfsResult<()> {
        let size = checked_offset(size)?;
        let code = self.call(Request::Truncate { file, size })?;
        self.check(code)
    }

    fn file_size(&self, file: FileId) -> VfsResult<u64> {
        let buffer = self.buffer_for(file, 8)?;
        let code = self.call(Request::FileSize { file })?;
        self.check(code)?;
        Ok(buffer.get_u64())
    }

    fn delete(&self, path: &str, clean_ancestors: bool) -> VfsResult<()> {
        let code = self.call(Request::Delete {
            path: path.to_string(),
            clean_ancestors,
        })?;
        self.check(code)
    }

    fn access(&self, path: &str) -> VfsResult<bool> {
        let code = self.call(Request::Access {
            path: path.to_string(),
        })?;
        Ok(code == SUCCESS)
    }

    fn sleep(&self, duration: Duration) -> VfsResult<()> {
        let millis = u64::try_from(duration.as_millis()).map_err(|_| VfsError::Misuse)?;
        let millis = checked_offset(millis)?;
        let code = self.call(Request::Sleep { millis })?;
        self.check(code)
    }
}

impl Drop for ProxyVfs {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            debug!(%e, "shutdown on drop failed");
        }
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

