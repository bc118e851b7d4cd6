//! The Executor: the async side that owns the backing store.
//!
//! It waits for the Caller's handshake, then takes one message at a time:
//! resolve the request's slot to a handler, run it against the store, and
//! post the result code into that slot. Requests never interleave, so
//! handlers take `&mut self` and the open-file table and resolver cache
//! need no locking.
//!
//! When the loop ends for any reason (shutdown, the Caller dropping its
//! end, or a panic unwinding through `run`), the control block is closed so
//! a parked Caller wakes up instead of hanging.

mod files;
mod ops;

use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use vfsbridge_store::DirectoryHandle;
use vfsbridge_types::{ErrorCodes, ErrorKind, SlotMap, SUCCESS};

use crate::channel::{ControlBlock, ExecutorLink, Handshake, Message, Request};
use crate::config::{ProxyConfig, MIN_BUFFER_CAPACITY};
use crate::metrics::{self, Metrics, MetricsSnapshot};
use crate::resolver::Resolver;

use files::FileTable;

/// What the handshake established.
#[derive(Debug)]
struct Session {
    control: Arc<ControlBlock>,
    slots: SlotMap,
    codes: ErrorCodes,
    buffer_capacity: usize,
}

impl Session {
    fn accept(handshake: Handshake) -> Result<Self, i32> {
        let Handshake {
            control,
            slots,
            buffer_capacity,
            codes,
        } = handshake;
        let reserved = slots.reserved();

        if let Err(e) = codes.validate() {
            error!(%e, "handshake carries an unusable code table");
            control.signal(reserved, ErrorCodes::default().misuse);
            return Err(ErrorCodes::default().misuse);
        }
        if control.len() != slots.len() || buffer_capacity < MIN_BUFFER_CAPACITY {
            error!(
                control = control.len(),
                slots = slots.len(),
                buffer_capacity,
                "handshake layout is inconsistent"
            );
            control.signal(reserved, codes.misuse);
            return Err(codes.misuse);
        }

        control.signal(reserved, SUCCESS);
        Ok(Self {
            control,
            slots,
            codes,
            buffer_capacity,
        })
    }

    fn code(&self, outcome: Result<(), ErrorKind>) -> i32 {
        match outcome {
            Ok(()) => SUCCESS,
            Err(kind) => self.codes.code(kind),
        }
    }
}

/// Closes the control block on the way out of `run`, however it leaves.
struct CloseOnExit(Option<Arc<ControlBlock>>);

impl Drop for CloseOnExit {
    fn drop(&mut self) {
        if let Some(control) = self.0.take() {
            control.close();
        }
    }
}

/// Retry policy for acquiring a busy file.
#[derive(Debug, Clone, Copy)]
struct Acquire {
    retries: u32,
    backoff: Duration,
}

#[derive(Debug)]
pub struct Executor {
    resolver: Resolver,
    files: FileTable,
    acquire: Acquire,
    metrics: Metrics,
}

impl Executor {
    pub fn new(root: Arc<dyn DirectoryHandle>, config: &ProxyConfig) -> Self {
        Self {
            resolver: Resolver::new(root),
            files: FileTable::default(),
            acquire: Acquire {
                retries: config.acquire_retries,
                backoff: config.acquire_backoff(),
            },
            metrics: Metrics::default(),
        }
    }

    /// Serve one Caller until it shuts us down or goes away.
    pub async fn run(mut self, link: ExecutorLink) -> MetricsSnapshot {
        let ExecutorLink { mut rx, ready } = link;
        let mut guard = CloseOnExit(None);

        if ready.send(()).is_err() {
            debug!("caller went away before the executor was ready");
            return self.metrics.snapshot();
        }

        let session = loop {
            match rx.recv().await {
                None => {
                    debug!("caller went away before the handshake");
                    return self.metrics.snapshot();
                }
                Some(Message::Init(handshake)) => {
                    if let Ok(session) = Session::accept(handshake) {
                        break session;
                    }
                }
                Some(Message::Op { slot, request }) => {
                    // No control block yet, so there is nowhere to answer
                    error!(slot, op = %request.kind(), "operation before handshake, dropped");
                }
            }
        };
        guard.0 = Some(session.control.clone());
        info!(
            slots = session.slots.len(),
            buffer_capacity = session.buffer_capacity,
            "executor serving"
        );

        let mut clean_exit = false;
        while let Some(message) = rx.recv().await {
            match message {
                Message::Init(_) => {
                    error!("duplicate handshake");
                    session
                        .control
                        .signal(session.slots.reserved(), session.codes.misuse);
                }
                Message::Op { slot, request } => {
                    if self.dispatch(&session, slot, request).await.is_break() {
                        clean_exit = true;
                        break;
                    }
                }
            }
        }

        if !clean_exit {
            warn!(open = self.files.len(), "caller went away without shutdown");
            self.close_all().await;
        }

        let snapshot = self.metrics.snapshot();
        for op in &snapshot.ops {
            info!(
                op = op.op,
                calls = op.calls,
                failures = op.failures,
                total_micros = op.total_micros,
                "executor op totals"
            );
        }
        snapshot
    }

    async fn dispatch(&mut self, session: &Session, slot: usize, request: Request) -> ControlFlow<()> {
        let requested = request.kind();
        let Some(kind) = session.slots.kind_at(slot) else {
            error!(slot, op = %requested, "no handler for slot");
            session.control.signal(slot, session.codes.misuse);
            return ControlFlow::Continue(());
        };
        if kind != requested {
            error!(slot, handler = %kind, op = %requested, "request does not match slot handler");
            session.control.signal(slot, session.codes.misuse);
            return ControlFlow::Continue(());
        }

        let started = Instant::now();
        let mut flow = ControlFlow::Continue(());
        let outcome = match request {
            Request::Open {
                file,
                path,
                flags,
                buffer,
            } => self.open(session, file, path, flags, buffer).await,
            Request::Close { file } => self.close(file).await,
            Request::Read { file, len, offset } => self.read(file, len, offset),
            Request::Write { file, len, offset } => self.write(file, len, offset),
            Request::Sync { file } => self.sync(file),
            Request::Truncate { file, size } => self.truncate(file, size),
            Request::FileSize { file } => self.file_size(file),
            Request::Delete {
                path,
                clean_ancestors,
            } => self.delete(&path, clean_ancestors).await,
            Request::Access { path } => self.access(&path).await,
            Request::Sleep { millis } => {
                tokio::time::sleep(Duration::from_millis(u64::from(millis))).await;
                Ok(())
            }
            Request::Mkdir { path } => self.mkdir(&path).await,
            Request::Shutdown => {
                self.close_all().await;
                flow = ControlFlow::Break(());
                Ok(())
            }
        };

        let failed = metrics::is_failure(kind, outcome.err());
        let code = session.code(outcome);
        self.metrics.record(kind, started.elapsed(), failed);
        debug!(op = %kind, slot, code, "handled");
        session.control.signal(slot, code);
        flow
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::channel;
    use vfsbridge_store::MemoryDir;
    use vfsbridge_types::OpKind;

    #[tokio::test]
    async fn run_returns_when_caller_drops_before_ready() {
        let (pending, link) = channel();
        drop(pending);
        let executor = Executor::new(MemoryDir::root(), &ProxyConfig::default());
        let snapshot = executor.run(link).await;
        assert_eq!(snapshot.total_calls(), 0);
    }

    #[test]
    fn bad_code_table_is_rejected_with_default_misuse() {
        let slots = SlotMap::standard();
        let control = Arc::new(ControlBlock::new(slots.len()));
        let mut codes = ErrorCodes::default();
        codes.io = 5;

        let result = Session::accept(Handshake {
            control: control.clone(),
            slots: slots.clone(),
            buffer_capacity: 64,
            codes,
        });
        assert_eq!(result.unwrap_err(), ErrorCodes::default().misuse);
        assert_eq!(control.load(slots.reserved()), Some(ErrorCodes::default().misuse));
    }

    #[test]
    fn mismatched_layout_is_rejected() {
        let slots = SlotMap::standard();
        let control = Arc::new(ControlBlock::new(3));
        let result = Session::accept(Handshake {
            control,
            slots,
            buffer_capacity: 64,
            codes: ErrorCodes::default(),
        });
        assert!(result.is_err());
    }

    #[test]
    fn accepted_handshake_acknowledges_on_reserved_slot() {
        let slots = SlotMap::with_order(&[OpKind::Open, OpKind::Close]);
        let control = Arc::new(ControlBlock::new(slots.len()));
        control.reset(slots.reserved());

        let session = Session::accept(Handshake {
            control: control.clone(),
            slots: slots.clone(),
            buffer_capacity: 64,
            codes: ErrorCodes::default(),
        })
        .unwrap();
        assert_eq!(control.load(slots.reserved()), Some(SUCCESS));
        assert_eq!(session.code(Err(ErrorKind::NotFound)), ErrorCodes::default().not_found);
    }
}
