//! The link between Caller and Executor.
//!
//! Three pieces:
//!
//! - a **message queue** (tokio unbounded mpsc) carrying typed requests;
//!   sending never blocks, so the Caller can use it from a plain thread
//! - a **control block**: one `i32` slot per op kind, each with its own
//!   mutex/condvar pair so a Caller thread can park until the Executor
//!   posts a result
//! - one **shared buffer** per open file, carrying read/write payloads
//!
//! ```text
//! Caller thread                         Executor task
//! ─────────────                         ─────────────
//! reset(slot) = SENTINEL
//! send(Op { slot, request }) ───────▶   recv()
//! wait(slot)  ┐                         ... async store work ...
//!   (parked)  │◀──────────────────────  signal(slot, code)
//! read code ◀─┘
//! ```
//!
//! Startup is a two-step handshake: the Executor reports readiness over a
//! oneshot, then the Caller pushes a [`Handshake`] and waits on the reserved
//! slot for the acknowledgement. Only a [`CallerLink`], which exists solely
//! after a completed handshake, can submit operations.

use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use vfsbridge_types::{ErrorCodes, FileId, OpKind, OpenFlags, SlotMap, SENTINEL, SUCCESS};

use crate::error::StartError;

/// One result slot.
#[derive(Debug)]
struct Slot {
    value: AtomicI32,
    lock: Mutex<()>,
    ready: Condvar,
}

/// Fixed array of result slots shared by both sides.
///
/// The Executor is the only writer of results; the Caller only resets a
/// slot to [`SENTINEL`] before submitting. Once the Executor goes away the
/// block is closed and every waiter returns `None`.
#[derive(Debug)]
pub struct ControlBlock {
    slots: Box<[Slot]>,
    closed: AtomicBool,
}

impl ControlBlock {
    /// Create a block of `len` slots, all holding [`SUCCESS`].
    pub fn new(len: usize) -> Self {
        let slots = (0..len)
            .map(|_| Slot {
                value: AtomicI32::new(SUCCESS),
                lock: Mutex::new(()),
                ready: Condvar::new(),
            })
            .collect();
        Self {
            slots,
            closed: AtomicBool::new(false),
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Current value of `slot`, if it exists.
    pub fn load(&self, slot: usize) -> Option<i32> {
        self.slots.get(slot).map(|s| s.value.load(Ordering::Acquire))
    }

    /// Mark `slot` in flight. Must happen before the request is sent so a
    /// stale result cannot be mistaken for the new one.
    pub fn reset(&self, slot: usize) {
        if let Some(s) = self.slots.get(slot) {
            s.value.store(SENTINEL, Ordering::Release);
        }
    }

    /// Post `code` into `slot` and wake its waiter. Returns false if the
    /// slot does not exist.
    pub fn signal(&self, slot: usize, code: i32) -> bool {
        let Some(s) = self.slots.get(slot) else {
            return false;
        };
        s.value.store(code, Ordering::Release);
        // Taking the lock orders this store after any waiter's check, so a
        // waiter that saw SENTINEL is already parked when we notify
        drop(lock(&s.lock));
        s.ready.notify_one();
        true
    }

    /// Block the calling thread until `slot` leaves [`SENTINEL`].
    ///
    /// Returns `None` if the slot does not exist or the block was closed
    /// while still waiting.
    pub fn wait(&self, slot: usize) -> Option<i32> {
        let s = self.slots.get(slot)?;
        let mut guard = lock(&s.lock);
        loop {
            let value = s.value.load(Ordering::Acquire);
            if value != SENTINEL {
                return Some(value);
            }
            if self.closed.load(Ordering::Acquire) {
                return None;
            }
            // Spurious wake-ups land back at the check above
            guard = s.ready.wait(guard).unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Wake every waiter for good. Called when the Executor stops.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        for s in self.slots.iter() {
            drop(lock(&s.lock));
            s.ready.notify_all();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Byte region bound to one open file for its lifetime.
///
/// Ownership alternates: the Caller fills it before submitting a write, the
/// Executor fills it before signalling a read or size result. The mutex is
/// never contended under that discipline; it only makes the handoff safe.
#[derive(Debug, Clone)]
pub struct SharedBuffer {
    bytes: Arc<Mutex<Box<[u8]>>>,
    capacity: usize,
}

impl SharedBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            bytes: Arc::new(Mutex::new(vec![0u8; capacity].into_boxed_slice())),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Exclusive view of the whole region.
    pub fn lock(&self) -> MutexGuard<'_, Box<[u8]>> {
        lock(&self.bytes)
    }

    /// Copy `data` to the start of the region. `data` must fit.
    pub fn fill_from(&self, data: &[u8]) {
        self.lock()[..data.len()].copy_from_slice(data);
    }

    /// Copy the start of the region into `out`. `out` must fit.
    pub fn copy_to(&self, out: &mut [u8]) {
        let n = out.len();
        out.copy_from_slice(&self.lock()[..n]);
    }

    /// Store a little-endian `u64` in the first eight bytes.
    pub fn put_u64(&self, value: u64) {
        self.fill_from(&value.to_le_bytes());
    }

    /// Load the little-endian `u64` from the first eight bytes.
    pub fn get_u64(&self) -> u64 {
        let mut raw = [0u8; 8];
        self.copy_to(&mut raw);
        u64::from_le_bytes(raw)
    }
}

/// One request per op kind; the variant is the discriminant.
#[derive(Debug, Clone)]
pub enum Request {
    Open {
        file: FileId,
        path: String,
        flags: OpenFlags,
        buffer: SharedBuffer,
    },
    Close {
        file: FileId,
    },
    Read {
        file: FileId,
        len: u32,
        offset: u32,
    },
    Write {
        file: FileId,
        len: u32,
        offset: u32,
    },
    Sync {
        file: FileId,
    },
    Truncate {
        file: FileId,
        size: u32,
    },
    FileSize {
        file: FileId,
    },
    Delete {
        path: String,
        clean_ancestors: bool,
    },
    Access {
        path: String,
    },
    Sleep {
        millis: u32,
    },
    Mkdir {
        path: String,
    },
    Shutdown,
}

impl Request {
    pub fn kind(&self) -> OpKind {
        match self {
            Request::Open { .. } => OpKind::Open,
            Request::Close { .. } => OpKind::Close,
            Request::Read { .. } => OpKind::Read,
            Request::Write { .. } => OpKind::Write,
            Request::Sync { .. } => OpKind::Sync,
            Request::Truncate { .. } => OpKind::Truncate,
            Request::FileSize { .. } => OpKind::FileSize,
            Request::Delete { .. } => OpKind::Delete,
            Request::Access { .. } => OpKind::Access,
            Request::Sleep { .. } => OpKind::Sleep,
            Request::Mkdir { .. } => OpKind::Mkdir,
            Request::Shutdown => OpKind::Shutdown,
        }
    }
}

/// Shared configuration pushed by the Caller once, before any operation.
#[derive(Debug, Clone)]
pub struct Handshake {
    pub control: Arc<ControlBlock>,
    pub slots: SlotMap,
    pub buffer_capacity: usize,
    pub codes: ErrorCodes,
}

#[derive(Debug)]
pub(crate) enum Message {
    Init(Handshake),
    Op { slot: usize, request: Request },
}

/// Why a submission never reached the Executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum LinkError {
    #[error("slot {0} is outside the control block")]
    NoSuchSlot(usize),
    #[error("op {0} has no slot in the slot map")]
    Unmapped(OpKind),
    #[error("executor is gone")]
    Disconnected,
}

/// Executor end of a fresh channel. Consumed by [`crate::Executor::run`].
#[derive(Debug)]
pub struct ExecutorLink {
    pub(crate) rx: mpsc::UnboundedReceiver<Message>,
    pub(crate) ready: oneshot::Sender<()>,
}

/// Caller end of a fresh channel, before the handshake.
#[derive(Debug)]
pub struct PendingCaller {
    tx: mpsc::UnboundedSender<Message>,
    ready: oneshot::Receiver<()>,
}

/// Create an unconnected channel pair.
pub fn channel() -> (PendingCaller, ExecutorLink) {
    let (tx, rx) = mpsc::unbounded_channel();
    let (ready_tx, ready_rx) = oneshot::channel();
    (
        PendingCaller {
            tx,
            ready: ready_rx,
        },
        ExecutorLink {
            rx,
            ready: ready_tx,
        },
    )
}

impl PendingCaller {
    /// Wait for the Executor to report readiness, push the shared
    /// configuration, and wait for the acknowledgement.
    ///
    /// Blocks the calling thread, so it must not run inside an async
    /// runtime.
    pub fn handshake(
        self,
        slots: SlotMap,
        buffer_capacity: usize,
        codes: ErrorCodes,
    ) -> Result<CallerLink, StartError> {
        if tokio::runtime::Handle::try_current().is_ok() {
            return Err(StartError::InsideRuntime);
        }

        self.ready
            .blocking_recv()
            .map_err(|_| StartError::ExecutorGone)?;
        debug!("executor ready, sending handshake");

        let control = Arc::new(ControlBlock::new(slots.len()));
        let reserved = slots.reserved();
        control.reset(reserved);

        let handshake = Handshake {
            control: control.clone(),
            slots: slots.clone(),
            buffer_capacity,
            codes,
        };
        self.tx
            .send(Message::Init(handshake))
            .map_err(|_| StartError::ExecutorGone)?;

        match control.wait(reserved) {
            Some(SUCCESS) => {
                debug!(slots = slots.len(), buffer_capacity, "handshake complete");
                Ok(CallerLink {
                    tx: self.tx,
                    control,
                    slots,
                    codes,
                    buffer_capacity,
                })
            }
            Some(code) => Err(StartError::Rejected(code)),
            None => Err(StartError::ExecutorGone),
        }
    }
}

/// Caller end of a connected channel.
#[derive(Debug)]
pub struct CallerLink {
    tx: mpsc::UnboundedSender<Message>,
    control: Arc<ControlBlock>,
    slots: SlotMap,
    codes: ErrorCodes,
    buffer_capacity: usize,
}

impl CallerLink {
    pub fn slots(&self) -> &SlotMap {
        &self.slots
    }

    pub fn codes(&self) -> &ErrorCodes {
        &self.codes
    }

    pub fn buffer_capacity(&self) -> usize {
        self.buffer_capacity
    }

    pub fn control(&self) -> &ControlBlock {
        &self.control
    }

    /// Reset `slot` and send `request` to it. Does not wait.
    ///
    /// The slot is taken as given, so a request can be aimed at a slot
    /// whose handler is for a different kind; the Executor answers that
    /// with misuse.
    pub fn submit(&self, slot: usize, request: Request) -> Result<(), LinkError> {
        if slot >= self.control.len() {
            return Err(LinkError::NoSuchSlot(slot));
        }
        self.control.reset(slot);
        self.tx
            .send(Message::Op { slot, request })
            .map_err(|_| LinkError::Disconnected)
    }

    /// Block until `slot` holds a result.
    pub fn wait(&self, slot: usize) -> Result<i32, LinkError> {
        if slot >= self.control.len() {
            return Err(LinkError::NoSuchSlot(slot));
        }
        self.control.wait(slot).ok_or(LinkError::Disconnected)
    }

    /// Submit to the slot for the request's kind and wait for the result.
    pub fn call(&self, request: Request) -> Result<i32, LinkError> {
        let kind = request.kind();
        let slot = self.slots.slot_of(kind).ok_or(LinkError::Unmapped(kind))?;
        self.submit(slot, request)?;
        self.wait(slot)
    }
}
