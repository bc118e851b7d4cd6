//! vfsbridge-proxy: blocking file I/O answered by an async executor.
//!
//! A thread that may block (a database engine's VFS layer, say) gets a
//! synchronous [`Vfs`](vfsbridge_types::Vfs) whose every call is carried
//! out by an [`Executor`] running on an async runtime, against a
//! handle-based [`DirectoryHandle`](vfsbridge_store::DirectoryHandle) store.
//!
//! ```text
//! ┌────────────────┐  Request (mpsc)   ┌──────────────────┐
//! │   ProxyVfs     │ ────────────────▶ │    Executor      │
//! │ (blocking)     │                   │ (current-thread  │
//! │                │ ◀──────────────── │  tokio runtime)  │
//! └────────────────┘  code in slot     └────────┬─────────┘
//!        ▲   │        (ControlBlock)            │
//!        │   └──── SharedBuffer per file ───────┤
//!        │                                      ▼
//!        │                             Resolver ─▶ DirectoryHandle
//! ```
//!
//! [`ProxyVfs::start`] is the usual entry point: it spawns the Executor on
//! its own thread and completes the handshake. [`channel`] plus
//! [`Executor::run`] and [`ProxyVfs::connect`] wire the two halves up by
//! hand, for hosts that already own a runtime thread.

pub mod caller;
pub mod channel;
pub mod config;
pub mod error;
pub mod executor;
pub mod metrics;
pub mod resolver;

pub use caller::{OpenFileInfo, ProxyVfs, EXECUTOR_THREAD};
pub use channel::{
    channel, CallerLink, ControlBlock, ExecutorLink, Handshake, LinkError, PendingCaller, Request,
    SharedBuffer,
};
pub use config::{default_config_path, ConfigError, ProxyConfig, CONFIG_ENV};
pub use error::StartError;
pub use executor::Executor;
pub use metrics::{MetricsSnapshot, OpStats};
pub use resolver::Resolver;
