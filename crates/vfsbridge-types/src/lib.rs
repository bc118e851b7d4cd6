//! vfsbridge-types: the vocabulary both sides of the bridge agree on.
//!
//! The Caller (a thread that may only block) and the Executor (the async
//! context that owns the backing store) never share code paths, only these
//! definitions:
//!
//! - **Op kinds** and the **slot map** that assigns each kind a control-block slot
//! - **Error kinds** and the numeric **error-code table** exchanged at handshake
//! - The synchronous **`Vfs` contract** the Caller implements

mod code;
mod op;
mod vfs;

pub use code::{CodeTableError, ErrorCodes, ErrorKind, SENTINEL, SUCCESS};
pub use op::{OpKind, SlotMap};
pub use vfs::{
    checked_len, checked_offset, FileId, OpenFlags, Opened, ReadStatus, Vfs, VfsError, VfsResult,
    MAX_IO,
};
