//! Operation kinds and their control-block slot assignment.

use std::fmt;

/// Every operation the Caller can submit.
///
/// The first ten mirror the synchronous VFS method table. `Mkdir` and
/// `Shutdown` are bridge housekeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum OpKind {
    Open,
    Close,
    Read,
    Write,
    Sync,
    Truncate,
    FileSize,
    Delete,
    Access,
    Sleep,
    Mkdir,
    Shutdown,
}

impl OpKind {
    /// All kinds, in standard slot order.
    pub const ALL: [OpKind; 12] = [
        OpKind::Open,
        OpKind::Close,
        OpKind::Read,
        OpKind::Write,
        OpKind::Sync,
        OpKind::Truncate,
        OpKind::FileSize,
        OpKind::Delete,
        OpKind::Access,
        OpKind::Sleep,
        OpKind::Mkdir,
        OpKind::Shutdown,
    ];

    /// Number of distinct kinds.
    pub const COUNT: usize = Self::ALL.len();

    /// Stable lowercase name, used in logs and metrics.
    pub fn name(self) -> &'static str {
        match self {
            OpKind::Open => "open",
            OpKind::Close => "close",
            OpKind::Read => "read",
            OpKind::Write => "write",
            OpKind::Sync => "sync",
            OpKind::Truncate => "truncate",
            OpKind::FileSize => "file_size",
            OpKind::Delete => "delete",
            OpKind::Access => "access",
            OpKind::Sleep => "sleep",
            OpKind::Mkdir => "mkdir",
            OpKind::Shutdown => "shutdown",
        }
    }

    /// Position of this kind in [`OpKind::ALL`].
    pub fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Assignment of op kinds to control-block slots.
///
/// One slot per kind plus one trailing reserved slot, which carries the
/// handshake acknowledgement and never an operation result. A slot that maps
/// to no kind has no handler on the Executor side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotMap {
    slots: Vec<Option<OpKind>>,
}

impl SlotMap {
    /// One slot per kind in [`OpKind::ALL`] order, reserved slot last.
    pub fn standard() -> Self {
        Self::with_order(&OpKind::ALL)
    }

    /// Build a map from an explicit order. Kinds left out get no slot;
    /// duplicates after the first occurrence are left unmapped.
    pub fn with_order(order: &[OpKind]) -> Self {
        let mut slots: Vec<Option<OpKind>> = Vec::with_capacity(order.len() + 1);
        for kind in order {
            if slots.contains(&Some(*kind)) {
                slots.push(None);
            } else {
                slots.push(Some(*kind));
            }
        }
        // Reserved
        slots.push(None);
        Self { slots }
    }

    /// Total slot count, reserved slot included.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Always false: the reserved slot is unconditional.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Index of the reserved handshake slot.
    pub fn reserved(&self) -> usize {
        self.slots.len() - 1
    }

    /// Slot carrying results for `kind`, if it has one.
    pub fn slot_of(&self, kind: OpKind) -> Option<usize> {
        self.slots.iter().position(|s| *s == Some(kind))
    }

    /// Kind handled at `slot`. `None` for the reserved slot, unmapped slots,
    /// and out-of-range indices.
    pub fn kind_at(&self, slot: usize) -> Option<OpKind> {
        self.slots.get(slot).copied().flatten()
    }
}

impl Default for SlotMap {
    fn default() -> Self {
        Self::standard()
    }
}
