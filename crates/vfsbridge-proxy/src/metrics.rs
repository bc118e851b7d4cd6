//! Per-op counters.
//!
//! Both sides keep one: the Caller measures how long it stayed blocked, the
//! Executor how long the store took. Snapshots serialize for display.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;

use vfsbridge_types::{ErrorKind, OpKind};

/// Whether an op that ended with `error` counts as failed. A short read
/// still delivered data, and `access` answers "missing" with an error code.
pub fn is_failure(kind: OpKind, error: Option<ErrorKind>) -> bool {
    match error {
        None | Some(ErrorKind::ShortRead) => false,
        Some(_) => kind != OpKind::Access,
    }
}

#[derive(Debug, Default)]
struct Counter {
    calls: AtomicU64,
    failures: AtomicU64,
    micros: AtomicU64,
}

#[derive(Debug)]
pub struct Metrics {
    ops: [Counter; OpKind::COUNT],
}

impl Default for Metrics {
    fn default() -> Self {
        Self {
            ops: std::array::from_fn(|_| Counter::default()),
        }
    }
}

impl Metrics {
    pub fn record(&self, kind: OpKind, elapsed: Duration, failed: bool) {
        let c = &self.ops[kind.index()];
        c.calls.fetch_add(1, Ordering::Relaxed);
        if failed {
            c.failures.fetch_add(1, Ordering::Relaxed);
        }
        let micros = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
        c.micros.fetch_add(micros, Ordering::Relaxed);
    }

    /// Ops that were called at least once, in [`OpKind::ALL`] order.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let ops = OpKind::ALL
            .into_iter()
            .filter_map(|kind| {
                let c = &self.ops[kind.index()];
                let calls = c.calls.load(Ordering::Relaxed);
                (calls > 0).then(|| OpStats {
                    op: kind.name(),
                    calls,
                    failures: c.failures.load(Ordering::Relaxed),
                    total_micros: c.micros.load(Ordering::Relaxed),
                })
            })
            .collect();
        MetricsSnapshot { ops }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OpStats {
    pub op: &'static str,
    pub calls: u64,
    pub failures: u64,
    pub total_micros: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub ops: Vec<OpStats>,
}

impl MetricsSnapshot {
    pub fn get(&self, kind: OpKind) -> Option<&OpStats> {
        self.ops.iter().find(|s| s.op == kind.name())
    }

    pub fn total_calls(&self) -> u64 {
        self.ops.iter().map(|s| s.calls).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_skips_unused_ops() {
        let metrics = Metrics::default();
        metrics.record(OpKind::Read, Duration::from_micros(40), false);
        metrics.record(OpKind::Read, Duration::from_micros(2), true);

        let snap = metrics.snapshot();
        assert_eq!(snap.ops.len(), 1);
        let read = snap.get(OpKind::Read).unwrap();
        assert_eq!(read.calls, 2);
        assert_eq!(read.failures, 1);
        assert_eq!(read.total_micros, 42);
        assert!(snap.get(OpKind::Write).is_none());
    }

    #[test]
    fn short_read_and_missing_access_are_not_failures() {
        assert!(!is_failure(OpKind::Read, None));
        assert!(!is_failure(OpKind::Read, Some(ErrorKind::ShortRead)));
        assert!(!is_failure(OpKind::Access, Some(ErrorKind::NotFound)));
        assert!(is_failure(OpKind::Read, Some(ErrorKind::Io)));
        assert!(is_failure(OpKind::Close, Some(ErrorKind::NotFound)));
    }

    #[test]
    fn empty_snapshot_has_no_calls() {
        assert_eq!(Metrics::default().snapshot().total_calls(), 0);
    }
}
