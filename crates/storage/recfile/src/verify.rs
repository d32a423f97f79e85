//! Consistency verification: treatments, findings, and cooperative
//! cancellation.
//!
//! The verifier never raises on an inconsistency; it appends a [`Finding`]
//! and, under [`Treatment::Continue`], keeps going.

use crate::errors::{RecordError, Result};
use crate::object_id::ObjectId;
use pagestore::{AreaId, PageId};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// How the verifier reacts to an inconsistency.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Treatment {
    /// Aggregate every finding.
    Continue,
    /// Stop at the first finding.
    Abort,
}

/// One detected inconsistency.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Finding {
    /// Count and endpoints of the header disagree (one zero, the other
    /// defined, or vice versa).
    InconsistentHeader {
        count: i64,
        first: ObjectId,
        last: ObjectId,
    },
    /// An object id that should name a live object does not.
    ObjectNotFound(ObjectId),
    /// An occupied slot exists before the header's first object.
    ExistTopObject { first: ObjectId, prev: ObjectId },
    /// An occupied slot exists after the header's last object.
    ExistLastObject { last: ObjectId, next: ObjectId },
    /// A page's stored slot count disagrees with its bitmap.
    InconsistentPageObjectNumber {
        page_id: PageId,
        stored: u32,
        counted: u32,
    },
    /// The per-page tally disagrees with the header's row count.
    DiscordObjectNum { header: i64, counted: i64 },
    /// A free-chain entry is occupied, malformed, or part of a cycle.
    BadFreeObjectID(ObjectId),
    /// Per-field sizes of a variable object do not add up to its areas.
    InconsistentVariableSize {
        object_id: ObjectId,
        expected: usize,
        actual: usize,
    },
    /// A variable object's chain is unreadable (broken link, wrong type
    /// byte, or cycle).
    CorruptVariableObject(ObjectId),
    /// An allocated page is referenced by nothing.
    UnusedAllocatedPage { variable: bool, page_id: PageId },
    /// A live area is referenced by no object chain and no free chain.
    UnreferencedArea { page_id: PageId, area_id: AreaId },
}

/// The verifier's structured result.
#[derive(Debug, Default)]
pub struct VerifyReport {
    pub findings: Vec<Finding>,
}

impl VerifyReport {
    pub fn is_consistent(&self) -> bool {
        self.findings.is_empty()
    }
}

/// Cooperative cancellation flag carried into long verifier and
/// variable-file walks.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    /// Raises `Cancelled` once the flag is set.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(RecordError::Cancelled)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_flag_raises_once_set() {
        let flag = CancelFlag::new();
        assert!(flag.check().is_ok());
        flag.cancel();
        assert!(matches!(flag.check(), Err(RecordError::Cancelled)));
        // Clones observe the same state.
        assert!(flag.clone().is_cancelled());
    }

    #[test]
    fn report_consistency() {
        let mut report = VerifyReport::default();
        assert!(report.is_consistent());
        report.findings.push(Finding::ObjectNotFound(ObjectId::UNDEFINED));
        assert!(!report.is_consistent());
    }
}
