/// How a page is fixed into memory.
///
/// A discardable write fix snapshots the page bytes on first fix so a
/// failed operation can revert them with
/// [`recover_page_all`](crate::paged_file::PagedFile::recover_page_all).
/// Batch-style writers fix non-discardable and rely on store-level
/// recovery instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FixMode {
    ReadOnly,
    Write { discardable: bool },
}

impl FixMode {
    pub fn is_write(self) -> bool {
        matches!(self, FixMode::Write { .. })
    }

    pub fn is_discardable(self) -> bool {
        matches!(self, FixMode::Write { discardable: true })
    }
}

/// How a page is released.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnfixMode {
    /// The page was not modified.
    NotDirty,
    /// The page was modified and must reach disk on the next successful
    /// detach.
    Dirty,
}
