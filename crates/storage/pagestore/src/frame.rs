use crate::PageId;
use std::sync::atomic::{AtomicBool, AtomicU32};
use std::sync::{Mutex, RwLock};

/// An in-memory copy of one page, kept attached between fix and detach.
///
/// The byte buffer is behind a `RwLock` so read and write views are handed
/// out as latch guards. `snapshot` holds the pre-modification bytes of a
/// discardable write fix; `recover_page_all` restores it.
#[derive(Debug)]
pub(crate) struct Frame {
    pub(crate) page_id: PageId,
    pub(crate) data: RwLock<Box<[u8]>>,
    pub(crate) pins: AtomicU32,
    pub(crate) dirty: AtomicBool,
    pub(crate) snapshot: Mutex<Option<Box<[u8]>>>,
}

impl Frame {
    pub(crate) fn new(page_id: PageId, data: Box<[u8]>) -> Self {
        Self {
            page_id,
            data: RwLock::new(data),
            pins: AtomicU32::new(0),
            dirty: AtomicBool::new(false),
            snapshot: Mutex::new(None),
        }
    }
}
