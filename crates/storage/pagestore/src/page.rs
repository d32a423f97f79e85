use crate::PageId;
use crate::frame::Frame;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::Ordering;
use std::sync::{Arc, RwLockReadGuard, RwLockWriteGuard};

/// Handle to a fixed page. Holding it pins the frame; dropping it releases
/// the pin. Byte access goes through [`Page::read`] / [`Page::write`],
/// which hand out latch-guarded views.
#[derive(Debug)]
pub struct Page {
    pub(crate) frame: Arc<Frame>,
}

impl Page {
    pub(crate) fn new(frame: Arc<Frame>) -> Self {
        frame.pins.fetch_add(1, Ordering::Relaxed);
        Self { frame }
    }

    pub fn id(&self) -> PageId {
        self.frame.page_id
    }

    /// Immutable view of the page bytes.
    pub fn read(&self) -> PageRead<'_> {
        PageRead {
            guard: self.frame.data.read().expect("page latch poisoned"),
        }
    }

    /// Mutable view of the page bytes.
    pub fn write(&self) -> PageWrite<'_> {
        PageWrite {
            guard: self.frame.data.write().expect("page latch poisoned"),
        }
    }

    /// Schedules the page for the next successful detach without releasing
    /// the handle. Equivalent to an eventual `UnfixMode::Dirty` unfix.
    pub fn mark_dirty(&self) {
        self.frame.dirty.store(true, Ordering::Relaxed);
    }
}

impl Drop for Page {
    fn drop(&mut self) {
        self.frame.pins.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Read view of a fixed page.
#[derive(Debug)]
pub struct PageRead<'a> {
    guard: RwLockReadGuard<'a, Box<[u8]>>,
}

impl Deref for PageRead<'_> {
    type Target = [u8];
    fn deref(&self) -> &Self::Target {
        &self.guard
    }
}

/// Write view of a fixed page.
#[derive(Debug)]
pub struct PageWrite<'a> {
    guard: RwLockWriteGuard<'a, Box<[u8]>>,
}

impl Deref for PageWrite<'_> {
    type Target = [u8];
    fn deref(&self) -> &Self::Target {
        &self.guard
    }
}

impl DerefMut for PageWrite<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.guard
    }
}
