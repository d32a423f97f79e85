//! A logical byte stream stored as a chain of variable-file areas.
//!
//! Each live area is `[object_type: u8][next: u64][payload…]`; the tail
//! carries `next == UNDEFINED`. Areas on the free chain drop the type byte
//! and start directly with the next free id.

use crate::errors::{RecordError, Result};
use crate::object_id::ObjectId;
use crate::variable::free_area::FreeAreaManager;
use crate::verify::CancelFlag;
use pagestore::area::AreaFile;
use pagestore::fix::{FixMode, UnfixMode};
use pagestore::page::Page;
use std::collections::HashSet;
use std::sync::Arc;

/// Type byte of a linked-object area.
pub(crate) const LINKED_OBJECT_TYPE: u8 = 0x01;

/// Per-area overhead of a live chain: type byte plus next pointer.
pub(crate) const AREA_LINK_OVERHEAD: usize = 1 + ObjectId::DISK_SIZE;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AccessMode {
    Read,
    Write,
}

impl AccessMode {
    fn fix_mode(self) -> FixMode {
        match self {
            AccessMode::Read => FixMode::ReadOnly,
            AccessMode::Write => FixMode::Write { discardable: true },
        }
    }

    fn unfix_mode(self) -> UnfixMode {
        match self {
            AccessMode::Read => UnfixMode::NotDirty,
            AccessMode::Write => UnfixMode::Dirty,
        }
    }
}

#[derive(Debug)]
struct Cursor {
    page: Page,
    payload_start: usize,
    payload_len: usize,
    pos: usize,
    next: ObjectId,
}

/// Byte-stream cursor over one linked object.
#[derive(Debug)]
pub(crate) struct LinkedObject {
    area: Arc<AreaFile>,
    mode: AccessMode,
    head: ObjectId,
    cursor: Option<Cursor>,
    abs_pos: usize,
}

impl LinkedObject {
    pub fn new(area: Arc<AreaFile>, mode: AccessMode) -> Self {
        Self {
            area,
            mode,
            head: ObjectId::UNDEFINED,
            cursor: None,
            abs_pos: 0,
        }
    }

    /// Allocates a chain of areas able to hold `total_size` payload bytes,
    /// reusing the free-variable chain first, and links them up. Returns
    /// the head object id.
    pub fn create(
        area: &Arc<AreaFile>,
        free: &mut FreeAreaManager,
        total_size: usize,
        free_head: &mut ObjectId,
    ) -> Result<ObjectId> {
        debug_assert!(total_size > 0);
        let capacity = area.area_capacity();
        let mut chain: Vec<ObjectId> = Vec::new();
        let mut remaining = total_size;
        while remaining > 0 {
            let take = (remaining + AREA_LINK_OVERHEAD).min(capacity);
            let id = free.allocate(take, free_head)?;
            chain.push(id);
            remaining -= take - AREA_LINK_OVERHEAD;
        }
        for (index, id) in chain.iter().enumerate() {
            let next = chain.get(index + 1).copied().unwrap_or(ObjectId::UNDEFINED);
            let page = area
                .paged()
                .fix_page(id.page_id(), FixMode::Write { discardable: true })?;
            let range = area.area_range(&page, id.area_id())?;
            {
                let mut bytes = page.write();
                bytes[range.start] = LINKED_OBJECT_TYPE;
                next.write_to(&mut bytes, range.start + 1)?;
            }
            area.paged().unfix_page(page, UnfixMode::Dirty);
        }
        let head = chain[0];
        tracing::debug!(head = %head, areas = chain.len(), total_size, "created linked object");
        Ok(head)
    }

    /// Positions the cursor at byte 0 of the object.
    pub fn attach(&mut self, head: ObjectId) -> Result<()> {
        debug_assert!(!head.is_undefined());
        self.detach();
        self.head = head;
        self.abs_pos = 0;
        self.load_cursor(head)
    }

    pub fn detach(&mut self) {
        if let Some(cursor) = self.cursor.take() {
            self.area.paged().unfix_page(cursor.page, self.mode.unfix_mode());
        }
    }

    /// Forgets the page handle without unfixing; used after a store-level
    /// detach or recover already dropped the frame.
    pub fn release_page(&mut self) {
        self.cursor = None;
    }

    /// Moves the stream position to `pos`, rewinding to the head first
    /// when seeking backwards.
    pub fn seek(&mut self, pos: usize) -> Result<()> {
        if pos < self.abs_pos {
            let head = self.head;
            self.attach(head)?;
        }
        self.skip(pos - self.abs_pos)
    }

    /// Reads exactly `buf.len()` bytes.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<()> {
        let mut copied = 0;
        while copied < buf.len() {
            self.ensure_payload()?;
            let cursor = self.cursor.as_mut().expect("cursor loaded");
            let n = (buf.len() - copied).min(cursor.payload_len - cursor.pos);
            {
                let bytes = cursor.page.read();
                let at = cursor.payload_start + cursor.pos;
                buf[copied..copied + n].copy_from_slice(&bytes[at..at + n]);
            }
            cursor.pos += n;
            copied += n;
            self.abs_pos += n;
        }
        Ok(())
    }

    /// Writes exactly `buf.len()` bytes.
    pub fn write(&mut self, buf: &[u8]) -> Result<()> {
        debug_assert!(self.mode == AccessMode::Write);
        let mut copied = 0;
        while copied < buf.len() {
            self.ensure_payload()?;
            let cursor = self.cursor.as_mut().expect("cursor loaded");
            let n = (buf.len() - copied).min(cursor.payload_len - cursor.pos);
            {
                let mut bytes = cursor.page.write();
                let at = cursor.payload_start + cursor.pos;
                bytes[at..at + n].copy_from_slice(&buf[copied..copied + n]);
            }
            cursor.page.mark_dirty();
            cursor.pos += n;
            copied += n;
            self.abs_pos += n;
        }
        Ok(())
    }

    /// Skips `n` bytes forward.
    pub fn skip(&mut self, n: usize) -> Result<()> {
        let mut left = n;
        while left > 0 {
            self.ensure_payload()?;
            let cursor = self.cursor.as_mut().expect("cursor loaded");
            let step = left.min(cursor.payload_len - cursor.pos);
            cursor.pos += step;
            left -= step;
            self.abs_pos += step;
        }
        Ok(())
    }

    /// Unlinks the whole chain starting at `head` and threads its areas
    /// onto the free-variable chain, head first.
    pub fn delete_all(area: &AreaFile, head: ObjectId, free_head: &mut ObjectId) -> Result<()> {
        let chain = walk_chain(area, head, &CancelFlag::default(), false)?;
        for (index, (id, _)) in chain.iter().enumerate() {
            let next_free = chain
                .get(index + 1)
                .map(|(id, _)| *id)
                .unwrap_or(*free_head);
            let page = area
                .paged()
                .fix_page(id.page_id(), FixMode::Write { discardable: true })?;
            let range = area.area_range(&page, id.area_id())?;
            {
                let mut bytes = page.write();
                next_free.write_to(&mut bytes, range.start)?;
            }
            area.paged().unfix_page(page, UnfixMode::Dirty);
        }
        if let Some((first, _)) = chain.first() {
            *free_head = *first;
        }
        tracing::debug!(head = %head, areas = chain.len(), "deleted linked object");
        Ok(())
    }

    /// Walks the chain and returns `(area id, payload bytes)` per area.
    /// For verification: pages are fixed through the verification hook and
    /// the walk is cancellable.
    pub fn chain_areas(
        area: &AreaFile,
        head: ObjectId,
        cancel: &CancelFlag,
    ) -> Result<Vec<(ObjectId, usize)>> {
        walk_chain(area, head, cancel, true)
    }

    fn ensure_payload(&mut self) -> Result<()> {
        let exhausted = {
            let cursor = self
                .cursor
                .as_ref()
                .ok_or_else(|| RecordError::Unexpected("linked object not attached".into()))?;
            cursor.pos == cursor.payload_len
        };
        if exhausted {
            self.advance()?;
        }
        Ok(())
    }

    fn advance(&mut self) -> Result<()> {
        let cursor = self.cursor.take().expect("cursor loaded");
        let next = cursor.next;
        self.area.paged().unfix_page(cursor.page, self.mode.unfix_mode());
        if next.is_undefined() {
            return Err(RecordError::Unexpected(
                "access past the end of a linked object".into(),
            ));
        }
        self.load_cursor(next)
    }

    fn load_cursor(&mut self, id: ObjectId) -> Result<()> {
        let page = self.area.paged().fix_page(id.page_id(), self.mode.fix_mode())?;
        let parsed = (|| -> Result<(usize, usize, ObjectId)> {
            let range = self.area.area_range(&page, id.area_id())?;
            let bytes = page.read();
            if bytes[range.start] != LINKED_OBJECT_TYPE {
                return Err(RecordError::Unexpected(format!(
                    "area {id} does not hold a linked object"
                )));
            }
            let next = ObjectId::read_from(&bytes, range.start + 1)?;
            Ok((
                range.start + AREA_LINK_OVERHEAD,
                range.len() - AREA_LINK_OVERHEAD,
                next,
            ))
        })();
        match parsed {
            Ok((payload_start, payload_len, next)) => {
                self.cursor = Some(Cursor {
                    page,
                    payload_start,
                    payload_len,
                    pos: 0,
                    next,
                });
                Ok(())
            }
            Err(error) => {
                self.area.paged().unfix_page(page, UnfixMode::NotDirty);
                Err(error)
            }
        }
    }
}

fn walk_chain(
    area: &AreaFile,
    head: ObjectId,
    cancel: &CancelFlag,
    verifying: bool,
) -> Result<Vec<(ObjectId, usize)>> {
    let mut chain = Vec::new();
    let mut visited = HashSet::new();
    let mut current = head;
    while !current.is_undefined() {
        cancel.check()?;
        if !visited.insert(current) {
            return Err(RecordError::Unexpected(format!(
                "cycle in linked object chain at {current}"
            )));
        }
        if !area.paged().is_used_page(current.page_id()) {
            return Err(RecordError::Unexpected(format!(
                "linked object chain reaches unallocated page {}",
                current.page_id()
            )));
        }
        let page = if verifying {
            area.paged().verify_page(current.page_id(), FixMode::ReadOnly)?
        } else {
            area.paged().fix_page(current.page_id(), FixMode::ReadOnly)?
        };
        let link = (|| -> Result<(usize, ObjectId)> {
            let range = area.area_range(&page, current.area_id())?;
            let bytes = page.read();
            if bytes[range.start] != LINKED_OBJECT_TYPE {
                return Err(RecordError::Unexpected(format!(
                    "area {current} does not hold a linked object"
                )));
            }
            let next = ObjectId::read_from(&bytes, range.start + 1)?;
            Ok((range.len() - AREA_LINK_OVERHEAD, next))
        })();
        area.paged().unfix_page(page, UnfixMode::NotDirty);
        let (payload, next) = link?;
        chain.push((current, payload));
        current = next;
    }
    Ok(chain)
}
