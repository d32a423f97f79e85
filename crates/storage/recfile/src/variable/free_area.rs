//! Area acquisition for linked objects: reuse the free-variable chain
//! first, then carve from the last page, then grow the file.

use crate::errors::{RecordError, Result};
use crate::object_id::ObjectId;
use pagestore::area::AreaFile;
use pagestore::errors::PageStoreError;
use pagestore::fix::{FixMode, UnfixMode};
use pagestore::AreaId;
use std::sync::Arc;

/// Hands out areas for new linked objects.
///
/// Popping the free chain frees the old area through the page store and
/// re-carves an exact-size one, so stored sizes always account precisely.
/// When the reclaimed page still cannot host the request, the space is
/// simply left reclaimed and allocation falls through to a fresh area.
#[derive(Debug)]
pub(crate) struct FreeAreaManager {
    area: Arc<AreaFile>,
}

impl FreeAreaManager {
    pub fn new(area: Arc<AreaFile>) -> Self {
        Self { area }
    }

    /// Allocates one area of exactly `size` bytes and returns its id.
    /// `free_head` is the free-variable chain head; a consumed entry is
    /// popped and the new head written back for the file header.
    pub fn allocate(&mut self, size: usize, free_head: &mut ObjectId) -> Result<ObjectId> {
        debug_assert!(size <= self.area.area_capacity());

        if !free_head.is_undefined() {
            let candidate = *free_head;
            if !self.area.paged().is_used_page(candidate.page_id()) {
                return Err(RecordError::Unexpected(format!(
                    "free variable chain reaches unallocated page {}",
                    candidate.page_id()
                )));
            }
            let page = self
                .area
                .paged()
                .fix_page(candidate.page_id(), FixMode::Write { discardable: true })?;
            let reused = (|| -> Result<Option<AreaId>> {
                let range = self.area.area_range(&page, candidate.area_id())?;
                let next = {
                    let bytes = page.read();
                    ObjectId::read_from(&bytes, range.start)?
                };
                *free_head = next;
                self.area.free_area(&page, candidate.area_id())?;
                match self.area.allocate_area(&page, size) {
                    Ok(area_id) => Ok(Some(area_id)),
                    Err(PageStoreError::AreaTooLarge { .. }) => Ok(None),
                    Err(error) => Err(error.into()),
                }
            })();
            match reused {
                Ok(Some(area_id)) => {
                    self.area.paged().unfix_page(page, UnfixMode::Dirty);
                    return Ok(ObjectId::new(candidate.page_id(), area_id));
                }
                Ok(None) => {
                    // Reclaimed but too small for this request.
                    self.area.paged().unfix_page(page, UnfixMode::Dirty);
                }
                Err(error) => {
                    self.area.paged().unfix_page(page, UnfixMode::NotDirty);
                    return Err(error);
                }
            }
        }

        if let Some(last) = self.area.paged().last_page_id() {
            let page = self
                .area
                .paged()
                .fix_page(last, FixMode::Write { discardable: true })?;
            match self.area.allocate_area(&page, size) {
                Ok(area_id) => {
                    self.area.paged().unfix_page(page, UnfixMode::Dirty);
                    return Ok(ObjectId::new(last, area_id));
                }
                Err(PageStoreError::AreaTooLarge { .. }) => {
                    self.area.paged().unfix_page(page, UnfixMode::NotDirty);
                }
                Err(error) => {
                    self.area.paged().unfix_page(page, UnfixMode::NotDirty);
                    return Err(error.into());
                }
            }
        }

        let page = self
            .area
            .allocate_page(FixMode::Write { discardable: true })?;
        let result = self.area.allocate_area(&page, size);
        match result {
            Ok(area_id) => {
                let page_id = page.id();
                self.area.paged().unfix_page(page, UnfixMode::Dirty);
                Ok(ObjectId::new(page_id, area_id))
            }
            Err(error) => {
                self.area.paged().unfix_page(page, UnfixMode::NotDirty);
                Err(error.into())
            }
        }
    }
}
