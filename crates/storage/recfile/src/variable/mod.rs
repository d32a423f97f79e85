//! The variable-length file: per-row payloads stored as linked chains of
//! areas, with a free-area chain for reuse.

pub(crate) mod free_area;
pub mod iterator;
pub(crate) mod linked_object;

use crate::errors::Result;
use crate::metadata::MetaData;
use crate::object_id::ObjectId;
use crate::row::RowData;
use crate::targets::TargetFields;
use crate::verify::{CancelFlag, Finding};
use free_area::FreeAreaManager;
use iterator::VariableIterator;
use linked_object::AccessMode;
use pagestore::area::AreaFile;
use pagestore::fix::{FixMode, UnfixMode};
use pagestore::{AreaId, PageId};
use std::collections::HashSet;
use std::sync::Arc;

/// The variable-payload file and its cursors.
#[derive(Debug)]
pub struct VariableFile {
    area: Arc<AreaFile>,
    meta: Arc<MetaData>,
    free: FreeAreaManager,
    read_iter: Option<VariableIterator>,
    write_iter: Option<VariableIterator>,
}

impl VariableFile {
    pub fn new(area: Arc<AreaFile>, meta: Arc<MetaData>) -> Self {
        Self {
            free: FreeAreaManager::new(Arc::clone(&area)),
            area,
            meta,
            read_iter: None,
            write_iter: None,
        }
    }

    pub fn area(&self) -> &Arc<AreaFile> {
        &self.area
    }

    /// Reads the targeted variable fields into `row` (the row's variable
    /// id must be defined).
    pub fn read(&mut self, row: &mut RowData, targets: &TargetFields) -> Result<()> {
        let iter = ensure_iter(
            &mut self.read_iter,
            &self.area,
            &self.meta,
            AccessMode::Read,
        );
        iter.read(row, targets)
    }

    /// Stores the row's variable side; returns `UNDEFINED` when every
    /// variable field is null.
    pub fn insert(&mut self, row: &RowData, free_head: &mut ObjectId) -> Result<ObjectId> {
        if !row.has_variable_data() {
            return Ok(ObjectId::UNDEFINED);
        }
        let iter = ensure_iter(
            &mut self.write_iter,
            &self.area,
            &self.meta,
            AccessMode::Write,
        );
        iter.insert(row, None, free_head, &mut self.free)
    }

    /// Delete-and-reinsert update of the row's variable side; expunges the
    /// old object and returns the new head id (possibly `UNDEFINED`).
    pub fn update(
        &mut self,
        old_header: &RowData,
        new_row: &RowData,
        targets: &TargetFields,
        free_head: &mut ObjectId,
    ) -> Result<ObjectId> {
        let iter = ensure_iter(
            &mut self.write_iter,
            &self.area,
            &self.meta,
            AccessMode::Write,
        );
        let new_head = iter.update(old_header, new_row, targets, free_head, &mut self.free)?;
        let old_head = old_header.variable_id();
        if !old_head.is_undefined() {
            iter.expunge(old_head, free_head)?;
        }
        Ok(new_head)
    }

    /// Threads the object's chain onto the free-variable chain.
    pub fn expunge(&mut self, head: ObjectId, free_head: &mut ObjectId) -> Result<()> {
        if head.is_undefined() {
            return Ok(());
        }
        let iter = ensure_iter(
            &mut self.write_iter,
            &self.area,
            &self.meta,
            AccessMode::Write,
        );
        iter.expunge(head, free_head)
    }

    /// Verifies one row's variable object and records the areas it uses.
    pub fn verify_contents(
        &mut self,
        row: &RowData,
        findings: &mut Vec<Finding>,
        cancel: &CancelFlag,
        used: &mut HashSet<(PageId, AreaId)>,
    ) -> Result<()> {
        let iter = ensure_iter(
            &mut self.read_iter,
            &self.area,
            &self.meta,
            AccessMode::Read,
        );
        iter.verify_contents(row, findings, cancel, used)
    }

    /// Walks the free-variable chain (areas without the type byte),
    /// recording its areas; malformed links become findings.
    pub fn collect_free_chain(
        &self,
        head: ObjectId,
        findings: &mut Vec<Finding>,
        cancel: &CancelFlag,
        used: &mut HashSet<(PageId, AreaId)>,
    ) -> Result<()> {
        let mut visited = HashSet::new();
        let mut current = head;
        while !current.is_undefined() {
            cancel.check()?;
            if !visited.insert(current) {
                findings.push(Finding::BadFreeObjectID(current));
                break;
            }
            if !self.area.paged().is_used_page(current.page_id()) {
                findings.push(Finding::ObjectNotFound(current));
                break;
            }
            let page = self
                .area
                .paged()
                .verify_page(current.page_id(), FixMode::ReadOnly)?;
            let next = {
                let range = match self.area.area_range(&page, current.area_id()) {
                    Ok(range) => range,
                    Err(_) => {
                        findings.push(Finding::BadFreeObjectID(current));
                        self.area.paged().unfix_page(page, UnfixMode::NotDirty);
                        break;
                    }
                };
                used.insert((current.page_id(), current.area_id()));
                let bytes = page.read();
                ObjectId::read_from(&bytes, range.start)?
            };
            self.area.paged().unfix_page(page, UnfixMode::NotDirty);
            current = next;
        }
        Ok(())
    }

    /// Compares every live area of the file against the `used` set
    /// gathered from the chains; leaked areas and unreferenced pages
    /// become findings.
    pub fn verify_area_usage(
        &self,
        used: &HashSet<(PageId, AreaId)>,
        findings: &mut Vec<Finding>,
        cancel: &CancelFlag,
    ) -> Result<()> {
        let Some(last) = self.area.paged().last_page_id() else {
            return Ok(());
        };
        for page_id in 0..=last {
            cancel.check()?;
            // A plain fix: walking every page here must not mark pages as
            // referenced for the page-store cross-check.
            let page = self.area.paged().fix_page(page_id, FixMode::ReadOnly)?;
            let live = self.area.live_areas(&page);
            self.area.paged().unfix_page(page, UnfixMode::NotDirty);
            for area_id in live? {
                if !used.contains(&(page_id, area_id)) {
                    findings.push(Finding::UnreferencedArea { page_id, area_id });
                }
            }
        }
        Ok(())
    }

    /// Forgets iterator page handles after a store-level detach/recover.
    pub fn release_pages(&mut self) {
        if let Some(iter) = &mut self.read_iter {
            iter.release_pages();
        }
        if let Some(iter) = &mut self.write_iter {
            iter.release_pages();
        }
    }
}

fn ensure_iter<'a>(
    slot: &'a mut Option<VariableIterator>,
    area: &Arc<AreaFile>,
    meta: &Arc<MetaData>,
    mode: AccessMode,
) -> &'a mut VariableIterator {
    slot.get_or_insert_with(|| VariableIterator::new(Arc::clone(area), Arc::clone(meta), mode))
}
