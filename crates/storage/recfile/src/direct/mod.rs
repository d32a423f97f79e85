//! The fixed-length file: one slot per record with an occupancy bitmap per
//! page and a free-slot chain threaded through the slots themselves.

pub(crate) mod field;
pub mod iterator;
pub(crate) mod page_header;

use crate::errors::{RecordError, Result};
use crate::file_info::{FileInformation, INFO_PAGE_ID, ValidateOperation};
use crate::metadata::MetaData;
use crate::object_id::ObjectId;
use crate::row::RowData;
use crate::targets::TargetFields;
use iterator::{DirectIterator, Operation};
use pagestore::paged_file::PagedFile;
use std::sync::Arc;

/// The fixed-slot file and its cursors.
#[derive(Debug)]
pub struct DirectFile {
    paged: Arc<PagedFile>,
    meta: Arc<MetaData>,
    batch: bool,
    read_iter: Option<DirectIterator>,
    write_iter: Option<DirectIterator>,
    marked: ObjectId,
}

impl DirectFile {
    pub fn new(paged: Arc<PagedFile>, meta: Arc<MetaData>, batch: bool) -> Self {
        Self {
            paged,
            meta,
            batch,
            read_iter: None,
            write_iter: None,
            marked: ObjectId::UNDEFINED,
        }
    }

    /// Reads the row at `id` into `row`. Returns false when the id names
    /// no occupied slot.
    pub fn read(&mut self, id: ObjectId, row: &mut RowData) -> Result<bool> {
        let iter = ensure_iter(&mut self.read_iter, &self.paged, &self.meta, self.batch);
        if !iter.seek(id, true, Operation::Read)? {
            return Ok(false);
        }
        let result = iter.read(row);
        iter.detach(Operation::Read);
        result.map(|()| true)
    }

    /// Advances the scan cursor and reads the next row. `start`/`end` are
    /// the scan bounds captured from the header; they only apply when the
    /// scan has not produced a row yet.
    pub fn scan_next(&mut self, start: ObjectId, end: ObjectId, row: &mut RowData) -> Result<bool> {
        if self.read_iter.is_none() {
            self.read_iter = Some(DirectIterator::with_bounds(
                Arc::clone(&self.paged),
                Arc::clone(&self.meta),
                self.batch,
                start,
                end,
            ));
        }
        let iter = self.read_iter.as_mut().expect("scan cursor present");
        if iter.is_unset() {
            iter.set_start(start);
            iter.set_end(end);
        }
        if !iter.next()? {
            return Ok(false);
        }
        let result = iter.read(row);
        iter.detach(Operation::Read);
        result.map(|()| true)
    }

    /// Reads only the null bitmap and variable id of the row at `id`.
    pub fn read_slot_header(&mut self, id: ObjectId, row: &mut RowData) -> Result<()> {
        let iter = ensure_iter(&mut self.write_iter, &self.paged, &self.meta, self.batch);
        if !iter.seek(id, true, Operation::Read)? {
            return Err(RecordError::ObjectNotFound(id));
        }
        let result = iter.read_slot_header(row);
        iter.detach(Operation::Read);
        result
    }

    /// Reads only the variable object id of the row at `id`.
    pub fn read_variable_id(&mut self, id: ObjectId) -> Result<ObjectId> {
        let iter = ensure_iter(&mut self.write_iter, &self.paged, &self.meta, self.batch);
        if !iter.seek(id, true, Operation::Read)? {
            return Err(RecordError::ObjectNotFound(id));
        }
        let result = iter.read_variable_id();
        iter.detach(Operation::Read);
        result
    }

    /// Acquires a slot (free-chain head first, then an append past the
    /// last object), writes the row, and maintains the header counters.
    pub fn insert(&mut self, row: &RowData, info: &mut FileInformation) -> Result<ObjectId> {
        let free_id = info.first_free_fixed();
        let use_free_chain = !free_id.is_undefined();
        let mut preferred = free_id;

        if !use_free_chain && info.count() > 0 {
            // Append: the next vacant slot on the last object's page, or a
            // fresh page when that page is full.
            let last = info.last();
            let op = if self.batch {
                Operation::Batch
            } else {
                Operation::Write
            };
            let iter = ensure_iter(&mut self.write_iter, &self.paged, &self.meta, self.batch);
            if iter.seek(last, true, op)? {
                preferred = iter.next_free_object_id()?;
                if preferred.is_undefined() {
                    iter.detach(Operation::Read);
                }
            }
        }

        let iter = ensure_iter(&mut self.write_iter, &self.paged, &self.meta, self.batch);
        let popped = iter.insert(row, preferred, use_free_chain)?;
        let id = iter.object_id();
        info.set_first_free_fixed(popped);
        info.validate(iter, ValidateOperation::Insert)?;
        tracing::debug!(object_id = %id, used_free_chain = use_free_chain, "inserted record");
        Ok(id)
    }

    /// Overwrites the slot header and the targeted fixed columns of `id`.
    pub fn update(
        &mut self,
        id: ObjectId,
        row: &RowData,
        targets: &TargetFields,
        info: &mut FileInformation,
    ) -> Result<()> {
        let iter = ensure_iter(&mut self.write_iter, &self.paged, &self.meta, self.batch);
        if !iter.seek(id, true, Operation::Write)? {
            return Err(RecordError::ObjectNotFound(id));
        }
        iter.update(row, targets)?;
        info.validate(iter, ValidateOperation::Update)?;
        tracing::debug!(object_id = %id, "updated record");
        Ok(())
    }

    /// Clears the slot at `id`, threads it onto the free chain, and
    /// maintains the header counters and endpoints.
    pub fn expunge(&mut self, id: ObjectId, info: &mut FileInformation) -> Result<()> {
        // Endpoint replacement searches are bounded by the current
        // first/last object ids.
        let (first, last) = (info.first(), info.last());
        let iter = ensure_iter(&mut self.write_iter, &self.paged, &self.meta, self.batch);
        iter.set_start(first);
        iter.set_end(last);
        if !iter.seek(id, true, Operation::Expunge)? {
            return Err(RecordError::ObjectNotFound(id));
        }
        iter.expunge(info.first_free_fixed())?;
        info.validate(iter, ValidateOperation::Expunge)?;
        tracing::debug!(object_id = %id, "expunged record");
        Ok(())
    }

    /// Records the scan position for `rewind`.
    pub fn mark(&mut self) {
        self.marked = self
            .read_iter
            .as_ref()
            .map(|iter| iter.object_id())
            .unwrap_or(ObjectId::UNDEFINED);
    }

    /// Returns to the marked position, or resets the scan when nothing
    /// was marked.
    pub fn rewind(&mut self) -> Result<()> {
        if self.marked.is_undefined() {
            self.reset();
            return Ok(());
        }
        let marked = self.marked;
        let iter = ensure_iter(&mut self.read_iter, &self.paged, &self.meta, self.batch);
        if !iter.seek(marked, false, Operation::Read)? {
            return Err(RecordError::ObjectNotFound(marked));
        }
        Ok(())
    }

    /// Drops the scan cursor; the next scan starts over.
    pub fn reset(&mut self) {
        self.read_iter = None;
    }

    /// A fresh iterator for verification walks, bounded to the whole
    /// allocated range so the endpoint witness searches cross pages.
    pub(crate) fn verify_iterator(&self) -> DirectIterator {
        let mut iter = DirectIterator::new(Arc::clone(&self.paged), Arc::clone(&self.meta), false);
        if let Some(last_page) = self.paged.last_page_id() {
            iter.set_start(ObjectId::new(INFO_PAGE_ID + 1, 0));
            iter.set_end(ObjectId::new(last_page, self.meta.slots_per_page() - 1));
        }
        iter
    }

    /// Forgets iterator page handles after a store-level detach/recover.
    pub fn release_pages(&mut self) {
        if let Some(iter) = &mut self.read_iter {
            iter.release_page();
        }
        if let Some(iter) = &mut self.write_iter {
            iter.release_page();
        }
    }

    pub fn paged(&self) -> &Arc<PagedFile> {
        &self.paged
    }
}

fn ensure_iter<'a>(
    slot: &'a mut Option<DirectIterator>,
    paged: &Arc<PagedFile>,
    meta: &Arc<MetaData>,
    batch: bool,
) -> &'a mut DirectIterator {
    slot.get_or_insert_with(|| DirectIterator::new(Arc::clone(paged), Arc::clone(meta), batch))
}
