//! The record-file facade: sequences header load, direct and variable
//! operations, and header publication, with an exception-safe epilogue.
//!
//! Every mutating operation runs against in-memory page frames and only
//! reaches disk in the success epilogue (`detach_page_all`). The failure
//! epilogue reverts discardable fixes, rolls back fresh allocations, and
//! restores the header snapshot, making operations all-or-nothing at the
//! row level. Batch mode keeps frames attached across inserts and commits
//! them on close.

use crate::direct::DirectFile;
use crate::direct::iterator::Operation;
use crate::errors::{RecordError, Result};
use crate::file_info::{FileInformation, INFO_PAGE_ID, OpenOperation};
use crate::metadata::{MetaData, MetaDataOptions};
use crate::object_id::ObjectId;
use crate::row::RowData;
use crate::schema::Schema;
use crate::targets::TargetFields;
use crate::value::Value;
use crate::variable::VariableFile;
use crate::verify::{CancelFlag, Finding, Treatment, VerifyReport};
use pagestore::area::AreaFile;
use pagestore::errors::PageStoreError;
use pagestore::fix::{FixMode, UnfixMode};
use pagestore::paged_file::PagedFile;
use pagestore::{AreaId, PageId};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const DIRECT_FILE_NAME: &str = "direct";
const VARIABLE_FILE_NAME: &str = "variable";

/// How a record file is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Scans and fetches only.
    Read,
    /// Single-row mutations.
    Update,
    /// Bulk insert: non-discardable fixes, frames cached until close,
    /// store-level rollback on abort.
    Batch,
}

/// A logical record file: fixed-slot storage plus an optional
/// variable-payload file, addressed by [`ObjectId`].
#[derive(Debug)]
pub struct RecordFile {
    dir: PathBuf,
    meta: Arc<MetaData>,
    paged: Arc<PagedFile>,
    areas: Option<Arc<AreaFile>>,
    mode: OpenMode,
    is_open: bool,
    direct: DirectFile,
    variable: Option<VariableFile>,
    info: Option<FileInformation>,
    read_info: Option<FileInformation>,
}

impl RecordFile {
    /// Creates the on-disk files for a new record file.
    pub fn create(dir: impl AsRef<Path>, schema: Schema, options: &MetaDataOptions) -> Result<()> {
        let dir = dir.as_ref();
        let meta = MetaData::new(schema, options)?;
        let paged = PagedFile::create(dir.join(DIRECT_FILE_NAME), meta.direct_page_size())
            .map_err(map_already_exists)?;
        let page = paged.allocate_page(FixMode::Write { discardable: false })?;
        FileInformation::format(&page)?;
        paged.unfix_page(page, UnfixMode::Dirty);
        paged.detach_page_all()?;
        if meta.has_variable() {
            AreaFile::create(dir.join(VARIABLE_FILE_NAME), meta.variable_page_size())
                .map_err(map_already_exists)?;
        }
        tracing::info!(dir = %dir.display(), "created record file");
        Ok(())
    }

    /// Opens an existing record file.
    pub fn open(
        dir: impl AsRef<Path>,
        schema: Schema,
        options: &MetaDataOptions,
        mode: OpenMode,
    ) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        let meta = Arc::new(MetaData::new(schema, options)?);
        let paged = Arc::new(PagedFile::open(
            dir.join(DIRECT_FILE_NAME),
            meta.direct_page_size(),
        )?);
        let areas = if meta.has_variable() {
            Some(Arc::new(AreaFile::open(
                dir.join(VARIABLE_FILE_NAME),
                meta.variable_page_size(),
            )?))
        } else {
            None
        };
        let batch = mode == OpenMode::Batch;
        let direct = DirectFile::new(Arc::clone(&paged), Arc::clone(&meta), batch);
        let variable = areas
            .as_ref()
            .map(|area| VariableFile::new(Arc::clone(area), Arc::clone(&meta)));
        tracing::info!(dir = %dir.display(), ?mode, "opened record file");
        Ok(Self {
            dir,
            meta,
            paged,
            areas,
            mode,
            is_open: true,
            direct,
            variable,
            info: None,
            read_info: None,
        })
    }

    pub fn is_open(&self) -> bool {
        self.is_open
    }

    pub fn meta(&self) -> &Arc<MetaData> {
        &self.meta
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Flushes pending work (batch frames included) and closes the handle.
    pub fn close(&mut self) -> Result<()> {
        if !self.is_open {
            return Ok(());
        }
        self.commit_pages(true)?;
        self.is_open = false;
        tracing::info!(dir = %self.dir.display(), "closed record file");
        Ok(())
    }

    /// Row count from the header.
    pub fn count(&mut self) -> Result<i64> {
        self.require_open()?;
        let result = self
            .read_header_info()
            .map(|info| info.count());
        self.finish(result)
    }

    /// Inserts a row (values for every column; column 0 is assigned by the
    /// engine) and returns its object id.
    pub fn insert(&mut self, values: Vec<Value>) -> Result<ObjectId> {
        self.require_open()?;
        if !matches!(self.mode, OpenMode::Update | OpenMode::Batch) {
            return Err(RecordError::IllegalFileAccess);
        }
        let mut row = RowData::new(Arc::clone(&self.meta));
        let result = row
            .set_values(values)
            .and_then(|()| self.do_insert(&mut row));
        self.finish(result)
    }

    /// Updates the targeted columns of the row at `id`. Variable columns
    /// are rewritten as delete-and-reinsert; fixed columns in place.
    pub fn update(&mut self, id: ObjectId, values: Vec<Value>, targets: &TargetFields) -> Result<()> {
        self.require_open()?;
        if self.mode != OpenMode::Update {
            return Err(RecordError::IllegalFileAccess);
        }
        if id.is_undefined() {
            return Err(RecordError::BadArgument("undefined object id".into()));
        }
        if targets.contains(0) {
            return Err(RecordError::BadArgument(
                "column 0 carries the object id and cannot be updated".into(),
            ));
        }
        let result = self.do_update(id, values, targets);
        self.finish(result)
    }

    /// Deletes the row at `id`.
    pub fn expunge(&mut self, id: ObjectId) -> Result<()> {
        self.require_open()?;
        if self.mode != OpenMode::Update {
            return Err(RecordError::IllegalFileAccess);
        }
        if id.is_undefined() {
            return Err(RecordError::BadArgument("undefined object id".into()));
        }
        let result = self.do_expunge(id);
        self.finish(result)
    }

    /// Fetches a row by id, or the next scan row when `id` is `None`.
    /// Returns `None` at end of scan or when the id names no row.
    pub fn fetch(
        &mut self,
        id: Option<ObjectId>,
        targets: Option<&TargetFields>,
    ) -> Result<Option<Vec<Value>>> {
        self.require_open()?;
        if self.mode != OpenMode::Read {
            return Err(RecordError::IllegalFileAccess);
        }
        let targets = targets
            .cloned()
            .unwrap_or_else(|| TargetFields::all(self.meta.field_count()));
        let result = self.do_fetch(id, targets);
        self.finish(result)
    }

    /// Records the scan position for [`rewind`](Self::rewind).
    pub fn mark(&mut self) -> Result<()> {
        self.require_open()?;
        self.direct.mark();
        Ok(())
    }

    /// Returns to the marked scan position, or restarts the scan when
    /// nothing was marked.
    pub fn rewind(&mut self) -> Result<()> {
        self.require_open()?;
        let result = self.direct.rewind();
        self.finish(result)
    }

    /// Restarts the scan.
    pub fn reset(&mut self) -> Result<()> {
        self.require_open()?;
        self.direct.reset();
        Ok(())
    }

    /// Runs the consistency verifier and returns its findings.
    pub fn verify(&mut self, treatment: Treatment, cancel: &CancelFlag) -> Result<VerifyReport> {
        self.require_open()?;
        self.paged.start_verification();
        if let Some(area) = &self.areas {
            area.paged().start_verification();
        }
        let mut report = VerifyReport::default();
        let walk = self.do_verify(treatment, cancel, &mut report.findings);

        let direct_unused = self.paged.end_verification();
        if let Some(area) = &self.areas {
            // Variable pages can legitimately hold nothing but reclaimed
            // space; leaks surface as UnreferencedArea instead.
            let _ = area.paged().end_verification();
        }
        match walk {
            Ok(complete) => {
                if complete {
                    for page_id in direct_unused {
                        if page_id != INFO_PAGE_ID {
                            report
                                .findings
                                .push(Finding::UnusedAllocatedPage {
                                    variable: false,
                                    page_id,
                                });
                        }
                    }
                }
                let findings = report.findings.len();
                tracing::info!(findings, "verification finished");
                self.finish(Ok(report))
            }
            Err(error) => {
                self.finish_failure();
                Err(error)
            }
        }
    }

    fn do_insert(&mut self, row: &mut RowData) -> Result<ObjectId> {
        let info = load_update_info(
            &mut self.info,
            &self.paged,
            self.mode == OpenMode::Batch,
        )?;
        if let Some(variable) = &mut self.variable {
            let mut free_head = info.first_free_variable();
            let head = variable.insert(row, &mut free_head)?;
            info.set_first_free_variable(free_head);
            row.set_variable_id(head);
        } else {
            row.set_variable_id(ObjectId::UNDEFINED);
        }
        let id = self.direct.insert(row, info)?;
        info.sync()?;
        Ok(id)
    }

    fn do_update(&mut self, id: ObjectId, values: Vec<Value>, targets: &TargetFields) -> Result<()> {
        let info = load_update_info(&mut self.info, &self.paged, false)?;

        let mut old_header = RowData::with_targets(Arc::clone(&self.meta), TargetFields::default());
        self.direct.read_slot_header(id, &mut old_header)?;

        let (direct_targets, variable_targets) = targets.divide(&self.meta);
        let mut new_row = RowData::with_targets(Arc::clone(&self.meta), targets.clone());
        // Start from the old nullness so untouched columns keep theirs.
        new_row.set_null_bits(old_header.null_bits().clone());
        new_row.set_values(values)?;

        match (&mut self.variable, variable_targets.is_empty()) {
            (Some(variable), false) => {
                let mut free_head = info.first_free_variable();
                let new_head =
                    variable.update(&old_header, &new_row, &variable_targets, &mut free_head)?;
                info.set_first_free_variable(free_head);
                new_row.set_variable_id(new_head);
            }
            _ => new_row.set_variable_id(old_header.variable_id()),
        }

        self.direct.update(id, &new_row, &direct_targets, info)?;
        info.sync()?;
        Ok(())
    }

    fn do_expunge(&mut self, id: ObjectId) -> Result<()> {
        let info = load_update_info(&mut self.info, &self.paged, false)?;
        let variable_head = if self.variable.is_some() {
            self.direct.read_variable_id(id)?
        } else {
            ObjectId::UNDEFINED
        };
        self.direct.expunge(id, info)?;
        if let Some(variable) = &mut self.variable
            && !variable_head.is_undefined()
        {
            let mut free_head = info.first_free_variable();
            variable.expunge(variable_head, &mut free_head)?;
            info.set_first_free_variable(free_head);
        }
        info.sync()?;
        Ok(())
    }

    fn do_fetch(&mut self, id: Option<ObjectId>, targets: TargetFields) -> Result<Option<Vec<Value>>> {
        let mut row = RowData::with_targets(Arc::clone(&self.meta), targets.clone());
        let found = match id {
            Some(id) => {
                if id.is_undefined() {
                    return Err(RecordError::BadArgument("undefined object id".into()));
                }
                self.direct.read(id, &mut row)?
            }
            None => {
                // Scan bounds come from the header as of the first `next`,
                // so an insert between open and first fetch is not lost.
                let (first, last) = {
                    let info = self.read_header_info()?;
                    (info.first(), info.last())
                };
                self.direct.scan_next(first, last, &mut row)?
            }
        };
        if !found {
            return Ok(None);
        }
        if let Some(variable) = &mut self.variable {
            let (_, variable_targets) = targets.divide(&self.meta);
            if !variable_targets.is_empty() && !row.variable_id().is_undefined() {
                variable.read(&mut row, &variable_targets)?;
            }
        }
        Ok(Some(row.into_values()))
    }

    /// The verifier pass. Returns whether the walk ran to completion
    /// (false when aborted by the treatment).
    fn do_verify(
        &mut self,
        treatment: Treatment,
        cancel: &CancelFlag,
        findings: &mut Vec<Finding>,
    ) -> Result<bool> {
        let bail =
            |findings: &Vec<Finding>| treatment == Treatment::Abort && !findings.is_empty();

        let mut info = FileInformation::new(Arc::clone(&self.paged), OpenOperation::Verify);
        info.reload(false, false)?;
        self.paged.notify_use_page(INFO_PAGE_ID);

        // 1. Header sanity.
        let (count, first, last) = (info.count(), info.first(), info.last());
        let endpoints_defined = !first.is_undefined() && !last.is_undefined();
        if count < 0 || (count == 0) == endpoints_defined {
            findings.push(Finding::InconsistentHeader { count, first, last });
        }
        if bail(findings) {
            return Ok(false);
        }

        let mut iter = self.direct.verify_iterator();

        // 2. First-object linkage.
        if count > 0 {
            if !iter.seek(first, true, Operation::Read)? {
                findings.push(Finding::ObjectNotFound(first));
            } else {
                let prev = iter.prev_object_id()?;
                if !prev.is_undefined() {
                    findings.push(Finding::ExistTopObject { first, prev });
                }
                iter.detach(Operation::Read);
            }
            if bail(findings) {
                return Ok(false);
            }
        }

        // 3. Per-page tally, with the variable side checked per occupied
        //    slot during the same walk.
        iter.invalidate();
        let mut used_areas: HashSet<(PageId, AreaId)> = HashSet::new();
        let mut tallied: i64 = 0;
        while iter.next_page()?.is_some() {
            cancel.check()?;
            tallied += iter.verify_page_data(findings)? as i64;
            if bail(findings) {
                iter.detach(Operation::Read);
                return Ok(false);
            }
            if let Some(variable) = &mut self.variable
                && iter.is_exist()
            {
                loop {
                    let mut slot_header =
                        RowData::with_targets(Arc::clone(&self.meta), TargetFields::default());
                    iter.read_slot_header(&mut slot_header)?;
                    if !slot_header.variable_id().is_undefined() {
                        variable.verify_contents(&slot_header, findings, cancel, &mut used_areas)?;
                        if bail(findings) {
                            iter.detach(Operation::Read);
                            return Ok(false);
                        }
                    }
                    if iter.next_object_id_verify()?.is_undefined() {
                        break;
                    }
                }
            }
        }
        if tallied != count {
            findings.push(Finding::DiscordObjectNum {
                header: count,
                counted: tallied,
            });
            if bail(findings) {
                return Ok(false);
            }
        }

        // 4. Last-object linkage.
        if count > 0 {
            if !iter.seek(last, true, Operation::Read)? {
                findings.push(Finding::ObjectNotFound(last));
            } else {
                let next = iter.next_object_id()?;
                if !next.is_undefined() {
                    findings.push(Finding::ExistLastObject { last, next });
                }
                iter.detach(Operation::Read);
            }
            if bail(findings) {
                return Ok(false);
            }
        }

        // 5. Fixed free chain, cycle-bounded by the slot capacity of the
        //    allocated data pages.
        iter.invalidate();
        let data_pages = self.paged.last_page_id().unwrap_or(0) as u64;
        let visit_bound = data_pages * self.meta.slots_per_page() as u64;
        let mut free_id = info.first_free_fixed();
        let mut visits: u64 = 0;
        while !free_id.is_undefined() {
            cancel.check()?;
            if visits >= visit_bound {
                findings.push(Finding::BadFreeObjectID(free_id));
                break;
            }
            visits += 1;
            free_id = iter.verify_free_object_id(findings, free_id)?;
            if bail(findings) {
                iter.detach(Operation::Read);
                return Ok(false);
            }
        }
        iter.detach(Operation::Read);

        // 6. Variable side: free chain and area liveness cross-check.
        if let Some(variable) = &mut self.variable {
            variable.collect_free_chain(
                info.first_free_variable(),
                findings,
                cancel,
                &mut used_areas,
            )?;
            if bail(findings) {
                return Ok(false);
            }
            variable.verify_area_usage(&used_areas, findings, cancel)?;
            if bail(findings) {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn read_header_info(&mut self) -> Result<&mut FileInformation> {
        let paged = Arc::clone(&self.paged);
        let info = self
            .read_info
            .get_or_insert_with(|| FileInformation::new(paged, OpenOperation::Read));
        info.reload(false, false)?;
        Ok(info)
    }

    fn require_open(&self) -> Result<()> {
        if self.is_open {
            Ok(())
        } else {
            Err(RecordError::NotOpen)
        }
    }

    /// Success/failure epilogue shared by every operation.
    fn finish<T>(&mut self, result: Result<T>) -> Result<T> {
        match result {
            Ok(value) => {
                self.commit_pages(false)?;
                Ok(value)
            }
            Err(error) => {
                self.finish_failure();
                Err(error)
            }
        }
    }

    /// Flushes dirty frames and drops all attachments. Batch mode defers
    /// to close unless `force` is set.
    fn commit_pages(&mut self, force: bool) -> Result<()> {
        if self.mode == OpenMode::Batch && !force {
            return Ok(());
        }
        self.release_all_pages();
        self.paged.detach_page_all()?;
        if let Some(area) = &self.areas {
            area.paged().detach_page_all()?;
        }
        Ok(())
    }

    /// Reverts discardable page changes, rolls back fresh allocations and
    /// restores the header snapshot. In batch mode this discards every
    /// insert since the last flush (store-level rollback).
    fn finish_failure(&mut self) {
        self.release_all_pages();
        self.paged.recover_page_all();
        if let Some(area) = &self.areas {
            area.paged().recover_page_all();
        }
        if let Some(info) = &mut self.info {
            // If a sync already published speculative values in memory,
            // rewrite the pre-operation snapshot and flush just that.
            if info.recover().is_ok() {
                let _ = self.paged.detach_page_all();
            }
        }
        tracing::warn!(dir = %self.dir.display(), "operation aborted; pages recovered");
    }

    fn release_all_pages(&mut self) {
        self.direct.release_pages();
        if let Some(variable) = &mut self.variable {
            variable.release_pages();
        }
        if let Some(info) = &mut self.info {
            info.release_page();
        }
        if let Some(info) = &mut self.read_info {
            info.release_page();
        }
    }
}

fn load_update_info<'a>(
    slot: &'a mut Option<FileInformation>,
    paged: &Arc<PagedFile>,
    batch: bool,
) -> Result<&'a mut FileInformation> {
    let paged = Arc::clone(paged);
    let info = slot.get_or_insert_with(|| {
        FileInformation::new(
            paged,
            if batch {
                OpenOperation::Batch
            } else {
                OpenOperation::Update
            },
        )
    });
    info.reload(true, true)?;
    Ok(info)
}

fn map_already_exists(error: PageStoreError) -> RecordError {
    match error {
        PageStoreError::AlreadyExists(path) => RecordError::FileAlreadyExisted(path),
        other => RecordError::Store(other),
    }
}
