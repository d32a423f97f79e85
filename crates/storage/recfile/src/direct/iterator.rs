//! Cursor over the fixed-slot file.
//!
//! One parameterized slot search serves "next occupied", "previous
//! occupied" and "next vacant": a direction, a slot predicate, and a
//! page-level predicate that lets whole pages be skipped from their
//! header alone.

use crate::direct::field::FixedFields;
use crate::direct::page_header::DirectPageHeader;
use crate::errors::{RecordError, Result};
use crate::file_info::INFO_PAGE_ID;
use crate::metadata::MetaData;
use crate::object_id::ObjectId;
use crate::row::RowData;
use crate::targets::TargetFields;
use crate::value::Value;
use crate::verify::Finding;
use binary_helpers::bitmap::Bitmap;
use pagestore::PageId;
use pagestore::fix::{FixMode, UnfixMode};
use pagestore::page::Page;
use pagestore::paged_file::PagedFile;
use std::sync::Arc;

/// What a page is fixed for; decides the fix and unfix modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Read,
    Write,
    Insert,
    Expunge,
    Verify,
    Batch,
}

impl Operation {
    fn fix_mode(self) -> FixMode {
        match self {
            Operation::Read | Operation::Verify => FixMode::ReadOnly,
            Operation::Batch => FixMode::Write { discardable: false },
            Operation::Write | Operation::Insert | Operation::Expunge => {
                FixMode::Write { discardable: true }
            }
        }
    }

    fn unfix_mode(self) -> UnfixMode {
        match self {
            Operation::Read | Operation::Verify => UnfixMode::NotDirty,
            _ => UnfixMode::Dirty,
        }
    }
}

/// What a slot search does with the page it lands on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SearchPage {
    /// Report the object id only.
    Read,
    /// Move the iterator onto the found slot, keeping its page attached.
    Replace,
    /// Same-page search only, pages fixed through the verification hook.
    Verify,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotProbe {
    Occupied,
    Vacant,
}

impl SlotProbe {
    fn matches(self, header: &DirectPageHeader, slot_id: u32) -> bool {
        match self {
            SlotProbe::Occupied => header.is_occupied(slot_id),
            SlotProbe::Vacant => !header.is_occupied(slot_id),
        }
    }

    /// Can this page contain a matching slot at all?
    fn page_may_match(self, header: &DirectPageHeader) -> bool {
        match self {
            SlotProbe::Occupied => header.slot_count > 0,
            SlotProbe::Vacant => header.slot_count < header.slots_per_page(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Ascending,
    Descending,
}

/// Slot ids to probe, in search order. `from` is the exclusive anchor; a
/// fresh page is walked end to end.
fn slot_walk(
    direction: Direction,
    from: Option<u32>,
    slots_per_page: u32,
) -> Box<dyn Iterator<Item = u32>> {
    match (direction, from) {
        (Direction::Ascending, Some(anchor)) => Box::new(anchor + 1..slots_per_page),
        (Direction::Ascending, None) => Box::new(0..slots_per_page),
        (Direction::Descending, Some(anchor)) => Box::new((0..anchor).rev()),
        (Direction::Descending, None) => Box::new((0..slots_per_page).rev()),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Position {
    /// Scan not started; `next` begins at the start object id.
    Unset,
    At(ObjectId),
    Exhausted,
}

/// Iterator over the fixed-slot file.
#[derive(Debug)]
pub struct DirectIterator {
    paged: Arc<PagedFile>,
    meta: Arc<MetaData>,
    position: Position,
    page_id: Option<PageId>,
    slot_id: u32,
    page: Option<Page>,
    header: Option<DirectPageHeader>,
    op: Operation,
    start_id: ObjectId,
    end_id: ObjectId,
    batch: bool,
}

impl DirectIterator {
    pub fn new(paged: Arc<PagedFile>, meta: Arc<MetaData>, batch: bool) -> Self {
        Self::with_bounds(paged, meta, batch, ObjectId::UNDEFINED, ObjectId::UNDEFINED)
    }

    /// An iterator bounded to `[start, end]` for scans and endpoint
    /// searches.
    pub fn with_bounds(
        paged: Arc<PagedFile>,
        meta: Arc<MetaData>,
        batch: bool,
        start_id: ObjectId,
        end_id: ObjectId,
    ) -> Self {
        Self {
            paged,
            meta,
            position: Position::Unset,
            page_id: None,
            slot_id: 0,
            page: None,
            header: None,
            op: Operation::Read,
            start_id,
            end_id,
            batch,
        }
    }

    pub fn set_start(&mut self, id: ObjectId) {
        self.start_id = id;
    }

    pub fn set_end(&mut self, id: ObjectId) {
        self.end_id = id;
    }

    pub fn is_unset(&self) -> bool {
        self.position == Position::Unset
    }

    pub fn is_valid(&self) -> bool {
        matches!(self.position, Position::At(_))
    }

    /// Object id the iterator currently points at.
    pub fn object_id(&self) -> ObjectId {
        match self.position {
            Position::At(id) => id,
            _ => ObjectId::UNDEFINED,
        }
    }

    pub fn invalidate(&mut self) {
        self.detach(Operation::Read);
        self.position = Position::Unset;
        self.page_id = None;
        self.slot_id = 0;
    }

    /// Positions the iterator on `id`. Returns false when the id does not
    /// name an occupied slot. With `keep_attach` the page stays fixed
    /// under `op`'s mode.
    pub fn seek(&mut self, id: ObjectId, keep_attach: bool, op: Operation) -> Result<bool> {
        if id.is_undefined()
            || id.page_id() == INFO_PAGE_ID
            || id.area_id() >= self.meta.slots_per_page()
            || !self.paged.is_used_page(id.page_id())
        {
            return Ok(false);
        }
        self.position = Position::At(id);
        self.page_id = Some(id.page_id());
        self.slot_id = id.area_id();
        self.attach(op)?;
        match self.read_header() {
            Ok(()) => {
                let occupied = self
                    .header
                    .as_ref()
                    .is_some_and(|h| h.is_occupied(self.slot_id));
                if occupied {
                    if !keep_attach {
                        self.detach(Operation::Read);
                    }
                    Ok(true)
                } else {
                    self.detach(Operation::Read);
                    Ok(false)
                }
            }
            Err(error) => {
                self.detach(Operation::Read);
                Err(error)
            }
        }
    }

    /// Advances a scan to the next occupied slot. The first call lands on
    /// the start object id itself. Returns false at end of scan; the
    /// iterator then stays exhausted.
    pub fn next(&mut self) -> Result<bool> {
        let advance = match self.position {
            Position::Unset => {
                if self.start_id.is_undefined() {
                    self.position = Position::Exhausted;
                    return Ok(false);
                }
                let start = self.start_id;
                self.position = Position::At(start);
                self.page_id = Some(start.page_id());
                self.slot_id = start.area_id();
                false
            }
            Position::Exhausted => return Ok(false),
            Position::At(_) => true,
        };

        self.attach(Operation::Read)?;
        self.read_header()?;
        let on_occupied = self
            .header
            .as_ref()
            .is_some_and(|h| h.is_occupied(self.slot_id));
        if advance || !on_occupied {
            let found = self.search_slot(
                Direction::Ascending,
                SlotProbe::Occupied,
                SearchPage::Replace,
            )?;
            self.position = if found.is_undefined() {
                Position::Exhausted
            } else {
                Position::At(found)
            };
        }
        if self.is_valid() {
            Ok(true)
        } else {
            self.detach(Operation::Read);
            Ok(false)
        }
    }

    /// Next occupied object id after the current position.
    pub fn next_object_id(&mut self) -> Result<ObjectId> {
        self.search_slot(Direction::Ascending, SlotProbe::Occupied, SearchPage::Read)
    }

    /// Previous occupied object id before the current position.
    pub fn prev_object_id(&mut self) -> Result<ObjectId> {
        self.search_slot(Direction::Descending, SlotProbe::Occupied, SearchPage::Read)
    }

    /// Next vacant slot after the current position (same page only when
    /// the scan has no end bound).
    pub fn next_free_object_id(&mut self) -> Result<ObjectId> {
        self.search_slot(Direction::Ascending, SlotProbe::Vacant, SearchPage::Read)
    }

    /// Next occupied object id on the current page, for verification
    /// walks.
    pub fn next_object_id_verify(&mut self) -> Result<ObjectId> {
        let found = self.search_slot(
            Direction::Ascending,
            SlotProbe::Occupied,
            SearchPage::Verify,
        )?;
        if !found.is_undefined() {
            self.position = Position::At(found);
        }
        Ok(found)
    }

    /// Reads the current slot into `row` (targets taken from the row).
    /// The page must be attached and its header read, i.e. after a
    /// keeping `seek` or a successful `next`.
    pub fn read(&mut self, row: &mut RowData) -> Result<()> {
        let header = self
            .header
            .as_ref()
            .ok_or_else(|| RecordError::Unexpected("read without an attached page".into()))?;
        if !header.is_occupied(self.slot_id) {
            return Err(RecordError::Unexpected(
                "read positioned on a vacant slot".into(),
            ));
        }
        let slot_offset = header.slot_offset(self.slot_id, self.meta.slot_size());
        self.read_slot_header_at(slot_offset, row)?;

        let page = self.page.as_ref().expect("page attached");
        let bytes = page.read();
        let value_base = slot_offset + self.meta.slot_header_size();
        let fixed = FixedFields::new(&self.meta, value_base);
        let pairs: Vec<(usize, usize)> = row.targets().enumerate().collect();
        for (index, field_id) in pairs {
            if field_id == 0 {
                row.set_value_at(index, Value::ObjectId(self.object_id()));
            } else if row.is_null(field_id) {
                row.set_value_at(index, Value::Null);
            } else if self.meta.is_variable(field_id) {
                // Filled in by the variable file.
            } else {
                let value = fixed.read(&bytes, field_id)?;
                row.set_value_at(index, value);
            }
        }
        Ok(())
    }

    /// Reads only the null bitmap and variable id of the current slot.
    pub fn read_slot_header(&mut self, row: &mut RowData) -> Result<()> {
        let slot_offset = self.current_slot_offset();
        self.read_slot_header_at(slot_offset, row)
    }

    /// Reads only the variable object id of the current slot.
    pub fn read_variable_id(&mut self) -> Result<ObjectId> {
        let page = self
            .page
            .as_ref()
            .ok_or_else(|| RecordError::Unexpected("read without an attached page".into()))?;
        let bytes = page.read();
        let offset = self.current_slot_offset() + self.meta.null_bitmap_bytes();
        Ok(ObjectId::read_from(&bytes, offset)?)
    }

    /// Writes `row` into a slot. `preferred` names the slot to use (the
    /// free-chain head when `use_free_chain`); `UNDEFINED` appends on a
    /// freshly allocated page. Returns the next free object id popped
    /// from the slot when the free chain was used.
    pub fn insert(
        &mut self,
        row: &RowData,
        preferred: ObjectId,
        use_free_chain: bool,
    ) -> Result<ObjectId> {
        if preferred.is_undefined() {
            self.detach(Operation::Read);
            self.position = Position::Unset;
            self.page_id = None;
            self.slot_id = 0;
        } else {
            self.position = Position::At(preferred);
            self.page_id = Some(preferred.page_id());
            self.slot_id = preferred.area_id();
        }
        let op = if self.batch {
            Operation::Batch
        } else {
            Operation::Insert
        };
        self.attach(op)?;
        self.read_header()?;
        let mut header = self.header.clone().expect("header read");
        header.mark_insert(self.slot_id)?;

        let mut popped = ObjectId::UNDEFINED;
        {
            let page = self.page.as_ref().expect("page attached");
            let mut bytes = page.write();
            let slot_offset = header.slot_offset(self.slot_id, self.meta.slot_size());
            if use_free_chain {
                // The vacated slot stores the next free id; pop it for the
                // caller before overwriting.
                popped = ObjectId::read_from(&bytes, slot_offset)?;
            }
            header.write(&mut bytes)?;
            self.write_slot(&mut bytes, slot_offset, row, self.meta.direct_fields())?;
        }
        self.header = Some(header);
        self.position = Position::At(ObjectId::new(
            self.page_id.expect("page position set"),
            self.slot_id,
        ));
        self.detach(op);
        Ok(popped)
    }

    /// Overwrites the slot header and the targeted fixed fields of the
    /// current slot. The iterator must be positioned by a keeping `seek`.
    pub fn update(&mut self, row: &RowData, targets: &TargetFields) -> Result<()> {
        self.attach(Operation::Write)?;
        {
            let page = self.page.as_ref().expect("page attached");
            let mut bytes = page.write();
            let slot_offset = self.current_slot_offset();
            self.write_slot(&mut bytes, slot_offset, row, targets)?;
        }
        self.detach(Operation::Write);
        Ok(())
    }

    /// Clears the current slot's bit and threads `free_head` into its
    /// first eight bytes. The caller installs the expunged id as the new
    /// chain head.
    pub fn expunge(&mut self, free_head: ObjectId) -> Result<()> {
        self.attach(Operation::Expunge)?;
        self.read_header()?;
        let mut header = self.header.clone().expect("header read");
        header.mark_expunge(self.slot_id)?;
        {
            let page = self.page.as_ref().expect("page attached");
            let mut bytes = page.write();
            header.write(&mut bytes)?;
            let slot_offset = header.slot_offset(self.slot_id, self.meta.slot_size());
            free_head.write_to(&mut bytes, slot_offset)?;
        }
        self.header = Some(header);
        self.detach(Operation::Write);
        Ok(())
    }

    /// Verification walk: advances to the next allocated data page and
    /// positions on its first occupied slot, if any.
    pub fn next_page(&mut self) -> Result<Option<PageId>> {
        let from = match self.page_id {
            None => INFO_PAGE_ID,
            Some(id) => {
                self.detach(Operation::Verify);
                id
            }
        };
        let Some(next) = self.paged.next_page_id(from) else {
            self.page_id = None;
            return Ok(None);
        };
        self.page_id = Some(next);
        self.slot_id = 0;
        self.position = Position::Unset;
        self.attach(Operation::Verify)?;
        self.read_header()?;
        let first_occupied = {
            let header = self.header.as_ref().expect("header read");
            (header.slot_count > 0)
                .then(|| (0..self.meta.slots_per_page()).find(|&slot| header.is_occupied(slot)))
                .flatten()
        };
        if let Some(slot) = first_occupied {
            self.slot_id = slot;
            self.position = Position::At(ObjectId::new(next, slot));
        }
        Ok(Some(next))
    }

    /// Whether the verification walk found an occupied slot on the
    /// current page.
    pub fn is_exist(&self) -> bool {
        self.is_valid()
    }

    /// Checks the current page's bitmap against its stored slot count and
    /// returns this page's contribution to the global tally; the bitmap
    /// side counts when the two disagree.
    pub fn verify_page_data(&mut self, findings: &mut Vec<Finding>) -> Result<u64> {
        let (stored, counted) = {
            let header = self
                .header
                .as_ref()
                .ok_or_else(|| RecordError::Unexpected("verify without an attached page".into()))?;
            (header.slot_count, header.occupied_bits())
        };
        if stored != counted {
            findings.push(Finding::InconsistentPageObjectNumber {
                page_id: self.page_id.expect("page position set"),
                stored,
                counted,
            });
        }
        Ok(counted as u64)
    }

    /// Checks one link of the fixed free chain and returns the next free
    /// object id, or `UNDEFINED` after recording a finding.
    pub fn verify_free_object_id(
        &mut self,
        findings: &mut Vec<Finding>,
        free_id: ObjectId,
    ) -> Result<ObjectId> {
        if free_id.page_id() == INFO_PAGE_ID || !self.paged.is_used_page(free_id.page_id()) {
            findings.push(Finding::ObjectNotFound(free_id));
            self.detach(Operation::Read);
            return Ok(ObjectId::UNDEFINED);
        }
        if free_id.area_id() >= self.meta.slots_per_page() {
            findings.push(Finding::BadFreeObjectID(free_id));
            self.detach(Operation::Read);
            return Ok(ObjectId::UNDEFINED);
        }
        if self.page.is_some() && self.page_id != Some(free_id.page_id()) {
            self.detach(Operation::Read);
        }
        self.page_id = Some(free_id.page_id());
        self.slot_id = free_id.area_id();
        if self.page.is_none() {
            self.attach(Operation::Verify)?;
            self.read_header()?;
        }
        let occupied = self
            .header
            .as_ref()
            .is_some_and(|h| h.is_occupied(self.slot_id));
        if occupied {
            // A free-chain entry must have its bit clear.
            findings.push(Finding::BadFreeObjectID(free_id));
            self.detach(Operation::Read);
            return Ok(ObjectId::UNDEFINED);
        }
        let page = self.page.as_ref().expect("page attached");
        let bytes = page.read();
        let next = ObjectId::read_from(&bytes, self.current_slot_offset())?;
        Ok(next)
    }

    /// Forgets the page handle without unfixing; used after a store-level
    /// detach or recover already dropped the frame.
    pub fn release_page(&mut self) {
        self.page = None;
        self.header = None;
    }

    pub(crate) fn detach(&mut self, op: Operation) {
        if let Some(page) = self.page.take() {
            self.paged.unfix_page(page, op.unfix_mode());
        }
        self.header = None;
    }

    fn attach(&mut self, op: Operation) -> Result<()> {
        let mode = op.fix_mode();
        if let Some(page) = &self.page {
            if self.page_id == Some(page.id()) && self.op.fix_mode() == mode {
                self.op = op;
                return Ok(());
            }
            let old = self.page.take().expect("page attached");
            self.paged.unfix_page(old, UnfixMode::NotDirty);
            self.header = None;
        }
        let page_id = match self.page_id {
            Some(id) => id,
            None => {
                // Appending insert with no vacant slot left: grow the file.
                if !matches!(op, Operation::Insert | Operation::Batch) {
                    return Err(RecordError::Unexpected(
                        "page position required before attach".into(),
                    ));
                }
                let page = self.paged.allocate_page(mode)?;
                let id = page.id();
                self.page_id = Some(id);
                self.slot_id = 0;
                self.position = Position::At(ObjectId::new(id, 0));
                self.page = Some(page);
                self.op = op;
                tracing::debug!(page_id = id, "allocated fresh direct page");
                return Ok(());
            }
        };
        let page = match op {
            Operation::Verify => self.paged.verify_page(page_id, mode)?,
            _ => self.paged.fix_page(page_id, mode)?,
        };
        self.page = Some(page);
        self.op = op;
        Ok(())
    }

    fn read_header(&mut self) -> Result<()> {
        let page = self
            .page
            .as_ref()
            .ok_or_else(|| RecordError::Unexpected("no page attached".into()))?;
        let header = DirectPageHeader::read(&page.read(), self.meta.slots_per_page())?;
        self.header = Some(header);
        Ok(())
    }

    /// Slot offset without needing the page header contents.
    fn current_slot_offset(&self) -> usize {
        DirectPageHeader::size(self.meta.slots_per_page())
            + self.slot_id as usize * self.meta.slot_size()
    }

    fn read_slot_header_at(&self, slot_offset: usize, row: &mut RowData) -> Result<()> {
        let page = self
            .page
            .as_ref()
            .ok_or_else(|| RecordError::Unexpected("read without an attached page".into()))?;
        let bytes = page.read();
        let bits = Bitmap::read_from(&bytes, slot_offset, self.meta.field_count() - 1)?;
        row.set_null_bits(bits);
        if self.meta.has_variable() {
            let offset = slot_offset + self.meta.null_bitmap_bytes();
            row.set_variable_id(ObjectId::read_from(&bytes, offset)?);
        } else {
            row.set_variable_id(ObjectId::UNDEFINED);
        }
        Ok(())
    }

    /// Writes the slot header (null bitmap + variable id) and the
    /// non-null fixed values of `fields`.
    fn write_slot(
        &self,
        bytes: &mut [u8],
        slot_offset: usize,
        row: &RowData,
        fields: &TargetFields,
    ) -> Result<()> {
        row.null_bits().write_to(bytes, slot_offset)?;
        let mut value_base = slot_offset + self.meta.null_bitmap_bytes();
        if self.meta.has_variable() {
            row.variable_id().write_to(bytes, value_base)?;
            value_base += ObjectId::DISK_SIZE;
        }
        let fixed = FixedFields::new(&self.meta, value_base);
        for field_id in fields.iter() {
            if field_id == 0 || self.meta.is_variable(field_id) || row.is_null(field_id) {
                continue;
            }
            let value = row.value_for_field(field_id).ok_or_else(|| {
                RecordError::Unexpected(format!("no value supplied for column {field_id}"))
            })?;
            fixed.write(bytes, field_id, value)?;
        }
        Ok(())
    }

    /// The parameterized search. Scans the current page from the current
    /// slot, then walks neighboring pages within the scan bounds, probing
    /// whole pages by their header before touching the bitmap.
    fn search_slot(
        &mut self,
        direction: Direction,
        probe: SlotProbe,
        mode: SearchPage,
    ) -> Result<ObjectId> {
        let op = if mode == SearchPage::Verify {
            Operation::Verify
        } else {
            Operation::Read
        };
        let slots_per_page = self.meta.slots_per_page();
        let mut attached_here = false;
        if self.page.is_none() {
            self.attach(op)?;
            self.read_header()?;
            attached_here = true;
        }
        let page_id = self
            .page_id
            .ok_or_else(|| RecordError::Unexpected("search without a position".into()))?;

        let header = self
            .header
            .clone()
            .ok_or_else(|| RecordError::Unexpected("search without a page header".into()))?;
        for slot in slot_walk(direction, Some(self.slot_id), slots_per_page) {
            if probe.matches(&header, slot) {
                if mode != SearchPage::Read {
                    self.slot_id = slot;
                }
                if attached_here {
                    self.detach(Operation::Read);
                }
                return Ok(ObjectId::new(page_id, slot));
            }
        }
        if attached_here {
            self.detach(Operation::Read);
        }
        if mode == SearchPage::Verify {
            return Ok(ObjectId::UNDEFINED);
        }

        let mut current = page_id;
        loop {
            let next = match direction {
                Direction::Ascending => self.next_bounded_page(current),
                Direction::Descending => self.prev_bounded_page(current),
            };
            let Some(walk_id) = next else {
                return Ok(ObjectId::UNDEFINED);
            };
            current = walk_id;
            let page = self.paged.fix_page(current, op.fix_mode())?;
            let header_result = DirectPageHeader::read(&page.read(), slots_per_page);
            let header = match header_result {
                Ok(header) => header,
                Err(error) => {
                    self.paged.unfix_page(page, UnfixMode::NotDirty);
                    return Err(error);
                }
            };
            if !probe.page_may_match(&header) {
                self.paged.unfix_page(page, UnfixMode::NotDirty);
                continue;
            }
            for slot in slot_walk(direction, None, slots_per_page) {
                if !probe.matches(&header, slot) {
                    continue;
                }
                let found = ObjectId::new(current, slot);
                match mode {
                    SearchPage::Read => {
                        self.paged.unfix_page(page, UnfixMode::NotDirty);
                        return Ok(found);
                    }
                    SearchPage::Replace => {
                        if let Some(old) = self.page.take() {
                            self.paged.unfix_page(old, UnfixMode::NotDirty);
                        }
                        self.page = Some(page);
                        self.page_id = Some(current);
                        self.slot_id = slot;
                        self.header = Some(header);
                        return Ok(found);
                    }
                    SearchPage::Verify => {
                        unreachable!("verify searches stay on the current page")
                    }
                }
            }
            self.paged.unfix_page(page, UnfixMode::NotDirty);
            return Err(RecordError::Unexpected(
                "page header count disagrees with its bitmap".into(),
            ));
        }
    }

    /// Next data page within the end bound; `None` when the scan has no
    /// end bound.
    fn next_bounded_page(&self, current: PageId) -> Option<PageId> {
        if self.end_id.is_undefined() {
            return None;
        }
        let next = self.paged.next_page_id(current)?;
        (next <= self.end_id.page_id()).then_some(next)
    }

    /// Previous data page within the start bound, never the header page.
    fn prev_bounded_page(&self, current: PageId) -> Option<PageId> {
        if self.start_id.is_undefined() || current <= INFO_PAGE_ID + 1 {
            return None;
        }
        let prev = current - 1;
        (prev >= self.start_id.page_id()).then_some(prev)
    }
}
