//! The file-information block: global row counters and free-list heads,
//! published under a dual-block torn-write protocol.
//!
//! # Header page layout
//!
//! | Field         | Offset | Size | Description                          |
//! |---------------|--------|------|--------------------------------------|
//! | progress      | 0      | 1    | [`SyncProgress`] marker.             |
//! | block A       | 1      | 51   | See the block layout below.          |
//! | block B       | 52     | 51   | Identical layout.                    |
//!
//! Block layout, little-endian: `version: i32`, 7 reserved bytes,
//! `count: i64`, `first: u64`, `last: u64`, `first_free_fixed: u64`,
//! `first_free_variable: u64`.
//!
//! `sync` writes progress/first-block/progress/second-block/progress, so
//! at any instant at most one block is mid-write and the other holds a
//! complete prior snapshot. `reload` selects the live block from the
//! progress marker and can repair the stale one.

use crate::direct::iterator::DirectIterator;
use crate::errors::{RecordError, Result};
use crate::object_id::ObjectId;
use binary_helpers::bin_error::BinaryError;
use binary_helpers::le::{read_le, write_le};
use paste::paste;
use pagestore::PageId;
use pagestore::fix::{FixMode, UnfixMode};
use pagestore::page::Page;
use pagestore::paged_file::PagedFile;
use std::sync::Arc;

/// Page of the direct file holding the header.
pub const INFO_PAGE_ID: PageId = 0;

/// On-disk format version accepted by this build.
pub const FILE_VERSION: i32 = 1;

/// Serialized size of one header block.
pub const BLOCK_SIZE: usize = 51;

const PROGRESS_OFFSET: usize = 0;
const FIRST_BLOCK_OFFSET: usize = 1;
const SECOND_BLOCK_OFFSET: usize = FIRST_BLOCK_OFFSET + BLOCK_SIZE;

/// Progress marker of the three-step header write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SyncProgress {
    NotWriting = 0,
    WritingFirstBlock = 1,
    WritingSecondBlock = 2,
}

impl SyncProgress {
    fn from_byte(byte: u8) -> Result<Self> {
        match byte {
            0 => Ok(SyncProgress::NotWriting),
            1 => Ok(SyncProgress::WritingFirstBlock),
            2 => Ok(SyncProgress::WritingSecondBlock),
            other => Err(RecordError::CorruptHeader(format!(
                "unknown sync progress marker {other:#04x}"
            ))),
        }
    }
}

/// What the header is opened for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenOperation {
    Read,
    Update,
    Verify,
    Batch,
}

/// Operation kinds [`FileInformation::validate`] adjusts the counters for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidateOperation {
    Read,
    Insert,
    Update,
    Expunge,
}

/// The values stored in each header block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct InfoData {
    version: i32,
    count: i64,
    first: ObjectId,
    last: ObjectId,
    free_fixed: ObjectId,
    free_variable: ObjectId,
    dirty: bool,
}

impl Default for InfoData {
    fn default() -> Self {
        Self {
            version: FILE_VERSION,
            count: 0,
            first: ObjectId::UNDEFINED,
            last: ObjectId::UNDEFINED,
            free_fixed: ObjectId::UNDEFINED,
            free_variable: ObjectId::UNDEFINED,
            dirty: false,
        }
    }
}

/// Immutable view of one serialized header block.
#[derive(Debug)]
struct BlockRef<'a> {
    bytes: &'a [u8],
}

/// Mutable view of one serialized header block.
#[derive(Debug)]
struct BlockMut<'a> {
    bytes: &'a mut [u8],
}

/// Defines block field offsets and getter/setter pairs.
///
/// Pattern: `field_name: field_type = field_offset;`
macro_rules! impl_block_accessors {
    ( $( $field_name:ident : $field_type:ty = $field_offset:expr ; )* ) => {
        paste! {
            $(
                #[doc = concat!("Offset of ", stringify!($field_name), " within a block.")]
                const [<$field_name:upper _OFFSET>]: usize = $field_offset;

                impl<'a> BlockRef<'a> {
                    fn [<get_ $field_name>](&self) -> std::result::Result<$field_type, BinaryError> {
                        read_le::<$field_type>(self.bytes, [<$field_name:upper _OFFSET>])
                    }
                }

                impl<'a> BlockMut<'a> {
                    fn [<set_ $field_name>](&mut self, value: $field_type)
                        -> std::result::Result<(), BinaryError>
                    {
                        write_le::<$field_type>(self.bytes, [<$field_name:upper _OFFSET>], value)
                    }
                }
            )*
        }
    };
}

impl_block_accessors! {
    version : i32 = 0;
    // 7 reserved bytes at offset 4 hold the original last-modified slot.
    count : i64 = 11;
    first : u64 = 19;
    last : u64 = 27;
    free_fixed : u64 = 35;
    free_variable : u64 = 43;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    NotDirty,
    Synced,
}

/// The header record of a record file.
#[derive(Debug)]
pub struct FileInformation {
    paged: Arc<PagedFile>,
    op: OpenOperation,
    current: InfoData,
    save: InfoData,
    page: Option<Page>,
    status: Status,
}

impl FileInformation {
    pub fn new(paged: Arc<PagedFile>, op: OpenOperation) -> Self {
        Self {
            paged,
            op,
            current: InfoData::default(),
            save: InfoData::default(),
            page: None,
            status: Status::NotDirty,
        }
    }

    /// Writes a pristine header (both blocks, marker `NotWriting`) into a
    /// freshly allocated header page.
    pub fn format(page: &Page) -> Result<()> {
        let defaults = InfoData::default();
        let mut bytes = page.write();
        bytes[PROGRESS_OFFSET] = SyncProgress::NotWriting as u8;
        write_block(&mut bytes, FIRST_BLOCK_OFFSET, &defaults)?;
        write_block(&mut bytes, SECOND_BLOCK_OFFSET, &defaults)?;
        drop(bytes);
        page.mark_dirty();
        Ok(())
    }

    /// Reads the live block, optionally repairing the stale one
    /// (`repair` requires a writable open operation).
    pub fn reload(&mut self, repair: bool, keep_attach: bool) -> Result<()> {
        self.attach(if repair {
            FixMode::Write { discardable: false }
        } else {
            FixMode::ReadOnly
        })?;
        let result = self.reload_attached(repair);
        if result.is_err() || !keep_attach {
            self.detach(false);
        }
        result
    }

    fn reload_attached(&mut self, repair: bool) -> Result<()> {
        let page = self.page.as_ref().expect("header page attached");
        let progress = SyncProgress::from_byte(page.read()[PROGRESS_OFFSET])?;
        match progress {
            SyncProgress::NotWriting | SyncProgress::WritingSecondBlock => {
                self.read_block(FIRST_BLOCK_OFFSET)?;
                if repair && progress == SyncProgress::WritingSecondBlock {
                    self.write_block_at(SECOND_BLOCK_OFFSET)?;
                    self.write_progress(SyncProgress::NotWriting)?;
                }
            }
            SyncProgress::WritingFirstBlock => {
                self.read_block(SECOND_BLOCK_OFFSET)?;
                if repair {
                    self.write_block_at(FIRST_BLOCK_OFFSET)?;
                    self.write_progress(SyncProgress::NotWriting)?;
                }
            }
        }
        Ok(())
    }

    /// Publishes the in-memory values: marker, first block, marker, second
    /// block, marker. A crash between steps leaves one complete block.
    pub fn sync(&mut self) -> Result<()> {
        if !self.current.dirty {
            return Ok(());
        }
        if self.page.is_none() {
            self.attach(FixMode::Write { discardable: false })?;
        }
        let result = (|| -> Result<()> {
            self.write_progress(SyncProgress::WritingFirstBlock)?;
            self.write_block_at(FIRST_BLOCK_OFFSET)?;
            self.write_progress(SyncProgress::WritingSecondBlock)?;
            self.write_block_at(SECOND_BLOCK_OFFSET)?;
            self.write_progress(SyncProgress::NotWriting)?;
            Ok(())
        })();
        self.detach(false);
        if result.is_ok() {
            self.status = Status::Synced;
            self.current.dirty = false;
        }
        result
    }

    /// After a failed operation that already synced: restores the values
    /// captured at reload time and re-publishes them.
    pub fn recover(&mut self) -> Result<()> {
        if self.status != Status::Synced {
            return Ok(());
        }
        self.current = self.save;
        self.current.dirty = true;
        let result = self.sync();
        self.status = Status::NotDirty;
        result
    }

    /// Keeps the header consistent with the operation the iterator just
    /// performed on its current object.
    pub fn validate(
        &mut self,
        iterator: &mut DirectIterator,
        op: ValidateOperation,
    ) -> Result<()> {
        match op {
            ValidateOperation::Read | ValidateOperation::Update => {}
            ValidateOperation::Insert => {
                self.current.count += 1;
                let id = iterator.object_id();
                if self.current.first.is_undefined() || id < self.current.first {
                    self.current.first = id;
                }
                if self.current.last.is_undefined() || id > self.current.last {
                    self.current.last = id;
                }
                self.current.dirty = true;
            }
            ValidateOperation::Expunge => {
                self.current.count -= 1;
                let id = iterator.object_id();
                self.current.free_fixed = id;
                if self.current.count == 0 {
                    self.current.first = ObjectId::UNDEFINED;
                    self.current.last = ObjectId::UNDEFINED;
                } else {
                    if id == self.current.first {
                        self.current.first = iterator.next_object_id()?;
                    }
                    if id == self.current.last {
                        self.current.last = iterator.prev_object_id()?;
                    }
                }
                self.current.dirty = true;
            }
        }
        Ok(())
    }

    pub fn count(&self) -> i64 {
        self.current.count
    }

    pub fn first(&self) -> ObjectId {
        self.current.first
    }

    pub fn last(&self) -> ObjectId {
        self.current.last
    }

    pub fn first_free_fixed(&self) -> ObjectId {
        self.current.free_fixed
    }

    pub fn first_free_variable(&self) -> ObjectId {
        self.current.free_variable
    }

    pub fn set_first_free_fixed(&mut self, id: ObjectId) {
        self.current.free_fixed = id;
        self.current.dirty = true;
    }

    pub fn set_first_free_variable(&mut self, id: ObjectId) {
        self.current.free_variable = id;
        self.current.dirty = true;
    }

    /// Forgets the page handle without unfixing; used after a store-level
    /// detach or recover already dropped the frame.
    pub fn release_page(&mut self) {
        self.page = None;
    }

    fn attach(&mut self, mode: FixMode) -> Result<()> {
        if self.page.is_none() {
            let page = match self.op {
                OpenOperation::Verify => self.paged.verify_page(INFO_PAGE_ID, mode)?,
                _ => self.paged.fix_page(INFO_PAGE_ID, mode)?,
            };
            self.page = Some(page);
        }
        Ok(())
    }

    fn detach(&mut self, force: bool) {
        // Batch mode keeps the header page attached across operations.
        if self.op == OpenOperation::Batch && !force {
            return;
        }
        if let Some(page) = self.page.take() {
            self.paged.unfix_page(page, UnfixMode::NotDirty);
        }
    }

    fn read_block(&mut self, offset: usize) -> Result<()> {
        let page = self.page.as_ref().expect("header page attached");
        let bytes = page.read();
        let block = BlockRef {
            bytes: &bytes[offset..offset + BLOCK_SIZE],
        };
        let version = block.get_version()?;
        if version != FILE_VERSION {
            return Err(RecordError::CorruptHeader(format!(
                "unknown file version {version}"
            )));
        }
        self.current.version = version;
        self.current.count = block.get_count()?;
        self.current.first = ObjectId::from_raw(block.get_first()?);
        self.current.last = ObjectId::from_raw(block.get_last()?);
        self.current.free_fixed = ObjectId::from_raw(block.get_free_fixed()?);
        self.current.free_variable = ObjectId::from_raw(block.get_free_variable()?);
        self.current.dirty = false;
        self.save = self.current;
        self.status = Status::NotDirty;
        Ok(())
    }

    fn write_block_at(&mut self, offset: usize) -> Result<()> {
        let page = self.page.as_ref().expect("header page attached");
        {
            let mut bytes = page.write();
            write_block(&mut bytes, offset, &self.current)?;
        }
        page.mark_dirty();
        Ok(())
    }

    fn write_progress(&mut self, progress: SyncProgress) -> Result<()> {
        let page = self.page.as_ref().expect("header page attached");
        page.write()[PROGRESS_OFFSET] = progress as u8;
        page.mark_dirty();
        Ok(())
    }
}

fn write_block(bytes: &mut [u8], offset: usize, data: &InfoData) -> Result<()> {
    let mut block = BlockMut {
        bytes: &mut bytes[offset..offset + BLOCK_SIZE],
    };
    block.set_version(data.version)?;
    block.set_count(data.count)?;
    block.set_first(data.first.raw())?;
    block.set_last(data.last.raw())?;
    block.set_free_fixed(data.free_fixed.raw())?;
    block.set_free_variable(data.free_variable.raw())?;
    Ok(())
}
