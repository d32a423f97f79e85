//! Fixed data page header: `[slot_count: u32][occupancy bitmap]`, followed
//! by `slots_per_page` slots of `slot_size` bytes each.

use crate::errors::{RecordError, Result};
use binary_helpers::bitmap::{Bitmap, bitmap_bytes};
use binary_helpers::le::{read_le, write_le};

const SLOT_COUNT_SIZE: usize = 4;

/// In-memory copy of one fixed page's header.
#[derive(Debug, Clone)]
pub(crate) struct DirectPageHeader {
    pub slot_count: u32,
    bitmap: Bitmap,
    slots_per_page: u32,
}

impl DirectPageHeader {
    /// Serialized header size for a page of `slots_per_page` slots.
    pub fn size(slots_per_page: u32) -> usize {
        SLOT_COUNT_SIZE + bitmap_bytes(slots_per_page as usize)
    }

    pub fn read(bytes: &[u8], slots_per_page: u32) -> Result<Self> {
        Ok(Self {
            slot_count: read_le::<u32>(bytes, 0)?,
            bitmap: Bitmap::read_from(bytes, SLOT_COUNT_SIZE, slots_per_page as usize)?,
            slots_per_page,
        })
    }

    pub fn write(&self, bytes: &mut [u8]) -> Result<()> {
        write_le::<u32>(bytes, 0, self.slot_count)?;
        self.bitmap.write_to(bytes, SLOT_COUNT_SIZE)?;
        Ok(())
    }

    pub fn slots_per_page(&self) -> u32 {
        self.slots_per_page
    }

    pub fn is_occupied(&self, slot_id: u32) -> bool {
        self.bitmap.test(slot_id as usize)
    }

    /// Marks a slot occupied; the slot must be vacant.
    pub fn mark_insert(&mut self, slot_id: u32) -> Result<()> {
        if self.is_occupied(slot_id) {
            return Err(RecordError::Unexpected(format!(
                "insert requested into occupied slot {slot_id}"
            )));
        }
        self.bitmap.set(slot_id as usize)?;
        self.slot_count += 1;
        Ok(())
    }

    /// Marks a slot vacant; the slot must be occupied.
    pub fn mark_expunge(&mut self, slot_id: u32) -> Result<()> {
        if !self.is_occupied(slot_id) {
            return Err(RecordError::Unexpected(format!(
                "expunge requested for vacant slot {slot_id}"
            )));
        }
        self.bitmap.reset(slot_id as usize)?;
        self.slot_count -= 1;
        Ok(())
    }

    /// Byte offset of a slot within the page.
    pub fn slot_offset(&self, slot_id: u32, slot_size: usize) -> usize {
        Self::size(self.slots_per_page) + slot_id as usize * slot_size
    }

    pub fn occupied_bits(&self) -> u32 {
        self.bitmap.count_ones() as u32
    }
}
