//! Area-managed pages: each page carries a directory so callers can carve
//! variable-length areas out of it and address them by a stable [`AreaId`].
//!
//! # Page layout
//!
//! ```text
//! +--------------------+--------------------+------+---------------------+
//! | Directory header   | Area data          | Free | Entry array         |
//! | (16 B, see below)  | (grows upward)     |      | (grows downward)    |
//! +--------------------+--------------------+------+---------------------+
//! ```
//!
//! Directory header, little-endian u32 fields:
//!
//! | Field        | Offset | Meaning                                       |
//! |--------------|--------|-----------------------------------------------|
//! | `area_count` | 0      | Number of live areas on the page.             |
//! | `free_start` | 4      | First byte of the free region.                |
//! | `free_end`   | 8      | One past the free region / start of entries.  |
//! | `free_space` | 12     | Total reclaimable bytes (may be fragmented).  |
//!
//! Entry `i` occupies the 8 bytes ending `8 * i` before the page end:
//! `(offset: u32, len: u32)`. A freed entry is zeroed and its slot is
//! reused by a later allocation, so area ids stay stable across
//! compaction.

use crate::errors::{PageStoreError, Result};
use crate::fix::FixMode;
use crate::page::Page;
use crate::paged_file::PagedFile;
use crate::{AreaId, PageId};
use binary_helpers::bin_error::BinaryError;
use binary_helpers::conversions::UsizeNarrowing;
use binary_helpers::le::{read_le, write_le};
use std::ops::Range;
use std::path::Path;

/// Size of the directory header at the front of each page.
pub const DIR_HEADER_SIZE: usize = 16;

/// Size of one entry in the entry array at the end of each page.
pub const DIR_ENTRY_SIZE: usize = 8;

const AREA_COUNT: usize = 0;
const FREE_START: usize = 4;
const FREE_END: usize = 8;
const FREE_SPACE: usize = 12;

/// A paged file whose pages are carved into variable-length areas.
#[derive(Debug)]
pub struct AreaFile {
    paged: PagedFile,
}

impl AreaFile {
    pub fn create(path: impl AsRef<Path>, page_size: usize) -> Result<Self> {
        Ok(Self {
            paged: PagedFile::create(path, page_size)?,
        })
    }

    pub fn open(path: impl AsRef<Path>, page_size: usize) -> Result<Self> {
        Ok(Self {
            paged: PagedFile::open(path, page_size)?,
        })
    }

    /// The underlying page store; fixes/unfixes and the detach/recover
    /// epilogues go through it unchanged.
    pub fn paged(&self) -> &PagedFile {
        &self.paged
    }

    pub fn page_size(&self) -> usize {
        self.paged.page_size()
    }

    /// Appends a fresh page with an empty area directory.
    pub fn allocate_page(&self, mode: FixMode) -> Result<Page> {
        let page = self.paged.allocate_page(mode)?;
        {
            let mut data = page.write();
            let header = DirHeader {
                area_count: 0,
                free_start: DIR_HEADER_SIZE,
                free_end: self.page_size(),
                free_space: self.page_size() - DIR_HEADER_SIZE,
            };
            header.store(&mut data, page.id())?;
        }
        Ok(page)
    }

    /// Largest area a fresh page can hold.
    pub fn area_capacity(&self) -> usize {
        self.page_size() - DIR_HEADER_SIZE - DIR_ENTRY_SIZE
    }

    /// Carves a new area of `size` bytes out of `page`, compacting the page
    /// first when its free space is fragmented.
    pub fn allocate_area(&self, page: &Page, size: usize) -> Result<AreaId> {
        debug_assert!(size > 0);
        let page_id = page.id();
        let mut data = page.write();
        let mut header = DirHeader::load(&data, page_id)?;

        // Prefer reusing a freed entry slot so the entry array does not
        // grow past reclaimable space.
        let slots = header.entry_slots(data.len());
        let mut reuse = None;
        for index in 0..slots {
            let entry = DirEntry::load(&data, index, page_id)?;
            if entry.is_free() {
                reuse = Some(index);
                break;
            }
        }
        let entry_cost = if reuse.is_some() { 0 } else { DIR_ENTRY_SIZE };

        let needed = size + entry_cost;
        if header.contiguous() < needed {
            if header.free_space < needed {
                return Err(PageStoreError::AreaTooLarge {
                    page_id,
                    requested: size,
                    available: header.free_space.saturating_sub(entry_cost),
                });
            }
            compact(&mut data, &mut header, page_id)?;
            if header.contiguous() < needed {
                return Err(PageStoreError::AreaTooLarge {
                    page_id,
                    requested: size,
                    available: header.contiguous().saturating_sub(entry_cost),
                });
            }
        }

        let index = match reuse {
            Some(index) => index,
            None => {
                let index = slots;
                header.free_end -= DIR_ENTRY_SIZE;
                index
            }
        };
        DirEntry {
            offset: header.free_start,
            len: size,
        }
        .store(&mut data, index, page_id)?;
        header.free_start += size;
        header.free_space -= needed;
        header.area_count += 1;
        header.store(&mut data, page_id)?;
        Ok(index as AreaId)
    }

    /// Releases an area. Its bytes become reclaimable; the entry slot is
    /// kept for reuse so other area ids stay valid.
    pub fn free_area(&self, page: &Page, area_id: AreaId) -> Result<()> {
        let page_id = page.id();
        let mut data = page.write();
        let mut header = DirHeader::load(&data, page_id)?;
        let entry = self.live_entry(&data, &header, page_id, area_id)?;
        if entry.offset + entry.len == header.free_start {
            header.free_start = entry.offset;
        }
        header.free_space += entry.len;
        header.area_count -= 1;
        DirEntry { offset: 0, len: 0 }.store(&mut data, area_id as usize, page_id)?;
        header.store(&mut data, page_id)?;
        Ok(())
    }

    /// Size in bytes of a live area.
    pub fn area_size(&self, page: &Page, area_id: AreaId) -> Result<usize> {
        let data = page.read();
        let header = DirHeader::load(&data, page.id())?;
        Ok(self.live_entry(&data, &header, page.id(), area_id)?.len)
    }

    /// Byte range of a live area within the page.
    pub fn area_range(&self, page: &Page, area_id: AreaId) -> Result<Range<usize>> {
        let data = page.read();
        let header = DirHeader::load(&data, page.id())?;
        let entry = self.live_entry(&data, &header, page.id(), area_id)?;
        Ok(entry.offset..entry.offset + entry.len)
    }

    /// Largest area the page can currently hold without growing.
    pub fn free_contiguous(&self, page: &Page) -> Result<usize> {
        let data = page.read();
        let header = DirHeader::load(&data, page.id())?;
        Ok(header.contiguous())
    }

    /// Total reclaimable bytes on the page (compaction may be required).
    pub fn free_total(&self, page: &Page) -> Result<usize> {
        let data = page.read();
        let header = DirHeader::load(&data, page.id())?;
        Ok(header.free_space)
    }

    /// Number of live areas on the page.
    pub fn area_count(&self, page: &Page) -> Result<usize> {
        let data = page.read();
        Ok(DirHeader::load(&data, page.id())?.area_count)
    }

    /// Live area ids on the page, ascending.
    pub fn live_areas(&self, page: &Page) -> Result<Vec<AreaId>> {
        let data = page.read();
        let header = DirHeader::load(&data, page.id())?;
        let mut live = Vec::with_capacity(header.area_count);
        for index in 0..header.entry_slots(data.len()) {
            if !DirEntry::load(&data, index, page.id())?.is_free() {
                live.push(index as AreaId);
            }
        }
        Ok(live)
    }

    fn live_entry(
        &self,
        data: &[u8],
        header: &DirHeader,
        page_id: PageId,
        area_id: AreaId,
    ) -> Result<DirEntry> {
        let index = area_id as usize;
        if index >= header.entry_slots(data.len()) {
            return Err(PageStoreError::UnknownArea { page_id, area_id });
        }
        let entry = DirEntry::load(data, index, page_id)?;
        if entry.is_free() {
            return Err(PageStoreError::UnknownArea { page_id, area_id });
        }
        Ok(entry)
    }
}

#[derive(Debug, Clone, Copy)]
struct DirHeader {
    area_count: usize,
    free_start: usize,
    free_end: usize,
    free_space: usize,
}

impl DirHeader {
    fn load(data: &[u8], page_id: PageId) -> Result<Self> {
        let read = |offset| -> Result<usize> {
            Ok(read_le::<u32>(data, offset).map_err(|source| corrupt(page_id, source))? as usize)
        };
        Ok(Self {
            area_count: read(AREA_COUNT)?,
            free_start: read(FREE_START)?,
            free_end: read(FREE_END)?,
            free_space: read(FREE_SPACE)?,
        })
    }

    fn store(&self, data: &mut [u8], page_id: PageId) -> Result<()> {
        let mut write = |offset, value: usize| -> Result<()> {
            write_le::<u32>(
                data,
                offset,
                value.to_u32().map_err(|source| corrupt(page_id, source))?,
            )
            .map_err(|source| corrupt(page_id, source))
        };
        write(AREA_COUNT, self.area_count)?;
        write(FREE_START, self.free_start)?;
        write(FREE_END, self.free_end)?;
        write(FREE_SPACE, self.free_space)
    }

    fn contiguous(&self) -> usize {
        self.free_end.saturating_sub(self.free_start)
    }

    fn entry_slots(&self, page_size: usize) -> usize {
        (page_size - self.free_end) / DIR_ENTRY_SIZE
    }
}

#[derive(Debug, Clone, Copy)]
struct DirEntry {
    offset: usize,
    len: usize,
}

impl DirEntry {
    fn position(data_len: usize, index: usize) -> usize {
        data_len - DIR_ENTRY_SIZE * (index + 1)
    }

    fn load(data: &[u8], index: usize, page_id: PageId) -> Result<Self> {
        let at = Self::position(data.len(), index);
        Ok(Self {
            offset: read_le::<u32>(data, at).map_err(|source| corrupt(page_id, source))? as usize,
            len: read_le::<u32>(data, at + 4).map_err(|source| corrupt(page_id, source))? as usize,
        })
    }

    fn store(&self, data: &mut [u8], index: usize, page_id: PageId) -> Result<()> {
        let at = Self::position(data.len(), index);
        write_le::<u32>(
            data,
            at,
            self.offset.to_u32().map_err(|source| corrupt(page_id, source))?,
        )
        .map_err(|source| corrupt(page_id, source))?;
        write_le::<u32>(
            data,
            at + 4,
            self.len.to_u32().map_err(|source| corrupt(page_id, source))?,
        )
        .map_err(|source| corrupt(page_id, source))
    }

    fn is_free(&self) -> bool {
        self.len == 0
    }
}

fn corrupt(page_id: PageId, source: BinaryError) -> PageStoreError {
    PageStoreError::CorruptDirectory { page_id, source }
}

/// Slides every live area toward the header so the free region becomes one
/// contiguous run. Entry indexes (area ids) are unchanged.
fn compact(data: &mut [u8], header: &mut DirHeader, page_id: PageId) -> Result<()> {
    let mut live: Vec<(usize, DirEntry)> = Vec::with_capacity(header.area_count);
    for index in 0..header.entry_slots(data.len()) {
        let entry = DirEntry::load(data, index, page_id)?;
        if !entry.is_free() {
            live.push((index, entry));
        }
    }
    live.sort_by_key(|(_, entry)| entry.offset);

    let mut dest = DIR_HEADER_SIZE;
    for (index, entry) in live {
        if entry.offset != dest {
            data.copy_within(entry.offset..entry.offset + entry.len, dest);
            DirEntry {
                offset: dest,
                len: entry.len,
            }
            .store(data, index, page_id)?;
        }
        dest += entry.len;
    }
    header.free_start = dest;
    tracing::trace!(page_id, free_start = dest, "compacted area page");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fix::UnfixMode;

    const PAGE: usize = 256;

    fn temp_area_file() -> (tempfile::TempDir, AreaFile) {
        let dir = tempfile::tempdir().unwrap();
        let file = AreaFile::create(dir.path().join("areas.dat"), PAGE).unwrap();
        (dir, file)
    }

    #[test]
    fn fresh_page_has_full_capacity() {
        let (_dir, file) = temp_area_file();
        let page = file
            .allocate_page(FixMode::Write { discardable: false })
            .unwrap();
        assert_eq!(file.free_contiguous(&page).unwrap(), PAGE - DIR_HEADER_SIZE);
        assert_eq!(file.area_capacity(), PAGE - DIR_HEADER_SIZE - DIR_ENTRY_SIZE);
        assert_eq!(file.area_count(&page).unwrap(), 0);
        file.paged().unfix_page(page, UnfixMode::Dirty);
    }

    #[test]
    fn allocates_adjacent_areas() {
        let (_dir, file) = temp_area_file();
        let page = file
            .allocate_page(FixMode::Write { discardable: false })
            .unwrap();
        let a = file.allocate_area(&page, 40).unwrap();
        let b = file.allocate_area(&page, 24).unwrap();
        assert_eq!(file.area_range(&page, a).unwrap(), 16..56);
        assert_eq!(file.area_range(&page, b).unwrap(), 56..80);
        assert_eq!(file.area_size(&page, a).unwrap(), 40);
        assert_eq!(file.area_count(&page).unwrap(), 2);
        file.paged().unfix_page(page, UnfixMode::Dirty);
    }

    #[test]
    fn free_then_reallocate_reuses_entry_slot() {
        let (_dir, file) = temp_area_file();
        let page = file
            .allocate_page(FixMode::Write { discardable: false })
            .unwrap();
        let a = file.allocate_area(&page, 40).unwrap();
        let _b = file.allocate_area(&page, 24).unwrap();
        file.free_area(&page, a).unwrap();
        assert!(file.area_size(&page, a).is_err());

        let c = file.allocate_area(&page, 16).unwrap();
        // Entry slot of the freed area comes back for the new one.
        assert_eq!(c, a);
        file.paged().unfix_page(page, UnfixMode::Dirty);
    }

    #[test]
    fn compaction_reclaims_a_hole_between_areas() {
        let (_dir, file) = temp_area_file();
        let page = file
            .allocate_page(FixMode::Write { discardable: false })
            .unwrap();
        // Three areas fill most of the page; freeing the middle one leaves
        // a hole only compaction can merge.
        let a = file.allocate_area(&page, 60).unwrap();
        let b = file.allocate_area(&page, 60).unwrap();
        let c = file.allocate_area(&page, 40).unwrap();
        page.write()[file.area_range(&page, c).unwrap()].fill(7);
        file.free_area(&page, b).unwrap();

        let big = file.allocate_area(&page, 100).unwrap();
        assert_ne!(big, a);
        assert_ne!(big, c);
        // Area `c` moved but its id and contents survived.
        let range = file.area_range(&page, c).unwrap();
        assert!(page.read()[range].iter().all(|&byte| byte == 7));
        file.paged().unfix_page(page, UnfixMode::Dirty);
    }

    #[test]
    fn oversized_allocation_is_rejected() {
        let (_dir, file) = temp_area_file();
        let page = file
            .allocate_page(FixMode::Write { discardable: false })
            .unwrap();
        assert!(matches!(
            file.allocate_area(&page, PAGE),
            Err(PageStoreError::AreaTooLarge { .. })
        ));
        file.paged().unfix_page(page, UnfixMode::NotDirty);
    }
}
