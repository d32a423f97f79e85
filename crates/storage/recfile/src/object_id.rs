use binary_helpers::bin_error::BinaryError;
use binary_helpers::le::{read_le, write_le};
use pagestore::{AreaId, PageId};
use std::fmt;

/// Surrogate identifier of a row or a variable-file area: the page id in
/// the high 32 bits, the slot/area id in the low 32 bits.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectId(u64);

impl ObjectId {
    /// Reserved sentinel: the maximum representable value.
    pub const UNDEFINED: ObjectId = ObjectId(u64::MAX);

    /// On-disk size in bytes.
    pub const DISK_SIZE: usize = 8;

    pub fn new(page_id: PageId, area_id: AreaId) -> Self {
        Self((page_id as u64) << 32 | area_id as u64)
    }

    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> u64 {
        self.0
    }

    pub fn page_id(self) -> PageId {
        (self.0 >> 32) as PageId
    }

    pub fn area_id(self) -> AreaId {
        self.0 as AreaId
    }

    pub fn is_undefined(self) -> bool {
        self == Self::UNDEFINED
    }

    /// Reads an object id stored little-endian at `offset`.
    pub fn read_from(bytes: &[u8], offset: usize) -> Result<Self, BinaryError> {
        Ok(Self(read_le::<u64>(bytes, offset)?))
    }

    /// Writes the object id little-endian at `offset`.
    pub fn write_to(self, bytes: &mut [u8], offset: usize) -> Result<(), BinaryError> {
        write_le::<u64>(bytes, offset, self.0)
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_undefined() {
            write!(f, "ObjectId(undefined)")
        } else {
            write!(f, "ObjectId({}:{})", self.page_id(), self.area_id())
        }
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_undefined() {
            write!(f, "undefined")
        } else {
            write!(f, "{}:{}", self.page_id(), self.area_id())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packs_page_and_area() {
        let id = ObjectId::new(7, 42);
        assert_eq!(id.page_id(), 7);
        assert_eq!(id.area_id(), 42);
        assert_eq!(id.raw(), (7u64 << 32) | 42);
    }

    #[test]
    fn undefined_is_max() {
        assert_eq!(ObjectId::UNDEFINED.raw(), u64::MAX);
        assert!(ObjectId::UNDEFINED.is_undefined());
        assert!(!ObjectId::new(0, 0).is_undefined());
    }

    #[test]
    fn orders_by_page_then_area() {
        assert!(ObjectId::new(1, 9) < ObjectId::new(2, 0));
        assert!(ObjectId::new(2, 1) < ObjectId::new(2, 2));
        assert!(ObjectId::new(2, 2) < ObjectId::UNDEFINED);
    }

    #[test]
    fn round_trips_through_bytes() {
        let mut buf = [0u8; 12];
        let id = ObjectId::new(3, 15);
        id.write_to(&mut buf, 4).unwrap();
        assert_eq!(ObjectId::read_from(&buf, 4).unwrap(), id);
    }

    #[test]
    fn displays_page_colon_area() {
        assert_eq!(ObjectId::new(3, 15).to_string(), "3:15");
        assert_eq!(ObjectId::UNDEFINED.to_string(), "undefined");
    }
}
