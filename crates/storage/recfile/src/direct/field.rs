use crate::codec;
use crate::errors::Result;
use crate::metadata::MetaData;
use crate::value::Value;

/// Positions fixed-column values within a slot's value region.
#[derive(Debug)]
pub(crate) struct FixedFields<'a> {
    meta: &'a MetaData,
    /// Offset of the value region within the page (slot start plus the
    /// null bitmap and optional variable id).
    base: usize,
}

impl<'a> FixedFields<'a> {
    pub fn new(meta: &'a MetaData, base: usize) -> Self {
        Self { meta, base }
    }

    pub fn read(&self, bytes: &[u8], field_id: usize) -> Result<Value> {
        let offset = self.base + self.meta.fixed_field_offset(field_id);
        codec::read_fixed(self.meta.column(field_id), bytes, offset)
    }

    pub fn write(&self, bytes: &mut [u8], field_id: usize, value: &Value) -> Result<()> {
        let offset = self.base + self.meta.fixed_field_offset(field_id);
        codec::write_fixed(self.meta.column(field_id), value, bytes, offset)
    }
}
