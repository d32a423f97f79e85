use crate::bin_error::BinaryError;

/// Checked narrowing from `usize` offsets/lengths into on-disk integer widths.
pub trait UsizeNarrowing {
    fn to_u32(self) -> Result<u32, BinaryError>;
}

impl UsizeNarrowing for usize {
    fn to_u32(self) -> Result<u32, BinaryError> {
        u32::try_from(self).map_err(|_| BinaryError::Narrowing)
    }
}
