use thiserror::Error;

/// Errors raised by the byte-level helpers.
#[derive(Error, Debug)]
pub enum BinaryError {
    #[error(
        "attempt to access {expected} bytes at offset {offset}, but the slice does not contain the range"
    )]
    RangeOutOfBounds { offset: usize, expected: usize },
    #[error("bit index {index} is out of range for a bitmap of {bits} bits")]
    BitOutOfRange { index: usize, bits: usize },
    #[error("value does not fit in the target integer type")]
    Narrowing,
}
