//! Byte-level helpers shared by the storage crates: little-endian integer
//! serialization, bit sets, and checked integer narrowing.

pub mod bin_error;
pub mod bitmap;
pub mod conversions;
pub mod le;
