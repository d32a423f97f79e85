use crate::object_id::ObjectId;
use binary_helpers::bin_error::BinaryError;
use pagestore::errors::PageStoreError;
use std::path::PathBuf;
use thiserror::Error;

/// Errors surfaced by the record engine.
///
/// Verifier inconsistencies are not errors; they are reported as
/// [`Finding`](crate::verify::Finding)s and the verifier keeps going.
#[derive(Debug, Error)]
pub enum RecordError {
    #[error("file handle is not open")]
    NotOpen,
    #[error("bad argument: {0}")]
    BadArgument(String),
    #[error("record file already exists at {0}")]
    FileAlreadyExisted(PathBuf),
    #[error("operation is not permitted in the current open mode")]
    IllegalFileAccess,
    #[error("object {0} not found")]
    ObjectNotFound(ObjectId),
    #[error("corrupt file header: {0}")]
    CorruptHeader(String),
    #[error("operation cancelled")]
    Cancelled,
    #[error("invalid schema: {0}")]
    InvalidSchema(String),
    #[error("unsupported schema: {0}")]
    Unsupported(String),
    #[error("internal invariant violated: {0}")]
    Unexpected(String),
    #[error(transparent)]
    Store(#[from] PageStoreError),
    #[error(transparent)]
    Binary(#[from] BinaryError),
}

pub type Result<T> = std::result::Result<T, RecordError>;
