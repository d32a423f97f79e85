use crate::{AreaId, PageId};
use binary_helpers::bin_error::BinaryError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PageStoreError {
    #[error("i/o failure on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("store already exists at {0}")]
    AlreadyExists(PathBuf),
    #[error("page {0} is not allocated")]
    UnknownPage(PageId),
    #[error("area {area_id} on page {page_id} is not allocated")]
    UnknownArea { page_id: PageId, area_id: AreaId },
    #[error("page {page_id} cannot hold an area of {requested} bytes ({available} available)")]
    AreaTooLarge {
        page_id: PageId,
        requested: usize,
        available: usize,
    },
    #[error("corrupt area directory on page {page_id}: {source}")]
    CorruptDirectory {
        page_id: PageId,
        #[source]
        source: BinaryError,
    },
}

pub type Result<T> = std::result::Result<T, PageStoreError>;
