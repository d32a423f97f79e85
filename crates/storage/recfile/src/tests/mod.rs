//! Cross-module scenario tests exercising the whole engine through the
//! facade, plus raw-byte damage cases for the verifier and the torn-write
//! protocol.

mod fixed_table_tests;
mod variable_tests;
mod verifier_tests;

use crate::file_info::{FileInformation, OpenOperation};
use crate::metadata::{MetaData, MetaDataOptions};
use crate::schema::{ColumnSpec, EncodingForm, Schema};
use crate::{OpenMode, RecordFile};
use pagestore::paged_file::PagedFile;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// `(object id, int, bigint)`: no variable columns.
pub(crate) fn fixed_schema() -> Schema {
    Schema::new(vec![
        ColumnSpec::object_id(),
        ColumnSpec::int(),
        ColumnSpec::bigint(),
    ])
}

/// `(object id, int, compressed utf-8 string)`.
pub(crate) fn variable_schema() -> Schema {
    Schema::new(vec![
        ColumnSpec::object_id(),
        ColumnSpec::int(),
        ColumnSpec::string(EncodingForm::Utf8, 0).compressed(),
    ])
}

pub(crate) fn table_dir(dir: &tempfile::TempDir) -> PathBuf {
    dir.path().join("table")
}

/// Creates a table for `schema` in a fresh temp dir and opens it.
pub(crate) fn create_and_open(schema: Schema, mode: OpenMode) -> (tempfile::TempDir, RecordFile) {
    let dir = tempfile::tempdir().unwrap();
    let options = MetaDataOptions::default();
    RecordFile::create(table_dir(&dir), schema.clone(), &options).unwrap();
    let file = RecordFile::open(table_dir(&dir), schema, &options, mode).unwrap();
    (dir, file)
}

pub(crate) fn reopen(dir: &tempfile::TempDir, schema: Schema, mode: OpenMode) -> RecordFile {
    RecordFile::open(table_dir(dir), schema, &MetaDataOptions::default(), mode).unwrap()
}

/// Reads the header block of a closed table directly.
pub(crate) fn read_header(dir: &Path, schema: Schema) -> FileInformation {
    let meta = MetaData::new(schema, &MetaDataOptions::default()).unwrap();
    let paged = Arc::new(PagedFile::open(dir.join("direct"), meta.direct_page_size()).unwrap());
    let mut info = FileInformation::new(paged, OpenOperation::Read);
    info.reload(false, false).unwrap();
    info
}
