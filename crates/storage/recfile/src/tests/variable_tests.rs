use super::{create_and_open, read_header, reopen, table_dir, variable_schema};
use crate::OpenMode;
use crate::direct::DirectFile;
use crate::metadata::{MetaData, MetaDataOptions};
use crate::schema::{ColumnSpec, ElementSpec, EncodingForm, Schema};
use crate::targets::TargetFields;
use crate::value::Value;
use crate::variable::linked_object::LinkedObject;
use crate::verify::CancelFlag;
use pagestore::area::AreaFile;
use pagestore::paged_file::PagedFile;
use std::sync::Arc;

fn row(int: i32, note: Option<&str>) -> Vec<Value> {
    vec![
        Value::Null,
        Value::Int(int),
        note.map(|text| Value::String(text.into())).unwrap_or(Value::Null),
    ]
}

/// Opens the closed table's files for raw inspection.
fn inspect(dir: &tempfile::TempDir) -> (Arc<MetaData>, DirectFile, Arc<AreaFile>) {
    let meta = Arc::new(MetaData::new(variable_schema(), &MetaDataOptions::default()).unwrap());
    let paged = Arc::new(
        PagedFile::open(table_dir(dir).join("direct"), meta.direct_page_size()).unwrap(),
    );
    let area = Arc::new(
        AreaFile::open(table_dir(dir).join("variable"), meta.variable_page_size()).unwrap(),
    );
    let direct = DirectFile::new(paged, Arc::clone(&meta), false);
    (meta, direct, area)
}

#[test]
fn compressible_payload_is_stored_compressed_and_reconstructed() {
    let text = "aaaaaa".repeat(100); // 600 bytes of runs
    let (dir, mut file) = create_and_open(variable_schema(), OpenMode::Update);
    let id = file.insert(row(1, Some(&text))).unwrap();
    file.close().unwrap();

    // The slot points at a variable object whose chain stores fewer than
    // the 600 uncompressed bytes (size infos included).
    let (_meta, mut direct, area) = inspect(&dir);
    let head = direct.read_variable_id(id).unwrap();
    assert!(!head.is_undefined());
    let chain = LinkedObject::chain_areas(&area, head, &CancelFlag::new()).unwrap();
    let payload: usize = chain.iter().map(|(_, len)| len).sum();
    assert!(payload < 600, "stored {payload} bytes for 600 raw");

    let mut file = reopen(&dir, variable_schema(), OpenMode::Read);
    let values = file.fetch(Some(id), None).unwrap().unwrap();
    assert_eq!(values[2], Value::String(text));
}

#[test]
fn all_null_variable_side_stores_no_object() {
    let (dir, mut file) = create_and_open(variable_schema(), OpenMode::Update);
    let id = file.insert(row(1, None)).unwrap();
    file.close().unwrap();

    let (_meta, mut direct, _area) = inspect(&dir);
    assert!(direct.read_variable_id(id).unwrap().is_undefined());

    let mut file = reopen(&dir, variable_schema(), OpenMode::Read);
    let values = file.fetch(Some(id), None).unwrap().unwrap();
    assert_eq!(values[2], Value::Null);
}

#[test]
fn expunge_pushes_the_chain_onto_the_free_variable_list() {
    let (dir, mut file) = create_and_open(variable_schema(), OpenMode::Update);
    let id = file.insert(row(1, Some(&"x".repeat(200)))).unwrap();
    file.close().unwrap();

    let (_meta, mut direct, _area) = inspect(&dir);
    let head = direct.read_variable_id(id).unwrap();
    drop(direct);

    let mut file = reopen(&dir, variable_schema(), OpenMode::Update);
    file.expunge(id).unwrap();
    file.close().unwrap();

    let info = read_header(&table_dir(&dir), variable_schema());
    assert_eq!(info.first_free_variable(), head);
    assert_eq!(info.first_free_fixed(), id);
}

#[test]
fn freed_variable_areas_are_reused_by_later_inserts() {
    let (dir, mut file) = create_and_open(variable_schema(), OpenMode::Update);
    let first = file.insert(row(1, Some(&"y".repeat(300)))).unwrap();
    file.expunge(first).unwrap();
    let second = file.insert(row(2, Some(&"z".repeat(300)))).unwrap();
    file.close().unwrap();

    let info = read_header(&table_dir(&dir), variable_schema());
    assert!(info.first_free_variable().is_undefined());

    let mut file = reopen(&dir, variable_schema(), OpenMode::Read);
    let values = file.fetch(Some(second), None).unwrap().unwrap();
    assert_eq!(values[2], Value::String("z".repeat(300)));
}

#[test]
fn payload_larger_than_one_page_chains_across_pages() {
    let (dir, mut file) = create_and_open(variable_schema(), OpenMode::Update);
    // Incompressible payload larger than a variable page.
    let big: String = (0..70_000u32)
        .map(|i| char::from(b'a' + (i % 23) as u8))
        .collect();
    let id = file.insert(row(1, Some(&big))).unwrap();
    file.close().unwrap();

    let (meta, mut direct, area) = inspect(&dir);
    let head = direct.read_variable_id(id).unwrap();
    let chain = LinkedObject::chain_areas(&area, head, &CancelFlag::new()).unwrap();
    assert!(chain.len() > 1, "payload must span multiple areas");
    assert!(meta.variable_page_size() < 70_000);

    let mut file = reopen(&dir, variable_schema(), OpenMode::Read);
    let values = file.fetch(Some(id), None).unwrap().unwrap();
    assert_eq!(values[2], Value::String(big));
}

#[test]
fn variable_update_replaces_the_object_and_keeps_untouched_fields() {
    let schema = Schema::new(vec![
        ColumnSpec::object_id(),
        ColumnSpec::string(EncodingForm::Utf8, 0),
        ColumnSpec::string(EncodingForm::Utf8, 0),
    ]);
    let (dir, mut file) = create_and_open(schema.clone(), OpenMode::Update);
    let id = file
        .insert(vec![
            Value::Null,
            Value::String("left".into()),
            Value::String("right".into()),
        ])
        .unwrap();

    file.update(
        id,
        vec![Value::String("LEFT".into())],
        &TargetFields::new(vec![1]),
    )
    .unwrap();
    file.close().unwrap();

    let mut file = reopen(&dir, schema, OpenMode::Read);
    let values = file.fetch(Some(id), None).unwrap().unwrap();
    assert_eq!(values[1], Value::String("LEFT".into()));
    assert_eq!(values[2], Value::String("right".into()));
}

#[test]
fn variable_update_to_null_drops_the_object() {
    let (dir, mut file) = create_and_open(variable_schema(), OpenMode::Update);
    let id = file.insert(row(1, Some("gone soon"))).unwrap();
    file.update(id, vec![Value::Null], &TargetFields::new(vec![2]))
        .unwrap();
    file.close().unwrap();

    let (_meta, mut direct, _area) = inspect(&dir);
    assert!(direct.read_variable_id(id).unwrap().is_undefined());

    let mut file = reopen(&dir, variable_schema(), OpenMode::Read);
    let values = file.fetch(Some(id), None).unwrap().unwrap();
    assert_eq!(values[1], Value::Int(1));
    assert_eq!(values[2], Value::Null);
}

#[test]
fn arrays_round_trip_through_the_variable_file() {
    let schema = Schema::new(vec![
        ColumnSpec::object_id(),
        ColumnSpec::array(ElementSpec::int(), 8),
        ColumnSpec::array(ElementSpec::string(EncodingForm::Utf8, 0), 4),
    ]);
    let (dir, mut file) = create_and_open(schema.clone(), OpenMode::Update);
    let ints = Value::Array(vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
    let strings = Value::Array(vec![
        Value::String("alpha".into()),
        Value::String("".into()),
    ]);
    let id = file
        .insert(vec![Value::Null, ints.clone(), strings.clone()])
        .unwrap();
    file.close().unwrap();

    let mut file = reopen(&dir, schema, OpenMode::Read);
    let values = file.fetch(Some(id), None).unwrap().unwrap();
    assert_eq!(values[1], ints);
    assert_eq!(values[2], strings);
}

#[test]
fn oversized_value_for_bounded_column_is_rejected_atomically() {
    let schema = Schema::new(vec![
        ColumnSpec::object_id(),
        ColumnSpec::int(),
        ColumnSpec::string(EncodingForm::Utf8, 16),
    ]);
    let (_dir, mut file) = create_and_open(schema, OpenMode::Update);
    let id = file
        .insert(vec![Value::Null, Value::Int(1), Value::String("ok".into())])
        .unwrap();
    let result = file.update(
        id,
        vec![Value::String("far far too long for sixteen bytes".into())],
        &TargetFields::new(vec![2]),
    );
    assert!(result.is_err());
    // The abort path restored a consistent file.
    assert_eq!(file.count().unwrap(), 1);
    let report = file
        .verify(crate::Treatment::Continue, &CancelFlag::new())
        .unwrap();
    assert!(report.is_consistent(), "{:?}", report.findings);
}

#[test]
fn fetch_with_fixed_targets_skips_the_variable_file() {
    let (dir, mut file) = create_and_open(variable_schema(), OpenMode::Update);
    let id = file.insert(row(9, Some("unread"))).unwrap();
    file.close().unwrap();

    let mut file = reopen(&dir, variable_schema(), OpenMode::Read);
    let values = file
        .fetch(Some(id), Some(&TargetFields::new(vec![0, 1])))
        .unwrap()
        .unwrap();
    assert_eq!(values.len(), 2);
    assert_eq!(values[0], Value::ObjectId(id));
    assert_eq!(values[1], Value::Int(9));
}
