use super::{create_and_open, fixed_schema, read_header, reopen, table_dir};
use crate::errors::RecordError;
use crate::metadata::MetaDataOptions;
use crate::object_id::ObjectId;
use crate::targets::TargetFields;
use crate::value::Value;
use crate::{OpenMode, RecordFile};

fn row(int: i32, big: i64) -> Vec<Value> {
    vec![Value::Null, Value::Int(int), Value::BigInt(big)]
}

#[test]
fn insert_assigns_increasing_object_ids() {
    let (dir, mut file) = create_and_open(fixed_schema(), OpenMode::Update);
    let a = file.insert(row(1, 10)).unwrap();
    let b = file.insert(row(2, 20)).unwrap();
    let c = file.insert(row(3, 30)).unwrap();
    assert!(a < b && b < c);
    assert_eq!(a, ObjectId::new(1, 0));
    assert_eq!(file.count().unwrap(), 3);
    file.close().unwrap();

    let info = read_header(&table_dir(&dir), fixed_schema());
    assert_eq!(info.count(), 3);
    assert_eq!(info.first(), a);
    assert_eq!(info.last(), c);
    assert!(info.first_free_fixed().is_undefined());
}

#[test]
fn expunged_slot_heads_the_free_chain_and_is_reused() {
    let (dir, mut file) = create_and_open(fixed_schema(), OpenMode::Update);
    let _a = file.insert(row(1, 10)).unwrap();
    let b = file.insert(row(2, 20)).unwrap();
    let _c = file.insert(row(3, 30)).unwrap();

    file.expunge(b).unwrap();
    assert_eq!(file.count().unwrap(), 2);
    file.close().unwrap();
    assert_eq!(read_header(&table_dir(&dir), fixed_schema()).first_free_fixed(), b);

    let mut file = reopen(&dir, fixed_schema(), OpenMode::Update);
    let d = file.insert(row(4, 40)).unwrap();
    assert_eq!(d, b, "the freed slot is taken first");
    file.close().unwrap();

    let info = read_header(&table_dir(&dir), fixed_schema());
    assert_eq!(info.count(), 3);
    assert!(info.first_free_fixed().is_undefined());

    let mut file = reopen(&dir, fixed_schema(), OpenMode::Read);
    let values = file.fetch(Some(d), None).unwrap().unwrap();
    assert_eq!(values[1], Value::Int(4));
    assert_eq!(values[2], Value::BigInt(40));
}

#[test]
fn fetch_by_id_returns_the_row_with_its_object_id() {
    let (dir, mut file) = create_and_open(fixed_schema(), OpenMode::Update);
    let id = file.insert(row(7, 70)).unwrap();
    file.close().unwrap();

    let mut file = reopen(&dir, fixed_schema(), OpenMode::Read);
    let values = file.fetch(Some(id), None).unwrap().unwrap();
    assert_eq!(values[0], Value::ObjectId(id));
    assert_eq!(values[1], Value::Int(7));
    assert!(file.fetch(Some(ObjectId::new(1, 13)), None).unwrap().is_none());
}

#[test]
fn null_columns_round_trip() {
    let (dir, mut file) = create_and_open(fixed_schema(), OpenMode::Update);
    let id = file
        .insert(vec![Value::Null, Value::Null, Value::BigInt(5)])
        .unwrap();
    file.close().unwrap();

    let mut file = reopen(&dir, fixed_schema(), OpenMode::Read);
    let values = file.fetch(Some(id), None).unwrap().unwrap();
    assert_eq!(values[1], Value::Null);
    assert_eq!(values[2], Value::BigInt(5));
}

#[test]
fn insert_and_expunge_round_trip_empties_the_file() {
    let (dir, mut file) = create_and_open(fixed_schema(), OpenMode::Update);
    let mut ids = Vec::new();
    for i in 0..20 {
        ids.push(file.insert(row(i, i as i64 * 10)).unwrap());
    }
    // Delete in a shuffled but deterministic order.
    let mut order: Vec<usize> = (0..ids.len()).collect();
    order.sort_by_key(|i| (i * 7) % ids.len());
    for index in order {
        file.expunge(ids[index]).unwrap();
    }
    assert_eq!(file.count().unwrap(), 0);
    file.close().unwrap();

    let info = read_header(&table_dir(&dir), fixed_schema());
    assert_eq!(info.count(), 0);
    assert!(info.first().is_undefined());
    assert!(info.last().is_undefined());

    // The free chain visits exactly the twenty expunged slots.
    let mut file = reopen(&dir, fixed_schema(), OpenMode::Read);
    let report = file
        .verify(crate::Treatment::Continue, &crate::CancelFlag::new())
        .unwrap();
    assert!(report.is_consistent(), "{:?}", report.findings);
}

#[test]
fn update_rewrites_fixed_columns_in_place() {
    let (dir, mut file) = create_and_open(fixed_schema(), OpenMode::Update);
    let id = file.insert(row(1, 10)).unwrap();
    file.update(id, vec![Value::BigInt(99)], &TargetFields::new(vec![2]))
        .unwrap();
    file.close().unwrap();

    let mut file = reopen(&dir, fixed_schema(), OpenMode::Read);
    let values = file.fetch(Some(id), None).unwrap().unwrap();
    assert_eq!(values[1], Value::Int(1), "untouched column survives");
    assert_eq!(values[2], Value::BigInt(99));
}

#[test]
fn update_with_no_targets_changes_nothing() {
    let (dir, mut file) = create_and_open(fixed_schema(), OpenMode::Update);
    let id = file.insert(row(1, 10)).unwrap();
    file.update(id, vec![], &TargetFields::default()).unwrap();
    assert_eq!(file.count().unwrap(), 1);
    file.close().unwrap();

    let mut file = reopen(&dir, fixed_schema(), OpenMode::Read);
    let values = file.fetch(Some(id), None).unwrap().unwrap();
    assert_eq!(values[1], Value::Int(1));
    assert_eq!(values[2], Value::BigInt(10));
}

#[test]
fn slots_spill_onto_new_pages_when_a_page_fills() {
    let (dir, mut file) = create_and_open(fixed_schema(), OpenMode::Update);
    let per_page = file.meta().slots_per_page() as usize;
    let mut last = ObjectId::UNDEFINED;
    for i in 0..per_page + 3 {
        last = file.insert(row(i as i32, i as i64)).unwrap();
    }
    assert_eq!(last.page_id(), 2, "overflow rows land on the second data page");
    assert_eq!(file.count().unwrap(), (per_page + 3) as i64);
    file.close().unwrap();

    let mut file = reopen(&dir, fixed_schema(), OpenMode::Read);
    let mut seen = 0;
    while file.fetch(None, None).unwrap().is_some() {
        seen += 1;
    }
    assert_eq!(seen, per_page + 3);
}

#[test]
fn create_twice_reports_existing_file() {
    let (dir, file) = create_and_open(fixed_schema(), OpenMode::Read);
    drop(file);
    let result = RecordFile::create(table_dir(&dir), fixed_schema(), &MetaDataOptions::default());
    assert!(matches!(result, Err(RecordError::FileAlreadyExisted(_))));
}

#[test]
fn wrong_open_mode_is_rejected() {
    let (_dir, mut file) = create_and_open(fixed_schema(), OpenMode::Read);
    assert!(matches!(
        file.insert(row(1, 1)),
        Err(RecordError::IllegalFileAccess)
    ));
    assert!(matches!(
        file.expunge(ObjectId::new(1, 0)),
        Err(RecordError::IllegalFileAccess)
    ));
}

#[test]
fn fetch_requires_read_mode() {
    let (_dir, mut file) = create_and_open(fixed_schema(), OpenMode::Update);
    assert!(matches!(
        file.fetch(None, None),
        Err(RecordError::IllegalFileAccess)
    ));
}

#[test]
fn closed_handle_reports_not_open() {
    let (_dir, mut file) = create_and_open(fixed_schema(), OpenMode::Update);
    file.close().unwrap();
    assert!(matches!(file.insert(row(1, 1)), Err(RecordError::NotOpen)));
    assert!(matches!(file.count(), Err(RecordError::NotOpen)));
}

#[test]
fn expunge_of_missing_object_reports_not_found() {
    let (_dir, mut file) = create_and_open(fixed_schema(), OpenMode::Update);
    file.insert(row(1, 10)).unwrap();
    assert!(matches!(
        file.expunge(ObjectId::new(1, 7)),
        Err(RecordError::ObjectNotFound(_))
    ));
    // The failed operation left the file usable.
    assert_eq!(file.count().unwrap(), 1);
}

#[test]
fn type_mismatch_aborts_without_side_effects() {
    let (_dir, mut file) = create_and_open(fixed_schema(), OpenMode::Update);
    let id = file.insert(row(1, 10)).unwrap();
    let result = file.update(id, vec![Value::Int(5)], &TargetFields::new(vec![2]));
    assert!(matches!(result, Err(RecordError::BadArgument(_))));
    assert_eq!(file.count().unwrap(), 1);
}

#[test]
fn batch_mode_commits_on_close() {
    let (dir, mut file) = create_and_open(fixed_schema(), OpenMode::Batch);
    for i in 0..10 {
        file.insert(row(i, i as i64)).unwrap();
    }
    file.close().unwrap();

    let mut file = reopen(&dir, fixed_schema(), OpenMode::Read);
    assert_eq!(file.count().unwrap(), 10);
    let mut seen = 0;
    while file.fetch(None, None).unwrap().is_some() {
        seen += 1;
    }
    assert_eq!(seen, 10);
}
