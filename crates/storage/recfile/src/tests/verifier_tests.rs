use super::{create_and_open, fixed_schema, reopen, table_dir, variable_schema};
use crate::direct::page_header::DirectPageHeader;
use crate::errors::RecordError;
use crate::metadata::{MetaData, MetaDataOptions};
use crate::object_id::ObjectId;
use crate::value::Value;
use crate::verify::{CancelFlag, Finding, Treatment};
use crate::{OpenMode, RecordFile};
use std::fs::OpenOptions;
use std::io::{Read, Seek, SeekFrom, Write};

fn row(int: i32, big: i64) -> Vec<Value> {
    vec![Value::Null, Value::Int(int), Value::BigInt(big)]
}

fn patch_direct_file(dir: &tempfile::TempDir, patch: impl FnOnce(&mut Vec<u8>)) {
    let path = table_dir(dir).join("direct");
    let mut file = OpenOptions::new().read(true).write(true).open(path).unwrap();
    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes).unwrap();
    patch(&mut bytes);
    file.seek(SeekFrom::Start(0)).unwrap();
    file.write_all(&bytes).unwrap();
}

fn fixed_meta() -> MetaData {
    MetaData::new(fixed_schema(), &MetaDataOptions::default()).unwrap()
}

#[test]
fn healthy_file_verifies_clean() {
    let (dir, mut file) = create_and_open(variable_schema(), OpenMode::Update);
    for i in 0..30 {
        let note = (i % 3 != 0).then(|| format!("row number {i}"));
        file.insert(vec![
            Value::Null,
            Value::Int(i),
            note.map(Value::String).unwrap_or(Value::Null),
        ])
        .unwrap();
    }
    // A few deletes so both free chains are populated.
    file.expunge(ObjectId::new(1, 4)).unwrap();
    file.expunge(ObjectId::new(1, 10)).unwrap();
    file.close().unwrap();

    let mut file = reopen(&dir, variable_schema(), OpenMode::Read);
    let report = file.verify(Treatment::Continue, &CancelFlag::new()).unwrap();
    assert!(report.is_consistent(), "{:?}", report.findings);
}

#[test]
fn bitmap_drift_yields_exactly_one_finding() {
    let (dir, mut file) = create_and_open(fixed_schema(), OpenMode::Update);
    for i in 0..4 {
        file.insert(row(i, 0)).unwrap();
    }
    file.close().unwrap();

    // Bump the stored slot count of data page 1 past its bitmap.
    let meta = fixed_meta();
    let page_offset = meta.direct_page_size();
    patch_direct_file(&dir, |bytes| {
        let stored = u32::from_le_bytes(bytes[page_offset..page_offset + 4].try_into().unwrap());
        bytes[page_offset..page_offset + 4].copy_from_slice(&(stored + 1).to_le_bytes());
    });

    let mut file = reopen(&dir, fixed_schema(), OpenMode::Read);
    let report = file.verify(Treatment::Continue, &CancelFlag::new()).unwrap();
    assert_eq!(
        report.findings,
        vec![Finding::InconsistentPageObjectNumber {
            page_id: 1,
            stored: 5,
            counted: 4,
        }]
    );
}

#[test]
fn free_chain_cycle_terminates_with_a_finding() {
    let (dir, mut file) = create_and_open(fixed_schema(), OpenMode::Update);
    let a = file.insert(row(1, 0)).unwrap();
    let b = file.insert(row(2, 0)).unwrap();
    let _c = file.insert(row(3, 0)).unwrap();
    file.expunge(a).unwrap();
    file.expunge(b).unwrap();
    file.close().unwrap();

    // Free chain is b -> a -> undefined; close the loop a -> b by hand.
    let meta = fixed_meta();
    let header_size = DirectPageHeader::size(meta.slots_per_page());
    let slot_a_offset =
        meta.direct_page_size() + header_size + a.area_id() as usize * meta.slot_size();
    patch_direct_file(&dir, |bytes| {
        bytes[slot_a_offset..slot_a_offset + 8].copy_from_slice(&b.raw().to_le_bytes());
    });

    let mut file = reopen(&dir, fixed_schema(), OpenMode::Read);
    let report = file.verify(Treatment::Continue, &CancelFlag::new()).unwrap();
    assert!(
        report
            .findings
            .iter()
            .any(|finding| matches!(finding, Finding::BadFreeObjectID(_))),
        "{:?}",
        report.findings
    );
}

#[test]
fn occupied_slot_on_the_free_chain_is_flagged() {
    let (dir, mut file) = create_and_open(fixed_schema(), OpenMode::Update);
    let a = file.insert(row(1, 0)).unwrap();
    file.expunge(a).unwrap();
    let b = file.insert(row(2, 0)).unwrap();
    assert_eq!(a, b, "slot reuse expected");
    file.close().unwrap();

    // Point the free chain at the (occupied) reused slot.
    patch_direct_file(&dir, |bytes| {
        // first block free_fixed field: progress byte + block offset 35.
        let offset = 1 + 35;
        bytes[offset..offset + 8].copy_from_slice(&a.raw().to_le_bytes());
        // and mirror into the second block so both copies agree.
        let second = 1 + crate::file_info::BLOCK_SIZE + 35;
        bytes[second..second + 8].copy_from_slice(&a.raw().to_le_bytes());
    });

    let mut file = reopen(&dir, fixed_schema(), OpenMode::Read);
    let report = file.verify(Treatment::Continue, &CancelFlag::new()).unwrap();
    assert!(
        report
            .findings
            .contains(&Finding::BadFreeObjectID(a)),
        "{:?}",
        report.findings
    );
}

#[test]
fn header_count_drift_is_flagged() {
    let (dir, mut file) = create_and_open(fixed_schema(), OpenMode::Update);
    file.insert(row(1, 0)).unwrap();
    file.close().unwrap();

    // Rewrite the count in both header blocks as 5.
    patch_direct_file(&dir, |bytes| {
        for base in [1usize, 1 + crate::file_info::BLOCK_SIZE] {
            let offset = base + 11;
            bytes[offset..offset + 8].copy_from_slice(&5i64.to_le_bytes());
        }
    });

    let mut file = reopen(&dir, fixed_schema(), OpenMode::Read);
    let report = file.verify(Treatment::Continue, &CancelFlag::new()).unwrap();
    assert!(
        report
            .findings
            .contains(&Finding::DiscordObjectNum {
                header: 5,
                counted: 1
            }),
        "{:?}",
        report.findings
    );
}

#[test]
fn zero_count_with_defined_endpoints_is_inconsistent() {
    let (dir, mut file) = create_and_open(fixed_schema(), OpenMode::Update);
    file.insert(row(1, 0)).unwrap();
    file.close().unwrap();

    // Zero the count but leave first/last defined.
    patch_direct_file(&dir, |bytes| {
        for base in [1usize, 1 + crate::file_info::BLOCK_SIZE] {
            let offset = base + 11;
            bytes[offset..offset + 8].copy_from_slice(&0i64.to_le_bytes());
        }
    });

    let mut file = reopen(&dir, fixed_schema(), OpenMode::Read);
    let report = file.verify(Treatment::Continue, &CancelFlag::new()).unwrap();
    assert!(
        report
            .findings
            .iter()
            .any(|finding| matches!(finding, Finding::InconsistentHeader { .. })),
        "{:?}",
        report.findings
    );
}

#[test]
fn abort_treatment_stops_at_the_first_finding() {
    let (dir, mut file) = create_and_open(fixed_schema(), OpenMode::Update);
    for i in 0..4 {
        file.insert(row(i, 0)).unwrap();
    }
    file.close().unwrap();

    let meta = fixed_meta();
    let page_offset = meta.direct_page_size();
    patch_direct_file(&dir, |bytes| {
        // Two independent defects: page drift and a bogus free head.
        let stored = u32::from_le_bytes(bytes[page_offset..page_offset + 4].try_into().unwrap());
        bytes[page_offset..page_offset + 4].copy_from_slice(&(stored + 1).to_le_bytes());
        for base in [1usize, 1 + crate::file_info::BLOCK_SIZE] {
            let offset = base + 35;
            bytes[offset..offset + 8]
                .copy_from_slice(&ObjectId::new(1, 2).raw().to_le_bytes());
        }
    });

    let mut file = reopen(&dir, fixed_schema(), OpenMode::Read);
    let report = file.verify(Treatment::Abort, &CancelFlag::new()).unwrap();
    assert_eq!(report.findings.len(), 1, "{:?}", report.findings);
}

#[test]
fn verification_is_cancellable() {
    let (dir, mut file) = create_and_open(fixed_schema(), OpenMode::Update);
    for i in 0..4 {
        file.insert(row(i, 0)).unwrap();
    }
    file.close().unwrap();

    let cancel = CancelFlag::new();
    cancel.cancel();
    let mut file = reopen(&dir, fixed_schema(), OpenMode::Read);
    let result = file.verify(Treatment::Continue, &cancel);
    assert!(matches!(result, Err(RecordError::Cancelled)));
    // The handle survives a cancelled verification.
    drop(cancel);
    let report = file.verify(Treatment::Continue, &CancelFlag::new()).unwrap();
    assert!(report.is_consistent());
}

/// Small pages so a handful of rows spans several of them.
fn small_page_options() -> MetaDataOptions {
    MetaDataOptions {
        direct_page_size: Some(256),
        ..Default::default()
    }
}

/// Builds a two-page table and returns `(per_page, last_row_id)`; the
/// last row is the only one on page 2.
fn two_page_table(dir: &tempfile::TempDir) -> (u32, ObjectId) {
    RecordFile::create(table_dir(dir), fixed_schema(), &small_page_options()).unwrap();
    let mut file = RecordFile::open(
        table_dir(dir),
        fixed_schema(),
        &small_page_options(),
        OpenMode::Update,
    )
    .unwrap();
    let per_page = file.meta().slots_per_page();
    let mut last = ObjectId::UNDEFINED;
    for i in 0..per_page + 1 {
        last = file.insert(row(i as i32, 0)).unwrap();
    }
    assert_eq!(last, ObjectId::new(2, 0));
    file.close().unwrap();
    (per_page, last)
}

#[test]
fn stray_occupied_slot_beyond_last_is_found_on_a_later_page() {
    let dir = tempfile::tempdir().unwrap();
    let (per_page, real_last) = two_page_table(&dir);

    // Shrink the header's last pointer onto page 1; the real last row
    // sits on page 2.
    let fake_last = ObjectId::new(1, per_page - 1);
    patch_direct_file(&dir, |bytes| {
        for base in [1usize, 1 + crate::file_info::BLOCK_SIZE] {
            bytes[base + 27..base + 35].copy_from_slice(&fake_last.raw().to_le_bytes());
        }
    });

    let mut file = RecordFile::open(
        table_dir(&dir),
        fixed_schema(),
        &small_page_options(),
        OpenMode::Read,
    )
    .unwrap();
    let report = file.verify(Treatment::Continue, &CancelFlag::new()).unwrap();
    assert_eq!(
        report.findings,
        vec![Finding::ExistLastObject {
            last: fake_last,
            next: real_last,
        }]
    );
}

#[test]
fn stray_occupied_slot_before_first_is_found_on_an_earlier_page() {
    let dir = tempfile::tempdir().unwrap();
    let (per_page, real_last) = two_page_table(&dir);

    // Advance the header's first pointer onto page 2; every row of
    // page 1 now sits before it.
    let fake_first = real_last;
    patch_direct_file(&dir, |bytes| {
        for base in [1usize, 1 + crate::file_info::BLOCK_SIZE] {
            bytes[base + 19..base + 27].copy_from_slice(&fake_first.raw().to_le_bytes());
        }
    });

    let mut file = RecordFile::open(
        table_dir(&dir),
        fixed_schema(),
        &small_page_options(),
        OpenMode::Read,
    )
    .unwrap();
    let report = file.verify(Treatment::Continue, &CancelFlag::new()).unwrap();
    assert_eq!(
        report.findings,
        vec![Finding::ExistTopObject {
            first: fake_first,
            prev: ObjectId::new(1, per_page - 1),
        }]
    );
}

#[test]
fn variable_size_drift_is_flagged() {
    let (dir, mut file) = create_and_open(variable_schema(), OpenMode::Update);
    file.insert(vec![
        Value::Null,
        Value::Int(1),
        Value::String("0123456789".repeat(8)),
    ])
    .unwrap();
    file.close().unwrap();

    // Corrupt the stored size in the variable object's header: the first
    // area payload starts with (uncompressed, stored) for column 2.
    let variable_path = table_dir(&dir).join("variable");
    let mut bytes = std::fs::read(&variable_path).unwrap();
    // Page 0, first area sits right after the directory header; its
    // payload begins after the type byte and next pointer.
    let size_info_offset = pagestore::area::DIR_HEADER_SIZE + 9;
    let stored = u32::from_le_bytes(
        bytes[size_info_offset + 4..size_info_offset + 8]
            .try_into()
            .unwrap(),
    );
    bytes[size_info_offset + 4..size_info_offset + 8]
        .copy_from_slice(&(stored + 3).to_le_bytes());
    std::fs::write(&variable_path, &bytes).unwrap();

    let mut file = reopen(&dir, variable_schema(), OpenMode::Read);
    let report = file.verify(Treatment::Continue, &CancelFlag::new()).unwrap();
    assert!(
        report
            .findings
            .iter()
            .any(|finding| matches!(finding, Finding::InconsistentVariableSize { .. })),
        "{:?}",
        report.findings
    );
}
