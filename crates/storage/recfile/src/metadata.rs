//! Physical sizing derived from a schema.
//!
//! `MetaData` is immutable after construction. It validates and normalizes
//! the column specs, then derives the slot size, the direct page size and
//! slot count, and the variable page size.

use crate::codec;
use crate::errors::{RecordError, Result};
use crate::schema::{FieldKind, Schema};
use crate::targets::TargetFields;
use binary_helpers::bitmap::bitmap_bytes;

/// Granule all page sizes are multiples of.
pub const DEFAULT_PAGE_SIZE: usize = 4096;

/// Default floor for slots per direct page.
pub const DEFAULT_MIN_SLOTS_PER_PAGE: u32 = 4;

/// Variable page size used when any variable field is unbounded.
pub const MAX_VARIABLE_PAGE_SIZE: usize = 64 * 1024;

/// Bytes of the per-page slot-count header on direct pages.
const SLOT_COUNT_HEADER_SIZE: usize = 4;

/// Tunables supplied by the caller. The minimum slots-per-page floor is the
/// one configuration scalar the engine reads.
#[derive(Debug, Clone)]
pub struct MetaDataOptions {
    pub minimum_slots_per_page: u32,
    /// Explicit direct page size; derived when absent.
    pub direct_page_size: Option<usize>,
    /// Explicit variable page size; derived when absent.
    pub variable_page_size: Option<usize>,
}

impl Default for MetaDataOptions {
    fn default() -> Self {
        Self {
            minimum_slots_per_page: DEFAULT_MIN_SLOTS_PER_PAGE,
            direct_page_size: None,
            variable_page_size: None,
        }
    }
}

/// Validated schema plus derived physical sizes.
#[derive(Debug)]
pub struct MetaData {
    schema: Schema,
    variable_field_count: usize,
    has_compress: bool,
    slot_size: usize,
    slots_per_page: u32,
    direct_page_size: usize,
    variable_page_size: usize,
    direct_fields: TargetFields,
    variable_fields: TargetFields,
}

impl MetaData {
    pub fn new(schema: Schema, options: &MetaDataOptions) -> Result<Self> {
        let schema = normalize(schema)?;
        let columns = schema.columns();

        let mut variable_field_count = 0;
        let mut has_compress = false;
        let mut direct_ids = Vec::new();
        let mut variable_ids = Vec::new();
        for (id, spec) in columns.iter().enumerate() {
            let variable = id != 0 && is_variable_spec(spec);
            if variable {
                variable_field_count += 1;
                variable_ids.push(id);
            } else {
                direct_ids.push(id);
            }
            has_compress |= spec.compressed;
        }

        let slot_size = derive_slot_size(&schema, variable_field_count > 0);
        let floor = options
            .minimum_slots_per_page
            .max(1);
        let (direct_page_size, slots_per_page) = match options.direct_page_size {
            Some(size) => (size, slots_for(size, slot_size)),
            None => derive_direct_page_size(slot_size, floor),
        };
        if slots_per_page == 0 {
            return Err(RecordError::InvalidSchema(format!(
                "slot of {slot_size} bytes does not fit a {direct_page_size}-byte page"
            )));
        }
        let variable_page_size = match options.variable_page_size {
            Some(size) => size,
            None => derive_variable_page_size(&schema),
        };

        Ok(Self {
            schema,
            variable_field_count,
            has_compress,
            slot_size,
            slots_per_page,
            direct_page_size,
            variable_page_size,
            direct_fields: TargetFields::new(direct_ids),
            variable_fields: TargetFields::new(variable_ids),
        })
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Total field count, object-id column included.
    pub fn field_count(&self) -> usize {
        self.schema.len()
    }

    pub fn variable_field_count(&self) -> usize {
        self.variable_field_count
    }

    pub fn has_variable(&self) -> bool {
        self.variable_field_count > 0
    }

    pub fn has_compress(&self) -> bool {
        self.has_compress
    }

    pub fn column(&self, field_id: usize) -> &crate::schema::ColumnSpec {
        &self.schema.columns()[field_id]
    }

    pub fn is_variable(&self, field_id: usize) -> bool {
        self.variable_fields.contains(field_id)
    }

    pub fn is_array(&self, field_id: usize) -> bool {
        self.column(field_id).kind == FieldKind::Array
    }

    /// Fixed-slot byte size, free-chain pointer admitted.
    pub fn slot_size(&self) -> usize {
        self.slot_size
    }

    pub fn slots_per_page(&self) -> u32 {
        self.slots_per_page
    }

    pub fn direct_page_size(&self) -> usize {
        self.direct_page_size
    }

    pub fn variable_page_size(&self) -> usize {
        self.variable_page_size
    }

    /// Bytes of the per-row null bitmap (one bit per non-oid column).
    pub fn null_bitmap_bytes(&self) -> usize {
        bitmap_bytes(self.field_count() - 1)
    }

    /// Bytes of the slot prefix: null bitmap plus the variable object id
    /// when the schema has variable columns.
    pub fn slot_header_size(&self) -> usize {
        self.null_bitmap_bytes()
            + if self.has_variable() {
                crate::object_id::ObjectId::DISK_SIZE
            } else {
                0
            }
    }

    /// Offset of a fixed column's value within the slot's value region.
    pub fn fixed_field_offset(&self, field_id: usize) -> usize {
        let mut offset = 0;
        for id in 1..field_id {
            if !self.is_variable(id) {
                offset += codec::fixed_disk_size(self.column(id));
            }
        }
        offset
    }

    /// All fixed-part fields, object-id column included.
    pub fn direct_fields(&self) -> &TargetFields {
        &self.direct_fields
    }

    pub fn variable_fields(&self) -> &TargetFields {
        &self.variable_fields
    }

    /// Per-field header bytes in a variable object.
    pub fn variable_header_size(&self, field_id: usize) -> usize {
        codec::header_size(self.column(field_id))
    }
}

fn is_variable_spec(spec: &crate::schema::ColumnSpec) -> bool {
    match spec.kind {
        FieldKind::Array => true,
        FieldKind::String | FieldKind::Binary => !(spec.fixed && spec.length > 0),
        _ => false,
    }
}

/// Validates column specs and fills in natural sizes and hint rules.
fn normalize(mut schema: Schema) -> Result<Schema> {
    if schema.len() < 2 {
        return Err(RecordError::InvalidSchema(
            "a schema needs the object-id column and at least one data column".into(),
        ));
    }
    for (id, spec) in schema.columns_mut().iter_mut().enumerate() {
        if id == 0 {
            if spec.kind != FieldKind::ObjectId {
                return Err(RecordError::InvalidSchema(
                    "column 0 must be the object-id column".into(),
                ));
            }
            continue;
        }
        match spec.kind {
            FieldKind::ObjectId => {
                return Err(RecordError::InvalidSchema(format!(
                    "column {id}: only column 0 may be object-id typed"
                )));
            }
            FieldKind::Int => fix_natural_length(spec, id, 4)?,
            FieldKind::BigInt | FieldKind::Double => fix_natural_length(spec, id, 8)?,
            FieldKind::Decimal => {
                if !(4..=16).contains(&spec.length) {
                    return Err(RecordError::Unsupported(format!(
                        "column {id}: decimal requires an explicit length of 4..=16 bytes"
                    )));
                }
                spec.fixed = true;
            }
            FieldKind::String | FieldKind::Binary => {
                // Length 0 means unbounded and overrides the fixed hint.
                if spec.length == 0 {
                    spec.fixed = false;
                }
            }
            FieldKind::Array => {
                if spec.element.is_none() {
                    return Err(RecordError::InvalidSchema(format!(
                        "column {id}: array columns need an element type"
                    )));
                }
                if let Some(element) = &spec.element
                    && element.kind == FieldKind::Decimal
                    && !(4..=16).contains(&element.length)
                {
                    return Err(RecordError::Unsupported(format!(
                        "column {id}: decimal elements require an explicit length of 4..=16 bytes"
                    )));
                }
                spec.fixed = false;
            }
        }
        // The compressed hint applies to variable scalar columns only.
        if spec.compressed {
            let scalar = matches!(spec.kind, FieldKind::String | FieldKind::Binary);
            if !scalar || spec.fixed {
                spec.compressed = false;
            }
        }
    }
    Ok(schema)
}

fn fix_natural_length(
    spec: &mut crate::schema::ColumnSpec,
    id: usize,
    natural: u32,
) -> Result<()> {
    if spec.length == 0 {
        spec.length = natural;
    } else if spec.length != natural {
        return Err(RecordError::InvalidSchema(format!(
            "column {id}: {:?} has a natural size of {natural} bytes, not {}",
            spec.kind, spec.length
        )));
    }
    spec.fixed = true;
    Ok(())
}

/// Null bitmap + optional variable-id pointer + fixed column widths,
/// rounded up to a multiple of 8 so a free-slot next-pointer always fits.
fn derive_slot_size(schema: &Schema, has_variable: bool) -> usize {
    let mut size = bitmap_bytes(schema.len() - 1);
    if has_variable {
        size += crate::object_id::ObjectId::DISK_SIZE;
    }
    for (id, spec) in schema.columns().iter().enumerate() {
        if id == 0 || is_variable_spec(spec) {
            continue;
        }
        size += codec::fixed_disk_size(spec);
    }
    size.next_multiple_of(8)
}

/// Largest `n` with `n * (slot_bits + 1) + 7 <= usable_bits`, i.e. the
/// bitmap and the slot-count header still fit.
fn slots_for(page_size: usize, slot_size: usize) -> u32 {
    let usable = page_size.saturating_sub(SLOT_COUNT_HEADER_SIZE);
    ((usable * 8).saturating_sub(7) / (slot_size * 8 + 1)) as u32
}

/// Raises the page size by default-page-size granules until the floor of
/// slots per page holds.
fn derive_direct_page_size(slot_size: usize, floor: u32) -> (usize, u32) {
    let mut page_size = DEFAULT_PAGE_SIZE;
    let required = slot_size * floor as usize;
    if page_size - SLOT_COUNT_HEADER_SIZE < required {
        page_size = required.next_multiple_of(DEFAULT_PAGE_SIZE) + DEFAULT_PAGE_SIZE;
    }
    let mut slots = slots_for(page_size, slot_size);
    while slots < floor {
        page_size += DEFAULT_PAGE_SIZE;
        slots = slots_for(page_size, slot_size);
    }
    (page_size, slots)
}

/// Sum of per-field declared maxima plus header overhead, saturating to
/// the unbounded maximum, rounded up to the default page size.
fn derive_variable_page_size(schema: &Schema) -> usize {
    let mut sum: usize = pagestore::area::DIR_HEADER_SIZE + pagestore::area::DIR_ENTRY_SIZE;
    for (id, spec) in schema.columns().iter().enumerate() {
        if id == 0 || !is_variable_spec(spec) {
            continue;
        }
        let declared = match spec.kind {
            FieldKind::Array => {
                let element = spec.element.expect("array without element spec");
                if spec.length == 0 || (element.is_variable() && element.length == 0) {
                    0
                } else {
                    let per_element = if element.is_variable() {
                        element.length as usize + 4
                    } else {
                        codec::element_disk_size(&element)
                    };
                    spec.length as usize * per_element
                }
            }
            _ => spec.length as usize,
        };
        if declared == 0 {
            // Unbounded field: saturate.
            return MAX_VARIABLE_PAGE_SIZE;
        }
        sum = sum.saturating_add(declared + codec::header_size(spec));
        if sum >= MAX_VARIABLE_PAGE_SIZE {
            return MAX_VARIABLE_PAGE_SIZE;
        }
    }
    sum.next_multiple_of(DEFAULT_PAGE_SIZE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ColumnSpec, ElementSpec, EncodingForm};

    fn fixed_only_schema() -> Schema {
        Schema::new(vec![
            ColumnSpec::object_id(),
            ColumnSpec::int(),
            ColumnSpec::bigint(),
        ])
    }

    #[test]
    fn fixed_only_slot_size_rounds_to_eight() {
        // 1 byte null bitmap + 4 + 8 = 13, rounded up to 16.
        let meta = MetaData::new(fixed_only_schema(), &MetaDataOptions::default()).unwrap();
        assert_eq!(meta.slot_size(), 16);
        assert!(!meta.has_variable());
        assert_eq!(meta.slot_header_size(), 1);
    }

    #[test]
    fn tiny_slot_still_admits_a_free_chain_pointer() {
        let schema = Schema::new(vec![ColumnSpec::object_id(), ColumnSpec::int()]);
        let meta = MetaData::new(schema, &MetaDataOptions::default()).unwrap();
        // 1 byte bitmap + 4 bytes value = 5, raised to 8.
        assert_eq!(meta.slot_size(), 8);
    }

    #[test]
    fn slots_per_page_satisfies_the_bitmap_inequality() {
        let meta = MetaData::new(fixed_only_schema(), &MetaDataOptions::default()).unwrap();
        let slots = meta.slots_per_page() as usize;
        let usable = meta.direct_page_size() - 4;
        assert!(slots * (meta.slot_size() * 8 + 1) + 7 <= usable * 8);
        // One more slot must not fit.
        assert!((slots + 1) * (meta.slot_size() * 8 + 1) + 7 > usable * 8);
    }

    #[test]
    fn page_size_grows_to_satisfy_the_slot_floor() {
        let schema = Schema::new(vec![
            ColumnSpec::object_id(),
            ColumnSpec::binary(3000).stored_fixed(),
        ]);
        let options = MetaDataOptions {
            minimum_slots_per_page: 8,
            ..Default::default()
        };
        let meta = MetaData::new(schema, &options).unwrap();
        assert!(meta.slots_per_page() >= 8);
        assert_eq!(meta.direct_page_size() % DEFAULT_PAGE_SIZE, 0);
        assert!(meta.direct_page_size() > DEFAULT_PAGE_SIZE);
    }

    #[test]
    fn variable_schema_reserves_the_variable_id_pointer() {
        let schema = Schema::new(vec![
            ColumnSpec::object_id(),
            ColumnSpec::int(),
            ColumnSpec::string(EncodingForm::Utf8, 100),
        ]);
        let meta = MetaData::new(schema, &MetaDataOptions::default()).unwrap();
        assert!(meta.has_variable());
        assert_eq!(meta.variable_field_count(), 1);
        // 1 byte bitmap + 8 byte variable id + 4 byte int = 13 -> 16.
        assert_eq!(meta.slot_size(), 16);
        assert_eq!(meta.slot_header_size(), 9);
        assert!(meta.is_variable(2));
        assert!(!meta.is_variable(1));
    }

    #[test]
    fn unbounded_variable_field_saturates_the_variable_page() {
        let schema = Schema::new(vec![
            ColumnSpec::object_id(),
            ColumnSpec::string(EncodingForm::Utf8, 0),
        ]);
        let meta = MetaData::new(schema, &MetaDataOptions::default()).unwrap();
        assert_eq!(meta.variable_page_size(), MAX_VARIABLE_PAGE_SIZE);
    }

    #[test]
    fn bounded_variable_fields_size_the_variable_page() {
        let schema = Schema::new(vec![
            ColumnSpec::object_id(),
            ColumnSpec::string(EncodingForm::Utf8, 500),
            ColumnSpec::array(ElementSpec::int(), 10),
        ]);
        let meta = MetaData::new(schema, &MetaDataOptions::default()).unwrap();
        assert_eq!(meta.variable_page_size(), DEFAULT_PAGE_SIZE);
    }

    #[test]
    fn rejects_wrong_natural_length() {
        let mut spec = ColumnSpec::int();
        spec.length = 2;
        let schema = Schema::new(vec![ColumnSpec::object_id(), spec]);
        assert!(matches!(
            MetaData::new(schema, &MetaDataOptions::default()),
            Err(RecordError::InvalidSchema(_))
        ));
    }

    #[test]
    fn rejects_decimal_without_length() {
        let schema = Schema::new(vec![ColumnSpec::object_id(), ColumnSpec::decimal(0, 2)]);
        assert!(matches!(
            MetaData::new(schema, &MetaDataOptions::default()),
            Err(RecordError::Unsupported(_))
        ));
    }

    #[test]
    fn rejects_missing_object_id_column() {
        let schema = Schema::new(vec![ColumnSpec::int(), ColumnSpec::int()]);
        assert!(matches!(
            MetaData::new(schema, &MetaDataOptions::default()),
            Err(RecordError::InvalidSchema(_))
        ));
    }

    #[test]
    fn compressed_hint_survives_only_on_variable_scalars() {
        let schema = Schema::new(vec![
            ColumnSpec::object_id(),
            ColumnSpec::string(EncodingForm::Utf8, 100).compressed(),
            ColumnSpec::binary(20).stored_fixed().compressed(),
            ColumnSpec::array(ElementSpec::int(), 4).compressed(),
        ]);
        let meta = MetaData::new(schema, &MetaDataOptions::default()).unwrap();
        assert!(meta.column(1).compressed);
        assert!(!meta.column(2).compressed);
        assert!(!meta.column(3).compressed);
    }

    #[test]
    fn fixed_field_offsets_skip_variable_columns() {
        let schema = Schema::new(vec![
            ColumnSpec::object_id(),
            ColumnSpec::int(),
            ColumnSpec::string(EncodingForm::Utf8, 100),
            ColumnSpec::bigint(),
        ]);
        let meta = MetaData::new(schema, &MetaDataOptions::default()).unwrap();
        assert_eq!(meta.fixed_field_offset(1), 0);
        assert_eq!(meta.fixed_field_offset(3), 4);
    }
}
