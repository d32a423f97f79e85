use crate::errors::{RecordError, Result};
use crate::metadata::MetaData;
use crate::object_id::ObjectId;
use crate::targets::TargetFields;
use crate::value::Value;
use binary_helpers::bitmap::Bitmap;
use std::sync::Arc;

/// A row in transit between the caller and the two files: positional
/// values for a set of target fields, the row's null bitmap, and the
/// variable object id stored alongside the fixed part.
///
/// The null bitmap covers every non-oid column (bit `field_id - 1`), not
/// just the targeted ones, so updates can merge old and new nullness.
#[derive(Debug, Clone)]
pub struct RowData {
    meta: Arc<MetaData>,
    targets: TargetFields,
    values: Vec<Value>,
    null_bits: Bitmap,
    variable_id: ObjectId,
}

impl RowData {
    /// A row addressing every field.
    pub fn new(meta: Arc<MetaData>) -> Self {
        let targets = TargetFields::all(meta.field_count());
        Self::with_targets(meta, targets)
    }

    /// A row addressing only `targets`.
    pub fn with_targets(meta: Arc<MetaData>, targets: TargetFields) -> Self {
        let bits = meta.field_count() - 1;
        let values = vec![Value::Null; targets.len()];
        Self {
            meta,
            targets,
            values,
            null_bits: Bitmap::new(bits),
            variable_id: ObjectId::UNDEFINED,
        }
    }

    pub fn targets(&self) -> &TargetFields {
        &self.targets
    }

    /// Installs the values, checking each against the schema and folding
    /// their nullness into the bitmap. Bits of untargeted fields keep
    /// whatever the bitmap already holds.
    pub fn set_values(&mut self, values: Vec<Value>) -> Result<()> {
        if values.len() != self.targets.len() {
            return Err(RecordError::BadArgument(format!(
                "expected {} values, got {}",
                self.targets.len(),
                values.len()
            )));
        }
        for (index, field_id) in self.targets.enumerate() {
            let value = &values[index];
            if field_id == 0 {
                // The object-id column is assigned by the engine; accept
                // a placeholder of either shape.
                if !matches!(value, Value::Null | Value::ObjectId(_)) {
                    return Err(RecordError::BadArgument(
                        "column 0 carries the object id".into(),
                    ));
                }
                continue;
            }
            if value.is_null() {
                self.null_bits.set(field_id - 1)?;
            } else {
                if !value.matches(self.meta.column(field_id)) {
                    return Err(RecordError::BadArgument(format!(
                        "value for column {field_id} does not match its declared type"
                    )));
                }
                self.null_bits.reset(field_id - 1)?;
            }
        }
        self.values = values;
        Ok(())
    }

    pub fn is_null(&self, field_id: usize) -> bool {
        field_id != 0 && self.null_bits.test(field_id - 1)
    }

    /// True when any variable column of the row is non-null.
    pub fn has_variable_data(&self) -> bool {
        self.meta
            .variable_fields()
            .iter()
            .any(|field_id| !self.is_null(field_id))
    }

    pub fn value_at(&self, index: usize) -> &Value {
        &self.values[index]
    }

    pub fn set_value_at(&mut self, index: usize, value: Value) {
        self.values[index] = value;
    }

    pub fn value_for_field(&self, field_id: usize) -> Option<&Value> {
        self.targets.index_of(field_id).map(|index| &self.values[index])
    }

    pub fn null_bits(&self) -> &Bitmap {
        &self.null_bits
    }

    pub fn set_null_bits(&mut self, bits: Bitmap) {
        self.null_bits = bits;
    }

    pub fn variable_id(&self) -> ObjectId {
        self.variable_id
    }

    pub fn set_variable_id(&mut self, id: ObjectId) {
        self.variable_id = id;
    }

    pub fn meta(&self) -> &Arc<MetaData> {
        &self.meta
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::MetaDataOptions;
    use crate::schema::{ColumnSpec, EncodingForm, Schema};

    fn meta() -> Arc<MetaData> {
        let schema = Schema::new(vec![
            ColumnSpec::object_id(),
            ColumnSpec::int(),
            ColumnSpec::string(EncodingForm::Utf8, 100),
        ]);
        Arc::new(MetaData::new(schema, &MetaDataOptions::default()).unwrap())
    }

    #[test]
    fn set_values_tracks_nullness() {
        let mut row = RowData::new(meta());
        row.set_values(vec![Value::Null, Value::Int(5), Value::Null])
            .unwrap();
        assert!(!row.is_null(1));
        assert!(row.is_null(2));
        assert!(!row.has_variable_data());
    }

    #[test]
    fn variable_data_is_detected() {
        let mut row = RowData::new(meta());
        row.set_values(vec![Value::Null, Value::Null, Value::String("x".into())])
            .unwrap();
        assert!(row.has_variable_data());
    }

    #[test]
    fn type_mismatch_is_a_bad_argument() {
        let mut row = RowData::new(meta());
        let result = row.set_values(vec![Value::Null, Value::BigInt(5), Value::Null]);
        assert!(matches!(result, Err(RecordError::BadArgument(_))));
    }

    #[test]
    fn wrong_arity_is_a_bad_argument() {
        let mut row = RowData::new(meta());
        assert!(matches!(
            row.set_values(vec![Value::Null]),
            Err(RecordError::BadArgument(_))
        ));
    }

    #[test]
    fn untargeted_bits_survive_a_partial_update() {
        let meta = meta();
        let mut row = RowData::with_targets(Arc::clone(&meta), TargetFields::new(vec![1]));
        let mut old_bits = Bitmap::new(2);
        old_bits.set(1).unwrap(); // column 2 was null before the update
        row.set_null_bits(old_bits);
        row.set_values(vec![Value::Int(9)]).unwrap();
        assert!(!row.is_null(1));
        assert!(row.is_null(2));
    }
}
