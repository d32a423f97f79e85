use crate::object_id::ObjectId;
use crate::schema::{ColumnSpec, ElementSpec, FieldKind};

/// A runtime column value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    ObjectId(ObjectId),
    Int(i32),
    BigInt(i64),
    Double(f64),
    Decimal { unscaled: i64, scale: u32 },
    String(String),
    Binary(Vec<u8>),
    Array(Vec<Value>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Whether this value is storable under `spec` (nulls always are).
    pub fn matches(&self, spec: &ColumnSpec) -> bool {
        match (self, spec.kind) {
            (Value::Null, _) => true,
            (Value::ObjectId(_), FieldKind::ObjectId) => true,
            (Value::Int(_), FieldKind::Int) => true,
            (Value::BigInt(_), FieldKind::BigInt) => true,
            (Value::Double(_), FieldKind::Double) => true,
            (Value::Decimal { scale, .. }, FieldKind::Decimal) => *scale == spec.scale,
            (Value::String(_), FieldKind::String) => true,
            (Value::Binary(_), FieldKind::Binary) => true,
            (Value::Array(elements), FieldKind::Array) => match &spec.element {
                Some(element) => elements.iter().all(|e| e.matches_element(element)),
                None => false,
            },
            _ => false,
        }
    }

    fn matches_element(&self, element: &ElementSpec) -> bool {
        match (self, element.kind) {
            (Value::Int(_), FieldKind::Int) => true,
            (Value::BigInt(_), FieldKind::BigInt) => true,
            (Value::Double(_), FieldKind::Double) => true,
            (Value::Decimal { scale, .. }, FieldKind::Decimal) => *scale == element.scale,
            (Value::String(_), FieldKind::String) => true,
            (Value::Binary(_), FieldKind::Binary) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::EncodingForm;

    #[test]
    fn null_matches_everything() {
        assert!(Value::Null.matches(&ColumnSpec::int()));
        assert!(Value::Null.matches(&ColumnSpec::string(EncodingForm::Utf8, 0)));
    }

    #[test]
    fn kind_mismatch_is_rejected() {
        assert!(!Value::Int(1).matches(&ColumnSpec::bigint()));
        assert!(!Value::String("x".into()).matches(&ColumnSpec::binary(16)));
    }

    #[test]
    fn decimal_scale_must_agree() {
        let spec = ColumnSpec::decimal(8, 2);
        assert!(Value::Decimal {
            unscaled: 1234,
            scale: 2
        }
        .matches(&spec));
        assert!(!Value::Decimal {
            unscaled: 1234,
            scale: 3
        }
        .matches(&spec));
    }

    #[test]
    fn array_elements_are_checked() {
        let spec = ColumnSpec::array(ElementSpec::int(), 4);
        assert!(Value::Array(vec![Value::Int(1), Value::Int(2)]).matches(&spec));
        assert!(!Value::Array(vec![Value::Int(1), Value::BigInt(2)]).matches(&spec));
    }
}
