//! Schema descriptors: what columns a record file stores and how.
//!
//! The specs here are declarative input; [`MetaData`](crate::metadata)
//! validates and normalizes them into physical sizing decisions.

/// Semantic type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// The surrogate identifier column; must be column 0 and is never
    /// stored.
    ObjectId,
    Int,
    BigInt,
    Double,
    Decimal,
    String,
    Binary,
    Array,
}

impl FieldKind {
    /// True for kinds whose values have one natural on-disk size.
    pub fn is_fixed_size(self) -> bool {
        matches!(
            self,
            FieldKind::Int | FieldKind::BigInt | FieldKind::Double | FieldKind::Decimal
        )
    }
}

/// String encoding used on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EncodingForm {
    #[default]
    Utf8,
    /// UTF-16 little-endian code units, two bytes each.
    Ucs2,
}

/// Element description for array columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElementSpec {
    pub kind: FieldKind,
    /// Declared maximum length in bytes for variable-size elements;
    /// explicit length for decimal elements. 0 means unbounded.
    pub length: u32,
    pub scale: u32,
    pub encoding: EncodingForm,
}

impl ElementSpec {
    pub fn int() -> Self {
        Self {
            kind: FieldKind::Int,
            length: 4,
            scale: 0,
            encoding: EncodingForm::default(),
        }
    }

    pub fn bigint() -> Self {
        Self {
            kind: FieldKind::BigInt,
            length: 8,
            scale: 0,
            encoding: EncodingForm::default(),
        }
    }

    pub fn double() -> Self {
        Self {
            kind: FieldKind::Double,
            length: 8,
            scale: 0,
            encoding: EncodingForm::default(),
        }
    }

    pub fn decimal(length: u32, scale: u32) -> Self {
        Self {
            kind: FieldKind::Decimal,
            length,
            scale,
            encoding: EncodingForm::default(),
        }
    }

    pub fn string(encoding: EncodingForm, max_bytes: u32) -> Self {
        Self {
            kind: FieldKind::String,
            length: max_bytes,
            scale: 0,
            encoding,
        }
    }

    pub fn binary(max_bytes: u32) -> Self {
        Self {
            kind: FieldKind::Binary,
            length: max_bytes,
            scale: 0,
            encoding: EncodingForm::default(),
        }
    }

    /// True when elements of this kind have per-element variable size.
    pub fn is_variable(&self) -> bool {
        matches!(self.kind, FieldKind::String | FieldKind::Binary)
    }
}

/// Declaration of one column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSpec {
    pub kind: FieldKind,
    /// Declared maximum length in bytes (0 = unbounded). For arrays this
    /// is the maximum element count.
    pub length: u32,
    pub scale: u32,
    pub encoding: EncodingForm,
    /// Hint: store a bounded string/binary column in the fixed part.
    pub fixed: bool,
    /// Hint: compress the stored bytes. Honored only for variable scalar
    /// columns.
    pub compressed: bool,
    /// Present iff `kind == Array`.
    pub element: Option<ElementSpec>,
}

impl ColumnSpec {
    fn plain(kind: FieldKind, length: u32) -> Self {
        Self {
            kind,
            length,
            scale: 0,
            encoding: EncodingForm::default(),
            fixed: false,
            compressed: false,
            element: None,
        }
    }

    pub fn object_id() -> Self {
        Self::plain(FieldKind::ObjectId, 0)
    }

    pub fn int() -> Self {
        Self::plain(FieldKind::Int, 4)
    }

    pub fn bigint() -> Self {
        Self::plain(FieldKind::BigInt, 8)
    }

    pub fn double() -> Self {
        Self::plain(FieldKind::Double, 8)
    }

    pub fn decimal(length: u32, scale: u32) -> Self {
        let mut spec = Self::plain(FieldKind::Decimal, length);
        spec.scale = scale;
        spec
    }

    /// Variable-length string column; `max_bytes == 0` means unbounded.
    pub fn string(encoding: EncodingForm, max_bytes: u32) -> Self {
        let mut spec = Self::plain(FieldKind::String, max_bytes);
        spec.encoding = encoding;
        spec
    }

    pub fn binary(max_bytes: u32) -> Self {
        Self::plain(FieldKind::Binary, max_bytes)
    }

    pub fn array(element: ElementSpec, max_elements: u32) -> Self {
        let mut spec = Self::plain(FieldKind::Array, max_elements);
        spec.element = Some(element);
        spec
    }

    /// Requests compressed storage (variable scalar columns only).
    pub fn compressed(mut self) -> Self {
        self.compressed = true;
        self
    }

    /// Requests fixed-part storage for a bounded string/binary column.
    pub fn stored_fixed(mut self) -> Self {
        self.fixed = true;
        self
    }
}

/// An ordered column list. Column 0 must be the object-id column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    columns: Vec<ColumnSpec>,
}

impl Schema {
    pub fn new(columns: Vec<ColumnSpec>) -> Self {
        Self { columns }
    }

    pub fn columns(&self) -> &[ColumnSpec] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub(crate) fn columns_mut(&mut self) -> &mut [ColumnSpec] {
        &mut self.columns
    }
}
