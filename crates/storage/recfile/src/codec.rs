//! Value codecs: fixed-part column encoding, variable-part encoding with
//! per-field size info, and the run-length compressor used for columns
//! whose schema requests compressed storage.
//!
//! All dispatch is by schema-derived tags; the storage layers never inspect
//! value representations themselves.

use crate::errors::{RecordError, Result};
use crate::schema::{ColumnSpec, ElementSpec, EncodingForm, FieldKind};
use crate::value::Value;
use binary_helpers::le::{read_le, write_le};

/// On-disk size of a fixed-part column value.
pub fn fixed_disk_size(spec: &ColumnSpec) -> usize {
    match spec.kind {
        FieldKind::Int => 4,
        FieldKind::BigInt | FieldKind::Double => 8,
        FieldKind::Decimal => spec.length as usize,
        // Bounded string/binary stored fixed: 4-byte actual length plus
        // the declared capacity.
        FieldKind::String | FieldKind::Binary => spec.length as usize + 4,
        FieldKind::ObjectId | FieldKind::Array => 0,
    }
}

/// Writes a non-null fixed-part value at `offset`.
pub fn write_fixed(spec: &ColumnSpec, value: &Value, bytes: &mut [u8], offset: usize) -> Result<()> {
    match (spec.kind, value) {
        (FieldKind::Int, Value::Int(v)) => write_le::<i32>(bytes, offset, *v)?,
        (FieldKind::BigInt, Value::BigInt(v)) => write_le::<i64>(bytes, offset, *v)?,
        (FieldKind::Double, Value::Double(v)) => write_le::<u64>(bytes, offset, v.to_bits())?,
        (FieldKind::Decimal, Value::Decimal { unscaled, .. }) => {
            write_narrow_int(bytes, offset, *unscaled, spec.length as usize)?;
        }
        (FieldKind::String, Value::String(text)) => {
            let encoded = encode_string(text, spec.encoding);
            write_bounded(bytes, offset, &encoded, spec.length as usize)?;
        }
        (FieldKind::Binary, Value::Binary(data)) => {
            write_bounded(bytes, offset, data, spec.length as usize)?;
        }
        _ => {
            return Err(RecordError::BadArgument(format!(
                "value does not match fixed column kind {:?}",
                spec.kind
            )));
        }
    }
    Ok(())
}

/// Reads a non-null fixed-part value from `offset`.
pub fn read_fixed(spec: &ColumnSpec, bytes: &[u8], offset: usize) -> Result<Value> {
    Ok(match spec.kind {
        FieldKind::Int => Value::Int(read_le::<i32>(bytes, offset)?),
        FieldKind::BigInt => Value::BigInt(read_le::<i64>(bytes, offset)?),
        FieldKind::Double => Value::Double(f64::from_bits(read_le::<u64>(bytes, offset)?)),
        FieldKind::Decimal => Value::Decimal {
            unscaled: read_narrow_int(bytes, offset, spec.length as usize)?,
            scale: spec.scale,
        },
        FieldKind::String => {
            let data = read_bounded(bytes, offset, spec.length as usize)?;
            Value::String(decode_string(data, spec.encoding)?)
        }
        FieldKind::Binary => Value::Binary(read_bounded(bytes, offset, spec.length as usize)?.to_vec()),
        FieldKind::ObjectId | FieldKind::Array => {
            return Err(RecordError::Unexpected(format!(
                "kind {:?} has no fixed-part representation",
                spec.kind
            )));
        }
    })
}

/// Per-field size descriptor stored in a variable object's header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeInfo {
    /// Variable scalar: sizes before and after compression. Equal when the
    /// value is stored raw.
    Scalar { uncompressed: u32, stored: u32 },
    /// Fixed-element array: the stored size is derived from the count.
    FixedArray { count: u32 },
    /// Variable-element array: count plus total stored bytes.
    VariableArray { count: u32, total: u32 },
}

impl SizeInfo {
    /// Stored payload bytes this field occupies after the header.
    pub fn stored_size(&self, spec: &ColumnSpec) -> usize {
        match self {
            SizeInfo::Scalar { stored, .. } => *stored as usize,
            SizeInfo::FixedArray { count } => {
                let element = spec.element.expect("fixed array without element spec");
                *count as usize * element_disk_size(&element)
            }
            SizeInfo::VariableArray { total, .. } => *total as usize,
        }
    }

    /// Serializes the size info; returns the bytes written.
    pub fn write_to(&self, bytes: &mut [u8], offset: usize) -> Result<usize> {
        match self {
            SizeInfo::Scalar {
                uncompressed,
                stored,
            } => {
                write_le::<u32>(bytes, offset, *uncompressed)?;
                write_le::<u32>(bytes, offset + 4, *stored)?;
                Ok(8)
            }
            SizeInfo::FixedArray { count } => {
                write_le::<u32>(bytes, offset, *count)?;
                Ok(4)
            }
            SizeInfo::VariableArray { count, total } => {
                write_le::<u32>(bytes, offset, *count)?;
                write_le::<u32>(bytes, offset + 4, *total)?;
                Ok(8)
            }
        }
    }

    /// Deserializes the size info shape declared by `spec`.
    pub fn read_from(spec: &ColumnSpec, bytes: &[u8], offset: usize) -> Result<SizeInfo> {
        match variable_shape(spec) {
            VariableShape::Scalar => Ok(SizeInfo::Scalar {
                uncompressed: read_le::<u32>(bytes, offset)?,
                stored: read_le::<u32>(bytes, offset + 4)?,
            }),
            VariableShape::FixedArray => Ok(SizeInfo::FixedArray {
                count: read_le::<u32>(bytes, offset)?,
            }),
            VariableShape::VariableArray => Ok(SizeInfo::VariableArray {
                count: read_le::<u32>(bytes, offset)?,
                total: read_le::<u32>(bytes, offset + 4)?,
            }),
        }
    }
}

enum VariableShape {
    Scalar,
    FixedArray,
    VariableArray,
}

fn variable_shape(spec: &ColumnSpec) -> VariableShape {
    match spec.kind {
        FieldKind::Array => {
            let element = spec.element.expect("array without element spec");
            if element.is_variable() {
                VariableShape::VariableArray
            } else {
                VariableShape::FixedArray
            }
        }
        _ => VariableShape::Scalar,
    }
}

/// Size of a field's entry in the variable object header.
pub fn header_size(spec: &ColumnSpec) -> usize {
    match variable_shape(spec) {
        VariableShape::Scalar | VariableShape::VariableArray => 8,
        VariableShape::FixedArray => 4,
    }
}

/// On-disk size of one fixed-size array element.
pub fn element_disk_size(element: &ElementSpec) -> usize {
    match element.kind {
        FieldKind::Int => 4,
        FieldKind::BigInt | FieldKind::Double => 8,
        FieldKind::Decimal => element.length as usize,
        _ => 0,
    }
}

/// A variable field encoded for storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedField {
    pub info: SizeInfo,
    pub bytes: Vec<u8>,
}

/// Encodes a non-null variable field, applying compression when the schema
/// asks for it and the compressed form is actually smaller.
pub fn encode_variable(spec: &ColumnSpec, value: &Value) -> Result<EncodedField> {
    match (variable_shape(spec), value) {
        (VariableShape::Scalar, _) => {
            let raw = match (spec.kind, value) {
                (FieldKind::String, Value::String(text)) => encode_string(text, spec.encoding),
                (FieldKind::Binary, Value::Binary(data)) => data.clone(),
                _ => {
                    return Err(RecordError::BadArgument(format!(
                        "value does not match variable column kind {:?}",
                        spec.kind
                    )));
                }
            };
            if spec.length != 0 && raw.len() > spec.length as usize {
                return Err(RecordError::BadArgument(format!(
                    "value of {} bytes exceeds the declared maximum of {}",
                    raw.len(),
                    spec.length
                )));
            }
            let uncompressed = raw.len() as u32;
            let stored = if spec.compressed {
                match rle::compress(&raw) {
                    Some(packed) if packed.len() < raw.len() => packed,
                    _ => raw,
                }
            } else {
                raw
            };
            Ok(EncodedField {
                info: SizeInfo::Scalar {
                    uncompressed,
                    stored: stored.len() as u32,
                },
                bytes: stored,
            })
        }
        (VariableShape::FixedArray, Value::Array(elements)) => {
            let element = spec.element.expect("array without element spec");
            let width = element_disk_size(&element);
            let mut bytes = vec![0u8; elements.len() * width];
            for (i, item) in elements.iter().enumerate() {
                write_element(&element, item, &mut bytes, i * width)?;
            }
            Ok(EncodedField {
                info: SizeInfo::FixedArray {
                    count: elements.len() as u32,
                },
                bytes,
            })
        }
        (VariableShape::VariableArray, Value::Array(elements)) => {
            let element = spec.element.expect("array without element spec");
            let mut bytes = Vec::new();
            for item in elements {
                let encoded = encode_array_element(&element, item)?;
                let mut len_bytes = [0u8; 4];
                write_le::<u32>(&mut len_bytes, 0, encoded.len() as u32)?;
                bytes.extend_from_slice(&len_bytes);
                bytes.extend_from_slice(&encoded);
            }
            Ok(EncodedField {
                info: SizeInfo::VariableArray {
                    count: elements.len() as u32,
                    total: bytes.len() as u32,
                },
                bytes,
            })
        }
        _ => Err(RecordError::BadArgument(format!(
            "value does not match variable column kind {:?}",
            spec.kind
        ))),
    }
}

/// Decodes a variable field from its stored bytes.
pub fn decode_variable(spec: &ColumnSpec, info: &SizeInfo, bytes: &[u8]) -> Result<Value> {
    match (variable_shape(spec), info) {
        (
            VariableShape::Scalar,
            SizeInfo::Scalar {
                uncompressed,
                stored,
            },
        ) => {
            let raw;
            let data: &[u8] = if stored < uncompressed {
                raw = rle::decompress(bytes, *uncompressed as usize)?;
                &raw
            } else {
                bytes
            };
            match spec.kind {
                FieldKind::String => Ok(Value::String(decode_string(data, spec.encoding)?)),
                FieldKind::Binary => Ok(Value::Binary(data.to_vec())),
                _ => Err(RecordError::Unexpected(format!(
                    "scalar size info on column kind {:?}",
                    spec.kind
                ))),
            }
        }
        (VariableShape::FixedArray, SizeInfo::FixedArray { count }) => {
            let element = spec.element.expect("array without element spec");
            let width = element_disk_size(&element);
            let mut elements = Vec::with_capacity(*count as usize);
            for i in 0..*count as usize {
                elements.push(read_element(&element, bytes, i * width)?);
            }
            Ok(Value::Array(elements))
        }
        (VariableShape::VariableArray, SizeInfo::VariableArray { count, .. }) => {
            let element = spec.element.expect("array without element spec");
            let mut elements = Vec::with_capacity(*count as usize);
            let mut offset = 0usize;
            for _ in 0..*count {
                let len = read_le::<u32>(bytes, offset)? as usize;
                offset += 4;
                let Some(slice) = bytes.get(offset..offset + len) else {
                    return Err(RecordError::Unexpected(
                        "array element overruns its stored bytes".into(),
                    ));
                };
                elements.push(decode_array_element(&element, slice)?);
                offset += len;
            }
            Ok(Value::Array(elements))
        }
        _ => Err(RecordError::Unexpected(
            "size info shape does not match the column".into(),
        )),
    }
}

fn write_element(element: &ElementSpec, value: &Value, bytes: &mut [u8], offset: usize) -> Result<()> {
    match (element.kind, value) {
        (FieldKind::Int, Value::Int(v)) => write_le::<i32>(bytes, offset, *v)?,
        (FieldKind::BigInt, Value::BigInt(v)) => write_le::<i64>(bytes, offset, *v)?,
        (FieldKind::Double, Value::Double(v)) => write_le::<u64>(bytes, offset, v.to_bits())?,
        (FieldKind::Decimal, Value::Decimal { unscaled, .. }) => {
            write_narrow_int(bytes, offset, *unscaled, element.length as usize)?;
        }
        _ => {
            return Err(RecordError::BadArgument(format!(
                "array element does not match element kind {:?}",
                element.kind
            )));
        }
    }
    Ok(())
}

fn read_element(element: &ElementSpec, bytes: &[u8], offset: usize) -> Result<Value> {
    Ok(match element.kind {
        FieldKind::Int => Value::Int(read_le::<i32>(bytes, offset)?),
        FieldKind::BigInt => Value::BigInt(read_le::<i64>(bytes, offset)?),
        FieldKind::Double => Value::Double(f64::from_bits(read_le::<u64>(bytes, offset)?)),
        FieldKind::Decimal => Value::Decimal {
            unscaled: read_narrow_int(bytes, offset, element.length as usize)?,
            scale: element.scale,
        },
        _ => {
            return Err(RecordError::Unexpected(format!(
                "element kind {:?} is not fixed-size",
                element.kind
            )));
        }
    })
}

fn encode_array_element(element: &ElementSpec, value: &Value) -> Result<Vec<u8>> {
    match (element.kind, value) {
        (FieldKind::String, Value::String(text)) => Ok(encode_string(text, element.encoding)),
        (FieldKind::Binary, Value::Binary(data)) => Ok(data.clone()),
        _ => Err(RecordError::BadArgument(format!(
            "array element does not match element kind {:?}",
            element.kind
        ))),
    }
}

fn decode_array_element(element: &ElementSpec, bytes: &[u8]) -> Result<Value> {
    match element.kind {
        FieldKind::String => Ok(Value::String(decode_string(bytes, element.encoding)?)),
        FieldKind::Binary => Ok(Value::Binary(bytes.to_vec())),
        _ => Err(RecordError::Unexpected(format!(
            "element kind {:?} is not variable-size",
            element.kind
        ))),
    }
}

fn encode_string(text: &str, encoding: EncodingForm) -> Vec<u8> {
    match encoding {
        EncodingForm::Utf8 => text.as_bytes().to_vec(),
        EncodingForm::Ucs2 => text
            .encode_utf16()
            .flat_map(|unit| unit.to_le_bytes())
            .collect(),
    }
}

fn decode_string(bytes: &[u8], encoding: EncodingForm) -> Result<String> {
    match encoding {
        EncodingForm::Utf8 => String::from_utf8(bytes.to_vec())
            .map_err(|_| RecordError::Unexpected("stored string is not valid utf-8".into())),
        EncodingForm::Ucs2 => {
            if bytes.len() % 2 != 0 {
                return Err(RecordError::Unexpected(
                    "stored ucs2 string has odd byte length".into(),
                ));
            }
            let units: Vec<u16> = bytes
                .chunks_exact(2)
                .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
                .collect();
            String::from_utf16(&units)
                .map_err(|_| RecordError::Unexpected("stored string is not valid utf-16".into()))
        }
    }
}

/// Writes a bounded string/binary value stored in the fixed part:
/// `[actual_len: u32][bytes][zero padding to capacity]`.
fn write_bounded(bytes: &mut [u8], offset: usize, data: &[u8], capacity: usize) -> Result<()> {
    if data.len() > capacity {
        return Err(RecordError::BadArgument(format!(
            "value of {} bytes exceeds the fixed capacity of {capacity}",
            data.len()
        )));
    }
    write_le::<u32>(bytes, offset, data.len() as u32)?;
    let start = offset + 4;
    let Some(region) = bytes.get_mut(start..start + capacity) else {
        return Err(RecordError::Unexpected("fixed field overruns its slot".into()));
    };
    region[..data.len()].copy_from_slice(data);
    region[data.len()..].fill(0);
    Ok(())
}

fn read_bounded(bytes: &[u8], offset: usize, capacity: usize) -> Result<&[u8]> {
    let len = read_le::<u32>(bytes, offset)? as usize;
    if len > capacity {
        return Err(RecordError::Unexpected(
            "stored length exceeds the fixed capacity".into(),
        ));
    }
    let start = offset + 4;
    bytes
        .get(start..start + len)
        .ok_or_else(|| RecordError::Unexpected("fixed field overruns its slot".into()))
}

/// Writes the low `width` bytes of `value` in two's complement, rejecting
/// values that do not fit.
fn write_narrow_int(bytes: &mut [u8], offset: usize, value: i64, width: usize) -> Result<()> {
    let full = value.to_le_bytes();
    if width >= 8 {
        let Some(region) = bytes.get_mut(offset..offset + width) else {
            return Err(RecordError::Unexpected("decimal overruns its slot".into()));
        };
        region[..8].copy_from_slice(&full);
        let fill = if value < 0 { 0xFF } else { 0x00 };
        region[8..].fill(fill);
        return Ok(());
    }
    // The value must survive truncation to `width` bytes.
    let min = -(1i64 << (width * 8 - 1));
    let max = (1i64 << (width * 8 - 1)) - 1;
    if value < min || value > max {
        return Err(RecordError::BadArgument(format!(
            "decimal value {value} does not fit in {width} bytes"
        )));
    }
    let Some(region) = bytes.get_mut(offset..offset + width) else {
        return Err(RecordError::Unexpected("decimal overruns its slot".into()));
    };
    region.copy_from_slice(&full[..width]);
    Ok(())
}

fn read_narrow_int(bytes: &[u8], offset: usize, width: usize) -> Result<i64> {
    let Some(region) = bytes.get(offset..offset + width) else {
        return Err(RecordError::Unexpected("decimal overruns its slot".into()));
    };
    let take = width.min(8);
    let negative = region[take - 1] & 0x80 != 0;
    let mut full = if negative { [0xFFu8; 8] } else { [0u8; 8] };
    full[..take].copy_from_slice(&region[..take]);
    Ok(i64::from_le_bytes(full))
}

/// Run-length coding of byte runs: `[run_len: u8][byte]` pairs.
///
/// Used for columns whose schema requests compression; the caller stores
/// the raw form whenever the packed form is not strictly smaller.
pub mod rle {
    use crate::errors::{RecordError, Result};

    /// Packs `data`; `None` when the packed form would not be smaller.
    pub fn compress(data: &[u8]) -> Option<Vec<u8>> {
        if data.is_empty() {
            return None;
        }
        let mut packed = Vec::with_capacity(data.len() / 2);
        let mut run_byte = data[0];
        let mut run_len = 0u16;
        for &byte in data {
            if byte == run_byte && run_len < 255 {
                run_len += 1;
            } else {
                packed.push(run_len as u8);
                packed.push(run_byte);
                run_byte = byte;
                run_len = 1;
            }
            if packed.len() >= data.len() {
                return None;
            }
        }
        packed.push(run_len as u8);
        packed.push(run_byte);
        (packed.len() < data.len()).then_some(packed)
    }

    /// Unpacks into exactly `expected_len` bytes.
    pub fn decompress(packed: &[u8], expected_len: usize) -> Result<Vec<u8>> {
        if packed.len() % 2 != 0 {
            return Err(RecordError::Unexpected(
                "compressed field has a truncated run".into(),
            ));
        }
        let mut data = Vec::with_capacity(expected_len);
        for pair in packed.chunks_exact(2) {
            data.extend(std::iter::repeat_n(pair[1], pair[0] as usize));
        }
        if data.len() != expected_len {
            return Err(RecordError::Unexpected(format!(
                "compressed field unpacked to {} bytes, expected {expected_len}",
                data.len()
            )));
        }
        Ok(data)
    }
}
