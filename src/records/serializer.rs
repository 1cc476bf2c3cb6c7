//! # Tuple Serialization
//!
//! Encodes a row of `FieldValue`s into the on-page byte format and back.
//! Two modes, chosen by the schema:
//!
//! - **Fixed-length**: header, then every field at its aligned offset.
//! - **Variable-length**: header, fixed fields at aligned offsets (variable
//!   columns skipped), padding to an 8-byte boundary, then each variable
//!   field as `u16 length + payload` at an absolute offset recorded in the
//!   header's offset table.
//!
//! All multi-byte values are little-endian. The tuple header's null bitmap
//! and offset table are authoritative; schema offsets are never consulted
//! here.

use eyre::{bail, ensure, Result};

use crate::records::header::{TupleHeader, NULL_VAR_OFFSET};
use crate::records::schema::Schema;
use crate::records::types::{align_offset, ColumnDef, DataType};
use crate::records::value::FieldValue;

/// Serializes with the mode matching the schema.
pub fn serialize(schema: &Schema, values: &[FieldValue], buf: &mut [u8]) -> Result<usize> {
    if schema.is_fixed_length() {
        serialize_fixed(schema, values, buf)
    } else {
        serialize_variable(schema, values, buf)
    }
}

/// Deserializes with the mode matching the schema.
pub fn deserialize(schema: &Schema, buf: &[u8]) -> Result<Vec<FieldValue>> {
    if schema.is_fixed_length() {
        deserialize_fixed(schema, buf)
    } else {
        deserialize_variable(schema, buf)
    }
}

pub fn serialize_fixed(schema: &Schema, values: &[FieldValue], buf: &mut [u8]) -> Result<usize> {
    ensure!(schema.is_finalized(), "schema must be finalized before serialization");
    ensure!(
        schema.is_fixed_length(),
        "use serialize_variable for variable-length schemas"
    );
    ensure!(
        values.len() == schema.column_count(),
        "value count {} does not match column count {}",
        values.len(),
        schema.column_count()
    );

    let mut header = TupleHeader::new(schema.column_count() as u16, 0);
    let header_size = header.size();
    ensure!(
        buf.len() >= header_size,
        "buffer too small for tuple header: {} < {header_size}",
        buf.len()
    );
    buf.fill(0);

    let mut cursor = header_size;
    for (i, col) in schema.columns().iter().enumerate() {
        cursor = align_offset(cursor, col.data_type());

        if values[i].is_null() {
            header.set_field_null(i as u16, true);
        } else {
            write_fixed_field(buf, cursor, col, &values[i])?;
        }
        cursor += col.fixed_size();
    }

    header.serialize_to(buf)?;
    Ok(cursor)
}

pub fn deserialize_fixed(schema: &Schema, buf: &[u8]) -> Result<Vec<FieldValue>> {
    ensure!(schema.is_finalized(), "schema must be finalized before deserialization");
    ensure!(
        schema.is_fixed_length(),
        "use deserialize_variable for variable-length schemas"
    );

    let header = TupleHeader::deserialize_from(buf, schema.column_count() as u16, 0)?;
    let mut result = Vec::with_capacity(schema.column_count());

    let mut cursor = header.size();
    for (i, col) in schema.columns().iter().enumerate() {
        cursor = align_offset(cursor, col.data_type());

        if header.is_field_null(i as u16) {
            result.push(FieldValue::Null(col.data_type()));
        } else {
            result.push(read_fixed_field(buf, cursor, col)?);
        }
        cursor += col.fixed_size();
    }

    Ok(result)
}

pub fn serialize_variable(schema: &Schema, values: &[FieldValue], buf: &mut [u8]) -> Result<usize> {
    ensure!(schema.is_finalized(), "schema must be finalized before serialization");
    ensure!(
        values.len() == schema.column_count(),
        "value count {} does not match column count {}",
        values.len(),
        schema.column_count()
    );

    let var_field_count = schema.var_column_count() as u16;
    let mut header = TupleHeader::new(schema.column_count() as u16, var_field_count);
    let header_size = header.size();
    ensure!(
        buf.len() >= header_size,
        "buffer too small for tuple header: {} < {header_size}",
        buf.len()
    );
    buf.fill(0);

    // First pass: fixed-length columns at aligned offsets. Variable columns
    // do not advance the cursor here.
    let mut cursor = header_size;
    for (i, col) in schema.columns().iter().enumerate() {
        if !col.is_fixed_length() {
            continue;
        }
        cursor = align_offset(cursor, col.data_type());

        if values[i].is_null() {
            header.set_field_null(i as u16, true);
        } else {
            write_fixed_field(buf, cursor, col, &values[i])?;
        }
        cursor += col.fixed_size();
    }

    // The variable area starts at the next 8-byte boundary.
    cursor = cursor.div_ceil(8) * 8;

    // Second pass: variable fields in schema order, each prefixed with a
    // u16 length, absolute offset recorded in the header.
    let mut var_index = 0u16;
    for (i, col) in schema.columns().iter().enumerate() {
        if col.is_fixed_length() {
            continue;
        }

        if values[i].is_null() {
            header.set_field_null(i as u16, true);
            header.set_var_offset(var_index, NULL_VAR_OFFSET);
        } else {
            ensure!(
                cursor < NULL_VAR_OFFSET as usize,
                "variable field offset {cursor} exceeds addressable range"
            );
            header.set_var_offset(var_index, cursor as u16);

            let payload: &[u8] = match col.data_type() {
                DataType::Char | DataType::VarChar | DataType::Text => {
                    values[i].get_string()?.as_bytes()
                }
                DataType::Blob => values[i].get_blob()?,
                other => bail!("unexpected fixed-length type {other:?} in variable field"),
            };
            ensure!(
                payload.len() <= u16::MAX as usize,
                "variable field of {} bytes exceeds u16 length prefix",
                payload.len()
            );
            ensure!(
                cursor + 2 + payload.len() <= buf.len(),
                "buffer too small for variable-length data"
            );

            let len = payload.len() as u16;
            buf[cursor..cursor + 2].copy_from_slice(&len.to_le_bytes());
            cursor += 2;
            buf[cursor..cursor + payload.len()].copy_from_slice(payload);
            cursor += payload.len();
        }
        var_index += 1;
    }

    header.serialize_to(buf)?;
    Ok(cursor)
}

pub fn deserialize_variable(schema: &Schema, buf: &[u8]) -> Result<Vec<FieldValue>> {
    ensure!(schema.is_finalized(), "schema must be finalized before deserialization");

    let var_field_count = schema.var_column_count() as u16;
    let header =
        TupleHeader::deserialize_from(buf, schema.column_count() as u16, var_field_count)?;
    let mut result = Vec::with_capacity(schema.column_count());

    let mut cursor = header.size();
    let mut var_index = 0u16;
    for (i, col) in schema.columns().iter().enumerate() {
        if col.is_fixed_length() {
            cursor = align_offset(cursor, col.data_type());

            if header.is_field_null(i as u16) {
                result.push(FieldValue::Null(col.data_type()));
            } else {
                result.push(read_fixed_field(buf, cursor, col)?);
            }
            cursor += col.fixed_size();
        } else {
            if header.is_field_null(i as u16) {
                result.push(FieldValue::Null(col.data_type()));
            } else {
                let offset = header.var_offset(var_index);
                if offset == NULL_VAR_OFFSET {
                    result.push(FieldValue::Null(col.data_type()));
                } else {
                    result.push(read_var_field(buf, offset as usize, col)?);
                }
            }
            var_index += 1;
        }
    }

    Ok(result)
}

/// Exact serialized size of a row, for buffer sizing. Accounts for the
/// 8-byte alignment of the variable area.
pub fn serialized_size(schema: &Schema, values: &[FieldValue]) -> Result<usize> {
    ensure!(schema.is_finalized(), "schema must be finalized");
    ensure!(
        values.len() == schema.column_count(),
        "value count {} does not match column count {}",
        values.len(),
        schema.column_count()
    );

    let var_field_count = schema.var_column_count() as u16;
    let mut size = TupleHeader::calculate_size(var_field_count);

    for col in schema.columns() {
        if col.is_fixed_length() {
            size = align_offset(size, col.data_type());
            size += col.fixed_size();
        }
    }

    if var_field_count > 0 {
        size = size.div_ceil(8) * 8;
        for (col, value) in schema.columns().iter().zip(values) {
            if !col.is_fixed_length() && !value.is_null() {
                size += value.serialized_size();
            }
        }
    }

    Ok(size)
}

fn write_fixed_field(buf: &mut [u8], offset: usize, col: &ColumnDef, value: &FieldValue) -> Result<()> {
    let size = col.fixed_size();
    ensure!(
        offset + size <= buf.len(),
        "buffer too small for tuple data: need {} bytes",
        offset + size
    );

    match col.data_type() {
        DataType::Boolean => buf[offset] = value.get_boolean()? as u8,
        DataType::TinyInt => buf[offset] = value.get_tiny_int()? as u8,
        DataType::SmallInt => {
            buf[offset..offset + 2].copy_from_slice(&value.get_small_int()?.to_le_bytes())
        }
        DataType::Integer => {
            buf[offset..offset + 4].copy_from_slice(&value.get_integer()?.to_le_bytes())
        }
        DataType::BigInt => {
            buf[offset..offset + 8].copy_from_slice(&value.get_big_int()?.to_le_bytes())
        }
        DataType::Float => {
            buf[offset..offset + 4].copy_from_slice(&value.get_float()?.to_le_bytes())
        }
        DataType::Double => {
            buf[offset..offset + 8].copy_from_slice(&value.get_double()?.to_le_bytes())
        }
        DataType::Char => {
            // Truncate to the declared width; shorter values keep the
            // zeroed tail as padding.
            let bytes = value.get_string()?.as_bytes();
            let n = bytes.len().min(size);
            buf[offset..offset + n].copy_from_slice(&bytes[..n]);
        }
        other => bail!("unexpected variable-length type {other:?} in fixed field write"),
    }
    Ok(())
}

fn read_fixed_field(buf: &[u8], offset: usize, col: &ColumnDef) -> Result<FieldValue> {
    let size = col.fixed_size();
    ensure!(
        offset + size <= buf.len(),
        "buffer too small for tuple data: need {} bytes",
        offset + size
    );

    let value = match col.data_type() {
        DataType::Boolean => FieldValue::Boolean(buf[offset] != 0),
        DataType::TinyInt => FieldValue::TinyInt(buf[offset] as i8),
        DataType::SmallInt => FieldValue::SmallInt(i16::from_le_bytes([
            buf[offset],
            buf[offset + 1],
        ])),
        DataType::Integer => FieldValue::Integer(i32::from_le_bytes(
            buf[offset..offset + 4].try_into().expect("4-byte slice"), // INVARIANT: bounds checked above
        )),
        DataType::BigInt => FieldValue::BigInt(i64::from_le_bytes(
            buf[offset..offset + 8].try_into().expect("8-byte slice"), // INVARIANT: bounds checked above
        )),
        DataType::Float => FieldValue::Float(f32::from_le_bytes(
            buf[offset..offset + 4].try_into().expect("4-byte slice"), // INVARIANT: bounds checked above
        )),
        DataType::Double => FieldValue::Double(f64::from_le_bytes(
            buf[offset..offset + 8].try_into().expect("8-byte slice"), // INVARIANT: bounds checked above
        )),
        DataType::Char => {
            // Fixed CHAR trims at the first zero byte.
            let raw = &buf[offset..offset + size];
            let end = raw.iter().position(|&b| b == 0).unwrap_or(size);
            let s = std::str::from_utf8(&raw[..end])
                .map_err(|e| eyre::eyre!("invalid utf-8 in CHAR field: {e}"))?;
            FieldValue::Char(s.to_string())
        }
        other => bail!("unexpected variable-length type {other:?} in fixed field read"),
    };
    Ok(value)
}

fn read_var_field(buf: &[u8], offset: usize, col: &ColumnDef) -> Result<FieldValue> {
    ensure!(
        offset + 2 <= buf.len(),
        "variable field offset {offset} out of bounds"
    );
    let len = u16::from_le_bytes([buf[offset], buf[offset + 1]]) as usize;
    let start = offset + 2;
    ensure!(
        start + len <= buf.len(),
        "variable field of {len} bytes at {offset} out of bounds"
    );
    let raw = &buf[start..start + len];

    let value = match col.data_type() {
        DataType::Char | DataType::VarChar | DataType::Text => {
            let s = std::str::from_utf8(raw)
                .map_err(|e| eyre::eyre!("invalid utf-8 in string field: {e}"))?
                .to_string();
            match col.data_type() {
                DataType::Char => FieldValue::Char(s),
                DataType::VarChar => FieldValue::VarChar(s),
                _ => FieldValue::Text(s),
            }
        }
        DataType::Blob => FieldValue::Blob(raw.to_vec()),
        other => bail!("unexpected fixed-length type {other:?} in variable field read"),
    };
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixed_schema() -> Schema {
        let mut schema = Schema::new();
        schema.add_column("flag", DataType::Boolean, false, 0).unwrap();
        schema.add_column("count", DataType::Integer, false, 0).unwrap();
        schema.add_column("total", DataType::Double, true, 0).unwrap();
        schema.add_column("code", DataType::Char, false, 8).unwrap();
        schema.finalize().unwrap();
        schema
    }

    fn mixed_schema() -> Schema {
        let mut schema = Schema::new();
        schema.add_column("id", DataType::Integer, false, 0).unwrap();
        schema.add_column("name", DataType::VarChar, false, 100).unwrap();
        schema.add_column("salary", DataType::Double, false, 0).unwrap();
        schema.add_column("department", DataType::VarChar, true, 50).unwrap();
        schema.finalize().unwrap();
        schema
    }

    #[test]
    fn fixed_round_trip() {
        let schema = fixed_schema();
        let values = vec![
            FieldValue::Boolean(true),
            FieldValue::Integer(42),
            FieldValue::Double(3.25),
            FieldValue::Char("AB".into()),
        ];

        let mut buf = vec![0u8; 64];
        let size = serialize_fixed(&schema, &values, &mut buf).unwrap();
        assert!(size > 8);

        let decoded = deserialize_fixed(&schema, &buf).unwrap();
        assert_eq!(decoded, values);
    }

    #[test]
    fn fixed_null_round_trip() {
        let schema = fixed_schema();
        let values = vec![
            FieldValue::Boolean(false),
            FieldValue::Integer(-1),
            FieldValue::Null(DataType::Double),
            FieldValue::Char("x".into()),
        ];

        let mut buf = vec![0u8; 64];
        serialize_fixed(&schema, &values, &mut buf).unwrap();
        let decoded = deserialize_fixed(&schema, &buf).unwrap();
        assert!(decoded[2].is_null());
        assert_eq!(decoded, values);
    }

    #[test]
    fn fixed_alignment_positions() {
        let schema = fixed_schema();
        let values = vec![
            FieldValue::Boolean(true),
            FieldValue::Integer(0x0403_0201),
            FieldValue::Double(0.0),
            FieldValue::Char("Z".into()),
        ];

        let mut buf = vec![0u8; 64];
        // header 8 bytes, boolean at 8, integer aligned to 12, double at 16,
        // char at 24
        serialize_fixed(&schema, &values, &mut buf).unwrap();
        assert_eq!(buf[8], 1);
        assert_eq!(&buf[12..16], &[1, 2, 3, 4]);
        assert_eq!(buf[24], b'Z');
    }

    #[test]
    fn variable_round_trip() {
        let schema = mixed_schema();
        let values = vec![
            FieldValue::Integer(1001),
            FieldValue::VarChar("Alice Johnson".into()),
            FieldValue::Double(75000.50),
            FieldValue::VarChar("Engineering".into()),
        ];

        let mut buf = vec![0u8; 256];
        let size = serialize_variable(&schema, &values, &mut buf).unwrap();
        assert_eq!(size, serialized_size(&schema, &values).unwrap());

        let decoded = deserialize_variable(&schema, &buf).unwrap();
        assert_eq!(decoded, values);
    }

    #[test]
    fn variable_null_round_trip() {
        let schema = mixed_schema();
        let values = vec![
            FieldValue::Integer(7),
            FieldValue::VarChar("Bob".into()),
            FieldValue::Double(1.0),
            FieldValue::Null(DataType::VarChar),
        ];

        let mut buf = vec![0u8; 128];
        serialize_variable(&schema, &values, &mut buf).unwrap();
        let decoded = deserialize_variable(&schema, &buf).unwrap();
        assert!(decoded[3].is_null());
        assert_eq!(decoded, values);
    }

    #[test]
    fn variable_area_is_eight_byte_aligned() {
        let schema = mixed_schema();
        let values = vec![
            FieldValue::Integer(1),
            FieldValue::VarChar("a".into()),
            FieldValue::Double(2.0),
            FieldValue::VarChar("b".into()),
        ];

        let mut buf = vec![0u8; 128];
        serialize_variable(&schema, &values, &mut buf).unwrap();
        let header = TupleHeader::deserialize_from(&buf, 4, 2).unwrap();
        assert_eq!(header.var_offset(0) % 8, 0);
    }

    #[test]
    fn empty_string_round_trips() {
        let schema = mixed_schema();
        let values = vec![
            FieldValue::Integer(1),
            FieldValue::VarChar(String::new()),
            FieldValue::Double(0.0),
            FieldValue::VarChar("d".into()),
        ];

        let mut buf = vec![0u8; 128];
        serialize_variable(&schema, &values, &mut buf).unwrap();
        let decoded = deserialize_variable(&schema, &buf).unwrap();
        assert_eq!(decoded[1], FieldValue::VarChar(String::new()));
    }

    #[test]
    fn wrong_mode_fails() {
        let schema = mixed_schema();
        let values = vec![
            FieldValue::Integer(1),
            FieldValue::VarChar("x".into()),
            FieldValue::Double(0.0),
            FieldValue::Null(DataType::VarChar),
        ];
        let mut buf = vec![0u8; 128];
        let err = serialize_fixed(&schema, &values, &mut buf).unwrap_err();
        assert!(err.to_string().contains("serialize_variable"));
    }

    #[test]
    fn unfinalized_schema_fails() {
        let mut schema = Schema::new();
        schema.add_column("id", DataType::Integer, false, 0).unwrap();
        let mut buf = vec![0u8; 32];
        let err = serialize(&schema, &[FieldValue::Integer(1)], &mut buf).unwrap_err();
        assert!(err.to_string().contains("finalized"));
    }

    #[test]
    fn value_count_mismatch_fails() {
        let schema = fixed_schema();
        let mut buf = vec![0u8; 64];
        let err = serialize_fixed(&schema, &[FieldValue::Boolean(true)], &mut buf).unwrap_err();
        assert!(err.to_string().contains("value count"));
    }

    #[test]
    fn buffer_too_small_fails() {
        let schema = mixed_schema();
        let values = vec![
            FieldValue::Integer(1),
            FieldValue::VarChar("a long enough name to overflow".into()),
            FieldValue::Double(0.0),
            FieldValue::Null(DataType::VarChar),
        ];
        let mut buf = vec![0u8; 32];
        let err = serialize_variable(&schema, &values, &mut buf).unwrap_err();
        assert!(err.to_string().contains("too small"));
    }

    #[test]
    fn char_truncates_to_declared_width() {
        let schema = fixed_schema();
        let values = vec![
            FieldValue::Boolean(true),
            FieldValue::Integer(0),
            FieldValue::Double(0.0),
            FieldValue::Char("exactly-nine".into()),
        ];

        let mut buf = vec![0u8; 64];
        serialize_fixed(&schema, &values, &mut buf).unwrap();
        let decoded = deserialize_fixed(&schema, &buf).unwrap();
        assert_eq!(decoded[3], FieldValue::Char("exactly-".into()));
    }

    #[test]
    fn blob_round_trip() {
        let mut schema = Schema::new();
        schema.add_column("id", DataType::Integer, false, 0).unwrap();
        schema.add_column("payload", DataType::Blob, false, 0).unwrap();
        schema.finalize().unwrap();

        let values = vec![
            FieldValue::Integer(5),
            FieldValue::Blob(vec![0xDE, 0xAD, 0xBE, 0xEF]),
        ];
        let mut buf = vec![0u8; 64];
        serialize(&schema, &values, &mut buf).unwrap();
        let decoded = deserialize(&schema, &buf).unwrap();
        assert_eq!(decoded, values);
    }

    #[test]
    fn serialized_size_matches_fixed_serialize() {
        let schema = fixed_schema();
        let values = vec![
            FieldValue::Boolean(true),
            FieldValue::Integer(9),
            FieldValue::Double(1.5),
            FieldValue::Char("ab".into()),
        ];
        let mut buf = vec![0u8; 64];
        let size = serialize_fixed(&schema, &values, &mut buf).unwrap();
        assert_eq!(size, serialized_size(&schema, &values).unwrap());
    }
}
