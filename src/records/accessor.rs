//! # TupleAccessor - Typed Column Reads
//!
//! Borrows a serialized tuple buffer and its schema. The tuple header is
//! decoded eagerly so `is_null` never touches the field data; the full
//! value vector is materialized lazily on the first typed read and cached
//! for the accessor's lifetime.
//!
//! The accessor holds a non-owning borrow: the buffer must outlive it,
//! which the borrow checker enforces.

use std::cell::OnceCell;

use eyre::{bail, ensure, Result};

use crate::records::header::TupleHeader;
use crate::records::schema::Schema;
use crate::records::serializer;
use crate::records::types::DataType;
use crate::records::value::FieldValue;

pub struct TupleAccessor<'a> {
    schema: &'a Schema,
    buffer: &'a [u8],
    header: TupleHeader,
    values: OnceCell<Vec<FieldValue>>,
}

impl<'a> TupleAccessor<'a> {
    pub fn new(schema: &'a Schema, buffer: &'a [u8]) -> Result<Self> {
        ensure!(schema.is_finalized(), "schema must be finalized");

        let header = TupleHeader::deserialize_from(
            buffer,
            schema.column_count() as u16,
            schema.var_column_count() as u16,
        )?;

        Ok(Self {
            schema,
            buffer,
            header,
            values: OnceCell::new(),
        })
    }

    fn materialize(&self) -> Result<&[FieldValue]> {
        if let Some(values) = self.values.get() {
            return Ok(values);
        }
        let decoded = serializer::deserialize(self.schema, self.buffer)?;
        Ok(self.values.get_or_init(|| decoded))
    }

    fn check_index(&self, index: usize) -> Result<()> {
        ensure!(
            index < self.schema.column_count(),
            "field index {index} out of bounds"
        );
        Ok(())
    }

    fn check_type_at(&self, index: usize, expected: DataType) -> Result<()> {
        self.check_index(index)?;
        let col = &self.schema.columns()[index];
        ensure!(
            col.data_type() == expected,
            "type mismatch for column {}: expected {expected:?}, found {:?}",
            col.name(),
            col.data_type()
        );
        Ok(())
    }

    /// Null check from the header alone; does not materialize field values.
    pub fn is_null_at(&self, index: usize) -> Result<bool> {
        self.check_index(index)?;
        Ok(self.header.is_field_null(index as u16))
    }

    pub fn is_null(&self, column: &str) -> Result<bool> {
        self.is_null_at(self.schema.column_index(column)?)
    }

    pub fn get_boolean_at(&self, index: usize) -> Result<bool> {
        self.check_type_at(index, DataType::Boolean)?;
        self.materialize()?[index].get_boolean()
    }

    pub fn get_boolean(&self, column: &str) -> Result<bool> {
        self.get_boolean_at(self.schema.column_index(column)?)
    }

    pub fn get_tiny_int_at(&self, index: usize) -> Result<i8> {
        self.check_type_at(index, DataType::TinyInt)?;
        self.materialize()?[index].get_tiny_int()
    }

    pub fn get_tiny_int(&self, column: &str) -> Result<i8> {
        self.get_tiny_int_at(self.schema.column_index(column)?)
    }

    pub fn get_small_int_at(&self, index: usize) -> Result<i16> {
        self.check_type_at(index, DataType::SmallInt)?;
        self.materialize()?[index].get_small_int()
    }

    pub fn get_small_int(&self, column: &str) -> Result<i16> {
        self.get_small_int_at(self.schema.column_index(column)?)
    }

    pub fn get_integer_at(&self, index: usize) -> Result<i32> {
        self.check_type_at(index, DataType::Integer)?;
        self.materialize()?[index].get_integer()
    }

    pub fn get_integer(&self, column: &str) -> Result<i32> {
        self.get_integer_at(self.schema.column_index(column)?)
    }

    pub fn get_big_int_at(&self, index: usize) -> Result<i64> {
        self.check_type_at(index, DataType::BigInt)?;
        self.materialize()?[index].get_big_int()
    }

    pub fn get_big_int(&self, column: &str) -> Result<i64> {
        self.get_big_int_at(self.schema.column_index(column)?)
    }

    pub fn get_float_at(&self, index: usize) -> Result<f32> {
        self.check_type_at(index, DataType::Float)?;
        self.materialize()?[index].get_float()
    }

    pub fn get_float(&self, column: &str) -> Result<f32> {
        self.get_float_at(self.schema.column_index(column)?)
    }

    pub fn get_double_at(&self, index: usize) -> Result<f64> {
        self.check_type_at(index, DataType::Double)?;
        self.materialize()?[index].get_double()
    }

    pub fn get_double(&self, column: &str) -> Result<f64> {
        self.get_double_at(self.schema.column_index(column)?)
    }

    pub fn get_string_at(&self, index: usize) -> Result<&str> {
        self.check_index(index)?;
        let col = &self.schema.columns()[index];
        if !col.data_type().is_string() {
            bail!(
                "type mismatch for column {}: expected string type, found {:?}",
                col.name(),
                col.data_type()
            );
        }
        self.materialize()?[index].get_string()
    }

    pub fn get_string(&self, column: &str) -> Result<&str> {
        self.get_string_at(self.schema.column_index(column)?)
    }

    pub fn get_blob_at(&self, index: usize) -> Result<&[u8]> {
        self.check_type_at(index, DataType::Blob)?;
        self.materialize()?[index].get_blob()
    }

    pub fn get_blob(&self, column: &str) -> Result<&[u8]> {
        self.get_blob_at(self.schema.column_index(column)?)
    }

    pub fn field_value_at(&self, index: usize) -> Result<FieldValue> {
        self.check_index(index)?;
        Ok(self.materialize()?[index].clone())
    }

    pub fn field_value(&self, column: &str) -> Result<FieldValue> {
        self.field_value_at(self.schema.column_index(column)?)
    }
}
