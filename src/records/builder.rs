//! # TupleBuilder - Staged Row Construction
//!
//! Stages per-column values with type and nullability validation, then
//! produces the `FieldValue` row for the serializer. The builder borrows
//! its schema and supports `reset` for reuse across rows.
//!
//! ## Usage
//!
//! ```ignore
//! let mut builder = TupleBuilder::new(&schema)?;
//! builder.set_integer("id", 1001)?;
//! builder.set_varchar("name", "Alice Johnson")?;
//! let values = builder.build()?;
//! ```

use eyre::{bail, ensure, Result};

use crate::records::schema::Schema;
use crate::records::types::DataType;
use crate::records::value::FieldValue;

#[derive(Debug)]
pub struct TupleBuilder<'a> {
    schema: &'a Schema,
    values: Vec<Option<FieldValue>>,
}

impl<'a> TupleBuilder<'a> {
    pub fn new(schema: &'a Schema) -> Result<Self> {
        ensure!(schema.is_finalized(), "schema must be finalized");
        Ok(Self {
            schema,
            values: vec![None; schema.column_count()],
        })
    }

    pub fn reset(&mut self) {
        for v in &mut self.values {
            *v = None;
        }
    }

    fn check_type(&self, index: usize, expected: DataType) -> Result<()> {
        let col = match self.schema.column(index) {
            Some(col) => col,
            None => bail!("field index {index} out of bounds"),
        };
        ensure!(
            col.data_type() == expected,
            "type mismatch for column {}: expected {:?}, got {expected:?}",
            col.name(),
            col.data_type()
        );
        Ok(())
    }

    /// Stages a value at a field index, validating its type against the
    /// schema. Nulls are validated against column nullability.
    pub fn set_at(&mut self, index: usize, value: FieldValue) -> Result<&mut Self> {
        let col = match self.schema.column(index) {
            Some(col) => col,
            None => bail!("field index {index} out of bounds"),
        };
        if value.is_null() {
            ensure!(
                col.nullable(),
                "cannot set NULL on non-nullable column {}",
                col.name()
            );
        } else {
            ensure!(
                value.data_type() == col.data_type(),
                "type mismatch for column {}: expected {:?}, got {:?}",
                col.name(),
                col.data_type(),
                value.data_type()
            );
        }
        self.values[index] = Some(value);
        Ok(self)
    }

    pub fn set_null(&mut self, column: &str) -> Result<&mut Self> {
        let index = self.schema.column_index(column)?;
        let ty = self.schema.column(index).map(|c| c.data_type());
        match ty {
            Some(ty) => self.set_at(index, FieldValue::Null(ty)),
            None => bail!("field index {index} out of bounds"),
        }
    }

    pub fn set_boolean(&mut self, column: &str, value: bool) -> Result<&mut Self> {
        let index = self.schema.column_index(column)?;
        self.check_type(index, DataType::Boolean)?;
        self.set_at(index, FieldValue::Boolean(value))
    }

    pub fn set_tiny_int(&mut self, column: &str, value: i8) -> Result<&mut Self> {
        let index = self.schema.column_index(column)?;
        self.check_type(index, DataType::TinyInt)?;
        self.set_at(index, FieldValue::TinyInt(value))
    }

    pub fn set_small_int(&mut self, column: &str, value: i16) -> Result<&mut Self> {
        let index = self.schema.column_index(column)?;
        self.check_type(index, DataType::SmallInt)?;
        self.set_at(index, FieldValue::SmallInt(value))
    }

    pub fn set_integer(&mut self, column: &str, value: i32) -> Result<&mut Self> {
        let index = self.schema.column_index(column)?;
        self.check_type(index, DataType::Integer)?;
        self.set_at(index, FieldValue::Integer(value))
    }

    pub fn set_big_int(&mut self, column: &str, value: i64) -> Result<&mut Self> {
        let index = self.schema.column_index(column)?;
        self.check_type(index, DataType::BigInt)?;
        self.set_at(index, FieldValue::BigInt(value))
    }

    pub fn set_float(&mut self, column: &str, value: f32) -> Result<&mut Self> {
        let index = self.schema.column_index(column)?;
        self.check_type(index, DataType::Float)?;
        self.set_at(index, FieldValue::Float(value))
    }

    pub fn set_double(&mut self, column: &str, value: f64) -> Result<&mut Self> {
        let index = self.schema.column_index(column)?;
        self.check_type(index, DataType::Double)?;
        self.set_at(index, FieldValue::Double(value))
    }

    pub fn set_char(&mut self, column: &str, value: &str) -> Result<&mut Self> {
        let index = self.schema.column_index(column)?;
        self.check_type(index, DataType::Char)?;
        self.set_at(index, FieldValue::Char(value.to_string()))
    }

    pub fn set_varchar(&mut self, column: &str, value: &str) -> Result<&mut Self> {
        let index = self.schema.column_index(column)?;
        self.check_type(index, DataType::VarChar)?;
        let col = &self.schema.columns()[index];
        if col.max_size() > 0 {
            ensure!(
                value.len() <= col.max_size(),
                "value length {} exceeds VARCHAR({}) limit for column {}",
                value.len(),
                col.max_size(),
                col.name()
            );
        }
        self.set_at(index, FieldValue::VarChar(value.to_string()))
    }

    pub fn set_text(&mut self, column: &str, value: &str) -> Result<&mut Self> {
        let index = self.schema.column_index(column)?;
        self.check_type(index, DataType::Text)?;
        self.set_at(index, FieldValue::Text(value.to_string()))
    }

    pub fn set_blob(&mut self, column: &str, value: &[u8]) -> Result<&mut Self> {
        let index = self.schema.column_index(column)?;
        self.check_type(index, DataType::Blob)?;
        self.set_at(index, FieldValue::Blob(value.to_vec()))
    }

    /// Produces the staged row. Every non-nullable column must have been
    /// set; unset nullable columns become typed nulls.
    pub fn build(&self) -> Result<Vec<FieldValue>> {
        for (i, col) in self.schema.columns().iter().enumerate() {
            if !col.nullable() && self.values[i].is_none() {
                bail!("non-nullable column not set: {}", col.name());
            }
        }

        let result = self
            .schema
            .columns()
            .iter()
            .zip(&self.values)
            .map(|(col, staged)| match staged {
                Some(v) => v.clone(),
                None => FieldValue::Null(col.data_type()),
            })
            .collect();
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> Schema {
        let mut schema = Schema::new();
        schema.add_column("id", DataType::Integer, false, 0).unwrap();
        schema.add_column("name", DataType::VarChar, false, 20).unwrap();
        schema.add_column("note", DataType::Text, true, 0).unwrap();
        schema.finalize().unwrap();
        schema
    }

    #[test]
    fn build_collects_staged_values() {
        let schema = schema();
        let mut builder = TupleBuilder::new(&schema).unwrap();
        builder.set_integer("id", 1).unwrap();
        builder.set_varchar("name", "abc").unwrap();
        builder.set_text("note", "hi").unwrap();

        let values = builder.build().unwrap();
        assert_eq!(values[0], FieldValue::Integer(1));
        assert_eq!(values[1], FieldValue::VarChar("abc".into()));
        assert_eq!(values[2], FieldValue::Text("hi".into()));
    }

    #[test]
    fn unset_nullable_becomes_null() {
        let schema = schema();
        let mut builder = TupleBuilder::new(&schema).unwrap();
        builder.set_integer("id", 1).unwrap();
        builder.set_varchar("name", "abc").unwrap();

        let values = builder.build().unwrap();
        assert_eq!(values[2], FieldValue::Null(DataType::Text));
    }

    #[test]
    fn missing_non_nullable_fails() {
        let schema = schema();
        let mut builder = TupleBuilder::new(&schema).unwrap();
        builder.set_integer("id", 1).unwrap();

        let err = builder.build().unwrap_err();
        assert!(err.to_string().contains("name"));
    }

    #[test]
    fn null_on_non_nullable_fails() {
        let schema = schema();
        let mut builder = TupleBuilder::new(&schema).unwrap();
        assert!(builder.set_null("id").is_err());
        assert!(builder.set_null("note").is_ok());
    }

    #[test]
    fn type_mismatch_fails() {
        let schema = schema();
        let mut builder = TupleBuilder::new(&schema).unwrap();
        assert!(builder.set_double("id", 1.0).is_err());
        assert!(builder.set_at(0, FieldValue::BigInt(1)).is_err());
    }

    #[test]
    fn varchar_limit_enforced() {
        let schema = schema();
        let mut builder = TupleBuilder::new(&schema).unwrap();
        let err = builder
            .set_varchar("name", "far far far too long for twenty")
            .unwrap_err();
        assert!(err.to_string().contains("exceeds"));
    }

    #[test]
    fn reset_clears_staged_values() {
        let schema = schema();
        let mut builder = TupleBuilder::new(&schema).unwrap();
        builder.set_integer("id", 1).unwrap();
        builder.reset();
        assert!(builder.build().is_err());
    }

    #[test]
    fn unknown_column_fails() {
        let schema = schema();
        let mut builder = TupleBuilder::new(&schema).unwrap();
        assert!(builder.set_integer("missing", 1).is_err());
    }
}
