//! # Schema Definition
//!
//! A `Schema` is an ordered list of column definitions. `finalize` computes
//! the aligned column offsets, the fixed tuple size, and the null bitmap
//! size; after that the schema is immutable and ready for the serializer
//! and accessor.
//!
//! Column offsets are informational: the serializer derives its layout from
//! the tuple header, which is authoritative for the wire format.

use eyre::{bail, ensure, Result};
use hashbrown::HashMap;

use crate::records::types::{align_offset, ColumnDef, DataType};

/// Columns are addressed by a 64-bit null bitmap in the tuple header, which
/// caps a schema at 64 columns.
pub const MAX_COLUMNS: usize = 64;

#[derive(Debug, Clone, Default)]
pub struct Schema {
    columns: Vec<ColumnDef>,
    by_name: HashMap<String, usize>,
    nullable_count: u16,
    null_bitmap_size: usize,
    tuple_size: usize,
    is_fixed_length: bool,
    finalized: bool,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a column. `size_param` is the declared width for `Char` and
    /// the advisory maximum for variable-length types.
    pub fn add_column(
        &mut self,
        name: &str,
        data_type: DataType,
        nullable: bool,
        size_param: usize,
    ) -> Result<()> {
        ensure!(!self.finalized, "cannot add column to a finalized schema");
        ensure!(
            !self.by_name.contains_key(name),
            "duplicate column name: {name}"
        );

        let mut col = ColumnDef::new(name, data_type, nullable, size_param);
        col.field_index = self.columns.len() as u16;
        self.by_name.insert(name.to_string(), self.columns.len());
        self.columns.push(col);

        if nullable {
            self.nullable_count += 1;
        }
        Ok(())
    }

    /// Computes offsets and layout metadata. Idempotent; must be called
    /// before the schema is handed to a serializer, builder, or accessor.
    pub fn finalize(&mut self) -> Result<()> {
        if self.finalized {
            return Ok(());
        }
        ensure!(
            self.columns.len() <= MAX_COLUMNS,
            "schema has {} columns, maximum is {MAX_COLUMNS}",
            self.columns.len()
        );

        self.null_bitmap_size = (self.nullable_count as usize).div_ceil(8);

        let mut offset = self.null_bitmap_size;
        let mut all_fixed = true;

        for col in &mut self.columns {
            offset = align_offset(offset, col.data_type);
            col.offset = offset;

            if col.fixed_size == 0 {
                all_fixed = false;
            }
            offset += col.fixed_size;
        }

        self.is_fixed_length = all_fixed;
        self.tuple_size = offset;
        self.finalized = true;
        Ok(())
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    pub fn is_fixed_length(&self) -> bool {
        self.is_fixed_length
    }

    /// Fixed tuple size; only meaningful after `finalize` and only for
    /// fully fixed-length schemas.
    pub fn tuple_size(&self) -> usize {
        self.tuple_size
    }

    pub fn null_bitmap_size(&self) -> usize {
        self.null_bitmap_size
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn var_column_count(&self) -> usize {
        self.columns.iter().filter(|c| !c.is_fixed_length()).count()
    }

    pub fn column(&self, index: usize) -> Option<&ColumnDef> {
        self.columns.get(index)
    }

    pub fn columns(&self) -> &[ColumnDef] {
        &self.columns
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    pub fn column_index(&self, name: &str) -> Result<usize> {
        match self.by_name.get(name) {
            Some(idx) => Ok(*idx),
            None => bail!("column not found: {name}"),
        }
    }

    pub fn column_by_name(&self, name: &str) -> Result<&ColumnDef> {
        let idx = self.column_index(name)?;
        Ok(&self.columns[idx])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_schema() -> Schema {
        let mut schema = Schema::new();
        schema.add_column("id", DataType::Integer, false, 0).unwrap();
        schema.add_column("name", DataType::VarChar, false, 100).unwrap();
        schema.add_column("salary", DataType::Double, false, 0).unwrap();
        schema.add_column("department", DataType::VarChar, true, 50).unwrap();
        schema.finalize().unwrap();
        schema
    }

    #[test]
    fn finalize_computes_aligned_offsets() {
        let mut schema = Schema::new();
        schema.add_column("flag", DataType::Boolean, false, 0).unwrap();
        schema.add_column("count", DataType::Integer, false, 0).unwrap();
        schema.add_column("total", DataType::Double, false, 0).unwrap();
        schema.finalize().unwrap();

        // bitmap 0 bytes, boolean at 0, integer aligned to 4, double to 8
        assert_eq!(schema.column(0).unwrap().offset(), 0);
        assert_eq!(schema.column(1).unwrap().offset(), 4);
        assert_eq!(schema.column(2).unwrap().offset(), 8);
        assert_eq!(schema.tuple_size(), 16);
        assert!(schema.is_fixed_length());
    }

    #[test]
    fn variable_columns_clear_fixed_length() {
        let schema = sample_schema();
        assert!(!schema.is_fixed_length());
        assert_eq!(schema.var_column_count(), 2);
        assert_eq!(schema.null_bitmap_size(), 1);
    }

    #[test]
    fn finalize_is_idempotent() {
        let mut schema = sample_schema();
        let size = schema.tuple_size();
        schema.finalize().unwrap();
        assert_eq!(schema.tuple_size(), size);
    }

    #[test]
    fn add_column_after_finalize_fails() {
        let mut schema = sample_schema();
        let err = schema
            .add_column("extra", DataType::Integer, false, 0)
            .unwrap_err();
        assert!(err.to_string().contains("finalized"));
    }

    #[test]
    fn too_many_columns_rejected() {
        let mut schema = Schema::new();
        for i in 0..65 {
            schema
                .add_column(&format!("c{i}"), DataType::Integer, false, 0)
                .unwrap();
        }
        assert!(schema.finalize().is_err());
    }

    #[test]
    fn lookup_by_name() {
        let schema = sample_schema();
        assert_eq!(schema.column_index("salary").unwrap(), 2);
        assert!(schema.has_column("department"));
        assert!(schema.column_index("missing").is_err());
    }

    #[test]
    fn duplicate_column_name_rejected() {
        let mut schema = Schema::new();
        schema.add_column("id", DataType::Integer, false, 0).unwrap();
        assert!(schema.add_column("id", DataType::BigInt, false, 0).is_err());
    }
}
