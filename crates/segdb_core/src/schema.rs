//! Table schema: columns, index definitions and index keys.

use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Storage type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnType {
    /// UTF-8 string.
    Str,
    /// Arbitrary bytes, treated as a string for indexing.
    Binary,
    /// Signed 64-bit integer.
    I64,
    /// 64-bit float.
    F64,
}

impl ColumnType {
    /// Returns true for string-like types, the only ones a trie index
    /// (and so regex matching) accepts.
    #[must_use]
    pub const fn is_string(self) -> bool {
        matches!(self, Self::Str | Self::Binary)
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Str => "str",
            Self::Binary => "binary",
            Self::I64 => "i64",
            Self::F64 => "f64",
        };
        f.write_str(name)
    }
}

/// Name and type of one column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMeta {
    /// Column name.
    pub name: String,
    /// Column type.
    pub column_type: ColumnType,
}

impl ColumnMeta {
    /// Creates column metadata.
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
        }
    }

    /// Returns true if the column is string-like.
    #[must_use]
    pub const fn is_string(&self) -> bool {
        self.column_type.is_string()
    }
}

/// One index definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSchema {
    /// Index name.
    pub name: String,
    /// Positions of the indexed columns in the row.
    pub fields: Vec<usize>,
    /// Metadata of the indexed columns, in index order.
    pub metas: Vec<ColumnMeta>,
}

impl IndexSchema {
    /// Number of columns in the index.
    #[must_use]
    pub fn column_num(&self) -> usize {
        self.metas.len()
    }

    /// Metadata of the `i`-th indexed column.
    #[must_use]
    pub fn column_meta(&self, i: usize) -> Option<&ColumnMeta> {
        self.metas.get(i)
    }

    /// Returns true if the index is a single string column, i.e. is
    /// built as a trie in readonly segments.
    #[must_use]
    pub fn is_trie_indexable(&self) -> bool {
        self.column_num() == 1 && self.metas[0].is_string()
    }
}

/// A column value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// UTF-8 string.
    Str(String),
    /// Raw bytes.
    Binary(Vec<u8>),
    /// Signed integer.
    I64(i64),
    /// Float.
    F64(f64),
}

impl Value {
    /// Type of the value.
    #[must_use]
    pub const fn column_type(&self) -> ColumnType {
        match self {
            Self::Str(_) => ColumnType::Str,
            Self::Binary(_) => ColumnType::Binary,
            Self::I64(_) => ColumnType::I64,
            Self::F64(_) => ColumnType::F64,
        }
    }

    /// Order-preserving byte encoding of the value.
    #[must_use]
    pub fn key_bytes(&self) -> Vec<u8> {
        match self {
            Self::Str(s) => s.as_bytes().to_vec(),
            Self::Binary(b) => b.clone(),
            Self::I64(v) => ((*v as u64) ^ (1 << 63)).to_be_bytes().to_vec(),
            Self::F64(v) => {
                let bits = v.to_bits();
                let ordered = if bits >> 63 == 1 { !bits } else { bits | (1 << 63) };
                ordered.to_be_bytes().to_vec()
            }
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::I64(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::F64(v)
    }
}

/// A table row: one value per schema column.
pub type Row = Vec<Value>;

/// Columns plus the ordered index definitions of a table.
///
/// Immutable once built; tables and segments share it through an `Arc`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    columns: Vec<ColumnMeta>,
    indexes: Vec<IndexSchema>,
}

impl Schema {
    /// Starts building a schema.
    #[must_use]
    pub fn builder() -> SchemaBuilder {
        SchemaBuilder::default()
    }

    /// Row columns.
    #[must_use]
    pub fn columns(&self) -> &[ColumnMeta] {
        &self.columns
    }

    /// Number of indexes.
    #[must_use]
    pub fn index_count(&self) -> usize {
        self.indexes.len()
    }

    /// Index definition at `index_id`.
    #[must_use]
    pub fn index(&self, index_id: usize) -> Option<&IndexSchema> {
        self.indexes.get(index_id)
    }

    /// All index definitions.
    #[must_use]
    pub fn indexes(&self) -> &[IndexSchema] {
        &self.indexes
    }

    /// Looks an index up by name.
    #[must_use]
    pub fn index_id(&self, name: &str) -> Option<usize> {
        self.indexes.iter().position(|ix| ix.name == name)
    }

    /// Checks the schema's internal consistency.
    ///
    /// Builders call this before handing a schema out; a schema decoded
    /// from disk must pass it too.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidSchema`] if there are no columns,
    /// column or index names repeat, an index is empty, or an index's
    /// `fields` and `metas` disagree with the columns.
    pub fn validate(&self) -> CoreResult<()> {
        if self.columns.is_empty() {
            return Err(CoreError::invalid_schema("schema has no columns"));
        }
        let mut seen = HashSet::new();
        for column in &self.columns {
            if !seen.insert(column.name.as_str()) {
                return Err(CoreError::invalid_schema(format!(
                    "duplicate column {}",
                    column.name
                )));
            }
        }

        let mut index_names = HashSet::new();
        for index in &self.indexes {
            let name = &index.name;
            if !index_names.insert(name.as_str()) {
                return Err(CoreError::invalid_schema(format!("duplicate index {name}")));
            }
            if index.fields.is_empty() {
                return Err(CoreError::invalid_schema(format!("index {name} has no columns")));
            }
            if index.fields.len() != index.metas.len() {
                return Err(CoreError::invalid_schema(format!(
                    "index {name} has {} fields but {} column metas",
                    index.fields.len(),
                    index.metas.len()
                )));
            }
            for (&field, meta) in index.fields.iter().zip(&index.metas) {
                if self.columns.get(field) != Some(meta) {
                    return Err(CoreError::invalid_schema(format!(
                        "index {name} field {field} does not match column {}",
                        meta.name
                    )));
                }
            }
        }
        Ok(())
    }

    /// Checks that `row` has one value of the right type per column.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidSchema`] describing the first mismatch.
    pub fn check_row(&self, row: &[Value]) -> CoreResult<()> {
        if row.len() != self.columns.len() {
            return Err(CoreError::invalid_schema(format!(
                "row has {} values, schema has {} columns",
                row.len(),
                self.columns.len()
            )));
        }
        for (value, meta) in row.iter().zip(&self.columns) {
            if value.column_type() != meta.column_type {
                return Err(CoreError::invalid_schema(format!(
                    "column {} expects {}, got {}",
                    meta.name,
                    meta.column_type,
                    value.column_type()
                )));
            }
        }
        Ok(())
    }

    /// Key of `row` in index `index_id`.
    ///
    /// A single-column key is the value's own byte encoding, so string
    /// keys are exactly the string bytes the regex sees. Composite keys
    /// length-prefix each part.
    ///
    /// # Errors
    ///
    /// Returns an error if the index id is out of range or the row is
    /// shorter than the indexed positions.
    pub fn index_key(&self, row: &[Value], index_id: usize) -> CoreResult<Vec<u8>> {
        let index = self.index(index_id).ok_or(CoreError::InvalidIndexId {
            index_id,
            index_count: self.index_count(),
        })?;
        let value_at = |field: usize| {
            row.get(field).ok_or_else(|| {
                CoreError::invalid_schema(format!(
                    "row has no column {field} for index {}",
                    index.name
                ))
            })
        };

        if let [field] = index.fields.as_slice() {
            return Ok(value_at(*field)?.key_bytes());
        }

        let mut key = Vec::new();
        for &field in &index.fields {
            let part = value_at(field)?.key_bytes();
            let len = u32::try_from(part.len())
                .map_err(|_| CoreError::invalid_schema("index key part too large"))?;
            key.extend_from_slice(&len.to_be_bytes());
            key.extend_from_slice(&part);
        }
        Ok(key)
    }
}

/// Builder for [`Schema`].
#[derive(Debug, Default)]
pub struct SchemaBuilder {
    columns: Vec<ColumnMeta>,
    indexes: Vec<(String, Vec<String>)>,
}

impl SchemaBuilder {
    /// Adds a column.
    #[must_use]
    pub fn column(mut self, name: impl Into<String>, column_type: ColumnType) -> Self {
        self.columns.push(ColumnMeta::new(name, column_type));
        self
    }

    /// Adds an index over the named columns, in order.
    #[must_use]
    pub fn index(mut self, name: impl Into<String>, columns: &[&str]) -> Self {
        self.indexes.push((
            name.into(),
            columns.iter().map(|c| (*c).to_string()).collect(),
        ));
        self
    }

    /// Validates and builds the schema.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidSchema`] if an index names an unknown
    /// column, or if the result fails [`Schema::validate`].
    pub fn build(self) -> CoreResult<Schema> {
        let mut indexes = Vec::with_capacity(self.indexes.len());
        for (name, columns) in self.indexes {
            let mut fields = Vec::with_capacity(columns.len());
            let mut metas = Vec::with_capacity(columns.len());
            for column in &columns {
                let field = self
                    .columns
                    .iter()
                    .position(|c| &c.name == column)
                    .ok_or_else(|| {
                        CoreError::invalid_schema(format!(
                            "index {name} names unknown column {column}"
                        ))
                    })?;
                fields.push(field);
                metas.push(self.columns[field].clone());
            }
            indexes.push(IndexSchema {
                name,
                fields,
                metas,
            });
        }

        let schema = Schema {
            columns: self.columns,
            indexes,
        };
        schema.validate()?;
        Ok(schema)
    }
}
