//! Table schema model
//!
//! Column names match producer row keys case-sensitively; the schema is
//! immutable for the lifetime of a channel (reopen a new channel to pick
//! up schema changes).

use std::collections::HashMap;

/// Coordinates of a table, pipe, or channel in the service catalog
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SchemaObjectCoords {
    /// Database name
    pub database: String,
    /// Schema name
    pub schema: String,
    /// Object name
    pub name: String,
}

impl SchemaObjectCoords {
    /// Create coordinates from the three name parts
    pub fn new(
        database: impl Into<String>,
        schema: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            database: database.into(),
            schema: schema.into(),
            name: name.into(),
        }
    }
}

impl std::fmt::Display for SchemaObjectCoords {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.database, self.schema, self.name)
    }
}

/// Semantic column types the normalizer understands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Number,
    Boolean,
    Varchar,
    Binary,
    Variant,
    Date,
    Time,
    TimestampNtz,
    TimestampLtz,
    TimestampTz,
}

impl ColumnType {
    /// Wire/display name of the type
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Number => "NUMBER",
            Self::Boolean => "BOOLEAN",
            Self::Varchar => "VARCHAR",
            Self::Binary => "BINARY",
            Self::Variant => "VARIANT",
            Self::Date => "DATE",
            Self::Time => "TIME",
            Self::TimestampNtz => "TIMESTAMP_NTZ",
            Self::TimestampLtz => "TIMESTAMP_LTZ",
            Self::TimestampTz => "TIMESTAMP_TZ",
        }
    }

    /// Whether this is one of the three timestamp flavors
    pub fn is_timestamp(self) -> bool {
        matches!(self, Self::TimestampNtz | Self::TimestampLtz | Self::TimestampTz)
    }
}

impl std::fmt::Display for ColumnType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single column of the target table
#[derive(Debug, Clone)]
pub struct ColumnSpec {
    /// Column name (case-sensitive, must match row keys exactly)
    pub name: String,
    /// Semantic type
    pub ty: ColumnType,
    /// NUMBER precision (max integer digits accepted)
    pub precision: Option<u32>,
    /// NUMBER rounding scale / timestamp fractional digits
    pub scale: Option<u32>,
    /// VARCHAR length limit in characters
    pub length: Option<usize>,
}

impl ColumnSpec {
    /// Create a column with no precision/scale/length constraints
    pub fn new(name: impl Into<String>, ty: ColumnType) -> Self {
        Self {
            name: name.into(),
            ty,
            precision: None,
            scale: None,
            length: None,
        }
    }

    /// Set NUMBER precision and scale
    #[must_use]
    pub fn with_precision_scale(mut self, precision: u32, scale: u32) -> Self {
        self.precision = Some(precision);
        self.scale = Some(scale);
        self
    }

    /// Set the scale only (timestamp fractional digits)
    #[must_use]
    pub fn with_scale(mut self, scale: u32) -> Self {
        self.scale = Some(scale);
        self
    }

    /// Set the VARCHAR length limit
    #[must_use]
    pub fn with_length(mut self, length: usize) -> Self {
        self.length = Some(length);
        self
    }
}

/// The target table's schema: coordinates plus column specs
#[derive(Debug, Clone)]
pub struct TableSchema {
    table: SchemaObjectCoords,
    columns: Vec<ColumnSpec>,
    index: HashMap<String, usize>,
}

impl TableSchema {
    /// Build a schema from table coordinates and columns
    ///
    /// Later duplicates of a column name shadow earlier ones.
    pub fn new(table: SchemaObjectCoords, columns: Vec<ColumnSpec>) -> Self {
        let index = columns
            .iter()
            .enumerate()
            .map(|(i, c)| (c.name.clone(), i))
            .collect();
        Self {
            table,
            columns,
            index,
        }
    }

    /// Coordinates of the target table
    pub fn table(&self) -> &SchemaObjectCoords {
        &self.table
    }

    /// Look up a column by exact name
    pub fn column(&self, name: &str) -> Option<&ColumnSpec> {
        self.index.get(name).map(|&i| &self.columns[i])
    }

    /// Number of columns
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// Whether the schema has no columns
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Iterate columns in declaration order
    pub fn columns(&self) -> impl Iterator<Item = &ColumnSpec> {
        self.columns.iter()
    }
}
