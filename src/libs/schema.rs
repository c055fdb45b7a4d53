use std::fmt;

use arrow::datatypes::DataType;
use serde::Serialize;

/// Postgres column types produced by inference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SqlType {
    #[serde(rename = "BIGINT")]
    BigInt,
    #[serde(rename = "DOUBLE PRECISION")]
    DoublePrecision,
    #[serde(rename = "BOOLEAN")]
    Boolean,
    #[serde(rename = "TEXT")]
    Text,
    #[serde(rename = "TIMESTAMP")]
    Timestamp,
}

impl SqlType {
    pub fn as_sql(&self) -> &'static str {
        match self {
            SqlType::BigInt => "BIGINT",
            SqlType::DoublePrecision => "DOUBLE PRECISION",
            SqlType::Boolean => "BOOLEAN",
            SqlType::Text => "TEXT",
            SqlType::Timestamp => "TIMESTAMP",
        }
    }
}

impl fmt::Display for SqlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

impl From<&DataType> for SqlType {
    /// Columns without a single non-missing value, and mixed columns, are text.
    fn from(data_type: &DataType) -> Self {
        match data_type {
            DataType::Int8 | DataType::Int16 | DataType::Int32 | DataType::Int64 => {
                SqlType::BigInt
            }
            DataType::Float16 | DataType::Float32 | DataType::Float64 => SqlType::DoublePrecision,
            DataType::Boolean => SqlType::Boolean,
            DataType::Timestamp(_, _) => SqlType::Timestamp,
            _ => SqlType::Text,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnSchema {
    pub name: String,
    pub sql_type: SqlType,
    pub primary: bool,
}

impl ColumnSchema {
    pub fn new(name: impl Into<String>, sql_type: SqlType) -> Self {
        Self {
            name: name.into(),
            sql_type,
            primary: false,
        }
    }

    #[must_use]
    pub fn with_primary(mut self, primary: bool) -> Self {
        self.primary = primary;
        self
    }
}

/// Ordered column descriptors of the destination table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TableSchema {
    pub columns: Vec<ColumnSchema>,
}

impl TableSchema {
    pub fn new(columns: Vec<ColumnSchema>) -> Self {
        Self { columns }
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn primary_key(&self) -> Option<&ColumnSchema> {
        self.columns.iter().find(|c| c.primary)
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// `(name, type)` pairs, e.g. for logging or comparing against `information_schema`.
    pub fn type_pairs(&self) -> Vec<(&str, &'static str)> {
        self.columns
            .iter()
            .map(|c| (c.name.as_str(), c.sql_type.as_sql()))
            .collect()
    }
}
