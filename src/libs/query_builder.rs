use tracing::warn;

use crate::libs::error::{Result, UploadError};
use crate::libs::schema::TableSchema;

/// Longest identifier Postgres keeps; longer names are truncated by the server.
const MAX_IDENTIFIER_LEN: usize = 63;

/// Quote an identifier, doubling any embedded double quote.
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Builds the statements that replace a table with the contents of a schema.
pub struct QueryBuilder<'a> {
    table: String,
    schema: &'a TableSchema,
}

impl<'a> QueryBuilder<'a> {
    pub fn new(table: &str, schema: &'a TableSchema) -> Result<Self> {
        if table.is_empty() {
            return Err(UploadError::InvalidConfig(
                "table name must not be empty".into(),
            ));
        }
        if schema.is_empty() {
            return Err(UploadError::InvalidConfig(format!(
                "table '{table}' would have no columns"
            )));
        }
        for name in std::iter::once(table).chain(schema.columns.iter().map(|c| c.name.as_str())) {
            if name.len() > MAX_IDENTIFIER_LEN {
                warn!(
                    identifier = name,
                    "identifier longer than {MAX_IDENTIFIER_LEN} bytes will be truncated by postgres"
                );
            }
        }

        Ok(Self {
            table: quote_identifier(table),
            schema,
        })
    }

    pub fn drop_table(&self) -> String {
        format!("DROP TABLE IF EXISTS {};", self.table)
    }

    pub fn create_table(&self) -> String {
        let cols: Vec<String> = self
            .schema
            .columns
            .iter()
            .map(|c| {
                let mut col_def = format!("{} {}", quote_identifier(&c.name), c.sql_type);
                if c.primary {
                    col_def.push_str(" PRIMARY KEY");
                }
                col_def
            })
            .collect();
        format!("CREATE TABLE {} ({});", self.table, cols.join(","))
    }

    /// `COPY` in text format; column order follows the schema.
    pub fn copy_from_stdin(&self) -> String {
        let cols: Vec<String> = self
            .schema
            .columns
            .iter()
            .map(|c| quote_identifier(&c.name))
            .collect();
        format!("COPY {} ({}) FROM STDIN", self.table, cols.join(","))
    }
}
