use thiserror::Error;

/// Errors raised while reading, inferring or loading a CSV file.
#[derive(Error, Debug)]
pub enum UploadError {
    /// The CSV file could not be read
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The CSV content could not be parsed or typed (bad quoting, ragged rows, invalid UTF-8)
    #[error("CSV error: {0}")]
    Csv(#[from] arrow::error::ArrowError),

    /// The file has no header or no data rows
    #[error("Empty input: {0}")]
    EmptyInput(String),

    /// A hinted column is not present in the parsed file
    #[error("Column '{column}' not found, available columns: {available}")]
    ColumnNotFound { column: String, available: String },

    /// A value in a forced datetime column does not parse as a date/time
    #[error("Invalid datetime '{value}' in column '{column}' at row {row}")]
    InvalidDatetime {
        column: String,
        row: usize,
        value: String,
    },

    /// Invalid options or connection parameters
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Connectivity, privilege or constraint failure reported by Postgres
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl UploadError {
    /// Whether the failure comes from the file or the caller's hints.
    pub fn is_input_error(&self) -> bool {
        !self.is_database_error()
    }

    pub fn is_database_error(&self) -> bool {
        matches!(self, UploadError::Database(_))
    }

    pub(crate) fn column_not_found(column: &str, available: &[String]) -> Self {
        UploadError::ColumnNotFound {
            column: column.to_string(),
            available: available.join(", "),
        }
    }
}

pub type Result<T, E = UploadError> = std::result::Result<T, E>;
