use std::collections::BTreeSet;

use regex::Regex;
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgConnectOptions;

use crate::libs::error::{Result, UploadError};

/// Spellings read as a missing value, matching the defaults of common
/// dataframe CSV readers. The empty field is always missing.
pub const DEFAULT_NULL_VALUES: &[&str] = &[
    "", "#N/A", "#N/A N/A", "#NA", "-1.#IND", "-1.#QNAN", "-NaN", "-nan", "1.#IND", "1.#QNAN",
    "<NA>", "N/A", "NA", "NULL", "NaN", "None", "n/a", "nan", "null",
];

/// Size of each `COPY` data message sent to the server.
pub const DEFAULT_COPY_CHUNK_SIZE: usize = 64 * 1024;

/// Parameters for opening a fresh Postgres connection.
///
/// Deserializable so it can be embedded in a caller's own configuration.
/// When `database` is omitted the database named after `user` is used.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    #[serde(default = "default_host")]
    pub host: String,
    pub user: String,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub database: Option<String>,
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    5432
}

impl ConnectionConfig {
    pub fn new(user: impl Into<String>) -> Self {
        Self {
            host: default_host(),
            user: user.into(),
            password: None,
            port: default_port(),
            database: None,
        }
    }

    #[must_use]
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    #[must_use]
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    #[must_use]
    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    pub fn database_name(&self) -> &str {
        self.database.as_deref().unwrap_or(&self.user)
    }

    /// Build driver options. Fails on an empty host or user.
    pub fn connect_options(&self) -> Result<PgConnectOptions> {
        if self.host.trim().is_empty() {
            return Err(UploadError::InvalidConfig("host must not be empty".into()));
        }
        if self.user.trim().is_empty() {
            return Err(UploadError::InvalidConfig("user must not be empty".into()));
        }

        let mut options = PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .username(&self.user)
            .database(self.database_name());
        if let Some(password) = &self.password {
            options = options.password(password);
        }
        Ok(options)
    }
}

/// Hints and knobs for a single upload.
///
/// # Example
///
/// ```
/// use pg_csv_uploader::UploadOptions;
///
/// let options = UploadOptions::new()
///     .with_index_col("uid")
///     .with_datetime_cols(["joined"])
///     .with_delimiter(b';');
/// assert_eq!(options.index_col.as_deref(), Some("uid"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadOptions {
    /// Column promoted to `PRIMARY KEY`.
    pub index_col: Option<String>,
    /// Columns parsed as date/time and typed `TIMESTAMP`.
    pub datetime_cols: BTreeSet<String>,
    /// Field delimiter (default: `,`).
    pub delimiter: u8,
    /// Values read as missing.
    pub null_values: BTreeSet<String>,
    /// Drop a leading column with an empty header, as written by dataframe
    /// exports that include their row index (default: `true`).
    pub drop_unnamed_index: bool,
    /// Name of a generated `BIGINT` row-number key, used only when
    /// `index_col` is not set.
    pub generated_index: Option<String>,
    /// Bytes per `COPY` data message.
    pub copy_chunk_size: usize,
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self {
            index_col: None,
            datetime_cols: BTreeSet::new(),
            delimiter: b',',
            null_values: DEFAULT_NULL_VALUES.iter().map(|s| s.to_string()).collect(),
            drop_unnamed_index: true,
            generated_index: None,
            copy_chunk_size: DEFAULT_COPY_CHUNK_SIZE,
        }
    }
}

impl UploadOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_index_col(mut self, column: impl Into<String>) -> Self {
        self.index_col = Some(column.into());
        self
    }

    #[must_use]
    pub fn with_datetime_cols<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.datetime_cols = columns.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = delimiter;
        self
    }

    /// Replace the missing-value spellings. The empty field stays missing.
    #[must_use]
    pub fn with_null_values<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.null_values = values.into_iter().map(Into::into).collect();
        self.null_values.insert(String::new());
        self
    }

    #[must_use]
    pub fn with_drop_unnamed_index(mut self, drop: bool) -> Self {
        self.drop_unnamed_index = drop;
        self
    }

    #[must_use]
    pub fn with_generated_index(mut self, name: impl Into<String>) -> Self {
        self.generated_index = Some(name.into());
        self
    }

    #[must_use]
    pub fn with_copy_chunk_size(mut self, size: usize) -> Self {
        self.copy_chunk_size = size;
        self
    }

    /// Anchored regex matching exactly the missing-value spellings.
    pub fn null_regex(&self) -> Result<Regex> {
        let spellings: Vec<String> = self.null_values.iter().map(|v| regex::escape(v)).collect();
        Regex::new(&format!("^(?:{})$", spellings.join("|")))
            .map_err(|err| UploadError::InvalidConfig(format!("invalid null values: {err}")))
    }

    pub fn validate(&self) -> Result<()> {
        if self.copy_chunk_size == 0 {
            return Err(UploadError::InvalidConfig(
                "copy_chunk_size must be greater than zero".into(),
            ));
        }
        if matches!(self.delimiter, b'"' | b'\n' | b'\r') {
            return Err(UploadError::InvalidConfig(format!(
                "delimiter {:?} is not allowed",
                self.delimiter as char
            )));
        }
        if self.generated_index.as_deref().is_some_and(str::is_empty) {
            return Err(UploadError::InvalidConfig(
                "generated index name must not be empty".into(),
            ));
        }
        Ok(())
    }
}
