//! # pg-csv-uploader
//!
//! Loads a CSV file into Postgres as its own table.
//!
//! The upload runs in two stages. The file is parsed into an in-memory
//! [`DataFrame`] and every column gets a SQL type from the values it holds
//! ([`infer_schema`]). The destination table is then dropped, recreated from
//! that [`TableSchema`] and filled with a single `COPY ... FROM STDIN`, all
//! inside one transaction.
//!
//! ```no_run
//! use pg_csv_uploader::*;
//!
//! # async fn example() -> Result<()> {
//! let config = ConnectionConfig::new("postgres")
//!     .with_password("admin")
//!     .with_database("postgres");
//! let mut uploader = CsvUploader::from_new_connection(&config).await?;
//!
//! let options = UploadOptions::new()
//!     .with_index_col("uid")
//!     .with_datetime_cols(["joined"]);
//!
//! let report = uploader.upload("users.csv", "users", &options).await?;
//! println!("loaded {} rows into {}", report.rows, report.table);
//! # Ok(())
//! # }
//! ```

pub mod libs;

pub use libs::*;
