use std::path::Path;

use serde::Serialize;
use sqlx::postgres::PgConnection;
use sqlx::{Connection, Postgres, Transaction};
use tracing::{debug, info, warn};

use crate::libs::config::{ConnectionConfig, UploadOptions};
use crate::libs::copy::CopyChunks;
use crate::libs::error::{Result, UploadError};
use crate::libs::frame::DataFrame;
use crate::libs::infer::infer_schema;
use crate::libs::query_builder::QueryBuilder;
use crate::libs::schema::TableSchema;

/// Outcome of a successful upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadReport {
    pub table: String,
    pub schema: TableSchema,
    /// Statements executed, in order.
    pub statements: Vec<String>,
    /// Rows written by `COPY`.
    pub rows: u64,
}

/// Uploads CSV files as Postgres tables over a single connection.
pub struct CsvUploader {
    conn: PgConnection,
}

impl CsvUploader {
    pub fn new(conn: PgConnection) -> Self {
        Self { conn }
    }

    /// Connect with a `postgres://` URL.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let conn = PgConnection::connect(database_url).await?;
        Ok(Self::new(conn))
    }

    pub async fn from_new_connection(config: &ConnectionConfig) -> Result<Self> {
        info!(
            host = %config.host,
            port = config.port,
            database = config.database_name(),
            "connecting to postgres"
        );
        let conn = PgConnection::connect_with(&config.connect_options()?).await?;
        Ok(Self::new(conn))
    }

    pub fn connection(&mut self) -> &mut PgConnection {
        &mut self.conn
    }

    pub fn into_connection(self) -> PgConnection {
        self.conn
    }

    pub async fn close(self) -> Result<()> {
        self.conn.close().await?;
        Ok(())
    }

    /// Parse `path` and infer its schema without touching the database.
    pub async fn create_table_schema(
        path: impl AsRef<Path>,
        options: &UploadOptions,
    ) -> Result<TableSchema> {
        let (_, schema) = read_and_infer(path.as_ref(), options).await?;
        Ok(schema)
    }

    /// Replace `table` with an empty table shaped after `path`.
    ///
    /// Returns the executed `CREATE TABLE` statement.
    pub async fn create_table(
        &mut self,
        path: impl AsRef<Path>,
        table: &str,
        options: &UploadOptions,
    ) -> Result<String> {
        let (_, schema) = read_and_infer(path.as_ref(), options).await?;
        let builder = QueryBuilder::new(table, &schema)?;

        let mut tx = self.conn.begin().await?;
        let create = match replace_table(&mut tx, &builder).await {
            Ok(create) => create,
            Err(err) => return Err(rollback(tx, table, err).await),
        };
        tx.commit().await?;
        info!(table, "created table");
        Ok(create)
    }

    /// Upload the CSV file at `path` as `table`, replacing any existing table.
    ///
    /// The drop, create and copy run in one transaction: on failure the
    /// previous table, if any, is left untouched.
    ///
    /// # Example
    ///
    /// ```no_run
    /// # use pg_csv_uploader::*;
    /// # async fn example(uploader: &mut CsvUploader) -> Result<()> {
    /// let options = UploadOptions::new()
    ///     .with_index_col("uid")
    ///     .with_datetime_cols(["joined"]);
    /// let report = uploader.upload("users.csv", "users", &options).await?;
    /// assert_eq!(report.rows, 3);
    /// # Ok(())
    /// # }
    /// ```
    pub async fn upload(
        &mut self,
        path: impl AsRef<Path>,
        table: &str,
        options: &UploadOptions,
    ) -> Result<UploadReport> {
        let (frame, schema) = read_and_infer(path.as_ref(), options).await?;
        load_table(&mut self.conn, table, &schema, &frame, options).await
    }
}

/// Parse the CSV at `path` and infer its schema.
pub async fn read_and_infer(
    path: &Path,
    options: &UploadOptions,
) -> Result<(DataFrame, TableSchema)> {
    options.validate()?;
    let mut frame = DataFrame::read_csv(path, options).await?;
    let schema = infer_schema(&mut frame, options)?;
    info!(
        path = %path.display(),
        rows = frame.num_rows(),
        columns = frame.num_columns(),
        "inferred schema from csv"
    );
    Ok((frame, schema))
}

/// Drop and recreate `table` from `schema`, then `COPY` every row of `frame`,
/// all in one transaction.
pub async fn load_table(
    conn: &mut PgConnection,
    table: &str,
    schema: &TableSchema,
    frame: &DataFrame,
    options: &UploadOptions,
) -> Result<UploadReport> {
    let builder = QueryBuilder::new(table, schema)?;

    let mut tx = conn.begin().await?;
    let rows = match replace_and_copy(&mut tx, &builder, frame, options).await {
        Ok(rows) => rows,
        Err(err) => return Err(rollback(tx, table, err).await),
    };
    tx.commit().await?;
    info!(table, rows, "uploaded csv");

    Ok(UploadReport {
        table: table.to_string(),
        schema: schema.clone(),
        statements: vec![
            builder.drop_table(),
            builder.create_table(),
            builder.copy_from_stdin(),
        ],
        rows,
    })
}

async fn replace_table(
    tx: &mut Transaction<'_, Postgres>,
    builder: &QueryBuilder<'_>,
) -> Result<String> {
    let drop = builder.drop_table();
    debug!(sql = %drop, "executing");
    sqlx::query(&drop).execute(&mut **tx).await?;

    let create = builder.create_table();
    debug!(sql = %create, "executing");
    sqlx::query(&create).execute(&mut **tx).await?;
    Ok(create)
}

async fn replace_and_copy(
    tx: &mut Transaction<'_, Postgres>,
    builder: &QueryBuilder<'_>,
    frame: &DataFrame,
    options: &UploadOptions,
) -> Result<u64> {
    replace_table(tx, builder).await?;

    let copy_sql = builder.copy_from_stdin();
    debug!(sql = %copy_sql, rows = frame.num_rows(), "executing");
    let mut copy = tx.copy_in_raw(&copy_sql).await?;
    for chunk in CopyChunks::new(frame, options.copy_chunk_size) {
        let sent = match chunk {
            Ok(chunk) => copy.send(chunk).await.map(|_| ()).map_err(UploadError::from),
            Err(err) => Err(err),
        };
        if let Err(err) = sent {
            if let Err(abort_err) = copy.abort(err.to_string()).await {
                debug!(error = %abort_err, "failed to abort copy");
            }
            return Err(err);
        }
    }
    let rows = copy.finish().await?;
    Ok(rows)
}

/// Roll back `tx` and hand back the error that caused it.
async fn rollback(
    tx: Transaction<'_, Postgres>,
    table: &str,
    err: UploadError,
) -> UploadError {
    warn!(table, error = %err, "upload failed, rolling back");
    if let Err(rollback_err) = tx.rollback().await {
        warn!(table, error = %rollback_err, "rollback failed");
    }
    err
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::libs::schema::SqlType;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_csv(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    #[tokio::test]
    async fn test_create_table_schema_from_file() {
        let csv = write_csv(
            "uid,name,joined\n1,a,2020-01-01\n2,b,2020-02-01\n3,c,2020-03-01\n",
        );
        let options = UploadOptions::new()
            .with_index_col("uid")
            .with_datetime_cols(["joined"]);

        let schema = CsvUploader::create_table_schema(csv.path(), &options)
            .await
            .unwrap();
        assert_eq!(
            schema.type_pairs(),
            vec![("uid", "BIGINT"), ("name", "TEXT"), ("joined", "TIMESTAMP")]
        );
        assert_eq!(schema.primary_key().unwrap().name, "uid");
    }

    #[tokio::test]
    async fn test_read_and_infer_keeps_rows() {
        let csv = write_csv(",id,bigtext\n0,id1,xyz\n1,id2,xyz\n");
        let (frame, schema) = read_and_infer(csv.path(), &UploadOptions::new().with_index_col("id"))
            .await
            .unwrap();

        assert_eq!(frame.num_rows(), 2);
        assert_eq!(schema.len(), frame.num_columns());
        assert_eq!(schema.columns[0].sql_type, SqlType::Text);
        assert!(schema.columns[0].primary);
    }

    #[tokio::test]
    async fn test_missing_index_column_is_input_error() {
        let csv = write_csv("a,b\n1,2\n");
        let err = CsvUploader::create_table_schema(
            csv.path(),
            &UploadOptions::new().with_index_col("uid"),
        )
        .await
        .unwrap_err();
        assert!(err.is_input_error());
        assert!(matches!(err, UploadError::ColumnNotFound { .. }));
    }

    #[tokio::test]
    async fn test_invalid_options_rejected_before_reading() {
        let err = read_and_infer(
            Path::new("/nonexistent/data.csv"),
            &UploadOptions::new().with_copy_chunk_size(0),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, UploadError::InvalidConfig(_)));
    }

    #[test]
    fn test_report_serializes() {
        let report = UploadReport {
            table: "t".into(),
            schema: TableSchema::default(),
            statements: vec!["DROP TABLE IF EXISTS \"t\";".into()],
            rows: 0,
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["table"], "t");
        assert_eq!(json["rows"], 0);
        assert_eq!(json["statements"][0], "DROP TABLE IF EXISTS \"t\";");
    }
}
