//! In-memory table parsed from a CSV file.
//!
//! Column types come from arrow-csv's schema inference: a column whose
//! non-missing values are all integers is `Int64`, integers mixed with
//! decimals widen to `Float64`, `true`/`false` columns are `Boolean` and
//! everything else stays `Utf8`. Blank lines are skipped, like dataframe CSV
//! readers do.

use std::collections::HashSet;
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;

use arrow::array::{Array, ArrayRef, Int64Array};
use arrow::compute::{CastOptions, cast_with_options, concat_batches};
use arrow::csv::ReaderBuilder;
use arrow::csv::reader::Format;
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use tracing::debug;

use crate::libs::config::UploadOptions;
use crate::libs::error::{Result, UploadError};

/// Parsed CSV content: named, typed columns of equal length.
#[derive(Debug, Clone, PartialEq)]
pub struct DataFrame {
    batch: RecordBatch,
}

impl DataFrame {
    /// Read and type a CSV file.
    pub async fn read_csv(path: impl AsRef<Path>, options: &UploadOptions) -> Result<Self> {
        let path = path.as_ref();
        let bytes = tokio::fs::read(path).await?;
        debug!(path = %path.display(), bytes = bytes.len(), "read csv file");
        Self::from_slice(&bytes, options)
    }

    /// Parse CSV content with a header row.
    ///
    /// Columns named in `options.datetime_cols` keep their raw text so they
    /// can be parsed as date/time later. Rows with a different number of
    /// fields than the header are rejected.
    pub fn from_slice(bytes: &[u8], options: &UploadOptions) -> Result<Self> {
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Err(UploadError::EmptyInput("CSV input is empty".into()));
        }
        let null_regex = options.null_regex()?;
        let format = Format::default()
            .with_header(true)
            .with_delimiter(options.delimiter)
            .with_null_regex(null_regex.clone());
        let (inferred, records) = format.infer_schema(Cursor::new(bytes), None)?;

        let headers: Vec<&str> = inferred.fields().iter().map(|f| f.name().as_str()).collect();
        if headers.is_empty() {
            return Err(UploadError::EmptyInput("CSV input has no header row".into()));
        }
        let names = unique_names(&headers);

        // A leading unnamed column is the row index of a dataframe export.
        let skip = usize::from(options.drop_unnamed_index && headers[0].is_empty());
        if skip == headers.len() {
            return Err(UploadError::EmptyInput(
                "CSV input has no columns besides an unnamed index".into(),
            ));
        }
        let projection: Vec<usize> = (skip..headers.len()).collect();

        let text_schema = Schema::new(
            names
                .iter()
                .map(|name| Field::new(name.as_str(), DataType::Utf8, true))
                .collect::<Vec<_>>(),
        );
        let projected = Arc::new(text_schema.project(&projection)?);
        let reader = ReaderBuilder::new(Arc::new(text_schema))
            .with_header(true)
            .with_delimiter(options.delimiter)
            .with_null_regex(null_regex)
            .with_projection(projection.clone())
            .build(Cursor::new(bytes))?;
        let batches = reader.collect::<Result<Vec<_>, _>>()?;
        let raw = concat_batches(&projected, &batches)?;

        let mut fields = Vec::with_capacity(projection.len());
        let mut columns = Vec::with_capacity(projection.len());
        for (position, column) in projection.into_iter().zip(raw.columns()) {
            let name = &names[position];
            let typed = if options.datetime_cols.contains(name) {
                Arc::clone(column)
            } else {
                typed_column(name, column, inferred.field(position).data_type())
            };
            fields.push(Field::new(name.as_str(), typed.data_type().clone(), true));
            columns.push(typed);
        }
        let batch = RecordBatch::try_new(Arc::new(Schema::new(fields)), columns)?;

        debug!(
            columns = batch.num_columns(),
            rows = batch.num_rows(),
            sampled = records,
            "parsed csv into data frame"
        );

        Ok(Self { batch })
    }

    pub fn batch(&self) -> &RecordBatch {
        &self.batch
    }

    pub fn column(&self, name: &str) -> Option<&ArrayRef> {
        self.batch.column_by_name(name)
    }

    pub fn column_names(&self) -> Vec<String> {
        self.batch
            .schema()
            .fields()
            .iter()
            .map(|f| f.name().clone())
            .collect()
    }

    pub fn num_columns(&self) -> usize {
        self.batch.num_columns()
    }

    pub fn num_rows(&self) -> usize {
        self.batch.num_rows()
    }

    /// Swap the values of column `name`, taking the type of `array`.
    pub fn replace_column(&mut self, name: &str, array: ArrayRef) -> Result<()> {
        let schema = self.batch.schema();
        let position = schema
            .index_of(name)
            .map_err(|_| UploadError::column_not_found(name, &self.column_names()))?;

        let mut fields: Vec<Field> = schema.fields().iter().map(|f| f.as_ref().clone()).collect();
        let mut columns = self.batch.columns().to_vec();
        fields[position] = Field::new(name, array.data_type().clone(), true);
        columns[position] = array;

        self.batch = RecordBatch::try_new(Arc::new(Schema::new(fields)), columns)?;
        Ok(())
    }

    /// Prepend a `0..n` integer column named `name`.
    pub fn insert_row_index(&mut self, name: &str) -> Result<()> {
        if self.column(name).is_some() {
            return Err(UploadError::InvalidConfig(format!(
                "cannot insert index column '{name}', it already exists"
            )));
        }
        let schema = self.batch.schema();
        let index: ArrayRef = Arc::new(Int64Array::from_iter_values(0..self.num_rows() as i64));

        let mut fields = vec![Field::new(name, DataType::Int64, false)];
        fields.extend(schema.fields().iter().map(|f| f.as_ref().clone()));
        let mut columns = vec![index];
        columns.extend(self.batch.columns().iter().cloned());

        self.batch = RecordBatch::try_new(Arc::new(Schema::new(fields)), columns)?;
        Ok(())
    }
}

/// Cast a raw text column to the type arrow inferred for it.
///
/// Only integer, float and boolean columns are cast. Dates and times stay
/// text unless hinted. A column whose values the inferred type cannot hold,
/// such as integers past `i64::MAX`, stays text.
fn typed_column(name: &str, raw: &ArrayRef, inferred: &DataType) -> ArrayRef {
    let target = match inferred {
        DataType::Int8 | DataType::Int16 | DataType::Int32 | DataType::Int64 => DataType::Int64,
        DataType::Float16 | DataType::Float32 | DataType::Float64 => DataType::Float64,
        DataType::Boolean => DataType::Boolean,
        _ => return Arc::clone(raw),
    };

    let options = CastOptions {
        safe: false,
        ..Default::default()
    };
    match cast_with_options(raw, &target, &options) {
        Ok(typed) => typed,
        Err(err) => {
            debug!(column = name, inferred = %target, error = %err, "keeping column as text");
            Arc::clone(raw)
        }
    }
}

/// Name empty headers `Unnamed: <position>` and suffix repeats with `.1`, `.2`, ...
///
/// Positions count every column in the file, including a dropped index.
fn unique_names(headers: &[&str]) -> Vec<String> {
    let mut seen: HashSet<String> = HashSet::with_capacity(headers.len());
    let mut names = Vec::with_capacity(headers.len());

    for (position, header) in headers.iter().enumerate() {
        let base = if header.is_empty() {
            format!("Unnamed: {position}")
        } else {
            header.to_string()
        };

        let mut name = base.clone();
        let mut suffix = 1;
        while seen.contains(&name) {
            name = format!("{base}.{suffix}");
            suffix += 1;
        }
        seen.insert(name.clone());
        names.push(name);
    }

    names
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::AsArray;
    use arrow::datatypes::{Float64Type, Int64Type};

    fn frame(csv: &str) -> DataFrame {
        DataFrame::from_slice(csv.as_bytes(), &UploadOptions::default()).unwrap()
    }

    fn data_types(df: &DataFrame) -> Vec<DataType> {
        df.batch()
            .schema()
            .fields()
            .iter()
            .map(|f| f.data_type().clone())
            .collect()
    }

    fn ints(df: &DataFrame, name: &str) -> Vec<Option<i64>> {
        df.column(name).unwrap().as_primitive::<Int64Type>().iter().collect()
    }

    fn texts(df: &DataFrame, name: &str) -> Vec<Option<String>> {
        df.column(name)
            .unwrap()
            .as_string::<i32>()
            .iter()
            .map(|v| v.map(str::to_string))
            .collect()
    }

    #[test]
    fn test_columns_typed_from_values() {
        let df = frame("id,text,int,float,bool\nid1,hello,1,1.5,True\nid2,world,2,2.5,FALSE\n");

        assert_eq!(df.num_rows(), 2);
        assert_eq!(df.num_columns(), 5);
        assert_eq!(
            data_types(&df),
            vec![
                DataType::Utf8,
                DataType::Utf8,
                DataType::Int64,
                DataType::Float64,
                DataType::Boolean
            ]
        );
        assert_eq!(ints(&df, "int"), vec![Some(1), Some(2)]);
        let bools: Vec<Option<bool>> = df.column("bool").unwrap().as_boolean().iter().collect();
        assert_eq!(bools, vec![Some(true), Some(false)]);
    }

    #[test]
    fn test_missing_values_keep_numeric_type() {
        let df = frame("a,b\n1,x\n,y\nNaN,z\n4,NULL\n");

        assert_eq!(ints(&df, "a"), vec![Some(1), None, None, Some(4)]);
        assert_eq!(df.column("a").unwrap().null_count(), 2);
        assert_eq!(df.column("b").unwrap().null_count(), 1);
    }

    #[test]
    fn test_mixed_and_empty_columns_fall_back_to_text() {
        let df = frame("mixed,empty,widened\n1,,1\nabc,,2.5\n");

        assert_eq!(
            texts(&df, "mixed"),
            vec![Some("1".to_string()), Some("abc".to_string())]
        );
        assert_eq!(df.column("empty").unwrap().data_type(), &DataType::Utf8);
        assert_eq!(df.column("empty").unwrap().null_count(), 2);

        let widened: Vec<Option<f64>> = df
            .column("widened")
            .unwrap()
            .as_primitive::<Float64Type>()
            .iter()
            .collect();
        assert_eq!(widened, vec![Some(1.0), Some(2.5)]);
    }

    #[test]
    fn test_integers_past_i64_stay_text() {
        let df = frame("account\n1\n12345678901234567891\n");

        assert_eq!(df.column("account").unwrap().data_type(), &DataType::Utf8);
        assert_eq!(
            texts(&df, "account"),
            vec![Some("1".to_string()), Some("12345678901234567891".to_string())]
        );
    }

    #[test]
    fn test_dates_stay_text_unless_hinted() {
        let df = frame("day\n2020-01-01\n2020-02-01\n");
        assert_eq!(df.column("day").unwrap().data_type(), &DataType::Utf8);

        let options = UploadOptions::new().with_datetime_cols(["day"]);
        let df = DataFrame::from_slice("day\n20200101\n".as_bytes(), &options).unwrap();
        assert_eq!(texts(&df, "day"), vec![Some("20200101".to_string())]);
    }

    #[test]
    fn test_blank_lines_skipped() {
        let df = frame("n\n1\n\n3\n");
        assert_eq!(df.num_rows(), 2);
        assert_eq!(ints(&df, "n"), vec![Some(1), Some(3)]);
    }

    #[test]
    fn test_unnamed_leading_index_dropped() {
        let df = frame(",id,value\n0,a,1\n1,b,2\n");
        assert_eq!(df.column_names(), vec!["id", "value"]);

        let options = UploadOptions::new().with_drop_unnamed_index(false);
        let df = DataFrame::from_slice(",id\n0,a\n".as_bytes(), &options).unwrap();
        assert_eq!(df.column_names(), vec!["Unnamed: 0", "id"]);
    }

    #[test]
    fn test_unnamed_columns_keep_file_position() {
        let df = frame(",a,,b\n0,1,2,3\n");
        assert_eq!(df.column_names(), vec!["a", "Unnamed: 2", "b"]);
    }

    #[test]
    fn test_duplicate_headers_deduplicated() {
        let df = frame("a,b,a,a,a.1\n1,2,3,4,5\n");
        assert_eq!(df.column_names(), vec!["a", "b", "a.1", "a.2", "a.1.1"]);
    }

    #[test]
    fn test_header_only_file() {
        let df = frame("a,b\n");
        assert_eq!(df.num_rows(), 0);
        assert_eq!(df.num_columns(), 2);
        assert_eq!(df.column("a").unwrap().data_type(), &DataType::Utf8);
    }

    #[test]
    fn test_empty_input_rejected() {
        let err = DataFrame::from_slice(b"", &UploadOptions::default()).unwrap_err();
        assert!(matches!(err, UploadError::EmptyInput(_)));
    }

    #[test]
    fn test_ragged_rows_rejected() {
        let err = DataFrame::from_slice(b"a,b\n1,2\n3\n", &UploadOptions::default()).unwrap_err();
        assert!(matches!(err, UploadError::Csv(_)));
        assert!(err.is_input_error());
    }

    #[test]
    fn test_custom_delimiter() {
        let options = UploadOptions::new().with_delimiter(b';');
        let df = DataFrame::from_slice("a;b\n1;x,y\n".as_bytes(), &options).unwrap();
        assert_eq!(texts(&df, "b"), vec![Some("x,y".to_string())]);
    }

    #[test]
    fn test_insert_row_index() {
        let mut df = frame("name\na\nb\nc\n");
        df.insert_row_index("index").unwrap();

        assert_eq!(df.column_names(), vec!["index", "name"]);
        assert_eq!(ints(&df, "index"), vec![Some(0), Some(1), Some(2)]);
        assert!(df.insert_row_index("name").is_err());
    }

    #[test]
    fn test_replace_column() {
        let mut df = frame("a,b\nx,1\n");
        df.replace_column("a", Arc::new(Int64Array::from(vec![7])))
            .unwrap();

        assert_eq!(ints(&df, "a"), vec![Some(7)]);
        assert_eq!(df.column_names(), vec!["a", "b"]);
        assert!(matches!(
            df.replace_column("c", Arc::new(Int64Array::from(vec![1]))),
            Err(UploadError::ColumnNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_read_csv_missing_file() {
        let err = DataFrame::read_csv("/nonexistent/data.csv", &UploadOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::Io(_)));
    }
}
