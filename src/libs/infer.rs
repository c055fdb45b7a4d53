//! Schema inference: maps each column of a [`DataFrame`] to a Postgres type.

use std::sync::Arc;

use arrow::array::{Array, AsArray, TimestampMicrosecondArray};
use arrow::compute::cast;
use arrow::datatypes::DataType;
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use tracing::debug;

use crate::libs::config::UploadOptions;
use crate::libs::error::{Result, UploadError};
use crate::libs::frame::DataFrame;
use crate::libs::schema::{ColumnSchema, SqlType, TableSchema};

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
    "%Y/%m/%d %H:%M:%S",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
    "%a %b %d %H:%M:%S %Y",
];

const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%m/%d/%Y",
    "%b %d %Y",
    "%B %d %Y",
    "%b %d, %Y",
    "%B %d, %Y",
    "%d %b %Y",
    "%d %B %Y",
    "%Y%m%d",
];

/// Infer the table schema of `frame`.
///
/// Columns named in `options.datetime_cols` are parsed in place into
/// timestamps. The column named by `options.index_col` becomes the primary
/// key; without one, `options.generated_index` prepends a row-number key.
///
/// # Errors
///
/// Returns `UploadError::ColumnNotFound` if a hinted column does not exist and
/// `UploadError::InvalidDatetime` if a forced datetime value does not parse.
pub fn infer_schema(frame: &mut DataFrame, options: &UploadOptions) -> Result<TableSchema> {
    let names = frame.column_names();
    let hinted = options.index_col.iter().chain(options.datetime_cols.iter());
    for hint in hinted {
        if !names.contains(hint) {
            return Err(UploadError::column_not_found(hint, &names));
        }
    }

    let index_col = match (&options.index_col, &options.generated_index) {
        (Some(column), _) => Some(column.clone()),
        (None, Some(generated)) => {
            frame.insert_row_index(generated)?;
            Some(generated.clone())
        }
        (None, None) => None,
    };

    for column in &options.datetime_cols {
        parse_datetime_column(frame, column)?;
    }

    let columns: Vec<ColumnSchema> = frame
        .batch()
        .schema()
        .fields()
        .iter()
        .map(|field| {
            let primary = index_col.as_deref() == Some(field.name().as_str());
            ColumnSchema::new(field.name().clone(), SqlType::from(field.data_type()))
                .with_primary(primary)
        })
        .collect();

    let schema = TableSchema::new(columns);
    debug!(columns = ?schema.type_pairs(), "inferred table schema");
    Ok(schema)
}

/// Replace column `name` of `frame` with timestamps parsed from its text.
fn parse_datetime_column(frame: &mut DataFrame, name: &str) -> Result<()> {
    let Some(column) = frame.column(name) else {
        return Err(UploadError::column_not_found(name, &frame.column_names()));
    };
    let text = cast(column, &DataType::Utf8)?;

    let mut micros = Vec::with_capacity(text.len());
    for (row, value) in text.as_string::<i32>().iter().enumerate() {
        let parsed = match value {
            None => None,
            Some(value) => {
                let datetime = parse_datetime(value).ok_or_else(|| UploadError::InvalidDatetime {
                    column: name.to_string(),
                    row,
                    value: value.to_string(),
                })?;
                Some(datetime.and_utc().timestamp_micros())
            }
        };
        micros.push(parsed);
    }

    frame.replace_column(name, Arc::new(TimestampMicrosecondArray::from(micros)))
}

/// Parse a date or date/time in one of the common textual layouts.
///
/// Offsets are normalized to UTC; plain dates become midnight. A timezone
/// abbreviation in `ctime`-style values (`Wed May 21 00:00:00 EDT 2008`) is
/// ignored.
pub fn parse_datetime(value: &str) -> Option<NaiveDateTime> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.naive_utc());
    }

    for format in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(value, format) {
            return Some(dt);
        }
    }

    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(value, format) {
            return date.and_hms_opt(0, 0, 0);
        }
    }

    strip_zone_abbreviation(value)
        .and_then(|v| NaiveDateTime::parse_from_str(&v, "%a %b %d %H:%M:%S %Y").ok())
}

fn strip_zone_abbreviation(value: &str) -> Option<String> {
    let parts: Vec<&str> = value.split_whitespace().collect();
    let [weekday, month, day, time, zone, year] = parts.as_slice() else {
        return None;
    };
    if !zone.chars().all(|c| c.is_ascii_uppercase()) {
        return None;
    }
    Some(format!("{weekday} {month} {day} {time} {year}"))
}
