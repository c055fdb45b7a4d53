//! Encoding of a [`DataFrame`] as Postgres `COPY ... FROM STDIN` text format.
//!
//! Rows end with `\n`, fields are separated by a tab and `NULL` is `\N`.
//! Backslash, tab, newline and carriage return inside text are escaped.

use arrow::array::{Array, AsArray};
use arrow::datatypes::{DataType, Float64Type, Int64Type, TimeUnit, TimestampMicrosecondType};
use arrow::util::display::array_value_to_string;
use bytes::{BufMut, BytesMut};

use crate::libs::error::Result;
use crate::libs::frame::DataFrame;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// Iterator over chunks of encoded rows.
///
/// Each chunk holds whole rows and is at least `chunk_size` bytes, except
/// the last one.
pub struct CopyChunks<'a> {
    frame: &'a DataFrame,
    next_row: usize,
    chunk_size: usize,
}

impl<'a> CopyChunks<'a> {
    pub fn new(frame: &'a DataFrame, chunk_size: usize) -> Self {
        Self {
            frame,
            next_row: 0,
            chunk_size: chunk_size.max(1),
        }
    }
}

impl Iterator for CopyChunks<'_> {
    type Item = Result<BytesMut>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next_row >= self.frame.num_rows() {
            return None;
        }

        let mut buf = BytesMut::with_capacity(self.chunk_size);
        while self.next_row < self.frame.num_rows() && buf.len() < self.chunk_size {
            if let Err(err) = encode_row(&mut buf, self.frame, self.next_row) {
                self.next_row = self.frame.num_rows();
                return Some(Err(err));
            }
            self.next_row += 1;
        }
        Some(Ok(buf))
    }
}

/// Append row `row` of `frame` to `buf`.
pub(crate) fn encode_row(buf: &mut BytesMut, frame: &DataFrame, row: usize) -> Result<()> {
    for (i, column) in frame.batch().columns().iter().enumerate() {
        if i > 0 {
            buf.put_u8(b'\t');
        }
        encode_value(buf, column.as_ref(), row)?;
    }
    buf.put_u8(b'\n');
    Ok(())
}

/// Append value `row` of `array` in COPY text form.
pub(crate) fn encode_value(buf: &mut BytesMut, array: &dyn Array, row: usize) -> Result<()> {
    if array.is_null(row) {
        buf.put_slice(b"\\N");
        return Ok(());
    }

    match array.data_type() {
        DataType::Int64 => {
            let v = array.as_primitive::<Int64Type>().value(row);
            buf.put_slice(v.to_string().as_bytes());
        }
        DataType::Float64 => put_float(buf, array.as_primitive::<Float64Type>().value(row)),
        DataType::Boolean => {
            buf.put_u8(if array.as_boolean().value(row) { b't' } else { b'f' });
        }
        DataType::Utf8 => put_escaped(buf, array.as_string::<i32>().value(row)),
        DataType::Timestamp(TimeUnit::Microsecond, None) => {
            match array.as_primitive::<TimestampMicrosecondType>().value_as_datetime(row) {
                Some(v) => buf.put_slice(v.format(TIMESTAMP_FORMAT).to_string().as_bytes()),
                None => buf.put_slice(b"\\N"),
            }
        }
        _ => put_escaped(buf, &array_value_to_string(array, row)?),
    }
    Ok(())
}

fn put_float(buf: &mut BytesMut, v: f64) {
    if v.is_nan() {
        buf.put_slice(b"NaN");
    } else if v.is_infinite() {
        if v.is_sign_negative() {
            buf.put_u8(b'-');
        }
        buf.put_slice(b"Infinity");
    } else {
        // Display prints the shortest representation that round-trips.
        buf.put_slice(v.to_string().as_bytes());
    }
}

fn put_escaped(buf: &mut BytesMut, text: &str) {
    buf.reserve(text.len());
    for b in text.bytes() {
        match b {
            b'\\' => buf.put_slice(b"\\\\"),
            b'\t' => buf.put_slice(b"\\t"),
            b'\n' => buf.put_slice(b"\\n"),
            b'\r' => buf.put_slice(b"\\r"),
            _ => buf.put_u8(b),
        }
    }
}
