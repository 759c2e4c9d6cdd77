//! Payload encoding.
//!
//! Payloads arrive as JSON arrays of flat records. [`PayloadFormat::Json`]
//! stores them untouched; the tabular formats go through a polars
//! [`DataFrame`], one row per record.

use std::io::Cursor;

use harvest_core::{FetchError, Payload, PayloadFormat, Result};
use polars::prelude::*;

/// Encode `payload` for storage in `format`.
///
/// # Errors
/// Returns [`FetchError::Malformed`] if the records cannot be laid out as a
/// table (e.g. nested objects when writing CSV).
pub fn encode(payload: &Payload, format: PayloadFormat) -> Result<Vec<u8>> {
    match format {
        PayloadFormat::Json => Ok(payload.as_bytes().to_vec()),
        PayloadFormat::Csv => {
            let mut df = to_frame(payload)?;
            let mut buf = Vec::new();
            CsvWriter::new(&mut buf)
                .include_header(true)
                .finish(&mut df)
                .map_err(|e| FetchError::Malformed(format!("CSV encoding: {e}")))?;
            Ok(buf)
        }
        PayloadFormat::Parquet => {
            let mut df = to_frame(payload)?;
            let mut buf = Vec::new();
            ParquetWriter::new(&mut buf)
                .finish(&mut df)
                .map_err(|e| FetchError::Malformed(format!("Parquet encoding: {e}")))?;
            Ok(buf)
        }
    }
}

/// Read a JSON-array payload into a [`DataFrame`].
///
/// # Errors
/// Returns [`FetchError::Malformed`] if polars cannot infer a schema.
pub fn to_frame(payload: &Payload) -> Result<DataFrame> {
    JsonReader::new(Cursor::new(payload.as_bytes()))
        .with_json_format(JsonFormat::Json)
        .finish()
        .map_err(|e| FetchError::Malformed(format!("JSON to frame: {e}")))
}
