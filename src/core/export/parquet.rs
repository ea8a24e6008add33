//! Parquet encoding of cohort result sets
//!
//! Column mapping: boolean → Boolean, integer → Int64, float → Float64,
//! text → Utf8, date → Date32, timestamp → Timestamp(µs) and
//! timestamptz → Timestamp(µs, "UTC").

use crate::config::schema::ParquetCompression;
use crate::domain::table::{CellValue, Column, ColumnKind, TableData};
use crate::domain::{CohortError, Result};
use arrow::array::{
    Array, ArrayRef, BooleanArray, Date32Array, Float64Array, Int64Array, StringArray,
    TimestampMicrosecondArray,
};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef, TimeUnit};
use arrow::record_batch::{RecordBatch, RecordBatchOptions};
use chrono::{DateTime, NaiveDate};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::basic::{Compression, ZstdLevel};
use parquet::file::properties::WriterProperties;
use std::fs::File;
use std::path::Path;
use std::sync::Arc;

const MAX_ROW_GROUP_SIZE: usize = 128 * 1024;

fn export_error(context: &str, e: impl std::fmt::Display) -> CohortError {
    CohortError::Export(format!("{context}: {e}"))
}

fn data_type(kind: ColumnKind) -> DataType {
    match kind {
        ColumnKind::Boolean => DataType::Boolean,
        ColumnKind::Integer => DataType::Int64,
        ColumnKind::Float => DataType::Float64,
        ColumnKind::Text => DataType::Utf8,
        ColumnKind::Date => DataType::Date32,
        ColumnKind::Timestamp => DataType::Timestamp(TimeUnit::Microsecond, None),
        ColumnKind::TimestampTz => DataType::Timestamp(TimeUnit::Microsecond, Some("UTC".into())),
    }
}

fn column_kind(data_type: &DataType) -> Option<ColumnKind> {
    match data_type {
        DataType::Boolean => Some(ColumnKind::Boolean),
        DataType::Int64 => Some(ColumnKind::Integer),
        DataType::Float64 => Some(ColumnKind::Float),
        DataType::Utf8 => Some(ColumnKind::Text),
        DataType::Date32 => Some(ColumnKind::Date),
        DataType::Timestamp(TimeUnit::Microsecond, None) => Some(ColumnKind::Timestamp),
        DataType::Timestamp(TimeUnit::Microsecond, Some(_)) => Some(ColumnKind::TimestampTz),
        _ => None,
    }
}

/// Arrow schema for a table; every column is nullable
pub fn arrow_schema(columns: &[Column]) -> SchemaRef {
    let fields: Vec<Field> = columns
        .iter()
        .map(|c| Field::new(&c.name, data_type(c.kind), true))
        .collect();
    Arc::new(Schema::new(fields))
}

fn epoch_date() -> NaiveDate {
    NaiveDate::default()
}

fn build_array(table: &TableData, idx: usize, kind: ColumnKind) -> Result<ArrayRef> {
    let cells = table.rows.iter().map(|row| &row[idx]);
    let mismatch = |cell: &CellValue| {
        CohortError::Export(format!(
            "column '{}' is {kind} but holds {cell:?}",
            table.columns[idx].name
        ))
    };

    let array: ArrayRef = match kind {
        ColumnKind::Boolean => Arc::new(BooleanArray::from(
            cells
                .map(|c| match c {
                    CellValue::Null => Ok(None),
                    CellValue::Boolean(b) => Ok(Some(*b)),
                    other => Err(mismatch(other)),
                })
                .collect::<Result<Vec<_>>>()?,
        )),
        ColumnKind::Integer => Arc::new(Int64Array::from(
            cells
                .map(|c| match c {
                    CellValue::Null => Ok(None),
                    CellValue::Integer(i) => Ok(Some(*i)),
                    other => Err(mismatch(other)),
                })
                .collect::<Result<Vec<_>>>()?,
        )),
        ColumnKind::Float => Arc::new(Float64Array::from(
            cells
                .map(|c| match c {
                    CellValue::Null => Ok(None),
                    CellValue::Float(f) => Ok(Some(*f)),
                    other => Err(mismatch(other)),
                })
                .collect::<Result<Vec<_>>>()?,
        )),
        ColumnKind::Text => Arc::new(StringArray::from(
            cells
                .map(|c| match c {
                    CellValue::Null => Ok(None),
                    CellValue::Text(s) => Ok(Some(s.as_str())),
                    other => Err(mismatch(other)),
                })
                .collect::<Result<Vec<_>>>()?,
        )),
        ColumnKind::Date => Arc::new(Date32Array::from(
            cells
                .map(|c| match c {
                    CellValue::Null => Ok(None),
                    CellValue::Date(d) => Ok(Some(
                        d.signed_duration_since(epoch_date()).num_days() as i32,
                    )),
                    other => Err(mismatch(other)),
                })
                .collect::<Result<Vec<_>>>()?,
        )),
        ColumnKind::Timestamp => Arc::new(TimestampMicrosecondArray::from(
            cells
                .map(|c| match c {
                    CellValue::Null => Ok(None),
                    CellValue::Timestamp(ts) => Ok(Some(ts.and_utc().timestamp_micros())),
                    other => Err(mismatch(other)),
                })
                .collect::<Result<Vec<_>>>()?,
        )),
        ColumnKind::TimestampTz => Arc::new(
            TimestampMicrosecondArray::from(
                cells
                    .map(|c| match c {
                        CellValue::Null => Ok(None),
                        CellValue::TimestampTz(ts) => Ok(Some(ts.timestamp_micros())),
                        other => Err(mismatch(other)),
                    })
                    .collect::<Result<Vec<_>>>()?,
            )
            .with_timezone("UTC"),
        ),
    };
    Ok(array)
}

/// Converts a table into a single Arrow record batch
///
/// # Errors
///
/// Returns an export error if a cell does not match its column kind.
pub fn table_to_record_batch(table: &TableData) -> Result<RecordBatch> {
    let schema = arrow_schema(&table.columns);
    let arrays = table
        .columns
        .iter()
        .enumerate()
        .map(|(idx, col)| build_array(table, idx, col.kind))
        .collect::<Result<Vec<_>>>()?;

    let options = RecordBatchOptions::new().with_row_count(Some(table.row_count()));
    RecordBatch::try_new_with_options(schema, arrays, &options)
        .map_err(|e| export_error("Failed to build record batch", e))
}

fn writer_properties(compression: ParquetCompression) -> WriterProperties {
    let codec = match compression {
        ParquetCompression::None => Compression::UNCOMPRESSED,
        ParquetCompression::Snappy => Compression::SNAPPY,
        ParquetCompression::Zstd => Compression::ZSTD(ZstdLevel::default()),
    };
    WriterProperties::builder()
        .set_compression(codec)
        .set_max_row_group_size(MAX_ROW_GROUP_SIZE)
        .build()
}

/// Writes a table to a Parquet file
///
/// # Errors
///
/// Returns an export error if the file cannot be created or encoded.
pub fn write_parquet(table: &TableData, path: &Path, compression: ParquetCompression) -> Result<()> {
    let batch = table_to_record_batch(table)?;
    let file = File::create(path)
        .map_err(|e| export_error(&format!("Failed to create {}", path.display()), e))?;

    let mut writer = ArrowWriter::try_new(file, batch.schema(), Some(writer_properties(compression)))
        .map_err(|e| export_error("Failed to open Parquet writer", e))?;
    writer
        .write(&batch)
        .map_err(|e| export_error("Failed to write Parquet data", e))?;
    writer
        .close()
        .map_err(|e| export_error("Failed to finish Parquet file", e))?;

    tracing::debug!(path = %path.display(), rows = table.row_count(), "Parquet file written");
    Ok(())
}

/// Row count recorded in a Parquet file's footer
///
/// # Errors
///
/// Returns an export error if the footer cannot be read.
pub fn parquet_row_count(path: &Path) -> Result<u64> {
    let file = File::open(path)
        .map_err(|e| export_error(&format!("Failed to open {}", path.display()), e))?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)
        .map_err(|e| export_error("Failed to read Parquet footer", e))?;
    let rows = builder.metadata().file_metadata().num_rows();
    Ok(u64::try_from(rows).unwrap_or(0))
}

fn read_cell(array: &ArrayRef, kind: ColumnKind, row: usize) -> Result<CellValue> {
    if array.is_null(row) {
        return Ok(CellValue::Null);
    }
    let downcast_error = || CohortError::Export(format!("unexpected array type for {kind} column"));

    let cell = match kind {
        ColumnKind::Boolean => CellValue::Boolean(
            array
                .as_any()
                .downcast_ref::<BooleanArray>()
                .ok_or_else(downcast_error)?
                .value(row),
        ),
        ColumnKind::Integer => CellValue::Integer(
            array
                .as_any()
                .downcast_ref::<Int64Array>()
                .ok_or_else(downcast_error)?
                .value(row),
        ),
        ColumnKind::Float => CellValue::Float(
            array
                .as_any()
                .downcast_ref::<Float64Array>()
                .ok_or_else(downcast_error)?
                .value(row),
        ),
        ColumnKind::Text => CellValue::Text(
            array
                .as_any()
                .downcast_ref::<StringArray>()
                .ok_or_else(downcast_error)?
                .value(row)
                .to_string(),
        ),
        ColumnKind::Date => {
            let days = array
                .as_any()
                .downcast_ref::<Date32Array>()
                .ok_or_else(downcast_error)?
                .value(row);
            CellValue::Date(epoch_date() + chrono::Duration::days(i64::from(days)))
        }
        ColumnKind::Timestamp | ColumnKind::TimestampTz => {
            let micros = array
                .as_any()
                .downcast_ref::<TimestampMicrosecondArray>()
                .ok_or_else(downcast_error)?
                .value(row);
            let ts = DateTime::from_timestamp_micros(micros)
                .ok_or_else(|| CohortError::Export(format!("timestamp {micros} out of range")))?;
            if kind == ColumnKind::Timestamp {
                CellValue::Timestamp(ts.naive_utc())
            } else {
                CellValue::TimestampTz(ts)
            }
        }
    };
    Ok(cell)
}

/// Reads a cohort Parquet file back into a table
///
/// # Errors
///
/// Returns an export error if the file cannot be read or holds a column
/// type this crate never writes.
pub fn read_table(path: &Path) -> Result<TableData> {
    let file = File::open(path)
        .map_err(|e| export_error(&format!("Failed to open {}", path.display()), e))?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)
        .map_err(|e| export_error("Failed to read Parquet footer", e))?;

    let columns = builder
        .schema()
        .fields()
        .iter()
        .map(|field| {
            column_kind(field.data_type())
                .map(|kind| Column::new(field.name().as_str(), kind))
                .ok_or_else(|| {
                    CohortError::Export(format!(
                        "column '{}' has unsupported type {}",
                        field.name(),
                        field.data_type()
                    ))
                })
        })
        .collect::<Result<Vec<_>>>()?;

    let reader = builder
        .build()
        .map_err(|e| export_error("Failed to open Parquet reader", e))?;

    let mut table = TableData::new(columns);
    for batch in reader {
        let batch = batch.map_err(|e| export_error("Failed to read record batch", e))?;
        for row in 0..batch.num_rows() {
            let cells = table
                .columns
                .iter()
                .enumerate()
                .map(|(idx, col)| read_cell(batch.column(idx), col.kind, row))
                .collect::<Result<Vec<_>>>()?;
            table.push_row(cells).map_err(CohortError::Export)?;
        }
    }
    Ok(table)
}
