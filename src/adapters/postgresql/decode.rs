//! Row decoding into driver-independent cells

use crate::domain::table::{CellValue, ColumnKind};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use tokio_postgres::types::Type;
use tokio_postgres::Row;

/// Maps a PostgreSQL column type to an exportable column kind
///
/// Returns `None` for types that have no lossless export mapping; those
/// columns need a cast in the cohort definition.
pub fn column_kind(ty: &Type) -> Option<ColumnKind> {
    match *ty {
        Type::BOOL => Some(ColumnKind::Boolean),
        Type::INT2 | Type::INT4 | Type::INT8 => Some(ColumnKind::Integer),
        Type::FLOAT4 | Type::FLOAT8 => Some(ColumnKind::Float),
        Type::TEXT
        | Type::VARCHAR
        | Type::BPCHAR
        | Type::NAME
        | Type::UUID
        | Type::JSON
        | Type::JSONB => Some(ColumnKind::Text),
        Type::DATE => Some(ColumnKind::Date),
        Type::TIMESTAMP => Some(ColumnKind::Timestamp),
        Type::TIMESTAMPTZ => Some(ColumnKind::TimestampTz),
        _ => None,
    }
}

/// Reads one cell of a row
///
/// `ty` must be a type accepted by [`column_kind`].
pub fn decode_cell(row: &Row, idx: usize, ty: &Type) -> Result<CellValue, tokio_postgres::Error> {
    let cell = match *ty {
        Type::BOOL => row
            .try_get::<_, Option<bool>>(idx)?
            .map(CellValue::Boolean),
        Type::INT2 => row
            .try_get::<_, Option<i16>>(idx)?
            .map(|v| CellValue::Integer(i64::from(v))),
        Type::INT4 => row
            .try_get::<_, Option<i32>>(idx)?
            .map(|v| CellValue::Integer(i64::from(v))),
        Type::INT8 => row.try_get::<_, Option<i64>>(idx)?.map(CellValue::Integer),
        Type::FLOAT4 => row
            .try_get::<_, Option<f32>>(idx)?
            .map(|v| CellValue::Float(f64::from(v))),
        Type::FLOAT8 => row.try_get::<_, Option<f64>>(idx)?.map(CellValue::Float),
        Type::UUID => row
            .try_get::<_, Option<uuid::Uuid>>(idx)?
            .map(|v| CellValue::Text(v.to_string())),
        Type::JSON | Type::JSONB => row
            .try_get::<_, Option<serde_json::Value>>(idx)?
            .map(|v| CellValue::Text(v.to_string())),
        Type::DATE => row.try_get::<_, Option<NaiveDate>>(idx)?.map(CellValue::Date),
        Type::TIMESTAMP => row
            .try_get::<_, Option<NaiveDateTime>>(idx)?
            .map(CellValue::Timestamp),
        Type::TIMESTAMPTZ => row
            .try_get::<_, Option<DateTime<Utc>>>(idx)?
            .map(CellValue::TimestampTz),
        _ => row.try_get::<_, Option<String>>(idx)?.map(CellValue::Text),
    };
    Ok(cell.unwrap_or(CellValue::Null))
}
