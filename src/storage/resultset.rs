//! Result-set serialisation: columns are mapped to JSON by the backend's
//! reported type name. Table-driven — no OID literals inline, just a small
//! `const` slice of `(type name, decoder)`.

use serde_json::{Map, Value as JsonValue};
use sqlx::{Column, Row, TypeInfo, postgres::PgRow};

use super::error::StorageError;

type Decoder = fn(&PgRow, &str) -> Result<JsonValue, StorageError>;

const DECODERS: &[(&str, Decoder)] = &[
    ("INT2", decode_int::<i16>),
    ("INT4", decode_int::<i32>),
    ("INT8", decode_int::<i64>),
    ("FLOAT4", decode_float::<f32>),
    ("FLOAT8", decode_float::<f64>),
    ("JSONB", decode_jsonb),
    ("JSON", decode_jsonb),
    ("TIMESTAMPTZ", decode_text),
    ("BPCHAR", decode_bpchar),
];

fn decode_int<T>(row: &PgRow, col: &str) -> Result<JsonValue, StorageError>
where
    T: Into<i64> + for<'r> sqlx::Decode<'r, sqlx::Postgres> + sqlx::Type<sqlx::Postgres>,
{
    let v: Option<T> = row.try_get(col).map_err(StorageError::from_sqlx)?;
    Ok(v.map_or(JsonValue::Null, |v| JsonValue::Number(v.into().into())))
}

fn decode_float<T>(row: &PgRow, col: &str) -> Result<JsonValue, StorageError>
where
    T: Into<f64> + for<'r> sqlx::Decode<'r, sqlx::Postgres> + sqlx::Type<sqlx::Postgres>,
{
    let v: Option<T> = row.try_get(col).map_err(StorageError::from_sqlx)?;
    Ok(v.map_or(JsonValue::Null, |v| {
        serde_json::Number::from_f64(v.into()).map_or(JsonValue::Null, JsonValue::Number)
    }))
}

/// Default decoder for everything not named above: text representation, an
/// empty value becoming `""` rather than null.
fn decode_text(row: &PgRow, col: &str) -> Result<JsonValue, StorageError> {
    let v: Option<String> = row.try_get(col).map_err(StorageError::from_sqlx)?;
    Ok(match v {
        Some(s) => JsonValue::String(s),
        None => JsonValue::Null,
    })
}

/// `char(n)` (OID 1042): trimmed of trailing padding spaces.
fn decode_bpchar(row: &PgRow, col: &str) -> Result<JsonValue, StorageError> {
    let v: Option<String> = row.try_get(col).map_err(StorageError::from_sqlx)?;
    Ok(match v {
        Some(s) => JsonValue::String(s.trim_end().to_string()),
        None => JsonValue::Null,
    })
}

/// `jsonb` (OID 3802): parsed and inlined rather than re-quoted as a string.
fn decode_jsonb(row: &PgRow, col: &str) -> Result<JsonValue, StorageError> {
    let v: Option<JsonValue> = row.try_get(col).map_err(StorageError::from_sqlx)?;
    Ok(v.unwrap_or(JsonValue::Null))
}

pub fn row_to_map(row: &PgRow) -> Result<Map<String, JsonValue>, StorageError> {
    let mut out = Map::with_capacity(row.columns().len());
    for col in row.columns() {
        let name = col.name();
        let type_name = col.type_info().name();
        let decoder = DECODERS
            .iter()
            .find(|(n, _)| *n == type_name)
            .map_or(decode_text as Decoder, |(_, d)| *d);
        out.insert(name.to_string(), decoder(row, name)?);
    }
    Ok(out)
}

/// `{count: int, rows: [ {colName: value, …}, … ]}`.
#[derive(Debug, serde::Serialize)]
pub struct QueryResult {
    pub count: i64,
    pub rows: Vec<Map<String, JsonValue>>,
}

impl QueryResult {
    pub fn from_rows(rows: Vec<PgRow>) -> Result<Self, StorageError> {
        let mapped = rows.iter().map(row_to_map).collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            count: i64::try_from(mapped.len()).unwrap_or(i64::MAX),
            rows: mapped,
        })
    }
}
