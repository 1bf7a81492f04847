// ABOUTME: Conversion between sync Values and PostgreSQL wire types
// ABOUTME: ToSql for Value keyed on the parameter type, and column reads keyed on the result type

use bytes::BytesMut;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use std::error::Error;
use tokio_postgres::types::{to_sql_checked, Date, IsNull, Timestamp, ToSql, Type};
use tokio_postgres::Row as PgRow;

use crate::sync::{Row, TableSchema, Value};

type BoxError = Box<dyn Error + Sync + Send>;

/// Encode with `T`'s binary format after checking `T` supports the
/// parameter type the server inferred.
fn encode<T: ToSql>(value: &T, ty: &Type, out: &mut BytesMut) -> Result<IsNull, BoxError> {
    if !T::accepts(ty) {
        return Err(format!(
            "cannot bind a {} value to a parameter of type {}",
            std::any::type_name::<T>(),
            ty
        )
        .into());
    }
    value.to_sql(ty, out)
}

/// Date and timestamp columns read `infinity` and `-infinity` as text;
/// bind them back as the server's special values.
fn encode_special(
    text: &str,
    ty: &Type,
    out: &mut BytesMut,
) -> Option<Result<IsNull, BoxError>> {
    let positive = match text {
        "infinity" => true,
        "-infinity" => false,
        _ => return None,
    };
    let encoded = match *ty {
        Type::DATE => {
            let date: Date<NaiveDate> = if positive {
                Date::PosInfinity
            } else {
                Date::NegInfinity
            };
            encode(&date, ty, out)
        }
        Type::TIMESTAMP => {
            let ts: Timestamp<NaiveDateTime> = if positive {
                Timestamp::PosInfinity
            } else {
                Timestamp::NegInfinity
            };
            encode(&ts, ty, out)
        }
        Type::TIMESTAMPTZ => {
            let ts: Timestamp<DateTime<Utc>> = if positive {
                Timestamp::PosInfinity
            } else {
                Timestamp::NegInfinity
            };
            encode(&ts, ty, out)
        }
        _ => return None,
    };
    Some(encoded)
}

fn date_value(date: Date<NaiveDate>) -> Value {
    match date {
        Date::Value(d) => Value::Date(d),
        Date::PosInfinity => Value::from("infinity"),
        Date::NegInfinity => Value::from("-infinity"),
    }
}

fn timestamp_value<T>(ts: Timestamp<T>, finite: fn(T) -> Value) -> Value {
    match ts {
        Timestamp::Value(t) => finite(t),
        Timestamp::PosInfinity => Value::from("infinity"),
        Timestamp::NegInfinity => Value::from("-infinity"),
    }
}

impl ToSql for Value {
    fn to_sql(&self, ty: &Type, out: &mut BytesMut) -> Result<IsNull, BoxError> {
        match self {
            Value::Null => Ok(IsNull::Yes),
            Value::Bool(b) => encode(b, ty, out),
            Value::Int(i) => match *ty {
                Type::INT2 => encode(&i16::try_from(*i)?, ty, out),
                Type::INT4 => encode(&i32::try_from(*i)?, ty, out),
                Type::FLOAT8 => encode(&(*i as f64), ty, out),
                _ => encode(i, ty, out),
            },
            Value::Float(f) => match *ty {
                Type::FLOAT4 => encode(&(*f as f32), ty, out),
                _ => encode(f, ty, out),
            },
            Value::Text(s) => match encode_special(s, ty, out) {
                Some(encoded) => encoded,
                None => encode(s, ty, out),
            },
            Value::Bytes(b) => encode(b, ty, out),
            Value::Json(j) => encode(j, ty, out),
            Value::Uuid(u) => encode(u, ty, out),
            Value::Date(d) => encode(d, ty, out),
            Value::Timestamp(ts) => encode(ts, ty, out),
            Value::TimestampTz(ts) => encode(ts, ty, out),
        }
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    to_sql_checked!();
}

/// Read column `idx` of a result row.
///
/// Columns outside the native set are expected to arrive as text (the
/// reader casts them), so anything unrecognized is read as a string.
/// Infinite dates and timestamps read as `infinity` / `-infinity` text.
pub fn read_value(row: &PgRow, idx: usize) -> Result<Value, tokio_postgres::Error> {
    let value = match *row.columns()[idx].type_() {
        Type::BOOL => row.try_get::<_, Option<bool>>(idx)?.map(Value::Bool),
        Type::INT2 => row
            .try_get::<_, Option<i16>>(idx)?
            .map(|v| Value::Int(v.into())),
        Type::INT4 => row
            .try_get::<_, Option<i32>>(idx)?
            .map(|v| Value::Int(v.into())),
        Type::INT8 => row.try_get::<_, Option<i64>>(idx)?.map(Value::Int),
        Type::FLOAT4 => row
            .try_get::<_, Option<f32>>(idx)?
            .map(|v| Value::Float(v.into())),
        Type::FLOAT8 => row.try_get::<_, Option<f64>>(idx)?.map(Value::Float),
        Type::UUID => row.try_get::<_, Option<uuid::Uuid>>(idx)?.map(Value::Uuid),
        Type::DATE => row
            .try_get::<_, Option<Date<NaiveDate>>>(idx)?
            .map(date_value),
        Type::TIMESTAMP => row
            .try_get::<_, Option<Timestamp<NaiveDateTime>>>(idx)?
            .map(|ts| timestamp_value(ts, Value::Timestamp)),
        Type::TIMESTAMPTZ => row
            .try_get::<_, Option<Timestamp<DateTime<Utc>>>>(idx)?
            .map(|ts| timestamp_value(ts, Value::TimestampTz)),
        Type::JSONB => row
            .try_get::<_, Option<serde_json::Value>>(idx)?
            .map(Value::Json),
        Type::BYTEA => row.try_get::<_, Option<Vec<u8>>>(idx)?.map(Value::Bytes),
        _ => row.try_get::<_, Option<String>>(idx)?.map(Value::Text),
    };
    Ok(value.unwrap_or(Value::Null))
}

/// Convert a result row into a sync Row named after `schema`'s columns.
pub fn read_row(row: &PgRow, schema: &TableSchema) -> Result<Row, tokio_postgres::Error> {
    let mut out = Row::with_capacity(schema.len());
    for (idx, column) in schema.columns.iter().enumerate() {
        out.set(column.name.clone(), read_value(row, idx)?);
    }
    Ok(out)
}
