use bytes::BytesMut;
use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use giraffeql_core::{JsonMap, registry::SqlType};
use postgres_types::{IsNull, ToSql, Type};
use serde_json::Value;
use tokio_postgres::Row;

use crate::{client::SqlError, sql::Expr};

/// A bound statement parameter.
#[derive(Clone, Debug, PartialEq)]
pub enum SqlVal {
    Null,
    Bool(bool),
    I64(i64),
    F64(f64),
    Text(String),
    Json(Value),
    DateTime(DateTime<Utc>),
    Date(NaiveDate),
}

impl SqlVal {
    /// Convert a client supplied JSON value to a parameter of the column's type.
    pub fn from_json(value: &Value, sql_type: SqlType) -> Result<Self, String> {
        if value.is_null() {
            return Ok(Self::Null);
        }

        match (sql_type, value) {
            (SqlType::Text, Value::String(s)) => Ok(Self::Text(s.clone())),
            (SqlType::Integer, Value::Number(n)) => n
                .as_i64()
                .map(Self::I64)
                .ok_or_else(|| format!("{n} is not an integer")),
            (SqlType::Decimal, Value::Number(n)) => n
                .as_f64()
                .map(Self::F64)
                .ok_or_else(|| format!("{n} is not a number")),
            (SqlType::Decimal, Value::String(s)) => s
                .parse()
                .map(Self::F64)
                .map_err(|_| format!("`{s}` is not a decimal")),
            (SqlType::Boolean, Value::Bool(b)) => Ok(Self::Bool(*b)),
            (SqlType::Json, value) => Ok(Self::Json(value.clone())),
            (SqlType::Date, Value::String(s)) => NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .map(Self::Date)
                .map_err(|_| format!("`{s}` is not a date")),
            (SqlType::DateTime, Value::String(s)) => DateTime::parse_from_rfc3339(s)
                .map(|dt| Self::DateTime(dt.with_timezone(&Utc)))
                .map_err(|_| format!("`{s}` is not an RFC 3339 timestamp")),
            (SqlType::DateTime, Value::Number(n)) => n
                .as_i64()
                .and_then(|secs| DateTime::from_timestamp(secs, 0))
                .map(Self::DateTime)
                .ok_or_else(|| format!("{n} is not a unix timestamp")),
            (sql_type, value) => Err(format!("expected {sql_type:?}, got {value}")),
        }
    }
}

/// The cast attached to every parameter of the given type, so the server never has to guess.
pub fn pg_cast(sql_type: SqlType) -> &'static str {
    match sql_type {
        SqlType::Text => "text",
        SqlType::Integer => "int8",
        SqlType::Decimal => "float8",
        SqlType::Boolean => "bool",
        SqlType::Json => "jsonb",
        SqlType::Date => "date",
        SqlType::DateTime => "timestamptz",
    }
}

/// Positional parameters of one statement.
#[derive(Debug, Default)]
pub struct SqlParams {
    values: Vec<SqlVal>,
}

impl SqlParams {
    /// Bind `value` and get the `$n::type` expression referring to it.
    pub fn bind<'a>(&mut self, value: SqlVal, sql_type: SqlType) -> Expr<'a> {
        let index = self.values.len();
        self.values.push(value);
        Expr::cast(Expr::param(index), pg_cast(sql_type))
    }

    pub fn values(&self) -> &[SqlVal] {
        &self.values
    }

    pub fn into_values(self) -> Vec<SqlVal> {
        self.values
    }
}

impl ToSql for SqlVal {
    fn to_sql(
        &self,
        ty: &Type,
        out: &mut BytesMut,
    ) -> Result<IsNull, Box<dyn std::error::Error + Sync + Send>>
    where
        Self: Sized,
    {
        match &self {
            SqlVal::Null => Ok(IsNull::Yes),
            SqlVal::Bool(b) => b.to_sql(ty, out),
            SqlVal::I64(i) => i.to_sql(ty, out),
            SqlVal::F64(f) => f.to_sql(ty, out),
            SqlVal::Text(s) => s.as_str().to_sql(ty, out),
            SqlVal::Json(json) => json.to_sql(ty, out),
            SqlVal::DateTime(dt) => dt.to_sql(ty, out),
            SqlVal::Date(d) => d.to_sql(ty, out),
        }
    }

    fn accepts(_ty: &Type) -> bool
    where
        Self: Sized,
    {
        true
    }

    fn to_sql_checked(
        &self,
        ty: &Type,
        out: &mut BytesMut,
    ) -> Result<IsNull, Box<dyn std::error::Error + Sync + Send>> {
        match &self {
            SqlVal::Null => Ok(IsNull::Yes),
            SqlVal::Bool(b) => b.to_sql_checked(ty, out),
            SqlVal::I64(i) => i.to_sql_checked(ty, out),
            SqlVal::F64(f) => f.to_sql_checked(ty, out),
            SqlVal::Text(s) => s.as_str().to_sql_checked(ty, out),
            SqlVal::Json(json) => json.to_sql_checked(ty, out),
            SqlVal::DateTime(dt) => dt.to_sql_checked(ty, out),
            SqlVal::Date(d) => d.to_sql_checked(ty, out),
        }
    }
}

/// Decode a row into a JSON object keyed by column name.
pub fn decode_row(row: &Row) -> Result<JsonMap, SqlError> {
    let mut output = JsonMap::with_capacity(row.len());

    for (index, column) in row.columns().iter().enumerate() {
        let value = read_column(row, index, column.type_()).map_err(|error| {
            SqlError::new(format!("failed to decode column `{}`: {error}", column.name()))
        })?;
        output.insert(column.name().to_string(), value);
    }

    Ok(output)
}

fn read_column(row: &Row, index: usize, ty: &Type) -> Result<Value, tokio_postgres::Error> {
    fn json<T: Into<Value>>(value: Option<T>) -> Value {
        value.map(Into::into).unwrap_or(Value::Null)
    }

    let value = if *ty == Type::BOOL {
        json(row.try_get::<_, Option<bool>>(index)?)
    } else if *ty == Type::INT2 {
        json(row.try_get::<_, Option<i16>>(index)?)
    } else if *ty == Type::INT4 {
        json(row.try_get::<_, Option<i32>>(index)?)
    } else if *ty == Type::INT8 {
        json(row.try_get::<_, Option<i64>>(index)?)
    } else if *ty == Type::FLOAT4 {
        json(row.try_get::<_, Option<f32>>(index)?)
    } else if *ty == Type::FLOAT8 {
        json(row.try_get::<_, Option<f64>>(index)?)
    } else if *ty == Type::JSON || *ty == Type::JSONB {
        row.try_get::<_, Option<Value>>(index)?
            .unwrap_or(Value::Null)
    } else if *ty == Type::TIMESTAMPTZ {
        json(
            row.try_get::<_, Option<DateTime<Utc>>>(index)?
                .map(format_datetime),
        )
    } else if *ty == Type::TIMESTAMP {
        json(
            row.try_get::<_, Option<NaiveDateTime>>(index)?
                .map(|dt| format_datetime(dt.and_utc())),
        )
    } else if *ty == Type::DATE {
        json(
            row.try_get::<_, Option<NaiveDate>>(index)?
                .map(|date| date.to_string()),
        )
    } else {
        // text, varchar, bpchar, name and anything else readable as a string
        json(row.try_get::<_, Option<String>>(index)?)
    };

    Ok(value)
}

pub fn format_datetime(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn json_to_params() {
        assert_eq!(
            Ok(SqlVal::Text("a".into())),
            SqlVal::from_json(&json!("a"), SqlType::Text)
        );
        assert_eq!(Ok(SqlVal::Null), SqlVal::from_json(&json!(null), SqlType::Integer));
        assert_eq!(
            Ok(SqlVal::F64(12.5)),
            SqlVal::from_json(&json!("12.50"), SqlType::Decimal)
        );
        assert_eq!(
            Ok(SqlVal::Json(json!(["a", "b"]))),
            SqlVal::from_json(&json!(["a", "b"]), SqlType::Json)
        );
        assert!(SqlVal::from_json(&json!("a"), SqlType::Integer).is_err());
        assert!(SqlVal::from_json(&json!(1.5), SqlType::Integer).is_err());
        assert!(SqlVal::from_json(&json!("yesterday"), SqlType::DateTime).is_err());
    }

    #[test]
    fn datetimes_round_trip_through_cursor_format() {
        let SqlVal::DateTime(dt) =
            SqlVal::from_json(&json!("2024-01-02T00:00:00Z"), SqlType::DateTime).unwrap()
        else {
            panic!("expected a timestamp");
        };
        assert_eq!("2024-01-02T00:00:00Z", format_datetime(dt));

        assert_eq!(
            Ok(SqlVal::DateTime(dt)),
            SqlVal::from_json(&json!(1704153600), SqlType::DateTime)
        );
    }

    #[test]
    fn params_are_cast() {
        let mut params = SqlParams::default();
        assert_eq!("$1::text", params.bind(SqlVal::Null, SqlType::Text).to_string());
        assert_eq!(
            "$2::int8",
            params.bind(SqlVal::I64(3), SqlType::Integer).to_string()
        );
        assert_eq!(2, params.values().len());
    }
}
