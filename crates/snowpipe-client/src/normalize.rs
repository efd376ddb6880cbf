//! Value normalizer
//!
//! Coerces producer-supplied values to the service's column-typed JSON
//! representation: decimals rounded to the column scale, timestamps in
//! UTC with scale-driven fractional digits, binary as base64, variants as
//! nested JSON. Null values normalize to JSON null and are omitted at
//! serialization time.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bigdecimal::{BigDecimal, RoundingMode, ToPrimitive, Zero};
use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Timelike, Utc};
use serde_json::Value;

use crate::error::SchemaError;
use crate::schema::{ColumnSpec, ColumnType, TableSchema};
use crate::value::{Row, RowValue};

/// Default and maximum fractional-second digits
const MAX_TIME_SCALE: u32 = 9;

/// Normalize a whole row against the schema
///
/// Fails on the first key that is not a schema column. Null values are
/// dropped from the output map.
pub fn normalize_row(
    schema: &TableSchema,
    row: &Row,
) -> Result<serde_json::Map<String, Value>, SchemaError> {
    let mut out = serde_json::Map::with_capacity(row.len());
    for (name, value) in row {
        let spec = schema
            .column(name)
            .ok_or_else(|| SchemaError::UnknownColumn(name.clone()))?;
        let normalized = normalize_value(spec, value)?;
        if !normalized.is_null() {
            out.insert(name.clone(), normalized);
        }
    }
    Ok(out)
}

/// Serialized byte size of a row once normalized (NDJSON line incl. `\n`)
pub fn estimate_row_bytes(schema: &TableSchema, row: &Row) -> Result<usize, SchemaError> {
    let map = normalize_row(schema, row)?;
    let bytes = serde_json::to_vec(&Value::Object(map))
        .map_err(|e| SchemaError::Serialize(e.to_string()))?;
    Ok(bytes.len() + 1)
}

/// Normalize one value for one column
pub fn normalize_value(spec: &ColumnSpec, value: &RowValue) -> Result<Value, SchemaError> {
    if value.is_null() {
        return Ok(Value::Null);
    }
    match spec.ty {
        ColumnType::Boolean => normalize_boolean(spec, value),
        ColumnType::Number => normalize_number(spec, value),
        ColumnType::Varchar => normalize_varchar(spec, value),
        ColumnType::Binary => normalize_binary(spec, value),
        ColumnType::Variant => normalize_variant(spec, value),
        ColumnType::Date => normalize_date(spec, value),
        ColumnType::Time => normalize_time(spec, value),
        ColumnType::TimestampNtz | ColumnType::TimestampLtz | ColumnType::TimestampTz => {
            normalize_timestamp(spec, value)
        }
    }
}

fn mismatch(spec: &ColumnSpec, value: &RowValue) -> SchemaError {
    SchemaError::TypeMismatch {
        column: spec.name.clone(),
        expected: spec.ty.as_str(),
        got: value.kind(),
    }
}

fn invalid(spec: &ColumnSpec, detail: impl Into<String>) -> SchemaError {
    SchemaError::Invalid {
        column: spec.name.clone(),
        detail: detail.into(),
    }
}

fn normalize_boolean(spec: &ColumnSpec, value: &RowValue) -> Result<Value, SchemaError> {
    let b = match value {
        RowValue::Bool(b) => *b,
        RowValue::Int(i) => *i != 0,
        RowValue::Float(f) => *f != 0.0,
        RowValue::Decimal(d) => !d.is_zero(),
        RowValue::Str(s) => {
            let t = s.trim();
            if t.eq_ignore_ascii_case("true") {
                true
            } else if t.eq_ignore_ascii_case("false") {
                false
            } else if let Ok(d) = t.parse::<BigDecimal>() {
                !d.is_zero()
            } else {
                return Err(invalid(spec, format!("'{t}' is not a boolean")));
            }
        }
        _ => return Err(mismatch(spec, value)),
    };
    Ok(Value::Bool(b))
}

fn normalize_number(spec: &ColumnSpec, value: &RowValue) -> Result<Value, SchemaError> {
    let decimal = match value {
        RowValue::Int(i) => BigDecimal::from(*i),
        RowValue::Float(f) => {
            BigDecimal::try_from(*f).map_err(|e| invalid(spec, e.to_string()))?
        }
        RowValue::Decimal(d) => d.clone(),
        RowValue::Str(s) => s
            .trim()
            .parse::<BigDecimal>()
            .map_err(|e| invalid(spec, format!("'{}': {e}", s.trim())))?,
        _ => return Err(mismatch(spec, value)),
    };

    // Round half-away-from-zero to the column scale before the precision
    // check so a value that rounds into range passes.
    let decimal = match spec.scale {
        Some(scale) => decimal.with_scale_round(scale as i64, RoundingMode::HalfUp),
        None => decimal,
    };

    if let Some(precision) = spec.precision {
        let digits = integer_digit_count(&decimal);
        if digits > precision {
            return Err(SchemaError::PrecisionExceeded {
                column: spec.name.clone(),
                digits,
                precision,
            });
        }
    }

    json_number(spec, &decimal)
}

/// Digits left of the decimal point in `|decimal|`
fn integer_digit_count(decimal: &BigDecimal) -> u32 {
    let truncated = decimal.abs().with_scale_round(0, RoundingMode::Down);
    truncated.to_string().len() as u32
}

fn json_number(spec: &ColumnSpec, decimal: &BigDecimal) -> Result<Value, SchemaError> {
    if decimal.is_integer() {
        if let Some(i) = decimal.to_i64() {
            return Ok(Value::from(i));
        }
    }
    let f = decimal
        .to_f64()
        .filter(|f| f.is_finite())
        .ok_or_else(|| invalid(spec, format!("{decimal} is not representable")))?;
    serde_json::Number::from_f64(f)
        .map(Value::Number)
        .ok_or_else(|| invalid(spec, format!("{decimal} is not representable")))
}

fn normalize_varchar(spec: &ColumnSpec, value: &RowValue) -> Result<Value, SchemaError> {
    let s = match value {
        RowValue::Str(s) => s.clone(),
        RowValue::Date(d) => format_date(*d),
        RowValue::Time(t) => format!("{}.{:07}", t.format("%H:%M:%S"), sub_second_nanos(t) / 100),
        RowValue::Timestamp(dt) => format_datetime_roundtrip(dt),
        RowValue::Uuid(u) => u.to_string(),
        RowValue::Bool(b) => b.to_string(),
        RowValue::Int(i) => i.to_string(),
        RowValue::Float(f) => f.to_string(),
        RowValue::Decimal(d) => d.to_string(),
        RowValue::Json(v) => {
            serde_json::to_string(v).map_err(|e| SchemaError::Serialize(e.to_string()))?
        }
        _ => return Err(mismatch(spec, value)),
    };
    if let Some(max) = spec.length {
        let len = s.chars().count();
        if len > max {
            return Err(SchemaError::LengthExceeded {
                column: spec.name.clone(),
                len,
                max,
            });
        }
    }
    Ok(Value::String(s))
}

fn normalize_binary(spec: &ColumnSpec, value: &RowValue) -> Result<Value, SchemaError> {
    let bytes = match value {
        RowValue::Bytes(b) => b.clone(),
        RowValue::Str(s) => {
            decode_hex(s).ok_or_else(|| invalid(spec, format!("'{s}' is not valid hex")))?
        }
        _ => return Err(mismatch(spec, value)),
    };
    Ok(Value::String(BASE64.encode(bytes)))
}

/// Decode a hex string, tolerating an `0x` prefix; even length required
fn decode_hex(s: &str) -> Option<Vec<u8>> {
    let s = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")).unwrap_or(s);
    if s.len() % 2 != 0 || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    s.as_bytes()
        .chunks(2)
        .map(|pair| {
            let text = std::str::from_utf8(pair).ok()?;
            u8::from_str_radix(text, 16).ok()
        })
        .collect()
}

fn normalize_variant(spec: &ColumnSpec, value: &RowValue) -> Result<Value, SchemaError> {
    let v = match value {
        // Parseable JSON strings are parsed; anything else stays a string.
        RowValue::Str(s) => match serde_json::from_str::<Value>(s) {
            Ok(parsed) => parsed,
            Err(_) => Value::String(s.clone()),
        },
        RowValue::Json(v) => v.clone(),
        RowValue::Bool(b) => Value::Bool(*b),
        RowValue::Int(i) => Value::from(*i),
        RowValue::Float(f) => serde_json::Number::from_f64(*f)
            .map(Value::Number)
            .ok_or_else(|| invalid(spec, "non-finite float"))?,
        RowValue::Decimal(d) => json_number(spec, d)?,
        RowValue::Date(d) => Value::String(format_date(*d)),
        RowValue::Time(t) => Value::String(format_time(t, MAX_TIME_SCALE)),
        RowValue::Timestamp(dt) => Value::String(format_timestamp(dt, MAX_TIME_SCALE)),
        RowValue::Bytes(b) => Value::String(BASE64.encode(b)),
        RowValue::Uuid(u) => Value::String(u.to_string()),
        RowValue::Null => Value::Null,
    };
    Ok(v)
}

fn normalize_date(spec: &ColumnSpec, value: &RowValue) -> Result<Value, SchemaError> {
    let date = match value {
        RowValue::Date(d) => *d,
        RowValue::Timestamp(dt) => dt.date_naive(),
        RowValue::Str(s) => parse_date(s.trim()).ok_or_else(|| {
            invalid(spec, format!("'{}' is not a date", s.trim()))
        })?,
        _ => return Err(mismatch(spec, value)),
    };
    Ok(Value::String(format_date(date)))
}

fn parse_date(s: &str) -> Option<NaiveDate> {
    if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Some(d);
    }
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc).date_naive())
}

fn normalize_time(spec: &ColumnSpec, value: &RowValue) -> Result<Value, SchemaError> {
    let scale = clamp_scale(spec.scale);
    let time = match value {
        RowValue::Time(t) => *t,
        RowValue::Timestamp(dt) => dt.time(),
        RowValue::Str(s) => {
            let t = s.trim();
            NaiveTime::parse_from_str(t, "%H:%M:%S%.f")
                .or_else(|_| NaiveTime::parse_from_str(t, "%H:%M:%S"))
                .map_err(|_| invalid(spec, format!("'{t}' is not a time")))?
        }
        _ => return Err(mismatch(spec, value)),
    };
    Ok(Value::String(format_time(&time, scale)))
}

fn normalize_timestamp(spec: &ColumnSpec, value: &RowValue) -> Result<Value, SchemaError> {
    let scale = clamp_scale(spec.scale);
    let dt: DateTime<Utc> = match value {
        RowValue::Timestamp(dt) => *dt,
        RowValue::Date(d) => {
            let midnight = d.and_hms_opt(0, 0, 0).ok_or_else(|| invalid(spec, "bad date"))?;
            Utc.from_utc_datetime(&midnight)
        }
        // Integers are Unix milliseconds when the column has sub-second
        // scale, Unix seconds otherwise.
        RowValue::Int(i) => {
            let parsed = if spec.scale.map(|s| s > 0).unwrap_or(false) {
                Utc.timestamp_millis_opt(*i).single()
            } else {
                Utc.timestamp_opt(*i, 0).single()
            };
            parsed.ok_or_else(|| invalid(spec, format!("{i} is out of timestamp range")))?
        }
        RowValue::Str(s) => {
            let t = s.trim();
            DateTime::parse_from_rfc3339(t)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|_| invalid(spec, format!("'{t}' is not a timestamp")))?
        }
        _ => return Err(mismatch(spec, value)),
    };
    Ok(Value::String(format_timestamp(&dt, scale)))
}

fn clamp_scale(scale: Option<u32>) -> u32 {
    scale.unwrap_or(MAX_TIME_SCALE).min(MAX_TIME_SCALE)
}

fn format_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

/// Fractional-second suffix with exactly `scale` digits (empty at scale 0)
fn fraction(nanos: u32, scale: u32) -> String {
    if scale == 0 {
        return String::new();
    }
    let digits = nanos / 10u32.pow(MAX_TIME_SCALE - scale);
    format!(".{digits:0width$}", width = scale as usize)
}

fn sub_second_nanos(time: &NaiveTime) -> u32 {
    // Leap seconds fold into the final second.
    time.nanosecond() % 1_000_000_000
}

fn format_time(time: &NaiveTime, scale: u32) -> String {
    format!("{}{}", time.format("%H:%M:%S"), fraction(sub_second_nanos(time), scale))
}

/// UTC timestamp with trailing `Z` and scale-driven fraction
fn format_timestamp(dt: &DateTime<Utc>, scale: u32) -> String {
    format!(
        "{}{}Z",
        dt.format("%Y-%m-%dT%H:%M:%S"),
        fraction(sub_second_nanos(&dt.time()), scale)
    )
}

/// Round-trip ISO-8601 with a fixed 7-digit fraction and explicit offset,
/// used when date-times are stringified into VARCHAR columns
fn format_datetime_roundtrip(dt: &DateTime<Utc>) -> String {
    format!(
        "{}.{:07}+00:00",
        dt.format("%Y-%m-%dT%H:%M:%S"),
        sub_second_nanos(&dt.time()) / 100
    )
}
