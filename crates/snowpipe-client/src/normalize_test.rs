//! Normalizer coverage: coercions, rounding, formats, and rejections

use bigdecimal::BigDecimal;
use chrono::{NaiveDate, NaiveTime, TimeZone, Utc};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::error::SchemaError;
use crate::normalize::{estimate_row_bytes, normalize_row, normalize_value};
use crate::schema::{ColumnSpec, ColumnType, SchemaObjectCoords, TableSchema};
use crate::value::{row, RowValue};

fn col(ty: ColumnType) -> ColumnSpec {
    ColumnSpec::new("C", ty)
}

fn norm(spec: &ColumnSpec, value: RowValue) -> Result<Value, SchemaError> {
    normalize_value(spec, &value)
}

fn dec(s: &str) -> BigDecimal {
    s.parse().unwrap()
}

// ---------------------------------------------------------------------------
// BOOLEAN
// ---------------------------------------------------------------------------

#[test]
fn test_boolean_coercions() {
    let spec = col(ColumnType::Boolean);
    assert_eq!(norm(&spec, true.into()).unwrap(), json!(true));
    assert_eq!(norm(&spec, 0i64.into()).unwrap(), json!(false));
    assert_eq!(norm(&spec, 2i64.into()).unwrap(), json!(true));
    assert_eq!(norm(&spec, 0.0f64.into()).unwrap(), json!(false));
    assert_eq!(norm(&spec, RowValue::Decimal(dec("1.5"))).unwrap(), json!(true));
    assert_eq!(norm(&spec, "TRUE".into()).unwrap(), json!(true));
    assert_eq!(norm(&spec, "False".into()).unwrap(), json!(false));
    assert_eq!(norm(&spec, "0".into()).unwrap(), json!(false));
    assert_eq!(norm(&spec, "3.14".into()).unwrap(), json!(true));
}

#[test]
fn test_boolean_rejections() {
    let spec = col(ColumnType::Boolean);
    assert!(matches!(
        norm(&spec, "maybe".into()),
        Err(SchemaError::Invalid { .. })
    ));
    assert!(matches!(
        norm(&spec, RowValue::Bytes(vec![1])),
        Err(SchemaError::TypeMismatch { .. })
    ));
}

// ---------------------------------------------------------------------------
// NUMBER
// ---------------------------------------------------------------------------

#[test]
fn test_number_passthrough() {
    let spec = col(ColumnType::Number);
    assert_eq!(norm(&spec, 42i64.into()).unwrap(), json!(42));
    assert_eq!(norm(&spec, "17".into()).unwrap(), json!(17));
    assert_eq!(norm(&spec, RowValue::Decimal(dec("-5"))).unwrap(), json!(-5));
}

#[test]
fn test_number_rounds_half_away_from_zero() {
    let spec = ColumnSpec::new("C", ColumnType::Number).with_precision_scale(10, 0);
    assert_eq!(norm(&spec, RowValue::Decimal(dec("2.5"))).unwrap(), json!(3));
    assert_eq!(norm(&spec, RowValue::Decimal(dec("-2.5"))).unwrap(), json!(-3));
    assert_eq!(norm(&spec, RowValue::Decimal(dec("2.4"))).unwrap(), json!(2));

    let two_places = ColumnSpec::new("C", ColumnType::Number).with_precision_scale(10, 2);
    assert_eq!(
        norm(&two_places, RowValue::Decimal(dec("1.005"))).unwrap(),
        json!(1.01)
    );
}

#[test]
fn test_number_precision_boundary() {
    let spec = ColumnSpec::new("C", ColumnType::Number).with_precision_scale(3, 0);
    // Exactly P integer digits passes.
    assert_eq!(norm(&spec, 999i64.into()).unwrap(), json!(999));
    assert_eq!(norm(&spec, (-999i64).into()).unwrap(), json!(-999));
    // One more digit throws.
    assert!(matches!(
        norm(&spec, 1000i64.into()),
        Err(SchemaError::PrecisionExceeded { digits: 4, precision: 3, .. })
    ));
}

#[test]
fn test_number_rounding_applies_before_precision_check() {
    let spec = ColumnSpec::new("C", ColumnType::Number).with_precision_scale(3, 0);
    // 999.4 rounds to 999: passes. 999.5 rounds to 1000: rejected.
    assert_eq!(norm(&spec, RowValue::Decimal(dec("999.4"))).unwrap(), json!(999));
    assert!(norm(&spec, RowValue::Decimal(dec("999.5"))).is_err());
}

#[test]
fn test_number_idempotent_normalization() {
    let spec = ColumnSpec::new("C", ColumnType::Number).with_precision_scale(10, 2);
    let once = norm(&spec, RowValue::Decimal(dec("12.345"))).unwrap();
    // Feeding the normalized value back through changes nothing.
    let twice = norm(&spec, RowValue::Float(once.as_f64().unwrap())).unwrap();
    assert_eq!(once, twice);
}

#[test]
fn test_number_rejections() {
    let spec = col(ColumnType::Number);
    assert!(norm(&spec, "12x".into()).is_err());
    assert!(norm(&spec, RowValue::Bytes(vec![0])).is_err());
}

// ---------------------------------------------------------------------------
// VARCHAR
// ---------------------------------------------------------------------------

#[test]
fn test_varchar_fixed_formats() {
    let spec = col(ColumnType::Varchar);
    let date = NaiveDate::from_ymd_opt(2024, 3, 9).unwrap();
    assert_eq!(norm(&spec, date.into()).unwrap(), json!("2024-03-09"));

    let time = NaiveTime::from_hms_micro_opt(8, 5, 7, 123_456).unwrap();
    assert_eq!(norm(&spec, time.into()).unwrap(), json!("08:05:07.1234560"));

    let dt = Utc.with_ymd_and_hms(2024, 3, 9, 8, 5, 7).unwrap();
    assert_eq!(
        norm(&spec, dt.into()).unwrap(),
        json!("2024-03-09T08:05:07.0000000+00:00")
    );

    let id = Uuid::nil();
    assert_eq!(
        norm(&spec, id.into()).unwrap(),
        json!("00000000-0000-0000-0000-000000000000")
    );

    assert_eq!(norm(&spec, 7i64.into()).unwrap(), json!("7"));
    assert_eq!(norm(&spec, true.into()).unwrap(), json!("true"));
}

#[test]
fn test_varchar_length_enforced() {
    let spec = ColumnSpec::new("C", ColumnType::Varchar).with_length(3);
    assert_eq!(norm(&spec, "abc".into()).unwrap(), json!("abc"));
    assert!(matches!(
        norm(&spec, "abcd".into()),
        Err(SchemaError::LengthExceeded { len: 4, max: 3, .. })
    ));
}

// ---------------------------------------------------------------------------
// BINARY
// ---------------------------------------------------------------------------

#[test]
fn test_binary_bytes_to_base64() {
    let spec = col(ColumnType::Binary);
    assert_eq!(
        norm(&spec, RowValue::Bytes(vec![0xde, 0xad, 0xbe, 0xef])).unwrap(),
        json!("3q2+7w==")
    );
}

#[test]
fn test_binary_hex_decoding() {
    let spec = col(ColumnType::Binary);
    assert_eq!(norm(&spec, "deadbeef".into()).unwrap(), json!("3q2+7w=="));
    assert_eq!(norm(&spec, "0xDEADBEEF".into()).unwrap(), json!("3q2+7w=="));
}

#[test]
fn test_binary_rejections() {
    let spec = col(ColumnType::Binary);
    // Odd length.
    assert!(norm(&spec, "abc".into()).is_err());
    // Non-hex digits.
    assert!(norm(&spec, "zzzz".into()).is_err());
    // Other shapes fail outright.
    assert!(norm(&spec, 1i64.into()).is_err());
}

// ---------------------------------------------------------------------------
// VARIANT
// ---------------------------------------------------------------------------

#[test]
fn test_variant_parses_json_strings() {
    let spec = col(ColumnType::Variant);
    assert_eq!(
        norm(&spec, r#"{"a":[1,2]}"#.into()).unwrap(),
        json!({"a": [1, 2]})
    );
    // Non-JSON strings stay strings.
    assert_eq!(norm(&spec, "plain text".into()).unwrap(), json!("plain text"));
}

#[test]
fn test_variant_scalars_and_nested() {
    let spec = col(ColumnType::Variant);
    assert_eq!(norm(&spec, 5i64.into()).unwrap(), json!(5));
    assert_eq!(
        norm(&spec, RowValue::Json(json!({"k": null}))).unwrap(),
        json!({"k": null})
    );
}

#[test]
fn test_variant_temporal_and_bytes() {
    let spec = col(ColumnType::Variant);
    let dt = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
    assert_eq!(
        norm(&spec, dt.into()).unwrap(),
        json!("2024-01-02T03:04:05.000000000Z")
    );
    assert_eq!(norm(&spec, RowValue::Bytes(vec![1, 2])).unwrap(), json!("AQI="));
}

// ---------------------------------------------------------------------------
// DATE / TIME / TIMESTAMP
// ---------------------------------------------------------------------------

#[test]
fn test_date_formats() {
    let spec = col(ColumnType::Date);
    let date = NaiveDate::from_ymd_opt(2024, 12, 31).unwrap();
    assert_eq!(norm(&spec, date.into()).unwrap(), json!("2024-12-31"));

    let dt = Utc.with_ymd_and_hms(2024, 12, 31, 23, 0, 0).unwrap();
    assert_eq!(norm(&spec, dt.into()).unwrap(), json!("2024-12-31"));

    assert_eq!(norm(&spec, "2024-06-15".into()).unwrap(), json!("2024-06-15"));
    assert!(norm(&spec, "junk".into()).is_err());
}

#[test]
fn test_time_scale_formats() {
    let time = NaiveTime::from_hms_nano_opt(1, 2, 3, 123_456_789).unwrap();
    let scale3 = ColumnSpec::new("C", ColumnType::Time).with_scale(3);
    assert_eq!(norm(&scale3, time.into()).unwrap(), json!("01:02:03.123"));

    let scale0 = ColumnSpec::new("C", ColumnType::Time).with_scale(0);
    assert_eq!(norm(&scale0, time.into()).unwrap(), json!("01:02:03"));

    // Unset scale defaults to 9 digits.
    let unset = col(ColumnType::Time);
    assert_eq!(norm(&unset, time.into()).unwrap(), json!("01:02:03.123456789"));
}

#[test]
fn test_timestamp_scale_clamps() {
    let dt = Utc
        .with_ymd_and_hms(2024, 5, 6, 7, 8, 9)
        .unwrap()
        .checked_add_signed(chrono::Duration::nanoseconds(123_456_789))
        .unwrap();
    // Scale beyond 9 clamps to 9.
    let wide = ColumnSpec::new("C", ColumnType::TimestampNtz).with_scale(40);
    assert_eq!(
        norm(&wide, dt.into()).unwrap(),
        json!("2024-05-06T07:08:09.123456789Z")
    );
    let scale2 = ColumnSpec::new("C", ColumnType::TimestampTz).with_scale(2);
    assert_eq!(
        norm(&scale2, dt.into()).unwrap(),
        json!("2024-05-06T07:08:09.12Z")
    );
}

#[test]
fn test_timestamp_integer_is_unix_millis_with_scale() {
    let spec = ColumnSpec::new("C", ColumnType::TimestampLtz).with_scale(3);
    assert_eq!(
        norm(&spec, 1_700_000_000_123i64.into()).unwrap(),
        json!("2023-11-14T22:13:20.123Z")
    );

    // Without sub-second scale, integers are Unix seconds.
    let seconds = ColumnSpec::new("C", ColumnType::TimestampLtz).with_scale(0);
    assert_eq!(
        norm(&seconds, 1_700_000_000i64.into()).unwrap(),
        json!("2023-11-14T22:13:20Z")
    );
}

#[test]
fn test_timestamp_string_converts_to_utc() {
    let spec = ColumnSpec::new("C", ColumnType::TimestampTz).with_scale(0);
    assert_eq!(
        norm(&spec, "2024-01-01T01:00:00+02:00".into()).unwrap(),
        json!("2023-12-31T23:00:00Z")
    );
}

// ---------------------------------------------------------------------------
// Rows
// ---------------------------------------------------------------------------

fn events_schema() -> TableSchema {
    TableSchema::new(
        SchemaObjectCoords::new("DB", "PUBLIC", "EVENTS"),
        vec![
            ColumnSpec::new("ID", ColumnType::Number),
            ColumnSpec::new("VALUE", ColumnType::Varchar),
            ColumnSpec::new("NOTE", ColumnType::Varchar),
        ],
    )
}

#[test]
fn test_normalize_row_drops_nulls() {
    let schema = events_schema();
    let r = row([
        ("ID", 1i64.into()),
        ("VALUE", "a".into()),
        ("NOTE", RowValue::Null),
    ]);
    let map = normalize_row(&schema, &r).unwrap();
    assert_eq!(map.len(), 2);
    assert!(!map.contains_key("NOTE"));
}

#[test]
fn test_normalize_row_unknown_column() {
    let schema = events_schema();
    let r = row([("UNKNOWN", 1i64.into())]);
    let err = normalize_row(&schema, &r).unwrap_err();
    assert_eq!(err.to_string(), "Column not in schema: UNKNOWN");
}

#[test]
fn test_estimate_row_bytes_matches_serialized_size() {
    let schema = events_schema();
    let r = row([("ID", 1i64.into()), ("VALUE", "aaaaaaaaaa".into())]);
    // {"ID":1,"VALUE":"aaaaaaaaaa"} plus the newline.
    assert_eq!(estimate_row_bytes(&schema, &r).unwrap(), 30);
}
