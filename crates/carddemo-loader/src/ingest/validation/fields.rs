//! Field validators
//!
//! Pure functions: each takes the raw (trimmed) text of one field and returns
//! the typed value or a [`FieldViolation`].

use bigdecimal::{BigDecimal, Signed};
use carddemo_common::checksum::is_luhn_valid;
use chrono::{Months, NaiveDate, NaiveDateTime};
use regex::Regex;

use super::{DateWindow, FieldViolation, ViolationKind};
use crate::error::FormatErrorKind;
use crate::ingest::decimal::DecimalCodec;

/// Accepted timestamp layouts, legacy DB2 form first
pub const TIMESTAMP_FORMATS: &[&str] = &[
    "%Y-%m-%d-%H.%M.%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
];

/// Compiled patterns shared by the validators
#[derive(Debug, Clone)]
pub struct FieldPatterns {
    card_number: Regex,
    iso_date: Regex,
}

impl FieldPatterns {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            card_number: Regex::new(r"^[0-9]{16}$")?,
            iso_date: Regex::new(r"^[0-9]{4}-[0-9]{2}-[0-9]{2}$")?,
        })
    }
}

fn violation(field: &'static str, kind: ViolationKind, message: impl Into<String>) -> FieldViolation {
    FieldViolation {
        field,
        kind,
        message: message.into(),
    }
}

pub fn required(field: &'static str) -> FieldViolation {
    violation(field, ViolationKind::Required, "is required")
}

/// 16 digits, then the Luhn checksum
pub fn validate_card_number(
    field: &'static str,
    value: &str,
    patterns: &FieldPatterns,
) -> Result<String, FieldViolation> {
    if value.is_empty() {
        return Err(required(field));
    }
    if !patterns.card_number.is_match(value) {
        return Err(violation(field, ViolationKind::Pattern, "must be 16 digits"));
    }
    if !is_luhn_valid(value) {
        return Err(violation(field, ViolationKind::Checksum, "fails Luhn checksum"));
    }
    Ok(value.to_string())
}

/// Exactly `len` ASCII digits
pub fn validate_fixed_digits(
    field: &'static str,
    value: &str,
    len: usize,
) -> Result<String, FieldViolation> {
    if value.is_empty() {
        return Err(required(field));
    }
    if value.len() != len || !value.bytes().all(|b| b.is_ascii_digit()) {
        return Err(violation(
            field,
            ViolationKind::Pattern,
            format!("must be {} digits", len),
        ));
    }
    Ok(value.to_string())
}

pub fn validate_account_id(value: &str) -> Result<String, FieldViolation> {
    validate_fixed_digits("account_id", value, 11)
}

pub fn validate_transaction_id(value: &str) -> Result<String, FieldViolation> {
    validate_fixed_digits("transaction_id", value, 16)
}

pub fn validate_cvv(value: &str) -> Result<String, FieldViolation> {
    validate_fixed_digits("cvv", value, 3)
}

pub fn validate_customer_id(value: &str) -> Result<String, FieldViolation> {
    validate_fixed_digits("customer_id", value, 9)
}

pub fn validate_transaction_type(value: &str) -> Result<String, FieldViolation> {
    validate_fixed_digits("type_code", value, 2)
}

pub fn validate_transaction_category(value: &str) -> Result<String, FieldViolation> {
    validate_fixed_digits("category_code", value, 4)
}

/// Optional, up to 9 digits
pub fn validate_merchant_id(value: &str) -> Result<Option<String>, FieldViolation> {
    if value.is_empty() {
        return Ok(None);
    }
    if value.len() > 9 || !value.bytes().all(|b| b.is_ascii_digit()) {
        return Err(violation(
            "merchant_id",
            ViolationKind::Pattern,
            "must be at most 9 digits",
        ));
    }
    Ok(Some(value.to_string()))
}

/// Length-capped text; empty is `None` unless `required`
pub fn validate_string_field(
    field: &'static str,
    value: &str,
    required_field: bool,
    max_len: usize,
) -> Result<Option<String>, FieldViolation> {
    if value.is_empty() {
        return if required_field {
            Err(required(field))
        } else {
            Ok(None)
        };
    }
    let len = value.chars().count();
    if len > max_len {
        return Err(violation(
            field,
            ViolationKind::Length,
            format!("is {} characters, maximum is {}", len, max_len),
        ));
    }
    Ok(Some(value.to_string()))
}

pub fn validate_required_string(
    field: &'static str,
    value: &str,
    max_len: usize,
) -> Result<String, FieldViolation> {
    validate_string_field(field, value, true, max_len)?.ok_or_else(|| required(field))
}

/// `Y` / `N` flag
pub fn validate_active_status(field: &'static str, value: &str) -> Result<bool, FieldViolation> {
    match value {
        "Y" | "y" => Ok(true),
        "N" | "n" => Ok(false),
        "" => Err(required(field)),
        other => Err(violation(
            field,
            ViolationKind::Pattern,
            format!("must be Y or N, got {:?}", other),
        )),
    }
}

/// `YYYY-MM-DD`; blank and all-zero sentinels are absent
pub fn validate_date_field(
    field: &'static str,
    value: &str,
    window: &DateWindow,
    patterns: &FieldPatterns,
) -> Result<Option<NaiveDate>, FieldViolation> {
    if value.is_empty() || value.chars().all(|c| c == '0' || c == '-') {
        return Ok(None);
    }

    let parsed = if patterns.iso_date.is_match(value) {
        NaiveDate::parse_from_str(value, "%Y-%m-%d").ok()
    } else {
        None
    };
    let Some(date) = parsed else {
        return Err(violation(
            field,
            ViolationKind::Format(FormatErrorKind::InvalidDate),
            format!("{:?} is not a YYYY-MM-DD date", value),
        ));
    };

    if !window.contains(date) {
        return Err(violation(
            field,
            ViolationKind::Range,
            format!("{} is outside {}..={}", date, window.min, window.max),
        ));
    }
    Ok(Some(date))
}

pub fn require_date(
    field: &'static str,
    date: Option<NaiveDate>,
) -> Result<NaiveDate, FieldViolation> {
    date.ok_or_else(|| required(field))
}

/// Timestamp in any of [`TIMESTAMP_FORMATS`]
pub fn validate_timestamp(
    field: &'static str,
    value: &str,
    window: &DateWindow,
) -> Result<NaiveDateTime, FieldViolation> {
    if value.is_empty() {
        return Err(required(field));
    }

    let Some(ts) = TIMESTAMP_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
    else {
        return Err(violation(
            field,
            ViolationKind::Format(FormatErrorKind::InvalidTimestamp),
            format!("{:?} is not a recognised timestamp", value),
        ));
    };

    if !window.contains(ts.date()) {
        return Err(violation(
            field,
            ViolationKind::Range,
            format!("{} is outside {}..={}", ts, window.min, window.max),
        ));
    }
    Ok(ts)
}

/// Card expiry must not be past nor more than `max_years` ahead
pub fn validate_expiration(
    field: &'static str,
    date: NaiveDate,
    today: NaiveDate,
    max_years: u32,
) -> Result<NaiveDate, FieldViolation> {
    if date < today {
        return Err(violation(
            field,
            ViolationKind::Expired,
            format!("expired on {}", date),
        ));
    }
    let latest = today
        .checked_add_months(Months::new(max_years.saturating_mul(12)))
        .unwrap_or(NaiveDate::MAX);
    if date > latest {
        return Err(violation(
            field,
            ViolationKind::Range,
            format!("{} is more than {} years ahead", date, max_years),
        ));
    }
    Ok(date)
}

/// Decode a legacy amount and apply sign and magnitude limits
pub fn validate_amount(
    field: &'static str,
    raw: &str,
    codec: &DecimalCodec,
    non_negative: bool,
    max_abs: Option<&BigDecimal>,
) -> Result<BigDecimal, FieldViolation> {
    let value = codec.decode_amount(raw).map_err(|e| {
        violation(field, ViolationKind::Format(e.kind()), e.to_string())
    })?;

    if non_negative && value.is_negative() {
        return Err(violation(
            field,
            ViolationKind::Range,
            format!("{} must not be negative", value),
        ));
    }
    if let Some(max) = max_abs {
        if value.abs() > *max {
            return Err(violation(
                field,
                ViolationKind::Range,
                format!("|{}| exceeds {}", value, max),
            ));
        }
    }
    Ok(value)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn patterns() -> FieldPatterns {
        FieldPatterns::new().unwrap()
    }

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_card_number_checks() {
        let p = patterns();
        assert!(validate_card_number("card_number", "4532015112830366", &p).is_ok());

        let err = validate_card_number("card_number", "4532015112830367", &p).unwrap_err();
        assert_eq!(err.kind, ViolationKind::Checksum);

        let err = validate_card_number("card_number", "453201511283036", &p).unwrap_err();
        assert_eq!(err.kind, ViolationKind::Pattern);

        let err = validate_card_number("card_number", "", &p).unwrap_err();
        assert_eq!(err.kind, ViolationKind::Required);
    }

    #[test]
    fn test_fixed_digit_fields() {
        assert!(validate_account_id("00000000001").is_ok());
        assert!(validate_account_id("0000000001").is_err());
        assert!(validate_cvv("12a").is_err());
        assert!(validate_transaction_type("01").is_ok());
        assert!(validate_transaction_category("0001").is_ok());
        assert!(validate_customer_id("000000001").is_ok());
    }

    #[test]
    fn test_merchant_id_optional() {
        assert_eq!(validate_merchant_id("").unwrap(), None);
        assert_eq!(validate_merchant_id("123456789").unwrap().as_deref(), Some("123456789"));
        assert!(validate_merchant_id("1234567890").is_err());
    }

    #[test]
    fn test_string_fields() {
        assert_eq!(validate_required_string("embossed_name", "JOHN DOE", 50).unwrap(), "JOHN DOE");
        assert_eq!(
            validate_required_string("embossed_name", "", 50).unwrap_err().kind,
            ViolationKind::Required
        );
        assert_eq!(
            validate_string_field("merchant_zip", &"9".repeat(11), false, 10)
                .unwrap_err()
                .kind,
            ViolationKind::Length
        );
        assert_eq!(validate_string_field("merchant_city", "", false, 50).unwrap(), None);
    }

    #[test]
    fn test_active_status() {
        assert!(validate_active_status("active_status", "Y").unwrap());
        assert!(!validate_active_status("active_status", "N").unwrap());
        assert!(validate_active_status("active_status", "X").is_err());
    }

    #[test]
    fn test_date_sentinels_are_absent() {
        let window = DateWindow::default();
        let p = patterns();
        assert_eq!(validate_date_field("open_date", "", &window, &p).unwrap(), None);
        assert_eq!(validate_date_field("open_date", "0000-00-00", &window, &p).unwrap(), None);
        assert_eq!(
            validate_date_field("open_date", "2020-02-29", &window, &p).unwrap(),
            Some(ymd(2020, 2, 29))
        );
    }

    #[test]
    fn test_date_errors() {
        let window = DateWindow::default();
        let p = patterns();

        let err = validate_date_field("open_date", "2021-02-29", &window, &p).unwrap_err();
        assert_eq!(err.kind, ViolationKind::Format(FormatErrorKind::InvalidDate));

        let err = validate_date_field("open_date", "2024-3-1", &window, &p).unwrap_err();
        assert_eq!(err.kind, ViolationKind::Format(FormatErrorKind::InvalidDate));

        let err = validate_date_field("open_date", "1850-01-01", &window, &p).unwrap_err();
        assert_eq!(err.kind, ViolationKind::Range);
    }

    #[test]
    fn test_timestamp_formats() {
        let window = DateWindow::default();
        let expected = ymd(2024, 3, 18).and_hms_micro_opt(10, 15, 30, 123456).unwrap();

        for raw in [
            "2024-03-18-10.15.30.123456",
            "2024-03-18 10:15:30.123456",
            "2024-03-18T10:15:30.123456",
        ] {
            assert_eq!(validate_timestamp("original_timestamp", raw, &window).unwrap(), expected);
        }
        assert!(validate_timestamp("original_timestamp", "2024-03-18 10:15:30", &window).is_ok());
        assert!(validate_timestamp("original_timestamp", "18/03/2024", &window).is_err());
    }

    #[test]
    fn test_expiration_window() {
        let today = ymd(2025, 1, 15);
        assert!(validate_expiration("expiration_date", ymd(2027, 1, 15), today, 10).is_ok());
        assert!(validate_expiration("expiration_date", today, today, 10).is_ok());

        let err = validate_expiration("expiration_date", ymd(2025, 1, 14), today, 10).unwrap_err();
        assert_eq!(err.kind, ViolationKind::Expired);

        let err = validate_expiration("expiration_date", ymd(2035, 1, 16), today, 10).unwrap_err();
        assert_eq!(err.kind, ViolationKind::Range);
    }

    #[test]
    fn test_amount_limits() {
        let codec = DecimalCodec::default();
        let max = BigDecimal::from_str("999999999.99").unwrap();

        assert_eq!(
            validate_amount("credit_limit", "00000500000{", &codec, true, None).unwrap(),
            BigDecimal::from_str("5000.00").unwrap()
        );

        let err = validate_amount("credit_limit", "00000500000}", &codec, true, None).unwrap_err();
        assert_eq!(err.kind, ViolationKind::Range);

        assert!(validate_amount("amount", "99999999999}", &codec, false, Some(&max)).is_ok());
        let err = validate_amount("amount", "100000000000{", &codec, false, Some(&max)).unwrap_err();
        assert_eq!(err.kind, ViolationKind::Range);

        let err = validate_amount("amount", "12X{", &codec, false, None).unwrap_err();
        assert_eq!(err.kind, ViolationKind::Format(FormatErrorKind::InvalidNumeric));
    }
}
