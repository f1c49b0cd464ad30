//! Validation stage
//!
//! [`fields`] holds the per-field validators, [`records`] assembles typed
//! records from a [`RawRecord`](super::decoder::RawRecord) collecting every
//! violation before rejecting.

pub mod fields;
pub mod records;

use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::decimal::DecimalCodec;
use super::models::{RecordRef, Stage, TransactionRecord, ValidationOutcome};
use super::reference::ReferenceCodeCache;
use crate::error::{ErrorCategory, FormatErrorKind, PersistenceError};
use fields::FieldPatterns;

pub use records::validate_record;

/// Default card expiry horizon in years
pub const DEFAULT_MAX_EXPIRATION_YEARS: u32 = 10;

/// Largest transaction magnitude, 999,999,999.99
pub fn default_max_amount() -> BigDecimal {
    BigDecimal::new(99_999_999_999i64.into(), 2)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    Required,
    Pattern,
    Length,
    Checksum,
    Range,
    Expired,
    UnknownCode,
    Format(FormatErrorKind),
}

impl ViolationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ViolationKind::Required => "required",
            ViolationKind::Pattern => "pattern",
            ViolationKind::Length => "length",
            ViolationKind::Checksum => "checksum",
            ViolationKind::Range => "range",
            ViolationKind::Expired => "expired",
            ViolationKind::UnknownCode => "unknown_code",
            ViolationKind::Format(kind) => kind.as_str(),
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            ViolationKind::Format(_) => ErrorCategory::Format,
            _ => ErrorCategory::Validation,
        }
    }
}

/// One failed field check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldViolation {
    pub field: &'static str,
    pub kind: ViolationKind,
    pub message: String,
}

impl std::fmt::Display for FieldViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.field, self.message)
    }
}

/// Inclusive range of plausible calendar dates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateWindow {
    pub min: NaiveDate,
    pub max: NaiveDate,
}

impl DateWindow {
    pub fn contains(&self, date: NaiveDate) -> bool {
        self.min <= date && date <= self.max
    }
}

impl Default for DateWindow {
    fn default() -> Self {
        Self {
            min: NaiveDate::from_ymd_opt(1900, 1, 1).unwrap_or(NaiveDate::MIN),
            max: NaiveDate::from_ymd_opt(2099, 12, 31).unwrap_or(NaiveDate::MAX),
        }
    }
}

/// Everything the validators need besides the record itself
#[derive(Debug, Clone)]
pub struct ValidationContext {
    /// Reference date for expiry and open-date checks
    pub today: NaiveDate,
    pub dates: DateWindow,
    pub codec: DecimalCodec,
    pub max_expiration_years: u32,
    pub max_amount: BigDecimal,
    patterns: FieldPatterns,
}

impl ValidationContext {
    pub fn new(today: NaiveDate, codec: DecimalCodec) -> Result<Self, regex::Error> {
        Ok(Self {
            today,
            dates: DateWindow::default(),
            codec,
            max_expiration_years: DEFAULT_MAX_EXPIRATION_YEARS,
            max_amount: default_max_amount(),
            patterns: FieldPatterns::new()?,
        })
    }

    pub fn with_dates(mut self, dates: DateWindow) -> Self {
        self.dates = dates;
        self
    }

    pub fn with_max_expiration_years(mut self, years: u32) -> Self {
        self.max_expiration_years = years;
        self
    }

    pub fn with_max_amount(mut self, max_amount: BigDecimal) -> Self {
        self.max_amount = max_amount;
        self
    }

    pub fn patterns(&self) -> &FieldPatterns {
        &self.patterns
    }
}

/// Fold every violation of one record into a single audit entry
pub fn outcome_from_violations(
    record_ref: RecordRef,
    stage: Stage,
    violations: &[FieldViolation],
) -> ValidationOutcome {
    let category = if violations.iter().any(|v| v.kind.category() == ErrorCategory::Format) {
        ErrorCategory::Format
    } else {
        ErrorCategory::Validation
    };
    let error_kind = violations
        .first()
        .map(|v| v.kind.as_str())
        .unwrap_or("unknown")
        .to_string();
    let message = violations
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join("; ");

    ValidationOutcome {
        record_ref,
        stage,
        category,
        error_kind,
        message,
    }
}

/// Check a transaction's type and (type, category) codes against the code tables
pub async fn check_reference_codes(
    record: &TransactionRecord,
    codes: &ReferenceCodeCache,
) -> Result<Vec<FieldViolation>, PersistenceError> {
    let mut violations = Vec::new();

    if !codes.type_exists(&record.type_code).await? {
        violations.push(FieldViolation {
            field: "type_code",
            kind: ViolationKind::UnknownCode,
            message: format!("{} is not a known transaction type", record.type_code),
        });
    } else if !codes
        .category_exists(&record.type_code, &record.category_code)
        .await?
    {
        violations.push(FieldViolation {
            field: "category_code",
            kind: ViolationKind::UnknownCode,
            message: format!(
                "{} is not a known category of type {}",
                record.category_code, record.type_code
            ),
        });
    }

    Ok(violations)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use carddemo_common::RecordType;

    #[test]
    fn test_default_max_amount() {
        assert_eq!(default_max_amount().to_string(), "999999999.99");
    }

    #[test]
    fn test_outcome_prefers_format_category() {
        let violations = vec![
            FieldViolation {
                field: "cvv",
                kind: ViolationKind::Pattern,
                message: "must be 3 digits".into(),
            },
            FieldViolation {
                field: "expiration_date",
                kind: ViolationKind::Format(FormatErrorKind::InvalidDate),
                message: "\"2024-13-01\" is not a YYYY-MM-DD date".into(),
            },
        ];
        let record_ref = RecordRef {
            record_type: RecordType::Card,
            line_number: 4,
            key: None,
        };

        let outcome = outcome_from_violations(record_ref, Stage::Validate, &violations);
        assert_eq!(outcome.category, ErrorCategory::Format);
        assert_eq!(outcome.error_kind, "pattern");
        assert!(outcome.message.starts_with("cvv must be 3 digits; expiration_date"));
    }
}
