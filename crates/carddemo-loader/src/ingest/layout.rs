//! Fixed-width record layouts
//!
//! Offsets are 1-indexed and inclusive, exactly as they appear in the legacy
//! copybooks. Every layout is contiguous and covers the full record length,
//! with trailing `FILLER` padding.

use carddemo_common::RecordType;
use thiserror::Error;

/// Name of padding fields; never surfaced by the decoder
pub const FILLER: &str = "filler";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: &'static str,
    /// 1-indexed first byte
    pub start: usize,
    pub width: usize,
}

impl FieldSpec {
    /// Field spanning `start..=end` (1-indexed)
    pub const fn new(name: &'static str, start: usize, end: usize) -> Self {
        Self {
            name,
            start,
            width: end + 1 - start,
        }
    }

    /// 1-indexed last byte
    pub fn end(&self) -> usize {
        self.start + self.width - 1
    }

    /// 0-indexed byte range for slicing
    pub fn range(&self) -> std::ops::Range<usize> {
        self.start - 1..self.start - 1 + self.width
    }

    pub fn is_filler(&self) -> bool {
        self.name == FILLER
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LayoutError {
    #[error("{record_type}: field {field} starts at {actual}, expected {expected}")]
    NotContiguous {
        record_type: RecordType,
        field: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("{record_type}: fields cover {covered} bytes, record length is {declared}")]
    CoverageMismatch {
        record_type: RecordType,
        covered: usize,
        declared: usize,
    },

    #[error("{record_type}: field {field} has zero width")]
    EmptyField {
        record_type: RecordType,
        field: &'static str,
    },

    #[error("{record_type}: no field named {field}")]
    UnknownField {
        record_type: RecordType,
        field: String,
    },

    #[error("{record_type}: value for {field} is {len} bytes, field width is {width}")]
    ValueTooWide {
        record_type: RecordType,
        field: &'static str,
        width: usize,
        len: usize,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordLayout {
    pub record_type: RecordType,
    pub record_length: usize,
    pub fields: &'static [FieldSpec],
}

impl RecordLayout {
    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Data fields in layout order, excluding filler
    pub fn data_fields(&self) -> impl Iterator<Item = &FieldSpec> {
        self.fields.iter().filter(|f| !f.is_filler())
    }

    /// Check the layout is contiguous and covers the whole record
    pub fn validate(&self) -> Result<(), LayoutError> {
        let mut next = 1;
        for field in self.fields {
            if field.width == 0 {
                return Err(LayoutError::EmptyField {
                    record_type: self.record_type,
                    field: field.name,
                });
            }
            if field.start != next {
                return Err(LayoutError::NotContiguous {
                    record_type: self.record_type,
                    field: field.name,
                    expected: next,
                    actual: field.start,
                });
            }
            next = field.end() + 1;
        }

        let covered = next - 1;
        if covered != self.record_length {
            return Err(LayoutError::CoverageMismatch {
                record_type: self.record_type,
                covered,
                declared: self.record_length,
            });
        }
        Ok(())
    }

    /// Render a fixed-width line; absent fields and filler are space-padded
    pub fn render(&self, values: &[(&str, &str)]) -> Result<String, LayoutError> {
        if let Some((unknown, _)) = values.iter().find(|(name, _)| self.field(name).is_none()) {
            return Err(LayoutError::UnknownField {
                record_type: self.record_type,
                field: (*unknown).to_string(),
            });
        }

        let mut line = String::with_capacity(self.record_length);
        for field in self.fields {
            let value = values
                .iter()
                .find(|(name, _)| *name == field.name)
                .map(|(_, value)| *value)
                .unwrap_or("");
            if value.len() > field.width {
                return Err(LayoutError::ValueTooWide {
                    record_type: self.record_type,
                    field: field.name,
                    width: field.width,
                    len: value.len(),
                });
            }
            line.push_str(value);
            line.extend(std::iter::repeat(' ').take(field.width - value.len()));
        }
        Ok(line)
    }
}

const CARD_FIELDS: &[FieldSpec] = &[
    FieldSpec::new("card_number", 1, 16),
    FieldSpec::new("account_id", 17, 27),
    FieldSpec::new("cvv", 28, 30),
    FieldSpec::new("embossed_name", 31, 80),
    FieldSpec::new("expiration_date", 81, 90),
    FieldSpec::new("active_status", 91, 91),
    FieldSpec::new(FILLER, 92, 150),
];

const ACCOUNT_FIELDS: &[FieldSpec] = &[
    FieldSpec::new("account_id", 1, 11),
    FieldSpec::new("active_status", 12, 12),
    FieldSpec::new("current_balance", 13, 24),
    FieldSpec::new("credit_limit", 25, 36),
    FieldSpec::new("cash_credit_limit", 37, 48),
    FieldSpec::new("open_date", 49, 58),
    FieldSpec::new("expiration_date", 59, 68),
    FieldSpec::new("reissue_date", 69, 78),
    FieldSpec::new("current_cycle_credit", 79, 90),
    FieldSpec::new("current_cycle_debit", 91, 102),
    FieldSpec::new("address_zip", 103, 112),
    FieldSpec::new("group_id", 113, 122),
    FieldSpec::new(FILLER, 123, 300),
];

const TRANSACTION_FIELDS: &[FieldSpec] = &[
    FieldSpec::new("transaction_id", 1, 16),
    FieldSpec::new("type_code", 17, 18),
    FieldSpec::new("category_code", 19, 22),
    FieldSpec::new("source", 23, 32),
    FieldSpec::new("description", 33, 132),
    FieldSpec::new("amount", 133, 143),
    FieldSpec::new("merchant_id", 144, 152),
    FieldSpec::new("merchant_name", 153, 202),
    FieldSpec::new("merchant_city", 203, 252),
    FieldSpec::new("merchant_zip", 253, 262),
    FieldSpec::new("card_number", 263, 278),
    FieldSpec::new("original_timestamp", 279, 304),
    FieldSpec::new("processed_timestamp", 305, 330),
    FieldSpec::new(FILLER, 331, 350),
];

const CARD_XREF_FIELDS: &[FieldSpec] = &[
    FieldSpec::new("card_number", 1, 16),
    FieldSpec::new("customer_id", 17, 25),
    FieldSpec::new("account_id", 26, 36),
    FieldSpec::new(FILLER, 37, 50),
];

const TRANSACTION_TYPE_FIELDS: &[FieldSpec] = &[
    FieldSpec::new("type_code", 1, 2),
    FieldSpec::new("description", 3, 52),
    FieldSpec::new(FILLER, 53, 60),
];

const TRANSACTION_CATEGORY_FIELDS: &[FieldSpec] = &[
    FieldSpec::new("type_code", 1, 2),
    FieldSpec::new("category_code", 3, 6),
    FieldSpec::new("description", 7, 56),
    FieldSpec::new(FILLER, 57, 60),
];

pub const CARD_LAYOUT: RecordLayout = RecordLayout {
    record_type: RecordType::Card,
    record_length: 150,
    fields: CARD_FIELDS,
};

pub const ACCOUNT_LAYOUT: RecordLayout = RecordLayout {
    record_type: RecordType::Account,
    record_length: 300,
    fields: ACCOUNT_FIELDS,
};

pub const TRANSACTION_LAYOUT: RecordLayout = RecordLayout {
    record_type: RecordType::Transaction,
    record_length: 350,
    fields: TRANSACTION_FIELDS,
};

pub const CARD_XREF_LAYOUT: RecordLayout = RecordLayout {
    record_type: RecordType::CardXref,
    record_length: 50,
    fields: CARD_XREF_FIELDS,
};

pub const TRANSACTION_TYPE_LAYOUT: RecordLayout = RecordLayout {
    record_type: RecordType::TransactionType,
    record_length: 60,
    fields: TRANSACTION_TYPE_FIELDS,
};

pub const TRANSACTION_CATEGORY_LAYOUT: RecordLayout = RecordLayout {
    record_type: RecordType::TransactionCategory,
    record_length: 60,
    fields: TRANSACTION_CATEGORY_FIELDS,
};

pub fn layout_for(record_type: RecordType) -> &'static RecordLayout {
    match record_type {
        RecordType::Card => &CARD_LAYOUT,
        RecordType::Account => &ACCOUNT_LAYOUT,
        RecordType::Transaction => &TRANSACTION_LAYOUT,
        RecordType::CardXref => &CARD_XREF_LAYOUT,
        RecordType::TransactionType => &TRANSACTION_TYPE_LAYOUT,
        RecordType::TransactionCategory => &TRANSACTION_CATEGORY_LAYOUT,
    }
}
