//! Fixed-width line decoder
//!
//! Slices a line into named, space-trimmed strings. No type coercion happens
//! here; amounts, dates and flags are interpreted by the validation stage.

use carddemo_common::RecordType;

use super::layout::{layout_for, RecordLayout};
use crate::error::FormatError;

/// Raw field values of one input line, in layout order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord {
    pub record_type: RecordType,
    /// 1-based line number in the source file
    pub line_number: u64,
    fields: Vec<(&'static str, String)>,
}

impl RawRecord {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(field, _)| *field == name)
            .map(|(_, value)| value.as_str())
    }

    /// Field value, or `""` when the layout has no such field
    pub fn field(&self, name: &str) -> &str {
        self.get(name).unwrap_or("")
    }

    pub fn fields(&self) -> impl Iterator<Item = (&'static str, &str)> {
        self.fields.iter().map(|(name, value)| (*name, value.as_str()))
    }
}

/// Decode a line using the layout registered for `record_type`
pub fn decode(
    line: &str,
    record_type: RecordType,
    line_number: u64,
) -> Result<RawRecord, FormatError> {
    decode_with(layout_for(record_type), line, line_number)
}

/// Decode a line against an explicit layout
pub fn decode_with(
    layout: &RecordLayout,
    line: &str,
    line_number: u64,
) -> Result<RawRecord, FormatError> {
    if line.len() != layout.record_length {
        return Err(FormatError::LengthMismatch {
            expected: layout.record_length,
            actual: line.len(),
        });
    }

    // Slicing below is byte-based.
    if let Some(index) = line.bytes().position(|b| !b.is_ascii()) {
        return Err(FormatError::InvalidEncoding { column: index + 1 });
    }

    let fields = layout
        .data_fields()
        .map(|field| (field.name, line[field.range()].trim_matches(' ').to_string()))
        .collect();

    Ok(RawRecord {
        record_type: layout.record_type,
        line_number,
        fields,
    })
}
