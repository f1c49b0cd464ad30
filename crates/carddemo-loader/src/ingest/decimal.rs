//! Legacy scaled-decimal codec
//!
//! Monetary fields are stored as zero-padded digit strings with an implied
//! decimal point and a sign carried by the last character. Two sign
//! conventions exist in the extracts and the rounding mode differs between
//! them, so both are configuration rather than constants:
//!
//! | Convention       | Positive               | Negative               |
//! |------------------|------------------------|------------------------|
//! | `TrailingMarker` | `00000012345{`         | `00000012345}`         |
//! | `Overpunch`      | `0000001234E` (…45)    | `0000001234N` (…45)    |
//!
//! All arithmetic is done on [`BigDecimal`]; nothing passes through `f64`.

use std::str::FromStr;

use bigdecimal::{BigDecimal, Signed, Zero};
use serde::{Deserialize, Serialize};

use crate::error::FormatError;

/// Rounding applied when an explicit scale exceeds the target scale
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RoundingMode {
    #[default]
    HalfUp,
    HalfEven,
}

impl RoundingMode {
    fn to_bigdecimal(self) -> bigdecimal::RoundingMode {
        match self {
            RoundingMode::HalfUp => bigdecimal::RoundingMode::HalfUp,
            RoundingMode::HalfEven => bigdecimal::RoundingMode::HalfEven,
        }
    }
}

impl FromStr for RoundingMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "half_up" | "halfup" => Ok(RoundingMode::HalfUp),
            "half_even" | "halfeven" | "bankers" => Ok(RoundingMode::HalfEven),
            _ => Err(format!("unknown rounding mode: {}", s)),
        }
    }
}

/// Meaning of the last character of an encoded amount
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SignConvention {
    /// Last character is a sign-only marker; a trailing digit means unsigned
    #[default]
    TrailingMarker,
    /// Last character carries both the final digit and the sign
    Overpunch,
}

impl FromStr for SignConvention {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "trailing_marker" | "trailing" => Ok(SignConvention::TrailingMarker),
            "overpunch" | "zoned" => Ok(SignConvention::Overpunch),
            _ => Err(format!("unknown sign convention: {}", s)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodecConfig {
    /// Scale of every decoded value
    pub target_scale: i64,
    /// Digits after the implied decimal point
    pub implied_scale: i64,
    pub rounding: RoundingMode,
    pub sign: SignConvention,
    /// Only consulted for `TrailingMarker`; the first entry is used when encoding
    pub positive_markers: Vec<char>,
    pub negative_markers: Vec<char>,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            target_scale: 2,
            implied_scale: 2,
            rounding: RoundingMode::HalfUp,
            sign: SignConvention::TrailingMarker,
            positive_markers: vec!['{', '+'],
            negative_markers: vec!['}', '-'],
        }
    }
}

const OVERPUNCH_POSITIVE: [char; 10] = ['{', 'A', 'B', 'C', 'D', 'E', 'F', 'G', 'H', 'I'];
const OVERPUNCH_NEGATIVE: [char; 10] = ['}', 'J', 'K', 'L', 'M', 'N', 'O', 'P', 'Q', 'R'];

#[derive(Debug, Clone, Default)]
pub struct DecimalCodec {
    config: CodecConfig,
}

impl DecimalCodec {
    pub fn new(config: CodecConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CodecConfig {
        &self.config
    }

    /// Decode a legacy amount into a value of exactly `target_scale`
    ///
    /// Blank input is zero. A payload with one explicit `.` uses its own
    /// scale instead of the implied one.
    pub fn decode_amount(&self, raw: &str) -> Result<BigDecimal, FormatError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Ok(BigDecimal::zero().with_scale(self.config.target_scale));
        }

        let (payload, negative) = self.split_sign(trimmed)?;
        let (digits, scale) = match payload.split_once('.') {
            Some((whole, fraction)) => (format!("{}{}", whole, fraction), fraction.len()),
            None => (payload, usize::try_from(self.config.implied_scale).unwrap_or(0)),
        };

        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(FormatError::InvalidNumeric(raw.to_string()));
        }

        let unscaled = digits.trim_start_matches('0');
        let text = place_decimal_point(if unscaled.is_empty() { "0" } else { unscaled }, scale);
        let magnitude = BigDecimal::from_str(&text)
            .map_err(|e| FormatError::InvalidNumeric(format!("{}: {}", raw, e)))?;

        let value = if negative { -magnitude } else { magnitude };
        Ok(value.with_scale_round(self.config.target_scale, self.config.rounding.to_bigdecimal()))
    }

    /// Encode a value as a `width`-character legacy amount
    pub fn encode_amount(&self, value: &BigDecimal, width: usize) -> Result<String, FormatError> {
        let scaled = value.with_scale_round(
            self.config.implied_scale,
            self.config.rounding.to_bigdecimal(),
        );
        let negative = scaled.is_negative();
        let (unscaled, _) = scaled.abs().as_bigint_and_exponent();
        let digits = unscaled.to_string();

        let encoded = match self.config.sign {
            SignConvention::TrailingMarker => {
                let markers = if negative {
                    &self.config.negative_markers
                } else {
                    &self.config.positive_markers
                };
                let marker = markers.first().copied().unwrap_or(if negative { '-' } else { '+' });
                let body_width = width.saturating_sub(1);
                format!("{:0>body_width$}{}", digits, marker)
            },
            SignConvention::Overpunch => {
                let padded = format!("{:0>width$}", digits);
                let (body, last) = padded.split_at(padded.len().saturating_sub(1));
                let last_digit = last.bytes().next().map(|b| usize::from(b - b'0')).unwrap_or(0);
                let table = if negative {
                    &OVERPUNCH_NEGATIVE
                } else {
                    &OVERPUNCH_POSITIVE
                };
                format!("{}{}", body, table[last_digit])
            },
        };

        if encoded.len() > width {
            return Err(FormatError::InvalidNumeric(format!(
                "{} does not fit in {} characters",
                value, width
            )));
        }
        Ok(encoded)
    }

    /// Split the sign off a trimmed payload, returning `(digits, negative)`
    fn split_sign(&self, payload: &str) -> Result<(String, bool), FormatError> {
        let Some(last) = payload.chars().last() else {
            return Err(FormatError::InvalidNumeric(payload.to_string()));
        };
        let body = &payload[..payload.len() - last.len_utf8()];

        if last.is_ascii_digit() {
            return Ok((payload.to_string(), false));
        }

        match self.config.sign {
            SignConvention::TrailingMarker => {
                if self.config.positive_markers.contains(&last) {
                    Ok((body.to_string(), false))
                } else if self.config.negative_markers.contains(&last) {
                    Ok((body.to_string(), true))
                } else {
                    Err(FormatError::InvalidNumeric(format!(
                        "{}: unknown sign marker {:?}",
                        payload, last
                    )))
                }
            },
            SignConvention::Overpunch => {
                let (digit, negative) = if let Some(d) = OVERPUNCH_POSITIVE.iter().position(|c| *c == last) {
                    (d, false)
                } else if let Some(d) = OVERPUNCH_NEGATIVE.iter().position(|c| *c == last) {
                    (d, true)
                } else {
                    return Err(FormatError::InvalidNumeric(format!(
                        "{}: unknown overpunch character {:?}",
                        payload, last
                    )));
                };
                Ok((format!("{}{}", body, digit), negative))
            },
        }
    }
}

fn place_decimal_point(digits: &str, scale: usize) -> String {
    if scale == 0 {
        return digits.to_string();
    }
    let padded = format!("{:0>width$}", digits, width = scale + 1);
    let (whole, fraction) = padded.split_at(padded.len() - scale);
    format!("{}.{}", whole, fraction)
}
