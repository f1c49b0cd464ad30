//! Luhn (mod 10) checksum for card numbers
//!
//! Digits are walked right-to-left; every second digit is doubled and
//! doubled values above 9 have 9 subtracted. A number is valid when the sum
//! of all resulting digits is a multiple of 10.

use crate::error::{CommonError, Result};

/// Compute the Luhn digit sum of an ASCII digit string
pub fn luhn_sum(digits: &str) -> Result<u32> {
    if !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(CommonError::NonDigitChecksumInput(digits.to_string()));
    }

    let sum = digits
        .bytes()
        .rev()
        .enumerate()
        .map(|(index, byte)| {
            let digit = u32::from(byte - b'0');
            if index % 2 == 1 {
                let doubled = digit * 2;
                if doubled > 9 {
                    doubled - 9
                } else {
                    doubled
                }
            } else {
                digit
            }
        })
        .sum();

    Ok(sum)
}

/// Check whether a digit string passes the Luhn checksum
///
/// Empty strings and strings containing anything other than ASCII digits
/// are never valid.
pub fn is_luhn_valid(digits: &str) -> bool {
    if digits.is_empty() {
        return false;
    }
    matches!(luhn_sum(digits), Ok(sum) if sum % 10 == 0)
}

/// Compute the check digit that makes `payload` + digit Luhn-valid
pub fn luhn_check_digit(payload: &str) -> Result<u8> {
    let mut padded = String::with_capacity(payload.len() + 1);
    padded.push_str(payload);
    padded.push('0');

    let sum = luhn_sum(&padded)?;
    Ok(((10 - sum % 10) % 10) as u8)
}
