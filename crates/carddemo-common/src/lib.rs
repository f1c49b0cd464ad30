//! CardDemo Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared types, utilities, and error handling for the CardDemo migration workspace.
//!
//! # Overview
//!
//! This crate provides functionality used by every workspace member:
//!
//! - **Error Handling**: Common error type and result alias
//! - **Checksums**: Luhn (mod 10) card number checksum
//! - **Logging**: `tracing` subscriber initialisation
//! - **Types**: Legacy record type identifiers
//!
//! # Example
//!
//! ```
//! use carddemo_common::checksum::is_luhn_valid;
//! use carddemo_common::types::RecordType;
//!
//! assert!(is_luhn_valid("4532015112830366"));
//! assert_eq!(RecordType::Card.record_length(), 150);
//! ```

pub mod checksum;
pub mod error;
pub mod logging;
pub mod types;

// Re-export commonly used types
pub use error::{CommonError, Result};
pub use types::RecordType;
