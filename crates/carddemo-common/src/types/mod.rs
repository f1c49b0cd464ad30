//! Common types used across the CardDemo workspace

use serde::{Deserialize, Serialize};

use crate::error::CommonError;

/// Legacy fixed-width record families
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordType {
    /// Transaction type code table (TRANTYPE)
    TransactionType,
    /// Transaction category code table (TRANCATG)
    TransactionCategory,
    /// Account master (ACCTDATA)
    Account,
    /// Card master (CARDDATA)
    Card,
    /// Card / customer / account cross-reference (CARDXREF)
    CardXref,
    /// Posted transactions (TRANSACT)
    Transaction,
}

impl RecordType {
    /// Every record type in dependency (load) order
    pub const LOAD_ORDER: [RecordType; 6] = [
        RecordType::TransactionType,
        RecordType::TransactionCategory,
        RecordType::Account,
        RecordType::Card,
        RecordType::CardXref,
        RecordType::Transaction,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RecordType::TransactionType => "transaction_type",
            RecordType::TransactionCategory => "transaction_category",
            RecordType::Account => "account",
            RecordType::Card => "card",
            RecordType::CardXref => "card_xref",
            RecordType::Transaction => "transaction",
        }
    }

    /// Declared fixed record length in bytes
    pub fn record_length(&self) -> usize {
        match self {
            RecordType::TransactionType => 60,
            RecordType::TransactionCategory => 60,
            RecordType::Account => 300,
            RecordType::Card => 150,
            RecordType::CardXref => 50,
            RecordType::Transaction => 350,
        }
    }
}

impl std::fmt::Display for RecordType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RecordType {
    type Err = CommonError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "transaction_type" | "trantype" => Ok(RecordType::TransactionType),
            "transaction_category" | "trancatg" => Ok(RecordType::TransactionCategory),
            "account" | "acctdata" => Ok(RecordType::Account),
            "card" | "carddata" => Ok(RecordType::Card),
            "card_xref" | "cardxref" | "xref" => Ok(RecordType::CardXref),
            "transaction" | "transact" => Ok(RecordType::Transaction),
            _ => Err(CommonError::UnknownRecordType(s.to_string())),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_record_type_round_trips_through_str() {
        for record_type in RecordType::LOAD_ORDER {
            assert_eq!(record_type.as_str().parse::<RecordType>().unwrap(), record_type);
        }
    }

    #[test]
    fn test_record_type_aliases() {
        assert_eq!("CARDXREF".parse::<RecordType>().unwrap(), RecordType::CardXref);
        assert_eq!("card-xref".parse::<RecordType>().unwrap(), RecordType::CardXref);
        assert!("customer".parse::<RecordType>().is_err());
    }

    #[test]
    fn test_load_order_puts_references_first() {
        let position = |t: RecordType| RecordType::LOAD_ORDER.iter().position(|r| *r == t).unwrap();
        assert!(position(RecordType::Account) < position(RecordType::Card));
        assert!(position(RecordType::Card) < position(RecordType::Transaction));
        assert!(position(RecordType::TransactionCategory) < position(RecordType::Transaction));
    }
}
