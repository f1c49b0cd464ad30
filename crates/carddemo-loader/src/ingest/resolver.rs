//! Card → account → customer resolution
//!
//! Lookups go through injected ports and are memoized for the lifetime of
//! the resolver. Entries are never invalidated: a resolver is created per
//! job phase, after every table it reads from has been committed.
//!
//! The caches are shared by all chunk workers. Two workers missing on the
//! same key both query the port and both insert; the values are identical so
//! the last write wins.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::PersistenceError;

/// Card as seen by the resolver
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardRef {
    pub card_number: String,
    pub account_id: String,
    pub active: bool,
    /// From the card cross-reference, when one exists
    pub customer_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountRef {
    pub account_id: String,
    pub active: bool,
}

#[async_trait]
pub trait CardLookup: Send + Sync {
    async fn find_card(&self, card_number: &str) -> Result<Option<CardRef>, PersistenceError>;
}

#[async_trait]
pub trait AccountLookup: Send + Sync {
    async fn find_account(&self, account_id: &str) -> Result<Option<AccountRef>, PersistenceError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceFailure {
    CardNotFound,
    CardInactive,
    AccountNotFound,
    AccountInactive,
}

impl ReferenceFailure {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReferenceFailure::CardNotFound => "card_not_found",
            ReferenceFailure::CardInactive => "card_inactive",
            ReferenceFailure::AccountNotFound => "account_not_found",
            ReferenceFailure::AccountInactive => "account_inactive",
        }
    }
}

impl std::fmt::Display for ReferenceFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            ReferenceFailure::CardNotFound => "card not found",
            ReferenceFailure::CardInactive => "card inactive",
            ReferenceFailure::AccountNotFound => "account not found",
            ReferenceFailure::AccountInactive => "account inactive",
        };
        f.write_str(text)
    }
}

/// Outcome of resolving a card number
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrossReferenceResult {
    pub valid: bool,
    pub account_id: Option<String>,
    pub customer_id: Option<String>,
    pub reason: Option<ReferenceFailure>,
}

impl CrossReferenceResult {
    pub fn valid(account_id: String, customer_id: Option<String>) -> Self {
        Self {
            valid: true,
            account_id: Some(account_id),
            customer_id,
            reason: None,
        }
    }

    pub fn invalid(reason: ReferenceFailure) -> Self {
        Self {
            valid: false,
            account_id: None,
            customer_id: None,
            reason: Some(reason),
        }
    }
}

pub struct CrossReferenceResolver {
    cards: Arc<dyn CardLookup>,
    accounts: Arc<dyn AccountLookup>,
    card_cache: RwLock<HashMap<String, Option<CardRef>>>,
    account_cache: RwLock<HashMap<String, Option<AccountRef>>>,
    port_calls: AtomicU64,
}

impl CrossReferenceResolver {
    pub fn new(cards: Arc<dyn CardLookup>, accounts: Arc<dyn AccountLookup>) -> Self {
        Self {
            cards,
            accounts,
            card_cache: RwLock::new(HashMap::new()),
            account_cache: RwLock::new(HashMap::new()),
            port_calls: AtomicU64::new(0),
        }
    }

    /// Resolve a card to its active account and customer
    pub async fn resolve(&self, card_number: &str) -> Result<CrossReferenceResult, PersistenceError> {
        let Some(card) = self.find_card(card_number).await? else {
            return Ok(CrossReferenceResult::invalid(ReferenceFailure::CardNotFound));
        };
        if !card.active {
            return Ok(CrossReferenceResult::invalid(ReferenceFailure::CardInactive));
        }

        match self.find_account(&card.account_id).await? {
            None => Ok(CrossReferenceResult::invalid(ReferenceFailure::AccountNotFound)),
            Some(account) if !account.active => {
                Ok(CrossReferenceResult::invalid(ReferenceFailure::AccountInactive))
            },
            Some(account) => Ok(CrossReferenceResult::valid(account.account_id, card.customer_id)),
        }
    }

    /// Memoized card lookup, regardless of status
    pub async fn find_card(&self, card_number: &str) -> Result<Option<CardRef>, PersistenceError> {
        if let Some(cached) = self.card_cache.read().get(card_number).cloned() {
            return Ok(cached);
        }

        self.port_calls.fetch_add(1, Ordering::Relaxed);
        let card = self.cards.find_card(card_number).await?;
        debug!(found = card.is_some(), "Card lookup");
        self.card_cache
            .write()
            .insert(card_number.to_string(), card.clone());
        Ok(card)
    }

    /// Memoized account lookup, regardless of status
    pub async fn find_account(&self, account_id: &str) -> Result<Option<AccountRef>, PersistenceError> {
        if let Some(cached) = self.account_cache.read().get(account_id).cloned() {
            return Ok(cached);
        }

        self.port_calls.fetch_add(1, Ordering::Relaxed);
        let account = self.accounts.find_account(account_id).await?;
        debug!(account_id, found = account.is_some(), "Account lookup");
        self.account_cache
            .write()
            .insert(account_id.to_string(), account.clone());
        Ok(account)
    }

    /// Lookups that reached a port (cache misses)
    pub fn port_calls(&self) -> u64 {
        self.port_calls.load(Ordering::Relaxed)
    }
}
