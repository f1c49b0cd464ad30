//! Transaction type and category code lookups
//!
//! A [`ReferenceCodeCache`] is created for one job phase and dropped with
//! it; the code tables are loaded by earlier phases and do not change while
//! transactions load.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::debug;

use crate::error::PersistenceError;

/// Existence checks against the code tables
#[async_trait]
pub trait ReferenceCodeLookup: Send + Sync {
    async fn transaction_type_exists(&self, type_code: &str) -> Result<bool, PersistenceError>;

    async fn transaction_category_exists(
        &self,
        type_code: &str,
        category_code: &str,
    ) -> Result<bool, PersistenceError>;
}

/// Memoizing wrapper around a [`ReferenceCodeLookup`]
pub struct ReferenceCodeCache {
    lookup: Arc<dyn ReferenceCodeLookup>,
    types: RwLock<HashMap<String, bool>>,
    categories: RwLock<HashMap<(String, String), bool>>,
    misses: AtomicU64,
}

impl ReferenceCodeCache {
    pub fn new(lookup: Arc<dyn ReferenceCodeLookup>) -> Self {
        Self {
            lookup,
            types: RwLock::new(HashMap::new()),
            categories: RwLock::new(HashMap::new()),
            misses: AtomicU64::new(0),
        }
    }

    pub async fn type_exists(&self, type_code: &str) -> Result<bool, PersistenceError> {
        if let Some(known) = self.types.read().get(type_code).copied() {
            return Ok(known);
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let exists = self.lookup.transaction_type_exists(type_code).await?;
        debug!(type_code, exists, "Cached transaction type lookup");
        self.types.write().insert(type_code.to_string(), exists);
        Ok(exists)
    }

    pub async fn category_exists(
        &self,
        type_code: &str,
        category_code: &str,
    ) -> Result<bool, PersistenceError> {
        let key = (type_code.to_string(), category_code.to_string());
        if let Some(known) = self.categories.read().get(&key).copied() {
            return Ok(known);
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let exists = self
            .lookup
            .transaction_category_exists(type_code, category_code)
            .await?;
        debug!(type_code, category_code, exists, "Cached transaction category lookup");
        self.categories.write().insert(key, exists);
        Ok(exists)
    }

    /// Number of lookups that went to the backing port
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    struct Codes;

    #[async_trait]
    impl ReferenceCodeLookup for Codes {
        async fn transaction_type_exists(&self, type_code: &str) -> Result<bool, PersistenceError> {
            Ok(type_code == "01")
        }

        async fn transaction_category_exists(
            &self,
            type_code: &str,
            category_code: &str,
        ) -> Result<bool, PersistenceError> {
            Ok(type_code == "01" && category_code == "0001")
        }
    }

    #[tokio::test]
    async fn test_repeated_codes_hit_cache() {
        let cache = ReferenceCodeCache::new(Arc::new(Codes));

        assert!(cache.type_exists("01").await.unwrap());
        assert!(cache.type_exists("01").await.unwrap());
        assert!(!cache.type_exists("99").await.unwrap());
        assert!(!cache.type_exists("99").await.unwrap());
        assert_eq!(cache.misses(), 2);
    }

    #[tokio::test]
    async fn test_category_is_keyed_by_type() {
        let cache = ReferenceCodeCache::new(Arc::new(Codes));

        assert!(cache.category_exists("01", "0001").await.unwrap());
        assert!(!cache.category_exists("02", "0001").await.unwrap());
        assert_eq!(cache.misses(), 2);
    }
}
