//! Flag store trait for abstracting the persistent flag table.
//!
//! The `FlagStore` trait decouples the manager from the service that actually
//! holds flag rows (a hosted Postgres table, a config service, a file). Every
//! call is I/O bound and may suspend; the manager never holds cache locks
//! across these calls.
//!
//! # Implementing FlagStore
//!
//! ```ignore
//! use flag_kit::{FlagPatch, FlagRecord, FlagStore, Result};
//!
//! struct RestFlagStore { client: reqwest::Client, base: String }
//!
//! impl FlagStore for RestFlagStore {
//!     async fn read_one(&self, name: &str) -> Result<Option<FlagRecord>> {
//!         // GET {base}/feature_flags?name=eq.{name}
//!         # unimplemented!()
//!     }
//!     // ...
//! }
//! ```
//!
//! # Error Handling
//!
//! Return `Err(Error::StoreError(..))` for connectivity, permission and query
//! failures. A missing row on a point read is `Ok(None)`, not an error.

use crate::error::Result;
use crate::record::{FlagPatch, FlagRecord};

/// Trait for flag store implementations.
///
/// # Design for Testability
///
/// This trait is designed to be mockable. Implement it with your database
/// client, or use [`InMemoryFlagStore`] for tests and local tooling.
#[allow(async_fn_in_trait)]
pub trait FlagStore: Send + Sync {
    /// Point read by flag name.
    ///
    /// # Returns
    /// - `Ok(Some(record))` - Flag found
    /// - `Ok(None)` - No such flag (not an error)
    /// - `Err(e)` - Store error
    async fn read_one(&self, name: &str) -> Result<Option<FlagRecord>>;

    /// Full scan of the flag table.
    ///
    /// # Errors
    /// Returns `Err` if the store is unavailable or the scan fails
    async fn read_all(&self) -> Result<Vec<FlagRecord>>;

    /// Insert a new record.
    ///
    /// # Errors
    /// `Error::DuplicateFlag` when the name already exists; it is never
    /// silently ignored.
    async fn insert(&self, record: FlagRecord) -> Result<()>;

    /// Apply a partial update to an existing record.
    ///
    /// # Errors
    /// Returns `Err` if the store rejects the update
    async fn update(&self, name: &str, patch: FlagPatch) -> Result<()>;

    /// Remove a record.
    ///
    /// # Errors
    /// Returns `Err` if the store rejects the delete
    async fn delete(&self, name: &str) -> Result<()>;
}

// ============================================================================
// In-Memory Store
// ============================================================================

#[cfg(feature = "inmemory")]
pub use self::memory::InMemoryFlagStore;

#[cfg(feature = "inmemory")]
mod memory {
    use super::FlagStore;
    use crate::error::{Error, Result};
    use crate::record::{FlagPatch, FlagRecord};
    use dashmap::mapref::entry::Entry;
    use dashmap::DashMap;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    /// Shared in-memory flag table.
    ///
    /// Clones share the same table, so a test can keep a handle and mutate
    /// rows behind the manager's back.
    ///
    /// - `update` of a missing flag is `Error::NotFound`
    /// - `delete` of a missing flag succeeds
    /// - `set_unavailable(true)` makes every call fail with `Error::StoreError`
    #[derive(Clone, Default)]
    pub struct InMemoryFlagStore {
        rows: Arc<DashMap<String, FlagRecord>>,
        unavailable: Arc<AtomicBool>,
    }

    impl InMemoryFlagStore {
        pub fn new() -> Self {
            Self::default()
        }

        /// Insert or replace a row directly, bypassing duplicate checks.
        pub fn put(&self, record: FlagRecord) {
            self.rows.insert(record.name.clone(), record);
        }

        /// Current row, bypassing the outage switch.
        pub fn row(&self, name: &str) -> Option<FlagRecord> {
            self.rows.get(name).map(|r| r.clone())
        }

        /// Simulate the backing service going down (or coming back).
        pub fn set_unavailable(&self, unavailable: bool) {
            self.unavailable.store(unavailable, Ordering::SeqCst);
        }

        pub fn len(&self) -> usize {
            self.rows.len()
        }

        pub fn is_empty(&self) -> bool {
            self.rows.is_empty()
        }

        fn check_available(&self, operation: &str) -> Result<()> {
            if self.unavailable.load(Ordering::SeqCst) {
                return Err(Error::StoreError(format!(
                    "{}: flag store unavailable",
                    operation
                )));
            }
            Ok(())
        }
    }

    impl FlagStore for InMemoryFlagStore {
        async fn read_one(&self, name: &str) -> Result<Option<FlagRecord>> {
            self.check_available("read_one")?;
            Ok(self.row(name))
        }

        async fn read_all(&self) -> Result<Vec<FlagRecord>> {
            self.check_available("read_all")?;
            Ok(self.rows.iter().map(|r| r.value().clone()).collect())
        }

        async fn insert(&self, record: FlagRecord) -> Result<()> {
            self.check_available("insert")?;
            match self.rows.entry(record.name.clone()) {
                Entry::Occupied(_) => Err(Error::DuplicateFlag(record.name)),
                Entry::Vacant(slot) => {
                    slot.insert(record);
                    Ok(())
                }
            }
        }

        async fn update(&self, name: &str, patch: FlagPatch) -> Result<()> {
            self.check_available("update")?;
            match self.rows.get_mut(name) {
                Some(mut row) => {
                    row.apply(&patch);
                    Ok(())
                }
                None => Err(Error::NotFound(name.to_string())),
            }
        }

        async fn delete(&self, name: &str) -> Result<()> {
            self.check_available("delete")?;
            self.rows.remove(name);
            Ok(())
        }
    }
}

#[cfg(all(test, feature = "inmemory"))]
mod tests {
    use super::*;
    use crate::error::Error;

    #[tokio::test]
    async fn test_insert_and_read() {
        let store = InMemoryFlagStore::new();
        store
            .insert(FlagRecord::new("a", true, 20))
            .await
            .expect("Failed to insert");

        let fetched = store.read_one("a").await.expect("Failed to read");
        assert_eq!(fetched.map(|r| r.rollout_percentage), Some(20));
    }

    #[tokio::test]
    async fn test_read_missing() {
        let store = InMemoryFlagStore::new();
        let fetched = store.read_one("nope").await.expect("Failed to read");
        assert!(fetched.is_none());
    }

    #[tokio::test]
    async fn test_duplicate_insert_is_error() {
        let store = InMemoryFlagStore::new();
        store
            .insert(FlagRecord::new("a", true, 20))
            .await
            .expect("Failed to insert");

        let err = store
            .insert(FlagRecord::new("a", false, 0))
            .await
            .expect_err("Duplicate should fail");
        assert_eq!(err, Error::DuplicateFlag("a".to_string()));
        assert!(store.row("a").expect("row").enabled);
    }

    #[tokio::test]
    async fn test_update() {
        let store = InMemoryFlagStore::new();
        store.put(FlagRecord::new("a", true, 20));

        store
            .update("a", FlagPatch::toggle(false, Some(70)))
            .await
            .expect("Failed to update");

        let row = store.row("a").expect("row");
        assert!(!row.enabled);
        assert_eq!(row.rollout_percentage, 70);
    }

    #[tokio::test]
    async fn test_update_missing_is_not_found() {
        let store = InMemoryFlagStore::new();
        let err = store
            .update("a", FlagPatch::toggle(true, None))
            .await
            .expect_err("Update should fail");
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let store = InMemoryFlagStore::new();
        store.put(FlagRecord::new("a", true, 20));

        store.delete("a").await.expect("Failed to delete");
        store.delete("a").await.expect("Second delete should succeed");
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_read_all() {
        let store = InMemoryFlagStore::new();
        store.put(FlagRecord::new("a", true, 20));
        store.put(FlagRecord::new("b", false, 0));

        let all = store.read_all().await.expect("Failed to scan");
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn test_unavailable() {
        let store = InMemoryFlagStore::new();
        store.put(FlagRecord::new("a", true, 20));
        store.set_unavailable(true);

        assert!(matches!(
            store.read_one("a").await,
            Err(Error::StoreError(_))
        ));
        assert!(store.read_all().await.is_err());

        store.set_unavailable(false);
        assert!(store.read_one("a").await.expect("read").is_some());
    }

    #[tokio::test]
    async fn test_clones_share_rows() {
        let store = InMemoryFlagStore::new();
        let handle = store.clone();
        handle.put(FlagRecord::new("a", true, 20));
        assert_eq!(store.len(), 1);
    }
}
