//! Shared flag service for web applications.
//!
//! Wraps a [`FeatureFlagManager`] in `Arc` so handlers, middleware and
//! background jobs can hold the same instance (one cache, one feed
//! subscription per process) without a global.

use crate::config::ManagerConfig;
use crate::error::Result;
use crate::feed::ChangeFeed;
use crate::manager::FeatureFlagManager;
use crate::store::FlagStore;
use std::ops::Deref;
use std::sync::Arc;

/// Cloneable handle to a single [`FeatureFlagManager`].
///
/// # Example
///
/// ```ignore
/// use flag_kit::{FlagService, ManagerConfig};
///
/// // At startup
/// let flags = FlagService::start(PgFlagStore::new(pool), &realtime, ManagerConfig::default())?;
///
/// // In your app state
/// pub struct AppState {
///     flags: FlagService<PgFlagStore>,
/// }
///
/// // In a handler
/// if state.flags.is_enabled("new_checkout", Some(&user.id)).await {
///     // ...
/// }
/// ```
pub struct FlagService<S: FlagStore> {
    manager: Arc<FeatureFlagManager<S>>,
}

impl<S: FlagStore> Clone for FlagService<S> {
    fn clone(&self) -> Self {
        FlagService {
            manager: Arc::clone(&self.manager),
        }
    }
}

impl<S: FlagStore> FlagService<S> {
    /// Wrap an existing manager (started or not).
    pub fn new(manager: FeatureFlagManager<S>) -> Self {
        FlagService {
            manager: Arc::new(manager),
        }
    }

    /// Build a manager, subscribe it to `feed`, and wrap it.
    ///
    /// # Errors
    ///
    /// Same as [`FeatureFlagManager::start`].
    pub fn start<F: ChangeFeed + ?Sized>(store: S, feed: &F, config: ManagerConfig) -> Result<Self> {
        let manager = FeatureFlagManager::new(store, config);
        manager.start(feed)?;
        Ok(Self::new(manager))
    }

    /// Boolean shortcut over [`FeatureFlagManager::is_feature_enabled`].
    pub async fn is_enabled(&self, name: &str, user_id: Option<&str>) -> bool {
        self.manager.is_feature_enabled(name, user_id).await.is_enabled
    }

    pub fn manager(&self) -> &FeatureFlagManager<S> {
        &self.manager
    }
}

impl<S: FlagStore> Deref for FlagService<S> {
    type Target = FeatureFlagManager<S>;

    fn deref(&self) -> &Self::Target {
        &self.manager
    }
}

#[cfg(all(test, feature = "inmemory"))]
mod tests {
    use super::*;
    use crate::feed::{ChangeEvent, InMemoryChangeFeed};
    use crate::record::FlagRecord;
    use crate::store::InMemoryFlagStore;

    #[tokio::test]
    async fn test_service_start() {
        let feed = InMemoryChangeFeed::new();
        let service = FlagService::start(InMemoryFlagStore::new(), &feed, ManagerConfig::default())
            .expect("Failed to start");

        assert!(service.is_running());
        assert_eq!(feed.subscriber_count(), 1);
    }

    #[test]
    fn test_service_clone() {
        let manager = FeatureFlagManager::new(InMemoryFlagStore::new(), ManagerConfig::default());
        let service1 = FlagService::new(manager);
        let service2 = service1.clone();

        // Both handles share the same manager
        assert!(Arc::ptr_eq(&service1.manager, &service2.manager));
    }

    #[tokio::test]
    async fn test_service_is_enabled() {
        let store = InMemoryFlagStore::new();
        store.put(FlagRecord::new("everyone", true, 100));
        store.put(FlagRecord::new("nobody", false, 100));
        let service = FlagService::new(FeatureFlagManager::new(store, ManagerConfig::default()));

        assert!(service.is_enabled("everyone", Some("u1")).await);
        assert!(!service.is_enabled("nobody", Some("u1")).await);
        assert!(!service.is_enabled("unknown", None).await);
    }

    #[tokio::test]
    async fn test_service_thread_safety() {
        let store = InMemoryFlagStore::new();
        store.put(FlagRecord::new("everyone", true, 100));
        let service = FlagService::new(FeatureFlagManager::new(store, ManagerConfig::default()));

        let mut handles = vec![];
        for i in 0..5 {
            let service = service.clone();
            handles.push(tokio::spawn(async move {
                let user = format!("user-{}", i);
                assert!(service.is_enabled("everyone", Some(&user)).await);
            }));
        }

        for handle in handles {
            handle.await.expect("Task failed");
        }
    }

    #[tokio::test]
    async fn test_clones_see_same_cache() {
        let service = FlagService::new(FeatureFlagManager::new(
            InMemoryFlagStore::new(),
            ManagerConfig::default(),
        ));
        let other = service.clone();

        service.apply_change(ChangeEvent::Inserted(FlagRecord::new("pushed", true, 100)));
        assert!(other.manager().get_flag("pushed").await.is_some());
    }
}
