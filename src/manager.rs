//! Feature flag manager - main entry point for flag evaluation.
//!
//! The manager reads through a TTL cache to the [`FlagStore`], keeps the cache
//! warm from a [`ChangeFeed`], and fans changes out to local subscribers.
//!
//! # Lifecycle
//!
//! ```text
//! new() ──► [serving] ──start(feed)──► [serving + feed task] ──cleanup()──► [closed]
//! ```
//!
//! `new` performs no I/O. Queries work before `start`; the cache then relies on
//! TTL expiry and local invalidation alone.
//!
//! # Failure policy
//!
//! Every store failure is absorbed here. Reads degrade to "absent", evaluation
//! to `reason: error` (feature off), and mutations to a failed
//! [`MutationOutcome`]. Development mode is the one fail-open path.
//! Panics from the store or a metrics hook during evaluation, and from
//! subscriber callbacks, are caught and logged.

use crate::cache::{CacheStats, FlagCache};
use crate::config::ManagerConfig;
use crate::error::{Error, Result};
use crate::feed::{ChangeEvent, ChangeFeed};
use crate::mode::{DevDefaults, Mode};
use crate::observability::{FlagMetrics, NoOpMetrics};
use crate::record::{FlagPatch, FlagRecord};
use crate::rollout::RolloutEvaluator;
use crate::store::FlagStore;
use dashmap::DashMap;
use futures::{FutureExt, StreamExt};
use serde::Serialize;
use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

/// Every cached flag record, keyed by name.
pub type FlagSnapshot = HashMap<String, FlagRecord>;

type Callback = Arc<dyn Fn(&FlagSnapshot) + Send + Sync>;

/// Why an evaluation came out the way it did.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EvaluationReason {
    /// Flag on and this caller is inside the rollout.
    Enabled,
    /// Master switch off.
    Disabled,
    /// Flag on, but this caller fell outside the rollout.
    Rollout,
    NotFound,
    /// The store could not be read.
    Error,
}

impl EvaluationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            EvaluationReason::Enabled => "enabled",
            EvaluationReason::Disabled => "disabled",
            EvaluationReason::Rollout => "rollout",
            EvaluationReason::NotFound => "not_found",
            EvaluationReason::Error => "error",
        }
    }
}

impl std::fmt::Display for EvaluationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Answer to "is this feature on".
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationResult {
    pub is_enabled: bool,
    pub reason: EvaluationReason,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rollout_percentage: Option<u8>,
}

impl EvaluationResult {
    fn off(reason: EvaluationReason) -> Self {
        EvaluationResult {
            is_enabled: false,
            reason,
            rollout_percentage: None,
        }
    }
}

/// Result of an administrative mutation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MutationOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl MutationOutcome {
    pub fn ok() -> Self {
        MutationOutcome {
            success: true,
            error: None,
        }
    }

    pub fn failed(error: &Error) -> Self {
        MutationOutcome {
            success: false,
            error: Some(error.to_string()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.success
    }
}

impl From<Result<()>> for MutationOutcome {
    fn from(result: Result<()>) -> Self {
        match result {
            Ok(()) => MutationOutcome::ok(),
            Err(e) => MutationOutcome::failed(&e),
        }
    }
}

// ============================================================================
// Shared state (cache + subscribers)
// ============================================================================

/// State touched by both request paths and the feed task.
struct Shared {
    cache: FlagCache,
    subscribers: DashMap<u64, Callback>,
    next_subscriber: AtomicU64,
}

impl Shared {
    fn apply(&self, event: ChangeEvent) {
        debug!("Applying change feed {} for {}", event.kind(), event.name());
        match event {
            ChangeEvent::Inserted(record) | ChangeEvent::Updated(record) => {
                let name = record.name.clone();
                self.cache.put(&name, record);
            }
            ChangeEvent::Deleted(record) => self.cache.invalidate(&record.name),
        }
        self.notify();
    }

    fn notify(&self) {
        // Copy out so callbacks run without holding shard locks; a callback
        // may subscribe or unsubscribe.
        let callbacks: Vec<Callback> = self
            .subscribers
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        if callbacks.is_empty() {
            return;
        }

        let snapshot = self.cache.snapshot();
        for callback in callbacks {
            // A panicking subscriber must not take the feed task down with it.
            let delivered = std::panic::catch_unwind(AssertUnwindSafe(|| callback(&snapshot)));
            if let Err(panic) = delivered {
                warn!("Flag subscriber panicked: {}", panic_message(&*panic));
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&str>() {
        *s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown panic"
    }
}

/// Returned by [`FeatureFlagManager::subscribe`].
///
/// Dropping the handle keeps the callback registered; call
/// [`unsubscribe`](SubscriptionHandle::unsubscribe) to remove it.
pub struct SubscriptionHandle {
    id: u64,
    shared: Weak<Shared>,
}

impl SubscriptionHandle {
    /// Remove this callback. Other subscribers are unaffected; repeated calls are no-ops.
    pub fn unsubscribe(&self) {
        if let Some(shared) = self.shared.upgrade() {
            if shared.subscribers.remove(&self.id).is_some() {
                debug!("Subscriber {} removed", self.id);
            }
        }
    }
}

// ============================================================================
// Manager
// ============================================================================

/// Cache-backed feature flag manager.
///
/// # Example
///
/// ```no_run
/// use flag_kit::{FeatureFlagManager, InMemoryChangeFeed, InMemoryFlagStore, ManagerConfig};
///
/// #[tokio::main]
/// async fn main() -> flag_kit::Result<()> {
///     let manager = FeatureFlagManager::new(InMemoryFlagStore::new(), ManagerConfig::default());
///     manager.start(&InMemoryChangeFeed::new())?;
///
///     manager.create_flag("new_checkout", true, 25, None).await;
///     let result = manager.is_feature_enabled("new_checkout", Some("user-42")).await;
///     println!("{} ({})", result.is_enabled, result.reason);
///
///     manager.cleanup();
///     Ok(())
/// }
/// ```
pub struct FeatureFlagManager<S: FlagStore> {
    store: S,
    shared: Arc<Shared>,
    metrics: Box<dyn FlagMetrics>,
    mode: Mode,
    dev_defaults: DevDefaults,
    evaluator: RolloutEvaluator,
    feed_task: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl<S: FlagStore> FeatureFlagManager<S> {
    /// Build a manager. No I/O happens until the first query or [`start`](Self::start).
    pub fn new(store: S, config: ManagerConfig) -> Self {
        FeatureFlagManager {
            store,
            shared: Arc::new(Shared {
                cache: FlagCache::new(config.ttl),
                subscribers: DashMap::new(),
                next_subscriber: AtomicU64::new(0),
            }),
            metrics: Box::new(NoOpMetrics),
            mode: config.mode,
            dev_defaults: config.dev_defaults,
            evaluator: RolloutEvaluator,
            feed_task: Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }

    pub fn with_metrics(mut self, metrics: Box<dyn FlagMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn ttl(&self) -> Duration {
        self.shared.cache.ttl()
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    /// Subscribe to `feed` and apply its events on a background task.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// - `Error::Closed` after [`cleanup`](Self::cleanup)
    /// - `Error::AlreadyStarted` while a feed task is still running
    /// - `Error::FeedError` when there is no runtime or the feed refuses the subscription
    pub fn start<F: ChangeFeed + ?Sized>(&self, feed: &F) -> Result<()> {
        // `closed` is only written under this lock.
        let mut task = self
            .feed_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::Closed);
        }
        if task.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return Err(Error::AlreadyStarted);
        }

        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| Error::FeedError(format!("no tokio runtime: {}", e)))?;
        let mut stream = feed.subscribe()?;
        let shared = Arc::clone(&self.shared);

        *task = Some(runtime.spawn(async move {
            while let Some(event) = stream.next().await {
                shared.apply(event);
            }
            info!("Change feed stream ended");
        }));

        info!("Feature flag manager subscribed to change feed ({} mode)", self.mode);
        Ok(())
    }

    /// Whether a feed task is alive.
    pub fn is_running(&self) -> bool {
        self.feed_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Unsubscribe from the feed, drop all subscribers and empty the cache.
    ///
    /// The instance must not be reused afterwards; `start` will refuse.
    pub fn cleanup(&self) {
        {
            let mut task = self
                .feed_task
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            self.closed.store(true, Ordering::SeqCst);
            if let Some(handle) = task.take() {
                handle.abort();
            }
        }

        self.shared.subscribers.clear();
        self.shared.cache.clear();
        info!("Feature flag manager cleaned up");
    }

    // ------------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------------

    /// Cached record if fresh, otherwise a store read. Store failures are
    /// logged and reported as absent.
    pub async fn get_flag(&self, name: &str) -> Option<FlagRecord> {
        self.fetch_flag(name).await.unwrap_or(None)
    }

    async fn fetch_flag(&self, name: &str) -> Result<Option<FlagRecord>> {
        if let Some(cached) = self.shared.cache.lookup(name) {
            self.metrics.record_cache_hit(name);
            return Ok(cached);
        }
        self.metrics.record_cache_miss(name);

        match self.store.read_one(name).await {
            Ok(Some(record)) => {
                self.shared.cache.put(name, record.clone());
                Ok(Some(record))
            }
            Ok(None) => {
                self.shared.cache.put_absent(name);
                Ok(None)
            }
            Err(e) => {
                warn!("Error fetching feature flag {}: {}", name, e);
                self.metrics.record_store_error("read_one", name, &e.to_string());
                Err(e)
            }
        }
    }

    /// Evaluate a flag for an optional user.
    ///
    /// Pass a stable `user_id` whenever one exists: without it the rollout
    /// decision is random per call.
    ///
    /// Never panics: a panic inside the store or a metrics hook is logged and
    /// reported as `reason: error`.
    pub async fn is_feature_enabled(&self, name: &str, user_id: Option<&str>) -> EvaluationResult {
        let evaluation = async {
            let timer = Instant::now();
            let result = self.evaluate(name, user_id).await;
            self.metrics
                .record_evaluation(name, result.reason, timer.elapsed());
            result
        };

        match AssertUnwindSafe(evaluation).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => {
                warn!(
                    "Evaluation of feature flag {} panicked: {}",
                    name,
                    panic_message(&*panic)
                );
                EvaluationResult::off(EvaluationReason::Error)
            }
        }
    }

    async fn evaluate(&self, name: &str, user_id: Option<&str>) -> EvaluationResult {
        if self.mode.uses_dev_defaults() {
            // Unlisted flags are ON here, unlike every other mode.
            let enabled = self.dev_defaults.lookup(name);
            debug!("Dev default for {}: {}", name, enabled);
            return EvaluationResult {
                is_enabled: enabled,
                reason: if enabled {
                    EvaluationReason::Enabled
                } else {
                    EvaluationReason::Disabled
                },
                rollout_percentage: None,
            };
        }

        let record = match self.fetch_flag(name).await {
            Ok(Some(record)) => record,
            Ok(None) => return EvaluationResult::off(EvaluationReason::NotFound),
            Err(_) => return EvaluationResult::off(EvaluationReason::Error),
        };

        if !record.enabled {
            return EvaluationResult {
                is_enabled: false,
                reason: EvaluationReason::Disabled,
                rollout_percentage: Some(record.rollout_percentage),
            };
        }

        let is_enabled = self.evaluator.decide(record.rollout_percentage, user_id);
        EvaluationResult {
            is_enabled,
            reason: if is_enabled {
                EvaluationReason::Enabled
            } else {
                EvaluationReason::Rollout
            },
            rollout_percentage: Some(record.rollout_percentage),
        }
    }

    /// Load every flag from the store into the cache and return the result.
    ///
    /// Records cached locally but missing from the scan are evicted. On store
    /// failure the current cache contents are returned instead.
    pub async fn fetch_all_flags(&self) -> FlagSnapshot {
        match self.store.read_all().await {
            Ok(records) => {
                let fresh: FlagSnapshot = records
                    .into_iter()
                    .map(|record| (record.name.clone(), record))
                    .collect();

                for name in self.shared.cache.snapshot().keys() {
                    if !fresh.contains_key(name) {
                        self.shared.cache.invalidate(name);
                    }
                }
                for (name, record) in &fresh {
                    self.shared.cache.put(name, record.clone());
                }

                debug!("Bulk loaded {} feature flags", fresh.len());
                self.shared.notify();
                fresh
            }
            Err(e) => {
                warn!("Error fetching all feature flags: {}", e);
                self.metrics.record_store_error("read_all", "*", &e.to_string());
                self.shared.cache.snapshot()
            }
        }
    }

    // ------------------------------------------------------------------------
    // Mutations
    // ------------------------------------------------------------------------

    /// Flip a flag and optionally change its rollout (clamped to `[0, 100]`).
    pub async fn update_flag(
        &self,
        name: &str,
        enabled: bool,
        rollout_percentage: Option<i32>,
    ) -> MutationOutcome {
        let patch = FlagPatch::toggle(enabled, rollout_percentage);
        self.mutate("update", name, self.store.update(name, patch).await)
    }

    /// Insert a new flag. Callers wanting the conventional defaults pass
    /// `enabled = false, rollout_percentage = 0`.
    pub async fn create_flag(
        &self,
        name: &str,
        enabled: bool,
        rollout_percentage: i32,
        description: Option<&str>,
    ) -> MutationOutcome {
        let mut record = FlagRecord::new(name, enabled, rollout_percentage);
        record.description = description.map(str::to_string);
        self.mutate("create", name, self.store.insert(record).await)
    }

    pub async fn delete_flag(&self, name: &str) -> MutationOutcome {
        self.mutate("delete", name, self.store.delete(name).await)
    }

    fn mutate(&self, operation: &str, name: &str, result: Result<()>) -> MutationOutcome {
        match result {
            Ok(()) => {
                // Don't wait for the feed to catch up.
                self.shared.cache.invalidate(name);
                info!("Feature flag {} {}d", name, operation);
                MutationOutcome::ok()
            }
            Err(e) => {
                warn!("Error during {} of feature flag {}: {}", operation, name, e);
                self.metrics
                    .record_store_error(operation, name, &e.to_string());
                MutationOutcome::failed(&e)
            }
        }
    }

    // ------------------------------------------------------------------------
    // Change propagation
    // ------------------------------------------------------------------------

    /// Register a callback run after every change-feed event and bulk fetch.
    pub fn subscribe<F>(&self, callback: F) -> SubscriptionHandle
    where
        F: Fn(&FlagSnapshot) + Send + Sync + 'static,
    {
        let id = self.shared.next_subscriber.fetch_add(1, Ordering::Relaxed);
        self.shared.subscribers.insert(id, Arc::new(callback));
        debug!("Subscriber {} registered", id);
        SubscriptionHandle {
            id,
            shared: Arc::downgrade(&self.shared),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.shared.subscribers.len()
    }

    /// Apply a change event as if it arrived on the feed.
    pub fn apply_change(&self, event: ChangeEvent) {
        self.shared.apply(event);
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.shared.cache.stats()
    }
}

impl<S: FlagStore> Drop for FeatureFlagManager<S> {
    fn drop(&mut self) {
        let task = self
            .feed_task
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(handle) = task.take() {
            handle.abort();
        }
    }
}
