//! # flag-kit
//!
//! Cache-backed, realtime-synchronized feature flag evaluation with consistent
//! per-user rollout bucketing.
//!
//! ## Features
//!
//! - **Store Agnostic:** Flags live behind the [`FlagStore`] trait (hosted Postgres, REST, in-memory)
//! - **Push + Pull Freshness:** A TTL cache (5 minutes by default) kept warm by a [`ChangeFeed`]
//! - **Sticky Rollouts:** The same user id always lands in the same rollout bucket
//! - **Fail Closed:** Store outages turn features off instead of surfacing errors
//! - **Explicit Modes:** Development defaults are injected, never read from the environment
//!
//! ## Quick Start
//!
//! ```ignore
//! use flag_kit::{FlagService, InMemoryChangeFeed, InMemoryFlagStore, ManagerConfig};
//!
//! // 1. Wire the collaborators (replace with your real store/feed)
//! let store = InMemoryFlagStore::new();
//! let feed = InMemoryChangeFeed::new();
//!
//! // 2. Build once at startup, share the handle
//! let flags = FlagService::start(store, &feed, ManagerConfig::default())?;
//!
//! // 3. Evaluate
//! let result = flags.is_feature_enabled("new_checkout", Some("user-42")).await;
//! if result.is_enabled {
//!     // ...
//! }
//!
//! // 4. Tear down
//! flags.cleanup();
//! ```

#[macro_use]
extern crate log;

pub mod cache;
pub mod config;
pub mod error;
pub mod feed;
pub mod manager;
pub mod mode;
pub mod observability;
pub mod record;
pub mod rollout;
pub mod service;
pub mod store;

// Re-exports for convenience
pub use cache::FlagCache;
pub use config::ManagerConfig;
pub use error::{Error, Result};
pub use feed::{ChangeEvent, ChangeFeed, ChangeStream};
pub use manager::{
    EvaluationReason, EvaluationResult, FeatureFlagManager, FlagSnapshot, MutationOutcome,
    SubscriptionHandle,
};
pub use mode::{DevDefaults, Mode};
pub use record::{FlagPatch, FlagRecord};
pub use rollout::RolloutEvaluator;
pub use service::FlagService;
pub use store::FlagStore;

#[cfg(feature = "inmemory")]
pub use feed::InMemoryChangeFeed;
#[cfg(feature = "inmemory")]
pub use store::InMemoryFlagStore;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
