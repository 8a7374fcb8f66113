//! Metrics hooks for flag lookups and evaluations.
//!
//! Implement [`FlagMetrics`] to feed your monitoring system:
//!
//! ```ignore
//! use flag_kit::observability::FlagMetrics;
//! use flag_kit::EvaluationReason;
//! use std::time::Duration;
//!
//! struct PrometheusMetrics;
//!
//! impl FlagMetrics for PrometheusMetrics {
//!     fn record_evaluation(&self, name: &str, reason: EvaluationReason, _duration: Duration) {
//!         // counter!("flag_evaluations", "flag" => name, "reason" => reason.as_str()).inc();
//!     }
//! }
//!
//! // let manager = FeatureFlagManager::new(store, config)
//! //     .with_metrics(Box::new(PrometheusMetrics));
//! ```
//!
//! Methods left unimplemented fall back to logging through the `log` crate.
//! The manager installs [`NoOpMetrics`] unless told otherwise.

use crate::manager::EvaluationReason;
use std::time::Duration;

/// Trait for flag metrics collection.
pub trait FlagMetrics: Send + Sync {
    /// Record a lookup answered from a fresh cache entry.
    fn record_cache_hit(&self, name: &str) {
        debug!("Flag cache HIT: {}", name);
    }

    /// Record a lookup that had to go to the store.
    fn record_cache_miss(&self, name: &str) {
        debug!("Flag cache MISS: {}", name);
    }

    /// Record the outcome of `is_feature_enabled`.
    fn record_evaluation(&self, name: &str, reason: EvaluationReason, duration: Duration) {
        debug!("Flag EVAL: {} -> {} in {:?}", name, reason, duration);
    }

    /// Record a failed store call.
    fn record_store_error(&self, operation: &str, name: &str, error: &str) {
        warn!("Flag store ERROR during {} for {}: {}", operation, name, error);
    }
}

/// Default metrics implementation (no-op).
#[derive(Clone, Default)]
pub struct NoOpMetrics;

impl FlagMetrics for NoOpMetrics {
    fn record_cache_hit(&self, _name: &str) {}
    fn record_cache_miss(&self, _name: &str) {}
    fn record_evaluation(&self, _name: &str, _reason: EvaluationReason, _duration: Duration) {}
    fn record_store_error(&self, _operation: &str, _name: &str, _error: &str) {}
}
