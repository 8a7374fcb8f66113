//! Manager configuration.

use crate::cache::DEFAULT_TTL;
use crate::mode::{DevDefaults, Mode};
use std::time::Duration;

/// Setup-time configuration for a [`FeatureFlagManager`](crate::FeatureFlagManager).
///
/// ```
/// use flag_kit::{DevDefaults, ManagerConfig, Mode};
/// use std::time::Duration;
///
/// let config = ManagerConfig::default()
///     .with_ttl(Duration::from_secs(60))
///     .with_mode(Mode::Development)
///     .with_dev_defaults(DevDefaults::new().with("payments_v2", false));
///
/// assert_eq!(config.ttl, Duration::from_secs(60));
/// ```
#[derive(Clone, Debug)]
pub struct ManagerConfig {
    /// Freshness window for cached flags. Also the worst-case staleness for
    /// changes made by other processes when the change feed is silent.
    pub ttl: Duration,

    pub mode: Mode,

    /// Only consulted in [`Mode::Development`].
    pub dev_defaults: DevDefaults,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        ManagerConfig {
            ttl: DEFAULT_TTL,
            mode: Mode::default(),
            dev_defaults: DevDefaults::default(),
        }
    }
}

impl ManagerConfig {
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_dev_defaults(mut self, defaults: DevDefaults) -> Self {
        self.dev_defaults = defaults;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ManagerConfig::default();
        assert_eq!(config.ttl, Duration::from_secs(300));
        assert_eq!(config.mode, Mode::Production);
        assert!(config.dev_defaults.is_empty());
    }

    #[test]
    fn test_builder() {
        let config = ManagerConfig::default()
            .with_ttl(Duration::from_secs(5))
            .with_mode(Mode::Test);

        assert_eq!(config.ttl, Duration::from_secs(5));
        assert_eq!(config.mode, Mode::Test);
    }
}
