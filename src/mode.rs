//! Deployment modes and the development-defaults table.
//!
//! # The Three Modes
//!
//! | Mode | Store consulted | Unknown flag |
//! |------|-----------------|--------------|
//! | **Production** | Yes | Off (`not_found`) |
//! | **Development** | No, answers come from [`DevDefaults`] | On |
//! | **Test** | Yes | Off (`not_found`) |
//!
//! `Test` evaluates exactly like `Production`. It exists so hosts can name the
//! mode their test harness runs in without picking up development overrides.

use crate::error::Error;
use std::collections::HashMap;
use std::str::FromStr;

/// Deployment mode the manager evaluates flags in.
///
/// ```
/// use flag_kit::Mode;
///
/// let mode: Mode = "dev".parse().unwrap();
/// assert_eq!(mode, Mode::Development);
/// assert_eq!(mode.to_string(), "development");
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Mode {
    #[default]
    Production,

    /// Skip the store entirely and answer from the dev-defaults table.
    Development,

    Test,
}

impl Mode {
    pub fn uses_dev_defaults(&self) -> bool {
        matches!(self, Mode::Development)
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Mode::Production => write!(f, "production"),
            Mode::Development => write!(f, "development"),
            Mode::Test => write!(f, "test"),
        }
    }
}

impl FromStr for Mode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "production" | "prod" => Ok(Mode::Production),
            "development" | "dev" => Ok(Mode::Development),
            "test" => Ok(Mode::Test),
            other => Err(Error::ConfigError(format!("unknown mode: {}", other))),
        }
    }
}

/// Static per-flag answers used in [`Mode::Development`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DevDefaults {
    flags: HashMap<String, bool>,
}

impl DevDefaults {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, enabled: bool) -> Self {
        self.flags.insert(name.into(), enabled);
        self
    }

    /// Listed value, or `true` for unlisted flags.
    ///
    /// Deliberately fail-open: local development should not need every flag
    /// seeded. Production evaluation fails closed.
    pub fn lookup(&self, name: &str) -> bool {
        self.flags.get(name).copied().unwrap_or(true)
    }

    pub fn len(&self) -> usize {
        self.flags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flags.is_empty()
    }
}

impl<K: Into<String>> FromIterator<(K, bool)> for DevDefaults {
    fn from_iter<I: IntoIterator<Item = (K, bool)>>(iter: I) -> Self {
        DevDefaults {
            flags: iter.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_display() {
        assert_eq!(Mode::Production.to_string(), "production");
        assert_eq!(Mode::Development.to_string(), "development");
        assert_eq!(Mode::Test.to_string(), "test");
    }

    #[test]
    fn test_mode_default() {
        assert_eq!(Mode::default(), Mode::Production);
    }

    #[test]
    fn test_mode_from_str() {
        assert_eq!("PROD".parse::<Mode>().expect("parse"), Mode::Production);
        assert_eq!(" development ".parse::<Mode>().expect("parse"), Mode::Development);
        assert_eq!("test".parse::<Mode>().expect("parse"), Mode::Test);
        assert!(matches!(
            "staging".parse::<Mode>(),
            Err(Error::ConfigError(_))
        ));
    }

    #[test]
    fn test_only_development_uses_defaults() {
        assert!(Mode::Development.uses_dev_defaults());
        assert!(!Mode::Production.uses_dev_defaults());
        assert!(!Mode::Test.uses_dev_defaults());
    }

    #[test]
    fn test_dev_defaults_lookup() {
        let defaults = DevDefaults::new()
            .with("payments_v2", false)
            .with("new_dashboard", true);

        assert!(!defaults.lookup("payments_v2"));
        assert!(defaults.lookup("new_dashboard"));
        assert!(defaults.lookup("never_listed"));
        assert_eq!(defaults.len(), 2);
    }

    #[test]
    fn test_dev_defaults_from_iter() {
        let defaults: DevDefaults = [("a", false), ("b", true)].into_iter().collect();
        assert!(!defaults.lookup("a"));
        assert!(defaults.lookup("b"));
    }
}
