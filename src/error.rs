//! Error types for flag storage, change feeds and the manager.

use std::fmt;

/// Result type for flag-kit operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for flag-kit.
///
/// Store and feed implementations return these. The manager absorbs them at its
/// public boundary: reads degrade to "absent", evaluations to `reason: error`,
/// and mutations to a failed [`MutationOutcome`](crate::manager::MutationOutcome).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The flag store call itself failed.
    ///
    /// Common causes:
    /// - Network or connection loss to the backing service
    /// - Permission denied by row-level policies
    /// - Malformed query
    StoreError(String),

    /// No record exists for the named flag.
    ///
    /// Only returned by store operations that require an existing record
    /// (`update`). Point reads report absence as `Ok(None)` instead.
    NotFound(String),

    /// Insert of a flag whose name already exists.
    DuplicateFlag(String),

    /// Subscribing to, or reading from, the change feed failed.
    FeedError(String),

    /// A change-feed payload or flag row could not be decoded.
    InvalidPayload(String),

    /// Invalid manager configuration (e.g. an unknown mode name).
    ConfigError(String),

    /// `start()` was called on a manager that is already consuming a feed.
    AlreadyStarted,

    /// The manager has been cleaned up and must not be reused.
    Closed,

    /// Generic error with custom message.
    Other(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::StoreError(msg) => write!(f, "Store error: {}", msg),
            Error::NotFound(name) => write!(f, "Flag not found: {}", name),
            Error::DuplicateFlag(name) => write!(f, "Flag already exists: {}", name),
            Error::FeedError(msg) => write!(f, "Change feed error: {}", msg),
            Error::InvalidPayload(msg) => write!(f, "Invalid payload: {}", msg),
            Error::ConfigError(msg) => write!(f, "Config error: {}", msg),
            Error::AlreadyStarted => write!(f, "Manager already started"),
            Error::Closed => write!(f, "Manager has been cleaned up"),
            Error::Other(msg) => write!(f, "Error: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

// ============================================================================
// Conversions from other error types
// ============================================================================

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::InvalidPayload(e.to_string())
    }
}

impl From<String> for Error {
    fn from(e: String) -> Self {
        Error::Other(e)
    }
}

impl From<&str> for Error {
    fn from(e: &str) -> Self {
        Error::Other(e.to_string())
    }
}
