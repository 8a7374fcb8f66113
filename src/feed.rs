//! Change feed: push notifications for inserted, updated and deleted flags.
//!
//! A [`ChangeFeed`] hands out a [`ChangeStream`]. The manager drains it on a
//! background task; dropping the stream is how a consumer unsubscribes.

use crate::error::{Error, Result};
use crate::record::FlagRecord;
use futures::stream::BoxStream;
use serde::Deserialize;
use serde_json::Value;

/// A single change to the flag table.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChangeEvent {
    Inserted(FlagRecord),
    Updated(FlagRecord),
    /// The record may carry only its `name`; other columns are defaults.
    Deleted(FlagRecord),
}

impl ChangeEvent {
    pub fn record(&self) -> &FlagRecord {
        match self {
            ChangeEvent::Inserted(r) | ChangeEvent::Updated(r) | ChangeEvent::Deleted(r) => r,
        }
    }

    pub fn name(&self) -> &str {
        &self.record().name
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ChangeEvent::Inserted(_) => "INSERT",
            ChangeEvent::Updated(_) => "UPDATE",
            ChangeEvent::Deleted(_) => "DELETE",
        }
    }

    /// Decode a realtime-style payload.
    ///
    /// ```
    /// use flag_kit::ChangeEvent;
    /// use serde_json::json;
    ///
    /// let payload = json!({
    ///     "eventType": "DELETE",
    ///     "new": {},
    ///     "old": { "name": "legacy_nav" }
    /// });
    ///
    /// let event = ChangeEvent::from_payload(&payload).unwrap();
    /// assert!(matches!(event, ChangeEvent::Deleted(ref r) if r.name == "legacy_nav"));
    /// ```
    ///
    /// # Errors
    ///
    /// `Error::InvalidPayload` for unknown event types or rows without a `name`.
    pub fn from_payload(payload: &Value) -> Result<Self> {
        let raw = RawChange::deserialize(payload)?;
        match raw.event_type.to_ascii_uppercase().as_str() {
            "INSERT" => Ok(ChangeEvent::Inserted(decode_row(raw.new)?)),
            "UPDATE" => Ok(ChangeEvent::Updated(decode_row(raw.new)?)),
            "DELETE" => Ok(ChangeEvent::Deleted(decode_row(raw.old)?)),
            other => Err(Error::InvalidPayload(format!(
                "unknown event type: {}",
                other
            ))),
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawChange {
    event_type: String,
    #[serde(default)]
    new: Option<Value>,
    #[serde(default)]
    old: Option<Value>,
}

fn decode_row(row: Option<Value>) -> Result<FlagRecord> {
    let row = row.ok_or_else(|| Error::InvalidPayload("missing row".to_string()))?;
    Ok(serde_json::from_value(row)?)
}

/// Stream of change events. Dropping it ends the subscription.
pub type ChangeStream = BoxStream<'static, ChangeEvent>;

/// Trait for change feed implementations.
///
/// Implementations adapt a push channel (websocket, LISTEN/NOTIFY, message
/// bus) into a [`ChangeStream`]. Each call to `subscribe` yields an
/// independent stream.
pub trait ChangeFeed: Send + Sync {
    /// Open a new subscription.
    ///
    /// # Errors
    /// `Error::FeedError` if the channel cannot be opened
    fn subscribe(&self) -> Result<ChangeStream>;
}

// ============================================================================
// In-Memory Feed
// ============================================================================

#[cfg(feature = "inmemory")]
pub use self::memory::InMemoryChangeFeed;

#[cfg(feature = "inmemory")]
mod memory {
    use super::{ChangeEvent, ChangeFeed, ChangeStream};
    use crate::error::Result;
    use futures::StreamExt;
    use tokio::sync::broadcast;
    use tokio::sync::broadcast::error::RecvError;

    const DEFAULT_CAPACITY: usize = 256;

    /// Broadcast-backed feed for tests and single-process deployments.
    ///
    /// Slow subscribers that fall more than `capacity` events behind skip the
    /// missed events with a warning; the TTL still bounds their staleness.
    #[derive(Clone)]
    pub struct InMemoryChangeFeed {
        sender: broadcast::Sender<ChangeEvent>,
    }

    impl InMemoryChangeFeed {
        pub fn new() -> Self {
            Self::with_capacity(DEFAULT_CAPACITY)
        }

        pub fn with_capacity(capacity: usize) -> Self {
            let (sender, _) = broadcast::channel(capacity);
            InMemoryChangeFeed { sender }
        }

        /// Push an event to every open stream. Returns how many received it.
        pub fn publish(&self, event: ChangeEvent) -> usize {
            debug!("Feed publish {} {}", event.kind(), event.name());
            self.sender.send(event).unwrap_or(0)
        }

        /// Number of open streams.
        pub fn subscriber_count(&self) -> usize {
            self.sender.receiver_count()
        }
    }

    impl Default for InMemoryChangeFeed {
        fn default() -> Self {
            Self::new()
        }
    }

    impl ChangeFeed for InMemoryChangeFeed {
        fn subscribe(&self) -> Result<ChangeStream> {
            let receiver = self.sender.subscribe();
            let stream = futures::stream::unfold(receiver, |mut receiver| async move {
                loop {
                    match receiver.recv().await {
                        Ok(event) => return Some((event, receiver)),
                        Err(RecvError::Lagged(skipped)) => {
                            warn!("Change feed subscriber lagged, skipped {} events", skipped);
                        }
                        Err(RecvError::Closed) => return None,
                    }
                }
            });
            Ok(stream.boxed())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_insert() {
        let payload = json!({
            "eventType": "INSERT",
            "new": {
                "name": "beta_dashboard",
                "enabled": true,
                "rollout_percentage": 40,
                "description": null,
                "created_at": "2024-03-01T10:00:00Z",
                "updated_at": "2024-03-01T10:00:00Z"
            },
            "old": {}
        });

        let event = ChangeEvent::from_payload(&payload).expect("Failed to decode");
        assert_eq!(event.kind(), "INSERT");
        assert_eq!(event.name(), "beta_dashboard");
        assert_eq!(event.record().rollout_percentage, 40);
    }

    #[test]
    fn test_decode_update() {
        let payload = json!({
            "eventType": "UPDATE",
            "new": { "name": "beta_dashboard", "enabled": false, "rollout_percentage": 40 }
        });

        let event = ChangeEvent::from_payload(&payload).expect("Failed to decode");
        assert!(matches!(event, ChangeEvent::Updated(ref r) if !r.enabled));
    }

    #[test]
    fn test_decode_delete_uses_old_row() {
        let payload = json!({
            "eventType": "DELETE",
            "new": {},
            "old": { "name": "beta_dashboard" }
        });

        let event = ChangeEvent::from_payload(&payload).expect("Failed to decode");
        assert!(matches!(event, ChangeEvent::Deleted(_)));
        assert_eq!(event.name(), "beta_dashboard");
    }

    #[test]
    fn test_decode_rejects_unknown_type() {
        let payload = json!({ "eventType": "TRUNCATE", "new": {}, "old": {} });
        let err = ChangeEvent::from_payload(&payload).expect_err("should fail");
        assert!(matches!(err, Error::InvalidPayload(_)));
    }

    #[test]
    fn test_decode_rejects_row_without_name() {
        let payload = json!({ "eventType": "INSERT", "new": { "enabled": true } });
        assert!(ChangeEvent::from_payload(&payload).is_err());
    }

    #[cfg(feature = "inmemory")]
    #[tokio::test]
    async fn test_in_memory_feed_fan_out() {
        use futures::StreamExt;

        let feed = InMemoryChangeFeed::new();
        let mut first = feed.subscribe().expect("subscribe");
        let mut second = feed.subscribe().expect("subscribe");
        assert_eq!(feed.subscriber_count(), 2);

        let event = ChangeEvent::Inserted(FlagRecord::new("a", true, 10));
        assert_eq!(feed.publish(event.clone()), 2);

        assert_eq!(first.next().await, Some(event.clone()));
        assert_eq!(second.next().await, Some(event));

        drop(first);
        assert_eq!(feed.subscriber_count(), 1);
    }

    #[cfg(feature = "inmemory")]
    #[test]
    fn test_publish_without_subscribers() {
        let feed = InMemoryChangeFeed::new();
        let event = ChangeEvent::Deleted(FlagRecord::new("a", false, 0));
        assert_eq!(feed.publish(event), 0);
    }
}
