use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::store::rollups::MinuteRollup;

/// Egress payload for one minute rollup.
#[derive(Debug, Clone, Serialize)]
pub struct RollupMessage {
    pub tag_id: i64,
    pub min: f64,
    pub max: f64,
    pub avg: f64,
    pub count: i64,
    /// Minute start, ISO-8601.
    pub timestamp: DateTime<Utc>,
}

impl RollupMessage {
    /// Build the egress message for a stored rollup.
    ///
    /// Returns `None` if the stored timestamp cannot be represented, which
    /// only happens for values far outside any real clock.
    pub fn from_rollup(rollup: &MinuteRollup) -> Option<Self> {
        let timestamp = DateTime::from_timestamp(rollup.timestamp, 0)?;
        Some(Self {
            tag_id: rollup.tag_id,
            min: rollup.min,
            max: rollup.max,
            avg: rollup.avg,
            count: rollup.count,
            timestamp,
        })
    }
}

/// One serialized message bound for the external transport.
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    pub topic: Arc<str>,
    pub payload: String,
}

/// Publisher hands finished rollups to the outside world.
///
/// Uses enum dispatch rather than trait objects for zero-cost dispatch on
/// the per-rollup publish path.
pub enum Publisher {
    /// Push serialized messages onto a channel the transport drains.
    Channel(ChannelPublisher),
    /// No transport attached; log each rollup instead.
    Log(LogPublisher),
}

impl Publisher {
    /// Returns the publisher name for logging.
    pub fn name(&self) -> &str {
        match self {
            Self::Channel(_) => "channel",
            Self::Log(_) => "log",
        }
    }

    /// Publish one rollup. Failures are logged, never propagated; losing a
    /// publish does not lose the stored rollup.
    pub fn publish(&self, rollup: &MinuteRollup) {
        match self {
            Self::Channel(p) => p.publish(rollup),
            Self::Log(p) => p.publish(rollup),
        }
    }
}

/// Publishes serialized rollups onto an unbounded outbound channel.
pub struct ChannelPublisher {
    topic: Arc<str>,
    tx: mpsc::UnboundedSender<OutboundMessage>,
}

impl ChannelPublisher {
    pub fn new(topic: &str, tx: mpsc::UnboundedSender<OutboundMessage>) -> Self {
        Self {
            topic: Arc::from(topic),
            tx,
        }
    }

    fn publish(&self, rollup: &MinuteRollup) {
        let Some(message) = RollupMessage::from_rollup(rollup) else {
            warn!(tag_id = rollup.tag_id, timestamp = rollup.timestamp,
                "rollup timestamp out of range, not publishing");
            return;
        };

        let payload = match serde_json::to_string(&message) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(tag_id = rollup.tag_id, error = %e, "rollup serialization failed");
                return;
            }
        };

        if self
            .tx
            .send(OutboundMessage {
                topic: Arc::clone(&self.topic),
                payload,
            })
            .is_err()
        {
            warn!(tag_id = rollup.tag_id, "outbound channel closed, dropping rollup message");
        }
    }
}

/// Logs rollups at info level; stands in when no transport is wired up.
#[derive(Default)]
pub struct LogPublisher;

impl LogPublisher {
    fn publish(&self, rollup: &MinuteRollup) {
        info!(
            tag_id = rollup.tag_id,
            min = rollup.min,
            max = rollup.max,
            avg = rollup.avg,
            count = rollup.count,
            minute_start = rollup.timestamp,
            "rollup",
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rollup() -> MinuteRollup {
        MinuteRollup {
            tag_id: 7,
            min: 1.0,
            max: 3.0,
            avg: 2.0,
            count: 3,
            // 2024-05-01T10:00:00Z
            timestamp: 1_714_557_600,
        }
    }

    #[test]
    fn test_rollup_message_json_shape() {
        let message = RollupMessage::from_rollup(&rollup()).expect("message");
        let json = serde_json::to_value(&message).expect("serialize");

        assert_eq!(json["tag_id"], 7);
        assert_eq!(json["min"], 1.0);
        assert_eq!(json["max"], 3.0);
        assert_eq!(json["avg"], 2.0);
        assert_eq!(json["count"], 3);
        assert_eq!(json["timestamp"], "2024-05-01T10:00:00Z");
    }

    #[test]
    fn test_channel_publisher_sends_topic_and_payload() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let publisher = Publisher::Channel(ChannelPublisher::new("aggregates", tx));

        publisher.publish(&rollup());

        let message = rx.try_recv().expect("message");
        assert_eq!(&*message.topic, "aggregates");
        let json: serde_json::Value = serde_json::from_str(&message.payload).expect("payload");
        assert_eq!(json["tag_id"], 7);
        assert_eq!(json["count"], 3);
    }

    #[test]
    fn test_channel_publisher_survives_closed_channel() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let publisher = Publisher::Channel(ChannelPublisher::new("aggregates", tx));

        // Must not panic or error.
        publisher.publish(&rollup());
    }

    #[test]
    fn test_publisher_names() {
        let (tx, _rx) = mpsc::unbounded_channel();
        assert_eq!(
            Publisher::Channel(ChannelPublisher::new("t", tx)).name(),
            "channel"
        );
        assert_eq!(Publisher::Log(LogPublisher).name(), "log");
    }
}
