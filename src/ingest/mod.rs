use std::sync::Arc;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::store::tags::TagRegistry;
use crate::store::Store;

/// One telemetry sample as delivered by the transport.
#[derive(Debug, Clone, Deserialize)]
pub struct Sample {
    pub tag: String,
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

/// Parse an ISO-8601 timestamp, with or without a UTC offset.
///
/// Producers commonly serialize local datetimes with no offset; those are
/// interpreted as UTC.
fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;

    match DateTime::parse_from_rfc3339(&raw) {
        Ok(dt) => Ok(dt.with_timezone(&Utc)),
        Err(_) => raw
            .parse::<NaiveDateTime>()
            .map(|naive| naive.and_utc())
            .map_err(serde::de::Error::custom),
    }
}

/// Decode a raw transport payload into a sample.
pub fn decode_sample(payload: &[u8]) -> Result<Sample, serde_json::Error> {
    serde_json::from_slice(payload)
}

/// Consume raw payloads from the transport channel and persist them.
///
/// Runs until cancelled or the channel closes. A bad payload or a store
/// failure drops that one sample; the loop never stops for it.
pub async fn run(
    store: Store,
    registry: Arc<TagRegistry>,
    mut rx: mpsc::Receiver<Vec<u8>>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("ingest loop cancelled");
                return;
            }
            payload = rx.recv() => {
                match payload {
                    Some(payload) => handle_payload(&store, &registry, &payload),
                    None => {
                        debug!("ingest channel closed");
                        return;
                    }
                }
            }
        }
    }
}

fn handle_payload(store: &Store, registry: &TagRegistry, payload: &[u8]) {
    let sample = match decode_sample(payload) {
        Ok(sample) => sample,
        Err(e) => {
            warn!(error = %e, "dropping malformed sample payload");
            return;
        }
    };

    let tag_id = match registry.resolve_or_create(store, &sample.tag) {
        Ok(id) => id,
        Err(e) => {
            warn!(tag = %sample.tag, error = %e, "tag resolution failed, dropping sample");
            return;
        }
    };

    if let Err(e) = store.append_measurement(tag_id, sample.value, sample.timestamp.timestamp()) {
        warn!(tag = %sample.tag, error = %e, "failed to persist sample");
    }
}
