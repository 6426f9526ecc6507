use thiserror::Error;
use time::OffsetDateTime;

use crate::fixture::{self, TripRecord};

#[derive(Error, Debug)]
#[error("failed to serialize trip record for stop {stop_sequence}: {source}")]
pub struct MessageError {
    pub stop_sequence: u32,
    #[source]
    pub source: serde_json::Error,
}

/// A serialized trip record, ready to hand over to the producer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    /// Record key: the trip id, so every stop of a trip keeps its relative order.
    pub key: String,
    /// UTF-8 JSON of the trip record.
    pub payload: Vec<u8>,
    /// Capture time, milliseconds since the Unix epoch.
    pub event_timestamp_ms: i64,
    pub stop_sequence: u32,
}

pub fn to_outbound_message(record: &TripRecord) -> Result<OutboundMessage, MessageError> {
    let payload = serde_json::to_vec(record).map_err(|source| MessageError {
        stop_sequence: record.stop.stop_sequence,
        source,
    })?;

    Ok(OutboundMessage {
        key: record.trip.trip_id.clone(),
        payload,
        event_timestamp_ms: now_ms(),
        stop_sequence: record.stop.stop_sequence,
    })
}

/// Render the whole fixture, in stop order.
pub fn generate_messages() -> Result<Vec<OutboundMessage>, MessageError> {
    fixture::generate().iter().map(to_outbound_message).collect()
}

fn now_ms() -> i64 {
    let nanos = OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000;
    i64::try_from(nanos).unwrap_or(i64::MAX)
}
