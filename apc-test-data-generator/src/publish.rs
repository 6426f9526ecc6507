use std::time::Instant;

use tracing::{debug, info};

use crate::error::Fault;
use crate::fixture;
use crate::message::generate_messages;
use crate::metrics;
use crate::resources::Producer;

/// Send the whole fixture through `producer`, one acknowledged message at a time,
/// then flush. Returns the number of messages sent.
pub async fn publish_fixture(producer: &dyn Producer) -> Result<usize, Fault> {
    debug!(
        net_by_class = ?fixture::net_passengers_by_class(&fixture::generate()),
        "fixture passenger totals"
    );

    let messages = generate_messages()?;
    let count = messages.len();

    for message in messages {
        let stop_sequence = message.stop_sequence;
        let start = Instant::now();
        producer.send(message).await?;
        metrics::emit_message_sent(start.elapsed());
        debug!(stop_sequence, "message delivered");
    }

    producer.flush().await?;
    info!(count, "all test messages sent and flushed");
    Ok(count)
}
