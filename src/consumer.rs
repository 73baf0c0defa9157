//! Stream consumer: at-least-once delivery into the index (spec §4.D, §6).

use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use redis::aio::ConnectionManager;
use redis::streams::{StreamReadOptions, StreamReadReply};
use redis::{AsyncCommands, RedisError};
use thiserror::Error;
use tokio::sync::watch;

use crate::event::ReadCursorEvent;
use crate::service::IndexService;

pub const STREAM_NAME: &str = "read_cursor_events";
pub const CONSUMER_GROUP: &str = "read-index-service";
const CONSUMER_NAME: &str = "consumer-1";
const BATCH_SIZE: usize = 100;
const BLOCK_MILLIS: usize = 5_000;
const BACKOFF: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum ConsumerError {
    #[error("redis error: {0}")]
    Redis(#[from] RedisError),
}

/// Reads `read_cursor_events` under consumer group `read-index-service`,
/// decodes each message's `data` field, and applies it to an
/// [`IndexService`], acknowledging by message id on success.
pub struct StreamConsumer {
    manager: ConnectionManager,
    service: Arc<IndexService>,
}

impl StreamConsumer {
    pub async fn connect(redis_url: &str, service: Arc<IndexService>) -> Result<Self, ConsumerError> {
        let client = redis::Client::open(redis_url)?;
        let manager = client.get_tokio_connection_manager().await?;
        Ok(Self { manager, service })
    }

    /// Declare the consumer group (idempotent — a pre-existing group is
    /// accepted) then loop reading batches until `cancel` reports `true`.
    pub async fn run(mut self, mut cancel: watch::Receiver<bool>) -> Result<(), ConsumerError> {
        self.declare_group().await?;
        info!(
            "stream consumer started: stream={STREAM_NAME} group={CONSUMER_GROUP} batch={BATCH_SIZE}"
        );

        loop {
            if *cancel.borrow() {
                info!("stream consumer stopping");
                return Ok(());
            }

            match self.consume_batch().await {
                Ok(processed) => {
                    if processed == 0 {
                        debug!("no new messages");
                    }
                }
                Err(err) => {
                    warn!("transient stream read error, backing off 1s: {err}");
                    tokio::time::sleep(BACKOFF).await;
                }
            }
        }
    }

    async fn declare_group(&mut self) -> Result<(), ConsumerError> {
        let result: Result<(), RedisError> = self
            .manager
            .xgroup_create_mkstream(STREAM_NAME, CONSUMER_GROUP, "0")
            .await;
        match result {
            Ok(()) => Ok(()),
            Err(err) if err.to_string().contains("BUSYGROUP") => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    async fn consume_batch(&mut self) -> Result<usize, ConsumerError> {
        let options = StreamReadOptions::default()
            .group(CONSUMER_GROUP, CONSUMER_NAME)
            .count(BATCH_SIZE)
            .block(BLOCK_MILLIS);

        let reply: StreamReadReply = self
            .manager
            .xread_options(&[STREAM_NAME], &[">"], &options)
            .await?;

        let mut processed = 0;
        for stream_key in reply.keys {
            for stream_id in stream_key.ids {
                self.process_message(&stream_id.id, &stream_id.map).await;
                processed += 1;
            }
        }
        Ok(processed)
    }

    /// Decode failures are acknowledged and discarded (a poison pill would
    /// otherwise loop forever); handler failures withhold the ack so the
    /// stream's pending-entries list redelivers the message. See
    /// DESIGN.md / SPEC_FULL.md §4.D for why this differs from the
    /// reference consumer, which withheld the ack on both.
    async fn process_message(
        &mut self,
        message_id: &str,
        fields: &std::collections::HashMap<String, redis::Value>,
    ) {
        let event = match Self::decode_event(fields) {
            Ok(event) => event,
            Err(err) => {
                warn!("discarding unparseable message {message_id}: {err}");
                self.ack(message_id).await;
                return;
            }
        };

        self.service.handle_event(&event);
        debug!(
            "processed event: channel={} user={} seq={}",
            event.channel_id, event.user_id, event.new_last_seq
        );
        self.ack(message_id).await;
    }

    fn decode_event(
        fields: &std::collections::HashMap<String, redis::Value>,
    ) -> Result<ReadCursorEvent, anyhow::Error> {
        let raw = fields
            .get("data")
            .ok_or_else(|| anyhow::anyhow!("message missing `data` field"))?;
        let data: String = redis::from_redis_value(raw)?;
        let event: ReadCursorEvent = serde_json::from_str(&data)?;
        Ok(event)
    }

    async fn ack(&mut self, message_id: &str) {
        let result: Result<i64, RedisError> = self
            .manager
            .xack(STREAM_NAME, CONSUMER_GROUP, &[message_id])
            .await;
        if let Err(err) = result {
            error!("failed to ack message {message_id}: {err}");
        }
    }
}
