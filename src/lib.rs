#![deny(missing_docs)]
//! <fullname>CloudWatch logs to Pub/Sub bridge</fullname>
//!
//! Lambda functions that receive log events from
//! CloudWatch Logs subscriptions and republish every log entry
//! as an individual message to a Google Cloud Pub/Sub topic.
//! A companion function replays failed bridge invocations
//! from the dead-letter queue.
use lambda_runtime::LambdaEvent;
use serde::Serialize;

mod batch;
use batch::split_batches;

/// `config` reads the functions' settings from the environment
pub mod config;
pub use config::{BridgeConfig, ReplayConfig};

mod error;
pub use error::{DecodeError, RuntimeError};

mod event;
pub use event::{LogData, LogEntry, LogsEvent};

mod message;
pub use message::{build_outbound_messages, OutboundMessage};

/// `pubsub` includes helpers to publish messages to Google Cloud Pub/Sub
pub mod pubsub;
use pubsub::PublisherResolver;

/// `replay` re-invokes the bridge with payloads from failed invocations
pub mod replay;

/// `secrets` fetches and caches the service account credentials
pub mod secrets;

#[cfg(test)]
mod test_util;

/// Message type reported when the payload doesn't include one
pub const UNKNOWN_MESSAGE_TYPE: &str = "UNKNOWN";

/// `PublishSummary` is the response of the bridge function
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PublishSummary {
    /// Number of messages sent to the topic
    pub published_message_count: usize,
    /// Message type of the CloudWatch payload
    pub message_type: String,
}

/// `handle_logs` is the Lambda function entry point
/// that receives the events from CloudWatch Logs
#[tracing::instrument(skip(publishers, config, event), fields(request_id = %event.context.request_id))]
pub async fn handle_logs<P: PublisherResolver>(
    publishers: &P,
    config: &BridgeConfig,
    event: LambdaEvent<LogsEvent>,
) -> Result<PublishSummary, RuntimeError> {
    let data = event.payload.decode()?;
    let messages = build_outbound_messages(&data)?;

    let message_type = if data.message_type.trim().is_empty() {
        UNKNOWN_MESSAGE_TYPE.to_string()
    } else {
        data.message_type
    };

    if messages.is_empty() {
        tracing::info!(%message_type, "nothing to publish");
        return Ok(PublishSummary {
            published_message_count: 0,
            message_type,
        });
    }

    let publisher = publishers
        .resolve(&config.project_id, &config.topic_id, &config.secret_id)
        .await?;

    let mut published = 0;
    for batch in split_batches(&messages, config.batch_size) {
        if let Err(err) = publisher.publish_batch(batch).await {
            tracing::error!(
                published,
                total = messages.len(),
                "failed to publish message batch"
            );
            return Err(err);
        }
        published += batch.len();
    }

    tracing::info!(published, %message_type, "published log events");

    Ok(PublishSummary {
        published_message_count: published,
        message_type,
    })
}
