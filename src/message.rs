use crate::{error::RuntimeError, event::LogData};
use serde::Serialize;
use std::collections::HashMap;

/// `OutboundMessage` is a single log entry ready to be published to Pub/Sub
#[derive(Clone, Debug, Default, PartialEq)]
pub struct OutboundMessage {
    /// JSON body
    pub data: Vec<u8>,
    /// Routing attributes: owner, log group and log stream
    pub attributes: HashMap<String, String>,
}

/// Body of every published message
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct MessageBody<'a> {
    owner: &'a str,
    log_group: &'a str,
    log_stream: &'a str,
    subscription_filters: &'a [String],
    id: &'a str,
    timestamp: i64,
    message: &'a str,
}

/// Turn every log entry into its own message.
/// Control messages don't carry any log data, so they produce nothing.
pub fn build_outbound_messages(data: &LogData) -> Result<Vec<OutboundMessage>, RuntimeError> {
    if data.is_control_message() {
        return Ok(Vec::new());
    }

    data.log_events
        .iter()
        .map(|entry| -> Result<OutboundMessage, RuntimeError> {
            let body = MessageBody {
                owner: &data.owner,
                log_group: &data.log_group,
                log_stream: &data.log_stream,
                subscription_filters: &data.subscription_filters,
                id: &entry.id,
                timestamp: entry.timestamp,
                message: &entry.message,
            };

            let data_bytes = serde_json::to_vec(&body).map_err(RuntimeError::Serialization)?;

            Ok(OutboundMessage {
                data: data_bytes,
                attributes: routing_attributes(data),
            })
        })
        .collect()
}

fn routing_attributes(data: &LogData) -> HashMap<String, String> {
    HashMap::from([
        ("owner".to_string(), data.owner.clone()),
        ("log_group".to_string(), data.log_group.clone()),
        ("log_stream".to_string(), data.log_stream.clone()),
    ])
}
