use crate::error::DecodeError;
use serde::Deserialize;
use std::io::Read;

/// Message type CloudWatch uses for subscription health checks
pub const CONTROL_MESSAGE: &str = "CONTROL_MESSAGE";

/// `LogsEvent` represents the raw event sent by CloudWatch
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct LogsEvent {
    /// The `awslogs` envelope
    #[serde(rename = "awslogs", default)]
    pub aws_logs: AwsLogs,
}

/// `AwsLogs` holds the gzipped and base64 encoded CloudWatch logs document
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct AwsLogs {
    /// Base64 encoded, gzip compressed `LogData` document
    #[serde(default)]
    pub data: String,
}

/// `LogData` represents the logs group event information
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct LogData {
    /// AWS account that owns the log group
    pub owner: String,
    /// Source log group name
    pub log_group: String,
    /// Source log stream name
    pub log_stream: String,
    /// Subscription filters that matched the events
    pub subscription_filters: Vec<String>,
    /// `DATA_MESSAGE` or `CONTROL_MESSAGE`
    pub message_type: String,
    /// Log entries in the order CloudWatch sent them
    pub log_events: Vec<LogEntry>,
}

/// `LogEntry` represents a log entry from cloudwatch logs
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct LogEntry {
    /// Event id assigned by CloudWatch
    pub id: String,
    /// Milliseconds since the epoch
    pub timestamp: i64,
    /// Raw log line
    pub message: String,
}

impl LogsEvent {
    /// Unwrap the base64 and gzip layers and parse the log data.
    pub fn decode(&self) -> Result<LogData, DecodeError> {
        let data = self.aws_logs.data.trim();
        if data.is_empty() {
            return Err(DecodeError::MissingData);
        }

        let compressed = base64::decode(data)?;

        let mut decoded = Vec::new();
        flate2::read::GzDecoder::new(&compressed[..]).read_to_end(&mut decoded)?;

        Ok(serde_json::from_slice(&decoded)?)
    }
}

impl LogData {
    /// Control messages only check that the subscription is reachable
    pub fn is_control_message(&self) -> bool {
        self.message_type == CONTROL_MESSAGE
    }
}
