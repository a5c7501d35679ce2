use thiserror::Error as ThisError;

/// Boxed error used to carry failures from the Pub/Sub client libraries.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Different errors that the application can raise
#[derive(Debug, ThisError)]
pub enum RuntimeError {
    /// Error returned when a required environment variable is missing or blank
    #[error("missing required environment variable: {0}")]
    MissingConfig(String),
    /// Error returned when the CloudWatch Logs payload cannot be decoded
    #[error("failed to decode cloudwatch logs payload")]
    Decode(#[from] DecodeError),
    /// Error returned when an outbound message cannot be marshaled
    #[error("failed to marshal message payload")]
    Serialization(#[source] serde_json::Error),
    /// Error returned by the Secrets Manager API
    #[error("unexpected secrets manager error")]
    SecretsManager(#[from] aws_sdk_secretsmanager::Error),
    /// Error returned when the secret exists but carries no payload
    #[error("secret {0} has no SecretString or SecretBinary payload")]
    EmptySecret(String),
    /// Error returned when the secret is not a usable service account document
    #[error("invalid service account credentials: {0}")]
    CredentialParse(String),
    /// Error returned when the Pub/Sub client or publisher cannot be created
    #[error("failed to create pubsub client")]
    ClientInit(#[source] BoxError),
    /// Error returned when a message in a batch is not acknowledged
    #[error("failed to publish message batch")]
    Publish(#[source] BoxError),
    /// Error returned when a dead-letter record does not carry the original payload
    #[error("invalid async destination message: {0}")]
    PayloadExtraction(String),
    /// Error returned by the Lambda API
    #[error("failed to invoke bridge lambda")]
    Invoke(#[from] aws_sdk_lambda::Error),
    /// Error returned when the Lambda API answers with a non-success status
    #[error("invoke bridge lambda unexpected status code: {0}")]
    InvokeStatus(i32),
    /// Error returned when the AWS configuration cannot be used to build a client
    #[error("invalid aws configuration: {0}")]
    AwsConfig(String),
}

/// Reasons why the `awslogs.data` field could not be turned into log data
#[derive(Debug, ThisError)]
pub enum DecodeError {
    /// The event did not include any data
    #[error("event missing awslogs.data")]
    MissingData,
    /// The data is not valid base64
    #[error("invalid base64 in awslogs.data")]
    Base64(#[from] base64::DecodeError),
    /// The decoded bytes are not a valid gzip stream
    #[error("invalid gzip payload")]
    Gzip(#[from] std::io::Error),
    /// The decompressed payload is not a CloudWatch Logs document
    #[error("invalid cloudwatch logs payload")]
    Json(#[from] serde_json::Error),
}
