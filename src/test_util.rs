use aws_sdk_secretsmanager::Credentials;
use aws_types::{region::Region, SdkConfig};
use flate2::{write::GzEncoder, Compression};
use std::io::Write;

/// Configuration for mocking AWS SDK clients
pub async fn get_mock_config() -> SdkConfig {
    aws_config::from_env()
        .region(Region::new("us-west-1"))
        .credentials_provider(Credentials::new(
            "accesskey",
            "privatekey",
            None,
            None,
            "dummy",
        ))
        .load()
        .await
}

/// Base request builder for the AWS SDK calls
pub fn get_request_builder(service: &str) -> http::request::Builder {
    http::Request::builder().uri(format!("https://{service}.us-west-1.amazonaws.com/"))
}

/// Encode a CloudWatch Logs document the way the subscription filter delivers it
pub fn encode_awslogs(payload: &serde_json::Value) -> String {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(payload.to_string().as_bytes())
        .expect("failed to gzip payload");
    base64::encode(encoder.finish().expect("failed to finish gzip stream"))
}
