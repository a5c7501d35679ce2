use crate::error::RuntimeError;
use std::time::Duration;

/// Pub/Sub accepts at most 1000 messages per publish request
pub const MAX_PUBLISH_BATCH_SIZE: usize = 1000;

/// How long fetched credentials are reused before asking Secrets Manager again
pub const DEFAULT_CREDENTIALS_CACHE_TTL: Duration = Duration::from_secs(15 * 60);

/// Google Cloud project that owns the topic
pub const TARGET_PROJECT_ID: &str = "TARGET_PROJECT_ID";
/// Pub/Sub topic the log entries are published to
pub const TARGET_TOPIC_ID: &str = "TARGET_TOPIC_ID";
/// Secrets Manager id of the service account credentials
pub const CREDENTIALS_SECRET_ID: &str = "CREDENTIALS_SECRET_ID";
/// Messages per publish batch, optional
pub const PUBLISH_BATCH_SIZE: &str = "PUBLISH_BATCH_SIZE";
/// Seconds the credentials are cached, optional
pub const CREDENTIALS_CACHE_TTL_SECONDS: &str = "CREDENTIALS_CACHE_TTL_SECONDS";
/// Bridge function invoked by the replayer
pub const TARGET_BRIDGE_FUNCTION_NAME: &str = "TARGET_BRIDGE_FUNCTION_NAME";

/// Settings read by the bridge function on every invocation
#[derive(Clone, Debug, PartialEq)]
pub struct BridgeConfig {
    /// Google Cloud project that owns the topic
    pub project_id: String,
    /// Target Pub/Sub topic
    pub topic_id: String,
    /// Secrets Manager id holding the service account
    pub secret_id: String,
    /// Messages per publish call, always in `1..=1000`
    pub batch_size: usize,
}

impl BridgeConfig {
    /// Read the bridge settings from the process environment.
    pub fn from_env() -> Result<BridgeConfig, RuntimeError> {
        BridgeConfig::from_lookup(env_lookup)
    }

    /// Read the bridge settings with a custom variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<BridgeConfig, RuntimeError>
    where
        F: Fn(&str) -> Option<String>,
    {
        Ok(BridgeConfig {
            project_id: required(&lookup, TARGET_PROJECT_ID)?,
            topic_id: required(&lookup, TARGET_TOPIC_ID)?,
            secret_id: required(&lookup, CREDENTIALS_SECRET_ID)?,
            batch_size: resolve_batch_size(lookup(PUBLISH_BATCH_SIZE).as_deref()),
        })
    }
}

/// Settings read by the replay function on every invocation
#[derive(Clone, Debug, PartialEq)]
pub struct ReplayConfig {
    /// Name or ARN of the bridge function
    pub function_name: String,
}

impl ReplayConfig {
    /// Read the replay settings from the process environment.
    pub fn from_env() -> Result<ReplayConfig, RuntimeError> {
        ReplayConfig::from_lookup(env_lookup)
    }

    /// Read the replay settings with a custom variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<ReplayConfig, RuntimeError>
    where
        F: Fn(&str) -> Option<String>,
    {
        Ok(ReplayConfig {
            function_name: required(&lookup, TARGET_BRIDGE_FUNCTION_NAME)?,
        })
    }
}

/// Parse the configured batch size.
/// Anything that is not a number in `1..=1000` falls back to the maximum.
pub fn resolve_batch_size(raw: Option<&str>) -> usize {
    match raw.map(str::trim).and_then(|s| s.parse::<usize>().ok()) {
        Some(size) if (1..=MAX_PUBLISH_BATCH_SIZE).contains(&size) => size,
        _ => MAX_PUBLISH_BATCH_SIZE,
    }
}

/// Parse the credentials cache TTL in seconds.
/// `0` disables expiration, invalid values fall back to the default.
pub fn resolve_credentials_ttl(raw: Option<&str>) -> Option<Duration> {
    match raw.map(str::trim).and_then(|s| s.parse::<u64>().ok()) {
        Some(0) => None,
        Some(secs) => Some(Duration::from_secs(secs)),
        None => Some(DEFAULT_CREDENTIALS_CACHE_TTL),
    }
}

/// Credentials cache TTL from the process environment.
pub fn credentials_ttl_from_env() -> Option<Duration> {
    resolve_credentials_ttl(env_lookup(CREDENTIALS_CACHE_TTL_SECONDS).as_deref())
}

fn env_lookup(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

fn required<F>(lookup: &F, name: &str) -> Result<String, RuntimeError>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(name)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .ok_or_else(|| RuntimeError::MissingConfig(name.into()))
}
