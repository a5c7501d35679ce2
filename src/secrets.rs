use crate::error::RuntimeError;
use async_trait::async_trait;
use aws_sdk_secretsmanager::{Client, Error};
use serde::Deserialize;
use serde_json::Value;
use std::{
    sync::{Mutex, PoisonError},
    time::{Duration, Instant},
};

/// Source of secret values
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Fetch the text payload of a secret
    async fn fetch_secret(&self, secret_id: &str) -> Result<String, RuntimeError>;
}

/// Secrets Manager client implementation.
pub struct SecretsManagerStore {
    inner: Client,
}

impl SecretsManagerStore {
    /// Initialize the Secrets Manager store.
    #[tracing::instrument(skip(config))]
    pub fn new(config: &aws_types::SdkConfig) -> SecretsManagerStore {
        tracing::info!("Initializing Secrets Manager client");
        SecretsManagerStore {
            inner: Client::new(config),
        }
    }
}

#[async_trait]
impl SecretStore for SecretsManagerStore {
    /// Fetch the secret, preferring the string payload over the binary one.
    #[tracing::instrument(skip(self))]
    async fn fetch_secret(&self, secret_id: &str) -> Result<String, RuntimeError> {
        let res = self
            .inner
            .get_secret_value()
            .secret_id(secret_id)
            .send()
            .await
            .map_err(Error::from)?;

        if let Some(text) = res.secret_string() {
            return Ok(text.to_string());
        }

        match res.secret_binary() {
            Some(blob) if !blob.as_ref().is_empty() => {
                Ok(String::from_utf8_lossy(blob.as_ref()).into_owned())
            }
            _ => Err(RuntimeError::EmptySecret(secret_id.into())),
        }
    }
}

#[derive(Deserialize)]
struct ServiceAccountCredentials {
    #[serde(default)]
    client_email: String,
    #[serde(default)]
    private_key: String,
}

/// Extract the service account document from a secret.
///
/// The secret is either the document itself or a wrapper object whose
/// `service_account_json` field holds the document, as a string or inline.
pub fn parse_service_account_secret(secret: &str) -> Result<Vec<u8>, RuntimeError> {
    let mut document = secret.as_bytes().to_vec();

    if let Ok(Value::Object(mut wrapper)) = serde_json::from_str::<Value>(secret) {
        match wrapper.remove("service_account_json") {
            Some(Value::String(nested)) => document = nested.into_bytes(),
            Some(Value::Null) | None => {}
            Some(nested) => {
                document = serde_json::to_vec(&nested)
                    .map_err(|e| RuntimeError::CredentialParse(e.to_string()))?;
            }
        }
    }

    let credentials: ServiceAccountCredentials = serde_json::from_slice(&document)
        .map_err(|e| RuntimeError::CredentialParse(format!("parse service account json: {e}")))?;

    if credentials.client_email.trim().is_empty() || credentials.private_key.trim().is_empty() {
        return Err(RuntimeError::CredentialParse(
            "service account json must include client_email and private_key".into(),
        ));
    }

    Ok(document)
}

struct CachedCredentials {
    secret_id: String,
    document: Vec<u8>,
    fetched_at: Instant,
}

/// Keeps the last service account document fetched from the secret store.
pub struct CredentialCache<S> {
    store: S,
    ttl: Option<Duration>,
    cached: Mutex<Option<CachedCredentials>>,
}

impl<S: SecretStore> CredentialCache<S> {
    /// Create an empty cache. A `ttl` of `None` keeps credentials until the secret id changes.
    pub fn new(store: S, ttl: Option<Duration>) -> CredentialCache<S> {
        CredentialCache {
            store,
            ttl,
            cached: Mutex::new(None),
        }
    }

    /// Return the service account document stored in `secret_id`.
    #[tracing::instrument(skip(self))]
    pub async fn resolve(&self, secret_id: &str) -> Result<Vec<u8>, RuntimeError> {
        if let Some(document) = self.cached_document(secret_id) {
            return Ok(document);
        }

        tracing::info!("fetching service account credentials");
        let secret = self.store.fetch_secret(secret_id).await?;
        let document = parse_service_account_secret(&secret)?;

        let mut cached = self.cached.lock().unwrap_or_else(PoisonError::into_inner);
        *cached = Some(CachedCredentials {
            secret_id: secret_id.into(),
            document: document.clone(),
            fetched_at: Instant::now(),
        });

        Ok(document)
    }

    fn cached_document(&self, secret_id: &str) -> Option<Vec<u8>> {
        let cached = self.cached.lock().unwrap_or_else(PoisonError::into_inner);
        cached
            .as_ref()
            .filter(|c| c.secret_id == secret_id && !c.document.is_empty())
            .filter(|c| match self.ttl {
                Some(ttl) => c.fetched_at.elapsed() < ttl,
                None => true,
            })
            .map(|c| c.document.clone())
    }
}
