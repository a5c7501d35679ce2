use crate::{
    error::RuntimeError,
    message::OutboundMessage,
    secrets::{CredentialCache, SecretStore},
};
use async_trait::async_trait;
use google_cloud_auth::credentials::CredentialsFile;
use google_cloud_googleapis::pubsub::v1::PubsubMessage;
use google_cloud_pubsub::{
    client::{Client, ClientConfig},
    publisher::Publisher,
};
use std::sync::{Arc, Mutex, PoisonError};

/// Publishing handle bound to a single topic
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TopicPublisher: Send + Sync {
    /// Send every message of the batch and wait until all of them are acknowledged
    async fn publish_batch(&self, messages: &[OutboundMessage]) -> Result<(), RuntimeError>;

    /// Flush pending messages and release the connection
    async fn shutdown(&self);
}

/// Opens publishing handles for a topic
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TopicConnector: Send + Sync {
    /// Create a publisher for `topic_id` in `project_id` using a service account document
    async fn connect(
        &self,
        project_id: &str,
        topic_id: &str,
        credentials: &[u8],
    ) -> Result<Arc<dyn TopicPublisher>, RuntimeError>;
}

/// Finds the publisher the bridge should send messages to
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PublisherResolver: Send + Sync {
    /// Return a publisher for `topic_id` in `project_id`, authenticated with the secret `secret_id`
    async fn resolve(
        &self,
        project_id: &str,
        topic_id: &str,
        secret_id: &str,
    ) -> Result<Arc<dyn TopicPublisher>, RuntimeError>;
}

/// Google Cloud Pub/Sub connector.
pub struct GooglePubSubConnector;

#[async_trait]
impl TopicConnector for GooglePubSubConnector {
    #[tracing::instrument(skip(self, credentials))]
    async fn connect(
        &self,
        project_id: &str,
        topic_id: &str,
        credentials: &[u8],
    ) -> Result<Arc<dyn TopicPublisher>, RuntimeError> {
        tracing::info!("creating pubsub client");

        let document = std::str::from_utf8(credentials)
            .map_err(|e| RuntimeError::ClientInit(Box::new(e)))?;
        let credentials = CredentialsFile::new_from_str(document)
            .await
            .map_err(|e| RuntimeError::ClientInit(Box::new(e)))?;

        let mut config = ClientConfig::default()
            .with_credentials(credentials)
            .await
            .map_err(|e| RuntimeError::ClientInit(Box::new(e)))?;
        // the credentials carry their own project, the target topic may live elsewhere
        config.project_id = Some(project_id.to_string());

        let client = Client::new(config)
            .await
            .map_err(|e| RuntimeError::ClientInit(Box::new(e)))?;
        let publisher = client.topic(topic_id).new_publisher(None);

        Ok(Arc::new(PubSubPublisher {
            _client: client,
            publisher,
        }))
    }
}

/// Publisher backed by a Google Cloud Pub/Sub client.
pub struct PubSubPublisher {
    // keeps the connection alive for as long as the publisher is cached
    _client: Client,
    publisher: Publisher,
}

#[async_trait]
impl TopicPublisher for PubSubPublisher {
    #[tracing::instrument(skip(self, messages), fields(batch_size = messages.len()))]
    async fn publish_batch(&self, messages: &[OutboundMessage]) -> Result<(), RuntimeError> {
        let mut awaiters = Vec::with_capacity(messages.len());
        for message in messages {
            let awaiter = self.publisher.publish(to_pubsub_message(message)).await;
            awaiters.push(awaiter);
        }

        for awaiter in awaiters {
            awaiter
                .get()
                .await
                .map_err(|status| RuntimeError::Publish(Box::new(status)))?;
        }

        Ok(())
    }

    async fn shutdown(&self) {
        let mut publisher = self.publisher.clone();
        publisher.shutdown().await;
    }
}

fn to_pubsub_message(message: &OutboundMessage) -> PubsubMessage {
    PubsubMessage {
        data: message.data.clone(),
        attributes: message.attributes.clone(),
        ..Default::default()
    }
}

struct CachedPublisher {
    project_id: String,
    topic_id: String,
    credentials: Vec<u8>,
    publisher: Arc<dyn TopicPublisher>,
}

/// Keeps the publisher for the last requested topic so warm invocations reuse the connection.
///
/// Credentials are resolved on every call. Once the credential cache expires and
/// the secret holds a different document, the publisher is reconnected.
pub struct PublisherCache<S, C> {
    credentials: CredentialCache<S>,
    connector: C,
    cached: Mutex<Option<CachedPublisher>>,
}

impl<S: SecretStore, C: TopicConnector> PublisherCache<S, C> {
    /// Create an empty cache.
    pub fn new(credentials: CredentialCache<S>, connector: C) -> PublisherCache<S, C> {
        PublisherCache {
            credentials,
            connector,
            cached: Mutex::new(None),
        }
    }

    // `None` credentials match any cached document
    fn cached_publisher(
        &self,
        project_id: &str,
        topic_id: &str,
        credentials: Option<&[u8]>,
    ) -> Option<Arc<dyn TopicPublisher>> {
        let cached = self.cached.lock().unwrap_or_else(PoisonError::into_inner);
        cached
            .as_ref()
            .filter(|c| c.project_id == project_id && c.topic_id == topic_id)
            .filter(|c| credentials.map_or(true, |document| c.credentials == document))
            .map(|c| c.publisher.clone())
    }
}

#[async_trait]
impl<S: SecretStore, C: TopicConnector> PublisherResolver for PublisherCache<S, C> {
    #[tracing::instrument(skip(self))]
    async fn resolve(
        &self,
        project_id: &str,
        topic_id: &str,
        secret_id: &str,
    ) -> Result<Arc<dyn TopicPublisher>, RuntimeError> {
        let credentials = match self.credentials.resolve(secret_id).await {
            Ok(credentials) => credentials,
            Err(err) => match self.cached_publisher(project_id, topic_id, None) {
                Some(publisher) => {
                    tracing::warn!(
                        error = %err,
                        "credentials refresh failed, keeping cached publisher"
                    );
                    return Ok(publisher);
                }
                None => return Err(err),
            },
        };

        let cached = self.cached_publisher(project_id, topic_id, Some(credentials.as_slice()));
        if let Some(publisher) = cached {
            return Ok(publisher);
        }

        let publisher = self
            .connector
            .connect(project_id, topic_id, &credentials)
            .await?;

        let previous = {
            let mut cached = self.cached.lock().unwrap_or_else(PoisonError::into_inner);
            cached.replace(CachedPublisher {
                project_id: project_id.into(),
                topic_id: topic_id.into(),
                credentials,
                publisher: publisher.clone(),
            })
        };

        if let Some(previous) = previous {
            tracing::info!(
                previous_project_id = %previous.project_id,
                previous_topic_id = %previous.topic_id,
                "shutting down previous publisher"
            );
            previous.publisher.shutdown().await;
        }

        Ok(publisher)
    }
}
