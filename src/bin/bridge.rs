use cloudwatch_pubsub_bridge::{
    config,
    handle_logs,
    pubsub::{GooglePubSubConnector, PublisherCache},
    secrets::{CredentialCache, SecretsManagerStore},
    BridgeConfig, LogsEvent,
};
use lambda_runtime::{run, service_fn, Error, LambdaEvent};

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        // disabling time is handy because CloudWatch will add the ingestion time.
        .without_time()
        .init();

    // Get AWS Configuration
    let sdk_config = aws_config::load_from_env().await;
    let secrets = SecretsManagerStore::new(&sdk_config);

    let credentials = CredentialCache::new(secrets, config::credentials_ttl_from_env());
    let publishers = PublisherCache::new(credentials, GooglePubSubConnector);
    let publishers = &publishers;

    run(service_fn(move |event: LambdaEvent<LogsEvent>| async move {
        let bridge_config = BridgeConfig::from_env()?;
        handle_logs(publishers, &bridge_config, event).await
    }))
    .await
}
