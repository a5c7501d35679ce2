use cloudwatch_pubsub_bridge::{
    replay::{LambdaInvokerFactory, Replayer, SqsEvent},
    ReplayConfig,
};
use lambda_runtime::{run, service_fn, Error, LambdaEvent};

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        // disabling time is handy because CloudWatch will add the ingestion time.
        .without_time()
        .init();

    let replayer = Replayer::new(LambdaInvokerFactory);
    let replayer = &replayer;

    run(service_fn(move |event: LambdaEvent<SqsEvent>| async move {
        let replay_config = ReplayConfig::from_env()?;
        replayer.handle_records(&replay_config, event.payload).await
    }))
    .await
}
