use crate::{config::ReplayConfig, error::RuntimeError};
use async_trait::async_trait;
use aws_sdk_lambda::{model::InvocationType, types::Blob, Client, Error};
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use std::sync::Arc;
use tokio::sync::OnceCell;

/// `SqsEvent` is the batch of dead-letter records delivered by SQS
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct SqsEvent {
    /// Dead-letter records in this batch
    #[serde(rename = "Records", default)]
    pub records: Vec<SqsMessage>,
}

/// `SqsMessage` is a single dead-letter record
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct SqsMessage {
    /// SQS message id, reported back on failure
    pub message_id: String,
    /// Lambda async invocation record
    pub body: String,
}

/// `SqsBatchResponse` lists the records SQS must deliver again
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SqsBatchResponse {
    /// Records SQS should deliver again
    pub batch_item_failures: Vec<BatchItemFailure>,
}

/// `BatchItemFailure` identifies a record that could not be replayed
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchItemFailure {
    /// Message id of the failed record
    pub item_identifier: String,
}

/// Record written by Lambda to the on-failure destination of an async invocation
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AsyncDestinationMessage<'a> {
    #[serde(borrow, default)]
    request_payload: Option<&'a RawValue>,
    #[serde(default)]
    request_context: RequestContext,
}

#[derive(Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RequestContext {
    #[serde(default)]
    request_id: String,
}

/// Original payload and request id of a failed invocation
#[derive(Clone, Debug, PartialEq)]
pub struct FailedInvocation {
    /// Request id of the failed invocation, empty when missing
    pub request_id: String,
    /// Original `requestPayload` bytes
    pub payload: Vec<u8>,
}

/// Pull the original invocation payload out of a dead-letter record body.
/// The payload is returned byte for byte as Lambda recorded it.
pub fn extract_original_payload(body: &str) -> Result<FailedInvocation, RuntimeError> {
    let message: AsyncDestinationMessage = serde_json::from_str(body).map_err(|e| {
        RuntimeError::PayloadExtraction(format!("parse async destination message: {e}"))
    })?;

    let payload = message.request_payload.ok_or_else(|| {
        RuntimeError::PayloadExtraction(
            "async destination message does not include requestPayload".into(),
        )
    })?;

    Ok(FailedInvocation {
        request_id: message.request_context.request_id,
        payload: payload.get().as_bytes().to_vec(),
    })
}

/// Invokes Lambda functions
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FunctionInvoker: Send + Sync {
    /// Invoke `function_name` asynchronously and return the status code
    async fn invoke_async(&self, function_name: &str, payload: Vec<u8>) -> Result<i32, RuntimeError>;
}

/// Builds the invoker on first use
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait InvokerFactory: Send + Sync {
    /// Create a new invoker
    async fn create(&self) -> Result<Arc<dyn FunctionInvoker>, RuntimeError>;
}

/// Lambda client implementation.
pub struct LambdaInvoker {
    inner: Client,
}

impl LambdaInvoker {
    /// Initialize the Lambda client.
    pub fn new(config: &aws_types::SdkConfig) -> LambdaInvoker {
        LambdaInvoker {
            inner: Client::new(config),
        }
    }
}

#[async_trait]
impl FunctionInvoker for LambdaInvoker {
    #[tracing::instrument(skip(self, payload))]
    async fn invoke_async(&self, function_name: &str, payload: Vec<u8>) -> Result<i32, RuntimeError> {
        let res = self
            .inner
            .invoke()
            .function_name(function_name)
            .invocation_type(InvocationType::Event)
            .payload(Blob::new(payload))
            .send()
            .await
            .map_err(Error::from)?;

        Ok(res.status_code())
    }
}

/// Creates Lambda clients from the function's environment.
pub struct LambdaInvokerFactory;

#[async_trait]
impl InvokerFactory for LambdaInvokerFactory {
    #[tracing::instrument(skip(self))]
    async fn create(&self) -> Result<Arc<dyn FunctionInvoker>, RuntimeError> {
        tracing::info!("Initializing Lambda client");
        let config = aws_config::load_from_env().await;
        if config.region().is_none() {
            return Err(RuntimeError::AwsConfig("missing aws region".into()));
        }
        Ok(Arc::new(LambdaInvoker::new(&config)))
    }
}

/// `Replayer` sends dead-letter payloads back to the bridge function.
///
/// The invoker is created on the first invocation that needs it.
/// A failed creation is not remembered, the next invocation tries again.
pub struct Replayer<F> {
    factory: F,
    invoker: OnceCell<Arc<dyn FunctionInvoker>>,
}

impl<F: InvokerFactory> Replayer<F> {
    /// Create a replayer without an invoker.
    pub fn new(factory: F) -> Replayer<F> {
        Replayer {
            factory,
            invoker: OnceCell::new(),
        }
    }

    async fn invoker(&self) -> Result<&Arc<dyn FunctionInvoker>, RuntimeError> {
        self.invoker.get_or_try_init(|| self.factory.create()).await
    }

    /// `handle_records` is the Lambda function entry point
    /// that receives the dead-letter records from SQS
    #[tracing::instrument(skip(self, event), fields(records = event.records.len()))]
    pub async fn handle_records(
        &self,
        config: &ReplayConfig,
        event: SqsEvent,
    ) -> Result<SqsBatchResponse, RuntimeError> {
        let invoker = self.invoker().await?;

        let mut batch_item_failures = Vec::new();
        for record in event.records {
            if let Err(err) = replay_one(&**invoker, &config.function_name, &record).await {
                tracing::warn!(message_id = %record.message_id, error = %err, "failed to replay record");
                batch_item_failures.push(BatchItemFailure {
                    item_identifier: record.message_id,
                });
            }
        }

        Ok(SqsBatchResponse {
            batch_item_failures,
        })
    }
}

/// Replay a single dead-letter record.
#[tracing::instrument(skip(invoker, record), fields(message_id = %record.message_id, request_id = tracing::field::Empty))]
pub async fn replay_one(
    invoker: &dyn FunctionInvoker,
    function_name: &str,
    record: &SqsMessage,
) -> Result<(), RuntimeError> {
    let failed = extract_original_payload(&record.body)?;
    tracing::Span::current().record("request_id", &failed.request_id.as_str());

    let status = invoker.invoke_async(function_name, failed.payload).await?;
    if !(200..=299).contains(&status) {
        return Err(RuntimeError::InvokeStatus(status));
    }

    tracing::info!(status, "replayed failed invocation");
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::test_util::*;
    use aws_sdk_lambda::Config;
    use aws_smithy_client::{erase::DynConnector, test_connection::TestConnection};
    use aws_smithy_http::body::SdkBody;
    use mockall::predicate::eq;

    const BODY: &str = r#"{"requestPayload":{"awslogs":{"data":"abc"}},"requestContext":{"requestId":"r1"}}"#;

    fn config() -> ReplayConfig {
        ReplayConfig {
            function_name: "bridge".into(),
        }
    }

    fn record(message_id: &str, body: &str) -> SqsMessage {
        SqsMessage {
            message_id: message_id.into(),
            body: body.into(),
        }
    }

    fn factory_with(invoker: MockFunctionInvoker) -> MockInvokerFactory {
        let invoker: Arc<dyn FunctionInvoker> = Arc::new(invoker);
        let mut factory = MockInvokerFactory::new();
        factory
            .expect_create()
            .times(1)
            .returning(move || Ok(invoker.clone()));
        factory
    }

    #[test]
    fn test_extract_original_payload() {
        let failed = extract_original_payload(BODY).unwrap();
        assert_eq!("r1", failed.request_id);
        assert_eq!(br#"{"awslogs":{"data":"abc"}}"#.to_vec(), failed.payload);
    }

    #[test]
    fn test_extract_original_payload_preserves_bytes() {
        let body = r#"{"requestPayload": { "awslogs" : {"data": "abc"} }}"#;
        let failed = extract_original_payload(body).unwrap();
        assert_eq!(br#"{ "awslogs" : {"data": "abc"} }"#.to_vec(), failed.payload);
        assert_eq!("", failed.request_id);
    }

    #[test]
    fn test_extract_original_payload_errors() {
        for body in [
            r#"{"requestContext":{"requestId":"r1"}}"#,
            r#"{"requestPayload":null}"#,
            "not json",
        ] {
            let err = extract_original_payload(body).unwrap_err();
            assert!(matches!(err, RuntimeError::PayloadExtraction(_)), "{body}");
        }
    }

    #[test]
    fn test_deserialize_sqs_event() {
        let json = r#"{"Records": [{"messageId": "059f36b4-87a3-44ab-83d2-661975830a7d", "receiptHandle": "AQEBwJnKyrHigUMZj6rYigCgxlaS3SLy0a", "body": "{}", "eventSource": "aws:sqs"}]}"#;
        let event: SqsEvent = serde_json::from_str(json).expect("failed to deserialize");
        assert_eq!(
            vec![record("059f36b4-87a3-44ab-83d2-661975830a7d", "{}")],
            event.records
        );
    }

    #[test]
    fn test_serialize_batch_response() {
        let response = SqsBatchResponse {
            batch_item_failures: vec![BatchItemFailure {
                item_identifier: "bad".into(),
            }],
        };
        assert_eq!(
            r#"{"batchItemFailures":[{"itemIdentifier":"bad"}]}"#,
            serde_json::to_string(&response).unwrap()
        );
    }

    #[tokio::test]
    async fn test_replay_one() -> Result<(), RuntimeError> {
        let mut invoker = MockFunctionInvoker::new();
        invoker
            .expect_invoke_async()
            .with(eq("bridge"), eq(br#"{"awslogs":{"data":"abc"}}"#.to_vec()))
            .times(1)
            .returning(|_, _| Ok(202));

        replay_one(&invoker, "bridge", &record("ok", BODY)).await
    }

    #[tokio::test]
    async fn test_replay_one_invoke_error() {
        let mut invoker = MockFunctionInvoker::new();
        invoker
            .expect_invoke_async()
            .times(1)
            .returning(|_, _| Err(RuntimeError::AwsConfig("boom".into())));

        assert!(replay_one(&invoker, "bridge", &record("ok", BODY)).await.is_err());
    }

    #[tokio::test]
    async fn test_replay_one_unexpected_status() {
        let mut invoker = MockFunctionInvoker::new();
        invoker
            .expect_invoke_async()
            .times(1)
            .returning(|_, _| Ok(500));

        let err = replay_one(&invoker, "bridge", &record("ok", BODY))
            .await
            .unwrap_err();
        assert!(matches!(err, RuntimeError::InvokeStatus(500)));
    }

    #[tokio::test]
    async fn test_handle_records_reports_failed_records() -> Result<(), RuntimeError> {
        let mut invoker = MockFunctionInvoker::new();
        invoker
            .expect_invoke_async()
            .with(eq("bridge"), eq(br#"{"awslogs":{"data":"abc"}}"#.to_vec()))
            .times(1)
            .returning(|_, _| Ok(202));

        let replayer = Replayer::new(factory_with(invoker));
        let event = SqsEvent {
            records: vec![
                record("ok", BODY),
                record("bad", r#"{"requestContext":{"requestId":"r2"}}"#),
            ],
        };

        let response = replayer.handle_records(&config(), event).await?;
        assert_eq!(
            vec![BatchItemFailure {
                item_identifier: "bad".into()
            }],
            response.batch_item_failures
        );

        Ok(())
    }

    #[tokio::test]
    async fn test_handle_records_keeps_going_after_failure() -> Result<(), RuntimeError> {
        let mut invoker = MockFunctionInvoker::new();
        invoker
            .expect_invoke_async()
            .with(eq("bridge"), eq(b"{\"k\":\"v1\"}".to_vec()))
            .times(1)
            .returning(|_, _| Ok(500));
        invoker
            .expect_invoke_async()
            .with(eq("bridge"), eq(b"{\"k\":\"v2\"}".to_vec()))
            .times(1)
            .returning(|_, _| Ok(202));

        let replayer = Replayer::new(factory_with(invoker));
        let event = SqsEvent {
            records: vec![
                record("first", r#"{"requestPayload":{"k":"v1"}}"#),
                record("second", r#"{"requestPayload":{"k":"v2"}}"#),
            ],
        };

        let response = replayer.handle_records(&config(), event).await?;
        assert_eq!(1, response.batch_item_failures.len());
        assert_eq!("first", response.batch_item_failures[0].item_identifier);

        Ok(())
    }

    #[tokio::test]
    async fn test_handle_records_reuses_invoker() -> Result<(), RuntimeError> {
        let mut invoker = MockFunctionInvoker::new();
        invoker
            .expect_invoke_async()
            .times(2)
            .returning(|_, _| Ok(202));

        let replayer = Replayer::new(factory_with(invoker));
        for id in ["first", "second"] {
            let event = SqsEvent {
                records: vec![record(id, BODY)],
            };
            let response = replayer.handle_records(&config(), event).await?;
            assert!(response.batch_item_failures.is_empty());
        }

        Ok(())
    }

    #[tokio::test]
    async fn test_handle_records_retries_invoker_creation() -> Result<(), RuntimeError> {
        let mut invoker = MockFunctionInvoker::new();
        invoker
            .expect_invoke_async()
            .times(1)
            .returning(|_, _| Ok(202));
        let invoker: Arc<dyn FunctionInvoker> = Arc::new(invoker);

        let mut seq = mockall::Sequence::new();
        let mut factory = MockInvokerFactory::new();
        factory
            .expect_create()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Err(RuntimeError::AwsConfig("missing aws region".into())));
        factory
            .expect_create()
            .times(1)
            .in_sequence(&mut seq)
            .returning(move || Ok(invoker.clone()));

        let replayer = Replayer::new(factory);

        let err = replayer
            .handle_records(&config(), SqsEvent::default())
            .await
            .unwrap_err();
        assert!(matches!(err, RuntimeError::AwsConfig(_)));

        let event = SqsEvent {
            records: vec![record("ok", BODY)],
        };
        let response = replayer.handle_records(&config(), event).await?;
        assert!(response.batch_item_failures.is_empty());

        Ok(())
    }

    #[tokio::test]
    async fn test_lambda_invoker() -> Result<(), RuntimeError> {
        // GIVEN a LambdaInvoker that accepts one async invocation
        let conn = TestConnection::new(vec![(
            http::Request::builder()
                .uri("https://lambda.us-west-1.amazonaws.com/2015-03-31/functions/bridge/invocations")
                .header("x-amz-invocation-type", "Event")
                .body(SdkBody::from(r#"{"awslogs":{"data":"abc"}}"#))
                .unwrap(),
            http::Response::builder()
                .status(202)
                .body(SdkBody::from(""))
                .unwrap(),
        )]);
        let config = Config::new(&get_mock_config().await);
        let inner = Client::from_conf_conn(config, DynConnector::new(conn.clone()));
        let invoker = LambdaInvoker { inner };

        // WHEN invoking the bridge with the original payload
        let status = invoker
            .invoke_async("bridge", br#"{"awslogs":{"data":"abc"}}"#.to_vec())
            .await?;

        // THEN the status code is returned
        assert_eq!(202, status);

        // AND the request matches the expected request
        conn.assert_requests_match(&vec![]);

        Ok(())
    }
}
