//! Job queue backed by Amazon SQS.

use std::time::Duration;

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_credential_types::Credentials;
use aws_sdk_sqs::config::{Builder, Region};
use aws_sdk_sqs::Client;
use tracing::{debug, warn};

use crate::error::{QueueError, QueueResult};

/// Largest batch a single SQS receive can return.
pub const MAX_RECEIVE_BATCH: i32 = 10;

/// Visibility timeout the queue is provisioned with.
///
/// Not enforced here, and deliberately unrelated to the session hard cap.
pub const VISIBILITY_TIMEOUT: Duration = Duration::from_secs(2 * 60 * 60);

/// A message owned by the consumer for one poll cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueMessage {
    /// Broker-assigned id, for logging only
    pub message_id: Option<String>,
    /// Opaque payload
    pub body: Option<String>,
    /// Token required to acknowledge (delete) the message
    pub receipt_handle: String,
}

/// The queue operations the dispatcher depends on.
#[async_trait]
pub trait MessageQueue: Send + Sync {
    /// Long-poll for up to `max_messages` messages, waiting at most `wait`.
    async fn receive(&self, wait: Duration, max_messages: i32) -> QueueResult<Vec<QueueMessage>>;

    /// Acknowledge a message so it is not redelivered.
    async fn delete(&self, receipt_handle: &str) -> QueueResult<()>;

    /// Hand a message back unprocessed so another consumer can take it now.
    async fn release(&self, receipt_handle: &str) -> QueueResult<()>;
}

/// Queue configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Queue URL
    pub queue_url: String,
    /// AWS region
    pub region: String,
    /// Access key ID
    pub access_key_id: String,
    /// Secret access key
    pub secret_access_key: String,
    /// Optional endpoint override (e.g. a local SQS emulator)
    pub endpoint_url: Option<String>,
}

impl QueueConfig {
    /// Create config from environment variables.
    pub fn from_env() -> QueueResult<Self> {
        Ok(Self {
            queue_url: required("QUEUE_URL")?,
            region: required("AWS_DEFAULT_REGION")?,
            access_key_id: required("AWS_ACCESS_KEY")?,
            secret_access_key: required("AWS_SECRET_ACCESS_KEY")?,
            endpoint_url: std::env::var("AWS_ENDPOINT_URL")
                .ok()
                .filter(|s| !s.is_empty()),
        })
    }
}

fn required(name: &str) -> QueueResult<String> {
    match std::env::var(name) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(QueueError::config_error(format!("{} not set", name))),
    }
}

/// SQS queue client.
#[derive(Clone)]
pub struct SqsQueue {
    client: Client,
    queue_url: String,
}

impl SqsQueue {
    /// Create a new queue client.
    pub fn new(config: QueueConfig) -> Self {
        let credentials = Credentials::new(
            &config.access_key_id,
            &config.secret_access_key,
            None,
            None,
            "roomrec",
        );

        let mut builder = Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(config.region))
            .credentials_provider(credentials);

        if let Some(endpoint) = &config.endpoint_url {
            builder = builder.endpoint_url(endpoint);
        }

        Self {
            client: Client::from_conf(builder.build()),
            queue_url: config.queue_url,
        }
    }

    /// Create from environment variables.
    pub fn from_env() -> QueueResult<Self> {
        Ok(Self::new(QueueConfig::from_env()?))
    }

    pub fn queue_url(&self) -> &str {
        &self.queue_url
    }
}

#[async_trait]
impl MessageQueue for SqsQueue {
    async fn receive(&self, wait: Duration, max_messages: i32) -> QueueResult<Vec<QueueMessage>> {
        let output = self
            .client
            .receive_message()
            .queue_url(&self.queue_url)
            .wait_time_seconds(wait.as_secs().min(20) as i32)
            .max_number_of_messages(max_messages.clamp(1, MAX_RECEIVE_BATCH))
            .send()
            .await
            .map_err(|e| QueueError::receive_failed(e.to_string()))?;

        let messages: Vec<QueueMessage> = output
            .messages()
            .iter()
            .filter_map(|message| match message.receipt_handle() {
                Some(handle) => Some(QueueMessage {
                    message_id: message.message_id().map(str::to_string),
                    body: message.body().map(str::to_string),
                    receipt_handle: handle.to_string(),
                }),
                None => {
                    // Cannot be acknowledged, so it cannot be processed safely either.
                    warn!(
                        message_id = ?message.message_id(),
                        "Dropping message without receipt handle"
                    );
                    None
                }
            })
            .collect();

        debug!("Received {} messages", messages.len());
        Ok(messages)
    }

    async fn delete(&self, receipt_handle: &str) -> QueueResult<()> {
        self.client
            .delete_message()
            .queue_url(&self.queue_url)
            .receipt_handle(receipt_handle)
            .send()
            .await
            .map_err(|e| QueueError::delete_failed(e.to_string()))?;

        debug!("Deleted message");
        Ok(())
    }

    async fn release(&self, receipt_handle: &str) -> QueueResult<()> {
        self.client
            .change_message_visibility()
            .queue_url(&self.queue_url)
            .receipt_handle(receipt_handle)
            .visibility_timeout(0)
            .send()
            .await
            .map_err(|e| QueueError::release_failed(e.to_string()))?;

        debug!("Released message");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn set_required_env() {
        std::env::set_var("QUEUE_URL", "https://sqs.eu-west-1.amazonaws.com/123/recordings");
        std::env::set_var("AWS_DEFAULT_REGION", "eu-west-1");
        std::env::set_var("AWS_ACCESS_KEY", "AKIDEXAMPLE");
        std::env::set_var("AWS_SECRET_ACCESS_KEY", "secret");
    }

    #[test]
    #[serial]
    fn test_config_from_env() {
        set_required_env();
        std::env::remove_var("AWS_ENDPOINT_URL");

        let config = QueueConfig::from_env().unwrap();
        assert_eq!(config.region, "eu-west-1");
        assert!(config.endpoint_url.is_none());
    }

    #[test]
    #[serial]
    fn test_config_requires_queue_url() {
        set_required_env();
        std::env::remove_var("QUEUE_URL");

        let err = QueueConfig::from_env().unwrap_err();
        assert!(err.to_string().contains("QUEUE_URL"));
    }

    #[test]
    #[serial]
    fn test_config_rejects_blank_values() {
        set_required_env();
        std::env::set_var("AWS_SECRET_ACCESS_KEY", "  ");

        assert!(QueueConfig::from_env().is_err());
    }

    #[test]
    fn test_visibility_timeout_is_two_hours() {
        assert_eq!(VISIBILITY_TIMEOUT, Duration::from_secs(7200));
    }
}
