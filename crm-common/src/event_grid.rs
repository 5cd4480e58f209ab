use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use thiserror::Error;

use crate::events::OutboundEvent;

const SAS_KEY_HEADER: &str = "aeg-sas-key";

/// The event bus topics contact events are published to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    NewContact,
    UpdatedContact,
}

impl Topic {
    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::NewContact => "new_contact",
            Topic::UpdatedContact => "updated_contact",
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Acknowledgement of an accepted batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ack {
    pub status: u16,
}

#[derive(Error, Debug)]
pub enum PublishError {
    #[error("no endpoint configured for topic {0}")]
    MissingEndpoint(Topic),
    #[error("event bus responded with {status}: {body}")]
    Status { status: u16, body: String },
    #[error("request to the event bus failed: {0}")]
    Request(#[source] reqwest::Error),
}

impl From<reqwest::Error> for PublishError {
    fn from(error: reqwest::Error) -> Self {
        PublishError::Request(error.without_url())
    }
}

impl PublishError {
    /// The status code returned by the bus, if it answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            PublishError::Status { status, .. } => Some(*status),
            PublishError::Request(error) => error.status().map(|s| s.as_u16()),
            PublishError::MissingEndpoint(_) => None,
        }
    }
}

#[async_trait]
pub trait EventBus: Send + Sync {
    /// Publish all `events` to `topic` in a single call.
    async fn publish_batch(
        &self,
        topic: Topic,
        events: &[OutboundEvent],
    ) -> Result<Ack, PublishError>;
}

#[derive(Debug, Clone)]
pub struct TopicEndpoint {
    pub url: String,
    pub key: String,
}

impl TopicEndpoint {
    /// Returns `None` when no url is configured.
    pub fn new(url: &str, key: &str) -> Option<Self> {
        (!url.is_empty()).then(|| Self {
            url: url.to_owned(),
            key: key.to_owned(),
        })
    }
}

/// An [`EventBus`] publishing to Azure Event Grid custom topics.
#[derive(Clone)]
pub struct EventGridClient {
    client: reqwest::Client,
    new_contact: Option<TopicEndpoint>,
    updated_contact: Option<TopicEndpoint>,
}

impl EventGridClient {
    pub fn new(
        new_contact: Option<TopicEndpoint>,
        updated_contact: Option<TopicEndpoint>,
        timeout: Duration,
    ) -> Result<Self, PublishError> {
        let client = reqwest::Client::builder()
            .user_agent("crm-hooks")
            .timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            new_contact,
            updated_contact,
        })
    }

    fn endpoint(&self, topic: Topic) -> Option<&TopicEndpoint> {
        match topic {
            Topic::NewContact => self.new_contact.as_ref(),
            Topic::UpdatedContact => self.updated_contact.as_ref(),
        }
    }
}

#[async_trait]
impl EventBus for EventGridClient {
    async fn publish_batch(
        &self,
        topic: Topic,
        events: &[OutboundEvent],
    ) -> Result<Ack, PublishError> {
        let endpoint = self
            .endpoint(topic)
            .ok_or(PublishError::MissingEndpoint(topic))?;

        let response = self
            .client
            .post(&endpoint.url)
            .header(SAS_KEY_HEADER, &endpoint.key)
            .json(events)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::OK {
            return Ok(Ack {
                status: status.as_u16(),
            });
        }

        Err(PublishError::Status {
            status: status.as_u16(),
            body: response.text().await.unwrap_or_default(),
        })
    }
}
