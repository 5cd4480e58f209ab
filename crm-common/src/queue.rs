//! Outbound message queues: error notifications, update reviews, installations awaiting
//! creation, and the in-process intake of raw contact events.
use std::fmt::Display;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::info;

pub const ERROR_QUEUE: &str = "error-notification";
pub const UPDATE_REVIEW_QUEUE: &str = "existing-contact-update-review";
pub const INSTALLATIONS_QUEUE: &str = "installations-to-be-created";
pub const INTAKE_QUEUE: &str = "raw-hubspot-change-notifications";

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("queue {0} is closed")]
    Closed(String),
    #[error("queue {0} is full")]
    Full(String),
}

#[async_trait]
pub trait MessageQueue: Send + Sync {
    fn name(&self) -> &str;

    async fn push(&self, message: String) -> Result<(), QueueError>;
}

/// A bounded in-process queue feeding a [`mpsc::Receiver`].
pub struct ChannelQueue {
    name: String,
    sender: mpsc::Sender<String>,
}

/// Create a [`ChannelQueue`] and the receiving end its messages are delivered to.
pub fn channel(name: &str, capacity: usize) -> (ChannelQueue, mpsc::Receiver<String>) {
    let (sender, receiver) = mpsc::channel(capacity);

    (
        ChannelQueue {
            name: name.to_owned(),
            sender,
        },
        receiver,
    )
}

#[async_trait]
impl MessageQueue for ChannelQueue {
    fn name(&self) -> &str {
        &self.name
    }

    /// Never waits for capacity: a full queue is reported instead.
    async fn push(&self, message: String) -> Result<(), QueueError> {
        self.sender.try_send(message).map_err(|error| match error {
            mpsc::error::TrySendError::Full(_) => QueueError::Full(self.name.clone()),
            mpsc::error::TrySendError::Closed(_) => QueueError::Closed(self.name.clone()),
        })
    }
}

/// Writes every message to the log. Stands in for queues whose consumers live elsewhere.
pub struct LogQueue {
    name: String,
}

impl LogQueue {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
        }
    }
}

#[async_trait]
impl MessageQueue for LogQueue {
    fn name(&self) -> &str {
        &self.name
    }

    async fn push(&self, message: String) -> Result<(), QueueError> {
        info!(queue = self.name, "{}", message);
        Ok(())
    }
}

/// Keeps messages in memory, mostly useful to inspect what was queued.
#[derive(Default)]
pub struct MemoryQueue {
    name: String,
    messages: Mutex<Vec<String>>,
    closed: bool,
}

impl MemoryQueue {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            ..Default::default()
        }
    }

    /// A queue that rejects every message.
    pub fn closed(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            closed: true,
            ..Default::default()
        }
    }

    pub fn messages(&self) -> Vec<String> {
        self.messages
            .lock()
            .map(|messages| messages.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl MessageQueue for MemoryQueue {
    fn name(&self) -> &str {
        &self.name
    }

    async fn push(&self, message: String) -> Result<(), QueueError> {
        if self.closed {
            return Err(QueueError::Closed(self.name.clone()));
        }

        self.messages
            .lock()
            .map_err(|_| QueueError::Closed(self.name.clone()))?
            .push(message);

        Ok(())
    }
}

/// Reports errors to the error notification queue, prefixed with where they were raised.
#[derive(Clone)]
pub struct ErrorQueueLogger {
    queue: Arc<dyn MessageQueue>,
    source: String,
}

impl ErrorQueueLogger {
    pub fn new(queue: Arc<dyn MessageQueue>, solution: &str, function: &str) -> Self {
        Self {
            queue,
            source: format!("{solution}.{function}"),
        }
    }

    pub async fn report(&self, message: impl Display + Send) -> Result<(), QueueError> {
        self.queue
            .push(format!("{}: {}", self.source, message))
            .await
    }
}
