use std::fmt::Display;

use crm_common::event_grid::{EventBus, PublishError, Topic};
use crm_common::events::OutboundEvent;
use serde::{Serialize, Serializer};
use tracing::{error, info};

#[derive(Debug, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum GroupOutcome {
    /// Nothing to send, so the bus was never called.
    Skipped,
    Published {
        count: usize,
        status: u16,
    },
    Failed {
        count: usize,
        #[serde(serialize_with = "serialize_display")]
        error: PublishError,
    },
}

impl GroupOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, GroupOutcome::Failed { .. })
    }
}

#[derive(Debug, Serialize)]
pub struct PublishOutcome {
    pub created: GroupOutcome,
    pub updated: GroupOutcome,
}

fn serialize_display<T: Display, S: Serializer>(
    value: &T,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.collect_str(value)
}

async fn publish_group(
    bus: &dyn EventBus,
    topic: Topic,
    events: &[OutboundEvent],
) -> GroupOutcome {
    if events.is_empty() {
        return GroupOutcome::Skipped;
    }

    let count = events.len();
    let labels = [("topic", topic.to_string())];

    match bus.publish_batch(topic, events).await {
        Ok(ack) => {
            info!(%topic, count, status = ack.status, "published contact events");
            metrics::counter!("crm_hooks_events_published_total", &labels).increment(count as u64);
            GroupOutcome::Published {
                count,
                status: ack.status,
            }
        }
        Err(error) => {
            error!(%topic, count, "failed to publish contact events: {}", error);
            metrics::counter!("crm_hooks_publish_failures_total", &labels).increment(1);
            GroupOutcome::Failed { count, error }
        }
    }
}

/// Send each non-empty group to its topic in one call. The groups are independent: a failure
/// publishing one leaves the other untouched.
pub async fn publish(
    bus: &dyn EventBus,
    created: &[OutboundEvent],
    updated: &[OutboundEvent],
) -> PublishOutcome {
    let (created, updated) = tokio::join!(
        publish_group(bus, Topic::NewContact, created),
        publish_group(bus, Topic::UpdatedContact, updated),
    );

    PublishOutcome { created, updated }
}
