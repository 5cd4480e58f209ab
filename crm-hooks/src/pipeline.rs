use std::fmt;
use std::num::NonZeroUsize;
use std::sync::Arc;

use crm_common::event_grid::{EventBus, Topic};
use crm_common::hubspot::CrmClient;
use crm_common::queue::{ErrorQueueLogger, QueueError};
use serde::Serialize;
use thiserror::Error;
use tracing::{error, info, instrument, warn};

use crate::curate::{curate, decode_batch, SubscriptionType};
use crate::enrich::enrich_all;
use crate::publish::{publish, GroupOutcome, PublishOutcome};
use crate::translate::Translator;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Decoding,
    Classifying,
    Enriching,
    Publishing,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stage = match self {
            Stage::Decoding => "decoding",
            Stage::Classifying => "classifying",
            Stage::Enriching => "enriching",
            Stage::Publishing => "publishing",
        };
        f.write_str(stage)
    }
}

/// The batch could not be accounted for: its body was unreadable and the error queue refused
/// to record that. Failures of single notifications, contacts or publish groups are not
/// errors, they end up in the [`BatchReport`] and on the error queue.
#[derive(Error, Debug)]
#[error("contact event batch failed while {stage}: {source}")]
pub struct PipelineError {
    pub stage: Stage,
    pub source: QueueError,
}

#[derive(Debug, Serialize)]
pub struct FetchFailure {
    pub contact_id: String,
    pub event_id: String,
    pub error: String,
}

/// What happened to a batch, returned even when parts of it failed.
#[derive(Debug, Serialize)]
pub struct BatchReport {
    pub received: usize,
    pub malformed: bool,
    /// Elements that could not be read as change notifications.
    pub invalid: usize,
    pub curated: usize,
    pub unclassified: usize,
    pub fetch_failures: Vec<FetchFailure>,
    pub published: PublishOutcome,
    /// Errors the error queue refused to take.
    pub unreported: usize,
}

impl BatchReport {
    fn malformed() -> Self {
        Self {
            received: 0,
            malformed: true,
            invalid: 0,
            curated: 0,
            unclassified: 0,
            fetch_failures: Vec::new(),
            published: PublishOutcome {
                created: GroupOutcome::Skipped,
                updated: GroupOutcome::Skipped,
            },
            unreported: 0,
        }
    }
}

/// Curates, enriches and republishes batches of CRM contact change notifications.
#[derive(Clone)]
pub struct ContactEventPipeline {
    crm: Arc<dyn CrmClient>,
    bus: Arc<dyn EventBus>,
    translator: Translator,
    errors: ErrorQueueLogger,
    max_concurrent_fetches: NonZeroUsize,
}

impl ContactEventPipeline {
    pub fn new(
        crm: Arc<dyn CrmClient>,
        bus: Arc<dyn EventBus>,
        translator: Translator,
        errors: ErrorQueueLogger,
        max_concurrent_fetches: NonZeroUsize,
    ) -> Self {
        Self {
            crm,
            bus,
            translator,
            errors,
            max_concurrent_fetches,
        }
    }

    /// Push a soft failure to the error queue. Returns false when the queue refused it.
    async fn report(&self, stage: Stage, message: String) -> bool {
        match self.errors.report(&message).await {
            Ok(()) => true,
            Err(error) => {
                error!(%stage, "failed to report contact event error ({}): {}", error, message);
                metrics::counter!("crm_hooks_unreported_errors_total").increment(1);
                false
            }
        }
    }

    /// Run a raw webhook body through every stage. A body that cannot be decoded is reported
    /// and treated as an empty batch; only when that report is refused too does this fail.
    #[instrument(skip_all, fields(bytes = body.len()))]
    pub async fn process(&self, body: &[u8]) -> Result<BatchReport, PipelineError> {
        let batch = match decode_batch(body) {
            Ok(batch) => batch,
            Err(error) => {
                warn!("ignoring malformed contact event batch: {}", error);
                self.errors
                    .report(format!("malformed contact event batch: {error}"))
                    .await
                    .map_err(|source| PipelineError {
                        stage: Stage::Decoding,
                        source,
                    })?;
                return Ok(BatchReport::malformed());
            }
        };
        metrics::counter!("crm_hooks_notifications_received_total")
            .increment(batch.received() as u64);

        let mut unreported = 0;
        for invalid in &batch.invalid {
            warn!(index = invalid.index, "skipping invalid contact event: {}", invalid);
            let message = format!("skipping invalid contact event: {invalid}");
            if !self.report(Stage::Decoding, message).await {
                unreported += 1;
            }
        }

        let curation = curate(&batch.notifications);
        for notification in &curation.unclassified {
            if let SubscriptionType::Unrecognized(kind) = &notification.subscription_type {
                let message = format!(
                    "unrecognized subscription type {kind:?} for contact {} (event {})",
                    notification.object_id, notification.event_id
                );
                if !self.report(Stage::Classifying, message).await {
                    unreported += 1;
                }
            }
        }
        metrics::counter!("crm_hooks_curated_events_total")
            .increment(curation.events.len() as u64);

        let curated = curation.events.len();
        let enrichment = enrich_all(
            self.crm.as_ref(),
            curation.events,
            self.max_concurrent_fetches,
        )
        .await;

        let mut fetch_failures = Vec::with_capacity(enrichment.failures.len());
        for (event, error) in &enrichment.failures {
            let message = format!(
                "failed to fetch contact {} for event {}: {error}",
                event.contact_id, event.source_event_id
            );
            if !self.report(Stage::Enriching, message).await {
                unreported += 1;
            }
            fetch_failures.push(FetchFailure {
                contact_id: event.contact_id.clone(),
                event_id: event.source_event_id.clone(),
                error: error.to_string(),
            });
        }

        let (created, updated) = self
            .translator
            .translate_all(enrichment.contacts.iter().map(|(event, contact)| (event, contact)));

        let published = publish(self.bus.as_ref(), &created, &updated).await;
        for (topic, outcome) in [
            (Topic::NewContact, &published.created),
            (Topic::UpdatedContact, &published.updated),
        ] {
            if let GroupOutcome::Failed { count, error } = outcome {
                let message = format!("failed to publish {count} events to {topic}: {error}");
                if !self.report(Stage::Publishing, message).await {
                    unreported += 1;
                }
            }
        }

        info!(
            received = batch.received(),
            invalid = batch.invalid.len(),
            curated,
            unclassified = curation.unclassified.len(),
            fetch_failures = fetch_failures.len(),
            unreported,
            "processed contact event batch"
        );

        Ok(BatchReport {
            received: batch.received(),
            malformed: false,
            invalid: batch.invalid.len(),
            curated,
            unclassified: curation.unclassified.len(),
            fetch_failures,
            published,
            unreported,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use crm_common::events::ContactPayload;
    use crm_common::queue::{MemoryQueue, ERROR_QUEUE};

    use super::*;
    use crate::enrich::tests::FakeCrm;
    use crate::publish::tests::FakeBus;
    use crate::translate::tests::translator;

    pub(crate) fn pipeline(
        crm: Arc<FakeCrm>,
        bus: Arc<FakeBus>,
        errors: Arc<MemoryQueue>,
    ) -> ContactEventPipeline {
        ContactEventPipeline::new(
            crm,
            bus,
            translator(),
            ErrorQueueLogger::new(errors, "CrmUpdateHandler", "ContactEvents"),
            NonZeroUsize::MIN,
        )
    }

    struct Harness {
        crm: Arc<FakeCrm>,
        bus: Arc<FakeBus>,
        errors: Arc<MemoryQueue>,
        pipeline: ContactEventPipeline,
    }

    fn harness(crm: FakeCrm, bus: FakeBus) -> Harness {
        let crm = Arc::new(crm);
        let bus = Arc::new(bus);
        let errors = Arc::new(MemoryQueue::new(ERROR_QUEUE));
        let pipeline = pipeline(crm.clone(), bus.clone(), errors.clone());

        Harness {
            crm,
            bus,
            errors,
            pipeline,
        }
    }

    #[tokio::test]
    async fn publishes_only_the_creation_of_a_new_contact() {
        let h = harness(FakeCrm::with_contacts(&["451"]), FakeBus::default());

        let report = h
            .pipeline
            .process(
                br#"[
                    {"objectId": 451, "eventId": 1, "subscriptionType": "contact.creation"},
                    {"objectId": 451, "eventId": 2, "subscriptionType": "contact.propertyChange", "propertyName": "phone"}
                ]"#,
            )
            .await
            .unwrap();

        assert_eq!(report.received, 2);
        assert_eq!(report.curated, 1);
        assert_eq!(h.crm.calls(), vec![("451".to_owned(), false)]);

        let batches = h.bus.batches();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].0, Topic::NewContact);
        assert_eq!(batches[0].1.len(), 1);
        assert_eq!(batches[0].1[0].id, "1");
        assert_eq!(batches[0].1[0].event_type, "NewContact");
        assert!(h.errors.messages().is_empty());
    }

    #[tokio::test]
    async fn publishes_an_email_update() {
        let h = harness(FakeCrm::with_contacts(&["700"]), FakeBus::default());

        h.pipeline
            .process(
                br#"[
                    {"objectId": "700", "eventId": "9", "subscriptionType": "PropertyChanged", "propertyName": "email"}
                ]"#,
            )
            .await
            .unwrap();

        let batches = h.bus.batches();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].0, Topic::UpdatedContact);
        let event = &batches[0].1[0];
        assert_eq!(event.event_type, "Email");
        match &event.payload {
            ContactPayload::Updated(payload) => {
                assert_eq!(payload.contact_id, "000700");
                assert_eq!(payload.old_email.as_deref(), Some("700@old.example.com"));
            }
            other => panic!("expected an update, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn reports_unrecognized_subscriptions_and_carries_on() {
        let h = harness(FakeCrm::with_contacts(&["700"]), FakeBus::default());

        let report = h
            .pipeline
            .process(
                br#"[
                    {"objectId": 12, "eventId": 3, "subscriptionType": "contact.merge"},
                    {"objectId": 700, "eventId": 9, "subscriptionType": "contact.propertyChange", "propertyName": "email"}
                ]"#,
            )
            .await
            .unwrap();

        assert_eq!(report.unclassified, 1);
        assert_eq!(report.curated, 1);
        assert_eq!(h.bus.batches().len(), 1);
        assert_eq!(
            h.errors.messages(),
            vec![
                r#"CrmUpdateHandler.ContactEvents: unrecognized subscription type "contact.merge" for contact 12 (event 3)"#
                    .to_owned()
            ]
        );
    }

    #[tokio::test]
    async fn treats_malformed_bodies_as_empty_batches() {
        let bodies: [&[u8]; 3] = [b"", b"not json", br#"{"objectId": 1}"#];
        for body in bodies {
            let h = harness(FakeCrm::default(), FakeBus::default());

            let report = h.pipeline.process(body).await.unwrap();

            assert!(report.malformed);
            assert!(h.bus.batches().is_empty());
            assert_eq!(h.errors.messages().len(), 1);
        }
    }

    #[tokio::test]
    async fn reports_fetch_failures_and_publishes_the_rest() {
        let h = harness(
            FakeCrm::with_contacts(&["1", "2", "3"]).failing("2"),
            FakeBus::default(),
        );

        let report = h
            .pipeline
            .process(
                br#"[
                    {"objectId": 1, "eventId": 10, "subscriptionType": "contact.propertyChange", "propertyName": "phone"},
                    {"objectId": 2, "eventId": 11, "subscriptionType": "contact.propertyChange", "propertyName": "phone"},
                    {"objectId": 3, "eventId": 12, "subscriptionType": "contact.propertyChange", "propertyName": "phone"}
                ]"#,
            )
            .await
            .unwrap();

        assert_eq!(report.fetch_failures.len(), 1);
        assert_eq!(report.fetch_failures[0].contact_id, "2");

        let batches = h.bus.batches();
        let ids: Vec<&str> = batches[0].1.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["10", "12"]);

        let errors = h.errors.messages();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("failed to fetch contact 2 for event 11"));
    }

    #[tokio::test]
    async fn reports_failed_publish_groups() {
        let h = harness(
            FakeCrm::with_contacts(&["1", "2"]),
            FakeBus::rejecting(Topic::UpdatedContact),
        );

        let report = h
            .pipeline
            .process(
                br#"[
                    {"objectId": 1, "eventId": 10, "subscriptionType": "contact.creation"},
                    {"objectId": 2, "eventId": 11, "subscriptionType": "contact.propertyChange", "propertyName": "phone"}
                ]"#,
            )
            .await
            .unwrap();

        assert!(matches!(
            report.published.created,
            GroupOutcome::Published { count: 1, .. }
        ));
        assert!(report.published.updated.is_failed());
        assert_eq!(
            h.errors.messages(),
            vec![
                "CrmUpdateHandler.ContactEvents: failed to publish 1 events to updated_contact: event bus responded with 400: invalid event"
                    .to_owned()
            ]
        );
    }

    #[tokio::test]
    async fn publishes_valid_notifications_next_to_invalid_ones() {
        let h = harness(FakeCrm::with_contacts(&["451"]), FakeBus::default());

        let report = h
            .pipeline
            .process(
                br#"[
                    {"objectId": 451, "eventId": 1, "subscriptionType": "contact.creation"},
                    {"objectId": 452, "eventId": 2}
                ]"#,
            )
            .await
            .unwrap();

        assert!(!report.malformed);
        assert_eq!(report.received, 2);
        assert_eq!(report.invalid, 1);
        assert_eq!(report.curated, 1);

        let batches = h.bus.batches();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].0, Topic::NewContact);
        assert_eq!(batches[0].1[0].id, "1");

        let errors = h.errors.messages();
        assert_eq!(errors.len(), 1);
        assert!(
            errors[0].starts_with(
                "CrmUpdateHandler.ContactEvents: skipping invalid contact event: element 1"
            ),
            "{}",
            errors[0]
        );
    }

    #[tokio::test]
    async fn keeps_publishing_when_error_queue_rejects_reports() {
        let crm = Arc::new(FakeCrm::with_contacts(&["451"]));
        let bus = Arc::new(FakeBus::default());
        let errors = Arc::new(MemoryQueue::closed(ERROR_QUEUE));
        let pipeline = pipeline(crm, bus.clone(), errors);

        let report = pipeline
            .process(
                br#"[
                    {"objectId": 12, "eventId": 3, "subscriptionType": "contact.merge"},
                    {"objectId": 451, "eventId": 1, "subscriptionType": "contact.creation"},
                    {"objectId": 5, "eventId": 4, "subscriptionType": "contact.creation"}
                ]"#,
            )
            .await
            .unwrap();

        assert_eq!(report.unclassified, 1);
        assert_eq!(report.fetch_failures.len(), 1);
        assert_eq!(report.unreported, 2);

        let batches = bus.batches();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].0, Topic::NewContact);
        assert_eq!(batches[0].1.len(), 1);
    }

    #[tokio::test]
    async fn fails_with_stage_when_a_malformed_body_cannot_be_reported() {
        let crm = Arc::new(FakeCrm::default());
        let bus = Arc::new(FakeBus::default());
        let errors = Arc::new(MemoryQueue::closed(ERROR_QUEUE));
        let pipeline = pipeline(crm, bus, errors);

        let error = pipeline.process(b"not json").await.unwrap_err();

        assert_eq!(error.stage, Stage::Decoding);
        assert_eq!(
            error.to_string(),
            "contact event batch failed while decoding: queue error-notification is closed"
        );
    }
}
