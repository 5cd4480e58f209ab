use std::num::NonZeroUsize;
use std::time::Instant;

use crm_common::contact::EnrichedContact;
use crm_common::hubspot::{CrmClient, CrmError};
use futures::stream::{self, StreamExt};
use tracing::warn;

use crate::curate::CuratedEvent;

#[derive(Debug, Default)]
pub struct Enrichment {
    pub contacts: Vec<(CuratedEvent, EnrichedContact)>,
    pub failures: Vec<(CuratedEvent, CrmError)>,
}

/// Fetch the full state of the contact behind `event`. History is only requested for updates,
/// since a creation has no earlier state to compare with.
pub async fn enrich(
    crm: &dyn CrmClient,
    event: &CuratedEvent,
) -> Result<EnrichedContact, CrmError> {
    crm.get_contact_by_id(&event.contact_id, !event.is_new)
        .await
}

/// Enrich every event with at most `max_concurrent` fetches in flight. A failed fetch is
/// recorded next to its event and does not stop the others. Results keep the input order.
pub async fn enrich_all(
    crm: &dyn CrmClient,
    events: Vec<CuratedEvent>,
    max_concurrent: NonZeroUsize,
) -> Enrichment {
    let start = Instant::now();

    let results: Vec<(CuratedEvent, Result<EnrichedContact, CrmError>)> = stream::iter(events)
        .map(|event| async move {
            let result = enrich(crm, &event).await;
            (event, result)
        })
        .buffered(max_concurrent.get())
        .collect()
        .await;

    metrics::histogram!("crm_hooks_enrichment_duration_seconds")
        .record(start.elapsed().as_secs_f64());

    let mut enrichment = Enrichment::default();
    for (event, result) in results {
        match result {
            Ok(contact) => enrichment.contacts.push((event, contact)),
            Err(error) => {
                warn!(
                    contact_id = event.contact_id,
                    event_id = event.source_event_id,
                    "failed to fetch contact: {}",
                    error
                );
                metrics::counter!("crm_hooks_fetch_failures_total").increment(1);
                enrichment.failures.push((event, error));
            }
        }
    }

    enrichment
}
