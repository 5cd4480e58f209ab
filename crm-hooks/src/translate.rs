use std::sync::Arc;

use crm_common::contact::EnrichedContact;
use crm_common::events::{
    ContactPayload, NewContactPayload, OutboundEvent, UpdatedContactPayload, DATA_VERSION,
};

use crate::curate::CuratedEvent;
use crate::time::TimeSource;

pub const NEW_CONTACT_EVENT_TYPE: &str = "NewContact";

/// Coarse change category of an updated contact, used by subscribers to filter events.
pub fn event_category(property_name: Option<&str>) -> &'static str {
    match property_name.unwrap_or_default() {
        "firstname" | "lastname" => "Name",
        "preferred_name" => "PreferredName",
        "phone" => "Phone",
        "email" => "Email",
        "address" | "city" | "state" | "zip" => "CustomerAddress",
        "jobtitle" => "JobTitle",
        "hs_lead_status" => "LeadStatus",
        "customer_name_on_bill" => "CustomerNameOnBill",
        "meter_number" => "MeterNumber",
        "synergy_account_no" => "SynergyAccountNo",
        "supply_address" => "SupplyAddress",
        "retailer_reference_number" => "RetailerReferenceNumber",
        _ => "Other",
    }
}

/// Turns enriched contacts into events for the bus.
#[derive(Clone)]
pub struct Translator {
    subject_prefix: String,
    timesource: Arc<dyn TimeSource + Send + Sync>,
}

impl Translator {
    pub fn new(subject_prefix: &str, timesource: Arc<dyn TimeSource + Send + Sync>) -> Self {
        Self {
            subject_prefix: subject_prefix.to_owned(),
            timesource,
        }
    }

    /// The event time is when translation happens; the CRM's own change timestamp is not kept.
    pub fn translate(&self, event: &CuratedEvent, contact: &EnrichedContact) -> OutboundEvent {
        let (event_type, subject, payload) = if event.is_new {
            (
                NEW_CONTACT_EVENT_TYPE,
                format!("{}.Crm.ContactCreated", self.subject_prefix),
                ContactPayload::Created(NewContactPayload::from(contact)),
            )
        } else {
            (
                event_category(event.property_name.as_deref()),
                format!("{}.Crm.ContactUpdated", self.subject_prefix),
                ContactPayload::Updated(UpdatedContactPayload::from(contact)),
            )
        };

        OutboundEvent {
            id: event.source_event_id.clone(),
            event_type: event_type.to_owned(),
            subject,
            event_time: self.timesource.current_time(),
            data_version: DATA_VERSION,
            payload,
        }
    }

    /// Translate every pair, split into created and updated events in input order.
    pub fn translate_all<'a, I>(&self, enriched: I) -> (Vec<OutboundEvent>, Vec<OutboundEvent>)
    where
        I: IntoIterator<Item = (&'a CuratedEvent, &'a EnrichedContact)>,
    {
        enriched
            .into_iter()
            .map(|(event, contact)| self.translate(event, contact))
            .partition(|event| matches!(event.payload, ContactPayload::Created(_)))
    }
}
