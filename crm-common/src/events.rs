//! Contact events as they are published to the event bus, in Event Grid schema.
use serde::Serialize;
use time::OffsetDateTime;

use crate::contact::EnrichedContact;

pub const DATA_VERSION: &str = "1.0";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundEvent {
    pub id: String,
    pub event_type: String,
    pub subject: String,
    #[serde(with = "time::serde::rfc3339")]
    pub event_time: OffsetDateTime,
    pub data_version: &'static str,
    #[serde(rename = "data")]
    pub payload: ContactPayload,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ContactPayload {
    Created(NewContactPayload),
    Updated(UpdatedContactPayload),
}

/// Current state of a contact that was just created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewContactPayload {
    pub contact_id: String,
    pub rest_uri: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub preferred_name: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub customer_address: Option<String>,
    pub job_title: Option<String>,
    pub lead_status: Option<String>,
    pub installation_record_exists: bool,
}

impl From<&EnrichedContact> for NewContactPayload {
    fn from(contact: &EnrichedContact) -> Self {
        Self {
            contact_id: contact.contact_id(),
            rest_uri: contact.rest_uri.clone(),
            first_name: contact.first_name.current.clone(),
            last_name: contact.last_name.current.clone(),
            preferred_name: contact.preferred_name.current.clone(),
            phone: contact.phone.current.clone(),
            email: contact.email.current.clone(),
            customer_address: contact.customer_address.current.clone(),
            job_title: contact.job_title.current.clone(),
            lead_status: contact.lead_status.current.clone(),
            installation_record_exists: contact.installation_record_exists,
        }
    }
}

/// Current and previous state of a changed contact. Every `old*` field carries the current value
/// when the CRM returned no earlier version, so subscribers can diff without null checks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatedContactPayload {
    pub contact_id: String,
    pub rest_uri: String,
    pub first_name: Option<String>,
    pub old_first_name: Option<String>,
    pub last_name: Option<String>,
    pub old_last_name: Option<String>,
    pub full_name: String,
    pub old_full_name: String,
    pub full_name_period_separated: String,
    pub old_full_name_period_separated: String,
    pub preferred_name: Option<String>,
    pub old_preferred_name: Option<String>,
    pub phone: Option<String>,
    pub old_phone: Option<String>,
    pub email: Option<String>,
    pub old_email: Option<String>,
    pub customer_address: Option<String>,
    pub old_customer_address: Option<String>,
    pub job_title: Option<String>,
    pub old_job_title: Option<String>,
    pub lead_status: Option<String>,
    pub old_lead_status: Option<String>,
    pub installation_record_exists: bool,
}

impl From<&EnrichedContact> for UpdatedContactPayload {
    fn from(contact: &EnrichedContact) -> Self {
        let first_name = contact.first_name.current.clone();
        let last_name = contact.last_name.current.clone();
        let old_first_name = contact.first_name.previous_or_current();
        let old_last_name = contact.last_name.previous_or_current();

        Self {
            contact_id: contact.contact_id(),
            rest_uri: contact.rest_uri.clone(),
            full_name: join_name(&first_name, &last_name, ' '),
            old_full_name: join_name(&old_first_name, &old_last_name, ' '),
            full_name_period_separated: join_name(&first_name, &last_name, '.'),
            old_full_name_period_separated: join_name(&old_first_name, &old_last_name, '.'),
            first_name,
            old_first_name,
            last_name,
            old_last_name,
            preferred_name: contact.preferred_name.current.clone(),
            old_preferred_name: contact.preferred_name.previous_or_current(),
            phone: contact.phone.current.clone(),
            old_phone: contact.phone.previous_or_current(),
            email: contact.email.current.clone(),
            old_email: contact.email.previous_or_current(),
            customer_address: contact.customer_address.current.clone(),
            old_customer_address: contact.customer_address.previous_or_current(),
            job_title: contact.job_title.current.clone(),
            old_job_title: contact.job_title.previous_or_current(),
            lead_status: contact.lead_status.current.clone(),
            old_lead_status: contact.lead_status.previous_or_current(),
            installation_record_exists: contact.installation_record_exists,
        }
    }
}

fn join_name(first: &Option<String>, last: &Option<String>, separator: char) -> String {
    let first = first.as_deref().unwrap_or_default();
    let last = last.as_deref().unwrap_or_default();

    format!("{first}{separator}{last}")
        .trim_matches(separator)
        .to_owned()
}
