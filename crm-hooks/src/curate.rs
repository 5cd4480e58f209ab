//! Classification and deduplication of raw CRM change notifications.
use std::collections::HashSet;

use crm_common::contact::deserialize_id;
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
#[serde(from = "String")]
pub enum SubscriptionType {
    Created,
    PropertyChanged,
    /// Any subscription we do not act on, e.g. `contact.merge` or `contact.deletion`.
    Unrecognized(String),
}

impl From<String> for SubscriptionType {
    fn from(value: String) -> Self {
        match value.as_str() {
            "contact.creation" | "Created" => SubscriptionType::Created,
            "contact.propertyChange" | "PropertyChanged" => SubscriptionType::PropertyChanged,
            _ => SubscriptionType::Unrecognized(value),
        }
    }
}

/// One element of the array HubSpot posts to the webhook.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeNotification {
    #[serde(deserialize_with = "deserialize_id")]
    pub object_id: String,
    #[serde(deserialize_with = "deserialize_id")]
    pub event_id: String,
    pub subscription_type: SubscriptionType,
    #[serde(default)]
    pub property_name: Option<String>,
    #[serde(default)]
    pub property_value: Option<String>,
    #[serde(default)]
    pub attempt_number: u32,
}

/// A classified change intent, ready for enrichment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CuratedEvent {
    pub contact_id: String,
    pub source_event_id: String,
    pub is_new: bool,
    /// The property that changed. Only meaningful for updates, and not part of identity.
    pub property_name: Option<String>,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct Curation {
    pub events: Vec<CuratedEvent>,
    pub unclassified: Vec<ChangeNotification>,
}

/// Reduce a batch to the change intents worth enriching.
///
/// A creation supersedes every update to the same contact in the batch, wherever it appears,
/// since enrichment fetches the contact's full current state anyway. Events sharing contact id,
/// event id and kind collapse to their first occurrence. Several updates to one contact are
/// all kept. Output preserves the order in which events were first seen.
pub fn curate(batch: &[ChangeNotification]) -> Curation {
    let mut created = HashSet::new();
    let mut working = Vec::with_capacity(batch.len());
    let mut unclassified = Vec::new();

    for notification in batch {
        match &notification.subscription_type {
            SubscriptionType::Created => {
                created.insert(notification.object_id.as_str());
                working.push(CuratedEvent {
                    contact_id: notification.object_id.clone(),
                    source_event_id: notification.event_id.clone(),
                    is_new: true,
                    property_name: None,
                });
            }
            SubscriptionType::PropertyChanged => working.push(CuratedEvent {
                contact_id: notification.object_id.clone(),
                source_event_id: notification.event_id.clone(),
                is_new: false,
                property_name: notification.property_name.clone(),
            }),
            SubscriptionType::Unrecognized(_) => unclassified.push(notification.clone()),
        }
    }

    working.retain(|event| event.is_new || !created.contains(event.contact_id.as_str()));

    let mut seen = HashSet::with_capacity(working.len());
    working.retain(|event| {
        seen.insert((
            event.contact_id.clone(),
            event.source_event_id.clone(),
            event.is_new,
        ))
    });

    Curation {
        events: working,
        unclassified,
    }
}

/// The body as a whole could not be read as a batch.
#[derive(Error, Debug)]
pub enum BatchDecodeError {
    #[error("request body is empty")]
    Empty,
    #[error("request body is not valid JSON: {0}")]
    NotJson(serde_json::Error),
    #[error("request body is not a JSON array")]
    NotAnArray,
}

/// One element of an otherwise readable batch that is not a change notification.
#[derive(Error, Debug)]
#[error("element {index} is not a change notification: {source}")]
pub struct InvalidNotification {
    pub index: usize,
    pub source: serde_json::Error,
}

#[derive(Debug, Default)]
pub struct DecodedBatch {
    pub notifications: Vec<ChangeNotification>,
    pub invalid: Vec<InvalidNotification>,
}

impl DecodedBatch {
    /// Number of elements in the batch, readable or not.
    pub fn received(&self) -> usize {
        self.notifications.len() + self.invalid.len()
    }
}

/// Parse a webhook body into notifications. Elements are decoded one at a time so that a
/// single bad element only costs itself.
pub fn decode_batch(body: &[u8]) -> Result<DecodedBatch, BatchDecodeError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Err(BatchDecodeError::Empty);
    }

    let value: serde_json::Value =
        serde_json::from_slice(body).map_err(BatchDecodeError::NotJson)?;
    let serde_json::Value::Array(elements) = value else {
        return Err(BatchDecodeError::NotAnArray);
    };

    let mut batch = DecodedBatch::default();
    for (index, element) in elements.into_iter().enumerate() {
        match serde_json::from_value(element) {
            Ok(notification) => batch.notifications.push(notification),
            Err(source) => batch.invalid.push(InvalidNotification { index, source }),
        }
    }

    Ok(batch)
}
