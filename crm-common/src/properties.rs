//! Payloads and helpers for writing contacts back to the CRM.
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

const MAX_INPUT_LENGTH: usize = 255;
const DEFAULT_LEAD_STATUS: &str = "INTERESTED";

static EMAIL_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("email pattern is valid"));

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ContactError {
    #[error("{0:?} is not a valid email address")]
    InvalidEmail(String),
}

/// Request body of the HubSpot create and update endpoints.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ContactProperties {
    pub properties: Vec<PropertyValue>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PropertyValue {
    pub property: String,
    pub value: String,
}

impl ContactProperties {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, property: &str, value: &str) {
        self.properties.push(PropertyValue {
            property: property.to_owned(),
            value: value.to_owned(),
        });
    }

    pub fn get(&self, property: &str) -> Option<&str> {
        self.properties
            .iter()
            .find(|p| p.property == property)
            .map(|p| p.value.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }
}

/// A contact to be created in the CRM, as submitted by a sign-up form.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewContact {
    pub email: String,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub preferred_name: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub street_address1: Option<String>,
    #[serde(default)]
    pub street_address2: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub postcode: Option<String>,
    #[serde(default)]
    pub lead_status: Option<String>,
    #[serde(default)]
    pub installation_record_exists: bool,
}

impl NewContact {
    /// Convert the submitted fields into CRM properties, dropping anything that fails input
    /// validation. Only the email address is mandatory.
    pub fn to_properties(&self) -> Result<ContactProperties, ContactError> {
        if !is_valid_email(&self.email) {
            return Err(ContactError::InvalidEmail(self.email.clone()));
        }

        let mut properties = ContactProperties::new();
        properties.add("email", &self.email);

        let preferred_name = self
            .preferred_name
            .as_deref()
            .or(self.first_name.as_deref());

        for (property, value) in [
            ("firstname", self.first_name.as_deref()),
            ("lastname", self.last_name.as_deref()),
            ("preferred_name", preferred_name),
            ("phone", self.phone.as_deref()),
        ] {
            if let Some(value) = value.filter(|v| is_valid_input(v)) {
                properties.add(property, value);
            }
        }

        // HubSpot expects street, unit and apartment concatenated into one field.
        let street: Vec<&str> = [
            self.street_address1.as_deref(),
            self.street_address2.as_deref(),
        ]
        .into_iter()
        .flatten()
        .filter(|v| is_valid_input(v))
        .collect();
        if !street.is_empty() {
            properties.add("address", &street.join(", "));
        }

        for (property, value) in [
            ("city", self.city.as_deref()),
            ("state", self.state.as_deref()),
            ("zip", self.postcode.as_deref()),
        ] {
            if let Some(value) = value.filter(|v| is_valid_input(v)) {
                properties.add(property, value);
            }
        }

        properties.add(
            "hs_lead_status",
            resolve_lead_status(self.lead_status.as_deref()),
        );
        properties.add("lifecyclestage", "lead");
        properties.add(
            "installationrecordexists",
            if self.installation_record_exists {
                "true"
            } else {
                "false"
            },
        );

        Ok(properties)
    }
}

pub fn is_valid_email(email: &str) -> bool {
    EMAIL_PATTERN.is_match(email)
}

fn is_valid_input(value: &str) -> bool {
    !value.is_empty() && value.chars().count() <= MAX_INPUT_LENGTH && !value.contains("<script")
}

/// Map a free-form lead status onto the internal values configured in the CRM. Unknown values
/// resolve to an empty string, which leaves the CRM default in place.
pub fn resolve_lead_status(lead_status: Option<&str>) -> &'static str {
    let lead_status = match lead_status {
        Some(status) if !status.is_empty() => status.to_uppercase(),
        _ => return DEFAULT_LEAD_STATUS,
    };

    match lead_status.as_str() {
        "INTERESTED" => "INTERESTED",
        "NOT INTERESTED" | "NOT_INTERESTED" => "NOT_INTERESTED",
        "READY TO ENGAGE" | "READY_TO_ENGAGE" => "READY_TO_ENGAGE",
        "INSTALLED" => "INSTALLED",
        "WANTS ANOTHER SYSTEM" | "WANTS_ANOTHER_SYSTEM" => "WANTS_ANOTHER_SYSTEM",
        _ => "",
    }
}

/// Resolve the display name of a contact field to its internal CRM property name.
pub fn resolve_property_name(display_name: &str) -> Option<&'static str> {
    match display_name.to_lowercase().as_str() {
        "first" | "first name" => Some("firstname"),
        "last" | "last name" => Some("lastname"),
        "salutation" => Some("salutation"),
        "lead status" => Some("hs_lead_status"),
        "address" | "street address" => Some("address"),
        "city" => Some("city"),
        "state" => Some("state"),
        "postcode" | "post code" | "zip" | "zip code" => Some("zip"),
        "country" => Some("country"),
        "email" => Some("email"),
        "phone" | "phone number" => Some("phone"),
        "mobile" | "mobile phone" | "mobile number" => Some("mobilephone"),
        "installationrecordexists" => Some("installationrecordexists"),
        _ => None,
    }
}

/// A set of field changes to apply to an existing contact. Field names are display names.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ContactDiff {
    #[serde(default)]
    pub crmid: Option<String>,
    #[serde(default)]
    pub changes: Option<Vec<FieldChange>>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FieldChange {
    pub name: String,
    pub value: String,
}

impl ContactDiff {
    /// Changes whose name cannot be resolved are skipped.
    pub fn to_properties(&self) -> ContactProperties {
        let mut properties = ContactProperties::new();

        for change in self.changes.iter().flatten() {
            match resolve_property_name(&change.name) {
                Some(property) => properties.add(property, &change.value),
                None => tracing::debug!("ignoring unknown contact field {:?}", change.name),
            }
        }

        properties
    }
}

/// Differences between an existing contact and a conflicting submission, queued for a person to
/// approve or reject.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateReview {
    pub email: String,
    pub changes: Vec<ReviewChange>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewChange {
    pub fieldname: String,
    pub current: Option<String>,
    pub new: Option<String>,
}

impl UpdateReview {
    pub fn new(email: &str) -> Self {
        Self {
            email: email.to_owned(),
            changes: Vec::new(),
        }
    }

    pub fn add_change(&mut self, fieldname: &str, current: Option<&str>, new: Option<&str>) {
        if current == new {
            return;
        }

        self.changes.push(ReviewChange {
            fieldname: fieldname.to_owned(),
            current: current.map(String::from),
            new: new.map(String::from),
        });
    }
}
