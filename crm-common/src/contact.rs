//! Contacts as they are read back from the CRM.
//!
//! HubSpot answers contact lookups with a loosely shaped document where every property is an
//! object holding a `value` and, optionally, its `versions` (newest first). That document is
//! parsed once into [`HubSpotContact`] and immediately folded into an [`EnrichedContact`], which
//! is the only contact shape the rest of the workspace deals with.
use std::collections::HashMap;

use serde::{Deserialize, Deserializer};

/// Width of the zero-padded contact identifier handed to downstream systems.
pub const CONTACT_ID_WIDTH: usize = 6;

const ADDRESS_PROPERTIES: [&str; 4] = ["address", "city", "state", "zip"];

/// Left-pad a CRM contact id with zeros, e.g. `451` becomes `000451`.
pub fn pad_contact_id(vid: &str) -> String {
    format!("{:0>width$}", vid, width = CONTACT_ID_WIDTH)
}

/// The current value of a contact field and, when history was requested and known, the value
/// it held before the latest change.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackedValue {
    pub current: Option<String>,
    pub previous: Option<String>,
}

impl TrackedValue {
    pub fn new(current: Option<&str>) -> Self {
        Self {
            current: current.map(String::from),
            previous: None,
        }
    }

    pub fn with_previous(current: Option<&str>, previous: Option<&str>) -> Self {
        Self {
            current: current.map(String::from),
            previous: previous.map(String::from),
        }
    }

    /// The value before the latest change, falling back to the current value when no earlier
    /// version is known. Missing history therefore reads as "unchanged".
    pub fn previous_or_current(&self) -> Option<String> {
        self.previous.clone().or_else(|| self.current.clone())
    }
}

/// Full state of a CRM contact, fetched fresh for every curated event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnrichedContact {
    /// The CRM's own identifier (HubSpot "vid"), unpadded.
    pub vid: String,
    pub rest_uri: String,
    pub first_name: TrackedValue,
    pub last_name: TrackedValue,
    pub preferred_name: TrackedValue,
    pub phone: TrackedValue,
    pub email: TrackedValue,
    pub customer_address: TrackedValue,
    pub job_title: TrackedValue,
    pub lead_status: TrackedValue,
    /// Set by other apps to suppress the creation of an installation record.
    pub installation_record_exists: bool,
}

impl EnrichedContact {
    pub fn contact_id(&self) -> String {
        pad_contact_id(&self.vid)
    }
}

/// Contact document returned by the HubSpot v1 contacts API.
#[derive(Debug, Deserialize)]
pub struct HubSpotContact {
    #[serde(deserialize_with = "deserialize_id")]
    pub vid: String,
    #[serde(rename = "profile-url", default)]
    pub profile_url: String,
    #[serde(default)]
    pub properties: HashMap<String, HubSpotProperty>,
}

#[derive(Debug, Default, Deserialize)]
pub struct HubSpotProperty {
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub versions: Vec<HubSpotPropertyVersion>,
}

#[derive(Debug, Deserialize)]
pub struct HubSpotPropertyVersion {
    #[serde(default)]
    pub value: Option<String>,
}

impl HubSpotProperty {
    /// Versions are listed newest first, so the value prior to the latest change sits at index 1.
    fn previous_value(&self) -> Option<&str> {
        self.versions.get(1).and_then(|v| v.value.as_deref())
    }
}

impl HubSpotContact {
    pub fn parse(body: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(body)
    }

    fn tracked(&self, name: &str, include_history: bool) -> TrackedValue {
        let property = self.properties.get(name);
        let current = property.and_then(|p| p.value.as_deref());
        let previous = if include_history {
            property.and_then(HubSpotProperty::previous_value)
        } else {
            None
        };

        TrackedValue::with_previous(current, previous)
    }

    fn customer_address(&self, include_history: bool) -> TrackedValue {
        let parts: Vec<TrackedValue> = ADDRESS_PROPERTIES
            .iter()
            .map(|name| self.tracked(name, include_history))
            .collect();

        let current = assemble_customer_address(
            parts[0].current.as_deref(),
            parts[1].current.as_deref(),
            parts[2].current.as_deref(),
            parts[3].current.as_deref(),
        );

        let previous = parts.iter().any(|p| p.previous.is_some()).then(|| {
            let previous: Vec<Option<String>> =
                parts.iter().map(TrackedValue::previous_or_current).collect();
            assemble_customer_address(
                previous[0].as_deref(),
                previous[1].as_deref(),
                previous[2].as_deref(),
                previous[3].as_deref(),
            )
        });

        TrackedValue {
            current: Some(current).filter(|address| !address.is_empty()),
            previous,
        }
    }

    /// Fold the raw document into an [`EnrichedContact`]. Previous values are only populated
    /// when `include_history` is set.
    pub fn into_enriched(self, include_history: bool) -> EnrichedContact {
        let installation_record_exists = self
            .properties
            .get("installationrecordexists")
            .and_then(|p| p.value.as_deref())
            .map_or(false, |v| v.eq_ignore_ascii_case("true"));

        EnrichedContact {
            first_name: self.tracked("firstname", include_history),
            last_name: self.tracked("lastname", include_history),
            preferred_name: self.tracked("preferred_name", include_history),
            phone: self.tracked("phone", include_history),
            email: self.tracked("email", include_history),
            customer_address: self.customer_address(include_history),
            job_title: self.tracked("jobtitle", include_history),
            lead_status: self.tracked("hs_lead_status", include_history),
            installation_record_exists,
            rest_uri: self.profile_url,
            vid: self.vid,
        }
    }
}

/// Build a single-string postal address. Missing components leave no stray separators behind:
/// street and city each end their own line, state and postcode share the last one.
pub fn assemble_customer_address(
    street: Option<&str>,
    city: Option<&str>,
    state: Option<&str>,
    postcode: Option<&str>,
) -> String {
    let mut address = String::new();

    for line in [street, city].into_iter().flatten() {
        if !line.is_empty() {
            address.push_str(line);
            address.push('\n');
        }
    }

    let state = state.unwrap_or_default();
    let postcode = postcode.unwrap_or_default();

    address.push_str(state);
    if !state.is_empty() && !postcode.is_empty() {
        address.push(' ');
    }
    address.push_str(postcode);

    address
}

#[derive(Deserialize)]
#[serde(untagged)]
enum IdRepr {
    Text(String),
    Number(u64),
}

/// HubSpot sends object and event ids as JSON numbers, other senders as strings.
pub fn deserialize_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match IdRepr::deserialize(deserializer)? {
        IdRepr::Text(id) => id,
        IdRepr::Number(id) => id.to_string(),
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) const PROFILE: &str = r#"{
        "vid": 451,
        "profile-url": "https://app.hubspot.com/contacts/5618470/contact/451",
        "properties": {
            "firstname": {"value": "Ada", "versions": [{"value": "Ada"}, {"value": "Adah"}]},
            "lastname": {"value": "Lovelace", "versions": [{"value": "Lovelace"}]},
            "phone": {"value": "12345", "versions": [{"value": "12345"}, {"value": "0400 000 000"}]},
            "email": {"value": "ada@example.com"},
            "address": {"value": "18 Example Place"},
            "city": {"value": "Perth", "versions": [{"value": "Perth"}, {"value": "Fremantle"}]},
            "state": {"value": "WA"},
            "zip": {"value": "6000"},
            "hs_lead_status": {"value": "READY_TO_ENGAGE"},
            "installationrecordexists": {"value": "true"}
        }
    }"#;

    #[test]
    fn pads_contact_ids() {
        assert_eq!(pad_contact_id("451"), "000451");
        assert_eq!(pad_contact_id("1234567"), "1234567");
    }

    #[test]
    fn assembles_addresses_without_stray_separators() {
        assert_eq!(
            assemble_customer_address(
                Some("18 Example Place"),
                Some("Perth"),
                Some("WA"),
                Some("6000")
            ),
            "18 Example Place\nPerth\nWA 6000"
        );
        assert_eq!(
            assemble_customer_address(None, Some("Perth"), Some("WA"), None),
            "Perth\nWA"
        );
        assert_eq!(assemble_customer_address(Some(""), None, None, Some("6000")), "6000");
        assert_eq!(assemble_customer_address(None, None, None, None), "");
    }

    #[test]
    fn parses_numeric_and_text_ids() {
        let contact = HubSpotContact::parse(r#"{"vid": "77"}"#).unwrap();
        assert_eq!(contact.vid, "77");

        let contact = HubSpotContact::parse(r#"{"vid": 77, "properties": {}}"#).unwrap();
        assert_eq!(contact.vid, "77");
    }

    #[test]
    fn enriches_without_history() {
        let contact = HubSpotContact::parse(PROFILE).unwrap().into_enriched(false);

        assert_eq!(contact.contact_id(), "000451");
        assert_eq!(contact.first_name, TrackedValue::new(Some("Ada")));
        assert_eq!(contact.phone.previous, None);
        assert_eq!(
            contact.customer_address.current.as_deref(),
            Some("18 Example Place\nPerth\nWA 6000")
        );
        assert_eq!(contact.customer_address.previous, None);
        assert!(contact.installation_record_exists);
        assert_eq!(contact.preferred_name, TrackedValue::default());
    }

    #[test]
    fn enriches_with_history() {
        let contact = HubSpotContact::parse(PROFILE).unwrap().into_enriched(true);

        assert_eq!(contact.first_name.previous.as_deref(), Some("Adah"));
        assert_eq!(contact.phone.previous.as_deref(), Some("0400 000 000"));
        // A single version means there is nothing earlier to report.
        assert_eq!(contact.last_name.previous, None);
        assert_eq!(contact.last_name.previous_or_current().as_deref(), Some("Lovelace"));
        assert_eq!(
            contact.customer_address.previous.as_deref(),
            Some("18 Example Place\nFremantle\nWA 6000")
        );
    }
}
