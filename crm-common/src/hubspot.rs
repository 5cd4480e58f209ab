use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, StatusCode};
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::contact::{EnrichedContact, HubSpotContact};
use crate::properties::{ContactError, ContactProperties};

/// Enumeration of errors returned by the CRM, or raised while talking to it.
#[derive(Error, Debug)]
pub enum CrmError {
    #[error("contact not found")]
    NotFound,
    #[error("a contact with that email address already exists")]
    Conflict,
    #[error("CRM responded with {status}: {body}")]
    Status { status: u16, body: String },
    #[error("request to the CRM failed: {0}")]
    Request(#[source] reqwest::Error),
    #[error("failed to parse CRM response: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid contact: {0}")]
    InvalidContact(#[from] ContactError),
    #[error("{0} cannot be used as a CRM base url")]
    InvalidBaseUrl(String),
}

/// The request url carries the API key, so it never makes it into the error.
impl From<reqwest::Error> for CrmError {
    fn from(error: reqwest::Error) -> Self {
        CrmError::Request(error.without_url())
    }
}

/// Read and write access to CRM contacts.
#[async_trait]
pub trait CrmClient: Send + Sync {
    /// Fetch a contact by its CRM id. With `include_history` the previous value of every
    /// tracked field is populated where the CRM knows one.
    async fn get_contact_by_id(
        &self,
        vid: &str,
        include_history: bool,
    ) -> Result<EnrichedContact, CrmError>;

    async fn get_contact_by_email(
        &self,
        email: &str,
        include_history: bool,
    ) -> Result<EnrichedContact, CrmError>;

    /// Create a contact, returning it as stored. Fails with [`CrmError::Conflict`] when the
    /// email address is already taken.
    async fn create_contact(
        &self,
        properties: &ContactProperties,
    ) -> Result<EnrichedContact, CrmError>;

    async fn update_contact(
        &self,
        vid: &str,
        properties: &ContactProperties,
    ) -> Result<(), CrmError>;
}

/// A [`CrmClient`] backed by the HubSpot v1 contacts API.
#[derive(Clone)]
pub struct HubSpotClient {
    client: reqwest::Client,
    base_url: Url,
    api_key: String,
}

impl HubSpotClient {
    pub fn new(base_url: &str, api_key: &str, timeout: Duration) -> Result<Self, CrmError> {
        let base_url =
            Url::parse(base_url).map_err(|_| CrmError::InvalidBaseUrl(base_url.to_owned()))?;
        if base_url.cannot_be_a_base() {
            return Err(CrmError::InvalidBaseUrl(base_url.to_string()));
        }

        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/json"),
        );

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .user_agent("crm-hooks")
            .timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            base_url,
            api_key: api_key.to_owned(),
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, CrmError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| CrmError::InvalidBaseUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(segments);

        Ok(url)
    }

    async fn get_profile(
        &self,
        url: Url,
        include_history: bool,
    ) -> Result<EnrichedContact, CrmError> {
        let property_mode = if include_history {
            "value_and_history"
        } else {
            "value_only"
        };

        let response = self
            .client
            .get(url)
            .query(&[
                ("hapikey", self.api_key.as_str()),
                ("propertyMode", property_mode),
            ])
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => {
                let body = response.text().await?;
                Ok(HubSpotContact::parse(&body)?.into_enriched(include_history))
            }
            StatusCode::NOT_FOUND => Err(CrmError::NotFound),
            status => Err(status_error(status, response).await),
        }
    }
}

async fn status_error(status: StatusCode, response: reqwest::Response) -> CrmError {
    CrmError::Status {
        status: status.as_u16(),
        body: response.text().await.unwrap_or_default(),
    }
}

#[async_trait]
impl CrmClient for HubSpotClient {
    async fn get_contact_by_id(
        &self,
        vid: &str,
        include_history: bool,
    ) -> Result<EnrichedContact, CrmError> {
        debug!(vid, include_history, "fetching contact by id");
        let url = self.endpoint(&["contacts", "v1", "contact", "vid", vid, "profile"])?;
        self.get_profile(url, include_history).await
    }

    async fn get_contact_by_email(
        &self,
        email: &str,
        include_history: bool,
    ) -> Result<EnrichedContact, CrmError> {
        debug!(include_history, "fetching contact by email");
        let url = self.endpoint(&["contacts", "v1", "contact", "email", email, "profile"])?;
        self.get_profile(url, include_history).await
    }

    async fn create_contact(
        &self,
        properties: &ContactProperties,
    ) -> Result<EnrichedContact, CrmError> {
        let url = self.endpoint(&["contacts", "v1", "contact", ""])?;

        let response = self
            .client
            .post(url)
            .query(&[("hapikey", self.api_key.as_str())])
            .json(properties)
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => {
                let body = response.text().await?;
                Ok(HubSpotContact::parse(&body)?.into_enriched(false))
            }
            StatusCode::CONFLICT => Err(CrmError::Conflict),
            status => Err(status_error(status, response).await),
        }
    }

    async fn update_contact(
        &self,
        vid: &str,
        properties: &ContactProperties,
    ) -> Result<(), CrmError> {
        let url = self.endpoint(&["contacts", "v1", "contact", "vid", vid, "profile"])?;

        let response = self
            .client
            .post(url)
            .query(&[("hapikey", self.api_key.as_str())])
            .json(properties)
            .send()
            .await?;

        match response.status() {
            StatusCode::NO_CONTENT | StatusCode::OK => Ok(()),
            StatusCode::NOT_FOUND => Err(CrmError::NotFound),
            status => Err(status_error(status, response).await),
        }
    }
}
