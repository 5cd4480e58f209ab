use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use crm_common::events::NewContactPayload;
use crm_common::hubspot::CrmError;
use crm_common::properties::{ContactDiff, NewContact, UpdateReview};
use crm_common::queue::ErrorQueueLogger;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::error::ApiError;

use super::app::{AppState, SOLUTION_NAME};

#[derive(Debug, Default, Deserialize)]
pub struct ContactQuery {
    email: Option<String>,
    hello: Option<String>,
}

/// Job for the installation creator, which also sends the contract once the installation
/// record exists.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallationRequest<'a> {
    #[serde(flatten)]
    pub contact: &'a NewContact,
    pub crmid: String,
    pub send_contract: bool,
}

fn error_logger(state: &AppState, function: &str) -> ErrorQueueLogger {
    ErrorQueueLogger::new(state.error_queue.clone(), SOLUTION_NAME, function)
}

/// Look a contact up by email address.
#[instrument(skip_all)]
pub async fn get(
    State(state): State<AppState>,
    Query(query): Query<ContactQuery>,
) -> Result<Response, ApiError> {
    if let Some(hello) = query.hello.filter(|hello| !hello.is_empty()) {
        return Ok(hello.into_response());
    }

    let email = query
        .email
        .filter(|email| !email.is_empty())
        .ok_or_else(|| ApiError::BadRequest("missing email parameter".to_owned()))?;

    let contact = state.crm.get_contact_by_email(&email, false).await?;

    Ok(Json(NewContactPayload::from(&contact)).into_response())
}

/// Create a contact in the CRM and queue its installation. When the email address is already
/// taken, the differences are queued for review instead of being applied.
#[instrument(skip_all)]
pub async fn create(State(state): State<AppState>, body: Bytes) -> Result<Response, ApiError> {
    let errors = error_logger(&state, "CrmContactCreator");

    if body.is_empty() {
        errors.report("request body is empty").await?;
        return Err(ApiError::BadRequest("empty request body".to_owned()));
    }

    let contact: NewContact = match serde_json::from_slice(&body) {
        Ok(contact) => contact,
        Err(error) => {
            errors
                .report(format!("contact information is not valid: {error}"))
                .await?;
            return Err(ApiError::BadRequest(error.to_string()));
        }
    };

    let properties = match contact.to_properties() {
        Ok(properties) => properties,
        Err(error) => {
            errors.report(&error).await?;
            return Err(CrmError::from(error).into());
        }
    };

    match state.crm.create_contact(&properties).await {
        Ok(created) => {
            info!(contact_id = created.contact_id(), "created contact");

            let installation = InstallationRequest {
                contact: &contact,
                crmid: created.contact_id(),
                send_contract: true,
            };
            state
                .installations_queue
                .push(serde_json::to_string(&installation).map_err(|e| {
                    ApiError::BadRequest(format!("cannot serialize installation request: {e}"))
                })?)
                .await?;

            Ok(Json(NewContactPayload::from(&created)).into_response())
        }
        Err(CrmError::Conflict) => {
            // Existing details are never overwritten blindly: a person approves the changes.
            let existing = state.crm.get_contact_by_email(&contact.email, false).await?;

            let mut review = UpdateReview::new(&contact.email);
            review.add_change(
                "First",
                existing.first_name.current.as_deref(),
                contact.first_name.as_deref(),
            );
            review.add_change(
                "Last",
                existing.last_name.current.as_deref(),
                contact.last_name.as_deref(),
            );
            review.add_change(
                "Phone",
                existing.phone.current.as_deref(),
                contact.phone.as_deref(),
            );

            info!(
                contact_id = existing.contact_id(),
                changes = review.changes.len(),
                "contact exists, queueing changes for review"
            );
            state
                .review_queue
                .push(serde_json::to_string(&review).map_err(|e| {
                    ApiError::BadRequest(format!("cannot serialize update review: {e}"))
                })?)
                .await?;

            Ok(StatusCode::OK.into_response())
        }
        Err(error) => {
            warn!("failed to create contact: {}", error);
            errors
                .report(format!("error creating HubSpot contact: {error}"))
                .await?;
            Err(ApiError::BadRequest(error.to_string()))
        }
    }
}

/// Apply changes to an existing contact. Field names are display names and are resolved to
/// CRM properties; names that do not resolve are ignored.
#[instrument(skip_all)]
pub async fn changes(State(state): State<AppState>, body: Bytes) -> Result<StatusCode, ApiError> {
    let errors = error_logger(&state, "DequeueContactDiffs");

    let diff: ContactDiff = match serde_json::from_slice(&body) {
        Ok(diff) => diff,
        Err(error) => {
            errors
                .report(format!("contact diff is not valid: {error}"))
                .await?;
            return Err(ApiError::BadRequest(error.to_string()));
        }
    };

    let Some(crmid) = diff.crmid.as_deref().filter(|id| !id.is_empty()) else {
        errors.report("crmid not found in contact diff").await?;
        return Err(ApiError::BadRequest("missing crmid".to_owned()));
    };

    let properties = diff.to_properties();
    if properties.is_empty() {
        info!(crmid, "contact diff holds no applicable changes");
        return Ok(StatusCode::OK);
    }

    if let Err(error) = state.crm.update_contact(crmid, &properties).await {
        warn!(crmid, "failed to update contact: {}", error);
        errors
            .report(format!("error updating HubSpot contact {crmid}: {error}"))
            .await?;
        return Err(error.into());
    }

    Ok(StatusCode::OK)
}
