use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde::Deserialize;
use tracing::{debug, error, info, instrument, warn};

use crate::error::ApiError;
use crate::pipeline::BatchReport;
use crate::signature::{self, SIGNATURE_HEADER};

use super::app::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct SignOfLife {
    hello: Option<String>,
}

/// Echo the `hello` parameter so callers can check the service is up.
pub async fn hello(Query(params): Query<SignOfLife>) -> String {
    params
        .hello
        .unwrap_or_else(|| "pass ?hello=<anything> to check this endpoint".to_owned())
}

/// Checks the HubSpot signature of a request. Skipped when no client secret is configured.
pub fn verify_signature(
    client_secret: Option<&str>,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<(), ApiError> {
    let Some(client_secret) = client_secret else {
        debug!("no client secret configured, skipping signature validation");
        return Ok(());
    };

    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok())
        .ok_or(ApiError::InvalidSignature)?;

    if signature::is_valid(client_secret, body, signature) {
        Ok(())
    } else {
        warn!("rejecting contact events with an invalid signature");
        Err(ApiError::InvalidSignature)
    }
}

/// Curate, enrich and publish a batch of contact change notifications before answering.
#[instrument(skip_all)]
pub async fn post(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<BatchReport>, ApiError> {
    verify_signature(state.client_secret.as_deref(), &headers, &body)?;

    let report = state.pipeline.process(&body).await?;

    Ok(Json(report))
}

/// Hand a batch to the intake queue and answer straight away. The body is queued exactly as
/// signed, so anything that is not UTF-8 is turned away here.
#[instrument(skip_all)]
pub async fn enqueue(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    verify_signature(state.client_secret.as_deref(), &headers, &body)?;

    let bytes = body.len();
    let body = String::from_utf8(body.to_vec()).map_err(|e| {
        error!("rejecting contact events that are not valid UTF-8: {}", e);
        ApiError::BadRequest("request body is not valid UTF-8".to_owned())
    })?;

    state.intake.push(body).await?;
    info!(queue = state.intake.name(), bytes, "queued contact events");

    Ok(StatusCode::ACCEPTED)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use assert_json_diff::assert_json_include;
    use axum::body::Body;
    use axum::http::{self, Request};
    use crm_common::event_grid::Topic;
    use crm_common::queue::{self, MemoryQueue, ERROR_QUEUE, INTAKE_QUEUE};
    use http_body_util::BodyExt; // for `collect`
    use serde_json::{json, Value};
    use tower::ServiceExt; // for `call`, `oneshot`, and `ready`

    use super::*;
    use crate::enrich::tests::FakeCrm;
    use crate::handlers::app::{app, tests::state};
    use crate::publish::tests::FakeBus;

    const BATCH: &str = r#"[
        {"objectId": 451, "eventId": 1, "subscriptionType": "contact.creation"},
        {"objectId": 451, "eventId": 2, "subscriptionType": "contact.propertyChange", "propertyName": "phone"}
    ]"#;

    fn post_events(uri: &str, body: &str, signature: Option<&str>) -> Request<Body> {
        let mut request = Request::builder()
            .method(http::Method::POST)
            .uri(uri)
            .header(http::header::CONTENT_TYPE, "application/json");
        if let Some(signature) = signature {
            request = request.header(SIGNATURE_HEADER, signature);
        }

        request.body(Body::from(body.to_owned())).unwrap()
    }

    #[tokio::test]
    async fn echoes_sign_of_life() {
        let (state, _) = state(FakeCrm::default(), FakeBus::default(), None);

        let response = app(state, None)
            .oneshot(
                Request::builder()
                    .uri("/contact-events?hello=there")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"there");
    }

    #[tokio::test]
    async fn processes_contact_events() {
        let bus = Arc::new(FakeBus::default());
        let (state, _) = state(FakeCrm::with_contacts(&["451"]), bus.clone(), None);

        let response = app(state, None)
            .oneshot(post_events("/contact-events", BATCH, None))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let report: Value = serde_json::from_slice(&body).unwrap();
        assert_json_include!(
            actual: report,
            expected: json!({
                "received": 2,
                "malformed": false,
                "curated": 1,
                "published": {
                    "created": {"outcome": "published", "count": 1, "status": 200},
                    "updated": {"outcome": "skipped"}
                }
            })
        );
        assert_eq!(bus.batches()[0].0, Topic::NewContact);
    }

    #[tokio::test]
    async fn answers_malformed_batches_with_success() {
        let (state, errors) = state(FakeCrm::default(), FakeBus::default(), None);

        let response = app(state, None)
            .oneshot(post_events("/contact-events", "{\"not\": \"an array\"}", None))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(errors.messages().len(), 1);
    }

    #[tokio::test]
    async fn rejects_invalid_signatures() {
        let (state, _) = state(FakeCrm::default(), FakeBus::default(), Some("secret"));

        let response = app(state.clone(), None)
            .oneshot(post_events("/contact-events", BATCH, Some("deadbeef")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = app(state, None)
            .oneshot(post_events("/contact-events/queue", BATCH, None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn accepts_signed_batches() {
        let (state, _) = state(
            FakeCrm::with_contacts(&["451"]),
            FakeBus::default(),
            Some("secret"),
        );
        let signature = signature::sign("secret", BATCH.as_bytes());

        let response = app(state, None)
            .oneshot(post_events("/contact-events", BATCH, Some(&signature)))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn fails_when_errors_cannot_be_reported() {
        let (mut state, _) = state(FakeCrm::default(), FakeBus::default(), None);
        state.pipeline = crate::pipeline::tests::pipeline(
            Arc::new(FakeCrm::default()),
            Arc::new(FakeBus::default()),
            Arc::new(MemoryQueue::closed(ERROR_QUEUE)),
        );

        let response = app(state, None)
            .oneshot(post_events("/contact-events", "[]garbage", None))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn queues_batches_for_later() {
        let (mut state, _) = state(FakeCrm::default(), FakeBus::default(), None);
        let (intake, mut receiver) = queue::channel(INTAKE_QUEUE, 1);
        state.intake = Arc::new(intake);

        let response = app(state.clone(), None)
            .oneshot(post_events("/contact-events/queue", BATCH, None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert_eq!(receiver.recv().await.as_deref(), Some(BATCH));

        drop(receiver);
        let response = app(state, None)
            .oneshot(post_events("/contact-events/queue", BATCH, None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn refuses_to_queue_bodies_that_are_not_utf8() {
        let (mut state, _) = state(FakeCrm::default(), FakeBus::default(), None);
        let (intake, mut receiver) = queue::channel(INTAKE_QUEUE, 1);
        state.intake = Arc::new(intake);

        let response = app(state, None)
            .oneshot(
                Request::builder()
                    .method(http::Method::POST)
                    .uri("/contact-events/queue")
                    .body(Body::from(vec![b'[', 0xff, 0xfe, b']']))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(receiver.try_recv().is_err());
    }
}
