use std::sync::Arc;

use axum::{routing, Router};
use crm_common::hubspot::CrmClient;
use crm_common::metrics::{add_metrics_route, track_metrics};
use crm_common::queue::MessageQueue;
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::trace::TraceLayer;

use crate::pipeline::ContactEventPipeline;

use super::{contacts, webhook};

pub const SOLUTION_NAME: &str = "CrmUpdateHandler";

#[derive(Clone)]
pub struct AppState {
    pub pipeline: ContactEventPipeline,
    pub crm: Arc<dyn CrmClient>,
    pub intake: Arc<dyn MessageQueue>,
    pub error_queue: Arc<dyn MessageQueue>,
    pub review_queue: Arc<dyn MessageQueue>,
    pub installations_queue: Arc<dyn MessageQueue>,
    pub client_secret: Option<String>,
}

pub fn app(state: AppState, metrics: Option<PrometheusHandle>) -> Router {
    let router = Router::new()
        .route("/", routing::get(index))
        .route(
            "/contact-events",
            routing::get(webhook::hello).post(webhook::post),
        )
        .route("/contact-events/queue", routing::post(webhook::enqueue))
        .route(
            "/contacts",
            routing::get(contacts::get).post(contacts::create),
        )
        .route("/contacts/changes", routing::post(contacts::changes))
        .with_state(state);

    add_metrics_route(router, metrics)
        .layer(TraceLayer::new_for_http())
        .layer(axum::middleware::from_fn(track_metrics))
}

pub async fn index() -> &'static str {
    "crm-hooks"
}
