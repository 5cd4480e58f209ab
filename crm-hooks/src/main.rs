//! Serve the CRM contact webhooks and run the queued contact event worker.
use std::sync::Arc;

use axum::Router;
use envconfig::Envconfig;
use eyre::Result;
use tracing_subscriber::EnvFilter;

use crm_common::event_grid::{EventBus, EventGridClient, TopicEndpoint};
use crm_common::hubspot::{CrmClient, HubSpotClient};
use crm_common::metrics::setup_metrics_recorder;
use crm_common::queue::{
    self, ErrorQueueLogger, LogQueue, MessageQueue, ERROR_QUEUE, INSTALLATIONS_QUEUE,
    INTAKE_QUEUE, UPDATE_REVIEW_QUEUE,
};
use crm_hooks::config::Config;
use crm_hooks::handlers::{app, AppState, SOLUTION_NAME};
use crm_hooks::pipeline::ContactEventPipeline;
use crm_hooks::time::SystemTime;
use crm_hooks::translate::Translator;
use crm_hooks::worker::ContactEventWorker;

async fn listen(app: Router, bind: String) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;

    axum::serve(listener, app).await?;

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = Config::init_from_env()?;
    let timeout = config.request_timeout.0;

    let crm: Arc<dyn CrmClient> = Arc::new(HubSpotClient::new(
        &config.hubspot_api_url,
        &config.hubspot_api_key,
        timeout,
    )?);
    let bus: Arc<dyn EventBus> = Arc::new(EventGridClient::new(
        TopicEndpoint::new(
            &config.new_contact_topic_endpoint,
            &config.new_contact_topic_key,
        ),
        TopicEndpoint::new(
            &config.updated_contact_topic_endpoint,
            &config.updated_contact_topic_key,
        ),
        timeout,
    )?);
    let error_queue: Arc<dyn MessageQueue> = Arc::new(LogQueue::new(ERROR_QUEUE));

    let pipeline = ContactEventPipeline::new(
        crm.clone(),
        bus,
        Translator::new(&config.event_subject_prefix, Arc::new(SystemTime {})),
        ErrorQueueLogger::new(error_queue.clone(), SOLUTION_NAME, "ContactEvents"),
        config.max_concurrent_fetches,
    );

    let (intake, receiver) = queue::channel(INTAKE_QUEUE, config.intake_queue_capacity.get());
    tokio::spawn(ContactEventWorker::new(pipeline.clone(), receiver).run());

    let metrics = if config.export_prometheus {
        Some(setup_metrics_recorder()?)
    } else {
        None
    };

    let state = AppState {
        pipeline,
        crm,
        intake: Arc::new(intake),
        error_queue,
        review_queue: Arc::new(LogQueue::new(UPDATE_REVIEW_QUEUE)),
        installations_queue: Arc::new(LogQueue::new(INSTALLATIONS_QUEUE)),
        client_secret: config.hubspot_client_secret.clone(),
    };

    tracing::info!("listening on {}", config.bind());
    listen(app(state, metrics), config.bind()).await
}
