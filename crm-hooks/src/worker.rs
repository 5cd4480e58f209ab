use tokio::sync::mpsc;
use tracing::{error, info};

use crate::pipeline::ContactEventPipeline;

/// Consumes raw contact event batches from the intake queue, one batch at a time.
pub struct ContactEventWorker {
    pipeline: ContactEventPipeline,
    receiver: mpsc::Receiver<String>,
}

impl ContactEventWorker {
    pub fn new(pipeline: ContactEventPipeline, receiver: mpsc::Receiver<String>) -> Self {
        Self { pipeline, receiver }
    }

    /// Run until every sender of the intake queue has been dropped.
    pub async fn run(mut self) {
        while let Some(body) = self.receiver.recv().await {
            match self.pipeline.process(body.as_bytes()).await {
                Ok(report) => info!(
                    received = report.received,
                    curated = report.curated,
                    "processed queued contact events"
                ),
                Err(error) => error!(
                    stage = %error.stage,
                    "failed to process queued contact events: {}",
                    error
                ),
            }
        }

        info!("intake queue closed, stopping contact event worker");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crm_common::event_grid::Topic;
    use crm_common::queue::{self, MemoryQueue, MessageQueue, ERROR_QUEUE, INTAKE_QUEUE};

    use super::*;
    use crate::enrich::tests::FakeCrm;
    use crate::pipeline::tests::pipeline;
    use crate::publish::tests::FakeBus;

    #[tokio::test]
    async fn processes_queued_batches_until_closed() {
        let bus = Arc::new(FakeBus::default());
        let errors = Arc::new(MemoryQueue::new(ERROR_QUEUE));
        let pipeline = pipeline(
            Arc::new(FakeCrm::with_contacts(&["451", "700"])),
            bus.clone(),
            errors.clone(),
        );
        let (intake, receiver) = queue::channel(INTAKE_QUEUE, 4);

        let bodies = [
            r#"[{"objectId": 451, "eventId": 1, "subscriptionType": "contact.creation"}]"#,
            "garbage",
            r#"[{
                "objectId": 700,
                "eventId": 2,
                "subscriptionType": "contact.propertyChange",
                "propertyName": "email"
            }]"#,
        ];
        for body in bodies {
            intake.push(body.to_owned()).await.unwrap();
        }
        drop(intake);

        ContactEventWorker::new(pipeline, receiver).run().await;

        let topics: Vec<Topic> = bus.batches().into_iter().map(|(topic, _)| topic).collect();
        assert_eq!(topics, vec![Topic::NewContact, Topic::UpdatedContact]);
        assert_eq!(errors.messages().len(), 1);
    }
}
