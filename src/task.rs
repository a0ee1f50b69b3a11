//! Background conversions with an explicit outcome channel.
//!
//! An upload hook that wants conversion to start without waiting for it
//! hands the request to [`TaskRunner::spawn`]. The conversion runs on the
//! tokio runtime, its progress is mirrored into the shared
//! [`StatusRegistry`], and every ending (report, failed report, panic) is
//! logged and sent as a [`TaskOutcome`] on the runner's channel.

use crate::convert::ConversionCoordinator;
use crate::output::{ConversionReport, ConversionRequest, ConversionState};
use crate::progress::ProgressCallback;
use crate::status::{StatusRegistry, StatusStage};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};
use uuid::Uuid;

/// How one background conversion ended.
#[derive(Debug, Clone)]
pub struct TaskOutcome {
    pub task_id: Uuid,
    /// Status key (the parent module id).
    pub key: String,
    /// `Err` carries the panic message when the task did not finish.
    pub result: Result<ConversionReport, String>,
}

impl TaskOutcome {
    /// Panicked, or finished with a `Failed` report.
    pub fn is_failure(&self) -> bool {
        match &self.result {
            Ok(report) => report.state == ConversionState::Failed,
            Err(_) => true,
        }
    }
}

/// Handle for one spawned conversion.
pub struct TaskHandle {
    pub task_id: Uuid,
    pub join: JoinHandle<()>,
}

pub struct TaskRunner {
    coordinator: Arc<ConversionCoordinator>,
    status: Arc<StatusRegistry>,
    outcomes: mpsc::UnboundedSender<TaskOutcome>,
}

impl TaskRunner {
    /// Runner plus the receiving end of its outcome channel.
    pub fn new(
        coordinator: Arc<ConversionCoordinator>,
        status: Arc<StatusRegistry>,
    ) -> (Self, mpsc::UnboundedReceiver<TaskOutcome>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                coordinator,
                status,
                outcomes: tx,
            },
            rx,
        )
    }

    pub fn status(&self) -> &Arc<StatusRegistry> {
        &self.status
    }

    /// Start converting `request` in the background. Status is tracked under
    /// `request.parent_id`.
    pub fn spawn(&self, request: ConversionRequest) -> TaskHandle {
        let task_id = Uuid::new_v4();
        let key = request.parent_id.clone();
        self.status.begin(&key);
        info!("Task {}: queued conversion of '{}' for {}", task_id, request.document_name, key);

        let coordinator = Arc::clone(&self.coordinator);
        let tracker: ProgressCallback = Arc::new(self.status.tracker(key.clone()));
        let work = tokio::spawn(async move { coordinator.run_observed(&request, Some(tracker)).await });

        let status = Arc::clone(&self.status);
        let outcomes = self.outcomes.clone();
        let join = tokio::spawn(async move {
            let result = match work.await {
                Ok(report) => {
                    if report.state == ConversionState::Failed {
                        error!("Task {}: conversion for {} failed: {}", task_id, key, report.errors.join("; "));
                    } else {
                        info!(
                            "Task {}: {} slide(s) created for {}, next start page {:?}",
                            task_id, report.slides_created, key, report.next_start_page
                        );
                    }
                    Ok(report)
                }
                Err(e) => {
                    let message = panic_message(e);
                    error!("Task {}: conversion for {} aborted: {}", task_id, key, message);
                    status.update(&key, |s| {
                        s.stage = StatusStage::Error;
                        s.error = Some(message.clone());
                    });
                    Err(message)
                }
            };

            let outcome = TaskOutcome { task_id, key, result };
            if outcomes.send(outcome).is_err() {
                debug!("Task {}: outcome receiver dropped", task_id);
            }
        });

        TaskHandle { task_id, join }
    }
}

fn panic_message(e: tokio::task::JoinError) -> String {
    if !e.is_panic() {
        return e.to_string();
    }
    let payload = e.into_panic();
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "task panicked".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use crate::pipeline::input::DocumentSource;
    use crate::store::MemoryStore;

    fn runner() -> (TaskRunner, mpsc::UnboundedReceiver<TaskOutcome>) {
        let store = Arc::new(MemoryStore::with_parent("m1"));
        let config = PipelineConfig::builder().classification(false).build().unwrap();
        let coordinator = Arc::new(ConversionCoordinator::new(config, store.clone(), store));
        TaskRunner::new(coordinator, Arc::new(StatusRegistry::default()))
    }

    #[tokio::test]
    async fn failed_conversion_reaches_the_channel() {
        let (runner, mut rx) = runner();
        let request = ConversionRequest::new("m1", "bad.pdf", DocumentSource::from_bytes(b"hello".to_vec()));
        let handle = runner.spawn(request);
        handle.join.await.unwrap();

        let outcome = rx.recv().await.unwrap();
        assert_eq!(outcome.task_id, handle.task_id);
        assert!(outcome.is_failure());
        let report = outcome.result.unwrap();
        assert!(report.errors[0].contains("not a valid PDF"));

        let status = runner.status().get("m1").unwrap();
        assert_eq!(status.stage, StatusStage::Error);
    }

    #[test]
    fn panic_payloads_are_readable() {
        let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let err = rt.block_on(async { tokio::spawn(async {
            if true {
                panic!("boom")
            }
        }).await.unwrap_err() });
        assert_eq!(panic_message(err), "boom");
    }
}
