use crate::item::{AttemptOutcome, DicomTransmission};
use crate::RetryQueue;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error};

/// Delivery seam the DICOM transport implements.
///
/// The scheduler never learns DICOM; it only understands the outcome
/// classification.
#[async_trait]
pub trait TransmissionSender: Send + Sync {
    async fn send(&self, item: &DicomTransmission) -> AttemptOutcome;
}

/// Background driver of the retry queue.
///
/// Wakes on a fixed tick, claims due items one at a time, hands each to the
/// sender and records the outcome. A single worker keeps per-destination
/// ordering; concurrency lives inside the transport's association pool.
pub struct Scheduler {
    queue: Arc<RetryQueue>,
    sender: Arc<dyn TransmissionSender>,
    tick: Duration,
}

impl Scheduler {
    pub fn new(queue: Arc<RetryQueue>, sender: Arc<dyn TransmissionSender>) -> Self {
        Self {
            queue,
            sender,
            tick: Duration::from_secs(1),
        }
    }

    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    /// Runs until `stop` turns true or its sender is dropped.
    pub fn spawn(self, mut stop: watch::Receiver<bool>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                if *stop.borrow() {
                    return;
                }
                for item in self.queue.due(chrono::Utc::now()) {
                    if *stop.borrow() {
                        return;
                    }
                    let claimed = match self.queue.mark_in_flight(&item.id) {
                        Ok(claimed) => claimed,
                        Err(e) => {
                            debug!("Skipping {}: {}", item.id, e);
                            continue;
                        }
                    };
                    let outcome = self.sender.send(&claimed).await;
                    if let Err(e) = self.queue.complete(&claimed.id, outcome) {
                        error!("Failed to record attempt outcome for {}: {}", claimed.id, e);
                    }
                }
                tokio::select! {
                    _ = tokio::time::sleep(self.tick) => {}
                    changed = stop.changed() => {
                        if changed.is_err() || *stop.borrow() {
                            return;
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::{NewTransmission, OperationKind, TransmissionStatus};
    use std::sync::Mutex;
    use xrc_config::{Destination, RetrySettings};
    use xrc_event_bus::EventBus;

    struct ScriptedSender {
        outcomes: Mutex<Vec<AttemptOutcome>>,
    }

    #[async_trait]
    impl TransmissionSender for ScriptedSender {
        async fn send(&self, _item: &DicomTransmission) -> AttemptOutcome {
            self.outcomes
                .lock()
                .unwrap()
                .pop()
                .unwrap_or(AttemptOutcome::Success)
        }
    }

    fn new_transmission() -> NewTransmission {
        NewTransmission {
            operation: OperationKind::CStore,
            destination: Destination {
                name: "pacs1".to_string(),
                aet: "PACS".to_string(),
                host: "10.0.0.5".to_string(),
                port: 11112,
                tls: false,
                mutual_tls: false,
                send_gsps: false,
            },
            dataset_ref: std::path::PathBuf::from("/spool/data/x.dcm"),
            sop_class_uid: "1.2.840.10008.5.1.4.1.1.1.1".to_string(),
            sop_instance_uid: "1.2.3.1".to_string(),
            correlation_id: "corr-1".to_string(),
        }
    }

    #[tokio::test]
    async fn scheduler_delivers_pending_items() {
        let dir = tempfile::tempdir().unwrap();
        let queue = Arc::new(
            RetryQueue::open(dir.path(), RetrySettings::default(), Arc::new(EventBus::new()))
                .unwrap(),
        );
        let item = queue.enqueue(new_transmission()).unwrap();
        let sender = Arc::new(ScriptedSender {
            outcomes: Mutex::new(vec![AttemptOutcome::Success]),
        });
        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = Scheduler::new(queue.clone(), sender)
            .with_tick(Duration::from_millis(20))
            .spawn(stop_rx);
        for _ in 0..100 {
            if queue.get(&item.id).unwrap().status == TransmissionStatus::Succeeded {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(
            queue.get(&item.id).unwrap().status,
            TransmissionStatus::Succeeded
        );
        stop_tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn retry_then_success_counts_two_attempts() {
        let dir = tempfile::tempdir().unwrap();
        let settings = RetrySettings {
            initial_ms: 20,
            multiplier: 2.0,
            max_ms: 100,
            max_attempts: 5,
        };
        let queue = Arc::new(
            RetryQueue::open(dir.path(), settings, Arc::new(EventBus::new())).unwrap(),
        );
        let item = queue.enqueue(new_transmission()).unwrap();
        // Outcomes pop from the back: first a resource failure, then success.
        let sender = Arc::new(ScriptedSender {
            outcomes: Mutex::new(vec![
                AttemptOutcome::Success,
                AttemptOutcome::Retryable("0xA700".to_string()),
            ]),
        });
        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = Scheduler::new(queue.clone(), sender)
            .with_tick(Duration::from_millis(10))
            .spawn(stop_rx);
        for _ in 0..200 {
            if queue.get(&item.id).unwrap().status == TransmissionStatus::Succeeded {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let done = queue.get(&item.id).unwrap();
        assert_eq!(done.status, TransmissionStatus::Succeeded);
        assert_eq!(done.attempts, 2);
        stop_tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
