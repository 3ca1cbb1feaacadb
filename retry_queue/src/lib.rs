mod backoff;
mod item;
mod scheduler;
mod store;

pub use backoff::backoff_delay;
pub use item::{
    AttemptOutcome, DicomTransmission, NewTransmission, OperationKind, TransmissionStatus,
};
pub use scheduler::{Scheduler, TransmissionSender};

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use store::SpoolStore;
use tracing::{info, warn};
use xrc_config::RetrySettings;
use xrc_event_bus::{ConsoleEvent, EventBus, Severity};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Spool IO error: {0}")]
    IO(#[from] std::io::Error),
    #[error("Spool record encoding error: {0}")]
    Encode(String),
    #[error("Unknown transmission id: {0}")]
    UnknownTransmission(String),
    #[error("Transmission {0} is {1:?}, the requested change does not apply")]
    InvalidStatus(String, TransmissionStatus),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Durable FIFO of outbound DICOM transmissions.
///
/// Enqueue persists the item before returning. Attempt state changes are
/// written to the spool before the corresponding event publishes. Terminal
/// `Failed` items are retained; nothing deletes them automatically.
pub struct RetryQueue {
    store: SpoolStore,
    settings: RetrySettings,
    bus: Arc<EventBus>,
    items: RwLock<HashMap<String, DicomTransmission>>,
    seq: AtomicU64,
}

impl RetryQueue {
    /// Opens the spool and recovers interrupted state.
    ///
    /// Items found `InFlight` were being sent when the process died; they
    /// come back as `Retrying`, due immediately, reusing their original
    /// dataset and SOP Instance UID.
    pub fn open<P: AsRef<std::path::Path>>(
        dir: P,
        settings: RetrySettings,
        bus: Arc<EventBus>,
    ) -> Result<Self> {
        let store = SpoolStore::open(dir)?;
        let mut items = HashMap::new();
        let mut max_seq = 0u64;
        for mut item in store.load_all()? {
            if let Some(n) = parse_seq(&item.id) {
                max_seq = max_seq.max(n);
            }
            if item.status == TransmissionStatus::InFlight {
                warn!(
                    "Recovering in-flight transmission {} as retrying",
                    item.id
                );
                item.status = TransmissionStatus::Retrying;
                item.next_retry_at = Utc::now();
                store.save(&item)?;
            }
            items.insert(item.id.clone(), item);
        }
        info!("Retry queue opened with {} items", items.len());
        Ok(Self {
            store,
            settings,
            bus,
            items: RwLock::new(items),
            seq: AtomicU64::new(max_seq),
        })
    }

    /// Adds a transmission; the spool record is durable before this returns.
    pub fn enqueue(&self, new: NewTransmission) -> Result<DicomTransmission> {
        let seq = self.seq.fetch_add(1, Ordering::SeqCst) + 1;
        let item = DicomTransmission {
            id: format!("tx-{seq:08}"),
            operation: new.operation,
            destination: new.destination,
            dataset_ref: new.dataset_ref,
            sop_class_uid: new.sop_class_uid,
            sop_instance_uid: new.sop_instance_uid,
            correlation_id: new.correlation_id,
            attempts: 0,
            last_attempt_at: None,
            next_retry_at: Utc::now(),
            status: TransmissionStatus::Pending,
            last_error: None,
            created_at: Utc::now(),
        };
        self.store.save(&item)?;
        self.items
            .write()
            .unwrap()
            .insert(item.id.clone(), item.clone());
        Ok(item)
    }

    /// Items due for an attempt, oldest first.
    pub fn due(&self, now: DateTime<Utc>) -> Vec<DicomTransmission> {
        let items = self.items.read().unwrap();
        let mut due: Vec<DicomTransmission> = items
            .values()
            .filter(|i| {
                matches!(
                    i.status,
                    TransmissionStatus::Pending | TransmissionStatus::Retrying
                ) && i.next_retry_at <= now
            })
            .cloned()
            .collect();
        due.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        due
    }

    /// Marks the start of an attempt.
    pub fn mark_in_flight(&self, id: &str) -> Result<DicomTransmission> {
        self.update(id, |item| {
            if item.status.is_terminal() || item.status == TransmissionStatus::InFlight {
                return Err(Error::InvalidStatus(item.id.clone(), item.status));
            }
            item.status = TransmissionStatus::InFlight;
            item.attempts += 1;
            item.last_attempt_at = Some(Utc::now());
            Ok(())
        })
    }

    /// Records the result of an attempt and publishes the matching events.
    ///
    /// The spool write happens before any event publishes. Exactly one
    /// operator notification is raised when an item turns terminally failed.
    pub fn complete(&self, id: &str, outcome: AttemptOutcome) -> Result<DicomTransmission> {
        let item = self.update(id, |item| {
            if item.status != TransmissionStatus::InFlight {
                return Err(Error::InvalidStatus(item.id.clone(), item.status));
            }
            match &outcome {
                AttemptOutcome::Success | AttemptOutcome::SuccessWithWarning(_) => {
                    item.status = TransmissionStatus::Succeeded;
                    item.last_error = None;
                }
                AttemptOutcome::Retryable(reason) => {
                    item.last_error = Some(reason.clone());
                    if item.attempts >= self.settings.max_attempts {
                        item.status = TransmissionStatus::Failed;
                    } else {
                        item.status = TransmissionStatus::Retrying;
                        let delay = backoff_delay(&self.settings, item.attempts);
                        let base = item.last_attempt_at.unwrap_or_else(Utc::now);
                        item.next_retry_at = base
                            + chrono::Duration::from_std(delay)
                                .unwrap_or_else(|_| chrono::Duration::seconds(30));
                    }
                }
                AttemptOutcome::Terminal(reason) => {
                    item.last_error = Some(reason.clone());
                    item.status = TransmissionStatus::Failed;
                }
            }
            Ok(())
        })?;
        match (&item.status, &outcome) {
            (TransmissionStatus::Succeeded, AttemptOutcome::SuccessWithWarning(warning)) => {
                self.bus.publish(ConsoleEvent::TransmissionSucceeded {
                    transmission_id: item.id.clone(),
                    destination: item.destination.name.clone(),
                });
                self.bus.publish(ConsoleEvent::OperatorNotification {
                    severity: Severity::Warning,
                    code: "TRANSMISSION_WARNING".to_string(),
                    detail: format!("{} stored with warning: {}", item.id, warning),
                });
            }
            (TransmissionStatus::Succeeded, _) => {
                self.bus.publish(ConsoleEvent::TransmissionSucceeded {
                    transmission_id: item.id.clone(),
                    destination: item.destination.name.clone(),
                });
            }
            (TransmissionStatus::Failed, _) => {
                let reason = item.last_error.clone().unwrap_or_default();
                self.bus.publish(ConsoleEvent::TransmissionFailed {
                    transmission_id: item.id.clone(),
                    destination: item.destination.name.clone(),
                    reason: reason.clone(),
                });
                self.bus.publish(ConsoleEvent::OperatorNotification {
                    severity: Severity::Alert,
                    code: "TRANSMISSION_FAILED".to_string(),
                    detail: format!("{} failed terminally: {}", item.id, reason),
                });
            }
            _ => {}
        }
        Ok(item)
    }

    pub fn get(&self, id: &str) -> Option<DicomTransmission> {
        self.items.read().unwrap().get(id).cloned()
    }

    pub fn with_status(&self, status: TransmissionStatus) -> Vec<DicomTransmission> {
        let mut matching: Vec<DicomTransmission> = self
            .items
            .read()
            .unwrap()
            .values()
            .filter(|i| i.status == status)
            .cloned()
            .collect();
        matching.sort_by(|a, b| a.id.cmp(&b.id));
        matching
    }

    fn update<F>(&self, id: &str, mutate: F) -> Result<DicomTransmission>
    where
        F: FnOnce(&mut DicomTransmission) -> Result<()>,
    {
        let mut items = self.items.write().unwrap();
        let item = items
            .get_mut(id)
            .ok_or_else(|| Error::UnknownTransmission(id.to_string()))?;
        mutate(item)?;
        self.store.save(item)?;
        Ok(item.clone())
    }
}

fn parse_seq(id: &str) -> Option<u64> {
    id.strip_prefix("tx-").and_then(|n| n.parse().ok())
}
