mod cli;

pub use cli::{Cli, GeneratorCli};

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};
use xrc_common::uid::UidGenerator;
use xrc_config::{Config, Destination};
use xrc_dicom_net::{CommitmentTracker, CommittedSop, DicomTransport, UlLinkFactory, WorklistQuery};
use xrc_dose::DoseTracker;
use xrc_event_bus::EventBus;
use xrc_hardware::sim::{SimAec, SimDetector, SimGenerator, SimInterlocks};
use xrc_iod::DeviceIdentity;
use xrc_journal::Journal;
use xrc_retry_queue::{RetryQueue, Scheduler};
use xrc_safety::SafetyCore;
use xrc_workflow::{
    Collaborators, CommitmentRequester, EngineConfig, PatientInfo, WorkflowEngine, WorklistRef,
    WorklistSource,
};

/// Environment variable holding the log filter.
pub const ENV_LOG: &str = "XRC_LOG";

/// Lifecycle of the service loop.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash, Ord, PartialOrd)]
pub enum ServiceState {
    Running,
    RequestToStop,
    Stopped,
}

struct TrackerCommitment {
    tracker: Arc<CommitmentTracker>,
    data_dir: PathBuf,
}

impl CommitmentRequester for TrackerCommitment {
    fn request(
        &self,
        destination: &Destination,
        transaction_uid: &str,
        sops: Vec<(String, String, PathBuf)>,
    ) -> Result<(), String> {
        let sops = sops
            .into_iter()
            .map(|(sop_class_uid, sop_instance_uid, dataset_ref)| CommittedSop {
                sop_class_uid,
                sop_instance_uid,
                dataset_ref,
            })
            .collect();
        self.tracker
            .request(destination.clone(), transaction_uid, sops, &self.data_dir)
            .map_err(|e| e.to_string())
    }
}

struct TransportWorklist {
    transport: Arc<DicomTransport>,
    destination: Destination,
    station_aet: String,
}

#[async_trait::async_trait]
impl WorklistSource for TransportWorklist {
    async fn fetch(&self) -> Result<Vec<(PatientInfo, WorklistRef)>, String> {
        let entries = self
            .transport
            .query_worklist(
                &self.destination,
                &WorklistQuery {
                    station_aet: self.station_aet.clone(),
                    modality: "DX".to_string(),
                    date: chrono::Utc::now().date_naive(),
                },
            )
            .await
            .map_err(|e| e.to_string())?;
        Ok(entries
            .into_iter()
            .map(|entry| {
                (
                    PatientInfo {
                        patient_id: entry.patient_id,
                        patient_name: entry.patient_name,
                        birth_date: entry.patient_birth_date,
                        sex: entry.patient_sex,
                    },
                    WorklistRef {
                        accession_number: entry.accession_number,
                        requested_procedure_id: entry.requested_procedure_id,
                        scheduled_step_id: entry.scheduled_step_id,
                    },
                )
            })
            .collect())
    }
}

/// The assembled console core.
///
/// Construction order follows the dependency chain: UID generator, stores,
/// safety, dose, queue, transport, engine. Everything is passed down by
/// shared reference; no global state exists outside this struct.
pub struct Console {
    pub engine: Arc<WorkflowEngine>,
    pub bus: Arc<EventBus>,
    pub queue: Arc<RetryQueue>,
    pub transport: Arc<DicomTransport>,
    pub uid: Arc<UidGenerator>,
    stop_tx: watch::Sender<bool>,
    tasks: Vec<tokio::task::JoinHandle<()>>,
}

impl Console {
    /// Wires the core from a validated configuration.
    ///
    /// The binary runs against the simulator hardware; device drivers plug
    /// into the same capability traits.
    pub fn start(config: Config) -> anyhow::Result<Self> {
        config.create_dirs()?;
        let bus = Arc::new(EventBus::new());
        let uid = Arc::new(UidGenerator::new(
            &config.uid_root,
            &config.device_serial,
            config.paths.uid_counter_file(),
        )?);

        let interlocks = Arc::new(SimInterlocks::new());
        let generator = Arc::new(SimGenerator::new());
        let detector = Arc::new(SimDetector::new());
        let aec = Arc::new(SimAec::new());
        let safety = Arc::new(SafetyCore::new(
            interlocks,
            generator.clone(),
            detector.clone(),
            bus.clone(),
        ));
        let monitor = safety.spawn_change_monitor();

        let dose = Arc::new(DoseTracker::open(
            config.paths.dose_ledger_dir(),
            config.dose_limits.clone(),
            bus.clone(),
        )?);
        let queue = Arc::new(RetryQueue::open(
            config.paths.retry_spool_dir(),
            config.retry.clone(),
            bus.clone(),
        )?);
        let commitment = Arc::new(CommitmentTracker::new(
            bus.clone(),
            queue.clone(),
            Duration::from_millis(config.commitment_timeout_ms),
        ));
        let transport = Arc::new(DicomTransport::new(
            Arc::new(UlLinkFactory::new(&config.local_aet)),
            config.tls.clone(),
            config.pool.clone(),
            bus.clone(),
            commitment.clone(),
        ));

        let (stop_tx, stop_rx) = watch::channel(false);
        let scheduler =
            Scheduler::new(queue.clone(), transport.clone()).spawn(stop_rx.clone());
        let watchdog = commitment.clone().spawn_watchdog(stop_rx);

        let device = DeviceIdentity {
            manufacturer: "Hanbit Medical".to_string(),
            model: "HXR-40".to_string(),
            serial: config.device_serial.clone(),
            station_name: config.local_aet.clone(),
            station_aet: config.local_aet.clone(),
            software_version: env!("CARGO_PKG_VERSION").to_string(),
        };
        let worklist: Option<Arc<dyn WorklistSource>> =
            config.worklist_scp.clone().map(|destination| {
                Arc::new(TransportWorklist {
                    transport: transport.clone(),
                    destination,
                    station_aet: config.local_aet.clone(),
                }) as Arc<dyn WorklistSource>
            });
        let engine = WorkflowEngine::new(
            Journal::open(config.paths.journal_file())?,
            bus.clone(),
            safety,
            dose,
            queue.clone(),
            Collaborators {
                generator,
                detector,
                aec,
            },
            uid.clone(),
            Arc::new(TrackerCommitment {
                tracker: commitment,
                data_dir: config.paths.data_dir.join("data"),
            }),
            worklist,
            EngineConfig {
                device,
                safety_limits: config.safety_limits.clone(),
                pacs_destinations: config.pacs_destinations.clone(),
                mpps_destination: config.mpps_scp.clone(),
                spool_data_dir: config.paths.data_dir.join("data"),
                detector_watchdog_ms: 30_000,
            },
        )?;
        info!("Console core started in {}", engine.current_state());
        Ok(Self {
            engine,
            bus,
            queue,
            transport,
            uid,
            stop_tx,
            tasks: vec![monitor, scheduler, watchdog],
        })
    }

    /// Stops the background tasks and persists the UID counter.
    pub async fn shutdown(self) {
        let _ = self.stop_tx.send(true);
        for task in self.tasks {
            task.abort();
            let _ = task.await;
        }
        if let Err(e) = self.uid.persist() {
            warn!("UID counter was not persisted: {}", e);
        }
        info!("Console core stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use xrc_config::{DoseLimits, Paths, SafetyLimits};

    fn config(dir: &std::path::Path) -> Config {
        Config {
            uid_root: "1.3.6.1.4.1.9590.100".to_string(),
            device_serial: "4711".to_string(),
            local_aet: "XRC1".to_string(),
            pacs_destinations: vec![Destination {
                name: "pacs1".to_string(),
                aet: "PACS".to_string(),
                host: "10.0.0.5".to_string(),
                port: 11112,
                tls: false,
                mutual_tls: false,
                send_gsps: false,
            }],
            worklist_scp: None,
            mpps_scp: None,
            tls: Default::default(),
            pool: Default::default(),
            retry: Default::default(),
            commitment_timeout_ms: 300_000,
            dose_limits: DoseLimits {
                study: 500.0,
                daily: 1000.0,
                warn_pct: 80,
            },
            safety_limits: SafetyLimits {
                max_kvp: 150.0,
                max_ma: 500.0,
                max_ms: 2000.0,
            },
            paths: Paths {
                data_dir: dir.to_path_buf(),
            },
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn console_starts_idle_and_shuts_down_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let console = Console::start(config(dir.path())).unwrap();
        assert_eq!(
            console.engine.current_state(),
            xrc_workflow::WorkflowState::Idle
        );
        console.shutdown().await;
        assert!(dir.path().join("uid_counter").exists());
    }
}
