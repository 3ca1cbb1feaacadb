use crate::context::{
    ExposureRecord, ExposureStatus, PatientInfo, Protocol, StudyContext, WorklistRef,
};
use crate::state::{Trigger, WorkflowState};
use crate::table::{self, Guard};
use crate::{Error, Result};
use chrono::Utc;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};
use xrc_common::phi::patient_token;
use xrc_common::uid::UidGenerator;
use xrc_config::{Destination, SafetyLimits};
use xrc_dose::DoseTracker;
use xrc_event_bus::{ConsoleEvent, EventBus, Severity, StudyClosedSummary};
use xrc_hardware::{
    AcquisitionConfig, AecReadiness, AutoExposureControl, Detector, ExposureParameters, Generator,
};
use xrc_iod::sop_class as xrc_iod_sop_class;
use xrc_iod::{
    DeviceIdentity, DoseReportInputs, ExposureInfo, ImageKind, MppsEndState, PixelDescription,
    PresentationInputs, StudyIdentity,
};
use xrc_journal::{Category, GuardResult, Journal, NewEntry, Outcome};
use xrc_retry_queue::{NewTransmission, OperationKind, RetryQueue};
use xrc_safety::{AbortNotice, AbortReason, AbortWatch, SafetyCore};

/// Result of one transition attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum TransitionResult {
    Applied {
        from: WorkflowState,
        to: WorkflowState,
        guards: Vec<GuardResult>,
    },
    Rejected {
        from: WorkflowState,
        attempted_to: Option<WorkflowState>,
        trigger: Trigger,
        failed_guards: Vec<String>,
    },
}

impl TransitionResult {
    pub fn is_applied(&self) -> bool {
        matches!(self, TransitionResult::Applied { .. })
    }
}

/// Hardware collaborators the engine drives through entry actions.
pub struct Collaborators {
    pub generator: Arc<dyn Generator>,
    pub detector: Arc<dyn Detector>,
    pub aec: Arc<dyn AutoExposureControl>,
}

/// Storage commitment seam; the network layer implements it.
pub trait CommitmentRequester: Send + Sync {
    /// `sops` items are (sop class uid, sop instance uid, dataset path).
    fn request(
        &self,
        destination: &Destination,
        transaction_uid: &str,
        sops: Vec<(String, String, PathBuf)>,
    ) -> std::result::Result<(), String>;
}

/// Worklist seam; the network layer implements it.
#[async_trait::async_trait]
pub trait WorklistSource: Send + Sync {
    async fn fetch(&self) -> std::result::Result<Vec<(PatientInfo, WorklistRef)>, String>;
}

/// Static wiring of the engine.
pub struct EngineConfig {
    pub device: DeviceIdentity,
    pub safety_limits: SafetyLimits,
    pub pacs_destinations: Vec<Destination>,
    pub mpps_destination: Option<Destination>,
    pub spool_data_dir: PathBuf,
    pub detector_watchdog_ms: u64,
}

/// Interrupted-study information found at startup.
#[derive(Debug, Clone, PartialEq)]
pub struct RecoveryInfo {
    pub last_state: WorkflowState,
    pub study_uid: String,
}

struct Inner {
    context: StudyContext,
    protocol: Option<Protocol>,
    pending_pixel: Option<PixelDescription>,
    pending_dap: Option<f64>,
    aec_ready: bool,
    abort_watch: Option<AbortWatch>,
    aec_termination_tx: Option<oneshot::Sender<()>>,
    exposure_seq: u64,
    mpps_created: bool,
    recovery: Option<RecoveryInfo>,
    worklist_entries: Vec<(PatientInfo, WorklistRef)>,
}

/// The clinical workflow engine.
///
/// Owns the process-wide state; every mutation goes through [`apply`],
/// serialized by a single async lock, so concurrent triggers queue FIFO and
/// no commit interleaves. Commit order is fixed: journal write, state swap,
/// event dispatch, then entry actions.
///
/// [`apply`]: WorkflowEngine::apply
pub struct WorkflowEngine {
    inner: tokio::sync::Mutex<Inner>,
    state: RwLock<WorkflowState>,
    journal: Mutex<Journal>,
    bus: Arc<EventBus>,
    safety: Arc<SafetyCore>,
    dose: Arc<DoseTracker>,
    queue: Arc<RetryQueue>,
    hw: Collaborators,
    uid: Arc<UidGenerator>,
    commitment: Arc<dyn CommitmentRequester>,
    worklist: Option<Arc<dyn WorklistSource>>,
    config: EngineConfig,
}

impl WorkflowEngine {
    /// Builds the engine and checks the journal tail for an interrupted
    /// study. No collaborator is touched here; recovery waits for an
    /// explicit operator decision.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        journal: Journal,
        bus: Arc<EventBus>,
        safety: Arc<SafetyCore>,
        dose: Arc<DoseTracker>,
        queue: Arc<RetryQueue>,
        hw: Collaborators,
        uid: Arc<UidGenerator>,
        commitment: Arc<dyn CommitmentRequester>,
        worklist: Option<Arc<dyn WorklistSource>>,
        config: EngineConfig,
    ) -> Result<Arc<Self>> {
        let entries = journal.replay()?;
        let last_state = replay_terminal_state(&entries);
        let recovery = if last_state != WorkflowState::Idle {
            let study_uid = entries
                .iter()
                .rev()
                .find_map(|e| e.metadata.get("study_uid").cloned())
                .unwrap_or_default();
            Some(RecoveryInfo {
                last_state,
                study_uid,
            })
        } else {
            None
        };
        let engine = Arc::new(Self {
            inner: tokio::sync::Mutex::new(Inner {
                context: StudyContext::default(),
                protocol: None,
                pending_pixel: None,
                pending_dap: None,
                aec_ready: false,
                abort_watch: None,
                aec_termination_tx: None,
                exposure_seq: 0,
                mpps_created: false,
                recovery: recovery.clone(),
                worklist_entries: vec![],
            }),
            state: RwLock::new(last_state),
            journal: Mutex::new(journal),
            bus,
            safety,
            dose,
            queue,
            hw,
            uid,
            commitment,
            worklist,
            config,
        });
        if let Some(info) = recovery {
            engine.bus.publish(ConsoleEvent::RecoveryRequired {
                study_uid: info.study_uid,
                last_state: info.last_state.to_string(),
            });
        }
        Ok(engine)
    }

    /// Non-blocking snapshot of the current state.
    pub fn current_state(&self) -> WorkflowState {
        *self.state.read().unwrap()
    }

    /// Subscription to the console bus; per-study event order matches the
    /// journal.
    pub fn subscribe(&self) -> xrc_event_bus::Subscription {
        self.bus.subscribe()
    }

    pub fn recovery_pending(&self) -> Option<RecoveryInfo> {
        self.inner
            .try_lock()
            .ok()
            .and_then(|inner| inner.recovery.clone())
    }

    /// Applies one trigger.
    ///
    /// Every attempt is journaled. A rejected attempt leaves the state
    /// untouched and reports the failed guard names; an applied one commits
    /// journal-first and runs the entry actions after the event dispatch.
    pub fn apply<'a>(
        self: &'a Arc<Self>,
        trigger: Trigger,
        metadata: BTreeMap<String, String>,
        operator: &'a str,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<TransitionResult>> + Send + 'a>>
    {
        Box::pin(self.apply_inner(trigger, metadata, operator))
    }

    async fn apply_inner(
        self: &Arc<Self>,
        trigger: Trigger,
        metadata: BTreeMap<String, String>,
        operator: &str,
    ) -> Result<TransitionResult> {
        let mut inner = self.inner.lock().await;
        if inner.recovery.is_some() {
            return Err(Error::RecoveryPending);
        }
        let from = self.current_state();

        let Some(rule) = table::lookup(from, trigger) else {
            debug!("No transition for {} in {}", trigger, from);
            self.journal_append(
                from,
                from,
                trigger,
                vec![],
                operator,
                Category::Workflow,
                metadata,
                Outcome::Rejected,
            )?;
            self.bus.publish(ConsoleEvent::TransitionRejected {
                from: from.to_string(),
                attempted_to: from.to_string(),
                trigger: trigger.to_string(),
                failed_guards: vec![],
            });
            return Ok(TransitionResult::Rejected {
                from,
                attempted_to: None,
                trigger,
                failed_guards: vec![],
            });
        };

        // Every guard is evaluated, in declared order, even after one fails.
        let guards: Vec<GuardResult> = rule
            .guards
            .iter()
            .map(|guard| self.evaluate_guard(&inner, *guard, &metadata))
            .collect();
        let failed_guards: Vec<String> = guards
            .iter()
            .filter(|g| !g.passed)
            .map(|g| g.name.clone())
            .collect();

        if !failed_guards.is_empty() {
            self.journal_append(
                from,
                rule.to,
                trigger,
                guards.clone(),
                operator,
                rule.category,
                metadata,
                Outcome::Rejected,
            )?;
            self.bus.publish(ConsoleEvent::TransitionRejected {
                from: from.to_string(),
                attempted_to: rule.to.to_string(),
                trigger: trigger.to_string(),
                failed_guards: failed_guards.clone(),
            });
            return Ok(TransitionResult::Rejected {
                from,
                attempted_to: Some(rule.to),
                trigger,
                failed_guards,
            });
        }

        // Commit: journal first, then the state swap, then the event.
        let mut metadata = metadata;
        self.prepare_commit_metadata(&mut inner, from, rule.to, trigger, &mut metadata, operator)?;
        let entry = self.journal_append(
            from,
            rule.to,
            trigger,
            guards.clone(),
            operator,
            rule.category,
            metadata.clone(),
            Outcome::Applied,
        )?;
        let effects =
            self.commit_context(&mut inner, from, rule.to, trigger, &metadata, operator);
        *self.state.write().unwrap() = rule.to;
        self.bus.publish(ConsoleEvent::StateChanged {
            from: from.to_string(),
            to: rule.to.to_string(),
            trigger: trigger.to_string(),
            journal_id: entry.id,
        });
        drop(inner);

        // Entry actions run after the event; their failure is reported, the
        // transition stands.
        self.run_effects(rule.to, effects).await;
        Ok(TransitionResult::Applied {
            from,
            to: rule.to,
            guards,
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn journal_append(
        &self,
        from: WorkflowState,
        to: WorkflowState,
        trigger: Trigger,
        guards: Vec<GuardResult>,
        operator: &str,
        category: Category,
        metadata: BTreeMap<String, String>,
        outcome: Outcome,
    ) -> Result<xrc_journal::JournalEntry> {
        let mut journal = self.journal.lock().unwrap();
        journal
            .append(NewEntry {
                from_state: from.to_string(),
                to_state: to.to_string(),
                trigger: trigger.to_string(),
                guards,
                operator: operator.to_string(),
                category,
                metadata,
                outcome,
            })
            .map_err(|e| {
                self.bus.publish(ConsoleEvent::JournalUnavailable {
                    detail: e.to_string(),
                });
                error!("Journal write failed, refusing to transition: {}", e);
                Error::JournalUnavailable(e)
            })
    }

    fn evaluate_guard(
        &self,
        inner: &Inner,
        guard: Guard,
        metadata: &BTreeMap<String, String>,
    ) -> GuardResult {
        let name = guard.name();
        match guard {
            Guard::PatientIdentified => {
                let id_ok = metadata.get("patient_id").is_some_and(|v| !v.is_empty());
                let name_ok = metadata.get("patient_name").is_some_and(|v| !v.is_empty());
                if id_ok && name_ok {
                    GuardResult::passed(name)
                } else {
                    GuardResult::failed(name, "patient id and name are required")
                }
            }
            Guard::ProtocolValid => match metadata.get("protocol") {
                None => GuardResult::failed(name, "no protocol provided"),
                Some(raw) => match serde_json::from_str::<Protocol>(raw) {
                    Err(e) => GuardResult::failed(name, &format!("protocol does not parse: {e}")),
                    Ok(protocol) => match protocol.validate_against(&self.config.safety_limits) {
                        Ok(()) => GuardResult::passed(name),
                        Err(e) => GuardResult::failed(name, &e.to_string()),
                    },
                },
            },
            Guard::InterlocksPass => {
                let status = self.safety.check_all();
                if status.all_passed {
                    GuardResult::passed(name)
                } else {
                    GuardResult::failed(
                        name,
                        &format!("interlocks failing: {}", status.failed_names().join(", ")),
                    )
                }
            }
            Guard::AecReadyIfEnabled => {
                let enabled = inner
                    .protocol
                    .as_ref()
                    .map(|p| p.aec_enabled())
                    .unwrap_or(false);
                if !enabled || inner.aec_ready {
                    GuardResult::passed(name)
                } else {
                    GuardResult::failed(name, "AEC is enabled but not ready")
                }
            }
            Guard::DoseWithinLimits => {
                let Some(protocol) = inner.protocol.as_ref() else {
                    return GuardResult::failed(name, "no protocol armed");
                };
                let projected = projected_dap(protocol);
                let check = self.dose.check_limits(
                    &inner.context.patient_id,
                    &inner.context.study_uid,
                    projected,
                );
                if check.within_limits() {
                    if check.should_warn {
                        self.bus.publish(ConsoleEvent::OperatorNotification {
                            severity: Severity::Warning,
                            code: "DOSE_WARNING".to_string(),
                            detail: format!(
                                "Projected study DAP {:.1} cGy.cm2 approaches the limit",
                                check.projected_study_dap
                            ),
                        });
                    }
                    GuardResult::passed(name)
                } else {
                    GuardResult::failed(
                        name,
                        &format!(
                            "projected DAP {:.1} cGy.cm2 exceeds a configured limit",
                            check.projected_study_dap
                        ),
                    )
                }
            }
            Guard::ProtocolWithinSafetyLimits => match inner.protocol.as_ref() {
                None => GuardResult::failed(name, "no protocol armed"),
                Some(protocol) => match protocol.validate_against(&self.config.safety_limits) {
                    Ok(()) => GuardResult::passed(name),
                    Err(e) => GuardResult::failed(name, &e.to_string()),
                },
            },
            Guard::HasAcquiredImage => {
                let acquired = inner
                    .context
                    .exposures
                    .iter()
                    .any(|e| e.status == ExposureStatus::Acquired);
                if acquired {
                    GuardResult::passed(name)
                } else {
                    GuardResult::failed(name, "no acquired image awaiting review")
                }
            }
        }
    }

    /// Adds commit-time values (study uid, image uid) to the metadata so
    /// the journal carries what recovery needs.
    fn prepare_commit_metadata(
        &self,
        inner: &mut Inner,
        _from: WorkflowState,
        _to: WorkflowState,
        trigger: Trigger,
        metadata: &mut BTreeMap<String, String>,
        _operator: &str,
    ) -> Result<()> {
        match trigger {
            Trigger::PatientConfirmed | Trigger::EmergencyActivated => {
                let study_uid = self.uid.next()?;
                metadata.insert("study_uid".to_string(), study_uid);
                if trigger == Trigger::EmergencyActivated {
                    metadata.insert(
                        "accession".to_string(),
                        format!("EM{}", Utc::now().format("%y%m%d%H%M%S")),
                    );
                    metadata.insert("unscheduled".to_string(), "true".to_string());
                }
            }
            Trigger::ExposureFinished => {
                let image_uid = self.uid.next()?;
                metadata.insert("image_sop_uid".to_string(), image_uid);
                if let Some(dap) = inner.pending_dap {
                    metadata.insert("dap_cgy_cm2".to_string(), dap.to_string());
                }
            }
            _ => {}
        }
        if !inner.context.study_uid.is_empty() {
            metadata
                .entry("study_uid".to_string())
                .or_insert_with(|| inner.context.study_uid.clone());
        }
        Ok(())
    }

    /// Context mutations belonging to the commit itself. Returns the entry
    /// actions to run after the event dispatch.
    fn commit_context(
        &self,
        inner: &mut Inner,
        from: WorkflowState,
        to: WorkflowState,
        trigger: Trigger,
        metadata: &BTreeMap<String, String>,
        operator: &str,
    ) -> Vec<Effect> {
        let mut effects = vec![];
        match trigger {
            Trigger::StartWorklistSync => {
                effects.push(Effect::FetchWorklist);
            }
            Trigger::PatientConfirmed | Trigger::EmergencyActivated => {
                let get = |key: &str| metadata.get(key).cloned().unwrap_or_default();
                inner.context = StudyContext {
                    study_uid: get("study_uid"),
                    accession_number: get("accession"),
                    patient_id: get("patient_id"),
                    patient_name: get("patient_name"),
                    birth_date: metadata.get("birth_date").cloned(),
                    sex: metadata.get("sex").cloned(),
                    emergency: trigger == Trigger::EmergencyActivated,
                    worklist_ref: metadata.get("scheduled_step_id").map(|step| WorklistRef {
                        accession_number: get("accession"),
                        requested_procedure_id: get("requested_procedure_id"),
                        scheduled_step_id: step.clone(),
                    }),
                    exposures: vec![],
                    mpps_uid: None,
                    mpps_id: format!("PPS{}", Utc::now().format("%y%m%d%H%M%S")),
                    created_at: Some(Utc::now()),
                };
                inner.mpps_created = false;
            }
            Trigger::ProtocolSelected => {
                if let Some(raw) = metadata.get("protocol") {
                    // The guard already validated it.
                    if let Ok(protocol) = serde_json::from_str::<Protocol>(raw) {
                        inner.protocol = Some(protocol);
                        inner.aec_ready = false;
                    }
                }
                if !inner.mpps_created {
                    effects.push(Effect::MppsInProgress);
                }
            }
            Trigger::PositioningComplete => {
                let aec_enabled = inner
                    .protocol
                    .as_ref()
                    .map(|p| p.aec_enabled())
                    .unwrap_or(false);
                if aec_enabled {
                    effects.push(Effect::ConfigureAec);
                }
            }
            Trigger::ExposeRequested => {
                if let Some(protocol) = inner.protocol.clone() {
                    inner.exposure_seq += 1;
                    let series_uid = inner
                        .context
                        .exposures
                        .last()
                        .map(|e| e.series_uid.clone())
                        .unwrap_or_else(|| {
                            self.uid.next().unwrap_or_else(|_| {
                                format!("{}.1", inner.context.study_uid)
                            })
                        });
                    inner.context.exposures.push(ExposureRecord {
                        protocol,
                        status: ExposureStatus::Pending,
                        dap_cgy_cm2: None,
                        image_sop_uid: None,
                        series_uid,
                        dataset_path: None,
                        acquired_at: None,
                        operator: operator.to_string(),
                        rejection_reason: None,
                    });
                    effects.push(Effect::ArmAndTrigger {
                        seq: inner.exposure_seq,
                    });
                }
            }
            Trigger::ExposureFinished => {
                inner.abort_watch = None;
                inner.aec_termination_tx = None;
                let dap = inner.pending_dap.take().unwrap_or(0.0);
                let pixel = inner.pending_pixel.take();
                let image_uid = metadata.get("image_sop_uid").cloned().unwrap_or_default();
                if let Some(record) = inner.context.exposures.last_mut() {
                    record.status = ExposureStatus::Acquired;
                    record.dap_cgy_cm2 = Some(dap);
                    record.image_sop_uid = Some(image_uid.clone());
                    record.acquired_at = Some(Utc::now());
                }
                effects.push(Effect::RecordExposure {
                    dap,
                    pixel,
                    image_uid,
                });
            }
            Trigger::AbortRequested | Trigger::Timeout if from == WorkflowState::ExposureTrigger => {
                inner.abort_watch = None;
                inner.aec_termination_tx = None;
                inner.pending_dap = None;
                inner.pending_pixel = None;
                if let Some(record) = inner.context.exposures.last_mut() {
                    if record.status == ExposureStatus::Pending {
                        record.status = ExposureStatus::Incomplete;
                        record.rejection_reason = Some(
                            metadata
                                .get("reason")
                                .cloned()
                                .unwrap_or_else(|| "AcquisitionFailed".to_string()),
                        );
                    }
                }
                effects.push(Effect::AbortCleanup);
            }
            Trigger::ImageAccepted => {
                // Study-level acceptance; every reviewed image ships.
                for record in inner
                    .context
                    .exposures
                    .iter_mut()
                    .filter(|e| e.status == ExposureStatus::Acquired)
                {
                    record.status = ExposureStatus::Accepted;
                }
                effects.push(Effect::MppsEnd {
                    end_state: MppsEndState::Completed,
                });
            }
            Trigger::ImageRejected => {
                if let Some(record) = inner
                    .context
                    .exposures
                    .iter_mut()
                    .rev()
                    .find(|e| e.status == ExposureStatus::Acquired)
                {
                    record.status = ExposureStatus::Rejected;
                    record.rejection_reason = metadata.get("reason").cloned();
                }
            }
            Trigger::RetakeCancelled => {
                if let Some(record) = inner
                    .context
                    .exposures
                    .iter_mut()
                    .rev()
                    .find(|e| e.status == ExposureStatus::Rejected)
                {
                    record.status = ExposureStatus::Incomplete;
                }
            }
            Trigger::StudyCompleted if to == WorkflowState::PacsExport => {
                effects.push(Effect::ExportStudy);
            }
            _ => {}
        }

        if to == WorkflowState::Idle && from != WorkflowState::Idle {
            // PHI is gone before the state-change event for Idle publishes.
            if !inner.context.study_uid.is_empty() {
                self.bus
                    .publish(ConsoleEvent::StudyClosed(StudyClosedSummary {
                        study_uid: inner.context.study_uid.clone(),
                        patient_token: patient_token(&inner.context.patient_id),
                        closed_at: Utc::now(),
                        exposure_count: inner.context.exposures.len(),
                        total_dap_cgy_cm2: inner.context.total_dap(),
                    }));
            }
            inner.context.clear_phi();
            inner.protocol = None;
            inner.aec_ready = false;
        }
        effects
    }

    async fn run_effects(self: &Arc<Self>, state: WorkflowState, effects: Vec<Effect>) {
        for effect in effects {
            if let Err(detail) = self.run_effect(&effect).await {
                warn!("Entry action failed in {}: {}", state, detail);
                self.bus.publish(ConsoleEvent::StateEntryFailed {
                    state: state.to_string(),
                    detail,
                });
            }
        }
    }

    async fn run_effect(self: &Arc<Self>, effect: &Effect) -> std::result::Result<(), String> {
        match effect {
            Effect::FetchWorklist => self.fetch_worklist().await,
            Effect::ConfigureAec => self.configure_aec().await,
            Effect::MppsInProgress => self.send_mpps_in_progress().await,
            Effect::ArmAndTrigger { seq } => self.arm_and_trigger(*seq).await,
            Effect::RecordExposure {
                dap,
                pixel,
                image_uid,
            } => self.record_exposure(*dap, pixel.clone(), image_uid).await,
            Effect::AbortCleanup => self
                .hw
                .detector
                .stop_acquisition()
                .await
                .map_err(|e| e.to_string()),
            Effect::MppsEnd { end_state } => self.send_mpps_end(*end_state).await,
            Effect::ExportStudy => self.export_study().await,
        }
    }

    async fn fetch_worklist(self: &Arc<Self>) -> std::result::Result<(), String> {
        let Some(worklist) = &self.worklist else {
            return Err("no worklist provider configured".to_string());
        };
        let entries = worklist.fetch().await?;
        let count = entries.len();
        self.inner.lock().await.worklist_entries = entries;
        self.bus.publish(ConsoleEvent::OperatorNotification {
            severity: Severity::Info,
            code: "WORKLIST_UPDATED".to_string(),
            detail: format!("{count} scheduled procedures"),
        });
        Ok(())
    }

    /// Scheduled entries fetched by the last worklist sync.
    pub async fn worklist_entries(&self) -> Vec<(PatientInfo, WorklistRef)> {
        self.inner.lock().await.worklist_entries.clone()
    }

    async fn configure_aec(self: &Arc<Self>) -> std::result::Result<(), String> {
        let Some(protocol) = self.inner.lock().await.protocol.clone() else {
            return Err("no protocol armed".to_string());
        };
        self.hw
            .aec
            .set_parameters(protocol.aec_chambers.clone(), 0, 22.0, false)
            .await
            .map_err(|e| e.to_string())?;
        let ready = self.hw.aec.readiness().await.map_err(|e| e.to_string())?;
        self.inner.lock().await.aec_ready = ready == AecReadiness::Ready;
        Ok(())
    }

    async fn send_mpps_in_progress(self: &Arc<Self>) -> std::result::Result<(), String> {
        let Some(mpps_dest) = self.config.mpps_destination.clone() else {
            return Ok(());
        };
        let mut inner = self.inner.lock().await;
        if inner.mpps_created {
            return Ok(());
        }
        let mpps_uid = self.uid.next().map_err(|e| e.to_string())?;
        inner.context.mpps_uid = Some(mpps_uid.clone());
        let study = study_identity(&inner.context);
        let mpps_id = inner.context.mpps_id.clone();
        drop(inner);
        let dataset =
            xrc_iod::mpps_in_progress(&study, &self.config.device, &mpps_id, &Utc::now())
                .map_err(|e| e.to_string())?;
        let path = self
            .config
            .spool_data_dir
            .join(format!("mpps-{mpps_uid}-create.dcm"));
        xrc_iod::write_dataset_file(
            dataset,
            xrc_iod_sop_class::MODALITY_PERFORMED_PROCEDURE_STEP,
            &mpps_uid,
            &path,
        )
        .map_err(|e| e.to_string())?;
        self.queue
            .enqueue(NewTransmission {
                operation: OperationKind::NCreate,
                destination: mpps_dest,
                dataset_ref: path,
                sop_class_uid: xrc_iod_sop_class::MODALITY_PERFORMED_PROCEDURE_STEP.to_string(),
                sop_instance_uid: mpps_uid,
                correlation_id: study.study_uid.clone(),
            })
            .map_err(|e| e.to_string())?;
        self.inner.lock().await.mpps_created = true;
        Ok(())
    }

    /// Exposure-state entry: program the generator and AEC, start the
    /// detector, arm the abort fast-path, fire, and start the watchdog.
    async fn arm_and_trigger(self: &Arc<Self>, seq: u64) -> std::result::Result<(), String> {
        let (protocol, watchdog_ms) = {
            let inner = self.inner.lock().await;
            let Some(protocol) = inner.protocol.clone() else {
                return Err("no protocol armed".to_string());
            };
            (protocol, self.config.detector_watchdog_ms)
        };
        self.hw
            .generator
            .set_exposure_parameters(ExposureParameters {
                kvp: protocol.kvp,
                ma: protocol.ma,
                ms: protocol.exposure_time_ms,
                focus: protocol.focus,
            })
            .await
            .map_err(|e| e.to_string())?;
        self.hw.generator.arm().await.map_err(|e| e.to_string())?;
        self.hw
            .detector
            .start_acquisition(AcquisitionConfig {
                protocol: protocol.name.clone(),
                watchdog_ms,
            })
            .await
            .map_err(|e| e.to_string())?;

        // Abort fast-path armed before the beam comes on.
        let (abort_tx, abort_rx) = mpsc::unbounded_channel();
        let (aec_tx, aec_rx) = oneshot::channel();
        let watch = self.safety.arm_abort_watch(aec_rx, abort_tx);
        {
            let mut inner = self.inner.lock().await;
            inner.abort_watch = Some(watch);
            inner.aec_termination_tx = Some(aec_tx);
        }
        self.spawn_abort_listener(abort_rx);
        self.spawn_watchdog(seq, watchdog_ms);

        self.hw
            .generator
            .trigger_exposure()
            .await
            .map_err(|e| e.to_string())?;
        Ok(())
    }

    fn spawn_abort_listener(self: &Arc<Self>, mut abort_rx: mpsc::UnboundedReceiver<AbortNotice>) {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            if let Some(notice) = abort_rx.recv().await {
                let mut metadata = BTreeMap::new();
                metadata.insert("reason".to_string(), "AcquisitionFailed".to_string());
                metadata.insert(
                    "cause".to_string(),
                    match &notice.reason {
                        AbortReason::InterlockLost(failed) => {
                            format!("interlocks: {}", failed.join(", "))
                        }
                        AbortReason::AecTerminated => "AEC termination".to_string(),
                    },
                );
                if let Err(e) = engine
                    .apply(Trigger::AbortRequested, metadata, "safety-core")
                    .await
                {
                    error!("Abort transition failed: {}", e);
                }
            }
        });
    }

    fn spawn_watchdog(self: &Arc<Self>, seq: u64, watchdog_ms: u64) {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(watchdog_ms)).await;
            let stale = {
                let inner = engine.inner.lock().await;
                inner.exposure_seq == seq
                    && engine.current_state() == WorkflowState::ExposureTrigger
            };
            if stale {
                warn!("Detector watchdog fired after {} ms", watchdog_ms);
                let mut metadata = BTreeMap::new();
                metadata.insert("reason".to_string(), "AcquisitionFailed".to_string());
                metadata.insert("cause".to_string(), "detector watchdog".to_string());
                if let Err(e) = engine.apply(Trigger::Timeout, metadata, "watchdog").await {
                    error!("Watchdog transition failed: {}", e);
                }
            }
        });
    }

    /// QC-entry bookkeeping: dose ledger first, then the image spool.
    async fn record_exposure(
        self: &Arc<Self>,
        dap: f64,
        pixel: Option<PixelDescription>,
        image_uid: &str,
    ) -> std::result::Result<(), String> {
        let mut inner = self.inner.lock().await;
        let patient_id = inner.context.patient_id.clone();
        let study_uid = inner.context.study_uid.clone();
        self.dose
            .record(&study_uid, &patient_id, image_uid, dap, false)
            .map_err(|e| e.to_string())?;
        let Some(pixel) = pixel else {
            return Err("no pixel data delivered for the exposure".to_string());
        };
        let study = study_identity(&inner.context);
        let Some(record) = inner.context.exposures.last_mut() else {
            return Err("no exposure record to attach the image to".to_string());
        };
        let exposure = exposure_info(record, image_uid, dap);
        let dataset = xrc_iod::build_image(
            ImageKind::Dx,
            &study,
            &self.config.device,
            &exposure,
            &pixel,
        )
        .map_err(|e| e.to_string())?;
        let path = self
            .config
            .spool_data_dir
            .join(format!("image-{image_uid}.dcm"));
        xrc_iod::write_dataset_file(
            dataset,
            xrc_iod_sop_class::DX_IMAGE_STORAGE_FOR_PRESENTATION,
            image_uid,
            &path,
        )
        .map_err(|e| e.to_string())?;
        record.dataset_path = Some(path);
        Ok(())
    }

    async fn send_mpps_end(self: &Arc<Self>, end_state: MppsEndState) -> std::result::Result<(), String> {
        let Some(mpps_dest) = self.config.mpps_destination.clone() else {
            return Ok(());
        };
        let inner = self.inner.lock().await;
        let Some(mpps_uid) = inner.context.mpps_uid.clone() else {
            return Err("MPPS step was never created".to_string());
        };
        let exposures: Vec<ExposureInfo> = inner
            .context
            .exposures
            .iter()
            .filter(|e| e.image_sop_uid.is_some())
            .map(|e| {
                exposure_info(e, e.image_sop_uid.as_deref().unwrap_or_default(), e.dap_cgy_cm2.unwrap_or(0.0))
            })
            .collect();
        let total_dap = inner.context.total_dap();
        let study_uid = inner.context.study_uid.clone();
        drop(inner);
        let dataset = xrc_iod::mpps_end(
            &exposures,
            xrc_iod_sop_class::DX_IMAGE_STORAGE_FOR_PRESENTATION,
            total_dap,
            end_state,
            &Utc::now(),
        )
        .map_err(|e| e.to_string())?;
        let path = self
            .config
            .spool_data_dir
            .join(format!("mpps-{mpps_uid}-set.dcm"));
        xrc_iod::write_dataset_file(
            dataset,
            xrc_iod_sop_class::MODALITY_PERFORMED_PROCEDURE_STEP,
            &mpps_uid,
            &path,
        )
        .map_err(|e| e.to_string())?;
        self.queue
            .enqueue(NewTransmission {
                operation: OperationKind::NSet,
                destination: mpps_dest,
                dataset_ref: path,
                sop_class_uid: xrc_iod_sop_class::MODALITY_PERFORMED_PROCEDURE_STEP.to_string(),
                sop_instance_uid: mpps_uid,
                correlation_id: study_uid,
            })
            .map_err(|e| e.to_string())?;
        Ok(())
    }

    /// Export-state entry: queue the accepted images, the dose report and
    /// optionally the presentation state, then request storage commitment
    /// and close the study.
    async fn export_study(self: &Arc<Self>) -> std::result::Result<(), String> {
        let (study, accepted, summary_records) = {
            let inner = self.inner.lock().await;
            let study = study_identity(&inner.context);
            let accepted: Vec<(ExposureInfo, PathBuf)> = inner
                .context
                .accepted_exposures()
                .iter()
                .filter_map(|record| {
                    record.dataset_path.as_ref().map(|path| {
                        (
                            exposure_info(
                                record,
                                record.image_sop_uid.as_deref().unwrap_or_default(),
                                record.dap_cgy_cm2.unwrap_or(0.0),
                            ),
                            path.clone(),
                        )
                    })
                })
                .collect();
            (study, accepted, self.dose.study_exposure_records(&inner.context.study_uid))
        };
        if accepted.is_empty() {
            warn!("Export requested with no accepted images");
        }

        // Dose report from the tracker's feed.
        let rdsr_uid = self.uid.next().map_err(|e| e.to_string())?;
        let rdsr_series = self.uid.next().map_err(|e| e.to_string())?;
        let rdsr_exposures: Vec<ExposureInfo> = {
            let inner = self.inner.lock().await;
            inner
                .context
                .exposures
                .iter()
                .filter(|e| e.image_sop_uid.is_some())
                .map(|e| {
                    exposure_info(
                        e,
                        e.image_sop_uid.as_deref().unwrap_or_default(),
                        e.dap_cgy_cm2.unwrap_or(0.0),
                    )
                })
                .collect()
        };
        let total_dap: f64 = summary_records.iter().map(|r| r.dap_cgy_cm2).sum();
        let rdsr = xrc_iod::build_dose_report(&DoseReportInputs {
            study: study.clone(),
            device: self.config.device.clone(),
            sop_instance_uid: rdsr_uid.clone(),
            series_uid: rdsr_series,
            exposures: rdsr_exposures,
            total_dap_cgy_cm2: total_dap,
            created_at: Utc::now(),
        })
        .map_err(|e| e.to_string())?;
        let rdsr_path = self
            .config
            .spool_data_dir
            .join(format!("rdsr-{rdsr_uid}.dcm"));
        xrc_iod::write_dataset_file(
            rdsr,
            xrc_iod_sop_class::XRAY_RADIATION_DOSE_SR_STORAGE,
            &rdsr_uid,
            &rdsr_path,
        )
        .map_err(|e| e.to_string())?;

        // Presentation state is built and kept locally; it ships only to
        // destinations that opted in.
        let gsps = if accepted.is_empty() {
            None
        } else {
            let gsps_uid = self.uid.next().map_err(|e| e.to_string())?;
            let gsps_series = self.uid.next().map_err(|e| e.to_string())?;
            let state = xrc_iod::build_presentation_state(&PresentationInputs {
                study: study.clone(),
                sop_instance_uid: gsps_uid.clone(),
                series_uid: gsps_series,
                referenced: accepted
                    .iter()
                    .map(|(exposure, _)| {
                        (
                            xrc_iod_sop_class::DX_IMAGE_STORAGE_FOR_PRESENTATION.to_string(),
                            exposure.clone(),
                        )
                    })
                    .collect(),
                created_at: Utc::now(),
            })
            .map_err(|e| e.to_string())?;
            let path = self
                .config
                .spool_data_dir
                .join(format!("gsps-{gsps_uid}.dcm"));
            xrc_iod::write_dataset_file(
                state,
                xrc_iod_sop_class::GRAYSCALE_SOFTCOPY_PRESENTATION_STATE,
                &gsps_uid,
                &path,
            )
            .map_err(|e| e.to_string())?;
            Some((gsps_uid, path))
        };

        for destination in &self.config.pacs_destinations {
            let mut committed = vec![];
            for (exposure, path) in &accepted {
                self.queue
                    .enqueue(NewTransmission {
                        operation: OperationKind::CStore,
                        destination: destination.clone(),
                        dataset_ref: path.clone(),
                        sop_class_uid: xrc_iod_sop_class::DX_IMAGE_STORAGE_FOR_PRESENTATION
                            .to_string(),
                        sop_instance_uid: exposure.sop_instance_uid.clone(),
                        correlation_id: study.study_uid.clone(),
                    })
                    .map_err(|e| e.to_string())?;
                committed.push((
                    xrc_iod_sop_class::DX_IMAGE_STORAGE_FOR_PRESENTATION.to_string(),
                    exposure.sop_instance_uid.clone(),
                    path.clone(),
                ));
            }
            self.queue
                .enqueue(NewTransmission {
                    operation: OperationKind::CStore,
                    destination: destination.clone(),
                    dataset_ref: rdsr_path.clone(),
                    sop_class_uid: xrc_iod_sop_class::XRAY_RADIATION_DOSE_SR_STORAGE.to_string(),
                    sop_instance_uid: rdsr_uid.clone(),
                    correlation_id: study.study_uid.clone(),
                })
                .map_err(|e| e.to_string())?;
            if destination.send_gsps {
                if let Some((gsps_uid, gsps_path)) = &gsps {
                    self.queue
                        .enqueue(NewTransmission {
                            operation: OperationKind::CStore,
                            destination: destination.clone(),
                            dataset_ref: gsps_path.clone(),
                            sop_class_uid: xrc_iod_sop_class::GRAYSCALE_SOFTCOPY_PRESENTATION_STATE
                                .to_string(),
                            sop_instance_uid: gsps_uid.clone(),
                            correlation_id: study.study_uid.clone(),
                        })
                        .map_err(|e| e.to_string())?;
                }
            }
            if !committed.is_empty() {
                let transaction_uid = self.uid.next().map_err(|e| e.to_string())?;
                self.commitment
                    .request(destination, &transaction_uid, committed)?;
            }
        }

        info!("Study export queued");
        // Export enqueued durably; the study returns to Idle on its own.
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = engine
                .apply(Trigger::StudyCompleted, BTreeMap::new(), "engine")
                .await
            {
                error!("Study close transition failed: {}", e);
            }
        });
        Ok(())
    }

    /// Fires the AEC termination signal, as the AEC hardware integration
    /// does when the chamber threshold is reached.
    pub async fn signal_aec_termination(&self) -> bool {
        let mut inner = self.inner.lock().await;
        match inner.aec_termination_tx.take() {
            Some(tx) => tx.send(()).is_ok(),
            None => false,
        }
    }

    /// Resumes the interrupted study found at startup, rebuilding the
    /// context from journal metadata. Hardware stays untouched.
    pub async fn resume_study(&self) -> Result<WorkflowState> {
        let mut inner = self.inner.lock().await;
        let Some(info) = inner.recovery.take() else {
            return Err(Error::NoRecoveryPending);
        };
        let entries = self.journal.lock().unwrap().replay()?;
        let mut context = StudyContext::default();
        for entry in entries
            .iter()
            .filter(|e| e.outcome == Outcome::Applied)
        {
            let get = |key: &str| entry.metadata.get(key).cloned();
            match entry.trigger.as_str() {
                "PatientConfirmed" | "EmergencyActivated" => {
                    context = StudyContext {
                        study_uid: get("study_uid").unwrap_or_default(),
                        accession_number: get("accession").unwrap_or_default(),
                        patient_id: get("patient_id").unwrap_or_default(),
                        patient_name: get("patient_name").unwrap_or_default(),
                        birth_date: get("birth_date"),
                        sex: get("sex"),
                        emergency: entry.trigger == "EmergencyActivated",
                        worklist_ref: None,
                        exposures: vec![],
                        mpps_uid: None,
                        mpps_id: format!("PPS{}", Utc::now().format("%y%m%d%H%M%S")),
                        created_at: Some(entry.at),
                    };
                }
                "ProtocolSelected" => {
                    if let Some(raw) = get("protocol") {
                        inner.protocol = serde_json::from_str(&raw).ok();
                    }
                }
                "ExposureFinished" => {
                    if let Some(protocol) = inner.protocol.clone() {
                        context.exposures.push(ExposureRecord {
                            protocol,
                            status: ExposureStatus::Acquired,
                            dap_cgy_cm2: get("dap_cgy_cm2").and_then(|v| v.parse().ok()),
                            image_sop_uid: get("image_sop_uid"),
                            series_uid: format!("{}.1", context.study_uid),
                            dataset_path: None,
                            acquired_at: Some(entry.at),
                            operator: entry.operator.clone(),
                            rejection_reason: None,
                        });
                    }
                }
                _ => {}
            }
        }
        inner.context = context;
        info!("Resuming interrupted study in {}", info.last_state);
        self.bus.publish(ConsoleEvent::OperatorNotification {
            severity: Severity::Info,
            code: "RECOVERY_RESUMED".to_string(),
            detail: format!("Study resumed in {}", info.last_state),
        });
        Ok(info.last_state)
    }

    /// Abandons the interrupted study: reports the MPPS step as
    /// discontinued, journals the forced return and goes back to `Idle`.
    pub async fn clean_start(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let Some(info) = inner.recovery.take() else {
            return Err(Error::NoRecoveryPending);
        };
        let entries = self.journal.lock().unwrap().replay()?;
        let mpps_uid = entries
            .iter()
            .rev()
            .find_map(|e| e.metadata.get("mpps_uid").cloned());
        if let (Some(mpps_uid), Some(mpps_dest)) =
            (mpps_uid, self.config.mpps_destination.clone())
        {
            let dataset = xrc_iod::mpps_end(
                &[],
                xrc_iod_sop_class::DX_IMAGE_STORAGE_FOR_PRESENTATION,
                0.0,
                MppsEndState::Discontinued,
                &Utc::now(),
            )?;
            let path = self
                .config
                .spool_data_dir
                .join(format!("mpps-{mpps_uid}-discontinue.dcm"));
            xrc_iod::write_dataset_file(
                dataset,
                xrc_iod_sop_class::MODALITY_PERFORMED_PROCEDURE_STEP,
                &mpps_uid,
                &path,
            )?;
            self.queue.enqueue(NewTransmission {
                operation: OperationKind::NSet,
                destination: mpps_dest,
                dataset_ref: path,
                sop_class_uid: xrc_iod_sop_class::MODALITY_PERFORMED_PROCEDURE_STEP.to_string(),
                sop_instance_uid: mpps_uid,
                correlation_id: info.study_uid.clone(),
            })?;
        }
        let mut metadata = BTreeMap::new();
        metadata.insert("reason".to_string(), "clean start after crash".to_string());
        if !info.study_uid.is_empty() {
            metadata.insert("study_uid".to_string(), info.study_uid.clone());
        }
        let mut journal = self.journal.lock().unwrap();
        journal.append(NewEntry {
            from_state: info.last_state.to_string(),
            to_state: WorkflowState::Idle.to_string(),
            trigger: Trigger::AbortRequested.to_string(),
            guards: vec![],
            operator: "operator".to_string(),
            category: Category::Workflow,
            metadata,
            outcome: Outcome::Applied,
        })?;
        drop(journal);
        inner.context.clear_phi();
        *self.state.write().unwrap() = WorkflowState::Idle;
        self.bus.publish(ConsoleEvent::StateChanged {
            from: info.last_state.to_string(),
            to: WorkflowState::Idle.to_string(),
            trigger: Trigger::AbortRequested.to_string(),
            journal_id: self.journal.lock().unwrap().next_id() - 1,
        });
        info!("Clean start after interrupted study");
        Ok(())
    }

    /// Snapshot of the study context; tests and the review surface use it.
    pub async fn study_context(&self) -> StudyContext {
        self.inner.lock().await.context.clone()
    }

    /// Stores the acquisition result ahead of the `ExposureFinished`
    /// trigger.
    pub async fn finish_exposure(
        self: &Arc<Self>,
        dap_cgy_cm2: f64,
        pixel: PixelDescription,
        operator: &str,
    ) -> Result<TransitionResult> {
        {
            let mut inner = self.inner.lock().await;
            inner.pending_dap = Some(dap_cgy_cm2);
            inner.pending_pixel = Some(pixel);
        }
        self.apply(Trigger::ExposureFinished, BTreeMap::new(), operator)
            .await
    }

    /// Typed wrapper for patient confirmation.
    pub async fn confirm_patient(
        self: &Arc<Self>,
        patient: PatientInfo,
        worklist_ref: Option<WorklistRef>,
        operator: &str,
    ) -> Result<TransitionResult> {
        let mut metadata = BTreeMap::new();
        metadata.insert("patient_id".to_string(), patient.patient_id);
        metadata.insert("patient_name".to_string(), patient.patient_name);
        if let Some(birth_date) = patient.birth_date {
            metadata.insert("birth_date".to_string(), birth_date);
        }
        if let Some(sex) = patient.sex {
            metadata.insert("sex".to_string(), sex);
        }
        if let Some(wl) = worklist_ref {
            metadata.insert("accession".to_string(), wl.accession_number);
            metadata.insert(
                "requested_procedure_id".to_string(),
                wl.requested_procedure_id,
            );
            metadata.insert("scheduled_step_id".to_string(), wl.scheduled_step_id);
        }
        self.apply(Trigger::PatientConfirmed, metadata, operator).await
    }

    /// Typed wrapper for emergency registration; name, id and body part
    /// are the minimum data set.
    pub async fn register_emergency(
        self: &Arc<Self>,
        patient: PatientInfo,
        operator: &str,
    ) -> Result<TransitionResult> {
        let mut metadata = BTreeMap::new();
        metadata.insert("patient_id".to_string(), patient.patient_id);
        metadata.insert("patient_name".to_string(), patient.patient_name);
        self.apply(Trigger::EmergencyActivated, metadata, operator)
            .await
    }

    /// Typed wrapper for protocol selection. Out-of-bounds technique
    /// factors are rejected here and nothing is persisted.
    pub async fn select_protocol(
        self: &Arc<Self>,
        protocol: Protocol,
        operator: &str,
    ) -> Result<TransitionResult> {
        protocol.validate_against(&self.config.safety_limits)?;
        let mut metadata = BTreeMap::new();
        metadata.insert(
            "protocol".to_string(),
            serde_json::to_string(&protocol).map_err(|e| Error::InvalidMetadata(e.to_string()))?,
        );
        self.apply(Trigger::ProtocolSelected, metadata, operator).await
    }
}

#[derive(Debug, Clone)]
enum Effect {
    FetchWorklist,
    ConfigureAec,
    MppsInProgress,
    ArmAndTrigger { seq: u64 },
    RecordExposure {
        dap: f64,
        pixel: Option<PixelDescription>,
        image_uid: String,
    },
    AbortCleanup,
    MppsEnd { end_state: MppsEndState },
    ExportStudy,
}

fn projected_dap(protocol: &Protocol) -> f64 {
    // First-order projection from the technique factors; the recorded
    // sample replaces it once the exposure completes.
    protocol.kvp * protocol.ma * protocol.exposure_time_ms * 1.0e-5
}

fn study_identity(context: &StudyContext) -> StudyIdentity {
    StudyIdentity {
        study_uid: context.study_uid.clone(),
        accession_number: context.accession_number.clone(),
        patient_name: context.patient_name.clone(),
        patient_id: context.patient_id.clone(),
        patient_birth_date: context.birth_date.clone(),
        patient_sex: context.sex.clone(),
        unscheduled: context.emergency,
        requested_procedure_id: context
            .worklist_ref
            .as_ref()
            .map(|w| w.requested_procedure_id.clone()),
        scheduled_step_id: context
            .worklist_ref
            .as_ref()
            .map(|w| w.scheduled_step_id.clone()),
    }
}

fn exposure_info(record: &ExposureRecord, image_uid: &str, dap: f64) -> ExposureInfo {
    ExposureInfo {
        sop_instance_uid: image_uid.to_string(),
        series_uid: record.series_uid.clone(),
        series_number: 1,
        instance_number: 1,
        body_part: record.protocol.body_part.clone(),
        view_position: record.protocol.projection.clone(),
        kvp: record.protocol.kvp,
        ma: record.protocol.ma,
        exposure_time_ms: record.protocol.exposure_time_ms,
        dap_cgy_cm2: dap,
        operator_id: record.operator.clone(),
        acquired_at: record.acquired_at.unwrap_or_else(Utc::now),
        rejected: record.status == ExposureStatus::Rejected,
        rejection_reason: record.rejection_reason.clone(),
    }
}

/// Replays journal entries onto an empty engine state.
///
/// Only applied entries move the state; the result equals the state the
/// original run ended in.
pub fn replay_terminal_state(entries: &[xrc_journal::JournalEntry]) -> WorkflowState {
    let mut state = WorkflowState::Idle;
    for entry in entries {
        if entry.outcome != Outcome::Applied {
            continue;
        }
        match entry.to_state.parse::<WorkflowState>() {
            Ok(to) => state = to,
            Err(e) => warn!("Journal entry {} has an unknown state: {}", entry.id, e),
        }
    }
    state
}
