use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use tracing::{debug, warn};
use walkdir::WalkDir;
use xrc_common::phi::patient_token;
use xrc_config::DoseLimits;
use xrc_event_bus::{ConsoleEvent, EventBus};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Dose ledger IO error: {0}")]
    IO(#[from] std::io::Error),
    #[error("Dose ledger entry is not valid JSON: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("DAP must be finite and non-negative, got {0}")]
    InvalidDap(f64),
}

pub type Result<T> = std::result::Result<T, Error>;

/// One persisted dose sample.
///
/// The patient is identified only by the one-way token; the raw identifier
/// never reaches the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DoseEntry {
    pub study_uid: String,
    pub patient_token: String,
    /// SOP Instance UID of the exposure's image object
    pub exposure_uid: String,
    pub dap_cgy_cm2: f64,
    /// Rejected exposures still irradiated the patient; they count toward
    /// cumulative dose and are reported separately in the RDSR feed.
    pub rejected: bool,
    pub at: DateTime<Utc>,
}

/// Immutable per-study aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudyDoseSummary {
    pub study_uid: String,
    pub exposure_count: usize,
    pub total_dap: f64,
    pub accepted_dap: f64,
    pub rejected_dap: f64,
}

/// Outcome of a projected-dose check ahead of an exposure.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LimitCheck {
    pub within_study_limit: bool,
    pub within_daily_limit: bool,
    pub projected_study_dap: f64,
    pub projected_daily_dap: f64,
    pub should_warn: bool,
}

impl LimitCheck {
    pub fn within_limits(&self) -> bool {
        self.within_study_limit && self.within_daily_limit
    }
}

/// Cumulative DAP accounting per study and per patient-day.
///
/// Entries are appended to one JSON-lines file per study under the ledger
/// directory and fsynced before the `DoseRecorded` event publishes. The
/// in-memory aggregates are rebuilt from the ledger on startup.
pub struct DoseTracker {
    ledger_dir: PathBuf,
    limits: DoseLimits,
    bus: Arc<EventBus>,
    studies: RwLock<HashMap<String, Vec<DoseEntry>>>,
    daily: RwLock<HashMap<(String, NaiveDate), f64>>,
}

impl DoseTracker {
    /// Opens the ledger directory and rebuilds the aggregates.
    pub fn open<P: AsRef<Path>>(
        ledger_dir: P,
        limits: DoseLimits,
        bus: Arc<EventBus>,
    ) -> Result<Self> {
        let ledger_dir = ledger_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&ledger_dir)?;
        let tracker = Self {
            ledger_dir,
            limits,
            bus,
            studies: RwLock::new(HashMap::new()),
            daily: RwLock::new(HashMap::new()),
        };
        tracker.reload()?;
        Ok(tracker)
    }

    fn reload(&self) -> Result<()> {
        let mut studies: HashMap<String, Vec<DoseEntry>> = HashMap::new();
        let mut daily: HashMap<(String, NaiveDate), f64> = HashMap::new();
        for entry in WalkDir::new(&self.ledger_dir)
            .max_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            let path = entry.path();
            if !path.is_file() || path.extension().and_then(|e| e.to_str()) != Some("jsonl") {
                continue;
            }
            let content = std::fs::read_to_string(path)?;
            for line in content.lines() {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<DoseEntry>(line) {
                    Ok(dose) => {
                        *daily
                            .entry((dose.patient_token.clone(), dose.at.date_naive()))
                            .or_insert(0.0) += dose.dap_cgy_cm2;
                        studies.entry(dose.study_uid.clone()).or_default().push(dose);
                    }
                    Err(e) => warn!(
                        "Skipping unparseable dose ledger line in {}: {}",
                        path.display(),
                        e
                    ),
                }
            }
        }
        debug!("Dose ledger reloaded, {} studies", studies.len());
        *self.studies.write().unwrap() = studies;
        *self.daily.write().unwrap() = daily;
        Ok(())
    }

    /// Records one exposure's dose.
    ///
    /// The entry is durable in the ledger before the event publishes.
    pub fn record(
        &self,
        study_uid: &str,
        patient_id: &str,
        exposure_uid: &str,
        dap_cgy_cm2: f64,
        rejected: bool,
    ) -> Result<DoseEntry> {
        if !dap_cgy_cm2.is_finite() || dap_cgy_cm2 < 0.0 {
            return Err(Error::InvalidDap(dap_cgy_cm2));
        }
        let entry = DoseEntry {
            study_uid: study_uid.to_string(),
            patient_token: patient_token(patient_id),
            exposure_uid: exposure_uid.to_string(),
            dap_cgy_cm2,
            rejected,
            at: Utc::now(),
        };
        self.persist(&entry)?;
        let cumulative = {
            let mut studies = self.studies.write().unwrap();
            let ledger = studies.entry(entry.study_uid.clone()).or_default();
            ledger.push(entry.clone());
            ledger.iter().map(|e| e.dap_cgy_cm2).sum()
        };
        {
            let mut daily = self.daily.write().unwrap();
            *daily
                .entry((entry.patient_token.clone(), entry.at.date_naive()))
                .or_insert(0.0) += entry.dap_cgy_cm2;
        }
        self.bus.publish(ConsoleEvent::DoseRecorded {
            study_uid: entry.study_uid.clone(),
            dap_cgy_cm2: entry.dap_cgy_cm2,
            cumulative_study_dap: cumulative,
            rejected: entry.rejected,
        });
        Ok(entry)
    }

    fn persist(&self, entry: &DoseEntry) -> Result<()> {
        let path = self.ledger_dir.join(format!("{}.jsonl", entry.study_uid));
        let mut line = serde_json::to_string(entry)?;
        line.push('\n');
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)?;
        file.write_all(line.as_bytes())?;
        file.sync_data()?;
        Ok(())
    }

    /// Checks a proposed exposure against the study and daily limits.
    ///
    /// Limits are inclusive: a projection exactly at the limit is within it.
    pub fn check_limits(&self, patient_id: &str, study_uid: &str, proposed_dap: f64) -> LimitCheck {
        let token = patient_token(patient_id);
        let study_total: f64 = self
            .studies
            .read()
            .unwrap()
            .get(study_uid)
            .map(|entries| entries.iter().map(|e| e.dap_cgy_cm2).sum())
            .unwrap_or(0.0);
        let daily_total: f64 = self
            .daily
            .read()
            .unwrap()
            .get(&(token, Utc::now().date_naive()))
            .copied()
            .unwrap_or(0.0);
        let projected_study_dap = study_total + proposed_dap;
        let projected_daily_dap = daily_total + proposed_dap;
        let warn_fraction = f64::from(self.limits.warn_pct) / 100.0;
        LimitCheck {
            within_study_limit: projected_study_dap <= self.limits.study,
            within_daily_limit: projected_daily_dap <= self.limits.daily,
            projected_study_dap,
            projected_daily_dap,
            should_warn: projected_study_dap >= self.limits.study * warn_fraction
                || projected_daily_dap >= self.limits.daily * warn_fraction,
        }
    }

    /// Immutable aggregate for one study.
    pub fn study_dose_summary(&self, study_uid: &str) -> StudyDoseSummary {
        let studies = self.studies.read().unwrap();
        let entries = studies.get(study_uid).map(Vec::as_slice).unwrap_or(&[]);
        let accepted_dap = entries
            .iter()
            .filter(|e| !e.rejected)
            .map(|e| e.dap_cgy_cm2)
            .sum();
        let rejected_dap = entries
            .iter()
            .filter(|e| e.rejected)
            .map(|e| e.dap_cgy_cm2)
            .sum::<f64>();
        StudyDoseSummary {
            study_uid: study_uid.to_string(),
            exposure_count: entries.len(),
            total_dap: accepted_dap + rejected_dap,
            accepted_dap,
            rejected_dap,
        }
    }

    /// Immutable snapshot of a study's dose entries, the RDSR feed input.
    pub fn study_exposure_records(&self, study_uid: &str) -> Vec<DoseEntry> {
        self.studies
            .read()
            .unwrap()
            .get(study_uid)
            .cloned()
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> DoseLimits {
        DoseLimits {
            study: 100.0,
            daily: 150.0,
            warn_pct: 80,
        }
    }

    fn tracker(dir: &Path) -> DoseTracker {
        DoseTracker::open(dir, limits(), Arc::new(EventBus::new())).unwrap()
    }

    #[test]
    fn record_accumulates_per_study() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = tracker(dir.path());
        tracker.record("1.2.3", "PAT-1", "1.2.3.1", 20.0, false).unwrap();
        tracker.record("1.2.3", "PAT-1", "1.2.3.2", 30.0, true).unwrap();
        let summary = tracker.study_dose_summary("1.2.3");
        assert_eq!(summary.exposure_count, 2);
        assert_eq!(summary.total_dap, 50.0);
        assert_eq!(summary.accepted_dap, 20.0);
        assert_eq!(summary.rejected_dap, 30.0);
    }

    #[test]
    fn rejected_exposures_count_toward_limits() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = tracker(dir.path());
        tracker.record("1.2.3", "PAT-1", "1.2.3.1", 90.0, true).unwrap();
        let check = tracker.check_limits("PAT-1", "1.2.3", 20.0);
        assert!(!check.within_study_limit);
    }

    #[test]
    fn limit_boundaries_are_inclusive() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = tracker(dir.path());
        tracker.record("1.2.3", "PAT-1", "1.2.3.1", 60.0, false).unwrap();
        let at_limit = tracker.check_limits("PAT-1", "1.2.3", 40.0);
        assert!(at_limit.within_study_limit);
        let above = tracker.check_limits("PAT-1", "1.2.3", 40.1);
        assert!(!above.within_study_limit);
    }

    #[test]
    fn warning_threshold_applies() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = tracker(dir.path());
        let quiet = tracker.check_limits("PAT-1", "1.2.3", 50.0);
        assert!(!quiet.should_warn);
        let warned = tracker.check_limits("PAT-1", "1.2.3", 85.0);
        assert!(warned.should_warn);
        assert!(warned.within_study_limit);
    }

    #[test]
    fn daily_limit_spans_studies() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = tracker(dir.path());
        tracker.record("1.2.3", "PAT-1", "1.2.3.1", 80.0, false).unwrap();
        tracker.record("1.2.4", "PAT-1", "1.2.4.1", 60.0, false).unwrap();
        let check = tracker.check_limits("PAT-1", "1.2.5", 20.0);
        assert!(check.within_study_limit);
        assert!(!check.within_daily_limit);
    }

    #[test]
    fn ledger_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        {
            let tracker = tracker(dir.path());
            tracker.record("1.2.3", "PAT-1", "1.2.3.1", 42.0, false).unwrap();
        }
        let reopened = tracker(dir.path());
        let summary = reopened.study_dose_summary("1.2.3");
        assert_eq!(summary.exposure_count, 1);
        assert_eq!(summary.total_dap, 42.0);
        assert_eq!(reopened.study_exposure_records("1.2.3").len(), 1);
    }

    #[test]
    fn persist_precedes_publish() {
        let dir = tempfile::tempdir().unwrap();
        let bus = Arc::new(EventBus::new());
        let tracker = DoseTracker::open(dir.path(), limits(), bus.clone()).unwrap();
        let mut sub = bus.subscribe();
        tracker.record("1.2.3", "PAT-1", "1.2.3.1", 5.0, false).unwrap();
        // By the time the event is observable the ledger line exists.
        match sub.try_recv().unwrap() {
            ConsoleEvent::DoseRecorded { study_uid, .. } => {
                let content =
                    std::fs::read_to_string(dir.path().join(format!("{study_uid}.jsonl")))
                        .unwrap();
                assert_eq!(content.lines().count(), 1);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn invalid_dap_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = tracker(dir.path());
        assert!(tracker.record("1.2.3", "PAT-1", "1.2.3.1", -1.0, false).is_err());
        assert!(tracker
            .record("1.2.3", "PAT-1", "1.2.3.1", f64::NAN, false)
            .is_err());
    }
}
