use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use xrc_common::Validate;
use xrc_common::uid::is_valid_uid;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    IO(#[from] std::io::Error),
    #[error("Configuration is not valid TOML or contains unknown keys: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("UID root is missing or not a dotted-numeric string")]
    InvalidUidRoot,
    #[error("Device serial is missing or not numeric")]
    InvalidDeviceSerial,
    #[error("Destination {0} is incomplete: {1}")]
    InvalidDestination(String, String),
    #[error("Destination names are not unique: {0}")]
    DuplicateDestination(String),
    #[error("TLS minimum version must be 1.2 or 1.3, got {0}")]
    InvalidTlsVersion(String),
    #[error("TLS is enabled for {0} but no TLS material is configured")]
    MissingTlsMaterial(String),
    #[error("Retry multiplier must be at least 1.0")]
    InvalidRetryMultiplier,
    #[error("Retry max attempts must be at least 1")]
    InvalidRetryAttempts,
    #[error("Dose warning threshold must lie in 1..=100 percent")]
    InvalidWarnThreshold,
    #[error("Dose limits must be positive")]
    InvalidDoseLimits,
    #[error("Safety limits must be positive")]
    InvalidSafetyLimits,
    #[error("Pool size must be at least 1")]
    InvalidPoolSize,
}

pub type Result<T> = std::result::Result<T, Error>;

/// Minimum accepted TLS protocol version.
///
/// Anything below 1.2 is rejected at parse time; there is no representation
/// for it.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TlsVersion {
    #[default]
    #[serde(rename = "1.2")]
    V1_2,
    #[serde(rename = "1.3")]
    V1_3,
}

impl FromStr for TlsVersion {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "1.2" => Ok(TlsVersion::V1_2),
            "1.3" => Ok(TlsVersion::V1_3),
            other => Err(Error::InvalidTlsVersion(other.to_string())),
        }
    }
}

/// TLS material and policy shared by all destinations that enable TLS.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TlsSettings {
    /// CA bundle used for chain validation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca: Option<PathBuf>,
    /// Client certificate presented when a destination requires mutual TLS
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_cert: Option<PathBuf>,
    /// Private key belonging to the client certificate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_key: Option<PathBuf>,
    /// Minimum accepted protocol version
    #[serde(default)]
    pub min_version: TlsVersion,
}

/// A remote DICOM application entity the console sends to.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Destination {
    /// Unique name for the destination
    pub name: String,
    /// Called AE title
    pub aet: String,
    /// Address to connect to
    pub host: String,
    /// Port to connect to
    pub port: u16,
    /// Encrypt the association; hostname and chain verification are mandatory
    #[serde(default)]
    pub tls: bool,
    /// Present the client certificate (mutual TLS)
    #[serde(default)]
    pub mutual_tls: bool,
    /// Export presentation states to this destination as well
    #[serde(default)]
    pub send_gsps: bool,
}

/// Association pool sizing and timeouts.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PoolSettings {
    /// Maximum simultaneous associations per destination
    pub max_size: usize,
    /// How long an acquisition waits for a free association before it fails
    pub acquisition_timeout_ms: u64,
    /// Idle associations older than this are released
    pub idle_eviction_ms: u64,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_size: 4,
            acquisition_timeout_ms: 30_000,
            idle_eviction_ms: 60_000,
        }
    }
}

/// Exponential backoff applied to failed DICOM transmissions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetrySettings {
    /// Delay before the first retry
    pub initial_ms: u64,
    /// Multiplier applied per attempt
    pub multiplier: f64,
    /// Ceiling for the computed delay
    pub max_ms: u64,
    /// Attempts after which an item becomes terminally failed
    pub max_attempts: u32,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            initial_ms: 30_000,
            multiplier: 2.0,
            max_ms: 3_600_000,
            max_attempts: 5,
        }
    }
}

/// Cumulative dose limits in cGy·cm² and the warning threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DoseLimits {
    /// Per-study DAP limit
    pub study: f64,
    /// Per-patient daily DAP limit
    pub daily: f64,
    /// Percentage of a limit at which a warning is raised
    pub warn_pct: u8,
}

/// Hard bounds on protocol technique factors for this device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SafetyLimits {
    /// Maximum tube voltage in kVp
    pub max_kvp: f64,
    /// Maximum tube current in mA
    pub max_ma: f64,
    /// Maximum exposure time in ms
    pub max_ms: f64,
}

/// Directories holding the durable state of the console.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Paths {
    /// Root directory for the journal, retry spool, dose ledger and UID counter
    pub data_dir: PathBuf,
}

impl Paths {
    pub fn journal_file(&self) -> PathBuf {
        self.data_dir.join("journal.jsonl")
    }

    pub fn retry_spool_dir(&self) -> PathBuf {
        self.data_dir.join("spool")
    }

    pub fn dose_ledger_dir(&self) -> PathBuf {
        self.data_dir.join("dose")
    }

    pub fn uid_counter_file(&self) -> PathBuf {
        self.data_dir.join("uid_counter")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Registered organization UID root; required, no baked-in fallback
    pub uid_root: String,
    /// Numeric device serial, second UID component
    pub device_serial: String,
    /// Our calling AE title
    pub local_aet: String,
    /// Archives that receive images and presentation states
    #[serde(default)]
    pub pacs_destinations: Vec<Destination>,
    /// Modality worklist provider
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worklist_scp: Option<Destination>,
    /// Performed-procedure-step receiver
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mpps_scp: Option<Destination>,
    #[serde(default)]
    pub tls: TlsSettings,
    #[serde(default)]
    pub pool: PoolSettings,
    #[serde(default)]
    pub retry: RetrySettings,
    /// How long a storage-commitment answer may take before the record
    /// moves to CommitTimeout
    #[serde(default = "default_commitment_timeout_ms")]
    pub commitment_timeout_ms: u64,
    pub dose_limits: DoseLimits,
    pub safety_limits: SafetyLimits,
    pub paths: Paths,
}

fn default_commitment_timeout_ms() -> u64 {
    300_000
}

impl Config {
    /// Reads and validates a configuration file.
    ///
    /// # Errors
    /// Fails if the file cannot be read, contains unknown keys, or violates
    /// any semantic rule checked by [`Validate::validate`].
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Ensures the data directories exist.
    pub fn create_dirs(&self) -> std::result::Result<(), std::io::Error> {
        std::fs::create_dir_all(&self.paths.data_dir)?;
        std::fs::create_dir_all(self.paths.retry_spool_dir())?;
        std::fs::create_dir_all(self.paths.dose_ledger_dir())?;
        Ok(())
    }

    /// All destinations the transport may open associations to.
    pub fn all_destinations(&self) -> Vec<&Destination> {
        let mut all: Vec<&Destination> = self.pacs_destinations.iter().collect();
        if let Some(wl) = &self.worklist_scp {
            all.push(wl);
        }
        if let Some(mpps) = &self.mpps_scp {
            all.push(mpps);
        }
        all
    }
}

impl Validate<Result<()>> for Config {
    fn validate(&self) -> Result<()> {
        if !is_valid_uid(&self.uid_root) {
            return Err(Error::InvalidUidRoot);
        }
        if self.device_serial.is_empty()
            || !self.device_serial.bytes().all(|b| b.is_ascii_digit())
        {
            return Err(Error::InvalidDeviceSerial);
        }
        let mut names = std::collections::HashSet::new();
        for dest in self.all_destinations() {
            validate_destination(dest)?;
            if !names.insert(dest.name.clone()) {
                return Err(Error::DuplicateDestination(dest.name.clone()));
            }
            if dest.tls && self.tls.ca.is_none() {
                return Err(Error::MissingTlsMaterial(dest.name.clone()));
            }
            if dest.mutual_tls
                && (self.tls.client_cert.is_none() || self.tls.client_key.is_none())
            {
                return Err(Error::MissingTlsMaterial(dest.name.clone()));
            }
        }
        if self.pool.max_size == 0 {
            return Err(Error::InvalidPoolSize);
        }
        if self.retry.multiplier < 1.0 {
            return Err(Error::InvalidRetryMultiplier);
        }
        if self.retry.max_attempts == 0 {
            return Err(Error::InvalidRetryAttempts);
        }
        if self.dose_limits.warn_pct == 0 || self.dose_limits.warn_pct > 100 {
            return Err(Error::InvalidWarnThreshold);
        }
        if self.dose_limits.study <= 0.0 || self.dose_limits.daily <= 0.0 {
            return Err(Error::InvalidDoseLimits);
        }
        if self.safety_limits.max_kvp <= 0.0
            || self.safety_limits.max_ma <= 0.0
            || self.safety_limits.max_ms <= 0.0
        {
            return Err(Error::InvalidSafetyLimits);
        }
        Ok(())
    }
}

fn validate_destination(dest: &Destination) -> Result<()> {
    if dest.name.is_empty() {
        return Err(Error::InvalidDestination(
            "<unnamed>".to_string(),
            "name is empty".to_string(),
        ));
    }
    if dest.aet.is_empty() || dest.aet.len() > 16 {
        return Err(Error::InvalidDestination(
            dest.name.clone(),
            "AE title must be 1 to 16 characters".to_string(),
        ));
    }
    if dest.host.is_empty() {
        return Err(Error::InvalidDestination(
            dest.name.clone(),
            "host is empty".to_string(),
        ));
    }
    if dest.port == 0 {
        return Err(Error::InvalidDestination(
            dest.name.clone(),
            "port is zero".to_string(),
        ));
    }
    Ok(())
}
