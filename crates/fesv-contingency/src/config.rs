//! # Contingency Configuration
//!
//! Engine settings: store, authority deadlines, worker cadence,
//! reconciliation and identifier generation.
//!
//! ## Configuration Sources (priority order)
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest)                                    │
//! │     FESV_DATABASE_PATH, FESV_TIMEZONE, FESV_REQUEST_TIMEOUT_SECS, ...  │
//! │                                                                         │
//! │  2. Config File (contingency.toml)                                     │
//! │     ~/.config/fesv/contingency.toml (Linux)                            │
//! │     ~/Library/Application Support/sv.fesv.contingency/ (macOS)         │
//! │     %APPDATA%\fesv\contingency\config\ (Windows)                       │
//! │                                                                         │
//! │  3. Default Values (lowest)                                            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::time::Duration;

use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use fesv_core::MAX_DOCUMENTS_PER_EVENT;
use fesv_db::DbConfig;

use crate::error::{ContingencyError, ContingencyResult};

/// Timezone periods and events are stamped in.
pub const DEFAULT_TIMEZONE: &str = "America/El_Salvador";

// =============================================================================
// Store
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreSettings {
    /// SQLite database file.
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// How long a writer waits for the SQLite write lock (milliseconds).
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    /// Deadline for one store operation (seconds).
    #[serde(default = "default_operation_timeout")]
    pub operation_timeout_secs: u64,
}

fn default_database_path() -> PathBuf {
    PathBuf::from("contingency.db")
}
fn default_max_connections() -> u32 {
    5
}
fn default_busy_timeout_ms() -> u64 {
    5000
}
fn default_operation_timeout() -> u64 {
    10
}

impl Default for StoreSettings {
    fn default() -> Self {
        StoreSettings {
            database_path: default_database_path(),
            max_connections: default_max_connections(),
            busy_timeout_ms: default_busy_timeout_ms(),
            operation_timeout_secs: default_operation_timeout(),
        }
    }
}

// =============================================================================
// Authority
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthoritySettings {
    /// Deadline for one authority or signer call (seconds).
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// First wait between authentication attempts (milliseconds).
    #[serde(default = "default_auth_initial_backoff")]
    pub auth_initial_backoff_ms: u64,

    /// Longest wait between authentication attempts (seconds).
    #[serde(default = "default_auth_max_backoff")]
    pub auth_max_backoff_secs: u64,

    /// Give up authenticating after this long (seconds).
    #[serde(default = "default_auth_max_elapsed")]
    pub auth_max_elapsed_secs: u64,
}

fn default_request_timeout() -> u64 {
    30
}
fn default_auth_initial_backoff() -> u64 {
    500
}
fn default_auth_max_backoff() -> u64 {
    10
}
fn default_auth_max_elapsed() -> u64 {
    60
}

impl Default for AuthoritySettings {
    fn default() -> Self {
        AuthoritySettings {
            request_timeout_secs: default_request_timeout(),
            auth_initial_backoff_ms: default_auth_initial_backoff(),
            auth_max_backoff_secs: default_auth_max_backoff(),
            auth_max_elapsed_secs: default_auth_max_elapsed(),
        }
    }
}

// =============================================================================
// Worker
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerSettings {
    #[serde(default = "default_signature_retry_interval")]
    pub signature_retry_interval_secs: u64,

    #[serde(default = "default_period_check_interval")]
    pub period_check_interval_secs: u64,

    #[serde(default = "default_lote_submit_interval")]
    pub lote_submit_interval_secs: u64,

    #[serde(default = "default_lote_poll_interval")]
    pub lote_poll_interval_secs: u64,

    #[serde(default = "default_stale_sweep_interval")]
    pub stale_sweep_interval_secs: u64,

    /// Claims older than this are considered abandoned by a crashed worker.
    #[serde(default = "default_stale_claim_after")]
    pub stale_claim_after_secs: u64,

    #[serde(default = "default_period_claim_limit")]
    pub period_claim_limit: i64,

    #[serde(default = "default_lote_submit_limit")]
    pub lote_submit_limit: i64,

    #[serde(default = "default_lote_poll_limit")]
    pub lote_poll_limit: i64,

    /// Unsigned documents retried per signature pass.
    #[serde(default = "default_signature_batch_size")]
    pub signature_batch_size: i64,

    /// Documents per evento de contingencia (authority ceiling: 1000).
    #[serde(default = "default_max_documents_per_event")]
    pub max_documents_per_event: usize,

    /// Signature attempts before a document is left for manual intervention.
    #[serde(default = "default_max_signature_retries")]
    pub max_signature_retries: i64,
}

fn default_signature_retry_interval() -> u64 {
    300
}
fn default_period_check_interval() -> u64 {
    120
}
fn default_lote_submit_interval() -> u64 {
    60
}
fn default_lote_poll_interval() -> u64 {
    30
}
fn default_stale_sweep_interval() -> u64 {
    300
}
fn default_stale_claim_after() -> u64 {
    900
}
fn default_period_claim_limit() -> i64 {
    10
}
fn default_lote_submit_limit() -> i64 {
    5
}
fn default_lote_poll_limit() -> i64 {
    10
}
fn default_signature_batch_size() -> i64 {
    50
}
fn default_max_documents_per_event() -> usize {
    MAX_DOCUMENTS_PER_EVENT
}
fn default_max_signature_retries() -> i64 {
    5
}

impl Default for WorkerSettings {
    fn default() -> Self {
        WorkerSettings {
            signature_retry_interval_secs: default_signature_retry_interval(),
            period_check_interval_secs: default_period_check_interval(),
            lote_submit_interval_secs: default_lote_submit_interval(),
            lote_poll_interval_secs: default_lote_poll_interval(),
            stale_sweep_interval_secs: default_stale_sweep_interval(),
            stale_claim_after_secs: default_stale_claim_after(),
            period_claim_limit: default_period_claim_limit(),
            lote_submit_limit: default_lote_submit_limit(),
            lote_poll_limit: default_lote_poll_limit(),
            signature_batch_size: default_signature_batch_size(),
            max_documents_per_event: default_max_documents_per_event(),
            max_signature_retries: default_max_signature_retries(),
        }
    }
}

// =============================================================================
// Reconciliation and Identifiers
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileSettings {
    /// Authority queries in flight at once.
    #[serde(default = "default_reconcile_concurrency")]
    pub concurrency: usize,

    /// Allowed skew between local and authority processing times (seconds).
    #[serde(default = "default_tolerance")]
    pub tolerance_secs: u64,
}

fn default_reconcile_concurrency() -> usize {
    4
}
fn default_tolerance() -> u64 {
    60
}

impl Default for ReconcileSettings {
    fn default() -> Self {
        ReconcileSettings {
            concurrency: default_reconcile_concurrency(),
            tolerance_secs: default_tolerance(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdSettings {
    /// Inserts retried with a fresh key after a unique violation.
    #[serde(default = "default_id_attempts")]
    pub max_attempts: u32,
}

fn default_id_attempts() -> u32 {
    5
}

impl Default for IdSettings {
    fn default() -> Self {
        IdSettings {
            max_attempts: default_id_attempts(),
        }
    }
}

// =============================================================================
// Main Configuration
// =============================================================================

/// Complete engine configuration.
///
/// ## Example Config File
/// ```toml
/// timezone = "America/El_Salvador"
///
/// [store]
/// database_path = "/var/lib/fesv/contingency.db"
/// operation_timeout_secs = 10
///
/// [authority]
/// request_timeout_secs = 30
/// auth_max_elapsed_secs = 60
///
/// [worker]
/// period_check_interval_secs = 120
/// max_signature_retries = 5
///
/// [reconcile]
/// concurrency = 4
/// tolerance_secs = 60
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContingencyConfig {
    /// IANA timezone for period and event stamps.
    #[serde(default = "default_timezone")]
    pub timezone: String,

    #[serde(default)]
    pub store: StoreSettings,

    #[serde(default)]
    pub authority: AuthoritySettings,

    #[serde(default)]
    pub worker: WorkerSettings,

    #[serde(default)]
    pub reconcile: ReconcileSettings,

    #[serde(default)]
    pub ids: IdSettings,
}

fn default_timezone() -> String {
    DEFAULT_TIMEZONE.to_string()
}

impl Default for ContingencyConfig {
    fn default() -> Self {
        ContingencyConfig {
            timezone: default_timezone(),
            store: StoreSettings::default(),
            authority: AuthoritySettings::default(),
            worker: WorkerSettings::default(),
            reconcile: ReconcileSettings::default(),
            ids: IdSettings::default(),
        }
    }
}

impl ContingencyConfig {
    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (contingency.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> ContingencyResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading contingency config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = Self::from_toml(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Parses a TOML document; missing keys take their defaults.
    pub fn from_toml(contents: &str) -> ContingencyResult<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Validates the configuration.
    pub fn validate(&self) -> ContingencyResult<()> {
        self.tz()?;

        if self.store.max_connections == 0 {
            return Err(invalid("store.max_connections must be greater than 0"));
        }
        if self.store.operation_timeout_secs == 0 || self.authority.request_timeout_secs == 0 {
            return Err(invalid("timeouts must be greater than 0"));
        }

        let w = &self.worker;
        if [
            w.signature_retry_interval_secs,
            w.period_check_interval_secs,
            w.lote_submit_interval_secs,
            w.lote_poll_interval_secs,
            w.stale_sweep_interval_secs,
        ]
        .contains(&0)
        {
            return Err(invalid("worker intervals must be greater than 0"));
        }
        if w.period_claim_limit <= 0 || w.lote_submit_limit <= 0 || w.lote_poll_limit <= 0 {
            return Err(invalid("worker claim limits must be greater than 0"));
        }
        if w.signature_batch_size <= 0 {
            return Err(invalid("worker.signature_batch_size must be greater than 0"));
        }
        if w.max_documents_per_event == 0 || w.max_documents_per_event > MAX_DOCUMENTS_PER_EVENT {
            return Err(ContingencyError::InvalidConfig(format!(
                "worker.max_documents_per_event must be between 1 and {MAX_DOCUMENTS_PER_EVENT}"
            )));
        }
        if w.max_signature_retries <= 0 {
            return Err(invalid("worker.max_signature_retries must be greater than 0"));
        }

        if self.reconcile.concurrency == 0 {
            return Err(invalid("reconcile.concurrency must be greater than 0"));
        }
        if self.ids.max_attempts == 0 {
            return Err(invalid("ids.max_attempts must be at least 1"));
        }

        Ok(())
    }

    /// Applies `FESV_*` environment variable overrides.
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(path) = lookup("FESV_DATABASE_PATH") {
            debug!(path = %path, "Overriding database path from environment");
            self.store.database_path = PathBuf::from(path);
        }

        if let Some(tz) = lookup("FESV_TIMEZONE") {
            debug!(timezone = %tz, "Overriding timezone from environment");
            self.timezone = tz;
        }

        override_number(&lookup, "FESV_STORE_TIMEOUT_SECS", &mut self.store.operation_timeout_secs);
        override_number(&lookup, "FESV_REQUEST_TIMEOUT_SECS", &mut self.authority.request_timeout_secs);
        override_number(&lookup, "FESV_PERIOD_CLAIM_LIMIT", &mut self.worker.period_claim_limit);
        override_number(&lookup, "FESV_MAX_SIGNATURE_RETRIES", &mut self.worker.max_signature_retries);
        override_number(&lookup, "FESV_RECONCILE_CONCURRENCY", &mut self.reconcile.concurrency);
        override_number(&lookup, "FESV_ID_MAX_ATTEMPTS", &mut self.ids.max_attempts);
    }

    /// Returns the default config file path.
    fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("sv", "fesv", "contingency")
            .map(|dirs| dirs.config_dir().join("contingency.toml"))
    }

    // =========================================================================
    // Convenience Methods
    // =========================================================================

    /// The configured timezone.
    pub fn tz(&self) -> ContingencyResult<Tz> {
        self.timezone.parse::<Tz>().map_err(|_| {
            ContingencyError::InvalidConfig(format!("unknown timezone: {}", self.timezone))
        })
    }

    /// Pool settings for [`fesv_db::Database::new`].
    pub fn db_config(&self) -> DbConfig {
        DbConfig::new(self.store.database_path.clone())
            .max_connections(self.store.max_connections)
            .busy_timeout(Duration::from_millis(self.store.busy_timeout_ms))
            .max_id_attempts(self.ids.max_attempts)
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_secs(self.store.operation_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.authority.request_timeout_secs)
    }

    pub fn stale_claim_after(&self) -> Duration {
        Duration::from_secs(self.worker.stale_claim_after_secs)
    }

    pub fn tolerance(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.reconcile.tolerance_secs as i64)
    }
}

fn invalid(message: &str) -> ContingencyError {
    ContingencyError::InvalidConfig(message.to_string())
}

fn override_number<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    target: &mut T,
) {
    if let Some(raw) = lookup(key) {
        match raw.parse::<T>() {
            Ok(value) => {
                debug!(key, "Overriding setting from environment");
                *target = value;
            }
            Err(_) => warn!(key, value = %raw, "Ignoring unparseable environment override"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = ContingencyConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.timezone, "America/El_Salvador");
        assert_eq!(config.worker.period_claim_limit, 10);
        assert_eq!(config.worker.max_documents_per_event, 1000);
        assert_eq!(config.worker.max_signature_retries, 5);
        assert_eq!(config.reconcile.tolerance_secs, 60);
        assert_eq!(config.ids.max_attempts, 5);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = ContingencyConfig::from_toml(
            r#"
            timezone = "America/Guatemala"

            [worker]
            period_check_interval_secs = 15

            [reconcile]
            concurrency = 8
            "#,
        )
        .unwrap();

        assert_eq!(config.timezone, "America/Guatemala");
        assert_eq!(config.worker.period_check_interval_secs, 15);
        assert_eq!(config.worker.lote_poll_interval_secs, 30);
        assert_eq!(config.reconcile.concurrency, 8);
        assert_eq!(config.reconcile.tolerance_secs, 60);
        assert_eq!(config.store.operation_timeout_secs, 10);
    }

    #[test]
    fn test_config_validation() {
        let mut config = ContingencyConfig::default();

        config.timezone = "Mars/Olympus_Mons".to_string();
        assert!(config.validate().is_err());

        config = ContingencyConfig::default();
        config.worker.max_documents_per_event = 1001;
        assert!(config.validate().is_err());

        config = ContingencyConfig::default();
        config.reconcile.concurrency = 0;
        assert!(config.validate().is_err());

        config = ContingencyConfig::default();
        config.worker.lote_poll_interval_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("FESV_DATABASE_PATH", "/tmp/fesv.db"),
            ("FESV_RECONCILE_CONCURRENCY", "2"),
            ("FESV_MAX_SIGNATURE_RETRIES", "not-a-number"),
        ]);

        let mut config = ContingencyConfig::default();
        config.apply_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.store.database_path, PathBuf::from("/tmp/fesv.db"));
        assert_eq!(config.reconcile.concurrency, 2);
        assert_eq!(config.worker.max_signature_retries, 5);
    }

    #[test]
    fn test_db_config_mapping() {
        let mut config = ContingencyConfig::default();
        config.store.busy_timeout_ms = 250;
        config.ids.max_attempts = 3;

        let db = config.db_config();
        assert_eq!(db.busy_timeout, Duration::from_millis(250));
        assert_eq!(db.max_id_attempts, 3);
        assert_eq!(db.database_path, PathBuf::from("contingency.db"));
    }

    #[test]
    fn test_toml_serialization() {
        let config = ContingencyConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed = ContingencyConfig::from_toml(&toml_str).unwrap();
        assert_eq!(parsed.worker.period_claim_limit, config.worker.period_claim_limit);
    }
}
