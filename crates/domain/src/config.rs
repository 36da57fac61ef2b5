//! Typed configuration tree (TOML on disk, env overlay for identity and
//! secrets).
//!
//! Every section is optional in the file; defaults come from the `d_*`
//! helpers. `Config::validate` returns severity-tagged issues; the server
//! refuses to start on any `Error`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub credit: CreditConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Server
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "d_port")]
    pub port: u16,
    #[serde(default = "d_host")]
    pub host: String,
    #[serde(default)]
    pub cors: CorsConfig,
    /// Env var holding the API bearer token. Read once at startup.
    #[serde(default = "d_token_env")]
    pub api_token_env: String,
    /// Env var holding the hex ed25519 verifying key for emergency
    /// shutdown requests. Read once at startup.
    #[serde(default = "d_shutdown_key_env")]
    pub shutdown_key_env: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: d_port(),
            host: d_host(),
            cors: CorsConfig::default(),
            api_token_env: d_token_env(),
            shutdown_key_env: d_shutdown_key_env(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorsConfig {
    /// Origins allowed for CORS. A trailing `:*` wildcards the port.
    #[serde(default = "d_origins")]
    pub allowed_origins: Vec<String>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: d_origins(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Storage
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Sqlite,
    Postgres,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "d_backend")]
    pub backend: StorageBackend,
    /// Connection URL. For sqlite this is derived from `data_dir` when
    /// unset.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "d_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: d_backend(),
            url: None,
            data_dir: d_data_dir(),
        }
    }
}

impl StorageConfig {
    /// Resolve the effective connection URL.
    pub fn effective_url(&self) -> String {
        match (&self.url, self.backend) {
            (Some(url), _) => url.clone(),
            (None, StorageBackend::Sqlite) => {
                format!(
                    "sqlite://{}?mode=rwc",
                    self.data_dir.join("ciris.db").display()
                )
            }
            (None, StorageBackend::Postgres) => String::new(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Runtime
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Identity of this occurrence; overridable by `CIRIS_OCCURRENCE_ID`.
    #[serde(default = "d_occurrence")]
    pub occurrence_id: String,
    /// Max thoughts run through the pipeline concurrently.
    #[serde(default = "d_concurrency")]
    pub max_concurrent_thoughts: usize,
    /// Round deadline; bus-call deadlines derive from this.
    #[serde(default = "d_round_deadline")]
    pub round_deadline_secs: u64,
    /// Ready-queue high-water mark; intake pauses above it.
    #[serde(default = "d_high_water")]
    pub queue_high_water: usize,
    /// Ready-queue low-water mark; intake resumes below it.
    #[serde(default = "d_low_water")]
    pub queue_low_water: usize,
    /// Poll interval of the round loop when the queue is empty.
    #[serde(default = "d_idle_poll_ms")]
    pub idle_poll_ms: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            occurrence_id: d_occurrence(),
            max_concurrent_thoughts: d_concurrency(),
            round_deadline_secs: d_round_deadline(),
            queue_high_water: d_high_water(),
            queue_low_water: d_low_water(),
            idle_poll_ms: d_idle_poll_ms(),
        }
    }
}

impl RuntimeConfig {
    /// Apply the environment overlay (identity + data locations only).
    pub fn overlay_env(&mut self) {
        if let Ok(id) = std::env::var("CIRIS_OCCURRENCE_ID") {
            if !id.is_empty() {
                self.occurrence_id = id;
            }
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Registry / circuit breakers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Consecutive failures before a provider's circuit opens.
    #[serde(default = "d_failures")]
    pub failure_threshold: u32,
    /// Initial open-state cooldown.
    #[serde(default = "d_cooldown")]
    pub cooldown_secs: u64,
    /// Ceiling for the exponential cooldown.
    #[serde(default = "d_max_cooldown")]
    pub max_cooldown_secs: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            failure_threshold: d_failures(),
            cooldown_secs: d_cooldown(),
            max_cooldown_secs: d_max_cooldown(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Credit
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreditConfig {
    /// Credits granted to a subject on first contact.
    #[serde(default = "d_initial_grant")]
    pub initial_grant: i64,
}

impl Default for CreditConfig {
    fn default() -> Self {
        Self {
            initial_grant: d_initial_grant(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Telemetry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Metric name prefix for text exports.
    #[serde(default = "d_metric_prefix")]
    pub metric_prefix: String,
    /// Rolling window size for seconds-per-thought.
    #[serde(default = "d_metrics_window")]
    pub thought_window: usize,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            metric_prefix: d_metric_prefix(),
            thought_window: d_metrics_window(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Warning,
    Error,
}

#[derive(Debug, Clone)]
pub struct ConfigIssue {
    pub severity: ConfigSeverity,
    pub field: &'static str,
    pub message: String,
}

impl fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl Config {
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();

        if self.runtime.occurrence_id.is_empty() {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "runtime.occurrence_id",
                message: "must not be empty".into(),
            });
        }
        if self.runtime.max_concurrent_thoughts == 0 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "runtime.max_concurrent_thoughts",
                message: "must be at least 1".into(),
            });
        }
        if self.runtime.queue_low_water >= self.runtime.queue_high_water {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "runtime.queue_low_water",
                message: "must be below queue_high_water".into(),
            });
        }
        if self.storage.backend == StorageBackend::Postgres && self.storage.url.is_none() {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "storage.url",
                message: "required for the postgres backend".into(),
            });
        }
        if self.registry.failure_threshold == 0 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "registry.failure_threshold",
                message: "must be at least 1".into(),
            });
        }
        if self.registry.max_cooldown_secs < self.registry.cooldown_secs {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Warning,
                field: "registry.max_cooldown_secs",
                message: "below cooldown_secs; cooldown will not back off".into(),
            });
        }
        if self.credit.initial_grant < 0 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Warning,
                field: "credit.initial_grant",
                message: "negative grant blocks all new subjects".into(),
            });
        }

        issues
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Defaults
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn d_port() -> u16 {
    3280
}
fn d_host() -> String {
    "127.0.0.1".into()
}
fn d_token_env() -> String {
    "CIRIS_API_TOKEN".into()
}
fn d_shutdown_key_env() -> String {
    "CIRIS_SHUTDOWN_VERIFY_KEY".into()
}
fn d_origins() -> Vec<String> {
    vec!["http://localhost:*".into()]
}
fn d_backend() -> StorageBackend {
    StorageBackend::Sqlite
}
fn d_data_dir() -> PathBuf {
    PathBuf::from("./data")
}
fn d_occurrence() -> String {
    "default".into()
}
fn d_concurrency() -> usize {
    4
}
fn d_round_deadline() -> u64 {
    60
}
fn d_high_water() -> usize {
    256
}
fn d_low_water() -> usize {
    64
}
fn d_idle_poll_ms() -> u64 {
    250
}
fn d_failures() -> u32 {
    5
}
fn d_cooldown() -> u64 {
    30
}
fn d_max_cooldown() -> u64 {
    300
}
fn d_initial_grant() -> i64 {
    10
}
fn d_metric_prefix() -> String {
    "ciris".into()
}
fn d_metrics_window() -> usize {
    100
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate_clean() {
        let config = Config::default();
        assert!(config.validate().is_empty());
    }

    #[test]
    fn empty_toml_parses_to_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.server.port, 3280);
        assert_eq!(config.runtime.max_concurrent_thoughts, 4);
        assert_eq!(config.registry.failure_threshold, 5);
        assert_eq!(config.telemetry.thought_window, 100);
    }

    #[test]
    fn partial_toml_keeps_section_defaults() {
        let config: Config = toml::from_str(
            r#"
            [runtime]
            occurrence_id = "occ-west-1"
            max_concurrent_thoughts = 8
            "#,
        )
        .unwrap();
        assert_eq!(config.runtime.occurrence_id, "occ-west-1");
        assert_eq!(config.runtime.max_concurrent_thoughts, 8);
        assert_eq!(config.runtime.queue_high_water, 256);
    }

    #[test]
    fn postgres_without_url_is_an_error() {
        let config: Config = toml::from_str(
            r#"
            [storage]
            backend = "postgres"
            "#,
        )
        .unwrap();
        let issues = config.validate();
        assert!(issues
            .iter()
            .any(|i| i.severity == ConfigSeverity::Error && i.field == "storage.url"));
    }

    #[test]
    fn watermark_inversion_is_an_error() {
        let mut config = Config::default();
        config.runtime.queue_low_water = 500;
        let issues = config.validate();
        assert!(issues
            .iter()
            .any(|i| i.field == "runtime.queue_low_water"));
    }

    #[test]
    fn sqlite_url_derived_from_data_dir() {
        let config = Config::default();
        let url = config.storage.effective_url();
        assert!(url.starts_with("sqlite://"));
        assert!(url.contains("ciris.db"));
    }
}
