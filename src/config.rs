//! Configuration types for ena-transfer

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable that overrides `source.password`
pub const SOURCE_PASSWORD_ENV: &str = "ENA_SOURCE_PASSWORD";

/// Environment variable that overrides `destination.password`
pub const WEBIN_PASSWORD_ENV: &str = "ENA_WEBIN_PASSWORD";

/// Top-level configuration
///
/// Loaded from a TOML file with one table per concern:
///
/// ```toml
/// [source]
/// url = "https://cloud.example.org"
/// directory = "/remote.php/webdav/run-2021-01/"
/// username = "account-12345"
///
/// [destination]
/// host = "webin.ebi.ac.uk"
/// username = "Webin-57703"
/// directory = "ftp_dir"
/// ```
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// WebDAV storage holding the sequencing files
    #[serde(default)]
    pub source: SourceConfig,

    /// Archive upload area
    #[serde(default)]
    pub destination: DestinationConfig,

    /// Per-object transfer tuning
    #[serde(default)]
    pub transfer: TransferConfig,

    /// Submission collaborators (XML drop box, webin-cli)
    #[serde(default)]
    pub submission: SubmissionConfig,
}

impl Config {
    /// Load configuration from a TOML file, then apply environment overrides
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&text).map_err(|e| Error::Config {
            message: format!("failed to parse {}: {}", path.display(), e),
            key: None,
        })?;
        config.apply_env();
        Ok(config)
    }

    /// Replace passwords with values from the environment when set
    pub fn apply_env(&mut self) {
        if let Ok(password) = std::env::var(SOURCE_PASSWORD_ENV) {
            self.source.password = Some(password);
        }
        if let Ok(password) = std::env::var(WEBIN_PASSWORD_ENV) {
            self.destination.password = Some(password);
        }
    }

    /// Check settings that would otherwise fail deep inside a batch
    pub fn validate(&self) -> Result<()> {
        if self.source.url.trim().is_empty() {
            return Err(Error::config("source.url", "must not be empty"));
        }
        url::Url::parse(&self.source.url)
            .map_err(|e| Error::config("source.url", format!("invalid URL: {e}")))?;
        if self.destination.host.trim().is_empty() {
            return Err(Error::config("destination.host", "must not be empty"));
        }
        if self.transfer.chunk_size == 0 {
            return Err(Error::config(
                "transfer.chunk_size",
                "must be greater than zero",
            ));
        }
        if self.transfer.buffer_factor == 0 {
            return Err(Error::config(
                "transfer.buffer_factor",
                "must be greater than zero",
            ));
        }
        if self.transfer.block_size == 0 {
            return Err(Error::config(
                "transfer.block_size",
                "must be greater than zero",
            ));
        }
        if self.transfer.data_suffixes.is_empty() {
            return Err(Error::config(
                "transfer.data_suffixes",
                "at least one suffix is required",
            ));
        }
        if self.transfer.checksum_suffix.is_empty() {
            return Err(Error::config("transfer.checksum_suffix", "must not be empty"));
        }
        if self.source.retry.max_attempts == 0 {
            return Err(Error::config(
                "source.retry.max_attempts",
                "must allow at least one attempt",
            ));
        }
        Ok(())
    }
}

/// WebDAV source configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Base URL of the WebDAV server (e.g. "https://cloud.example.org")
    #[serde(default)]
    pub url: String,

    /// Directory path appended to `url` (e.g. "/remote.php/webdav/folder/")
    #[serde(default)]
    pub directory: String,

    /// Username for basic authentication
    #[serde(default)]
    pub username: String,

    /// Password or app token (prefer the ENA_SOURCE_PASSWORD environment variable)
    #[serde(default, skip_serializing)]
    pub password: Option<String>,

    /// Retry policy for listings and small reads (default: 10 attempts, x3 backoff)
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            directory: String::new(),
            username: String::new(),
            password: None,
            retry: RetryConfig::default(),
        }
    }
}

/// FTPS destination configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DestinationConfig {
    /// Server hostname (default: "webin.ebi.ac.uk")
    #[serde(default = "default_destination_host")]
    pub host: String,

    /// Control connection port (default: 21)
    #[serde(default = "default_ftp_port")]
    pub port: u16,

    /// Negotiate explicit TLS (`AUTH TLS`) and protect the data channel (default: true)
    #[serde(default = "default_true")]
    pub tls: bool,

    /// Webin account name
    #[serde(default)]
    pub username: String,

    /// Webin password (prefer the ENA_WEBIN_PASSWORD environment variable)
    #[serde(default, skip_serializing)]
    pub password: Option<String>,

    /// Working directory on the server; created by the archive, not by us
    #[serde(default)]
    pub directory: String,

    /// Timeout for establishing the session (default: 10 seconds)
    #[serde(default = "default_connect_timeout", with = "duration_serde")]
    pub connect_timeout: Duration,
}

impl Default for DestinationConfig {
    fn default() -> Self {
        Self {
            host: default_destination_host(),
            port: default_ftp_port(),
            tls: true,
            username: String::new(),
            password: None,
            directory: String::new(),
            connect_timeout: default_connect_timeout(),
        }
    }
}

/// Per-object transfer settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TransferConfig {
    /// Suffixes identifying transferable data objects (default: [".fq.gz"])
    #[serde(default = "default_data_suffixes")]
    pub data_suffixes: Vec<String>,

    /// Suffix appended to a data object name to find its checksum sidecar (default: ".md5")
    #[serde(default = "default_checksum_suffix")]
    pub checksum_suffix: String,

    /// Source read chunk size in bytes (default: 10 MiB)
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Read-ahead buffer in multiples of `chunk_size` (default: 10)
    #[serde(default = "default_buffer_factor")]
    pub buffer_factor: usize,

    /// Destination write block size in bytes (default: 10 MiB)
    #[serde(default = "default_chunk_size")]
    pub block_size: usize,

    /// Also store the checksum sidecar next to the uploaded object (default: false)
    #[serde(default)]
    pub upload_checksum_sidecar: bool,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            data_suffixes: default_data_suffixes(),
            checksum_suffix: default_checksum_suffix(),
            chunk_size: default_chunk_size(),
            buffer_factor: default_buffer_factor(),
            block_size: default_chunk_size(),
            upload_checksum_sidecar: false,
        }
    }
}

/// Submission collaborator settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SubmissionConfig {
    /// Use the archive's test service (default: true)
    #[serde(default = "default_true")]
    pub test: bool,

    /// Path to the webin-cli jar (default: "lib/webin-cli-3.4.0.jar")
    #[serde(default = "default_webin_jar")]
    pub webin_jar: PathBuf,

    /// Java binary (None = search PATH)
    #[serde(default)]
    pub java_bin: Option<PathBuf>,

    /// webin-cli context (default: "genome")
    #[serde(default = "default_context")]
    pub context: String,

    /// Timeout for drop-box HTTP submissions (default: 300 seconds)
    #[serde(default = "default_submit_timeout", with = "duration_serde")]
    pub timeout: Duration,
}

impl Default for SubmissionConfig {
    fn default() -> Self {
        Self {
            test: true,
            webin_jar: default_webin_jar(),
            java_bin: None,
            context: default_context(),
            timeout: default_submit_timeout(),
        }
    }
}

/// Retry configuration for transient source failures
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of calls, the first one included (default: 10)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial delay before first retry (default: 1 second)
    #[serde(default = "default_initial_delay", with = "duration_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between retries (default: 120 seconds)
    #[serde(default = "default_max_delay", with = "duration_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 3.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: true,
        }
    }
}

fn default_destination_host() -> String {
    "webin.ebi.ac.uk".to_string()
}

fn default_ftp_port() -> u16 {
    21
}

fn default_true() -> bool {
    true
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_data_suffixes() -> Vec<String> {
    vec![".fq.gz".to_string()]
}

fn default_checksum_suffix() -> String {
    ".md5".to_string()
}

fn default_chunk_size() -> usize {
    10 * 1024 * 1024
}

fn default_buffer_factor() -> usize {
    10
}

fn default_webin_jar() -> PathBuf {
    PathBuf::from("lib/webin-cli-3.4.0.jar")
}

fn default_context() -> String {
    "genome".to_string()
}

fn default_submit_timeout() -> Duration {
    Duration::from_secs(300)
}

fn default_max_attempts() -> u32 {
    10
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(120)
}

fn default_backoff_multiplier() -> f64 {
    3.0
}

// Duration serialization helper
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
