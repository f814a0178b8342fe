//! Configuration types for jobs, fetching, and browser sessions.
//!
//! All types are serde-deserializable with per-field defaults so the
//! external settings layer can supply partial configuration.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::time::Duration;

/// Retry policy for failed fetch attempts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retries after the first attempt.
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,
    /// Base delay before the first retry, in milliseconds.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Multiplier applied per attempt (exponential backoff).
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
    /// Cap on the backoff delay, in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// HTTP status codes that count as transient.
    #[serde(default = "default_retry_status_codes")]
    pub retry_status_codes: HashSet<u16>,
}

fn default_max_retries() -> usize {
    3
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_retry_status_codes() -> HashSet<u16> {
    [429, 500, 502, 503, 504].into_iter().collect()
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            max_delay_ms: default_max_delay_ms(),
            retry_status_codes: default_retry_status_codes(),
        }
    }
}

impl RetryConfig {
    /// Calculates the backoff delay for a given attempt (0-based).
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let delay_ms = {
            let raw = self.base_delay_ms as f64 * self.backoff_multiplier.powi(attempt as i32);
            raw.min(self.max_delay_ms as f64) as u64
        };
        Duration::from_millis(delay_ms)
    }

    /// Whether a status code should trigger a retry.
    #[must_use]
    pub fn should_retry_status(&self, status: u16) -> bool {
        self.retry_status_codes.contains(&status)
    }
}

/// Configuration for page fetching.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Request/navigation timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_seconds: f64,
    /// Maximum number of redirects to follow on the static path.
    #[serde(default = "default_max_redirects")]
    pub max_redirects: usize,
    /// User-agent strings cycled one per request.
    ///
    /// A single entry disables rotation; an empty list sends no user-agent.
    #[serde(default = "default_user_agents")]
    pub user_agents: Vec<String>,
    /// Minimum delay between requests to the same host, in milliseconds.
    #[serde(default = "default_rate_limit_ms")]
    pub rate_limit_ms: u64,
    /// Additional headers to send on the static path.
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Retry policy.
    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_timeout() -> f64 {
    30.0
}

fn default_max_redirects() -> usize {
    10
}

fn default_user_agents() -> Vec<String> {
    [
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
        "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:124.0) Gecko/20100101 Firefox/124.0",
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 10.15; rv:124.0) Gecko/20100101 Firefox/124.0",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_rate_limit_ms() -> u64 {
    1000
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: default_timeout(),
            max_redirects: default_max_redirects(),
            user_agents: default_user_agents(),
            rate_limit_ms: default_rate_limit_ms(),
            headers: HashMap::new(),
            retry: RetryConfig::default(),
        }
    }
}

impl FetchConfig {
    /// Creates a new fetch configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the timeout.
    #[must_use]
    pub fn with_timeout(mut self, seconds: f64) -> Self {
        self.timeout_seconds = seconds;
        self
    }

    /// Sets a single fixed user agent, disabling rotation.
    #[must_use]
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agents = vec![user_agent.into()];
        self
    }

    /// Replaces the user-agent rotation list.
    #[must_use]
    pub fn with_user_agents(mut self, user_agents: Vec<String>) -> Self {
        self.user_agents = user_agents;
        self
    }

    /// Sets the per-host rate limit.
    #[must_use]
    pub fn with_rate_limit_ms(mut self, ms: u64) -> Self {
        self.rate_limit_ms = ms;
        self
    }

    /// Adds a header for the static path.
    #[must_use]
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Gets the timeout as a `Duration`.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs_f64(self.timeout_seconds)
    }
}

/// Configuration for a controlled browser session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Whether to run the browser headless.
    #[serde(default = "default_headless")]
    pub headless: bool,
    /// Bounded wait for process start and control handshake, in seconds.
    #[serde(default = "default_startup_timeout")]
    pub startup_timeout_seconds: f64,
    /// Navigation timeout in seconds.
    #[serde(default = "default_timeout")]
    pub navigation_timeout_seconds: f64,
    /// Fixed wait after navigation completes before content is read,
    /// in milliseconds.
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
    /// Browser window width.
    #[serde(default = "default_window_width")]
    pub window_width: u32,
    /// Browser window height.
    #[serde(default = "default_window_height")]
    pub window_height: u32,
    /// Fixed user agent for the browser, if any.
    #[serde(default)]
    pub user_agent: Option<String>,
}

fn default_headless() -> bool {
    true
}

fn default_startup_timeout() -> f64 {
    30.0
}

fn default_settle_delay_ms() -> u64 {
    1500
}

fn default_window_width() -> u32 {
    1920
}

fn default_window_height() -> u32 {
    1080
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            headless: default_headless(),
            startup_timeout_seconds: default_startup_timeout(),
            navigation_timeout_seconds: default_timeout(),
            settle_delay_ms: default_settle_delay_ms(),
            window_width: default_window_width(),
            window_height: default_window_height(),
            user_agent: None,
        }
    }
}

impl SessionConfig {
    /// Creates a new session configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Disables headless mode.
    #[must_use]
    pub fn with_head(mut self) -> Self {
        self.headless = false;
        self
    }

    /// Sets the settle delay after navigation.
    #[must_use]
    pub fn with_settle_delay_ms(mut self, ms: u64) -> Self {
        self.settle_delay_ms = ms;
        self
    }

    /// Gets the startup timeout as a `Duration`.
    #[must_use]
    pub fn startup_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.startup_timeout_seconds)
    }

    /// Gets the navigation timeout as a `Duration`.
    #[must_use]
    pub fn navigation_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.navigation_timeout_seconds)
    }

    /// Gets the settle delay as a `Duration`.
    #[must_use]
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}

/// Supported export formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportFormat {
    /// RFC 4180 comma-separated values.
    Csv,
    /// SpreadsheetML 2003 XML workbook.
    Excel,
    /// JSON array of objects.
    Json,
}

impl Default for ExportFormat {
    fn default() -> Self {
        Self::Csv
    }
}

impl ExportFormat {
    /// The conventional file extension for this format.
    #[must_use]
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::Excel => "xls",
            Self::Json => "json",
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Csv => write!(f, "csv"),
            Self::Excel => write!(f, "excel"),
            Self::Json => write!(f, "json"),
        }
    }
}

/// Conflict policy when two records share a dedup key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DedupPolicy {
    /// Keep the first record, silently ignore later duplicates.
    KeepFirst,
    /// Replace the earlier record in place with the later one.
    KeepLast,
}

impl Default for DedupPolicy {
    fn default() -> Self {
        Self::KeepFirst
    }
}

impl fmt::Display for DedupPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::KeepFirst => write!(f, "keep_first"),
            Self::KeepLast => write!(f, "keep_last"),
        }
    }
}

/// Options for one collection job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobOptions {
    /// Number of workers draining the target queue (1..=4).
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    /// Dedup key: the literal `"url"` or a declared rule field name.
    #[serde(default = "default_dedup_key")]
    pub dedup_key: String,
    /// Conflict policy for duplicate keys.
    #[serde(default)]
    pub dedup_policy: DedupPolicy,
    /// Export format for the dataset artifact.
    #[serde(default)]
    pub export_format: ExportFormat,
    /// Default region for parsing national phone numbers.
    #[serde(default = "default_region")]
    pub default_region: String,
    /// Consecutive session start failures tolerated per worker before the
    /// job fails.
    #[serde(default = "default_session_restart_limit")]
    pub session_restart_limit: usize,
    /// Fetch configuration.
    #[serde(default)]
    pub fetch: FetchConfig,
    /// Browser session configuration.
    #[serde(default)]
    pub session: SessionConfig,
}

fn default_worker_count() -> usize {
    2
}

fn default_dedup_key() -> String {
    "url".to_string()
}

fn default_region() -> String {
    "NG".to_string()
}

fn default_session_restart_limit() -> usize {
    3
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            worker_count: default_worker_count(),
            dedup_key: default_dedup_key(),
            dedup_policy: DedupPolicy::default(),
            export_format: ExportFormat::default(),
            default_region: default_region(),
            session_restart_limit: default_session_restart_limit(),
            fetch: FetchConfig::default(),
            session: SessionConfig::default(),
        }
    }
}

impl JobOptions {
    /// Creates new job options with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the worker count.
    #[must_use]
    pub fn with_worker_count(mut self, count: usize) -> Self {
        self.worker_count = count;
        self
    }

    /// Sets the dedup key.
    #[must_use]
    pub fn with_dedup_key(mut self, key: impl Into<String>) -> Self {
        self.dedup_key = key.into();
        self
    }

    /// Sets the dedup conflict policy.
    #[must_use]
    pub fn with_dedup_policy(mut self, policy: DedupPolicy) -> Self {
        self.dedup_policy = policy;
        self
    }

    /// Sets the export format.
    #[must_use]
    pub fn with_export_format(mut self, format: ExportFormat) -> Self {
        self.export_format = format;
        self
    }

    /// Sets the default phone region.
    #[must_use]
    pub fn with_default_region(mut self, region: impl Into<String>) -> Self {
        self.default_region = region.into();
        self
    }

    /// Sets the maximum fetch retries.
    #[must_use]
    pub fn with_max_retries(mut self, retries: usize) -> Self {
        self.fetch.retry.max_retries = retries;
        self
    }

    /// Sets the per-host rate limit.
    #[must_use]
    pub fn with_rate_limit_ms(mut self, ms: u64) -> Self {
        self.fetch.rate_limit_ms = ms;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_config_delay() {
        let config = RetryConfig::default();

        assert_eq!(config.delay_for_attempt(0), Duration::from_secs(1));
        assert_eq!(config.delay_for_attempt(1), Duration::from_secs(2));
        assert_eq!(config.delay_for_attempt(2), Duration::from_secs(4));
    }

    #[test]
    fn test_retry_config_delay_capped() {
        let config = RetryConfig {
            max_delay_ms: 5000,
            ..Default::default()
        };

        assert_eq!(config.delay_for_attempt(10), Duration::from_secs(5));
    }

    #[test]
    fn test_retry_status_codes() {
        let config = RetryConfig::default();

        assert!(config.should_retry_status(429));
        assert!(config.should_retry_status(503));
        assert!(!config.should_retry_status(200));
        assert!(!config.should_retry_status(404));
    }

    #[test]
    fn test_fetch_config_defaults() {
        let config = FetchConfig::default();

        assert_eq!(config.timeout_seconds, 30.0);
        assert_eq!(config.user_agents.len(), 5);
        assert_eq!(config.rate_limit_ms, 1000);
    }

    #[test]
    fn test_fetch_config_single_agent() {
        let config = FetchConfig::new().with_user_agent("custom-agent");
        assert_eq!(config.user_agents, vec!["custom-agent".to_string()]);
    }

    #[test]
    fn test_session_config_durations() {
        let config = SessionConfig::new().with_settle_delay_ms(250);

        assert_eq!(config.startup_timeout(), Duration::from_secs(30));
        assert_eq!(config.navigation_timeout(), Duration::from_secs(30));
        assert_eq!(config.settle_delay(), Duration::from_millis(250));
        assert!(config.headless);
    }

    #[test]
    fn test_export_format_serde() {
        let json = serde_json::to_string(&ExportFormat::Excel).unwrap();
        assert_eq!(json, r#""excel""#);
        assert_eq!(ExportFormat::Excel.extension(), "xls");

        let parsed: ExportFormat = serde_json::from_str(r#""json""#).unwrap();
        assert_eq!(parsed, ExportFormat::Json);
    }

    #[test]
    fn test_job_options_defaults() {
        let options = JobOptions::default();

        assert_eq!(options.worker_count, 2);
        assert_eq!(options.dedup_key, "url");
        assert_eq!(options.dedup_policy, DedupPolicy::KeepFirst);
        assert_eq!(options.export_format, ExportFormat::Csv);
        assert_eq!(options.session_restart_limit, 3);
    }

    #[test]
    fn test_job_options_builders() {
        let options = JobOptions::new()
            .with_worker_count(4)
            .with_dedup_key("phone")
            .with_dedup_policy(DedupPolicy::KeepLast)
            .with_max_retries(1)
            .with_rate_limit_ms(0);

        assert_eq!(options.worker_count, 4);
        assert_eq!(options.dedup_key, "phone");
        assert_eq!(options.dedup_policy, DedupPolicy::KeepLast);
        assert_eq!(options.fetch.retry.max_retries, 1);
        assert_eq!(options.fetch.rate_limit_ms, 0);
    }

    #[test]
    fn test_job_options_partial_deserialize() {
        let options: JobOptions =
            serde_json::from_str(r#"{"worker_count": 3, "dedup_key": "phone"}"#).unwrap();

        assert_eq!(options.worker_count, 3);
        assert_eq!(options.dedup_key, "phone");
        assert_eq!(options.fetch.retry.max_retries, 3);
    }
}
