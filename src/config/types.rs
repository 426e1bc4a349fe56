use serde::Deserialize;

/// Main configuration structure for Quota-Harvest
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub crawler: CrawlerConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub credentials: CredentialsConfig,
    #[serde(default)]
    pub source: SourceConfig,
    pub output: OutputConfig,
    #[serde(default)]
    pub queue: QueueConfig,
}

/// Crawler behavior configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CrawlerConfig {
    /// Number of worker threads for keyword lists and backlog drains
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Maximum number of search hits kept per keyword
    #[serde(rename = "search-max-results", default = "default_search_max_results")]
    pub search_max_results: usize,

    /// Ids per detail call (the remote API caps this at 50)
    #[serde(rename = "detail-batch-size", default = "default_detail_batch_size")]
    pub detail_batch_size: usize,

    /// Records fetched per backlog page
    #[serde(rename = "backlog-page-size", default = "default_backlog_page_size")]
    pub backlog_page_size: usize,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            search_max_results: default_search_max_results(),
            detail_batch_size: default_detail_batch_size(),
            backlog_page_size: default_backlog_page_size(),
        }
    }
}

/// Backoff schedule for transient storage and network failures
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RetryConfig {
    /// Total attempts including the first one
    #[serde(rename = "max-attempts", default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(rename = "initial-delay-ms", default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    #[serde(rename = "max-delay-ms", default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    #[serde(rename = "backoff-multiplier", default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: true,
        }
    }
}

/// Credential budget configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CredentialsConfig {
    /// Budget restored by the daily reset and given to new credentials
    #[serde(rename = "daily-budget", default = "default_daily_budget")]
    pub daily_budget: i64,

    /// Plain text file of API keys read by `import-keys`
    #[serde(rename = "keys-file", default)]
    pub keys_file: Option<String>,
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self {
            daily_budget: default_daily_budget(),
            keys_file: None,
        }
    }
}

/// Remote content API configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    /// Base URL of the content API
    #[serde(rename = "base-url", default = "default_base_url")]
    pub base_url: String,

    /// Per-request timeout (seconds)
    #[serde(rename = "timeout-secs", default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Output configuration
#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    /// Path to the SQLite database file
    #[serde(rename = "database-path")]
    pub database_path: String,
}

/// Queue consumer configuration
#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
    /// How many times a requeued message is redelivered before it is dropped
    #[serde(rename = "max-redeliveries", default = "default_max_redeliveries")]
    pub max_redeliveries: u32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_redeliveries: default_max_redeliveries(),
        }
    }
}

fn default_workers() -> usize {
    4
}

fn default_search_max_results() -> usize {
    500
}

fn default_detail_batch_size() -> usize {
    50
}

fn default_backlog_page_size() -> usize {
    200
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    10_000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_true() -> bool {
    true
}

fn default_daily_budget() -> i64 {
    10_000
}

fn default_base_url() -> String {
    "https://www.googleapis.com/youtube/v3".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_max_redeliveries() -> u32 {
    3
}
