//! Configuration module for Quota-Harvest
//!
//! This module handles loading, parsing, and validating TOML configuration files.
//!
//! # Example
//!
//! ```no_run
//! use quota_harvest::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("harvest.toml")).unwrap();
//! println!("Detail batches of {}", config.crawler.detail_batch_size);
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{
    Config, CrawlerConfig, CredentialsConfig, OutputConfig, QueueConfig, RetryConfig,
    SourceConfig,
};

pub use validation::MAX_DETAIL_BATCH;

// Re-export parser functions
pub use parser::{
    compute_config_hash, load_config, load_config_with_hash, load_keys_file, parse_config,
};
