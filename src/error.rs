use std::time::Duration;
use thiserror::Error;

/// Why a single fetch strategy (or the whole chain) did not produce content.
#[derive(Error, Debug)]
pub enum FetchError {
    /// Network, DNS or TLS level failure
    #[error("Transport failure: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    /// Reachable target that answered with a non-success status
    #[error("Unexpected HTTP status {0}")]
    HttpStatus(u16),

    /// The delegated rendering service refused or returned an unusable envelope
    #[error("Rendering service error: {0}")]
    Rendering(String),

    #[error("Could not decode response body: {0}")]
    Decode(String),

    #[error("Headless browser error: {0}")]
    Browser(String),

    /// Every strategy in the chain was tried without success
    #[error("All {attempted} strategies exhausted")]
    Exhausted { attempted: usize },

    /// The caller's overall budget ran out before a strategy could finish
    #[error("Acquisition budget exhausted")]
    BudgetExhausted,
}

impl FetchError {
    /// Transport-level failures, as opposed to the target answering badly
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            FetchError::Transport(_) | FetchError::Timeout(_) | FetchError::Browser(_)
        )
    }
}

/// Failures of the external search index.
#[derive(Error, Debug)]
pub enum SearchError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Search API error: HTTP {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Search rate limit exceeded")]
    RateLimited,

    #[error("Invalid search API key")]
    InvalidApiKey,

    #[error("Search timed out")]
    Timeout,

    #[error("Unknown reporting timezone: {0}")]
    InvalidTimezone(String),
}

/// Fatal configuration problems, surfaced when the pipeline is built.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing API key for {component}")]
    MissingApiKey { component: &'static str },

    #[error("Invalid configuration value for {field}: {reason}")]
    Invalid { field: String, reason: String },

    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

impl ConfigError {
    pub fn invalid(field: impl Into<String>, reason: impl ToString) -> Self {
        ConfigError::Invalid {
            field: field.into(),
            reason: reason.to_string(),
        }
    }
}
