use std::io;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error("invalid page range {start}..={end}: pages start at 1 and start must not exceed end")]
    InvalidPageRange { start: u32, end: u32 },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("browser backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("navigation to {url} failed: {reason}")]
    Navigation { url: String, reason: String },

    #[error("no element matching '{selector}' after {waited:?}")]
    ReadinessTimeout { selector: String, waited: Duration },

    #[error("webdriver protocol error: {0}")]
    Protocol(String),

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T, E = ScrapeError> = std::result::Result<T, E>;
