//! Error types for the tile-scraper crate

use thiserror::Error;

/// Result type for crate operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for crate operations
#[derive(Debug, Error)]
pub enum Error {
    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Filesystem error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A request could not be completed
    #[error("Fetch error: {0}")]
    Fetch(String),

    /// Web crawling error
    #[error("Crawl error: {0}")]
    Crawl(String),

    /// Image pipeline error
    #[error("Pipeline error: {0}")]
    Pipeline(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),
}
