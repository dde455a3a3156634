//! Error types for the crawler module

use crate::error::Error as CrateError;
use std::fmt;
use thiserror::Error;

/// Classification of a failed fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchErrorKind {
    /// Connection, DNS, TLS or body read failure
    Network,

    /// The transport gave up waiting for the response
    Timeout,

    /// The origin answered with a non-2xx status
    Status(u16),

    /// The URL points outside the allowed domains
    Offsite,
}

impl fmt::Display for FetchErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchErrorKind::Network => write!(f, "network"),
            FetchErrorKind::Timeout => write!(f, "timeout"),
            FetchErrorKind::Status(code) => write!(f, "status {}", code),
            FetchErrorKind::Offsite => write!(f, "offsite"),
        }
    }
}

/// Error returned by the fetch gate and its transport
#[derive(Debug, Clone, Error)]
#[error("{kind} error fetching {url}: {detail}")]
pub struct FetchError {
    /// What went wrong
    pub kind: FetchErrorKind,

    /// The requested URL
    pub url: String,

    /// Human readable detail
    pub detail: String,
}

impl FetchError {
    pub fn new(kind: FetchErrorKind, url: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            kind,
            url: url.into(),
            detail: detail.into(),
        }
    }

    /// Whether repeating the same request could plausibly succeed
    pub fn is_retryable(&self) -> bool {
        match self.kind {
            FetchErrorKind::Network | FetchErrorKind::Timeout => true,
            FetchErrorKind::Status(code) => code == 408 || code == 429 || code >= 500,
            FetchErrorKind::Offsite => false,
        }
    }

    pub(crate) fn from_reqwest(url: &str, err: reqwest::Error) -> Self {
        let kind = if is_offsite_redirect(&err) {
            FetchErrorKind::Offsite
        } else if err.is_timeout() {
            FetchErrorKind::Timeout
        } else {
            FetchErrorKind::Network
        };
        Self::new(kind, url, err.to_string())
    }
}

/// Raised by the transport's redirect policy for a hop outside the allowed domains
#[derive(Debug, Error)]
#[error("redirect to {0} leaves the allowed domains")]
pub(crate) struct OffsiteRedirect(pub(crate) String);

fn is_offsite_redirect(err: &reqwest::Error) -> bool {
    let mut source = std::error::Error::source(err);
    while let Some(e) = source {
        if e.is::<OffsiteRedirect>() {
            return true;
        }
        source = e.source();
    }
    false
}

/// Error type for crawler operations
#[derive(Debug, Error)]
pub enum CrawlError {
    /// The warm-up request failed; the run cannot continue without a session
    #[error("Session bootstrap failed: {0}")]
    Bootstrap(#[source] FetchError),

    /// A results page could not be fetched
    #[error("Failed to fetch page {page} after {attempts} attempt(s): {source}")]
    PageFetch {
        /// 1-based index of the page in the walk
        page: usize,
        /// Number of attempts made
        attempts: u32,
        /// Last error seen
        #[source]
        source: FetchError,
    },

    /// A CSS selector in the configuration did not parse
    #[error("Invalid selector '{selector}': {detail}")]
    Selector {
        /// The selector text
        selector: String,
        /// Parser message
        detail: String,
    },

    /// URL parsing error
    #[error("URL parsing error: {0}")]
    UrlParse(#[from] url::ParseError),

    /// Configuration rejected by validation
    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl From<FetchError> for CrateError {
    fn from(err: FetchError) -> Self {
        CrateError::Fetch(err.to_string())
    }
}

impl From<CrawlError> for CrateError {
    fn from(err: CrawlError) -> Self {
        match err {
            CrawlError::Config(msg) => CrateError::Config(msg),
            CrawlError::UrlParse(e) => CrateError::Config(format!("URL parse error: {}", e)),
            _ => CrateError::Crawl(err.to_string()),
        }
    }
}
