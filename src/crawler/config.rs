//! # Crawler Configuration Module
//!
//! This module provides configuration options for the crawler, including the
//! session bootstrap and seed URLs, the politeness limits enforced by the fetch
//! gate, and the CSS selectors used to pull product cards out of a results page.
//! It uses a builder pattern for flexible configuration.
//!
//! ## Key Components
//!
//! - `CrawlerConfig`: The main configuration struct with crawler parameters
//! - `CrawlerConfigBuilder`: Builder pattern implementation for easier configuration
//! - `SelectorConfig`: CSS selectors for the product listing markup
//!
//! The defaults reproduce the reference crawl: one request in flight, three
//! seconds between requests, and the search for "gresie" on supraten.md.

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use url::Url;

use crate::crawler::error::CrawlError;

/// CSS selectors describing the product listing markup
#[derive(Debug, Clone)]
pub struct SelectorConfig {
    /// One match per product card
    pub product: String,

    /// Product title, relative to the card
    pub title: String,

    /// Regular price, relative to the card
    pub regular_price: String,

    /// Sale price, relative to the card
    pub sale_price: String,

    /// Product image element; the URL is read from its `src`
    pub image: String,

    /// Link to the product page; the URL is read from its `href`
    pub product_link: String,

    /// Brand logo element; the URL is read from its `src`
    pub brand_image: String,

    /// Label badges ("-20%", "Nou", ...)
    pub label: String,

    /// Pagination link to the next page; the URL is read from its `href`
    pub next_page: String,

    /// Class on the card marking the product as out of stock
    pub out_of_stock_class: String,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            product: ".sp-show-product-vertical".to_string(),
            title: ".sp-card-product__title".to_string(),
            regular_price: ".sp-card-product__value_regular".to_string(),
            sale_price: ".sp-card-product__value_sale".to_string(),
            image: ".sp-card-product__img".to_string(),
            product_link: "a".to_string(),
            brand_image: ".sp-card-product__brand".to_string(),
            label: ".sp-product-label".to_string(),
            next_page: "a.pagination__next".to_string(),
            out_of_stock_class: "product-out-of-stock".to_string(),
        }
    }
}

/// Configuration for the crawler
#[derive(Debug, Clone)]
pub struct CrawlerConfig {
    /// Site root requested once to obtain session cookies
    pub home_url: String,

    /// First results page of the walk
    pub seed_url: String,

    /// Hosts the fetch gate will talk to; subdomains are included.
    /// An empty list disables the check.
    pub allowed_domains: Vec<String>,

    /// Maximum number of requests in flight
    pub fetch_concurrency: usize,

    /// Minimum delay in milliseconds between the end of one request and the start of the next
    pub min_request_delay_ms: u64,

    /// Transport timeout in seconds
    pub request_timeout_secs: u64,

    /// Whether to respect robots.txt. Carried for callers; the crawler does not evaluate it.
    pub respect_robots_txt: bool,

    /// User agent to use for requests
    pub user_agent: String,

    /// Headers sent with every request
    pub default_headers: Vec<(String, String)>,

    /// Stop after this many results pages
    pub max_pages: Option<usize>,

    /// Extra attempts for a results page whose fetch failed with a retryable error
    pub page_retries: u32,

    /// Treat a page without products as the end of the walk
    pub stop_on_empty_page: bool,

    /// Selectors for the listing markup
    pub selectors: SelectorConfig,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            home_url: "https://supraten.md".to_string(),
            seed_url: "https://supraten.md/cautare?search=gresie&category_id=0".to_string(),
            allowed_domains: vec!["supraten.md".to_string()],
            fetch_concurrency: 1,
            min_request_delay_ms: 3000,
            request_timeout_secs: 180,
            respect_robots_txt: false,
            user_agent: "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 \
                         (KHTML, like Gecko) Chrome/116.0.0.0 Safari/537.36"
                .to_string(),
            default_headers: vec![
                (
                    "Accept".to_string(),
                    "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8".to_string(),
                ),
                (
                    "Accept-Language".to_string(),
                    "ro,en-US;q=0.9,en;q=0.8".to_string(),
                ),
                ("Origin".to_string(), "https://supraten.md".to_string()),
                ("Referer".to_string(), "https://supraten.md/".to_string()),
                ("Cache-Control".to_string(), "no-cache".to_string()),
                ("Pragma".to_string(), "no-cache".to_string()),
            ],
            max_pages: None,
            page_retries: 0,
            stop_on_empty_page: false,
            selectors: SelectorConfig::default(),
        }
    }
}

/// Builder for CrawlerConfig
#[derive(Debug, Default)]
pub struct CrawlerConfigBuilder {
    config: CrawlerConfig,
}

impl CrawlerConfigBuilder {
    /// Create a new builder with default configuration
    pub fn new() -> Self {
        Self {
            config: CrawlerConfig::default(),
        }
    }

    /// Set the URL used for the session warm-up request
    pub fn home_url(mut self, home_url: impl Into<String>) -> Self {
        self.config.home_url = home_url.into();
        self
    }

    /// Set the first results page
    pub fn seed_url(mut self, seed_url: impl Into<String>) -> Self {
        self.config.seed_url = seed_url.into();
        self
    }

    /// Set the allowed domains
    pub fn allowed_domains(mut self, allowed_domains: Vec<String>) -> Self {
        self.config.allowed_domains = allowed_domains;
        self
    }

    /// Set the maximum number of requests in flight
    pub fn fetch_concurrency(mut self, fetch_concurrency: usize) -> Self {
        self.config.fetch_concurrency = fetch_concurrency;
        self
    }

    /// Set the minimum delay in milliseconds between requests
    pub fn min_request_delay_ms(mut self, min_request_delay_ms: u64) -> Self {
        self.config.min_request_delay_ms = min_request_delay_ms;
        self
    }

    /// Set the transport timeout in seconds
    pub fn request_timeout_secs(mut self, request_timeout_secs: u64) -> Self {
        self.config.request_timeout_secs = request_timeout_secs;
        self
    }

    /// Set whether to respect robots.txt
    pub fn respect_robots_txt(mut self, respect_robots_txt: bool) -> Self {
        self.config.respect_robots_txt = respect_robots_txt;
        self
    }

    /// Set the user agent to use for requests
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = user_agent.into();
        self
    }

    /// Replace the default request headers
    pub fn default_headers(mut self, default_headers: Vec<(String, String)>) -> Self {
        self.config.default_headers = default_headers;
        self
    }

    /// Limit the number of results pages
    pub fn max_pages(mut self, max_pages: Option<usize>) -> Self {
        self.config.max_pages = max_pages;
        self
    }

    /// Set the number of extra attempts for a failed results page
    pub fn page_retries(mut self, page_retries: u32) -> Self {
        self.config.page_retries = page_retries;
        self
    }

    /// Set whether a page without products ends the walk
    pub fn stop_on_empty_page(mut self, stop_on_empty_page: bool) -> Self {
        self.config.stop_on_empty_page = stop_on_empty_page;
        self
    }

    /// Set the listing selectors
    pub fn selectors(mut self, selectors: SelectorConfig) -> Self {
        self.config.selectors = selectors;
        self
    }

    /// Build the configuration
    pub fn build(self) -> CrawlerConfig {
        self.config
    }
}

impl CrawlerConfig {
    /// Create a new builder
    pub fn builder() -> CrawlerConfigBuilder {
        CrawlerConfigBuilder::new()
    }

    /// Get the minimum request delay as a Duration
    pub fn min_request_delay(&self) -> Duration {
        Duration::from_millis(self.min_request_delay_ms)
    }

    /// Get the transport timeout as a Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Whether `url` is inside one of the allowed domains
    pub fn is_allowed(&self, url: &Url) -> bool {
        is_allowed_host(&self.allowed_domains, url)
    }

    /// Build the default request headers, including the user agent
    pub fn header_map(&self) -> Result<HeaderMap, CrawlError> {
        let mut headers = HeaderMap::new();
        for (name, value) in &self.default_headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| CrawlError::Config(format!("invalid header name '{}': {}", name, e)))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| CrawlError::Config(format!("invalid value for {}: {}", name, e)))?;
            headers.insert(name, value);
        }
        let user_agent = HeaderValue::from_str(&self.user_agent)
            .map_err(|e| CrawlError::Config(format!("invalid user agent: {}", e)))?;
        headers.insert(reqwest::header::USER_AGENT, user_agent);
        Ok(headers)
    }

    /// Check the configuration for values the crawler cannot run with
    pub fn validate(&self) -> Result<(), CrawlError> {
        if self.fetch_concurrency == 0 {
            return Err(CrawlError::Config(
                "fetch_concurrency must be at least 1".to_string(),
            ));
        }
        for (name, raw) in [("home_url", &self.home_url), ("seed_url", &self.seed_url)] {
            let url = Url::parse(raw)?;
            if !self.is_allowed(&url) {
                return Err(CrawlError::Config(format!(
                    "{} {} is outside the allowed domains {:?}",
                    name, raw, self.allowed_domains
                )));
            }
        }
        self.header_map()?;
        Ok(())
    }
}

/// Host check shared by the config and the fetch gate
pub(crate) fn is_allowed_host(allowed_domains: &[String], url: &Url) -> bool {
    if allowed_domains.is_empty() {
        return true;
    }
    let Some(host) = url.host_str() else {
        return false;
    };
    let host = host.to_ascii_lowercase();
    allowed_domains.iter().any(|domain| {
        let domain = domain.trim_start_matches('.').to_ascii_lowercase();
        host == domain || host.ends_with(&format!(".{}", domain))
    })
}
