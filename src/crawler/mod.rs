//! # Product Listing Crawler
//!
//! This module walks paginated search results of a shop, turning every product
//! card into a [`Record`] and handing it to the image pipeline. It is the first
//! stage of the scraper: everything downstream works on the records it emits.
//!
//! ## Key Components
//!
//! - `CrawlerConfig`: Seed URLs, politeness limits and selectors
//! - `FetchGate`: The single rate- and concurrency-limited path to the network
//! - `bootstrap`: Warm-up request establishing the cookie session
//! - `Extractor`: Pure HTML to record extraction
//! - `Crawler`: The pagination state machine driving a crawl run
//!
//! ## Features
//!
//! - One request in flight and three seconds between requests by default
//! - Cookie carry-over from the site root to every later request
//! - Relative URL resolution against the page the record came from
//! - Termination on the last page, a revisited page or a page limit

mod config;
mod controller;
mod error;
mod extraction;
mod fetch;
mod session;

pub use config::{CrawlerConfig, CrawlerConfigBuilder, SelectorConfig};
pub use controller::{
    CrawlAborted, CrawlReport, CrawlState, Crawler, PageReport, RecordSink, Termination,
};
pub use error::{CrawlError, FetchError, FetchErrorKind};
pub use extraction::{ExtractedPage, Extractor, RawRecord};
pub use fetch::{
    Cookies, FetchGate, FetchRequest, FetchResponse, ReqwestTransport, Transport, cookie_header,
};
pub use session::{Session, bootstrap, session_cookies};

use serde::{Deserialize, Serialize};
use url::Url;

/// One product listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Product title
    pub title: Option<String>,

    /// Price before any discount, as displayed
    pub regular_price: Option<String>,

    /// Discounted price, as displayed
    pub sale_price: Option<String>,

    /// Absolute image URLs, in page order
    pub image_urls: Vec<Url>,

    /// Absolute link to the product page
    pub product_url: Option<Url>,

    /// Absolute URL of the brand logo
    #[serde(rename = "brand_image")]
    pub brand_image_url: Option<Url>,

    /// Badge texts shown on the card
    pub labels: Vec<String>,

    /// False when the card carries the out-of-stock marker
    #[serde(rename = "is_in_stock")]
    pub in_stock: bool,

    /// `Date` header of the page response; empty when the origin sent none
    pub scraped_at: String,

    /// Paths of the stored images, relative to the image store
    #[serde(default)]
    pub image_paths: Vec<String>,
}

/// Position of the walk: the next results page to fetch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageCursor {
    /// Absolute URL of the page
    pub url: Url,

    /// Raw pagination href that led here; `None` for the seed page
    pub token: Option<String>,
}

impl PageCursor {
    pub fn seed(url: Url) -> Self {
        Self {
            url: without_fragment(url),
            token: None,
        }
    }

    /// Cursor for a pagination link found on the page at `self`
    pub fn follow(&self, href: &str) -> Result<Self, url::ParseError> {
        Ok(Self {
            url: without_fragment(self.url.join(href)?),
            token: Some(href.to_string()),
        })
    }

    /// The same cursor after the origin redirected it to `url`
    pub fn redirected(self, url: Url) -> Self {
        Self {
            url: without_fragment(url),
            token: self.token,
        }
    }
}

/// A fragment never selects a different page
fn without_fragment(mut url: Url) -> Url {
    url.set_fragment(None);
    url
}
