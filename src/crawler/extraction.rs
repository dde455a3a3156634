//! Record extraction from results pages
//!
//! Everything here is pure: a page body goes in, records and the pagination
//! link come out. Extraction never fails on a malformed card; a field that
//! cannot be read or resolved is simply absent.

use scraper::{ElementRef, Html, Selector};
use tracing::{debug, warn};
use url::Url;

use crate::crawler::config::SelectorConfig;
use crate::crawler::error::CrawlError;
use crate::crawler::Record;

/// Fields of one product card exactly as found in the markup
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawRecord {
    pub title: Option<String>,
    pub regular_price: Option<String>,
    pub sale_price: Option<String>,
    pub image_url: Option<String>,
    pub product_url: Option<String>,
    pub brand_image_url: Option<String>,
    pub labels: Vec<String>,
    /// The card's `class` attribute, source of the stock status
    pub class_attr: Option<String>,
    pub scraped_at: Option<String>,
}

/// Normalized records and pagination link of one page
#[derive(Debug, Clone, Default)]
pub struct ExtractedPage {
    pub records: Vec<Record>,
    pub next_page: Option<String>,
}

/// Compiled selectors for the listing markup
#[derive(Debug, Clone)]
pub struct Extractor {
    product: Selector,
    title: Selector,
    regular_price: Selector,
    sale_price: Selector,
    image: Selector,
    product_link: Selector,
    brand_image: Selector,
    label: Selector,
    next_page: Selector,
    out_of_stock_class: String,
}

fn compile(selector: &str) -> Result<Selector, CrawlError> {
    Selector::parse(selector).map_err(|e| CrawlError::Selector {
        selector: selector.to_string(),
        detail: e.to_string(),
    })
}

impl Extractor {
    pub fn new(config: &SelectorConfig) -> Result<Self, CrawlError> {
        Ok(Self {
            product: compile(&config.product)?,
            title: compile(&config.title)?,
            regular_price: compile(&config.regular_price)?,
            sale_price: compile(&config.sale_price)?,
            image: compile(&config.image)?,
            product_link: compile(&config.product_link)?,
            brand_image: compile(&config.brand_image)?,
            label: compile(&config.label)?,
            next_page: compile(&config.next_page)?,
            out_of_stock_class: config.out_of_stock_class.clone(),
        })
    }

    /// Raw fields of every product card on the page.
    ///
    /// `date_header` is stamped on each record as its capture time.
    pub fn extract(&self, date_header: Option<&str>, body: &str) -> Vec<RawRecord> {
        let document = Html::parse_document(body);
        self.raw_records(&document, date_header)
    }

    /// The pagination link to the following page, if the page has one
    pub fn next_page(&self, body: &str) -> Option<String> {
        let document = Html::parse_document(body);
        self.next_link(&document)
    }

    /// Parse a page once and return its normalized records and pagination link
    pub fn extract_page(&self, page_url: &Url, date_header: Option<&str>, body: &str) -> ExtractedPage {
        let document = Html::parse_document(body);
        let records = self
            .raw_records(&document, date_header)
            .into_iter()
            .map(|raw| Record::from_raw(raw, page_url, &self.out_of_stock_class))
            .collect::<Vec<_>>();
        let next_page = self.next_link(&document);
        debug!(
            "Extracted {} record(s) from {}, next page: {:?}",
            records.len(),
            page_url,
            next_page
        );
        ExtractedPage { records, next_page }
    }

    fn raw_records(&self, document: &Html, date_header: Option<&str>) -> Vec<RawRecord> {
        document
            .select(&self.product)
            .map(|card| RawRecord {
                title: first_text(card, &self.title),
                regular_price: first_text(card, &self.regular_price),
                sale_price: first_text(card, &self.sale_price),
                image_url: first_attr(card, &self.image, "src"),
                product_url: first_attr(card, &self.product_link, "href"),
                brand_image_url: first_attr(card, &self.brand_image, "src"),
                labels: card
                    .select(&self.label)
                    .map(|label| label.text().collect::<String>())
                    .collect(),
                class_attr: card.value().attr("class").map(str::to_string),
                scraped_at: date_header.map(str::to_string),
            })
            .collect()
    }

    fn next_link(&self, document: &Html) -> Option<String> {
        document
            .select(&self.next_page)
            .find_map(|link| link.value().attr("href"))
            .and_then(|href| clean_text(Some(href.to_string())))
    }
}

/// Text of the first match; an element without any text counts as absent
fn first_text(card: ElementRef<'_>, selector: &Selector) -> Option<String> {
    card.select(selector)
        .next()
        .map(|element| element.text().collect::<String>())
        .filter(|text| !text.is_empty())
}

fn first_attr(card: ElementRef<'_>, selector: &Selector, attr: &str) -> Option<String> {
    card.select(selector)
        .find_map(|element| element.value().attr(attr))
        .map(str::to_string)
}

/// Trim a text field that is present in the markup, even if only whitespace remains
fn trim_text(raw: Option<String>) -> Option<String> {
    raw.map(|s| s.trim().to_string())
}

/// Trim a text field; blank text counts as absent
fn clean_text(raw: Option<String>) -> Option<String> {
    raw.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

/// Resolve a possibly relative URL against the page it was found on
fn resolve_url(page_url: &Url, raw: Option<String>, field: &str) -> Option<Url> {
    let raw = clean_text(raw)?;
    match page_url.join(&raw) {
        Ok(url) => Some(url),
        Err(e) => {
            warn!("Dropping {} '{}' found on {}: {}", field, raw, page_url, e);
            None
        }
    }
}

impl Record {
    /// Normalize a raw card into a record.
    ///
    /// Each field is cleaned on its own so one bad field never costs the others.
    pub fn from_raw(raw: RawRecord, page_url: &Url, out_of_stock_class: &str) -> Self {
        let in_stock = !raw
            .class_attr
            .as_deref()
            .is_some_and(|classes| classes.split_whitespace().any(|c| c == out_of_stock_class));

        Self {
            title: trim_text(raw.title),
            regular_price: trim_text(raw.regular_price),
            sale_price: trim_text(raw.sale_price),
            image_urls: resolve_url(page_url, raw.image_url, "image URL")
                .into_iter()
                .collect(),
            product_url: resolve_url(page_url, raw.product_url, "product URL"),
            brand_image_url: resolve_url(page_url, raw.brand_image_url, "brand image URL"),
            labels: raw
                .labels
                .into_iter()
                .filter_map(|label| clean_text(Some(label)))
                .collect(),
            in_stock,
            scraped_at: raw.scraped_at.unwrap_or_default(),
            image_paths: Vec::new(),
        }
    }
}
