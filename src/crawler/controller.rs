//! The crawl controller: a sequential walk over paginated results.
//!
//! A run bootstraps the session, then fetches one results page at a time.
//! Every record on a page goes through the image pipeline and the completion
//! step before the next record is touched, and the next page is only fetched
//! once the current page's pagination link is known.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use reqwest::header::HeaderMap;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};
use url::Url;

use crate::crawler::config::CrawlerConfig;
use crate::crawler::error::CrawlError;
use crate::crawler::extraction::Extractor;
use crate::crawler::fetch::{FetchGate, FetchResponse, Transport};
use crate::crawler::session::{Session, bootstrap};
use crate::crawler::{PageCursor, Record};
use crate::error::Error as CrateError;
use crate::pipeline::{Completion, ImagePipeline, ImageStore, complete};

/// Receives records as soon as they are accepted
pub trait RecordSink {
    fn emit(&mut self, record: Record);
}

impl RecordSink for Vec<Record> {
    fn emit(&mut self, record: Record) {
        self.push(record);
    }
}

/// Why a walk ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    /// The last page had no pagination link
    NoNextPage,
    /// A page had no products and `stop_on_empty_page` is set
    EmptyPage,
    /// The pagination link pointed at a page already fetched in this run
    AlreadyVisited,
    /// `max_pages` pages were fetched
    PageLimit,
    /// The bootstrap or a page fetch failed; see [`CrawlAborted::error`]
    Aborted,
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            Termination::NoNextPage => "no next page",
            Termination::EmptyPage => "empty page",
            Termination::AlreadyVisited => "next page already visited",
            Termination::PageLimit => "page limit reached",
            Termination::Aborted => "aborted by a fetch error",
        };
        f.write_str(reason)
    }
}

/// States of the pagination walk.
///
/// The session exists from the end of `Bootstrapping` on and travels with the walk.
#[derive(Debug)]
pub enum CrawlState {
    Bootstrapping,
    Fetching {
        cursor: PageCursor,
        session: Session,
    },
    Extracting {
        cursor: PageCursor,
        response: FetchResponse,
        session: Session,
    },
    Advancing {
        cursor: PageCursor,
        next: Option<String>,
        records: usize,
        session: Session,
    },
    Terminated(Termination),
}

/// Outcome of one results page
#[derive(Debug, Clone, Serialize)]
pub struct PageReport {
    pub url: String,
    /// Records extracted from the page
    pub records: usize,
    /// Failed fetch attempts for the page, including a final fatal one
    pub fetch_faults: u32,
}

/// Summary of a crawl run
#[derive(Debug, Clone, Serialize)]
pub struct CrawlReport {
    pub pages: Vec<PageReport>,
    pub emitted: usize,
    pub dropped: usize,
    pub image_failures: usize,
    pub termination: Termination,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// A run stopped by a fatal error, with everything counted up to that point
#[derive(Debug, Error)]
#[error("{error}")]
pub struct CrawlAborted {
    pub report: Box<CrawlReport>,
    #[source]
    pub error: CrawlError,
}

impl From<CrawlAborted> for CrateError {
    fn from(err: CrawlAborted) -> Self {
        err.error.into()
    }
}

#[derive(Default)]
struct Tally {
    pages: Vec<PageReport>,
    emitted: usize,
    dropped: usize,
    image_failures: usize,
}

/// Drives one crawl run from bootstrap to termination
pub struct Crawler<T, S> {
    config: CrawlerConfig,
    gate: Arc<FetchGate<T>>,
    extractor: Extractor,
    pipeline: ImagePipeline<T, S>,
    home_url: Url,
    seed_url: Url,
    headers: HeaderMap,
}

impl<T: Transport, S: ImageStore> Crawler<T, S> {
    /// Create a crawler; fails on an invalid configuration
    pub fn new(config: CrawlerConfig, transport: T, store: S) -> Result<Self, CrawlError> {
        config.validate()?;
        let home_url = Url::parse(&config.home_url)?;
        let seed_url = Url::parse(&config.seed_url)?;
        let headers = config.header_map()?;
        let extractor = Extractor::new(&config.selectors)?;
        let gate = Arc::new(FetchGate::from_config(transport, &config));
        let pipeline = ImagePipeline::new(Arc::clone(&gate), store);

        Ok(Self {
            config,
            gate,
            extractor,
            pipeline,
            home_url,
            seed_url,
            headers,
        })
    }

    pub fn config(&self) -> &CrawlerConfig {
        &self.config
    }

    /// Run the crawl, handing every accepted record to `sink`.
    ///
    /// A failed bootstrap or page fetch ends the run with [`CrawlAborted`], which
    /// still carries the report of the pages processed so far. Records emitted
    /// before that point have already reached the sink.
    #[instrument(skip_all, fields(seed = %self.seed_url))]
    pub async fn run<K: RecordSink>(&self, sink: &mut K) -> Result<CrawlReport, CrawlAborted> {
        let started_at = Utc::now();
        info!(
            concurrency = self.config.fetch_concurrency,
            delay_ms = self.config.min_request_delay_ms,
            respect_robots_txt = self.config.respect_robots_txt,
            "Starting crawl of {}",
            self.seed_url
        );

        let mut tally = Tally::default();
        let outcome = self.walk(sink, &mut tally).await;
        let termination = match &outcome {
            Ok(reason) => *reason,
            Err(_) => Termination::Aborted,
        };

        let report = CrawlReport {
            pages: tally.pages,
            emitted: tally.emitted,
            dropped: tally.dropped,
            image_failures: tally.image_failures,
            termination,
            started_at,
            finished_at: Utc::now(),
        };
        info!(
            "Crawl finished ({}): {} page(s), {} record(s) emitted, {} dropped, {} image failure(s)",
            report.termination,
            report.pages.len(),
            report.emitted,
            report.dropped,
            report.image_failures
        );

        match outcome {
            Ok(_) => Ok(report),
            Err(error) => {
                error!("Crawl aborted: {}", error);
                Err(CrawlAborted {
                    report: Box::new(report),
                    error,
                })
            }
        }
    }

    async fn walk<K: RecordSink>(
        &self,
        sink: &mut K,
        tally: &mut Tally,
    ) -> Result<Termination, CrawlError> {
        let mut visited: HashSet<Url> = HashSet::new();
        let mut state = CrawlState::Bootstrapping;

        loop {
            state = match state {
                CrawlState::Bootstrapping => {
                    let session = bootstrap(&self.gate, &self.home_url, &self.headers).await?;
                    CrawlState::Fetching {
                        cursor: PageCursor::seed(self.seed_url.clone()),
                        session,
                    }
                }
                CrawlState::Fetching { cursor, session } => {
                    let page = tally.pages.len() + 1;
                    info!("Fetching page {}: {}", page, cursor.url);
                    let mut report = PageReport {
                        url: cursor.url.to_string(),
                        records: 0,
                        fetch_faults: 0,
                    };
                    let fetched = self
                        .fetch_page(&cursor, page, &session, &mut report.fetch_faults)
                        .await;
                    tally.pages.push(report);
                    let response = fetched?;

                    visited.insert(cursor.url.clone());
                    let cursor = cursor.redirected(response.url.clone());
                    visited.insert(cursor.url.clone());
                    CrawlState::Extracting {
                        cursor,
                        response,
                        session,
                    }
                }
                CrawlState::Extracting {
                    cursor,
                    response,
                    session,
                } => {
                    let body = response.text();
                    let extracted = self
                        .extractor
                        .extract_page(&response.url, response.date(), &body);
                    let records = extracted.records.len();
                    if let Some(page) = tally.pages.last_mut() {
                        page.records = records;
                    }
                    for record in extracted.records {
                        self.process(record, &session, sink, tally).await;
                    }
                    CrawlState::Advancing {
                        cursor,
                        next: extracted.next_page,
                        records,
                        session,
                    }
                }
                CrawlState::Advancing {
                    cursor,
                    next,
                    records,
                    session,
                } => self.advance(&cursor, next, records, session, &visited, tally.pages.len()),
                CrawlState::Terminated(reason) => return Ok(reason),
            };
        }
    }

    /// Fetch a results page, retrying retryable failures up to `page_retries` times
    async fn fetch_page(
        &self,
        cursor: &PageCursor,
        page: usize,
        session: &Session,
        faults: &mut u32,
    ) -> Result<FetchResponse, CrawlError> {
        loop {
            match self
                .gate
                .fetch(&cursor.url, session.headers(), session.cookies())
                .await
            {
                Ok(response) => return Ok(response),
                Err(e) => {
                    *faults += 1;
                    if e.is_retryable() && *faults <= self.config.page_retries {
                        warn!("Page {} attempt {} failed, retrying: {}", page, faults, e);
                        continue;
                    }
                    error!("Page {} failed after {} attempt(s): {}", page, faults, e);
                    return Err(CrawlError::PageFetch {
                        page,
                        attempts: *faults,
                        source: e,
                    });
                }
            }
        }
    }

    async fn process<K: RecordSink>(
        &self,
        record: Record,
        session: &Session,
        sink: &mut K,
        tally: &mut Tally,
    ) {
        let acquired = self.pipeline.acquire(record, session).await;
        tally.image_failures += acquired.failed();

        let title = acquired.record.title.clone();
        match complete(acquired.record) {
            Completion::Emit(record) => {
                debug!("Emitting record {:?}", title);
                tally.emitted += 1;
                sink.emit(record);
            }
            Completion::Drop(reason) => {
                warn!("Dropped record {:?}: {}", title, reason);
                tally.dropped += 1;
            }
        }
    }

    fn advance(
        &self,
        cursor: &PageCursor,
        next: Option<String>,
        records: usize,
        session: Session,
        visited: &HashSet<Url>,
        pages_fetched: usize,
    ) -> CrawlState {
        if records == 0 && self.config.stop_on_empty_page {
            return CrawlState::Terminated(Termination::EmptyPage);
        }
        let Some(href) = next else {
            return CrawlState::Terminated(Termination::NoNextPage);
        };
        if self.config.max_pages.is_some_and(|max| pages_fetched >= max) {
            return CrawlState::Terminated(Termination::PageLimit);
        }
        match cursor.follow(&href) {
            Ok(next) if visited.contains(&next.url) => {
                warn!("Pagination link {} was already visited", next.url);
                CrawlState::Terminated(Termination::AlreadyVisited)
            }
            Ok(next) => CrawlState::Fetching {
                cursor: next,
                session,
            },
            Err(e) => {
                warn!("Ignoring unusable pagination link '{}': {}", href, e);
                CrawlState::Terminated(Termination::NoNextPage)
            }
        }
    }
}
