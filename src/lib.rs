//! # tile-scraper - Session-aware product listing crawler
//!
//! This crate walks the paginated search results of an online shop, extracts one
//! record per product card and downloads every product image before handing the
//! record on. Records whose images could not be stored are dropped.
//!
//! ## Features
//!
//! - A single fetch gate with a concurrency cap, a minimum request delay and a
//!   domain allow-list
//! - Cookie session established from the site root before any results page
//! - Strictly sequential pagination with revisit detection
//! - Concurrent per-record image downloads with partial-failure tolerance
//! - JSON feed output
//! - Async API with Tokio
//!
//! ## Example
//!
//! ```rust,no_run
//! use tile_scraper::crawler::{Crawler, CrawlerConfig, ReqwestTransport};
//! use tile_scraper::pipeline::{FsImageStore, write_feed};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = CrawlerConfig::builder()
//!         .seed_url("https://supraten.md/cautare?search=gresie&category_id=0")
//!         .max_pages(Some(3))
//!         .build();
//!     let transport = ReqwestTransport::new(&config)?;
//!     let crawler = Crawler::new(config, transport, FsImageStore::new())?;
//!
//!     let mut records = Vec::new();
//!     let report = crawler.run(&mut records).await?;
//!     write_feed("tiles_data.json".as_ref(), &records).await?;
//!
//!     println!("{} records, finished: {}", report.emitted, report.termination);
//!     Ok(())
//! }
//! ```

mod error;

pub mod crawler;
pub mod pipeline;

#[cfg(test)]
mod test_support;

pub use error::{Error, Result};

/// Re-export of the most used types
pub mod prelude {
    pub use crate::crawler::{CrawlReport, Crawler, CrawlerConfig, Record, RecordSink};
    pub use crate::error::Error;
    pub use crate::error::Result;
    pub use crate::pipeline::{FsImageStore, StorageConfig};
}
