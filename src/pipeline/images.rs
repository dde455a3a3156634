//! Image acquisition: download every image of a record and remember where it went.
//!
//! A record's images are fetched independently. Losing some of them is normal;
//! the record keeps the paths of the ones that made it, in the order of its
//! image URLs.

use std::sync::Arc;

use futures::future;
use sha1::{Digest, Sha1};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::crawler::{FetchError, FetchGate, Record, Session, Transport};
use crate::pipeline::storage::{ImageStore, StoreError};

/// Why one image could not be stored
#[derive(Debug, Error)]
pub enum ImageError {
    #[error("download failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("empty response body")]
    EmptyBody,

    #[error("could not store image: {0}")]
    Store(#[from] StoreError),
}

impl From<ImageError> for crate::Error {
    fn from(err: ImageError) -> Self {
        crate::Error::Pipeline(err.to_string())
    }
}

/// State of a single image download
#[derive(Debug)]
pub enum JobOutcome {
    Pending,
    Stored(String),
    Failed(ImageError),
}

/// Fetch-and-store unit for one image URL of a record
#[derive(Debug)]
pub struct ImageJob {
    pub url: Url,
    pub outcome: JobOutcome,
}

impl ImageJob {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            outcome: JobOutcome::Pending,
        }
    }

    pub fn stored_path(&self) -> Option<&str> {
        match &self.outcome {
            JobOutcome::Stored(path) => Some(path),
            _ => None,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.outcome, JobOutcome::Failed(_))
    }
}

/// A record after acquisition, with the jobs that produced its image paths
#[derive(Debug)]
pub struct Acquired {
    pub record: Record,
    pub jobs: Vec<ImageJob>,
}

impl Acquired {
    pub fn failed(&self) -> usize {
        self.jobs.iter().filter(|job| job.is_failed()).count()
    }
}

/// Keep alphanumerics, spaces, hyphens and underscores, then trim
pub fn sanitize_title(title: &str) -> String {
    title
        .chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, ' ' | '-' | '_'))
        .collect::<String>()
        .trim()
        .to_string()
}

/// File name of an image: the last URL path segment, or a hash of the URL
pub fn image_basename(url: &Url) -> String {
    let basename = url.path().rsplit('/').next().unwrap_or_default();
    if basename.is_empty() {
        let digest = Sha1::digest(url.as_str().as_bytes());
        format!("{:x}.jpg", digest)
    } else if !basename.contains('.') {
        format!("{}.jpg", basename)
    } else {
        basename.to_string()
    }
}

/// Relative storage path of an image: `<title>/<basename>`, or the bare basename
pub fn image_path(url: &Url, title: Option<&str>) -> String {
    let basename = image_basename(url);
    match title.map(sanitize_title) {
        Some(folder) if !folder.is_empty() => format!("{}/{}", folder, basename),
        _ => basename,
    }
}

/// Downloads images through the shared fetch gate into an image store
pub struct ImagePipeline<T, S> {
    gate: Arc<FetchGate<T>>,
    store: S,
}

impl<T: Transport, S: ImageStore> ImagePipeline<T, S> {
    pub fn new(gate: Arc<FetchGate<T>>, store: S) -> Self {
        Self { gate, store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Download and store every image of `record` and set its `image_paths`.
    ///
    /// Failures stay inside their job; they never abort the other images.
    #[instrument(skip_all, fields(title = record.title.as_deref().unwrap_or_default(), images = record.image_urls.len()))]
    pub async fn acquire(&self, mut record: Record, session: &Session) -> Acquired {
        let title = record.title.as_deref();
        let jobs = future::join_all(
            record
                .image_urls
                .iter()
                .cloned()
                .map(|url| self.run_job(ImageJob::new(url), title, session)),
        )
        .await;

        record.image_paths = jobs
            .iter()
            .filter_map(|job| job.stored_path().map(str::to_string))
            .collect();
        info!(
            "Stored {} of {} image(s)",
            record.image_paths.len(),
            jobs.len()
        );

        Acquired { record, jobs }
    }

    async fn run_job(&self, mut job: ImageJob, title: Option<&str>, session: &Session) -> ImageJob {
        let path = image_path(&job.url, title);
        job.outcome = match self.download(&job.url, &path, session).await {
            Ok(()) => JobOutcome::Stored(path),
            Err(e) => {
                warn!("Image {} failed: {}", job.url, e);
                JobOutcome::Failed(e)
            }
        };
        job
    }

    async fn download(&self, url: &Url, path: &str, session: &Session) -> Result<(), ImageError> {
        let response = self
            .gate
            .fetch(url, session.headers(), session.cookies())
            .await?;
        if response.body.is_empty() {
            return Err(ImageError::EmptyBody);
        }
        let stored = self.store.persist(&response.body, path).await?;
        debug!("Image {} stored at {}", url, stored.display());
        Ok(())
    }
}
