//! In-memory transport and image store shared by the unit tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use url::Url;

use crate::crawler::{FetchError, FetchErrorKind, FetchRequest, FetchResponse, Transport};
use crate::pipeline::storage::{ImageStore, StoreError};

/// Canned reply for one URL
#[derive(Debug, Clone)]
pub enum StubResponse {
    Reply {
        status: u16,
        headers: Vec<(String, String)>,
        body: Vec<u8>,
    },
    Fail(FetchErrorKind),
}

impl StubResponse {
    pub fn ok(body: impl Into<Vec<u8>>) -> Self {
        StubResponse::Reply {
            status: 200,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    pub fn status(status: u16) -> Self {
        StubResponse::Reply {
            status,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    pub fn fail(kind: FetchErrorKind) -> Self {
        StubResponse::Fail(kind)
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        if let StubResponse::Reply { headers, .. } = &mut self {
            headers.push((name.to_string(), value.to_string()));
        }
        self
    }
}

#[derive(Default)]
struct Inner {
    replies: Mutex<HashMap<String, VecDeque<StubResponse>>>,
    requests: Mutex<Vec<FetchRequest>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

/// Transport answering from a table of canned responses.
///
/// Several replies registered for one URL are served in order; the last one repeats.
/// Unknown URLs answer 404.
#[derive(Clone, Default)]
pub struct StubTransport {
    inner: Arc<Inner>,
    latency: Duration,
}

impl StubTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn respond(&self, url: &str, response: StubResponse) {
        self.inner
            .replies
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_default()
            .push_back(response);
    }

    pub fn ok(&self, url: &str, body: &str) {
        self.respond(url, StubResponse::ok(body));
    }

    /// URLs requested so far, in dispatch order
    pub fn requests(&self) -> Vec<String> {
        self.inner
            .requests
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.url.to_string())
            .collect()
    }

    pub fn request_log(&self) -> Vec<FetchRequest> {
        self.inner.requests.lock().unwrap().clone()
    }

    pub fn max_in_flight(&self) -> usize {
        self.inner.max_in_flight.load(Ordering::SeqCst)
    }

    fn next_reply(&self, url: &str) -> StubResponse {
        let mut replies = self.inner.replies.lock().unwrap();
        match replies.get_mut(url) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap(),
            Some(queue) => queue.front().cloned().unwrap_or_else(|| StubResponse::status(404)),
            None => StubResponse::status(404),
        }
    }
}

impl Transport for StubTransport {
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, FetchError> {
        let now = self.inner.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.inner.requests.lock().unwrap().push(request.clone());

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        let reply = self.next_reply(request.url.as_str());
        self.inner.in_flight.fetch_sub(1, Ordering::SeqCst);

        match reply {
            StubResponse::Reply {
                status,
                headers,
                body,
            } => {
                let mut map = HeaderMap::new();
                for (name, value) in headers {
                    map.append(
                        HeaderName::from_bytes(name.as_bytes()).unwrap(),
                        HeaderValue::from_str(&value).unwrap(),
                    );
                }
                Ok(FetchResponse {
                    url: request.url,
                    status,
                    headers: map,
                    body,
                })
            }
            StubResponse::Fail(kind) => Err(FetchError::new(kind, request.url.as_str(), "stubbed failure")),
        }
    }
}

/// Image store keeping files in memory
#[derive(Clone, Default)]
pub struct MemoryStore {
    files: Arc<Mutex<Vec<(String, Vec<u8>)>>>,
    failing: Arc<Mutex<HashSet<String>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make writes to `relative_path` fail
    pub fn fail_on(&self, relative_path: &str) {
        self.failing.lock().unwrap().insert(relative_path.to_string());
    }

    pub fn paths(&self) -> Vec<String> {
        self.files.lock().unwrap().iter().map(|(p, _)| p.clone()).collect()
    }
}

impl ImageStore for MemoryStore {
    async fn persist(&self, bytes: &[u8], relative_path: &str) -> Result<PathBuf, StoreError> {
        if self.failing.lock().unwrap().contains(relative_path) {
            return Err(StoreError::Io(std::io::Error::other("disk full")));
        }
        self.files
            .lock()
            .unwrap()
            .push((relative_path.to_string(), bytes.to_vec()));
        Ok(PathBuf::from("/memory").join(relative_path))
    }
}

/// Parse a URL in a test
pub fn url(raw: &str) -> Url {
    Url::parse(raw).unwrap()
}
