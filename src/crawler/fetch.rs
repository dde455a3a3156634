//! The fetch gate: every request of a crawl run, page or image, goes through here.
//!
//! The gate owns the politeness limits. It caps the number of requests in flight,
//! keeps a minimum delay between the end of one request and the start of the next,
//! paces dispatches with a `governor` limiter and refuses URLs outside the allowed
//! domains. It never retries; that decision belongs to the caller.

use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;

use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use reqwest::header::{COOKIE, DATE, HeaderMap};
use reqwest::redirect::Policy;
use tokio::sync::{Mutex, Semaphore};
use tokio::time::Instant;
use tracing::{Instrument, debug, debug_span, instrument, warn};
use url::Url;

use crate::crawler::config::{CrawlerConfig, is_allowed_host};
use crate::crawler::error::{CrawlError, FetchError, FetchErrorKind, OffsiteRedirect};

const MAX_REDIRECTS: usize = 10;

/// Cookie name to value, as carried by a session
pub type Cookies = BTreeMap<String, String>;

/// A single GET request handed to the transport
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub url: Url,
    pub headers: HeaderMap,
    pub cookies: Cookies,
}

/// A response as returned by the transport
#[derive(Debug, Clone)]
pub struct FetchResponse {
    /// Final URL after redirects
    pub url: Url,
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl FetchResponse {
    /// Value of a header, if present and valid ASCII
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// The `Date` header the origin stamped on the response
    pub fn date(&self) -> Option<&str> {
        self.headers.get(DATE).and_then(|v| v.to_str().ok())
    }

    /// Body decoded as UTF-8, replacing invalid sequences
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// The network capability the crawler is built on
pub trait Transport: Send + Sync {
    /// Perform one GET request. Non-2xx statuses are returned as responses, not errors.
    fn fetch(
        &self,
        request: FetchRequest,
    ) -> impl Future<Output = Result<FetchResponse, FetchError>> + Send;
}

/// Transport backed by a reqwest client
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Create a transport honoring the configured timeout.
    ///
    /// Redirects are followed only while they stay inside the allowed domains.
    pub fn new(config: &CrawlerConfig) -> Result<Self, CrawlError> {
        let allowed_domains = config.allowed_domains.clone();
        let redirects = Policy::custom(move |attempt| {
            if attempt.previous().len() > MAX_REDIRECTS {
                return attempt.error("too many redirects");
            }
            if is_allowed_host(&allowed_domains, attempt.url()) {
                attempt.follow()
            } else {
                let target = attempt.url().to_string();
                attempt.error(OffsiteRedirect(target))
            }
        });
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .redirect(redirects)
            .build()
            .map_err(|e| CrawlError::Config(format!("failed to create HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    /// Wrap an existing client
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl Transport for ReqwestTransport {
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, FetchError> {
        let url = request.url.to_string();
        let mut builder = self.client.get(request.url).headers(request.headers);
        if let Some(cookie) = cookie_header(&request.cookies) {
            builder = builder.header(COOKIE, cookie);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| FetchError::from_reqwest(&url, e))?;

        let status = response.status().as_u16();
        let final_url = response.url().clone();
        let headers = response.headers().clone();
        let body = response
            .bytes()
            .await
            .map_err(|e| FetchError::from_reqwest(&url, e))?;

        Ok(FetchResponse {
            url: final_url,
            status,
            headers,
            body: body.to_vec(),
        })
    }
}

/// Join cookies into a single `Cookie` header value
pub fn cookie_header(cookies: &Cookies) -> Option<String> {
    if cookies.is_empty() {
        return None;
    }
    Some(
        cookies
            .iter()
            .map(|(name, value)| format!("{}={}", name, value))
            .collect::<Vec<_>>()
            .join("; "),
    )
}

/// Rate- and concurrency-limited access to a transport
pub struct FetchGate<T> {
    transport: T,
    permits: Semaphore,
    limiter: Option<DefaultDirectRateLimiter>,
    min_delay: Duration,
    last_completed: Mutex<Option<Instant>>,
    allowed_domains: Vec<String>,
}

impl<T: Transport> FetchGate<T> {
    pub fn new(
        transport: T,
        concurrency: usize,
        min_delay: Duration,
        allowed_domains: Vec<String>,
    ) -> Self {
        let limiter = Quota::with_period(min_delay).map(|quota| RateLimiter::direct(quota));
        Self {
            transport,
            permits: Semaphore::new(concurrency.max(1)),
            limiter,
            min_delay,
            last_completed: Mutex::new(None),
            allowed_domains,
        }
    }

    /// Build a gate with the limits from the crawler configuration
    pub fn from_config(transport: T, config: &CrawlerConfig) -> Self {
        Self::new(
            transport,
            config.fetch_concurrency,
            config.min_request_delay(),
            config.allowed_domains.clone(),
        )
    }

    /// Fetch `url`, waiting for the gate's limits first.
    ///
    /// Offsite URLs, transport failures and non-2xx statuses are all errors.
    #[instrument(skip(self, headers, cookies), fields(url = %url))]
    pub async fn fetch(
        &self,
        url: &Url,
        headers: &HeaderMap,
        cookies: &Cookies,
    ) -> Result<FetchResponse, FetchError> {
        if !is_allowed_host(&self.allowed_domains, url) {
            warn!("Rejecting offsite request to {}", url);
            return Err(FetchError::new(
                FetchErrorKind::Offsite,
                url.as_str(),
                format!("host not in allowed domains {:?}", self.allowed_domains),
            ));
        }

        let _permit = self.permits.acquire().await.map_err(|e| {
            FetchError::new(FetchErrorKind::Network, url.as_str(), e.to_string())
        })?;

        self.wait_for_turn().await;

        debug!("Dispatching request");
        let result = self
            .transport
            .fetch(FetchRequest {
                url: url.clone(),
                headers: headers.clone(),
                cookies: cookies.clone(),
            })
            .await;
        *self.last_completed.lock().await = Some(Instant::now());

        let response = result?;
        if !is_allowed_host(&self.allowed_domains, &response.url) {
            warn!("Rejecting response redirected offsite to {}", response.url);
            return Err(FetchError::new(
                FetchErrorKind::Offsite,
                url.as_str(),
                format!("redirected to {} outside the allowed domains", response.url),
            ));
        }
        if !response.is_success() {
            return Err(FetchError::new(
                FetchErrorKind::Status(response.status),
                url.as_str(),
                format!("origin answered {}", response.status),
            ));
        }
        debug!(status = response.status, bytes = response.body.len(), "Request completed");
        Ok(response)
    }

    async fn wait_for_turn(&self) {
        let wait = {
            let last = self.last_completed.lock().await;
            last.map(|at| (at + self.min_delay).saturating_duration_since(Instant::now()))
        };
        if let Some(wait) = wait.filter(|w| !w.is_zero()) {
            tokio::time::sleep(wait)
                .instrument(debug_span!("delay", ms = wait.as_millis() as u64))
                .await;
        }
        if let Some(limiter) = &self.limiter {
            limiter.until_ready().instrument(debug_span!("limiter")).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::StubTransport;
    use mockito::{Matcher, Server};
    use std::sync::Arc;

    fn no_headers() -> HeaderMap {
        HeaderMap::new()
    }

    #[tokio::test]
    async fn test_reqwest_transport_sends_cookies_and_headers() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/cautare")
            .match_query(Matcher::Any)
            .match_header("cookie", "lang=ro; session=abc")
            .match_header("accept-language", "ro")
            .with_status(200)
            .with_header("date", "Mon, 01 Jan 2024 10:00:00 GMT")
            .with_body("<html></html>")
            .expect(1)
            .create_async()
            .await;

        let gate = FetchGate::new(
            ReqwestTransport::new(&CrawlerConfig::default()).unwrap(),
            1,
            Duration::ZERO,
            vec![],
        );
        let url = Url::parse(&format!("{}/cautare?search=gresie", server.url())).unwrap();
        let mut headers = HeaderMap::new();
        headers.insert("accept-language", "ro".parse().unwrap());
        let cookies = Cookies::from([
            ("session".to_string(), "abc".to_string()),
            ("lang".to_string(), "ro".to_string()),
        ]);

        let response = gate.fetch(&url, &headers, &cookies).await.unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.date(), Some("Mon, 01 Jan 2024 10:00:00 GMT"));
        assert_eq!(response.text(), "<html></html>");

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_non_success_status_is_an_error() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/missing.jpg")
            .with_status(404)
            .with_body("Not Found")
            .create_async()
            .await;

        let gate = FetchGate::new(
            ReqwestTransport::new(&CrawlerConfig::default()).unwrap(),
            1,
            Duration::ZERO,
            vec![],
        );
        let url = Url::parse(&format!("{}/missing.jpg", server.url())).unwrap();

        let err = gate.fetch(&url, &no_headers(), &Cookies::new()).await.unwrap_err();
        assert_eq!(err.kind, FetchErrorKind::Status(404));

        mock.assert_async().await;
    }

    fn local_only() -> CrawlerConfig {
        CrawlerConfig::builder()
            .allowed_domains(vec!["127.0.0.1".to_string()])
            .min_request_delay_ms(0)
            .build()
    }

    /// Same server, reached through a host name outside the allow-list
    fn offsite_location(server: &Server, path: &str) -> String {
        format!(
            "http://{}{}",
            server.host_with_port().replace("127.0.0.1", "localhost"),
            path
        )
    }

    #[tokio::test]
    async fn test_offsite_redirect_is_not_followed() {
        let mut server = Server::new_async().await;
        let location = offsite_location(&server, "/offsite");
        let page = server
            .mock("GET", "/page")
            .with_status(302)
            .with_header("location", &location)
            .create_async()
            .await;
        let offsite = server
            .mock("GET", "/offsite")
            .with_status(200)
            .with_body("offsite-bytes")
            .expect(0)
            .create_async()
            .await;

        let config = local_only();
        let gate = FetchGate::from_config(ReqwestTransport::new(&config).unwrap(), &config);
        let url = Url::parse(&format!("{}/page", server.url())).unwrap();

        let err = gate.fetch(&url, &no_headers(), &Cookies::new()).await.unwrap_err();
        assert_eq!(err.kind, FetchErrorKind::Offsite);
        assert!(!err.is_retryable());

        page.assert_async().await;
        offsite.assert_async().await;
    }

    #[tokio::test]
    async fn test_gate_rejects_response_that_ended_offsite() {
        let mut server = Server::new_async().await;
        let location = offsite_location(&server, "/offsite");
        server
            .mock("GET", "/page")
            .with_status(302)
            .with_header("location", &location)
            .create_async()
            .await;
        server
            .mock("GET", "/offsite")
            .with_status(200)
            .with_body("offsite-bytes")
            .create_async()
            .await;

        let gate = FetchGate::new(
            ReqwestTransport::with_client(reqwest::Client::new()),
            1,
            Duration::ZERO,
            vec!["127.0.0.1".to_string()],
        );
        let url = Url::parse(&format!("{}/page", server.url())).unwrap();

        let err = gate.fetch(&url, &no_headers(), &Cookies::new()).await.unwrap_err();
        assert_eq!(err.kind, FetchErrorKind::Offsite);
    }

    #[tokio::test]
    async fn test_onsite_redirect_is_followed() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/old")
            .with_status(301)
            .with_header("location", "/new")
            .create_async()
            .await;
        server
            .mock("GET", "/new")
            .with_status(200)
            .with_body("moved")
            .create_async()
            .await;

        let config = local_only();
        let gate = FetchGate::from_config(ReqwestTransport::new(&config).unwrap(), &config);
        let url = Url::parse(&format!("{}/old", server.url())).unwrap();

        let response = gate.fetch(&url, &no_headers(), &Cookies::new()).await.unwrap();
        assert_eq!(response.url.path(), "/new");
        assert_eq!(response.text(), "moved");
    }

    #[tokio::test]
    async fn test_offsite_request_never_reaches_transport() {
        let transport = StubTransport::new();
        let gate = FetchGate::new(
            transport.clone(),
            1,
            Duration::ZERO,
            vec!["supraten.md".to_string()],
        );
        let url = Url::parse("https://tracker.example.com/pixel.gif").unwrap();

        let err = gate.fetch(&url, &no_headers(), &Cookies::new()).await.unwrap_err();
        assert_eq!(err.kind, FetchErrorKind::Offsite);
        assert!(transport.requests().is_empty());
    }

    #[tokio::test]
    async fn test_minimum_delay_between_requests() {
        let transport = StubTransport::new();
        transport.ok("https://supraten.md/a", "a");
        transport.ok("https://supraten.md/b", "b");
        let gate = FetchGate::new(
            transport.clone(),
            1,
            Duration::from_millis(150),
            vec!["supraten.md".to_string()],
        );

        let started = Instant::now();
        for path in ["a", "b"] {
            let url = Url::parse(&format!("https://supraten.md/{}", path)).unwrap();
            gate.fetch(&url, &no_headers(), &Cookies::new()).await.unwrap();
        }
        assert!(started.elapsed() >= Duration::from_millis(150));
        assert_eq!(transport.requests().len(), 2);
    }

    #[tokio::test]
    async fn test_concurrency_cap_holds() {
        let transport = StubTransport::new().with_latency(Duration::from_millis(20));
        for i in 0..4 {
            transport.ok(&format!("https://supraten.md/{}", i), "x");
        }
        let gate = Arc::new(FetchGate::new(
            transport.clone(),
            1,
            Duration::ZERO,
            vec![],
        ));

        let fetches = (0..4).map(|i| {
            let gate = Arc::clone(&gate);
            async move {
                let url = Url::parse(&format!("https://supraten.md/{}", i)).unwrap();
                gate.fetch(&url, &HeaderMap::new(), &Cookies::new()).await
            }
        });
        let results = futures::future::join_all(fetches).await;

        assert!(results.iter().all(|r| r.is_ok()));
        assert_eq!(transport.max_in_flight(), 1);
    }

    #[test]
    fn test_cookie_header_format() {
        assert_eq!(cookie_header(&Cookies::new()), None);
        let cookies = Cookies::from([
            ("b".to_string(), "2".to_string()),
            ("a".to_string(), "1".to_string()),
        ]);
        assert_eq!(cookie_header(&cookies).as_deref(), Some("a=1; b=2"));
    }
}
