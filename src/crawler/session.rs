//! Session bootstrap: one warm-up request to the site root before any data-bearing request.

use reqwest::header::{HeaderMap, SET_COOKIE};
use tracing::{debug, info, instrument};
use url::Url;

use crate::crawler::error::CrawlError;
use crate::crawler::fetch::{Cookies, FetchGate, FetchResponse, Transport};

/// Cookies and headers carried by every request of a crawl run.
///
/// Built once by [`bootstrap`] and never modified afterwards.
#[derive(Debug, Clone, Default)]
pub struct Session {
    headers: HeaderMap,
    cookies: Cookies,
}

impl Session {
    pub fn new(headers: HeaderMap, cookies: Cookies) -> Self {
        Self { headers, cookies }
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn cookies(&self) -> &Cookies {
        &self.cookies
    }
}

/// Request `home_url` once and capture the cookies it sets.
///
/// The response body is ignored. Any failure is fatal for the run: the pages
/// behind it are expected to require the session.
#[instrument(skip(gate, default_headers), fields(home = %home_url))]
pub async fn bootstrap<T: Transport>(
    gate: &FetchGate<T>,
    home_url: &Url,
    default_headers: &HeaderMap,
) -> Result<Session, CrawlError> {
    let response = gate
        .fetch(home_url, default_headers, &Cookies::new())
        .await
        .map_err(CrawlError::Bootstrap)?;

    let cookies = session_cookies(&response);
    info!("Session established with {} cookie(s)", cookies.len());
    for (name, value) in &cookies {
        debug!("Received cookie: {}={}", name, value);
    }

    Ok(Session::new(default_headers.clone(), cookies))
}

/// Collect `name=value` pairs from the `Set-Cookie` headers of a response
pub fn session_cookies(response: &FetchResponse) -> Cookies {
    let mut cookies = Cookies::new();
    for header in response.headers.get_all(SET_COOKIE) {
        let Ok(raw) = header.to_str() else {
            continue;
        };
        if let Some((name, value)) = parse_set_cookie(raw) {
            cookies.insert(name, value);
        }
    }
    cookies
}

fn parse_set_cookie(raw: &str) -> Option<(String, String)> {
    let pair = raw.split(';').next()?;
    let (name, value) = pair.split_once('=')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    Some((name.to_string(), value.trim().trim_matches('"').to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawler::error::FetchErrorKind;
    use crate::test_support::{StubResponse, StubTransport};
    use std::time::Duration;

    fn gate(transport: &StubTransport) -> FetchGate<StubTransport> {
        FetchGate::new(transport.clone(), 1, Duration::ZERO, vec![])
    }

    #[test]
    fn test_parse_set_cookie() {
        assert_eq!(
            parse_set_cookie("PHPSESSID=abc123; path=/; HttpOnly"),
            Some(("PHPSESSID".to_string(), "abc123".to_string()))
        );
        assert_eq!(
            parse_set_cookie("lang=\"ro\""),
            Some(("lang".to_string(), "ro".to_string()))
        );
        assert_eq!(parse_set_cookie("garbage"), None);
        assert_eq!(parse_set_cookie("=value"), None);
    }

    #[tokio::test]
    async fn test_bootstrap_collects_cookies() {
        let transport = StubTransport::new();
        transport.respond(
            "https://supraten.md/",
            StubResponse::ok("<html>home</html>")
                .with_header("set-cookie", "PHPSESSID=abc; path=/")
                .with_header("set-cookie", "lang=ro; Max-Age=3600"),
        );
        let mut headers = HeaderMap::new();
        headers.insert("accept-language", "ro".parse().unwrap());
        let home = Url::parse("https://supraten.md").unwrap();

        let session = bootstrap(&gate(&transport), &home, &headers).await.unwrap();

        assert_eq!(session.cookies().get("PHPSESSID").map(String::as_str), Some("abc"));
        assert_eq!(session.cookies().get("lang").map(String::as_str), Some("ro"));
        assert_eq!(session.headers().get("accept-language").unwrap(), "ro");
        assert_eq!(transport.requests(), vec!["https://supraten.md/".to_string()]);
    }

    #[tokio::test]
    async fn test_bootstrap_failure_is_fatal() {
        let transport = StubTransport::new();
        transport.respond("https://supraten.md/", StubResponse::status(503));
        let home = Url::parse("https://supraten.md/").unwrap();

        let err = bootstrap(&gate(&transport), &home, &HeaderMap::new())
            .await
            .unwrap_err();

        match err {
            CrawlError::Bootstrap(e) => assert_eq!(e.kind, FetchErrorKind::Status(503)),
            other => panic!("Expected Bootstrap error, got {:?}", other),
        }
        assert_eq!(transport.requests().len(), 1);
    }
}
