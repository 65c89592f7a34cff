// src/core/scanner/http_prober.rs

use chrono::Utc;
use once_cell::sync::Lazy;
use rand::seq::IndexedRandom;
use regex::Regex;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, LOCATION, USER_AGENT};
use reqwest::redirect::Policy;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use super::Prober;
use crate::core::config::RunConfig;
use crate::core::errors::ScanError;
use crate::core::models::{Metadata, ProbeOutcome, Scheme, Target};

/// Bodies are truncated here to bound memory on pathological responses.
pub const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Title reported when a page has none.
pub const DEFAULT_TITLE: &str = "No Title";

static USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/119.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/118.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/119.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:109.0) Gecko/20100101 Firefox/119.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.1 Safari/605.1.15",
];

static RE_TITLE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)<title[^>]*>(.*?)</title>").unwrap());

/// HTTP(S) discovery: scheme resolution, retries, manual redirect following
/// and capped body capture.
pub struct HttpProber {
    client: reqwest::Client,
    config: Arc<RunConfig>,
    custom_headers: HeaderMap,
}

impl HttpProber {
    pub fn new(config: Arc<RunConfig>) -> Result<Self, ScanError> {
        let mut builder = reqwest::Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.timeout)
            // Redirects are followed by hand so the chain can be recorded.
            .redirect(Policy::none());

        if let Some(proxy) = &config.proxy {
            let proxy = reqwest::Proxy::all(proxy)
                .map_err(|e| ScanError::Config(format!("invalid proxy '{proxy}': {e}")))?;
            builder = builder.proxy(proxy);
        }

        let client = builder
            .build()
            .map_err(|e| ScanError::Config(format!("failed to build HTTP client: {e}")))?;

        let mut custom_headers = HeaderMap::new();
        for (key, value) in &config.headers {
            let name = HeaderName::from_bytes(key.as_bytes())
                .map_err(|e| ScanError::Config(format!("invalid header name '{key}': {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| ScanError::Config(format!("invalid value for header '{key}': {e}")))?;
            custom_headers.insert(name, value);
        }

        Ok(Self { client, config, custom_headers })
    }

    fn request_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Some(agent) = USER_AGENTS.choose(&mut rand::rng()) {
            headers.insert(USER_AGENT, HeaderValue::from_static(*agent));
        }
        // Caller-supplied headers win, User-Agent included.
        for (name, value) in &self.custom_headers {
            headers.insert(name.clone(), value.clone());
        }
        headers
    }

    /// One resolution attempt for `url`, with its own retry budget.
    async fn probe_url(
        &self,
        url: &str,
        cancel: &CancellationToken,
    ) -> Result<ProbeOutcome, ScanError> {
        self.config
            .probe_retry
            .run("probe", url, cancel, |attempt| async move {
                debug!(target = %url, attempt, "Sending probe request.");
                tokio::select! {
                    _ = cancel.cancelled() => Err(ScanError::Cancelled),
                    outcome = self.fetch(url) => outcome,
                }
            })
            .await
    }

    async fn fetch(&self, start: &str) -> Result<ProbeOutcome, ScanError> {
        let mut current = Url::parse(start)
            .map_err(|e| ScanError::Protocol(format!("invalid URL '{start}': {e}")))?;
        let mut redirects = Vec::new();

        loop {
            let response = self
                .client
                .get(current.clone())
                .headers(self.request_headers())
                .send()
                .await
                .map_err(|e| ScanError::Transport(describe(&e)))?;

            let location = response
                .headers()
                .get(LOCATION)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);

            match location {
                Some(location) if response.status().is_redirection() => {
                    if redirects.len() >= self.config.max_redirects {
                        return Err(ScanError::Protocol(format!(
                            "stopped after {} redirects",
                            self.config.max_redirects
                        )));
                    }
                    let next = current.join(&location).map_err(|e| {
                        ScanError::Protocol(format!("bad redirect location '{location}': {e}"))
                    })?;
                    debug!(from = %current, to = %next, "Following redirect.");
                    redirects.push(current.to_string());
                    current = next;
                }
                _ => return Ok(read_response(current, redirects, response).await),
            }
        }
    }
}

#[async_trait::async_trait]
impl Prober for HttpProber {
    /// Discovers a live web service behind `target`.
    ///
    /// # Arguments
    /// * `target` - A normalized target. One carrying a scheme is requested as
    ///   is; a scheme-less one is tried over HTTPS first, then plain HTTP.
    /// * `cancel` - Aborts in-flight requests and pending retries.
    ///
    /// # Returns
    /// The final URL after redirects with its metadata. Any HTTP status,
    /// 4xx/5xx included, is a successful probe. Errors are `Transport` once
    /// every candidate is exhausted, `Protocol` for malformed URLs or too many
    /// redirects, and `Cancelled`.
    async fn probe(
        &self,
        target: &Target,
        cancel: &CancellationToken,
    ) -> Result<ProbeOutcome, ScanError> {
        let outcome = resolve_scheme(target, |url| async move { self.probe_url(&url, cancel).await }).await?;
        info!(target = %target.raw, url = %outcome.url, status = outcome.metadata.status_code, "Probe succeeded.");
        Ok(outcome)
    }
}

/// Runs `attempt` over the candidate URLs of `target`, HTTPS before HTTP.
///
/// Only a transport failure moves on to the next candidate: an HTTPS answer
/// of any status, or a protocol error, settles the target.
async fn resolve_scheme<F, Fut>(target: &Target, mut attempt: F) -> Result<ProbeOutcome, ScanError>
where
    F: FnMut(String) -> Fut,
    Fut: Future<Output = Result<ProbeOutcome, ScanError>>,
{
    let candidates = if target.has_scheme() {
        vec![target.raw.clone()]
    } else {
        vec![target.url_for(Scheme::Https), target.url_for(Scheme::Http)]
    };

    let mut last_error = None;
    for (index, url) in candidates.iter().enumerate() {
        match attempt(url.clone()).await {
            Ok(outcome) => return Ok(outcome),
            Err(e @ ScanError::Transport(_)) if index + 1 < candidates.len() => {
                warn!(target = %url, error = %e, "HTTPS unreachable, falling back to HTTP.");
                last_error = Some(e);
            }
            Err(e) => return Err(e),
        }
    }
    Err(last_error.unwrap_or_else(|| ScanError::Transport(format!("no URL to probe for '{}'", target.raw))))
}

/// Builds metadata from a final (non-redirect) response.
async fn read_response(
    url: Url,
    redirects: Vec<String>,
    mut response: reqwest::Response,
) -> ProbeOutcome {
    let status_code = response.status().as_u16();
    let declared_length = response.content_length();

    let mut headers = BTreeMap::new();
    for (name, value) in response.headers() {
        let value = String::from_utf8_lossy(value.as_bytes()).into_owned();
        headers.insert(name.as_str().to_ascii_lowercase(), value);
    }

    let mut body = Vec::new();
    loop {
        match response.chunk().await {
            Ok(Some(chunk)) => {
                let room = MAX_BODY_BYTES - body.len();
                body.extend_from_slice(&chunk[..chunk.len().min(room)]);
                if body.len() >= MAX_BODY_BYTES {
                    debug!(url = %url, "Body truncated at size ceiling.");
                    break;
                }
            }
            Ok(None) => break,
            Err(e) => {
                // Headers and status are still worth keeping.
                warn!(url = %url, error = %e, "Failed to read the full response body.");
                break;
            }
        }
    }
    let body = String::from_utf8_lossy(&body).into_owned();

    let scheme = url.scheme().parse().unwrap_or(Scheme::Http);
    let port = url.port_or_known_default().unwrap_or(scheme.default_port());

    ProbeOutcome {
        url: url.to_string(),
        scheme,
        port,
        metadata: Metadata {
            title: extract_title(&body),
            status_code,
            headers,
            content_length: declared_length.unwrap_or(body.len() as u64),
            timestamp: Some(Utc::now()),
            redirects,
            technologies: Vec::new(),
            body,
        },
    }
}

/// First `<title>` in the body, or [`DEFAULT_TITLE`].
pub fn extract_title(body: &str) -> String {
    RE_TITLE
        .captures(body)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|title| !title.is_empty())
        .unwrap_or_else(|| DEFAULT_TITLE.to_string())
}

/// Flattens a reqwest error and its sources into one line.
fn describe(error: &reqwest::Error) -> String {
    let mut message = error.to_string();
    let mut source = std::error::Error::source(error);
    while let Some(inner) = source {
        message.push_str(": ");
        message.push_str(&inner.to_string());
        source = inner.source();
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::scanner::retry::RetryPolicy;
    use std::time::Duration;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config() -> RunConfig {
        RunConfig {
            timeout: Duration::from_secs(3),
            probe_retry: RetryPolicy::linear(3, Duration::from_millis(5)),
            ..RunConfig::default()
        }
    }

    fn prober(config: RunConfig) -> HttpProber {
        HttpProber::new(Arc::new(config)).unwrap()
    }

    fn closed_port() -> u16 {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    }

    #[test]
    fn title_extraction() {
        assert_eq!(extract_title("<html><TITLE>Test Page</TITLE></html>"), "Test Page");
        assert_eq!(extract_title("<title>\n  Multi\n  line </title>"), "Multi line");
        assert_eq!(extract_title("<title>a</title><title>b</title>"), "a");
        assert_eq!(extract_title("<html><body>none</body></html>"), DEFAULT_TITLE);
    }

    #[tokio::test]
    async fn probe_extracts_metadata() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("Server", "nginx/1.25")
                    .insert_header("Content-Type", "text/html")
                    .set_body_string("<html><title>Test Page</title><body>Hello World</body></html>"),
            )
            .mount(&server)
            .await;

        let target = Target::new(server.uri());
        let outcome = prober(test_config()).probe(&target, &CancellationToken::new()).await.unwrap();

        assert!(outcome.url.starts_with("http://"));
        assert_eq!(outcome.scheme, Scheme::Http);
        assert_eq!(outcome.metadata.title, "Test Page");
        assert_eq!(outcome.metadata.status_code, 200);
        assert_eq!(outcome.metadata.header("Server"), Some("nginx/1.25"));
        assert!(outcome.metadata.timestamp.is_some());
        assert!(outcome.metadata.body.contains("Hello World"));
    }

    #[tokio::test]
    async fn error_statuses_are_successful_probes() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503).set_body_string("down"))
            .expect(1)
            .mount(&server)
            .await;

        let outcome = prober(test_config())
            .probe(&Target::new(server.uri()), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.metadata.status_code, 503);
        assert_eq!(outcome.metadata.title, DEFAULT_TITLE);
    }

    #[tokio::test]
    async fn redirects_are_followed_and_recorded() {
        let server = MockServer::start().await;
        Mock::given(path("/start"))
            .respond_with(ResponseTemplate::new(302).insert_header("Location", "/final"))
            .mount(&server)
            .await;
        Mock::given(path("/final"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<title>Landed</title>"))
            .mount(&server)
            .await;

        let start = format!("{}/start", server.uri());
        let outcome = prober(test_config())
            .probe(&Target::new(start.clone()), &CancellationToken::new())
            .await
            .unwrap();

        assert!(outcome.url.ends_with("/final"));
        assert_eq!(outcome.metadata.redirects, vec![start]);
        assert_eq!(outcome.metadata.title, "Landed");
    }

    #[tokio::test]
    async fn redirect_limit_is_a_terminal_protocol_error() {
        let server = MockServer::start().await;
        Mock::given(path("/loop"))
            .respond_with(ResponseTemplate::new(301).insert_header("Location", "/loop"))
            .expect(3)
            .mount(&server)
            .await;

        let config = RunConfig { max_redirects: 2, ..test_config() };
        let err = prober(config)
            .probe(&Target::new(format!("{}/loop", server.uri())), &CancellationToken::new())
            .await
            .unwrap_err();

        // One initial request plus two followed hops, and no retry afterwards.
        assert!(matches!(err, ScanError::Protocol(_)));
    }

    #[tokio::test]
    async fn custom_headers_are_sent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(header("x-scan", "1"))
            .and(header("user-agent", "NetVista"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<title>ok</title>"))
            .expect(1)
            .mount(&server)
            .await;

        let config = RunConfig {
            headers: vec![("X-Scan".into(), "1".into()), ("User-Agent".into(), "NetVista".into())],
            ..test_config()
        };
        let outcome = prober(config)
            .probe(&Target::new(server.uri()), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome.metadata.title, "ok");
    }

    #[tokio::test]
    async fn bodies_are_capped() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("a".repeat(MAX_BODY_BYTES * 2)))
            .mount(&server)
            .await;

        let outcome = prober(test_config())
            .probe(&Target::new(server.uri()), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome.metadata.body.len(), MAX_BODY_BYTES);
    }

    #[tokio::test]
    async fn schemeless_target_falls_back_to_http() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<title>plain</title>"))
            .mount(&server)
            .await;

        // The mock only speaks plain HTTP, so the TLS attempt fails first.
        let host = server.uri().trim_start_matches("http://").to_string();
        let outcome = prober(test_config())
            .probe(&Target::new(host), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.scheme, Scheme::Http);
        assert_eq!(outcome.metadata.title, "plain");
    }

    fn answered(url: &str, status_code: u16) -> ProbeOutcome {
        ProbeOutcome {
            url: url.to_string(),
            scheme: url.parse::<Url>().ok().and_then(|u| u.scheme().parse().ok()).unwrap_or(Scheme::Http),
            port: 443,
            metadata: Metadata { status_code, ..Metadata::default() },
        }
    }

    /// Resolves `target` against scripted per-URL answers and returns the
    /// outcome plus every URL that was attempted.
    async fn resolve_with(
        target: &str,
        answer: impl Fn(&str) -> Result<ProbeOutcome, ScanError>,
    ) -> (Result<ProbeOutcome, ScanError>, Vec<String>) {
        let tried = std::sync::Mutex::new(Vec::new());
        let outcome = resolve_scheme(&Target::new(target), |url| {
            tried.lock().unwrap().push(url.clone());
            let answer = answer(&url);
            async move { answer }
        })
        .await;
        (outcome, tried.into_inner().unwrap())
    }

    #[tokio::test]
    async fn https_is_tried_first() {
        let (outcome, tried) = resolve_with("a.com", |url| Ok(answered(url, 200))).await;
        assert_eq!(tried, vec!["https://a.com"]);
        assert_eq!(outcome.unwrap().scheme, Scheme::Https);
    }

    #[tokio::test]
    async fn https_error_status_does_not_fall_back() {
        let (outcome, tried) = resolve_with("a.com", |url| Ok(answered(url, 404))).await;
        assert_eq!(tried, vec!["https://a.com"]);
        assert_eq!(outcome.unwrap().metadata.status_code, 404);

        let (outcome, tried) = resolve_with("b.com", |url| Ok(answered(url, 502))).await;
        assert_eq!(tried, vec!["https://b.com"]);
        assert_eq!(outcome.unwrap().metadata.status_code, 502);
    }

    #[tokio::test]
    async fn https_protocol_error_does_not_fall_back() {
        let (outcome, tried) =
            resolve_with("a.com", |_| Err(ScanError::Protocol("stopped after 10 redirects".into()))).await;
        assert_eq!(tried, vec!["https://a.com"]);
        assert!(matches!(outcome, Err(ScanError::Protocol(_))));
    }

    #[tokio::test]
    async fn https_transport_failure_falls_back_to_http() {
        let (outcome, tried) = resolve_with("[::1]:8080", |url| {
            if url.starts_with("https://") {
                Err(ScanError::Transport("tls handshake".into()))
            } else {
                Ok(answered(url, 200))
            }
        })
        .await;
        assert_eq!(tried, vec!["https://[::1]:8080", "http://[::1]:8080"]);
        assert_eq!(outcome.unwrap().scheme, Scheme::Http);
    }

    #[tokio::test]
    async fn explicit_scheme_gets_a_single_candidate() {
        let (outcome, tried) =
            resolve_with("http://a.com/x", |_| Err(ScanError::Transport("refused".into()))).await;
        assert_eq!(tried, vec!["http://a.com/x"]);
        assert!(matches!(outcome, Err(ScanError::Transport(_))));
    }

    #[tokio::test]
    async fn bare_ipv6_is_requested_with_brackets() {
        let (_, tried) = resolve_with("::1", |_| Err(ScanError::Transport("refused".into()))).await;
        assert_eq!(tried, vec!["https://[::1]", "http://[::1]"]);
    }

    #[tokio::test]
    async fn refused_connections_exhaust_retries() {
        let target = Target::new(format!("127.0.0.1:{}", closed_port()));
        let err = prober(test_config())
            .probe(&target, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ScanError::Transport(_)));
    }

    #[tokio::test]
    async fn cancelled_probe_returns_promptly() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let target = Target::new(format!("127.0.0.1:{}", closed_port()));
        let err = prober(test_config()).probe(&target, &cancel).await.unwrap_err();
        assert!(err.is_cancelled());
    }
}
