// src/core/config.rs

use lazy_static::lazy_static;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

use crate::core::errors::ScanError;
use crate::core::scanner::retry::RetryPolicy;

lazy_static! {
    /// Prefix for every environment override, e.g. `NETVISTA_RS_CONCURRENCY`.
    pub static ref ENV_PREFIX: String = env!("CARGO_CRATE_NAME").to_uppercase();
}

/// Immutable settings for one run, shared by reference with every component.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Worker pool size; bounds concurrent probes.
    pub concurrency: usize,
    /// Independent bound on simultaneously open browsing contexts.
    pub max_browser_contexts: usize,
    /// Per-request timeout, also the upper bound of one render.
    pub timeout: Duration,
    pub proxy: Option<String>,
    /// Custom request headers, sent in order.
    pub headers: Vec<(String, String)>,
    pub output_path: PathBuf,
    pub max_redirects: usize,
    /// Fingerprints closer than this many bits share a group.
    pub similarity_threshold: u32,
    pub screenshots: bool,
    /// How long the network must stay quiet before a capture.
    pub settle_window: Duration,
    pub probe_retry: RetryPolicy,
    pub render_retry: RetryPolicy,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            concurrency: 20,
            max_browser_contexts: 10,
            timeout: Duration::from_secs(10),
            proxy: None,
            headers: Vec::new(),
            output_path: PathBuf::from("reports"),
            max_redirects: 10,
            similarity_threshold: 12,
            screenshots: true,
            settle_window: Duration::from_millis(500),
            probe_retry: RetryPolicy::linear(3, Duration::from_secs(1)),
            render_retry: RetryPolicy::fixed(2, Duration::from_secs(2)),
        }
    }
}

impl RunConfig {
    /// Defaults overlaid with `NETVISTA_RS_*` environment variables.
    pub fn from_env() -> Result<Self, ScanError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`RunConfig::from_env`], reading values through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ScanError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| {
            lookup(&format!("{}_{}", ENV_PREFIX.as_str(), name))
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let mut config = Self::default();

        if let Some(v) = var("CONCURRENCY") {
            config.concurrency = parse_number("CONCURRENCY", &v)?;
        }
        if let Some(v) = var("MAX_BROWSER_CONTEXTS") {
            config.max_browser_contexts = parse_number("MAX_BROWSER_CONTEXTS", &v)?;
        }
        if let Some(v) = var("TIMEOUT_SECS") {
            config.timeout = Duration::from_secs(parse_number("TIMEOUT_SECS", &v)?);
        }
        if let Some(v) = var("PROXY") {
            config.proxy = Some(v);
        }
        if let Some(v) = var("HEADERS") {
            config.headers = parse_headers(&v);
        }
        if let Some(v) = var("OUTPUT") {
            config.output_path = PathBuf::from(v);
        }
        if let Some(v) = var("MAX_REDIRECTS") {
            config.max_redirects = parse_number("MAX_REDIRECTS", &v)?;
        }
        if let Some(v) = var("THRESHOLD") {
            config.similarity_threshold = parse_number("THRESHOLD", &v)?;
        }
        if var("NO_SCREENSHOTS").is_some() {
            config.screenshots = false;
        }

        config.validate()?;
        Ok(config)
    }

    /// Rejects settings that would make the run meaningless.
    pub fn validate(&self) -> Result<(), ScanError> {
        if self.timeout.is_zero() {
            return Err(ScanError::Config("timeout must be greater than zero".into()));
        }
        if self.concurrency == 0 {
            return Err(ScanError::Config("concurrency must be at least 1".into()));
        }
        if self.max_browser_contexts == 0 {
            return Err(ScanError::Config("max_browser_contexts must be at least 1".into()));
        }
        if let Some(proxy) = &self.proxy {
            url::Url::parse(proxy)
                .map_err(|e| ScanError::Config(format!("invalid proxy '{proxy}': {e}")))?;
        }
        Ok(())
    }

    pub fn screenshot_dir(&self) -> PathBuf {
        self.output_path.join("screenshots")
    }
}

fn parse_number<T: FromStr>(name: &str, value: &str) -> Result<T, ScanError> {
    value
        .parse()
        .map_err(|_| ScanError::Config(format!("{name}: '{value}' is not a valid number")))
}

/// Parses `"Key: Value, Other: Value"` into ordered pairs, skipping junk.
pub fn parse_headers(raw: &str) -> Vec<(String, String)> {
    raw.split(',')
        .filter_map(|part| {
            let Some((key, value)) = part.split_once(':') else {
                if !part.trim().is_empty() {
                    warn!(header = %part.trim(), "Ignoring header without ':' separator.");
                }
                return None;
            };
            let key = key.trim();
            if key.is_empty() {
                return None;
            }
            Some((key.to_string(), value.trim().to_string()))
        })
        .collect()
}
