// src/core/models.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::net::Ipv6Addr;
use strum::{Display, EnumString};
use url::Url;

use crate::core::phash::PerceptualHash;

// --- Targets ---

/// URL scheme a target was (or will be) reached over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    Https,
    Http,
}

impl Scheme {
    pub fn default_port(self) -> u16 {
        match self {
            Scheme::Https => 443,
            Scheme::Http => 80,
        }
    }
}

/// A single canonical input, as produced by the target normalizer.
///
/// `raw` is the normalized string (domain, address, `host:port` or full URL).
/// When the input already carried a scheme it is kept in `scheme`; otherwise
/// the prober decides between HTTPS and HTTP.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Target {
    pub raw: String,
    pub scheme: Option<Scheme>,
    pub port: Option<u16>,
}

impl Target {
    pub fn new(raw: impl Into<String>) -> Self {
        let raw = raw.into();
        let (scheme, port) = match Url::parse(&raw) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => {
                (url.scheme().parse::<Scheme>().ok(), url.port_or_known_default())
            }
            _ => (None, parse_bare_port(&raw)),
        };
        Self { raw, scheme, port }
    }

    pub fn has_scheme(&self) -> bool {
        self.scheme.is_some()
    }

    /// The URL to request over `scheme` for a scheme-less target. Bare IPv6
    /// literals get the brackets a URL authority needs.
    pub fn url_for(&self, scheme: Scheme) -> String {
        match self.raw.parse::<Ipv6Addr>() {
            Ok(ip) => format!("{scheme}://[{ip}]"),
            Err(_) => format!("{scheme}://{}", self.raw),
        }
    }
}

/// Extracts the port from a scheme-less `host:port` string.
fn parse_bare_port(raw: &str) -> Option<u16> {
    let (host, port) = raw.rsplit_once(':')?;
    // A bare IPv6 address has colons but no port.
    if host.contains(':') && !host.ends_with(']') {
        return None;
    }
    port.split('/').next()?.parse().ok()
}

// --- Per-target pipeline state ---

/// Where a target is in its pipeline. Every target ends in `Done`, whatever
/// happened on the way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, Default)]
pub enum TargetState {
    #[default]
    Queued,
    Probing,
    Probed,
    ProbeFailed,
    Rendering,
    Rendered,
    RenderFailed,
    Analyzing,
    Done,
}

// --- Metadata & results ---

/// What the prober learned about a live target, later enriched by analyzers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Metadata {
    pub title: String,
    pub status_code: u16,
    /// Lower-cased header names; the last value seen for a name wins.
    pub headers: BTreeMap<String, String>,
    pub content_length: u64,
    /// Only set when a probe succeeded.
    pub timestamp: Option<DateTime<Utc>>,
    /// Every URL visited before the final one.
    pub redirects: Vec<String>,
    /// Ordered tags; the same tag may appear from more than one analyzer.
    pub technologies: Vec<String>,
    /// Captured (size-capped) response body, kept for the analyzers only.
    #[serde(skip)]
    pub body: String,
}

impl Metadata {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }
}

/// The complete record for one target, mutated in place by each stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanResult {
    pub target: Target,
    /// Canonical URL once probed, the raw target otherwise.
    pub url: String,
    pub scheme: Option<Scheme>,
    pub port: Option<u16>,
    pub metadata: Metadata,
    pub is_alive: bool,
    /// Empty when no screenshot was taken.
    pub screenshot: String,
    /// Empty when rendering was skipped or hashing failed.
    pub fingerprint: String,
    /// Empty on success.
    pub error: String,
    /// Set by the cluster grouper, once, after the whole batch finished.
    pub group_key: String,
    #[serde(skip)]
    pub state: TargetState,
}

impl ScanResult {
    pub fn new(target: Target) -> Self {
        Self {
            url: target.raw.clone(),
            scheme: target.scheme,
            port: target.port,
            target,
            metadata: Metadata::default(),
            is_alive: false,
            screenshot: String::new(),
            fingerprint: String::new(),
            error: String::new(),
            group_key: String::new(),
            state: TargetState::Queued,
        }
    }

    /// The parsed fingerprint, if rendering produced one.
    pub fn perceptual_hash(&self) -> Option<PerceptualHash> {
        if self.fingerprint.is_empty() {
            return None;
        }
        self.fingerprint.parse().ok()
    }

    pub fn add_tag(&mut self, tag: impl Into<String>) {
        self.metadata.technologies.push(tag.into());
    }
}

// --- Stage outputs ---

/// Successful outcome of the prober.
#[derive(Debug, Clone)]
pub struct ProbeOutcome {
    pub url: String,
    pub scheme: Scheme,
    pub port: u16,
    pub metadata: Metadata,
}

/// Successful outcome of the renderer.
#[derive(Debug, Clone)]
pub struct RenderOutcome {
    pub screenshot_path: String,
    pub fingerprint: Option<PerceptualHash>,
    /// `None` when the page looks static.
    pub framework: Option<String>,
}

// --- Final output handed to the reporter ---

/// Group key (the seed URL) to the ordered member URLs.
pub type Groups = BTreeMap<String, Vec<String>>;

/// The aggregate the core emits once every target reached `Done`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScanOutput {
    pub results: Vec<ScanResult>,
    pub groups: Groups,
}

impl ScanOutput {
    pub fn alive_count(&self) -> usize {
        self.results.iter().filter(|r| r.is_alive).count()
    }

    pub fn rendered_count(&self) -> usize {
        self.results.iter().filter(|r| !r.screenshot.is_empty()).count()
    }

    /// Tag frequencies across the run, most common first.
    pub fn top_technologies(&self, limit: usize) -> Vec<(String, usize)> {
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for result in &self.results {
            for tag in &result.metadata.technologies {
                *counts.entry(tag.as_str()).or_default() += 1;
            }
        }
        let mut ranked: Vec<(String, usize)> =
            counts.into_iter().map(|(tag, n)| (tag.to_string(), n)).collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ranked.truncate(limit);
        ranked
    }
}
