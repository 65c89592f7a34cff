// src/core/analyzer/mod.rs

// The analyzer chain: signature-based enrichers run against every finished
// probe, in a fixed order, each appending tags to the same result.
pub mod fingerprint_analyzer;
pub mod takeover_analyzer;
pub mod waf_analyzer;

use scraper::{Html, Selector};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::core::errors::ScanError;
use crate::core::models::{Metadata, ScanResult};
use crate::core::signatures::{MatchRule, Signature, SignatureStore};

use self::fingerprint_analyzer::FingerprintAnalyzer;
use self::takeover_analyzer::TakeoverAnalyzer;
use self::waf_analyzer::WafAnalyzer;

/// A single enrichment step over a mutable result.
pub trait Analyzer: Send + Sync {
    fn name(&self) -> &'static str;

    fn analyze(&self, result: &mut ScanResult) -> Result<(), ScanError>;
}

/// Analyzers in registration order.
pub struct AnalyzerChain {
    analyzers: Vec<Box<dyn Analyzer>>,
}

impl AnalyzerChain {
    pub fn empty() -> Self {
        Self { analyzers: Vec::new() }
    }

    /// Fingerprint, then WAF, then takeover detection.
    pub fn standard(signatures: Arc<SignatureStore>) -> Self {
        Self::empty()
            .register(FingerprintAnalyzer::new(Arc::clone(&signatures)))
            .register(WafAnalyzer::new(Arc::clone(&signatures)))
            .register(TakeoverAnalyzer::new(signatures))
    }

    pub fn register(mut self, analyzer: impl Analyzer + 'static) -> Self {
        self.analyzers.push(Box::new(analyzer));
        self
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.analyzers.iter().map(|a| a.name()).collect()
    }

    /// Runs every analyzer. Failures are logged and returned for the record,
    /// but never stop the remaining analyzers.
    pub fn run(&self, result: &mut ScanResult) -> Vec<ScanError> {
        let mut failures = Vec::new();
        for analyzer in &self.analyzers {
            match analyzer.analyze(result) {
                Ok(()) => debug!(analyzer = analyzer.name(), target = %result.url, "Analyzer finished."),
                Err(e) => {
                    warn!(analyzer = analyzer.name(), target = %result.url, error = %e, "Analyzer failed, skipping.");
                    failures.push(e);
                }
            }
        }
        failures
    }
}

/// Lazily parsed view of a response used to evaluate match rules.
pub(crate) struct ResponseView<'a> {
    metadata: &'a Metadata,
    body_lower: String,
    title_lower: String,
    document: Option<Html>,
}

impl<'a> ResponseView<'a> {
    pub(crate) fn new(metadata: &'a Metadata) -> Self {
        Self {
            metadata,
            body_lower: metadata.body.to_lowercase(),
            title_lower: metadata.title.to_lowercase(),
            document: None,
        }
    }

    /// Whether any rule of `signature` matches. Stops at the first hit.
    pub(crate) fn matches(&mut self, signature: &Signature) -> bool {
        signature.rules.iter().any(|rule| self.matches_rule(rule))
    }

    fn matches_rule(&mut self, rule: &MatchRule) -> bool {
        match rule {
            MatchRule::Header { key, value } => self
                .metadata
                .header(key)
                .is_some_and(|v| value.is_empty() || v.to_lowercase().contains(&value.to_lowercase())),
            MatchRule::Title(needle) => {
                !needle.is_empty() && self.title_lower.contains(&needle.to_lowercase())
            }
            MatchRule::Body(needle) => {
                !needle.is_empty() && self.body_lower.contains(&needle.to_lowercase())
            }
            MatchRule::Meta { name, value } => self.meta_contents(name).iter().any(|content| {
                content.to_lowercase().contains(&value.to_lowercase())
            }),
        }
    }

    fn meta_contents(&mut self, name: &str) -> Vec<String> {
        let metadata = self.metadata;
        let document = self
            .document
            .get_or_insert_with(|| Html::parse_document(&metadata.body));
        // `og:*` tags use `property`, everything else `name`.
        let selector = format!("meta[name='{name}'], meta[property='{name}']");
        let Ok(selector) = Selector::parse(&selector) else {
            return Vec::new();
        };
        document
            .select(&selector)
            .filter_map(|el| el.value().attr("content"))
            .map(str::to_string)
            .collect()
    }
}
