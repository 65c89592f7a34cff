// src/core/analyzer/waf_analyzer.rs

use std::sync::Arc;
use tracing::info;

use super::{Analyzer, ResponseView};
use crate::core::errors::ScanError;
use crate::core::models::ScanResult;
use crate::core::signatures::SignatureStore;

/// Prefix that keeps WAF findings apart from generic technologies.
pub const WAF_TAG_PREFIX: &str = "WAF:";

/// Detects web application firewalls and CDN shields.
pub struct WafAnalyzer {
    signatures: Arc<SignatureStore>,
}

impl WafAnalyzer {
    pub fn new(signatures: Arc<SignatureStore>) -> Self {
        Self { signatures }
    }
}

impl Analyzer for WafAnalyzer {
    fn name(&self) -> &'static str {
        "WAF Detection"
    }

    fn analyze(&self, result: &mut ScanResult) -> Result<(), ScanError> {
        let mut view = ResponseView::new(&result.metadata);
        let detected: Vec<String> = self
            .signatures
            .wafs
            .iter()
            .filter(|signature| view.matches(signature))
            .map(|signature| format!("{WAF_TAG_PREFIX}{}", signature.name))
            .collect();
        drop(view);

        for tag in detected {
            info!(target = %result.url, waf = %tag, "WAF detected.");
            result.add_tag(tag);
        }
        Ok(())
    }
}
