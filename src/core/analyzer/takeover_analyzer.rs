// src/core/analyzer/takeover_analyzer.rs

use std::sync::Arc;
use tracing::warn;

use super::{Analyzer, ResponseView};
use crate::core::errors::ScanError;
use crate::core::models::ScanResult;
use crate::core::signatures::SignatureStore;

/// Prefix marking a finding as a vulnerability rather than a technology.
pub const TAKEOVER_TAG_PREFIX: &str = "VULN:Takeover:";

/// Flags responses that look like an unclaimed third-party service, the
/// classic precondition for a subdomain takeover.
pub struct TakeoverAnalyzer {
    signatures: Arc<SignatureStore>,
}

impl TakeoverAnalyzer {
    pub fn new(signatures: Arc<SignatureStore>) -> Self {
        Self { signatures }
    }
}

impl Analyzer for TakeoverAnalyzer {
    fn name(&self) -> &'static str {
        "Subdomain Takeover Detection"
    }

    fn analyze(&self, result: &mut ScanResult) -> Result<(), ScanError> {
        if result.metadata.body.is_empty() {
            return Ok(());
        }

        let mut view = ResponseView::new(&result.metadata);
        let services: Vec<String> = self
            .signatures
            .takeovers
            .iter()
            .filter(|signature| view.matches(signature))
            .map(|signature| signature.name.clone())
            .collect();
        drop(view);

        for service in services {
            warn!(target = %result.url, %service, "Possible subdomain takeover.");
            result.add_tag(format!("{TAKEOVER_TAG_PREFIX}{service}"));
        }
        Ok(())
    }
}
