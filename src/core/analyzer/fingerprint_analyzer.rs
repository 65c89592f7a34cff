// src/core/analyzer/fingerprint_analyzer.rs

use std::sync::Arc;
use tracing::debug;

use super::{Analyzer, ResponseView};
use crate::core::errors::ScanError;
use crate::core::models::ScanResult;
use crate::core::signatures::SignatureStore;

/// Headers whose raw values are reported as technologies verbatim.
const RAW_HEADERS: &[&str] = &["server", "x-powered-by"];

/// Attributes web technologies from headers, title, body and meta tags.
pub struct FingerprintAnalyzer {
    signatures: Arc<SignatureStore>,
}

impl FingerprintAnalyzer {
    pub fn new(signatures: Arc<SignatureStore>) -> Self {
        Self { signatures }
    }
}

impl Analyzer for FingerprintAnalyzer {
    fn name(&self) -> &'static str {
        "Technology Fingerprinting"
    }

    fn analyze(&self, result: &mut ScanResult) -> Result<(), ScanError> {
        let mut found: Vec<String> = Vec::new();

        for header in RAW_HEADERS {
            if let Some(value) = result.metadata.header(header) {
                let value = value.trim();
                if !value.is_empty() && !found.iter().any(|t| t == value) {
                    found.push(value.to_string());
                }
            }
        }

        let mut view = ResponseView::new(&result.metadata);
        for signature in &self.signatures.fingerprints {
            if view.matches(signature) && !found.contains(&signature.name) {
                debug!(tech = %signature.name, "Fingerprint matched.");
                found.push(signature.name.clone());
            }
        }
        drop(view);

        debug!(target = %result.url, count = found.len(), "Fingerprinting finished.");
        result.metadata.technologies.extend(found);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::Target;
    use crate::core::signatures::{MatchRule, Signature};

    fn result_with(title: &str, headers: &[(&str, &str)], body: &str) -> ScanResult {
        let mut result = ScanResult::new(Target::new("https://example.com"));
        result.metadata.title = title.into();
        result.metadata.body = body.into();
        for (k, v) in headers {
            result.metadata.headers.insert(k.to_string(), v.to_string());
        }
        result
    }

    #[test]
    fn detects_title_signature_and_raw_server_header() {
        let analyzer = FingerprintAnalyzer::new(Arc::new(SignatureStore::builtin()));
        let mut result = result_with("WordPress Website", &[("server", "nginx")], "");

        analyzer.analyze(&mut result).unwrap();

        let tags = &result.metadata.technologies;
        assert!(tags.contains(&"WordPress".to_string()));
        assert!(tags.contains(&"nginx".to_string()));
        assert!(tags.contains(&"Nginx".to_string()), "server signature also matches");
    }

    #[test]
    fn raw_powered_by_is_reported_verbatim() {
        let analyzer = FingerprintAnalyzer::new(Arc::new(SignatureStore::default()));
        let mut result = result_with("", &[("x-powered-by", "PHP/8.2.1")], "");

        analyzer.analyze(&mut result).unwrap();

        assert_eq!(result.metadata.technologies, vec!["PHP/8.2.1"]);
    }

    #[test]
    fn one_tag_per_signature_even_when_several_rules_match() {
        let store = SignatureStore::new(
            vec![Signature {
                name: "Next.js".into(),
                rules: vec![
                    MatchRule::Header { key: "x-powered-by".into(), value: "next.js".into() },
                    MatchRule::Body("/_next/static/".into()),
                ],
            }],
            Vec::new(),
            Vec::new(),
        );
        let analyzer = FingerprintAnalyzer::new(Arc::new(store));
        let mut result = result_with(
            "",
            &[("x-powered-by", "Next.js")],
            r#"<script src="/_next/static/chunks/main.js"></script>"#,
        );

        analyzer.analyze(&mut result).unwrap();

        assert_eq!(result.metadata.technologies, vec!["Next.js"]);
    }

    #[test]
    fn body_matching_is_case_insensitive() {
        let analyzer = FingerprintAnalyzer::new(Arc::new(SignatureStore::builtin()));
        let mut result = result_with("", &[], "<link href='/WP-CONTENT/themes/x/style.css'>");

        analyzer.analyze(&mut result).unwrap();

        assert_eq!(result.metadata.technologies, vec!["WordPress"]);
    }
}
