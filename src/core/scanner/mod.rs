// src/core/scanner/mod.rs

// The scan orchestrator. Every target walks the same pipeline,
// probe -> render -> analyze, on a bounded pool of worker tasks; the
// finished batch is then handed to the cluster grouper.
pub mod http_prober;
pub mod renderer;
pub mod retry;

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::core::analyzer::AnalyzerChain;
use crate::core::cluster::group_results;
use crate::core::config::RunConfig;
use crate::core::errors::ScanError;
use crate::core::models::{ProbeOutcome, RenderOutcome, ScanOutput, ScanResult, Target, TargetState};

/// Establishes liveness of a target and resolves its canonical URL.
#[async_trait::async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, target: &Target, cancel: &CancellationToken) -> Result<ProbeOutcome, ScanError>;
}

/// Captures a resolved URL in a browsing engine.
///
/// The caller holds a browsing-context permit for the duration of `render`,
/// so implementations release their context before returning, cancelled or
/// not.
#[async_trait::async_trait]
pub trait Renderer: Send + Sync {
    async fn render(&self, url: &str, cancel: &CancellationToken) -> Result<RenderOutcome, ScanError>;
}

/// Drives a batch of targets through the pipeline.
pub struct Scanner {
    prober: Arc<dyn Prober>,
    renderer: Option<Arc<dyn Renderer>>,
    analyzers: Arc<AnalyzerChain>,
    config: Arc<RunConfig>,
    progress: Arc<AtomicUsize>,
}

impl Scanner {
    pub fn new(config: Arc<RunConfig>, prober: Arc<dyn Prober>, analyzers: Arc<AnalyzerChain>) -> Self {
        Self {
            prober,
            renderer: None,
            analyzers,
            config,
            progress: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Enables the render stage. Without a renderer every result keeps an
    /// empty screenshot and fingerprint.
    pub fn with_renderer(mut self, renderer: Arc<dyn Renderer>) -> Self {
        self.renderer = Some(renderer);
        self
    }

    /// Shares a counter of targets that left the pipeline, for progress
    /// display. It is reset when a run starts.
    pub fn with_progress(mut self, progress: Arc<AtomicUsize>) -> Self {
        self.progress = progress;
        self
    }

    /// Runs the whole batch and returns the grouped results.
    ///
    /// Only startup problems fail the run. Per-target failures end up in the
    /// target's own `error` field. After `cancel` fires, in-flight targets are
    /// finalized with the cancellation recorded and queued ones are dropped.
    ///
    /// # Arguments
    /// * `targets` - Normalized targets, in input order.
    /// * `cancel` - Stops dequeuing and aborts in-flight stages.
    ///
    /// # Returns
    /// A `ScanOutput` whose results follow input order, one per processed
    /// distinct canonical URL, plus the visual groups. `ScanError::Config` or
    /// `ScanError::NoTargets` when the run cannot start.
    pub async fn run(&self, targets: Vec<Target>, cancel: CancellationToken) -> Result<ScanOutput, ScanError> {
        self.config.validate()?;
        if targets.is_empty() {
            return Err(ScanError::NoTargets);
        }

        let total = targets.len();
        let workers = self.config.concurrency.min(total);
        info!(
            targets = total,
            workers,
            browser_contexts = self.config.max_browser_contexts,
            render = self.renderer.is_some(),
            "Starting scan."
        );
        self.progress.store(0, Ordering::Relaxed);

        let pipeline = Pipeline {
            prober: Arc::clone(&self.prober),
            renderer: self.renderer.clone(),
            analyzers: Arc::clone(&self.analyzers),
            config: Arc::clone(&self.config),
            contexts: Arc::new(Semaphore::new(self.config.max_browser_contexts)),
            claimed: Arc::new(Mutex::new(HashSet::new())),
            cancel,
        };
        let queue: Arc<Mutex<VecDeque<(usize, Target)>>> =
            Arc::new(Mutex::new(targets.into_iter().enumerate().collect()));
        let collected: Arc<Mutex<Vec<(usize, ScanResult)>>> = Arc::new(Mutex::new(Vec::with_capacity(total)));

        let mut set = JoinSet::new();
        for worker_id in 0..workers {
            let pipeline = pipeline.clone();
            let queue = Arc::clone(&queue);
            let collected = Arc::clone(&collected);
            let progress = Arc::clone(&self.progress);

            set.spawn(async move {
                loop {
                    if pipeline.cancel.is_cancelled() {
                        break;
                    }
                    let next = queue.lock().await.pop_front();
                    let Some((index, target)) = next else {
                        break;
                    };
                    if let Some(result) = pipeline.process(target).await {
                        collected.lock().await.push((index, result));
                    }
                    progress.fetch_add(1, Ordering::Relaxed);
                }
                debug!(worker_id, "Worker finished.");
            });
        }

        // Clustering needs the complete batch.
        while let Some(joined) = set.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Worker task failed.");
            }
        }

        let mut collected = std::mem::take(&mut *collected.lock().await);
        collected.sort_by_key(|(index, _)| *index);
        let mut results: Vec<ScanResult> = collected.into_iter().map(|(_, result)| result).collect();

        let groups = group_results(&mut results, self.config.similarity_threshold);
        let output = ScanOutput { results, groups };
        info!(
            results = output.results.len(),
            alive = output.alive_count(),
            rendered = output.rendered_count(),
            groups = output.groups.len(),
            cancelled = pipeline.cancel.is_cancelled(),
            "Scan finished."
        );
        Ok(output)
    }
}

/// Per-run state shared by every worker.
#[derive(Clone)]
struct Pipeline {
    prober: Arc<dyn Prober>,
    renderer: Option<Arc<dyn Renderer>>,
    analyzers: Arc<AnalyzerChain>,
    config: Arc<RunConfig>,
    /// Bounds open browsing contexts independently of the worker count.
    contexts: Arc<Semaphore>,
    /// Canonical URLs already owned by a result.
    claimed: Arc<Mutex<HashSet<String>>>,
    cancel: CancellationToken,
}

impl Pipeline {
    /// One target, start to finish. `None` when the target turned out to be
    /// a duplicate of an already claimed canonical URL.
    async fn process(&self, target: Target) -> Option<ScanResult> {
        let mut result = ScanResult::new(target);

        advance(&mut result, TargetState::Probing);
        match self.prober.probe(&result.target, &self.cancel).await {
            Ok(outcome) => {
                if !self.claimed.lock().await.insert(outcome.url.clone()) {
                    info!(target = %result.target.raw, url = %outcome.url, "Duplicate canonical URL, discarding.");
                    return None;
                }
                result.url = outcome.url;
                result.scheme = Some(outcome.scheme);
                result.port = Some(outcome.port);
                result.metadata = outcome.metadata;
                result.is_alive = true;
                advance(&mut result, TargetState::Probed);
            }
            Err(e) => {
                warn!(target = %result.target.raw, error = %e, "Probe failed.");
                result.error = format!("probe failed: {e}");
                advance(&mut result, TargetState::ProbeFailed);
                advance(&mut result, TargetState::Done);
                return Some(result);
            }
        }

        if let Some(renderer) = &self.renderer {
            advance(&mut result, TargetState::Rendering);
            match self.render(renderer.as_ref(), &result.url).await {
                Ok(outcome) => {
                    result.screenshot = outcome.screenshot_path;
                    if let Some(hash) = outcome.fingerprint {
                        result.fingerprint = hash.to_string();
                    }
                    if let Some(framework) = outcome.framework {
                        result.add_tag(framework);
                    }
                    advance(&mut result, TargetState::Rendered);
                }
                Err(e) => {
                    warn!(target = %result.url, error = %e, "Render failed, continuing with probe data.");
                    if e.is_cancelled() {
                        result.error = e.to_string();
                    }
                    advance(&mut result, TargetState::RenderFailed);
                }
            }
        }

        advance(&mut result, TargetState::Analyzing);
        let failures = self.analyzers.run(&mut result);
        if !failures.is_empty() {
            debug!(target = %result.url, failures = failures.len(), "Some analyzers failed.");
        }
        advance(&mut result, TargetState::Done);
        Some(result)
    }

    /// Renders with the stage retry policy. A browsing context is held only
    /// for the duration of one attempt.
    async fn render(&self, renderer: &dyn Renderer, url: &str) -> Result<RenderOutcome, ScanError> {
        let contexts = self.contexts.as_ref();
        let cancel = &self.cancel;
        self.config
            .render_retry
            .run("render", url, cancel, |_| async move {
                let _permit = tokio::select! {
                    _ = cancel.cancelled() => return Err(ScanError::Cancelled),
                    permit = contexts.acquire() => permit
                        .map_err(|_| ScanError::Render("browser context pool closed".into()))?,
                };
                renderer.render(url, cancel).await
            })
            .await
    }
}

fn advance(result: &mut ScanResult, next: TargetState) {
    debug!(target = %result.target.raw, from = %result.state, to = %next, "State change.");
    result.state = next;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::analyzer::Analyzer;
    use crate::core::models::{Metadata, Scheme};
    use crate::core::phash::PerceptualHash;
    use crate::core::scanner::retry::RetryPolicy;
    use chrono::Utc;
    use std::collections::HashMap;
    use std::time::Duration;

    /// Resolves the targets it knows, fails every other one.
    struct ScriptedProber {
        alive: HashMap<String, String>,
    }

    impl ScriptedProber {
        fn new(pairs: &[(&str, &str)]) -> Self {
            Self { alive: pairs.iter().map(|(raw, url)| (raw.to_string(), url.to_string())).collect() }
        }
    }

    #[async_trait::async_trait]
    impl Prober for ScriptedProber {
        async fn probe(&self, target: &Target, _cancel: &CancellationToken) -> Result<ProbeOutcome, ScanError> {
            let url = self
                .alive
                .get(&target.raw)
                .ok_or_else(|| ScanError::Transport("connection refused".into()))?;
            let mut metadata = Metadata {
                title: "Welcome".into(),
                status_code: 200,
                timestamp: Some(Utc::now()),
                ..Metadata::default()
            };
            metadata.headers.insert("server".into(), "nginx".into());
            Ok(ProbeOutcome { url: url.clone(), scheme: Scheme::Https, port: 443, metadata })
        }
    }

    /// Waits for cancellation, whatever the target.
    struct HangingProber;

    #[async_trait::async_trait]
    impl Prober for HangingProber {
        async fn probe(&self, _target: &Target, cancel: &CancellationToken) -> Result<ProbeOutcome, ScanError> {
            cancel.cancelled().await;
            Err(ScanError::Cancelled)
        }
    }

    #[derive(Default)]
    struct MockRenderer {
        hashes: HashMap<String, u64>,
        frameworks: HashMap<String, String>,
        /// Every attempt for these URLs fails.
        broken: HashSet<String>,
        /// The first attempt for these URLs fails.
        flaky: HashSet<String>,
        delay: Duration,
        calls: std::sync::Mutex<HashMap<String, u32>>,
        active: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl Renderer for MockRenderer {
        async fn render(&self, url: &str, _cancel: &CancellationToken) -> Result<RenderOutcome, ScanError> {
            let attempt = {
                let mut calls = self.calls.lock().unwrap();
                let n = calls.entry(url.to_string()).or_default();
                *n += 1;
                *n
            };
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.active.fetch_sub(1, Ordering::SeqCst);

            if self.broken.contains(url) || (attempt == 1 && self.flaky.contains(url)) {
                return Err(ScanError::Render("page crashed".into()));
            }
            Ok(RenderOutcome {
                screenshot_path: format!("reports/screenshots/{}.png", renderer::sanitize_filename(url)),
                fingerprint: self.hashes.get(url).copied().map(PerceptualHash::from_bits),
                framework: self.frameworks.get(url).cloned(),
            })
        }
    }

    struct Marker;

    impl Analyzer for Marker {
        fn name(&self) -> &'static str {
            "marker"
        }

        fn analyze(&self, result: &mut ScanResult) -> Result<(), ScanError> {
            result.add_tag("analyzed");
            Ok(())
        }
    }

    fn config() -> RunConfig {
        RunConfig {
            concurrency: 4,
            max_browser_contexts: 2,
            render_retry: RetryPolicy::fixed(2, Duration::from_millis(1)),
            ..RunConfig::default()
        }
    }

    fn scanner(config: RunConfig, prober: impl Prober + 'static) -> Scanner {
        let analyzers = AnalyzerChain::empty().register(Marker);
        Scanner::new(Arc::new(config), Arc::new(prober), Arc::new(analyzers))
    }

    fn targets(raw: &[&str]) -> Vec<Target> {
        raw.iter().map(|r| Target::new(*r)).collect()
    }

    fn find<'a>(output: &'a ScanOutput, raw: &str) -> &'a ScanResult {
        output.results.iter().find(|r| r.target.raw == raw).unwrap()
    }

    #[tokio::test]
    async fn empty_batch_is_a_startup_error() {
        let err = scanner(config(), ScriptedProber::new(&[]))
            .run(Vec::new(), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ScanError::NoTargets));
    }

    #[tokio::test]
    async fn invalid_config_is_a_startup_error() {
        let config = RunConfig { timeout: Duration::ZERO, ..config() };
        let err = scanner(config, ScriptedProber::new(&[]))
            .run(targets(&["a.com"]), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ScanError::Config(_)));
    }

    #[tokio::test]
    async fn failed_probe_skips_render_and_analysis() {
        let renderer = Arc::new(MockRenderer::default());
        let scanner = scanner(config(), ScriptedProber::new(&[("up.com", "https://up.com/")]))
            .with_renderer(renderer.clone());

        let output = scanner.run(targets(&["up.com", "down.com"]), CancellationToken::new()).await.unwrap();

        let down = find(&output, "down.com");
        assert!(!down.is_alive);
        assert!(down.error.starts_with("probe failed"));
        assert!(down.screenshot.is_empty());
        assert!(down.metadata.technologies.is_empty());
        assert_eq!(down.state, TargetState::Done);
        assert!(!renderer.calls.lock().unwrap().contains_key("down.com"));

        let up = find(&output, "up.com");
        assert!(up.is_alive);
        assert_eq!(up.url, "https://up.com/");
        assert_eq!(up.metadata.technologies, vec!["analyzed"]);
    }

    #[tokio::test]
    async fn failed_render_still_runs_analysis() {
        let renderer = MockRenderer {
            broken: ["https://a.com/".to_string()].into(),
            ..MockRenderer::default()
        };
        let renderer = Arc::new(renderer);
        let scanner = scanner(config(), ScriptedProber::new(&[("a.com", "https://a.com/")]))
            .with_renderer(renderer.clone());

        let output = scanner.run(targets(&["a.com"]), CancellationToken::new()).await.unwrap();
        let result = &output.results[0];

        assert!(result.is_alive);
        assert!(result.screenshot.is_empty());
        assert!(result.fingerprint.is_empty());
        assert!(result.error.is_empty());
        assert_eq!(result.metadata.title, "Welcome");
        assert_eq!(result.metadata.technologies, vec!["analyzed"]);
        assert_eq!(renderer.calls.lock().unwrap()["https://a.com/"], 2);
    }

    #[tokio::test]
    async fn flaky_render_succeeds_on_retry() {
        let renderer = MockRenderer {
            flaky: ["https://a.com/".to_string()].into(),
            hashes: [("https://a.com/".to_string(), 0xabc)].into(),
            ..MockRenderer::default()
        };
        let scanner = scanner(config(), ScriptedProber::new(&[("a.com", "https://a.com/")]))
            .with_renderer(Arc::new(renderer));

        let output = scanner.run(targets(&["a.com"]), CancellationToken::new()).await.unwrap();
        let result = &output.results[0];
        assert_eq!(result.screenshot, "reports/screenshots/a_com.png");
        assert_eq!(result.fingerprint, "p:0000000000000abc");
    }

    #[tokio::test]
    async fn framework_tag_comes_before_analyzer_tags() {
        let renderer = MockRenderer {
            frameworks: [("https://spa.io/".to_string(), "React".to_string())].into(),
            ..MockRenderer::default()
        };
        let scanner = scanner(
            config(),
            ScriptedProber::new(&[("spa.io", "https://spa.io/"), ("plain.io", "https://plain.io/")]),
        )
        .with_renderer(Arc::new(renderer));

        let output = scanner.run(targets(&["spa.io", "plain.io"]), CancellationToken::new()).await.unwrap();
        assert_eq!(find(&output, "spa.io").metadata.technologies, vec!["React", "analyzed"]);
        assert_eq!(find(&output, "plain.io").metadata.technologies, vec!["analyzed"]);
    }

    #[tokio::test]
    async fn one_result_per_canonical_url() {
        let prober = ScriptedProber::new(&[("a.com", "https://a.com/"), ("https://a.com", "https://a.com/")]);
        let output = scanner(config(), prober)
            .run(targets(&["a.com", "https://a.com"]), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(output.results.len(), 1);
        assert_eq!(output.results[0].url, "https://a.com/");
    }

    #[tokio::test]
    async fn similar_renders_share_a_group() {
        let renderer = MockRenderer {
            hashes: [
                ("https://a.com/".to_string(), 0),
                ("https://b.com/".to_string(), 0b111),
                ("https://c.com/".to_string(), u64::MAX),
            ]
            .into(),
            ..MockRenderer::default()
        };
        let prober = ScriptedProber::new(&[
            ("a.com", "https://a.com/"),
            ("b.com", "https://b.com/"),
            ("c.com", "https://c.com/"),
        ]);
        let scanner = scanner(config(), prober).with_renderer(Arc::new(renderer));

        let output = scanner.run(targets(&["a.com", "b.com", "c.com"]), CancellationToken::new()).await.unwrap();

        assert_eq!(output.groups.len(), 2);
        assert_eq!(output.groups["https://a.com/"], vec!["https://a.com/", "https://b.com/"]);
        assert_eq!(find(&output, "b.com").group_key, "https://a.com/");
        assert_eq!(find(&output, "c.com").group_key, "https://c.com/");
    }

    #[tokio::test]
    async fn browser_contexts_are_bounded_separately() {
        let raw: Vec<String> = (0..8).map(|i| format!("h{i}.com")).collect();
        let pairs: Vec<(String, String)> = raw.iter().map(|r| (r.clone(), format!("https://{r}/"))).collect();
        let pair_refs: Vec<(&str, &str)> = pairs.iter().map(|(a, b)| (a.as_str(), b.as_str())).collect();

        let renderer = Arc::new(MockRenderer { delay: Duration::from_millis(20), ..MockRenderer::default() });
        let config = RunConfig { concurrency: 8, max_browser_contexts: 2, ..config() };
        let progress = Arc::new(AtomicUsize::new(0));
        let scanner = scanner(config, ScriptedProber::new(&pair_refs))
            .with_renderer(renderer.clone())
            .with_progress(Arc::clone(&progress));

        let raw_refs: Vec<&str> = raw.iter().map(String::as_str).collect();
        let output = scanner.run(targets(&raw_refs), CancellationToken::new()).await.unwrap();

        assert_eq!(output.rendered_count(), 8);
        assert!(renderer.peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(progress.load(Ordering::Relaxed), 8);
    }

    #[tokio::test]
    async fn results_follow_input_order() {
        let prober = ScriptedProber::new(&[("c.com", "https://c.com/"), ("a.com", "https://a.com/")]);
        let output = scanner(config(), prober)
            .run(targets(&["c.com", "b.com", "a.com"]), CancellationToken::new())
            .await
            .unwrap();
        let order: Vec<&str> = output.results.iter().map(|r| r.target.raw.as_str()).collect();
        assert_eq!(order, vec!["c.com", "b.com", "a.com"]);
    }

    #[tokio::test]
    async fn cancellation_finalizes_in_flight_targets_only() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let config = RunConfig { concurrency: 2, ..config() };
        let scanner = scanner(config, HangingProber);
        let run = scanner.run(targets(&["a", "b", "c", "d", "e"]), cancel);
        let output = tokio::time::timeout(Duration::from_secs(5), run).await.unwrap().unwrap();

        assert_eq!(output.results.len(), 2);
        for result in &output.results {
            assert!(!result.is_alive);
            assert!(result.error.contains("cancelled"));
            assert_eq!(result.state, TargetState::Done);
        }
    }
}
