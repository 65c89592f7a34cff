// src/core/scanner/renderer.rs

use headless_chrome::protocol::cdp::Network;
use headless_chrome::protocol::cdp::Page::CaptureScreenshotFormatOption;
use headless_chrome::protocol::cdp::Target::DisposeBrowserContext;
use headless_chrome::protocol::cdp::types::Event;
use headless_chrome::{Browser, LaunchOptions, Tab};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::Renderer;
use crate::core::config::RunConfig;
use crate::core::errors::ScanError;
use crate::core::models::RenderOutcome;
use crate::core::phash::PerceptualHash;

const VIEWPORT: (u32, u32) = (1280, 800);
const POLL_INTERVAL: Duration = Duration::from_millis(100);
/// The browser shuts itself down after this much inactivity.
const IDLE_BROWSER_TIMEOUT: Duration = Duration::from_secs(600);

/// True once the navigated document (not the initial blank page) has loaded.
const DOCUMENT_LOADED_JS: &str =
    "location.href !== 'about:blank' && document.readyState === 'complete'";

const FRAMEWORK_JS: &str = r#"(() => {
    if (window.__NEXT_DATA__ || document.getElementById('__next')) return 'Next.js';
    if (window.__NUXT__ || document.getElementById('__nuxt')) return 'Nuxt.js';
    if (window.ng || document.querySelector('[ng-version]')) return 'Angular';
    if (window.Svelte || document.querySelector('[class*="svelte-"]')) return 'Svelte';
    if (document.getElementById('___gatsby')) return 'Gatsby';
    if (window.React || document.querySelector('[data-reactroot]')) return 'React';
    if (window.Vue || document.querySelector('[data-v-app]')) return 'Vue.js';
    if (window.jQuery) return 'jQuery';
    return 'Static';
})()"#;

static RE_UNSAFE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-zA-Z0-9]+").unwrap());

/// Screenshot capture over one shared headless Chromium.
///
/// Every render gets its own incognito browser context, disposed as soon as
/// the capture is done, so targets never share cookies or storage.
pub struct ChromeRenderer {
    browser: Browser,
    screenshot_dir: PathBuf,
    timeout: Duration,
    settle_window: Duration,
}

impl ChromeRenderer {
    /// Starts the shared headless browser.
    ///
    /// # Arguments
    /// * `config` - Run configuration. The output path, proxy, timeout and
    ///   settle window are read from it.
    ///
    /// # Returns
    /// A renderer writing into `<output>/screenshots`, or
    /// `ScanError::BrowserInit` when Chromium cannot be started. That is a
    /// startup error for the whole run.
    pub fn launch(config: &RunConfig) -> Result<Self, ScanError> {
        let screenshot_dir = config.screenshot_dir();
        std::fs::create_dir_all(&screenshot_dir)?;

        let options = LaunchOptions::default_builder()
            .headless(true)
            .window_size(Some(VIEWPORT))
            .proxy_server(config.proxy.as_deref())
            .idle_browser_timeout(IDLE_BROWSER_TIMEOUT)
            .build()
            .map_err(|e| ScanError::BrowserInit(e.to_string()))?;
        let browser = Browser::new(options).map_err(|e| ScanError::BrowserInit(e.to_string()))?;

        info!(dir = %screenshot_dir.display(), "Browser launched.");
        Ok(Self {
            browser,
            screenshot_dir,
            timeout: config.timeout,
            settle_window: config.settle_window,
        })
    }
}

#[async_trait::async_trait]
impl Renderer for ChromeRenderer {
    async fn render(&self, url: &str, cancel: &CancellationToken) -> Result<RenderOutcome, ScanError> {
        let job = CaptureJob {
            browser: self.browser.clone(),
            url: url.to_string(),
            timeout: self.timeout,
            settle_window: self.settle_window,
            cancel: cancel.clone(),
        };
        let handle = tokio::task::spawn_blocking(move || job.run());
        let (png, framework) = join_capture(handle, cancel).await?;

        let path = self.screenshot_dir.join(format!("{}.png", sanitize_filename(url)));
        tokio::fs::write(&path, &png).await?;

        // A capture that cannot be hashed is still a capture.
        let fingerprint = match PerceptualHash::from_image_bytes(&png) {
            Ok(hash) => Some(hash),
            Err(e) => {
                warn!(target = %url, error = %e, "Could not fingerprint screenshot.");
                None
            }
        };

        debug!(target = %url, path = %path.display(), ?framework, "Render finished.");
        Ok(RenderOutcome {
            screenshot_path: path.to_string_lossy().into_owned(),
            fingerprint,
            framework,
        })
    }
}

/// Waits for a blocking capture.
///
/// On cancellation the capture is still awaited: it sees the same token
/// within one poll and disposes its browser context before returning, so
/// the caller's context permit is never released while a context is open.
async fn join_capture<T: Send + 'static>(
    mut handle: JoinHandle<Result<T, ScanError>>,
    cancel: &CancellationToken,
) -> Result<T, ScanError> {
    tokio::select! {
        _ = cancel.cancelled() => {
            if let Err(e) = (&mut handle).await {
                debug!(error = %e, "Capture task ended abnormally after cancellation.");
            }
            Err(ScanError::Cancelled)
        }
        joined = &mut handle => joined
            .map_err(|e| ScanError::Render(format!("capture task failed: {e}")))?,
    }
}

/// Request ids the page has started but not yet finished or failed.
#[derive(Debug, Clone, Default)]
struct InFlight(Arc<Mutex<HashSet<String>>>);

impl InFlight {
    fn on_event(&self, event: &Event) {
        match event {
            Event::NetworkRequestWillBeSent(e) => self.started(&e.params.request_id),
            Event::NetworkLoadingFinished(e) => self.settled(&e.params.request_id),
            Event::NetworkLoadingFailed(e) => self.settled(&e.params.request_id),
            _ => {}
        }
    }

    // Redirect hops reuse their request id, so a set keeps them counted once.
    fn started(&self, request_id: &str) {
        if let Ok(mut pending) = self.0.lock() {
            pending.insert(request_id.to_string());
        }
    }

    fn settled(&self, request_id: &str) {
        if let Ok(mut pending) = self.0.lock() {
            pending.remove(request_id);
        }
    }

    fn count(&self) -> usize {
        self.0.lock().map_or(0, |pending| pending.len())
    }
}

/// Tracks how long a page has been loaded with no request in flight.
#[derive(Debug)]
struct Quiescence {
    settle_window: Duration,
    quiet_since: Option<Instant>,
}

impl Quiescence {
    fn new(settle_window: Duration) -> Self {
        Self { settle_window, quiet_since: None }
    }

    /// Feeds one observation; true once the page has stayed quiet for the
    /// whole settle window.
    fn observe(&mut self, now: Instant, loaded: bool, in_flight: usize) -> bool {
        if !loaded || in_flight > 0 {
            self.quiet_since = None;
            return false;
        }
        let since = *self.quiet_since.get_or_insert(now);
        now.duration_since(since) >= self.settle_window
    }
}

/// Everything one blocking capture needs, moved onto the blocking pool.
struct CaptureJob {
    browser: Browser,
    url: String,
    timeout: Duration,
    settle_window: Duration,
    cancel: CancellationToken,
}

impl CaptureJob {
    fn run(self) -> Result<(Vec<u8>, Option<String>), ScanError> {
        let context = self.browser.new_context().map_err(render_error)?;
        let context_id = context.get_id().to_string();
        let tab = context.new_tab().map_err(render_error)?;

        let outcome = self.capture(&tab);

        // Disposing the context closes its tab along with it.
        let dispose = DisposeBrowserContext { browser_context_id: context_id };
        if let Err(e) = tab.call_method(dispose) {
            debug!(target = %self.url, error = %e, "Failed to dispose browser context, closing tab.");
            if let Err(e) = tab.close(true) {
                debug!(target = %self.url, error = %e, "Failed to close tab.");
            }
        }
        outcome
    }

    fn capture(&self, tab: &Tab) -> Result<(Vec<u8>, Option<String>), ScanError> {
        tab.set_default_timeout(self.timeout);

        let in_flight = InFlight::default();
        let listener = in_flight.clone();
        tab.call_method(Network::Enable {
            max_total_buffer_size: None,
            max_resource_buffer_size: None,
            max_post_data_size: None,
            report_direct_socket_traffic: None,
            enable_durable_messages: None,
        })
        .map_err(render_error)?;
        tab.add_event_listener(Arc::new(move |event: &Event| listener.on_event(event)))
            .map_err(render_error)?;

        tab.navigate_to(&self.url).map_err(render_error)?;
        self.wait_for_quiet_network(tab, &in_flight)?;

        let png = tab
            .capture_screenshot(CaptureScreenshotFormatOption::Png, None, None, true)
            .map_err(render_error)?;
        if png.is_empty() {
            return Err(ScanError::Render("browser returned an empty screenshot".into()));
        }
        Ok((png, self.detect_framework(tab)))
    }

    /// Waits until the document has loaded and no request has been in flight
    /// for the settle window.
    ///
    /// Pages that never settle (long polling, websockets, endless trackers)
    /// are captured once the timeout runs out.
    fn wait_for_quiet_network(&self, tab: &Tab, in_flight: &InFlight) -> Result<(), ScanError> {
        let deadline = Instant::now() + self.timeout;
        let mut quiet = Quiescence::new(self.settle_window);

        loop {
            if self.cancel.is_cancelled() {
                return Err(ScanError::Cancelled);
            }
            let loaded = tab
                .evaluate(DOCUMENT_LOADED_JS, false)
                .map_err(render_error)?
                .value
                .and_then(|v| v.as_bool())
                .unwrap_or(false);

            let now = Instant::now();
            if quiet.observe(now, loaded, in_flight.count()) {
                return Ok(());
            }
            if now >= deadline {
                debug!(target = %self.url, pending = in_flight.count(), "Network never settled, capturing anyway.");
                return Ok(());
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }

    fn detect_framework(&self, tab: &Tab) -> Option<String> {
        match tab.evaluate(FRAMEWORK_JS, false) {
            Ok(remote) => framework_from(remote.value.as_ref().and_then(|v| v.as_str())),
            Err(e) => {
                debug!(target = %self.url, error = %e, "Framework detection failed.");
                None
            }
        }
    }
}

fn render_error(e: impl std::fmt::Display) -> ScanError {
    ScanError::Render(e.to_string())
}

/// Maps the detection script's answer to a tag; static pages get none.
fn framework_from(detected: Option<&str>) -> Option<String> {
    detected
        .map(str::trim)
        .filter(|name| !name.is_empty() && *name != "Static")
        .map(str::to_string)
}

/// Filesystem-safe stem for a URL: scheme dropped, every run of other
/// characters collapsed to `_`.
pub fn sanitize_filename(url: &str) -> String {
    let stripped = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
        .unwrap_or(url);
    RE_UNSAFE.replace_all(stripped, "_").trim_matches('_').to_string()
}
