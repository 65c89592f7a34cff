// src/app.rs

use ratatui::widgets::ScrollbarState;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio_util::sync::CancellationToken;

use crate::core::errors::ScanError;
use crate::core::models::{ScanOutput, Target};
use crate::core::targets;

pub const SPINNER_CHARS: [&str; 10] = ["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];

/// How many technologies the summary panel lists.
const TOP_TECHNOLOGIES: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppState {
    Disclaimer,
    Idle,
    Scanning,
    Finished,
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct ScanSummary {
    pub total: usize,
    pub alive: usize,
    pub dead: usize,
    pub rendered: usize,
    pub groups: usize,
    pub top_technologies: Vec<(String, usize)>,
}

impl ScanSummary {
    pub fn from_output(output: &ScanOutput) -> Self {
        let alive = output.alive_count();
        Self {
            total: output.results.len(),
            alive,
            dead: output.results.len() - alive,
            rendered: output.rendered_count(),
            groups: output.groups.len(),
            top_technologies: output.top_technologies(TOP_TECHNOLOGIES),
        }
    }
}

pub struct App {
    pub should_quit: bool,
    pub state: AppState,
    pub input: String,
    pub output: Option<ScanOutput>,
    /// Set when a run could not start or failed as a whole.
    pub error: Option<String>,
    /// Set when a run had nothing to do, e.g. every target was seen before.
    pub notice: Option<String>,
    pub summary: ScanSummary,
    pub spinner_frame: usize,
    pub total_targets: usize,
    pub progress: Option<Arc<AtomicUsize>>,
    pub cancel: Option<CancellationToken>,
    pub scroll_offset: usize,
    /// Rows in the cluster view, refreshed on every draw.
    pub content_rows: usize,
    pub report_scroll_state: ScrollbarState,
}

impl App {
    pub fn new() -> Self {
        Self {
            should_quit: false,
            state: AppState::Disclaimer,
            input: String::new(),
            output: None,
            error: None,
            notice: None,
            summary: ScanSummary::default(),
            spinner_frame: 0,
            total_targets: 0,
            progress: None,
            cancel: None,
            scroll_offset: 0,
            content_rows: 0,
            report_scroll_state: ScrollbarState::default(),
        }
    }

    pub fn acknowledge_disclaimer(&mut self) {
        self.state = AppState::Idle;
    }

    /// Targets typed into the input box, separated by commas or spaces.
    pub fn parse_targets(&self) -> Vec<Target> {
        targets::normalize(self.input.split(|c: char| c == ',' || c.is_whitespace()))
    }

    pub fn start_scan(&mut self, total: usize, progress: Arc<AtomicUsize>, cancel: CancellationToken) {
        self.state = AppState::Scanning;
        self.total_targets = total;
        self.progress = Some(progress);
        self.cancel = Some(cancel);
        self.error = None;
        self.notice = None;
    }

    pub fn finish(&mut self, outcome: Result<ScanOutput, ScanError>) {
        match outcome {
            Ok(output) => {
                self.summary = ScanSummary::from_output(&output);
                self.output = Some(output);
            }
            Err(e) => self.error = Some(e.to_string()),
        }
        self.cancel = None;
        self.state = AppState::Finished;
    }

    /// Reports a problem that kept a scan from starting.
    pub fn fail(&mut self, message: impl Into<String>) {
        self.error = Some(message.into());
        self.state = AppState::Finished;
    }

    pub fn nothing_to_do(&mut self, message: impl Into<String>) {
        self.notice = Some(message.into());
        self.state = AppState::Finished;
    }

    /// `(done, total)` for the running scan.
    pub fn progress(&self) -> (usize, usize) {
        let done = self.progress.as_ref().map_or(0, |p| p.load(Ordering::Relaxed));
        (done.min(self.total_targets), self.total_targets)
    }

    pub fn on_tick(&mut self) {
        if self.state == AppState::Scanning {
            self.spinner_frame = (self.spinner_frame + 1) % SPINNER_CHARS.len();
        }
    }

    pub fn scroll_up(&mut self) {
        self.scroll_offset = self.scroll_offset.saturating_sub(1);
        self.report_scroll_state = self.report_scroll_state.position(self.scroll_offset);
    }

    pub fn scroll_down(&mut self) {
        let last = self.content_rows.saturating_sub(1);
        self.scroll_offset = self.scroll_offset.saturating_add(1).min(last);
        self.report_scroll_state = self.report_scroll_state.position(self.scroll_offset);
    }

    pub fn quit(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel.cancel();
        }
        self.should_quit = true;
    }

    pub fn reset(&mut self) {
        self.state = AppState::Idle;
        self.input = String::new();
        self.output = None;
        self.error = None;
        self.notice = None;
        self.summary = ScanSummary::default();
        self.total_targets = 0;
        self.progress = None;
        self.scroll_offset = 0;
        self.content_rows = 0;
        self.report_scroll_state = ScrollbarState::default();
    }
}
