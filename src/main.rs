// src/main.rs

use color_eyre::eyre::Result;
use crossterm::{
    ExecutableCommand,
    event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEventKind},
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ratatui::prelude::*;
use std::io::{IsTerminal, stdout};
use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

mod app;
mod core;
mod logging;
mod ui;

use app::{App, AppState};
use crate::core::analyzer::AnalyzerChain;
use crate::core::config::RunConfig;
use crate::core::errors::ScanError;
use crate::core::models::{ScanOutput, Target};
use crate::core::scanner::Scanner;
use crate::core::scanner::http_prober::HttpProber;
use crate::core::scanner::renderer::ChromeRenderer;
use crate::core::signatures::SignatureStore;
use crate::core::{store, targets};

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let log_path = logging::initialize_logging()?;
    info!(log = %log_path.display(), "NetVista starting.");

    let config = Arc::new(RunConfig::from_env()?);

    // Piped input means a batch run; a terminal gets the interactive UI.
    if std::io::stdin().is_terminal() {
        run_tui(config).await
    } else {
        run_headless(config).await
    }
}

/// Wires the pipeline from the run configuration. Launching the browser is
/// the slow part, so it happens off the async workers.
async fn build_scanner(config: Arc<RunConfig>) -> Result<Scanner, ScanError> {
    let prober = HttpProber::new(Arc::clone(&config))?;
    let analyzers = AnalyzerChain::standard(Arc::new(SignatureStore::builtin()));
    let scanner = Scanner::new(Arc::clone(&config), Arc::new(prober), Arc::new(analyzers));

    if !config.screenshots {
        return Ok(scanner);
    }
    let launch_config = Arc::clone(&config);
    let renderer = tokio::task::spawn_blocking(move || ChromeRenderer::launch(&launch_config))
        .await
        .map_err(|e| ScanError::BrowserInit(e.to_string()))??;
    Ok(scanner.with_renderer(Arc::new(renderer)))
}

fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling scan.");
            trigger.cancel();
        }
    });
    cancel
}

// --- Headless mode ---

async fn run_headless(config: Arc<RunConfig>) -> Result<()> {
    let mut input = String::new();
    tokio::io::stdin().read_to_string(&mut input).await?;

    let normalized = targets::normalize_lines(&input);
    if normalized.is_empty() {
        return Err(ScanError::NoTargets.into());
    }
    let prior = store::load_prior_urls(&store::results_path(&config.output_path)).await;
    let pending = targets::filter_incremental(normalized, &prior);
    if pending.is_empty() {
        info!("All targets already processed.");
        eprintln!("All targets already processed.");
        return Ok(());
    }

    let scanner = build_scanner(Arc::clone(&config)).await?;
    let output = scanner.run(pending, cancel_on_ctrl_c()).await?;

    let path = store::save_results(&config.output_path, &output).await?;
    println!("{}", serde_json::to_string_pretty(&output)?);
    eprintln!(
        "Scanned {} targets ({} alive, {} groups). Results saved to {}",
        output.results.len(),
        output.alive_count(),
        output.groups.len(),
        path.display()
    );
    Ok(())
}

// --- Interactive mode ---

async fn run_tui(config: Arc<RunConfig>) -> Result<()> {
    stdout().execute(EnterAlternateScreen)?;
    stdout().execute(EnableMouseCapture)?;
    enable_raw_mode()?;
    let mut terminal = Terminal::new(CrosstermBackend::new(stdout()))?;
    terminal.clear()?;

    let mut app = App::new();
    let (tx, mut rx) = mpsc::channel(1);
    let outcome = event_loop(&mut terminal, &mut app, &config, &tx, &mut rx).await;

    stdout().execute(LeaveAlternateScreen)?;
    stdout().execute(DisableMouseCapture)?;
    disable_raw_mode()?;
    outcome
}

type ScanSender = mpsc::Sender<Result<ScanOutput, ScanError>>;

async fn event_loop<B: Backend>(
    terminal: &mut Terminal<B>,
    app: &mut App,
    config: &Arc<RunConfig>,
    tx: &ScanSender,
    rx: &mut mpsc::Receiver<Result<ScanOutput, ScanError>>,
) -> Result<()> {
    while !app.should_quit {
        terminal.draw(|frame| ui::render(app, frame))?;

        if event::poll(Duration::from_millis(100))? {
            handle_events(app, config, tx).await?;
        }

        if let Ok(outcome) = rx.try_recv() {
            app.finish(outcome);
        }
        app.on_tick();
    }
    Ok(())
}

async fn handle_events(app: &mut App, config: &Arc<RunConfig>, tx: &ScanSender) -> Result<()> {
    if let Event::Key(key) = event::read()? {
        if key.kind == KeyEventKind::Press {
            match app.state {
                AppState::Disclaimer => match key.code {
                    KeyCode::Enter => app.acknowledge_disclaimer(),
                    KeyCode::Esc => app.quit(),
                    _ => {}
                },
                AppState::Idle => handle_idle_input(app, key.code, config, tx).await,
                AppState::Finished => handle_finished_input(app, key.code),
                AppState::Scanning => {
                    if key.code == KeyCode::Char('q') {
                        app.quit();
                    }
                }
            }
        }
    }
    Ok(())
}

async fn handle_idle_input(app: &mut App, key_code: KeyCode, config: &Arc<RunConfig>, tx: &ScanSender) {
    match key_code {
        KeyCode::Esc => app.quit(),
        KeyCode::Char(c) => app.input.push(c),
        KeyCode::Backspace => {
            app.input.pop();
        }
        KeyCode::Enter => {
            let parsed = app.parse_targets();
            if parsed.is_empty() {
                return;
            }
            let prior = store::load_prior_urls(&store::results_path(&config.output_path)).await;
            let pending = targets::filter_incremental(parsed, &prior);
            if pending.is_empty() {
                app.nothing_to_do("All targets already processed.");
                return;
            }

            let progress = Arc::new(AtomicUsize::new(0));
            let cancel = CancellationToken::new();
            app.start_scan(pending.len(), Arc::clone(&progress), cancel.clone());

            // The browser launches inside the task so the UI keeps drawing.
            let (config, tx) = (Arc::clone(config), tx.clone());
            tokio::spawn(async move {
                let outcome = scan_and_save(config, pending, progress, cancel).await;
                let _ = tx.send(outcome).await;
            });
        }
        _ => {}
    }
}

async fn scan_and_save(
    config: Arc<RunConfig>,
    pending: Vec<Target>,
    progress: Arc<AtomicUsize>,
    cancel: CancellationToken,
) -> Result<ScanOutput, ScanError> {
    let scanner = build_scanner(Arc::clone(&config)).await?.with_progress(progress);
    let output = scanner.run(pending, cancel).await?;
    let path = store::save_results(&config.output_path, &output).await?;
    info!(path = %path.display(), "Results saved.");
    Ok(output)
}

fn handle_finished_input(app: &mut App, key_code: KeyCode) {
    match key_code {
        KeyCode::Char('q') => app.quit(),
        KeyCode::Char('n') => app.reset(),
        KeyCode::Up => app.scroll_up(),
        KeyCode::Down => app.scroll_down(),
        _ => {}
    }
}
