// src/ui/widgets/summary.rs

use crate::app::{App, AppState};
use ratatui::{
    prelude::*,
    text::Line,
    widgets::{Block, Borders, Gauge, Paragraph},
};

/// Renders the summary panel.
///
/// While a scan runs it shows a progress gauge fed by the orchestrator's
/// completed-target counter; once finished it shows liveness and render
/// counters, the number of visual groups and the most common technologies.
pub fn render_summary(frame: &mut Frame, app: &App, area: Rect) {
    let summary_container = Block::default().borders(Borders::ALL).title("Summary");
    frame.render_widget(summary_container, area);

    let summary_chunks = Layout::default()
        .direction(Direction::Vertical)
        .margin(1)
        .constraints([
            Constraint::Length(2), // Progress label
            Constraint::Length(1), // Gauge
            Constraint::Length(1), // Spacer
            Constraint::Length(6), // Counters
            Constraint::Length(1), // Spacer
            Constraint::Min(0),    // Technologies
        ])
        .split(area);

    match app.state {
        AppState::Scanning => {
            render_progress(frame, app, summary_chunks[0], summary_chunks[1]);
            return;
        }
        AppState::Finished => {}
        _ => return,
    }

    // --- Counters ---
    let summary = &app.summary;
    let counter = |label: &'static str, value: usize, color: Color| {
        Line::from(vec![
            Span::raw(format!("{label:<10}")),
            Span::styled(value.to_string(), Style::default().fg(color).add_modifier(Modifier::BOLD)),
        ])
    };
    let counters = vec![
        counter("Targets", summary.total, Color::White),
        counter("Alive", summary.alive, Color::Green),
        counter("Dead", summary.dead, Color::Red),
        counter("Rendered", summary.rendered, Color::Cyan),
        counter("Groups", summary.groups, Color::Magenta),
    ];
    let counters_block = Block::default().title("RESULTS".bold());
    frame.render_widget(Paragraph::new(counters).block(counters_block), summary_chunks[3]);

    // --- Technologies ---
    let tech_block = Block::default().title("TOP TECHNOLOGIES".bold());
    let tech_lines: Vec<Line> = if summary.top_technologies.is_empty() {
        vec![Line::from("Not identified.")]
    } else {
        summary
            .top_technologies
            .iter()
            .map(|(tech, count)| {
                let style = if tech.starts_with("VULN:") {
                    Style::default().fg(Color::Red)
                } else if tech.starts_with("WAF:") {
                    Style::default().fg(Color::Yellow)
                } else {
                    Style::default().fg(Color::Cyan)
                };
                Line::from(vec![Span::raw("- "), Span::styled(tech.clone(), style), Span::raw(format!(" ({count})"))])
            })
            .collect()
    };
    frame.render_widget(Paragraph::new(tech_lines).block(tech_block), summary_chunks[5]);
}

fn render_progress(frame: &mut Frame, app: &App, label_area: Rect, gauge_area: Rect) {
    let (done, total) = app.progress();
    let percent = if total == 0 { 0 } else { (done * 100 / total) as u16 };

    let label = Text::from(vec![
        Line::from("Progress".bold()),
        Line::from(format!("{done}/{total} targets")),
    ]);
    frame.render_widget(Paragraph::new(label).alignment(Alignment::Center), label_area);

    let gauge = Gauge::default()
        .percent(percent.min(100))
        .label(format!("{percent}%"))
        .gauge_style(Style::default().fg(Color::Cyan));
    frame.render_widget(gauge, gauge_area);
}
