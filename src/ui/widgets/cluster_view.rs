// src/ui/widgets/cluster_view.rs

use crate::app::{App, AppState, SPINNER_CHARS};
use crate::core::models::{ScanOutput, ScanResult};
use ratatui::{
    prelude::*,
    text::Line,
    widgets::{Block, Borders, Paragraph, Scrollbar, ScrollbarOrientation, Wrap},
};

pub fn render_cluster_view(frame: &mut Frame, app: &mut App, area: Rect) {
    let main_block = Block::default()
        .borders(Borders::ALL)
        .title("Visual Clusters (Navigate with ↑ ↓)");

    if app.state != AppState::Finished {
        let content = match app.state {
            AppState::Scanning => {
                let (done, total) = app.progress();
                Paragraph::new(Line::from(vec![
                    Span::styled(format!("{} ", SPINNER_CHARS[app.spinner_frame]), Style::default().fg(Color::Cyan)),
                    Span::raw(format!("Scanning {done}/{total}... Please wait.")),
                ]))
                .alignment(Alignment::Center)
            }
            _ => Paragraph::new("Scan results will appear here...").alignment(Alignment::Center),
        };
        frame.render_widget(content.block(main_block), area);
        return;
    }

    let lines = match (&app.error, &app.output, &app.notice) {
        (Some(error), _, _) => vec![
            Line::from("SCAN FAILED".bold().fg(Color::Red)),
            Line::from(""),
            Line::from(error.clone()),
        ],
        (None, Some(output), _) => cluster_lines(output),
        (None, None, Some(notice)) => vec![Line::from(Span::styled(notice.clone(), Style::default().fg(Color::Yellow)))],
        (None, None, None) => vec![Line::from("No results.")],
    };

    app.content_rows = lines.len();
    app.report_scroll_state = app.report_scroll_state.content_length(lines.len());

    let paragraph = Paragraph::new(lines)
        .block(main_block)
        .wrap(Wrap { trim: false })
        .scroll((app.scroll_offset as u16, 0));
    frame.render_widget(paragraph, area);

    let scrollbar = Scrollbar::new(ScrollbarOrientation::VerticalRight);
    frame.render_stateful_widget(
        scrollbar,
        area.inner(Margin { vertical: 1, horizontal: 0 }),
        &mut app.report_scroll_state,
    );
}

/// Live groups first (largest first, then by key), then unreachable targets.
fn cluster_lines(output: &ScanOutput) -> Vec<Line<'static>> {
    let mut live: Vec<(&String, Vec<&ScanResult>)> = output
        .groups
        .keys()
        .map(|key| (key, members_of(output, key)))
        .filter(|(_, members)| members.iter().any(|r| r.is_alive))
        .collect();
    live.sort_by(|a, b| b.1.len().cmp(&a.1.len()).then_with(|| a.0.cmp(b.0)));

    let mut lines = Vec::new();
    for (key, members) in live {
        let header_style = if members.len() > 1 {
            Style::default().fg(Color::Magenta).add_modifier(Modifier::BOLD)
        } else {
            Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD)
        };
        lines.push(Line::from(vec![
            Span::styled(format!("▸ {key}"), header_style),
            Span::styled(format!("  ({} page(s))", members.len()), Style::default().fg(Color::DarkGray)),
        ]));
        for result in members {
            lines.push(member_line(result));
        }
        lines.push(Line::from(""));
    }

    let dead: Vec<&ScanResult> = output.results.iter().filter(|r| !r.is_alive).collect();
    if !dead.is_empty() {
        lines.push(Line::from(Span::styled(
            format!("UNREACHABLE ({})", dead.len()),
            Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
        )));
        for result in dead {
            lines.push(Line::from(vec![
                Span::raw("    "),
                Span::raw(result.target.raw.clone()),
                Span::styled(format!("  {}", result.error), Style::default().fg(Color::DarkGray)),
            ]));
        }
    }

    if lines.is_empty() {
        lines.push(Line::from("No results."));
    }
    lines
}

fn members_of<'a>(output: &'a ScanOutput, key: &str) -> Vec<&'a ScanResult> {
    output.results.iter().filter(|r| r.group_key == key).collect()
}

fn member_line(result: &ScanResult) -> Line<'static> {
    let status = result.metadata.status_code;
    let status_style = match status {
        200..=299 => Style::default().fg(Color::Green),
        300..=399 => Style::default().fg(Color::Yellow),
        _ => Style::default().fg(Color::Red),
    };
    let mut spans = vec![
        Span::raw("    "),
        Span::styled(format!("[{status}] "), status_style),
        Span::raw(result.url.clone()),
        Span::styled(format!("  {}", result.metadata.title), Style::default().add_modifier(Modifier::ITALIC)),
    ];
    if !result.metadata.technologies.is_empty() {
        spans.push(Span::styled(
            format!("  [{}]", result.metadata.technologies.join(", ")),
            Style::default().fg(Color::DarkGray),
        ));
    }
    if result.screenshot.is_empty() {
        spans.push(Span::styled("  (no screenshot)", Style::default().fg(Color::DarkGray)));
    }
    Line::from(spans)
}
