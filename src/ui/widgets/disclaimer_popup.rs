// src/ui/widgets/disclaimer_popup.rs

use ratatui::{
    prelude::*,
    widgets::{Block, Borders, Clear, Paragraph, Wrap},
    text::Line,
};

/// Renders the disclaimer popup on top of the existing UI.
///
/// The modal is shown once at startup and keeps the target input locked until
/// the user acknowledges it with Enter. It is centered on the screen, and the
/// `Clear` widget wipes the area underneath before the text is drawn.
///
/// # Arguments
/// * `frame` - A mutable reference to the `Frame` used for rendering the TUI.
/// * `area` - The `Rect` representing the total area available for rendering.
pub fn render_disclaimer_popup(frame: &mut Frame, area: Rect) {
    let disclaimer_text = Text::from(vec![
        Line::from("IMPORTANT LEGAL DISCLAIMER".bold().yellow()),
        Line::from(""),
        Line::from("NetVista probes and screenshots every host you give it. It is meant for reconnaissance of assets you are explicitly authorized to assess."),
        Line::from(""),
        Line::from("Expanding address blocks and scanning hosts you do not own or have written permission to test may be ILLEGAL in many jurisdictions."),
        Line::from(""),
        Line::from("By using this software, you agree to the following:"),
        Line::from("1. You will only use it on systems you own or have explicit permission to scan."),
        Line::from("2. You will use this software responsibly and in accordance with all applicable laws."),
        Line::from("3. The authors assume NO liability for any misuse or damage caused by this program."),
        Line::from(""),
        Line::from("Press ".bold() + "Enter".bold().yellow() + " to Acknowledge and Continue".bold()),
    ]);

    let block = Block::default()
        .title("Disclaimer")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Red));

    let popup_area = centered_rect(70, 80, area);

    let popup = Paragraph::new(disclaimer_text)
        .block(block)
        .wrap(Wrap { trim: true })
        .alignment(Alignment::Center);

    frame.render_widget(Clear, popup_area);
    frame.render_widget(popup, popup_area);
}

/// A rectangle of the given percentages, centered in `r`.
fn centered_rect(percent_x: u16, percent_y: u16, r: Rect) -> Rect {
    let popup_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(r);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(popup_layout[1])[1]
}