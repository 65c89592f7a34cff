// src/ui/layout.rs

use ratatui::layout::{Constraint, Direction, Layout, Rect};

/// Defines the areas of the application's user interface.
///
/// Each `Rect` is one widget area on the terminal screen, computed once per
/// frame so widgets never re-derive dimensions themselves.
pub struct AppLayout {
    pub input: Rect,
    pub report: Rect,
    pub summary: Rect,
    pub footer: Rect,
}

/// Creates the complete application layout.
///
/// The frame is split into three vertical chunks: the target input box at
/// the top, the main content area in the middle and a one-line footer at the
/// bottom. The content area is split horizontally so the cluster view (70%)
/// sits beside the summary panel (30%).
///
/// # Arguments
/// * `frame_size` - The `Rect` representing the total size of the terminal frame.
///
/// # Returns
/// An `AppLayout` struct containing the calculated `Rect` for each widget area.
pub fn create_layout(frame_size: Rect) -> AppLayout {
    let main_chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(3), Constraint::Min(0), Constraint::Length(1)])
        .split(frame_size);

    let content_chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(70), Constraint::Percentage(30)])
        .split(main_chunks[1]);

    AppLayout {
        input: main_chunks[0],
        report: content_chunks[0],
        summary: content_chunks[1],
        footer: main_chunks[2],
    }
}
