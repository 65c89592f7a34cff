// src/ui/mod.rs

use crate::app::{App, AppState};
use ratatui::prelude::*;

mod layout;
mod widgets;

pub fn render(app: &mut App, frame: &mut Frame) {
    let layout = layout::create_layout(frame.area());

    widgets::input::render_input(frame, app, layout.input);
    widgets::cluster_view::render_cluster_view(frame, app, layout.report);
    widgets::summary::render_summary(frame, app, layout.summary);
    widgets::footer::render_footer(frame, app, layout.footer);

    // Drawn last so it covers everything else.
    if app.state == AppState::Disclaimer {
        let area = frame.area();
        widgets::disclaimer_popup::render_disclaimer_popup(frame, area);
    }
}
