//! Grid rendering for the multi-pane view.
//!
//! One adjustable layout hosts every pane: panes tile into a near-square
//! grid that stays usable for 1, 2, or N sessions. There is no hard cap on
//! pane count here; practical limits are the server's session policy.

use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::Line;
use ratatui::widgets::{Block, Borders, Paragraph};
use ratatui::Frame;

use crate::app::App;
use crate::pane::{Pane, PaneStatus};

/// Compute the tile rectangles for `count` panes inside `area`.
///
/// Columns grow first (`ceil(sqrt(n))`), rows as needed; the last row
/// stretches its panes when it is not full.
pub fn grid(area: Rect, count: usize) -> Vec<Rect> {
    if count == 0 {
        return Vec::new();
    }

    let cols = (count as f64).sqrt().ceil() as usize;
    let rows = count.div_ceil(cols);

    let row_constraints: Vec<Constraint> = (0..rows).map(|_| Constraint::Ratio(1, rows as u32)).collect();
    let row_rects = Layout::default()
        .direction(Direction::Vertical)
        .constraints(row_constraints)
        .split(area);

    let mut cells = Vec::with_capacity(count);
    let mut remaining = count;
    for row_rect in row_rects.iter() {
        let in_row = remaining.min(cols);
        let col_constraints: Vec<Constraint> =
            (0..in_row).map(|_| Constraint::Ratio(1, in_row as u32)).collect();
        let col_rects = Layout::default()
            .direction(Direction::Horizontal)
            .constraints(col_constraints)
            .split(*row_rect);
        cells.extend(col_rects.iter().copied());
        remaining -= in_row;
        if remaining == 0 {
            break;
        }
    }

    cells
}

/// PTY size (cols, rows) of one tile in a `count`-pane grid on a terminal of
/// the given size, net of borders and the status bar.
pub fn cell_size(width: u16, height: u16, count: usize) -> (u16, u16) {
    let count = count.max(1);
    let cols = (count as f64).sqrt().ceil() as u16;
    let rows = (count as u16).div_ceil(cols);

    // One status line at the bottom, two border cells per tile.
    let grid_height = height.saturating_sub(1);
    let cell_cols = (width / cols).saturating_sub(2).max(1);
    let cell_rows = (grid_height / rows).saturating_sub(2).max(1);
    (cell_cols, cell_rows)
}

/// Draw the whole console: the pane grid plus a one-line status bar.
pub fn render(frame: &mut Frame, app: &App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(0), Constraint::Length(1)])
        .split(frame.area());

    let cells = grid(chunks[0], app.panes().len());
    for (index, (pane, cell)) in app.panes().iter().zip(cells.iter()).enumerate() {
        render_pane(frame, *cell, pane, index == app.focus());
    }

    render_status_bar(frame, chunks[1], app);
}

fn render_pane(frame: &mut Frame, area: Rect, pane: &Pane, focused: bool) {
    let border_style = if focused {
        Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD)
    } else {
        match pane.status {
            PaneStatus::Failed(_) => Style::default().fg(Color::Red),
            PaneStatus::Closed => Style::default().fg(Color::DarkGray),
            _ => Style::default().fg(Color::Gray),
        }
    };

    let mut title = format!(" {} [{}] ", pane.title, pane.status.label());
    if !pane.following() {
        title.push_str("[scroll] ");
    }

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(border_style)
        .title(title);

    let inner = block.inner(area);
    let lines: Vec<Line> = pane
        .visible_lines(inner.height as usize)
        .into_iter()
        .map(Line::from)
        .collect();

    let paragraph = Paragraph::new(lines).block(block);
    frame.render_widget(paragraph, area);
}

fn render_status_bar(frame: &mut Frame, area: Rect, app: &App) {
    let text = if app.status_line().is_empty() {
        "Alt-n/p focus | Alt-d duplicate | Alt-x close | PgUp/PgDn scroll | Alt-q quit".to_string()
    } else {
        app.status_line().to_string()
    };

    let paragraph = Paragraph::new(text).style(Style::default().fg(Color::DarkGray));
    frame.render_widget(paragraph, area);
}
