//! The console's view model.
//!
//! Tracks N panes inside one adjustable layout, routes keyboard input to the
//! focused pane's session, and applies server notices and output frames to
//! the matching pane. All of it is plain state the tests can drive without a
//! terminal or a socket: key handling and server messages go in, protocol
//! messages come out.

use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use protocol::messages::{CloseSession, OpenSession, SessionInput, SessionResize};
use protocol::Message;

use crate::keys::key_to_bytes;
use crate::pane::{Pane, PaneStatus};
use crate::ui;

/// Lines moved per page-scroll step.
const SCROLL_PAGE: usize = 10;

/// The console application state.
pub struct App {
    account_id: String,
    panes: Vec<Pane>,
    focus: usize,
    should_quit: bool,
    status_line: String,
    /// Terminal viewport, used to derive per-pane PTY sizes.
    viewport: (u16, u16),
}

impl App {
    /// Create an app opening sessions for one account.
    pub fn new(account_id: String) -> Self {
        Self {
            account_id,
            panes: Vec::new(),
            focus: 0,
            should_quit: false,
            status_line: String::new(),
            viewport: (80, 24),
        }
    }

    /// All panes, in layout order.
    pub fn panes(&self) -> &[Pane] {
        &self.panes
    }

    /// Index of the focused pane.
    pub fn focus(&self) -> usize {
        self.focus
    }

    /// The focused pane, if any panes exist.
    pub fn focused_pane(&self) -> Option<&Pane> {
        self.panes.get(self.focus)
    }

    /// Whether the operator asked to quit.
    pub fn should_quit(&self) -> bool {
        self.should_quit
    }

    /// One-line notice area under the grid.
    pub fn status_line(&self) -> &str {
        &self.status_line
    }

    /// Replace the status-line notice.
    pub fn set_status_line(&mut self, text: impl Into<String>) {
        self.status_line = text.into();
    }

    /// Record the terminal size and produce resize messages for panes whose
    /// cell geometry changed.
    pub fn set_viewport(&mut self, width: u16, height: u16) -> Vec<Message> {
        self.viewport = (width, height);
        self.refresh_pane_sizes()
    }

    /// Open a new pane against a target, returning the protocol message to
    /// send. Fanning out a launch list is repeated calls to this.
    pub fn open_target(&mut self, target_id: &str) -> Message {
        self.panes
            .push(Pane::new(target_id.to_string(), target_id.to_string()));
        let (cols, rows) = self.pane_size_hint();

        Message::Open(OpenSession {
            target_id: target_id.to_string(),
            account_id: self.account_id.clone(),
            cols,
            rows,
        })
    }

    /// Handle one key event, returning any protocol messages to send.
    ///
    /// Alt-chords are local pane commands; PageUp/PageDown drive the focused
    /// pane's scrollback; everything else is forwarded to the focused
    /// session as input.
    pub fn handle_key(&mut self, key: KeyEvent) -> Vec<Message> {
        if key.modifiers.contains(KeyModifiers::ALT) {
            match key.code {
                KeyCode::Char('q') => {
                    self.should_quit = true;
                    return Vec::new();
                }
                KeyCode::Char('n') => {
                    self.focus_next();
                    return Vec::new();
                }
                KeyCode::Char('p') => {
                    self.focus_prev();
                    return Vec::new();
                }
                KeyCode::Char('d') => {
                    return self.duplicate_focused().into_iter().collect();
                }
                KeyCode::Char('x') => {
                    return self.close_focused();
                }
                _ => return Vec::new(),
            }
        }

        match key.code {
            KeyCode::PageUp => {
                if let Some(pane) = self.panes.get_mut(self.focus) {
                    pane.scroll_up(SCROLL_PAGE);
                }
                Vec::new()
            }
            KeyCode::PageDown => {
                if let Some(pane) = self.panes.get_mut(self.focus) {
                    pane.scroll_down(SCROLL_PAGE);
                }
                Vec::new()
            }
            _ => self.forward_input(key),
        }
    }

    /// Apply a server message, returning any follow-up messages to send.
    pub fn apply_server(&mut self, message: Message) -> Vec<Message> {
        match message {
            Message::Opened(opened) => {
                if let Some(pane) = self.panes.iter_mut().find(|p| {
                    p.session_id.is_none()
                        && p.target_id == opened.target_id
                        && p.status == PaneStatus::Opening
                }) {
                    pane.bind(opened.session_id, opened.display_name);
                } else {
                    tracing::warn!(
                        session_id = %opened.session_id,
                        target_id = %opened.target_id,
                        "Opened notice without a waiting pane"
                    );
                }
                self.refresh_pane_sizes()
            }
            Message::OpenFailed(failed) => {
                if let Some(pane) = self.panes.iter_mut().find(|p| {
                    p.session_id.is_none()
                        && p.target_id == failed.target_id
                        && p.status == PaneStatus::Opening
                }) {
                    pane.status = PaneStatus::Failed(failed.message.clone());
                }
                self.status_line = format!("open {} failed: {}", failed.target_id, failed.message);
                Vec::new()
            }
            Message::Closed(closed) => {
                if let Some(pane) = self
                    .panes
                    .iter_mut()
                    .find(|p| p.session_id.as_ref() == Some(&closed.session_id))
                {
                    let reason = closed.reason.unwrap_or_else(|| "session ended".to_string());
                    pane.status = match closed.code {
                        Some(_) => PaneStatus::Failed(reason),
                        None => PaneStatus::Closed,
                    };
                }
                Vec::new()
            }
            Message::Output(frame) => {
                match self
                    .panes
                    .iter_mut()
                    .find(|p| p.session_id.as_ref() == Some(&frame.session_id))
                {
                    Some(pane) => pane.append_frame(frame.kind, frame.payload),
                    None => {
                        // A system frame for a session this console no longer
                        // (or never) tracked; surface it in the status line.
                        self.status_line = String::from_utf8_lossy(&frame.payload).to_string();
                    }
                }
                Vec::new()
            }
            Message::Error(err) => {
                self.status_line = format!("server error: {}", err.message);
                Vec::new()
            }
            Message::Pong(_) => Vec::new(),

            // Console-to-server requests are not valid notices; ignore them.
            Message::Open(_)
            | Message::Input(_)
            | Message::Resize(_)
            | Message::Close(_)
            | Message::Ping(_) => {
                tracing::debug!("Ignoring request message received as notice");
                Vec::new()
            }
        }
    }

    /// Move focus to the next pane.
    pub fn focus_next(&mut self) {
        if !self.panes.is_empty() {
            self.focus = (self.focus + 1) % self.panes.len();
        }
    }

    /// Move focus to the previous pane.
    pub fn focus_prev(&mut self) {
        if !self.panes.is_empty() {
            self.focus = if self.focus == 0 {
                self.panes.len() - 1
            } else {
                self.focus - 1
            };
        }
    }

    /// Duplicate the focused pane: a brand-new session against the same
    /// target, with its own fresh log. Never reuses the original session.
    fn duplicate_focused(&mut self) -> Option<Message> {
        let target_id = self.focused_pane()?.target_id.clone();
        let message = self.open_target(&target_id);
        self.focus = self.panes.len() - 1;
        Some(message)
    }

    /// Close the focused pane, translating to a close request for its
    /// session. The pane is removed locally; remaining panes re-tile.
    fn close_focused(&mut self) -> Vec<Message> {
        if self.panes.is_empty() {
            return Vec::new();
        }

        let pane = self.panes.remove(self.focus);
        if self.focus >= self.panes.len() && !self.panes.is_empty() {
            self.focus = self.panes.len() - 1;
        }

        let mut messages: Vec<Message> = pane
            .session_id
            .map(|session_id| Message::Close(CloseSession { session_id }))
            .into_iter()
            .collect();
        messages.extend(self.refresh_pane_sizes());
        messages
    }

    fn forward_input(&mut self, key: KeyEvent) -> Vec<Message> {
        let Some(pane) = self.panes.get_mut(self.focus) else {
            return Vec::new();
        };
        if pane.status != PaneStatus::Connected {
            return Vec::new();
        }
        let Some(session_id) = pane.session_id.clone() else {
            return Vec::new();
        };
        match key_to_bytes(&key) {
            Some(data) => {
                // Typing rejoins the live tail.
                pane.scroll_to_bottom();
                vec![Message::Input(SessionInput { session_id, data })]
            }
            None => Vec::new(),
        }
    }

    /// PTY size for the next opened pane, derived from the tile the layout
    /// would give it.
    fn pane_size_hint(&self) -> (u16, u16) {
        let (width, height) = self.viewport;
        ui::cell_size(width, height, self.panes.len().max(1))
    }

    /// Emit resize messages for connected panes whose tile changed.
    fn refresh_pane_sizes(&mut self) -> Vec<Message> {
        let (width, height) = self.viewport;
        let count = self.panes.len();
        if count == 0 {
            return Vec::new();
        }
        let (cols, rows) = ui::cell_size(width, height, count);

        let mut messages = Vec::new();
        for pane in &mut self.panes {
            if pane.status != PaneStatus::Connected {
                continue;
            }
            let Some(session_id) = pane.session_id.clone() else {
                continue;
            };
            if pane.sent_size == Some((cols, rows)) {
                continue;
            }
            pane.sent_size = Some((cols, rows));
            messages.push(Message::Resize(SessionResize {
                session_id,
                cols,
                rows,
            }));
        }
        messages
    }
}
