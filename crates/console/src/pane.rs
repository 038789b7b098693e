//! One pane of the multi-session view.
//!
//! A pane is bound to at most one session and keeps that session's ordered
//! frame log. Rendering is append-only with auto-scroll unless the operator
//! has scrolled up; scroll state is local to the pane.

use protocol::{FrameKind, SessionId};

/// Cap on retained display lines per pane.
const MAX_LINES: usize = 5000;

/// Connection state shown in the pane's title.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaneStatus {
    /// Open requested, session not yet confirmed.
    Opening,
    /// Session opened and relaying.
    Connected,
    /// Session failed; the pane keeps its log and the failure reason.
    Failed(String),
    /// Session ended cleanly.
    Closed,
}

impl PaneStatus {
    /// Short label for the pane title.
    pub fn label(&self) -> &str {
        match self {
            PaneStatus::Opening => "connecting",
            PaneStatus::Connected => "connected",
            PaneStatus::Failed(_) => "error",
            PaneStatus::Closed => "closed",
        }
    }
}

/// One visual pane bound to one session.
pub struct Pane {
    /// Target this pane opened (or tried to open).
    pub target_id: String,
    /// Title shown on the pane border.
    pub title: String,
    /// Bound session, once the server confirms the open.
    pub session_id: Option<SessionId>,
    /// Connection state.
    pub status: PaneStatus,
    /// Last PTY size announced for this pane's session.
    pub sent_size: Option<(u16, u16)>,
    /// Ordered frame log, exactly as received for this session.
    frames: Vec<(FrameKind, Vec<u8>)>,
    /// Display lines derived from the frame log.
    lines: Vec<String>,
    /// Partial last line still being assembled.
    partial: String,
    /// Lines scrolled up from the bottom; 0 means following the tail.
    scroll_offset: usize,
}

impl Pane {
    /// Create a pane that has requested a session against `target_id`.
    pub fn new(target_id: String, title: String) -> Self {
        Self {
            target_id,
            title,
            session_id: None,
            status: PaneStatus::Opening,
            sent_size: None,
            frames: Vec::new(),
            lines: Vec::new(),
            partial: String::new(),
            scroll_offset: 0,
        }
    }

    /// Bind the pane to its session once the server confirms the open.
    pub fn bind(&mut self, session_id: SessionId, display_name: String) {
        self.session_id = Some(session_id);
        self.title = display_name;
        self.status = PaneStatus::Connected;
    }

    /// Append one frame to the pane's log, preserving arrival order.
    ///
    /// Input echoes are kept in the log but not rendered; the remote PTY
    /// already echoes what the shell received.
    pub fn append_frame(&mut self, kind: FrameKind, payload: Vec<u8>) {
        match kind {
            FrameKind::Output | FrameKind::Error => self.append_text(&payload),
            FrameKind::System => {
                self.flush_partial();
                self.push_line(format!("── {} ──", String::from_utf8_lossy(&payload)));
            }
            FrameKind::InputEcho => {}
        }
        self.frames.push((kind, payload));
    }

    /// The pane's ordered frame log.
    pub fn frames(&self) -> &[(FrameKind, Vec<u8>)] {
        &self.frames
    }

    /// Reconstructed output transcript: the concatenated payloads of this
    /// pane's output frames, in arrival order.
    pub fn transcript(&self) -> Vec<u8> {
        self.frames
            .iter()
            .filter(|(kind, _)| *kind == FrameKind::Output)
            .flat_map(|(_, payload)| payload.iter().copied())
            .collect()
    }

    /// Whether the pane is following the newest output.
    pub fn following(&self) -> bool {
        self.scroll_offset == 0
    }

    /// Scroll up into history; disables auto-scroll.
    pub fn scroll_up(&mut self, count: usize) {
        let max = self.lines.len().saturating_sub(1);
        self.scroll_offset = (self.scroll_offset + count).min(max);
    }

    /// Scroll back toward the tail; reaching it resumes auto-scroll.
    pub fn scroll_down(&mut self, count: usize) {
        self.scroll_offset = self.scroll_offset.saturating_sub(count);
    }

    /// Jump back to the live tail.
    pub fn scroll_to_bottom(&mut self) {
        self.scroll_offset = 0;
    }

    /// The lines to render into a viewport of `height` rows, honoring the
    /// pane's scroll position.
    pub fn visible_lines(&self, height: usize) -> Vec<&str> {
        let mut all: Vec<&str> = self.lines.iter().map(String::as_str).collect();
        if !self.partial.is_empty() {
            all.push(self.partial.as_str());
        }

        let end = all.len().saturating_sub(self.scroll_offset);
        let start = end.saturating_sub(height);
        all[start..end].to_vec()
    }

    /// Total number of display lines.
    pub fn line_count(&self) -> usize {
        self.lines.len() + usize::from(!self.partial.is_empty())
    }

    fn append_text(&mut self, payload: &[u8]) {
        let text = String::from_utf8_lossy(payload);
        for ch in text.chars() {
            match ch {
                '\n' => self.flush_partial(),
                '\r' => {}
                _ => self.partial.push(ch),
            }
        }
    }

    fn flush_partial(&mut self) {
        let line = std::mem::take(&mut self.partial);
        self.push_line(line);
    }

    fn push_line(&mut self, line: String) {
        self.lines.push(line);
        if self.lines.len() > MAX_LINES {
            let excess = self.lines.len() - MAX_LINES;
            self.lines.drain(..excess);
        }
    }
}
