use localchat_core::SessionSnapshot;
use localchat_core::protocol::Message;
use localchat_core::protocol::Role;
use ratatui::buffer::Buffer;
use ratatui::layout::Rect;
use ratatui::style::Style;
use ratatui::style::Stylize;
use ratatui::text::Line;
use ratatui::text::Span;
use ratatui::widgets::Paragraph;
use ratatui::widgets::Widget;
use ratatui::widgets::Wrap;

use crate::markdown::Segment;
use crate::markdown::split_segments;
use crate::markdown_render::render_markdown_text;

/// Transcript pane. `scroll_from_bottom` counts wrapped rows above the tail.
pub(crate) struct ChatView<'a> {
    snapshot: &'a SessionSnapshot,
    spinner_frame: &'a str,
    scroll_from_bottom: u16,
}

impl<'a> ChatView<'a> {
    pub(crate) fn new(snapshot: &'a SessionSnapshot, spinner_frame: &'a str) -> Self {
        Self {
            snapshot,
            spinner_frame,
            scroll_from_bottom: 0,
        }
    }

    pub(crate) fn scroll_from_bottom(mut self, rows: u16) -> Self {
        self.scroll_from_bottom = rows;
        self
    }

    fn paragraph(&self) -> Paragraph<'static> {
        Paragraph::new(transcript_lines(self.snapshot, self.spinner_frame))
            .wrap(Wrap { trim: false })
    }

    /// Largest useful `scroll_from_bottom` for a pane of this size.
    pub(crate) fn max_scroll(&self, area: Rect) -> u16 {
        let total = self.paragraph().line_count(area.width);
        u16::try_from(total)
            .unwrap_or(u16::MAX)
            .saturating_sub(area.height)
    }
}

impl Widget for ChatView<'_> {
    fn render(self, area: Rect, buf: &mut Buffer) {
        let max = self.max_scroll(area);
        let top = max.saturating_sub(self.scroll_from_bottom);
        self.paragraph().scroll((top, 0)).render(area, buf);
    }
}

pub(crate) fn transcript_lines(
    snapshot: &SessionSnapshot,
    spinner_frame: &str,
) -> Vec<Line<'static>> {
    if snapshot.messages.is_empty() && !snapshot.state.thinking {
        return welcome_lines();
    }

    let mut lines = Vec::new();
    for message in &snapshot.messages {
        push_message(&mut lines, message);
    }

    let reply_open = matches!(snapshot.messages.last(), Some(m) if m.role == Role::Assistant);
    if snapshot.state.thinking && !reply_open {
        lines.push(header(Role::Assistant));
        lines.push(Line::from(vec![
            Span::styled(spinner_frame.to_string(), Style::new().cyan()),
            " Thinking…".dim().italic(),
        ]));
    }
    lines
}

fn welcome_lines() -> Vec<Line<'static>> {
    vec![
        Line::from(""),
        Line::from("localchat".bold()),
        Line::from("Chat with a language model running on this device.".dim()),
        Line::from(""),
        Line::from(vec![
            "Type a message and press ".dim(),
            "Enter".cyan(),
            " to send.".dim(),
        ]),
    ]
}

fn header(role: Role) -> Line<'static> {
    match role {
        Role::User => Line::from("You".bold().cyan()),
        Role::Assistant => Line::from("Assistant".bold().magenta()),
    }
}

fn push_message(lines: &mut Vec<Line<'static>>, message: &Message) {
    if !lines.is_empty() {
        lines.push(Line::from(""));
    }
    lines.push(header(message.role));
    match message.role {
        Role::User => {
            lines.extend(message.content.lines().map(|l| Line::from(l.to_string())));
        }
        Role::Assistant => {
            for segment in split_segments(&message.content) {
                match segment {
                    Segment::Prose(prose) => {
                        lines.extend(render_markdown_text(&prose).lines);
                    }
                    Segment::Code { language, code } => push_code_block(lines, language, &code),
                }
            }
        }
    }
}

fn push_code_block(lines: &mut Vec<Line<'static>>, language: Option<String>, code: &str) {
    let label = language.unwrap_or_else(|| "code".to_string());
    lines.push(Line::from(vec![
        "── ".dim(),
        label.bold(),
        " ── ".dim(),
        "Ctrl+Y".cyan(),
        " copy".dim(),
    ]));
    for code_line in code.lines() {
        lines.push(Line::from(vec![
            "│ ".dim(),
            Span::styled(code_line.to_string(), Style::new().yellow()),
        ]));
    }
    lines.push(Line::from("──".dim()));
}
