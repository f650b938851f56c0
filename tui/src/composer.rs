use crossterm::event::KeyCode;
use crossterm::event::KeyEvent;
use crossterm::event::KeyModifiers;
use ratatui::buffer::Buffer;
use ratatui::layout::Rect;
use ratatui::style::Style;
use ratatui::style::Stylize;
use ratatui::text::Line;
use ratatui::widgets::Block;
use ratatui::widgets::BorderType;
use ratatui::widgets::Borders;
use ratatui::widgets::Paragraph;
use ratatui::widgets::Widget;
use unicode_width::UnicodeWidthStr;

const PLACEHOLDER: &str = "Ask anything (Enter to send, Shift+Enter for a new line)";
const MAX_VISIBLE_LINES: u16 = 8;

/// Result returned when the user interacts with the text area.
#[derive(Debug, PartialEq)]
pub(crate) enum InputResult {
    Submitted(String),
    None,
}

/// Multi-line input box with a simple submission history.
#[derive(Debug, Default)]
pub(crate) struct ChatComposer {
    text: String,
    /// Byte offset into `text`, always on a char boundary.
    cursor: usize,
    history: Vec<String>,
    history_index: Option<usize>,
    busy: bool,
}

impl ChatComposer {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    pub(crate) fn set_text(&mut self, text: &str) {
        self.text = text.to_string();
        self.cursor = self.text.len();
    }

    /// Switch the title to the "generating" hint while a reply streams.
    pub(crate) fn set_busy(&mut self, busy: bool) {
        self.busy = busy;
    }

    /// Returns the input result and whether a redraw is needed.
    pub(crate) fn handle_key_event(&mut self, key_event: KeyEvent) -> (InputResult, bool) {
        match key_event {
            KeyEvent {
                code: KeyCode::Enter,
                modifiers,
                ..
            } if modifiers.intersects(KeyModifiers::SHIFT | KeyModifiers::ALT) => {
                self.insert_str("\n");
                (InputResult::None, true)
            }
            KeyEvent {
                code: KeyCode::Char('j'),
                modifiers: KeyModifiers::CONTROL,
                ..
            } => {
                self.insert_str("\n");
                (InputResult::None, true)
            }
            KeyEvent {
                code: KeyCode::Enter,
                ..
            } => {
                if self.text.trim().is_empty() {
                    return (InputResult::None, false);
                }
                let text = std::mem::take(&mut self.text);
                self.cursor = 0;
                self.history_index = None;
                if self.history.last() != Some(&text) {
                    self.history.push(text.clone());
                }
                (InputResult::Submitted(text), true)
            }
            KeyEvent {
                code: KeyCode::Char('u'),
                modifiers: KeyModifiers::CONTROL,
                ..
            } => {
                self.set_text("");
                (InputResult::None, true)
            }
            KeyEvent {
                code: KeyCode::Char(c),
                modifiers,
                ..
            } if !modifiers.intersects(KeyModifiers::CONTROL | KeyModifiers::ALT) => {
                let mut buf = [0u8; 4];
                self.insert_str(c.encode_utf8(&mut buf));
                (InputResult::None, true)
            }
            KeyEvent {
                code: KeyCode::Backspace,
                ..
            } => {
                if let Some(prev) = self.prev_boundary() {
                    self.text.replace_range(prev..self.cursor, "");
                    self.cursor = prev;
                }
                (InputResult::None, true)
            }
            KeyEvent {
                code: KeyCode::Delete,
                ..
            } => {
                if let Some(next) = self.next_boundary() {
                    self.text.replace_range(self.cursor..next, "");
                }
                (InputResult::None, true)
            }
            KeyEvent {
                code: KeyCode::Left,
                ..
            } => {
                if let Some(prev) = self.prev_boundary() {
                    self.cursor = prev;
                }
                (InputResult::None, true)
            }
            KeyEvent {
                code: KeyCode::Right,
                ..
            } => {
                if let Some(next) = self.next_boundary() {
                    self.cursor = next;
                }
                (InputResult::None, true)
            }
            KeyEvent {
                code: KeyCode::Home,
                ..
            } => {
                self.cursor = self.text[..self.cursor].rfind('\n').map_or(0, |i| i + 1);
                (InputResult::None, true)
            }
            KeyEvent {
                code: KeyCode::End,
                ..
            } => {
                self.cursor = self.text[self.cursor..]
                    .find('\n')
                    .map_or(self.text.len(), |i| self.cursor + i);
                (InputResult::None, true)
            }
            KeyEvent {
                code: KeyCode::Up, ..
            } if !self.text.contains('\n') => (InputResult::None, self.history_prev()),
            KeyEvent {
                code: KeyCode::Down,
                ..
            } if !self.text.contains('\n') => (InputResult::None, self.history_next()),
            _ => (InputResult::None, false),
        }
    }

    pub(crate) fn handle_paste(&mut self, pasted: &str) -> bool {
        self.insert_str(&pasted.replace("\r\n", "\n").replace('\r', "\n"));
        true
    }

    fn insert_str(&mut self, s: &str) {
        self.text.insert_str(self.cursor, s);
        self.cursor += s.len();
    }

    fn prev_boundary(&self) -> Option<usize> {
        self.text[..self.cursor].char_indices().last().map(|(i, _)| i)
    }

    fn next_boundary(&self) -> Option<usize> {
        self.text[self.cursor..]
            .chars()
            .next()
            .map(|c| self.cursor + c.len_utf8())
    }

    fn history_prev(&mut self) -> bool {
        if self.history.is_empty() {
            return false;
        }
        let idx = match self.history_index {
            None => self.history.len() - 1,
            Some(0) => return false,
            Some(i) => i - 1,
        };
        self.history_index = Some(idx);
        let entry = self.history[idx].clone();
        self.set_text(&entry);
        true
    }

    fn history_next(&mut self) -> bool {
        let Some(idx) = self.history_index else {
            return false;
        };
        if idx + 1 < self.history.len() {
            self.history_index = Some(idx + 1);
            let entry = self.history[idx + 1].clone();
            self.set_text(&entry);
        } else {
            self.history_index = None;
            self.set_text("");
        }
        true
    }

    pub(crate) fn desired_height(&self) -> u16 {
        let lines = self.text.split('\n').count() as u16;
        lines.clamp(1, MAX_VISIBLE_LINES) + 2
    }

    /// Terminal cursor position for a composer rendered into `area`.
    pub(crate) fn cursor_pos(&self, area: Rect) -> (u16, u16) {
        let before = &self.text[..self.cursor];
        let row = before.matches('\n').count() as u16;
        let col = before.rsplit('\n').next().unwrap_or_default().width() as u16;
        let inner_height = area.height.saturating_sub(2).max(1);
        let row = row.saturating_sub(self.scroll_offset(inner_height)).min(inner_height - 1);
        let x = (area.x + 1 + col).min(area.right().saturating_sub(2));
        (x, area.y + 1 + row)
    }

    fn scroll_offset(&self, inner_height: u16) -> u16 {
        let row = self.text[..self.cursor].matches('\n').count() as u16;
        row.saturating_sub(inner_height.saturating_sub(1))
    }
}

impl Widget for &ChatComposer {
    fn render(self, area: Rect, buf: &mut Buffer) {
        let title = if self.busy {
            Line::from(" Generating… Esc to cancel ".cyan())
        } else {
            Line::from(" Message ")
        };
        let block = Block::default()
            .borders(Borders::ALL)
            .border_type(BorderType::Rounded)
            .border_style(Style::new().dim())
            .title(title);
        let inner_height = block.inner(area).height.max(1);

        let paragraph = if self.text.is_empty() {
            Paragraph::new(Line::from(PLACEHOLDER.dim().italic()))
        } else {
            let lines: Vec<Line> = self.text.split('\n').map(Line::from).collect();
            Paragraph::new(lines).scroll((self.scroll_offset(inner_height), 0))
        };
        paragraph.block(block).render(area, buf);
    }
}
