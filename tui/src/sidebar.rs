use localchat_core::protocol::ModelVariant;
use localchat_core::system::DeviceStats;
use localchat_ollama::ServerStatus;
use ratatui::buffer::Buffer;
use ratatui::layout::Rect;
use ratatui::style::Style;
use ratatui::style::Stylize;
use ratatui::text::Line;
use ratatui::text::Span;
use ratatui::widgets::Block;
use ratatui::widgets::Borders;
use ratatui::widgets::Paragraph;
use ratatui::widgets::Widget;
use ratatui::widgets::Wrap;

pub(crate) const SIDEBAR_WIDTH: u16 = 30;

#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) enum OptimizeStatus {
    #[default]
    Idle,
    Running,
    Finished(String),
}

/// Everything the sidebar shows that does not live in the store.
#[derive(Debug, Default)]
pub(crate) struct SidebarState {
    pub(crate) stats: Option<DeviceStats>,
    pub(crate) server: Option<ServerStatus>,
    pub(crate) optimize: OptimizeStatus,
}

pub(crate) struct Sidebar<'a> {
    pub(crate) state: &'a SidebarState,
    pub(crate) variant: ModelVariant,
    pub(crate) model_tag: &'a str,
}

impl Sidebar<'_> {
    fn lines(&self) -> Vec<Line<'static>> {
        let mut lines = vec![
            Line::from("Model".bold()),
            Line::from(vec![
                Span::styled(self.variant.to_string(), Style::new().cyan()),
                " · ".dim(),
                Span::raw(self.model_tag.to_string()),
            ]),
        ];
        if let Some(advisory) = self.variant.advisory() {
            lines.push(Line::from(advisory.yellow()));
        }

        lines.push(Line::from(""));
        lines.push(Line::from("Device".bold()));
        let stats = self.state.stats.unwrap_or_default();
        lines.push(reading_line(
            "RAM ",
            stats.memory_percent.map(|p| format!("{p:.1}%")),
            stats.memory_high(),
        ));
        lines.push(reading_line(
            "CPU ",
            stats.temperature_celsius.map(|t| format!("{t:.1}°C")),
            stats.temperature_high(),
        ));

        lines.push(Line::from(""));
        lines.push(Line::from("Server".bold()));
        lines.push(match &self.state.server {
            None => Line::from("checking…".dim()),
            Some(ServerStatus::Online { models }) => Line::from(vec![
                "● ".green(),
                "online".into(),
                format!(" ({} models)", models.len()).dim(),
            ]),
            Some(ServerStatus::Offline) => Line::from(vec!["● ".red(), "offline".into()]),
        });

        lines.push(Line::from(""));
        lines.push(Line::from("Optimize".bold()));
        lines.push(match &self.state.optimize {
            OptimizeStatus::Idle => Line::from("not run".dim()),
            OptimizeStatus::Running => Line::from("running…".cyan()),
            OptimizeStatus::Finished(summary) => Line::from(summary.clone()),
        });

        lines.push(Line::from(""));
        lines.push(Line::from("Keys".bold()));
        for (key, action) in [
            ("Enter", "send"),
            ("Esc", "cancel reply"),
            ("Ctrl+T", "switch model"),
            ("Ctrl+L", "clear chat"),
            ("Ctrl+Y", "copy last code"),
            ("Ctrl+O", "optimize"),
            ("Ctrl+C", "quit"),
        ] {
            lines.push(Line::from(vec![
                format!("{key:<7}").cyan(),
                action.dim(),
            ]));
        }
        lines
    }
}

fn reading_line(label: &'static str, value: Option<String>, high: bool) -> Line<'static> {
    let mut spans = vec![label.dim()];
    match value {
        Some(value) => spans.push(value.into()),
        None => spans.push("unavailable".dim()),
    }
    if high {
        spans.push(" High".red().bold());
    }
    Line::from(spans)
}

impl Widget for Sidebar<'_> {
    fn render(self, area: Rect, buf: &mut Buffer) {
        Paragraph::new(self.lines())
            .wrap(Wrap { trim: true })
            .block(
                Block::default()
                    .borders(Borders::LEFT)
                    .border_style(Style::new().dim()),
            )
            .render(area, buf);
    }
}
