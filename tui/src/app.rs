use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::mpsc::Receiver;
use std::sync::mpsc::channel;
use std::thread;
use std::time::Duration;
use std::time::Instant;

use color_eyre::eyre::Result;
use crossterm::SynchronizedUpdate;
use crossterm::event::KeyCode;
use crossterm::event::KeyEvent;
use crossterm::event::KeyEventKind;
use crossterm::event::KeyModifiers;
use localchat_core::ChatErr;
use localchat_core::Config;
use localchat_core::Session;
use localchat_core::protocol::TurnOutcome;
use localchat_core::system::MEMINFO_PATH;
use localchat_core::system::collect_device_stats;
use localchat_core::system::run_optimize;
use localchat_ollama::OllamaClient;
use ratatui::layout::Constraint;
use ratatui::layout::Layout;
use ratatui::layout::Rect;
use ratatui::style::Stylize;
use ratatui::text::Line;
use ratatui::widgets::Paragraph;
use tokio::task::JoinHandle;

use crate::app_event::AppEvent;
use crate::app_event_sender::AppEventSender;
use crate::chat_view::ChatView;
use crate::clipboard;
use crate::composer::ChatComposer;
use crate::composer::InputResult;
use crate::markdown::last_code_block;
use crate::sidebar::OptimizeStatus;
use crate::sidebar::SIDEBAR_WIDTH;
use crate::sidebar::Sidebar;
use crate::sidebar::SidebarState;
use crate::spinner;
use crate::tui;

/// Time window for debouncing redraw requests.
const REDRAW_DEBOUNCE: Duration = Duration::from_millis(10);

/// Below this width the sidebar is hidden.
const MIN_WIDTH_FOR_SIDEBAR: u16 = 80;

#[derive(Debug, Clone, PartialEq)]
struct Notice {
    text: String,
    is_error: bool,
}

impl Notice {
    fn info(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_error: false,
        }
    }

    fn error(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_error: true,
        }
    }
}

struct Areas {
    chat: Rect,
    notice: Rect,
    composer: Rect,
    sidebar: Option<Rect>,
}

fn layout(area: Rect, composer_height: u16, has_notice: bool) -> Areas {
    let (main, sidebar) = if area.width >= MIN_WIDTH_FOR_SIDEBAR {
        let [main, sidebar] =
            Layout::horizontal([Constraint::Min(20), Constraint::Length(SIDEBAR_WIDTH)])
                .areas(area);
        (main, Some(sidebar))
    } else {
        (area, None)
    };
    let [chat, notice, composer] = Layout::vertical([
        Constraint::Min(1),
        Constraint::Length(u16::from(has_notice)),
        Constraint::Length(composer_height),
    ])
    .areas(main);
    Areas {
        chat,
        notice,
        composer,
        sidebar,
    }
}

/// Text shown when a turn ends. `None` means nothing to report.
fn turn_notice(result: &Result<TurnOutcome, String>) -> Option<Notice> {
    match result {
        Ok(TurnOutcome::Completed) => None,
        Ok(TurnOutcome::CompletedWithoutContent) => {
            Some(Notice::info("The model finished without replying."))
        }
        Err(text) => Some(Notice::error(text.clone())),
    }
}

fn describe_turn_error(err: &ChatErr) -> String {
    match err {
        ChatErr::Interrupted => "Reply cancelled.".to_string(),
        e if e.is_connection_failure() => {
            format!("Could not reach the model server ({e}). Is ollama running?")
        }
        e => format!("Reply failed: {e}"),
    }
}

pub(crate) struct App {
    app_event_tx: AppEventSender,
    app_event_rx: Receiver<AppEvent>,

    config: Config,
    session: Session,

    composer: ChatComposer,
    sidebar: SidebarState,
    notice: Option<Notice>,

    /// Rows scrolled up from the tail of the transcript.
    scroll_from_bottom: u16,
    last_chat_area: Rect,

    /// Set while a turn runs; drives the spinner.
    turn_started: Option<Instant>,

    initial_prompt: Option<String>,

    /// True when a redraw has been scheduled but not yet executed.
    pending_redraw: Arc<AtomicBool>,
    /// True when an animation frame is already scheduled.
    pending_frame: Arc<AtomicBool>,

    background: Vec<JoinHandle<()>>,
}

impl App {
    pub(crate) fn new(
        config: Config,
        client: OllamaClient,
        session: Session,
        initial_prompt: Option<String>,
    ) -> Self {
        let (app_event_tx, app_event_rx) = channel();
        let app_event_tx = AppEventSender::new(app_event_tx);

        // Spawn a dedicated thread for reading the crossterm event loop and
        // re-publishing the events as AppEvents.
        {
            let app_event_tx = app_event_tx.clone();
            thread::spawn(move || {
                loop {
                    // The timeout keeps the event lock free for cursor
                    // position queries.
                    if let Ok(true) = crossterm::event::poll(Duration::from_millis(100))
                        && let Ok(event) = crossterm::event::read()
                    {
                        match event {
                            crossterm::event::Event::Key(key_event) => {
                                app_event_tx.send(AppEvent::KeyEvent(key_event));
                            }
                            crossterm::event::Event::Resize(_, _) => {
                                app_event_tx.send(AppEvent::RequestRedraw);
                            }
                            crossterm::event::Event::Paste(pasted) => {
                                app_event_tx.send(AppEvent::Paste(pasted));
                            }
                            _ => {}
                        }
                    }
                }
            });
        }

        let mut background = Vec::new();

        let mut store_events = session.subscribe();
        let tx = app_event_tx.clone();
        background.push(tokio::spawn(async move {
            while store_events.recv().await.is_some() {
                tx.send(AppEvent::StoreChanged);
            }
        }));

        let tx = app_event_tx.clone();
        let thermal_zone = config.thermal_zone_path.clone();
        let interval = config.stats_refresh_interval;
        background.push(tokio::spawn(async move {
            loop {
                let stats = collect_device_stats(Path::new(MEMINFO_PATH), &thermal_zone).await;
                tx.send(AppEvent::DeviceStats(stats));
                tx.send(AppEvent::ServerStatus(client.server_status().await));
                tokio::time::sleep(interval).await;
            }
        }));

        let composer = ChatComposer::new();
        Self {
            app_event_tx,
            app_event_rx,
            config,
            session,
            composer,
            sidebar: SidebarState::default(),
            notice: None,
            scroll_from_bottom: 0,
            last_chat_area: Rect::default(),
            turn_started: None,
            initial_prompt,
            pending_redraw: Arc::new(AtomicBool::new(false)),
            pending_frame: Arc::new(AtomicBool::new(false)),
            background,
        }
    }

    /// Hand the session back so the caller can shut it down.
    pub(crate) fn into_session(self) -> Session {
        for task in &self.background {
            task.abort();
        }
        self.session
    }

    /// Schedule a redraw if one is not already pending.
    fn schedule_redraw(&self) {
        if self
            .pending_redraw
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }

        let tx = self.app_event_tx.clone();
        let pending_redraw = self.pending_redraw.clone();
        thread::spawn(move || {
            thread::sleep(REDRAW_DEBOUNCE);
            tx.send(AppEvent::Redraw);
            pending_redraw.store(false, Ordering::SeqCst);
        });
    }

    fn schedule_frame_in(&self, delay: Duration) {
        if self.pending_frame.swap(true, Ordering::SeqCst) {
            return;
        }
        let tx = self.app_event_tx.clone();
        let pending_frame = self.pending_frame.clone();
        thread::spawn(move || {
            thread::sleep(delay);
            pending_frame.store(false, Ordering::SeqCst);
            tx.send(AppEvent::RequestRedraw);
        });
    }

    pub(crate) fn run(&mut self, terminal: &mut tui::Tui) -> Result<()> {
        self.app_event_tx.send(AppEvent::RequestRedraw);
        if let Some(prompt) = self.initial_prompt.take() {
            self.submit(prompt);
        }

        while let Ok(event) = self.app_event_rx.recv() {
            match event {
                AppEvent::RequestRedraw | AppEvent::StoreChanged => {
                    self.schedule_redraw();
                }
                AppEvent::Redraw => {
                    std::io::stdout().sync_update(|_| self.draw_next_frame(terminal))??;
                }
                AppEvent::ScheduleFrameIn(delay) => {
                    self.schedule_frame_in(delay);
                }
                AppEvent::KeyEvent(key_event) => {
                    match key_event {
                        KeyEvent {
                            code: KeyCode::Char('c'),
                            modifiers: KeyModifiers::CONTROL,
                            kind: KeyEventKind::Press,
                            ..
                        } => {
                            if !self.session.cancel_turn() {
                                self.app_event_tx.send(AppEvent::ExitRequest);
                            }
                        }
                        KeyEvent {
                            code: KeyCode::Char('d'),
                            modifiers: KeyModifiers::CONTROL,
                            kind: KeyEventKind::Press,
                            ..
                        } if self.composer.is_empty() => {
                            self.app_event_tx.send(AppEvent::ExitRequest);
                        }
                        KeyEvent {
                            kind: KeyEventKind::Press | KeyEventKind::Repeat,
                            ..
                        } => {
                            self.handle_key_event(key_event);
                        }
                        _ => {}
                    };
                }
                AppEvent::Paste(text) => {
                    if self.composer.handle_paste(&text) {
                        self.app_event_tx.send(AppEvent::RequestRedraw);
                    }
                }
                AppEvent::TurnEnded(result) => {
                    self.turn_started = None;
                    self.composer.set_busy(false);
                    if let Some(notice) = turn_notice(&result) {
                        self.notice = Some(notice);
                    }
                    self.app_event_tx.send(AppEvent::RequestRedraw);
                }
                AppEvent::DeviceStats(stats) => {
                    self.sidebar.stats = Some(stats);
                    self.app_event_tx.send(AppEvent::RequestRedraw);
                }
                AppEvent::ServerStatus(status) => {
                    self.sidebar.server = Some(status);
                    self.app_event_tx.send(AppEvent::RequestRedraw);
                }
                AppEvent::OptimizeFinished(summary) => {
                    self.sidebar.optimize = OptimizeStatus::Finished(summary);
                    self.app_event_tx.send(AppEvent::RequestRedraw);
                }
                AppEvent::ExitRequest => {
                    break;
                }
            }
        }
        terminal.clear()?;
        Ok(())
    }

    fn handle_key_event(&mut self, key_event: KeyEvent) {
        match key_event {
            KeyEvent {
                code: KeyCode::Esc, ..
            } => {
                self.session.cancel_turn();
            }
            KeyEvent {
                code: KeyCode::Char('l'),
                modifiers: KeyModifiers::CONTROL,
                ..
            } => match self.session.clear() {
                Ok(()) => {
                    self.scroll_from_bottom = 0;
                    self.notice = Some(Notice::info("Conversation cleared."));
                }
                Err(e) => self.notice = Some(Notice::error(format!("Cannot clear: {e}"))),
            },
            KeyEvent {
                code: KeyCode::Char('t'),
                modifiers: KeyModifiers::CONTROL,
                ..
            } => self.toggle_model(),
            KeyEvent {
                code: KeyCode::Char('o'),
                modifiers: KeyModifiers::CONTROL,
                ..
            } => self.start_optimize(),
            KeyEvent {
                code: KeyCode::Char('y'),
                modifiers: KeyModifiers::CONTROL,
                ..
            } => self.copy_last_code_block(),
            KeyEvent {
                code: KeyCode::PageUp,
                ..
            } => {
                let page = self.last_chat_area.height.saturating_sub(1).max(1);
                self.scroll_from_bottom = self.scroll_from_bottom.saturating_add(page);
            }
            KeyEvent {
                code: KeyCode::PageDown,
                ..
            } => {
                let page = self.last_chat_area.height.saturating_sub(1).max(1);
                self.scroll_from_bottom = self.scroll_from_bottom.saturating_sub(page);
            }
            _ => {
                let (result, needs_redraw) = self.composer.handle_key_event(key_event);
                if let InputResult::Submitted(text) = result {
                    self.submit(text);
                } else if !needs_redraw {
                    return;
                }
            }
        }
        self.app_event_tx.send(AppEvent::RequestRedraw);
    }

    fn submit(&mut self, text: String) {
        match self.session.submit(&text) {
            Ok(handle) => {
                self.notice = None;
                self.scroll_from_bottom = 0;
                self.turn_started = Some(Instant::now());
                self.composer.set_busy(true);
                let tx = self.app_event_tx.clone();
                tokio::spawn(async move {
                    let result = match handle.await {
                        Ok(Ok(outcome)) => Ok(outcome),
                        Ok(Err(e)) => Err(describe_turn_error(&e)),
                        Err(e) => Err(format!("Reply task failed: {e}")),
                    };
                    tx.send(AppEvent::TurnEnded(result));
                });
            }
            Err(e) => {
                // Give the text back so nothing typed is lost.
                self.composer.set_text(&text);
                self.notice = Some(Notice::error(format!("Not sent: {e}")));
            }
        }
        self.app_event_tx.send(AppEvent::RequestRedraw);
    }

    fn toggle_model(&mut self) {
        let next = self.session.state().model.toggled();
        match self.session.set_model(next) {
            Ok(()) => {
                self.scroll_from_bottom = 0;
                let text = match next.advisory() {
                    Some(advisory) => advisory.to_string(),
                    None => format!(
                        "Switched to the {next} model ({}).",
                        self.session.model_tag(next)
                    ),
                };
                self.notice = Some(Notice::info(text));
            }
            Err(e) => {
                self.notice = Some(Notice::error(format!("Cannot switch model: {e}")));
            }
        }
    }

    fn start_optimize(&mut self) {
        if self.sidebar.optimize == OptimizeStatus::Running {
            return;
        }
        self.sidebar.optimize = OptimizeStatus::Running;
        let command = self.config.optimize_command.clone();
        let tx = self.app_event_tx.clone();
        tokio::spawn(async move {
            let summary = match run_optimize(&command).await {
                Ok(report) => report.summary(),
                Err(e) => format!("Optimization failed: {e}"),
            };
            tx.send(AppEvent::OptimizeFinished(summary));
        });
    }

    fn copy_last_code_block(&mut self) {
        let snapshot = self.session.snapshot();
        self.notice = Some(match last_code_block(&snapshot.messages) {
            None => Notice::info("No code block to copy."),
            Some(code) => match clipboard::copy_text(&code) {
                Ok(()) => Notice::info("Copied the last code block."),
                Err(e) => Notice::error(e.to_string()),
            },
        });
    }

    fn draw_next_frame(&mut self, terminal: &mut tui::Tui) -> Result<()> {
        let size = terminal.size()?;
        let areas = layout(
            Rect::new(0, 0, size.width, size.height),
            self.composer.desired_height(),
            self.notice.is_some(),
        );
        self.last_chat_area = areas.chat;

        let snapshot = self.session.snapshot();
        let frame_symbol = spinner::frame_at(
            self.turn_started
                .map(|started| started.elapsed())
                .unwrap_or_default(),
        );
        let view = ChatView::new(&snapshot, frame_symbol);
        self.scroll_from_bottom = self.scroll_from_bottom.min(view.max_scroll(areas.chat));
        let view = view.scroll_from_bottom(self.scroll_from_bottom);

        let variant = snapshot.state.model;
        let sidebar = Sidebar {
            state: &self.sidebar,
            variant,
            model_tag: self.session.model_tag(variant),
        };
        let notice = self.notice.as_ref().map(|n| {
            if n.is_error {
                Line::from(n.text.clone().red())
            } else {
                Line::from(n.text.clone().dim())
            }
        });
        let composer = &self.composer;

        terminal.draw(|frame| {
            frame.render_widget(view, areas.chat);
            if let Some(line) = notice {
                frame.render_widget(Paragraph::new(line), areas.notice);
            }
            frame.render_widget(composer, areas.composer);
            if let Some(area) = areas.sidebar {
                frame.render_widget(sidebar, area);
            }
            frame.set_cursor_position(composer.cursor_pos(areas.composer));
        })?;

        if snapshot.state.thinking {
            self.app_event_tx
                .send(AppEvent::ScheduleFrameIn(spinner::FRAME_INTERVAL));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn narrow_terminals_hide_the_sidebar() {
        let areas = layout(Rect::new(0, 0, 60, 20), 3, false);
        assert_eq!(areas.sidebar, None);
        assert_eq!(areas.chat, Rect::new(0, 0, 60, 17));
        assert_eq!(areas.composer, Rect::new(0, 17, 60, 3));
    }

    #[test]
    fn wide_terminals_show_sidebar_and_notice() {
        let areas = layout(Rect::new(0, 0, 100, 20), 3, true);
        assert_eq!(areas.sidebar, Some(Rect::new(70, 0, SIDEBAR_WIDTH, 20)));
        assert_eq!(areas.notice, Rect::new(0, 16, 70, 1));
        assert_eq!(areas.chat.height, 16);
    }

    #[test]
    fn turn_errors_are_described_for_the_user() {
        assert_eq!(describe_turn_error(&ChatErr::Interrupted), "Reply cancelled.");
        assert!(
            describe_turn_error(&ChatErr::ConnectionFailure("refused".to_string()))
                .starts_with("Could not reach the model server")
        );
        assert_eq!(
            describe_turn_error(&ChatErr::Server("model not found".to_string())),
            "Reply failed: server error: model not found"
        );
    }

    #[test]
    fn completed_turns_leave_no_notice() {
        assert_eq!(turn_notice(&Ok(TurnOutcome::Completed)), None);
        assert_eq!(
            turn_notice(&Ok(TurnOutcome::CompletedWithoutContent)),
            Some(Notice::info("The model finished without replying."))
        );
        assert_eq!(
            turn_notice(&Err("Reply cancelled.".to_string())),
            Some(Notice::error("Reply cancelled."))
        );
    }
}
