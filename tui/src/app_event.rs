use std::time::Duration;

use crossterm::event::KeyEvent;
use localchat_core::protocol::TurnOutcome;
use localchat_core::system::DeviceStats;
use localchat_ollama::ServerStatus;

#[derive(Debug)]
pub(crate) enum AppEvent {
    KeyEvent(KeyEvent),

    /// Text pasted from the terminal into the composer.
    Paste(String),

    /// Request a redraw which will be debounced by the [`App`].
    RequestRedraw,

    /// Actually draw the next frame.
    Redraw,

    /// Schedule a one-shot animation frame roughly after the given duration.
    ScheduleFrameIn(Duration),

    /// The conversation store changed.
    StoreChanged,

    /// The background turn task ended. Failures are pre-rendered for display.
    TurnEnded(Result<TurnOutcome, String>),

    DeviceStats(DeviceStats),

    ServerStatus(ServerStatus),

    /// The optimize command finished; the payload is its one-line summary.
    OptimizeFinished(String),

    ExitRequest,
}
