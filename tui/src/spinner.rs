use std::time::Duration;

const FRAMES: [&str; 10] = ["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];

pub(crate) const FRAME_INTERVAL: Duration = Duration::from_millis(80);

pub(crate) fn frame_at(elapsed: Duration) -> &'static str {
    let idx = (elapsed.as_millis() / FRAME_INTERVAL.as_millis()) as usize % FRAMES.len();
    FRAMES[idx]
}
