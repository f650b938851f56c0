#[derive(Debug)]
pub enum ClipboardError {
    Unavailable(String),
    WriteFailed(String),
}

impl std::fmt::Display for ClipboardError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClipboardError::Unavailable(msg) => write!(f, "clipboard unavailable: {msg}"),
            ClipboardError::WriteFailed(msg) => write!(f, "could not copy: {msg}"),
        }
    }
}
impl std::error::Error for ClipboardError {}

#[cfg(not(target_os = "android"))]
pub fn copy_text(text: &str) -> Result<(), ClipboardError> {
    tracing::debug!("copying {} bytes to the clipboard", text.len());
    let mut cb = arboard::Clipboard::new()
        .map_err(|e| ClipboardError::Unavailable(e.to_string()))?;
    cb.set_text(text.to_string())
        .map_err(|e| ClipboardError::WriteFailed(e.to_string()))
}

#[cfg(target_os = "android")]
pub fn copy_text(_text: &str) -> Result<(), ClipboardError> {
    Err(ClipboardError::Unavailable(
        "not supported on this platform".to_string(),
    ))
}
