//! HTTP client for a local Ollama server.

#![deny(clippy::print_stdout, clippy::print_stderr)]

mod client;
mod url;

pub use client::OllamaClient;
pub use client::ServerStatus;
pub use url::base_url_to_host_root;
