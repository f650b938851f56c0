//! Root of the `localchat-core` library.

// Prevent accidental direct writes to stdout/stderr in library code. All
// user-visible output must go through the appropriate abstraction (e.g.,
// the TUI or the tracing stack).
#![deny(clippy::print_stdout, clippy::print_stderr)]

pub mod config;
pub mod controller;
pub mod error;
pub mod ndjson;
pub mod protocol;
pub mod session;
pub mod store;
pub mod system;
pub mod turn;

pub use config::Config;
pub use config::ConfigOverrides;
pub use controller::ByteStream;
pub use controller::GenerateEndpoint;
pub use controller::TurnOptions;
pub use controller::run_turn;
pub use error::ChatErr;
pub use error::Precondition;
pub use session::Session;
pub use session::SessionSnapshot;
pub use store::ConversationStore;
pub use store::SharedStore;
