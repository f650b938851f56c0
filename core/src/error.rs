use std::io;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ChatErr>;

/// Why a store or session operation refused to run. Rejections never change
/// state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precondition {
    /// The submitted text is empty after trimming.
    EmptyInput,
    /// A turn is already pending or streaming.
    TurnInFlight,
    /// `begin_assistant_turn` needs a trailing user message.
    NoUserTurn,
    /// Appending needs a trailing assistant message.
    NoOpenAssistantTurn,
    /// The turn this mutation belongs to was reset or already finished.
    StaleTurn,
}

impl std::fmt::Display for Precondition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Precondition::EmptyInput => "message is empty",
            Precondition::TurnInFlight => "a response is still being generated",
            Precondition::NoUserTurn => "no user message to answer",
            Precondition::NoOpenAssistantTurn => "no assistant message is open",
            Precondition::StaleTurn => "turn is no longer active",
        };
        f.write_str(text)
    }
}

#[derive(Error, Debug)]
pub enum ChatErr {
    #[error("rejected: {0}")]
    Precondition(Precondition),

    /// The inference server could not be reached.
    #[error("connection failed: {0}")]
    ConnectionFailure(String),

    /// The inference server answered with a non-2xx status.
    #[error("unexpected status {status}: {body}")]
    UnexpectedStatus { status: u16, body: String },

    /// The body ended or errored before a chunk with `done: true` arrived.
    #[error("stream interrupted: {0}")]
    StreamInterrupted(String),

    /// One line of the body was not a valid chunk. Skipped by the controller.
    #[error("malformed chunk `{line}`: {reason}")]
    MalformedChunk { line: String, reason: String },

    /// The server reported an error inside the stream.
    #[error("server error: {0}")]
    Server(String),

    /// The turn was cancelled before it completed.
    #[error("interrupted")]
    Interrupted,

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Toml(#[from] toml::de::Error),
}

impl ChatErr {
    /// True when the server was never reached or refused the request.
    pub fn is_connection_failure(&self) -> bool {
        matches!(
            self,
            ChatErr::ConnectionFailure(_) | ChatErr::UnexpectedStatus { .. }
        )
    }
}

impl From<Precondition> for ChatErr {
    fn from(value: Precondition) -> Self {
        ChatErr::Precondition(value)
    }
}
