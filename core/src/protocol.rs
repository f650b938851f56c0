//! Types shared between the conversation store, the streaming controller and
//! the presentation layer.

use serde::Deserialize;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// The two model sizes offered in the model picker. The concrete model tag
/// sent to the server comes from the config.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelVariant {
    #[default]
    Small,
    Large,
}

impl ModelVariant {
    pub fn toggled(self) -> Self {
        match self {
            ModelVariant::Small => ModelVariant::Large,
            ModelVariant::Large => ModelVariant::Small,
        }
    }

    /// Hardware advisory shown when the variant is selected.
    pub fn advisory(self) -> Option<&'static str> {
        match self {
            ModelVariant::Small => None,
            ModelVariant::Large => Some(
                "The large model needs a Snapdragon 8 Gen 2/3 class SoC and 12GB+ RAM for acceptable performance.",
            ),
        }
    }
}

impl std::fmt::Display for ModelVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModelVariant::Small => f.write_str("small"),
            ModelVariant::Large => f.write_str("large"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SessionState {
    pub model: ModelVariant,
    /// A turn has been submitted and its response is pending or in progress.
    pub thinking: bool,
    /// The HTTP stream for the current turn is open. Implies `thinking`.
    pub streaming: bool,
}

/// Body of `POST /api/generate`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GenerateRequest {
    pub model: String,
    pub prompt: String,
    pub stream: bool,
}

impl GenerateRequest {
    pub fn streaming(model: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            prompt: prompt.into(),
            stream: true,
        }
    }
}

/// One NDJSON line of the generate stream. Fields the client does not use
/// (timings, context, ...) are ignored.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
pub struct GenerateChunk {
    #[serde(default)]
    pub response: Option<String>,
    #[serde(default)]
    pub done: bool,
    #[serde(default)]
    pub error: Option<String>,
}

impl GenerateChunk {
    pub fn parse(line: &str) -> serde_json::Result<Self> {
        serde_json::from_str(line)
    }
}

/// Generation number binding controller mutations to a single turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TurnId(pub u64);

/// Notification fired once per store mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    UserTurnAppended { index: usize },
    ThinkingStarted { turn: TurnId },
    StreamingStarted { turn: TurnId },
    AssistantTurnStarted { index: usize },
    AssistantDelta { index: usize, delta: String },
    TurnFinished { turn: TurnId },
    ModelChanged { model: ModelVariant },
    Reset,
}

/// How a turn that reached the terminal state successfully ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnOutcome {
    /// `done` arrived after at least one content-bearing chunk.
    Completed,
    /// `done` arrived before any content; no assistant message was created.
    CompletedWithoutContent,
}
