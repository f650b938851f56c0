//! Pure per-turn state machine.
//!
//! `TurnMachine` decides what each incoming chunk means for the transcript
//! without touching it: the controller feeds chunks in arrival order and
//! applies the returned [`TurnAction`]s to the store. Keeping the decisions
//! here lets the chunk bookkeeping be tested without any transport.

use crate::protocol::GenerateChunk;
use crate::protocol::TurnOutcome;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnPhase {
    /// Request sent, no content-bearing chunk yet.
    AwaitingFirstChunk,
    /// The assistant message is open and receiving text.
    Streaming,
    /// Terminal: the server sent `done`.
    Completed(TurnOutcome),
    /// Terminal: transport failure, server error or cancellation.
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnAction {
    BeginAssistant,
    Append(String),
    Finish(TurnOutcome),
    Fail(String),
}

#[derive(Debug)]
pub struct TurnMachine {
    phase: TurnPhase,
    chunks_seen: usize,
}

impl Default for TurnMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl TurnMachine {
    pub fn new() -> Self {
        Self {
            phase: TurnPhase::AwaitingFirstChunk,
            chunks_seen: 0,
        }
    }

    pub fn phase(&self) -> TurnPhase {
        self.phase
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.phase, TurnPhase::Completed(_) | TurnPhase::Failed)
    }

    pub fn chunks_seen(&self) -> usize {
        self.chunks_seen
    }

    /// Interpret one parsed chunk. Text is appended before the chunk's
    /// terminal flag is honoured, so `{"response":"Hi","done":true}` yields
    /// the append and then the finish.
    pub fn feed(&mut self, chunk: &GenerateChunk) -> Vec<TurnAction> {
        if self.is_terminal() {
            return Vec::new();
        }
        self.chunks_seen += 1;
        let first_chunk = self.chunks_seen == 1;
        let mut actions = Vec::new();

        if let Some(text) = chunk.response.as_deref() {
            // An empty fragment only opens the assistant message when it is
            // the very first chunk of the turn.
            if self.phase == TurnPhase::AwaitingFirstChunk && (!text.is_empty() || first_chunk) {
                actions.push(TurnAction::BeginAssistant);
                self.phase = TurnPhase::Streaming;
            }
            if self.phase == TurnPhase::Streaming && !text.is_empty() {
                actions.push(TurnAction::Append(text.to_string()));
            }
        }

        if let Some(message) = chunk.error.as_deref() {
            self.phase = TurnPhase::Failed;
            actions.push(TurnAction::Fail(message.to_string()));
            return actions;
        }

        if chunk.done {
            let outcome = if self.phase == TurnPhase::Streaming {
                TurnOutcome::Completed
            } else {
                TurnOutcome::CompletedWithoutContent
            };
            self.phase = TurnPhase::Completed(outcome);
            actions.push(TurnAction::Finish(outcome));
        }
        actions
    }

    /// Move to the failed terminal phase. Returns false when the turn had
    /// already ended.
    pub fn fail(&mut self) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.phase = TurnPhase::Failed;
        true
    }
}
