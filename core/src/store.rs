//! The conversation store: the ordered transcript plus the session flags.
//!
//! The store performs no I/O. Every operation is synchronous and either
//! applies completely or is rejected with a [`Precondition`] and leaves the
//! state untouched. Each applied mutation is announced to subscribers exactly
//! once as a [`StoreEvent`].

use std::sync::Arc;
use std::sync::Mutex;

use tokio::sync::mpsc;
use tracing::debug;

use crate::error::Precondition;
use crate::error::Result;
use crate::protocol::Message;
use crate::protocol::ModelVariant;
use crate::protocol::Role;
use crate::protocol::SessionState;
use crate::protocol::StoreEvent;
use crate::protocol::TurnId;

/// A store shared between the streaming controller and the presentation
/// layer. String appends are order dependent, so every mutation goes through
/// the mutex; the lock is never held across an `.await`.
pub type SharedStore = Arc<Mutex<ConversationStore>>;

#[derive(Debug, Default)]
pub struct ConversationStore {
    messages: Vec<Message>,
    state: SessionState,
    active_turn: Option<TurnId>,
    next_turn: u64,
    subscribers: Vec<mpsc::UnboundedSender<StoreEvent>>,
}

impl ConversationStore {
    pub fn new(model: ModelVariant) -> Self {
        Self {
            state: SessionState {
                model,
                ..SessionState::default()
            },
            ..Self::default()
        }
    }

    pub fn into_shared(self) -> SharedStore {
        Arc::new(Mutex::new(self))
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn active_turn(&self) -> Option<TurnId> {
        self.active_turn
    }

    /// Register an observer. The receiver gets one event per mutation until
    /// it is dropped.
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<StoreEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.push(tx);
        rx
    }

    /// Append a user message. Rejected while a turn is in flight or when the
    /// text is blank. The stored content is trimmed.
    pub fn append_user_turn(&mut self, text: &str) -> Result<usize> {
        let text = text.trim();
        if text.is_empty() {
            return Err(Precondition::EmptyInput.into());
        }
        if self.state.thinking {
            return Err(Precondition::TurnInFlight.into());
        }
        self.messages.push(Message::user(text));
        let index = self.messages.len() - 1;
        self.notify(StoreEvent::UserTurnAppended { index });
        Ok(index)
    }

    /// Open an empty assistant message answering the trailing user message.
    pub fn begin_assistant_turn(&mut self) -> Result<usize> {
        match self.messages.last() {
            Some(last) if last.role == Role::User => {}
            _ => return Err(Precondition::NoUserTurn.into()),
        }
        self.messages.push(Message::assistant(""));
        let index = self.messages.len() - 1;
        self.notify(StoreEvent::AssistantTurnStarted { index });
        Ok(index)
    }

    /// Grow the trailing assistant message. An empty delta leaves the content
    /// unchanged and emits nothing.
    pub fn append_to_open_assistant_turn(&mut self, delta: &str) -> Result<()> {
        let index = self.messages.len().saturating_sub(1);
        let Some(last) = self.messages.last_mut() else {
            return Err(Precondition::NoOpenAssistantTurn.into());
        };
        if last.role != Role::Assistant {
            return Err(Precondition::NoOpenAssistantTurn.into());
        }
        if delta.is_empty() {
            return Ok(());
        }
        last.content.push_str(delta);
        self.notify(StoreEvent::AssistantDelta {
            index,
            delta: delta.to_string(),
        });
        Ok(())
    }

    /// Clear the transcript and reset the flags. The selected model is kept.
    /// Any turn still bound to this store becomes stale.
    pub fn reset(&mut self) {
        if let Some(turn) = self.active_turn.take() {
            debug!("reset invalidates in-flight turn {}", turn.0);
        }
        self.messages.clear();
        self.state = SessionState {
            model: self.state.model,
            ..SessionState::default()
        };
        self.notify(StoreEvent::Reset);
    }

    /// Select another model. Switching models starts a fresh conversation, so
    /// this also clears the transcript and flags.
    pub fn set_model(&mut self, model: ModelVariant) {
        self.active_turn = None;
        self.messages.clear();
        self.state = SessionState {
            model,
            ..SessionState::default()
        };
        self.notify(StoreEvent::ModelChanged { model });
    }

    /// Start a turn: `thinking` goes true and the returned id binds the
    /// controller's later mutations to this turn.
    pub fn begin_turn(&mut self) -> Result<TurnId> {
        if self.state.thinking {
            return Err(Precondition::TurnInFlight.into());
        }
        self.next_turn += 1;
        let turn = TurnId(self.next_turn);
        self.active_turn = Some(turn);
        self.state.thinking = true;
        self.notify(StoreEvent::ThinkingStarted { turn });
        Ok(turn)
    }

    pub fn ensure_active(&self, turn: TurnId) -> Result<()> {
        if self.active_turn == Some(turn) {
            Ok(())
        } else {
            Err(Precondition::StaleTurn.into())
        }
    }

    pub fn mark_streaming(&mut self, turn: TurnId) -> Result<()> {
        self.ensure_active(turn)?;
        self.state.streaming = true;
        self.notify(StoreEvent::StreamingStarted { turn });
        Ok(())
    }

    /// Terminal transition: `streaming` then `thinking` go false. Succeeds once
    /// per turn; later calls see a stale turn.
    pub fn finish_turn(&mut self, turn: TurnId) -> Result<()> {
        self.ensure_active(turn)?;
        self.state.streaming = false;
        self.state.thinking = false;
        self.active_turn = None;
        self.notify(StoreEvent::TurnFinished { turn });
        Ok(())
    }

    fn notify(&mut self, event: StoreEvent) {
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }
}
