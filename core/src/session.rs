//! One chat session: the store, the endpoint it talks to and the turn
//! currently in flight.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;

use crate::config::Config;
use crate::controller::GenerateEndpoint;
use crate::controller::TurnGuard;
use crate::controller::TurnOptions;
use crate::controller::lock;
use crate::controller::run_started_turn;
use crate::error::Precondition;
use crate::error::Result;
use crate::protocol::Message;
use crate::protocol::ModelVariant;
use crate::protocol::SessionState;
use crate::protocol::StoreEvent;
use crate::protocol::TurnOutcome;
use crate::store::ConversationStore;
use crate::store::SharedStore;

/// Copy of the store taken under the lock, for rendering.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SessionSnapshot {
    pub messages: Vec<Message>,
    pub state: SessionState,
}

pub struct Session {
    store: SharedStore,
    endpoint: Arc<dyn GenerateEndpoint>,
    small_model: String,
    large_model: String,
    idle_timeout: Option<Duration>,
    in_flight: Option<CancellationToken>,
}

impl Session {
    pub fn new(config: &Config, endpoint: Arc<dyn GenerateEndpoint>) -> Self {
        Self {
            store: ConversationStore::new(config.default_variant).into_shared(),
            endpoint,
            small_model: config.small_model.clone(),
            large_model: config.large_model.clone(),
            idle_timeout: Some(config.stream_idle_timeout),
            in_flight: None,
        }
    }

    pub fn store(&self) -> SharedStore {
        self.store.clone()
    }

    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<StoreEvent> {
        lock(&self.store).subscribe()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let store = lock(&self.store);
        SessionSnapshot {
            messages: store.messages().to_vec(),
            state: store.state(),
        }
    }

    pub fn state(&self) -> SessionState {
        lock(&self.store).state()
    }

    /// Model tag sent to the server for `variant`.
    pub fn model_tag(&self, variant: ModelVariant) -> &str {
        match variant {
            ModelVariant::Small => &self.small_model,
            ModelVariant::Large => &self.large_model,
        }
    }

    /// Append `text` as a user turn and start streaming the reply in the
    /// background. The user message and the start of the turn happen under
    /// one lock, so a second submit can never slip in between.
    pub fn submit(&mut self, text: &str) -> Result<JoinHandle<Result<TurnOutcome>>> {
        let (turn, prompt, model) = {
            let mut store = lock(&self.store);
            let index = store.append_user_turn(text)?;
            let turn = store.begin_turn()?;
            let prompt = store
                .messages()
                .get(index)
                .map(|m| m.content.clone())
                .unwrap_or_default();
            let model = self.model_tag(store.state().model).to_string();
            (turn, prompt, model)
        };

        let cancel = CancellationToken::new();
        let options = TurnOptions {
            idle_timeout: self.idle_timeout,
            cancel: cancel.clone(),
        };
        self.in_flight = Some(cancel);

        // Built outside the task so an abort before the first poll still
        // finishes the turn.
        let guard = TurnGuard::new(self.store.clone(), turn);
        let endpoint = self.endpoint.clone();
        Ok(tokio::spawn(async move {
            run_started_turn(guard, endpoint.as_ref(), &model, &prompt, options).await
        }))
    }

    /// Cancel the turn in flight, if any. Returns whether a turn was running.
    pub fn cancel_turn(&mut self) -> bool {
        let thinking = lock(&self.store).state().thinking;
        if let Some(cancel) = self.in_flight.take() {
            cancel.cancel();
        }
        if thinking {
            info!("turn cancelled by user");
        }
        thinking
    }

    /// Start over with an empty transcript. Rejected while a turn is running.
    pub fn clear(&mut self) -> Result<()> {
        let mut store = lock(&self.store);
        if store.state().thinking {
            return Err(Precondition::TurnInFlight.into());
        }
        store.reset();
        debug!("conversation cleared");
        Ok(())
    }

    /// Switch model variant, which also starts a new conversation. Rejected
    /// while a turn is running.
    pub fn set_model(&mut self, variant: ModelVariant) -> Result<()> {
        let mut store = lock(&self.store);
        if store.state().thinking {
            return Err(Precondition::TurnInFlight.into());
        }
        store.set_model(variant);
        info!("model switched to {variant} ({})", self.model_tag(variant));
        Ok(())
    }

    /// Cancel any turn in flight and wait until the store is idle.
    pub async fn shutdown(&mut self) {
        let mut events = {
            let mut store = lock(&self.store);
            if !store.state().thinking {
                return;
            }
            store.subscribe()
        };
        if let Some(cancel) = self.in_flight.take() {
            cancel.cancel();
        }
        while let Some(event) = events.recv().await {
            if matches!(
                event,
                StoreEvent::TurnFinished { .. } | StoreEvent::Reset | StoreEvent::ModelChanged { .. }
            ) {
                break;
            }
        }
        debug!("session shut down");
    }
}
