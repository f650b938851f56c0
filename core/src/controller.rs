//! The streaming controller: runs exactly one request/response cycle per user
//! turn and reconciles the streamed chunks into the conversation store.

use std::future::Future;
use std::sync::MutexGuard;
use std::sync::PoisonError;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use futures::stream::BoxStream;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;
use tracing::trace;
use tracing::warn;

use crate::error::ChatErr;
use crate::error::Precondition;
use crate::error::Result;
use crate::ndjson::LineDecoder;
use crate::protocol::GenerateChunk;
use crate::protocol::GenerateRequest;
use crate::protocol::TurnId;
use crate::protocol::TurnOutcome;
use crate::store::ConversationStore;
use crate::store::SharedStore;
use crate::turn::TurnAction;
use crate::turn::TurnMachine;

/// Raw response body, delivered in transport order.
pub type ByteStream = BoxStream<'static, Result<Bytes>>;

/// The inference endpoint as seen by the controller.
#[async_trait]
pub trait GenerateEndpoint: Send + Sync {
    /// Send `request` and return the body once a 2xx status arrived.
    /// Unreachable servers and non-2xx answers are connection failures;
    /// errors while reading the body surface as items of the stream.
    async fn open_generate_stream(&self, request: &GenerateRequest) -> Result<ByteStream>;
}

#[derive(Debug, Clone, Default)]
pub struct TurnOptions {
    /// Give up when the body stays silent this long.
    pub idle_timeout: Option<Duration>,
    /// Cancelling tears the stream down and ends the turn as interrupted.
    pub cancel: CancellationToken,
}

pub(crate) fn lock(store: &SharedStore) -> MutexGuard<'_, ConversationStore> {
    store.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Owns a started turn until it reaches the terminal state. Dropping the guard
/// without [`TurnGuard::finish`] (an aborted task, an outer timeout) still
/// finishes the turn so the store never stays `thinking`.
pub(crate) struct TurnGuard {
    store: SharedStore,
    turn: TurnId,
    armed: bool,
}

impl TurnGuard {
    /// Wrap a turn whose `begin_turn` already happened.
    pub(crate) fn new(store: SharedStore, turn: TurnId) -> Self {
        Self {
            store,
            turn,
            armed: true,
        }
    }

    fn finish(mut self) -> Result<()> {
        self.armed = false;
        lock(&self.store).finish_turn(self.turn)
    }
}

impl Drop for TurnGuard {
    fn drop(&mut self) {
        if self.armed && lock(&self.store).finish_turn(self.turn).is_ok() {
            warn!("turn {} dropped before finishing; forced idle", self.turn.0);
        }
    }
}

/// Run one turn for `prompt` against `endpoint`.
///
/// Rejected without any effect while another turn is in flight. Otherwise the
/// store always reaches the terminal state (`streaming` and `thinking` false)
/// before this returns, whatever happened on the wire.
pub async fn run_turn(
    store: &SharedStore,
    endpoint: &dyn GenerateEndpoint,
    model: &str,
    prompt: &str,
    options: TurnOptions,
) -> Result<TurnOutcome> {
    let turn = lock(store).begin_turn()?;
    let guard = TurnGuard::new(store.clone(), turn);
    run_started_turn(guard, endpoint, model, prompt, options).await
}

/// Drive a turn whose `begin_turn` already happened under the caller's lock.
pub(crate) async fn run_started_turn(
    guard: TurnGuard,
    endpoint: &dyn GenerateEndpoint,
    model: &str,
    prompt: &str,
    options: TurnOptions,
) -> Result<TurnOutcome> {
    let turn = guard.turn;
    info!("turn {} started with model {model}", turn.0);

    let request = GenerateRequest::streaming(model, prompt);
    let result = drive_turn(&guard.store, turn, endpoint, &request, &options).await;
    let finished = guard.finish();

    // A stale turn means the store was reset underneath us.
    let result = match (result, finished) {
        (Err(ChatErr::Precondition(Precondition::StaleTurn)), _) | (_, Err(_)) => {
            Err(ChatErr::Interrupted)
        }
        (result, Ok(())) => result,
    };
    match &result {
        Ok(outcome) => info!("turn {} finished: {outcome:?}", turn.0),
        Err(err) => warn!("turn {} failed: {err}", turn.0),
    }
    result
}

async fn drive_turn(
    store: &SharedStore,
    turn: TurnId,
    endpoint: &dyn GenerateEndpoint,
    request: &GenerateRequest,
    options: &TurnOptions,
) -> Result<TurnOutcome> {
    let mut stream = tokio::select! {
        biased;
        _ = options.cancel.cancelled() => return Err(ChatErr::Interrupted),
        opened = endpoint.open_generate_stream(request) => opened?,
    };
    lock(store).mark_streaming(turn)?;

    let mut machine = TurnMachine::new();
    let mut decoder = LineDecoder::new();
    loop {
        match next_body_chunk(&mut stream, options).await? {
            Some(Ok(bytes)) => {
                trace!("received {} bytes", bytes.len());
                for decoded in decoder.push(&bytes) {
                    if let Some(outcome) = apply_decoded(store, turn, &mut machine, decoded)? {
                        return Ok(outcome);
                    }
                }
            }
            Some(Err(err)) => {
                machine.fail();
                return Err(err);
            }
            None => {
                if let Some(decoded) = decoder.finish()
                    && let Some(outcome) = apply_decoded(store, turn, &mut machine, decoded)?
                {
                    return Ok(outcome);
                }
                machine.fail();
                return Err(ChatErr::StreamInterrupted(format!(
                    "stream closed before done after {} chunks",
                    machine.chunks_seen()
                )));
            }
        }
    }
}

async fn next_body_chunk(
    stream: &mut ByteStream,
    options: &TurnOptions,
) -> Result<Option<Result<Bytes>>> {
    tokio::select! {
        biased;
        _ = options.cancel.cancelled() => Err(ChatErr::Interrupted),
        next = with_idle_timeout(stream.next(), options.idle_timeout) => next,
    }
}

async fn with_idle_timeout<F: Future>(fut: F, idle: Option<Duration>) -> Result<F::Output> {
    match idle {
        Some(limit) => timeout(limit, fut).await.map_err(|_| {
            ChatErr::StreamInterrupted(format!("no data from server for {limit:?}"))
        }),
        None => Ok(fut.await),
    }
}

fn apply_decoded(
    store: &SharedStore,
    turn: TurnId,
    machine: &mut TurnMachine,
    decoded: Result<String>,
) -> Result<Option<TurnOutcome>> {
    match decoded {
        Ok(line) => apply_line(store, turn, machine, &line),
        Err(err) => {
            warn!("{err}; skipping line");
            Ok(None)
        }
    }
}

/// Parse one line and apply the machine's verdict to the store. Returns the
/// outcome once the turn completed.
fn apply_line(
    store: &SharedStore,
    turn: TurnId,
    machine: &mut TurnMachine,
    line: &str,
) -> Result<Option<TurnOutcome>> {
    let chunk = match GenerateChunk::parse(line) {
        Ok(chunk) => chunk,
        Err(e) => {
            let err = ChatErr::MalformedChunk {
                line: line.to_string(),
                reason: e.to_string(),
            };
            warn!("{err}; skipping line");
            return Ok(None);
        }
    };
    debug!("chunk: {chunk:?}");

    let actions = machine.feed(&chunk);
    let mut store = lock(store);
    store.ensure_active(turn)?;
    for action in actions {
        match action {
            TurnAction::BeginAssistant => {
                store.begin_assistant_turn()?;
            }
            TurnAction::Append(text) => store.append_to_open_assistant_turn(&text)?,
            TurnAction::Finish(outcome) => return Ok(Some(outcome)),
            TurnAction::Fail(message) => return Err(ChatErr::Server(message)),
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]
    use std::sync::Mutex;

    use super::*;
    use crate::protocol::Message;
    use crate::protocol::ModelVariant;
    use crate::protocol::StoreEvent;
    use futures::stream;
    use pretty_assertions::assert_eq;

    enum Script {
        Refuse,
        Body {
            chunks: Vec<Result<Bytes>>,
            then_hang: bool,
        },
    }

    struct ScriptedEndpoint {
        script: Mutex<Option<Script>>,
        requests: Mutex<Vec<GenerateRequest>>,
    }

    impl ScriptedEndpoint {
        fn new(script: Script) -> Self {
            Self {
                script: Mutex::new(Some(script)),
                requests: Mutex::new(Vec::new()),
            }
        }

        fn lines(lines: &[&str]) -> Self {
            let body: String = lines.iter().map(|l| format!("{l}\n")).collect();
            Self::new(Script::Body {
                chunks: vec![Ok(Bytes::from(body))],
                then_hang: false,
            })
        }
    }

    #[async_trait]
    impl GenerateEndpoint for ScriptedEndpoint {
        async fn open_generate_stream(&self, request: &GenerateRequest) -> Result<ByteStream> {
            self.requests.lock().unwrap().push(request.clone());
            match self.script.lock().unwrap().take().expect("endpoint called twice") {
                Script::Refuse => Err(ChatErr::ConnectionFailure("connection refused".into())),
                Script::Body { chunks, then_hang } => {
                    let body = stream::iter(chunks);
                    if then_hang {
                        Ok(body.chain(stream::pending()).boxed())
                    } else {
                        Ok(body.boxed())
                    }
                }
            }
        }
    }

    fn store_with_prompt(prompt: &str) -> SharedStore {
        let mut store = ConversationStore::new(ModelVariant::Small);
        store.append_user_turn(prompt).unwrap();
        store.into_shared()
    }

    fn messages(store: &SharedStore) -> Vec<Message> {
        lock(store).messages().to_vec()
    }

    fn assert_idle(store: &SharedStore) {
        let state = lock(store).state();
        assert!(!state.thinking, "thinking still set");
        assert!(!state.streaming, "streaming still set");
    }

    async fn run(store: &SharedStore, endpoint: &ScriptedEndpoint) -> Result<TurnOutcome> {
        run_turn(store, endpoint, "deepseek-r1:1.5b", "hi", TurnOptions::default()).await
    }

    #[tokio::test]
    async fn streams_chunks_into_one_assistant_message() {
        let store = store_with_prompt("hi");
        let endpoint = ScriptedEndpoint::lines(&[
            r#"{"response":"Hel"}"#,
            r#"{"response":"lo"}"#,
            r#"{"done":true}"#,
        ]);

        let outcome = run(&store, &endpoint).await.unwrap();

        assert_eq!(outcome, TurnOutcome::Completed);
        assert_eq!(
            messages(&store),
            vec![Message::user("hi"), Message::assistant("Hello")]
        );
        assert_idle(&store);
        assert_eq!(
            endpoint.requests.lock().unwrap().as_slice(),
            &[GenerateRequest::streaming("deepseek-r1:1.5b", "hi")]
        );
    }

    #[tokio::test]
    async fn lines_split_across_transport_chunks_are_reassembled() {
        let store = store_with_prompt("hi");
        let body = "{\"response\":\"a\"}\n{\"response\":\"bc\"}\n{\"done\":true}\n";
        let chunks = body
            .as_bytes()
            .chunks(5)
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();
        let endpoint = ScriptedEndpoint::new(Script::Body {
            chunks,
            then_hang: false,
        });

        run(&store, &endpoint).await.unwrap();

        assert_eq!(messages(&store)[1], Message::assistant("abc"));
    }

    #[tokio::test]
    async fn connection_failure_leaves_transcript_untouched() {
        let store = store_with_prompt("hi");
        let endpoint = ScriptedEndpoint::new(Script::Refuse);

        let err = run(&store, &endpoint).await.unwrap_err();

        assert!(err.is_connection_failure(), "unexpected error: {err:?}");
        assert_eq!(messages(&store), vec![Message::user("hi")]);
        assert_idle(&store);
    }

    #[tokio::test]
    async fn combined_text_and_done_chunk() {
        let store = store_with_prompt("hi");
        let endpoint = ScriptedEndpoint::lines(&[r#"{"response":"Hi","done":true}"#]);

        run(&store, &endpoint).await.unwrap();

        assert_eq!(
            messages(&store),
            vec![Message::user("hi"), Message::assistant("Hi")]
        );
        assert_idle(&store);
    }

    #[tokio::test]
    async fn second_turn_is_rejected_while_thinking() {
        let store = store_with_prompt("hi");
        lock(&store).begin_turn().unwrap();
        let endpoint = ScriptedEndpoint::lines(&[r#"{"done":true}"#]);

        let err = run(&store, &endpoint).await.unwrap_err();

        assert!(matches!(
            err,
            ChatErr::Precondition(Precondition::TurnInFlight)
        ));
        assert!(endpoint.requests.lock().unwrap().is_empty());
        assert_eq!(messages(&store), vec![Message::user("hi")]);
        assert!(lock(&store).state().thinking);
    }

    #[tokio::test]
    async fn malformed_lines_do_not_change_the_result() {
        let clean = store_with_prompt("hi");
        run(
            &clean,
            &ScriptedEndpoint::lines(&[
                r#"{"response":"one "}"#,
                r#"{"response":"two"}"#,
                r#"{"done":true}"#,
            ]),
        )
        .await
        .unwrap();

        let noisy = store_with_prompt("hi");
        run(
            &noisy,
            &ScriptedEndpoint::lines(&[
                "not json",
                r#"{"response":"one "}"#,
                "{\"response\":",
                r#"{"response":"two"}"#,
                "]]",
                r#"{"done":true}"#,
            ]),
        )
        .await
        .unwrap();

        assert_eq!(messages(&clean), messages(&noisy));
    }

    #[tokio::test]
    async fn all_malformed_lines_end_as_interrupted() {
        let store = store_with_prompt("hi");
        let endpoint = ScriptedEndpoint::lines(&["garbage", "more garbage"]);

        let err = run(&store, &endpoint).await.unwrap_err();

        assert!(matches!(err, ChatErr::StreamInterrupted(_)), "{err:?}");
        assert_eq!(messages(&store), vec![Message::user("hi")]);
        assert_idle(&store);
    }

    #[tokio::test]
    async fn body_ending_without_done_keeps_partial_content() {
        let store = store_with_prompt("hi");
        let endpoint = ScriptedEndpoint::lines(&[r#"{"response":"partial"}"#]);

        let err = run(&store, &endpoint).await.unwrap_err();

        assert!(matches!(err, ChatErr::StreamInterrupted(_)), "{err:?}");
        assert_eq!(messages(&store)[1], Message::assistant("partial"));
        assert_idle(&store);
    }

    #[tokio::test]
    async fn transport_error_mid_stream_reaches_terminal_state() {
        let store = store_with_prompt("hi");
        let endpoint = ScriptedEndpoint::new(Script::Body {
            chunks: vec![
                Ok(Bytes::from_static(b"{\"response\":\"par\"}\n")),
                Err(ChatErr::StreamInterrupted("connection reset".into())),
            ],
            then_hang: false,
        });

        let err = run(&store, &endpoint).await.unwrap_err();

        assert!(matches!(err, ChatErr::StreamInterrupted(_)), "{err:?}");
        assert_eq!(messages(&store)[1], Message::assistant("par"));
        assert_idle(&store);
    }

    #[tokio::test]
    async fn done_without_content_creates_no_assistant_message() {
        let store = store_with_prompt("hi");
        let endpoint = ScriptedEndpoint::lines(&[r#"{"done":false}"#, r#"{"done":true}"#]);

        let outcome = run(&store, &endpoint).await.unwrap();

        assert_eq!(outcome, TurnOutcome::CompletedWithoutContent);
        assert_eq!(messages(&store), vec![Message::user("hi")]);
        assert_idle(&store);
    }

    #[tokio::test]
    async fn unterminated_final_line_is_applied() {
        let store = store_with_prompt("hi");
        let endpoint = ScriptedEndpoint::new(Script::Body {
            chunks: vec![Ok(Bytes::from_static(
                b"{\"response\":\"ok\"}\n{\"done\":true}",
            ))],
            then_hang: false,
        });

        assert_eq!(run(&store, &endpoint).await.unwrap(), TurnOutcome::Completed);
    }

    #[tokio::test]
    async fn server_error_chunk_fails_the_turn() {
        let store = store_with_prompt("hi");
        let endpoint = ScriptedEndpoint::lines(&[r#"{"error":"model 'x' not found"}"#]);

        let err = run(&store, &endpoint).await.unwrap_err();

        assert!(matches!(err, ChatErr::Server(ref m) if m == "model 'x' not found"));
        assert_idle(&store);
    }

    #[tokio::test]
    async fn cancellation_mid_stream_forces_terminal_state() {
        let store = store_with_prompt("hi");
        let mut events = lock(&store).subscribe();
        let endpoint = ScriptedEndpoint::new(Script::Body {
            chunks: vec![Ok(Bytes::from_static(b"{\"response\":\"thinking\"}\n"))],
            then_hang: true,
        });
        let options = TurnOptions::default();
        let cancel = options.cancel.clone();

        let (result, ()) = tokio::join!(
            run_turn(&store, &endpoint, "m", "hi", options),
            async move {
                while let Some(event) = events.recv().await {
                    if matches!(event, StoreEvent::AssistantDelta { .. }) {
                        cancel.cancel();
                        break;
                    }
                }
            }
        );

        assert!(matches!(result, Err(ChatErr::Interrupted)));
        assert_eq!(messages(&store)[1], Message::assistant("thinking"));
        assert_idle(&store);
    }

    #[tokio::test]
    async fn silent_stream_hits_idle_timeout() {
        let store = store_with_prompt("hi");
        let endpoint = ScriptedEndpoint::new(Script::Body {
            chunks: Vec::new(),
            then_hang: true,
        });
        let options = TurnOptions {
            idle_timeout: Some(Duration::from_millis(20)),
            ..TurnOptions::default()
        };

        let err = run_turn(&store, &endpoint, "m", "hi", options)
            .await
            .unwrap_err();

        assert!(matches!(err, ChatErr::StreamInterrupted(_)), "{err:?}");
        assert_idle(&store);
    }

    #[tokio::test]
    async fn invalid_utf8_line_is_skipped() {
        let store = store_with_prompt("hi");
        let endpoint = ScriptedEndpoint::new(Script::Body {
            chunks: vec![Ok(Bytes::from_static(
                b"{\"response\":\"a\"}\n{\"response\":\"\xff\"}\n{\"response\":\"b\"}\n{\"done\":true}\n",
            ))],
            then_hang: false,
        });

        run(&store, &endpoint).await.unwrap();

        assert_eq!(messages(&store)[1], Message::assistant("ab"));
        assert_idle(&store);
    }

    #[tokio::test]
    async fn dropped_turn_future_still_reaches_terminal_state() {
        let store = store_with_prompt("hi");
        let endpoint = ScriptedEndpoint::new(Script::Body {
            chunks: vec![Ok(Bytes::from_static(b"{\"response\":\"par\"}\n"))],
            then_hang: true,
        });

        let timed_out = timeout(Duration::from_millis(50), run(&store, &endpoint)).await;

        assert!(timed_out.is_err());
        assert_eq!(messages(&store)[1], Message::assistant("par"));
        assert_idle(&store);
        lock(&store).begin_turn().unwrap();
    }

    #[tokio::test]
    async fn reset_during_turn_interrupts_it() {
        let store = store_with_prompt("hi");
        let mut events = lock(&store).subscribe();
        let endpoint = ScriptedEndpoint::new(Script::Body {
            chunks: vec![
                Ok(Bytes::from_static(b"{\"response\":\"a\"}\n")),
                Ok(Bytes::from_static(b"{\"response\":\"b\"}\n")),
            ],
            then_hang: true,
        });
        let options = TurnOptions {
            idle_timeout: Some(Duration::from_millis(50)),
            ..TurnOptions::default()
        };

        let store_for_reset = store.clone();
        let (result, ()) = tokio::join!(
            run_turn(&store, &endpoint, "m", "hi", options),
            async move {
                while let Some(event) = events.recv().await {
                    if matches!(event, StoreEvent::AssistantTurnStarted { .. }) {
                        lock(&store_for_reset).reset();
                        break;
                    }
                }
            }
        );

        assert!(matches!(result, Err(ChatErr::Interrupted)), "{result:?}");
        assert!(messages(&store).is_empty());
        assert_idle(&store);
    }
}
