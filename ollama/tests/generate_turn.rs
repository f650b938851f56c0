#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::time::Duration;

use localchat_core::ChatErr;
use localchat_core::ConversationStore;
use localchat_core::SharedStore;
use localchat_core::TurnOptions;
use localchat_core::protocol::Message;
use localchat_core::protocol::ModelVariant;
use localchat_core::protocol::TurnOutcome;
use localchat_core::run_turn;
use localchat_ollama::OllamaClient;
use pretty_assertions::assert_eq;
use wiremock::Mock;
use wiremock::MockServer;
use wiremock::ResponseTemplate;
use wiremock::matchers::method;
use wiremock::matchers::path;

const MODEL: &str = "deepseek-r1:1.5b";

fn store_with_prompt(prompt: &str) -> SharedStore {
    let mut store = ConversationStore::new(ModelVariant::Small);
    store.append_user_turn(prompt).unwrap();
    store.into_shared()
}

fn messages(store: &SharedStore) -> Vec<Message> {
    store.lock().unwrap().messages().to_vec()
}

fn assert_idle(store: &SharedStore) {
    let state = store.lock().unwrap().state();
    assert!(!state.thinking && !state.streaming, "flags left set: {state:?}");
}

async fn server_replying(body: &str) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(body.to_string(), "application/x-ndjson"),
        )
        .expect(1)
        .mount(&server)
        .await;
    server
}

fn options() -> TurnOptions {
    TurnOptions {
        idle_timeout: Some(Duration::from_secs(5)),
        ..TurnOptions::default()
    }
}

#[tokio::test]
async fn streamed_reply_is_assembled_in_order() {
    let body = concat!(
        "{\"model\":\"deepseek-r1:1.5b\",\"response\":\"Hel\",\"done\":false}\n",
        "{\"model\":\"deepseek-r1:1.5b\",\"response\":\"lo\",\"done\":false}\n",
        "{\"model\":\"deepseek-r1:1.5b\",\"response\":\"\",\"done\":true,\"total_duration\":1}\n",
    );
    let server = server_replying(body).await;
    let client = OllamaClient::from_host_root(server.uri());
    let store = store_with_prompt("hi");

    let outcome = run_turn(&store, &client, MODEL, "hi", options())
        .await
        .unwrap();

    assert_eq!(outcome, TurnOutcome::Completed);
    assert_eq!(
        messages(&store),
        vec![Message::user("hi"), Message::assistant("Hello")]
    );
    assert_idle(&store);
}

#[tokio::test]
async fn single_combined_chunk_completes_the_turn() {
    let server = server_replying("{\"response\":\"Hi\",\"done\":true}").await;
    let client = OllamaClient::from_host_root(server.uri());
    let store = store_with_prompt("hi");

    run_turn(&store, &client, MODEL, "hi", options())
        .await
        .unwrap();

    assert_eq!(messages(&store)[1], Message::assistant("Hi"));
    assert_idle(&store);
}

#[tokio::test]
async fn garbage_lines_are_skipped() {
    let body = "{\"response\":\"a\"}\n<html>oops</html>\n{\"response\":\"b\"}\n{\"done\":true}\n";
    let server = server_replying(body).await;
    let client = OllamaClient::from_host_root(server.uri());
    let store = store_with_prompt("hi");

    run_turn(&store, &client, MODEL, "hi", options())
        .await
        .unwrap();

    assert_eq!(messages(&store)[1], Message::assistant("ab"));
}

#[tokio::test]
async fn error_status_is_a_connection_failure() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;
    let client = OllamaClient::from_host_root(server.uri());
    let store = store_with_prompt("hi");

    let err = run_turn(&store, &client, MODEL, "hi", options())
        .await
        .unwrap_err();

    assert!(err.is_connection_failure(), "{err:?}");
    assert_eq!(messages(&store), vec![Message::user("hi")]);
    assert_idle(&store);
}

#[tokio::test]
async fn unreachable_server_leaves_transcript_untouched() {
    let client = OllamaClient::from_host_root("http://127.0.0.1:9");
    let store = store_with_prompt("hi");

    let err = run_turn(&store, &client, MODEL, "hi", options())
        .await
        .unwrap_err();

    assert!(matches!(err, ChatErr::ConnectionFailure(_)), "{err:?}");
    assert_eq!(messages(&store), vec![Message::user("hi")]);
    assert_idle(&store);
}

#[tokio::test]
async fn body_without_done_is_interrupted() {
    let server = server_replying("{\"response\":\"half\"}\n").await;
    let client = OllamaClient::from_host_root(server.uri());
    let store = store_with_prompt("hi");

    let err = run_turn(&store, &client, MODEL, "hi", options())
        .await
        .unwrap_err();

    assert!(matches!(err, ChatErr::StreamInterrupted(_)), "{err:?}");
    assert_eq!(messages(&store)[1], Message::assistant("half"));
    assert_idle(&store);
}

#[tokio::test]
async fn slow_headers_can_be_cancelled() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(30)))
        .mount(&server)
        .await;
    let client = OllamaClient::from_host_root(server.uri());
    let store = store_with_prompt("hi");
    let opts = options();
    let cancel = opts.cancel.clone();

    let (result, ()) = tokio::join!(run_turn(&store, &client, MODEL, "hi", opts), async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
    });

    assert!(matches!(result, Err(ChatErr::Interrupted)), "{result:?}");
    assert_eq!(messages(&store), vec![Message::user("hi")]);
    assert_idle(&store);
}
