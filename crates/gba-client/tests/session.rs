mod common;

use common::*;
use gba_client::{ChatOptions, ChatSession, TestConnectionStatus, ViewCapabilities};
use gba_core::{ConnectionState, ModelConfig, Role};
use serde_json::json;
use std::time::Duration;

fn model_config() -> ModelConfig {
    ModelConfig {
        api_base_url: "https://dashscope.example.test/v1".to_string(),
        api_key: "sk-live".to_string(),
        model_name: "qwen-max".to_string(),
    }
}

async fn wait_until<F>(session: &ChatSession, mut done: F)
where
    F: FnMut(&ChatSession) -> bool,
{
    let mut revisions = session.subscribe();
    tokio::time::timeout(WAIT, async {
        while !done(session) {
            if revisions.changed().await.is_err() {
                break;
            }
        }
    })
    .await
    .expect("session condition timed out");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn show_me_tp53_end_to_end() {
    let (listener, url) = listen().await;
    let view = ucsc_view(ViewCapabilities::both());
    let channel = channel_for(url, gateway_for(view.clone()), Duration::from_millis(20));
    let mut session = ChatSession::new(channel, model_config(), ChatOptions::default());

    let (started, mut peer) = tokio::join!(session.start(), accept(&listener));
    started.expect("start");

    session.send_user_message("hello").expect("first send");
    let first = recv_json(&mut peer).await;
    assert_eq!(first["messages"], json!([{"role": "user", "content": "hello"}]));
    assert!(session.is_loading());
    send_json(&mut peer, json!({"type": "ai_response", "response": {"content": "Hi! Ask me about a gene."}})).await;
    wait_until(&session, |s| !s.is_loading()).await;

    session.send_user_message("Show me TP53").expect("second send");
    let query = recv_json(&mut peer).await;
    assert_eq!(query["query"], "Show me TP53");
    assert_eq!(
        query["messages"],
        json!([
            {"role": "user", "content": "hello"},
            {"role": "assistant", "content": "Hi! Ask me about a gene."},
            {"role": "user", "content": "Show me TP53"}
        ])
    );
    assert_eq!(query["ai_model_config"]["apiKey"], "sk-live");
    assert_eq!(query["ai_model_config"]["modelName"], "qwen-max");

    send_json(&mut peer, navigation_command("tp53-nav", "17", 7_661_779, 7_687_550)).await;
    let response = recv_json(&mut peer).await;
    assert_eq!(
        response,
        json!({
            "type": "navigation_response",
            "requestId": "tp53-nav",
            "status": "success",
            "message": "Successfully navigated to chr17:7661779..7687550",
            "location": {"chromosome": "chr17", "start": 7661779, "end": 7687550}
        })
    );
    assert_eq!(view.loc_string_calls(), vec!["chr17:7661779..7687550"]);

    send_json(&mut peer, json!({"type": "ai_response", "response": {"content": "Showing TP53."}})).await;
    wait_until(&session, |s| s.messages().len() == 4).await;

    let messages = session.messages();
    let assistants: Vec<_> = messages
        .iter()
        .filter(|message| message.sender == Role::Assistant)
        .map(|message| message.content.as_str())
        .collect();
    assert_eq!(assistants, vec!["Hi! Ask me about a gene.", "Showing TP53."]);
    assert!(!session.is_loading());

    session.shutdown().await;
    assert_eq!(session.connection_state(), ConnectionState::Disconnected);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn dropped_connection_never_leaves_loading_stuck() {
    let (listener, url) = listen().await;
    let channel = channel_for(
        url,
        gateway_for(ucsc_view(ViewCapabilities::both())),
        Duration::from_secs(5),
    );
    let session = ChatSession::new(channel, model_config(), ChatOptions::default());
    let (started, mut peer) = tokio::join!(session.start(), accept(&listener));
    started.expect("start");

    session.send_user_message("are you there?").expect("send");
    recv_json(&mut peer).await;
    assert!(session.is_loading());

    drop(peer);
    wait_until(&session, |s| !s.is_loading()).await;
    assert_eq!(session.connection_state(), ConnectionState::Reconnecting);

    let err = session
        .send_user_message("hello again")
        .expect_err("not connected");
    assert!(err.to_string().contains("not connected"));
    let last = session.messages().pop().expect("error message");
    assert_eq!(last.sender, Role::Assistant);
    assert!(last.content.starts_with("Failed to send message"));
    assert!(!session.is_loading());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn connection_test_round_trip() {
    let (listener, url) = listen().await;
    let channel = channel_for(
        url,
        gateway_for(ucsc_view(ViewCapabilities::both())),
        Duration::from_millis(20),
    );
    let session = ChatSession::new(channel, ModelConfig::default(), ChatOptions::default());
    let (started, mut peer) = tokio::join!(session.start(), accept(&listener));
    started.expect("start");

    session.test_connection(&model_config()).expect("send test");
    assert_eq!(session.test_status().0, TestConnectionStatus::Testing);

    let frame = recv_json(&mut peer).await;
    assert_eq!(frame["type"], "test_connection");
    assert_eq!(frame["config"]["apiKey"], "sk-live");

    send_json(
        &mut peer,
        json!({"type": "test_connection_result", "success": false, "message": "invalid api key"}),
    )
    .await;
    wait_until(&session, |s| s.test_status().0 != TestConnectionStatus::Testing).await;
    assert_eq!(
        session.test_status(),
        (TestConnectionStatus::Error, Some("invalid api key".to_string()))
    );
    assert!(session.messages().is_empty());
}
