//! End-to-end flows: dispatcher + session store + mock Ollama.

use relay_bot::recording::{Outbound, RecordingTransport};
use relay_bot::{
    CallbackQuery, ChatMessage, Dispatcher, HistoryStore, InboundEvent, OllamaClient,
    SessionManager, Settings, Turn,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

struct Harness {
    tmp: TempDir,
    sessions: Arc<SessionManager>,
    transport: Arc<RecordingTransport>,
    dispatcher: Dispatcher,
}

impl Harness {
    fn new(ollama: &MockServer) -> Self {
        let tmp = TempDir::new().unwrap();
        let sessions = Arc::new(SessionManager::open(
            HistoryStore::new(tmp.path().join("suser_histories.json")),
            "default",
        ));
        let transport = Arc::new(RecordingTransport::new());
        let dispatcher = Dispatcher::new(
            sessions.clone(),
            Arc::new(OllamaClient::new(&ollama.uri(), Duration::from_secs(5))),
            transport.clone(),
            Arc::new(Settings::new("1", false)),
            "llama3",
        );
        Self {
            tmp,
            sessions,
            transport,
            dispatcher,
        }
    }

    async fn say(&self, user: &str, text: &str) {
        self.dispatcher
            .dispatch(InboundEvent::Message(ChatMessage {
                id: 1,
                chat_id: user.into(),
                user_id: user.into(),
                username: None,
                text: text.into(),
                timestamp: 0,
            }))
            .await;
    }

    async fn press(&self, user: &str, data: &str) {
        self.dispatcher
            .dispatch(InboundEvent::Callback(CallbackQuery {
                id: "cb".into(),
                from_user_id: user.into(),
                from_username: None,
                chat_id: user.into(),
                message_id: 1,
                data: data.into(),
            }))
            .await;
    }

    fn snapshot(&self) -> serde_json::Value {
        let raw = std::fs::read_to_string(self.tmp.path().join("suser_histories.json")).unwrap();
        serde_json::from_str(&raw).unwrap()
    }
}

async fn ollama_answering(content: &str) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "message": {"role": "assistant", "content": content},
            "done": true
        })))
        .mount(&server)
        .await;
    server
}

#[tokio::test]
async fn ask_persists_both_turns() {
    let ollama = ollama_answering("4").await;
    let h = Harness::new(&ollama);

    h.say("42", "/ask What is 2+2?").await;

    assert_eq!(
        h.snapshot(),
        json!({
            "42": {
                "default": [
                    {"role": "user", "content": "What is 2+2?"},
                    {"role": "assistant", "content": "4"}
                ]
            }
        })
    );
    assert_eq!(h.transport.texts(), vec!["🤔 Thinking...", "✅ <b>Response:</b>\n4"]);
}

#[tokio::test]
async fn follow_up_sends_whole_transcript() {
    let ollama = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .and(body_partial_json(json!({
            "messages": [
                {"role": "user", "content": "What is 2+2?"},
                {"role": "assistant", "content": "4"},
                {"role": "user", "content": "And doubled?"}
            ]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "message": {"content": "8"}
        })))
        .expect(1)
        .mount(&ollama)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "message": {"content": "4"}
        })))
        .mount(&ollama)
        .await;

    let h = Harness::new(&ollama);
    h.say("42", "/ask What is 2+2?").await;
    h.say("42", "/ask And doubled?").await;

    assert_eq!(h.transport.last_text().unwrap(), "✅ <b>Response:</b>\n8");
    assert_eq!(h.sessions.transcript("42", "default").await.unwrap().len(), 4);
}

#[tokio::test]
async fn server_error_keeps_question_but_no_answer() {
    let ollama = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&ollama)
        .await;

    let h = Harness::new(&ollama);
    h.say("42", "/ask Write a novel").await;

    assert_eq!(
        h.transport.last_text().unwrap(),
        "❗ Timeout Error, please ask the AI to provide a shorter answer."
    );
    assert_eq!(
        h.snapshot(),
        json!({"42": {"default": [{"role": "user", "content": "Write a novel"}]}})
    );
}

#[tokio::test]
async fn sessions_keep_separate_transcripts() {
    let ollama = ollama_answering("ok").await;
    let h = Harness::new(&ollama);

    h.press("7", "create_session").await;
    h.say("7", "work").await;
    h.say("7", "/use work").await;
    h.say("7", "/ask about work").await;
    h.say("7", "/use default").await;
    h.say("7", "/ask about home").await;

    assert_eq!(
        h.sessions.transcript("7", "work").await.unwrap(),
        vec![Turn::user("about work"), Turn::assistant("ok")]
    );
    assert_eq!(
        h.sessions.transcript("7", "default").await.unwrap(),
        vec![Turn::user("about home"), Turn::assistant("ok")]
    );
}

#[tokio::test]
async fn restart_restores_histories() {
    let ollama = ollama_answering("4").await;
    let h = Harness::new(&ollama);
    h.say("42", "/ask What is 2+2?").await;

    let reopened = SessionManager::open(
        HistoryStore::new(h.tmp.path().join("suser_histories.json")),
        "default",
    );
    assert_eq!(
        reopened.transcript("42", "default").await.unwrap(),
        vec![Turn::user("What is 2+2?"), Turn::assistant("4")]
    );
}

#[tokio::test]
async fn deleting_a_session_removes_it_from_disk() {
    let ollama = ollama_answering("ok").await;
    let h = Harness::new(&ollama);

    h.press("7", "create_session").await;
    h.say("7", "scratch").await;
    assert!(h.snapshot()["7"].get("scratch").is_some());

    h.press("7", "delete_session").await;
    h.say("7", "scratch").await;

    assert!(h.snapshot()["7"].get("scratch").is_none());
    assert!(h
        .transport
        .texts()
        .contains(&"Session 'scratch' deleted successfully!".to_string()));
}

#[tokio::test]
async fn concurrent_questions_on_one_session_do_not_interleave() {
    let ollama = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"message": {"content": "a"}}))
                .set_delay(Duration::from_millis(50)),
        )
        .mount(&ollama)
        .await;

    let h = Arc::new(Harness::new(&ollama));
    let mut handles = Vec::new();
    for q in ["one", "two", "three"] {
        let h = h.clone();
        handles.push(tokio::spawn(async move {
            h.say("5", &format!("/ask {q}")).await;
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let transcript = h.sessions.transcript("5", "default").await.unwrap();
    assert_eq!(transcript.len(), 6);
    for pair in transcript.chunks(2) {
        assert_eq!(pair[0].role, relay_bot::session::Role::User);
        assert_eq!(pair[1], Turn::assistant("a"));
    }

    let edits = h
        .transport
        .calls()
        .into_iter()
        .filter(|c| matches!(c, Outbound::Edit { .. }))
        .count();
    assert_eq!(edits, 3);
}

#[tokio::test]
async fn deleting_a_session_mid_answer_keeps_it_deleted() {
    let ollama = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"message": {"content": "late"}}))
                .set_delay(Duration::from_millis(200)),
        )
        .mount(&ollama)
        .await;

    let h = Arc::new(Harness::new(&ollama));
    h.press("7", "create_session").await;
    h.say("7", "work").await;
    h.say("7", "/use work").await;

    let asking = {
        let h = h.clone();
        tokio::spawn(async move { h.say("7", "/ask long question").await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    h.press("7", "delete_session").await;
    h.say("7", "work").await;
    asking.await.unwrap();

    assert!(h.sessions.transcript("7", "work").await.is_none());
    assert!(h.snapshot()["7"].get("work").is_none());
    assert_eq!(h.sessions.selected_session("7").await, "default");
}
