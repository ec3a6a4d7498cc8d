//! Integration tests for Parley.
//!
//! Drives `Bot::handle` end to end against recording fakes for the chat
//! platform and the model, plus the liveness router.

use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
};
use parley_bot::session::Role;
use parley_bot::{
    build_router, Bot, ChannelResult, ChatPlatform, GenerateRequest, InboundMessage, MessageRef,
    ModelClient, ParseMode, ProviderError, SessionStore,
};
use serde_json::Value;
use std::sync::{Arc, Mutex};
use tower::ServiceExt;

// ============================================================================
// Fakes
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
enum Sent {
    Text(String, ParseMode),
    Photo(String),
    Edit(MessageRef, String),
    Delete(MessageRef),
}

#[derive(Default)]
struct FakePlatform {
    sent: Mutex<Vec<Sent>>,
}

impl FakePlatform {
    fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }

    fn texts(&self) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter_map(|s| match s {
                Sent::Text(text, _) => Some(text),
                _ => None,
            })
            .collect()
    }

    fn last_text(&self) -> String {
        self.texts().pop().unwrap_or_default()
    }

    fn record(&self, item: Sent) -> MessageRef {
        let mut sent = self.sent.lock().unwrap();
        sent.push(item);
        MessageRef(sent.len() as i64)
    }
}

#[async_trait]
impl ChatPlatform for FakePlatform {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn reply(&self, _chat_id: &str, text: &str, mode: ParseMode) -> ChannelResult<MessageRef> {
        Ok(self.record(Sent::Text(text.to_string(), mode)))
    }

    async fn reply_photo(&self, _chat_id: &str, _image: Vec<u8>, caption: &str) -> ChannelResult<MessageRef> {
        Ok(self.record(Sent::Photo(caption.to_string())))
    }

    async fn edit(&self, _chat_id: &str, message: MessageRef, text: &str, _mode: ParseMode) -> ChannelResult<()> {
        self.record(Sent::Edit(message, text.to_string()));
        Ok(())
    }

    async fn delete(&self, _chat_id: &str, message: MessageRef) -> ChannelResult<()> {
        self.record(Sent::Delete(message));
        Ok(())
    }
}

enum ImageBehavior {
    Image,
    NoImage,
    Fail,
}

struct FakeModel {
    reply: Result<String, String>,
    image: ImageBehavior,
    requests: Mutex<Vec<GenerateRequest>>,
}

impl FakeModel {
    fn replying(text: &str) -> Self {
        Self {
            reply: Ok(text.to_string()),
            image: ImageBehavior::Image,
            requests: Mutex::new(Vec::new()),
        }
    }

    fn failing(message: &str) -> Self {
        Self {
            reply: Err(message.to_string()),
            image: ImageBehavior::Fail,
            requests: Mutex::new(Vec::new()),
        }
    }

    fn with_image(mut self, image: ImageBehavior) -> Self {
        self.image = image;
        self
    }

    fn requests(&self) -> Vec<GenerateRequest> {
        self.requests.lock().unwrap().clone()
    }
}

fn upstream(message: &str) -> ProviderError {
    ProviderError {
        provider: "fake".into(),
        model: "m".into(),
        message: message.into(),
        status_code: Some(500),
    }
}

#[async_trait]
impl ModelClient for FakeModel {
    fn name(&self) -> &str {
        "fake"
    }

    async fn generate(&self, request: GenerateRequest) -> Result<String, ProviderError> {
        self.requests.lock().unwrap().push(request);
        self.reply.clone().map_err(|m| upstream(&m))
    }

    async fn generate_image(&self, _model: &str, _prompt: &str) -> Result<Option<Vec<u8>>, ProviderError> {
        match self.image {
            ImageBehavior::Image => Ok(Some(vec![1, 2, 3])),
            ImageBehavior::NoImage => Ok(None),
            ImageBehavior::Fail => Err(upstream("quota exceeded")),
        }
    }
}

struct Harness {
    bot: Bot,
    store: Arc<SessionStore>,
    platform: Arc<FakePlatform>,
    model: Arc<FakeModel>,
}

impl Harness {
    fn new(model: FakeModel) -> Self {
        let store = Arc::new(SessionStore::default());
        let platform = Arc::new(FakePlatform::default());
        let model = Arc::new(model);
        let bot = Bot::new(store.clone(), model.clone(), platform.clone(), "gemini-2.5-flash");
        Self {
            bot,
            store,
            platform,
            model,
        }
    }

    async fn say(&self, text: &str) {
        self.bot.handle(InboundMessage::new("100", "7", text)).await;
    }

    async fn history_len(&self) -> usize {
        self.store.get_or_create("7").lock().await.history_len()
    }
}

// ============================================================================
// Liveness Routes
// ============================================================================

async fn get(uri: &str) -> (StatusCode, Vec<u8>) {
    let response = build_router()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, body.to_vec())
}

#[tokio::test]
async fn test_liveness_root() {
    let (status, body) = get("/").await;
    assert_eq!(status, StatusCode::OK);
    assert!(!body.is_empty());
}

#[tokio::test]
async fn test_liveness_health_json() {
    let (status, body) = get("/health").await;
    assert_eq!(status, StatusCode::OK);

    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["status"], "alive");
    assert_eq!(json["bot"], "running");
    assert!(json["version"].is_string());
}

// ============================================================================
// Settings Commands
// ============================================================================

#[tokio::test]
async fn test_temperature_out_of_range_is_rejected() {
    let h = Harness::new(FakeModel::replying("ok"));
    h.say("/temperature 3.5").await;

    assert!(h.platform.last_text().contains("between 0.0 and 2.0"));
    assert_eq!(h.store.get_or_create("7").lock().await.temperature(), 0.7);
}

#[tokio::test]
async fn test_temperature_not_a_number_is_rejected() {
    let h = Harness::new(FakeModel::replying("ok"));
    h.say("/temperature abc").await;

    assert!(h.platform.last_text().contains("Invalid number"));
    assert_eq!(h.store.get_or_create("7").lock().await.temperature(), 0.7);
}

#[tokio::test]
async fn test_temperature_valid_value_is_applied() {
    let h = Harness::new(FakeModel::replying("ok"));
    h.say("/temperature 1.5").await;

    assert!(h.platform.last_text().contains("1.5"));
    assert_eq!(h.store.get_or_create("7").lock().await.temperature(), 1.5);
}

#[tokio::test]
async fn test_persona_then_chat() {
    let h = Harness::new(FakeModel::replying("Here is **clean** code"));
    h.say("/persona coding").await;
    h.say("Write a sort function").await;

    assert_eq!(h.history_len().await, 2);

    let requests = h.model.requests();
    assert_eq!(requests.len(), 1);
    assert!(requests[0].system_prompt.starts_with("You are an expert programmer"));
    assert!(requests[0].history.is_empty());
    assert_eq!(requests[0].message, "Write a sort function");

    let last = h.platform.sent().pop().unwrap();
    assert_eq!(
        last,
        Sent::Text("Here is <b>clean</b> code".into(), ParseMode::Html)
    );
}

#[tokio::test]
async fn test_unknown_persona_leaves_session_alone() {
    let h = Harness::new(FakeModel::replying("ok"));
    h.say("hello").await;
    h.say("/persona pirate").await;

    assert!(h.platform.last_text().contains("Unknown persona"));
    assert_eq!(h.history_len().await, 2);
}

#[tokio::test]
async fn test_system_prompt_clears_history() {
    let h = Harness::new(FakeModel::replying("ok"));
    h.say("one").await;
    h.say("two").await;
    assert_eq!(h.history_len().await, 4);

    h.say("/system You are a pirate").await;
    assert_eq!(h.history_len().await, 0);
    assert_eq!(
        h.store.get_or_create("7").lock().await.system_prompt(),
        "You are a pirate"
    );
}

#[tokio::test]
async fn test_reset_keeps_settings() {
    let h = Harness::new(FakeModel::replying("ok"));
    h.say("/temperature 1.2").await;
    h.say("/model pro").await;
    h.say("hi").await;

    h.say("/reset").await;

    let handle = h.store.get_or_create("7");
    let session = handle.lock().await;
    assert_eq!(session.history_len(), 0);
    assert_eq!(session.temperature(), 1.2);
    assert_eq!(session.model_name(), "gemini-2.5-pro");
}

#[tokio::test]
async fn test_model_switch_reaches_request() {
    let h = Harness::new(FakeModel::replying("ok"));
    h.say("/model@ParleyBot PRO").await;
    h.say("hi").await;

    assert_eq!(h.model.requests()[0].model, "gemini-2.5-pro");
}

#[tokio::test]
async fn test_tokens_reports_usage() {
    let h = Harness::new(FakeModel::replying("ok"));
    h.say("hi").await;
    h.say("/tokens").await;

    let text = h.platform.last_text();
    assert!(text.contains("2/1000"));
    assert!(text.contains("gemini-2.5-flash"));
}

#[tokio::test]
async fn test_unknown_command_points_to_help() {
    let h = Harness::new(FakeModel::replying("ok"));
    h.say("/dance").await;

    assert!(h.platform.last_text().contains("/help"));
    assert!(h.model.requests().is_empty());
}

// ============================================================================
// Chat
// ============================================================================

#[tokio::test]
async fn test_second_message_carries_history() {
    let h = Harness::new(FakeModel::replying("answer"));
    h.say("first").await;
    h.say("second").await;

    let requests = h.model.requests();
    assert_eq!(requests[1].history.len(), 2);
    assert_eq!(requests[1].history[0].role, Role::User);
    assert_eq!(requests[1].history[1].role, Role::Model);
    assert_eq!(requests[1].history[1].content, "answer");
}

#[tokio::test]
async fn test_upstream_failure_keeps_user_turn_only() {
    let h = Harness::new(FakeModel::failing("API error (503): overloaded"));
    h.say("hello?").await;

    assert_eq!(h.history_len().await, 1);
    let text = h.platform.last_text();
    assert!(text.contains("Oops! Something went wrong"));
    assert!(text.contains("overloaded"));
}

#[tokio::test]
async fn test_long_reply_is_chunked() {
    let line = "word ".repeat(19);
    let reply = vec![line.trim_end(); 100].join("\n");
    let h = Harness::new(FakeModel::replying(&reply));
    h.say("tell me a lot").await;

    let texts = h.platform.texts();
    assert!(texts.len() >= 3);
    assert!(texts.iter().all(|t| t.encode_utf16().count() <= 4096));
}

// ============================================================================
// Images
// ============================================================================

#[tokio::test]
async fn test_image_without_prompt_shows_usage() {
    let h = Harness::new(FakeModel::replying("ok"));
    h.say("/image").await;

    assert!(h.platform.last_text().contains("Usage"));
}

#[tokio::test]
async fn test_image_success_sends_photo_and_clears_status() {
    let h = Harness::new(FakeModel::replying("ok"));
    h.say("/image a cat").await;

    let sent = h.platform.sent();
    assert!(matches!(&sent[0], Sent::Text(t, ParseMode::Plain) if t.contains("Generating")));
    assert_eq!(sent[1], Sent::Photo("🎨 Generated: a cat".into()));
    assert_eq!(sent[2], Sent::Delete(MessageRef(1)));
}

#[tokio::test]
async fn test_image_missing_warns_user() {
    let h = Harness::new(FakeModel::replying("ok").with_image(ImageBehavior::NoImage));
    h.say("/image a cat").await;

    let sent = h.platform.sent();
    assert!(matches!(&sent[1], Sent::Text(t, _) if t.contains("No image was generated")));
    assert_eq!(sent[2], Sent::Delete(MessageRef(1)));
}

#[tokio::test]
async fn test_image_failure_edits_status() {
    let h = Harness::new(FakeModel::replying("ok").with_image(ImageBehavior::Fail));
    h.say("/image a cat").await;

    let sent = h.platform.sent();
    assert_eq!(sent.len(), 2);
    assert!(matches!(&sent[1], Sent::Edit(MessageRef(1), t) if t.contains("quota exceeded")));
}
