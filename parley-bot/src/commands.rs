//! Command dispatch and the chat exchange.
//!
//! Every inbound message ends here. Slash commands read or change the
//! sender's session, anything else is forwarded to the model. Failures are
//! turned into replies; [`Bot::handle`] never returns an error.

use crate::message::{InboundMessage, MessageRef, ParseMode};
use crate::provider::{GenerateRequest, ModelClient};
use crate::session::{ModelChoice, Persona, Role, SessionStore, UserSession};
use crate::telegram::format;
use crate::telegram::sender::{strip_markup, MessageSender};
use crate::traits::ChatPlatform;
use parley_common::util::{sanitize_for_log, truncate_with_ellipsis};
use parley_common::ValidationError;
use std::sync::Arc;

/// Telegram caption limit, in characters.
const MAX_CAPTION_CHARS: usize = 1024;

const WELCOME_TEXT: &str = "🤖 **Welcome to Parley!**

I'm powered by Google Gemini. Let's chat!

**Available Commands:**
/help - Show all commands
/reset - Clear chat history & start fresh
/system - Change system prompt
/temperature - Adjust creativity (0.0-2.0)
/tokens - Check context usage
/persona - Quick persona presets
/model - Switch Gemini model
/image - Generate images with AI! 🎨

Just send me a message to start chatting! 🚀";

const IMAGE_USAGE: &str =
    "🎨 Usage: `/image <your prompt>`\n\nExample: `/image a futuristic city at sunset`";
const IMAGE_PENDING: &str = "🎨 Generating your image... This might take a moment! ⏳";
const IMAGE_MISSING: &str = "⚠️ No image was generated. The model might not support image \
generation with your API key. Try upgrading to a paid plan for full image generation access!";

// ============================================================================
// Command Parsing
// ============================================================================

/// A parsed inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start,
    Help,
    Reset,
    System(Option<String>),
    Temperature(Option<String>),
    Tokens,
    Persona(Option<String>),
    Model(Option<String>),
    Image(Option<String>),
    /// A slash command the bot does not know
    Unknown(String),
    /// Free text for the model
    Chat(String),
}

impl Command {
    /// Parse message text. `/cmd@botname` is treated like `/cmd`; arguments
    /// are the trimmed remainder of the message, `None` when empty.
    pub fn parse(text: &str) -> Self {
        let trimmed = text.trim_start();
        let Some(body) = trimmed.strip_prefix('/') else {
            return Self::Chat(text.to_string());
        };

        let (head, rest) = body
            .split_once(char::is_whitespace)
            .unwrap_or((body, ""));
        let name = head.split('@').next().unwrap_or(head).to_lowercase();
        let args = Some(rest.trim())
            .filter(|a| !a.is_empty())
            .map(String::from);

        match name.as_str() {
            "start" => Self::Start,
            "help" => Self::Help,
            "reset" => Self::Reset,
            "system" => Self::System(args),
            "temperature" => Self::Temperature(args),
            "tokens" => Self::Tokens,
            "persona" => Self::Persona(args),
            "model" => Self::Model(args),
            "image" => Self::Image(args),
            _ => Self::Unknown(head.to_string()),
        }
    }

    /// Name used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Help => "help",
            Self::Reset => "reset",
            Self::System(_) => "system",
            Self::Temperature(_) => "temperature",
            Self::Tokens => "tokens",
            Self::Persona(_) => "persona",
            Self::Model(_) => "model",
            Self::Image(_) => "image",
            Self::Unknown(_) => "unknown",
            Self::Chat(_) => "chat",
        }
    }
}

// ============================================================================
// Bot
// ============================================================================

/// Routes inbound messages to handlers.
pub struct Bot {
    store: Arc<SessionStore>,
    model: Arc<dyn ModelClient>,
    sender: MessageSender,
    image_model: String,
}

impl Bot {
    pub fn new(
        store: Arc<SessionStore>,
        model: Arc<dyn ModelClient>,
        platform: Arc<dyn ChatPlatform>,
        image_model: impl Into<String>,
    ) -> Self {
        Self {
            store,
            model,
            sender: MessageSender::new(platform),
            image_model: image_model.into(),
        }
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    /// Handle one inbound message to completion.
    pub async fn handle(&self, msg: InboundMessage) {
        let command = Command::parse(&msg.text);
        tracing::debug!(
            trace_id = %msg.trace_id,
            user_id = %msg.user_id,
            command = command.name(),
            "Dispatching message"
        );

        let reply = match command {
            Command::Chat(text) => return self.chat(&msg, &text).await,
            Command::Image(prompt) => return self.image(&msg, prompt.as_deref()).await,
            Command::Start => WELCOME_TEXT.to_string(),
            Command::Help => help_text(),
            Command::Reset => self.reset(&msg).await,
            Command::System(prompt) => self.system(&msg, prompt).await,
            Command::Temperature(raw) => self.temperature(&msg, raw.as_deref()).await,
            Command::Tokens => self.tokens(&msg).await,
            Command::Persona(name) => self.persona(&msg, name.as_deref()).await,
            Command::Model(key) => self.model_command(&msg, key.as_deref()).await,
            Command::Unknown(name) => {
                format!("❓ Unknown command `/{name}`. Use /help to see what I can do.")
            }
        };

        self.sender.send(&msg.chat_id, &reply).await;
    }

    // ------------------------------------------------------------------------
    // Settings commands
    // ------------------------------------------------------------------------

    async fn reset(&self, msg: &InboundMessage) -> String {
        self.store.get_or_create(&msg.user_id).lock().await.clear();
        tracing::info!(user_id = %msg.user_id, "Session history cleared");
        "🔄 Chat history cleared! Starting fresh. ✨".to_string()
    }

    async fn system(&self, msg: &InboundMessage, prompt: Option<String>) -> String {
        let handle = self.store.get_or_create(&msg.user_id);
        let mut session = handle.lock().await;

        match prompt {
            None => format!(
                "📝 Current system prompt:\n\n`{}`\n\nUse `/system <your prompt>` to change it.",
                session.system_prompt()
            ),
            Some(prompt) => {
                session.set_system_prompt(prompt.as_str());
                tracing::info!(user_id = %msg.user_id, "System prompt updated");
                format!("✅ System prompt updated!\n\n`{prompt}`\n\nHistory cleared.")
            }
        }
    }

    async fn temperature(&self, msg: &InboundMessage, raw: Option<&str>) -> String {
        let handle = self.store.get_or_create(&msg.user_id);
        let mut session = handle.lock().await;

        let Some(raw) = raw else {
            return format!(
                "🌡️ Current temperature: `{:?}`\n\nUse `/temperature <0.0-2.0>` to change it.",
                session.temperature()
            );
        };

        let result = UserSession::parse_temperature(raw)
            .and_then(|value| session.set_temperature(value).map(|()| value));
        match result {
            Ok(value) => format!("✅ Temperature set to `{value:?}`"),
            Err(e) => validation_reply(&e),
        }
    }

    async fn tokens(&self, msg: &InboundMessage) -> String {
        let handle = self.store.get_or_create(&msg.user_id);
        let session = handle.lock().await;
        format!(
            "📊 Context Usage:\n\n💬 Messages in context: {}/{}\n🧠 Model: {}\n🌡️ Temperature: {:?}",
            session.history_len(),
            session.max_history(),
            session.model_name(),
            session.temperature()
        )
    }

    async fn persona(&self, msg: &InboundMessage, name: Option<&str>) -> String {
        let Some(name) = name else {
            let list = Persona::ALL
                .iter()
                .map(|p| format!("• `{}` - {}", p.name(), p.prompt()))
                .collect::<Vec<_>>()
                .join("\n");
            return format!("🎭 Available Personas:\n\n{list}\n\nUse `/persona <name>` to select.");
        };

        let handle = self.store.get_or_create(&msg.user_id);
        let result = handle.lock().await.apply_persona(name);
        match result {
            Ok(persona) => {
                tracing::info!(user_id = %msg.user_id, persona = persona.name(), "Persona applied");
                format!("✅ Persona set to **{}**!\n\nHistory cleared.", persona.name())
            }
            Err(e) => validation_reply(&e),
        }
    }

    async fn model_command(&self, msg: &InboundMessage, key: Option<&str>) -> String {
        let handle = self.store.get_or_create(&msg.user_id);
        let mut session = handle.lock().await;

        let Some(key) = key else {
            let options = ModelChoice::ALL
                .iter()
                .map(|m| format!("• `/model {}` - {}", m.alias(), m.description()))
                .collect::<Vec<_>>()
                .join("\n");
            return format!(
                "🤖 Current model: `{}`\n\nAvailable:\n{options}",
                session.model_name()
            );
        };

        match session.set_model(key) {
            Ok(choice) => {
                tracing::info!(user_id = %msg.user_id, model = choice.model_name(), "Model switched");
                format!("✅ Model switched to `{}`", choice.model_name())
            }
            Err(e) => validation_reply(&e),
        }
    }

    // ------------------------------------------------------------------------
    // Model exchanges
    // ------------------------------------------------------------------------

    /// Forward free text to the model. The session stays locked for the
    /// whole exchange so one user's messages are answered in order.
    async fn chat(&self, msg: &InboundMessage, text: &str) {
        let handle = self.store.get_or_create(&msg.user_id);
        let mut session = handle.lock().await;

        let request = GenerateRequest {
            model: session.model_name().to_string(),
            system_prompt: session.system_prompt().to_string(),
            temperature: session.temperature(),
            history: session.history_vec(),
            message: text.to_string(),
        };
        session.append_turn(Role::User, text);

        match self.model.generate(request).await {
            Ok(reply) => {
                session.append_turn(Role::Model, reply.as_str());
                let report = self.sender.send(&msg.chat_id, &reply).await;
                tracing::info!(
                    trace_id = %msg.trace_id,
                    user_id = %msg.user_id,
                    history = session.history_len(),
                    chunks = report.chunks.len(),
                    dropped = report.dropped(),
                    "Chat reply delivered"
                );
            }
            Err(e) => {
                let err = parley_common::Error::from(e);
                tracing::error!(
                    trace_id = %msg.trace_id,
                    user_id = %msg.user_id,
                    error = %sanitize_for_log(&err.to_string()),
                    "Chat request failed"
                );
                let reply = format!("❌ Oops! Something went wrong:\n`{}`", upstream_text(&err));
                self.sender.send(&msg.chat_id, &reply).await;
            }
        }
    }

    async fn image(&self, msg: &InboundMessage, prompt: Option<&str>) {
        let Some(prompt) = prompt else {
            self.sender.send(&msg.chat_id, IMAGE_USAGE).await;
            return;
        };

        let status = self.sender.send_plain(&msg.chat_id, IMAGE_PENDING).await;
        let platform = self.sender.platform();

        let outcome = match self
            .model
            .generate_image(&self.image_model, &format!("Generate an image: {prompt}"))
            .await
        {
            Ok(Some(bytes)) => {
                let caption = truncate_with_ellipsis(&format!("🎨 Generated: {prompt}"), MAX_CAPTION_CHARS - 3);
                platform
                    .reply_photo(&msg.chat_id, bytes, &caption)
                    .await
                    .map(|_| ())
                    .map_err(|e| e.to_string())
            }
            Ok(None) => {
                tracing::warn!(user_id = %msg.user_id, "Model returned no image");
                self.sender.send(&msg.chat_id, IMAGE_MISSING).await;
                Ok(())
            }
            Err(e) => Err(upstream_text(&parley_common::Error::from(e))),
        };

        match outcome {
            Ok(()) => {
                if let Some(status) = status {
                    if let Err(e) = platform.delete(&msg.chat_id, status).await {
                        tracing::warn!(chat_id = %msg.chat_id, error = %e, "Failed to delete status message");
                    }
                }
            }
            Err(reason) => {
                tracing::error!(
                    user_id = %msg.user_id,
                    error = %sanitize_for_log(&reason),
                    "Image generation failed"
                );
                let text = format!(
                    "❌ Image generation failed!\n\nError: `{reason}`\n\n💡 Tip: Image generation \
                     might require a paid API key. Check Google AI Studio for details."
                );
                self.replace_status(&msg.chat_id, status, &text).await;
            }
        }
    }

    /// Overwrite a status message, or send `text` fresh if there is none or
    /// the edit is refused.
    async fn replace_status(&self, chat_id: &str, status: Option<MessageRef>, text: &str) {
        let platform = self.sender.platform();
        if let Some(status) = status {
            if let Ok(html) = format::convert_to_telegram_html(text) {
                if platform.edit(chat_id, status, &html, ParseMode::Html).await.is_ok() {
                    return;
                }
            }
            if platform
                .edit(chat_id, status, &strip_markup(text), ParseMode::Plain)
                .await
                .is_ok()
            {
                return;
            }
        }
        self.sender.send(chat_id, text).await;
    }
}

/// Short corrective reply for a rejected command argument.
fn validation_reply(err: &ValidationError) -> String {
    match err {
        ValidationError::OutOfRange { field, min, max, .. } if field == "temperature" => {
            format!("❌ Temperature must be between {min:?} and {max:?}")
        }
        ValidationError::NotANumber { field, .. } if field == "temperature" => {
            "❌ Invalid number. Use `/temperature 0.7` for example.".to_string()
        }
        ValidationError::UnknownOption { field, .. } if field == "persona" => {
            "❌ Unknown persona. Use `/persona` to see available options.".to_string()
        }
        ValidationError::UnknownOption { field, .. } if field == "model" => {
            "❌ Unknown model. Use `/model` to see options.".to_string()
        }
        other => format!("❌ {other}"),
    }
}

/// The part of an upstream error worth showing a user.
fn upstream_text(err: &parley_common::Error) -> String {
    match err {
        parley_common::Error::Upstream(message) => sanitize_for_log(message),
        other => sanitize_for_log(&other.to_string()),
    }
}

fn help_text() -> String {
    let personas = Persona::ALL
        .iter()
        .map(|p| format!("• {}", p.name()))
        .collect::<Vec<_>>()
        .join("\n");
    let models = ModelChoice::ALL
        .iter()
        .map(|m| {
            let default = if *m == ModelChoice::default() { " (default)" } else { "" };
            format!("• {} = {}{default}", m.alias(), m.model_name())
        })
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "📖 **Command Guide:**

🔄 `/reset` - Clear your chat history and context

⚙️ `/system <prompt>` - Set custom system prompt
Example: `/system You are a pirate assistant`

🌡️ `/temperature <value>` - Set creativity (0.0-2.0)
• 0.0 = Focused & deterministic
• 0.7 = Balanced (default)
• 2.0 = Creative & wild

📊 `/tokens` - See how many messages are in context

🎭 `/persona <name>` - Choose a quick preset:
{personas}

🤖 `/model <name>` - Switch models:
{models}

🎨 `/image <prompt>` - Generate AI images!
Example: `/image a cute cat wearing sunglasses`

Just type normally to chat with me! 💬"
    )
}
