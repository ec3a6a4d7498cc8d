//! Session types: conversation turns, model and persona presets, and the
//! per-user session state.

use parley_common::validation::{ValidationError, ValidationResult};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Default system prompt for a fresh session.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful AI assistant.";

/// Default sampling temperature.
pub const DEFAULT_TEMPERATURE: f64 = 0.7;

/// Inclusive temperature bounds accepted by the model API.
pub const TEMPERATURE_RANGE: std::ops::RangeInclusive<f64> = 0.0..=2.0;

/// Default cap on stored turns.
pub const DEFAULT_MAX_HISTORY: usize = 1000;

/// Who produced a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Message typed by the user
    User,
    /// Response produced by the model
    Model,
}

impl Role {
    /// Wire name used by the Gemini API.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Model => "model",
        }
    }
}

/// One recorded message in a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

impl Turn {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

// ============================================================================
// Presets
// ============================================================================

/// Selectable models, keyed by the alias users type after `/model`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ModelChoice {
    /// Fast, cheap default
    #[default]
    Flash,
    /// Slower, stronger reasoning
    Pro,
}

impl ModelChoice {
    pub const ALL: [Self; 2] = [Self::Flash, Self::Pro];

    /// Alias as typed by the user.
    pub const fn alias(self) -> &'static str {
        match self {
            Self::Flash => "flash",
            Self::Pro => "pro",
        }
    }

    /// Concrete model name sent to the API.
    pub const fn model_name(self) -> &'static str {
        match self {
            Self::Flash => "gemini-2.5-flash",
            Self::Pro => "gemini-2.5-pro",
        }
    }

    pub const fn description(self) -> &'static str {
        match self {
            Self::Flash => "Gemini 2.5 Flash (faster)",
            Self::Pro => "Gemini 2.5 Pro",
        }
    }

    /// Resolve an alias or a concrete model name, ignoring case.
    pub fn lookup(key: &str) -> Option<Self> {
        let key = key.trim().to_lowercase();
        Self::ALL
            .into_iter()
            .find(|m| m.alias() == key || m.model_name() == key)
    }
}

/// Named system-prompt presets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Persona {
    Helpful,
    Coding,
    Creative,
    Roast,
    Teacher,
}

impl Persona {
    pub const ALL: [Self; 5] = [
        Self::Helpful,
        Self::Coding,
        Self::Creative,
        Self::Roast,
        Self::Teacher,
    ];

    pub const fn name(self) -> &'static str {
        match self {
            Self::Helpful => "helpful",
            Self::Coding => "coding",
            Self::Creative => "creative",
            Self::Roast => "roast",
            Self::Teacher => "teacher",
        }
    }

    pub const fn prompt(self) -> &'static str {
        match self {
            Self::Helpful => "You are a helpful, friendly AI assistant.",
            Self::Coding => "You are an expert programmer who writes clean, efficient code and explains technical concepts clearly.",
            Self::Creative => "You are a creative writer who tells engaging stories and creates compelling content.",
            Self::Roast => "You are a sarcastic AI who roasts people in a funny way (but keeps it friendly).",
            Self::Teacher => "You are a patient teacher who explains things step-by-step in simple terms.",
        }
    }

    pub fn lookup(name: &str) -> Option<Self> {
        let name = name.trim().to_lowercase();
        Self::ALL.into_iter().find(|p| p.name() == name)
    }
}

// ============================================================================
// User Session
// ============================================================================

/// Conversation state and settings for one user.
///
/// Settings survive [`UserSession::clear`]; only a new system prompt forces a
/// fresh history.
#[derive(Debug, Clone)]
pub struct UserSession {
    history: VecDeque<Turn>,
    system_prompt: String,
    temperature: f64,
    model_name: String,
    max_history: usize,
}

impl Default for UserSession {
    fn default() -> Self {
        Self::with_max_history(DEFAULT_MAX_HISTORY)
    }
}

impl UserSession {
    /// Create a session with default settings and the given history cap.
    ///
    /// A cap of zero is raised to one so the current exchange always fits.
    pub fn with_max_history(max_history: usize) -> Self {
        Self {
            history: VecDeque::new(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            temperature: DEFAULT_TEMPERATURE,
            model_name: ModelChoice::default().model_name().to_string(),
            max_history: max_history.max(1),
        }
    }

    /// Record a turn, dropping the oldest ones beyond `max_history`.
    pub fn append_turn(&mut self, role: Role, content: impl Into<String>) {
        self.history.push_back(Turn::new(role, content));
        while self.history.len() > self.max_history {
            self.history.pop_front();
        }
    }

    /// Forget the conversation, keep the settings.
    pub fn clear(&mut self) {
        self.history.clear();
    }

    /// Replace the system prompt. Always starts a fresh context.
    pub fn set_system_prompt(&mut self, text: impl Into<String>) {
        self.system_prompt = text.into();
        self.clear();
    }

    /// Switch to a persona preset by name.
    pub fn apply_persona(&mut self, name: &str) -> ValidationResult<Persona> {
        let persona = Persona::lookup(name).ok_or_else(|| ValidationError::UnknownOption {
            field: "persona".into(),
            value: name.to_string(),
        })?;
        self.set_system_prompt(persona.prompt());
        Ok(persona)
    }

    /// Set the sampling temperature. Leaves the session untouched on error.
    pub fn set_temperature(&mut self, value: f64) -> ValidationResult<()> {
        if !TEMPERATURE_RANGE.contains(&value) {
            return Err(ValidationError::OutOfRange {
                field: "temperature".into(),
                value,
                min: *TEMPERATURE_RANGE.start(),
                max: *TEMPERATURE_RANGE.end(),
            });
        }
        self.temperature = value;
        Ok(())
    }

    /// Parse user input into a temperature candidate.
    pub fn parse_temperature(raw: &str) -> ValidationResult<f64> {
        raw.trim()
            .parse::<f64>()
            .map_err(|_| ValidationError::NotANumber {
                field: "temperature".into(),
                input: raw.to_string(),
            })
    }

    /// Select a model by alias or concrete name.
    pub fn set_model(&mut self, key: &str) -> ValidationResult<ModelChoice> {
        let choice = ModelChoice::lookup(key).ok_or_else(|| ValidationError::UnknownOption {
            field: "model".into(),
            value: key.to_string(),
        })?;
        self.model_name = choice.model_name().to_string();
        Ok(choice)
    }

    pub fn history(&self) -> impl ExactSizeIterator<Item = &Turn> + '_ {
        self.history.iter()
    }

    /// Snapshot of the history as an owned list.
    pub fn history_vec(&self) -> Vec<Turn> {
        self.history.iter().cloned().collect()
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    pub fn max_history(&self) -> usize {
        self.max_history
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    pub fn temperature(&self) -> f64 {
        self.temperature
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }
}
