use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::PayloadError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub const fn label(self) -> &'static str {
        match self {
            Self::User => "User",
            Self::Assistant => "Assistant",
            Self::System => "System",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetKind {
    Code,
    Doc,
    Data,
    Config,
    Log,
    Other,
}

impl AssetKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Code => "code",
            Self::Doc => "doc",
            Self::Data => "data",
            Self::Config => "config",
            Self::Log => "log",
            Self::Other => "other",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

/// A file or blob the assistant read (context) or produced (output).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Asset {
    pub name: String,
    pub kind: AssetKind,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
}

impl Asset {
    /// First `lines` lines of the content.
    pub fn short(&self, lines: usize) -> String {
        self.content
            .lines()
            .take(lines)
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub(crate) fn language(&self) -> Option<String> {
        match self.metadata.as_ref()?.get("language")? {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Null | Value::Bool(false) | Value::String(_) => None,
            Value::Number(n) if n.as_f64() == Some(0.0) => None,
            other => Some(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub name: String,
    pub arguments: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prompt {
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub context_assets: Vec<Asset>,
    #[serde(default)]
    pub invocations: Vec<ToolInvocation>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub message: ChatMessage,
    #[serde(default)]
    pub output_assets: Vec<Asset>,
    #[serde(default)]
    pub invocations: Vec<ToolInvocation>,
}

impl Prompt {
    /// Accepts the object form or a string holding its JSON encoding.
    pub fn from_value(value: Value) -> Result<Self, PayloadError> {
        decode(value, "prompt")
    }

    pub fn validate(&self) -> Result<(), PayloadError> {
        if self.messages.is_empty() {
            return Err(PayloadError::Validation(
                "Prompt must contain at least one message",
            ));
        }
        if !self.messages.iter().any(|m| m.role == Role::User) {
            return Err(PayloadError::Validation(
                "Prompt needs at least one user message",
            ));
        }
        Ok(())
    }
}

impl Response {
    pub fn from_value(value: Value) -> Result<Self, PayloadError> {
        decode(value, "response")
    }

    pub fn validate(&self) -> Result<(), PayloadError> {
        if self.message.role != Role::Assistant {
            return Err(PayloadError::Validation(
                "Response.message.role must be 'assistant'",
            ));
        }
        if contains_placeholder(&self.message.content) {
            return Err(PayloadError::Validation(
                "Response contains placeholder text",
            ));
        }
        Ok(())
    }
}

fn decode<T: for<'de> Deserialize<'de>>(
    value: Value,
    field: &'static str,
) -> Result<T, PayloadError> {
    let value = match value {
        Value::String(raw) => serde_json::from_str(&raw).unwrap_or(Value::String(raw)),
        other => other,
    };
    serde_json::from_value(value).map_err(|source| PayloadError::Decode { field, source })
}

fn placeholder_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| {
            Regex::new(r"(?i)\[(?:the full response|trimmed|placeholder|todo)[^\]]*]").ok()
        })
        .as_ref()
}

/// True for stand-ins like `[trimmed]` or `[the full response goes here]`.
pub fn contains_placeholder(text: &str) -> bool {
    placeholder_pattern().is_some_and(|re| re.is_match(text))
}
