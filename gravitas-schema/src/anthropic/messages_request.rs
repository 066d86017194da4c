use super::content::Message;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Anthropic `POST /v1/messages` request body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagesRequest {
    pub model: String,

    /// Required conversation turns.
    pub messages: Vec<Message>,

    pub max_tokens: u32,

    /// System prompt: a bare string or a list of text blocks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<SystemPrompt>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolDeclaration>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<ToolChoice>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_sequences: Option<Vec<String>>,

    /// Catch-all for unknown fields (`metadata`, `thinking`, beta knobs, …).
    #[serde(default, flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl MessagesRequest {
    pub fn wants_stream(&self) -> bool {
        self.stream.unwrap_or(false)
    }

    /// Most recent user turn's plain text, used by best-effort argument
    /// repair.
    pub fn last_user_text(&self) -> Option<String> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == "user")
            .map(|m| m.content.plain_text())
            .filter(|t| !t.is_empty())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SystemPrompt {
    Text(String),
    Blocks(Vec<SystemBlock>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemBlock {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub text: String,
    #[serde(default, flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl SystemPrompt {
    pub fn plain_text(&self) -> String {
        match self {
            SystemPrompt::Text(text) => text.clone(),
            SystemPrompt::Blocks(blocks) => {
                let parts: Vec<&str> = blocks
                    .iter()
                    .filter(|b| b.kind == "text")
                    .map(|b| b.text.as_str())
                    .collect();
                parts.join("\n\n")
            }
        }
    }
}

/// A declared tool with its JSON Schema input contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDeclaration {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub input_schema: Value,
    #[serde(default, flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// `tool_choice` shapes accepted from clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolChoice {
    Auto,
    Any,
    None,
    Tool { name: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn minimal_request_parses() {
        let req: MessagesRequest = serde_json::from_value(json!({
            "model": "claude-3-haiku-x",
            "max_tokens": 16,
            "messages": [{"role": "user", "content": "ping"}]
        }))
        .unwrap();
        assert!(!req.wants_stream());
        assert!(req.tools.is_none());
        assert_eq!(req.last_user_text().as_deref(), Some("ping"));
    }

    #[test]
    fn missing_messages_rejected() {
        let err = serde_json::from_value::<MessagesRequest>(json!({
            "model": "m", "max_tokens": 1
        }))
        .unwrap_err();
        assert!(err.to_string().contains("messages"));
    }

    #[test]
    fn system_accepts_string_and_blocks() {
        let req: MessagesRequest = serde_json::from_value(json!({
            "model": "m", "max_tokens": 1, "messages": [],
            "system": "be terse"
        }))
        .unwrap();
        assert_eq!(req.system.unwrap().plain_text(), "be terse");

        let req: MessagesRequest = serde_json::from_value(json!({
            "model": "m", "max_tokens": 1, "messages": [],
            "system": [{"type": "text", "text": "a"}, {"type": "text", "text": "b"}]
        }))
        .unwrap();
        assert_eq!(req.system.unwrap().plain_text(), "a\n\nb");
    }

    #[test]
    fn tool_choice_variants_parse() {
        for (raw, expect_any) in [
            (json!({"type": "auto"}), false),
            (json!({"type": "any"}), true),
        ] {
            let choice: ToolChoice = serde_json::from_value(raw).unwrap();
            assert_eq!(matches!(choice, ToolChoice::Any), expect_any);
        }
        let choice: ToolChoice =
            serde_json::from_value(json!({"type": "tool", "name": "read_file"})).unwrap();
        assert!(matches!(choice, ToolChoice::Tool { name } if name == "read_file"));
    }

    #[test]
    fn last_user_text_prefers_latest_turn() {
        let req: MessagesRequest = serde_json::from_value(json!({
            "model": "m", "max_tokens": 1,
            "messages": [
                {"role": "user", "content": "first"},
                {"role": "assistant", "content": "reply"},
                {"role": "user", "content": "read README.md"}
            ]
        }))
        .unwrap();
        assert_eq!(req.last_user_text().as_deref(), Some("read README.md"));
    }
}
