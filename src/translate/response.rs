use super::args::{UserContext, repair_args};
use crate::config::RepairConfig;
use gravitas_schema::anthropic::{ContentBlock, MessagesResponse, Usage};
use gravitas_schema::antigravity::GenerateContentResponse;
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

/// Map an upstream finish reason onto the Anthropic stop reason grammar.
/// The presence of any tool call overrides a plain `STOP`.
pub fn map_stop_reason(finish_reason: Option<&str>, saw_tool_use: bool) -> &'static str {
    let base = match finish_reason {
        Some("MAX_TOKENS") => "max_tokens",
        Some("SAFETY") => "stop_sequence",
        Some("ERROR") => "error",
        _ => "end_turn",
    };
    if saw_tool_use && base == "end_turn" {
        "tool_use"
    } else {
        base
    }
}

pub fn fresh_message_id() -> String {
    format!("msg_{}", Uuid::new_v4().simple())
}

pub fn fresh_tool_use_id() -> String {
    format!("toolu_{}", Uuid::new_v4().simple())
}

/// Translate a buffered upstream response into an Anthropic message.
///
/// `alias` is the model name the client originally asked for; the client
/// always sees what it requested, never the upstream id.
pub fn message_from_response(
    upstream: &GenerateContentResponse,
    alias: &str,
    tool_schemas: &HashMap<String, Value>,
    user: &UserContext,
    repair: &RepairConfig,
) -> MessagesResponse {
    let body = upstream.unwrapped();
    let mut content: Vec<ContentBlock> = Vec::new();
    let mut saw_tool_use = false;
    let mut finish_reason = None;

    if let Some(candidate) = body.candidates.first() {
        finish_reason = candidate.finish_reason.clone();

        for part in candidate
            .content
            .as_ref()
            .map(|c| c.parts.as_slice())
            .unwrap_or_default()
        {
            if part.is_thought_text() {
                content.push(ContentBlock::Thinking {
                    thinking: part.text.clone().unwrap_or_default(),
                    signature: part.thought_signature.clone(),
                });
            } else if let Some(text) = &part.text {
                if !text.is_empty() {
                    content.push(ContentBlock::Text { text: text.clone() });
                }
            } else if let Some(call) = &part.function_call {
                // Calls against undeclared tools are dropped rather than
                // forwarded to a client that cannot dispatch them.
                if !tool_schemas.is_empty() && !tool_schemas.contains_key(&call.name) {
                    continue;
                }
                saw_tool_use = true;
                let input = repair_args(call, tool_schemas.get(&call.name), user, repair);
                content.push(ContentBlock::ToolUse {
                    id: call
                        .id
                        .clone()
                        .filter(|id| !id.is_empty())
                        .unwrap_or_else(fresh_tool_use_id),
                    name: call.name.clone(),
                    input: Value::Object(input),
                });
            }
        }
    }

    if content.is_empty() {
        content.push(ContentBlock::Text {
            text: String::new(),
        });
    }

    let usage = body
        .usage_metadata
        .map(|meta| Usage {
            input_tokens: meta.prompt_token_count.unwrap_or(0),
            output_tokens: meta.candidates_token_count.unwrap_or(0),
        })
        .unwrap_or_else(|| Usage {
            input_tokens: 0,
            output_tokens: estimate_output_tokens(&content),
        });

    MessagesResponse {
        id: fresh_message_id(),
        kind: "message".to_string(),
        role: "assistant".to_string(),
        model: alias.to_string(),
        content,
        stop_reason: Some(map_stop_reason(finish_reason.as_deref(), saw_tool_use).to_string()),
        stop_sequence: None,
        usage,
    }
}

/// Rough chars/4 fallback when the upstream omits usage metadata.
fn estimate_output_tokens(content: &[ContentBlock]) -> u64 {
    let chars: usize = content
        .iter()
        .map(|block| match block {
            ContentBlock::Text { text } => text.len(),
            ContentBlock::Thinking { thinking, .. } => thinking.len(),
            ContentBlock::ToolUse { input, .. } => input.to_string().len(),
            _ => 0,
        })
        .sum();
    (chars as u64).div_ceil(4)
}
