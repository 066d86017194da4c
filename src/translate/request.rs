use super::schema::CoercedTool;
use crate::config::ResolvedModel;
use gravitas_schema::anthropic::{
    ContentBlock, MessagesRequest, SystemPrompt, ToolChoice,
};
use gravitas_schema::antigravity::{
    Content, FunctionCall, FunctionDeclaration, FunctionResponse, GenerateContentRequest,
    GenerationConfig, Part, Tool, ToolConfig,
};
use serde_json::json;
use std::collections::HashMap;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::net::SocketAddr;
use std::sync::LazyLock;

/// Nonce fixed at process start; combined with the client address it
/// yields a session id that is stable per client connection but distinct
/// across proxy restarts.
static SESSION_NONCE: LazyLock<u64> = LazyLock::new(rand::random);

/// Deterministic per-connection session id in the upstream's negative
/// decimal shape.
pub fn session_id_for_client(client: Option<SocketAddr>) -> String {
    let mut hasher = DefaultHasher::new();
    SESSION_NONCE.hash(&mut hasher);
    if let Some(addr) = client {
        addr.hash(&mut hasher);
    }
    let value = (hasher.finish() >> 1) as i64;
    format!("-{value}")
}

/// Translate a validated Anthropic request into the upstream `request`
/// body. Tool declarations are already coerced; the endpoint path, the
/// envelope and the headers are the upstream client's concern.
pub fn build_upstream_request(
    req: &MessagesRequest,
    model: &ResolvedModel,
    coerced_tools: &[CoercedTool],
    session_id: String,
) -> GenerateContentRequest {
    let mut contents = Vec::with_capacity(req.messages.len());
    // tool_use id → name, for pairing tool_result blocks in later turns.
    let mut tool_names: HashMap<String, String> = HashMap::new();

    for message in &req.messages {
        let to_model = message.role == "assistant";
        let mut parts = Vec::new();

        for block in message.content.blocks() {
            match block {
                ContentBlock::Text { text } => {
                    if !text.is_empty() {
                        parts.push(Part::text(text));
                    }
                }

                ContentBlock::Image { source } => {
                    parts.push(Part {
                        inline_data: Some(json!({
                            "mimeType": source.media_type.as_deref().unwrap_or("image/jpeg"),
                            "data": source.data.as_deref().unwrap_or(""),
                        })),
                        ..Part::default()
                    });
                }

                ContentBlock::ToolUse { id, name, input } => {
                    tool_names.insert(id.clone(), name.clone());
                    parts.push(Part {
                        function_call: Some(FunctionCall {
                            id: Some(id),
                            name,
                            args: Some(input),
                            ..FunctionCall::default()
                        }),
                        ..Part::default()
                    });
                }

                ContentBlock::ToolResult {
                    tool_use_id,
                    content,
                    is_error,
                } => {
                    let name = tool_names
                        .get(&tool_use_id)
                        .cloned()
                        .unwrap_or_else(|| tool_use_id.clone());
                    let result = content.map(|c| c.plain_text()).unwrap_or_default();
                    let response = if is_error == Some(true) {
                        json!({"error": result})
                    } else {
                        json!({"result": result})
                    };
                    parts.push(Part {
                        function_response: Some(FunctionResponse { name, response }),
                        ..Part::default()
                    });
                }

                // Model reasoning from earlier turns is never re-sent
                // upstream.
                ContentBlock::Thinking { .. } | ContentBlock::RedactedThinking { .. } => {}
            }
        }

        if parts.is_empty() {
            continue;
        }
        contents.push(if to_model {
            Content::model(parts)
        } else {
            Content::user(parts)
        });
    }

    let system_instruction = req.system.as_ref().map(system_instruction);

    let mut generation_config = GenerationConfig {
        max_output_tokens: Some(req.max_tokens),
        temperature: req.temperature,
        top_p: req.top_p,
        top_k: req.top_k,
        stop_sequences: req.stop_sequences.clone(),
        ..GenerationConfig::default()
    };
    if model.is_claude_thinking {
        // Thoughts on, no forced budget: matches a session that does not
        // force thinking.
        generation_config.thinking_config = Some(json!({"includeThoughts": true}));
    }

    let tools = (!coerced_tools.is_empty()).then(|| {
        vec![Tool {
            function_declarations: coerced_tools
                .iter()
                .map(|t| FunctionDeclaration {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    parameters: t.parameters.clone(),
                })
                .collect(),
        }]
    });

    let tool_config = req.tool_choice.as_ref().map(|choice| match choice {
        ToolChoice::Auto => ToolConfig::mode("AUTO"),
        ToolChoice::Any => ToolConfig::mode("ANY"),
        ToolChoice::None => ToolConfig::mode("NONE"),
        ToolChoice::Tool { name } => ToolConfig::forced(name.clone()),
    });

    GenerateContentRequest {
        contents,
        system_instruction,
        generation_config: Some(generation_config),
        tools,
        tool_config,
        session_id: Some(session_id),
        extra: Default::default(),
    }
}

/// The upstream requires `role:"user"` on the system instruction; a
/// literal `"system"` role is rejected.
fn system_instruction(system: &SystemPrompt) -> Content {
    Content {
        role: Some("user".to_string()),
        parts: vec![Part::text(system.plain_text())],
        extra: Default::default(),
    }
}
