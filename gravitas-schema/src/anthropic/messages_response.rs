use super::content::ContentBlock;
use serde::{Deserialize, Serialize};

/// Anthropic `POST /v1/messages` non-streaming response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagesResponse {
    /// Synthesized `msg_<uuid>` identifier.
    pub id: String,

    #[serde(rename = "type")]
    pub kind: String,

    pub role: String,

    /// The alias the client originally requested, never the upstream id.
    pub model: String,

    pub content: Vec<ContentBlock>,

    pub stop_reason: Option<String>,

    pub stop_sequence: Option<String>,

    pub usage: Usage,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// Standard Anthropic-convention error envelope:
/// `{"type":"error","error":{"type":...,"message":...}}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    #[serde(rename = "type")]
    pub kind: String,
    pub error: ErrorObject,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorObject {
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
}

impl ErrorBody {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: "error".to_string(),
            error: ErrorObject {
                kind: kind.into(),
                message: message.into(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn error_body_serializes_to_anthropic_shape() {
        let body = ErrorBody::new("rate_limit_error", "slow down");
        assert_eq!(
            serde_json::to_value(&body).unwrap(),
            json!({
                "type": "error",
                "error": {"type": "rate_limit_error", "message": "slow down"}
            })
        );
    }

    #[test]
    fn response_roundtrips() {
        let input = json!({
            "id": "msg_abc",
            "type": "message",
            "role": "assistant",
            "model": "claude-3-haiku-x",
            "content": [{"type": "text", "text": "pong"}],
            "stop_reason": "end_turn",
            "stop_sequence": null,
            "usage": {"input_tokens": 3, "output_tokens": 1}
        });
        let resp: MessagesResponse = serde_json::from_value(input.clone()).unwrap();
        assert_eq!(serde_json::to_value(&resp).unwrap(), input);
    }
}
