use super::content::Content;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// `generateContent` response or one `streamGenerateContent` delta.
///
/// Antigravity wraps the Gemini body in `{"response": {...}, "traceId":
/// ...}`; deserialization accepts both the wrapped and the bare form, and
/// [`GenerateContentResponse::unwrapped`] returns the flattened view.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<Box<GenerateContentResponse>>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub candidates: Vec<Candidate>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage_metadata: Option<UsageMetadata>,

    #[serde(default, flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl GenerateContentResponse {
    /// Flattened view: descends through the `response` wrapper when the
    /// bare body carries no candidates of its own.
    pub fn unwrapped(&self) -> &GenerateContentResponse {
        match &self.response {
            Some(inner) if self.candidates.is_empty() => inner.unwrapped(),
            _ => self,
        }
    }

    pub fn first_candidate(&self) -> Option<&Candidate> {
        self.unwrapped().candidates.first()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<Content>,

    /// `STOP`, `MAX_TOKENS`, `SAFETY`, … absent on non-terminal deltas.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,

    #[serde(default, flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct UsageMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt_token_count: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub candidates_token_count: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_token_count: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn bare_body_parses() {
        let resp: GenerateContentResponse = serde_json::from_value(json!({
            "candidates": [{
                "content": {"role": "model", "parts": [{"text": "pong"}]},
                "finishReason": "STOP"
            }],
            "usageMetadata": {"promptTokenCount": 3, "candidatesTokenCount": 1}
        }))
        .unwrap();
        let candidate = resp.first_candidate().unwrap();
        assert_eq!(candidate.finish_reason.as_deref(), Some("STOP"));
        assert_eq!(
            resp.unwrapped().usage_metadata.unwrap().prompt_token_count,
            Some(3)
        );
    }

    #[test]
    fn wrapped_envelope_unwraps() {
        let resp: GenerateContentResponse = serde_json::from_value(json!({
            "response": {
                "candidates": [{
                    "content": {"role": "model", "parts": [{"text": "hi"}]}
                }]
            },
            "traceId": "trace-1"
        }))
        .unwrap();
        assert!(resp.candidates.is_empty());
        let candidate = resp.first_candidate().unwrap();
        assert_eq!(
            candidate.content.as_ref().unwrap().parts[0].text.as_deref(),
            Some("hi")
        );
    }

    #[test]
    fn delta_without_finish_reason_is_non_terminal() {
        let resp: GenerateContentResponse = serde_json::from_value(json!({
            "candidates": [{"content": {"parts": [{"thought": true, "text": "mull"}]}}]
        }))
        .unwrap();
        let candidate = resp.first_candidate().unwrap();
        assert!(candidate.finish_reason.is_none());
        assert!(candidate.content.as_ref().unwrap().parts[0].is_thought_text());
    }
}
