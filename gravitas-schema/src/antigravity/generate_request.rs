use super::content::Content;
use super::generation::GenerationConfig;
use super::tool::{Tool, ToolConfig};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Inner `request` object of the upstream envelope.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentRequest {
    pub contents: Vec<Content>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<Content>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation_config: Option<GenerationConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<Tool>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_config: Option<ToolConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,

    #[serde(default, flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Outer request envelope posted to `v1internal:generateContent` /
/// `v1internal:streamGenerateContent`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpstreamEnvelope {
    /// Managed Google Cloud project id.
    pub project: String,

    /// Upstream model id with any routing prefix already stripped.
    pub model: String,

    pub request: GenerateContentRequest,

    pub request_type: String,

    pub request_id: String,

    pub user_agent: String,
}

impl UpstreamEnvelope {
    pub fn agent(
        project: impl Into<String>,
        model: impl Into<String>,
        request_id: impl Into<String>,
        request: GenerateContentRequest,
    ) -> Self {
        Self {
            project: project.into(),
            model: model.into(),
            request,
            request_type: "agent".to_string(),
            request_id: request_id.into(),
            user_agent: "antigravity".to_string(),
        }
    }
}
