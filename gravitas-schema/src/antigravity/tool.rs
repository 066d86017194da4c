use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Tool declarations (`tools: [{functionDeclarations: [...]}]`).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Tool {
    #[serde(default)]
    pub function_declarations: Vec<FunctionDeclaration>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionDeclaration {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Coerced JSON Schema: always an object schema with a `properties` map.
    pub parameters: Value,
}

/// `toolConfig.functionCallingConfig` routing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolConfig {
    pub function_calling_config: FunctionCallingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionCallingConfig {
    pub mode: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allowed_function_names: Option<Vec<String>>,
}

impl ToolConfig {
    pub fn mode(mode: impl Into<String>) -> Self {
        Self {
            function_calling_config: FunctionCallingConfig {
                mode: mode.into(),
                allowed_function_names: None,
            },
        }
    }

    pub fn forced(name: impl Into<String>) -> Self {
        Self {
            function_calling_config: FunctionCallingConfig {
                mode: "ANY".to_string(),
                allowed_function_names: Some(vec![name.into()]),
            },
        }
    }
}
