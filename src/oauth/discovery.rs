use crate::config::{CLIENT_METADATA_HEADER, UpstreamConfig, X_GOOG_API_CLIENT};
use crate::error::OauthError;
use serde_json::{Value, json};
use std::time::Duration;
use tracing::debug;

/// Discover the managed Google Cloud project id via `loadCodeAssist`.
///
/// Always calls the production endpoint regardless of endpoint-pool
/// preference: the sandbox endpoints return inconsistent project
/// metadata. Returns `Ok(None)` when the response carries no usable id.
pub async fn discover_project_id(
    cfg: &UpstreamConfig,
    access_token: &str,
    project_id_hint: Option<&str>,
    http_client: &reqwest::Client,
) -> Result<Option<String>, OauthError> {
    let url = cfg
        .discovery_base
        .join("/v1internal:loadCodeAssist")
        .map_err(|e| OauthError::Other {
            message: format!("invalid discovery URL: {e}"),
        })?;

    let mut metadata = json!({
        "ideType": "IDE_UNSPECIFIED",
        "platform": "PLATFORM_UNSPECIFIED",
        "pluginType": "GEMINI",
    });
    if let Some(hint) = project_id_hint {
        metadata["duetProject"] = Value::String(hint.to_string());
    }

    let resp = http_client
        .post(url)
        .bearer_auth(access_token)
        .header(reqwest::header::USER_AGENT, cfg.user_agent.as_str())
        .header("x-goog-api-client", X_GOOG_API_CLIENT)
        .header("client-metadata", CLIENT_METADATA_HEADER)
        .timeout(Duration::from_secs(10))
        .json(&json!({ "metadata": metadata }))
        .send()
        .await?;

    if !resp.status().is_success() {
        return Err(OauthError::UpstreamStatus(resp.status()));
    }

    let payload = resp.json::<Value>().await?;
    let found = extract_managed_project_id(&payload);
    debug!(project_id = ?found, "loadCodeAssist discovery completed");
    Ok(found)
}

/// Depth-first search of the discovery payload for a managed project id.
///
/// Accepted shapes, first non-empty match wins:
/// - `cloudaicompanionProject` as a string
/// - `cloudaicompanionProject.{id,projectId}` as a string
/// - `allowedIntegrations[*].projectId` at any depth
pub fn extract_managed_project_id(payload: &Value) -> Option<String> {
    fn non_empty(value: &Value) -> Option<String> {
        value
            .as_str()
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    }

    fn walk(value: &Value) -> Option<String> {
        let Value::Object(map) = value else {
            if let Value::Array(items) = value {
                return items.iter().find_map(walk);
            }
            return None;
        };

        if let Some(companion) = map.get("cloudaicompanionProject") {
            if let Some(id) = non_empty(companion) {
                return Some(id);
            }
            if let Value::Object(obj) = companion {
                for key in ["id", "projectId"] {
                    if let Some(id) = obj.get(key).and_then(non_empty) {
                        return Some(id);
                    }
                }
            }
        }

        if let Some(Value::Array(integrations)) = map.get("allowedIntegrations") {
            for integration in integrations {
                if let Some(id) = integration.get("projectId").and_then(non_empty) {
                    return Some(id);
                }
            }
        }

        map.values().find_map(walk)
    }

    walk(payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn string_companion_project_wins() {
        let payload = json!({"cloudaicompanionProject": "project-a"});
        assert_eq!(
            extract_managed_project_id(&payload).as_deref(),
            Some("project-a")
        );
    }

    #[test]
    fn object_companion_project_reads_id_then_project_id() {
        let payload = json!({"cloudaicompanionProject": {"id": "project-b"}});
        assert_eq!(
            extract_managed_project_id(&payload).as_deref(),
            Some("project-b")
        );

        let payload = json!({"cloudaicompanionProject": {"projectId": "project-c"}});
        assert_eq!(
            extract_managed_project_id(&payload).as_deref(),
            Some("project-c")
        );
    }

    #[test]
    fn nested_wrapped_response_is_searched_depth_first() {
        let payload = json!({
            "response": {
                "cloudaicompanionProject": {"id": "project-d"}
            }
        });
        assert_eq!(
            extract_managed_project_id(&payload).as_deref(),
            Some("project-d")
        );
    }

    #[test]
    fn allowed_integrations_project_id_is_found() {
        let payload = json!({
            "currentTier": {"id": "FREE"},
            "allowedIntegrations": [
                {"name": "other"},
                {"projectId": "project-e"}
            ]
        });
        assert_eq!(
            extract_managed_project_id(&payload).as_deref(),
            Some("project-e")
        );
    }

    #[test]
    fn empty_strings_do_not_match() {
        let payload = json!({
            "cloudaicompanionProject": "",
            "allowedIntegrations": [{"projectId": ""}]
        });
        assert_eq!(extract_managed_project_id(&payload), None);
    }
}
