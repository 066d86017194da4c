use crate::error::ProxyError;
use serde::{Deserialize, Serialize};

/// One alias route (`models.haiku` / `.sonnet` / `.opus` in config.json).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ModelRoute {
    pub pattern: String,
    pub target: String,
    #[serde(rename = "type", default = "default_route_type")]
    pub kind: String,
}

fn default_route_type() -> String {
    "antigravity".to_string()
}

impl ModelRoute {
    fn new(pattern: &str, target: &str) -> Self {
        Self {
            pattern: pattern.to_string(),
            target: target.to_string(),
            kind: default_route_type(),
        }
    }
}

/// Alias routing table plus the token-counter model override.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ModelRoutes {
    #[serde(default = "default_haiku")]
    pub haiku: ModelRoute,

    #[serde(default = "default_sonnet")]
    pub sonnet: ModelRoute,

    #[serde(default = "default_opus")]
    pub opus: ModelRoute,

    /// Model family used by the local token counter heuristic.
    #[serde(default)]
    pub token_counter: Option<String>,
}

impl Default for ModelRoutes {
    fn default() -> Self {
        Self {
            haiku: default_haiku(),
            sonnet: default_sonnet(),
            opus: default_opus(),
            token_counter: None,
        }
    }
}

fn default_haiku() -> ModelRoute {
    ModelRoute::new("*haiku*", "antigravity-gemini-3-flash")
}

fn default_sonnet() -> ModelRoute {
    ModelRoute::new("*sonnet*", "antigravity-claude-sonnet-4-5-thinking")
}

fn default_opus() -> ModelRoute {
    ModelRoute::new("*opus*", "antigravity-claude-opus-4-5-thinking")
}

/// Outcome of alias resolution: what the client asked for, what goes on
/// the wire, and whether the interleaved-thinking contract applies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedModel {
    /// The alias exactly as the client sent it; echoed back in responses.
    pub alias: String,

    /// Upstream model id with the `antigravity-` prefix stripped and
    /// Claude dot-suffixes normalized (4.5 → 4-5).
    pub upstream_id: String,

    pub is_claude_thinking: bool,
}

impl ModelRoutes {
    /// Resolve a client alias to a concrete upstream model id.
    ///
    /// Literal `antigravity-*` ids pass through verbatim; otherwise the
    /// alias is matched by case-insensitive substring against the haiku /
    /// sonnet / opus routes. Anything else is a client error.
    pub fn resolve(&self, alias: &str) -> Result<ResolvedModel, ProxyError> {
        let target = if alias.starts_with("antigravity-") {
            alias.to_string()
        } else {
            let lower = alias.to_lowercase();
            if lower.contains("haiku") {
                self.haiku.target.clone()
            } else if lower.contains("sonnet") {
                self.sonnet.target.clone()
            } else if lower.contains("opus") {
                self.opus.target.clone()
            } else {
                return Err(ProxyError::UnknownModel(alias.to_string()));
            }
        };

        let upstream_id = normalize_claude_model(target.strip_prefix("antigravity-").unwrap_or(&target));
        let is_claude_thinking =
            upstream_id.starts_with("claude-") && upstream_id.contains("thinking");

        Ok(ResolvedModel {
            alias: alias.to_string(),
            upstream_id,
            is_claude_thinking,
        })
    }
}

/// Claude model ids sometimes arrive with a dot version suffix; the
/// upstream only accepts the hyphenated form.
fn normalize_claude_model(model: &str) -> String {
    if !model.contains("claude-") {
        return model.to_string();
    }
    model
        .replace("claude-opus-4.5", "claude-opus-4-5")
        .replace("claude-sonnet-4.5", "claude-sonnet-4-5")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alias_substrings_route_to_configured_targets() {
        let routes = ModelRoutes::default();

        let haiku = routes.resolve("claude-3-haiku-20240307").unwrap();
        assert_eq!(haiku.upstream_id, "gemini-3-flash");
        assert_eq!(haiku.alias, "claude-3-haiku-20240307");
        assert!(!haiku.is_claude_thinking);

        let sonnet = routes.resolve("claude-sonnet-4-5").unwrap();
        assert_eq!(sonnet.upstream_id, "claude-sonnet-4-5-thinking");
        assert!(sonnet.is_claude_thinking);

        let opus = routes.resolve("my-OPUS-alias").unwrap();
        assert_eq!(opus.upstream_id, "claude-opus-4-5-thinking");
    }

    #[test]
    fn literal_antigravity_id_passes_through_with_prefix_stripped() {
        let routes = ModelRoutes::default();
        let resolved = routes.resolve("antigravity-gemini-3-pro-high").unwrap();
        assert_eq!(resolved.upstream_id, "gemini-3-pro-high");
        assert_eq!(resolved.alias, "antigravity-gemini-3-pro-high");
    }

    #[test]
    fn unknown_alias_is_an_error() {
        let routes = ModelRoutes::default();
        assert!(matches!(
            routes.resolve("gpt-4o"),
            Err(ProxyError::UnknownModel(alias)) if alias == "gpt-4o"
        ));
    }

    #[test]
    fn claude_dot_versions_normalize() {
        let routes = ModelRoutes::default();
        let resolved = routes.resolve("antigravity-claude-opus-4.5-thinking").unwrap();
        assert_eq!(resolved.upstream_id, "claude-opus-4-5-thinking");
        assert!(resolved.is_claude_thinking);
    }
}
