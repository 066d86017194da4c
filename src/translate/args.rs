use crate::config::RepairConfig;
use gravitas_schema::antigravity::FunctionCall;
use serde_json::{Map, Value};

/// Context distilled from the most recent user turn, feeding the
/// fill-from-user-text recovery heuristic.
#[derive(Debug, Clone, Default)]
pub struct UserContext {
    pub text: String,
    pub urls: Vec<String>,
    pub paths: Vec<String>,
    pub quoted: Vec<String>,
}

impl UserContext {
    pub fn from_text(text: Option<String>) -> Self {
        let text = text.unwrap_or_default();
        Self {
            urls: extract_urls(&text),
            paths: extract_paths(&text),
            quoted: extract_quoted(&text),
            text,
        }
    }
}

/// Normalize `functionCall.args` into a plain JSON object.
///
/// Upstream emits several shapes: plain objects, proto-struct envelopes
/// (`{"fields": {...}}` with typed values), keyed lists, and raw JSON
/// strings. Anything unparsable lands under `_raw` for the repair pass.
pub fn parse_function_args(call: &FunctionCall) -> Map<String, Value> {
    let Some(args) = &call.args else {
        return Map::new();
    };

    match args {
        Value::Object(map) => {
            if map.contains_key("fields") {
                match unwrap_proto_struct(args) {
                    Value::Object(decoded) => decoded,
                    other => singleton_raw(other),
                }
            } else if map.contains_key("structValue") {
                match unwrap_proto_value(args) {
                    Value::Object(decoded) => decoded,
                    other => singleton_raw(other),
                }
            } else {
                map.clone()
            }
        }

        // Keyed-list form: [{"key": ..., "value": ...}, ...]
        Value::Array(items) => {
            let mut out = Map::new();
            for item in items {
                let Value::Object(entry) = item else { continue };
                let key = entry
                    .get("key")
                    .or_else(|| entry.get("name"))
                    .map(unwrap_proto_value);
                let Some(Value::String(key)) = key else {
                    continue;
                };
                let value = entry
                    .get("value")
                    .map(unwrap_proto_value)
                    .unwrap_or(Value::Null);
                out.insert(key, value);
            }
            out
        }

        Value::String(raw) => {
            let trimmed = raw.trim();
            if trimmed.is_empty() {
                return Map::new();
            }
            match serde_json::from_str::<Value>(trimmed) {
                Ok(Value::Object(map)) => map,
                Ok(other) => singleton_raw(other),
                Err(_) => singleton_raw(Value::String(trimmed.to_string())),
            }
        }

        other => singleton_raw(other.clone()),
    }
}

fn singleton_raw(value: Value) -> Map<String, Value> {
    let mut map = Map::new();
    map.insert("_raw".to_string(), value);
    map
}

fn unwrap_proto_struct(value: &Value) -> Value {
    match value.get("fields") {
        Some(Value::Object(fields)) => Value::Object(
            fields
                .iter()
                .map(|(k, v)| (k.clone(), unwrap_proto_value(v)))
                .collect(),
        ),
        _ => value.clone(),
    }
}

fn unwrap_proto_value(value: &Value) -> Value {
    let Value::Object(map) = value else {
        return value.clone();
    };
    if let Some(s) = map.get("stringValue") {
        return s.clone();
    }
    if let Some(n) = map.get("numberValue") {
        return n.clone();
    }
    if let Some(b) = map.get("boolValue") {
        return b.clone();
    }
    if map.contains_key("nullValue") {
        return Value::Null;
    }
    if let Some(inner) = map.get("structValue") {
        return unwrap_proto_struct(inner);
    }
    if let Some(list) = map.get("listValue") {
        let values = list
            .get("values")
            .and_then(Value::as_array)
            .map(|items| items.iter().map(unwrap_proto_value).collect())
            .unwrap_or_default();
        return Value::Array(values);
    }
    value.clone()
}

/// Alias table for healing obvious key mismatches. Applied only when the
/// target key is required by the declared schema and the source key holds
/// a value.
const KEY_ALIASES: [(&str, &[&str]); 5] = [
    ("url", &["uri", "link", "href"]),
    ("query", &["q", "search", "prompt"]),
    ("path", &["file", "filepath", "file_path"]),
    ("file_path", &["path", "file", "filepath"]),
    ("command", &["cmd"]),
];

/// Best-effort repair of tool-call arguments against the declared schema.
///
/// Applied to every upstream `functionCall.args` before emission. With
/// both repair flags off this reduces to proto-envelope decoding, which a
/// well-formed client still requires.
pub fn repair_args(
    call: &FunctionCall,
    schema: Option<&Value>,
    user: &UserContext,
    cfg: &RepairConfig,
) -> Map<String, Value> {
    let mut args = parse_function_args(call);

    let Some(schema) = schema else {
        args.remove("_raw");
        return args;
    };

    let properties = schema.get("properties").and_then(Value::as_object);
    let required: Vec<&str> = schema
        .get("required")
        .and_then(Value::as_array)
        .map(|keys| keys.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();

    if cfg.alias_healing && let Some(properties) = properties {
        for key in &required {
            if has_value(&args, key) {
                continue;
            }
            let aliases = KEY_ALIASES
                .iter()
                .find(|(target, _)| target.eq_ignore_ascii_case(key))
                .map(|(_, aliases)| *aliases)
                .unwrap_or(&[]);
            for alias in aliases {
                if properties.contains_key(*alias) || args.contains_key(*alias) {
                    if let Some(value) = args.get(*alias).filter(|v| !is_empty_value(v)).cloned() {
                        args.insert((*key).to_string(), value);
                        break;
                    }
                }
            }
        }
    }

    // A bare scalar that arrived without a key goes to the only sensible
    // parameter, when there is one.
    if let Some(raw) = args.remove("_raw")
        && !is_empty_value(&raw)
        && let Some(properties) = properties
    {
        let target = if required.len() == 1 && properties.contains_key(required[0]) {
            Some(required[0].to_string())
        } else if properties.len() == 1 {
            properties.keys().next().cloned()
        } else {
            ["command", "query", "path", "file_path", "url", "pattern", "text"]
                .into_iter()
                .find(|k| properties.contains_key(*k))
                .map(str::to_string)
        };
        if let Some(target) = target
            && !has_value(&args, &target)
        {
            args.insert(target, raw);
        }
    }

    if cfg.fill_from_user_text {
        for key in &required {
            if has_value(&args, key) {
                continue;
            }
            if let Some(value) = fill_from_user_text(key, user) {
                args.insert((*key).to_string(), Value::String(value));
            }
        }
    }

    args
}

fn has_value(args: &Map<String, Value>, key: &str) -> bool {
    args.get(key).is_some_and(|v| !is_empty_value(v))
}

fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}

/// Semantic fill for a missing required string parameter: the name hints
/// url / path / query, and the user text offered exactly one candidate of
/// that kind.
fn fill_from_user_text(key: &str, user: &UserContext) -> Option<String> {
    let lower = key.to_ascii_lowercase();
    let pick_single = |candidates: &[String]| -> Option<String> {
        match candidates {
            [only] => Some(only.clone()),
            _ => None,
        }
    };

    if lower.contains("url") || lower == "link" {
        return pick_single(&user.urls);
    }
    if lower.contains("path") || matches!(lower.as_str(), "file" | "directory" | "dir") {
        return pick_single(&user.paths);
    }
    if lower.contains("query") || matches!(lower.as_str(), "prompt" | "text" | "instruction") {
        if let Some(quoted) = pick_single(&user.quoted) {
            return Some(quoted);
        }
        let text = user.text.trim();
        return (!text.is_empty()).then(|| text.to_string());
    }
    None
}

fn extract_urls(text: &str) -> Vec<String> {
    let mut urls = Vec::new();
    for token in text.split_whitespace() {
        let cleaned = token.trim_end_matches(['.', ',', ';', ':', '!', '?', ')', '"', '\'']);
        if cleaned.starts_with("http://") || cleaned.starts_with("https://") {
            if !urls.contains(&cleaned.to_string()) {
                urls.push(cleaned.to_string());
            }
        }
    }
    urls
}

fn extract_paths(text: &str) -> Vec<String> {
    let mut paths = Vec::new();
    for token in text.split_whitespace() {
        let cleaned = token.trim_matches(['"', '\'', '`', ',', ';', '(', ')']);
        if cleaned.starts_with("http://") || cleaned.starts_with("https://") {
            continue;
        }
        let absolute = cleaned.starts_with('/') || cleaned.starts_with("~/") || cleaned.starts_with("./");
        let has_extension = cleaned
            .rsplit_once('.')
            .is_some_and(|(stem, ext)| {
                !stem.is_empty()
                    && (1..=6).contains(&ext.len())
                    && ext.chars().all(|c| c.is_ascii_alphanumeric())
            });
        if (absolute || has_extension) && !cleaned.ends_with('.') && cleaned.len() > 1 {
            if !paths.contains(&cleaned.to_string()) {
                paths.push(cleaned.to_string());
            }
        }
    }
    paths
}

fn extract_quoted(text: &str) -> Vec<String> {
    let mut quoted = Vec::new();
    for delim in ['"', '\''] {
        let mut rest = text;
        while let Some(start) = rest.find(delim) {
            let after = &rest[start + 1..];
            let Some(end) = after.find(delim) else { break };
            let candidate = &after[..end];
            if !candidate.is_empty() && !quoted.contains(&candidate.to_string()) {
                quoted.push(candidate.to_string());
            }
            rest = &after[end + 1..];
        }
    }
    quoted
}
