use crate::error::ProxyError;
use gravitas_schema::anthropic::ToolDeclaration;
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Schema keys the upstream rejects outright.
const FORBIDDEN_KEYS: [&str; 5] = ["additionalProperties", "default", "$schema", "$id", "examples"];

/// `format` values the upstream accepts; everything else is dropped.
const ACCEPTED_FORMATS: [&str; 2] = ["date-time", "enum"];

/// A tool declaration after coercion, ready for the upstream wire.
#[derive(Debug, Clone)]
pub struct CoercedTool {
    pub name: String,
    pub description: Option<String>,
    pub parameters: Value,
}

/// Coerce every declared tool to the Antigravity JSON Schema subset.
///
/// Fails with `schema_invalid` (a client 400, before any upstream call)
/// when a declaration cannot become an object schema. Also returns the
/// name → coerced-schema map used later for argument repair.
pub fn coerce_tools(
    tools: &[ToolDeclaration],
) -> Result<(Vec<CoercedTool>, HashMap<String, Value>), ProxyError> {
    let mut coerced = Vec::with_capacity(tools.len());
    let mut schemas = HashMap::with_capacity(tools.len());

    for tool in tools {
        let parameters = coerce_tool_schema(&tool.name, &tool.input_schema)?;
        schemas.insert(tool.name.clone(), parameters.clone());
        coerced.push(CoercedTool {
            name: tool.name.clone(),
            description: tool.description.clone(),
            parameters,
        });
    }

    Ok((coerced, schemas))
}

/// Coerce one `input_schema` to the accepted subset.
pub fn coerce_tool_schema(tool_name: &str, schema: &Value) -> Result<Value, ProxyError> {
    let Value::Object(_) = schema else {
        return Err(ProxyError::SchemaInvalid {
            tool: tool_name.to_string(),
            message: "input_schema must be a JSON object".to_string(),
        });
    };

    let declared_type = schema.get("type").and_then(Value::as_str);
    if let Some(t) = declared_type
        && t != "object"
    {
        return Err(ProxyError::SchemaInvalid {
            tool: tool_name.to_string(),
            message: format!("top-level schema type must be \"object\", got \"{t}\""),
        });
    }

    let mut out = schema.clone();
    coerce_node(&mut out, true);
    Ok(out)
}

/// Recursive cleanup of one schema node.
///
/// `force_object` marks nodes that must end up as object schemas (the top
/// level and anything that already declares object shape).
fn coerce_node(node: &mut Value, force_object: bool) {
    let Value::Object(map) = node else {
        return;
    };

    for key in FORBIDDEN_KEYS {
        map.remove(key);
    }

    let accepts_format = map
        .get("format")
        .and_then(Value::as_str)
        .is_some_and(|f| ACCEPTED_FORMATS.contains(&f));
    if map.contains_key("format") && !accepts_format {
        map.remove("format");
    }

    if map
        .get("required")
        .and_then(Value::as_array)
        .is_some_and(Vec::is_empty)
    {
        map.remove("required");
    }

    let object_like = force_object
        || map.get("type").and_then(Value::as_str) == Some("object")
        || map.contains_key("properties");
    if object_like {
        map.insert("type".to_string(), Value::String("object".to_string()));
        map.entry("properties")
            .or_insert_with(|| Value::Object(Map::new()));
    }

    if let Some(Value::Object(properties)) = map.get_mut("properties") {
        for property in properties.values_mut() {
            coerce_node(property, false);
        }
    }
    if let Some(items) = map.get_mut("items") {
        coerce_node(items, false);
    }
    for combinator in ["oneOf", "anyOf", "allOf"] {
        if let Some(Value::Array(members)) = map.get_mut(combinator) {
            for member in members {
                coerce_node(member, false);
            }
        }
    }
}
