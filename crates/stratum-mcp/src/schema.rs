//! Translation of MCP JSON-Schema tool inputs into the provider's
//! function-declaration form.
//!
//! Rules: the six primitive schema types map directly; `null` collapses to
//! `string`; `anyOf` selects the first non-null variant; a missing root
//! type defaults to `object`; string `enum`s pass through; the description
//! falls back to the title.

use serde_json::{json, Map, Value};

use stratum_core::chat::ToolDecl;

use crate::types::ToolDescriptor;

/// Translate one advertised tool into a declaration the gateway can send.
pub fn translate_tool(desc: &ToolDescriptor) -> ToolDecl {
    let mut root = desc.input_schema.clone().unwrap_or_else(|| json!({}));
    if !root.is_object() {
        root = json!({});
    }
    if schema_type(&root).map(|t| t != "object").unwrap_or(true) {
        root["type"] = json!("object");
    }

    ToolDecl {
        name: desc.name.clone(),
        description: first_non_empty(&[desc.description.as_deref(), desc.title.as_deref()]),
        parameters: convert_property(&root),
    }
}

/// Recursively convert a JSON-Schema node.
pub fn convert_property(schema: &Value) -> Value {
    if let Some(variants) = schema.get("anyOf").and_then(Value::as_array) {
        for variant in variants {
            if schema_type(variant).map(|t| t != "null").unwrap_or(false) {
                return convert_property(variant);
            }
        }
        return json!({"type": "string"});
    }

    let kind = map_type(schema_type(schema).unwrap_or("string"));
    let mut out = Map::new();
    out.insert("type".into(), json!(kind));

    let desc = first_non_empty(&[
        schema.get("description").and_then(Value::as_str),
        schema.get("title").and_then(Value::as_str),
    ]);
    if !desc.is_empty() {
        out.insert("description".into(), json!(desc));
    }

    if let Some(enum_vals) = string_enum(schema) {
        out.insert("enum".into(), json!(enum_vals));
    }

    match kind {
        "array" => {
            let items = schema
                .get("items")
                .map(convert_property)
                .unwrap_or_else(|| json!({"type": "string"}));
            out.insert("items".into(), items);
        }
        "object" => {
            let mut props = Map::new();
            if let Some(source) = schema.get("properties").and_then(Value::as_object) {
                for (name, sub) in source {
                    props.insert(name.clone(), convert_property(sub));
                }
            }
            out.insert("properties".into(), Value::Object(props));

            if let Some(required) = schema.get("required").and_then(Value::as_array) {
                if !required.is_empty() {
                    out.insert("required".into(), json!(required));
                }
            }
        }
        _ => {}
    }

    Value::Object(out)
}

fn schema_type(schema: &Value) -> Option<&str> {
    match schema.get("type") {
        Some(Value::String(t)) => Some(t.as_str()),
        // Some generators emit "type": ["string", "null"]; take the head.
        Some(Value::Array(types)) => types.first().and_then(Value::as_str),
        _ => None,
    }
}

fn map_type(t: &str) -> &'static str {
    match t.trim().to_ascii_lowercase().as_str() {
        "string" => "string",
        "number" => "number",
        "integer" => "integer",
        "boolean" => "boolean",
        "array" => "array",
        "object" => "object",
        // "null" and anything unrecognized collapse to string
        _ => "string",
    }
}

fn string_enum(schema: &Value) -> Option<Vec<String>> {
    let vals = schema.get("enum")?.as_array()?;
    let strings: Vec<String> = vals
        .iter()
        .filter_map(|v| v.as_str().map(String::from))
        .collect();
    if strings.is_empty() {
        None
    } else {
        Some(strings)
    }
}

fn first_non_empty(candidates: &[Option<&str>]) -> String {
    candidates
        .iter()
        .flatten()
        .map(|s| s.trim())
        .find(|s| !s.is_empty())
        .unwrap_or("")
        .to_owned()
}
