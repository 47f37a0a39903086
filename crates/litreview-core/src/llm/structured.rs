//! Schema-coerced JSON completions.
//!
//! Models in JSON-object mode occasionally echo the schema back, mix schema
//! keys into the content, or truncate the output. This layer appends a
//! schema-description preamble to the system message and applies explicit
//! post-parse defenses before validating against the target type. The
//! defenses are a correctness-critical contract, not incidental.

use std::time::Instant;

use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde_json::Value;

use super::{ChatClient, ChatMessage, CompletionParams};
use crate::cost::CostTracker;
use crate::error::LlmError;
use crate::schema::MessageRole;

/// Keys that indicate the model returned a schema definition.
const SCHEMA_KEYS: [&str; 5] = ["properties", "type", "required", "$schema", "$defs"];

/// Request a completion and validate it against `T`.
///
/// The schema preamble is appended to the first system message; a system
/// message is inserted when none exists. Token usage and call latency are
/// recorded into the cost tracker.
pub async fn structured_completion<T>(
    client: &dyn ChatClient,
    costs: &CostTracker,
    messages: Vec<ChatMessage>,
    params: CompletionParams,
) -> Result<T, LlmError>
where
    T: DeserializeOwned + JsonSchema,
{
    let preamble = schema_preamble::<T>();
    let augmented = augment_messages(messages, &preamble);

    let start = Instant::now();
    let response = client.complete_json(&augmented, &params).await?;
    let latency_ms = start.elapsed().as_secs_f64() * 1000.0;
    costs.record_llm_usage(
        &response.model,
        response.usage.prompt_tokens,
        response.usage.completion_tokens,
        latency_ms,
    );

    if response.text.trim().is_empty() {
        return Err(LlmError::EmptyResponse);
    }

    let parsed = parse_content(&response.text)?;
    let cleaned = strip_schema_echo(parsed, &response.text)?;

    serde_json::from_value::<T>(cleaned).map_err(|e| {
        tracing::error!(
            error = %e,
            raw = %truncate(&response.text, 500),
            "LLM output failed validation"
        );
        LlmError::Validation {
            type_name: std::any::type_name::<T>(),
            message: e.to_string(),
        }
    })
}

/// Append the schema preamble to the first system message, inserting one
/// when the conversation has none.
fn augment_messages(mut messages: Vec<ChatMessage>, preamble: &str) -> Vec<ChatMessage> {
    match messages.iter().position(|m| m.role == MessageRole::System) {
        Some(i) => {
            let existing = std::mem::take(&mut messages[i].content);
            messages[i].content = format!("{existing}\n\n{preamble}");
        }
        None => messages.insert(0, ChatMessage::system(preamble)),
    }
    messages
}

/// Parse the completion as JSON, annotating likely truncation.
fn parse_content(raw: &str) -> Result<Value, LlmError> {
    match serde_json::from_str::<Value>(raw) {
        Ok(v) => Ok(v),
        Err(e) => {
            let trimmed = raw.trim_end();
            let looks_truncated = e.is_eof()
                || !(trimmed.ends_with('}') || trimmed.ends_with(']'));
            let truncation_hint = if looks_truncated {
                " (output likely truncated - try reducing paper count or increasing max_tokens)"
                    .to_string()
            } else {
                String::new()
            };
            tracing::error!(
                error = %e,
                truncated = looks_truncated,
                raw_tail = %tail(raw, 500),
                "LLM returned invalid JSON"
            );
            Err(LlmError::Parse {
                message: e.to_string(),
                truncation_hint,
            })
        }
    }
}

/// Detect and repair schema-as-content responses.
///
/// An object whose only keys are schema keys is an outright schema echo and
/// fails. An object mixing schema keys with real content has the schema keys
/// stripped with a warning.
fn strip_schema_echo(parsed: Value, raw: &str) -> Result<Value, LlmError> {
    let Value::Object(map) = parsed else {
        return Ok(parsed);
    };

    let has_properties = map.contains_key("properties");
    let content_keys: Vec<&String> = map
        .keys()
        .filter(|k| !SCHEMA_KEYS.contains(&k.as_str()))
        .collect();

    if has_properties && content_keys.is_empty() {
        tracing::error!(
            raw = %truncate(raw, 500),
            "LLM returned schema definition instead of content"
        );
        return Err(LlmError::SchemaEcho);
    }

    if has_properties {
        tracing::warn!(
            content_keys = ?content_keys,
            "LLM mixed schema with content, stripping schema keys"
        );
        let cleaned: serde_json::Map<String, Value> = map
            .into_iter()
            .filter(|(k, _)| !SCHEMA_KEYS.contains(&k.as_str()))
            .collect();
        return Ok(Value::Object(cleaned));
    }

    Ok(Value::Object(map))
}

/// Build the human-readable schema description for `T`.
fn schema_preamble<T: JsonSchema>() -> String {
    let root = schemars::gen::SchemaGenerator::default().into_root_schema_for::<T>();
    let schema = serde_json::to_value(root).unwrap_or_default();

    let defs = schema
        .get("$defs")
        .or_else(|| schema.get("definitions"))
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();

    let required: Vec<String> = schema
        .get("required")
        .and_then(Value::as_array)
        .map(|a| {
            a.iter()
                .filter_map(Value::as_str)
                .map(String::from)
                .collect()
        })
        .unwrap_or_default();

    let empty = serde_json::Map::new();
    let properties = schema
        .get("properties")
        .and_then(Value::as_object)
        .unwrap_or(&empty);

    let field_lines: Vec<String> = required
        .iter()
        .map(|name| {
            let field_type = properties
                .get(name)
                .map(|p| resolve_type(p, &defs))
                .unwrap_or_else(|| "unknown".to_string());
            format!("  \"{name}\": <{field_type}>")
        })
        .collect();
    let example_structure = format!("{{\n{}\n}}", field_lines.join(",\n"));

    let nested_hints: Vec<String> = defs
        .iter()
        .filter_map(|(name, def)| {
            let def_required: Vec<&str> = def
                .get("required")
                .and_then(Value::as_array)?
                .iter()
                .filter_map(Value::as_str)
                .collect();
            if def_required.is_empty() {
                None
            } else {
                Some(format!("{name}: use fields {def_required:?}"))
            }
        })
        .collect();
    let nested_info = if nested_hints.is_empty() {
        String::new()
    } else {
        format!("\nNested object fields: {}", nested_hints.join("; "))
    };

    format!(
        "RESPONSE FORMAT: Return a JSON object with YOUR ACTUAL CONTENT.\n\
         Required fields: {required:?}\n\
         Structure:\n{example_structure}{nested_info}\n\
         IMPORTANT: Fill in actual values, NOT the schema definition."
    )
}

/// Resolve a property schema to a short type description.
fn resolve_type(prop: &Value, defs: &serde_json::Map<String, Value>) -> String {
    if let Some(reference) = prop.get("$ref").and_then(Value::as_str) {
        let ref_name = reference.rsplit('/').next().unwrap_or(reference);
        if let Some(def) = defs.get(ref_name) {
            let ref_required: Vec<String> = def
                .get("required")
                .and_then(Value::as_array)
                .map(|a| {
                    a.iter()
                        .filter_map(Value::as_str)
                        .map(|s| format!("\"{s}\""))
                        .collect()
                })
                .unwrap_or_default();
            if !ref_required.is_empty() {
                return format!("object with fields: {}", ref_required.join(", "));
            }
        }
        return ref_name.to_string();
    }

    // schemars wraps annotated refs in a single-element allOf.
    if let Some(branches) = prop.get("allOf").and_then(Value::as_array) {
        if let Some(first) = branches.first() {
            return resolve_type(first, defs);
        }
    }

    if let Some(branches) = prop.get("anyOf").and_then(Value::as_array) {
        if let Some(branch) = branches
            .iter()
            .find(|b| b.get("type").and_then(Value::as_str) != Some("null"))
        {
            return resolve_type(branch, defs);
        }
    }

    match prop.get("type") {
        Some(Value::String(t)) if t == "array" => {
            let item_type = prop
                .get("items")
                .map(|items| resolve_type(items, defs))
                .unwrap_or_else(|| "unknown".to_string());
            format!("array of {item_type}")
        }
        Some(Value::String(t)) => t.clone(),
        // Nullable fields serialize as a type list; report the non-null type.
        Some(Value::Array(types)) => types
            .iter()
            .filter_map(Value::as_str)
            .find(|t| *t != "null")
            .unwrap_or("unknown")
            .to_string(),
        _ => "unknown".to_string(),
    }
}

fn truncate(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

fn tail(s: &str, max: usize) -> String {
    let count = s.chars().count();
    s.chars().skip(count.saturating_sub(max)).collect()
}
