//! Recovers the model's JSON payload from a provider response envelope.

use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;
use serde_json::Value;

lazy_static! {
    static ref FENCED_BLOCK: Regex = Regex::new(r"(?s)```[A-Za-z0-9_-]*[ \t]*\r?\n?(.*?)```").unwrap();
}

/// Where the payload came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadSource {
    /// A structured field the provider already parsed.
    Parsed,
    /// JSON recovered from the model's free text.
    Text,
    Missing,
}

#[derive(Debug, Clone)]
pub struct Extracted {
    pub payload: Option<Value>,
    pub raw_text: Option<String>,
    pub source: PayloadSource,
}

pub fn extract_payload(envelope: &Value) -> Extracted {
    let raw_text = output_text(envelope);

    if let Some(parsed) = parsed_field(envelope) {
        return Extracted {
            payload: Some(parsed.clone()),
            raw_text,
            source: PayloadSource::Parsed,
        };
    }

    match raw_text.as_deref().and_then(json_from_text) {
        Some(payload) => Extracted {
            payload: Some(payload),
            raw_text,
            source: PayloadSource::Text,
        },
        None => Extracted {
            payload: None,
            raw_text,
            source: PayloadSource::Missing,
        },
    }
}

fn parsed_field(envelope: &Value) -> Option<&Value> {
    if let Some(v) = envelope.get("output_parsed").filter(|v| v.is_object()) {
        return Some(v);
    }
    output_parts(envelope)
        .filter_map(|part| part.get("parsed"))
        .find(|v| v.is_object())
}

fn output_parts(envelope: &Value) -> impl Iterator<Item = &Value> {
    envelope
        .get("output")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|item| item.get("content").and_then(Value::as_array))
        .flatten()
}

fn output_text(envelope: &Value) -> Option<String> {
    if let Some(t) = envelope
        .get("output_text")
        .and_then(Value::as_str)
        .filter(|t| !t.trim().is_empty())
    {
        return Some(t.to_string());
    }
    let joined = output_parts(envelope)
        .filter_map(|part| part.get("text").and_then(Value::as_str))
        .filter(|t| !t.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n");
    (!joined.is_empty()).then_some(joined)
}

/// Finds a JSON object in model text: fenced code blocks first, then the
/// outermost balanced `{...}` span that parses.
pub fn json_from_text(text: &str) -> Option<Value> {
    for cap in FENCED_BLOCK.captures_iter(text) {
        let Some(body) = cap.get(1) else { continue };
        let body = body.as_str().trim();
        if let Ok(v @ Value::Object(_)) = serde_json::from_str::<Value>(body) {
            return Some(v);
        }
        if let Some(v) = balanced_object(body) {
            return Some(v);
        }
    }
    balanced_object(text)
}

fn balanced_object(text: &str) -> Option<Value> {
    let bytes = text.as_bytes();
    let mut start = 0;
    while let Some(offset) = text[start..].find('{') {
        let open = start + offset;
        if let Some(close) = matching_brace(bytes, open) {
            if let Ok(v @ Value::Object(_)) = serde_json::from_str::<Value>(&text[open..=close]) {
                return Some(v);
            }
        }
        start = open + 1;
    }
    None
}

// Index of the `}` closing the `{` at `open`, skipping braces inside strings.
fn matching_brace(bytes: &[u8], open: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, &b) in bytes.iter().enumerate().skip(open) {
        if in_string {
            match b {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}
