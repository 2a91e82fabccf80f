use serde_json::{json, Value};

use super::{Attempt, InferenceJob};

pub const SCHEMA_NAME: &str = "macro_payload";

const SYSTEM_INSTRUCTION: &str = "\
You are a nutrition estimation model.
Given the user's description and optional photo of a meal, identify each food item and estimate its macronutrients.
If quantities are unclear, estimate realistically from the image and text.
All macro values are in grams (g) and calories in kcal.
Respond with JSON only.";

// Plain JSON mode cannot enforce a schema, so the relaxed attempt spells it out.
const RELAXED_SHAPE_HINT: &str = "\
Return a JSON object of the form:
{\"items\": [{\"name\": string, \"quantity\": number, \"unit\": \"g\"|\"ml\"|\"piece\",
  \"macros\": {\"protein_g\": number, \"carbs_g\": number, \"fat_g\": number, \"calories_kcal\": number},
  \"confidence\": number between 0 and 1}],
 \"entry_macros\": {\"protein_g\": number, \"carbs_g\": number, \"fat_g\": number, \"calories_kcal\": number},
 \"notes\": string}";

fn macro_block_schema() -> Value {
    json!({
        "type": "object",
        "additionalProperties": false,
        "properties": {
            "protein_g": { "type": "number" },
            "carbs_g": { "type": "number" },
            "fat_g": { "type": "number" },
            "calories_kcal": { "type": "number" }
        },
        "required": ["protein_g", "carbs_g", "fat_g", "calories_kcal"]
    })
}

/// JSON schema for the structured result: items, entry totals, notes.
pub fn result_schema() -> Value {
    json!({
        "type": "object",
        "additionalProperties": false,
        "properties": {
            "items": {
                "type": "array",
                "items": {
                    "type": "object",
                    "additionalProperties": false,
                    "properties": {
                        "name": { "type": "string" },
                        "quantity": { "type": "number" },
                        "unit": { "type": "string", "enum": ["g", "ml", "piece"] },
                        "macros": macro_block_schema(),
                        "confidence": { "type": "number", "minimum": 0, "maximum": 1 }
                    },
                    "required": ["name", "quantity", "unit", "macros", "confidence"]
                }
            },
            "entry_macros": macro_block_schema(),
            "notes": { "type": "string" }
        },
        "required": ["items", "entry_macros", "notes"]
    })
}

fn user_context(job: &InferenceJob) -> String {
    let text = job
        .text
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .unwrap_or("None");
    format!("User-described context:\n{text}")
}

/// Request body for an asynchronous Responses API job.
pub fn request_body(model: &str, job: &InferenceJob) -> Value {
    let system = match job.attempt {
        Attempt::Primary => SYSTEM_INSTRUCTION.to_string(),
        Attempt::Relaxed => format!("{SYSTEM_INSTRUCTION}\n{RELAXED_SHAPE_HINT}"),
    };

    let mut content = vec![json!({ "type": "input_text", "text": user_context(job) })];
    if let Some(url) = &job.image_url {
        content.push(json!({ "type": "input_image", "image_url": url }));
    }

    let format = match job.attempt {
        Attempt::Primary => json!({
            "type": "json_schema",
            "name": SCHEMA_NAME,
            "schema": result_schema(),
            "strict": true
        }),
        Attempt::Relaxed => json!({ "type": "json_object" }),
    };

    json!({
        "model": model,
        "background": true,
        "store": true,
        "metadata": job.metadata(),
        "input": [
            { "role": "system", "content": [{ "type": "input_text", "text": system }] },
            { "role": "user", "content": content }
        ],
        "text": { "format": format }
    })
}
