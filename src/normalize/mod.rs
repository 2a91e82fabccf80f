//! Turns a loosely structured provider response into canonical macros.
//!
//! Resolution is a cascade that stops at the first stage with a non-zero
//! macro total:
//!
//! 1. a structured field the provider already parsed, else JSON recovered
//!    from the response text ([`extract`]);
//! 2. the payload is matched against the strict schema, then against the
//!    known alternate shapes ([`shapes`]);
//! 3. entry-level totals;
//! 4. the sum of the per-item macros;
//! 5. a legacy `calculation` block.
//!
//! Missing calories are derived from grams (4/4/9 kcal per gram) at every
//! stage. When nothing resolves the result is all-zero with no confidence,
//! which still completes the entry.

pub mod extract;
mod numbers;
pub mod shapes;

use std::iter::Sum;
use std::ops::Add;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

pub use extract::{extract_payload, Extracted, PayloadSource};
pub use shapes::ShapeKind;

/// The four canonical numbers stored on an entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Macros {
    pub protein_g: f64,
    pub carbs_g: f64,
    pub fat_g: f64,
    pub calories_kcal: f64,
}

impl Macros {
    pub const ZERO: Macros = Macros {
        protein_g: 0.0,
        carbs_g: 0.0,
        fat_g: 0.0,
        calories_kcal: 0.0,
    };

    pub fn total(&self) -> f64 {
        self.protein_g + self.carbs_g + self.fat_g + self.calories_kcal
    }

    pub fn is_zero(&self) -> bool {
        self.total() == 0.0
    }

    /// Calories implied by the grams using Atwater factors.
    pub fn atwater_kcal(&self) -> f64 {
        self.protein_g * 4.0 + self.carbs_g * 4.0 + self.fat_g * 9.0
    }

    pub fn with_derived_calories(mut self) -> Self {
        let grams = self.protein_g + self.carbs_g + self.fat_g;
        if self.calories_kcal == 0.0 && grams > 0.0 {
            self.calories_kcal = self.atwater_kcal();
        }
        self
    }

    fn sanitized(self) -> Self {
        let clean = |v: f64| if v.is_finite() && v > 0.0 { v } else { 0.0 };
        Self {
            protein_g: clean(self.protein_g),
            carbs_g: clean(self.carbs_g),
            fat_g: clean(self.fat_g),
            calories_kcal: clean(self.calories_kcal),
        }
    }
}

impl Add for Macros {
    type Output = Macros;

    fn add(self, rhs: Macros) -> Macros {
        Macros {
            protein_g: self.protein_g + rhs.protein_g,
            carbs_g: self.carbs_g + rhs.carbs_g,
            fat_g: self.fat_g + rhs.fat_g,
            calories_kcal: self.calories_kcal + rhs.calories_kcal,
        }
    }
}

impl<'a> Sum<&'a Macros> for Macros {
    fn sum<I: Iterator<Item = &'a Macros>>(iter: I) -> Macros {
        iter.fold(Macros::ZERO, |acc, m| acc + *m)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NormalizedItem {
    pub name: Option<String>,
    pub quantity: Option<f64>,
    pub unit: Option<String>,
    pub macros: Macros,
    pub confidence: Option<f64>,
}

/// Outcome of one cascade stage.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Resolution<T> {
    Resolved(T),
    Unresolved,
}

impl<T> Resolution<T> {
    pub fn or_else(self, next: impl FnOnce() -> Resolution<T>) -> Resolution<T> {
        match self {
            Resolution::Resolved(v) => Resolution::Resolved(v),
            Resolution::Unresolved => next(),
        }
    }

    pub fn unwrap_or(self, default: T) -> T {
        match self {
            Resolution::Resolved(v) => v,
            Resolution::Unresolved => default,
        }
    }
}

impl Resolution<Macros> {
    fn non_zero(m: Macros) -> Self {
        if m.is_zero() {
            Resolution::Unresolved
        } else {
            Resolution::Resolved(m)
        }
    }

    fn map_stage(self, stage: Stage) -> Resolution<(Stage, Macros)> {
        match self {
            Resolution::Resolved(m) => Resolution::Resolved((stage, m)),
            Resolution::Unresolved => Resolution::Unresolved,
        }
    }
}

/// Which cascade stage produced the macros.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    EntryTotals,
    ItemSum,
    Calculation,
    Unresolved,
}

#[derive(Debug, Clone)]
pub struct NormalizedOutput {
    pub macros: Macros,
    pub confidence: Option<f64>,
    pub items: Vec<NormalizedItem>,
    pub notes: Option<String>,
    pub stage: Stage,
    pub shape: Option<ShapeKind>,
    pub source: PayloadSource,
    pub payload: Option<Value>,
    pub raw_text: Option<String>,
}

impl NormalizedOutput {
    /// False when no JSON object could be recovered from the response at all.
    pub fn has_structure(&self) -> bool {
        self.shape.is_some()
    }

    /// What gets persisted as `model_output` for auditing.
    pub fn audit_record(&self, envelope: &Value) -> Value {
        json!({
            "parsed": self.payload,
            "raw_text": self.raw_text,
            "raw_json": envelope,
            "normalized": {
                "stage": self.stage,
                "shape": self.shape,
                "source": self.source,
                "items": self.items,
                "notes": self.notes,
            },
        })
    }
}

/// Normalizes a full provider response envelope.
pub fn normalize_response(envelope: &Value) -> NormalizedOutput {
    normalize(extract_payload(envelope))
}

pub fn normalize(extracted: Extracted) -> NormalizedOutput {
    let Extracted {
        payload,
        raw_text,
        source,
    } = extracted;

    let shape = match payload.as_ref().map(shapes::match_shape) {
        Some(Ok(shape)) => shape,
        Some(Err(e)) => {
            tracing::debug!(error = %e, "payload matched no known shape");
            return unresolved(payload, raw_text, source);
        }
        None => return unresolved(payload, raw_text, source),
    };

    let by_totals = shape
        .totals
        .map_or(Resolution::Unresolved, |t| Resolution::non_zero(t.resolve()))
        .map_stage(Stage::EntryTotals);
    let (stage, macros) = by_totals
        .or_else(|| {
            let summed: Macros = shape.items.iter().map(|i| &i.macros).sum();
            Resolution::non_zero(summed.with_derived_calories()).map_stage(Stage::ItemSum)
        })
        .or_else(|| {
            shape
                .calculation
                .map_or(Resolution::Unresolved, |c| Resolution::non_zero(c.resolve()))
                .map_stage(Stage::Calculation)
        })
        .unwrap_or((Stage::Unresolved, Macros::ZERO));

    NormalizedOutput {
        macros,
        confidence: mean_confidence(&shape.items),
        items: shape.items,
        notes: shape.notes,
        stage,
        shape: Some(shape.kind),
        source,
        payload,
        raw_text,
    }
}

fn unresolved(
    payload: Option<Value>,
    raw_text: Option<String>,
    source: PayloadSource,
) -> NormalizedOutput {
    NormalizedOutput {
        macros: Macros::ZERO,
        confidence: None,
        items: Vec::new(),
        notes: None,
        stage: Stage::Unresolved,
        shape: None,
        source,
        payload,
        raw_text,
    }
}

/// Arithmetic mean over the items that report a confidence.
fn mean_confidence(items: &[NormalizedItem]) -> Option<f64> {
    let reported: Vec<f64> = items.iter().filter_map(|i| i.confidence).collect();
    if reported.is_empty() {
        return None;
    }
    Some(reported.iter().sum::<f64>() / reported.len() as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn from_parsed(payload: Value) -> NormalizedOutput {
        normalize_response(&json!({ "output_parsed": payload }))
    }

    #[test]
    fn canonical_payload_passes_through_unchanged() {
        let out = from_parsed(json!({
            "items": [{
                "name": "chicken salad", "quantity": 1, "unit": "piece",
                "macros": { "protein_g": 10, "carbs_g": 20, "fat_g": 5, "calories_kcal": 185 },
                "confidence": 0.7
            }],
            "entry_macros": { "protein_g": 10, "carbs_g": 20, "fat_g": 5, "calories_kcal": 185 }
        }));
        assert_eq!(
            out.macros,
            Macros { protein_g: 10.0, carbs_g: 20.0, fat_g: 5.0, calories_kcal: 185.0 }
        );
        assert_eq!(out.stage, Stage::EntryTotals);
        assert_eq!(out.shape, Some(ShapeKind::Canonical));
        assert_eq!(out.confidence, Some(0.7));
    }

    #[test]
    fn zero_totals_fall_back_to_item_sum() {
        let item = json!({
            "name": "egg",
            "macros": { "protein_g": 10, "carbs_g": 0, "fat_g": 0, "calories_kcal": 0 }
        });
        let out = from_parsed(json!({
            "items": [item.clone(), item],
            "entry_macros": { "protein_g": 0, "carbs_g": 0, "fat_g": 0, "calories_kcal": 0 }
        }));
        assert_eq!(out.stage, Stage::ItemSum);
        assert_eq!(out.macros.protein_g, 20.0);
        assert_eq!(out.macros.calories_kcal, 80.0);
    }

    #[test]
    fn missing_calories_are_derived_from_grams() {
        let out = from_parsed(json!({
            "items": [],
            "entry_macros": { "protein_g": 10, "carbs_g": 10, "fat_g": 10 }
        }));
        assert_eq!(out.macros.calories_kcal, 170.0);
        assert_eq!(out.stage, Stage::EntryTotals);
    }

    #[test]
    fn reported_calories_are_not_overwritten() {
        let out = from_parsed(json!({
            "entry_macros": { "protein_g": 10, "carbs_g": 10, "fat_g": 10, "calories_kcal": 200 }
        }));
        assert_eq!(out.macros.calories_kcal, 200.0);
    }

    #[test]
    fn meals_shape_is_mapped_and_summed() {
        let out = from_parsed(json!({
            "meals": [{
                "items": [
                    { "name": "oats", "protein": 5, "carbohydrates": 27, "fat": 3, "confidence": 0.9 },
                    { "name": "milk", "protein_g": 8, "carbs_g": 12, "fat_g": 5, "confidence": 0.5 }
                ]
            }]
        }));
        assert_eq!(out.shape, Some(ShapeKind::Meals));
        assert_eq!(out.stage, Stage::ItemSum);
        assert_eq!(out.macros.protein_g, 13.0);
        assert_eq!(out.macros.carbs_g, 39.0);
        assert_eq!(out.macros.fat_g, 8.0);
        assert_eq!(out.macros.calories_kcal, 13.0 * 4.0 + 39.0 * 4.0 + 8.0 * 9.0);
        assert!((out.confidence.unwrap() - 0.7).abs() < 1e-9);
    }

    #[test]
    fn calculation_block_is_the_last_resort() {
        let out = from_parsed(json!({
            "items": [],
            "entry_macros": { "protein_g": 0, "carbs_g": 0, "fat_g": 0, "calories_kcal": 0 },
            "calculation": { "protein_g": 12, "carbs_g": 3, "fat_g": 1, "kcal": 70 }
        }));
        assert_eq!(out.stage, Stage::Calculation);
        assert_eq!(out.macros.protein_g, 12.0);
        assert_eq!(out.macros.calories_kcal, 70.0);
    }

    #[test]
    fn unusable_payload_completes_with_zeros() {
        let out = from_parsed(json!({ "message": "I could not identify any food." }));
        assert_eq!(out.macros, Macros::ZERO);
        assert_eq!(out.confidence, None);
        assert_eq!(out.stage, Stage::Unresolved);
        assert!(out.has_structure());
    }

    #[test]
    fn no_json_at_all_has_no_structure() {
        let out = normalize_response(&json!({ "output_text": "Sorry, I can't help with that." }));
        assert_eq!(out.macros, Macros::ZERO);
        assert_eq!(out.confidence, None);
        assert!(!out.has_structure());
        assert_eq!(out.source, PayloadSource::Missing);
    }

    #[test]
    fn json_in_fenced_text_is_normalized() {
        let text = "Here you go:\n```json\n{\"items\": [], \"entry_macros\": {\"protein_g\": \"25 g\", \"carbs_g\": 0, \"fat_g\": 2}}\n```";
        let out = normalize_response(&json!({ "output_text": text }));
        assert_eq!(out.source, PayloadSource::Text);
        assert_eq!(out.macros.protein_g, 25.0);
        assert_eq!(out.macros.calories_kcal, 25.0 * 4.0 + 2.0 * 9.0);
    }

    #[test]
    fn confidence_averages_only_reporting_items() {
        let out = from_parsed(json!({
            "items": [
                { "name": "a", "protein_g": 1, "confidence": 0.8 },
                { "name": "b", "protein_g": 1 },
                { "name": "c", "protein_g": 1, "confidence": 0.4 }
            ]
        }));
        let c = out.confidence.unwrap();
        assert!((c - 0.6).abs() < 1e-9);
    }

    #[test]
    fn negative_values_are_clamped() {
        let out = from_parsed(json!({
            "entry_macros": { "protein_g": -5, "carbs_g": 10, "fat_g": 0, "calories_kcal": 40 }
        }));
        assert_eq!(out.macros.protein_g, 0.0);
        assert_eq!(out.macros.carbs_g, 10.0);
    }

    #[test]
    fn audit_record_keeps_all_three_views() {
        let env = json!({ "id": "resp_1", "output_parsed": { "entry_macros": { "protein_g": 1 } } });
        let out = normalize_response(&env);
        let record = out.audit_record(&env);
        assert_eq!(record["parsed"]["entry_macros"]["protein_g"], 1);
        assert_eq!(record["raw_json"]["id"], "resp_1");
        assert!(record["raw_text"].is_null());
        assert_eq!(record["normalized"]["stage"], "entry_totals");
    }
}
