//! Ordered shape matchers for model payloads.
//!
//! The strict schema decode runs first. When the model drifted from the
//! schema, the alternate matchers map known variants (a `meals[]` wrapper,
//! renamed macro keys, nested macro blocks) onto the same canonical pieces.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use super::numbers::{first_number, first_string};
use super::{Macros, NormalizedItem};

const PROTEIN_KEYS: &[&str] = &["protein_g", "protein", "proteins", "protein_grams"];
const CARB_KEYS: &[&str] = &[
    "carbs_g",
    "carbohydrates_g",
    "carbohydrate_g",
    "carbs",
    "carbohydrates",
    "carbohydrate",
    "carb",
];
const FAT_KEYS: &[&str] = &["fat_g", "fat", "fats", "total_fat_g"];
const KCAL_KEYS: &[&str] = &[
    "calories_kcal",
    "kcal",
    "calories",
    "energy_kcal",
    "estimated_calories_kcal",
    "estimated_calories",
];
const NESTED_MACRO_KEYS: &[&str] = &["macros_g", "macros"];
const TOTALS_KEYS: &[&str] = &[
    "entry_macros",
    "macros",
    "macros_g",
    "nutrition",
    "nutrients",
    "total",
    "totals",
];
const CALCULATION_KEYS: &[&str] = &["calculation", "calculations", "calc"];
const ITEM_LIST_KEYS: &[&str] = &["items", "foods", "food_items"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ShapeKind {
    /// Decoded strictly against the requested schema.
    Canonical,
    /// `meals[]` each carrying their own `items[]`.
    Meals,
    /// Any other object, read through the key alias tables.
    Loose,
}

#[derive(Debug, Error)]
pub enum ShapeMismatch {
    #[error("payload is not a JSON object")]
    NotAnObject,
    #[error("strict decode failed: {0}")]
    Strict(#[from] serde_json::Error),
    #[error("no meals array")]
    NoMeals,
}

/// Macro values as reported; `None` means the key was absent or unusable.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ReportedMacros {
    pub protein_g: Option<f64>,
    pub carbs_g: Option<f64>,
    pub fat_g: Option<f64>,
    pub calories_kcal: Option<f64>,
}

impl ReportedMacros {
    /// Reads macros from `obj`, preferring a nested `macros_g`/`macros` block.
    pub fn from_object(obj: &Map<String, Value>) -> Self {
        let nested = NESTED_MACRO_KEYS
            .iter()
            .find_map(|k| obj.get(*k).and_then(Value::as_object))
            .unwrap_or(obj);
        Self {
            protein_g: first_number(nested, PROTEIN_KEYS),
            carbs_g: first_number(nested, CARB_KEYS),
            fat_g: first_number(nested, FAT_KEYS),
            calories_kcal: first_number(nested, KCAL_KEYS)
                .or_else(|| first_number(obj, KCAL_KEYS)),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.protein_g.is_none()
            && self.carbs_g.is_none()
            && self.fat_g.is_none()
            && self.calories_kcal.is_none()
    }

    /// Absent values become zero; missing calories are derived from the grams.
    pub fn resolve(&self) -> Macros {
        Macros {
            protein_g: self.protein_g.unwrap_or(0.0),
            carbs_g: self.carbs_g.unwrap_or(0.0),
            fat_g: self.fat_g.unwrap_or(0.0),
            calories_kcal: self.calories_kcal.unwrap_or(0.0),
        }
        .sanitized()
        .with_derived_calories()
    }

    fn non_empty(self) -> Option<Self> {
        (!self.is_empty()).then_some(self)
    }

    fn sum<'a>(parts: impl IntoIterator<Item = &'a ReportedMacros>) -> Option<Self> {
        let add = |a: Option<f64>, b: Option<f64>| match (a, b) {
            (None, None) => None,
            (a, b) => Some(a.unwrap_or(0.0) + b.unwrap_or(0.0)),
        };
        parts
            .into_iter()
            .fold(ReportedMacros::default(), |acc, m| ReportedMacros {
                protein_g: add(acc.protein_g, m.protein_g),
                carbs_g: add(acc.carbs_g, m.carbs_g),
                fat_g: add(acc.fat_g, m.fat_g),
                calories_kcal: add(acc.calories_kcal, m.calories_kcal),
            })
            .non_empty()
    }
}

/// The canonical pieces every matcher produces.
#[derive(Debug, Clone)]
pub struct MatchedShape {
    pub kind: ShapeKind,
    pub items: Vec<NormalizedItem>,
    pub totals: Option<ReportedMacros>,
    pub calculation: Option<ReportedMacros>,
    pub notes: Option<String>,
}

pub fn match_shape(payload: &Value) -> Result<MatchedShape, ShapeMismatch> {
    canonical(payload)
        .or_else(|_| meals(payload))
        .or_else(|_| loose(payload))
}

#[derive(Debug, Deserialize)]
struct CanonicalPayload {
    items: Vec<CanonicalItem>,
    entry_macros: CanonicalMacros,
    #[serde(default)]
    notes: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CanonicalItem {
    name: String,
    #[serde(default)]
    quantity: Option<f64>,
    #[serde(default)]
    unit: Option<String>,
    macros: CanonicalMacros,
    #[serde(default)]
    confidence: Option<f64>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
struct CanonicalMacros {
    protein_g: f64,
    carbs_g: f64,
    fat_g: f64,
    calories_kcal: f64,
}

impl From<CanonicalMacros> for ReportedMacros {
    fn from(m: CanonicalMacros) -> Self {
        Self {
            protein_g: Some(m.protein_g),
            carbs_g: Some(m.carbs_g),
            fat_g: Some(m.fat_g),
            calories_kcal: Some(m.calories_kcal),
        }
    }
}

fn canonical(payload: &Value) -> Result<MatchedShape, ShapeMismatch> {
    let obj = payload.as_object().ok_or(ShapeMismatch::NotAnObject)?;
    let decoded = CanonicalPayload::deserialize(payload)?;
    let items = decoded
        .items
        .into_iter()
        .map(|it| NormalizedItem {
            name: Some(it.name),
            quantity: it.quantity,
            unit: it.unit,
            macros: ReportedMacros::from(it.macros).resolve(),
            confidence: it.confidence.map(clamp_confidence),
        })
        .collect();
    Ok(MatchedShape {
        kind: ShapeKind::Canonical,
        items,
        totals: Some(decoded.entry_macros.into()),
        calculation: calculation_block(obj),
        notes: decoded.notes.filter(|n| !n.trim().is_empty()),
    })
}

fn meals(payload: &Value) -> Result<MatchedShape, ShapeMismatch> {
    let obj = payload.as_object().ok_or(ShapeMismatch::NotAnObject)?;
    let meals: Vec<&Map<String, Value>> = obj
        .get("meals")
        .and_then(Value::as_array)
        .map(|arr| arr.iter().filter_map(Value::as_object).collect())
        .unwrap_or_default();
    if meals.is_empty() {
        return Err(ShapeMismatch::NoMeals);
    }

    let mut items = Vec::new();
    let mut meal_totals = Vec::new();
    for meal in &meals {
        let meal_items = item_list(meal);
        if meal_items.is_empty() {
            // A meal without an item breakdown counts as a single item.
            if let Some(item) = loose_item(meal) {
                items.push(item);
            }
        } else {
            items.extend(meal_items);
        }
        if let Some(t) = totals_block(meal) {
            meal_totals.push(t);
        }
    }

    let totals = totals_block(obj).or_else(|| ReportedMacros::sum(&meal_totals));
    Ok(MatchedShape {
        kind: ShapeKind::Meals,
        items,
        totals,
        calculation: calculation_block(obj),
        notes: first_string(obj, &["notes", "note"]),
    })
}

fn loose(payload: &Value) -> Result<MatchedShape, ShapeMismatch> {
    let obj = payload.as_object().ok_or(ShapeMismatch::NotAnObject)?;
    let totals = totals_block(obj).or_else(|| ReportedMacros::from_object(obj).non_empty());
    Ok(MatchedShape {
        kind: ShapeKind::Loose,
        items: item_list(obj),
        totals,
        calculation: calculation_block(obj),
        notes: first_string(obj, &["notes", "note", "comment"]),
    })
}

fn item_list(obj: &Map<String, Value>) -> Vec<NormalizedItem> {
    ITEM_LIST_KEYS
        .iter()
        .find_map(|k| obj.get(*k).and_then(Value::as_array))
        .map(|arr| arr.iter().filter_map(Value::as_object).filter_map(loose_item).collect())
        .unwrap_or_default()
}

fn loose_item(obj: &Map<String, Value>) -> Option<NormalizedItem> {
    let reported = ReportedMacros::from_object(obj);
    let name = first_string(obj, &["name", "food", "item", "description", "label"]);
    if reported.is_empty() && name.is_none() {
        return None;
    }
    Some(NormalizedItem {
        name,
        quantity: first_number(obj, &["quantity", "amount", "qty"]),
        unit: first_string(obj, &["unit", "units"]),
        macros: reported.resolve(),
        confidence: first_number(obj, &["confidence", "certainty"]).map(clamp_confidence),
    })
}

// Entry-level totals: the first candidate block with a non-zero total wins,
// otherwise the first one that reported anything at all.
fn totals_block(obj: &Map<String, Value>) -> Option<ReportedMacros> {
    let candidates: Vec<ReportedMacros> = TOTALS_KEYS
        .iter()
        .filter_map(|k| obj.get(*k).and_then(Value::as_object))
        .map(|block| {
            let mut m = ReportedMacros::from_object(block);
            if m.calories_kcal.is_none() {
                m.calories_kcal = first_number(obj, KCAL_KEYS);
            }
            m
        })
        .filter(|m| !m.is_empty())
        .collect();
    candidates
        .iter()
        .find(|m| !m.resolve().is_zero())
        .or_else(|| candidates.first())
        .copied()
}

fn calculation_block(obj: &Map<String, Value>) -> Option<ReportedMacros> {
    let block = CALCULATION_KEYS
        .iter()
        .find_map(|k| obj.get(*k).and_then(Value::as_object))?;
    let inner = ["totals", "total", "entry_macros"]
        .iter()
        .find_map(|k| block.get(*k).and_then(Value::as_object))
        .unwrap_or(block);
    ReportedMacros::from_object(inner).non_empty()
}

fn clamp_confidence(c: f64) -> f64 {
    if c.is_finite() {
        c.clamp(0.0, 1.0)
    } else {
        0.0
    }
}
