//! Structured-output parsing: free-form model text → normalised records.
//!
//! Models wrap JSON in fences, prepend commentary, switch to camelCase keys,
//! emit `"2x"` where a number was asked for, or drop keys entirely. Parsing is
//! therefore two steps:
//!
//! 1. **Locate** the JSON span: strip an outer code fence, then take the
//!    outermost span opened by whichever of `{` or `[` comes first.
//! 2. **Normalise** once: deserialise into permissive wire structs and convert
//!    them into fully-populated model records (trimmed strings, empty optionals
//!    as `None`, clamped confidence, quantities ≥ 1).
//!
//! Nothing downstream ever sees a partially-populated record.

use crate::error::ParseError;
use crate::model::{
    Action, Arrow, Complexity, Fastener, PartRef, RawPageExtraction, RawStepExtraction,
    SpatialNotes,
};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;

/// Confidence assumed when the model omits it. Low enough to trigger
/// escalation: a response that skips required keys is not trusted.
pub const MISSING_CONFIDENCE: f64 = 0.5;

static RE_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```[A-Za-z]*[ \t]*\r?\n?(.*?)```").unwrap());

/// Find the JSON payload in a model response.
pub fn extract_json_span(text: &str) -> Result<&str, ParseError> {
    let inner = RE_FENCE
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
        .unwrap_or(text);

    let (open, close) = match (inner.find('{'), inner.find('[')) {
        (Some(brace), Some(bracket)) if bracket < brace => ('[', ']'),
        (None, Some(_)) => ('[', ']'),
        _ => ('{', '}'),
    };
    outermost(inner, open, close).ok_or(ParseError::NoJsonObject)
}

fn outermost(text: &str, open: char, close: char) -> Option<&str> {
    let start = text.find(open)?;
    let end = text.rfind(close)?;
    (end > start).then(|| &text[start..=end])
}

fn decode<'a, T: Deserialize<'a>>(span: &'a str) -> Result<T, ParseError> {
    serde_json::from_str(span).map_err(|e| ParseError::InvalidJson(e.to_string()))
}

// ── Pass 1 ───────────────────────────────────────────────────────────────

/// Parse one page's Pass-1 response.
///
/// A bare array is accepted as the page's step list.
pub fn parse_page_extraction(
    text: &str,
    page_number: usize,
) -> Result<RawPageExtraction, ParseError> {
    let span = extract_json_span(text)?;
    let wire: WirePage = if span.starts_with('[') {
        WirePage {
            steps: decode(span)?,
            ..WirePage::default()
        }
    } else {
        decode(span)?
    };
    Ok(normalize_page(wire, page_number))
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct WirePage {
    #[serde(alias = "arrowCount")]
    arrow_count: Option<Value>,
    #[serde(alias = "hasHingeOrRotation")]
    has_hinge_or_rotation: bool,
    #[serde(alias = "hasFastenerAmbiguity")]
    has_fastener_ambiguity: bool,
    #[serde(alias = "isPartsOnly")]
    is_parts_only: bool,
    steps: Vec<WireStep>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct WireStep {
    #[serde(alias = "stepNumber", alias = "step")]
    step_number: Option<Value>,
    description: Option<String>,
    parts: Vec<WirePart>,
    tools: Vec<NameOrObject>,
    actions: Vec<WireAction>,
    spatial: Option<WireSpatial>,
    arrows: Vec<WireArrow>,
    fasteners: Vec<WireFastener>,
    annotations: Vec<Value>,
    warnings: Vec<Value>,
    complexity: Option<String>,
    confidence: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct WirePart {
    #[serde(alias = "partNumber", alias = "part_id", alias = "id")]
    part_number: Option<Value>,
    name: Option<String>,
    #[serde(alias = "qty", alias = "count")]
    quantity: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum NameOrObject {
    Name(String),
    Object { name: String },
    Other(Value),
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct WireAction {
    #[serde(alias = "actionType", alias = "type", alias = "action")]
    action_type: Option<String>,
    subject: Option<String>,
    target: Option<String>,
    direction: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct WireSpatial {
    orientation: Option<String>,
    alignment: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct WireArrow {
    direction: Option<String>,
    label: Option<String>,
    #[serde(alias = "indicatesMotion", alias = "motion")]
    indicates_motion: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct WireFastener {
    #[serde(alias = "fastenerType", alias = "type")]
    fastener_type: Option<String>,
    #[serde(alias = "partId", alias = "part_number")]
    part_id: Option<Value>,
    rotation: Option<String>,
    notes: Option<String>,
}

fn normalize_page(wire: WirePage, page_number: usize) -> RawPageExtraction {
    let numbers: Vec<Option<u32>> = wire
        .steps
        .iter()
        .map(|ws| ws.step_number.as_ref().and_then(lenient_u32))
        .collect();
    let page_max = numbers.iter().flatten().copied().max().unwrap_or(0);

    let mut steps = Vec::with_capacity(wire.steps.len());
    let mut previous: Option<u32> = None;
    for (ws, printed) in wire.steps.into_iter().zip(numbers) {
        let (number, guessed) = match (printed, previous) {
            (Some(n), _) => (n, false),
            // An unnumbered panel continues the step before it on the same page.
            (None, Some(prev)) => (prev, false),
            (None, None) if wire.is_parts_only => (0, false),
            // Nothing to continue: place it after the page's numbered steps
            // and distrust it so the page escalates.
            (None, None) => (page_max + 1, true),
        };
        previous = Some(number);
        let mut step = normalize_step(ws, number);
        if guessed {
            step.confidence = step.confidence.min(MISSING_CONFIDENCE);
        }
        steps.push(step);
    }

    let drawn_arrows: usize = steps.iter().map(|s| s.arrows.len()).sum();
    let arrow_count = wire
        .arrow_count
        .as_ref()
        .and_then(lenient_u32)
        .unwrap_or(drawn_arrows as u32);

    RawPageExtraction {
        page_number,
        steps,
        arrow_count,
        has_hinge_or_rotation: wire.has_hinge_or_rotation,
        has_fastener_ambiguity: wire.has_fastener_ambiguity,
        is_parts_only: wire.is_parts_only,
    }
}

fn normalize_step(ws: WireStep, step_number: u32) -> RawStepExtraction {
    let parts = ws
        .parts
        .into_iter()
        .filter_map(|p| {
            let part_number = p.part_number.as_ref().map(value_text).unwrap_or_default();
            let name = clean(p.name).unwrap_or_default();
            if part_number.is_empty() && name.is_empty() {
                return None;
            }
            let quantity = p.quantity.as_ref().and_then(lenient_u32).unwrap_or(1).max(1);
            Some(PartRef {
                part_number,
                name,
                quantity,
            })
        })
        .collect();

    let tools = ws
        .tools
        .into_iter()
        .filter_map(|t| match t {
            NameOrObject::Name(s) | NameOrObject::Object { name: s } => clean(Some(s)),
            NameOrObject::Other(_) => None,
        })
        .collect();

    let actions = ws
        .actions
        .into_iter()
        .filter_map(|a| {
            let action_type = clean(a.action_type)?;
            Some(Action {
                action_type: action_type.to_lowercase(),
                subject: clean(a.subject).unwrap_or_default(),
                target: clean(a.target),
                direction: clean(a.direction),
            })
        })
        .collect();

    let spatial = ws
        .spatial
        .map(|s| SpatialNotes {
            orientation: clean(s.orientation),
            alignment: clean(s.alignment),
        })
        .unwrap_or_default();

    let arrows = ws
        .arrows
        .into_iter()
        .map(|a| Arrow {
            direction: clean(a.direction).unwrap_or_else(|| "unspecified".to_string()),
            label: clean(a.label),
            indicates_motion: a.indicates_motion.unwrap_or(true),
        })
        .collect();

    let fasteners = ws
        .fasteners
        .into_iter()
        .filter_map(|f| {
            Some(Fastener {
                fastener_type: clean(f.fastener_type)?.to_lowercase(),
                part_id: f.part_id.as_ref().map(value_text).filter(|s| !s.is_empty()),
                rotation: clean(f.rotation),
                notes: clean(f.notes),
            })
        })
        .collect();

    RawStepExtraction {
        step_number,
        description: clean(ws.description).unwrap_or_default(),
        parts,
        tools,
        actions,
        spatial,
        arrows,
        fasteners,
        annotations: texts(ws.annotations),
        warnings: texts(ws.warnings),
        complexity: ws
            .complexity
            .as_deref()
            .map(Complexity::from_tag)
            .unwrap_or_default(),
        confidence: ws
            .confidence
            .as_ref()
            .and_then(lenient_f64)
            .map(|c| c.clamp(0.0, 1.0))
            .unwrap_or(MISSING_CONFIDENCE),
    }
}

// ── Pass 2 ───────────────────────────────────────────────────────────────

/// One entry of the refinement response.
#[derive(Debug, Clone, PartialEq)]
pub struct RefinementEntry {
    pub original_step_numbers: Vec<u32>,
    pub title: String,
    pub instruction: String,
    pub transition_note: Option<String>,
}

/// Parse the Pass-2 response. Entries without step numbers are dropped.
pub fn parse_refinement(text: &str) -> Result<Vec<RefinementEntry>, ParseError> {
    let span = extract_json_span(text)?;
    let wire: Vec<WireRefinement> = if span.starts_with('[') {
        decode(span)?
    } else {
        decode::<WireRefinementDoc>(span)?.steps
    };

    Ok(wire
        .into_iter()
        .filter_map(|w| {
            let numbers: Vec<u32> = w.original_step_numbers.iter().filter_map(lenient_u32).collect();
            if numbers.is_empty() {
                return None;
            }
            Some(RefinementEntry {
                original_step_numbers: numbers,
                title: clean(w.title).unwrap_or_default(),
                instruction: clean(w.instruction).unwrap_or_default(),
                transition_note: clean(w.transition_note),
            })
        })
        .collect())
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct WireRefinementDoc {
    steps: Vec<WireRefinement>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct WireRefinement {
    #[serde(alias = "originalStepNumbers", alias = "step_numbers")]
    original_step_numbers: Vec<Value>,
    title: Option<String>,
    instruction: Option<String>,
    #[serde(alias = "transitionNote")]
    transition_note: Option<String>,
}

// ── Lenient scalars ──────────────────────────────────────────────────────

fn clean(s: Option<String>) -> Option<String> {
    s.map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty() && !s.eq_ignore_ascii_case("null"))
}

fn texts(values: Vec<Value>) -> Vec<String> {
    values
        .iter()
        .map(value_text)
        .filter(|s| !s.is_empty())
        .collect()
}

fn value_text(v: &Value) -> String {
    match v {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

static RE_LEADING_INT: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+").unwrap());

/// `3`, `3.0`, `"3"`, `"3x"`, `"x3"` → 3.
fn lenient_u32(v: &Value) -> Option<u32> {
    match v {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f.round() as u64))
            .and_then(|n| u32::try_from(n).ok()),
        Value::String(s) => RE_LEADING_INT
            .find(s)
            .and_then(|m| m.as_str().parse().ok()),
        _ => None,
    }
}

/// Confidence as a number, a numeric string, or a percentage.
fn lenient_f64(v: &Value) -> Option<f64> {
    let f = match v {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().trim_end_matches('%').trim().parse().ok()?,
        _ => return None,
    };
    if !f.is_finite() {
        return None;
    }
    Some(if f > 1.0 && f <= 100.0 { f / 100.0 } else { f })
}
