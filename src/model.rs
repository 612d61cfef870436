//! Data model shared by every pipeline stage.
//!
//! Raw records ([`RawPageExtraction`], [`RawStepExtraction`]) are what Pass 1
//! literally saw on a page and are never modified after normalisation.
//! [`GeneratedStep`] is the user-facing unit that Pass 2 and the illustration
//! stage rewrite in place; [`GeneratedGuide`] is the frozen result of one run.

use crate::cost::CostSummary;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ── Raw extraction (Pass 1) ──────────────────────────────────────────────

/// A part shown on a page, e.g. `{ "A3", "side panel", 2 }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartRef {
    pub part_number: String,
    pub name: String,
    pub quantity: u32,
}

impl PartRef {
    /// Identity used for deduplication: the part number when the manual prints
    /// one, otherwise the lower-cased name.
    pub fn key(&self) -> String {
        let number = self.part_number.trim();
        if number.is_empty() {
            self.name.trim().to_lowercase()
        } else {
            number.to_uppercase()
        }
    }
}

/// One discrete action drawn in a panel ("insert dowel into side panel").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub action_type: String,
    pub subject: String,
    pub target: Option<String>,
    pub direction: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SpatialNotes {
    pub orientation: Option<String>,
    pub alignment: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Arrow {
    pub direction: String,
    pub label: Option<String>,
    /// `true` when the arrow shows movement rather than pointing at a detail.
    pub indicates_motion: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fastener {
    pub fastener_type: String,
    pub part_id: Option<String>,
    pub rotation: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    #[default]
    Simple,
    Complex,
}

impl Complexity {
    pub fn is_complex(self) -> bool {
        self == Complexity::Complex
    }

    /// Lenient parse of a model-supplied tag; anything unrecognised is simple.
    pub fn from_tag(tag: &str) -> Self {
        if tag.trim().eq_ignore_ascii_case("complex") {
            Complexity::Complex
        } else {
            Complexity::Simple
        }
    }
}

/// One step or panel exactly as observed on one page.
///
/// `step_number == 0` marks the parts/tools legend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawStepExtraction {
    pub step_number: u32,
    pub description: String,
    pub parts: Vec<PartRef>,
    pub tools: Vec<String>,
    pub actions: Vec<Action>,
    pub spatial: SpatialNotes,
    pub arrows: Vec<Arrow>,
    pub fasteners: Vec<Fastener>,
    pub annotations: Vec<String>,
    pub warnings: Vec<String>,
    pub complexity: Complexity,
    /// Self-reported confidence, clamped to `[0, 1]` during normalisation.
    pub confidence: f64,
}

/// Everything Pass 1 extracted from a single page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawPageExtraction {
    /// 1-indexed page number.
    pub page_number: usize,
    pub steps: Vec<RawStepExtraction>,
    pub arrow_count: u32,
    pub has_hinge_or_rotation: bool,
    pub has_fastener_ambiguity: bool,
    pub is_parts_only: bool,
}

impl RawPageExtraction {
    /// The degraded result used when neither tier produced parseable output.
    pub fn empty(page_number: usize) -> Self {
        Self {
            page_number,
            steps: Vec::new(),
            arrow_count: 0,
            has_hinge_or_rotation: false,
            has_fastener_ambiguity: false,
            is_parts_only: false,
        }
    }
}

/// Provenance for one page of Pass 1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageRecord {
    pub page_number: usize,
    pub model_used: String,
    pub escalated: bool,
    /// `false` when the stored extraction is the empty fallback.
    pub parsed: bool,
    pub step_count: usize,
}

// ── Generated guide ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CalloutKind {
    Warning,
    Tip,
    Info,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Callout {
    pub kind: CalloutKind,
    pub text: String,
}

impl Callout {
    pub fn info(text: impl Into<String>) -> Self {
        Self {
            kind: CalloutKind::Info,
            text: text.into(),
        }
    }

    pub fn warning(text: impl Into<String>) -> Self {
        Self {
            kind: CalloutKind::Warning,
            text: text.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScrewDirection {
    Clockwise,
    CounterClockwise,
    #[default]
    None,
}

impl ScrewDirection {
    /// Read a fastener's free-text rotation ("turn clockwise", "CCW", …).
    pub fn from_rotation_text(text: &str) -> Self {
        let t = text.to_lowercase();
        if t.contains("counter") || t.contains("anti") || t.split_whitespace().any(|w| w == "ccw") {
            ScrewDirection::CounterClockwise
        } else if t.contains("clockwise") || t.split_whitespace().any(|w| w == "cw") {
            ScrewDirection::Clockwise
        } else {
            ScrewDirection::None
        }
    }
}

/// The durable, user-facing step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedStep {
    /// Contiguous from 1 after assembly and after every merge.
    pub step_number: u32,
    pub title: String,
    pub instruction: String,
    pub parts: Vec<PartRef>,
    pub tools: Vec<String>,
    pub callouts: Vec<Callout>,
    pub screw_direction: ScrewDirection,
    pub complexity: Complexity,
    pub confidence: f64,
    pub source_page: usize,
    pub raw: RawStepExtraction,
    /// Assembled step numbers folded into this one by Pass 2 (empty unless merged).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub merged_from: Vec<u32>,
    pub illustration_prompt: Option<String>,
    pub illustration_url: Option<String>,
    pub illustration_model: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

impl Difficulty {
    /// More than 20 steps or over half of them complex is hard; more than 10
    /// steps or over a quarter complex is medium.
    pub fn derive(step_count: usize, complex_count: usize) -> Self {
        let ratio = if step_count == 0 {
            0.0
        } else {
            complex_count as f64 / step_count as f64
        };
        if step_count > 20 || ratio > 0.5 {
            Difficulty::Hard
        } else if step_count > 10 || ratio > 0.25 {
            Difficulty::Medium
        } else {
            Difficulty::Easy
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Difficulty::Easy => "easy",
            Difficulty::Medium => "medium",
            Difficulty::Hard => "hard",
        }
    }
}

/// Rough wall-clock estimate: 3 minutes per step, 2 more per complex step,
/// plus 10 minutes of unpacking.
pub fn estimate_minutes(step_count: usize, complex_count: usize) -> u32 {
    (10 + step_count * 3 + complex_count * 2) as u32
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityFlag {
    pub code: String,
    pub message: String,
    pub severity: Severity,
    pub step_number: Option<u32>,
}

impl QualityFlag {
    pub fn new(
        code: &str,
        severity: Severity,
        step_number: Option<u32>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            severity,
            step_number,
        }
    }
}

/// Three-way decision on whether a guide may go live unattended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PublishDecision {
    AutoPublish,
    Review,
    Hold,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationMetadata {
    pub primary_model: String,
    /// Set only when at least one page actually escalated.
    pub secondary_model: Option<String>,
    pub refinement_model: Option<String>,
    pub illustration_models: Vec<String>,
    pub pdf_page_count: usize,
    pub processing_time_ms: u64,
    pub source_url: String,
    pub generated_at: DateTime<Utc>,
    pub pages: Vec<PageRecord>,
    pub cost: CostSummary,
}

/// Final artifact of one pipeline run. Never mutated after it is returned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedGuide {
    pub product_id: String,
    pub title: String,
    pub description: String,
    pub difficulty: Difficulty,
    pub estimated_minutes: u32,
    pub tools: Vec<String>,
    pub parts: Vec<PartRef>,
    pub steps: Vec<GeneratedStep>,
    pub overall_confidence: f64,
    pub quality_flags: Vec<QualityFlag>,
    pub passes_quality_gate: bool,
    pub publish_decision: PublishDecision,
    pub metadata: GenerationMetadata,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn part_key_prefers_part_number() {
        let numbered = PartRef {
            part_number: " a3 ".into(),
            name: "Side panel".into(),
            quantity: 2,
        };
        let unnumbered = PartRef {
            part_number: String::new(),
            name: " Cam Lock ".into(),
            quantity: 8,
        };
        assert_eq!(numbered.key(), "A3");
        assert_eq!(unnumbered.key(), "cam lock");
    }

    #[test]
    fn screw_direction_from_text() {
        assert_eq!(
            ScrewDirection::from_rotation_text("Turn clockwise until snug"),
            ScrewDirection::Clockwise
        );
        assert_eq!(
            ScrewDirection::from_rotation_text("counter-clockwise"),
            ScrewDirection::CounterClockwise
        );
        assert_eq!(
            ScrewDirection::from_rotation_text("rotate CCW"),
            ScrewDirection::CounterClockwise
        );
        assert_eq!(ScrewDirection::from_rotation_text("hand tight"), ScrewDirection::None);
    }

    #[test]
    fn difficulty_thresholds() {
        assert_eq!(Difficulty::derive(5, 0), Difficulty::Easy);
        assert_eq!(Difficulty::derive(12, 0), Difficulty::Medium);
        assert_eq!(Difficulty::derive(8, 3), Difficulty::Medium);
        assert_eq!(Difficulty::derive(25, 0), Difficulty::Hard);
        assert_eq!(Difficulty::derive(6, 4), Difficulty::Hard);
        assert_eq!(Difficulty::derive(0, 0), Difficulty::Easy);
    }

    #[test]
    fn complexity_tag_is_lenient() {
        assert_eq!(Complexity::from_tag("COMPLEX"), Complexity::Complex);
        assert_eq!(Complexity::from_tag("moderate"), Complexity::Simple);
    }

    #[test]
    fn severity_orders_by_gravity() {
        assert!(Severity::Error > Severity::Warning);
        assert!(Severity::Warning > Severity::Info);
    }
}
