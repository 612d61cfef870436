//! Prompts for the three model-facing stages.
//!
//! Centralising every prompt here keeps wording changes out of the stage
//! logic and lets unit tests inspect the exact text without a live model.
//! The JSON shapes requested here are the ones [`crate::pipeline::parse`]
//! normalises.

use crate::model::{Complexity, RawStepExtraction};

/// Pass 1: strictly factual per-page extraction.
pub const EXTRACTION_PROMPT: &str = r#"You are reading ONE page of a furniture assembly manual. Describe ONLY what is visibly drawn or printed. Do not write instructions, do not guess intent, do not narrate.

Return a single JSON object and nothing else:

{
  "arrow_count": <total arrows on the page>,
  "has_hinge_or_rotation": <true if any hinge, pivot, swing or rotation is shown>,
  "has_fastener_ambiguity": <true if you cannot tell which screw/bolt/dowel is used>,
  "is_parts_only": <true if the page only lists parts or tools>,
  "steps": [
    {
      "step_number": <printed step number; 0 for a parts/tools legend>,
      "description": "<literal description of the panel>",
      "parts": [{"part_number": "<printed id or empty>", "name": "<part>", "quantity": <n>}],
      "tools": ["<tool>"],
      "actions": [{"action_type": "<insert|attach|rotate|flip|tighten|slide|…>", "subject": "<what moves>", "target": "<onto what>", "direction": "<direction or null>"}],
      "spatial": {"orientation": "<how the assembly is oriented or null>", "alignment": "<what lines up with what or null>"},
      "arrows": [{"direction": "<direction>", "label": "<label or null>", "indicates_motion": <true|false>}],
      "fasteners": [{"fastener_type": "<screw|bolt|cam lock|dowel|…>", "part_id": "<id or null>", "rotation": "<clockwise|counterclockwise|null>", "notes": "<notes or null>"}],
      "annotations": ["<printed text, callouts, counts like 2x>"],
      "warnings": ["<safety or caution symbols and text>"],
      "complexity": "simple" | "complex",
      "confidence": <0.0-1.0, how sure you are of this panel>
    }
  ]
}

Rules:
- One entry per numbered panel. Keep the printed numbering exactly.
- Use empty arrays, not omitted keys, when nothing is shown.
- Mark a step "complex" when it shows many parts, several motions, or an exploded view.
- Lower your confidence when the scan is blurry or a detail is hidden."#;

/// Pass 2 preamble; the serialised steps follow it.
pub const REFINEMENT_PROMPT: &str = r#"You are writing the final assembly instructions for a furniture product from a factual, page-by-page extraction of its manual. You see the WHOLE document at once.

Your tasks:
1. Write one clear, imperative instruction per step, using the same name for each part throughout.
2. When a step was split across two pages (same action continued, repeated step number, "continued" panels), MERGE those steps by listing all of their numbers in "original_step_numbers".
3. When the assembly moves to a new phase (frame done → drawers, flip the unit, …) add a short "transition_note".
4. Refer back to earlier steps when a part reappears ("the side panel from step 2").
5. Never invent parts, tools or actions that are not in the extraction.

Return JSON only:

{"steps": [{"original_step_numbers": [<n>, …], "title": "<short title>", "instruction": "<instruction text>", "transition_note": "<note or null>"}]}

Cover every step number exactly once, in order.

Extraction:
"#;

/// Shared visual style for every illustration.
pub const ILLUSTRATION_STYLE: &str = "Clean technical line illustration in the style of a flat-pack furniture manual. White background, thin black outlines, light grey shading, no text labels, no hands unless needed to show a motion, consistent isometric perspective.";

/// Extra guidance per illustration complexity.
pub fn illustration_guidance(complexity: Complexity) -> &'static str {
    match complexity {
        Complexity::Complex => "Use an exploded view that separates the parts along their assembly axis, and draw bold motion arrows for every movement.",
        Complexity::Simple => "Show the assembly from a single clear angle with only the parts involved in this step.",
    }
}

/// Compact one-block serialisation of a step for the Pass-2 prompt.
pub fn serialize_step_for_refinement(step_number: u32, raw: &RawStepExtraction) -> String {
    let mut out = format!("STEP {}\n  description: {}\n", step_number, raw.description.trim());

    if !raw.parts.is_empty() {
        let parts: Vec<String> = raw
            .parts
            .iter()
            .map(|p| {
                if p.part_number.is_empty() {
                    format!("{} x{}", p.name, p.quantity)
                } else {
                    format!("{} ({}) x{}", p.name, p.part_number, p.quantity)
                }
            })
            .collect();
        out.push_str(&format!("  parts: {}\n", parts.join("; ")));
    }
    if !raw.tools.is_empty() {
        out.push_str(&format!("  tools: {}\n", raw.tools.join(", ")));
    }
    if !raw.actions.is_empty() {
        let actions: Vec<String> = raw
            .actions
            .iter()
            .map(|a| {
                let mut s = format!("{} {}", a.action_type, a.subject);
                if let Some(t) = &a.target {
                    s.push_str(&format!(" → {t}"));
                }
                if let Some(d) = &a.direction {
                    s.push_str(&format!(" [{d}]"));
                }
                s
            })
            .collect();
        out.push_str(&format!("  actions: {}\n", actions.join("; ")));
    }
    if let Some(o) = &raw.spatial.orientation {
        out.push_str(&format!("  orientation: {o}\n"));
    }
    if let Some(a) = &raw.spatial.alignment {
        out.push_str(&format!("  alignment: {a}\n"));
    }
    if !raw.arrows.is_empty() {
        let arrows: Vec<String> = raw
            .arrows
            .iter()
            .map(|a| match &a.label {
                Some(l) => format!("{} ({l})", a.direction),
                None => a.direction.clone(),
            })
            .collect();
        out.push_str(&format!("  arrows: {}\n", arrows.join("; ")));
    }
    if !raw.fasteners.is_empty() {
        let fasteners: Vec<String> = raw
            .fasteners
            .iter()
            .map(|f| {
                let mut s = f.fastener_type.clone();
                if let Some(id) = &f.part_id {
                    s.push_str(&format!(" {id}"));
                }
                if let Some(r) = &f.rotation {
                    s.push_str(&format!(" {r}"));
                }
                s
            })
            .collect();
        out.push_str(&format!("  fasteners: {}\n", fasteners.join("; ")));
    }
    if !raw.annotations.is_empty() {
        out.push_str(&format!("  annotations: {}\n", raw.annotations.join(" | ")));
    }
    if !raw.warnings.is_empty() {
        out.push_str(&format!("  warnings: {}\n", raw.warnings.join(" | ")));
    }
    out.push_str(&format!(
        "  complexity: {}\n",
        if raw.complexity.is_complex() { "complex" } else { "simple" }
    ));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Action, PartRef, SpatialNotes};

    #[test]
    fn extraction_prompt_requests_escalation_indicators() {
        for key in ["arrow_count", "has_hinge_or_rotation", "has_fastener_ambiguity", "confidence"] {
            assert!(EXTRACTION_PROMPT.contains(key), "missing {key}");
        }
    }

    #[test]
    fn refinement_prompt_describes_merge_contract() {
        assert!(REFINEMENT_PROMPT.contains("original_step_numbers"));
        assert!(REFINEMENT_PROMPT.contains("transition_note"));
    }

    #[test]
    fn serialised_step_is_compact() {
        let raw = RawStepExtraction {
            step_number: 3,
            description: "Dowels inserted into side panel".into(),
            parts: vec![PartRef {
                part_number: "104321".into(),
                name: "wooden dowel".into(),
                quantity: 4,
            }],
            tools: vec![],
            actions: vec![Action {
                action_type: "insert".into(),
                subject: "dowel".into(),
                target: Some("side panel".into()),
                direction: None,
            }],
            spatial: SpatialNotes {
                orientation: Some("panel lying flat".into()),
                alignment: None,
            },
            arrows: vec![],
            fasteners: vec![],
            annotations: vec!["4x".into()],
            warnings: vec![],
            complexity: Complexity::Simple,
            confidence: 0.9,
        };
        let s = serialize_step_for_refinement(2, &raw);
        assert!(s.starts_with("STEP 2\n"));
        assert!(s.contains("wooden dowel (104321) x4"));
        assert!(s.contains("insert dowel → side panel"));
        assert!(s.contains("orientation: panel lying flat"));
        assert!(!s.contains("tools:"));
        assert!(s.contains("complexity: simple"));
    }
}
