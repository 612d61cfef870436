//! Step assembly: per-page raw extractions → one ordered step list.
//!
//! Steps are flattened in page order, the parts/tools legend (step 0) is
//! dropped, and a *stable* sort by printed step number keeps a step that is
//! split across pages in page order. Steps are then renumbered `1..N`.
//!
//! Deduplication rules used here and by the refinement merge:
//!
//! * parts are keyed by [`PartRef::key`]; the largest quantity wins and the
//!   first spelling of the name is kept;
//! * tools compare case-insensitively; the first spelling is kept.

use crate::model::{
    Callout, GeneratedStep, PartRef, RawPageExtraction, RawStepExtraction, ScrewDirection,
};
use std::collections::HashMap;

/// Assembled steps plus the guide-level summaries.
#[derive(Debug, Clone, PartialEq)]
pub struct Assembly {
    pub steps: Vec<GeneratedStep>,
    /// Every distinct part shown anywhere, legend included.
    pub parts: Vec<PartRef>,
    /// Every distinct tool shown anywhere, legend included.
    pub tools: Vec<String>,
}

pub fn assemble(pages: &[RawPageExtraction]) -> Assembly {
    let mut flat: Vec<(usize, &RawStepExtraction)> = pages
        .iter()
        .flat_map(|p| p.steps.iter().map(move |s| (p.page_number, s)))
        .collect();

    let parts = dedupe_parts(flat.iter().flat_map(|(_, s)| s.parts.iter()));
    let tools = dedupe_tools(flat.iter().flat_map(|(_, s)| s.tools.iter()));

    flat.retain(|(_, s)| s.step_number != 0);
    flat.sort_by_key(|(_, s)| s.step_number);

    let steps = flat
        .into_iter()
        .enumerate()
        .map(|(i, (page, raw))| step_from_raw(i as u32 + 1, raw, page))
        .collect();

    Assembly { steps, parts, tools }
}

/// Factual placeholder step straight from Pass 1; Pass 2 rewrites the text.
pub fn step_from_raw(step_number: u32, raw: &RawStepExtraction, source_page: usize) -> GeneratedStep {
    let callouts = dedupe_callouts(
        raw.warnings
            .iter()
            .map(Callout::warning)
            .chain(raw.annotations.iter().map(Callout::info)),
    );
    let screw_direction = raw
        .fasteners
        .iter()
        .filter_map(|f| f.rotation.as_deref())
        .map(ScrewDirection::from_rotation_text)
        .find(|d| *d != ScrewDirection::None)
        .unwrap_or_default();

    GeneratedStep {
        step_number,
        title: placeholder_title(step_number),
        instruction: raw.description.clone(),
        parts: dedupe_parts(raw.parts.iter()),
        tools: dedupe_tools(raw.tools.iter()),
        callouts,
        screw_direction,
        complexity: raw.complexity,
        confidence: raw.confidence,
        source_page,
        raw: raw.clone(),
        merged_from: Vec::new(),
        illustration_prompt: None,
        illustration_url: None,
        illustration_model: None,
    }
}

pub(crate) fn placeholder_title(step_number: u32) -> String {
    format!("Step {step_number}")
}

/// Renumber to `1..N`, moving placeholder titles along with the number.
pub fn renumber(steps: &mut [GeneratedStep]) {
    for (i, step) in steps.iter_mut().enumerate() {
        let n = i as u32 + 1;
        if step.title == placeholder_title(step.step_number) {
            step.title = placeholder_title(n);
        }
        step.step_number = n;
    }
}

pub fn dedupe_parts<'a>(parts: impl IntoIterator<Item = &'a PartRef>) -> Vec<PartRef> {
    let mut out: Vec<PartRef> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    for part in parts {
        match index.get(&part.key()) {
            Some(&i) => {
                let existing = &mut out[i];
                existing.quantity = existing.quantity.max(part.quantity);
                if existing.part_number.is_empty() && !part.part_number.is_empty() {
                    existing.part_number = part.part_number.clone();
                }
            }
            None => {
                index.insert(part.key(), out.len());
                out.push(part.clone());
            }
        }
    }
    out
}

pub fn dedupe_tools<'a>(tools: impl IntoIterator<Item = &'a String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for tool in tools {
        let t = tool.trim();
        if !t.is_empty() && !out.iter().any(|o| o.eq_ignore_ascii_case(t)) {
            out.push(t.to_string());
        }
    }
    out
}

pub fn dedupe_callouts(callouts: impl IntoIterator<Item = Callout>) -> Vec<Callout> {
    let mut out: Vec<Callout> = Vec::new();
    for c in callouts {
        if !out
            .iter()
            .any(|o| o.kind == c.kind && o.text.eq_ignore_ascii_case(&c.text))
        {
            out.push(c);
        }
    }
    out
}
