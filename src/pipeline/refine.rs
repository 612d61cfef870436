//! Pass 2: whole-document continuity refinement.
//!
//! The assembled steps are serialised into one text prompt and sent to the
//! refinement model in a single call. Each response entry names the assembled
//! step numbers it covers:
//!
//! * one number rewrites that step's title and instruction in place;
//! * several numbers merge those steps into one, placed where the lowest of
//!   them stood.
//!
//! A step number is claimed by the first entry that lists it; later claims and
//! out-of-range numbers are ignored. Steps no entry mentions pass through
//! unchanged. The result is renumbered `1..N`. A failed call or an unparseable
//! response leaves the steps exactly as they were.

use crate::cost::CostTracker;
use crate::model::{Callout, Complexity, GeneratedStep, ScrewDirection};
use crate::pipeline::assemble::{dedupe_callouts, dedupe_parts, dedupe_tools, renumber};
use crate::pipeline::parse::{parse_refinement, RefinementEntry};
use crate::progress::GuideProgressCallback;
use crate::prompts::{serialize_step_for_refinement, REFINEMENT_PROMPT};
use crate::provider::VisionProvider;
use crate::rate_limit::RateLimiterRegistry;
use std::collections::{BTreeMap, HashSet};
use tracing::{info, warn};

pub struct RefinementContext<'a> {
    pub provider: &'a dyn VisionProvider,
    pub limiters: &'a RateLimiterRegistry,
    pub max_tokens: usize,
    pub progress: &'a dyn GuideProgressCallback,
}

pub fn build_prompt(steps: &[GeneratedStep]) -> String {
    let mut prompt = String::from(REFINEMENT_PROMPT);
    for step in steps {
        prompt.push_str(&serialize_step_for_refinement(step.step_number, &step.raw));
        prompt.push('\n');
    }
    prompt
}

/// Run Pass 2. Never fails; on any problem the input comes back unchanged.
pub async fn refine(
    ctx: &RefinementContext<'_>,
    steps: Vec<GeneratedStep>,
    costs: &mut CostTracker,
) -> Vec<GeneratedStep> {
    let before = steps.len();
    if steps.is_empty() {
        return steps;
    }
    ctx.progress.on_refinement_start(before);

    ctx.limiters.limiter(ctx.provider.name()).acquire().await;
    let prompt = build_prompt(&steps);
    let refined = match ctx.provider.complete(&prompt, ctx.max_tokens).await {
        Ok(response) => {
            costs.record(
                ctx.provider.model(),
                response.input_tokens,
                response.output_tokens,
                Some("refinement"),
            );
            match parse_refinement(&response.text) {
                Ok(entries) => apply_refinement(steps, &entries),
                Err(e) => {
                    warn!("Refinement response unusable, keeping Pass-1 text: {}", e);
                    steps
                }
            }
        }
        Err(e) => {
            warn!("Refinement call failed, keeping Pass-1 text: {}", e);
            steps
        }
    };

    info!("Pass 2 complete: {} → {} steps", before, refined.len());
    ctx.progress.on_refinement_complete(before, refined.len());
    refined
}

/// Apply parsed refinement entries to steps numbered `1..N`.
pub fn apply_refinement(steps: Vec<GeneratedStep>, entries: &[RefinementEntry]) -> Vec<GeneratedStep> {
    let n = steps.len() as u32;
    let mut claimed: HashSet<u32> = HashSet::new();
    // anchor (lowest claimed number) → (entry, claimed numbers in order)
    let mut plan: BTreeMap<u32, (&RefinementEntry, Vec<u32>)> = BTreeMap::new();

    for entry in entries {
        let mut numbers: Vec<u32> = entry
            .original_step_numbers
            .iter()
            .copied()
            .filter(|x| (1..=n).contains(x))
            .collect();
        numbers.sort_unstable();
        numbers.dedup();
        numbers.retain(|x| !claimed.contains(x));
        if let Some(&anchor) = numbers.first() {
            claimed.extend(numbers.iter().copied());
            plan.insert(anchor, (entry, numbers));
        }
    }

    let mut slots: Vec<Option<GeneratedStep>> = steps.into_iter().map(Some).collect();
    let mut out = Vec::with_capacity(slots.len());

    for number in 1..=n {
        if let Some((entry, numbers)) = plan.get(&number) {
            let group: Vec<GeneratedStep> = numbers
                .iter()
                .filter_map(|x| slots[(*x - 1) as usize].take())
                .collect();
            if let Some(step) = rewrite(group, entry) {
                out.push(step);
            }
        } else if !claimed.contains(&number) {
            if let Some(step) = slots[(number - 1) as usize].take() {
                out.push(step);
            }
        }
    }

    renumber(&mut out);
    out
}

fn rewrite(mut group: Vec<GeneratedStep>, entry: &RefinementEntry) -> Option<GeneratedStep> {
    let mut step = if group.len() > 1 {
        merge(&group)
    } else {
        group.pop()?
    };
    if !entry.title.is_empty() {
        step.title = entry.title.clone();
    }
    if !entry.instruction.is_empty() {
        step.instruction = entry.instruction.clone();
    }
    if let Some(note) = &entry.transition_note {
        let mut callouts = vec![Callout::info(note.clone())];
        callouts.append(&mut step.callouts);
        step.callouts = dedupe_callouts(callouts);
    }
    Some(step)
}

/// Fold several steps into the first one.
fn merge(group: &[GeneratedStep]) -> GeneratedStep {
    let first = &group[0];
    let mut merged = first.clone();

    merged.instruction = group
        .iter()
        .map(|s| s.instruction.trim())
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    merged.parts = dedupe_parts(group.iter().flat_map(|s| s.parts.iter()));
    merged.tools = dedupe_tools(group.iter().flat_map(|s| s.tools.iter()));
    merged.callouts = dedupe_callouts(group.iter().flat_map(|s| s.callouts.iter().cloned()));
    merged.screw_direction = group
        .iter()
        .map(|s| s.screw_direction)
        .find(|d| *d != ScrewDirection::None)
        .unwrap_or_default();
    merged.complexity = if group.iter().any(|s| s.complexity.is_complex()) {
        Complexity::Complex
    } else {
        Complexity::Simple
    };
    merged.confidence = group
        .iter()
        .map(|s| s.confidence)
        .fold(f64::INFINITY, f64::min);
    merged.merged_from = group.iter().map(|s| s.step_number).collect();
    merged.illustration_prompt = None;
    merged.illustration_url = None;
    merged.illustration_model = None;
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CalloutKind, PartRef, RawStepExtraction, SpatialNotes};
    use crate::pipeline::assemble::step_from_raw;

    fn steps(n: u32) -> Vec<GeneratedStep> {
        (1..=n)
            .map(|i| {
                let raw = RawStepExtraction {
                    step_number: i,
                    description: format!("raw {i}"),
                    parts: vec![PartRef {
                        part_number: format!("P{}", i % 3),
                        name: format!("part {}", i % 3),
                        quantity: i,
                    }],
                    tools: vec![],
                    actions: vec![],
                    spatial: SpatialNotes::default(),
                    arrows: vec![],
                    fasteners: vec![],
                    annotations: vec![],
                    warnings: vec![],
                    complexity: Complexity::Simple,
                    confidence: 0.9,
                };
                step_from_raw(i, &raw, i as usize)
            })
            .collect()
    }

    fn entry(numbers: &[u32], title: &str, note: Option<&str>) -> RefinementEntry {
        RefinementEntry {
            original_step_numbers: numbers.to_vec(),
            title: title.into(),
            instruction: format!("{title} instruction"),
            transition_note: note.map(str::to_string),
        }
    }

    fn assert_contiguous(steps: &[GeneratedStep]) {
        for (i, s) in steps.iter().enumerate() {
            assert_eq!(s.step_number, i as u32 + 1);
        }
    }

    #[test]
    fn merging_five_and_six_removes_one_step() {
        let mut input = steps(8);
        input[4].confidence = 0.95;
        input[5].confidence = 0.62;
        input[5].complexity = Complexity::Complex;
        input[5].screw_direction = ScrewDirection::Clockwise;

        let out = apply_refinement(input, &[entry(&[5, 6], "Attach the back panel", None)]);
        assert_eq!(out.len(), 7);
        assert_contiguous(&out);

        let merged = &out[4];
        assert_eq!(merged.title, "Attach the back panel");
        assert_eq!(merged.merged_from, vec![5, 6]);
        assert_eq!(merged.confidence, 0.62);
        assert!(merged.complexity.is_complex());
        assert_eq!(merged.screw_direction, ScrewDirection::Clockwise);
        // P2 (step 5) and P0 (step 6).
        assert_eq!(merged.parts.len(), 2);
        assert_eq!(out[5].raw.step_number, 7);
    }

    #[test]
    fn singleton_rewrites_in_place_with_transition_note() {
        let out = apply_refinement(
            steps(3),
            &[entry(&[2], "Flip the frame", Some("The frame is complete; now the drawers."))],
        );
        assert_eq!(out.len(), 3);
        assert_eq!(out[1].title, "Flip the frame");
        assert_eq!(out[1].callouts[0].kind, CalloutKind::Info);
        assert!(out[1].callouts[0].text.starts_with("The frame"));
        assert_eq!(out[0].title, "Step 1");
        assert_eq!(out[0].instruction, "raw 1");
    }

    #[test]
    fn invalid_and_duplicate_claims_are_ignored() {
        let out = apply_refinement(
            steps(4),
            &[
                entry(&[2, 3], "A", None),
                entry(&[3, 9], "B", None),
                entry(&[0], "C", None),
            ],
        );
        assert_eq!(out.len(), 3);
        assert_contiguous(&out);
        assert_eq!(out[1].title, "A");
        assert_eq!(out[2].title, "Step 3");
        assert_eq!(out[2].raw.step_number, 4);
    }

    #[test]
    fn empty_fields_keep_existing_text() {
        let mut e = entry(&[1], "", None);
        e.instruction.clear();
        let out = apply_refinement(steps(2), &[e]);
        assert_eq!(out[0].title, "Step 1");
        assert_eq!(out[0].instruction, "raw 1");
    }

    #[test]
    fn prompt_lists_every_step() {
        let p = build_prompt(&steps(3));
        assert!(p.starts_with(REFINEMENT_PROMPT));
        assert!(p.contains("STEP 1\n") && p.contains("STEP 3\n"));
    }
}
