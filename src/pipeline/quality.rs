//! Quality checks, confidence score and the publish gate.
//!
//! Checks never fail; each problem becomes a [`QualityFlag`]. The flag codes
//! are stable identifiers for reviewers and dashboards:
//!
//! | Code                     | Severity         |
//! |--------------------------|------------------|
//! | `LOW_CONFIDENCE_STEP`    | warning / error  |
//! | `NO_STEPS`               | error            |
//! | `TOO_FEW_STEPS`          | warning          |
//! | `TOO_MANY_STEPS`         | warning          |
//! | `NON_CONTIGUOUS_STEPS`   | error            |
//! | `SINGLE_USE_PARTS`       | info             |
//! | `MISSING_TOOLS`          | warning          |
//! | `EMPTY_INSTRUCTION`      | error            |
//! | `SHORT_INSTRUCTION`      | warning          |
//! | `DUPLICATE_INSTRUCTION`  | warning          |
//! | `MISSING_SAFETY_WARNING` | warning          |
//! | `MISSING_ORIENTATION`    | info             |
//! | `MISSING_ILLUSTRATION`   | warning          |
//! | `LOW_CONFIDENCE_RATIO`   | warning / error  |
//! | `PART_ORDER_MISMATCH`    | info             |

use crate::config::QualityThresholds;
use crate::model::{CalloutKind, GeneratedStep, PublishDecision, QualityFlag, Severity};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;

/// Outcome of one quality run.
#[derive(Debug, Clone, PartialEq)]
pub struct QualityReport {
    pub flags: Vec<QualityFlag>,
    pub overall_confidence: f64,
    pub passes_gate: bool,
    pub publish_decision: PublishDecision,
}

impl QualityReport {
    pub fn count(&self, severity: Severity) -> usize {
        count(&self.flags, severity)
    }
}

fn count(flags: &[QualityFlag], severity: Severity) -> usize {
    flags.iter().filter(|f| f.severity == severity).count()
}

/// Mean step confidence; `0.0` for an empty guide.
pub fn overall_confidence(steps: &[GeneratedStep]) -> f64 {
    if steps.is_empty() {
        return 0.0;
    }
    steps.iter().map(|s| s.confidence).sum::<f64>() / steps.len() as f64
}

pub fn passes_gate(confidence: f64, errors: usize, t: &QualityThresholds) -> bool {
    errors == 0 && confidence >= t.gate_confidence
}

pub fn publish_decision(
    confidence: f64,
    errors: usize,
    warnings: usize,
    t: &QualityThresholds,
) -> PublishDecision {
    if confidence < t.hold_confidence || errors > 0 {
        PublishDecision::Hold
    } else if confidence >= t.auto_publish_confidence && warnings <= t.max_auto_publish_warnings {
        PublishDecision::AutoPublish
    } else {
        PublishDecision::Review
    }
}

/// Score a finished flag list (used again after illustration flags are appended).
pub fn grade(flags: Vec<QualityFlag>, steps: &[GeneratedStep], t: &QualityThresholds) -> QualityReport {
    let confidence = overall_confidence(steps);
    let errors = count(&flags, Severity::Error);
    let warnings = count(&flags, Severity::Warning);
    QualityReport {
        passes_gate: passes_gate(confidence, errors, t),
        publish_decision: publish_decision(confidence, errors, warnings, t),
        overall_confidence: confidence,
        flags,
    }
}

/// Run every check over a guide's steps.
///
/// `tools` is the guide-level tool list (legend included); `page_count` the
/// number of pages in the source PDF.
pub fn check_quality(
    steps: &[GeneratedStep],
    tools: &[String],
    page_count: usize,
    t: &QualityThresholds,
) -> QualityReport {
    let mut flags = Vec::new();
    check_step_confidence(steps, t, &mut flags);
    check_step_count(steps, page_count, &mut flags);
    check_contiguous(steps, &mut flags);
    check_single_use_parts(steps, t, &mut flags);
    check_missing_tools(steps, tools, &mut flags);
    check_instructions(steps, t, &mut flags);
    check_duplicates(steps, &mut flags);
    check_safety_warnings(steps, &mut flags);
    check_orientation(steps, &mut flags);
    check_illustrations(steps, &mut flags);
    check_confidence_ratio(steps, t, &mut flags);
    check_part_order(steps, &mut flags);
    grade(flags, steps, t)
}

fn check_step_confidence(steps: &[GeneratedStep], t: &QualityThresholds, flags: &mut Vec<QualityFlag>) {
    for s in steps {
        let severity = if s.confidence < t.error_confidence {
            Severity::Error
        } else if s.confidence < t.warn_confidence {
            Severity::Warning
        } else {
            continue;
        };
        flags.push(QualityFlag::new(
            "LOW_CONFIDENCE_STEP",
            severity,
            Some(s.step_number),
            format!("Step {} has confidence {:.2}", s.step_number, s.confidence),
        ));
    }
}

/// Expect roughly one step per three pages up to six steps per page.
fn check_step_count(steps: &[GeneratedStep], page_count: usize, flags: &mut Vec<QualityFlag>) {
    let n = steps.len();
    if n == 0 {
        flags.push(QualityFlag::new(
            "NO_STEPS",
            Severity::Error,
            None,
            format!("No steps were extracted from {page_count} pages"),
        ));
    } else if page_count >= 3 && n < page_count / 3 {
        flags.push(QualityFlag::new(
            "TOO_FEW_STEPS",
            Severity::Warning,
            None,
            format!("Only {n} steps for a {page_count}-page manual"),
        ));
    } else if n > page_count.max(1) * 6 {
        flags.push(QualityFlag::new(
            "TOO_MANY_STEPS",
            Severity::Warning,
            None,
            format!("{n} steps for a {page_count}-page manual"),
        ));
    }
}

fn check_contiguous(steps: &[GeneratedStep], flags: &mut Vec<QualityFlag>) {
    if let Some((i, s)) = steps
        .iter()
        .enumerate()
        .find(|(i, s)| s.step_number != *i as u32 + 1)
    {
        flags.push(QualityFlag::new(
            "NON_CONTIGUOUS_STEPS",
            Severity::Error,
            Some(s.step_number),
            format!("Expected step {} but found step {}", i + 1, s.step_number),
        ));
    }
}

fn check_single_use_parts(steps: &[GeneratedStep], t: &QualityThresholds, flags: &mut Vec<QualityFlag>) {
    if steps.len() <= t.large_guide_steps {
        return;
    }
    let mut uses: Vec<(String, String, usize)> = Vec::new();
    for s in steps {
        for p in &s.parts {
            let key = p.key();
            match uses.iter_mut().find(|(k, _, _)| *k == key) {
                Some(entry) => entry.2 += 1,
                None => uses.push((key, p.name.clone(), 1)),
            }
        }
    }
    let single: Vec<&str> = uses
        .iter()
        .filter(|(_, _, n)| *n == 1)
        .map(|(_, name, _)| name.as_str())
        .collect();
    if !single.is_empty() {
        let shown: Vec<&str> = single.iter().take(5).copied().collect();
        flags.push(QualityFlag::new(
            "SINGLE_USE_PARTS",
            Severity::Info,
            None,
            format!(
                "{} parts are referenced by only one step: {}{}",
                single.len(),
                shown.join(", "),
                if single.len() > shown.len() { ", …" } else { "" }
            ),
        ));
    }
}

/// Fastener families that cannot be installed by hand.
const TOOL_FASTENERS: &[&str] = &["screw", "bolt", "cam", "nut", "lag", "allen", "hex"];

fn check_missing_tools(steps: &[GeneratedStep], tools: &[String], flags: &mut Vec<QualityFlag>) {
    let any_tool = !tools.is_empty() || steps.iter().any(|s| !s.tools.is_empty());
    if any_tool {
        return;
    }
    let needing = steps.iter().find(|s| {
        s.raw.fasteners.iter().any(|f| {
            let ty = f.fastener_type.to_lowercase();
            TOOL_FASTENERS.iter().any(|k| ty.contains(k))
        })
    });
    if let Some(s) = needing {
        flags.push(QualityFlag::new(
            "MISSING_TOOLS",
            Severity::Warning,
            Some(s.step_number),
            "Fasteners need a tool but the guide lists none",
        ));
    }
}

fn check_instructions(steps: &[GeneratedStep], t: &QualityThresholds, flags: &mut Vec<QualityFlag>) {
    for s in steps {
        let len = s.instruction.trim().chars().count();
        if len == 0 {
            flags.push(QualityFlag::new(
                "EMPTY_INSTRUCTION",
                Severity::Error,
                Some(s.step_number),
                format!("Step {} has no instruction", s.step_number),
            ));
        } else if len < t.min_instruction_chars {
            flags.push(QualityFlag::new(
                "SHORT_INSTRUCTION",
                Severity::Warning,
                Some(s.step_number),
                format!("Step {} instruction is only {len} characters", s.step_number),
            ));
        }
    }
}

fn check_duplicates(steps: &[GeneratedStep], flags: &mut Vec<QualityFlag>) {
    let mut seen: HashMap<String, u32> = HashMap::new();
    for s in steps {
        let key = s.instruction.trim().to_lowercase();
        if key.is_empty() {
            continue;
        }
        if let Some(first) = seen.get(&key) {
            flags.push(QualityFlag::new(
                "DUPLICATE_INSTRUCTION",
                Severity::Warning,
                Some(s.step_number),
                format!("Step {} repeats the instruction of step {}", s.step_number, first),
            ));
        } else {
            seen.insert(key, s.step_number);
        }
    }
}

static RE_SAFETY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(heavy|two[\s-]?(people|persons?)|2[\s-]?(people|persons?)|second person)\b").unwrap()
});

fn check_safety_warnings(steps: &[GeneratedStep], flags: &mut Vec<QualityFlag>) {
    for s in steps {
        let has_warning = s.callouts.iter().any(|c| c.kind == CalloutKind::Warning);
        if has_warning {
            continue;
        }
        let mentions = s
            .raw
            .annotations
            .iter()
            .map(String::as_str)
            .chain([s.raw.description.as_str(), s.instruction.as_str()])
            .any(|text| RE_SAFETY.is_match(text));
        if mentions {
            flags.push(QualityFlag::new(
                "MISSING_SAFETY_WARNING",
                Severity::Warning,
                Some(s.step_number),
                format!(
                    "Step {} mentions a heavy or two-person task but has no warning",
                    s.step_number
                ),
            ));
        }
    }
}

fn check_orientation(steps: &[GeneratedStep], flags: &mut Vec<QualityFlag>) {
    for s in steps {
        if s.complexity.is_complex() && s.raw.spatial.orientation.is_none() {
            flags.push(QualityFlag::new(
                "MISSING_ORIENTATION",
                Severity::Info,
                Some(s.step_number),
                format!("Complex step {} has no orientation note", s.step_number),
            ));
        }
    }
}

fn check_illustrations(steps: &[GeneratedStep], flags: &mut Vec<QualityFlag>) {
    if !steps.iter().any(|s| s.illustration_url.is_some()) {
        return;
    }
    for s in steps.iter().filter(|s| s.illustration_url.is_none()) {
        flags.push(QualityFlag::new(
            "MISSING_ILLUSTRATION",
            Severity::Warning,
            Some(s.step_number),
            format!("Step {} has no illustration", s.step_number),
        ));
    }
}

fn check_confidence_ratio(steps: &[GeneratedStep], t: &QualityThresholds, flags: &mut Vec<QualityFlag>) {
    if steps.is_empty() {
        return;
    }
    let low = steps.iter().filter(|s| s.confidence < t.warn_confidence).count();
    let ratio = low as f64 / steps.len() as f64;
    let severity = if ratio > t.low_confidence_ratio_error {
        Severity::Error
    } else if ratio > t.low_confidence_ratio_warn {
        Severity::Warning
    } else {
        return;
    };
    flags.push(QualityFlag::new(
        "LOW_CONFIDENCE_RATIO",
        severity,
        None,
        format!(
            "{low} of {} steps ({:.0}%) are low-confidence",
            steps.len(),
            ratio * 100.0
        ),
    ));
}

/// A part mentioned in an instruction before the step that lists it.
fn check_part_order(steps: &[GeneratedStep], flags: &mut Vec<QualityFlag>) {
    let mut first_listed: Vec<(String, String, u32)> = Vec::new();
    for s in steps {
        for p in &s.parts {
            let key = p.key();
            if !first_listed.iter().any(|(k, _, _)| *k == key) {
                first_listed.push((key, p.name.trim().to_lowercase(), s.step_number));
            }
        }
    }
    for (_, name, listed_at) in first_listed {
        if name.chars().count() < 4 {
            continue;
        }
        let mentioned_at = steps
            .iter()
            .take_while(|s| s.step_number < listed_at)
            .find(|s| s.instruction.to_lowercase().contains(&name))
            .map(|s| s.step_number);
        if let Some(mentioned) = mentioned_at {
            flags.push(QualityFlag::new(
                "PART_ORDER_MISMATCH",
                Severity::Info,
                Some(mentioned),
                format!(
                    "'{name}' is mentioned in step {mentioned} but first listed in step {listed_at}"
                ),
            ));
        }
    }
}
