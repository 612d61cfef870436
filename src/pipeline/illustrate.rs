//! Per-step illustration: complexity scoring, prompt building, image calls.
//!
//! Pass 1's `simple`/`complex` tag is the model's impression of the panel.
//! Illustration routing uses its own score computed from the structured
//! extraction instead, because the cost difference between image tiers is
//! large and the score is reproducible:
//!
//! | Signal                                   | Points |
//! |------------------------------------------|--------|
//! | total part quantity ≥ 6 / ≥ 3            | 3 / 1  |
//! | distinct action types ≥ 3 / ≥ 2          | 2 / 1  |
//! | orientation and alignment / either       | 2 / 1  |
//! | ≥ 2 fastener types / ≥ 2 fasteners       | 2 / 1  |
//! | arrows ≥ 4 / ≥ 2                         | 2 / 1  |
//! | rotate/flip action or rotating direction | 2      |
//!
//! A score at or above the configured threshold (5) routes to the
//! high-fidelity model. A failed image call becomes an `ILLUSTRATION_FAILED`
//! warning on that step; the batch always runs to the end.

use crate::config::IllustrationConfig;
use crate::cost::CostTracker;
use crate::model::{Complexity, GeneratedStep, QualityFlag, Severity};
use crate::progress::GuideProgressCallback;
use crate::prompts::{illustration_guidance, ILLUSTRATION_STYLE};
use crate::provider::ImageGenerator;
use crate::rate_limit::RateLimiterRegistry;
use std::collections::HashSet;
use tracing::{debug, info, warn};

pub struct IllustrationContext<'a> {
    /// `None` only in dry-run mode.
    pub generator: Option<&'a dyn ImageGenerator>,
    pub limiters: &'a RateLimiterRegistry,
    pub config: &'a IllustrationConfig,
    pub progress: &'a dyn GuideProgressCallback,
}

const ROTATION_WORDS: &[&str] = &["rotat", "clockwise", "turn", "twist", "swing", "pivot"];

pub fn complexity_score(step: &GeneratedStep) -> u32 {
    let raw = &step.raw;
    let mut score = 0;

    let quantity: u32 = step.parts.iter().map(|p| p.quantity).sum();
    score += match quantity {
        q if q >= 6 => 3,
        q if q >= 3 => 1,
        _ => 0,
    };

    let action_types: HashSet<&str> = raw.actions.iter().map(|a| a.action_type.as_str()).collect();
    score += match action_types.len() {
        n if n >= 3 => 2,
        2 => 1,
        _ => 0,
    };

    score += match (raw.spatial.orientation.is_some(), raw.spatial.alignment.is_some()) {
        (true, true) => 2,
        (true, false) | (false, true) => 1,
        _ => 0,
    };

    let fastener_types: HashSet<&str> =
        raw.fasteners.iter().map(|f| f.fastener_type.as_str()).collect();
    score += if fastener_types.len() >= 2 {
        2
    } else if raw.fasteners.len() >= 2 {
        1
    } else {
        0
    };

    score += match raw.arrows.len() {
        n if n >= 4 => 2,
        n if n >= 2 => 1,
        _ => 0,
    };

    let rotates = |text: &str| {
        let t = text.to_lowercase();
        ROTATION_WORDS.iter().any(|w| t.contains(w))
    };
    let turning = raw.actions.iter().any(|a| {
        let ty = a.action_type.to_lowercase();
        ty.contains("rotate") || ty.contains("flip") || a.direction.as_deref().is_some_and(rotates)
    }) || raw.arrows.iter().any(|a| rotates(&a.direction));
    if turning {
        score += 2;
    }

    score
}

pub fn classify(step: &GeneratedStep, threshold: u32) -> Complexity {
    if complexity_score(step) >= threshold {
        Complexity::Complex
    } else {
        Complexity::Simple
    }
}

pub fn select_model(complexity: Complexity, config: &IllustrationConfig) -> &str {
    match complexity {
        Complexity::Complex => &config.complex_model,
        Complexity::Simple => &config.simple_model,
    }
}

/// Style preamble, a structured scene description, then tier guidance.
pub fn build_illustration_prompt(step: &GeneratedStep, complexity: Complexity) -> String {
    let raw = &step.raw;
    let mut scene = vec![format!("Step {}: {}", step.step_number, step.title)];

    if !step.parts.is_empty() {
        let parts: Vec<String> = step
            .parts
            .iter()
            .map(|p| format!("{} x{}", p.name, p.quantity))
            .collect();
        scene.push(format!("Parts: {}", parts.join(", ")));
    }
    if !step.tools.is_empty() {
        scene.push(format!("Tools: {}", step.tools.join(", ")));
    }
    if let Some(o) = &raw.spatial.orientation {
        scene.push(format!("Orientation: {o}"));
    }
    if let Some(a) = &raw.spatial.alignment {
        scene.push(format!("Alignment: {a}"));
    }
    for a in &raw.actions {
        let mut line = format!("Action: {} {}", a.action_type, a.subject);
        if let Some(t) = &a.target {
            line.push_str(&format!(" into/onto {t}"));
        }
        if let Some(d) = &a.direction {
            line.push_str(&format!(" ({d})"));
        }
        scene.push(line);
    }
    let motion: Vec<&str> = raw
        .arrows
        .iter()
        .filter(|a| a.indicates_motion)
        .map(|a| a.direction.as_str())
        .collect();
    if !motion.is_empty() {
        scene.push(format!("Motion arrows: {}", motion.join(", ")));
    }
    for f in &raw.fasteners {
        let mut line = format!("Fastener: {}", f.fastener_type);
        if let Some(r) = &f.rotation {
            line.push_str(&format!(", turned {r}"));
        }
        scene.push(line);
    }

    format!(
        "{}\n\nScene:\n- {}\n\n{}",
        ILLUSTRATION_STYLE,
        scene.join("\n- "),
        illustration_guidance(complexity)
    )
}

/// Illustrate every step in place. Returns one warning flag per failed step.
pub async fn illustrate(
    ctx: &IllustrationContext<'_>,
    steps: &mut [GeneratedStep],
    costs: &mut CostTracker,
) -> Vec<QualityFlag> {
    let total = steps.len();
    let mut flags = Vec::new();
    let mut drawn = 0usize;

    for step in steps.iter_mut().filter(|s| s.step_number != 0) {
        let n = step.step_number;
        let complexity = classify(step, ctx.config.complex_threshold);
        let model = select_model(complexity, ctx.config);
        let prompt = build_illustration_prompt(step, complexity);
        step.illustration_prompt = Some(prompt.clone());

        let generator = match ctx.generator {
            Some(g) if !ctx.config.dry_run => g,
            _ => {
                debug!("Step {}: dry run, {:?} prompt prepared for {}", n, complexity, model);
                continue;
            }
        };

        ctx.progress.on_illustration_start(n, total);
        ctx.limiters.limiter(generator.name()).acquire().await;
        match generator.generate(&prompt, model).await {
            Ok(image) => {
                costs.record(
                    &image.model,
                    image.input_tokens,
                    image.output_tokens,
                    Some(&format!("illustration step {n}")),
                );
                step.illustration_url = Some(image.url);
                step.illustration_model = Some(image.model);
                drawn += 1;
                ctx.progress.on_illustration_complete(n, total, None);
            }
            Err(e) => {
                warn!("Step {}: illustration failed: {}", n, e);
                let message = e.to_string();
                flags.push(QualityFlag::new(
                    "ILLUSTRATION_FAILED",
                    Severity::Warning,
                    Some(n),
                    format!("Illustration for step {n} failed: {message}"),
                ));
                ctx.progress.on_illustration_complete(n, total, Some(&message));
            }
        }
    }

    info!("Illustrations: {} drawn, {} failed", drawn, flags.len());
    flags
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Action, Arrow, Fastener, PartRef, RawStepExtraction, SpatialNotes};
    use crate::pipeline::assemble::step_from_raw;

    fn raw() -> RawStepExtraction {
        RawStepExtraction {
            step_number: 1,
            description: "side panel".into(),
            parts: vec![],
            tools: vec![],
            actions: vec![],
            spatial: SpatialNotes::default(),
            arrows: vec![],
            fasteners: vec![],
            annotations: vec![],
            warnings: vec![],
            complexity: Complexity::Simple,
            confidence: 0.9,
        }
    }

    fn action(ty: &str, direction: Option<&str>) -> Action {
        Action {
            action_type: ty.into(),
            subject: "panel".into(),
            target: None,
            direction: direction.map(str::to_string),
        }
    }

    fn arrow(direction: &str) -> Arrow {
        Arrow {
            direction: direction.into(),
            label: None,
            indicates_motion: true,
        }
    }

    fn fastener(ty: &str) -> Fastener {
        Fastener {
            fastener_type: ty.into(),
            part_id: None,
            rotation: None,
            notes: None,
        }
    }

    #[test]
    fn bare_step_scores_zero() {
        let s = step_from_raw(1, &raw(), 1);
        assert_eq!(complexity_score(&s), 0);
        assert_eq!(classify(&s, 5), Complexity::Simple);
    }

    #[test]
    fn busy_step_is_complex() {
        let mut r = raw();
        r.parts = vec![PartRef {
            part_number: "104".into(),
            name: "cam lock".into(),
            quantity: 8,
        }];
        r.actions = vec![action("insert", None), action("rotate", Some("clockwise"))];
        r.spatial.orientation = Some("upright".into());
        let s = step_from_raw(1, &r, 1);
        // 3 (parts) + 1 (two actions) + 1 (orientation) + 2 (rotation)
        assert_eq!(complexity_score(&s), 7);
        assert_eq!(classify(&s, 5), Complexity::Complex);
    }

    #[test]
    fn fastener_and_arrow_bands() {
        let mut r = raw();
        r.fasteners = vec![fastener("screw"), fastener("screw")];
        r.arrows = vec![arrow("down"), arrow("left")];
        assert_eq!(complexity_score(&step_from_raw(1, &r, 1)), 2);

        r.fasteners.push(fastener("dowel"));
        r.arrows.extend([arrow("up"), arrow("turn clockwise")]);
        // 2 (types) + 2 (four arrows) + 2 (rotating arrow)
        assert_eq!(complexity_score(&step_from_raw(1, &r, 1)), 6);
    }

    #[test]
    fn prompt_has_style_scene_and_guidance() {
        let mut r = raw();
        r.actions = vec![action("slide", Some("left"))];
        r.arrows = vec![arrow("left")];
        let s = step_from_raw(3, &r, 1);
        let p = build_illustration_prompt(&s, Complexity::Complex);
        assert!(p.starts_with(ILLUSTRATION_STYLE));
        assert!(p.contains("Action: slide panel (left)"));
        assert!(p.contains("Motion arrows: left"));
        assert!(p.ends_with(illustration_guidance(Complexity::Complex)));
    }

    #[test]
    fn model_follows_tier() {
        let cfg = IllustrationConfig::default();
        assert_eq!(select_model(Complexity::Complex, &cfg), "gpt-image-1");
        assert_eq!(select_model(Complexity::Simple, &cfg), "gpt-image-1-mini");
    }
}
