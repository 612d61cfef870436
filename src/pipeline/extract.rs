//! Pass 1: per-page raw visual extraction with cost/content escalation.
//!
//! Pages are processed strictly in order. For each page the cheap (primary)
//! model is asked first. The expensive (secondary) model is consulted when
//!
//! * the cheap call fails outright,
//! * its output cannot be parsed, or
//! * the parsed page trips a content trigger ([`should_escalate`]), which
//!   includes a page with no steps that is not a parts listing.
//!
//! After a content trigger the expensive parse is preferred, with the cheap
//! parse kept as the fallback. When nothing parses the page degrades to
//! [`RawPageExtraction::empty`]; a page never aborts the document.

use crate::config::EscalationThresholds;
use crate::cost::CostTracker;
use crate::error::ProviderError;
use crate::model::{PageRecord, RawPageExtraction};
use crate::pipeline::parse::parse_page_extraction;
use crate::pipeline::render::RenderedPage;
use crate::progress::GuideProgressCallback;
use crate::prompts::EXTRACTION_PROMPT;
use crate::provider::VisionProvider;
use crate::rate_limit::RateLimiterRegistry;
use tracing::{debug, info, warn};

/// Everything Pass 1 needs besides the pages and the cost ledger.
pub struct ExtractionContext<'a> {
    pub primary: &'a dyn VisionProvider,
    pub secondary: Option<&'a dyn VisionProvider>,
    pub limiters: &'a RateLimiterRegistry,
    pub thresholds: EscalationThresholds,
    pub max_tokens: usize,
    pub progress: &'a dyn GuideProgressCallback,
}

/// Result of Pass 1 for one page.
#[derive(Debug, Clone, PartialEq)]
pub struct PageOutcome {
    pub extraction: RawPageExtraction,
    pub record: PageRecord,
}

/// Content triggers that justify the expensive model, in check order.
pub fn escalation_reasons(page: &RawPageExtraction, t: &EscalationThresholds) -> Vec<String> {
    let mut reasons = Vec::new();
    if page.steps.is_empty() && !page.is_parts_only {
        reasons.push("no steps".to_string());
    }
    if page.arrow_count >= t.arrow_count {
        reasons.push(format!("{} arrows", page.arrow_count));
    }
    if page.has_hinge_or_rotation {
        reasons.push("hinge or rotation".to_string());
    }
    if page.has_fastener_ambiguity {
        reasons.push("ambiguous fastener".to_string());
    }
    if let Some(low) = page
        .steps
        .iter()
        .map(|s| s.confidence)
        .filter(|c| *c < t.min_confidence)
        .reduce(f64::min)
    {
        reasons.push(format!("step confidence {low:.2}"));
    }
    reasons
}

pub fn should_escalate(page: &RawPageExtraction, t: &EscalationThresholds) -> bool {
    !escalation_reasons(page, t).is_empty()
}

/// Run Pass 1 over every page, in order.
pub async fn extract_pages(
    ctx: &ExtractionContext<'_>,
    pages: &[RenderedPage],
    costs: &mut CostTracker,
) -> Vec<PageOutcome> {
    let total = pages.len();
    let mut outcomes = Vec::with_capacity(total);
    for page in pages {
        outcomes.push(extract_page(ctx, page, total, costs).await);
    }
    let escalated = outcomes.iter().filter(|o| o.record.escalated).count();
    let degraded = outcomes.iter().filter(|o| !o.record.parsed).count();
    info!(
        "Pass 1 complete: {} pages, {} escalated, {} empty",
        total, escalated, degraded
    );
    outcomes
}

/// Extract one page. Never fails: the worst case is an empty extraction.
pub async fn extract_page(
    ctx: &ExtractionContext<'_>,
    page: &RenderedPage,
    total_pages: usize,
    costs: &mut CostTracker,
) -> PageOutcome {
    let n = page.page_number;
    ctx.progress.on_page_start(n, total_pages);

    let cheap = match call(ctx, ctx.primary, page, costs).await {
        Ok(text) => parse_page_extraction(&text, n).map_err(|e| e.to_string()),
        Err(e) => Err(e.to_string()),
    };

    let outcome = match (cheap, ctx.secondary) {
        (Ok(extraction), secondary) => {
            let reasons = escalation_reasons(&extraction, &ctx.thresholds);
            match secondary {
                Some(expensive) if !reasons.is_empty() => {
                    info!("Page {}: escalating ({})", n, reasons.join(", "));
                    match escalate(ctx, expensive, page, costs).await {
                        Ok(better) => finish(better, expensive.model(), true),
                        Err(e) => {
                            warn!("Page {}: escalation failed, keeping cheap parse: {}", n, e);
                            finish(extraction, ctx.primary.model(), true)
                        }
                    }
                }
                _ => finish(extraction, ctx.primary.model(), false),
            }
        }
        (Err(cheap_err), Some(expensive)) => {
            warn!("Page {}: cheap tier unusable ({}), escalating", n, cheap_err);
            match escalate(ctx, expensive, page, costs).await {
                Ok(extraction) => finish(extraction, expensive.model(), true),
                Err(e) => degrade(n, expensive.model(), true, &e),
            }
        }
        (Err(cheap_err), None) => degrade(n, ctx.primary.model(), false, &cheap_err),
    };

    if outcome.record.parsed {
        ctx.progress
            .on_page_complete(n, total_pages, outcome.record.step_count, outcome.record.escalated);
    } else {
        ctx.progress
            .on_page_error(n, total_pages, "no parseable extraction");
    }
    outcome
}

/// Rate-limited model call; every successful call is costed.
async fn call(
    ctx: &ExtractionContext<'_>,
    provider: &dyn VisionProvider,
    page: &RenderedPage,
    costs: &mut CostTracker,
) -> Result<String, ProviderError> {
    ctx.limiters.limiter(provider.name()).acquire().await;
    let response = provider
        .analyze(&page.bytes, &page.mime_type, EXTRACTION_PROMPT, ctx.max_tokens)
        .await?;
    let label = format!("page {}", page.page_number);
    let usd = costs.record(
        provider.model(),
        response.input_tokens,
        response.output_tokens,
        Some(&label),
    );
    debug!(
        "Page {}: {} ({} in / {} out, ${:.5})",
        page.page_number,
        provider.model(),
        response.input_tokens,
        response.output_tokens,
        usd
    );
    Ok(response.text)
}

async fn escalate(
    ctx: &ExtractionContext<'_>,
    expensive: &dyn VisionProvider,
    page: &RenderedPage,
    costs: &mut CostTracker,
) -> Result<RawPageExtraction, String> {
    let text = call(ctx, expensive, page, costs)
        .await
        .map_err(|e| e.to_string())?;
    parse_page_extraction(&text, page.page_number).map_err(|e| e.to_string())
}

fn finish(extraction: RawPageExtraction, model: &str, escalated: bool) -> PageOutcome {
    let record = PageRecord {
        page_number: extraction.page_number,
        model_used: model.to_string(),
        escalated,
        parsed: true,
        step_count: extraction.steps.len(),
    };
    PageOutcome { extraction, record }
}

fn degrade(page_number: usize, model: &str, escalated: bool, reason: &str) -> PageOutcome {
    warn!("Page {}: no usable extraction ({}); continuing with an empty page", page_number, reason);
    PageOutcome {
        extraction: RawPageExtraction::empty(page_number),
        record: PageRecord {
            page_number,
            model_used: model.to_string(),
            escalated,
            parsed: false,
            step_count: 0,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Complexity, RawStepExtraction, SpatialNotes};

    fn step(confidence: f64) -> RawStepExtraction {
        RawStepExtraction {
            step_number: 1,
            description: "panel".into(),
            parts: vec![],
            tools: vec![],
            actions: vec![],
            spatial: SpatialNotes::default(),
            arrows: vec![],
            fasteners: vec![],
            annotations: vec![],
            warnings: vec![],
            complexity: Complexity::Simple,
            confidence,
        }
    }

    fn clean_page() -> RawPageExtraction {
        RawPageExtraction {
            steps: vec![step(0.95)],
            arrow_count: 2,
            ..RawPageExtraction::empty(1)
        }
    }

    #[test]
    fn clean_page_does_not_escalate() {
        assert!(!should_escalate(&clean_page(), &EscalationThresholds::default()));
    }

    #[test]
    fn each_trigger_escalates_on_its_own() {
        let t = EscalationThresholds::default();

        let mut arrows = clean_page();
        arrows.arrow_count = 5;
        assert!(should_escalate(&arrows, &t));

        let mut hinge = clean_page();
        hinge.has_hinge_or_rotation = true;
        assert!(should_escalate(&hinge, &t));

        let mut fastener = clean_page();
        fastener.has_fastener_ambiguity = true;
        assert!(should_escalate(&fastener, &t));

        let mut unsure = clean_page();
        unsure.steps.push(step(0.69));
        assert!(should_escalate(&unsure, &t));
        assert_eq!(escalation_reasons(&unsure, &t), vec!["step confidence 0.69"]);
    }

    #[test]
    fn stepless_page_escalates_unless_parts_only() {
        let t = EscalationThresholds::default();
        let empty = RawPageExtraction::empty(3);
        assert_eq!(escalation_reasons(&empty, &t), vec!["no steps"]);

        let legend = RawPageExtraction {
            is_parts_only: true,
            ..RawPageExtraction::empty(3)
        };
        assert!(!should_escalate(&legend, &t));
    }

    #[test]
    fn four_arrows_and_threshold_confidence_stay_cheap() {
        let mut page = clean_page();
        page.arrow_count = 4;
        page.steps = vec![step(0.7)];
        assert!(!should_escalate(&page, &EscalationThresholds::default()));
    }
}
