//! End-to-end guide generation for one product.
//!
//! [`GuidePipeline::generate`] runs the stages in a fixed order on a single
//! task:
//!
//! ```text
//! render ─▶ Pass 1 (per page, escalating) ─▶ assemble ─▶ Pass 2
//!        ─▶ quality ─▶ illustrate ─▶ (re-check) ─▶ GeneratedGuide
//! ```
//!
//! Only document-level problems are returned as errors: the PDF cannot be
//! fetched or rendered, or not a single page produced a parseable
//! extraction. Everything else (failed model calls, bad JSON, failed
//! illustrations) is absorbed by its stage and shows up as degraded output or
//! quality flags.

use crate::config::{GuideConfig, ProviderSpec};
use crate::cost::CostTracker;
use crate::error::GuideError;
use crate::model::{estimate_minutes, Difficulty, GeneratedGuide, GenerationMetadata};
use crate::pipeline::assemble::assemble;
use crate::pipeline::extract::{extract_pages, ExtractionContext};
use crate::pipeline::illustrate::{illustrate, IllustrationContext};
use crate::pipeline::quality::{check_quality, grade};
use crate::pipeline::refine::{refine, RefinementContext};
use crate::pipeline::render::{PageSource, PdfiumRenderer};
use crate::progress::{NoopProgressCallback, ProgressCallback};
use crate::provider::{create_provider, ImageGenerator, OpenAiImageGenerator, VisionProvider};
use crate::rate_limit::RateLimiterRegistry;
use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// A configured pipeline. Cheap to share behind an `Arc`; holds no per-run state.
pub struct GuidePipeline {
    config: GuideConfig,
    renderer: Arc<dyn PageSource>,
    primary: Arc<dyn VisionProvider>,
    secondary: Option<Arc<dyn VisionProvider>>,
    refiner: Arc<dyn VisionProvider>,
    images: Option<Arc<dyn ImageGenerator>>,
    limiters: Arc<RateLimiterRegistry>,
    progress: ProgressCallback,
}

impl GuidePipeline {
    /// Assemble a pipeline from injected collaborators.
    ///
    /// Refinement runs on `primary` and illustrations are off until
    /// [`with_image_generator`](Self::with_image_generator) is called (or the
    /// config asks for a dry run).
    pub fn new(
        config: GuideConfig,
        renderer: Arc<dyn PageSource>,
        primary: Arc<dyn VisionProvider>,
        limiters: Arc<RateLimiterRegistry>,
    ) -> Self {
        Self {
            config,
            renderer,
            refiner: Arc::clone(&primary),
            primary,
            secondary: None,
            images: None,
            limiters,
            progress: Arc::new(NoopProgressCallback),
        }
    }

    /// Build every backend the configuration names.
    pub fn from_config(
        config: GuideConfig,
        limiters: Arc<RateLimiterRegistry>,
    ) -> Result<Self, GuideError> {
        let timeout = config.api_timeout_secs;
        let primary = create_provider(&config.primary, timeout)?;

        let refiner = if config.refinement_model() == config.primary.model {
            Arc::clone(&primary)
        } else {
            let spec = ProviderSpec {
                model: config.refinement_model().to_string(),
                ..config.primary.clone()
            };
            create_provider(&spec, timeout)?
        };

        let secondary = config
            .secondary
            .as_ref()
            .map(|spec| create_provider(spec, timeout))
            .transpose()?;

        let images: Option<Arc<dyn ImageGenerator>> =
            if config.illustration.enabled && !config.illustration.dry_run {
                Some(Arc::new(OpenAiImageGenerator::from_env(timeout)?))
            } else {
                None
            };

        let renderer: Arc<dyn PageSource> = Arc::new(PdfiumRenderer::from_config(&config));

        Ok(Self {
            config,
            renderer,
            primary,
            secondary,
            refiner,
            images,
            limiters,
            progress: Arc::new(NoopProgressCallback),
        })
    }

    pub fn with_secondary(mut self, provider: Arc<dyn VisionProvider>) -> Self {
        self.secondary = Some(provider);
        self
    }

    /// Use a different backend/model for Pass 2.
    pub fn with_refiner(mut self, provider: Arc<dyn VisionProvider>) -> Self {
        self.refiner = provider;
        self
    }

    pub fn with_image_generator(mut self, generator: Arc<dyn ImageGenerator>) -> Self {
        self.images = Some(generator);
        self
    }

    pub fn with_progress(mut self, progress: ProgressCallback) -> Self {
        self.progress = progress;
        self
    }

    pub fn config(&self) -> &GuideConfig {
        &self.config
    }

    pub fn renderer(&self) -> &Arc<dyn PageSource> {
        &self.renderer
    }

    /// Generate a guide for `product_id` from the PDF at `pdf_url`.
    pub async fn generate(
        &self,
        product_id: &str,
        title: &str,
        pdf_url: &str,
    ) -> Result<GeneratedGuide, GuideError> {
        let start = Instant::now();
        info!("Generating guide for product {} from {}", product_id, pdf_url);

        let pages = self.renderer.render_all_pages(pdf_url, self.config.dpi).await?;
        let page_count = pages.len();
        if page_count == 0 {
            return Err(GuideError::NoPagesExtracted {
                source_url: pdf_url.to_string(),
                total: 0,
            });
        }
        self.progress.on_generation_start(page_count);

        let mut costs = CostTracker::new();

        // ── Pass 1 ───────────────────────────────────────────────────────
        let extraction_ctx = ExtractionContext {
            primary: self.primary.as_ref(),
            secondary: self.secondary.as_deref(),
            limiters: &self.limiters,
            thresholds: self.config.escalation,
            max_tokens: self.config.max_tokens_extraction,
            progress: self.progress.as_ref(),
        };
        let outcomes = extract_pages(&extraction_ctx, &pages, &mut costs).await;
        if !outcomes.iter().any(|o| o.record.parsed) {
            return Err(GuideError::NoPagesExtracted {
                source_url: pdf_url.to_string(),
                total: page_count,
            });
        }
        let (extractions, records): (Vec<_>, Vec<_>) = outcomes
            .into_iter()
            .map(|o| (o.extraction, o.record))
            .unzip();

        // ── Assemble + Pass 2 ────────────────────────────────────────────
        let assembly = assemble(&extractions);
        let refined_ran = !assembly.steps.is_empty();
        let refinement_ctx = RefinementContext {
            provider: self.refiner.as_ref(),
            limiters: &self.limiters,
            max_tokens: self.config.max_tokens_refinement,
            progress: self.progress.as_ref(),
        };
        let mut steps = refine(&refinement_ctx, assembly.steps, &mut costs).await;

        // ── Quality + illustration ───────────────────────────────────────
        let thresholds = &self.config.quality;
        let mut report = check_quality(&steps, &assembly.tools, page_count, thresholds);

        let illustration = &self.config.illustration;
        let can_draw = illustration.dry_run || self.images.is_some();
        if illustration.enabled && can_draw && !steps.is_empty() {
            let ctx = IllustrationContext {
                generator: self.images.as_deref(),
                limiters: &self.limiters,
                config: illustration,
                progress: self.progress.as_ref(),
            };
            let failures = illustrate(&ctx, &mut steps, &mut costs).await;
            let drew_any = steps.iter().any(|s| s.illustration_url.is_some());
            if drew_any || !failures.is_empty() {
                let mut flags = if drew_any {
                    check_quality(&steps, &assembly.tools, page_count, thresholds).flags
                } else {
                    report.flags
                };
                flags.extend(failures);
                report = grade(flags, &steps, thresholds);
            }
        } else if illustration.enabled && !can_draw {
            warn!("Illustrations enabled but no image generator is configured; skipping");
        }

        // ── Final guide ──────────────────────────────────────────────────
        let complex = steps.iter().filter(|s| s.complexity.is_complex()).count();
        let difficulty = Difficulty::derive(steps.len(), complex);
        let estimated_minutes = estimate_minutes(steps.len(), complex);

        let secondary_model = match &self.secondary {
            Some(s) if records.iter().any(|r| r.escalated) => Some(s.model().to_string()),
            _ => None,
        };
        let mut illustration_models: Vec<String> = steps
            .iter()
            .filter_map(|s| s.illustration_model.clone())
            .collect();
        illustration_models.sort();
        illustration_models.dedup();

        let description = format!(
            "Step-by-step assembly guide for {}: {} steps, {} parts, {} tools ({} difficulty, about {} minutes).",
            title,
            steps.len(),
            assembly.parts.len(),
            assembly.tools.len(),
            difficulty.as_str(),
            estimated_minutes
        );

        let cost = costs.summary();
        let processing_time_ms = start.elapsed().as_millis() as u64;
        info!(
            "Guide for {}: {} steps, confidence {:.2}, {:?}, ${:.4} in {}ms",
            product_id,
            steps.len(),
            report.overall_confidence,
            report.publish_decision,
            cost.total_cost,
            processing_time_ms
        );
        self.progress
            .on_generation_complete(steps.len(), report.overall_confidence);

        Ok(GeneratedGuide {
            product_id: product_id.to_string(),
            title: title.to_string(),
            description,
            difficulty,
            estimated_minutes,
            tools: assembly.tools,
            parts: assembly.parts,
            steps,
            overall_confidence: report.overall_confidence,
            quality_flags: report.flags,
            passes_quality_gate: report.passes_gate,
            publish_decision: report.publish_decision,
            metadata: GenerationMetadata {
                primary_model: self.primary.model().to_string(),
                secondary_model,
                refinement_model: refined_ran.then(|| self.refiner.model().to_string()),
                illustration_models,
                pdf_page_count: page_count,
                processing_time_ms,
                source_url: pdf_url.to_string(),
                generated_at: Utc::now(),
                pages: records,
                cost,
            },
        })
    }
}
