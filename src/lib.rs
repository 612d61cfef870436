//! # guidegen
//!
//! Turn scanned furniture assembly PDFs into structured, quality-scored,
//! illustrated step-by-step guides using vision language models.
//!
//! ## Why this crate?
//!
//! Assembly manuals are almost all pictures: numbered panels, arrows, part
//! callouts and fastener close-ups, with hardly any text. Text extraction gets
//! nothing useful out of them. Instead each page is rasterised and read by a
//! vision model, the per-page readings are stitched into one numbered
//! sequence, a second whole-document pass restores continuity, and a battery
//! of deterministic checks decides whether the result can be published.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF
//!  │
//!  ├─ 1. Input       resolve local file or download from URL
//!  ├─ 2. Render      rasterise pages via pdfium (spawn_blocking)
//!  ├─ 3. Pass 1      per-page vision extraction, cheap tier first,
//!  │                 escalating to the expensive tier on hard pages
//!  ├─ 4. Assemble    flatten into numbered steps, part and tool summaries
//!  ├─ 5. Pass 2      one continuity call: rewrite text, merge split steps
//!  ├─ 6. Quality     flags, overall confidence, publish decision
//!  └─ 7. Illustrate  complexity-routed image generation per step
//! ```
//!
//! Every model call goes through a per-provider token-bucket
//! [`RateLimiter`] and is priced into the run's [`CostTracker`].
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use guidegen::{GuideConfig, GuidePipeline, RateLimiterRegistry};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Providers from GUIDEGEN_PRIMARY_PROVIDER / GEMINI_API_KEY / …
//!     let config = GuideConfig::from_env()?;
//!     let limiters = Arc::new(RateLimiterRegistry::new(config.rate_limit));
//!     let pipeline = GuidePipeline::from_config(config, limiters)?;
//!     let guide = pipeline
//!         .generate("sku-1042", "BILLY bookcase", "manual.pdf")
//!         .await?;
//!     println!("{} steps, {:?}", guide.steps.len(), guide.publish_decision);
//!     Ok(())
//! }
//! ```
//!
//! ## Jobs
//!
//! [`JobQueue`] implements the admin contract (enqueue, batch enqueue,
//! validated transitions, cancel, requeue, stats, listing) over the
//! [`JobStore`] and [`Catalog`] traits, and [`Orchestrator`] drives a queued
//! job through the pipeline to `review` or `failed`.
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `guidegen` binary (clap + anyhow + indicatif + tracing-subscriber) |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod cost;
pub mod error;
pub mod generate;
pub mod job;
pub mod model;
pub mod orchestrator;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod provider;
pub mod rate_limit;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{
    EscalationThresholds, GuideConfig, GuideConfigBuilder, IllustrationConfig, ProviderSpec,
    QualityThresholds,
};
pub use cost::{cost, CostSummary, CostTracker};
pub use error::{GuideError, ParseError, ProviderError, QueueError};
pub use generate::GuidePipeline;
pub use job::{
    GuideStatus, InMemoryCatalog, InMemoryJobStore, Job, JobPriority, JobQueue, JobStatus,
    JobStore, Catalog, Product, TransitionMetadata, TriggerSource,
};
pub use model::{
    Callout, Complexity, Difficulty, GeneratedGuide, GeneratedStep, PageRecord, PartRef,
    PublishDecision, QualityFlag, RawPageExtraction, RawStepExtraction, ScrewDirection, Severity,
};
pub use orchestrator::Orchestrator;
pub use pipeline::render::{PageSource, PdfiumRenderer, RenderedPage};
pub use progress::{GuideProgressCallback, NoopProgressCallback, ProgressCallback};
pub use provider::{
    create_provider, GeneratedImage, ImageGenerator, OpenAiImageGenerator, VisionProvider,
    VisionResponse,
};
pub use rate_limit::{RateLimit, RateLimiter, RateLimiterRegistry};
