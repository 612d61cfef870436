//! CLI binary for guidegen.
//!
//! A thin shim over the library crate: maps flags onto `GuideConfig`, runs a
//! single job through the in-memory queue and prints the guide.

use anyhow::{bail, Context, Result};
use clap::Parser;
use guidegen::{
    GeneratedGuide, GuideConfig, GuidePipeline, GuideProgressCallback, InMemoryCatalog,
    InMemoryJobStore, JobPriority, JobQueue, JobStatus, Orchestrator, PageSource, PdfiumRenderer,
    Product, ProgressCallback, ProviderSpec, PublishDecision, RateLimiterRegistry, Severity,
    TriggerSource,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers ──────────────────────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Live progress bar over Pass 1, then a spinner for refinement and
/// illustration.
struct CliProgressCallback {
    bar: ProgressBar,
    escalations: AtomicUsize,
    failures: AtomicUsize,
    illustrating: AtomicBool,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(TICKS),
        );
        bar.set_prefix("Preparing");
        bar.set_message("Rendering PDF…");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self {
            bar,
            escalations: AtomicUsize::new(0),
            failures: AtomicUsize::new(0),
            illustrating: AtomicBool::new(false),
        })
    }

    fn bar_style(unit: &str) -> ProgressStyle {
        ProgressStyle::with_template(&format!(
            "{{spinner:.cyan}} {{prefix:.bold}}  [{{bar:42.green/238}}] {{pos:>3}}/{{len}} {unit}  ⏱ {{elapsed_precise}}"
        ))
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS)
    }
}

impl GuideProgressCallback for CliProgressCallback {
    fn on_generation_start(&self, total_pages: usize) {
        self.bar.set_length(total_pages as u64);
        self.bar.set_style(Self::bar_style("pages"));
        self.bar.set_prefix("Extracting");
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Reading {total_pages} pages…"))
        ));
    }

    fn on_page_start(&self, page_num: usize, _total: usize) {
        self.bar.set_message(format!("page {page_num}"));
    }

    fn on_page_complete(&self, page_num: usize, total: usize, step_count: usize, escalated: bool) {
        if escalated {
            self.escalations.fetch_add(1, Ordering::SeqCst);
        }
        self.bar.println(format!(
            "  {} Page {:>3}/{:<3}  {}{}",
            green("✓"),
            page_num,
            total,
            dim(&format!("{step_count:>2} steps")),
            if escalated { yellow("  escalated") } else { String::new() },
        ));
        self.bar.inc(1);
    }

    fn on_page_error(&self, page_num: usize, total: usize, error: &str) {
        self.failures.fetch_add(1, Ordering::SeqCst);
        let msg: String = if error.chars().count() > 80 {
            error.chars().take(79).chain(['…']).collect()
        } else {
            error.to_string()
        };
        self.bar.println(format!(
            "  {} Page {:>3}/{:<3}  {}",
            red("✗"),
            page_num,
            total,
            red(&msg)
        ));
        self.bar.inc(1);
    }

    fn on_refinement_start(&self, step_count: usize) {
        self.bar.set_prefix("Refining");
        self.bar.set_message(format!("{step_count} steps"));
    }

    fn on_refinement_complete(&self, steps_before: usize, steps_after: usize) {
        self.bar.println(format!(
            "{} Refinement: {} → {} steps",
            cyan("◆"),
            steps_before,
            steps_after
        ));
    }

    fn on_illustration_start(&self, step_number: u32, total_steps: usize) {
        if !self.illustrating.swap(true, Ordering::SeqCst) {
            self.bar.set_length(total_steps as u64);
            self.bar.set_position(0);
            self.bar.set_style(Self::bar_style("steps"));
            self.bar.set_prefix("Illustrating");
        }
        self.bar.set_message(format!("step {step_number}"));
    }

    fn on_illustration_complete(&self, step_number: u32, _total: usize, error: Option<&str>) {
        if let Some(e) = error {
            self.bar
                .println(format!("  {} Step {:>3}  {}", red("✗"), step_number, red(e)));
        }
        self.bar.inc(1);
    }

    fn on_generation_complete(&self, step_count: usize, overall_confidence: f64) {
        self.bar.finish_and_clear();
        eprintln!(
            "{} {} steps, confidence {:.2}  ({} pages escalated, {} pages failed)",
            green("✔"),
            bold(&step_count.to_string()),
            overall_confidence,
            self.escalations.load(Ordering::SeqCst),
            self.failures.load(Ordering::SeqCst),
        );
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Generate a guide from a local scan
  guidegen manual.pdf

  # From the product's CDN URL, as JSON
  guidegen https://cdn.example.com/assembly/billy.pdf --product-id sku-1042 --json

  # Cheap Gemini first pass, Claude for hard pages
  guidegen manual.pdf --primary gemini --secondary anthropic

  # Build illustration prompts without paying for images
  guidegen manual.pdf --dry-run-illustrations

  # Page count only (no API key needed)
  guidegen --inspect-only manual.pdf

ENVIRONMENT VARIABLES:
  GEMINI_API_KEY                      Google Gemini API key
  ANTHROPIC_API_KEY                   Anthropic API key
  OPENAI_API_KEY                      OpenAI key (also used for illustrations)
  GUIDEGEN_PRIMARY_PROVIDER / _MODEL  Cheap tier (default gemini / gemini-2.5-flash)
  GUIDEGEN_SECONDARY_PROVIDER / _MODEL  Expensive tier used for escalation
  GUIDEGEN_REFINEMENT_MODEL           Model for the continuity pass
  GUIDEGEN_ILLUSTRATION_MODEL_COMPLEX High-fidelity image model
  GUIDEGEN_ILLUSTRATION_MODEL_SIMPLE  Low-cost image model
  PDFIUM_LIB_PATH                     Path to libpdfium (file or directory)
"#;

/// Generate assembly guides from furniture instruction PDFs.
#[derive(Parser, Debug)]
#[command(
    name = "guidegen",
    version,
    about = "Generate step-by-step assembly guides from instruction PDFs using vision LLMs",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Local PDF file path or HTTP/HTTPS URL.
    input: String,

    /// Product id recorded on the guide. Defaults to the file stem.
    #[arg(long, env = "GUIDEGEN_PRODUCT_ID")]
    product_id: Option<String>,

    /// Product title used in the guide description.
    #[arg(long, env = "GUIDEGEN_TITLE")]
    title: Option<String>,

    /// Cheap-tier provider: gemini, anthropic, openai, or any edgequake-llm provider.
    #[arg(long)]
    primary: Option<String>,

    /// Cheap-tier model id.
    #[arg(long)]
    primary_model: Option<String>,

    /// Expensive-tier provider used for escalation.
    #[arg(long)]
    secondary: Option<String>,

    /// Expensive-tier model id.
    #[arg(long)]
    secondary_model: Option<String>,

    /// Rendering DPI (72–400).
    #[arg(long, env = "GUIDEGEN_DPI", default_value_t = 150,
          value_parser = clap::value_parser!(u32).range(72..=400))]
    dpi: u32,

    /// Prepare illustration prompts without calling the image model.
    #[arg(long, env = "GUIDEGEN_DRY_RUN_ILLUSTRATIONS", conflicts_with = "no_illustrations")]
    dry_run_illustrations: bool,

    /// Skip the illustration stage.
    #[arg(long, env = "GUIDEGEN_NO_ILLUSTRATIONS")]
    no_illustrations: bool,

    /// Print the full guide as JSON.
    #[arg(long)]
    json: bool,

    /// Print the page count only, no generation.
    #[arg(long)]
    inspect_only: bool,

    /// Disable progress bar.
    #[arg(long, env = "GUIDEGEN_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "GUIDEGEN_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "GUIDEGEN_QUIET")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO logs unless --verbose is given.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let config = build_config(&cli)?;

    // ── Inspect-only mode ────────────────────────────────────────────────
    if cli.inspect_only {
        let pages = PdfiumRenderer::from_config(&config)
            .count_pages(&cli.input)
            .await
            .context("Failed to inspect PDF")?;
        if cli.json {
            println!("{}", serde_json::json!({ "source": cli.input, "pages": pages }));
        } else {
            println!("File:   {}", cli.input);
            println!("Pages:  {}", pages);
        }
        return Ok(());
    }

    // ── Pipeline + single-job queue ──────────────────────────────────────
    let product_id = cli
        .product_id
        .clone()
        .unwrap_or_else(|| file_stem(&cli.input));
    let title = cli.title.clone().unwrap_or_else(|| product_id.clone());

    let limiters = Arc::new(RateLimiterRegistry::new(config.rate_limit));
    let mut pipeline =
        GuidePipeline::from_config(config, limiters).context("Failed to configure providers")?;
    if show_progress {
        let cb: ProgressCallback = CliProgressCallback::new();
        pipeline = pipeline.with_progress(cb);
    }

    let catalog = Arc::new(InMemoryCatalog::new());
    catalog
        .add(Product::new(&product_id, &title).with_assembly_pdf(&cli.input))
        .await;
    let queue = Arc::new(JobQueue::new(Arc::new(InMemoryJobStore::new()), catalog));
    let job_id = queue
        .enqueue(&product_id, JobPriority::Normal, TriggerSource::Manual)
        .await?;

    let orchestrator = Orchestrator::new(Arc::clone(&queue), Arc::new(pipeline));
    let job = orchestrator.run_job(job_id).await?;

    if job.status == JobStatus::Failed {
        bail!(
            "Guide generation failed: {}",
            job.error_message.as_deref().unwrap_or("unknown error")
        );
    }
    let guide = job
        .raw_output
        .context("Job finished without a guide")?;

    if cli.json {
        let json = serde_json::to_string_pretty(&guide).context("Failed to serialise guide")?;
        println!("{json}");
    } else {
        print_guide(&guide);
    }
    Ok(())
}

/// Map CLI flags onto the environment-derived configuration.
fn build_config(cli: &Cli) -> Result<GuideConfig> {
    let mut config = GuideConfig::from_env().context("Invalid configuration")?;
    config.dpi = cli.dpi;

    if cli.primary.is_some() || cli.primary_model.is_some() {
        let name = cli.primary.clone().unwrap_or(config.primary.name.clone());
        let model = cli
            .primary_model
            .clone()
            .unwrap_or_else(|| guidegen::config::default_model_for(&name).to_string());
        config.primary = ProviderSpec::new(name, model);
    }
    if let Some(name) = &cli.secondary {
        let model = cli
            .secondary_model
            .clone()
            .unwrap_or_else(|| guidegen::config::default_model_for(name).to_string());
        config.secondary = Some(ProviderSpec::new(name.clone(), model));
    } else if cli.secondary_model.is_some() {
        bail!("--secondary-model requires --secondary");
    }

    if cli.no_illustrations {
        config.illustration.enabled = false;
    }
    if cli.dry_run_illustrations {
        config.illustration.enabled = true;
        config.illustration.dry_run = true;
    }
    Ok(config)
}

fn file_stem(input: &str) -> String {
    let last = input.rsplit('/').next().unwrap_or(input);
    Path::new(last)
        .file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .unwrap_or("product")
        .to_string()
}

fn print_guide(guide: &GeneratedGuide) {
    println!("{}", bold(&guide.title));
    println!("{}\n", guide.description);
    if !guide.tools.is_empty() {
        println!("{} {}", bold("Tools:"), guide.tools.join(", "));
    }
    if !guide.parts.is_empty() {
        let parts: Vec<String> = guide
            .parts
            .iter()
            .map(|p| format!("{} ×{}", p.name, p.quantity))
            .collect();
        println!("{} {}", bold("Parts:"), parts.join(", "));
    }
    println!();

    for step in &guide.steps {
        println!(
            "{} {}  {}",
            cyan(&format!("{:>2}.", step.step_number)),
            bold(&step.title),
            dim(&format!("({:.2})", step.confidence))
        );
        println!("    {}", step.instruction);
        for c in &step.callouts {
            println!("    {} {}", yellow("!"), c.text);
        }
    }

    println!();
    for flag in &guide.quality_flags {
        let tag = match flag.severity {
            Severity::Error => red("error"),
            Severity::Warning => yellow("warn "),
            Severity::Info => dim("info "),
        };
        println!("  {} {:<24} {}", tag, flag.code, flag.message);
    }
    let decision = match guide.publish_decision {
        PublishDecision::AutoPublish => green("auto-publish"),
        PublishDecision::Review => yellow("review"),
        PublishDecision::Hold => red("hold"),
    };
    eprintln!(
        "{}  confidence {:.2}  ${:.4}  {}ms",
        decision,
        guide.overall_confidence,
        guide.metadata.cost.total_cost,
        guide.metadata.processing_time_ms
    );
}
