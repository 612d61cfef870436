//! Scripted stand-ins for pdfium and the model backends.
//!
//! Rendered pages carry `page-N` as their image bytes so the fake vision model
//! can tell which page it is looking at.

#![allow(dead_code)]

use async_trait::async_trait;
use guidegen::{
    GeneratedImage, GuideConfig, GuideError, ImageGenerator, PageSource, ProviderError,
    ProviderSpec, RateLimit, RateLimiterRegistry, RenderedPage, VisionProvider, VisionResponse,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub const CHEAP_MODEL: &str = "gemini-2.5-flash";
pub const EXPENSIVE_MODEL: &str = "claude-sonnet-4-20250514";

// ── PDF ──────────────────────────────────────────────────────────────────────

pub struct FakePdf {
    pub pages: usize,
}

impl FakePdf {
    fn page(n: usize) -> RenderedPage {
        RenderedPage {
            page_number: n,
            bytes: format!("page-{n}").into_bytes(),
            width: 1275,
            height: 1650,
            mime_type: "image/png".to_string(),
        }
    }
}

#[async_trait]
impl PageSource for FakePdf {
    async fn render_all_pages(&self, _source: &str, _dpi: u32) -> Result<Vec<RenderedPage>, GuideError> {
        Ok((1..=self.pages).map(Self::page).collect())
    }

    async fn render_page(
        &self,
        _source: &str,
        page_number: usize,
        _dpi: u32,
    ) -> Result<RenderedPage, GuideError> {
        if page_number == 0 || page_number > self.pages {
            return Err(GuideError::PageOutOfRange {
                page: page_number,
                total: self.pages,
            });
        }
        Ok(Self::page(page_number))
    }

    async fn count_pages(&self, _source: &str) -> Result<usize, GuideError> {
        Ok(self.pages)
    }
}

/// A PDF that cannot be fetched.
pub struct UnreachablePdf;

#[async_trait]
impl PageSource for UnreachablePdf {
    async fn render_all_pages(&self, source: &str, _dpi: u32) -> Result<Vec<RenderedPage>, GuideError> {
        Err(GuideError::DownloadFailed {
            url: source.to_string(),
            reason: "HTTP 404".to_string(),
        })
    }

    async fn render_page(&self, source: &str, _page: usize, dpi: u32) -> Result<RenderedPage, GuideError> {
        self.render_all_pages(source, dpi).await.map(|mut p| p.remove(0))
    }

    async fn count_pages(&self, source: &str) -> Result<usize, GuideError> {
        self.render_all_pages(source, 72).await.map(|p| p.len())
    }
}

// ── Vision model ─────────────────────────────────────────────────────────────

type PageScript = Box<dyn Fn(usize) -> Result<String, ProviderError> + Send + Sync>;

pub struct ScriptedVision {
    name: String,
    model: String,
    script: PageScript,
    refinement: Option<String>,
    pub analyzed: Mutex<Vec<usize>>,
    pub completions: AtomicUsize,
}

impl ScriptedVision {
    pub fn new(
        name: &str,
        model: &str,
        script: impl Fn(usize) -> Result<String, ProviderError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.to_string(),
            model: model.to_string(),
            script: Box::new(script),
            refinement: None,
            analyzed: Mutex::new(Vec::new()),
            completions: AtomicUsize::new(0),
        }
    }

    /// Text returned by every `complete` call. Without it `complete` fails.
    pub fn with_refinement(mut self, text: impl Into<String>) -> Self {
        self.refinement = Some(text.into());
        self
    }

    pub fn analyzed_pages(&self) -> Vec<usize> {
        self.analyzed.lock().unwrap().clone()
    }

    pub fn completion_count(&self) -> usize {
        self.completions.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VisionProvider for ScriptedVision {
    fn name(&self) -> &str {
        &self.name
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn analyze(
        &self,
        image: &[u8],
        _mime_type: &str,
        _prompt: &str,
        _max_tokens: usize,
    ) -> Result<VisionResponse, ProviderError> {
        let page: usize = std::str::from_utf8(image)
            .ok()
            .and_then(|s| s.strip_prefix("page-"))
            .and_then(|n| n.parse().ok())
            .unwrap_or(0);
        self.analyzed.lock().unwrap().push(page);
        let text = (self.script)(page)?;
        Ok(VisionResponse {
            text,
            model: self.model.clone(),
            input_tokens: 1_500,
            output_tokens: 600,
        })
    }

    async fn complete(&self, _prompt: &str, _max_tokens: usize) -> Result<VisionResponse, ProviderError> {
        self.completions.fetch_add(1, Ordering::SeqCst);
        match &self.refinement {
            Some(text) => Ok(VisionResponse {
                text: text.clone(),
                model: self.model.clone(),
                input_tokens: 20_000,
                output_tokens: 8_000,
            }),
            None => Err(ProviderError::Http {
                provider: self.name.clone(),
                status: 503,
                body: "overloaded".to_string(),
            }),
        }
    }
}

pub fn transport_error(provider: &str) -> ProviderError {
    ProviderError::Transport {
        provider: provider.to_string(),
        detail: "connection reset".to_string(),
    }
}

// ── Image model ──────────────────────────────────────────────────────────────

pub struct FakeImages {
    /// Steps whose prompt should fail.
    failing_steps: Vec<u32>,
    pub calls: Mutex<Vec<String>>,
}

impl FakeImages {
    pub fn new(failing_steps: &[u32]) -> Self {
        Self {
            failing_steps: failing_steps.to_vec(),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl ImageGenerator for FakeImages {
    fn name(&self) -> &str {
        "fake-images"
    }

    async fn generate(&self, prompt: &str, model: &str) -> Result<GeneratedImage, ProviderError> {
        self.calls.lock().unwrap().push(model.to_string());
        if self
            .failing_steps
            .iter()
            .any(|n| prompt.contains(&format!("Step {n}:")))
        {
            return Err(ProviderError::Http {
                provider: "fake-images".to_string(),
                status: 400,
                body: "content policy".to_string(),
            });
        }
        Ok(GeneratedImage {
            url: format!("https://img.example/{}.png", self.call_count()),
            model: model.to_string(),
            input_tokens: 300,
            output_tokens: 4_000,
        })
    }
}

// ── Model output ─────────────────────────────────────────────────────────────

/// One clean, single-step page as a cheap model would describe it.
pub fn page_json(step: u32, arrow_count: u32, confidence: f64) -> String {
    serde_json::json!({
        "arrow_count": arrow_count,
        "has_hinge_or_rotation": false,
        "has_fastener_ambiguity": false,
        "is_parts_only": false,
        "steps": [{
            "step_number": step,
            "description": format!("Fix shelf bracket {step} to the frame with two cam locks."),
            "parts": [
                { "part_number": format!("B{step}"), "name": format!("shelf bracket {step}"), "quantity": 1 },
                { "part_number": "104", "name": "cam lock", "quantity": 2 }
            ],
            "tools": ["Allen key"],
            "actions": [{ "action_type": "attach", "subject": "bracket", "target": "frame" }],
            "spatial": { "orientation": "frame lying flat" },
            "arrows": [],
            "fasteners": [{ "fastener_type": "cam lock", "rotation": "clockwise" }],
            "annotations": [],
            "warnings": [],
            "complexity": "simple",
            "confidence": confidence
        }]
    })
    .to_string()
}

/// Cheap model that sees one clean step per page.
pub fn clean_pages(confidence: f64) -> impl Fn(usize) -> Result<String, ProviderError> + Send + Sync {
    move |page| Ok(format!("```json\n{}\n```", page_json(page as u32, 1, confidence)))
}

pub const NO_CHANGES: &str = r#"{"steps": []}"#;

// ── Wiring ───────────────────────────────────────────────────────────────────

pub fn limiters() -> Arc<RateLimiterRegistry> {
    Arc::new(RateLimiterRegistry::new(RateLimit {
        max_requests: 10_000,
        window_ms: 1_000,
    }))
}

pub fn config(illustrations: bool) -> GuideConfig {
    GuideConfig::builder()
        .primary(ProviderSpec::new("cheap", CHEAP_MODEL))
        .secondary(ProviderSpec::new("expensive", EXPENSIVE_MODEL))
        .illustrations(illustrations)
        .build()
        .unwrap()
}
