//! Configuration for a guide-generation run.
//!
//! All pipeline behaviour is controlled through [`GuideConfig`], built via
//! [`GuideConfigBuilder`] or read from the environment with
//! [`GuideConfig::from_env`]. The empirically tuned heuristics (escalation
//! triggers, quality-gate thresholds, illustration complexity) live here as
//! named values instead of literals scattered through the stages.

use crate::error::GuideError;
use crate::rate_limit::RateLimit;
use std::fmt;

/// Which backend to call and with which model.
#[derive(Clone, PartialEq)]
pub struct ProviderSpec {
    /// `gemini`, `anthropic`, `openai`, or any provider name understood by
    /// `edgequake-llm` (`ollama`, `mistral`, `azure`, …).
    pub name: String,
    pub model: String,
    /// Falls back to the provider's conventional env var when `None`.
    pub api_key: Option<String>,
}

impl ProviderSpec {
    pub fn new(name: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            model: model.into(),
            api_key: None,
        }
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }
}

impl fmt::Debug for ProviderSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderSpec")
            .field("name", &self.name)
            .field("model", &self.model)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// When Pass 1 re-runs a page on the expensive tier.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EscalationThresholds {
    /// Page-level arrow count at or above which the page escalates.
    pub arrow_count: u32,
    /// Any step confidence strictly below this escalates.
    pub min_confidence: f64,
}

impl Default for EscalationThresholds {
    fn default() -> Self {
        Self {
            arrow_count: 5,
            min_confidence: 0.7,
        }
    }
}

/// Quality-gate and publish-decision thresholds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QualityThresholds {
    /// Step confidence below this is a warning.
    pub warn_confidence: f64,
    /// Step confidence below this is an error.
    pub error_confidence: f64,
    /// Minimum overall confidence to pass the gate.
    pub gate_confidence: f64,
    /// Below this the publish decision is `hold`.
    pub hold_confidence: f64,
    /// At or above this (with no errors) a guide may auto-publish.
    pub auto_publish_confidence: f64,
    pub max_auto_publish_warnings: usize,
    /// Share of low-confidence steps that raises a warning.
    pub low_confidence_ratio_warn: f64,
    /// Share of low-confidence steps that raises an error.
    pub low_confidence_ratio_error: f64,
    /// Instructions shorter than this many characters are flagged.
    pub min_instruction_chars: usize,
    /// Guides with more steps than this get the single-use-part check.
    pub large_guide_steps: usize,
}

impl Default for QualityThresholds {
    fn default() -> Self {
        Self {
            warn_confidence: 0.7,
            error_confidence: 0.5,
            gate_confidence: 0.6,
            hold_confidence: 0.7,
            auto_publish_confidence: 0.9,
            max_auto_publish_warnings: 2,
            low_confidence_ratio_warn: 0.15,
            low_confidence_ratio_error: 0.30,
            min_instruction_chars: 20,
            large_guide_steps: 10,
        }
    }
}

/// Illustration routing and behaviour.
#[derive(Debug, Clone, PartialEq)]
pub struct IllustrationConfig {
    /// Skip the illustration stage entirely when `false`.
    pub enabled: bool,
    /// Build prompts but never call the image model.
    pub dry_run: bool,
    /// Complexity score at or above which a step is drawn as complex.
    pub complex_threshold: u32,
    pub complex_model: String,
    pub simple_model: String,
}

impl Default for IllustrationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dry_run: false,
            complex_threshold: 5,
            complex_model: "gpt-image-1".to_string(),
            simple_model: "gpt-image-1-mini".to_string(),
        }
    }
}

/// Configuration for one guide-generation pipeline.
///
/// # Example
/// ```rust
/// use guidegen::{GuideConfig, ProviderSpec};
///
/// let config = GuideConfig::builder()
///     .primary(ProviderSpec::new("gemini", "gemini-2.5-flash"))
///     .secondary(ProviderSpec::new("anthropic", "claude-sonnet-4-20250514"))
///     .dpi(150)
///     .build()
///     .unwrap();
/// assert!(config.secondary.is_some());
/// ```
#[derive(Clone)]
pub struct GuideConfig {
    /// Rendering DPI for each PDF page. Range: 72–400. Default: 150.
    ///
    /// Assembly diagrams are line art: 150 DPI keeps part numbers and small
    /// arrow labels legible while a page stays well under provider upload caps.
    pub dpi: u32,

    /// Cap on either rendered dimension in pixels. Default: 2000.
    pub max_rendered_pixels: u32,

    /// Cheap tier: every page goes here first.
    pub primary: ProviderSpec,

    /// Expensive tier used for escalation. `None` disables escalation.
    pub secondary: Option<ProviderSpec>,

    /// Model for the Pass-2 text call on the primary provider.
    /// `None` reuses `primary.model`.
    pub refinement_model: Option<String>,

    /// Max output tokens for a Pass-1 page call. Default: 4096.
    pub max_tokens_extraction: usize,

    /// Max output tokens for the single Pass-2 call. Default: 16384.
    ///
    /// The refinement call rewrites every step of the document at once, so it
    /// needs far more room than a single page.
    pub max_tokens_refinement: usize,

    /// Per-model-call timeout in seconds. Default: 120.
    pub api_timeout_secs: u64,

    /// Download timeout for URL inputs in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// Default quota applied to every provider's limiter.
    pub rate_limit: RateLimit,

    pub escalation: EscalationThresholds,
    pub quality: QualityThresholds,
    pub illustration: IllustrationConfig,
}

impl Default for GuideConfig {
    fn default() -> Self {
        Self {
            dpi: 150,
            max_rendered_pixels: 2000,
            primary: ProviderSpec::new("gemini", "gemini-2.5-flash"),
            secondary: None,
            refinement_model: None,
            max_tokens_extraction: 4096,
            max_tokens_refinement: 16384,
            api_timeout_secs: 120,
            download_timeout_secs: 120,
            rate_limit: RateLimit::default(),
            escalation: EscalationThresholds::default(),
            quality: QualityThresholds::default(),
            illustration: IllustrationConfig::default(),
        }
    }
}

impl fmt::Debug for GuideConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GuideConfig")
            .field("dpi", &self.dpi)
            .field("max_rendered_pixels", &self.max_rendered_pixels)
            .field("primary", &self.primary)
            .field("secondary", &self.secondary)
            .field("refinement_model", &self.refinement_model)
            .field("max_tokens_extraction", &self.max_tokens_extraction)
            .field("max_tokens_refinement", &self.max_tokens_refinement)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field("rate_limit", &self.rate_limit)
            .field("escalation", &self.escalation)
            .field("illustration", &self.illustration)
            .finish()
    }
}

impl GuideConfig {
    pub fn builder() -> GuideConfigBuilder {
        GuideConfigBuilder {
            config: Self::default(),
        }
    }

    /// The model Pass 2 will call.
    pub fn refinement_model(&self) -> &str {
        self.refinement_model
            .as_deref()
            .unwrap_or(&self.primary.model)
    }

    /// Read configuration from `GUIDEGEN_*` variables and provider API keys.
    pub fn from_env() -> Result<Self, GuideError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// [`GuideConfig::from_env`] over an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, GuideError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();
        let mut builder = Self::builder();

        let primary_name = get("GUIDEGEN_PRIMARY_PROVIDER").unwrap_or(defaults.primary.name);
        let primary_model = get("GUIDEGEN_PRIMARY_MODEL")
            .unwrap_or_else(|| default_model_for(&primary_name).to_string());
        let mut primary = ProviderSpec::new(primary_name, primary_model);
        primary.api_key = api_key_env(&primary.name).and_then(|k| get(k));
        builder = builder.primary(primary);

        if let Some(name) = get("GUIDEGEN_SECONDARY_PROVIDER") {
            let model = get("GUIDEGEN_SECONDARY_MODEL")
                .unwrap_or_else(|| default_model_for(&name).to_string());
            let mut secondary = ProviderSpec::new(name, model);
            secondary.api_key = api_key_env(&secondary.name).and_then(|k| get(k));
            builder = builder.secondary(secondary);
        }

        if let Some(model) = get("GUIDEGEN_REFINEMENT_MODEL") {
            builder = builder.refinement_model(model);
        }
        if let Some(model) = get("GUIDEGEN_ILLUSTRATION_MODEL_COMPLEX") {
            builder = builder.complex_illustration_model(model);
        }
        if let Some(model) = get("GUIDEGEN_ILLUSTRATION_MODEL_SIMPLE") {
            builder = builder.simple_illustration_model(model);
        }
        if let Some(v) = get("GUIDEGEN_API_TIMEOUT") {
            let secs = v.trim().parse().map_err(|_| {
                GuideError::InvalidConfig(format!("GUIDEGEN_API_TIMEOUT must be seconds, got '{v}'"))
            })?;
            builder = builder.api_timeout_secs(secs);
        }
        if let Some(v) = get("GUIDEGEN_DOWNLOAD_TIMEOUT") {
            let secs = v.trim().parse().map_err(|_| {
                GuideError::InvalidConfig(format!(
                    "GUIDEGEN_DOWNLOAD_TIMEOUT must be seconds, got '{v}'"
                ))
            })?;
            builder = builder.download_timeout_secs(secs);
        }

        builder.build()
    }
}

/// Conventional API-key variable for a natively supported provider.
pub fn api_key_env(provider: &str) -> Option<&'static str> {
    match provider {
        "gemini" => Some("GEMINI_API_KEY"),
        "anthropic" => Some("ANTHROPIC_API_KEY"),
        "openai" => Some("OPENAI_API_KEY"),
        _ => None,
    }
}

/// Sensible default model when only a provider name is given.
pub fn default_model_for(provider: &str) -> &'static str {
    match provider {
        "gemini" => "gemini-2.5-flash",
        "anthropic" => "claude-sonnet-4-20250514",
        "openai" => "gpt-4.1-mini",
        _ => "llava",
    }
}

/// Builder for [`GuideConfig`].
#[derive(Debug)]
pub struct GuideConfigBuilder {
    config: GuideConfig,
}

impl GuideConfigBuilder {
    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.dpi = dpi.clamp(72, 400);
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn primary(mut self, spec: ProviderSpec) -> Self {
        self.config.primary = spec;
        self
    }

    pub fn secondary(mut self, spec: ProviderSpec) -> Self {
        self.config.secondary = Some(spec);
        self
    }

    pub fn no_secondary(mut self) -> Self {
        self.config.secondary = None;
        self
    }

    pub fn refinement_model(mut self, model: impl Into<String>) -> Self {
        self.config.refinement_model = Some(model.into());
        self
    }

    pub fn max_tokens_extraction(mut self, n: usize) -> Self {
        self.config.max_tokens_extraction = n;
        self
    }

    pub fn max_tokens_refinement(mut self, n: usize) -> Self {
        self.config.max_tokens_refinement = n;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn rate_limit(mut self, limit: RateLimit) -> Self {
        self.config.rate_limit = limit;
        self
    }

    pub fn escalation(mut self, thresholds: EscalationThresholds) -> Self {
        self.config.escalation = thresholds;
        self
    }

    pub fn quality(mut self, thresholds: QualityThresholds) -> Self {
        self.config.quality = thresholds;
        self
    }

    pub fn illustrations(mut self, enabled: bool) -> Self {
        self.config.illustration.enabled = enabled;
        self
    }

    pub fn illustration_dry_run(mut self, dry_run: bool) -> Self {
        self.config.illustration.dry_run = dry_run;
        self
    }

    pub fn complex_illustration_model(mut self, model: impl Into<String>) -> Self {
        self.config.illustration.complex_model = model.into();
        self
    }

    pub fn simple_illustration_model(mut self, model: impl Into<String>) -> Self {
        self.config.illustration.simple_model = model.into();
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<GuideConfig, GuideError> {
        let c = &self.config;
        if c.dpi < 72 || c.dpi > 400 {
            return Err(GuideError::InvalidConfig(format!(
                "DPI must be 72–400, got {}",
                c.dpi
            )));
        }
        if c.primary.name.trim().is_empty() || c.primary.model.trim().is_empty() {
            return Err(GuideError::InvalidConfig(
                "Primary provider and model must be set".into(),
            ));
        }
        if c.rate_limit.window_ms == 0 {
            return Err(GuideError::InvalidConfig(
                "Rate-limit window must be > 0 ms".into(),
            ));
        }
        let q = &c.quality;
        if !(q.error_confidence <= q.warn_confidence
            && q.hold_confidence <= q.auto_publish_confidence)
        {
            return Err(GuideError::InvalidConfig(
                "Quality thresholds must satisfy error ≤ warn and hold ≤ auto-publish".into(),
            ));
        }
        Ok(self.config)
    }
}
