//! Error types for the guidegen library.
//!
//! The pipeline distinguishes failures by how far they are allowed to travel:
//!
//! * [`GuideError`] — **Fatal** for a whole run: the PDF cannot be fetched or
//!   rendered, no provider is configured, nothing could be extracted. Returned
//!   as `Err(GuideError)` from [`crate::generate::GuidePipeline::generate`] and
//!   turned into a `failed` job by the orchestrator.
//!
//! * [`ProviderError`] — **Non-fatal**: a single model call failed. Pass 1
//!   answers it with escalation, Pass 2 with a no-op, illustration with a
//!   warning flag. It never aborts a document on its own.
//!
//! * [`ParseError`] — the tagged failure of turning free-form model output into
//!   structured JSON. Callers decide whether to escalate or degrade.
//!
//! * [`QueueError`] — rejections from the admin/queue contract (bad state
//!   transition, duplicate active job, product without a PDF).

use crate::job::JobStatus;
use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the guide pipeline.
#[derive(Debug, Error)]
pub enum GuideError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("PDF file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The input string is not a valid file path or URL.
    #[error("Invalid input '{input}': not a file path or a valid HTTP/HTTPS URL")]
    InvalidInput { input: String },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}\nCheck the assembly source_url of the product.")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'")]
    DownloadTimeout { url: String, secs: u64 },

    /// The file exists and was read, but is not a PDF.
    #[error("File is not a valid PDF: '{path}'\nFirst bytes: {magic:?}")]
    NotAPdf { path: PathBuf, magic: [u8; 4] },

    // ── PDF errors ────────────────────────────────────────────────────────
    /// PDF header/trailer/xref is corrupt and cannot be parsed.
    #[error("PDF '{path}' is corrupt: {detail}")]
    CorruptPdf { path: PathBuf, detail: String },

    /// Requested page is past the end of the document.
    #[error("Page {page} is out of range (document has {total} pages)")]
    PageOutOfRange { page: usize, total: usize },

    /// pdfium returned an error while rendering a specific page.
    #[error("Rasterisation failed for page {page}: {detail}")]
    RasterisationFailed { page: usize, detail: String },

    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\
Set PDFIUM_LIB_PATH=/path/to/libpdfium or install libpdfium system-wide."
    )]
    PdfiumBindingFailed(String),

    // ── Provider errors ───────────────────────────────────────────────────
    /// The configured provider cannot be constructed (missing API key etc.).
    #[error("Model provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    /// Every page came back empty, so there is nothing to assemble.
    #[error("No pages could be extracted from '{source_url}' ({total} pages attempted)")]
    NoPagesExtracted { source_url: String, total: usize },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A failed call to a vision, text or image model.
///
/// Carried back to the calling stage, which decides whether to escalate,
/// degrade, or record a quality flag. Never retried on the same tier.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    /// The provider answered with a non-success HTTP status.
    #[error("{provider} returned HTTP {status}: {body}")]
    Http {
        provider: String,
        status: u16,
        body: String,
    },

    /// The request never produced an HTTP response (DNS, TLS, timeout, …).
    #[error("{provider} request failed: {detail}")]
    Transport { provider: String, detail: String },

    /// The call succeeded but the response contained no usable text or image.
    #[error("{provider} ({model}) returned no usable content")]
    EmptyContent { provider: String, model: String },

    /// The page image could not be prepared for upload.
    #[error("Image encoding failed: {0}")]
    Encode(String),
}

impl ProviderError {
    /// `true` for 401/403 — the key is wrong and the other tier may still work.
    pub fn is_auth(&self) -> bool {
        matches!(self, ProviderError::Http { status, .. } if *status == 401 || *status == 403)
    }
}

/// Why a model response could not be read as structured output.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// No `{ … }` or `[ … ]` span was found in the response text.
    #[error("response contains no JSON object")]
    NoJsonObject,

    /// A span was found but did not deserialise into the expected shape.
    #[error("response JSON is invalid: {0}")]
    InvalidJson(String),
}

/// Rejections from the job queue contract.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    #[error("Job {0} not found")]
    JobNotFound(String),

    #[error("Product {0} not found")]
    ProductNotFound(String),

    /// The product has no assembly document with a `source_url`.
    #[error("Product {0} has no assembly PDF")]
    NoAssemblyPdf(String),

    /// Another job for the same product is queued, processing or in review.
    #[error("Product {product_id} already has an active job ({job_id})")]
    ActiveJobExists { product_id: String, job_id: String },

    #[error("Invalid status transition {from} → {to}")]
    InvalidTransition { from: JobStatus, to: JobStatus },

    /// The backing job store or catalog failed.
    #[error("Storage error: {0}")]
    Storage(String),
}
