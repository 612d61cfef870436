//! Pipeline stages for assembly-guide generation.
//!
//! Each submodule implements one transformation step so it can be tested on
//! its own. [`crate::generate::GuidePipeline`] wires them together.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ render ──▶ extract ──▶ assemble ──▶ refine ──▶ quality ──▶ illustrate
//! (URL/path) (pdfium)  (Pass 1)    (steps)     (Pass 2)   (flags)     (images)
//! ```
//!
//! 1. [`input`]    — canonicalise the path or URL to a local PDF
//! 2. [`render`]   — rasterise every page; runs in `spawn_blocking` because
//!    pdfium is not async-safe
//! 3. [`encode`]   — PNG bytes, base64 and data URIs for request bodies
//! 4. [`extract`]  — per-page vision extraction with cheap → expensive
//!    escalation; [`parse`] turns model text into typed records
//! 5. [`assemble`] — flatten pages into numbered steps plus part/tool summaries
//! 6. [`refine`]   — one whole-document continuity call that rewrites and
//!    merges steps
//! 7. [`quality`]  — deterministic checks and the publish decision
//! 8. [`illustrate`] — complexity routing and per-step image generation

pub mod assemble;
pub mod encode;
pub mod extract;
pub mod illustrate;
pub mod input;
pub mod parse;
pub mod quality;
pub mod refine;
pub mod render;
