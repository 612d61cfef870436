//! PDF rasterisation: source URL → PNG page images via pdfium.
//!
//! pdfium is a C++ library with thread-local state, so every document
//! operation runs inside `spawn_blocking`. The resolved input (and with it any
//! temp download) is held across the blocking call and dropped afterwards,
//! whatever the outcome.
//!
//! Pages are scaled to the requested DPI and then capped at
//! `max_rendered_pixels` on the longest edge: a poster-sized sheet at 150 DPI
//! would otherwise produce an image no vision model accepts.

use crate::config::GuideConfig;
use crate::error::GuideError;
use crate::pipeline::encode::{encode_png, PNG_MIME};
use crate::pipeline::input::resolve_input;
use async_trait::async_trait;
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info};

pub const DEFAULT_DPI: u32 = 150;

/// One rasterised page.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedPage {
    /// 1-indexed.
    pub page_number: usize,
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub mime_type: String,
}

/// Where Pass 1 gets its page images from.
#[async_trait]
pub trait PageSource: Send + Sync {
    async fn render_all_pages(&self, source: &str, dpi: u32) -> Result<Vec<RenderedPage>, GuideError>;

    /// `page_number` is 1-indexed; past the end is [`GuideError::PageOutOfRange`].
    async fn render_page(&self, source: &str, page_number: usize, dpi: u32)
        -> Result<RenderedPage, GuideError>;

    /// Page count without rasterising anything.
    async fn count_pages(&self, source: &str) -> Result<usize, GuideError>;
}

/// [`PageSource`] backed by pdfium.
///
/// Binds to `library_path`, then `PDFIUM_LIB_PATH`, then the system library.
#[derive(Debug, Clone)]
pub struct PdfiumRenderer {
    max_rendered_pixels: u32,
    download_timeout_secs: u64,
    library_path: Option<PathBuf>,
}

impl PdfiumRenderer {
    pub fn new(max_rendered_pixels: u32, download_timeout_secs: u64) -> Self {
        Self {
            max_rendered_pixels,
            download_timeout_secs,
            library_path: None,
        }
    }

    pub fn from_config(config: &GuideConfig) -> Self {
        Self::new(config.max_rendered_pixels, config.download_timeout_secs)
    }

    /// A pdfium shared library, or a directory containing one.
    pub fn with_library_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.library_path = Some(path.into());
        self
    }

    async fn run_blocking<T, F>(&self, source: &str, job: F) -> Result<T, GuideError>
    where
        T: Send + 'static,
        F: FnOnce(&Pdfium, &Path) -> Result<T, GuideError> + Send + 'static,
    {
        let resolved = resolve_input(source, self.download_timeout_secs).await?;
        let path = resolved.path().to_path_buf();
        let library = self.library_path.clone();

        let result = tokio::task::spawn_blocking(move || {
            let pdfium = bind_pdfium(library.as_deref())?;
            job(&pdfium, &path)
        })
        .await
        .map_err(|e| GuideError::Internal(format!("Render task panicked: {e}")))?;

        drop(resolved);
        result
    }
}

#[async_trait]
impl PageSource for PdfiumRenderer {
    async fn render_all_pages(&self, source: &str, dpi: u32) -> Result<Vec<RenderedPage>, GuideError> {
        let start = Instant::now();
        let max_px = self.max_rendered_pixels;
        let pages = self
            .run_blocking(source, move |pdfium, path| {
                let document = open(pdfium, path)?;
                let total = document.pages().len() as usize;
                (1..=total)
                    .map(|n| render_one(&document, n, dpi, max_px))
                    .collect::<Result<Vec<_>, _>>()
            })
            .await?;
        info!(
            "Rendered {} pages in {}ms",
            pages.len(),
            start.elapsed().as_millis()
        );
        Ok(pages)
    }

    async fn render_page(
        &self,
        source: &str,
        page_number: usize,
        dpi: u32,
    ) -> Result<RenderedPage, GuideError> {
        let max_px = self.max_rendered_pixels;
        self.run_blocking(source, move |pdfium, path| {
            let document = open(pdfium, path)?;
            render_one(&document, page_number, dpi, max_px)
        })
        .await
    }

    async fn count_pages(&self, source: &str) -> Result<usize, GuideError> {
        self.run_blocking(source, |pdfium, path| {
            Ok(open(pdfium, path)?.pages().len() as usize)
        })
        .await
    }
}

fn bind_pdfium(library_path: Option<&Path>) -> Result<Pdfium, GuideError> {
    let explicit = library_path
        .map(Path::to_path_buf)
        .or_else(|| std::env::var_os("PDFIUM_LIB_PATH").map(PathBuf::from));

    let bindings = match explicit {
        Some(p) => {
            let lib = if p.is_dir() {
                Pdfium::pdfium_platform_library_name_at_path(&p)
            } else {
                p
            };
            debug!("Binding pdfium from {}", lib.display());
            Pdfium::bind_to_library(&lib)
        }
        None => Pdfium::bind_to_system_library(),
    }
    .map_err(|e| GuideError::PdfiumBindingFailed(format!("{e:?}")))?;

    Ok(Pdfium::new(bindings))
}

fn open<'a>(pdfium: &'a Pdfium, path: &Path) -> Result<PdfDocument<'a>, GuideError> {
    pdfium
        .load_pdf_from_file(path, None)
        .map_err(|e| GuideError::CorruptPdf {
            path: path.to_path_buf(),
            detail: format!("{e:?}"),
        })
}

fn render_one(
    document: &PdfDocument<'_>,
    page_number: usize,
    dpi: u32,
    max_px: u32,
) -> Result<RenderedPage, GuideError> {
    let pages = document.pages();
    let total = pages.len() as usize;
    if page_number == 0 || page_number > total {
        return Err(GuideError::PageOutOfRange {
            page: page_number,
            total,
        });
    }

    let failed = |detail: String| GuideError::RasterisationFailed {
        page: page_number,
        detail,
    };

    let page = pages
        .get((page_number - 1) as u16)
        .map_err(|e| failed(format!("{e:?}")))?;

    let render_config = PdfRenderConfig::new()
        .scale_page_by_factor(dpi as f32 / 72.0)
        .set_maximum_width(max_px as i32)
        .set_maximum_height(max_px as i32);

    let image = page
        .render_with_config(&render_config)
        .map_err(|e| failed(format!("{e:?}")))?
        .as_image();

    let bytes = encode_png(&image).map_err(|e| failed(e.to_string()))?;
    debug!(
        "Rendered page {} → {}x{} px ({} bytes)",
        page_number,
        image.width(),
        image.height(),
        bytes.len()
    );

    Ok(RenderedPage {
        page_number,
        width: image.width(),
        height: image.height(),
        bytes,
        mime_type: PNG_MIME.to_string(),
    })
}
