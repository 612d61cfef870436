//! Input resolution: normalise a PDF source (URL or path) to a local file.
//!
//! pdfium opens files, not byte streams, so a URL is downloaded into a
//! `TempDir` that lives inside [`ResolvedInput`]. Dropping the value removes
//! the directory, on the error path as much as on the success path. The
//! `%PDF` magic is checked before returning so a mis-linked HTML error page
//! surfaces as [`GuideError::NotAPdf`] rather than a pdfium failure.

use crate::error::GuideError;
use std::io::Read;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, info};

/// A PDF ready for pdfium: either the caller's file or a scoped download.
pub enum ResolvedInput {
    Local(PathBuf),
    /// The `TempDir` is held so the file outlives rendering.
    Downloaded { path: PathBuf, _temp_dir: TempDir },
}

impl ResolvedInput {
    pub fn path(&self) -> &Path {
        match self {
            ResolvedInput::Local(p) => p,
            ResolvedInput::Downloaded { path, .. } => path,
        }
    }
}

pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Resolve a catalog `source_url` (or an operator-supplied local path).
pub async fn resolve_input(input: &str, timeout_secs: u64) -> Result<ResolvedInput, GuideError> {
    let input = input.trim();
    if input.is_empty() {
        return Err(GuideError::InvalidInput {
            input: input.to_string(),
        });
    }
    if is_url(input) {
        download_url(input, timeout_secs).await
    } else if input.contains("://") {
        Err(GuideError::InvalidInput {
            input: input.to_string(),
        })
    } else {
        resolve_local(input)
    }
}

fn resolve_local(path_str: &str) -> Result<ResolvedInput, GuideError> {
    let path = PathBuf::from(path_str);
    if !path.is_file() {
        return Err(GuideError::FileNotFound { path });
    }

    match std::fs::File::open(&path) {
        Ok(mut f) => {
            let mut magic = [0u8; 4];
            if f.read_exact(&mut magic).is_ok() && &magic != b"%PDF" {
                return Err(GuideError::NotAPdf { path, magic });
            }
        }
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            return Err(GuideError::PermissionDenied { path });
        }
        Err(_) => return Err(GuideError::FileNotFound { path }),
    }

    debug!("Resolved local PDF: {}", path.display());
    Ok(ResolvedInput::Local(path))
}

async fn download_url(url: &str, timeout_secs: u64) -> Result<ResolvedInput, GuideError> {
    info!("Downloading assembly PDF from {}", url);

    let failed = |reason: String| GuideError::DownloadFailed {
        url: url.to_string(),
        reason,
    };

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| failed(e.to_string()))?;

    let response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            GuideError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            failed(e.to_string())
        }
    })?;

    if !response.status().is_success() {
        return Err(failed(format!("HTTP {}", response.status())));
    }

    let bytes = response.bytes().await.map_err(|e| {
        if e.is_timeout() {
            GuideError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            failed(e.to_string())
        }
    })?;

    let temp_dir = TempDir::new().map_err(|e| GuideError::Internal(e.to_string()))?;
    let file_path = temp_dir.path().join(filename_from_url(url));

    if bytes.len() < 4 || &bytes[..4] != b"%PDF" {
        let mut magic = [0u8; 4];
        let n = bytes.len().min(4);
        magic[..n].copy_from_slice(&bytes[..n]);
        return Err(GuideError::NotAPdf {
            path: file_path,
            magic,
        });
    }

    tokio::fs::write(&file_path, &bytes)
        .await
        .map_err(|e| GuideError::Internal(format!("Failed to write temp file: {e}")))?;

    info!("Downloaded {} bytes to {}", bytes.len(), file_path.display());
    Ok(ResolvedInput::Downloaded {
        path: file_path,
        _temp_dir: temp_dir,
    })
}

/// Last path segment when it looks like a file name, else `assembly.pdf`.
fn filename_from_url(url: &str) -> String {
    reqwest::Url::parse(url)
        .ok()
        .and_then(|u| {
            u.path_segments()
                .and_then(|mut s| s.next_back().map(str::to_string))
        })
        .filter(|last| !last.is_empty() && last.contains('.'))
        .unwrap_or_else(|| "assembly.pdf".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_is_url() {
        assert!(is_url("https://cdn.example.com/manuals/billy.pdf"));
        assert!(is_url("http://example.com/doc.pdf"));
        assert!(!is_url("/tmp/doc.pdf"));
        assert!(!is_url(""));
    }

    #[test]
    fn filename_falls_back_for_extensionless_urls() {
        assert_eq!(filename_from_url("https://x.com/a/billy.pdf?v=2"), "billy.pdf");
        assert_eq!(filename_from_url("https://x.com/download/12345"), "assembly.pdf");
    }

    #[tokio::test]
    async fn local_paths_are_validated() {
        let dir = tempfile::tempdir().unwrap();

        let missing = dir.path().join("missing.pdf");
        let err = resolve_input(missing.to_str().unwrap(), 5).await.err().unwrap();
        assert!(matches!(err, GuideError::FileNotFound { .. }));

        let html = dir.path().join("page.pdf");
        std::fs::File::create(&html).unwrap().write_all(b"<html>").unwrap();
        let err = resolve_input(html.to_str().unwrap(), 5).await.err().unwrap();
        assert!(matches!(err, GuideError::NotAPdf { magic, .. } if &magic == b"<htm"));

        let pdf = dir.path().join("ok.pdf");
        std::fs::File::create(&pdf).unwrap().write_all(b"%PDF-1.7\n").unwrap();
        let ok = resolve_input(pdf.to_str().unwrap(), 5).await.unwrap();
        assert_eq!(ok.path(), pdf.as_path());
    }

    #[tokio::test]
    async fn unsupported_schemes_are_rejected() {
        let err = resolve_input("ftp://example.com/a.pdf", 5).await.err().unwrap();
        assert!(matches!(err, GuideError::InvalidInput { .. }));
    }
}
