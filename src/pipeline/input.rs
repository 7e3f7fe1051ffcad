//! Input resolution: turn a user-supplied path or URL into document bytes.
//!
//! Ingestion works on bytes, so URLs are downloaded straight into memory.
//! We validate the ZIP magic bytes (`PK\x03\x04`) before returning so callers
//! get a meaningful "not a .docx" error instead of a ZIP parser message.

use crate::error::DocRefineError;
use futures::StreamExt;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Every .docx starts with a ZIP local-file header.
pub const ZIP_MAGIC: [u8; 4] = *b"PK\x03\x04";

/// Downloads larger than this are abandoned.
pub const MAX_DOWNLOAD_BYTES: usize = 64 * 1024 * 1024;

/// A document ready for ingestion.
#[derive(Clone, PartialEq, Eq)]
pub struct ResolvedInput {
    /// Original file name (last path or URL segment).
    pub file_name: String,
    pub bytes: Vec<u8>,
}

impl std::fmt::Debug for ResolvedInput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedInput")
            .field("file_name", &self.file_name)
            .field("bytes", &self.bytes.len())
            .finish()
    }
}

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Resolve the input string to document bytes.
///
/// If the input is a URL, download it. If the input is a local file,
/// validate it exists and is readable.
pub async fn resolve_input(input: &str, timeout_secs: u64) -> Result<ResolvedInput, DocRefineError> {
    if input.trim().is_empty() {
        return Err(DocRefineError::InvalidInput {
            input: input.to_string(),
        });
    }
    if is_url(input) {
        download_url(input, timeout_secs).await
    } else {
        resolve_local(Path::new(input)).await
    }
}

/// Read a local file, validating existence, permissions and magic bytes.
pub async fn resolve_local(path: &Path) -> Result<ResolvedInput, DocRefineError> {
    let bytes = tokio::fs::read(path).await.map_err(|e| match e.kind() {
        std::io::ErrorKind::PermissionDenied => DocRefineError::PermissionDenied {
            path: path.to_path_buf(),
        },
        _ => DocRefineError::FileNotFound {
            path: path.to_path_buf(),
        },
    })?;

    let file_name = file_name_of(path);
    check_magic(&file_name, &bytes)?;

    debug!("Resolved local document: {} ({} bytes)", path.display(), bytes.len());
    Ok(ResolvedInput { file_name, bytes })
}

/// Download a URL into memory.
async fn download_url(url: &str, timeout_secs: u64) -> Result<ResolvedInput, DocRefineError> {
    info!("Downloading document from: {}", url);

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| DocRefineError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    let response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            DocRefineError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            DocRefineError::DownloadFailed {
                url: url.to_string(),
                reason: e.to_string(),
            }
        }
    })?;

    if !response.status().is_success() {
        return Err(DocRefineError::DownloadFailed {
            url: url.to_string(),
            reason: format!("HTTP {}", response.status()),
        });
    }

    let file_name = extract_filename(url);
    let mut bytes = Vec::new();
    let mut body = response.bytes_stream();
    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(|e| DocRefineError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        if bytes.len() + chunk.len() > MAX_DOWNLOAD_BYTES {
            return Err(DocRefineError::DownloadFailed {
                url: url.to_string(),
                reason: format!("document is larger than {} MiB", MAX_DOWNLOAD_BYTES >> 20),
            });
        }
        bytes.extend_from_slice(&chunk);
    }

    check_magic(&file_name, &bytes)?;
    info!("Downloaded {} ({} bytes)", file_name, bytes.len());

    Ok(ResolvedInput { file_name, bytes })
}

/// Fail with [`DocRefineError::NotADocx`] unless `bytes` start like a ZIP.
pub fn check_magic(file_name: &str, bytes: &[u8]) -> Result<(), DocRefineError> {
    let mut magic = [0u8; 4];
    let n = bytes.len().min(4);
    magic[..n].copy_from_slice(&bytes[..n]);
    if magic != ZIP_MAGIC {
        return Err(DocRefineError::NotADocx {
            file_name: file_name.to_string(),
            magic,
        });
    }
    Ok(())
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| PathBuf::from(path).display().to_string())
}

/// Extract a reasonable filename from the URL path.
fn extract_filename(url: &str) -> String {
    if let Ok(parsed) = reqwest::Url::parse(url) {
        if let Some(mut segments) = parsed.path_segments() {
            if let Some(last) = segments.next_back() {
                if !last.is_empty() && last.contains('.') {
                    return last.to_string();
                }
            }
        }
    }

    "downloaded.docx".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_url() {
        assert!(is_url("https://example.com/doc.docx"));
        assert!(is_url("http://example.com/doc.docx"));
        assert!(!is_url("/tmp/doc.docx"));
        assert!(!is_url("doc.docx"));
        assert!(!is_url(""));
    }

    #[test]
    fn test_extract_filename() {
        assert_eq!(extract_filename("https://x.org/files/report.docx"), "report.docx");
        assert_eq!(extract_filename("https://x.org/files/"), "downloaded.docx");
        assert_eq!(extract_filename("https://x.org/download"), "downloaded.docx");
    }

    #[test]
    fn test_check_magic() {
        assert!(check_magic("a.docx", b"PK\x03\x04rest").is_ok());
        assert!(matches!(
            check_magic("a.txt", b"hello"),
            Err(DocRefineError::NotADocx { magic, .. }) if &magic == b"hell"
        ));
        assert!(check_magic("empty.docx", b"").is_err());
    }

    #[tokio::test]
    async fn test_missing_file() {
        let err = resolve_input("/definitely/not/here.docx", 5).await.unwrap_err();
        assert!(matches!(err, DocRefineError::FileNotFound { .. }));
    }

    #[tokio::test]
    async fn test_local_non_docx() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.docx");
        std::fs::write(&path, "plain text").unwrap();
        let err = resolve_input(path.to_str().unwrap(), 5).await.unwrap_err();
        assert!(matches!(err, DocRefineError::NotADocx { ref file_name, .. } if file_name == "notes.docx"));
    }

    #[tokio::test]
    async fn test_blank_input_is_invalid() {
        assert!(matches!(
            resolve_input("  ", 5).await,
            Err(DocRefineError::InvalidInput { .. })
        ));
    }
}
