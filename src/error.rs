//! Error types for the docrefine library.
//!
//! Two error types mirror the two places things go wrong:
//!
//! * [`DocRefineError`]: **Fatal** for the current attempt, returned as
//!   `Err(DocRefineError)` from every public operation. The session never
//!   advances a step on error, so the caller can simply retry.
//!
//! * [`SanitizeError`]: the detailed reason a sanitization attempt was
//!   rejected (transport failure, unusable reply, schema or markup
//!   violation). Always wrapped in [`DocRefineError::Sanitization`].

use crate::session::{Operation, Step};
use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the docrefine library.
#[derive(Debug, Error)]
pub enum DocRefineError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("Document not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The input string is not a valid file path or URL.
    #[error("Invalid input '{input}': not a file path or a valid HTTP/HTTPS URL")]
    InvalidInput { input: String },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}\nCheck your internet connection.")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'\nIncrease --download-timeout.")]
    DownloadTimeout { url: String, secs: u64 },

    /// The bytes do not start with a ZIP local-file header.
    #[error("'{file_name}' is not a .docx file\nFirst bytes: {magic:?}")]
    NotADocx { file_name: String, magic: [u8; 4] },

    // ── Stage errors ──────────────────────────────────────────────────────
    /// Ingestion could not read the document.
    #[error("Could not read '{file_name}': {detail}\nUse a valid .docx file.")]
    Parse { file_name: String, detail: String },

    /// The sanitization call failed or its reply was rejected.
    #[error("Failed to clean the document: {0}")]
    Sanitization(#[from] SanitizeError),

    /// Conversion of the cleaned markup to .docx failed.
    #[error("Failed to generate the Word file: {detail}")]
    Export { detail: String },

    // ── Session errors ────────────────────────────────────────────────────
    /// Another operation already holds the in-flight slot.
    #[error("Cannot start {operation}: {in_flight} is still running")]
    Busy {
        operation: Operation,
        in_flight: Operation,
    },

    /// The session is not at a step where the operation is allowed.
    #[error("Cannot start {operation} at step {step}")]
    InvalidStep { operation: Operation, step: Step },

    // ── LLM errors ────────────────────────────────────────────────────────
    /// The configured provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write an output file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl DocRefineError {
    /// Shorthand for a [`DocRefineError::Parse`].
    pub(crate) fn parse(file_name: &str, detail: impl Into<String>) -> Self {
        DocRefineError::Parse {
            file_name: file_name.to_string(),
            detail: detail.into(),
        }
    }

    /// Shorthand for a [`DocRefineError::Export`].
    pub(crate) fn export(detail: impl Into<String>) -> Self {
        DocRefineError::Export {
            detail: detail.into(),
        }
    }
}

/// Why a sanitization attempt was rejected.
///
/// The model is treated as untrusted: anything short of a reply that parses
/// into the full schema and carries well-formed markup ends up here.
#[derive(Debug, Clone, Error, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum SanitizeError {
    /// The provider call itself failed (network, auth, rate limit…).
    #[error("request failed: {0}")]
    Request(String),

    /// The provider did not answer within the configured timeout.
    #[error("request timed out after {secs}s")]
    Timeout { secs: u64 },

    /// The provider answered with an empty body.
    #[error("no response text from model")]
    EmptyResponse,

    /// The reply body is not JSON.
    #[error("reply is not valid JSON: {0}")]
    MalformedJson(String),

    /// The reply is JSON but does not match the reply schema.
    #[error("reply does not match the schema: {0}")]
    Schema(String),

    /// `formattedHtml` is empty, uses disallowed tags, or is unbalanced.
    #[error("cleaned markup rejected: {0}")]
    Markup(String),
}
