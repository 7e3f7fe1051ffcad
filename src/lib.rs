//! # docrefine
//!
//! Clean up Word documents with an LLM and export a print-ready `.docx`.
//!
//! Documents pasted together from chat assistants, web pages and old files
//! carry conversational preambles, markdown residue and inconsistent
//! formatting. This crate extracts the text of a `.docx`, asks a language
//! model to return the same content as clean semantic HTML plus a report of
//! what it fixed, validates that reply strictly, and writes the result back
//! to Word with a fixed academic page layout.
//!
//! ## Pipeline Overview
//!
//! ```text
//! .docx
//!  │
//!  ├─ 1. Input     resolve local file or download from URL
//!  ├─ 2. Ingest    unzip, walk WordprocessingML → text + HTML   (step 1 → 2)
//!  ├─ 3. Sanitize  one LLM call, JSON reply, post-pass, strict validation
//!  │                                                             (step 2 → 3)
//!  └─ 4. Export    HTML → docx-rs, A4 / Arial 12 / 1.5 spacing   (step 3)
//! ```
//!
//! The three steps are tracked by a [`SessionState`] that only changes
//! through the pure [`reduce`] function. One operation may run at a time; a
//! concurrent call fails with [`DocRefineError::Busy`].
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use docrefine::{write_export, RefineConfig, Refinery};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider auto-detected from OPENAI_API_KEY / ANTHROPIC_API_KEY / GEMINI_API_KEY
//!     let refinery = Refinery::new(RefineConfig::default());
//!     refinery.upload_path("report.docx").await?;
//!     let analysis = refinery.sanitize().await?;
//!     eprintln!("{}", analysis.summary);
//!     let doc = refinery.export().await?;
//!     write_export(&doc, std::path::Path::new("."))?; // DocRefine_Limpo_report.docx
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `docrefine` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! docrefine = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod model;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod refine;
pub mod session;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{Orientation, PageLayout, RefineConfig, RefineConfigBuilder};
pub use error::{DocRefineError, SanitizeError};
pub use model::{
    AnalysisResult, DocumentState, ExportedDocument, FormattingIssue, ImageAnalysis, IssueKind,
    StructuralSuggestion, SuggestionKind, DOCX_MIME,
};
pub use pipeline::export::{document_shell, export_filename, write_export};
pub use pipeline::llm::{GeneratedText, GenerationRequest, TextGenerator};
pub use progress::{NoopProgressCallback, ProgressCallback, StageProgressCallback};
pub use refine::{inspect, Refinery};
pub use session::{reduce, Event, Operation, SessionState, Step, Ticket};
