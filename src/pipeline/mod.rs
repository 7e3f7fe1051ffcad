//! Pipeline stages for document refinement.
//!
//! Each submodule implements exactly one transformation step and knows
//! nothing about the session; [`crate::refine::Refinery`] sequences them.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ ingest ──▶ sanitize ──────────────────────▶ export
//! (path/URL) (zip+xml)  │ llm ─▶ postprocess ─▶ validate  (docx-rs)
//! ```
//!
//! 1. [`input`]: read a local path or download a URL into memory
//! 2. [`ingest`]: unpack the `.docx`, produce plain text and HTML
//! 3. [`llm`]: the text-generation seam; the only stage with network I/O
//! 4. [`postprocess`]: deterministic cleanup of markdown residue
//! 5. [`sanitize`]: one generation call, strict reply validation
//! 6. [`export`]: cleaned HTML → Word file, atomic write to disk

pub mod export;
pub mod ingest;
pub mod input;
pub mod llm;
pub mod postprocess;
pub mod sanitize;
