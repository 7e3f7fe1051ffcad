//! Data model shared by the pipeline stages and the session.
//!
//! Every value here is produced once by a stage and never mutated
//! afterwards; the session replaces them wholesale. Field names serialise in
//! camelCase so `--json` output and the model reply share one vocabulary.

use serde::{Deserialize, Serialize};
use std::fmt;

/// MIME type of an Office Open XML word-processing document.
pub const DOCX_MIME: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";

/// The ingested document: plain text for the model, HTML for preview.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentState {
    pub raw_text: String,
    pub html_content: String,
    pub file_name: String,
    /// Number of embedded drawings/pictures found during ingestion.
    #[serde(default)]
    pub image_count: usize,
}

/// Category of a formatting fix reported by the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueKind {
    Font,
    Size,
    Spacing,
    Alignment,
    Indentation,
}

/// A formatting correction the model says it applied. Display only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormattingIssue {
    #[serde(rename = "type")]
    pub kind: IssueKind,
    pub description: String,
    pub suggestion: String,
}

/// Structure the model proposes for a passage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SuggestionKind {
    Table,
    Chart,
    Figure,
    Flowchart,
}

/// A structural improvement suggested by the model. Display only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StructuralSuggestion {
    pub id: String,
    pub original_text: String,
    #[serde(rename = "type")]
    pub kind: SuggestionKind,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

/// Image bookkeeping between the source and the cleaned markup.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageAnalysis {
    pub count: usize,
    pub issues: Vec<String>,
}

/// Outcome of one successful sanitization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    pub formatting_issues: Vec<FormattingIssue>,
    pub structural_suggestions: Vec<StructuralSuggestion>,
    pub image_analysis: ImageAnalysis,
    pub summary: String,
    /// Cleaned markup, after the post-pass and validation.
    pub formatted_html: String,
    #[serde(default)]
    pub input_tokens: usize,
    #[serde(default)]
    pub output_tokens: usize,
    #[serde(default)]
    pub duration_ms: u64,
}

/// A fully produced Word file, ready to be written out.
#[derive(Clone, PartialEq, Eq)]
pub struct ExportedDocument {
    pub file_name: String,
    pub mime_type: &'static str,
    pub bytes: Vec<u8>,
}

impl fmt::Debug for ExportedDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExportedDocument")
            .field("file_name", &self.file_name)
            .field("mime_type", &self.mime_type)
            .field("bytes", &format_args!("<{} bytes>", self.bytes.len()))
            .finish()
    }
}
