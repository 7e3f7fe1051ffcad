//! Sanitization: send the document text out, take the reply apart, and
//! refuse anything that is not exactly what was asked for.
//!
//! The reply is untrusted input. It must
//!
//! 1. be a JSON object (an outer ```` ```json ```` fence is tolerated),
//! 2. carry all four fields with the right types, enum values included,
//! 3. after [`postprocess::clean_html`], contain non-empty markup that only
//!    uses the allowed tag vocabulary, carries no attributes beyond
//!    [`ALLOWED_ATTRIBUTES`], and is balanced.
//!
//! Anything else is a [`SanitizeError`]; nothing half-valid is returned.

use crate::config::RefineConfig;
use crate::error::SanitizeError;
use crate::model::{
    AnalysisResult, DocumentState, FormattingIssue, ImageAnalysis, StructuralSuggestion,
};
use crate::pipeline::llm::{self, TextGenerator};
use crate::pipeline::postprocess;
use crate::progress::ProgressCallback;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Tags the cleaned markup may use.
pub const ALLOWED_TAGS: &[&str] = &[
    "p", "h1", "h2", "h3", "h4", "h5", "h6", "ul", "ol", "li", "strong", "em", "b", "i",
    "table", "thead", "tbody", "tr", "td", "th", "br",
];

/// The only attributes the cleaned markup may carry, per tag. Values must
/// be small positive integers.
pub const ALLOWED_ATTRIBUTES: &[(&str, &str)] = &[
    ("td", "colspan"),
    ("td", "rowspan"),
    ("th", "colspan"),
    ("th", "rowspan"),
];

/// Tags that never take a closing tag.
const VOID_TAGS: &[&str] = &["br"];

/// The reply schema. Every field is required.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SanitizerReply {
    pub formatting_issues: Vec<FormattingIssue>,
    pub structural_suggestions: Vec<StructuralSuggestion>,
    pub summary: String,
    pub formatted_html: String,
}

/// Run the sanitization request for `document` and validate the reply.
pub async fn sanitize(
    document: &DocumentState,
    generator: &Arc<dyn TextGenerator>,
    config: &RefineConfig,
    progress: Option<&ProgressCallback>,
) -> Result<AnalysisResult, SanitizeError> {
    let (text, truncated) = truncate_chars(&document.raw_text, config.max_input_chars);
    if truncated {
        let original = document.raw_text.chars().count();
        warn!(
            "{}: text truncated from {} to {} characters",
            document.file_name, original, config.max_input_chars
        );
        if let Some(cb) = progress {
            cb.on_input_truncated(original, config.max_input_chars);
        }
    }

    let request = llm::build_request(text, config);
    let (reply, duration_ms) = llm::request_cleanup(generator, &request, config).await?;

    let parsed = parse_reply(&reply.content)?;
    let formatted_html = postprocess::clean_html(&parsed.formatted_html);
    validate_markup(&formatted_html)?;

    info!(
        "{}: {} formatting issues, {} structural suggestions, {} bytes of markup",
        document.file_name,
        parsed.formatting_issues.len(),
        parsed.structural_suggestions.len(),
        formatted_html.len()
    );

    Ok(AnalysisResult {
        formatting_issues: parsed.formatting_issues,
        structural_suggestions: parsed.structural_suggestions,
        image_analysis: image_analysis(document.image_count, &formatted_html),
        summary: parsed.summary,
        formatted_html,
        input_tokens: reply.input_tokens,
        output_tokens: reply.output_tokens,
        duration_ms,
    })
}

/// Cut `text` to at most `max_chars` characters.
///
/// Returns the kept prefix and whether anything was dropped.
pub fn truncate_chars(text: &str, max_chars: usize) -> (&str, bool) {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => (&text[..byte_idx], true),
        None => (text, false),
    }
}

// ── Reply parsing ────────────────────────────────────────────────────────────

static RE_JSON_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```[A-Za-z]*\s*\n(.*?)\n?```$").unwrap());

/// Parse the raw reply body into a [`SanitizerReply`].
pub fn parse_reply(body: &str) -> Result<SanitizerReply, SanitizeError> {
    let trimmed = body.trim();
    let json = match RE_JSON_FENCE.captures(trimmed) {
        Some(caps) => caps.get(1).map_or("", |m| m.as_str()).trim(),
        None => trimmed,
    };
    if json.is_empty() {
        return Err(SanitizeError::EmptyResponse);
    }

    let value: serde_json::Value =
        serde_json::from_str(json).map_err(|e| SanitizeError::MalformedJson(e.to_string()))?;
    if !value.is_object() {
        return Err(SanitizeError::Schema(format!(
            "expected a JSON object, got {}",
            json_kind(&value)
        )));
    }

    serde_json::from_value(value).map_err(|e| SanitizeError::Schema(e.to_string()))
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}

// ── Markup validation ────────────────────────────────────────────────────────

static RE_COMMENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<!--.*?-->").unwrap());

static RE_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<(/?)([A-Za-z][A-Za-z0-9]*)\b([^<>]*?)(/?)>").unwrap());

/// The whole attribute section of a tag: name/value pairs and nothing else.
static RE_ATTR_LIST: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^(?:\s+[A-Za-z_:][-A-Za-z0-9_:.]*(?:\s*=\s*(?:"[^"]*"|'[^']*'|[^\s"'=<>`]+))?)*\s*$"#)
        .unwrap()
});

static RE_ATTR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"([A-Za-z_:][-A-Za-z0-9_:.]*)(?:\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'=<>`]+)))?"#)
        .unwrap()
});

/// Check that `html` is non-empty, uses only [`ALLOWED_TAGS`] with no
/// attributes outside [`ALLOWED_ATTRIBUTES`], and that every non-void tag
/// is closed in the right order.
pub fn validate_markup(html: &str) -> Result<(), SanitizeError> {
    let html = RE_COMMENT.replace_all(html, "");
    if html.trim().is_empty() {
        return Err(SanitizeError::Markup("formattedHtml is empty".into()));
    }

    let mut stack: Vec<String> = Vec::new();
    for caps in RE_TAG.captures_iter(&html) {
        let closing = !caps[1].is_empty();
        let self_closing = !caps[4].is_empty();
        let name = caps[2].to_ascii_lowercase();

        if !ALLOWED_TAGS.contains(&name.as_str()) {
            return Err(SanitizeError::Markup(format!("tag <{name}> is not allowed")));
        }
        check_attributes(&name, &caps[3], closing)?;
        if VOID_TAGS.contains(&name.as_str()) || self_closing {
            continue;
        }

        if closing {
            match stack.pop() {
                Some(open) if open == name => {}
                Some(open) => {
                    return Err(SanitizeError::Markup(format!(
                        "</{name}> closes <{open}>"
                    )))
                }
                None => {
                    return Err(SanitizeError::Markup(format!(
                        "</{name}> has no opening tag"
                    )))
                }
            }
        } else {
            stack.push(name);
        }
    }

    if let Some(open) = stack.pop() {
        return Err(SanitizeError::Markup(format!("<{open}> is never closed")));
    }
    debug!("markup validated: {} bytes", html.len());
    Ok(())
}

fn check_attributes(tag: &str, attrs: &str, closing: bool) -> Result<(), SanitizeError> {
    if attrs.trim().is_empty() {
        return Ok(());
    }
    if closing || !RE_ATTR_LIST.is_match(attrs) {
        return Err(SanitizeError::Markup(format!(
            "malformed attributes on <{tag}>: {}",
            attrs.trim()
        )));
    }
    for caps in RE_ATTR.captures_iter(attrs) {
        let attr = caps[1].to_ascii_lowercase();
        if !ALLOWED_ATTRIBUTES.contains(&(tag, attr.as_str())) {
            return Err(SanitizeError::Markup(format!(
                "attribute `{attr}` is not allowed on <{tag}>"
            )));
        }
        let value = caps
            .get(2)
            .or_else(|| caps.get(3))
            .or_else(|| caps.get(4))
            .map(|m| m.as_str().trim())
            .unwrap_or_default();
        if !matches!(value.parse::<u16>(), Ok(1..=1000)) {
            return Err(SanitizeError::Markup(format!(
                "{attr}=\"{value}\" on <{tag}> is not a span"
            )));
        }
    }
    Ok(())
}

// ── Image bookkeeping ────────────────────────────────────────────────────────

fn image_analysis(source_images: usize, formatted_html: &str) -> ImageAnalysis {
    let kept = formatted_html.matches("<img").count();
    let mut issues = Vec::new();
    if source_images > kept {
        issues.push(format!(
            "{} image(s) from the source document are not part of the cleaned markup; \
             re-insert them after export",
            source_images - kept
        ));
    }
    ImageAnalysis {
        count: source_images,
        issues,
    }
}
