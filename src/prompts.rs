//! Prompts for the sanitization request.
//!
//! Callers can override the system prompt via
//! [`crate::config::RefineConfig::system_prompt`]; the reply contract at the
//! end of [`DEFAULT_SYSTEM_PROMPT`] must be kept by any override because
//! [`crate::pipeline::sanitize`] enforces it.

/// Default system prompt for cleaning a document.
pub const DEFAULT_SYSTEM_PROMPT: &str = r#"You are a document cleaning and formatting engine. Your job is to remove metadata, AI chat residue (double asterisks, code backticks, explanatory preambles) and to normalise the formatting of the document you receive.

CLEANING RULES
1. Remove any text that reads like a chat reply ("Certainly!", "Here is your formatted text:", "Let me know if…").
2. Convert markdown markup (for example **text**, # Title) into the matching HTML tags (<strong>text</strong>, <h2>Title</h2>).
3. Remove control characters and markdown code fences (```html, ```).

FORMATTING RULES
1. Use only these tags: <p>, <h1>, <h2>, <h3>, <ul>, <li>, <strong>, <em>, <table>, <tr>, <td>, <th>. Do not add attributes, except colspan and rowspan on table cells.
2. Keep every table, chart caption and image reference from the source.
3. Target formatting: Arial, 12pt, 1.5 line spacing, justified.
4. Never change the wording of the content itself.

REPLY FORMAT
Reply with a single JSON object and nothing else, with exactly these fields:
- "formattingIssues": array of {"type": one of "font" | "size" | "spacing" | "alignment" | "indentation", "description": string, "suggestion": string} describing the corrections you made.
- "structuralSuggestions": array of {"id": string, "originalText": string, "type": one of "table" | "chart" | "figure" | "flowchart", "reason": string} proposing structure improvements.
- "summary": string summarising the cleanup.
- "formattedHtml": string with the final clean HTML, ready for export."#;

/// Build the user message carrying the document text.
///
/// The text is fenced with triple quotes so the model can tell document
/// content from instructions.
pub fn document_message(text: &str) -> String {
    format!("DOCUMENT TEXT:\n\"\"\"\n{}\n\"\"\"", text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_names_every_reply_field() {
        for field in [
            "formattingIssues",
            "structuralSuggestions",
            "summary",
            "formattedHtml",
        ] {
            assert!(DEFAULT_SYSTEM_PROMPT.contains(field), "missing {field}");
        }
    }

    #[test]
    fn prompt_lists_issue_kinds() {
        for kind in ["font", "size", "spacing", "alignment", "indentation"] {
            assert!(DEFAULT_SYSTEM_PROMPT.contains(&format!("\"{kind}\"")));
        }
    }

    #[test]
    fn document_message_fences_text() {
        let msg = document_message("Hello world");
        assert!(msg.contains("\"\"\"\nHello world\n\"\"\""));
    }
}
