//! Post-processing: deterministic cleanup of model-generated markup.
//!
//! The model is asked for clean HTML, but occasionally still emits
//! markdown residue:
//!
//! - ` ```html ... ``` ` fences around (or inside) the markup
//! - `**bold**` instead of `<strong>`
//! - `## Heading` lines instead of heading tags
//! - Windows line endings and invisible Unicode
//!
//! [`clean_html`] repairs these with cheap regex passes. It is idempotent:
//! `clean_html(&clean_html(x)) == clean_html(x)` for every input, so the
//! pass can safely run on markup that was already cleaned. It is not a
//! validator; [`crate::pipeline::sanitize`] checks the result afterwards.
//!
//! ## Rule Order
//!
//! Fences go first so their language tag is not mistaken for text; bold
//! runs before headings so `**x**## y` becomes `<strong>x</strong>` followed
//! by a heading.

use once_cell::sync::Lazy;
use regex::Regex;

/// Apply all post-processing rules to the raw `formattedHtml`.
///
/// Rules (applied in order):
/// 1. Normalise line endings (CRLF → LF)
/// 2. Strip invisible Unicode (zero-width spaces, BOM, soft hyphens, etc.)
/// 3. Remove fenced-code markers (runs of 3+ backticks, optional `html` tag)
/// 4. Rewrite `**text**` to `<strong>text</strong>`
/// 5. Rewrite leading markdown heading markers to `<h2>…</h2>`
/// 6. Drop bare heading markers left without text
/// 7. Trim surrounding whitespace
pub fn clean_html(input: &str) -> String {
    let s = normalise_line_endings(input);
    let s = remove_invisible_chars(&s);
    let s = strip_code_fences(&s);
    let s = rewrite_bold(&s);
    let s = rewrite_headings(&s);
    let s = drop_bare_heading_markers(&s);
    s.trim().to_string()
}

// ── Rule 1: Normalise line endings ───────────────────────────────────────────

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

// ── Rule 2: Remove invisible Unicode characters ─────────────────────────────

fn remove_invisible_chars(input: &str) -> String {
    input.replace(
        [
            '\u{200B}', '\u{FEFF}', '\u{00AD}', '\u{200C}', '\u{200D}', '\u{2060}',
        ],
        "",
    )
}

// ── Rule 3: Strip code fences ────────────────────────────────────────────────
//
// A whole run of backticks is consumed at once, so removing one run can
// never glue two shorter runs into a new fence.

static RE_FENCE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)`{3,}(?:html)?").unwrap());

fn strip_code_fences(input: &str) -> String {
    RE_FENCE.replace_all(input, "").into_owned()
}

// ── Rule 4: Bold markers ─────────────────────────────────────────────────────

static RE_BOLD: Lazy<Regex> = Lazy::new(|| Regex::new(r"\*\*(.*?)\*\*").unwrap());

fn rewrite_bold(input: &str) -> String {
    RE_BOLD.replace_all(input, "<strong>$1</strong>").into_owned()
}

// ── Rule 5: Heading markers ──────────────────────────────────────────────────
//
// A marker counts as "leading" at the start of a line or right after a tag
// (`<p>## Title</p>`), so `C# code` or `item #3` are left alone. Repeated
// markers (`## ## Title`) collapse into a single heading. The heading text
// stops at `>` too: a `>` inside it would read as a tag end on the next pass.

static RE_HEADING: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)(^|>)[ \t]*(?:#{1,6}[ \t]+)+([^<>\n]*[^<>\n \t])").unwrap()
});

fn rewrite_headings(input: &str) -> String {
    RE_HEADING.replace_all(input, "$1<h2>$2</h2>").into_owned()
}

// ── Rule 6: Bare heading markers ─────────────────────────────────────────────

static RE_BARE_HEADING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)(^|>)[ \t]*#{1,6}[ \t]*($|<)").unwrap());

fn drop_bare_heading_markers(input: &str) -> String {
    RE_BARE_HEADING.replace_all(input, "$1$2").into_owned()
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_html_fence() {
        let input = "```html\n<p>Hi</p>\n```";
        assert_eq!(clean_html(input), "<p>Hi</p>");
    }

    #[test]
    fn test_strip_fence_case_insensitive() {
        assert_eq!(clean_html("```HTML<p>a</p>```"), "<p>a</p>");
    }

    #[test]
    fn test_fence_pieces_do_not_recombine() {
        let once = clean_html("a``x```html``b");
        assert!(!once.contains("```"), "got {once:?}");
        assert_eq!(clean_html(&once), once);
    }

    #[test]
    fn test_bold_rewrite() {
        assert_eq!(
            clean_html("<p>a **b** c</p>"),
            "<p>a <strong>b</strong> c</p>"
        );
    }

    #[test]
    fn test_unmatched_bold_left_alone() {
        assert_eq!(clean_html("<p>2 ** 3</p>"), "<p>2 ** 3</p>");
    }

    #[test]
    fn test_heading_at_line_start() {
        assert_eq!(clean_html("## Intro\n<p>x</p>"), "<h2>Intro</h2>\n<p>x</p>");
    }

    #[test]
    fn test_heading_after_tag() {
        assert_eq!(clean_html("<p>### Scope</p>"), "<p><h2>Scope</h2></p>");
    }

    #[test]
    fn test_repeated_heading_markers_collapse() {
        assert_eq!(clean_html("## ## Title"), "<h2>Title</h2>");
    }

    #[test]
    fn test_hash_inside_text_untouched() {
        let input = "<p>We use C# and item #3.</p>";
        assert_eq!(clean_html(input), input);
    }

    #[test]
    fn test_bare_marker_dropped() {
        assert_eq!(clean_html("<p>##</p>"), "<p></p>");
    }

    #[test]
    fn test_invisible_and_crlf() {
        assert_eq!(clean_html("<p>a\u{200B}b</p>\r\n"), "<p>ab</p>");
    }

    #[test]
    fn test_heading_text_stops_at_angle_bracket() {
        let once = clean_html("## Steps -> # 2 next");
        assert_eq!(once, "<h2>Steps -</h2>><h2>2 next</h2>");
        assert_eq!(clean_html(&once), once);
    }

    #[test]
    fn test_no_leading_heading_markers_remain() {
        let once = clean_html("# A\n## B\n<p>### C</p>\n####### not a heading");
        for line in once.lines() {
            let t = line.trim_start();
            assert!(
                !(t.starts_with("# ") || t.starts_with("## ") || t.starts_with("### ")),
                "leading marker left in {line:?}"
            );
        }
    }
}
