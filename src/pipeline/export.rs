//! Export: cleaned markup → Word file.
//!
//! The markup is first wrapped in a print-ready HTML shell carrying the page
//! layout as CSS ([`document_shell`]). The shell is then parsed with
//! `scraper` and its body is mapped onto `docx-rs` paragraphs and tables,
//! using the same [`PageLayout`] numbers for page geometry and run styling.
//!
//! | markup                 | Word                                   |
//! |------------------------|----------------------------------------|
//! | `<h1>`…`<h6>`          | `Heading1`…`Heading6` paragraph, bold  |
//! | `<p>`, loose text      | body paragraph, justified, indented    |
//! | `<ul>`/`<ol>` + `<li>` | paragraph prefixed with `•` / `n.`     |
//! | `<table>`              | table, `<th>` cells bold               |
//! | `<strong>`/`<b>`       | bold run                               |
//! | `<em>`/`<i>`           | italic run                             |
//! | `<br>`                 | line break                             |

use crate::config::{Orientation, PageLayout, RefineConfig};
use crate::error::DocRefineError;
use crate::model::{ExportedDocument, DOCX_MIME};
use docx_rs::{
    AlignmentType, BreakType, Docx, LineSpacing, PageMargin, Paragraph, Run, RunFonts,
    SpecialIndentType, Style, StyleType, Table, TableCell, TableRow,
};
use once_cell::sync::Lazy;
use scraper::{ElementRef, Html, Selector};
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// File name used when the source document had none.
const FALLBACK_NAME: &str = "documento.docx";

/// A4 in twips.
const A4_WIDTH: u32 = 11_906;
const A4_HEIGHT: u32 = 16_838;

static BODY: Lazy<Selector> = Lazy::new(|| Selector::parse("body").unwrap());

/// Wrap cleaned markup in a complete HTML document styled by `layout`.
pub fn document_shell(html: &str, layout: &PageLayout) -> String {
    format!(
        "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n<title>DocRefine</title>\n\
         <style>\n{}\n</style>\n</head>\n<body>\n{}\n</body>\n</html>\n",
        layout.css(),
        html
    )
}

/// `prefix` + original file name, guaranteed to end in `.docx`.
///
/// Directory components of `original` are dropped; a missing or blank name
/// falls back to `documento.docx`.
pub fn export_filename(prefix: &str, original: Option<&str>) -> String {
    let base = original
        .map(|n| n.rsplit(['/', '\\']).next().unwrap_or(n).trim())
        .filter(|n| !n.is_empty())
        .unwrap_or(FALLBACK_NAME);

    if base.to_ascii_lowercase().ends_with(".docx") {
        format!("{prefix}{base}")
    } else {
        format!("{prefix}{base}.docx")
    }
}

/// Convert cleaned markup into a Word document.
pub fn export(
    html: &str,
    file_name: Option<&str>,
    config: &RefineConfig,
) -> Result<ExportedDocument, DocRefineError> {
    if html.trim().is_empty() {
        return Err(DocRefineError::export("nothing to export: markup is empty"));
    }

    let shell = document_shell(html, &config.layout);
    let mut blocks = parse_blocks(&shell);
    if blocks.is_empty() {
        // Word needs at least one paragraph in the body.
        blocks.push(Block::Paragraph {
            kind: BlockKind::Body,
            pieces: Vec::new(),
        });
    }

    let bytes = build_docx(&blocks, &config.layout)?;
    let name = export_filename(&config.file_prefix, file_name);
    info!("Exported {} ({} blocks, {} bytes)", name, blocks.len(), bytes.len());

    Ok(ExportedDocument {
        file_name: name,
        mime_type: DOCX_MIME,
        bytes,
    })
}

/// Write an exported document atomically.
///
/// `dest` may be a directory (the document's own file name is used) or a
/// full file path. The bytes go to a temporary file in the destination
/// directory first and are renamed into place, so a reader never sees a
/// partial file.
pub fn write_export(doc: &ExportedDocument, dest: &Path) -> Result<PathBuf, DocRefineError> {
    let path = if dest.is_dir() {
        dest.join(&doc.file_name)
    } else {
        dest.to_path_buf()
    };
    let write_err = |source: std::io::Error| DocRefineError::OutputWriteFailed {
        path: path.clone(),
        source,
    };

    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&parent).map_err(write_err)?;

    let mut tmp = tempfile::NamedTempFile::new_in(&parent).map_err(write_err)?;
    tmp.write_all(&doc.bytes).map_err(write_err)?;
    tmp.flush().map_err(write_err)?;
    tmp.persist(&path).map_err(|e| write_err(e.error))?;

    debug!("Wrote {} bytes to {}", doc.bytes.len(), path.display());
    Ok(path)
}

// ========================================================================
// HTML → blocks
// ========================================================================

#[derive(Debug, Clone, PartialEq)]
enum Piece {
    Text { text: String, bold: bool, italic: bool },
    Break,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockKind {
    Body,
    Heading(u8),
    Bullet,
    Numbered(usize),
}

#[derive(Debug, Clone, PartialEq)]
enum Block {
    Paragraph { kind: BlockKind, pieces: Vec<Piece> },
    /// rows → cells → (is header, blocks)
    Table(Vec<Vec<(bool, Vec<Block>)>>),
}

fn parse_blocks(shell: &str) -> Vec<Block> {
    let document = Html::parse_document(shell);
    let mut blocks = Vec::new();
    if let Some(body) = document.select(&BODY).next() {
        walk_blocks(body, &mut blocks);
    }
    blocks
}

/// Walk block-level children of `el`. Loose inline content between blocks
/// is gathered into body paragraphs.
fn walk_blocks(el: ElementRef<'_>, out: &mut Vec<Block>) {
    let mut pending: Vec<Piece> = Vec::new();

    for child in el.children() {
        if let Some(text) = child.value().as_text() {
            push_text(&mut pending, text, false, false);
            continue;
        }
        let Some(child_el) = ElementRef::wrap(child) else {
            continue;
        };

        let name = child_el.value().name();
        match name {
            "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => {
                flush(&mut pending, out);
                let level = name[1..].parse::<u8>().unwrap_or(1);
                push_paragraph(out, BlockKind::Heading(level), inline_pieces(child_el, false, false));
            }
            "p" => {
                flush(&mut pending, out);
                push_paragraph(out, BlockKind::Body, inline_pieces(child_el, false, false));
            }
            "ul" | "ol" => {
                flush(&mut pending, out);
                walk_list(child_el, name == "ol", out);
            }
            "table" => {
                flush(&mut pending, out);
                let rows = table_rows(child_el);
                if !rows.is_empty() {
                    out.push(Block::Table(rows));
                }
            }
            "strong" | "b" | "em" | "i" | "span" | "a" | "br" => {
                collect_inline(child_el, false, false, &mut pending);
            }
            "script" | "style" | "head" | "title" => {}
            _ => {
                flush(&mut pending, out);
                walk_blocks(child_el, out);
            }
        }
    }
    flush(&mut pending, out);
}

fn walk_list(list: ElementRef<'_>, ordered: bool, out: &mut Vec<Block>) {
    let mut n = 0;
    for child in list.children().filter_map(ElementRef::wrap) {
        match child.value().name() {
            "li" => {
                n += 1;
                let kind = if ordered {
                    BlockKind::Numbered(n)
                } else {
                    BlockKind::Bullet
                };
                push_paragraph(out, kind, inline_pieces(child, false, false));
            }
            nested @ ("ul" | "ol") => walk_list(child, nested == "ol", out),
            _ => {}
        }
    }
}

fn table_rows(table: ElementRef<'_>) -> Vec<Vec<(bool, Vec<Block>)>> {
    let mut rows = Vec::new();
    for child in table.children().filter_map(ElementRef::wrap) {
        match child.value().name() {
            "thead" | "tbody" | "tfoot" => rows.extend(table_rows(child)),
            "tr" => {
                let cells: Vec<(bool, Vec<Block>)> = child
                    .children()
                    .filter_map(ElementRef::wrap)
                    .filter(|c| matches!(c.value().name(), "td" | "th"))
                    .map(|c| {
                        let mut blocks = Vec::new();
                        walk_blocks(c, &mut blocks);
                        (c.value().name() == "th", blocks)
                    })
                    .collect();
                if !cells.is_empty() {
                    rows.push(cells);
                }
            }
            _ => {}
        }
    }
    rows
}

fn inline_pieces(el: ElementRef<'_>, bold: bool, italic: bool) -> Vec<Piece> {
    let mut pieces = Vec::new();
    collect_children(el, bold, italic, &mut pieces);
    pieces
}

fn collect_children(el: ElementRef<'_>, bold: bool, italic: bool, out: &mut Vec<Piece>) {
    for child in el.children() {
        if let Some(text) = child.value().as_text() {
            push_text(out, text, bold, italic);
        } else if let Some(child_el) = ElementRef::wrap(child) {
            collect_inline(child_el, bold, italic, out);
        }
    }
}

fn collect_inline(el: ElementRef<'_>, bold: bool, italic: bool, out: &mut Vec<Piece>) {
    let (bold, italic) = match el.value().name() {
        "strong" | "b" | "th" => (true, italic),
        "em" | "i" => (bold, true),
        "br" => {
            out.push(Piece::Break);
            return;
        }
        "script" | "style" => return,
        _ => (bold, italic),
    };
    collect_children(el, bold, italic, out);
}

/// Append text with HTML whitespace collapsing.
fn push_text(out: &mut Vec<Piece>, text: &str, bold: bool, italic: bool) {
    let mut collapsed = String::with_capacity(text.len());
    let mut last_space = false;
    for c in text.chars() {
        if c.is_whitespace() {
            if !last_space {
                collapsed.push(' ');
            }
            last_space = true;
        } else {
            collapsed.push(c);
            last_space = false;
        }
    }
    if collapsed.is_empty() {
        return;
    }

    if let Some(Piece::Text {
        text: prev,
        bold: b,
        italic: i,
    }) = out.last_mut()
    {
        if *b == bold && *i == italic {
            if prev.ends_with(' ') && collapsed.starts_with(' ') {
                prev.push_str(&collapsed[1..]);
            } else {
                prev.push_str(&collapsed);
            }
            return;
        }
    }
    out.push(Piece::Text {
        text: collapsed,
        bold,
        italic,
    });
}

/// Strip leading/trailing blanks of a paragraph; `None` if nothing is left.
fn trim_pieces(mut pieces: Vec<Piece>) -> Option<Vec<Piece>> {
    while matches!(pieces.first(), Some(Piece::Break)) {
        pieces.remove(0);
    }
    while matches!(pieces.last(), Some(Piece::Break)) {
        pieces.pop();
    }
    if let Some(Piece::Text { text, .. }) = pieces.first_mut() {
        *text = text.trim_start().to_string();
    }
    if let Some(Piece::Text { text, .. }) = pieces.last_mut() {
        *text = text.trim_end().to_string();
    }
    pieces.retain(|p| !matches!(p, Piece::Text { text, .. } if text.is_empty()));

    let has_text = pieces
        .iter()
        .any(|p| matches!(p, Piece::Text { text, .. } if !text.trim().is_empty()));
    has_text.then_some(pieces)
}

fn push_paragraph(out: &mut Vec<Block>, kind: BlockKind, pieces: Vec<Piece>) {
    if let Some(pieces) = trim_pieces(pieces) {
        out.push(Block::Paragraph { kind, pieces });
    }
}

fn flush(pending: &mut Vec<Piece>, out: &mut Vec<Block>) {
    if !pending.is_empty() {
        push_paragraph(out, BlockKind::Body, std::mem::take(pending));
    }
}

// ========================================================================
// blocks → docx
// ========================================================================

fn build_docx(blocks: &[Block], layout: &PageLayout) -> Result<Vec<u8>, DocRefineError> {
    let (width, height) = match layout.orientation {
        Orientation::Portrait => (A4_WIDTH, A4_HEIGHT),
        Orientation::Landscape => (A4_HEIGHT, A4_WIDTH),
    };
    let margin = PageMargin::new()
        .top(PageLayout::cm_to_twips(layout.margin_top_cm))
        .right(PageLayout::cm_to_twips(layout.margin_right_cm))
        .bottom(PageLayout::cm_to_twips(layout.margin_bottom_cm))
        .left(PageLayout::cm_to_twips(layout.margin_left_cm));

    let mut docx = Docx::new().page_size(width, height).page_margin(margin);
    for level in 1..=6u8 {
        docx = docx.add_style(
            Style::new(format!("Heading{level}"), StyleType::Paragraph)
                .name(format!("Heading {level}"))
                .size(heading_half_points(layout, level))
                .bold(),
        );
    }

    for block in blocks {
        docx = match block {
            Block::Paragraph { kind, pieces } => docx.add_paragraph(paragraph(*kind, pieces, layout)),
            Block::Table(rows) => docx.add_table(table(rows, layout)),
        };
    }

    let mut cursor = Cursor::new(Vec::new());
    docx.build()
        .pack(&mut cursor)
        .map_err(|e| DocRefineError::export(format!("docx packaging failed: {e}")))?;
    Ok(cursor.into_inner())
}

fn heading_half_points(layout: &PageLayout, level: u8) -> usize {
    let bump = match level {
        1 => 8,
        2 => 4,
        3 => 2,
        _ => 0,
    };
    layout.half_points() + bump
}

fn fonts(layout: &PageLayout) -> RunFonts {
    RunFonts::new()
        .ascii(&layout.font_family)
        .hi_ansi(&layout.font_family)
        .cs(&layout.font_family)
}

fn runs(mut p: Paragraph, pieces: &[Piece], size: usize, layout: &PageLayout) -> Paragraph {
    for piece in pieces {
        let run = match piece {
            Piece::Text { text, bold, italic } => {
                let mut run = Run::new().add_text(text).size(size).fonts(fonts(layout));
                if *bold {
                    run = run.bold();
                }
                if *italic {
                    run = run.italic();
                }
                run
            }
            Piece::Break => Run::new().add_break(BreakType::TextWrapping),
        };
        p = p.add_run(run);
    }
    p
}

fn paragraph(kind: BlockKind, pieces: &[Piece], layout: &PageLayout) -> Paragraph {
    let body_align = if layout.justify {
        AlignmentType::Both
    } else {
        AlignmentType::Left
    };
    let spacing = LineSpacing::new()
        .line(layout.line_spacing_240ths())
        .after(layout.paragraph_spacing_twips());
    let indent = PageLayout::cm_to_twips(layout.first_line_indent_cm);

    match kind {
        BlockKind::Heading(level) => {
            let p = Paragraph::new()
                .style(&format!("Heading{level}"))
                .align(AlignmentType::Left)
                .line_spacing(LineSpacing::new().before(360).after(240));
            runs(p, pieces, heading_half_points(layout, level), layout)
        }
        BlockKind::Body => {
            let p = Paragraph::new()
                .align(body_align)
                .line_spacing(spacing)
                .indent(None, Some(SpecialIndentType::FirstLine(indent)), None, None);
            runs(p, pieces, layout.half_points(), layout)
        }
        BlockKind::Bullet | BlockKind::Numbered(_) => {
            let marker = match kind {
                BlockKind::Numbered(n) => format!("{n}. "),
                _ => "• ".to_string(),
            };
            let mut with_marker = vec![Piece::Text {
                text: marker,
                bold: false,
                italic: false,
            }];
            with_marker.extend_from_slice(pieces);
            let p = Paragraph::new()
                .align(AlignmentType::Left)
                .line_spacing(spacing)
                .indent(Some(indent), None, None, None);
            runs(p, &with_marker, layout.half_points(), layout)
        }
    }
}

fn table(rows: &[Vec<(bool, Vec<Block>)>], layout: &PageLayout) -> Table {
    let rows = rows
        .iter()
        .map(|row| {
            let cells = row
                .iter()
                .map(|(header, blocks)| {
                    let mut cell = TableCell::new();
                    let mut paragraphs = Vec::new();
                    cell_paragraphs(blocks, *header, layout, &mut paragraphs);
                    if paragraphs.is_empty() {
                        paragraphs.push(Paragraph::new());
                    }
                    for p in paragraphs {
                        cell = cell.add_paragraph(p);
                    }
                    cell
                })
                .collect();
            TableRow::new(cells)
        })
        .collect();
    Table::new(rows)
}

/// Cell content as plain left-aligned paragraphs; nested tables are flattened.
fn cell_paragraphs(blocks: &[Block], header: bool, layout: &PageLayout, out: &mut Vec<Paragraph>) {
    for block in blocks {
        match block {
            Block::Paragraph { pieces, .. } => {
                let pieces: Vec<Piece> = pieces
                    .iter()
                    .map(|p| match p {
                        Piece::Text { text, bold, italic } => Piece::Text {
                            text: text.clone(),
                            bold: *bold || header,
                            italic: *italic,
                        },
                        Piece::Break => Piece::Break,
                    })
                    .collect();
                let p = Paragraph::new().align(AlignmentType::Left);
                out.push(runs(p, &pieces, layout.half_points(), layout));
            }
            Block::Table(rows) => {
                for (h, cell) in rows.iter().flatten() {
                    cell_paragraphs(cell, *h, layout, out);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::ingest;

    fn texts(blocks: &[Block]) -> Vec<String> {
        blocks
            .iter()
            .map(|b| match b {
                Block::Paragraph { pieces, .. } => pieces
                    .iter()
                    .map(|p| match p {
                        Piece::Text { text, .. } => text.as_str(),
                        Piece::Break => "\n",
                    })
                    .collect(),
                Block::Table(_) => "<table>".to_string(),
            })
            .collect()
    }

    #[test]
    fn filename_rules() {
        assert_eq!(
            export_filename("DocRefine_Limpo_", Some("report.docx")),
            "DocRefine_Limpo_report.docx"
        );
        assert_eq!(
            export_filename("DocRefine_Limpo_", Some("notes")),
            "DocRefine_Limpo_notes.docx"
        );
        assert_eq!(
            export_filename("DocRefine_Limpo_", Some("REPORT.DOCX")),
            "DocRefine_Limpo_REPORT.DOCX"
        );
        assert_eq!(
            export_filename("DocRefine_Limpo_", None),
            "DocRefine_Limpo_documento.docx"
        );
        assert_eq!(
            export_filename("X_", Some("  ")),
            "X_documento.docx"
        );
        assert_eq!(
            export_filename("X_", Some("../../etc/a.docx")),
            "X_a.docx"
        );
    }

    #[test]
    fn shell_carries_css_and_body() {
        let shell = document_shell("<p>Hi</p>", &PageLayout::default());
        assert!(shell.starts_with("<!DOCTYPE html>"));
        assert!(shell.contains("margin: 3cm 2cm 2cm 3cm"));
        assert!(shell.contains("<body>\n<p>Hi</p>\n</body>"));
    }

    #[test]
    fn blocks_from_markup() {
        let shell = document_shell(
            "<h2>Scope</h2><p>Hello  <strong>bold</strong>\n world</p>\
             <ul><li>a</li><li>b</li></ul><ol><li>one</li></ol>loose",
            &PageLayout::default(),
        );
        let blocks = parse_blocks(&shell);
        assert_eq!(
            texts(&blocks),
            vec!["Scope", "Hello bold world", "a", "b", "one", "loose"]
        );
        assert!(matches!(
            blocks[0],
            Block::Paragraph {
                kind: BlockKind::Heading(2),
                ..
            }
        ));
        assert!(matches!(
            blocks[4],
            Block::Paragraph {
                kind: BlockKind::Numbered(1),
                ..
            }
        ));
    }

    #[test]
    fn empty_paragraphs_are_dropped() {
        let blocks = parse_blocks(&document_shell("<p> </p><p><br></p><p>x</p>", &PageLayout::default()));
        assert_eq!(texts(&blocks), vec!["x"]);
    }

    #[test]
    fn tables_keep_header_cells() {
        let blocks = parse_blocks(&document_shell(
            "<table><thead><tr><th>H</th></tr></thead><tbody><tr><td>1</td></tr></tbody></table>",
            &PageLayout::default(),
        ));
        match &blocks[0] {
            Block::Table(rows) => {
                assert_eq!(rows.len(), 2);
                assert!(rows[0][0].0);
                assert!(!rows[1][0].0);
            }
            other => panic!("expected table, got {other:?}"),
        }
    }

    #[test]
    fn export_produces_a_zip_named_after_the_source() {
        let config = RefineConfig::default();
        let doc = export("<p>Hello world</p>", Some("report.docx"), &config).unwrap();
        assert_eq!(doc.file_name, "DocRefine_Limpo_report.docx");
        assert_eq!(doc.mime_type, DOCX_MIME);
        assert_eq!(&doc.bytes[..4], b"PK\x03\x04");
    }

    #[test]
    fn export_rejects_empty_markup() {
        let config = RefineConfig::default();
        assert!(matches!(
            export("  ", None, &config),
            Err(DocRefineError::Export { .. })
        ));
    }

    #[test]
    fn content_free_markup_exports_a_blank_document() {
        let config = RefineConfig::default();
        let html = "<p> </p>";
        assert!(crate::pipeline::sanitize::validate_markup(html).is_ok());

        let doc = export(html, Some("blank.docx"), &config).unwrap();
        assert!(doc.bytes.starts_with(b"PK"));
        assert_eq!(doc.file_name, "DocRefine_Limpo_blank.docx");
    }

    #[test]
    fn exported_file_reads_back() {
        let config = RefineConfig::default();
        let html = "<h1>Title</h1><p>First <em>para</em>.</p>\
                    <table><tr><td>A</td><td>B</td></tr></table>";
        let doc = export(html, Some("r.docx"), &config).unwrap();
        let back = ingest::ingest(&doc.file_name, &doc.bytes).unwrap();
        for word in ["Title", "First", "para", "A", "B"] {
            assert!(back.raw_text.contains(word), "{word} missing from {:?}", back.raw_text);
        }
        assert!(back.html_content.contains("<h1>Title</h1>"));
        assert!(back.html_content.contains("<table>"));
    }

    #[test]
    fn write_export_into_directory_is_atomic() {
        let dir = tempfile::tempdir().unwrap();
        let doc = ExportedDocument {
            file_name: "DocRefine_Limpo_a.docx".into(),
            mime_type: DOCX_MIME,
            bytes: b"PK\x03\x04data".to_vec(),
        };
        let path = write_export(&doc, dir.path()).unwrap();
        assert_eq!(path, dir.path().join("DocRefine_Limpo_a.docx"));
        assert_eq!(std::fs::read(&path).unwrap(), doc.bytes);

        let entries: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1, "temporary file left behind");
    }

    #[test]
    fn write_export_to_explicit_path_creates_parents() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("out/nested/clean.docx");
        let doc = ExportedDocument {
            file_name: "ignored.docx".into(),
            mime_type: DOCX_MIME,
            bytes: vec![1, 2, 3],
        };
        assert_eq!(write_export(&doc, &target).unwrap(), target);
        assert!(target.exists());
    }
}
