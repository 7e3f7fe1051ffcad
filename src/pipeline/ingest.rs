//! Ingestion: `.docx` bytes → plain text + semantic HTML.
//!
//! A `.docx` file is a ZIP archive of WordprocessingML parts:
//!
//! - `word/document.xml`: body content (required)
//! - `word/styles.xml`: style definitions, used for heading detection
//! - `word/numbering.xml`: list definitions (bullet vs numbered)
//!
//! The body is walked once with a streaming `quick-xml` reader into a small
//! block tree, which is then rendered twice: as HTML for the preview and as
//! blank-line separated paragraphs for the model.
//!
//! Everything that goes wrong here is a [`DocRefineError::Parse`]; no
//! partial document is ever returned.

use crate::error::DocRefineError;
use crate::model::DocumentState;
use quick_xml::escape::escape;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::collections::HashMap;
use std::io::{Cursor, Read};
use tracing::{debug, info};
use zip::ZipArchive;

/// Parse `.docx` bytes into a [`DocumentState`].
pub fn ingest(file_name: &str, bytes: &[u8]) -> Result<DocumentState, DocRefineError> {
    let mut archive = ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| DocRefineError::parse(file_name, format!("not a ZIP archive: {e}")))?;

    let document_xml = read_part(&mut archive, "word/document.xml")
        .map_err(|e| DocRefineError::parse(file_name, e))?
        .ok_or_else(|| DocRefineError::parse(file_name, "missing word/document.xml"))?;

    let styles = match read_part(&mut archive, "word/styles.xml")
        .map_err(|e| DocRefineError::parse(file_name, e))?
    {
        Some(xml) => parse_styles(&xml).map_err(|e| DocRefineError::parse(file_name, e))?,
        None => HashMap::new(),
    };
    let numbering = match read_part(&mut archive, "word/numbering.xml")
        .map_err(|e| DocRefineError::parse(file_name, e))?
    {
        Some(xml) => parse_numbering(&xml).map_err(|e| DocRefineError::parse(file_name, e))?,
        None => Numbering::default(),
    };

    let body = walk_body(&document_xml, &styles, &numbering)
        .map_err(|e| DocRefineError::parse(file_name, e))?;

    let raw_text = render_text(&body.blocks);
    if raw_text.trim().is_empty() {
        return Err(DocRefineError::parse(file_name, "document contains no text"));
    }
    let html_content = render_html(&body.blocks);

    info!(
        "Ingested {}: {} blocks, {} chars, {} images",
        file_name,
        body.blocks.len(),
        raw_text.chars().count(),
        body.images
    );

    Ok(DocumentState {
        raw_text,
        html_content,
        file_name: file_name.to_string(),
        image_count: body.images,
    })
}

/// Read a ZIP member as UTF-8. `Ok(None)` if the member does not exist.
fn read_part<R: Read + std::io::Seek>(
    archive: &mut ZipArchive<R>,
    name: &str,
) -> Result<Option<String>, String> {
    let mut file = match archive.by_name(name) {
        Ok(f) => f,
        Err(zip::result::ZipError::FileNotFound) => return Ok(None),
        Err(e) => return Err(format!("cannot open {name}: {e}")),
    };
    let mut content = String::new();
    file.read_to_string(&mut content)
        .map_err(|e| format!("cannot read {name}: {e}"))?;
    Ok(Some(content))
}

// ========================================================================
// Block tree
// ========================================================================

#[derive(Debug, Clone, PartialEq)]
enum Inline {
    Text { text: String, bold: bool, italic: bool },
    Break,
    Image { alt: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParaKind {
    Normal,
    Heading(u8),
    ListItem { ordered: bool },
}

#[derive(Debug, Clone, PartialEq)]
enum Block {
    Paragraph { kind: ParaKind, inlines: Vec<Inline> },
    /// rows → cells → blocks
    Table(Vec<Vec<Vec<Block>>>),
}

struct Body {
    blocks: Vec<Block>,
    images: usize,
}

// ========================================================================
// XML helpers
// ========================================================================

/// Extract an attribute value by key from an element.
fn attr(e: &BytesStart<'_>, key: &[u8]) -> Option<String> {
    e.attributes()
        .filter_map(Result::ok)
        .find(|a| a.key.as_ref() == key)
        .map(|a| match a.unescape_value() {
            Ok(v) => v.into_owned(),
            Err(_) => String::from_utf8_lossy(&a.value).into_owned(),
        })
}

/// `<w:b/>` is on; `<w:b w:val="0"/>` and `w:val="false"` are off.
fn toggle_on(e: &BytesStart<'_>) -> bool {
    !matches!(attr(e, b"w:val").as_deref(), Some("0" | "false" | "none"))
}

// ========================================================================
// styles.xml
// ========================================================================

/// styleId → heading level (1-based).
type StyleMap = HashMap<String, u8>;

fn parse_styles(xml: &str) -> Result<StyleMap, String> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut map = StyleMap::new();
    let mut current: Option<String> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) if e.name().as_ref() == b"w:style" => {
                current = attr(&e, b"w:styleId");
            }
            Ok(Event::Empty(e)) if e.name().as_ref() == b"w:outlineLvl" => {
                if let (Some(id), Some(level)) = (
                    current.as_ref(),
                    attr(&e, b"w:val").and_then(|v| v.parse::<u8>().ok()),
                ) {
                    if level < 6 {
                        map.insert(id.clone(), level + 1);
                    }
                }
            }
            Ok(Event::End(e)) if e.name().as_ref() == b"w:style" => current = None,
            Ok(Event::Eof) => break,
            Err(e) => return Err(format!("styles.xml: {e}")),
            _ => {}
        }
    }
    debug!("styles.xml: {} heading styles", map.len());
    Ok(map)
}

/// Heading level implied by a style id when styles.xml says nothing.
fn heading_from_style_id(style: &str) -> Option<u8> {
    if style.eq_ignore_ascii_case("title") {
        return Some(1);
    }
    let lower = style.to_ascii_lowercase();
    let rest = lower.strip_prefix("heading")?.trim_start();
    rest.parse::<u8>().ok().filter(|l| (1..=6).contains(l))
}

// ========================================================================
// numbering.xml
// ========================================================================

#[derive(Debug, Default)]
struct Numbering {
    /// numId → abstractNumId
    instances: HashMap<String, String>,
    /// abstractNumId → level-0 numFmt is not "bullet"
    ordered: HashMap<String, bool>,
}

impl Numbering {
    fn is_ordered(&self, num_id: &str) -> bool {
        self.instances
            .get(num_id)
            .and_then(|abs| self.ordered.get(abs))
            .copied()
            .unwrap_or(false)
    }
}

fn parse_numbering(xml: &str) -> Result<Numbering, String> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut numbering = Numbering::default();
    let mut abstract_id: Option<String> = None;
    let mut level: Option<String> = None;
    let mut num_id: Option<String> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => match e.name().as_ref() {
                b"w:abstractNum" => abstract_id = attr(&e, b"w:abstractNumId"),
                b"w:lvl" => level = attr(&e, b"w:ilvl"),
                b"w:num" => num_id = attr(&e, b"w:numId"),
                _ => {}
            },
            Ok(Event::Empty(e)) => match e.name().as_ref() {
                b"w:numFmt" if level.as_deref() == Some("0") => {
                    if let (Some(abs), Some(fmt)) = (abstract_id.as_ref(), attr(&e, b"w:val")) {
                        numbering.ordered.insert(abs.clone(), fmt != "bullet");
                    }
                }
                b"w:abstractNumId" => {
                    if let (Some(num), Some(abs)) = (num_id.as_ref(), attr(&e, b"w:val")) {
                        numbering.instances.insert(num.clone(), abs);
                    }
                }
                _ => {}
            },
            Ok(Event::End(e)) => match e.name().as_ref() {
                b"w:abstractNum" => abstract_id = None,
                b"w:lvl" => level = None,
                b"w:num" => num_id = None,
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(format!("numbering.xml: {e}")),
            _ => {}
        }
    }
    Ok(numbering)
}

// ========================================================================
// document.xml
// ========================================================================

#[derive(Default)]
struct ParaBuilder {
    style: Option<String>,
    outline_level: Option<u8>,
    num_id: Option<String>,
    inlines: Vec<Inline>,
    /// Formatting of the run being read.
    bold: bool,
    italic: bool,
}

impl ParaBuilder {
    fn finish(self, styles: &StyleMap, numbering: &Numbering) -> Block {
        let heading = self.outline_level.or_else(|| {
            self.style.as_deref().and_then(|s| {
                styles
                    .get(s)
                    .copied()
                    .or_else(|| heading_from_style_id(s))
            })
        });

        let kind = match (heading, self.num_id.as_deref()) {
            (Some(level), _) => ParaKind::Heading(level.clamp(1, 6)),
            (None, Some(id)) if id != "0" => ParaKind::ListItem {
                ordered: numbering.is_ordered(id),
            },
            _ => ParaKind::Normal,
        };
        Block::Paragraph {
            kind,
            inlines: self.inlines,
        }
    }
}

#[derive(Default)]
struct TableBuilder {
    rows: Vec<Vec<Vec<Block>>>,
}

/// Walk state shared by the start/empty/end handlers.
///
/// Paragraphs nest: a text box inside a run carries paragraphs of its own,
/// so open paragraphs form a stack and the innermost one receives runs.
struct Walker<'s> {
    styles: &'s StyleMap,
    numbering: &'s Numbering,
    blocks: Vec<Block>,
    tables: Vec<TableBuilder>,
    paras: Vec<ParaBuilder>,
    in_ppr: bool,
    in_rpr: bool,
    in_text: bool,
    /// Depth inside `mc:Fallback`, which repeats the `mc:Choice` content.
    fallback_depth: usize,
    /// Alt text of the drawing being read, used by its image reference.
    drawing_alt: Option<String>,
    images: usize,
}

impl<'s> Walker<'s> {
    fn new(styles: &'s StyleMap, numbering: &'s Numbering) -> Self {
        Self {
            styles,
            numbering,
            blocks: Vec::new(),
            tables: Vec::new(),
            paras: Vec::new(),
            in_ppr: false,
            in_rpr: false,
            in_text: false,
            fallback_depth: 0,
            drawing_alt: None,
            images: 0,
        }
    }

    /// Where finished blocks go: the innermost open table cell, or the body.
    fn push_block(&mut self, block: Block) {
        let cell = self
            .tables
            .last_mut()
            .and_then(|t| t.rows.last_mut())
            .and_then(|r| r.last_mut());
        match cell {
            Some(cell) => cell.push(block),
            None => self.blocks.push(block),
        }
    }

    fn para(&mut self) -> Option<&mut ParaBuilder> {
        self.paras.last_mut()
    }

    fn push_inline(&mut self, inline: Inline) {
        if let Some(p) = self.para() {
            p.inlines.push(inline);
        }
    }

    fn open(&mut self, e: &BytesStart<'_>, is_empty: bool) {
        match e.name().as_ref() {
            b"w:p" => {
                self.paras.push(ParaBuilder::default());
                if is_empty {
                    self.close_paragraph();
                }
            }
            b"w:pPr" if !is_empty => self.in_ppr = true,
            b"w:rPr" if !is_empty => self.in_rpr = true,
            b"w:pStyle" if self.in_ppr => {
                if let Some(p) = self.para() {
                    p.style = attr(e, b"w:val");
                }
            }
            b"w:outlineLvl" if self.in_ppr => {
                let level = attr(e, b"w:val").and_then(|v| v.parse::<u8>().ok());
                if let (Some(p), Some(level)) = (self.paras.last_mut(), level) {
                    if level < 6 {
                        p.outline_level = Some(level + 1);
                    }
                }
            }
            b"w:numId" if self.in_ppr => {
                if let Some(p) = self.para() {
                    p.num_id = attr(e, b"w:val");
                }
            }
            b"w:r" => {
                if let Some(p) = self.para() {
                    p.bold = false;
                    p.italic = false;
                }
            }
            // Paragraph-mark formatting inside pPr does not apply to runs.
            b"w:b" if self.in_rpr && !self.in_ppr => {
                let on = toggle_on(e);
                if let Some(p) = self.para() {
                    p.bold = on;
                }
            }
            b"w:i" if self.in_rpr && !self.in_ppr => {
                let on = toggle_on(e);
                if let Some(p) = self.para() {
                    p.italic = on;
                }
            }
            b"w:t" if !is_empty => self.in_text = true,
            b"w:tab" if !self.in_ppr => self.push_text("\t"),
            b"w:br" | b"w:cr" => self.push_inline(Inline::Break),
            b"w:drawing" => self.drawing_alt = None,
            // A drawing is only an image when it references one: text boxes
            // and shapes carry a docPr too.
            b"wp:docPr" => {
                self.drawing_alt = attr(e, b"descr")
                    .filter(|d| !d.trim().is_empty())
                    .or_else(|| attr(e, b"name"));
            }
            b"a:blip" => {
                self.images += 1;
                let alt = self.drawing_alt.take().unwrap_or_default();
                self.push_inline(Inline::Image { alt });
            }
            b"v:imagedata" => {
                self.images += 1;
                let alt = attr(e, b"o:title").unwrap_or_default();
                self.push_inline(Inline::Image { alt });
            }
            b"w:tbl" if !is_empty => self.tables.push(TableBuilder::default()),
            b"w:tr" if !is_empty => {
                if let Some(t) = self.tables.last_mut() {
                    t.rows.push(Vec::new());
                }
            }
            b"w:tc" if !is_empty => {
                if let Some(row) = self.tables.last_mut().and_then(|t| t.rows.last_mut()) {
                    row.push(Vec::new());
                }
            }
            _ => {}
        }
    }

    fn close(&mut self, name: &[u8]) {
        match name {
            b"w:p" => self.close_paragraph(),
            b"w:pPr" => self.in_ppr = false,
            b"w:rPr" => self.in_rpr = false,
            b"w:t" => self.in_text = false,
            b"w:tbl" => {
                if let Some(table) = self.tables.pop() {
                    self.push_block(Block::Table(table.rows));
                }
            }
            _ => {}
        }
    }

    fn close_paragraph(&mut self) {
        if let Some(p) = self.paras.pop() {
            let block = p.finish(self.styles, self.numbering);
            self.push_block(block);
        }
    }

    fn push_text(&mut self, text: &str) {
        let Some(p) = self.paras.last_mut() else {
            return;
        };
        let (bold, italic) = (p.bold, p.italic);
        // Merge with the previous run when the formatting matches.
        if let Some(Inline::Text {
            text: prev,
            bold: b,
            italic: i,
        }) = p.inlines.last_mut()
        {
            if *b == bold && *i == italic {
                prev.push_str(text);
                return;
            }
        }
        p.inlines.push(Inline::Text {
            text: text.to_string(),
            bold,
            italic,
        });
    }
}

fn walk_body(xml: &str, styles: &StyleMap, numbering: &Numbering) -> Result<Body, String> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(false);

    let mut walker = Walker::new(styles, numbering);

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) if e.name().as_ref() == b"mc:Fallback" => {
                walker.fallback_depth += 1;
            }
            Ok(Event::End(e)) if e.name().as_ref() == b"mc:Fallback" => {
                walker.fallback_depth = walker.fallback_depth.saturating_sub(1);
            }
            Ok(Event::Eof) => break,
            Ok(_) if walker.fallback_depth > 0 => {}
            Ok(Event::Start(e)) => walker.open(&e, false),
            Ok(Event::Empty(e)) => walker.open(&e, true),
            Ok(Event::End(e)) => walker.close(e.name().as_ref()),
            Ok(Event::Text(t)) if walker.in_text => {
                let text = t
                    .unescape()
                    .map_err(|e| format!("document.xml: bad text: {e}"))?;
                walker.push_text(&text);
            }
            Err(e) => {
                return Err(format!(
                    "document.xml: malformed XML at byte {}: {e}",
                    reader.buffer_position()
                ))
            }
            _ => {}
        }
    }

    // Unterminated tables still carry content worth keeping.
    while let Some(table) = walker.tables.pop() {
        walker.push_block(Block::Table(table.rows));
    }

    Ok(Body {
        blocks: walker.blocks,
        images: walker.images,
    })
}

// ========================================================================
// Rendering
// ========================================================================

fn inlines_text(inlines: &[Inline]) -> String {
    let mut out = String::new();
    for inline in inlines {
        match inline {
            Inline::Text { text, .. } => out.push_str(text),
            Inline::Break => out.push('\n'),
            Inline::Image { .. } => {}
        }
    }
    out
}

/// Paragraphs separated by blank lines; table cells contribute their
/// paragraphs in reading order.
fn render_text(blocks: &[Block]) -> String {
    fn walk(blocks: &[Block], out: &mut String) {
        for block in blocks {
            match block {
                Block::Paragraph { inlines, .. } => {
                    let text = inlines_text(inlines);
                    if !text.trim().is_empty() {
                        out.push_str(&text);
                        out.push_str("\n\n");
                    }
                }
                Block::Table(rows) => {
                    for cell in rows.iter().flatten() {
                        walk(cell, out);
                    }
                }
            }
        }
    }

    let mut out = String::new();
    walk(blocks, &mut out);
    out.trim_end().to_string()
}

fn render_inlines(inlines: &[Inline], out: &mut String) {
    for inline in inlines {
        match inline {
            Inline::Text { text, bold, italic } => {
                if *bold {
                    out.push_str("<strong>");
                }
                if *italic {
                    out.push_str("<em>");
                }
                out.push_str(&escape(text.as_str()));
                if *italic {
                    out.push_str("</em>");
                }
                if *bold {
                    out.push_str("</strong>");
                }
            }
            Inline::Break => out.push_str("<br />"),
            Inline::Image { alt } => {
                out.push_str("<img alt=\"");
                out.push_str(&escape(alt.as_str()));
                out.push_str("\" />");
            }
        }
    }
}

fn is_blank(inlines: &[Inline]) -> bool {
    inlines.iter().all(|i| match i {
        Inline::Text { text, .. } => text.trim().is_empty(),
        Inline::Break => true,
        Inline::Image { .. } => false,
    })
}

fn render_html(blocks: &[Block]) -> String {
    let mut out = String::new();
    render_blocks(blocks, &mut out);
    out
}

fn render_blocks(blocks: &[Block], out: &mut String) {
    // Open list, if any: `Some(true)` for <ol>, `Some(false)` for <ul>.
    let mut open_list: Option<bool> = None;

    for block in blocks {
        let list_kind = match block {
            Block::Paragraph {
                kind: ParaKind::ListItem { ordered },
                ..
            } => Some(*ordered),
            _ => None,
        };
        if open_list.is_some() && open_list != list_kind {
            out.push_str(if open_list == Some(true) { "</ol>" } else { "</ul>" });
            open_list = None;
        }

        match block {
            Block::Paragraph { kind, inlines } => {
                if is_blank(inlines) {
                    continue;
                }
                match kind {
                    ParaKind::Normal => {
                        out.push_str("<p>");
                        render_inlines(inlines, out);
                        out.push_str("</p>");
                    }
                    ParaKind::Heading(level) => {
                        out.push_str(&format!("<h{level}>"));
                        render_inlines(inlines, out);
                        out.push_str(&format!("</h{level}>"));
                    }
                    ParaKind::ListItem { ordered } => {
                        if open_list.is_none() {
                            out.push_str(if *ordered { "<ol>" } else { "<ul>" });
                            open_list = Some(*ordered);
                        }
                        out.push_str("<li>");
                        render_inlines(inlines, out);
                        out.push_str("</li>");
                    }
                }
            }
            Block::Table(rows) => {
                out.push_str("<table>");
                for row in rows {
                    out.push_str("<tr>");
                    for cell in row {
                        out.push_str("<td>");
                        render_blocks(cell, out);
                        out.push_str("</td>");
                    }
                    out.push_str("</tr>");
                }
                out.push_str("</table>");
            }
        }
    }

    if let Some(ordered) = open_list {
        out.push_str(if ordered { "</ol>" } else { "</ul>" });
    }
}
