//! Format dispatch and structured-text extraction.
//!
//! [`DocumentFormat`] is a closed table from file extension to extractor.
//! Unknown or missing extensions fall back to [`DocumentFormat::Raw`], a
//! lossy UTF-8 read of the bytes, so an unfamiliar file never fails a
//! reference on format grounds alone.
//!
//! | Extension | Format | Documents produced |
//! |-----------|--------|--------------------|
//! | `.pdf` | [`Pdf`](DocumentFormat::Pdf) | one |
//! | `.csv` | [`Csv`](DocumentFormat::Csv) | one (`", "` between cells, newline between rows) |
//! | `.docx` | [`Docx`](DocumentFormat::Docx) | one (one line per paragraph) |
//! | `.html` | [`Html`](DocumentFormat::Html) | one (visible text only) |
//! | `.md` | [`Markdown`](DocumentFormat::Markdown) | one per heading section |
//! | `.txt` | [`Text`](DocumentFormat::Text) | one (must be valid UTF-8) |
//! | other | [`Raw`](DocumentFormat::Raw) | one |

use std::io::Read;

use pulldown_cmark::{Event, Parser, Tag};
use scraper::{ElementRef, Html, Node};
use thiserror::Error;

use crate::references::final_segment_extension;

pub const MIME_PDF: &str = "application/pdf";
pub const MIME_DOCX: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
pub const MIME_HTML: &str = "text/html";
pub const MIME_XHTML: &str = "application/xhtml+xml";
pub const MIME_CSV: &str = "text/csv";
pub const MIME_MARKDOWN: &str = "text/markdown";
pub const MIME_TEXT: &str = "text/plain";

/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

const HTML_SKIP_TAGS: &[&str] = &["script", "style", "noscript", "svg", "template"];
const HTML_BLOCK_TAGS: &[&str] = &[
    "p", "div", "br", "li", "tr", "h1", "h2", "h3", "h4", "h5", "h6", "section", "article",
    "header", "footer", "pre", "blockquote", "table", "ul", "ol", "title",
];

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
    #[error("OOXML extraction failed: {0}")]
    Ooxml(String),
    #[error("CSV extraction failed: {0}")]
    Csv(String),
    #[error("{0} content is not valid UTF-8")]
    Encoding(&'static str),
}

/// Text produced by an extractor, tagged with where it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawDocument {
    pub text: String,
    pub source: String,
}

impl RawDocument {
    pub fn new(text: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            source: source.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Pdf,
    Csv,
    Docx,
    Html,
    Markdown,
    Text,
    Raw,
}

impl DocumentFormat {
    pub fn from_extension(ext: Option<&str>) -> Self {
        match ext.map(|e| e.to_ascii_lowercase()).as_deref() {
            Some("pdf") => DocumentFormat::Pdf,
            Some("csv") => DocumentFormat::Csv,
            Some("docx") => DocumentFormat::Docx,
            Some("html") => DocumentFormat::Html,
            Some("md") => DocumentFormat::Markdown,
            Some("txt") => DocumentFormat::Text,
            _ => DocumentFormat::Raw,
        }
    }

    /// Resolve by the extension of the final path segment.
    pub fn from_path(path: &str) -> Self {
        Self::from_extension(final_segment_extension(path).as_deref())
    }

    /// Resolve a fetched URL: a known extension wins, otherwise the
    /// response content type decides.
    pub fn for_url(path_extension: Option<&str>, content_type: Option<&str>) -> Self {
        let by_ext = Self::from_extension(path_extension);
        if by_ext != DocumentFormat::Raw {
            return by_ext;
        }
        let mime = content_type
            .and_then(|ct| ct.split(';').next())
            .map(|m| m.trim().to_ascii_lowercase());
        match mime.as_deref() {
            Some(MIME_PDF) => DocumentFormat::Pdf,
            Some(MIME_DOCX) => DocumentFormat::Docx,
            Some(MIME_HTML) | Some(MIME_XHTML) => DocumentFormat::Html,
            Some(MIME_CSV) => DocumentFormat::Csv,
            Some(MIME_MARKDOWN) => DocumentFormat::Markdown,
            Some(MIME_TEXT) => DocumentFormat::Text,
            _ => DocumentFormat::Raw,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            DocumentFormat::Pdf => "pdf",
            DocumentFormat::Csv => "csv",
            DocumentFormat::Docx => "docx",
            DocumentFormat::Html => "html",
            DocumentFormat::Markdown => "markdown",
            DocumentFormat::Text => "text",
            DocumentFormat::Raw => "raw",
        }
    }

    /// Extract the text documents contained in `bytes`.
    pub fn extract(&self, bytes: &[u8]) -> Result<Vec<String>, ExtractError> {
        match self {
            DocumentFormat::Pdf => extract_pdf(bytes).map(|t| vec![t]),
            DocumentFormat::Csv => extract_csv(bytes).map(|t| vec![t]),
            DocumentFormat::Docx => extract_docx(bytes).map(|t| vec![t]),
            DocumentFormat::Html => Ok(vec![extract_html(bytes)]),
            DocumentFormat::Markdown => extract_markdown(bytes),
            DocumentFormat::Text => extract_utf8(bytes).map(|t| vec![t]),
            DocumentFormat::Raw => Ok(vec![String::from_utf8_lossy(bytes).into_owned()]),
        }
    }

    /// Extract and tag every document with `source`. Always yields at least
    /// one document, possibly with empty text.
    pub fn load_documents(
        &self,
        bytes: &[u8],
        source: &str,
    ) -> Result<Vec<RawDocument>, ExtractError> {
        let mut docs: Vec<RawDocument> = self
            .extract(bytes)?
            .into_iter()
            .map(|text| RawDocument::new(text, source))
            .collect();
        if docs.is_empty() {
            docs.push(RawDocument::new(String::new(), source));
        }
        Ok(docs)
    }
}

fn extract_pdf(bytes: &[u8]) -> Result<String, ExtractError> {
    pdf_extract::extract_text_from_mem(bytes).map_err(|e| ExtractError::Pdf(e.to_string()))
}

fn extract_utf8(bytes: &[u8]) -> Result<String, ExtractError> {
    let text = std::str::from_utf8(bytes).map_err(|_| ExtractError::Encoding("text"))?;
    Ok(text.trim_start_matches('\u{feff}').to_string())
}

fn extract_csv(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(bytes);
    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| ExtractError::Csv(e.to_string()))?;
        rows.push(record.iter().collect::<Vec<_>>().join(", "));
    }
    Ok(rows.join("\n"))
}

fn read_zip_entry_bounded(
    archive: &mut zip::ZipArchive<std::io::Cursor<&[u8]>>,
    name: &str,
    max_bytes: u64,
) -> Result<Vec<u8>, ExtractError> {
    let entry = archive
        .by_name(name)
        .map_err(|e| ExtractError::Ooxml(format!("{}: {}", name, e)))?;
    let mut out = Vec::new();
    entry
        .take(max_bytes)
        .read_to_end(&mut out)
        .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
    if out.len() as u64 >= max_bytes {
        return Err(ExtractError::Ooxml(format!(
            "ZIP entry {} exceeds size limit ({} bytes)",
            name, max_bytes
        )));
    }
    Ok(out)
}

fn extract_docx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
    let xml = read_zip_entry_bounded(&mut archive, "word/document.xml", MAX_XML_ENTRY_BYTES)?;
    docx_paragraphs(&xml)
}

/// Collect `<w:t>` runs, one line per `<w:p>` paragraph.
fn docx_paragraphs(xml: &[u8]) -> Result<String, ExtractError> {
    use quick_xml::events::Event as XmlEvent;

    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut lines: Vec<String> = Vec::new();
    let mut line = String::new();
    let mut in_text = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(XmlEvent::Start(e)) if e.local_name().as_ref() == b"t" => in_text = true,
            Ok(XmlEvent::Text(te)) if in_text => {
                let text = te
                    .unescape()
                    .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
                line.push_str(&text);
            }
            Ok(XmlEvent::Empty(e)) => match e.local_name().as_ref() {
                b"tab" => line.push('\t'),
                b"br" => line.push('\n'),
                _ => {}
            },
            Ok(XmlEvent::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => lines.push(std::mem::take(&mut line)),
                _ => {}
            },
            Ok(XmlEvent::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    if !line.is_empty() {
        lines.push(line);
    }
    Ok(lines
        .into_iter()
        .filter(|l| !l.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n"))
}

fn extract_html(bytes: &[u8]) -> String {
    let source = String::from_utf8_lossy(bytes);
    let document = Html::parse_document(&source);
    let mut out = String::new();
    collect_html_text(document.root_element(), &mut out);

    out.lines()
        .map(|l| l.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn collect_html_text(element: ElementRef<'_>, out: &mut String) {
    for child in element.children() {
        match child.value() {
            Node::Text(text) => out.push_str(text),
            Node::Element(el) => {
                if HTML_SKIP_TAGS.contains(&el.name()) {
                    continue;
                }
                if let Some(child_el) = ElementRef::wrap(child) {
                    collect_html_text(child_el, out);
                }
                if HTML_BLOCK_TAGS.contains(&el.name()) {
                    out.push('\n');
                }
            }
            _ => {}
        }
    }
}

/// Split markdown into heading-delimited sections. Text before the first
/// heading forms its own section.
fn extract_markdown(bytes: &[u8]) -> Result<Vec<String>, ExtractError> {
    let source = std::str::from_utf8(bytes).map_err(|_| ExtractError::Encoding("markdown"))?;
    let mut sections = Vec::new();
    let mut current = String::new();

    for event in Parser::new(source) {
        match event {
            Event::Start(Tag::Heading(..)) => flush_section(&mut sections, &mut current),
            Event::End(Tag::Heading(..))
            | Event::End(Tag::Paragraph)
            | Event::End(Tag::Item)
            | Event::End(Tag::CodeBlock(_)) => current.push('\n'),
            Event::Text(text) | Event::Code(text) => current.push_str(&text),
            Event::SoftBreak | Event::HardBreak => current.push('\n'),
            _ => {}
        }
    }
    flush_section(&mut sections, &mut current);
    Ok(sections)
}

fn flush_section(sections: &mut Vec<String>, current: &mut String) {
    let section = current.trim();
    if !section.is_empty() {
        sections.push(section.to_string());
    }
    current.clear();
}
