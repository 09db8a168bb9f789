//! Per-format text extraction from a staged file.

use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::sync::LazyLock;

use pulldown_cmark::{Event, Options, Parser, Tag, TagEnd};
use regex::Regex;

use crate::document::{DocumentFormat, PAGE_KEY, ROW_KEY, TextSegment};
use crate::error::{RagError, Result};

const FORM_FEED: char = '\u{c}';
const BOM: &str = "\u{feff}";

// Self-closing `<w:t .../>` runs are empty and must not open a text match.
static DOCX_TOKENS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<w:t(?:\s[^>]*[^/>])?>(.*?)</w:t>|</w:p>|<w:tab\s*/>|<w:(?:br|cr)\s*/>")
        .expect("docx token pattern is valid")
});

static XML_ENTITY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"&(?:#x([0-9A-Fa-f]+)|#([0-9]+)|(lt|gt|quot|apos|amp));")
        .expect("xml entity pattern is valid")
});

pub(super) fn extract(format: DocumentFormat, path: &Path, source: &str) -> Result<Vec<TextSegment>> {
    match format {
        DocumentFormat::Pdf => extract_pdf(path, source),
        DocumentFormat::Docx => extract_docx(path, source),
        DocumentFormat::Text => extract_text(path, source),
        DocumentFormat::Csv => extract_csv(path, source),
        DocumentFormat::Markdown => extract_markdown(path, source),
    }
}

fn read_utf8(path: &Path, format: DocumentFormat, source: &str) -> Result<String> {
    let bytes = std::fs::read(path)?;
    let text = String::from_utf8(bytes)
        .map_err(|e| RagError::parse(format.to_string(), source, format!("invalid UTF-8: {e}")))?;
    Ok(text.strip_prefix(BOM).map(str::to_string).unwrap_or(text))
}

fn extract_pdf(path: &Path, source: &str) -> Result<Vec<TextSegment>> {
    let pages = pdf_extract::extract_text_by_pages(path)
        .map_err(|e| RagError::parse("pdf", source, e.to_string()))?;

    Ok(pages
        .into_iter()
        .enumerate()
        .filter(|(_, text)| !text.trim().is_empty())
        .map(|(i, text)| TextSegment::new(text, source).with_metadata(PAGE_KEY, i + 1))
        .collect())
}

fn extract_docx(path: &Path, source: &str) -> Result<Vec<TextSegment>> {
    let file = File::open(path)?;
    let mut archive =
        zip::ZipArchive::new(file).map_err(|e| RagError::parse("docx", source, e.to_string()))?;
    let mut xml = String::new();
    archive
        .by_name("word/document.xml")
        .map_err(|e| RagError::parse("docx", source, format!("missing word/document.xml: {e}")))?
        .read_to_string(&mut xml)
        .map_err(|e| RagError::parse("docx", source, e.to_string()))?;

    let mut text = String::new();
    for token in DOCX_TOKENS.captures_iter(&xml) {
        match token.get(1) {
            Some(run) => text.push_str(&unescape_xml(run.as_str())),
            None => match &token[0] {
                "</w:p>" => text.push_str("\n\n"),
                t if t.starts_with("<w:tab") => text.push('\t'),
                _ => text.push('\n'),
            },
        }
    }

    Ok(vec![TextSegment::new(text.trim(), source)])
}

fn unescape_xml(raw: &str) -> String {
    XML_ENTITY
        .replace_all(raw, |caps: &regex::Captures<'_>| {
            let code = match (caps.get(1), caps.get(2)) {
                (Some(hex), _) => u32::from_str_radix(hex.as_str(), 16).ok(),
                (_, Some(dec)) => dec.as_str().parse().ok(),
                _ => None,
            };
            if let Some(code) = code {
                return char::from_u32(code).map_or_else(|| caps[0].to_string(), String::from);
            }
            match &caps[3] {
                "lt" => "<",
                "gt" => ">",
                "quot" => "\"",
                "apos" => "'",
                _ => "&",
            }
            .to_string()
        })
        .into_owned()
}

fn extract_text(path: &Path, source: &str) -> Result<Vec<TextSegment>> {
    let text = read_utf8(path, DocumentFormat::Text, source)?;
    if !text.contains(FORM_FEED) {
        return Ok(vec![TextSegment::new(text, source)]);
    }

    Ok(text
        .split(FORM_FEED)
        .enumerate()
        .filter(|(_, page)| !page.trim().is_empty())
        .map(|(i, page)| TextSegment::new(page, source).with_metadata(PAGE_KEY, i + 1))
        .collect())
}

fn extract_csv(path: &Path, source: &str) -> Result<Vec<TextSegment>> {
    let parse_err = |e: csv::Error| RagError::parse("csv", source, e.to_string());

    let mut reader =
        csv::ReaderBuilder::new().has_headers(true).flexible(true).from_path(path).map_err(parse_err)?;
    let headers = reader.headers().map_err(parse_err)?.clone();

    let mut segments = Vec::new();
    for (row, record) in reader.records().enumerate() {
        let record = record.map_err(parse_err)?;
        let text = headers
            .iter()
            .zip(record.iter())
            .map(|(column, value)| format!("{}: {}", column.trim(), value.trim()))
            .collect::<Vec<_>>()
            .join("\n");
        segments.push(TextSegment::new(text, source).with_metadata(ROW_KEY, row));
    }

    Ok(segments)
}

fn extract_markdown(path: &Path, source: &str) -> Result<Vec<TextSegment>> {
    let markdown = read_utf8(path, DocumentFormat::Markdown, source)?;
    let mut text = String::new();

    for event in Parser::new_ext(&markdown, Options::ENABLE_TABLES) {
        match event {
            Event::Start(Tag::Heading { level, .. }) => {
                text.push('\n');
                text.push_str(&"#".repeat(level as usize));
                text.push(' ');
            }
            Event::Start(Tag::Item) => text.push_str("- "),
            Event::End(
                TagEnd::Heading(_) | TagEnd::Item | TagEnd::TableHead | TagEnd::TableRow,
            ) => text.push('\n'),
            Event::End(TagEnd::Paragraph | TagEnd::CodeBlock | TagEnd::Table) => {
                text.push_str("\n\n");
            }
            Event::End(TagEnd::TableCell) => text.push_str(" | "),
            Event::Text(t) | Event::Code(t) => text.push_str(&t),
            Event::SoftBreak | Event::HardBreak => text.push('\n'),
            _ => {}
        }
    }

    Ok(vec![TextSegment::new(text.trim(), source)])
}
