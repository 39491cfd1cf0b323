//! Page-preserving text extraction for uploaded documents.
//!
//! PDFs yield one page per PDF page, spreadsheets one page per worksheet, and plain
//! text or markdown is split on form feeds.

use quick_xml::events::Event;
use quick_xml::Reader;
use std::io::{Cursor, Read};

use crate::domain::{
    ports::{ExtractedText, TextExtractor},
    ContentType, DomainError,
};

const PAGE_BREAK: char = '\x0c';
const XLSX_MAX_SHEETS: usize = 100;
const XLSX_MAX_CELLS_PER_SHEET: usize = 100_000;
/// Decompressed size cap for a single archive entry.
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

type Archive<'a> = zip::ZipArchive<Cursor<&'a [u8]>>;

#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultExtractor;

impl TextExtractor for DefaultExtractor {
    fn extract(
        &self,
        content: &[u8],
        content_type: ContentType,
    ) -> Result<ExtractedText, DomainError> {
        let pages = match content_type {
            ContentType::Pdf => extract_pdf(content)?,
            ContentType::Xlsx => extract_xlsx(content)?,
            ContentType::PlainText | ContentType::Markdown => extract_plain(content)?,
        };
        Ok(ExtractedText { pages })
    }
}

fn extract_plain(content: &[u8]) -> Result<Vec<String>, DomainError> {
    let text = std::str::from_utf8(content)
        .map_err(|e| DomainError::invalid(format!("text is not valid UTF-8: {e}")))?;
    Ok(text.split(PAGE_BREAK).map(str::to_string).collect())
}

fn extract_pdf(content: &[u8]) -> Result<Vec<String>, DomainError> {
    pdf_extract::extract_text_from_mem_by_pages(content)
        .map_err(|e| DomainError::invalid(format!("PDF extraction failed: {e}")))
}

fn ooxml_err(e: impl std::fmt::Display) -> DomainError {
    DomainError::invalid(format!("spreadsheet extraction failed: {e}"))
}

fn extract_xlsx(content: &[u8]) -> Result<Vec<String>, DomainError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(content)).map_err(ooxml_err)?;
    let shared_strings = read_shared_strings(&mut archive)?;

    let mut pages = Vec::new();
    for name in worksheet_names(&archive).into_iter().take(XLSX_MAX_SHEETS) {
        let xml = read_entry_bounded(&mut archive, &name)?;
        pages.push(sheet_text(&xml, &shared_strings)?);
    }
    Ok(pages)
}

fn read_entry_bounded(archive: &mut Archive<'_>, name: &str) -> Result<Vec<u8>, DomainError> {
    let entry = archive.by_name(name).map_err(ooxml_err)?;
    let mut out = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut out)
        .map_err(ooxml_err)?;
    if out.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(ooxml_err(format!("entry {name} exceeds size limit")));
    }
    Ok(out)
}

/// Workbooks holding only numbers have no shared string table.
fn read_shared_strings(archive: &mut Archive<'_>) -> Result<Vec<String>, DomainError> {
    const NAME: &str = "xl/sharedStrings.xml";
    if archive.index_for_name(NAME).is_none() {
        return Ok(Vec::new());
    }
    let xml = read_entry_bounded(archive, NAME)?;

    let mut strings = Vec::new();
    let mut current: Option<String> = None;
    let mut in_t = false;
    let mut reader = Reader::from_reader(xml.as_slice());
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf).map_err(ooxml_err)? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"si" => current = Some(String::new()),
                b"t" => in_t = true,
                _ => {}
            },
            Event::Text(te) if in_t => {
                if let Some(s) = current.as_mut() {
                    s.push_str(&te.unescape().map_err(ooxml_err)?);
                }
            }
            Event::End(e) => match e.local_name().as_ref() {
                b"si" => strings.extend(current.take()),
                b"t" => in_t = false,
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(strings)
}

fn worksheet_names(archive: &Archive<'_>) -> Vec<String> {
    let mut names: Vec<String> = archive
        .file_names()
        .filter(|n| n.starts_with("xl/worksheets/sheet") && n.ends_with(".xml"))
        .map(str::to_string)
        .collect();
    names.sort_by_key(|name| {
        name.trim_start_matches("xl/worksheets/sheet")
            .trim_end_matches(".xml")
            .parse::<u32>()
            .unwrap_or(u32::MAX)
    });
    names
}

#[derive(Clone, Copy, PartialEq)]
enum CellKind {
    Shared,
    Inline,
    Value,
}

/// Renders a worksheet as one line per row, cells separated by ` | `.
fn sheet_text(xml: &[u8], shared_strings: &[String]) -> Result<String, DomainError> {
    let mut lines: Vec<String> = Vec::new();
    let mut row: Vec<String> = Vec::new();
    let mut kind = CellKind::Value;
    let mut in_value = false;
    let mut cells = 0usize;

    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();
    loop {
        if cells >= XLSX_MAX_CELLS_PER_SHEET {
            break;
        }
        match reader.read_event_into(&mut buf).map_err(ooxml_err)? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"c" => {
                    kind = CellKind::Value;
                    for attr in e.attributes().flatten() {
                        if attr.key.as_ref() == b"t" {
                            kind = match attr.value.as_ref() {
                                b"s" => CellKind::Shared,
                                b"inlineStr" => CellKind::Inline,
                                _ => CellKind::Value,
                            };
                        }
                    }
                }
                b"v" => in_value = true,
                b"t" if kind == CellKind::Inline => in_value = true,
                _ => {}
            },
            Event::Text(te) if in_value => {
                let raw = te.unescape().map_err(ooxml_err)?;
                let raw = raw.trim();
                let text = match kind {
                    CellKind::Shared => raw
                        .parse::<usize>()
                        .ok()
                        .and_then(|i| shared_strings.get(i))
                        .cloned(),
                    CellKind::Inline | CellKind::Value => Some(raw.to_string()),
                };
                if let Some(text) = text.filter(|t| !t.trim().is_empty()) {
                    row.push(text);
                    cells += 1;
                }
            }
            Event::End(e) => match e.local_name().as_ref() {
                b"v" | b"t" => in_value = false,
                b"row" if !row.is_empty() => lines.push(std::mem::take(&mut row).join(" | ")),
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    if !row.is_empty() {
        lines.push(row.join(" | "));
    }
    Ok(lines.join("\n"))
}
