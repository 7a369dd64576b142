//! Format-specific text extraction.
//!
//! Converts raw document bytes into an ordered sequence of labeled
//! [`Section`]s. Pure: no I/O beyond the input slice. Dispatch is a closed
//! match over the supported extensions; anything else is a content error.
//!
//! Extraction is best-effort by design — a section is emitted only when it
//! carries non-blank text, so downstream chunking never sees blank input
//! (the docx zero-section fallback is the documented exception).

use std::io::Read;

use quick_xml::events::Event;

use crate::error::PipelineError;
use crate::models::{Section, SectionLabel};

/// Maximum decompressed bytes read from a single ZIP entry (zip-bomb guard).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

type ZipBytes<'a> = zip::ZipArchive<std::io::Cursor<&'a [u8]>>;

/// Extract labeled sections from `bytes` declared as `extension`
/// (lowercased, dot-prefixed, e.g. `".pdf"`).
pub fn extract_sections(bytes: &[u8], extension: &str) -> Result<Vec<Section>, PipelineError> {
    match extension {
        ".txt" => Ok(extract_txt(bytes)),
        ".csv" => extract_csv(bytes),
        ".pdf" => extract_pdf(bytes),
        ".pptx" => extract_pptx(bytes),
        ".xlsx" => extract_xlsx(bytes),
        ".docx" => extract_docx(bytes),
        other => Err(PipelineError::content(format!(
            "no parser for extension '{}'",
            other
        ))),
    }
}

fn extract_txt(bytes: &[u8]) -> Vec<Section> {
    vec![Section {
        text: String::from_utf8_lossy(bytes).into_owned(),
        label: SectionLabel::text(),
    }]
}

/// All rows pipe-joined into one section labeled `{type: "csv"}`.
fn extract_csv(bytes: &[u8]) -> Result<Vec<Section>, PipelineError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(bytes);

    let mut rows: Vec<String> = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| PipelineError::content(format!("bad CSV: {}", e)))?;
        rows.push(record.iter().collect::<Vec<_>>().join(" | "));
    }

    if rows.is_empty() {
        return Ok(Vec::new());
    }

    Ok(vec![Section {
        text: rows.join("\n"),
        label: SectionLabel::csv(),
    }])
}

/// One section per page carrying extractable text; blank pages dropped.
fn extract_pdf(bytes: &[u8]) -> Result<Vec<Section>, PipelineError> {
    let document = lopdf::Document::load_mem(bytes)
        .map_err(|e| PipelineError::content(format!("bad PDF: {}", e)))?;

    let mut sections = Vec::new();
    for (page_no, _page_id) in document.get_pages() {
        let text = match document.extract_text(&[page_no]) {
            Ok(t) => t,
            // A single unextractable page is best-effort; skip it.
            Err(_) => continue,
        };
        if !text.trim().is_empty() {
            sections.push(Section {
                text,
                label: SectionLabel::Page { page: page_no },
            });
        }
    }
    Ok(sections)
}

fn open_archive(bytes: &[u8]) -> Result<ZipBytes<'_>, PipelineError> {
    zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| PipelineError::content(format!("bad OOXML archive: {}", e)))
}

fn read_zip_entry_bounded(
    archive: &mut ZipBytes<'_>,
    name: &str,
    max_bytes: u64,
) -> Result<Vec<u8>, PipelineError> {
    let entry = archive
        .by_name(name)
        .map_err(|e| PipelineError::content(format!("missing ZIP entry {}: {}", name, e)))?;
    let mut out = Vec::new();
    entry
        .take(max_bytes)
        .read_to_end(&mut out)
        .map_err(|e| PipelineError::content(format!("unreadable ZIP entry {}: {}", name, e)))?;
    if out.len() as u64 >= max_bytes {
        return Err(PipelineError::content(format!(
            "ZIP entry {} exceeds size limit ({} bytes)",
            name, max_bytes
        )));
    }
    Ok(out)
}

/// List archive entries matching `prefix`/`suffix`, sorted by the numeric
/// component between them (`ppt/slides/slide12.xml` → 12).
fn numbered_entries(archive: &ZipBytes<'_>, prefix: &str, suffix: &str) -> Vec<String> {
    let mut names: Vec<String> = archive
        .file_names()
        .filter(|n| n.starts_with(prefix) && n.ends_with(suffix))
        .map(|s| s.to_string())
        .collect();
    names.sort_by_key(|name| {
        name.trim_start_matches(prefix)
            .trim_end_matches(suffix)
            .parse::<u32>()
            .unwrap_or(u32::MAX)
    });
    names
}

fn xml_error(e: quick_xml::Error) -> PipelineError {
    PipelineError::content(format!("bad OOXML markup: {}", e))
}

// ============ PPTX ============

/// One section per slide, label `{slide: n}` (1-based, slide order).
///
/// Within a slide: text-frame paragraph text line by line, then table rows
/// with cells pipe-joined. Slides producing no text are dropped.
fn extract_pptx(bytes: &[u8]) -> Result<Vec<Section>, PipelineError> {
    let mut archive = open_archive(bytes)?;
    let slide_names = numbered_entries(&archive, "ppt/slides/slide", ".xml");

    let mut sections = Vec::new();
    for (idx, name) in slide_names.iter().enumerate() {
        let xml = read_zip_entry_bounded(&mut archive, name, MAX_XML_ENTRY_BYTES)?;
        let lines = slide_text_lines(&xml)?;
        if !lines.is_empty() {
            sections.push(Section {
                text: lines.join("\n"),
                label: SectionLabel::Slide {
                    slide: idx as u32 + 1,
                },
            });
        }
    }
    Ok(sections)
}

fn slide_text_lines(xml: &[u8]) -> Result<Vec<String>, PipelineError> {
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();

    let mut lines: Vec<String> = Vec::new();
    let mut in_text = false;
    let mut table_depth = 0u32;
    let mut paragraph = String::new();
    let mut cell = String::new();
    let mut row: Vec<String> = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"t" => in_text = true,
                b"tbl" => table_depth += 1,
                b"p" if table_depth == 0 => paragraph.clear(),
                b"tc" => cell.clear(),
                b"tr" => row.clear(),
                _ => {}
            },
            Ok(Event::Text(te)) if in_text => {
                let text = te.unescape().unwrap_or_default();
                if table_depth > 0 {
                    cell.push_str(&text);
                } else {
                    paragraph.push_str(&text);
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"tbl" => table_depth = table_depth.saturating_sub(1),
                b"p" if table_depth == 0 => {
                    let trimmed = paragraph.trim();
                    if !trimmed.is_empty() {
                        lines.push(trimmed.to_string());
                    }
                    paragraph.clear();
                }
                b"tc" => row.push(cell.trim().to_string()),
                b"tr" => {
                    let row_text = row.join(" | ");
                    if !row_text.trim_matches([' ', '|']).is_empty() {
                        lines.push(row_text);
                    }
                    row.clear();
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(xml_error(e)),
            _ => {}
        }
        buf.clear();
    }

    Ok(lines)
}

// ============ XLSX ============

/// One section per sheet, label `{sheet: name}`; rows pipe-joined, blank
/// rows dropped, sheets with no rows dropped.
fn extract_xlsx(bytes: &[u8]) -> Result<Vec<Section>, PipelineError> {
    let mut archive = open_archive(bytes)?;
    let shared_strings = if archive.by_name("xl/sharedStrings.xml").is_ok() {
        let xml = read_zip_entry_bounded(&mut archive, "xl/sharedStrings.xml", MAX_XML_ENTRY_BYTES)?;
        read_shared_strings(&xml)?
    } else {
        Vec::new()
    };

    let mut sections = Vec::new();
    for (name, file) in worksheet_parts(&mut archive)? {
        let xml = read_zip_entry_bounded(&mut archive, &file, MAX_XML_ENTRY_BYTES)?;
        let rows = sheet_rows(&xml, &shared_strings)?;
        if rows.is_empty() {
            continue;
        }
        sections.push(Section {
            text: rows.join("\n"),
            label: SectionLabel::Sheet { sheet: name },
        });
    }
    Ok(sections)
}

/// Worksheet part files in workbook order, each paired with its display name.
///
/// `xl/workbook.xml` lists sheets by `r:id`, resolved to part files through
/// `xl/_rels/workbook.xml.rels`; a workbook can order sheets differently from
/// the `sheetN.xml` numbering. Archives missing either part fall back to the
/// numbered part files paired with names by position.
fn worksheet_parts(archive: &mut ZipBytes<'_>) -> Result<Vec<(String, String)>, PipelineError> {
    let sheets = workbook_sheets(archive)?;
    let rels = workbook_rels(archive)?;

    let resolved: Vec<(String, String)> = sheets
        .iter()
        .filter_map(|(name, rid)| {
            let target = rels.get(rid.as_deref()?)?;
            Some((name.clone(), target.clone()))
        })
        .collect();
    if resolved.len() == sheets.len() && !resolved.is_empty() {
        return Ok(resolved);
    }

    let files = numbered_entries(archive, "xl/worksheets/sheet", ".xml");
    Ok(files
        .into_iter()
        .enumerate()
        .map(|(idx, file)| {
            let name = sheets
                .get(idx)
                .map(|(n, _)| n.clone())
                .unwrap_or_else(|| format!("Sheet{}", idx + 1));
            (name, file)
        })
        .collect())
}

/// Sheet display names and relationship ids in workbook order.
fn workbook_sheets(
    archive: &mut ZipBytes<'_>,
) -> Result<Vec<(String, Option<String>)>, PipelineError> {
    if archive.by_name("xl/workbook.xml").is_err() {
        return Ok(Vec::new());
    }
    let xml = read_zip_entry_bounded(archive, "xl/workbook.xml", MAX_XML_ENTRY_BYTES)?;
    let mut reader = quick_xml::Reader::from_reader(xml.as_slice());
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut sheets = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                if e.local_name().as_ref() == b"sheet" {
                    let mut name = None;
                    let mut rid = None;
                    for attr in e.attributes().flatten() {
                        match attr.key.as_ref() {
                            b"name" => {
                                name = Some(String::from_utf8_lossy(&attr.value).into_owned())
                            }
                            b"r:id" => {
                                rid = Some(String::from_utf8_lossy(&attr.value).into_owned())
                            }
                            _ => {}
                        }
                    }
                    if let Some(name) = name {
                        sheets.push((name, rid));
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(xml_error(e)),
            _ => {}
        }
        buf.clear();
    }
    Ok(sheets)
}

/// Relationship id to part-file map from `xl/_rels/workbook.xml.rels`.
/// Targets are relative to `xl/`.
fn workbook_rels(
    archive: &mut ZipBytes<'_>,
) -> Result<std::collections::HashMap<String, String>, PipelineError> {
    let mut rels = std::collections::HashMap::new();
    if archive.by_name("xl/_rels/workbook.xml.rels").is_err() {
        return Ok(rels);
    }
    let xml = read_zip_entry_bounded(archive, "xl/_rels/workbook.xml.rels", MAX_XML_ENTRY_BYTES)?;
    let mut reader = quick_xml::Reader::from_reader(xml.as_slice());
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                if e.local_name().as_ref() == b"Relationship" {
                    let mut id = None;
                    let mut target = None;
                    for attr in e.attributes().flatten() {
                        match attr.key.as_ref() {
                            b"Id" => id = Some(String::from_utf8_lossy(&attr.value).into_owned()),
                            b"Target" => {
                                target = Some(String::from_utf8_lossy(&attr.value).into_owned())
                            }
                            _ => {}
                        }
                    }
                    if let (Some(id), Some(target)) = (id, target) {
                        let part = match target.strip_prefix('/') {
                            Some(absolute) => absolute.to_string(),
                            None => format!("xl/{}", target),
                        };
                        rels.insert(id, part);
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(xml_error(e)),
            _ => {}
        }
        buf.clear();
    }
    Ok(rels)
}

fn read_shared_strings(xml: &[u8]) -> Result<Vec<String>, PipelineError> {
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();

    let mut strings = Vec::new();
    let mut in_si = false;
    let mut in_t = false;
    let mut current = String::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"si" => {
                    in_si = true;
                    current.clear();
                }
                b"t" if in_si => in_t = true,
                _ => {}
            },
            Ok(Event::Text(te)) if in_t => {
                current.push_str(&te.unescape().unwrap_or_default());
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_t = false,
                b"si" => {
                    in_si = false;
                    strings.push(std::mem::take(&mut current));
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(xml_error(e)),
            _ => {}
        }
        buf.clear();
    }
    Ok(strings)
}

/// Parse one worksheet into pipe-joined row strings. Cell positions come
/// from the `r` attribute so gaps render as empty cells.
fn sheet_rows(xml: &[u8], shared_strings: &[String]) -> Result<Vec<String>, PipelineError> {
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();

    let mut rows: Vec<String> = Vec::new();
    let mut cells: Vec<String> = Vec::new();
    let mut in_v = false;
    let mut in_inline_t = false;
    let mut cell_is_shared = false;
    let mut cell_col: Option<usize> = None;
    let mut cell_value = String::new();

    let close_cell = |cells: &mut Vec<String>, col: Option<usize>, value: String| {
        let idx = col.unwrap_or(cells.len());
        while cells.len() < idx {
            cells.push(String::new());
        }
        cells.push(value);
    };

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"row" => cells.clear(),
                b"c" => {
                    cell_is_shared = false;
                    cell_col = None;
                    cell_value.clear();
                    for attr in e.attributes().flatten() {
                        match attr.key.as_ref() {
                            b"t" => cell_is_shared = attr.value.as_ref() == b"s",
                            b"r" => {
                                cell_col =
                                    column_index(&String::from_utf8_lossy(&attr.value));
                            }
                            _ => {}
                        }
                    }
                }
                b"v" => in_v = true,
                b"t" => in_inline_t = true,
                _ => {}
            },
            Ok(Event::Text(te)) => {
                let text = te.unescape().unwrap_or_default();
                if in_v {
                    if cell_is_shared {
                        if let Ok(i) = text.trim().parse::<usize>() {
                            if let Some(s) = shared_strings.get(i) {
                                cell_value.push_str(s);
                            }
                        }
                    } else {
                        cell_value.push_str(&text);
                    }
                } else if in_inline_t {
                    cell_value.push_str(&text);
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"v" => in_v = false,
                b"t" => in_inline_t = false,
                b"c" => {
                    close_cell(&mut cells, cell_col, std::mem::take(&mut cell_value));
                }
                b"row" => {
                    let line = cells.join(" | ");
                    if !line.trim_matches([' ', '|']).is_empty() {
                        rows.push(line);
                    }
                    cells.clear();
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(xml_error(e)),
            _ => {}
        }
        buf.clear();
    }
    Ok(rows)
}

/// 0-based column index from a cell reference like `"B2"` or `"AA10"`.
fn column_index(cell_ref: &str) -> Option<usize> {
    let letters: String = cell_ref
        .chars()
        .take_while(|c| c.is_ascii_alphabetic())
        .collect();
    if letters.is_empty() {
        return None;
    }
    let mut idx = 0usize;
    for c in letters.chars() {
        idx = idx * 26 + (c.to_ascii_uppercase() as usize - 'A' as usize + 1);
    }
    Some(idx - 1)
}

// ============ DOCX ============

/// Paragraphs accumulate into a buffer; a blank paragraph closes the buffer
/// as a section labeled `{section: k}` (1-based). A document yielding no
/// sections produces exactly one empty section with an empty label, so
/// downstream code always sees a non-empty result.
fn extract_docx(bytes: &[u8]) -> Result<Vec<Section>, PipelineError> {
    let mut archive = open_archive(bytes)?;
    let xml = read_zip_entry_bounded(&mut archive, "word/document.xml", MAX_XML_ENTRY_BYTES)?;

    let mut reader = quick_xml::Reader::from_reader(xml.as_slice());
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();

    let mut sections: Vec<Section> = Vec::new();
    let mut current: Vec<String> = Vec::new();
    let mut in_t = false;
    let mut paragraph = String::new();

    let flush = |sections: &mut Vec<Section>, current: &mut Vec<String>| {
        if !current.is_empty() {
            let ordinal = sections.len() as u32 + 1;
            sections.push(Section {
                text: current.join("\n"),
                label: SectionLabel::Section { section: ordinal },
            });
            current.clear();
        }
    };

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"p" => paragraph.clear(),
                b"t" => in_t = true,
                _ => {}
            },
            // A self-closing <w:p/> is a blank paragraph.
            Ok(Event::Empty(e)) if e.local_name().as_ref() == b"p" => {
                flush(&mut sections, &mut current);
            }
            Ok(Event::Text(te)) if in_t => {
                paragraph.push_str(&te.unescape().unwrap_or_default());
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_t = false,
                b"p" => {
                    let trimmed = paragraph.trim();
                    if trimmed.is_empty() {
                        flush(&mut sections, &mut current);
                    } else {
                        current.push(trimmed.to_string());
                    }
                    paragraph.clear();
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(xml_error(e)),
            _ => {}
        }
        buf.clear();
    }
    flush(&mut sections, &mut current);

    if sections.is_empty() {
        sections.push(Section {
            text: String::new(),
            label: SectionLabel::Empty {},
        });
    }
    Ok(sections)
}
