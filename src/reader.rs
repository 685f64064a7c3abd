//! Per-extension document readers.
//!
//! Turns a file path into plain text plus extracted structure metadata.
//! Dispatch is by lowercased extension; unsupported extensions return `None`
//! and the file is ignored by ingestion. A reader failure is isolated to the
//! file: it surfaces as a `FileProcessing` error and the pipeline moves on.

use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;

use serde_json::Value;

use crate::error::{EngineError, Result};

/// Maximum decompressed bytes read from a single ZIP entry (zip-bomb guard).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

/// Plain text body plus per-format structure metadata.
#[derive(Debug, Clone)]
pub struct ExtractedDocument {
    pub text: String,
    pub metadata: BTreeMap<String, Value>,
}

impl ExtractedDocument {
    fn new(text: String) -> Self {
        Self {
            text,
            metadata: BTreeMap::new(),
        }
    }

    fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }
}

fn processing_error(path: &Path, reason: impl std::fmt::Display) -> EngineError {
    EngineError::FileProcessing {
        path: path.display().to_string(),
        reason: reason.to_string(),
    }
}

/// Whether a reader exists for this path's extension. Extensions may be on
/// the ingest allow-list without having a reader yet (e.g. `doc`, `rtf`);
/// such files are ignored rather than reported as forever-unindexed.
pub fn has_reader(path: &Path) -> bool {
    match path.extension() {
        Some(ext) => matches!(
            ext.to_string_lossy().to_lowercase().as_str(),
            "txt" | "md" | "json" | "html" | "htm" | "xml" | "csv" | "pdf" | "docx"
        ),
        None => false,
    }
}

/// Read and extract a document. `Ok(None)` means the extension has no
/// reader and the file should be ignored.
pub fn read_document(path: &Path) -> Result<Option<ExtractedDocument>> {
    let ext = match path.extension() {
        Some(ext) => ext.to_string_lossy().to_lowercase(),
        None => return Ok(None),
    };

    let doc = match ext.as_str() {
        "txt" => read_text(path)?,
        "md" => read_markdown(path)?,
        "json" => read_json(path)?,
        "html" | "htm" => read_html(path)?,
        "xml" => read_xml(path)?,
        "csv" => read_csv(path)?,
        "pdf" => read_pdf(path)?,
        "docx" => read_docx(path)?,
        _ => return Ok(None),
    };
    Ok(Some(doc))
}

fn read_to_string(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|e| processing_error(path, e))
}

fn read_text(path: &Path) -> Result<ExtractedDocument> {
    let text = read_to_string(path)?;
    let lines = text.lines().count() as i64;
    Ok(ExtractedDocument::new(text).with("lines", lines))
}

fn read_markdown(path: &Path) -> Result<ExtractedDocument> {
    let text = read_to_string(path)?;
    let headings = text
        .lines()
        .filter(|l| l.trim_start().starts_with('#'))
        .count() as i64;
    Ok(ExtractedDocument::new(text).with("headings", headings))
}

fn read_json(path: &Path) -> Result<ExtractedDocument> {
    let text = read_to_string(path)?;
    let value: Value =
        serde_json::from_str(&text).map_err(|e| processing_error(path, format!("invalid JSON: {}", e)))?;
    let (shape, entries) = match &value {
        Value::Array(items) => ("array", items.len() as i64),
        Value::Object(map) => ("object", map.len() as i64),
        _ => ("scalar", 1),
    };
    Ok(ExtractedDocument::new(text)
        .with("top_level", shape)
        .with("entries", entries))
}

fn read_html(path: &Path) -> Result<ExtractedDocument> {
    let raw = read_to_string(path)?;
    let text = html2text::from_read(raw.as_bytes(), 100)
        .map_err(|e| processing_error(path, format!("HTML rendering failed: {}", e)))?;

    let mut doc = ExtractedDocument::new(text);
    if let Some(title) = html_title(&raw) {
        doc = doc.with("title", title);
    }
    Ok(doc)
}

fn html_title(raw: &str) -> Option<String> {
    let lower = raw.to_lowercase();
    let start = lower.find("<title")?;
    let open_end = raw[start..].find('>')? + start + 1;
    let close = lower[open_end..].find("</title>")? + open_end;
    let title = raw[open_end..close].trim();
    if title.is_empty() {
        None
    } else {
        Some(title.to_string())
    }
}

fn read_xml(path: &Path) -> Result<ExtractedDocument> {
    let raw = read_to_string(path)?;
    let mut reader = quick_xml::Reader::from_str(&raw);
    reader.config_mut().trim_text(true);

    let mut out = String::new();
    let mut elements = 0i64;
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(_)) => elements += 1,
            Ok(quick_xml::events::Event::Empty(_)) => elements += 1,
            Ok(quick_xml::events::Event::Text(t)) => {
                let text = t.unescape().unwrap_or_default();
                let text = text.trim();
                if !text.is_empty() {
                    if !out.is_empty() {
                        out.push(' ');
                    }
                    out.push_str(text);
                }
            }
            Ok(quick_xml::events::Event::Eof) => break,
            Err(e) => return Err(processing_error(path, format!("XML parse error: {}", e))),
            _ => {}
        }
        buf.clear();
    }
    Ok(ExtractedDocument::new(out).with("elements", elements))
}

fn read_csv(path: &Path) -> Result<ExtractedDocument> {
    let file = std::fs::File::open(path).map_err(|e| processing_error(path, e))?;
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(file);

    let mut lines: Vec<String> = Vec::new();
    let mut columns = 0usize;
    for record in reader.records() {
        let record = record.map_err(|e| processing_error(path, format!("CSV parse error: {}", e)))?;
        columns = columns.max(record.len());
        let line = record
            .iter()
            .map(|cell| cell.trim())
            .filter(|cell| !cell.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        if !line.is_empty() {
            lines.push(line);
        }
    }

    let rows = lines.len() as i64;
    Ok(ExtractedDocument::new(lines.join("\n"))
        .with("rows", rows)
        .with("columns", columns as i64))
}

fn read_pdf(path: &Path) -> Result<ExtractedDocument> {
    let text = pdf_extract::extract_text(path)
        .map_err(|e| processing_error(path, format!("PDF extraction failed: {}", e)))?;
    // pdf-extract renders page breaks as form feeds.
    let pages = text.matches('\u{c}').count() as i64 + 1;
    Ok(ExtractedDocument::new(text).with("pages", pages))
}

fn read_docx(path: &Path) -> Result<ExtractedDocument> {
    let bytes = std::fs::read(path).map_err(|e| processing_error(path, e))?;
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes.as_slice()))
        .map_err(|e| processing_error(path, format!("not a DOCX archive: {}", e)))?;

    let entry = archive
        .by_name("word/document.xml")
        .map_err(|_| processing_error(path, "word/document.xml not found"))?;

    let mut doc_xml = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut doc_xml)
        .map_err(|e| processing_error(path, e))?;
    if doc_xml.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(processing_error(path, "word/document.xml exceeds size limit"));
    }

    let (text, paragraphs) = extract_docx_text(&doc_xml).map_err(|e| processing_error(path, e))?;
    Ok(ExtractedDocument::new(text).with("paragraphs", paragraphs))
}

/// Collect `w:t` runs, inserting newlines at paragraph ends.
fn extract_docx_text(xml: &[u8]) -> std::result::Result<(String, i64), String> {
    let mut out = String::new();
    let mut paragraphs = 0i64;
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut in_t = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) => {
                if e.local_name().as_ref() == b"t" {
                    in_t = true;
                }
            }
            Ok(quick_xml::events::Event::Text(t)) if in_t => {
                out.push_str(t.unescape().unwrap_or_default().as_ref());
            }
            Ok(quick_xml::events::Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_t = false,
                b"p" => {
                    paragraphs += 1;
                    if !out.ends_with('\n') && !out.is_empty() {
                        out.push('\n');
                    }
                }
                _ => {}
            },
            Ok(quick_xml::events::Event::Eof) => break,
            Err(e) => return Err(format!("DOCX XML parse error: {}", e)),
            _ => {}
        }
        buf.clear();
    }
    Ok((out, paragraphs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write(dir: &TempDir, name: &str, content: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn txt_reads_verbatim() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "a.txt", "alpha\nbeta\n");
        let doc = read_document(&path).unwrap().unwrap();
        assert_eq!(doc.text, "alpha\nbeta\n");
        assert_eq!(doc.metadata.get("lines"), Some(&Value::from(2)));
    }

    #[test]
    fn markdown_counts_headings() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "a.md", "# Title\n\nbody\n\n## Sub\nmore\n");
        let doc = read_document(&path).unwrap().unwrap();
        assert_eq!(doc.metadata.get("headings"), Some(&Value::from(2)));
    }

    #[test]
    fn json_reports_shape() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "a.json", r#"[{"x":1},{"x":2},{"x":3}]"#);
        let doc = read_document(&path).unwrap().unwrap();
        assert_eq!(doc.metadata.get("top_level"), Some(&Value::from("array")));
        assert_eq!(doc.metadata.get("entries"), Some(&Value::from(3)));
    }

    #[test]
    fn invalid_json_is_isolated_error() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "a.json", "{not json");
        let err = read_document(&path).unwrap_err();
        assert!(matches!(err, EngineError::FileProcessing { .. }));
    }

    #[test]
    fn csv_counts_rows_and_columns() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "a.csv", "name,score\nalice,10\nbob,20\n");
        let doc = read_document(&path).unwrap().unwrap();
        assert_eq!(doc.metadata.get("rows"), Some(&Value::from(3)));
        assert_eq!(doc.metadata.get("columns"), Some(&Value::from(2)));
        assert!(doc.text.contains("alice 10"));
    }

    #[test]
    fn html_strips_tags_and_finds_title() {
        let dir = TempDir::new().unwrap();
        let path = write(
            &dir,
            "a.html",
            "<html><head><title>Greeting</title></head><body><p>hello <b>world</b></p></body></html>",
        );
        let doc = read_document(&path).unwrap().unwrap();
        assert!(doc.text.contains("hello"));
        assert!(doc.text.contains("world"));
        assert!(!doc.text.contains("<p>"));
        assert_eq!(doc.metadata.get("title"), Some(&Value::from("Greeting")));
    }

    #[test]
    fn xml_extracts_text_nodes() {
        let dir = TempDir::new().unwrap();
        let path = write(
            &dir,
            "a.xml",
            "<root><item>first</item><item>second</item></root>",
        );
        let doc = read_document(&path).unwrap().unwrap();
        assert_eq!(doc.text, "first second");
        assert_eq!(doc.metadata.get("elements"), Some(&Value::from(3)));
    }

    #[test]
    fn reader_capability_matches_dispatch() {
        assert!(has_reader(Path::new("a.md")));
        assert!(has_reader(Path::new("a.DOCX")));
        assert!(!has_reader(Path::new("a.rtf")));
        assert!(!has_reader(Path::new("a.doc")));
        assert!(!has_reader(Path::new("noext")));
    }

    #[test]
    fn unsupported_extension_returns_none() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "a.rtf", "{\\rtf1 hello}");
        assert!(read_document(&path).unwrap().is_none());
        let path = write(&dir, "a.bin", "xx");
        assert!(read_document(&path).unwrap().is_none());
    }

    #[test]
    fn invalid_docx_is_isolated_error() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "a.docx", "not a zip");
        let err = read_document(&path).unwrap_err();
        assert!(matches!(err, EngineError::FileProcessing { .. }));
    }
}
