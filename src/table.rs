//! Upload decoding and CSV parsing into an untyped table

use crate::config::NormalizationConfig;
use crate::error::{PipelineError, PipelineResult};
use anyhow::Result;
use csv::{ReaderBuilder, Trim};
use std::borrow::Cow;
use std::collections::HashSet;
use tracing::debug;

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Table as decoded from the upload. Cells stay text until typed by the
/// normalizer; short rows are padded with empty cells.
#[derive(Debug, Clone, PartialEq)]
pub struct RawTable {
    columns: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl RawTable {
    /// Header names in input order
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn n_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Cells of one column, top to bottom
    pub fn column_values(&self, index: usize) -> impl Iterator<Item = &str> + '_ {
        self.rows.iter().map(move |row| row[index].as_str())
    }
}

/// Turns raw upload bytes into a [`RawTable`]
#[derive(Debug, Clone)]
pub struct TableLoader {
    delimiter: u8,
    comment: Option<u8>,
}

impl Default for TableLoader {
    fn default() -> Self {
        Self {
            delimiter: b',',
            comment: Some(b'#'),
        }
    }
}

impl TableLoader {
    pub fn new(delimiter: u8, comment: Option<u8>) -> Self {
        Self { delimiter, comment }
    }

    pub fn from_config(config: &NormalizationConfig) -> Result<Self> {
        Ok(Self::new(config.delimiter_byte()?, config.comment_byte()?))
    }

    /// Decode and parse an upload.
    ///
    /// Returns `EmptyInput` for an empty upload or a header without data
    /// rows, never `Parse`.
    pub fn load(&self, bytes: &[u8]) -> PipelineResult<RawTable> {
        let text = decode_text(bytes)?;
        let (body, skipped_lines) = self.skip_preamble(&text);

        // Only the preamble holds comments; `#N/A` in a data row is a cell
        let mut reader = ReaderBuilder::new()
            .delimiter(self.delimiter)
            .comment(None)
            .has_headers(true)
            .flexible(true)
            .trim(Trim::Fields)
            .from_reader(body.as_bytes());

        let header = reader
            .headers()
            .map_err(|e| PipelineError::Parse(e.to_string()))?
            .clone();
        if header.is_empty() {
            return Err(PipelineError::EmptyInput);
        }
        let columns = disambiguate_headers(header.iter());
        let width = columns.len();

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record.map_err(|e| PipelineError::Parse(e.to_string()))?;
            let mut row: Vec<String> = record.iter().map(str::to_string).collect();
            if row.len() > width {
                if row[width..].iter().any(|cell| !cell.is_empty()) {
                    let line =
                        record.position().map(|p| p.line()).unwrap_or(0) + skipped_lines;
                    return Err(PipelineError::Parse(format!(
                        "line {}: expected {} fields, saw {}",
                        line,
                        width,
                        row.len()
                    )));
                }
                row.truncate(width);
            }
            row.resize(width, String::new());
            rows.push(row);
        }

        if rows.is_empty() {
            return Err(PipelineError::EmptyInput);
        }

        debug!(
            columns = width,
            rows = rows.len(),
            preamble_lines = skipped_lines,
            "Parsed CSV upload"
        );
        Ok(RawTable { columns, rows })
    }

    /// Skip the comment and blank lines ahead of the header. Returns the
    /// remaining text and the number of lines skipped.
    fn skip_preamble<'t>(&self, text: &'t str) -> (&'t str, u64) {
        let Some(marker) = self.comment else {
            return (text, 0);
        };

        let mut rest = text;
        let mut skipped = 0;
        while !rest.is_empty() {
            let (line, next) = match rest.find('\n') {
                Some(end) => (&rest[..end], &rest[end + 1..]),
                None => (rest, ""),
            };
            let line = line.trim_start();
            if !line.is_empty() && line.as_bytes()[0] != marker {
                break;
            }
            rest = next;
            skipped += 1;
        }
        (rest, skipped)
    }
}

/// UTF-8 first, then Latin-1. Latin-1 accepts every byte, so bytes that are
/// control characters there (other than tab, LF, CR) mean the upload is not
/// text at all.
pub fn decode_text(bytes: &[u8]) -> PipelineResult<Cow<'_, str>> {
    let bytes = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);

    let utf8_err = match std::str::from_utf8(bytes) {
        Ok(text) => return Ok(Cow::Borrowed(text)),
        Err(e) => e,
    };

    if let Some(offset) = bytes.iter().position(|&b| is_latin1_control(b)) {
        return Err(PipelineError::Decode(format!(
            "invalid UTF-8 ({}) and byte 0x{:02X} at offset {} is not Latin-1 text",
            utf8_err, bytes[offset], offset
        )));
    }

    debug!("Upload is not UTF-8, decoded as Latin-1");
    Ok(Cow::Owned(bytes.iter().map(|&b| b as char).collect()))
}

fn is_latin1_control(b: u8) -> bool {
    matches!(b, 0x00..=0x08 | 0x0B | 0x0C | 0x0E..=0x1F | 0x7F..=0x9F)
}

/// Blank names become `Unnamed: <i>`, repeats get `.1`, `.2`, ...
fn disambiguate_headers<'a>(names: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut used = HashSet::new();
    let mut columns = Vec::new();

    for (i, name) in names.enumerate() {
        let base = if name.is_empty() {
            format!("Unnamed: {}", i)
        } else {
            name.to_string()
        };

        let mut candidate = base.clone();
        let mut suffix = 1;
        while used.contains(&candidate) {
            candidate = format!("{}.{}", base, suffix);
            suffix += 1;
        }
        used.insert(candidate.clone());
        columns.push(candidate);
    }

    columns
}
